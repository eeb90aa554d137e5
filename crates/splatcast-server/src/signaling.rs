//! Offer/answer signaling and session lifecycle management

use crate::control;
use crate::error::{AppError, Result};
use crate::ice::{self, RemoteCandidate};
use crate::peer::{ConnectionState, PeerConnector, PeerEvent, PeerEvents};
use crate::producer::{FrameProducer, VideoClock};
use crate::session::{Session, SessionRegistry};
use anyhow::Context;
use splatcast_media::{EncoderSettings, H264Encoder, RendererFactory};
use splatcast_protocol::{IceCandidateRequest, IceServer, SessionDescription};
use std::sync::Arc;

#[derive(Clone)]
pub struct SignalingService {
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn PeerConnector>,
    renderers: Arc<dyn RendererFactory>,
    ice_servers: Arc<Vec<IceServer>>,
    bitrate: u32,
    clock: VideoClock,
}

impl SignalingService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        connector: Arc<dyn PeerConnector>,
        renderers: Arc<dyn RendererFactory>,
        ice_servers: Vec<IceServer>,
        bitrate: u32,
        clock: VideoClock,
    ) -> Self {
        Self {
            registry,
            connector,
            renderers,
            ice_servers: Arc::new(ice_servers),
            bitrate,
            clock,
        }
    }

    /// Start a session for `session_id` from the viewer's offer and return our answer
    pub async fn create_offer(
        &self,
        session_id: &str,
        offer: SessionDescription,
    ) -> Result<SessionDescription> {
        if session_id.is_empty() {
            return Err(AppError::BadRequest("session_id is required".to_string()));
        }

        if !offer.is_offer() {
            return Err(AppError::BadRequest(format!(
                "Expected an offer, got '{}'",
                offer.sdp_type
            )));
        }

        if self.registry.contains(session_id).await {
            return Err(AppError::Conflict(format!(
                "Session {} is already active",
                session_id
            )));
        }

        let renderer = self.renderers.create().context("Failed to create renderer")?;
        let (width, height) = (renderer.camera().width, renderer.camera().height);

        let encoder = H264Encoder::new(EncoderSettings {
            bitrate: self.bitrate,
            fps: self.clock.fps(),
            ..EncoderSettings::new(width, height)
        })
        .context("Failed to create H.264 encoder")?;

        let (peer, events) = self
            .connector
            .connect(&self.ice_servers)
            .await
            .context("Failed to create peer connection")?;

        let session = Arc::new(Session::new(session_id, renderer, peer.clone()));

        if let Err(e) = self.registry.insert(session.clone()).await {
            // Lost a race with a concurrent offer for the same id
            if let Err(close_err) = peer.close().await {
                tracing::warn!("Failed to close duplicate peer for {}: {}", session_id, close_err);
            }
            return Err(AppError::Conflict(e.to_string()));
        }

        self.spawn_event_task(session.clone(), events);

        let producer = FrameProducer::new(session.clone(), Box::new(encoder), self.clock);
        let negotiated = async {
            peer.attach_video(producer).await?;
            peer.accept_offer(offer).await
        }
        .await;

        match negotiated {
            Ok(answer) => {
                tracing::info!("Session {}: answered offer ({}x{})", session_id, width, height);
                Ok(answer)
            }
            Err(e) => {
                teardown(&self.registry, &session).await;
                Err(AppError::Internal(
                    e.context(format!("Failed to negotiate session {}", session_id)),
                ))
            }
        }
    }

    /// Forward a trickled candidate to the session's ICE agent
    pub async fn add_ice_candidate(
        &self,
        session_id: &str,
        request: IceCandidateRequest,
    ) -> Result<()> {
        let session = self
            .registry
            .get(session_id)
            .await
            .filter(|session| !session.is_closed())
            .ok_or_else(|| AppError::NotFound(format!("Session {} not found", session_id)))?;

        let descriptor = match ice::parse(&request.candidate) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::warn!("Session {}: {}", session_id, e);
                return Ok(());
            }
        };

        let candidate = RemoteCandidate {
            descriptor,
            sdp_mid: request.sdp_mid,
            sdp_mline_index: request.sdp_mline_index,
            username_fragment: request.username_fragment,
        };

        if let Err(e) = session.peer().add_ice_candidate(candidate).await {
            tracing::warn!("Session {}: ICE agent rejected candidate: {}", session_id, e);
        }

        Ok(())
    }

    /// Tear down every session (process shutdown)
    pub async fn shutdown(&self) {
        let sessions = self.registry.drain().await;
        tracing::info!("Closing {} session(s)", sessions.len());

        for session in sessions {
            teardown(&self.registry, &session).await;
        }
    }

    fn spawn_event_task(&self, session: Arc<Session>, mut events: PeerEvents) {
        let registry = self.registry.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(PeerEvent::StateChanged(connection)) => {
                            tracing::info!("Session {}: connection {}", session.id(), connection);
                            if connection == ConnectionState::Connected {
                                session.mark_connected();
                            } else if connection.is_terminal() {
                                break;
                            }
                        }
                        Some(PeerEvent::ControlMessage(raw)) => {
                            if let Err(e) = control::handle(&raw, &session) {
                                tracing::warn!("Session {}: {}", session.id(), e);
                            }
                        }
                        None => {
                            tracing::debug!("Session {}: peer event stream ended", session.id());
                            break;
                        }
                    },
                    _ = session.closed() => break,
                }
            }

            teardown(&registry, &session).await;
        });
    }
}

/// Mark closed, unregister, then close the peer connection
async fn teardown(registry: &SessionRegistry, session: &Arc<Session>) {
    if session.mark_failed() {
        tracing::info!("Session {} failed", session.id());
    }

    registry.remove(session).await;

    if let Err(e) = session.peer().close().await {
        tracing::warn!("Session {}: error closing peer connection: {}", session.id(), e);
    }
}
