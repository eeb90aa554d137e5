//! Peer connection abstraction
//!
//! A connection reports what happens to it over an event channel instead of
//! through callbacks: lifecycle transitions and raw data-channel messages are
//! both delivered as [`PeerEvent`]s, in arrival order, to whoever owns the
//! [`PeerEvents`] receiver.

use crate::ice::RemoteCandidate;
use crate::producer::FrameProducer;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use splatcast_protocol::{IceServer, SessionDescription};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States after which the connection never carries media again
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub enum PeerEvent {
    StateChanged(ConnectionState),
    /// Raw payload received on the control data channel
    ControlMessage(Bytes),
}

pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;
pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// One established (or establishing) peer connection
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Attach the session's single outbound video track, fed by `producer`
    async fn attach_video(&self, producer: FrameProducer) -> Result<()>;

    /// Apply the remote offer and return the local answer
    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription>;

    /// Hand a trickled remote candidate to the ICE agent
    async fn add_ice_candidate(&self, candidate: RemoteCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates peer connections
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, ice_servers: &[IceServer]) -> Result<(Arc<dyn PeerLink>, PeerEvents)>;
}
