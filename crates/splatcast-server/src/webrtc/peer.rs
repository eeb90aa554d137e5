//! webrtc-rs backed peer connections

use crate::ice::RemoteCandidate;
use crate::peer::{ConnectionState, PeerConnector, PeerEvent, PeerEventSender, PeerEvents, PeerLink};
use crate::producer::{FrameProducer, ProducerError, VideoClock};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use splatcast_media::{EncodedFrame, TimeBase};
use splatcast_protocol::{IceServer, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtcp::packet::Packet;
use webrtc::rtcp::payload_feedbacks::full_intra_request::FullIntraRequest;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

const H264_PAYLOAD_TYPE: u8 = 96;

fn h264_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "video/H264".to_string(),
        clock_rate: 90000,
        channels: 0,
        // Baseline profile, level 3.1; packetization-mode=1 for non-interleaved NAL units
        sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
            .to_string(),
        rtcp_feedback: vec![
            RTCPFeedback {
                typ: "goog-remb".to_owned(),
                parameter: "".to_owned(),
            },
            RTCPFeedback {
                typ: "ccm".to_owned(),
                parameter: "fir".to_owned(),
            },
            RTCPFeedback {
                typ: "nack".to_owned(),
                parameter: "".to_owned(),
            },
            RTCPFeedback {
                typ: "nack".to_owned(),
                parameter: "pli".to_owned(),
            },
        ],
    }
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => {
                ConnectionState::New
            }
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

/// Creates peer connections that send one H.264 track
pub struct RtcPeerConnector {
    api: API,
}

impl RtcPeerConnector {
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();

        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: h264_capability(),
                payload_type: H264_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Video,
        )?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(SettingEngine::default())
            .build();

        Ok(Self { api })
    }
}

#[async_trait]
impl PeerConnector for RtcPeerConnector {
    async fn connect(&self, ice_servers: &[IceServer]) -> Result<(Arc<dyn PeerLink>, PeerEvents)> {
        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(self.api.new_peer_connection(config).await?);
        let (tx, rx) = mpsc::unbounded_channel();

        forward_events(&pc, tx);

        Ok((Arc::new(RtcPeer { pc }), rx))
    }
}

/// Route connection state changes and data-channel messages into `events`
fn forward_events(pc: &RTCPeerConnection, events: PeerEventSender) {
    let state_events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let _ = state_events.send(PeerEvent::StateChanged(state.into()));
        Box::pin(async {})
    }));

    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let events = events.clone();
        Box::pin(async move {
            tracing::debug!("Data channel '{}' opened", dc.label());
            dc.on_message(Box::new(move |msg: DataChannelMessage| {
                let _ = events.send(PeerEvent::ControlMessage(msg.data));
                Box::pin(async {})
            }));
        })
    }));
}

pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerLink for RtcPeer {
    async fn attach_video(&self, producer: FrameProducer) -> Result<()> {
        let track = Arc::new(TrackLocalStaticSample::new(
            h264_capability(),
            "video".to_string(),
            "splatcast".to_string(),
        ));

        let rtp_sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Interceptors only see RTCP (NACK, receiver reports) if it is read
        let keyframe = producer.keyframe_request();
        let session_id = producer.session().id().to_string();
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((packets, _)) = rtp_sender.read(&mut rtcp_buf).await {
                if requests_keyframe(&packets) {
                    tracing::debug!("Session {}: viewer asked for a keyframe", session_id);
                    keyframe.request();
                }
            }
        });

        tokio::spawn(pump_frames(producer, track));
        Ok(())
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        let offer = RTCSessionDescription::offer(offer.sdp)?;
        self.pc.set_remote_description(offer).await?;

        let answer = self.pc.create_answer(None).await?;
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;
        let _ = gather_complete.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| anyhow!("No local description after answering"))?;

        Ok(SessionDescription::answer(local.sdp))
    }

    async fn add_ice_candidate(&self, candidate: RemoteCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.descriptor.to_string(),
                sdp_mid: Some(candidate.sdp_mid),
                sdp_mline_index: Some(candidate.sdp_mline_index),
                username_fragment: Some(candidate.username_fragment),
            })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

/// Whether the viewer reported picture loss (PLI) or asked for a full intra frame (FIR)
fn requests_keyframe(packets: &[Box<dyn Packet + Send + Sync>]) -> bool {
    packets.iter().any(|packet| {
        let packet = packet.as_any();
        packet.is::<PictureLossIndication>() || packet.is::<FullIntraRequest>()
    })
}

/// Destination for encoded samples
#[async_trait]
trait SampleSink: Send + Sync {
    async fn send_sample(&self, sample: &Sample) -> Result<()>;
}

#[async_trait]
impl SampleSink for TrackLocalStaticSample {
    async fn send_sample(&self, sample: &Sample) -> Result<()> {
        self.write_sample(sample).await?;
        Ok(())
    }
}

/// Maps producer timestamps onto track samples
///
/// The track advances its RTP clock by each sample's duration, so a frame slot
/// the producer gave up on is reported as a dropped packet on the next sample
/// to keep the RTP timestamps in step with the pts.
struct SampleClock {
    time_base: TimeBase,
    ticks_per_frame: u64,
    expected_pts: u64,
}

impl SampleClock {
    fn new(clock: VideoClock) -> Self {
        Self {
            time_base: clock.time_base(),
            ticks_per_frame: clock.ticks_per_frame(),
            expected_pts: 0,
        }
    }

    fn sample(&mut self, frame: EncodedFrame) -> Sample {
        let skipped = frame.pts.saturating_sub(self.expected_pts) / self.ticks_per_frame;
        self.expected_pts = frame.pts + self.ticks_per_frame;

        Sample {
            data: frame.payload,
            duration: self.time_base.duration(self.ticks_per_frame),
            prev_dropped_packets: u16::try_from(skipped).unwrap_or(u16::MAX),
            ..Default::default()
        }
    }
}

/// Pull one frame per tick once connected and write it to `sink`
async fn pump_frames<S: SampleSink>(mut producer: FrameProducer, sink: Arc<S>) {
    let session = producer.session().clone();

    if !session.connected().await {
        tracing::debug!("Session {}: closed before connecting", session.id());
        return;
    }

    let clock = producer.clock();
    let mut samples = SampleClock::new(clock);
    let mut ticker = tokio::time::interval(clock.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!("Session {}: streaming started", session.id());

    loop {
        ticker.tick().await;

        match producer.pull() {
            Ok(frame) => {
                let sample = samples.sample(frame);
                if let Err(e) = sink.send_sample(&sample).await {
                    tracing::warn!("Session {}: failed to write sample: {}", session.id(), e);
                }
            }
            Err(ProducerError::Exhausted { .. }) => continue,
            Err(ProducerError::SessionClosed) => break,
        }
    }

    tracing::info!("Session {}: streaming stopped", session.id());
}
