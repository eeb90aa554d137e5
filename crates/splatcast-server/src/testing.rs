//! Test doubles for the renderer, encoder and peer connection

use crate::ice::RemoteCandidate;
use crate::peer::{PeerConnector, PeerEvent, PeerEventSender, PeerEvents, PeerLink};
use crate::producer::FrameProducer;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use splatcast_media::{
    CameraDescriptor, CameraPose, EncodeError, PoseCell, Renderer, VideoCodec, VideoEncoder,
};
use splatcast_protocol::{IceServer, SessionDescription};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Renderer returning a fixed image after `fail_first` empty renders
pub struct StubRenderer {
    camera: CameraDescriptor,
    pose: PoseCell,
    fail_first: usize,
    calls: CallCounter,
}

impl StubRenderer {
    pub fn working() -> Self {
        Self::failing_first(0)
    }

    pub fn failing() -> Self {
        Self::failing_first(usize::MAX)
    }

    pub fn failing_first(fail_first: usize) -> Self {
        Self {
            camera: CameraDescriptor::with_size(4, 4),
            pose: PoseCell::default(),
            fail_first,
            calls: CallCounter::default(),
        }
    }

    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }
}

impl Renderer for StubRenderer {
    fn camera(&self) -> &CameraDescriptor {
        &self.camera
    }

    fn render(&self) -> Option<Vec<u8>> {
        if self.calls.bump() <= self.fail_first {
            None
        } else {
            Some(vec![128; self.camera.frame_len()])
        }
    }

    fn update(&self, pose: CameraPose) {
        self.pose.store(pose);
    }
}

pub struct StubEncoder {
    fail: bool,
    calls: CallCounter,
    keyframes: CallCounter,
}

impl StubEncoder {
    pub const PAYLOAD: &'static [u8] = &[0, 0, 0, 1, 0x65, 0x88];

    pub fn working() -> Self {
        Self {
            fail: false,
            calls: CallCounter::default(),
            keyframes: CallCounter::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: CallCounter::default(),
            keyframes: CallCounter::default(),
        }
    }

    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }

    /// Counts `force_keyframe` calls
    pub fn keyframes(&self) -> CallCounter {
        self.keyframes.clone()
    }
}

impl VideoEncoder for StubEncoder {
    fn encode(&mut self, _raw: &[u8]) -> std::result::Result<Bytes, EncodeError> {
        self.calls.bump();
        if self.fail {
            Err(EncodeError::NoFrame)
        } else {
            Ok(Bytes::from_static(Self::PAYLOAD))
        }
    }

    fn force_keyframe(&mut self) {
        self.keyframes.bump();
    }

    fn codec(&self) -> VideoCodec {
        VideoCodec::H264
    }

    fn dimensions(&self) -> (u32, u32) {
        (4, 4)
    }
}

/// Peer that accepts everything and does nothing
pub struct NullPeer;

#[async_trait]
impl PeerLink for NullPeer {
    async fn attach_video(&self, _producer: FrameProducer) -> Result<()> {
        Ok(())
    }

    async fn accept_offer(&self, _offer: SessionDescription) -> Result<SessionDescription> {
        Ok(SessionDescription::answer("v=0\r\n"))
    }

    async fn add_ice_candidate(&self, _candidate: RemoteCandidate) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Peer that records what the signaling layer asked of it
#[derive(Default)]
pub struct FakePeer {
    fail_offer: bool,
    closed: AtomicBool,
    offers: Mutex<Vec<SessionDescription>>,
    candidates: Mutex<Vec<RemoteCandidate>>,
    producer: Mutex<Option<FrameProducer>>,
}

impl FakePeer {
    pub const ANSWER_SDP: &'static str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=fake\r\n";

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn candidates(&self) -> Vec<RemoteCandidate> {
        self.candidates.lock().unwrap().clone()
    }

    pub fn offers(&self) -> Vec<SessionDescription> {
        self.offers.lock().unwrap().clone()
    }

    pub fn take_producer(&self) -> Option<FrameProducer> {
        self.producer.lock().unwrap().take()
    }
}

#[async_trait]
impl PeerLink for FakePeer {
    async fn attach_video(&self, producer: FrameProducer) -> Result<()> {
        *self.producer.lock().unwrap() = Some(producer);
        Ok(())
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.offers.lock().unwrap().push(offer);
        if self.fail_offer {
            return Err(anyhow!("remote description rejected"));
        }
        Ok(SessionDescription::answer(Self::ANSWER_SDP))
    }

    async fn add_ice_candidate(&self, candidate: RemoteCandidate) -> Result<()> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing out [`FakePeer`]s and keeping their event senders
#[derive(Default)]
pub struct FakeConnector {
    fail_offers: AtomicBool,
    peers: Mutex<Vec<(Arc<FakePeer>, PeerEventSender)>>,
    ice_servers: Mutex<Vec<Vec<IceServer>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_offers(&self) {
        self.fail_offers.store(true, Ordering::SeqCst);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn peer(&self, index: usize) -> Arc<FakePeer> {
        self.peers.lock().unwrap()[index].0.clone()
    }

    pub fn ice_servers(&self, index: usize) -> Vec<IceServer> {
        self.ice_servers.lock().unwrap()[index].clone()
    }

    /// Deliver `event` on the event channel of peer `index`
    pub fn send(&self, index: usize, event: PeerEvent) {
        let sender = self.peers.lock().unwrap()[index].1.clone();
        let _ = sender.send(event);
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(&self, ice_servers: &[IceServer]) -> Result<(Arc<dyn PeerLink>, PeerEvents)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Arc::new(FakePeer {
            fail_offer: self.fail_offers.load(Ordering::SeqCst),
            ..FakePeer::default()
        });

        self.peers.lock().unwrap().push((peer.clone(), tx));
        self.ice_servers.lock().unwrap().push(ice_servers.to_vec());

        Ok((peer, rx))
    }
}
