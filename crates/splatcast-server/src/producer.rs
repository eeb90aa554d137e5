//! Pull-based frame production
//!
//! Each `pull` renders the session's current view, encodes it and stamps it
//! with the next presentation timestamp. Timestamps advance once per pull, so
//! the transport's pull cadence sets the frame rate and backpressure from the
//! transport slows rendering down with it.

use crate::session::Session;
use splatcast_media::{EncodeError, EncodedFrame, TimeBase, VideoEncoder};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Render/encode attempts allowed within one pull
pub const MAX_FAILED_ATTEMPTS: u32 = 10;

/// RTP video clock rate
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Highest frame rate the clock accepts
pub const MAX_FPS: u32 = 120;

/// Nominal frame clock of the outbound video track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoClock {
    fps: u32,
}

impl VideoClock {
    /// `fps` is clamped to `1..=MAX_FPS`
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.clamp(1, MAX_FPS),
        }
    }

    /// Whether `fps` maps onto a whole number of 90 kHz ticks per frame
    pub fn is_exact(fps: u32) -> bool {
        (1..=MAX_FPS).contains(&fps) && VIDEO_CLOCK_RATE % fps == 0
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn time_base(&self) -> TimeBase {
        TimeBase::new(1, VIDEO_CLOCK_RATE)
    }

    /// Timestamp increment between consecutive frames
    pub fn ticks_per_frame(&self) -> u64 {
        u64::from(VIDEO_CLOCK_RATE / self.fps)
    }

    pub fn frame_interval(&self) -> Duration {
        self.time_base().duration(self.ticks_per_frame())
    }
}

impl Default for VideoClock {
    fn default() -> Self {
        Self::new(30)
    }
}

/// Shared flag asking the producer to make its next frame a keyframe
#[derive(Debug, Clone, Default)]
pub struct KeyframeRequest(Arc<AtomicBool>);

impl KeyframeRequest {
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProducerError {
    /// No frame this pull; the next pull starts a fresh attempt budget
    #[error("Failed to render frame after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// The session has failed; no further frames will be produced
    #[error("Session closed")]
    SessionClosed,
}

#[derive(Error, Debug)]
enum AttemptError {
    #[error("Renderer returned no image")]
    EmptyRender,

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

pub struct FrameProducer {
    session: Arc<Session>,
    encoder: Box<dyn VideoEncoder>,
    clock: VideoClock,
    keyframe: KeyframeRequest,
    next_pts: u64,
    failed_attempts: u32,
}

impl FrameProducer {
    pub fn new(session: Arc<Session>, encoder: Box<dyn VideoEncoder>, clock: VideoClock) -> Self {
        Self {
            session,
            encoder,
            clock,
            keyframe: KeyframeRequest::default(),
            next_pts: 0,
            failed_attempts: 0,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn clock(&self) -> VideoClock {
        self.clock
    }

    /// Handle for asking this producer for a keyframe from another task
    pub fn keyframe_request(&self) -> KeyframeRequest {
        self.keyframe.clone()
    }

    /// Failures counted during the most recent pull
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Produce the next frame, retrying transient render/encode failures
    pub fn pull(&mut self) -> Result<EncodedFrame, ProducerError> {
        if self.session.is_closed() {
            return Err(ProducerError::SessionClosed);
        }

        let pts = self.next_timestamp();
        self.failed_attempts = 0;

        if self.keyframe.take() {
            tracing::debug!("Session {}: keyframe requested", self.session.id());
            self.encoder.force_keyframe();
        }

        loop {
            if self.session.is_closed() {
                return Err(ProducerError::SessionClosed);
            }

            match self.attempt() {
                Ok(payload) => {
                    self.failed_attempts = 0;
                    return Ok(EncodedFrame {
                        pts,
                        time_base: self.clock.time_base(),
                        payload,
                    });
                }
                Err(e) => {
                    self.failed_attempts += 1;
                    tracing::warn!(
                        "Session {}: frame attempt {} failed: {}",
                        self.session.id(),
                        self.failed_attempts,
                        e
                    );

                    if self.failed_attempts >= MAX_FAILED_ATTEMPTS {
                        tracing::error!(
                            "Session {}: failed to render frame after {} attempts",
                            self.session.id(),
                            self.failed_attempts
                        );
                        return Err(ProducerError::Exhausted {
                            attempts: self.failed_attempts,
                        });
                    }
                }
            }
        }
    }

    fn next_timestamp(&mut self) -> u64 {
        let pts = self.next_pts;
        self.next_pts += self.clock.ticks_per_frame();
        pts
    }

    fn attempt(&mut self) -> Result<bytes::Bytes, AttemptError> {
        let started = Instant::now();
        let image = self.session.renderer().render();
        tracing::debug!(
            "Session {}: render time {:?}",
            self.session.id(),
            started.elapsed()
        );

        match image {
            Some(data) if !data.is_empty() => Ok(self.encoder.encode(&data)?),
            _ => Err(AttemptError::EmptyRender),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NullPeer, StubEncoder, StubRenderer};

    fn producer_with(renderer: StubRenderer, encoder: StubEncoder) -> FrameProducer {
        let session = Arc::new(Session::new("viewer", Box::new(renderer), Arc::new(NullPeer)));
        FrameProducer::new(session, Box::new(encoder), VideoClock::default())
    }

    #[test]
    fn test_always_failing_renderer_is_called_exactly_max_times() {
        let renderer = StubRenderer::failing();
        let renders = renderer.calls();
        let mut producer = producer_with(renderer, StubEncoder::working());

        let result = producer.pull();

        assert_eq!(
            result.unwrap_err(),
            ProducerError::Exhausted {
                attempts: MAX_FAILED_ATTEMPTS
            }
        );
        assert_eq!(renders.get(), 10);
        assert_eq!(producer.failed_attempts(), 10);
    }

    #[test]
    fn test_always_failing_encoder_is_called_exactly_max_times() {
        let encoder = StubEncoder::failing();
        let encodes = encoder.calls();
        let mut producer = producer_with(StubRenderer::working(), encoder);

        assert!(matches!(
            producer.pull(),
            Err(ProducerError::Exhausted { attempts: 10 })
        ));
        assert_eq!(encodes.get(), 10);
    }

    #[test]
    fn test_recovers_within_one_pull_and_resets_counter() {
        let renderer = StubRenderer::failing_first(3);
        let renders = renderer.calls();
        let mut producer = producer_with(renderer, StubEncoder::working());

        let frame = producer.pull().unwrap();

        assert_eq!(frame.pts, 0);
        assert_eq!(renders.get(), 4);
        assert_eq!(producer.failed_attempts(), 0);
    }

    #[test]
    fn test_next_pull_gets_fresh_budget_after_exhaustion() {
        let renderer = StubRenderer::failing_first(MAX_FAILED_ATTEMPTS as usize + 2);
        let renders = renderer.calls();
        let mut producer = producer_with(renderer, StubEncoder::working());

        assert!(matches!(
            producer.pull(),
            Err(ProducerError::Exhausted { .. })
        ));
        assert_eq!(producer.failed_attempts(), MAX_FAILED_ATTEMPTS);

        producer.pull().unwrap();
        assert_eq!(renders.get(), 13);
        assert_eq!(producer.failed_attempts(), 0);
    }

    #[test]
    fn test_timestamps_advance_by_one_frame_per_pull() {
        let mut producer = producer_with(StubRenderer::working(), StubEncoder::working());
        let clock = VideoClock::default();

        let frames: Vec<EncodedFrame> = (0..8).map(|_| producer.pull().unwrap()).collect();

        for frame in &frames {
            assert_eq!(frame.time_base, TimeBase::new(1, 90_000));
        }
        for pair in frames.windows(2) {
            assert!(pair[1].pts > pair[0].pts);
            assert_eq!(pair[1].pts - pair[0].pts, clock.ticks_per_frame());
        }
        assert_eq!(frames[0].pts, 0);
        assert_eq!(clock.ticks_per_frame(), 3_000);
    }

    #[test]
    fn test_payload_comes_from_encoder() {
        let mut producer = producer_with(StubRenderer::working(), StubEncoder::working());
        let frame = producer.pull().unwrap();
        assert_eq!(&frame.payload[..], StubEncoder::PAYLOAD);
    }

    #[test]
    fn test_closed_session_stops_production() {
        let renderer = StubRenderer::working();
        let renders = renderer.calls();
        let mut producer = producer_with(renderer, StubEncoder::working());

        producer.session().mark_failed();

        assert_eq!(producer.pull().unwrap_err(), ProducerError::SessionClosed);
        assert_eq!(producer.pull().unwrap_err(), ProducerError::SessionClosed);
        assert_eq!(renders.get(), 0);
    }

    #[test]
    fn test_keyframe_request_forces_one_keyframe() {
        let encoder = StubEncoder::working();
        let keyframes = encoder.keyframes();
        let mut producer = producer_with(StubRenderer::working(), encoder);
        let request = producer.keyframe_request();

        producer.pull().unwrap();
        assert_eq!(keyframes.get(), 0);

        request.request();
        request.request();
        producer.pull().unwrap();
        producer.pull().unwrap();

        assert_eq!(keyframes.get(), 1);
    }

    #[test]
    fn test_clock_derives_interval_from_fps() {
        let clock = VideoClock::new(25);
        assert_eq!(clock.ticks_per_frame(), 3_600);
        assert_eq!(clock.frame_interval(), Duration::from_millis(40));
        assert_eq!(VideoClock::new(0).fps(), 1);
    }

    #[test]
    fn test_clock_clamps_fps_so_timestamps_advance() {
        let clock = VideoClock::new(1_000_000);
        assert_eq!(clock.fps(), MAX_FPS);
        assert_eq!(clock.ticks_per_frame(), 750);

        let mut producer = FrameProducer::new(
            Arc::new(Session::new(
                "viewer",
                Box::new(StubRenderer::working()),
                Arc::new(NullPeer),
            )),
            Box::new(StubEncoder::working()),
            clock,
        );
        let first = producer.pull().unwrap();
        let second = producer.pull().unwrap();
        assert!(second.pts > first.pts);
    }

    #[test]
    fn test_exact_frame_rates() {
        assert!(VideoClock::is_exact(30));
        assert!(VideoClock::is_exact(60));
        assert!(VideoClock::is_exact(24));
        assert!(!VideoClock::is_exact(7));
        assert!(!VideoClock::is_exact(0));
        assert!(!VideoClock::is_exact(90_000));
    }
}
