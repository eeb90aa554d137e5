//! Video codec utilities
//!
//! H.264 encoding of rendered RGB frames through openh264.

use bytes::Bytes;
use openh264::OpenH264API;
use openh264::encoder::{
    BitRate, Encoder, EncoderConfig, FrameRate, FrameType, IntraFramePeriod, RateControlMode,
    SpsPpsStrategy, UsageType,
};
use openh264::formats::{RgbSliceU8, YUVBuffer};
use std::time::Duration;
use thiserror::Error;

/// Video codec type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Invalid encoder dimensions {width}x{height}: must be non-zero and even")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Invalid frame size: expected {expected} bytes, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    #[error("Encoder produced no frame")]
    NoFrame,

    #[error("Codec error: {0}")]
    Codec(String),
}

/// Fraction of a second that one timestamp tick represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Wall-clock length of `ticks`, rounded up to the next nanosecond
    pub fn duration(&self, ticks: u64) -> Duration {
        let nanos = (u128::from(ticks) * 1_000_000_000 * u128::from(self.num))
            .div_ceil(u128::from(self.den.max(1)));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// One encoded access unit ready for the transport
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Presentation timestamp in `time_base` units
    pub pts: u64,
    pub time_base: TimeBase,
    /// Annex B NAL units (start-code prefixed)
    pub payload: Bytes,
}

/// Video encoder trait
pub trait VideoEncoder: Send {
    /// Encode one raw RGB24 frame into exactly one access unit
    fn encode(&mut self, raw: &[u8]) -> Result<Bytes, EncodeError>;
    /// Make the next encoded frame an IDR
    fn force_keyframe(&mut self);
    fn codec(&self) -> VideoCodec;
    fn dimensions(&self) -> (u32, u32);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub fps: u32,
    /// IDR period in frames (0 disables periodic IDR)
    pub keyframe_interval: u32,
}

impl EncoderSettings {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bitrate: 14_000_000,
            fps: 30,
            keyframe_interval: 60,
        }
    }
}

/// openh264 encoder tuned for real-time streaming
pub struct H264Encoder {
    encoder: Encoder,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl H264Encoder {
    pub fn new(settings: EncoderSettings) -> Result<Self, EncodeError> {
        let EncoderSettings { width, height, .. } = settings;
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(EncodeError::InvalidDimensions { width, height });
        }

        // Real-time usage never emits B-frames. Every IDR is preceded by SPS/PPS
        // with fixed ids, so a viewer can start decoding at any IDR.
        let config = EncoderConfig::new()
            .usage_type(UsageType::CameraVideoRealTime)
            .max_frame_rate(FrameRate::from_hz(settings.fps as f32))
            .bitrate(BitRate::from_bps(settings.bitrate))
            .rate_control_mode(RateControlMode::Bitrate)
            .sps_pps_strategy(SpsPpsStrategy::ConstantId)
            .intra_frame_period(IntraFramePeriod::from_num_frames(settings.keyframe_interval));

        let api = OpenH264API::from_source();
        let encoder = Encoder::with_api_config(api, config)
            .map_err(|e| EncodeError::Codec(format!("Failed to create encoder: {}", e)))?;

        tracing::debug!(
            "Created H.264 encoder {}x{} @ {} bps",
            width,
            height,
            settings.bitrate
        );

        Ok(Self {
            encoder,
            width,
            height,
            frame_count: 0,
        })
    }

    /// Number of access units produced so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl VideoEncoder for H264Encoder {
    fn encode(&mut self, raw: &[u8]) -> Result<Bytes, EncodeError> {
        let expected = self.expected_len();
        if raw.len() != expected {
            return Err(EncodeError::FrameSize {
                expected,
                actual: raw.len(),
            });
        }

        let rgb = RgbSliceU8::new(raw, (self.width as usize, self.height as usize));
        let yuv = YUVBuffer::from_rgb_source(rgb);

        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| EncodeError::Codec(e.to_string()))?;

        if matches!(bitstream.frame_type(), FrameType::Skip | FrameType::Invalid) {
            return Err(EncodeError::NoFrame);
        }

        let data = bitstream.to_vec();
        if data.is_empty() {
            return Err(EncodeError::NoFrame);
        }

        self.frame_count += 1;
        Ok(Bytes::from(data))
    }

    fn force_keyframe(&mut self) {
        self.encoder.force_intra_frame();
    }

    fn codec(&self) -> VideoCodec {
        VideoCodec::H264
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        let mut data = vec![0u8; (width * height * 3) as usize];
        for y in 0..height {
            for x in 0..width {
                let idx = ((y * width + x) * 3) as usize;
                data[idx] = (x % 256) as u8;
                data[idx + 1] = (y % 256) as u8;
                data[idx + 2] = ((x + y) % 256) as u8;
            }
        }
        data
    }

    /// Yields the NAL unit types (low five bits of the header) in an Annex B stream
    fn nal_types(payload: &[u8]) -> Vec<u8> {
        let mut types = vec![];
        let mut i = 0;
        while i + 3 < payload.len() {
            if payload[i..i + 3] == [0, 0, 1] {
                types.push(payload[i + 3] & 0x1f);
                i += 3;
            } else {
                i += 1;
            }
        }
        types
    }

    #[test]
    fn test_time_base_duration_rounds_up() {
        let time_base = TimeBase::new(1, 90_000);
        assert_eq!(time_base.duration(90_000), Duration::from_secs(1));
        assert_eq!(time_base.duration(3_000), Duration::from_nanos(33_333_334));
        // Rounded up so a 90 kHz packetizer never truncates to 2999 ticks
        assert_eq!((time_base.duration(3_000).as_secs_f64() * 90_000.0) as u32, 3_000);
    }

    #[test]
    fn test_rejects_odd_dimensions() {
        let result = H264Encoder::new(EncoderSettings::new(63, 48));
        assert!(matches!(
            result,
            Err(EncodeError::InvalidDimensions { width: 63, height: 48 })
        ));
    }

    #[test]
    fn test_rejects_wrong_buffer_size() {
        let mut encoder = H264Encoder::new(EncoderSettings::new(64, 48)).unwrap();
        let result = encoder.encode(&[0u8; 10]);
        assert!(matches!(
            result,
            Err(EncodeError::FrameSize { expected, actual: 10 }) if expected == 64 * 48 * 3
        ));
    }

    #[test]
    fn test_first_frame_is_annex_b() {
        let mut encoder = H264Encoder::new(EncoderSettings::new(64, 48)).unwrap();
        let payload = encoder.encode(&gradient(64, 48)).unwrap();

        assert!(payload.starts_with(&[0, 0, 0, 1]) || payload.starts_with(&[0, 0, 1]));
        assert_eq!(encoder.frame_count(), 1);
        assert_eq!(encoder.dimensions(), (64, 48));
        assert_eq!(encoder.codec(), VideoCodec::H264);

        let types = nal_types(&payload);
        assert!(types.contains(&7), "missing SPS: {:?}", types);
        assert!(types.contains(&8), "missing PPS: {:?}", types);
        assert!(types.contains(&5), "missing IDR: {:?}", types);
    }

    #[test]
    fn test_forced_keyframe_is_idr() {
        let mut encoder = H264Encoder::new(EncoderSettings::new(64, 48)).unwrap();
        let frame = gradient(64, 48);
        encoder.encode(&frame).unwrap();
        let delta = encoder.encode(&frame).unwrap();
        assert!(!nal_types(&delta).contains(&5));

        encoder.force_keyframe();
        let forced = encoder.encode(&frame).unwrap();
        assert!(nal_types(&forced).contains(&5));
    }
}
