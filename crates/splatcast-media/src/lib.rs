//! Media processing for Splatcast
//!
//! This crate provides:
//! - Camera pose math and atomic pose publication
//! - The renderer collaborator contract and a synthetic renderer
//! - H.264 encoding of rendered frames

pub mod codec;
pub mod pose;
pub mod render;

pub use codec::{
    EncodeError, EncodedFrame, EncoderSettings, H264Encoder, TimeBase, VideoCodec, VideoEncoder,
};
pub use pose::{CameraPose, Matrix3, PoseCell, rotation_from_euler_xyz};
pub use render::{
    CameraDescriptor, Renderer, RendererFactory, SyntheticRenderer, SyntheticRendererFactory,
};
