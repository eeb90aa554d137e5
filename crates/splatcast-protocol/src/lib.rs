//! Shared protocol definitions for Splatcast
//!
//! HTTP signaling bodies and the messages a viewer sends over the data channel.

pub mod messages;
pub mod types;

pub use messages::ControlMessage;
pub use types::{IceCandidateRequest, IceServer, SessionDescription};
