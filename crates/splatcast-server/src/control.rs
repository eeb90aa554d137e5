//! Data-channel control messages

use crate::session::Session;
use splatcast_media::{CameraPose, rotation_from_euler_xyz};
use splatcast_protocol::ControlMessage;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("Invalid control message: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Apply one raw control message to `target`'s renderer
pub fn handle(raw: &[u8], target: &Session) -> Result<(), DecodeError> {
    match serde_json::from_slice::<ControlMessage>(raw)? {
        ControlMessage::CameraUpdate { position, rotation } => {
            let pose = CameraPose::new(position, rotation_from_euler_xyz(rotation));
            tracing::debug!(
                "Session {}: camera moved to {:?} rotation {:?}",
                target.id(),
                position,
                rotation
            );
            target.renderer().update(pose);
        }
        ControlMessage::Unknown => {
            tracing::debug!("Session {}: ignoring unknown control message", target.id());
        }
    }

    Ok(())
}
