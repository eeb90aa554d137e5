use serde::{Deserialize, Serialize};

/// Messages sent from the viewer over the peer connection's data channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Move the camera. `rotation` holds Euler angles in degrees, XYZ order.
    CameraUpdate {
        position: [f64; 3],
        rotation: [f64; 3],
    },

    /// Any message type this server does not understand
    #[serde(other)]
    Unknown,
}
