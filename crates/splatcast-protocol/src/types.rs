use serde::{Deserialize, Serialize};

/// SDP offer or answer exchanged over `POST /offer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: "offer".to_string(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: "answer".to_string(),
        }
    }

    pub fn is_offer(&self) -> bool {
        self.sdp_type == "offer"
    }
}

/// Trickled remote ICE candidate, as sent by the browser's `RTCIceCandidate.toJSON()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateRequest {
    pub candidate: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u16,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "usernameFragment")]
    pub username_fragment: String,
}

/// ICE server configuration for WebRTC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}
