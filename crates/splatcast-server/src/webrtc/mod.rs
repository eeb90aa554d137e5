mod peer;

pub use peer::{RtcPeer, RtcPeerConnector};

use crate::state::AppState;
use axum::{Json, extract::State};
use splatcast_protocol::IceServer;

pub async fn get_ice_servers(State(state): State<AppState>) -> Json<Vec<IceServer>> {
    Json(state.config.ice_servers())
}
