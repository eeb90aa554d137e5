use crate::error::Result;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use splatcast_protocol::{IceCandidateRequest, SessionDescription};

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(default)]
    pub session_id: String,
}

pub async fn offer(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    Json(offer): Json<SessionDescription>,
) -> Result<Json<SessionDescription>> {
    tracing::debug!("Offer for session {:?}", query.session_id);

    let answer = state
        .signaling
        .create_offer(&query.session_id, offer)
        .await?;

    Ok(Json(answer))
}

pub async fn ice_candidate(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    Json(candidate): Json<IceCandidateRequest>,
) -> Result<()> {
    state
        .signaling
        .add_ice_candidate(&query.session_id, candidate)
        .await
}
