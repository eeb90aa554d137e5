//! Splatcast Server Library
//!
//! Streams a re-rendered view to each viewer over WebRTC and moves the
//! viewer's camera from data-channel messages. Exposed as a library for
//! testing and embedding.

pub mod api;
pub mod control;
pub mod error;
pub mod ice;
pub mod peer;
pub mod producer;
pub mod session;
pub mod signaling;
pub mod state;
pub mod webrtc;

#[cfg(test)]
mod testing;

use anyhow::Result;
use splatcast_media::{RendererFactory, SyntheticRendererFactory};
use std::sync::Arc;

/// Build the router around an explicit peer connector and renderer factory
pub fn build_app(
    config: state::Config,
    connector: Arc<dyn peer::PeerConnector>,
    renderers: Arc<dyn RendererFactory>,
) -> (axum::Router, state::AppState) {
    let app_state = state::AppState::new(config, connector, renderers);
    let router = api::create_router(app_state.clone());
    (router, app_state)
}

/// Create and configure the server application
pub fn create_app(config: state::Config) -> Result<(axum::Router, state::AppState)> {
    let camera = config.camera()?;
    tracing::info!(
        "Rendering {}x{} view (camera {:?})",
        camera.width,
        camera.height,
        camera.img_name
    );

    let renderers = Arc::new(SyntheticRendererFactory::new(camera));
    let connector = Arc::new(webrtc::RtcPeerConnector::new()?);

    Ok(build_app(config, connector, renderers))
}
