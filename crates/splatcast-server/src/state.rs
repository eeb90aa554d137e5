use crate::peer::PeerConnector;
use crate::producer::{MAX_FPS, VIDEO_CLOCK_RATE, VideoClock};
use crate::session::SessionRegistry;
use crate::signaling::SignalingService;
use anyhow::Context;
use splatcast_media::{CameraDescriptor, RendererFactory};
use splatcast_protocol::IceServer;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
    /// gaussian-splatting `cameras.json`; when unset the view size below is used
    pub camera_path: Option<PathBuf>,
    pub camera_index: usize,
    pub view_width: u32,
    pub view_height: u32,
    pub video_bitrate: u32,
    pub video_fps: u32,
}

#[derive(Clone)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, value)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        // Load from environment variables
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let stun_servers = std::env::var("STUN_SERVERS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_else(|_| vec!["stun:stun.l.google.com:19302".to_string()]);

        let turn_servers = match std::env::var("TURN_URL") {
            Ok(url) => vec![TurnServer {
                url,
                username: std::env::var("TURN_USERNAME").unwrap_or_default(),
                credential: std::env::var("TURN_CREDENTIAL").unwrap_or_default(),
            }],
            Err(_) => vec![],
        };

        let camera_path = std::env::var("CAMERA_PATH").ok().map(PathBuf::from);

        let config = Config {
            bind_address,
            stun_servers,
            turn_servers,
            camera_path,
            camera_index: env_or("CAMERA_INDEX", 12)?,
            view_width: env_or("VIEW_WIDTH", 1280)?,
            view_height: env_or("VIEW_HEIGHT", 720)?,
            video_bitrate: env_or("VIDEO_BITRATE", 14_000_000)?,
            video_fps: env_or("VIDEO_FPS", 30)?,
        };
        config.validate()?;

        Ok(config)
    }

    /// Reject settings the media pipeline cannot honor
    pub fn validate(&self) -> anyhow::Result<()> {
        if !VideoClock::is_exact(self.video_fps) {
            anyhow::bail!(
                "Invalid VIDEO_FPS {}: must be between 1 and {} and divide {}",
                self.video_fps,
                MAX_FPS,
                VIDEO_CLOCK_RATE
            );
        }

        if self.camera_path.is_none() && (self.view_width == 0 || self.view_height == 0) {
            anyhow::bail!(
                "Invalid view size {}x{}",
                self.view_width,
                self.view_height
            );
        }

        Ok(())
    }

    /// ICE servers handed to every peer connection and to `GET /ice-servers`
    pub fn ice_servers(&self) -> Vec<IceServer> {
        let mut ice_servers = vec![];

        for stun_url in &self.stun_servers {
            ice_servers.push(IceServer::stun(stun_url.clone()));
        }

        for turn in &self.turn_servers {
            ice_servers.push(IceServer::turn(
                turn.url.clone(),
                turn.username.clone(),
                turn.credential.clone(),
            ));
        }

        ice_servers
    }

    /// Camera used to size the stream
    pub fn camera(&self) -> anyhow::Result<CameraDescriptor> {
        match &self.camera_path {
            Some(path) => CameraDescriptor::load(path, self.camera_index),
            None => Ok(CameraDescriptor::with_size(self.view_width, self.view_height)),
        }
    }

    pub fn video_clock(&self) -> VideoClock {
        VideoClock::new(self.video_fps)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            stun_servers: vec![],
            turn_servers: vec![],
            camera_path: None,
            camera_index: 0,
            view_width: 1280,
            view_height: 720,
            video_bitrate: 14_000_000,
            video_fps: 30,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionRegistry>,
    pub signaling: SignalingService,
}

impl AppState {
    pub fn new(
        config: Config,
        connector: Arc<dyn PeerConnector>,
        renderers: Arc<dyn RendererFactory>,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let signaling = SignalingService::new(
            sessions.clone(),
            connector,
            renderers,
            config.ice_servers(),
            config.video_bitrate,
            config.video_clock(),
        );

        Self {
            config,
            sessions,
            signaling,
        }
    }
}
