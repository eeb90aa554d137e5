//! Renderer collaborators
//!
//! The scene renderer is external to the streaming pipeline: it consumes the
//! latest camera pose and hands back a raw RGB24 image. This module defines that
//! contract, the camera descriptor used to size the output, and a synthetic
//! renderer that draws a pose-dependent test pattern.

use crate::pose::{CameraPose, Matrix3, PoseCell, IDENTITY};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// One camera entry from a gaussian-splatting `cameras.json`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CameraDescriptor {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub img_name: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub position: [f64; 3],
    #[serde(default = "identity")]
    pub rotation: Matrix3,
    #[serde(default)]
    pub fx: f64,
    #[serde(default)]
    pub fy: f64,
}

fn identity() -> Matrix3 {
    IDENTITY
}

impl CameraDescriptor {
    /// Camera with the given output size at the origin, looking down its default axis
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            id: 0,
            img_name: String::new(),
            width,
            height,
            position: [0.0; 3],
            rotation: IDENTITY,
            fx: 0.0,
            fy: 0.0,
        }
    }

    /// Load entry `index` from a JSON array of cameras
    pub fn load(path: impl AsRef<Path>, index: usize) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read camera file {}", path.display()))?;
        Self::from_json(&contents, index)
            .with_context(|| format!("Invalid camera file {}", path.display()))
    }

    pub fn from_json(json: &str, index: usize) -> Result<Self> {
        let mut cameras: Vec<CameraDescriptor> = serde_json::from_str(json)?;
        let count = cameras.len();
        if index >= count {
            anyhow::bail!("Camera index {} out of range ({} cameras)", index, count);
        }
        Ok(cameras.swap_remove(index))
    }

    pub fn initial_pose(&self) -> CameraPose {
        CameraPose::new(self.position, self.rotation)
    }

    /// Size in bytes of one RGB24 frame for this camera
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Scene renderer bound to one session
pub trait Renderer: Send + Sync {
    /// Camera this renderer draws for
    fn camera(&self) -> &CameraDescriptor;

    /// Render the current pose into an RGB24 buffer, or `None` if no image is ready yet
    fn render(&self) -> Option<Vec<u8>>;

    /// Replace the pose used by the next `render` call
    fn update(&self, pose: CameraPose);
}

impl<R: Renderer + ?Sized> Renderer for Arc<R> {
    fn camera(&self) -> &CameraDescriptor {
        (**self).camera()
    }

    fn render(&self) -> Option<Vec<u8>> {
        (**self).render()
    }

    fn update(&self, pose: CameraPose) {
        (**self).update(pose)
    }
}

/// Creates a fresh renderer for each new session
pub trait RendererFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Renderer>>;
}

/// Test-pattern renderer whose output shifts and tints with the camera pose
pub struct SyntheticRenderer {
    camera: CameraDescriptor,
    pose: PoseCell,
}

impl SyntheticRenderer {
    pub fn new(camera: CameraDescriptor) -> Self {
        let pose = PoseCell::new(camera.initial_pose());
        Self { camera, pose }
    }

    pub fn pose(&self) -> Arc<CameraPose> {
        self.pose.load()
    }
}

impl Renderer for SyntheticRenderer {
    fn camera(&self) -> &CameraDescriptor {
        &self.camera
    }

    fn render(&self) -> Option<Vec<u8>> {
        let pose = self.pose.load();
        let (width, height) = (self.camera.width as usize, self.camera.height as usize);
        if width == 0 || height == 0 {
            return None;
        }

        // Position pans the gradient, the forward axis of the rotation tints it
        let shift_x = pattern_offset(pose.position[0]);
        let shift_y = pattern_offset(pose.position[1]);
        let tint = [
            ((pose.rotation[0][2] + 1.0) * 127.5) as u8,
            ((pose.rotation[1][2] + 1.0) * 127.5) as u8,
            ((pose.rotation[2][2] + 1.0) * 127.5) as u8,
        ];

        let mut data = vec![0u8; width * height * 3];
        for (y, row) in data.chunks_exact_mut(width * 3).enumerate() {
            let gy = (y as u8).wrapping_add(shift_y);
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                let gx = (x as u8).wrapping_add(shift_x);
                px[0] = gx ^ tint[0];
                px[1] = gy ^ tint[1];
                px[2] = gx.wrapping_add(gy) ^ tint[2];
            }
        }
        Some(data)
    }

    fn update(&self, pose: CameraPose) {
        self.pose.store(pose);
    }
}

/// Gradient offset for one position axis, 16 pattern steps per world unit
fn pattern_offset(position: f64) -> u8 {
    // Reduced before the integer cast so any finite position stays in range
    (position * 16.0).rem_euclid(256.0) as u8
}

/// Hands every session its own [`SyntheticRenderer`] for a shared camera
pub struct SyntheticRendererFactory {
    camera: CameraDescriptor,
}

impl SyntheticRendererFactory {
    pub fn new(camera: CameraDescriptor) -> Self {
        Self { camera }
    }
}

impl RendererFactory for SyntheticRendererFactory {
    fn create(&self) -> Result<Box<dyn Renderer>> {
        Ok(Box::new(SyntheticRenderer::new(self.camera.clone())))
    }
}
