//! Camera pose and its lock-protected publication cell

use std::sync::{Arc, RwLock};

/// Row-major 3x3 matrix
pub type Matrix3 = [[f64; 3]; 3];

pub const IDENTITY: Matrix3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Camera position and orientation. Always replaced as a whole.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub position: [f64; 3],
    pub rotation: Matrix3,
}

impl CameraPose {
    pub fn new(position: [f64; 3], rotation: Matrix3) -> Self {
        Self { position, rotation }
    }
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: IDENTITY,
        }
    }
}

pub fn rotation_x(degrees: f64) -> Matrix3 {
    let (s, c) = degrees.to_radians().sin_cos();
    [[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]]
}

pub fn rotation_y(degrees: f64) -> Matrix3 {
    let (s, c) = degrees.to_radians().sin_cos();
    [[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]]
}

pub fn rotation_z(degrees: f64) -> Matrix3 {
    let (s, c) = degrees.to_radians().sin_cos();
    [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]]
}

pub fn mat_mul(a: &Matrix3, b: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Rotation matrix for Euler angles in degrees, lowercase `xyz` order.
///
/// Lowercase `xyz` means extrinsic rotations about the fixed X, then Y, then Z
/// axes (the same convention as scipy's `Rotation.from_euler("xyz", ...)`),
/// so the composed matrix is `Rz * Ry * Rx`.
pub fn rotation_from_euler_xyz(degrees: [f64; 3]) -> Matrix3 {
    let rx = rotation_x(degrees[0]);
    let ry = rotation_y(degrees[1]);
    let rz = rotation_z(degrees[2]);
    mat_mul(&rz, &mat_mul(&ry, &rx))
}

/// Holds the current pose behind a single `Arc`.
///
/// `store` swaps the whole `Arc` under the write lock and `load` clones it under
/// the read lock, so a reader never sees a position from one update paired with
/// a rotation from another.
#[derive(Debug)]
pub struct PoseCell {
    current: RwLock<Arc<CameraPose>>,
}

impl PoseCell {
    pub fn new(pose: CameraPose) -> Self {
        Self {
            current: RwLock::new(Arc::new(pose)),
        }
    }

    pub fn load(&self) -> Arc<CameraPose> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn store(&self, pose: CameraPose) {
        let next = Arc::new(pose);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

impl Default for PoseCell {
    fn default() -> Self {
        Self::new(CameraPose::default())
    }
}
