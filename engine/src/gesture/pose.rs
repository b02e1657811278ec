//! Pose extraction: landmark geometry and rotation matrices to yaw/pitch.
//!
//! Two upstream shapes feed the same pipeline. A 2-D approximation takes
//! the horizontal offset between the jaw corners as yaw and the vertical
//! forehead-to-chin offset as pitch (signed, unitless, normalized image
//! coordinates). A full 4x4 transform from a 3-D face solver is reduced to
//! Euler angles in degrees. Precomputed angles pass straight through.

use anyhow::ensure;

/// Face mesh index of the left jaw corner.
pub const LEFT_JAW: usize = 234;
/// Face mesh index of the right jaw corner.
pub const RIGHT_JAW: usize = 454;
/// Face mesh index of the forehead top.
pub const FOREHEAD: usize = 10;
/// Face mesh index of the chin bottom.
pub const CHIN: usize = 152;
/// Smallest face mesh that contains every index above.
pub const FACE_MESH_MIN_POINTS: usize = RIGHT_JAW + 1;

// ── Landmarks ──────────────────────────────────────────────

/// A single detector landmark in normalized image space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Detector visibility/confidence, when the model provides one.
    pub visibility: Option<f32>,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            z: 0.0,
            visibility: None,
        }
    }

    pub fn with_visibility(mut self, visibility: f32) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// Finite coordinates and, if reported, visibility at or above `min_visibility`.
    pub fn usable(&self, min_visibility: f32) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.visibility.map_or(true, |v| v >= min_visibility)
    }
}

/// Yaw/pitch pair: smoothed pose, raw pose, or a neutral baseline.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Orientation {
    pub yaw: f64,
    pub pitch: f64,
}

impl Orientation {
    pub fn new(yaw: f64, pitch: f64) -> Self {
        Self { yaw, pitch }
    }
}

/// One frame's raw pose. An axis is `None` when its landmarks were missing
/// or not visible enough to trust.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PoseSample {
    pub yaw: Option<f64>,
    pub pitch: Option<f64>,
}

impl PoseSample {
    /// Both axes present.
    pub fn complete(&self) -> Option<Orientation> {
        Some(Orientation::new(self.yaw?, self.pitch?))
    }
}

/// The four load-bearing face points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceKeypoints {
    pub left_jaw: Landmark,
    pub right_jaw: Landmark,
    pub forehead: Landmark,
    pub chin: Landmark,
}

impl FaceKeypoints {
    /// Pick the keypoints out of a full face mesh.
    pub fn from_mesh(mesh: &[Landmark]) -> anyhow::Result<Self> {
        ensure!(
            mesh.len() >= FACE_MESH_MIN_POINTS,
            "face mesh has {} landmarks, need at least {}",
            mesh.len(),
            FACE_MESH_MIN_POINTS
        );
        Ok(Self {
            left_jaw: mesh[LEFT_JAW],
            right_jaw: mesh[RIGHT_JAW],
            forehead: mesh[FOREHEAD],
            chin: mesh[CHIN],
        })
    }

    /// Yaw from jaw corners, pitch from forehead and chin. Each axis is
    /// gated independently on its own landmarks.
    pub fn sample(&self, min_visibility: f32) -> PoseSample {
        let yaw = (self.left_jaw.usable(min_visibility) && self.right_jaw.usable(min_visibility))
            .then(|| (self.left_jaw.x - self.right_jaw.x) as f64);
        let pitch = (self.forehead.usable(min_visibility) && self.chin.usable(min_visibility))
            .then(|| (self.forehead.y - self.chin.y) as f64);
        PoseSample { yaw, pitch }
    }
}

// ── Rotation matrix ────────────────────────────────────────

/// Euler angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EulerAngles {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

/// Extract yaw/pitch/roll (degrees) from a column-major 4x4 transform.
///
/// Pitch is rotation about x, yaw about y, roll about z. Near gimbal lock
/// (`sy < 1e-6`) roll is pinned to zero and pitch is read from the second
/// column instead.
pub fn matrix_to_euler(m: &[f32; 16]) -> EulerAngles {
    let r00 = m[0] as f64;
    let r10 = m[1] as f64;
    let r20 = m[2] as f64;
    let r11 = m[5] as f64;
    let r21 = m[6] as f64;
    let r12 = m[9] as f64;
    let r22 = m[10] as f64;

    let sy = (r00 * r00 + r10 * r10).sqrt();
    let (pitch, yaw, roll) = if sy >= 1e-6 {
        (r21.atan2(r22), (-r20).atan2(sy), r10.atan2(r00))
    } else {
        ((-r12).atan2(r11), (-r20).atan2(sy), 0.0)
    };

    EulerAngles {
        yaw: yaw.to_degrees(),
        pitch: pitch.to_degrees(),
        roll: roll.to_degrees(),
    }
}

// ── Sources ────────────────────────────────────────────────

/// Where a subject's pose comes from this frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PoseSource {
    /// 2-D landmark approximation (normalized units).
    Keypoints(FaceKeypoints),
    /// Column-major 4x4 face transform (degrees after extraction).
    Matrix([f32; 16]),
    /// Yaw/pitch already solved upstream.
    Angles { yaw: f64, pitch: f64 },
}

impl PoseSource {
    pub fn sample(&self, min_visibility: f32) -> PoseSample {
        match self {
            Self::Keypoints(kp) => kp.sample(min_visibility),
            Self::Matrix(m) => {
                if m.iter().any(|v| !v.is_finite()) {
                    return PoseSample::default();
                }
                let euler = matrix_to_euler(m);
                PoseSample {
                    yaw: Some(euler.yaw),
                    pitch: Some(euler.pitch),
                }
            }
            Self::Angles { yaw, pitch } => PoseSample {
                yaw: yaw.is_finite().then_some(*yaw),
                pitch: pitch.is_finite().then_some(*pitch),
            },
        }
    }
}
