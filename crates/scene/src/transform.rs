//! Parent-relative placement of a scene node.
//!
//! ```
//! use glam::{Quat, Vec3};
//! use inflight_scene::Transform;
//!
//! let turned = Transform::from_position(Vec3::X)
//!     .with_rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
//! let origin = turned.local_matrix().transform_point3(Vec3::ZERO);
//! assert!(origin.abs_diff_eq(Vec3::X, 1e-5));
//! ```

use glam::{Mat3, Mat4, Quat, Vec3};

/// Determinants smaller than this are treated as zero.
const DEGENERATE: f32 = 1e-6;

/// Translation, rotation and scale relative to the parent node. Applied as
/// scale first, then rotation, then translation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub const fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }

    pub fn with_rotation(self, rotation: Quat) -> Self {
        Self { rotation, ..self }
    }

    pub fn with_scale(self, scale: Vec3) -> Self {
        Self { scale, ..self }
    }

    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    pub fn normal_matrix(&self) -> Mat4 {
        normal_matrix(self.local_matrix())
    }

    /// Unit axes of the node's frame: right (+X), up (+Y), forward (-Z).
    pub fn axes(&self) -> (Vec3, Vec3, Vec3) {
        let basis = Mat3::from_quat(self.rotation);
        (basis.x_axis, basis.y_axis, -basis.z_axis)
    }

    pub fn forward(&self) -> Vec3 {
        self.axes().2
    }

    pub fn right(&self) -> Vec3 {
        self.axes().0
    }

    pub fn up(&self) -> Vec3 {
        self.axes().1
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// `model⁻¹ᵀ`, falling back to identity when `model` collapses a dimension.
pub fn normal_matrix(model: Mat4) -> Mat4 {
    match model.determinant() {
        det if det.abs() < DEGENERATE => Mat4::IDENTITY,
        _ => model.inverse().transpose(),
    }
}
