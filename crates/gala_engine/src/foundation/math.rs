//! Math utilities and types
//!
//! Thin aliases over nalgebra plus the handful of helpers the scene code needs.

pub use nalgebra::{
    Vector3, Vector4,
    Matrix4,
    Quaternion,
    Unit,
    UnitQuaternion,
};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Unit quaternion type for rotations
pub type Quat = UnitQuaternion<f32>;

/// Axes shorter than this are treated as "no axis"
pub const AXIS_EPSILON: f32 = 1.0e-6;

/// Rotate `v` by `angle` radians about `axis` (right-handed).
///
/// The axis does not need to be normalized. A degenerate axis leaves `v` unchanged.
pub fn rotate_about_axis(v: &Vec3, axis: &Vec3, angle: f32) -> Vec3 {
    match Unit::try_new(*axis, AXIS_EPSILON) {
        Some(axis) => UnitQuaternion::from_axis_angle(&axis, angle) * v,
        None => *v,
    }
}

/// Perspective-divide a homogeneous clip-space vector
pub fn perspective_divide(h: &Vec4) -> Vec3 {
    Vec3::new(h.x / h.w, h.y / h.w, h.z / h.w)
}

/// Convert a column-major nalgebra matrix to the `[[f32; 4]; 4]` layout shaders expect
pub fn to_cols_array(m: &Mat4) -> [[f32; 4]; 4] {
    (*m).into()
}
