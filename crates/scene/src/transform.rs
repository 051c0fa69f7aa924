//! Decomposed local transforms.
//!
//! A [`Transform`] is the editable form of a node's local matrix. The scene
//! graph stores matrices; transforms are converted on the way in.
//!
//! # Example
//!
//! ```
//! use ember_scene::Transform;
//! use glam::{Quat, Vec3};
//!
//! let t = Transform::new()
//!     .with_translation(Vec3::new(1.0, 0.0, 0.0))
//!     .with_scale(Vec3::splat(2.0));
//!
//! let p = t.local_matrix().transform_point3(Vec3::new(1.0, 0.0, 0.0));
//! assert!((p - Vec3::new(3.0, 0.0, 0.0)).length() < 1e-5);
//! ```

use glam::{Mat4, Quat, Vec3};

/// Translation, rotation and scale, applied in scale-rotate-translate order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_translation(mut self, translation: Vec3) -> Self {
        self.translation = translation;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Split an affine matrix back into translation, rotation and scale.
    ///
    /// Shear is not representable and is lost.
    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl From<Transform> for Mat4 {
    fn from(transform: Transform) -> Self {
        transform.local_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn approx_eq_vec3(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < EPSILON
    }

    #[test]
    fn test_transform_default() {
        let t = Transform::default();
        assert_eq!(t.translation, Vec3::ZERO);
        assert_eq!(t.rotation, Quat::IDENTITY);
        assert_eq!(t.scale, Vec3::ONE);
        assert_eq!(t.local_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_scale_applies_before_translation() {
        let t = Transform::new()
            .with_translation(Vec3::new(10.0, 0.0, 0.0))
            .with_scale(Vec3::splat(2.0));
        let p = t.local_matrix().transform_point3(Vec3::new(5.0, 0.0, 0.0));
        assert!(approx_eq_vec3(p, Vec3::new(20.0, 0.0, 0.0)));
    }

    #[test]
    fn test_rotation_about_y() {
        let t = Transform::new().with_rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        let p = t.local_matrix().transform_point3(Vec3::X);
        assert!(approx_eq_vec3(p, Vec3::new(0.0, 0.0, -1.0)));
    }

    #[test]
    fn test_from_matrix_round_trips_trs() {
        let t = Transform::new()
            .with_translation(Vec3::new(1.0, 2.0, 3.0))
            .with_rotation(Quat::from_rotation_z(0.5))
            .with_scale(Vec3::new(1.0, 2.0, 3.0));
        let back = Transform::from_matrix(t.local_matrix());
        assert!(approx_eq_vec3(back.translation, t.translation));
        assert!(approx_eq_vec3(back.scale, t.scale));
        assert!(back.rotation.abs_diff_eq(t.rotation, EPSILON));
    }
}
