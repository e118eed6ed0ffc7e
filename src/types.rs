//! Common types and traits for assembly geometry.
//!
//! World positions use Y as the vertical axis. Support surfaces lie in the
//! local X/Z plane of the part that provides them.

use glam::{DAffine3, DQuat, DVec3};
use serde::{Deserialize, Serialize};

/// Global numerical tolerance for floating-point comparisons.
pub const EPSILON_GENERAL: f64 = 1e-6;

/// Tolerance below which two candidate surfaces count as the same height.
pub const EPSILON_HEIGHT: f64 = 1e-4;

/// Tolerance used when classifying the sign of a rotated basis vector.
pub const EPSILON_BASIS: f64 = 1e-3;

/// Rigid placement of a part in world space.
///
/// Parts are never scaled, so a translation and a rotation fully describe
/// the world matrix and its inverse.
///
/// # Examples
/// ```
/// use glam::DVec3;
/// use stack_it_now::types::Transform;
///
/// let t = Transform::from_translation_yaw(DVec3::new(1.0, 0.0, 0.0), 90f64.to_radians());
/// let world = t.transform_point(DVec3::new(0.0, 0.0, 1.0));
/// let back = t.inverse_transform_point(world);
/// assert!((back - DVec3::new(0.0, 0.0, 1.0)).length() < 1e-9);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: DVec3,
    pub rotation: DQuat,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: DVec3::ZERO,
        rotation: DQuat::IDENTITY,
    };

    #[inline]
    pub const fn from_translation(translation: DVec3) -> Self {
        Self {
            translation,
            rotation: DQuat::IDENTITY,
        }
    }

    /// Creates a transform rotated about the vertical axis.
    #[inline]
    pub fn from_translation_yaw(translation: DVec3, yaw_radians: f64) -> Self {
        Self {
            translation,
            rotation: DQuat::from_rotation_y(yaw_radians),
        }
    }

    /// Local-to-world matrix.
    #[inline]
    pub fn matrix(&self) -> DAffine3 {
        DAffine3::from_rotation_translation(self.rotation, self.translation)
    }

    /// World-to-local matrix.
    #[inline]
    pub fn inverse_matrix(&self) -> DAffine3 {
        self.matrix().inverse()
    }

    #[inline]
    pub fn transform_point(&self, local: DVec3) -> DVec3 {
        self.rotation * local + self.translation
    }

    #[inline]
    pub fn inverse_transform_point(&self, world: DVec3) -> DVec3 {
        self.rotation.inverse() * (world - self.translation)
    }

    /// Rotates the transform around a world-space pivot.
    pub fn rotate_around(&mut self, pivot: DVec3, rotation: DQuat) {
        self.translation = pivot + rotation * (self.translation - pivot);
        self.rotation = (rotation * self.rotation).normalize();
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A rigid motion applied to a part and carried over to everything it holds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Motion {
    /// Pure translation, applied by vector addition.
    Shift(DVec3),
    /// Rotation about a vertical axis through `pivot`.
    RotateAbout { pivot: DVec3, rotation: DQuat },
}

impl Motion {
    /// Applies the motion to a transform in place.
    pub fn apply(&self, transform: &mut Transform) {
        match *self {
            Motion::Shift(delta) => transform.translation += delta,
            Motion::RotateAbout { pivot, rotation } => transform.rotate_around(pivot, rotation),
        }
    }

    /// Returns `true` if applying the motion would change nothing.
    pub fn is_identity(&self) -> bool {
        match *self {
            Motion::Shift(delta) => delta == DVec3::ZERO,
            Motion::RotateAbout { rotation, .. } => rotation.abs_diff_eq(DQuat::IDENTITY, 0.0),
        }
    }
}

/// Trait for objects with a position in world space.
pub trait Positioned {
    /// Returns the world-space position (origin of the local frame).
    fn position(&self) -> DVec3;
}

impl Positioned for Transform {
    fn position(&self) -> DVec3 {
        self.translation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_roundtrip_with_yaw() {
        let t = Transform::from_translation_yaw(DVec3::new(2.0, 1.0, -3.0), 1.2);
        let p = DVec3::new(0.3, 0.4, -0.5);
        let back = t.inverse_transform_point(t.transform_point(p));
        assert!((back - p).length() < EPSILON_GENERAL);
    }

    #[test]
    fn test_matrix_agrees_with_point_transform() {
        let t = Transform::from_translation_yaw(DVec3::new(0.5, 0.0, 0.25), 90f64.to_radians());
        let p = DVec3::new(1.0, 2.0, 3.0);
        let via_matrix = t.matrix().transform_point3(p);
        assert!((via_matrix - t.transform_point(p)).length() < EPSILON_GENERAL);

        let inv = t.inverse_matrix().transform_point3(via_matrix);
        assert!((inv - p).length() < EPSILON_GENERAL);
    }

    #[test]
    fn test_rotate_around_pivot() {
        let mut t = Transform::from_translation(DVec3::new(1.0, 0.0, 0.0));
        t.rotate_around(DVec3::ZERO, DQuat::from_rotation_y(std::f64::consts::PI));
        assert!((t.translation - DVec3::new(-1.0, 0.0, 0.0)).length() < EPSILON_GENERAL);
    }

    #[test]
    fn test_shift_motion_is_plain_addition() {
        let mut t = Transform::from_translation(DVec3::new(0.1, 0.2, 0.3));
        let motion = Motion::Shift(DVec3::new(0.12, 0.0, -0.24));
        motion.apply(&mut t);
        assert_eq!(t.translation, DVec3::new(0.1, 0.2, 0.3) + DVec3::new(0.12, 0.0, -0.24));
        assert!(!motion.is_identity());
        assert!(Motion::Shift(DVec3::ZERO).is_identity());
    }
}
