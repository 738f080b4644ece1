#![warn(missing_docs)]

//! Math types for the pmesh adaptive subdivision engine.
//!
//! Thin wrappers around nalgebra providing domain-specific types for
//! cage geometry, camera transforms, and the 3x3 LEB subdivision
//! matrices used to decode a heap path into triangle corners.

use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

/// A point in 3D space (cage vertices, world-space triangle corners).
pub type Point3 = nalgebra::Point3<f64>;

/// A vector in 3D space.
pub type Vec3 = Vector3<f64>;

/// A point in 2D UV parameter space.
pub type Point2 = nalgebra::Point2<f32>;

/// A row-major 3x3 matrix: the LEB subdivision matrix representation.
///
/// Rows are barycentric coordinates of a triangle corner expressed in
/// the parent triangle's basis; see `pmesh-leb` for how these chain.
pub type Mat3 = Matrix3<f64>;

/// A 4x4 affine transformation matrix (camera view/projection, cage
/// placement).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// The underlying 4x4 matrix.
    pub matrix: Matrix4<f64>,
}

impl Transform {
    /// Identity transform.
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Translation by `(dx, dy, dz)`.
    pub fn translation(dx: f64, dy: f64, dz: f64) -> Self {
        let mut m = Matrix4::identity();
        m[(0, 3)] = dx;
        m[(1, 3)] = dy;
        m[(2, 3)] = dz;
        Self { matrix: m }
    }

    /// Right-handed look-at view matrix.
    pub fn look_at(eye: &Point3, target: &Point3, up: &Vec3) -> Self {
        let view = nalgebra::Isometry3::look_at_rh(eye, target, up);
        Self {
            matrix: view.to_homogeneous(),
        }
    }

    /// Perspective projection matrix (`fov_y` in radians).
    pub fn perspective(aspect: f64, fov_y: f64, near: f64, far: f64) -> Self {
        let proj = nalgebra::Perspective3::new(aspect, fov_y, near, far);
        Self {
            matrix: *proj.as_matrix(),
        }
    }

    /// Compose: apply `other` first, then `self`.
    pub fn then(&self, other: &Transform) -> Self {
        Self {
            matrix: self.matrix * other.matrix,
        }
    }

    /// Transform a point (applies translation).
    pub fn apply_point(&self, p: &Point3) -> Point3 {
        let v = self.matrix * Vector4::new(p.x, p.y, p.z, 1.0);
        if v.w.abs() > f64::EPSILON {
            Point3::new(v.x / v.w, v.y / v.w, v.z / v.w)
        } else {
            Point3::new(v.x, v.y, v.z)
        }
    }

    /// Transform a direction vector (ignores translation).
    pub fn apply_vec(&self, v: &Vec3) -> Vec3 {
        let r = self.matrix * Vector4::new(v.x, v.y, v.z, 0.0);
        Vec3::new(r.x, r.y, r.z)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Screen-space projection helper: maps a clip-space point to pixel
/// coordinates given a viewport `(width, height)`.
pub fn clip_to_pixels(clip: &Point3, clip_w: f64, width: f64, height: f64) -> Point2 {
    let ndc_x = clip.x / clip_w.max(1e-9);
    let ndc_y = clip.y / clip_w.max(1e-9);
    Point2::new(
        ((ndc_x * 0.5 + 0.5) * width) as f32,
        ((1.0 - (ndc_y * 0.5 + 0.5)) * height) as f32,
    )
}

/// Tolerance constants for geometric comparisons.
#[derive(Debug, Clone, Copy)]
pub struct Tolerance {
    /// Linear distance tolerance in world units.
    pub linear: f64,
}

impl Tolerance {
    /// Default tolerance (1e-6 world units).
    pub const DEFAULT: Self = Self { linear: 1e-6 };

    /// Check if two points are coincident within tolerance.
    pub fn points_equal(&self, a: &Point3, b: &Point3) -> bool {
        (a - b).norm() < self.linear
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_noop() {
        let t = Transform::identity();
        let p = Point3::new(1.0, 2.0, 3.0);
        let result = t.apply_point(&p);
        assert!((result - p).norm() < 1e-12);
    }

    #[test]
    fn translation_moves_point() {
        let t = Transform::translation(10.0, 20.0, 30.0);
        let p = Point3::new(1.0, 2.0, 3.0);
        let result = t.apply_point(&p);
        assert!((result.x - 11.0).abs() < 1e-12);
        assert!((result.y - 22.0).abs() < 1e-12);
        assert!((result.z - 33.0).abs() < 1e-12);
    }

    #[test]
    fn compose_order() {
        let translate = Transform::translation(1.0, 0.0, 0.0);
        let scale = {
            let mut m = Matrix4::identity();
            m[(0, 0)] = 2.0;
            Transform { matrix: m }
        };
        let composed = scale.then(&translate);
        let p = Point3::origin();
        let result = composed.apply_point(&p);
        assert!((result.x - 2.0).abs() < 1e-12);
    }
}
