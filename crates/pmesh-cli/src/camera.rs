//! A synthetic orbiting camera, standing in for the windowing/input
//! surface SPEC_FULL.md's Non-goals exclude (§1). Used by `app` and
//! `bench` to produce a non-degenerate `view_projection` every frame.

use pmesh_math::{Point3, Transform, Vec3};

/// Orbit a fixed-radius camera around the origin at a constant
/// angular speed, always looking at the origin.
pub struct OrbitCamera {
    radius: f64,
    height: f64,
    angular_speed: f64,
    aspect: f64,
    fov_y: f64,
    near: f64,
    far: f64,
}

impl OrbitCamera {
    /// `radius`/`height` place the camera in world units; `aspect` is
    /// `width / height` of the target viewport.
    pub fn new(radius: f64, height: f64, aspect: f64) -> Self {
        Self {
            radius,
            height,
            angular_speed: 0.25,
            aspect,
            fov_y: std::f64::consts::FRAC_PI_4,
            near: 0.1,
            far: radius * 10.0,
        }
    }

    /// The combined view-projection transform at time `t` seconds.
    pub fn view_projection(&self, t: f64) -> Transform {
        let theta = t * self.angular_speed;
        let eye = Point3::new(
            self.radius * theta.cos(),
            self.height,
            self.radius * theta.sin(),
        );
        let target = Point3::origin();
        let up = Vec3::new(0.0, 1.0, 0.0);
        let view = Transform::look_at(&eye, &target, &up);
        let proj = Transform::perspective(self.aspect, self.fov_y, self.near, self.far);
        proj.then(&view)
    }
}
