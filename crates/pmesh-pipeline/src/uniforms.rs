//! Per-frame constant-buffer payloads (SPEC_FULL.md §6.2's `cbv` bind
//! slots 0-2), plus the host-visible stats a frame reports back.

use pmesh_math::{Transform, Vec3};

/// Bind slot 0: view/projection, time, sun direction, and the target
/// viewport in pixels.
#[derive(Debug, Clone, Copy)]
pub struct GlobalUniforms {
    /// Combined view-projection transform for the frame being drawn.
    pub view_projection: Transform,
    /// Seconds since the pipeline was created.
    pub time: f32,
    /// Normalized direction toward the sun, for shading (unused by the
    /// CPU reference geometry pass, carried for backend parity).
    pub sun_direction: Vec3,
    /// Output viewport size in pixels.
    pub screen_size: (u32, u32),
}

impl GlobalUniforms {
    /// A stationary camera looking down `-Z`, `screen_size` pixels.
    pub fn stationary(screen_size: (u32, u32)) -> Self {
        Self {
            view_projection: Transform::identity(),
            time: 0.0,
            sun_direction: Vec3::new(0.0, 0.0, 1.0),
            screen_size,
        }
    }
}

/// Bind slot 1: element counts and material binding, constant for the
/// life of a [`crate::MeshUpdatePipeline`] (only `total_elements`
/// changes frame to frame).
#[derive(Debug, Clone, Copy)]
pub struct GeometryUniforms {
    /// Count of currently active bisector records (roots + occupied
    /// pool slots).
    pub total_elements: u32,
    /// `Graph::base_depth()`: bit-width of the root-index prefix every
    /// heap id under this cage carries.
    pub base_depth: u32,
    /// Opaque material binding, passed through unexamined.
    pub material_id: u32,
}

/// Bind slot 2: this update's target triangle size and subdivision
/// ceiling, plus the view/projection used to classify against.
#[derive(Debug, Clone, Copy)]
pub struct UpdateUniforms {
    /// View-projection used by `classify` to estimate projected
    /// triangle edge length.
    pub view_projection: Transform,
    /// Target projected longest-edge length in pixels; triangles
    /// larger than this bisect, smaller than half of it simplify.
    pub triangle_size_px: f32,
    /// Refinement ceiling: a bisector at this depth never bisects
    /// regardless of projected size.
    pub max_depth: u32,
}

/// Per-frame counters a host can read back without touching the
/// bisector graph directly (SPEC_FULL.md §7's `oversubscribed`, plus a
/// few more useful for `pmesh bench`).
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    /// `max(0, requested - granted)` pool slots this frame.
    pub oversubscribed: u32,
    /// Active element count after this frame's bisect/simplify passes.
    pub active_count: u32,
    /// Elements bisected this frame.
    pub bisected: u32,
    /// Elements simplified this frame.
    pub simplified: u32,
}
