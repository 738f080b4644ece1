#![warn(missing_docs)]

//! Per-frame mesh update pipeline (SPEC_FULL.md §4.5): classify,
//! allocate, bisect/simplify with their propagate passes, CBT reduce,
//! geometry evaluation, and indexation, generic over a
//! [`pmesh_gpu::Backend`].
//!
//! Passes that only read/accumulate independent per-element results
//! (classify, geometry evaluation, indexation) run as `rayon` data-
//! parallel sweeps. Passes that rewrite neighbour pointers across
//! arbitrary element pairs (allocate, bisect, simplify, and their
//! propagate steps) run as a single sequential sweep per frame: the
//! CPU reference has no device queue to keep busy during them, and
//! sequencing avoids reasoning about unsynchronized cross-element
//! writes that a real backend would instead serialize with atomic
//! CBT bit ops and a propagation work queue (§5).

mod geometry;
mod uniforms;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use pmesh_bisector::{flags, BisectorState, Graph, GraphError, INVALID};
use pmesh_cage::Cage;
use pmesh_cbt::{Cbt, CbtCapacity, CbtError};
use pmesh_gpu::{Backend, BackendError, Buffer, BufferKind, CommandList, Kernel};
use pmesh_leb::{Evaluator, LebMatrixCache};
use pmesh_math::Point2;
use rayon::prelude::*;
use thiserror::Error;

pub use geometry::{root_base_triangles, split_heap_id, VertexRecord};
pub use uniforms::{FrameStats, GeometryUniforms, GlobalUniforms, UpdateUniforms};

/// Stable per-pass dispatch ids, bookkeeping-only on the CPU reference
/// backend (the real computation runs host-side in this crate); a
/// real backend would bind a distinct compute shader to each.
pub mod kernel {
    /// Zero per-frame scratch counters and modified/allocated flags.
    pub const RESET: u32 = 0;
    /// Classify every active element's subdivision command.
    pub const CLASSIFY: u32 = 1;
    /// Reserve CBT slots for elements marked BISECT.
    pub const ALLOCATE: u32 = 2;
    /// Materialize BISECT elements' three children.
    pub const BISECT: u32 = 3;
    /// Retarget neighbours of just-bisected elements.
    pub const PROPAGATE_BISECT: u32 = 4;
    /// Materialize agreeing SIMPLIFY quads back into their parent.
    pub const SIMPLIFY: u32 = 5;
    /// Retarget neighbours of just-simplified elements.
    pub const PROPAGATE_SIMPLIFY: u32 = 6;
    /// Parallel CBT reduction.
    pub const REDUCE: u32 = 7;
    /// Recompute world-space triangle corners.
    pub const EVALUATE_GEOMETRY: u32 = 8;
    /// Build visible/modified index lists and indirect args.
    pub const INDEXATION: u32 = 9;
    /// Optional debug pass checking neighbour symmetry/depth balance.
    pub const VALIDATE: u32 = 10;
}

const WORKGROUP_SIZE: u32 = 64;

/// Failure modes of running a frame through the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The backend rejected a resource or submission call.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// The bisector graph failed construction or validation.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// The CBT was constructed with an invalid capacity.
    #[error(transparent)]
    Cbt(#[from] CbtError),
}

/// The per-frame mesh update pipeline, generic over a backend `B`.
pub struct MeshUpdatePipeline<B: Backend> {
    backend: B,
    graph: Graph,
    cbt: Cbt,
    leb_cache: LebMatrixCache,
    base_triangles: Vec<[pmesh_math::Point3; 3]>,
    base_depth: u32,
    pool_capacity: u32,

    vertex_buffer: Buffer,
    visible_index_buffer: Buffer,
    modified_index_buffer: Buffer,
    indirect_draw_buffer: Buffer,
    indirect_dispatch_buffer: Buffer,

    alloc_cursor: AtomicU32,
    oversubscribed: AtomicU32,
    frame: u64,
}

impl<B: Backend> MeshUpdatePipeline<B> {
    /// Build a pipeline over `cage`, sized for `cbt_capacity` pool
    /// slots, caching LEB matrices to `leb_cache_depth`.
    pub fn new(
        cage: &Cage,
        backend: B,
        cbt_capacity: CbtCapacity,
        leb_cache_depth: u32,
    ) -> Result<Self, PipelineError> {
        let pool_capacity = cbt_capacity.leaves();
        let graph = Graph::from_cage(cage, pool_capacity)?;
        let cbt = Cbt::new(pool_capacity)?;
        let leb_cache = LebMatrixCache::new(leb_cache_depth);
        let base_triangles = geometry::root_base_triangles(cage);
        let base_depth = graph.base_depth();
        let total = graph.len();

        let vertex_buffer =
            backend.create_buffer(BufferKind::Upload, std::mem::size_of::<VertexRecord>(), total)?;
        let visible_index_buffer = backend.create_buffer(BufferKind::Upload, 4, total)?;
        let modified_index_buffer = backend.create_buffer(BufferKind::Upload, 4, total)?;
        let indirect_draw_buffer = backend.create_buffer(BufferKind::Upload, 4, 2)?;
        let indirect_dispatch_buffer = backend.create_buffer(BufferKind::Upload, 4, 3)?;

        Ok(Self {
            backend,
            graph,
            cbt,
            leb_cache,
            base_triangles,
            base_depth,
            pool_capacity,
            vertex_buffer,
            visible_index_buffer,
            modified_index_buffer,
            indirect_draw_buffer,
            indirect_dispatch_buffer,
            alloc_cursor: AtomicU32::new(0),
            oversubscribed: AtomicU32::new(0),
            frame: 0,
        })
    }

    /// The backend this pipeline was built over.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The bisector graph's current state.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The CBT's current state.
    pub fn cbt(&self) -> &Cbt {
        &self.cbt
    }

    /// Number of frames run so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    fn reset_frame_state(&mut self, cmd: &mut B::CommandList) -> Result<(), PipelineError> {
        let _span = tracing::debug_span!("reset").entered();
        self.alloc_cursor.store(0, Ordering::Relaxed);
        self.oversubscribed.store(0, Ordering::Relaxed);
        self.graph
            .records_mut()
            .par_iter_mut()
            .for_each(|rec| rec.flags &= !(flags::MODIFIED | flags::ALLOCATED_THIS_FRAME));
        cmd.clear(self.indirect_draw_buffer)?;
        cmd.clear(self.indirect_dispatch_buffer)?;
        cmd.dispatch(Kernel(kernel::RESET), 1, 1, 1)?;
        Ok(())
    }

    /// Classify every active element against `update`'s target size
    /// and the viewport, writing `state` and the `VISIBLE` flag.
    pub fn classify(&mut self, update: &UpdateUniforms, screen_size: (u32, u32)) {
        let _span = tracing::debug_span!("classify").entered();
        let leb_cache = &self.leb_cache;
        let base_triangles = &self.base_triangles;
        let base_depth = self.base_depth;
        let eval = Evaluator::new(leb_cache);

        self.graph.records_mut().par_iter_mut().for_each(|rec| {
            if !rec.is_active() {
                return;
            }
            let (root_index, local_path) = split_heap_id(rec.heap_id, base_depth);
            let corners = eval.triangle_corners(local_path, base_triangles[root_index as usize]);

            let mut pixels = [Point2::new(0.0, 0.0); 3];
            let mut behind_camera = true;
            for (i, corner) in corners.iter().enumerate() {
                let clip = update.view_projection.matrix
                    * nalgebra::Vector4::new(corner.x, corner.y, corner.z, 1.0);
                if clip.w > 1e-6 {
                    behind_camera = false;
                }
                let ndc = pmesh_math::Point3::new(clip.x / clip.w.max(1e-9), clip.y / clip.w.max(1e-9), 0.0);
                pixels[i] = pmesh_math::clip_to_pixels(&ndc, 1.0, screen_size.0 as f64, screen_size.1 as f64);
            }

            if behind_camera {
                rec.state = BisectorState::FrustumCulled;
                rec.flags &= !flags::VISIBLE;
                return;
            }

            // Screen-space winding: a negative signed area means the
            // projected triangle is wound clockwise, which (given the
            // cage's front-facing half-edge order and clip_to_pixels'
            // y-flip) identifies a back-facing triangle.
            let signed_area = (pixels[1].x - pixels[0].x) * (pixels[2].y - pixels[0].y)
                - (pixels[2].x - pixels[0].x) * (pixels[1].y - pixels[0].y);
            if signed_area <= 0.0 {
                rec.state = BisectorState::BackFaceCulled;
                rec.flags &= !flags::VISIBLE;
                return;
            }

            let longest_edge_px = [(0, 1), (1, 2), (2, 0)]
                .iter()
                .map(|&(a, b)| {
                    let dx = pixels[a].x - pixels[b].x;
                    let dy = pixels[a].y - pixels[b].y;
                    (dx * dx + dy * dy).sqrt()
                })
                .fold(0.0f32, f32::max);

            rec.flags |= flags::VISIBLE;
            let subdivision_depth = pmesh_bisector::msb_bits(rec.heap_id).saturating_sub(base_depth);
            if subdivision_depth < update.max_depth && longest_edge_px > update.triangle_size_px {
                rec.state = BisectorState::Bisect;
            } else if subdivision_depth > 0 && longest_edge_px < update.triangle_size_px * 0.5 {
                rec.state = BisectorState::Simplify;
            } else {
                rec.state = BisectorState::Unchanged;
            }
        });
    }

    /// Reserve three fresh CBT slots for every element marked BISECT,
    /// advancing the per-frame allocation cursor atomically. Elements
    /// that can't be granted a full triple revert to UNCHANGED
    /// (SPEC_FULL.md §4.3/§7: soft failure, counted in
    /// `oversubscribed`, never a panic).
    pub fn allocate(&mut self) {
        let _span = tracing::debug_span!("allocate").entered();
        let free_slots = self.pool_capacity - self.cbt.bit_count();
        let candidates: Vec<u32> = self
            .graph
            .iter()
            .filter(|(_, rec)| rec.state == BisectorState::Bisect)
            .map(|(id, _)| *id)
            .collect();

        let mut requested = 0u32;
        let mut granted = 0u32;
        for id in candidates {
            requested += 3;
            let base = self.alloc_cursor.fetch_add(3, Ordering::Relaxed);
            if base + 3 > free_slots {
                self.graph.record_mut(id).state = BisectorState::Unchanged;
                continue;
            }
            let indices = [
                self.cbt.decode_bit_complement(base),
                self.cbt.decode_bit_complement(base + 1),
                self.cbt.decode_bit_complement(base + 2),
            ];
            self.graph.record_mut(id).indices = indices;
            granted += 3;
        }
        self.oversubscribed
            .store(requested.saturating_sub(granted), Ordering::Relaxed);
    }

    /// Bisect every element still marked BISECT with indices granted
    /// this frame, then retarget neighbours that had not yet learned
    /// of the split. Returns the number of elements bisected.
    pub fn bisect(&mut self) -> u32 {
        let _span = tracing::debug_span!("bisect").entered();
        let parents: Vec<u32> = self
            .graph
            .iter()
            .filter(|(_, rec)| rec.state == BisectorState::Bisect && rec.indices[0] != INVALID)
            .map(|(id, _)| *id)
            .collect();

        for &parent in &parents {
            let indices = self.graph.record(parent).indices;
            let old = self.graph.bisect(parent, indices);
            self.graph.propagate_after_bisect(parent, old, indices);
            for &c in &indices {
                self.cbt.set(c, true);
            }
            if !self.graph.is_root(parent) {
                self.cbt.set(parent, false);
            }
        }
        parents.len() as u32
    }

    /// Simplify every quad of three siblings that all agreed on
    /// SIMPLIFY, re-activating their shared parent and retargeting
    /// neighbours. A sibling whose quad-mates disagree, or whose
    /// heap ids don't line up into a clean `(2H, 4H, 4H+1)` triple,
    /// reverts to UNCHANGED this frame and retries next frame.
    /// Returns the number of quads simplified.
    pub fn simplify(&mut self) -> u32 {
        let _span = tracing::debug_span!("simplify").entered();
        let mut groups: HashMap<u32, Vec<u32>> = HashMap::new();
        for (id, rec) in self.graph.iter() {
            if rec.state == BisectorState::Simplify && rec.parent != INVALID {
                groups.entry(rec.parent).or_default().push(id);
            }
        }

        let mut simplified = 0u32;
        for (parent, siblings) in groups {
            if siblings.len() != 3 {
                for &id in &siblings {
                    self.graph.record_mut(id).state = BisectorState::Unchanged;
                }
                continue;
            }

            let h = self.graph.record(parent).heap_id;
            let mut ordered = [INVALID; 3];
            for &c in &siblings {
                let child_heap = self.graph.record(c).heap_id;
                if child_heap == 2 * h {
                    ordered[0] = c;
                } else if child_heap == 4 * h {
                    ordered[1] = c;
                } else if child_heap == 4 * h + 1 {
                    ordered[2] = c;
                }
            }
            if ordered.contains(&INVALID) {
                for &id in &siblings {
                    self.graph.record_mut(id).state = BisectorState::Unchanged;
                }
                continue;
            }

            let new = self.graph.simplify(parent, ordered);
            self.graph.propagate_after_simplify(parent, new, ordered);
            for &c in &ordered {
                self.cbt.set(c, false);
            }
            if !self.graph.is_root(parent) {
                self.cbt.set(parent, true);
            }
            simplified += 1;
        }
        simplified
    }

    /// Recompute world-space triangle corners for every active
    /// element flagged MODIFIED this frame (or, on the first frame,
    /// every active element), writing the result into the backend's
    /// vertex buffer.
    pub fn evaluate_geometry(&mut self) -> Result<(), PipelineError> {
        let _span = tracing::debug_span!("evaluate_geometry").entered();
        let ids: Vec<u32> = if self.frame == 0 {
            self.graph.iter().filter(|(_, r)| r.is_active()).map(|(id, _)| *id).collect()
        } else {
            self.graph
                .iter()
                .filter(|(_, r)| r.is_active() && r.flags & flags::MODIFIED != 0)
                .map(|(id, _)| *id)
                .collect()
        };

        let graph = &self.graph;
        let records = geometry::evaluate(
            &ids,
            |id| graph.record(id).heap_id,
            &self.leb_cache,
            &self.base_triangles,
            self.base_depth,
        );
        for (id, record) in records {
            let offset = id as u64 * std::mem::size_of::<VertexRecord>() as u64;
            self.backend.write_upload(self.vertex_buffer, offset, &[record])?;
        }
        Ok(())
    }

    /// Build the visible and modified index lists and the indirect
    /// draw/dispatch argument buffers from this frame's final state.
    /// Returns `(visible_count, modified_count)`.
    pub fn indexation(&mut self) -> Result<(u32, u32), PipelineError> {
        let _span = tracing::debug_span!("indexation").entered();
        let visible: Vec<u32> = self
            .graph
            .iter()
            .filter(|(_, r)| r.is_active() && r.flags & flags::VISIBLE != 0)
            .map(|(id, _)| *id)
            .collect();
        let modified: Vec<u32> = self
            .graph
            .iter()
            .filter(|(_, r)| r.is_active() && r.flags & flags::MODIFIED != 0)
            .map(|(id, _)| *id)
            .collect();

        self.backend.write_upload(self.visible_index_buffer, 0, &visible)?;
        self.backend.write_upload(self.modified_index_buffer, 0, &modified)?;

        let draw_args: [u32; 2] = [3 * visible.len() as u32, 1];
        self.backend.write_upload(self.indirect_draw_buffer, 0, &draw_args)?;
        let dispatch_groups = (visible.len() as u32).div_ceil(WORKGROUP_SIZE);
        let dispatch_args: [u32; 3] = [dispatch_groups, 1, 1];
        self.backend
            .write_upload(self.indirect_dispatch_buffer, 0, &dispatch_args)?;

        Ok((visible.len() as u32, modified.len() as u32))
    }

    /// Run one full frame: classify, allocate, bisect/simplify with
    /// their propagate passes, reduce, evaluate geometry, index.
    /// `validate` additionally runs [`Graph::validate`] at the end,
    /// surfacing an `InvariantViolation` as an error rather than the
    /// readback-buffer the real GPU pipeline would use (§7) — this
    /// reference backend has no separate host/device boundary to
    /// cross, so there is nothing gained by deferring it.
    pub fn run_frame(
        &mut self,
        global: &GlobalUniforms,
        update: &UpdateUniforms,
        validate: bool,
    ) -> Result<FrameStats, PipelineError> {
        let _span = tracing::debug_span!("frame", frame = self.frame).entered();
        let mut cmd = self.backend.create_command_list()?;
        cmd.reset()?;

        self.reset_frame_state(&mut cmd)?;

        self.classify(update, global.screen_size);
        cmd.dispatch(Kernel(kernel::CLASSIFY), 1, 1, 1)?;

        self.allocate();
        cmd.dispatch(Kernel(kernel::ALLOCATE), 1, 1, 1)?;

        let bisected = self.bisect();
        cmd.dispatch(Kernel(kernel::BISECT), 1, 1, 1)?;
        cmd.dispatch(Kernel(kernel::PROPAGATE_BISECT), 1, 1, 1)?;

        let simplified = self.simplify();
        cmd.dispatch(Kernel(kernel::SIMPLIFY), 1, 1, 1)?;
        cmd.dispatch(Kernel(kernel::PROPAGATE_SIMPLIFY), 1, 1, 1)?;

        self.cbt.reduce();
        cmd.dispatch(Kernel(kernel::REDUCE), 1, 1, 1)?;

        cmd.uav_barrier(self.vertex_buffer)?;
        self.evaluate_geometry()?;
        cmd.dispatch(Kernel(kernel::EVALUATE_GEOMETRY), 1, 1, 1)?;

        let (visible, modified) = self.indexation()?;
        cmd.dispatch_indirect(Kernel(kernel::INDEXATION), self.indirect_dispatch_buffer, 0)?;

        if validate {
            self.graph.validate(|id| self.graph.record(id).is_active())?;
            cmd.dispatch(Kernel(kernel::VALIDATE), 1, 1, 1)?;
        }

        cmd.close()?;
        self.frame += 1;

        Ok(FrameStats {
            oversubscribed: self.oversubscribed.load(Ordering::Relaxed),
            active_count: visible.max(modified).max(self.cbt.bit_count() + self.graph.root_count()),
            bisected,
            simplified,
        })
    }
}
