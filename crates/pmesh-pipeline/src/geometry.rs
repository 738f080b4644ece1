//! Heap-id path splitting and world-space corner evaluation.
//!
//! A bisector's `heap_id` is not, on its own, a valid LEB path: the
//! top `base_depth - 1` bits are a flat root index (SPEC_FULL.md §3.3
//! seeds root `i`'s heap id as `2^(base_depth-1) + i`, not `1`), so
//! `pmesh_leb` must be handed a path relative to that root, not the
//! raw value. [`split_heap_id`] recovers both: which cage half-edge
//! owns this triangle, and its LEB path from that half-edge's base
//! triangle.

use bytemuck::{Pod, Zeroable};
use pmesh_bisector::msb_bits;
use pmesh_cage::Cage;
use pmesh_leb::{Evaluator, LebMatrixCache};
use pmesh_math::Point3;
use rayon::prelude::*;

/// Split a bisector's global `heap_id` into `(root_index, local_path)`:
/// `root_index` names the cage half-edge whose base triangle this
/// element descends from, and `local_path` is a heap id meaningful to
/// [`pmesh_leb`] (leading `1` followed by exactly the split bits
/// accumulated since that root).
pub fn split_heap_id(heap_id: u64, base_depth: u32) -> (u32, u64) {
    let appended = msb_bits(heap_id).saturating_sub(base_depth);
    let root_heap_id = heap_id >> appended;
    let root_index = (root_heap_id - (1u64 << (base_depth - 1))) as u32;
    let mask = (1u64 << appended) - 1;
    let local_path = (heap_id & mask) | (1u64 << appended);
    (root_index, local_path)
}

/// One cage half-edge's base triangle: its own origin, its face
/// successor's origin, and that successor's successor's origin. Any
/// cage face valence works; for the common quad case this is the
/// triangle spanned by three of the face's four corners, a diagonal
/// split of the quad keyed by which half-edge is asking.
pub fn root_base_triangles(cage: &Cage) -> Vec<[Point3; 3]> {
    (0..cage.halfedge_count())
        .map(|h| {
            let n0 = cage.halfedge_next(h);
            let n1 = cage.halfedge_next(n0);
            [
                cage.halfedge_vertex_point(h).to_point3(),
                cage.halfedge_vertex_point(n0).to_point3(),
                cage.halfedge_vertex_point(n1).to_point3(),
            ]
        })
        .collect()
}

/// A GPU-visible triangle corner record: one entry per active
/// bisector in `currentVertexBuffer`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct VertexRecord {
    /// World-space positions of the triangle's three corners.
    pub corners: [[f32; 3]; 3],
}

impl VertexRecord {
    fn from_points(p: [Point3; 3]) -> Self {
        Self {
            corners: p.map(|c| [c.x as f32, c.y as f32, c.z as f32]),
        }
    }
}

/// Evaluate world-space corners for every id in `ids`, in parallel.
/// Returns `(id, record)` pairs in the same order as `ids`.
pub fn evaluate(
    ids: &[u32],
    heap_id_of: impl Fn(u32) -> u64 + Sync,
    cache: &LebMatrixCache,
    base: &[[Point3; 3]],
    base_depth: u32,
) -> Vec<(u32, VertexRecord)> {
    let eval = Evaluator::new(cache);
    ids.par_iter()
        .map(|&id| {
            let heap_id = heap_id_of(id);
            let (root_index, local_path) = split_heap_id(heap_id, base_depth);
            let corners = eval.triangle_corners(local_path, base[root_index as usize]);
            (id, VertexRecord::from_points(corners))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_heap_id_splits_to_the_identity_path() {
        // base_depth = 6 (H0 = 24): root i=3 has heap_id 32+3=35.
        let (root_index, local_path) = split_heap_id(35, 6);
        assert_eq!(root_index, 3);
        assert_eq!(local_path, 1);
    }

    #[test]
    fn one_bisect_appends_a_single_path_bit() {
        // Root 32 (i=0) bisects to children 64, 128, 129.
        let (root, path) = split_heap_id(64, 6);
        assert_eq!(root, 0);
        assert_eq!(path, 0b10);

        let (root, path) = split_heap_id(128, 6);
        assert_eq!(root, 0);
        assert_eq!(path, 0b100);

        let (root, path) = split_heap_id(129, 6);
        assert_eq!(root, 0);
        assert_eq!(path, 0b101);
    }
}
