#![warn(missing_docs)]

//! Half-edge cage loader for the pmesh adaptive subdivision engine.
//!
//! A cage is the static, Catmull-Clark compatible control mesh fed
//! into the bisector graph. This crate owns the dense arena
//! representation, O(1) topology accessors, and the subdivision-depth
//! count formulas every downstream allocation (CBT capacity, bisector
//! graph size, vertex buffer size) is sized from.

mod format;

pub use format::{load_cage, load_cage_bytes, save_cage, save_cage_bytes, LoadError};

use pmesh_math::Point3;

/// Sentinel for "no half-edge" / "no twin" / boundary.
pub const INVALID: i32 = -1;

/// A control-mesh vertex position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexPoint {
    /// World-space x coordinate.
    pub x: f32,
    /// World-space y coordinate.
    pub y: f32,
    /// World-space z coordinate.
    pub z: f32,
}

impl VertexPoint {
    /// Construct from components.
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Convert to a double-precision point for geometric evaluation.
    pub fn to_point3(self) -> Point3 {
        Point3::new(self.x as f64, self.y as f64, self.z as f64)
    }
}

/// A UV parameter pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexUv {
    /// U coordinate.
    pub u: f32,
    /// V coordinate.
    pub v: f32,
}

/// An edge's crease record: a doubly-linked list pointer pair plus a
/// sharpness. Edges without a crease store their own id in
/// `next`/`prev` and sharpness 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crease {
    /// Next crease-list edge id, or self if uncreased.
    pub next: i32,
    /// Previous crease-list edge id, or self if uncreased.
    pub prev: i32,
    /// Sharpness, `>= 0`. `0.0` means "not a crease".
    pub sharpness: f32,
}

impl Crease {
    /// Whether this edge carries a crease.
    pub fn is_sharp(&self) -> bool {
        self.sharpness > 0.0
    }
}

/// A directed half-edge inside a face, paired with a twin half-edge
/// in the adjacent face (or `INVALID` at a boundary).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Halfedge {
    /// Twin half-edge id, `INVALID` at a boundary.
    pub twin: i32,
    /// Next half-edge around the face loop.
    pub next: i32,
    /// Previous half-edge around the face loop.
    pub prev: i32,
    /// Owning face id.
    pub face: i32,
    /// Owning edge (crease) id.
    pub edge: i32,
    /// Origin vertex id.
    pub vertex: i32,
    /// UV id, `INVALID` if the cage carries no UVs.
    pub uv: i32,
}

/// Per-depth element counts of a cage subdivided `d` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CageCounts {
    /// Vertex count at this depth.
    pub vertex: u64,
    /// Half-edge count at this depth.
    pub halfedge: u64,
    /// Total edge count at this depth (includes face-interior edges
    /// introduced by subdivision).
    pub edge: u64,
    /// Crease-edge count at this depth (only edges descending from a
    /// base-cage edge, doubling per subdivision).
    pub crease: u64,
    /// Face count at this depth.
    pub face: u64,
}

/// An immutable, loaded half-edge control mesh.
#[derive(Debug, Clone)]
pub struct Cage {
    vertex_to_halfedge: Vec<i32>,
    edge_to_halfedge: Vec<i32>,
    face_to_halfedge: Vec<i32>,
    vertex_points: Vec<VertexPoint>,
    uvs: Vec<VertexUv>,
    creases: Vec<Crease>,
    halfedges: Vec<Halfedge>,
}

impl Cage {
    /// Build a cage from its raw arenas. Used by the loader and by
    /// tests that construct synthetic cages in-memory.
    pub fn from_parts(
        vertex_to_halfedge: Vec<i32>,
        edge_to_halfedge: Vec<i32>,
        face_to_halfedge: Vec<i32>,
        vertex_points: Vec<VertexPoint>,
        uvs: Vec<VertexUv>,
        creases: Vec<Crease>,
        halfedges: Vec<Halfedge>,
    ) -> Self {
        Self {
            vertex_to_halfedge,
            edge_to_halfedge,
            face_to_halfedge,
            vertex_points,
            uvs,
            creases,
            halfedges,
        }
    }

    /// Number of base-cage vertices (`V0`).
    pub fn vertex_count(&self) -> usize {
        self.vertex_points.len()
    }

    /// Number of base-cage UVs (`U0`).
    pub fn uv_count(&self) -> usize {
        self.uvs.len()
    }

    /// Number of base-cage half-edges (`H0`).
    pub fn halfedge_count(&self) -> usize {
        self.halfedges.len()
    }

    /// Number of base-cage edges/creases (`E0`, also `C0`).
    pub fn edge_count(&self) -> usize {
        self.creases.len()
    }

    /// Number of base-cage faces (`F0`).
    pub fn face_count(&self) -> usize {
        self.face_to_halfedge.len()
    }

    /// Vertex position, by id.
    pub fn vertex_point(&self, vertex_id: usize) -> VertexPoint {
        self.vertex_points[vertex_id]
    }

    /// UV pair, by id.
    pub fn uv(&self, uv_id: usize) -> VertexUv {
        self.uvs[uv_id]
    }

    /// The half-edge originating from a vertex (O(1)).
    pub fn vertex_to_halfedge(&self, vertex_id: usize) -> i32 {
        self.vertex_to_halfedge[vertex_id]
    }

    /// A representative half-edge of an edge (O(1)).
    pub fn edge_to_halfedge(&self, edge_id: usize) -> i32 {
        self.edge_to_halfedge[edge_id]
    }

    /// A representative half-edge of a face (O(1)).
    pub fn face_to_halfedge(&self, face_id: usize) -> i32 {
        self.face_to_halfedge[face_id]
    }

    /// The raw half-edge record.
    pub fn halfedge(&self, halfedge_id: usize) -> Halfedge {
        self.halfedges[halfedge_id]
    }

    /// The crease record of an edge.
    pub fn crease(&self, edge_id: usize) -> Crease {
        self.creases[edge_id]
    }

    /// Twin half-edge id, or `None` at a boundary.
    pub fn halfedge_twin(&self, halfedge_id: usize) -> Option<usize> {
        let t = self.halfedges[halfedge_id].twin;
        (t != INVALID).then_some(t as usize)
    }

    /// Next half-edge around the owning face.
    pub fn halfedge_next(&self, halfedge_id: usize) -> usize {
        self.halfedges[halfedge_id].next as usize
    }

    /// Previous half-edge around the owning face.
    pub fn halfedge_prev(&self, halfedge_id: usize) -> usize {
        self.halfedges[halfedge_id].prev as usize
    }

    /// Owning face of a half-edge.
    pub fn halfedge_face(&self, halfedge_id: usize) -> usize {
        self.halfedges[halfedge_id].face as usize
    }

    /// World-space point at the origin of a half-edge.
    pub fn halfedge_vertex_point(&self, halfedge_id: usize) -> VertexPoint {
        self.vertex_points[self.halfedges[halfedge_id].vertex as usize]
    }

    /// Arithmetic `next` for a quad-only (subdivided) mesh: no table
    /// lookup required, see SPEC_FULL.md §4.2.
    pub fn halfedge_next_quad(halfedge_id: u32) -> u32 {
        (halfedge_id & !3) | ((halfedge_id + 1) & 3)
    }

    /// Arithmetic `prev` for a quad-only mesh.
    pub fn halfedge_prev_quad(halfedge_id: u32) -> u32 {
        (halfedge_id & !3) | ((halfedge_id.wrapping_sub(1)) & 3)
    }

    /// Arithmetic `face` for a quad-only mesh.
    pub fn halfedge_face_quad(halfedge_id: u32) -> u32 {
        halfedge_id >> 2
    }

    /// Compute (face, edge, half-edge, vertex, crease) counts at
    /// Catmull-Clark subdivision depth `d`, per SPEC_FULL.md §3.1.
    pub fn counts_at_depth(&self, d: u32) -> CageCounts {
        let v0 = self.vertex_count() as u64;
        let h0 = self.halfedge_count() as u64;
        let e0 = self.edge_count() as u64;
        let f0 = self.face_count() as u64;

        let halfedge = h0 * 4u64.pow(d);
        let face = if d == 0 { f0 } else { h0 * 4u64.pow(d - 1) };
        let crease = e0 * 2u64.pow(d);
        let two_d_minus_1 = 2u64.pow(d) - 1;
        let edge = if d == 0 {
            e0
        } else {
            2u64.pow(d - 1) * (2 * e0 + two_d_minus_1 * h0)
        };
        let vertex = v0 + two_d_minus_1 * e0 + two_d_minus_1 * two_d_minus_1 * f0;

        CageCounts {
            vertex,
            halfedge,
            edge,
            crease,
            face,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_cage() -> Cage {
        // A minimal cube cage matching SPEC_FULL.md §8's literal counts:
        // V=8, U=0, H=24, E=12, F=6. Topology detail beyond counts is
        // irrelevant to the count-formula tests below, so half-edges
        // are left pointing at themselves (still valid indices).
        let vertex_points: Vec<VertexPoint> = (0..8)
            .map(|i| VertexPoint::new(i as f32, 0.0, 0.0))
            .collect();
        let creases: Vec<Crease> = (0..12)
            .map(|i| Crease {
                next: i,
                prev: i,
                sharpness: 0.0,
            })
            .collect();
        let halfedges: Vec<Halfedge> = (0..24)
            .map(|h: i32| Halfedge {
                twin: INVALID,
                next: Cage::halfedge_next_quad(h as u32) as i32,
                prev: Cage::halfedge_prev_quad(h as u32) as i32,
                face: Cage::halfedge_face_quad(h as u32) as i32,
                edge: h % 12,
                vertex: h % 8,
                uv: INVALID,
            })
            .collect();
        let face_to_halfedge: Vec<i32> = (0..6).map(|f| f * 4).collect();
        let edge_to_halfedge: Vec<i32> = (0..12).collect();
        let vertex_to_halfedge: Vec<i32> = (0..8).collect();

        Cage::from_parts(
            vertex_to_halfedge,
            edge_to_halfedge,
            face_to_halfedge,
            vertex_points,
            Vec::new(),
            creases,
            halfedges,
        )
    }

    #[test]
    fn base_counts_match_cage() {
        let cage = cube_cage();
        assert_eq!(cage.vertex_count(), 8);
        assert_eq!(cage.uv_count(), 0);
        assert_eq!(cage.halfedge_count(), 24);
        assert_eq!(cage.edge_count(), 12);
        assert_eq!(cage.face_count(), 6);
    }

    #[test]
    fn depth_zero_equals_cage_counts() {
        let cage = cube_cage();
        let c = cage.counts_at_depth(0);
        assert_eq!(c.vertex, 8);
        assert_eq!(c.halfedge, 24);
        assert_eq!(c.edge, 12);
        assert_eq!(c.crease, 12);
        assert_eq!(c.face, 6);
    }

    #[test]
    fn depth_one_matches_spec_example() {
        let cage = cube_cage();
        let c = cage.counts_at_depth(1);
        assert_eq!(c.face, 24);
        assert_eq!(c.edge, 48);
        assert_eq!(c.vertex, 26);
        assert_eq!(c.crease, 24);
        assert_eq!(c.halfedge, 96);
    }

    #[test]
    fn face_count_at_depth_five() {
        let cage = cube_cage();
        let c = cage.counts_at_depth(5);
        assert_eq!(c.face, 24 * 4u64.pow(4));
    }

    #[test]
    fn quad_arithmetic_accessors() {
        assert_eq!(Cage::halfedge_face_quad(0), 0);
        assert_eq!(Cage::halfedge_face_quad(3), 0);
        assert_eq!(Cage::halfedge_face_quad(4), 1);
        assert_eq!(Cage::halfedge_next_quad(0), 1);
        assert_eq!(Cage::halfedge_next_quad(3), 0);
        assert_eq!(Cage::halfedge_prev_quad(0), 3);
        assert_eq!(Cage::halfedge_prev_quad(1), 0);
    }

    proptest::proptest! {
        /// Halfedge and crease counts quadruple/double per depth
        /// regardless of the base cage's own element counts.
        #[test]
        fn halfedge_and_crease_counts_scale_with_depth(d in 1u32..8) {
            let cage = cube_cage();
            let prev = cage.counts_at_depth(d - 1);
            let cur = cage.counts_at_depth(d);
            proptest::prop_assert_eq!(cur.halfedge, prev.halfedge * 4);
            proptest::prop_assert_eq!(cur.crease, prev.crease * 2);
        }
    }
}
