#![warn(missing_docs)]

//! The bisector graph: a fixed-capacity array of per-triangle records
//! describing the live half-edge refinement of a [`pmesh_cage::Cage`].
//!
//! Positions `[0, pool_capacity)` are the free pool addressed by a
//! `pmesh-cbt`-managed CBT (bit 1 = occupied by an active bisector);
//! positions `[pool_capacity, pool_capacity + H0)` are pre-populated
//! root bisectors, one per base-cage half-edge, that never return to
//! the pool. This crate owns the record layout and the pure topology
//! rewrites (`bisect`/`simplify`/their propagate counterparts) that
//! keep neighbour pointers conformant; scheduling the per-frame passes
//! that call into them is `pmesh-pipeline`'s job.

use pmesh_cage::Cage;
use thiserror::Error;

/// Sentinel for "no neighbour" / "no allocation yet".
pub const INVALID: u32 = u32::MAX;

/// Failure modes of bisector graph construction and validation.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The cage carries no half-edges, so there is nothing to seed root
    /// bisectors from.
    #[error("cage has no half-edges to seed root bisectors from")]
    EmptyCage,

    /// An element id named by a caller is outside `[0, len())`.
    #[error("element id {0} is out of range")]
    OutOfRange(u32),

    /// Two bisectors disagree about being each other's neighbour.
    #[error("element {0} names {1} as a neighbour, but {1} does not name {0} back")]
    AsymmetricNeighbour(u32, u32),

    /// A twin pair's depths differ by more than one level.
    #[error("elements {0} and {1} are twins but differ in depth by more than one level")]
    DepthImbalance(u32, u32),
}

/// Bit length of `v`: `0` for `v == 0`, else the 1-based index of the
/// highest set bit. `depth(heap_id) = msb_bits(heap_id) - 1`.
pub fn msb_bits(v: u64) -> u32 {
    64 - v.leading_zeros()
}

/// Per-triangle refinement state (`bisector.h`'s `bisectorState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum BisectorState {
    /// Culled by the back-face test; excluded from classify/draw.
    BackFaceCulled = -3,
    /// Culled by the view frustum.
    FrustumCulled = -2,
    /// Below the minimum projected size; treated as a refinement leaf.
    TooSmall = -1,
    /// Neither split nor merged this frame.
    Unchanged = 0,
    /// Marked to bisect into three children.
    Bisect = 1,
    /// Marked to simplify back into its parent.
    Simplify = 2,
    /// Replaced by three children this frame; its slot is free again.
    Merged = 3,
}

/// Per-bisector visibility/modification flags (a plain bitmask, not a
/// `bitflags` type, mirroring `BisectorData::flags`'s raw `uint32_t`).
pub mod flags {
    /// Set when the triangle passed the frustum/back-face/size tests
    /// and is part of the visible index list this frame.
    pub const VISIBLE: u32 = 1 << 0;
    /// Set when the record's topology or geometry changed this frame;
    /// drives the LEB evaluator's incremental mode.
    pub const MODIFIED: u32 = 1 << 1;
    /// Set on a record written by this frame's `allocate` pass.
    pub const ALLOCATED_THIS_FRAME: u32 = 1 << 2;
}

/// The three neighbour element ids of a bisector: the two siblings
/// sharing its non-bisected edges, and the twin across its longest
/// edge. `INVALID` denotes "none" (a cage boundary, or a free slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbours {
    /// Previous triangle around the shared fan.
    pub prev: u32,
    /// Next triangle around the shared fan.
    pub next: u32,
    /// Triangle sharing this one's longest (bisection) edge.
    pub twin: u32,
}

impl Neighbours {
    /// All three neighbours unset.
    pub fn none() -> Self {
        Self {
            prev: INVALID,
            next: INVALID,
            twin: INVALID,
        }
    }
}

/// A single bisector graph record (`BisectorData` in the source
/// lineage).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BisectorRecord {
    /// Binary path from the cage root to this triangle, MSB-first with
    /// a leading 1. `0` marks a free (inactive) slot.
    pub heap_id: u64,
    /// The three neighbour element ids.
    pub neighbours: Neighbours,
    /// Pending subdivision command bits, written by `classify`.
    pub subdivision_command: u32,
    /// Current lifecycle state.
    pub state: BisectorState,
    /// Visibility/modification bitmask, see [`flags`].
    pub flags: u32,
    /// Work-queue slot used to enqueue this element for propagation.
    pub propagation_id: u32,
    /// Three freshly allocated CBT slots, valid only while `state ==
    /// Bisect` and allocation has succeeded this frame.
    pub indices: [u32; 3],
    /// Element id of the triangle this one was produced by bisecting,
    /// `INVALID` for roots and free slots. Not part of the wire
    /// record described in SPEC_FULL.md §3.3; kept so the simplify
    /// pass can group a quad's three children in O(1) instead of
    /// re-deriving the relationship from heap-id arithmetic, which is
    /// ambiguous (a heap id divisible by 4 could be either a `4H`
    /// child of `H` or a `2H'` child of `H' = 2H`).
    pub parent: u32,
}

impl BisectorRecord {
    /// A fresh, unchanged record at `heap_id`, with the given initial
    /// neighbours and flags. Used both for root seeding and for
    /// records just written by `bisect`/`simplify`.
    pub fn fresh(heap_id: u64, neighbours: Neighbours, flags: u32) -> Self {
        Self {
            heap_id,
            neighbours,
            subdivision_command: 0,
            state: BisectorState::Unchanged,
            flags,
            propagation_id: INVALID,
            indices: [INVALID; 3],
            parent: INVALID,
        }
    }

    /// A free pool slot: zero heap id marks it as inactive.
    pub fn free() -> Self {
        Self::fresh(0, Neighbours::none(), 0)
    }

    /// Whether this slot currently holds an active triangle.
    pub fn is_active(&self) -> bool {
        self.heap_id != 0
    }

    /// Refinement depth: `msb_bits(heap_id) - 1`. Meaningless on a
    /// free slot.
    pub fn depth(&self) -> u32 {
        msb_bits(self.heap_id).saturating_sub(1)
    }
}

/// The bisector graph: root records plus the CBT-addressed free pool.
#[derive(Debug, Clone)]
pub struct Graph {
    records: Vec<BisectorRecord>,
    pool_capacity: u32,
    h0: u32,
    base_depth: u32,
}

impl Graph {
    /// Build a graph sized for `pool_capacity` pool slots, seeding one
    /// root bisector per cage half-edge from `cage`'s topology. Root
    /// neighbours mirror the cage's `next`/`prev`/`twin` directly,
    /// offset into root-id space; root ids are always active and
    /// start `VISIBLE`.
    pub fn from_cage(cage: &Cage, pool_capacity: u32) -> Result<Self, GraphError> {
        let h0 = cage.halfedge_count() as u32;
        if h0 == 0 {
            return Err(GraphError::EmptyCage);
        }
        let base_depth = msb_bits(h0 as u64) + 1;

        let mut records = vec![BisectorRecord::free(); (pool_capacity + h0) as usize];
        for i in 0..h0 {
            let heap_id = (1u64 << (base_depth - 1)) + i as u64;
            let next = pool_capacity + cage.halfedge_next(i as usize) as u32;
            let prev = pool_capacity + cage.halfedge_prev(i as usize) as u32;
            let twin = cage
                .halfedge_twin(i as usize)
                .map(|t| pool_capacity + t as u32)
                .unwrap_or(INVALID);
            records[(pool_capacity + i) as usize] =
                BisectorRecord::fresh(heap_id, Neighbours { prev, next, twin }, flags::VISIBLE);
        }

        Ok(Self {
            records,
            pool_capacity,
            h0,
            base_depth,
        })
    }

    /// Total record count, `pool_capacity + H0`.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the graph holds no records (never true for a graph
    /// built from a non-empty cage, kept for API completeness).
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The CBT-addressed free pool's capacity.
    pub fn pool_capacity(&self) -> u32 {
        self.pool_capacity
    }

    /// Number of cage half-edges, i.e. root bisectors.
    pub fn root_count(&self) -> u32 {
        self.h0
    }

    /// `k` such that root heap ids occupy `[2^(k-1), 2^(k-1) + H0)`.
    pub fn base_depth(&self) -> u32 {
        self.base_depth
    }

    /// Element id of the root bisector seeded from half-edge
    /// `halfedge_id`.
    pub fn root_id(&self, halfedge_id: u32) -> u32 {
        self.pool_capacity + halfedge_id
    }

    /// Whether `id` names a root bisector (always active, never
    /// returned to the pool) rather than a pool slot.
    pub fn is_root(&self, id: u32) -> bool {
        id >= self.pool_capacity
    }

    /// Read a record.
    pub fn record(&self, id: u32) -> &BisectorRecord {
        &self.records[id as usize]
    }

    /// Mutably access a record, e.g. to update `state`/`flags` from a
    /// classify pass.
    pub fn record_mut(&mut self, id: u32) -> &mut BisectorRecord {
        &mut self.records[id as usize]
    }

    /// Iterate every record with its element id.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &BisectorRecord)> {
        self.records.iter().enumerate().map(|(i, r)| (i as u32, r))
    }

    /// The raw record slice, for callers that drive their own
    /// parallel iteration (e.g. `pmesh-pipeline`'s classify pass via
    /// `rayon::slice::ParallelSliceMut`).
    pub fn records_mut(&mut self) -> &mut [BisectorRecord] {
        &mut self.records
    }

    fn retarget(&mut self, who: u32, was: u32, now: u32) {
        if who == INVALID {
            return;
        }
        let n = &mut self.records[who as usize].neighbours;
        if n.prev == was {
            n.prev = now;
        }
        if n.next == was {
            n.next = now;
        }
        if n.twin == was {
            n.twin = now;
        }
    }

    /// Bisect `parent` into `children` (three freshly allocated pool
    /// slots). Writes heap ids `2H`, `4H`, `4H+1` and wires the three
    /// children's own ring (`prev`/`next`) plus their provisional
    /// `twin`s from `parent`'s old neighbours, per SPEC_FULL.md §4.3:
    ///
    /// - `children[0]` (`2H`) takes `parent`'s old twin.
    /// - `children[1]` (`4H`) takes `parent`'s old next.
    /// - `children[2]` (`4H+1`) takes `parent`'s old prev.
    ///
    /// `parent`'s slot is marked `Merged` (its CBT bit is the caller's
    /// responsibility to clear). Returns `parent`'s pre-bisect
    /// neighbours so the caller can run [`Graph::propagate_after_bisect`]
    /// once the whole pass has committed, retargeting any neighbour
    /// that still names `parent`.
    pub fn bisect(&mut self, parent: u32, children: [u32; 3]) -> Neighbours {
        let old = self.records[parent as usize].neighbours;
        let h = self.records[parent as usize].heap_id;
        let [c0, c1, c2] = children;

        self.records[c0 as usize] = BisectorRecord::fresh(
            2 * h,
            Neighbours {
                prev: c2,
                next: c1,
                twin: old.twin,
            },
            flags::ALLOCATED_THIS_FRAME | flags::MODIFIED,
        );
        self.records[c1 as usize] = BisectorRecord::fresh(
            4 * h,
            Neighbours {
                prev: c0,
                next: c2,
                twin: old.next,
            },
            flags::ALLOCATED_THIS_FRAME | flags::MODIFIED,
        );
        self.records[c2 as usize] = BisectorRecord::fresh(
            4 * h + 1,
            Neighbours {
                prev: c1,
                next: c0,
                twin: old.prev,
            },
            flags::ALLOCATED_THIS_FRAME | flags::MODIFIED,
        );

        self.records[c0 as usize].parent = parent;
        self.records[c1 as usize].parent = parent;
        self.records[c2 as usize].parent = parent;

        self.records[parent as usize].state = BisectorState::Merged;
        self.records[parent as usize].flags |= flags::MODIFIED;
        old
    }

    /// Retarget any neighbour of `parent` (captured as `old`, before
    /// [`Graph::bisect`] overwrote it) from `parent` to the matching
    /// child, so a neighbour that had not yet learned of the split
    /// picks up the correct new id. Idempotent if called twice with
    /// the same arguments.
    pub fn propagate_after_bisect(&mut self, parent: u32, old: Neighbours, children: [u32; 3]) {
        let [c0, c1, c2] = children;
        self.retarget(old.twin, parent, c0);
        self.retarget(old.next, parent, c1);
        self.retarget(old.prev, parent, c2);
    }

    /// Simplify `children` (three siblings produced by the same
    /// bisect) back into `parent`, the exact inverse of
    /// [`Graph::bisect`]: `parent` is reconstructed at heap id `H =
    /// heap_id(children[0]) / 2` with neighbours taken from each
    /// child's own twin, and the three children's slots are freed.
    /// Returns `parent`'s new neighbours for
    /// [`Graph::propagate_after_simplify`].
    pub fn simplify(&mut self, parent: u32, children: [u32; 3]) -> Neighbours {
        let [c0, c1, c2] = children;
        let h = self.records[c0 as usize].heap_id / 2;
        let new = Neighbours {
            twin: self.records[c0 as usize].neighbours.twin,
            next: self.records[c1 as usize].neighbours.twin,
            prev: self.records[c2 as usize].neighbours.twin,
        };

        for &c in &children {
            self.records[c as usize] = BisectorRecord::free();
        }
        self.records[parent as usize] =
            BisectorRecord::fresh(h, new, flags::MODIFIED | flags::VISIBLE);
        new
    }

    /// Retarget the three freed children's old twins back onto
    /// `parent`, the inverse of [`Graph::propagate_after_bisect`].
    pub fn propagate_after_simplify(&mut self, parent: u32, new: Neighbours, children: [u32; 3]) {
        let [c0, c1, c2] = children;
        self.retarget(new.twin, c0, parent);
        self.retarget(new.next, c1, parent);
        self.retarget(new.prev, c2, parent);
    }

    /// Check neighbour symmetry and depth balance over every record
    /// for which `is_active` returns true. Returns the first violation
    /// found; per SPEC_FULL.md §7 this is an `InvariantViolation`, not
    /// fatal, and callers may choose to log-and-continue rather than
    /// propagate the error.
    pub fn validate(&self, is_active: impl Fn(u32) -> bool) -> Result<(), GraphError> {
        for (id, rec) in self.iter() {
            if !is_active(id) {
                continue;
            }
            let n = rec.neighbours;
            if n.next != INVALID && self.records[n.next as usize].neighbours.prev != id {
                return Err(GraphError::AsymmetricNeighbour(id, n.next));
            }
            if n.twin != INVALID {
                let twin = &self.records[n.twin as usize];
                if twin.neighbours.twin != id {
                    return Err(GraphError::AsymmetricNeighbour(id, n.twin));
                }
                let d0 = rec.depth() as i64;
                let d1 = twin.depth() as i64;
                if (d0 - d1).abs() > 1 {
                    return Err(GraphError::DepthImbalance(id, n.twin));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmesh_cage::{Cage, Crease, VertexPoint};

    fn cube_cage() -> Cage {
        let vertex_points: Vec<VertexPoint> = (0..8).map(|i| VertexPoint::new(i as f32, 0.0, 0.0)).collect();
        let creases: Vec<Crease> = (0..12)
            .map(|i| Crease {
                next: i,
                prev: i,
                sharpness: 0.0,
            })
            .collect();
        let halfedges: Vec<pmesh_cage::Halfedge> = (0..24)
            .map(|h: i32| pmesh_cage::Halfedge {
                twin: pmesh_cage::INVALID,
                next: Cage::halfedge_next_quad(h as u32) as i32,
                prev: Cage::halfedge_prev_quad(h as u32) as i32,
                face: Cage::halfedge_face_quad(h as u32) as i32,
                edge: h % 12,
                vertex: h % 8,
                uv: pmesh_cage::INVALID,
            })
            .collect();
        Cage::from_parts(
            (0..8).collect(),
            (0..12).collect(),
            (0..6).map(|f| f * 4).collect(),
            vertex_points,
            Vec::new(),
            creases,
            halfedges,
        )
    }

    #[test]
    fn root_seeding_matches_spec_example() {
        // SPEC_FULL.md §8 scenario 3: H=24, heap ids (2^(k-1)+i), k = msb(24)+1 = 6.
        let cage = cube_cage();
        let pool_capacity = 1 << 17;
        let graph = Graph::from_cage(&cage, pool_capacity).unwrap();

        assert_eq!(graph.root_count(), 24);
        assert_eq!(graph.base_depth(), 6);
        for i in 0..24u32 {
            let id = graph.root_id(i);
            let rec = graph.record(id);
            assert!(rec.is_active());
            assert_eq!(rec.heap_id, 32 + i as u64);
            assert_eq!(rec.flags & flags::VISIBLE, flags::VISIBLE);
        }
    }

    #[test]
    fn root_neighbours_mirror_cage_quad_ring() {
        let cage = cube_cage();
        let pool_capacity = 1024;
        let graph = Graph::from_cage(&cage, pool_capacity).unwrap();

        let id0 = graph.root_id(0);
        let id1 = graph.root_id(1);
        assert_eq!(graph.record(id0).neighbours.next, id1);
        assert_eq!(graph.record(id1).neighbours.prev, id0);
        assert_eq!(graph.record(id0).neighbours.twin, INVALID);
    }

    #[test]
    fn bisect_then_simplify_round_trips_heap_id_and_neighbours() {
        let cage = cube_cage();
        let pool_capacity = 1024;
        let mut graph = Graph::from_cage(&cage, pool_capacity).unwrap();

        let parent = graph.root_id(0);
        let before = graph.record(parent).neighbours;
        let children = [0u32, 1, 2];

        let old = graph.bisect(parent, children);
        assert_eq!(old, before);
        graph.propagate_after_bisect(parent, old, children);

        for &c in &children {
            assert_eq!(graph.record(c).parent, parent);
        }
        assert_eq!(graph.record(children[0]).heap_id, 2 * (32));
        assert_eq!(graph.record(children[1]).heap_id, 4 * 32);
        assert_eq!(graph.record(children[2]).heap_id, 4 * 32 + 1);
        assert_eq!(graph.record(children[0]).neighbours.twin, before.twin);
        assert_eq!(graph.record(children[1]).neighbours.twin, before.next);
        assert_eq!(graph.record(children[2]).neighbours.twin, before.prev);

        let new = graph.simplify(parent, children);
        graph.propagate_after_simplify(parent, new, children);

        assert_eq!(graph.record(parent).heap_id, 32);
        assert_eq!(graph.record(parent).neighbours, before);
        for &c in &children {
            assert!(!graph.record(c).is_active());
        }
    }

    #[test]
    fn validate_accepts_an_untouched_root_ring() {
        let cage = cube_cage();
        let graph = Graph::from_cage(&cage, 1024).unwrap();
        graph.validate(|id| graph.is_root(id)).unwrap();
    }

    #[test]
    fn validate_catches_asymmetric_neighbour() {
        let cage = cube_cage();
        let mut graph = Graph::from_cage(&cage, 1024).unwrap();
        let id0 = graph.root_id(0);
        let id2 = graph.root_id(2);
        graph.record_mut(id0).neighbours.next = id2;
        assert!(matches!(
            graph.validate(|id| graph.is_root(id)),
            Err(GraphError::AsymmetricNeighbour(_, _))
        ));
    }

    #[test]
    fn empty_cage_is_rejected() {
        let cage = Cage::from_parts(vec![], vec![], vec![], vec![], vec![], vec![], vec![]);
        assert!(matches!(Graph::from_cage(&cage, 1024), Err(GraphError::EmptyCage)));
    }

    #[test]
    fn msb_bits_matches_bit_length() {
        assert_eq!(msb_bits(0), 0);
        assert_eq!(msb_bits(1), 1);
        assert_eq!(msb_bits(24), 5);
        assert_eq!(msb_bits(32), 6);
    }

    proptest::proptest! {
        /// Bisecting any root and simplifying it straight back always
        /// restores its original heap id and neighbour ring, whichever
        /// root half-edge or pool slots are chosen.
        #[test]
        fn bisect_then_simplify_restores_any_root(
            root_index in 0u32..24,
            children in proptest::sample::subsequence((0u32..64).collect::<Vec<_>>(), 3)
        ) {
            let cage = cube_cage();
            let mut graph = Graph::from_cage(&cage, 1024).unwrap();
            let parent = graph.root_id(root_index);
            let before_heap = graph.record(parent).heap_id;
            let before_neighbours = graph.record(parent).neighbours;
            let children: [u32; 3] = [children[0], children[1], children[2]];

            let old = graph.bisect(parent, children);
            graph.propagate_after_bisect(parent, old, children);
            let new = graph.simplify(parent, children);
            graph.propagate_after_simplify(parent, new, children);

            proptest::prop_assert_eq!(graph.record(parent).heap_id, before_heap);
            proptest::prop_assert_eq!(graph.record(parent).neighbours, before_neighbours);
            for &c in &children {
                proptest::prop_assert!(!graph.record(c).is_active());
            }
        }
    }
}
