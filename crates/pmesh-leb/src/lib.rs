#![warn(missing_docs)]

//! Longest-Edge-Bisection matrix cache and evaluator.
//!
//! A triangle's heap id encodes, MSB-first after the leading 1, the
//! sequence of longest-edge bisection choices taken from its cage
//! half-edge's base triangle. [`decode_subdivision_matrix`] folds that
//! path into a single 3x3 matrix whose columns are the barycentric
//! coordinates of the triangle's three corners in the base triangle's
//! basis. [`LebMatrixCache`] precomputes this for every heap id up to
//! a fixed depth; [`LebMatrixCache::matrix_for`] extends the cache to
//! arbitrary depth by chaining the uncached high bits onto the cached
//! low-depth block.

use pmesh_math::{Mat3, Point3, Vec3};

/// Bit length of `v`: `0` for `v == 0`, else the 1-based index of the
/// highest set bit.
pub fn msb_bits(v: u64) -> u32 {
    64 - v.leading_zeros()
}

/// One of the two fixed LEB splitting matrices, selected by the next
/// path bit.
fn splitting_matrix(bit: u32) -> Mat3 {
    if bit == 0 {
        Mat3::new(0.0, 0.5, 0.0, 0.0, 0.0, 1.0, 1.0, 0.5, 0.0)
    } else {
        Mat3::new(0.0, 0.5, 1.0, 1.0, 0.0, 0.0, 0.0, 0.5, 0.0)
    }
}

/// Decode the full subdivision matrix for `heap_id` from scratch,
/// without consulting a cache: `S(bit_{d-1}) · … · S(bit_1) · S(bit_0)`
/// applied right-to-left, where `d = msb_bits(heap_id) - 1`. Used to
/// build [`LebMatrixCache`]'s table and as a direct cross-check in
/// tests of [`LebMatrixCache::matrix_for`].
pub fn decode_subdivision_matrix(heap_id: u64) -> Mat3 {
    let depth = msb_bits(heap_id).saturating_sub(1);
    let mut m = Mat3::identity();
    for bit_pos in (0..depth).rev() {
        let bit = ((heap_id >> bit_pos) & 1) as u32;
        m = m * splitting_matrix(bit);
    }
    m
}

/// A precomputed table of subdivision matrices for every heap id up to
/// a fixed cache depth `D`, immutable after construction.
#[derive(Debug, Clone)]
pub struct LebMatrixCache {
    depth: u32,
    table: Vec<Mat3>,
}

impl LebMatrixCache {
    /// Build the cache for depth `depth` (entries `[0, 2^(depth+1))`;
    /// entry `0` is an unused placeholder, entry `1` is identity).
    pub fn new(depth: u32) -> Self {
        let count = 2usize << depth;
        let table = (0..count as u64).map(decode_subdivision_matrix).collect();
        Self { depth, table }
    }

    /// The cache depth `D` this table was built for.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Direct table lookup for a heap id already within cache depth
    /// (`msb_bits(heap_id) - 1 <= depth()`).
    pub fn cached(&self, heap_id: u64) -> Mat3 {
        self.table[heap_id as usize]
    }

    /// The subdivision matrix for any heap id, chaining the bits above
    /// the cache depth onto the cached low-depth block per
    /// SPEC_FULL.md §4.4: `shift = max(0, d - D)`; the cached lookup
    /// for `heap_id >> shift` supplies the deepest `D` path bits, and
    /// the remaining `shift` shallow bits are folded in one at a time.
    pub fn matrix_for(&self, heap_id: u64) -> Mat3 {
        let depth = msb_bits(heap_id).saturating_sub(1);
        let shift = depth.saturating_sub(self.depth);
        let truncated = heap_id >> shift;
        let mut acc = self.table[truncated as usize];
        for bit_pos in (0..shift).rev() {
            let bit = ((heap_id >> bit_pos) & 1) as u32;
            acc = acc * splitting_matrix(bit);
        }
        acc
    }
}

/// Lifts LEB subdivision matrices into world-space triangle corners
/// against a cache-backed matrix table.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    cache: &'a LebMatrixCache,
}

impl<'a> Evaluator<'a> {
    /// Evaluate against `cache`.
    pub fn new(cache: &'a LebMatrixCache) -> Self {
        Self { cache }
    }

    /// The three corners' barycentric coordinates in the base
    /// triangle's basis, the three columns of the subdivision matrix.
    pub fn corner_barycentrics(&self, heap_id: u64) -> [Vec3; 3] {
        let m = self.cache.matrix_for(heap_id);
        [
            Vec3::new(m[(0, 0)], m[(1, 0)], m[(2, 0)]),
            Vec3::new(m[(0, 1)], m[(1, 1)], m[(2, 1)]),
            Vec3::new(m[(0, 2)], m[(1, 2)], m[(2, 2)]),
        ]
    }

    /// World-space triangle corners, lifting the barycentrics with
    /// `base`: the owning half-edge's base triangle vertex positions,
    /// in ring order.
    pub fn triangle_corners(&self, heap_id: u64, base: [Point3; 3]) -> [Point3; 3] {
        self.corner_barycentrics(heap_id)
            .map(|b| Point3::from(base[0].coords * b.x + base[1].coords * b.y + base[2].coords * b.z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_heap_id_is_identity() {
        let cache = LebMatrixCache::new(5);
        assert_eq!(cache.cached(1), Mat3::identity());
        assert_eq!(cache.matrix_for(1), Mat3::identity());
    }

    #[test]
    fn cached_and_direct_decode_agree_within_cache_depth() {
        let cache = LebMatrixCache::new(5);
        for heap_id in 1u64..64 {
            assert_eq!(cache.matrix_for(heap_id), decode_subdivision_matrix(heap_id));
        }
    }

    #[test]
    fn chained_decode_beyond_cache_depth_matches_direct_decode() {
        let cache = LebMatrixCache::new(3);
        for heap_id in [100u64, 12345, 1u64 << 40, (1u64 << 40) + 0b1011] {
            assert_eq!(
                cache.matrix_for(heap_id),
                decode_subdivision_matrix(heap_id),
                "heap_id = {heap_id}"
            );
        }
    }

    #[test]
    fn corner_barycentrics_of_root_are_the_standard_basis() {
        let cache = LebMatrixCache::new(5);
        let eval = Evaluator::new(&cache);
        let [c0, c1, c2] = eval.corner_barycentrics(1);
        assert_eq!(c0, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(c1, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(c2, Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn triangle_corners_of_root_equal_the_base_triangle() {
        let cache = LebMatrixCache::new(5);
        let eval = Evaluator::new(&cache);
        let base = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let corners = eval.triangle_corners(1, base);
        assert_eq!(corners, base);
    }

    #[test]
    fn one_bisection_splits_the_base_triangle_at_its_midpoint() {
        // heap_id = 0b10 (depth 1, single bit = 0): child 2H from a
        // bisect of the root. Its barycentric corners are the columns
        // of S(0), one of which is always (0.5, 0, 0.5): the midpoint
        // of the base triangle's first and third corners.
        let cache = LebMatrixCache::new(5);
        let eval = Evaluator::new(&cache);
        let base = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
        ];
        let corners = eval.triangle_corners(0b10, base);
        let midpoint = Point3::from((base[0].coords + base[2].coords) * 0.5);
        assert!(corners.iter().any(|c| (c - midpoint).norm() < 1e-9));
    }

    #[test]
    fn depth_two_mixed_path_matches_hand_computed_matrix() {
        // heap_id = 0b110: depth 2, bit_1 (shallower, first split) = 1,
        // bit_0 (deeper, second split) = 0. Order matters here because
        // the two bits differ: the expected chain is
        // S(bit_1) * S(bit_0) = S(1) * S(0), computed by hand from
        // `splitting_matrix`'s literal entries, independently of
        // `decode_subdivision_matrix`'s own multiplication order.
        let expected = Mat3::new(1.0, 0.5, 0.5, 0.0, 0.5, 0.0, 0.0, 0.0, 0.5);
        assert_eq!(decode_subdivision_matrix(0b110), expected);

        // Force matrix_for to chain this same bit onto a cached block
        // rather than hitting the table directly, per the same order.
        let cache = LebMatrixCache::new(1);
        assert_eq!(cache.matrix_for(0b110), expected);
    }
}
