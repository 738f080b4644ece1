#![warn(missing_docs)]

//! Concurrent Binary Tree (CBT): a fixed-capacity implicit binary
//! counting tree over a leaf bitfield, supporting atomic set/get of
//! leaves, parallel reduction, and O(log N) rank/select.
//!
//! Two backing stores, per SPEC_FULL.md §3.2/§4.1:
//!
//! - a **packed heap** of 32-bit words holding internal node counts
//!   for the top `first_virtual_depth` levels, each level's per-node
//!   bit-width rounded up to a byte boundary;
//! - a **bitfield** of `capacity` leaf bits grouped in 64-bit words,
//!   from which the remaining ("virtual") internal levels are derived
//!   on the fly by popcount — they are never materialized.
//!
//! The root (heap id 1) holds the total number of set leaf bits.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use rayon::prelude::*;
use thiserror::Error;

/// Failure modes of constructing a [`Cbt`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CbtError {
    /// Capacity must be a power of two of at least 128 leaves (so the
    /// last 6 tree levels collapse into whole bitfield words, leaving
    /// at least one packed level above them).
    #[error("capacity {0} must be a power of two >= 128")]
    InvalidCapacity(u32),
}

/// The four capacities SPEC_FULL.md names for production use. Smaller
/// power-of-two capacities are still accepted by [`Cbt::new`] for
/// tests; this enum exists so callers that want the blessed sizes get
/// a closed, self-documenting choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CbtCapacity {
    /// 2^17 leaves.
    K128,
    /// 2^18 leaves.
    K256,
    /// 2^19 leaves.
    K512,
    /// 2^20 leaves.
    M1,
}

impl CbtCapacity {
    /// The leaf count this capacity represents.
    pub fn leaves(self) -> u32 {
        match self {
            CbtCapacity::K128 => 1 << 17,
            CbtCapacity::K256 => 1 << 18,
            CbtCapacity::K512 => 1 << 19,
            CbtCapacity::M1 => 1 << 20,
        }
    }
}

fn bit_width_for_depth(depth: u32, max_depth: u32) -> u32 {
    if depth == 0 {
        32
    } else {
        let bits_needed = (max_depth - depth) + 1;
        ((bits_needed + 7) / 8) * 8
    }
}

/// A fixed-capacity concurrent binary tree.
///
/// All mutating methods take `&self`: leaf writes use atomic
/// OR/AND on the owning 64-bit bitfield word (§5 "atomic additions on
/// packed sub-word fields"), and packed-heap writes during `reduce`
/// are single-writer-per-node and use plain atomic stores.
pub struct Cbt {
    capacity: u32,
    max_depth: u32,
    first_virtual_depth: u32,
    packed: Vec<AtomicU32>,
    bitfield: Vec<AtomicU64>,
    depth_offsets: Vec<u64>,
    depth_widths: Vec<u32>,
}

impl Cbt {
    /// Construct a fresh (all-zero) tree over `capacity` leaves.
    /// `capacity` must be a power of two `>= 128`.
    pub fn new(capacity: u32) -> Result<Self, CbtError> {
        if capacity < 128 || !capacity.is_power_of_two() {
            return Err(CbtError::InvalidCapacity(capacity));
        }
        let max_depth = capacity.trailing_zeros();
        let first_virtual_depth = max_depth - 6;

        let mut depth_widths = Vec::with_capacity(first_virtual_depth as usize);
        let mut depth_offsets = Vec::with_capacity(first_virtual_depth as usize);
        let mut offset = 0u64;
        for depth in 0..first_virtual_depth {
            depth_offsets.push(offset);
            let width = bit_width_for_depth(depth, max_depth);
            depth_widths.push(width);
            offset += (width as u64) << depth;
        }
        let packed_words = offset.div_ceil(32) as usize;

        Ok(Self {
            capacity,
            max_depth,
            first_virtual_depth,
            packed: (0..packed_words).map(|_| AtomicU32::new(0)).collect(),
            bitfield: (0..capacity as usize / 64)
                .map(|_| AtomicU64::new(0))
                .collect(),
            depth_offsets,
            depth_widths,
        })
    }

    /// Construct using one of the blessed production capacities.
    pub fn with_capacity(capacity: CbtCapacity) -> Self {
        Self::new(capacity.leaves()).expect("blessed capacities are always valid")
    }

    /// Number of leaves.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Leaf depth (`log2(capacity)`).
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    fn get_bits(&self, offset_bits: u64, width: u32) -> u32 {
        let word_idx = (offset_bits / 32) as usize;
        let bit_in_word = offset_bits % 32;
        let lo = self.packed[word_idx].load(Ordering::Relaxed) as u64;
        let hi = self
            .packed
            .get(word_idx + 1)
            .map(|w| w.load(Ordering::Relaxed) as u64)
            .unwrap_or(0);
        let combined = lo | (hi << 32);
        let mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
        ((combined >> bit_in_word) & mask) as u32
    }

    fn set_bits(&self, offset_bits: u64, width: u32, value: u32) {
        let word_idx = (offset_bits / 32) as usize;
        let bit_in_word = offset_bits % 32;
        let mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
        let value = (value as u64) & mask;

        let lo_mask = (mask << bit_in_word) as u32;
        let lo_val = (value << bit_in_word) as u32;
        self.packed[word_idx].fetch_and(!lo_mask, Ordering::Relaxed);
        self.packed[word_idx].fetch_or(lo_val, Ordering::Relaxed);

        if bit_in_word + width > 32 {
            let hi_shift = 32 - bit_in_word;
            let hi_mask = (mask >> hi_shift) as u32;
            let hi_val = (value >> hi_shift) as u32;
            if let Some(hi_word) = self.packed.get(word_idx + 1) {
                hi_word.fetch_and(!hi_mask, Ordering::Relaxed);
                hi_word.fetch_or(hi_val, Ordering::Relaxed);
            }
        }
    }

    /// Read leaf bit `i`.
    pub fn bit(&self, i: u32) -> bool {
        let word = i / 64;
        let local = i % 64;
        (self.bitfield[word as usize].load(Ordering::Relaxed) >> local) & 1 == 1
    }

    /// Set (or clear) leaf bit `i`. Atomic with respect to other
    /// `set` calls touching distinct words, and safe to call
    /// concurrently for bits in different 64-bit words.
    pub fn set(&self, i: u32, v: bool) {
        let word = i / 64;
        let local = i % 64;
        let mask = 1u64 << local;
        if v {
            self.bitfield[word as usize].fetch_or(mask, Ordering::Relaxed);
        } else {
            self.bitfield[word as usize].fetch_and(!mask, Ordering::Relaxed);
        }
    }

    /// Value of heap node `v` in `[1, 2*capacity)`.
    pub fn heap(&self, v: u64) -> u32 {
        debug_assert!(v >= 1 && v < 2 * self.capacity as u64);
        let depth = 63 - v.leading_zeros();
        if depth < self.first_virtual_depth {
            let id_in_level = v - (1u64 << depth);
            let width = self.depth_widths[depth as usize];
            let offset = self.depth_offsets[depth as usize] + width as u64 * id_in_level;
            self.get_bits(offset, width)
        } else {
            let id_in_level = v - (1u64 << depth);
            let leaves_per_node = 1u64 << (self.max_depth as u64 - depth as u64);
            let leaf_start = id_in_level * leaves_per_node;
            if leaves_per_node >= 64 {
                // Spans one or more whole bitfield words.
                let words = leaves_per_node / 64;
                let start_word = (leaf_start / 64) as usize;
                (0..words)
                    .map(|w| {
                        self.bitfield[start_word + w as usize]
                            .load(Ordering::Relaxed)
                            .count_ones()
                    })
                    .sum()
            } else {
                let word_idx = (leaf_start / 64) as usize;
                let bit_in_word = leaf_start % 64;
                let mask = (1u64 << leaves_per_node) - 1;
                let bits = (self.bitfield[word_idx].load(Ordering::Relaxed) >> bit_in_word) & mask;
                bits.count_ones()
            }
        }
    }

    /// Write to the packed region only. Writing at leaf depth
    /// redirects to [`Cbt::set`]; writing to an intermediate virtual
    /// node is a logic error (the virtual region is read-only and
    /// derived, never stored).
    pub fn set_heap(&self, v: u64, x: u32) {
        let depth = 63 - v.leading_zeros();
        if depth < self.first_virtual_depth {
            let id_in_level = v - (1u64 << depth);
            let width = self.depth_widths[depth as usize];
            let offset = self.depth_offsets[depth as usize] + width as u64 * id_in_level;
            self.set_bits(offset, width, x);
        } else if depth == self.max_depth {
            let id_in_level = (v - (1u64 << depth)) as u32;
            self.set(id_in_level, x != 0);
        } else {
            debug_assert!(
                false,
                "set_heap: node at depth {depth} is virtual and cannot be written"
            );
        }
    }

    /// Total number of set leaf bits (`heap(1)`).
    pub fn bit_count(&self) -> u32 {
        self.heap(1)
    }

    /// Index of the `k`-th set bit (0-based). Behaviour is
    /// unspecified (but will not panic) if `k >= bit_count()`.
    pub fn decode_bit(&self, k: u32) -> u32 {
        let mut v = 1u64;
        let mut k = k;
        for _ in 0..self.first_virtual_depth {
            let left = self.heap(2 * v);
            if k < left {
                v = 2 * v;
            } else {
                k -= left;
                v = 2 * v + 1;
            }
        }
        let word_idx = (v - (1u64 << self.first_virtual_depth)) as usize;
        let word = self.bitfield[word_idx].load(Ordering::Relaxed);
        let local = select_set_bit(word, k);
        (word_idx as u32) * 64 + local
    }

    /// Index of the `k`-th *unset* bit (0-based). Behaviour is
    /// unspecified (but will not panic) if `k >= capacity - bit_count()`.
    pub fn decode_bit_complement(&self, k: u32) -> u32 {
        let mut v = 1u64;
        let mut k = k;
        let mut capacity_at_depth = self.capacity;
        for _ in 0..self.first_virtual_depth {
            capacity_at_depth /= 2;
            let left = capacity_at_depth - self.heap(2 * v);
            if k < left {
                v = 2 * v;
            } else {
                k -= left;
                v = 2 * v + 1;
            }
        }
        let word_idx = (v - (1u64 << self.first_virtual_depth)) as usize;
        let word = self.bitfield[word_idx].load(Ordering::Relaxed);
        let local = select_set_bit(!word, k);
        (word_idx as u32) * 64 + local
    }

    /// Number of set bits strictly before leaf index `i` (inverse of
    /// [`Cbt::decode_bit`]).
    pub fn rank(&self, i: u32) -> u32 {
        let mut acc = 0u32;
        let mut v = 1u64;
        let mut lo = 0u32;
        let mut width = self.capacity;
        for _ in 0..self.max_depth {
            width /= 2;
            let left_child = 2 * v;
            let mid = lo + width;
            if i < mid {
                v = left_child;
            } else {
                acc += self.heap(left_child);
                v = left_child + 1;
                lo = mid;
            }
        }
        acc
    }

    /// Three-phase parallel reduction: re-derives every packed-heap
    /// node from the current leaf bitfield so that `heap(1) ==
    /// bit_count` and every internal node equals the sum of its
    /// children.
    pub fn reduce(&self) {
        // Phase 1: the last packed depth reduces pairs of bitfield
        // words (128 leaves each) directly via popcount.
        let last_packed_depth = self.first_virtual_depth - 1;
        let nodes_at_last = 1u64 << last_packed_depth;
        (0..nodes_at_last).into_par_iter().for_each(|id_in_level| {
            let word_start = (id_in_level * 2) as usize;
            let count = self.bitfield[word_start].load(Ordering::Relaxed).count_ones()
                + self.bitfield[word_start + 1]
                    .load(Ordering::Relaxed)
                    .count_ones();
            let v = (1u64 << last_packed_depth) + id_in_level;
            self.set_heap(v, count);
        });

        // Phase 2: bottom-up sum over the remaining packed depths.
        for depth in (0..last_packed_depth).rev() {
            let lo = 1u64 << depth;
            let hi = 1u64 << (depth + 1);
            (lo..hi).into_par_iter().for_each(|v| {
                let value = self.heap(2 * v) + self.heap(2 * v + 1);
                self.set_heap(v, value);
            });
        }
    }

    /// Zero every packed and bitfield word.
    pub fn clear(&self) {
        self.packed.iter().for_each(|w| w.store(0, Ordering::Relaxed));
        self.bitfield.iter().for_each(|w| w.store(0, Ordering::Relaxed));
    }
}

/// Position of the `k`-th set bit in `word` (0-indexed), or the
/// word's last bit position if `word` has fewer than `k+1` set bits
/// (the empty/underflow case is unspecified behaviour per
/// SPEC_FULL.md §8, never a panic).
fn select_set_bit(word: u64, k: u32) -> u32 {
    let mut count = 0u32;
    for bit in 0..64u32 {
        if (word >> bit) & 1 == 1 {
            if count == k {
                return bit;
            }
            count += 1;
        }
    }
    63
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tree_is_empty() {
        let cbt = Cbt::new(1 << 17).unwrap();
        assert_eq!(cbt.bit_count(), 0);
    }

    #[test]
    fn set_three_bits_and_reduce() {
        let cbt = Cbt::new(1 << 17).unwrap();
        cbt.set(0, true);
        cbt.set(3, true);
        cbt.set(5, true);
        cbt.reduce();
        assert_eq!(cbt.bit_count(), 3);
        assert_eq!(cbt.decode_bit(0), 0);
        assert_eq!(cbt.decode_bit(1), 3);
        assert_eq!(cbt.decode_bit(2), 5);
    }

    #[test]
    fn decode_bit_is_rank_inverse() {
        let cbt = Cbt::new(1 << 17).unwrap();
        for i in [1u32, 17, 64, 1000, 65535, 70000] {
            cbt.set(i, true);
        }
        cbt.reduce();
        let n = cbt.bit_count();
        for k in 0..n {
            let pos = cbt.decode_bit(k);
            assert!(cbt.bit(pos));
            assert_eq!(cbt.rank(pos), k);
        }
    }

    #[test]
    fn decode_bit_complement_selects_zero_bits() {
        let cbt = Cbt::new(1 << 17).unwrap();
        cbt.set(0, true);
        cbt.set(1, true);
        cbt.reduce();
        let zeros = cbt.capacity() - cbt.bit_count();
        for k in 0..zeros.min(1000) {
            let pos = cbt.decode_bit_complement(k);
            assert!(!cbt.bit(pos));
        }
    }

    #[test]
    fn single_bit_decode() {
        let cbt = Cbt::new(1 << 17).unwrap();
        cbt.set(42, true);
        cbt.reduce();
        assert_eq!(cbt.bit_count(), 1);
        assert_eq!(cbt.decode_bit(0), 42);
    }

    #[test]
    fn invalid_capacity_is_rejected() {
        assert!(matches!(Cbt::new(100), Err(CbtError::InvalidCapacity(100))));
        assert!(matches!(Cbt::new(0), Err(_)));
    }

    #[test]
    fn reduce_is_idempotent_and_heap_sums_children() {
        let cbt = Cbt::new(1 << 17).unwrap();
        for i in (0..cbt.capacity()).step_by(97) {
            cbt.set(i, true);
        }
        cbt.reduce();
        let expected = cbt.bit_count();
        cbt.reduce();
        assert_eq!(cbt.bit_count(), expected);
        // Spot-check the internal-node invariant at a few depths.
        for v in 1..1024u64 {
            assert_eq!(cbt.heap(v), cbt.heap(2 * v) + cbt.heap(2 * v + 1));
        }
    }

    proptest::proptest! {
        /// `rank` is `decode_bit`'s left inverse for any set of leaves.
        #[test]
        fn decode_bit_rank_round_trips(
            leaves in proptest::collection::hash_set(0u32..1 << 17, 0..64)
        ) {
            let cbt = Cbt::new(1 << 17).unwrap();
            for &i in &leaves {
                cbt.set(i, true);
            }
            cbt.reduce();
            let n = cbt.bit_count();
            for k in 0..n {
                let pos = cbt.decode_bit(k);
                proptest::prop_assert!(cbt.bit(pos));
                proptest::prop_assert_eq!(cbt.rank(pos), k);
            }
        }

        /// `decode_bit_complement` never selects a leaf `decode_bit`
        /// would also select.
        #[test]
        fn decode_bit_and_complement_partition_leaves(
            leaves in proptest::collection::hash_set(0u32..1 << 17, 0..64)
        ) {
            let cbt = Cbt::new(1 << 17).unwrap();
            for &i in &leaves {
                cbt.set(i, true);
            }
            cbt.reduce();
            let zeros = cbt.capacity() - cbt.bit_count();
            for k in 0..zeros.min(64) {
                let pos = cbt.decode_bit_complement(k);
                proptest::prop_assert!(!cbt.bit(pos));
            }
        }
    }
}
