//! Deterministic PRNG for order generation in tests, demos and benches.
//!
//! The simulation itself has no randomness. This generator exists so that
//! synthetic demand is reproducible from a seed.
//!
//! Uses the SplitMix64 algorithm: fast, 8 bytes of state, and trivially
//! serializable.

use crate::fixed::Fixed64;

/// SplitMix64 pseudo-random number generator.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in `[0, bound)`. Returns 0 when `bound` is 0.
    pub fn next_below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        // Multiply-shift keeps the high bits, which are the well-mixed ones.
        ((self.next_u64() as u128 * bound as u128) >> 64) as u64
    }

    /// Uniform in `[lo, hi]`. Swaps the bounds if given in reverse.
    pub fn range_i64(&mut self, lo: i64, hi: i64) -> i64 {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        let span = hi.abs_diff(lo).saturating_add(1);
        lo.wrapping_add(self.next_below(span) as i64)
    }

    /// Pick one element. `None` for an empty slice.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        items.get(self.next_below(items.len() as u64) as usize)
    }

    /// Returns `true` with the given probability (Fixed64 in [0, 1]).
    pub fn chance(&mut self, probability: Fixed64) -> bool {
        if probability <= Fixed64::ZERO {
            return false;
        }
        if probability >= Fixed64::ONE {
            return true;
        }
        // For p in (0,1) the raw Q32.32 bits are the fraction scaled to
        // [0, 2^32), same range as the upper half of a u64 draw.
        let upper = self.next_u64() >> 32;
        upper < probability.to_bits() as u64
    }

    pub fn state(&self) -> u64 {
        self.state
    }
}
