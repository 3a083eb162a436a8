//! Clock state and the deterministic state hash.

use crate::error::OverflowError;
use crate::fixed::{Fixed64, Ticks};

// ---------------------------------------------------------------------------
// Simulation state
// ---------------------------------------------------------------------------

/// Clock tracked by the simulation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimState {
    /// Simulated time elapsed since construction, in ticks.
    pub clock: Ticks,
    /// Ticks advanced by every step. Never zero.
    pub dt: Ticks,
    /// Number of steps executed.
    pub steps: u64,
}

impl SimState {
    pub fn new(dt: Ticks) -> Self {
        Self {
            clock: 0,
            dt,
            steps: 0,
        }
    }

    /// Advance the clock by one step. Fails, changing nothing, if the clock
    /// would pass `u64::MAX`.
    pub fn advance(&mut self) -> Result<(), OverflowError> {
        self.clock = self.clock.checked_add(self.dt).ok_or(OverflowError::Clock)?;
        self.steps += 1;
        Ok(())
    }
}

impl Default for SimState {
    fn default() -> Self {
        Self::new(1)
    }
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// A simple deterministic hash of simulation state for reproducibility checks.
///
/// Uses FNV-1a (64-bit). Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    /// Feed bytes into the hash.
    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_fixed64(&mut self, v: Fixed64) {
        self.write(&v.to_bits().to_le_bytes());
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_state_starts_at_zero() {
        let state = SimState::new(5);
        assert_eq!(state.clock, 0);
        assert_eq!(state.steps, 0);
        assert_eq!(state.dt, 5);
    }

    #[test]
    fn advance_moves_clock_by_dt() {
        let mut state = SimState::new(5);
        state.advance().unwrap();
        state.advance().unwrap();
        assert_eq!(state.clock, 10);
        assert_eq!(state.steps, 2);
    }

    #[test]
    fn advance_past_max_clock_fails_without_change() {
        let mut state = SimState::new(u64::MAX / 2 + 1);
        state.advance().unwrap();
        assert_eq!(state.advance(), Err(OverflowError::Clock));
        assert_eq!(state.clock, u64::MAX / 2 + 1);
        assert_eq!(state.steps, 1);
    }

    #[test]
    fn state_hash_deterministic() {
        let mut h1 = StateHash::new();
        h1.write_u64(42);
        h1.write_fixed64(Fixed64::from_num(1.5));

        let mut h2 = StateHash::new();
        h2.write_u64(42);
        h2.write_fixed64(Fixed64::from_num(1.5));

        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn state_hash_order_matters() {
        let mut h1 = StateHash::new();
        h1.write_u32(1);
        h1.write_u32(2);

        let mut h2 = StateHash::new();
        h2.write_u32(2);
        h2.write_u32(1);

        assert_ne!(h1.finish(), h2.finish());
    }
}
