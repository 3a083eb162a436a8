//! State comparison and determinism checking.
//!
//! Two simulations built from the same inputs and driven by the same plans
//! must agree bit for bit at every step. These helpers find where they stop
//! agreeing.

use crate::catalog::Catalog;
use crate::engine::Simulation;
use crate::error::SimError;
use crate::id::{DeviceId, MaterialId};
use crate::policy::SchedulePolicy;
use crate::serialize::DeserializeError;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// State diff types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDiff {
    pub device: DeviceId,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockDiff {
    pub material: MaterialId,
    pub a: crate::fixed::Fixed64,
    pub b: crate::fixed::Fixed64,
}

/// Per-subsystem match results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsystemDiff {
    pub clock_matches: bool,
    pub stock_matches: bool,
    pub devices_match: bool,
    pub orders_match: bool,
    pub ledgers_match: bool,
}

impl SubsystemDiff {
    pub fn all_match(&self) -> bool {
        self.clock_matches
            && self.stock_matches
            && self.devices_match
            && self.orders_match
            && self.ledgers_match
    }
}

#[derive(Debug, Clone)]
pub struct StateDiff {
    pub is_identical: bool,
    pub subsystem_diffs: SubsystemDiff,
    pub device_diffs: Vec<DeviceDiff>,
    pub stock_diffs: Vec<StockDiff>,
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Subsystem-level comparison using hashes only.
pub fn quick_compare(a: &Simulation, b: &Simulation) -> SubsystemDiff {
    let ha = a.subsystem_hashes();
    let hb = b.subsystem_hashes();
    SubsystemDiff {
        clock_matches: ha.clock == hb.clock,
        stock_matches: ha.stock == hb.stock,
        devices_match: ha.devices == hb.devices,
        orders_match: ha.orders == hb.orders,
        ledgers_match: ha.ledgers == hb.ledgers,
    }
}

/// Detailed diff. Both simulations are expected to share a catalog; devices
/// and materials are compared index by index.
pub fn diff_simulations(a: &Simulation, b: &Simulation) -> StateDiff {
    let subsystem_diffs = quick_compare(a, b);

    let mut device_diffs = Vec::new();
    for (ra, rb) in a.devices().iter().zip(b.devices()) {
        let mut mismatches = Vec::new();
        if ra.state() != rb.state() {
            mismatches.push("state");
        }
        if ra.bound_recipe() != rb.bound_recipe() {
            mismatches.push("bound_recipe");
        }
        if !mismatches.is_empty() {
            device_diffs.push(DeviceDiff {
                device: ra.device(),
                description: format!("mismatched: {}", mismatches.join(", ")),
            });
        }
    }
    if a.devices().len() != b.devices().len() {
        device_diffs.push(DeviceDiff {
            device: DeviceId(a.devices().len().min(b.devices().len()) as u32),
            description: format!(
                "device count {} vs {}",
                a.devices().len(),
                b.devices().len()
            ),
        });
    }

    let materials = a.catalog().material_count().max(b.catalog().material_count());
    let stock_diffs = (0..materials as u32)
        .map(MaterialId)
        .filter_map(|m| {
            let qa = a.stock().quantity(m);
            let qb = b.stock().quantity(m);
            (qa != qb).then_some(StockDiff {
                material: m,
                a: qa,
                b: qb,
            })
        })
        .collect::<Vec<_>>();

    let is_identical =
        subsystem_diffs.all_match() && device_diffs.is_empty() && stock_diffs.is_empty();

    StateDiff {
        is_identical,
        subsystem_diffs,
        device_diffs,
        stock_diffs,
    }
}

// ---------------------------------------------------------------------------
// Determinism validation
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error(transparent)]
    Deserialize(#[from] DeserializeError),
    #[error("step failed during validation: {0}")]
    Step(#[from] SimError),
}

#[derive(Debug)]
pub struct DeterminismResult {
    pub is_deterministic: bool,
    /// Clock after the first step whose hashes differed.
    pub divergence_clock: Option<u64>,
    /// Which subsystems differed at the divergence.
    pub divergence: Option<SubsystemDiff>,
    /// `(clock, hash_a, hash_b)` after every step.
    pub hash_log: Vec<(u64, u64, u64)>,
}

/// Restore the same saved simulation twice, drive both with fresh policies
/// from `make_policy` for `steps` steps, and compare state hashes after
/// every step.
pub fn validate_determinism<P: SchedulePolicy>(
    snapshot_data: &[u8],
    catalog: Arc<Catalog>,
    steps: u64,
    mut make_policy: impl FnMut() -> P,
) -> Result<DeterminismResult, ValidationError> {
    let mut sim_a = Simulation::load(snapshot_data, catalog.clone())?;
    let mut sim_b = Simulation::load(snapshot_data, catalog)?;
    let mut policy_a = make_policy();
    let mut policy_b = make_policy();

    let mut hash_log = Vec::with_capacity(steps as usize);
    let mut divergence_clock = None;
    let mut divergence = None;

    for _ in 0..steps {
        let plan_a = policy_a.plan(&sim_a);
        let plan_b = policy_b.plan(&sim_b);
        sim_a.step(&plan_a)?;
        sim_b.step(&plan_b)?;

        let hash_a = sim_a.state_hash();
        let hash_b = sim_b.state_hash();
        let clock = sim_a.clock();
        hash_log.push((clock, hash_a, hash_b));

        if hash_a != hash_b && divergence_clock.is_none() {
            divergence_clock = Some(clock);
            divergence = Some(quick_compare(&sim_a, &sim_b));
        }
    }

    Ok(DeterminismResult {
        is_deterministic: divergence_clock.is_none(),
        divergence_clock,
        divergence,
        hash_log,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{GreedyPolicy, KeepPolicy};
    use crate::scheduler::SchedulePlan;
    use crate::test_utils::*;

    #[test]
    fn identical_simulations_match() {
        let a = motor_line_sim();
        let b = motor_line_sim();
        let diff = diff_simulations(&a, &b);
        assert!(diff.is_identical);
        assert!(diff.subsystem_diffs.all_match());
    }

    #[test]
    fn clock_difference_is_detected() {
        let mut a = cast_iron_sim();
        let b = cast_iron_sim();
        a.step_keep().unwrap();
        let diff = quick_compare(&a, &b);
        assert!(!diff.clock_matches);
        assert!(!diff.stock_matches);
        assert!(!diff.devices_match);
    }

    #[test]
    fn device_diff_names_the_device() {
        let mut a = motor_line_sim();
        let mut b = motor_line_sim();
        a.step(&SchedulePlan::new().assign("CASTER-02", "Cast_Steel"))
            .unwrap();
        b.step_keep().unwrap();
        let diff = diff_simulations(&a, &b);
        assert!(!diff.is_identical);
        let caster = a.catalog().device_id("CASTER-02").unwrap();
        assert!(diff.device_diffs.iter().any(|d| d.device == caster));
        assert!(!diff.stock_diffs.is_empty());
    }

    #[test]
    fn greedy_run_is_deterministic() {
        let sim = motor_line_sim();
        let data = sim.save().unwrap();
        let result = validate_determinism(&data, sim.catalog().clone(), 200, || GreedyPolicy)
            .unwrap();
        assert!(result.is_deterministic);
        assert_eq!(result.hash_log.len(), 200);
        assert!(result.divergence.is_none());
    }

    #[test]
    fn diverging_policies_are_reported() {
        let sim = motor_line_sim();
        let data = sim.save().unwrap();
        // Each call hands out a different policy: the second run holds a caster.
        let mut calls = 0;
        let result = validate_determinism(&data, sim.catalog().clone(), 5, || {
            calls += 1;
            let hold = calls == 2;
            move |_: &Simulation| {
                if hold {
                    SchedulePlan::new().disable("CASTER-00")
                } else {
                    SchedulePlan::new()
                }
            }
        })
        .unwrap();
        assert!(!result.is_deterministic);
        assert_eq!(result.divergence_clock, Some(1));
        let diverged = result.divergence.unwrap();
        assert!(!diverged.devices_match);
        assert!(diverged.clock_matches);
    }

    #[test]
    fn keep_policy_validation_runs() {
        let sim = cast_iron_sim();
        let data = sim.save().unwrap();
        let result =
            validate_determinism(&data, sim.catalog().clone(), 70, || KeepPolicy).unwrap();
        assert!(result.is_deterministic);
    }
}
