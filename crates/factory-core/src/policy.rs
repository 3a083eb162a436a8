//! Decision makers that produce one [`SchedulePlan`] per step.
//!
//! The simulation never decides bindings on its own; a policy (or any
//! external caller of [`Simulation::step`]) does. Policies read the
//! simulation through its query API only.

use crate::catalog::RecipeEntry;
use crate::engine::Simulation;
use crate::scheduler::{Directive, SchedulePlan};
use crate::stock::StockLedger;

pub trait SchedulePolicy {
    /// The plan for the next step.
    fn plan(&mut self, sim: &Simulation) -> SchedulePlan;
}

impl<F> SchedulePolicy for F
where
    F: FnMut(&Simulation) -> SchedulePlan,
{
    fn plan(&mut self, sim: &Simulation) -> SchedulePlan {
        self(sim)
    }
}

/// Never changes a binding.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepPolicy;

impl SchedulePolicy for KeepPolicy {
    fn plan(&mut self, _sim: &Simulation) -> SchedulePlan {
        SchedulePlan::new()
    }
}

/// Keeps every device busy when stock allows.
///
/// Plans against a projected copy of the stock. Idle devices whose bound
/// recipe is covered keep it and reserve its inputs first; the remaining
/// idle devices, in catalog order, are assigned the first allowed recipe the
/// projection still covers. Reserving as it goes means two devices are never
/// planned against the same material.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyPolicy;

impl SchedulePolicy for GreedyPolicy {
    fn plan(&mut self, sim: &Simulation) -> SchedulePlan {
        let catalog = sim.catalog();
        let mut projected = sim.stock().clone();
        let mut plan = SchedulePlan::new();
        let mut unplanned = Vec::new();

        for runtime in sim.devices().iter().filter(|rt| rt.is_idle()) {
            match runtime.bound_recipe().and_then(|r| catalog.recipe(r)) {
                Some(bound) if projected.can_cover(&bound.inputs) => {
                    reserve(&mut projected, &bound.inputs);
                }
                _ => unplanned.push(runtime),
            }
        }

        for runtime in unplanned {
            let Some(def) = catalog.device(runtime.device()) else {
                continue;
            };
            let pick = catalog
                .allowed_recipes(def.category)
                .iter()
                .filter_map(|&r| catalog.recipe(r).map(|d| (r, d)))
                .find(|(_, d)| projected.can_cover(&d.inputs));
            if let Some((id, recipe)) = pick {
                reserve(&mut projected, &recipe.inputs);
                if runtime.bound_recipe() != Some(id) {
                    plan.set(&def.id, Directive::Assign(recipe.name.clone()));
                }
            }
        }
        plan
    }
}

fn reserve(projected: &mut StockLedger, inputs: &[RecipeEntry]) {
    for input in inputs {
        let _ = projected.debit(input.material, input.quantity);
    }
}
