//! The recipe-binding authority.
//!
//! The [`Scheduler`] is the only component that changes which recipe a
//! device runtime is bound to. Each step it receives a [`SchedulePlan`],
//! validates every directive against the catalog and the device state
//! machine, and only then applies the plan. A plan that fails validation
//! leaves every runtime untouched.

use crate::catalog::{Catalog, DeviceCategory};
use crate::device::{DeviceRuntime, DeviceState, device_name};
use crate::error::{ConfigError, InvariantViolation, SimError};
use crate::id::{DeviceId, RecipeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

/// What the scheduler should do with one device this step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Directive {
    /// Leave the binding alone.
    #[default]
    Keep,
    /// Bind the named recipe. The device must be idle.
    Assign(String),
    /// Keep the binding but hold the device idle for this step.
    Disable,
}

/// Device id -> directive for a single step. Devices not named are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchedulePlan {
    entries: BTreeMap<String, Directive>,
}

impl SchedulePlan {
    /// The all-`Keep` plan.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(mut self, device: &str, recipe: &str) -> Self {
        self.set(device, Directive::Assign(recipe.to_string()));
        self
    }

    pub fn disable(mut self, device: &str) -> Self {
        self.set(device, Directive::Disable);
        self
    }

    pub fn keep(mut self, device: &str) -> Self {
        self.set(device, Directive::Keep);
        self
    }

    /// Set the directive for a device, replacing any earlier one.
    pub fn set(&mut self, device: &str, directive: Directive) {
        self.entries.insert(device.to_string(), directive);
    }

    pub fn get(&self, device: &str) -> Option<&Directive> {
        self.entries.get(device)
    }

    /// Entries in device-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Directive)> {
        self.entries.iter().map(|(d, dir)| (d.as_str(), dir))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the plan changes nothing.
    pub fn is_noop(&self) -> bool {
        self.entries.values().all(|d| *d == Directive::Keep)
    }
}

impl FromIterator<(String, Directive)> for SchedulePlan {
    fn from_iter<I: IntoIterator<Item = (String, Directive)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// The effect of one applied plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOutcome {
    /// `(device, previous binding, new binding)` for every binding that
    /// actually changed.
    pub rebound: Vec<(DeviceId, Option<RecipeId>, RecipeId)>,
    pub held: Vec<DeviceId>,
}

/// A directive resolved to catalog ids, ready to apply.
enum Resolved {
    Assign(DeviceId, RecipeId),
    Hold(DeviceId),
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheduler {
    committed: SchedulePlan,
    plans_applied: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last plan that was applied successfully.
    pub fn committed_plan(&self) -> &SchedulePlan {
        &self.committed
    }

    pub fn plans_applied(&self) -> u64 {
        self.plans_applied
    }

    /// The choice list for a category: `Keep` first, then every allowed
    /// recipe in catalog order.
    pub fn choices(catalog: &Catalog, category: DeviceCategory) -> Vec<Directive> {
        std::iter::once(Directive::Keep)
            .chain(catalog.allowed_recipes(category).iter().filter_map(|&r| {
                catalog
                    .recipe(r)
                    .map(|def| Directive::Assign(def.name.clone()))
            }))
            .collect()
    }

    /// Validate then apply a plan.
    ///
    /// Every non-`Keep` entry needs an idle device, and an `Assign` needs a
    /// recipe allowed for the device's category. Unknown names are
    /// [`ConfigError`]s, broken rules are [`InvariantViolation`]s. Nothing is
    /// mutated unless the whole plan is valid. Stock is not consulted.
    ///
    /// Applying a plan opens a new step: per-step runtime flags (held,
    /// completed) are reset before the directives take effect.
    pub fn apply(
        &mut self,
        plan: &SchedulePlan,
        runtimes: &mut [DeviceRuntime],
        catalog: &Catalog,
    ) -> Result<PlanOutcome, SimError> {
        let resolved = match Self::validate(plan, runtimes, catalog) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(error = %err, "Schedule plan rejected");
                return Err(err);
            }
        };

        // The plan is accepted: this is where a new step begins for every
        // runtime, so last step's hold and completion flags are cleared.
        for runtime in runtimes.iter_mut() {
            runtime.begin_step();
        }

        let mut outcome = PlanOutcome::default();
        for action in resolved {
            match action {
                Resolved::Assign(device, recipe) => {
                    let runtime = &mut runtimes[device.index()];
                    let previous = runtime.rebind(recipe, catalog)?;
                    if previous != Some(recipe) {
                        debug!(
                            device = %device_name(catalog, device),
                            recipe = catalog.recipe(recipe).map(|r| r.name.as_str()).unwrap_or("?"),
                            "Recipe bound"
                        );
                        outcome.rebound.push((device, previous, recipe));
                    }
                }
                Resolved::Hold(device) => {
                    runtimes[device.index()].hold();
                    outcome.held.push(device);
                }
            }
        }

        self.committed = plan.clone();
        self.plans_applied += 1;
        Ok(outcome)
    }

    fn validate(
        plan: &SchedulePlan,
        runtimes: &[DeviceRuntime],
        catalog: &Catalog,
    ) -> Result<Vec<Resolved>, SimError> {
        let mut resolved = Vec::new();
        for (device_key, directive) in plan.iter() {
            let device = catalog
                .device_id(device_key)
                .ok_or_else(|| ConfigError::UnknownDevice(device_key.to_string()))?;
            if *directive == Directive::Keep {
                continue;
            }
            let def = catalog
                .device(device)
                .ok_or_else(|| ConfigError::UnknownDevice(device_key.to_string()))?;
            let runtime = runtimes
                .get(device.index())
                .ok_or_else(|| ConfigError::UnknownDevice(device_key.to_string()))?;

            let recipe = match directive {
                Directive::Assign(name) => Some(
                    catalog
                        .recipe_id(name)
                        .ok_or_else(|| ConfigError::UnknownRecipe(name.clone()))?,
                ),
                _ => None,
            };

            if let DeviceState::Running { t_left } = runtime.state() {
                return Err(InvariantViolation::DeviceBusy {
                    device: def.id.clone(),
                    t_left,
                }
                .into());
            }

            match recipe {
                Some(recipe) => {
                    if !catalog.is_allowed(def.category, recipe) {
                        let name = catalog
                            .recipe(recipe)
                            .map(|r| r.name.clone())
                            .unwrap_or_default();
                        return Err(InvariantViolation::RecipeNotAllowed {
                            device: def.id.clone(),
                            category: def.category,
                            recipe: name,
                        }
                        .into());
                    }
                    resolved.push(Resolved::Assign(device, recipe));
                }
                None => resolved.push(Resolved::Hold(device)),
            }
        }
        Ok(resolved)
    }
}
