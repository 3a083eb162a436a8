//! Per-device execution state machine.
//!
//! A device is either [`DeviceState::Idle`] or [`DeviceState::Running`].
//! Starting a batch debits every input at once; finishing it credits every
//! output at once and returns the device to Idle within the same step.
//! Completion is reported through the `completed` flag (and an event emitted
//! by the engine), never as a third state.

use crate::catalog::Catalog;
use crate::error::{InvariantViolation, OverflowError};
use crate::fixed::{Fixed64, Ticks};
use crate::id::{DeviceId, RecipeId};
use crate::stock::StockLedger;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Device state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    #[default]
    Idle,
    /// Running a batch; `t_left` ticks remain until outputs are credited.
    Running { t_left: Ticks },
}

impl DeviceState {
    pub fn is_idle(self) -> bool {
        matches!(self, DeviceState::Idle)
    }

    pub fn is_running(self) -> bool {
        matches!(self, DeviceState::Running { .. })
    }

    /// Remaining ticks of the current batch. Zero while idle.
    pub fn t_left(self) -> Ticks {
        match self {
            DeviceState::Idle => 0,
            DeviceState::Running { t_left } => t_left,
        }
    }
}

// ---------------------------------------------------------------------------
// Device runtime
// ---------------------------------------------------------------------------

/// Mutable execution state of one catalog device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRuntime {
    device: DeviceId,
    bound_recipe: Option<RecipeId>,
    state: DeviceState,
    /// Held idle by the scheduler for the current step.
    held: bool,
    /// A batch finished during the current step.
    completed: bool,
}

impl DeviceRuntime {
    /// An idle, unbound runtime.
    pub fn new(device: DeviceId) -> Self {
        Self {
            device,
            bound_recipe: None,
            state: DeviceState::Idle,
            held: false,
            completed: false,
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn bound_recipe(&self) -> Option<RecipeId> {
        self.bound_recipe
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Whether a batch could start right now: idle, bound, not held, and
    /// the ledger covers every input in full. Never mutates.
    pub fn can_start(&self, catalog: &Catalog, stock: &StockLedger) -> bool {
        if !self.is_idle() || self.held {
            return false;
        }
        self.bound_recipe
            .and_then(|r| catalog.recipe(r))
            .is_some_and(|recipe| stock.can_cover(&recipe.inputs))
    }

    /// Start a batch of the bound recipe if stock covers its inputs.
    ///
    /// Returns `Ok(None)` when inputs are short; nothing is debited in that
    /// case. On success every input is debited and `t_left` is set to the
    /// recipe's cycle time.
    pub fn try_start(
        &mut self,
        catalog: &Catalog,
        stock: &mut StockLedger,
    ) -> Result<Option<RecipeId>, InvariantViolation> {
        if self.state.is_running() {
            return Err(InvariantViolation::AlreadyRunning {
                device: device_name(catalog, self.device),
            });
        }
        let Some((recipe_id, recipe)) = self
            .bound_recipe
            .and_then(|r| catalog.recipe(r).map(|def| (r, def)))
        else {
            return Err(InvariantViolation::NothingBound {
                device: device_name(catalog, self.device),
            });
        };
        if !stock.can_cover(&recipe.inputs) {
            return Ok(None);
        }

        for input in &recipe.inputs {
            // Covered above, so the full amount is always delivered.
            let _ = stock.debit(input.material, input.quantity);
        }
        self.state = DeviceState::Running {
            t_left: recipe.cycle_time,
        };
        debug!(
            device = %device_name(catalog, self.device),
            recipe = %recipe.name,
            t_left = recipe.cycle_time,
            "Batch started"
        );
        Ok(Some(recipe_id))
    }

    /// Count a running batch down by `dt`. When it reaches zero the outputs
    /// are credited, the device goes Idle and the finished recipe is
    /// returned. If crediting would overflow a balance, neither the stock nor
    /// the device changes.
    pub fn advance(
        &mut self,
        dt: Ticks,
        catalog: &Catalog,
        stock: &mut StockLedger,
    ) -> Result<Option<RecipeId>, OverflowError> {
        let DeviceState::Running { t_left } = self.state else {
            return Ok(None);
        };
        let t_left = t_left.saturating_sub(dt);
        if t_left > 0 {
            self.state = DeviceState::Running { t_left };
            return Ok(None);
        }

        let finished = self.bound_recipe.and_then(|r| catalog.recipe(r).map(|def| (r, def)));
        if let Some((_, recipe)) = finished {
            stock.credit_all(&recipe.outputs)?;
            debug!(
                device = %device_name(catalog, self.device),
                recipe = %recipe.name,
                "Batch completed"
            );
        }
        self.state = DeviceState::Idle;
        self.completed = true;
        Ok(finished.map(|(id, _)| id))
    }

    /// Draw of the running batch in kW. Zero while idle.
    pub fn power_kw(&self, catalog: &Catalog) -> Fixed64 {
        if !self.state.is_running() {
            return Fixed64::ZERO;
        }
        self.bound_recipe
            .and_then(|r| catalog.recipe(r))
            .map(|r| r.power_kw)
            .unwrap_or(Fixed64::ZERO)
    }

    /// Clear the per-step flags. Called before the scheduler runs.
    pub(crate) fn begin_step(&mut self) {
        self.held = false;
        self.completed = false;
    }

    pub(crate) fn hold(&mut self) {
        self.held = true;
    }

    /// Change the bound recipe. Only the scheduler and the simulation
    /// builder call this; binding never changes while a batch runs.
    pub(crate) fn rebind(
        &mut self,
        recipe: RecipeId,
        catalog: &Catalog,
    ) -> Result<Option<RecipeId>, InvariantViolation> {
        if let DeviceState::Running { t_left } = self.state {
            return Err(InvariantViolation::DeviceBusy {
                device: device_name(catalog, self.device),
                t_left,
            });
        }
        Ok(self.bound_recipe.replace(recipe))
    }
}

pub(crate) fn device_name(catalog: &Catalog, id: DeviceId) -> String {
    catalog
        .device(id)
        .map(|d| d.id.clone())
        .unwrap_or_else(|| format!("#{}", id.0))
}
