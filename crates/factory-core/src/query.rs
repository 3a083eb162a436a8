//! Read-only views of simulation state.
//!
//! Every type here is an owned copy with names already resolved, so history
//! recorders and external decision makers never hold references into the
//! simulation or need the catalog to read them.

use crate::catalog::DeviceCategory;
use crate::device::DeviceState;
use crate::fixed::{Fixed64, Ticks};
use crate::id::{DeviceId, OrderId};
use crate::price::Settlement;
use serde::{Deserialize, Serialize};

/// One material balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub material: String,
    pub quantity: Fixed64,
}

/// One device runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: DeviceId,
    pub name: String,
    pub category: DeviceCategory,
    pub state: DeviceState,
    /// Zero while idle.
    pub t_left: Ticks,
    pub bound_recipe: Option<String>,
    /// A batch finished during the step that produced this snapshot.
    pub completed: bool,
    /// Held idle by the scheduler during that step.
    pub held: bool,
}

/// One pending order, countdown as of the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub id: OrderId,
    pub material: String,
    pub quantity: Fixed64,
    pub due_time: i64,
}

/// Everything observable after a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSnapshot {
    /// Clock after the step.
    pub clock: Ticks,
    /// Length of each step; the step began at `clock - dt`.
    pub dt: Ticks,
    pub steps: u64,
    /// In catalog material order.
    pub stock: Vec<StockSnapshot>,
    /// In catalog device order.
    pub devices: Vec<DeviceSnapshot>,
    /// kWh drawn during the step.
    pub step_energy: Fixed64,
    pub total_energy: Fixed64,
    pub step_balance: Fixed64,
    pub total_balance: Fixed64,
    pub settlement: Settlement,
    /// In settlement order.
    pub pending_orders: Vec<OrderSnapshot>,
}

impl StepSnapshot {
    pub fn stock_of(&self, material: &str) -> Option<Fixed64> {
        self.stock
            .iter()
            .find(|s| s.material == material)
            .map(|s| s.quantity)
    }

    pub fn device(&self, name: &str) -> Option<&DeviceSnapshot> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Devices running at the end of the step.
    pub fn running_count(&self) -> usize {
        self.devices.iter().filter(|d| d.state.is_running()).count()
    }
}
