//! Error taxonomy for the simulation core.
//!
//! Two fatal families exist. [`ConfigError`] means an input referenced
//! something the catalog does not know, or combined things the catalog forbids.
//! [`InvariantViolation`] means a schedule plan asked for a transition the
//! device state machine does not allow. Both reach the caller as a
//! [`SimError`] and stop the step; neither is ever corrected in place. Stock
//! shortfalls are not errors (see [`crate::stock::StockLedger::debit`]).
//! [`OverflowError`] reports a ledger or the clock outgrowing its range.

use crate::catalog::{CatalogError, DeviceCategory};
use crate::fixed::{Fixed64, Ticks};

/// A plan, binding or initial snapshot referenced unknown or incompatible
/// catalog entries.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown device id '{0}'")]
    UnknownDevice(String),
    #[error("unknown recipe '{0}'")]
    UnknownRecipe(String),
    #[error("unknown material '{0}'")]
    UnknownMaterial(String),
    #[error(
        "recipe '{recipe}' ({recipe_category}) cannot bind to device '{device}' ({device_category})"
    )]
    CategoryMismatch {
        device: String,
        device_category: DeviceCategory,
        recipe: String,
        recipe_category: DeviceCategory,
    },
    #[error("material '{0}' has no sell price and cannot be ordered")]
    NotSellable(String),
    #[error("order for '{material}' has non-positive quantity {quantity}")]
    NonPositiveOrder { material: String, quantity: Fixed64 },
    #[error("initial stock of '{material}' is negative ({quantity})")]
    NegativeStock { material: String, quantity: Fixed64 },
    #[error("dt must be at least one tick")]
    ZeroTimestep,
}

/// A requested transition broke a state-machine or binding invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("device '{device}' is running ({t_left} ticks left) and cannot take a new directive")]
    DeviceBusy { device: String, t_left: Ticks },
    #[error("recipe '{recipe}' is not allowed on device '{device}' ({category})")]
    RecipeNotAllowed {
        device: String,
        category: DeviceCategory,
        recipe: String,
    },
    #[error("device '{device}' is already running a batch")]
    AlreadyRunning { device: String },
    #[error("device '{device}' has no bound recipe")]
    NothingBound { device: String },
}

/// A ledger left the range of [`Fixed64`]. Raised instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OverflowError {
    #[error("stock balance overflowed")]
    Stock,
    #[error("energy overflowed")]
    Energy,
    #[error("money overflowed")]
    Money,
    #[error("clock overflowed")]
    Clock,
}

/// Any fatal error surfaced by the simulation core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("arithmetic overflow: {0}")]
    Overflow(#[from] OverflowError),
}
