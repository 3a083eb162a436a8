//! Factory Core -- a discrete-time production-line simulator.
//!
//! A fixed catalog of devices, recipes and materials is driven step by step.
//! Every step an external [`scheduler::SchedulePlan`] decides which recipe
//! each idle device runs; the simulation consumes inputs, produces outputs,
//! meters energy, settles customer orders and keeps a money ledger, all in
//! deterministic fixed-point arithmetic.
//!
//! # Seven-Phase Step Pipeline
//!
//! Each call to [`engine::Simulation::step`] advances the clock by `dt`:
//!
//! 1. **Schedule** -- Validate the plan as a whole, then rebind or hold idle
//!    devices. An invalid plan changes nothing.
//! 2. **Start** -- Idle, bound devices whose inputs are in stock debit them
//!    and start a batch.
//! 3. **Energy** -- Sum `power_kw * dt` over every running device.
//! 4. **Advance** -- Batches already in flight count down; finished batches
//!    credit their outputs.
//! 5. **Settle** -- Due orders are delivered from stock, then storage,
//!    energy and rent are charged.
//! 6. **Bookkeeping** -- Advance the clock, accumulate totals, hash state.
//! 7. **Report** -- Build a [`query::StepSnapshot`] and deliver events.
//!
//! # Key Types
//!
//! - [`engine::Simulation`] -- Owns the runtime ledgers and runs the pipeline.
//! - [`catalog::Catalog`] -- Immutable devices, recipes and materials,
//!   frozen at build time.
//! - [`device::DeviceRuntime`] -- Per-device binding and batch state machine.
//! - [`scheduler::Scheduler`] -- Applies plans atomically.
//! - [`policy::SchedulePolicy`] -- Anything that turns a simulation into the
//!   next plan.
//! - [`price::PriceBook`] -- Per-step settlement of orders and costs.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for deterministic math.
//! - [`event::EventBus`] -- Buffered, typed simulation events.
//! - [`serialize`] -- Versioned binary snapshots via bitcode.

pub mod catalog;
pub mod device;
pub mod engine;
pub mod error;
pub mod event;
pub mod fixed;
pub mod id;
pub mod order;
pub mod policy;
pub mod price;
pub mod query;
#[cfg(any(test, feature = "test-utils"))]
pub mod rng;
pub mod scheduler;
pub mod serialize;
pub mod sim;
pub mod stock;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod validation;
