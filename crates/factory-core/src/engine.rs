//! The factory simulation: owns every runtime ledger and runs the step
//! pipeline.
//!
//! # Architecture
//!
//! The [`Simulation`] owns:
//! - the [`StockLedger`], [`OrderBook`] and [`PriceBook`]
//! - one [`DeviceRuntime`] per catalog device, indexed by [`DeviceId`]
//! - the [`Scheduler`] and its last committed plan
//! - energy and money accumulators, the [`SimState`] clock
//! - an [`EventBus`] for typed simulation events
//!
//! The [`Catalog`] is shared read-only through an `Arc`.
//!
//! # Step pipeline
//!
//! Each [`Simulation::step`] runs, in this order:
//! 1. **Schedule** -- validate and apply the plan to idle devices
//! 2. **Start** -- idle, bound, un-held devices with covered inputs start
//! 3. **Energy** -- sum the draw of every running device over `dt`
//! 4. **Advance** -- batches that were already running count down; finished
//!    batches credit their outputs
//! 5. **Settle** -- due orders, storage, energy and rent
//! 6. **Bookkeeping** -- clock, accumulators, state hash
//! 7. **Report** -- build the snapshot, deliver buffered events
//!
//! A step that fails in phase 1 returns before anything is mutated.

use crate::catalog::Catalog;
use crate::device::{DeviceRuntime, device_name};
use crate::error::{ConfigError, OverflowError, SimError};
use crate::event::{Event, EventBus, EventKind, PassiveListener};
use crate::fixed::{Fixed64, Ticks, energy_kwh};
use crate::id::{DeviceId, OrderId};
use crate::order::{Order, OrderBook};
use crate::policy::SchedulePolicy;
use crate::price::{PenaltyHook, Price, PriceBook, Settlement};
use crate::query::{DeviceSnapshot, OrderSnapshot, StepSnapshot, StockSnapshot};
use crate::scheduler::{Directive, SchedulePlan, Scheduler};
use crate::sim::{SimState, StateHash};
use crate::stock::StockLedger;
use std::sync::Arc;
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects the initial snapshot (stock, bindings, prices, orders) and
/// validates it against the catalog in [`build`](Self::build).
#[derive(Debug)]
pub struct SimulationBuilder {
    catalog: Arc<Catalog>,
    dt: Ticks,
    initial_money: Fixed64,
    stock: Vec<(String, Fixed64)>,
    bindings: Vec<(String, String)>,
    prices: Vec<Price>,
    orders: Vec<(String, Fixed64, i64)>,
    penalty: PenaltyHook,
    event_capacity: usize,
}

impl SimulationBuilder {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            dt: 1,
            initial_money: Fixed64::ZERO,
            stock: Vec::new(),
            bindings: Vec::new(),
            prices: Vec::new(),
            orders: Vec::new(),
            penalty: PenaltyHook::zero(),
            event_capacity: 1024,
        }
    }

    /// Ticks per step. Defaults to 1.
    pub fn dt(mut self, dt: Ticks) -> Self {
        self.dt = dt;
        self
    }

    /// Opening value of the cumulative balance.
    pub fn initial_money(mut self, money: Fixed64) -> Self {
        self.initial_money = money;
        self
    }

    /// Opening stock of one material. Repeated calls accumulate.
    pub fn stock(mut self, material: &str, quantity: Fixed64) -> Self {
        self.stock.push((material.to_string(), quantity));
        self
    }

    /// Initial recipe binding. Devices not named start unbound.
    pub fn bind(mut self, device: &str, recipe: &str) -> Self {
        self.bindings.push((device.to_string(), recipe.to_string()));
        self
    }

    pub fn price(mut self, price: Price) -> Self {
        self.prices.push(price);
        self
    }

    pub fn prices(mut self, prices: impl IntoIterator<Item = Price>) -> Self {
        self.prices.extend(prices);
        self
    }

    pub fn order(mut self, material: &str, quantity: Fixed64, due_time: i64) -> Self {
        self.orders.push((material.to_string(), quantity, due_time));
        self
    }

    pub fn penalty(mut self, penalty: PenaltyHook) -> Self {
        self.penalty = penalty;
        self
    }

    /// Ring-buffer capacity per event kind.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<Simulation, SimError> {
        let catalog = self.catalog;
        if self.dt == 0 {
            return Err(ConfigError::ZeroTimestep.into());
        }

        let mut stock = StockLedger::new(catalog.material_count());
        for (name, quantity) in self.stock {
            let material = catalog
                .material_id(&name)
                .ok_or_else(|| ConfigError::UnknownMaterial(name.clone()))?;
            if quantity < Fixed64::ZERO {
                return Err(ConfigError::NegativeStock {
                    material: name,
                    quantity,
                }
                .into());
            }
            stock.credit(material, quantity)?;
        }

        let mut devices: Vec<DeviceRuntime> = catalog
            .devices()
            .map(|(id, _)| DeviceRuntime::new(id))
            .collect();
        for (device_key, recipe_name) in self.bindings {
            let device = catalog
                .device_id(&device_key)
                .ok_or_else(|| ConfigError::UnknownDevice(device_key.clone()))?;
            let recipe = catalog
                .recipe_id(&recipe_name)
                .ok_or_else(|| ConfigError::UnknownRecipe(recipe_name.clone()))?;
            let (Some(def), Some(recipe_def)) = (catalog.device(device), catalog.recipe(recipe))
            else {
                return Err(ConfigError::UnknownDevice(device_key).into());
            };
            if def.category != recipe_def.category {
                return Err(ConfigError::CategoryMismatch {
                    device: device_key,
                    device_category: def.category,
                    recipe: recipe_name,
                    recipe_category: recipe_def.category,
                }
                .into());
            }
            devices[device.index()].rebind(recipe, &catalog)?;
        }

        let prices = PriceBook::new(self.prices, &catalog)?;

        let mut sim = Simulation {
            sim_state: SimState::new(self.dt),
            stock,
            orders: OrderBook::new(),
            prices,
            devices,
            scheduler: Scheduler::new(),
            step_energy: Fixed64::ZERO,
            total_energy: Fixed64::ZERO,
            step_balance: Fixed64::ZERO,
            total_balance: self.initial_money,
            last_settlement: Settlement::default(),
            event_bus: EventBus::new(self.event_capacity),
            penalty: self.penalty,
            started_this_step: Vec::new(),
            last_state_hash: 0,
            catalog,
        };
        for (material, quantity, due_time) in self.orders {
            sim.add_order(&material, quantity, due_time)?;
        }
        sim.last_state_hash = sim.compute_state_hash();
        Ok(sim)
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Simulation {
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) sim_state: SimState,
    pub(crate) stock: StockLedger,
    pub(crate) orders: OrderBook,
    pub(crate) prices: PriceBook,
    /// Indexed by `DeviceId`.
    pub(crate) devices: Vec<DeviceRuntime>,
    pub(crate) scheduler: Scheduler,
    pub(crate) step_energy: Fixed64,
    pub(crate) total_energy: Fixed64,
    pub(crate) step_balance: Fixed64,
    pub(crate) total_balance: Fixed64,
    pub(crate) last_settlement: Settlement,
    /// Typed events of the current step; delivered at the end of `step()`.
    pub event_bus: EventBus,
    pub(crate) penalty: PenaltyHook,
    /// Scratch: devices whose batch started in phase 2 of the current step.
    pub(crate) started_this_step: Vec<DeviceId>,
    pub(crate) last_state_hash: u64,
}

impl Simulation {
    pub fn builder(catalog: Arc<Catalog>) -> SimulationBuilder {
        SimulationBuilder::new(catalog)
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Run one atomic step under `plan`.
    ///
    /// A plan rejected in phase 1 leaves the simulation unchanged. A
    /// [`SimError::Overflow`] from phases 3 to 6 means a ledger outgrew the
    /// `Fixed64` range after production had already run; the simulation is
    /// left mid-step and should be restored from a save.
    pub fn step(&mut self, plan: &SchedulePlan) -> Result<StepSnapshot, SimError> {
        let tick = self.sim_state.clock;

        // Phase 1: Schedule.
        self.phase_schedule(plan, tick)?;

        // Phase 2: Start batches.
        self.phase_start(tick)?;

        // Phase 3: Energy.
        self.phase_energy()?;

        // Phase 4: Advance batches already in flight.
        self.phase_advance(tick)?;

        // Phase 5: Settlement.
        self.phase_settle(tick)?;

        // Phase 6: Bookkeeping.
        self.phase_bookkeeping()?;

        // Phase 7: Report.
        let snapshot = self.snapshot();
        self.event_bus.deliver();
        trace!(
            clock = self.sim_state.clock,
            step_energy = %self.step_energy,
            step_balance = %self.step_balance,
            total_balance = %self.total_balance,
            running = snapshot.running_count(),
            "Step complete"
        );
        Ok(snapshot)
    }

    /// Run one step with every binding kept.
    pub fn step_keep(&mut self) -> Result<StepSnapshot, SimError> {
        self.step(&SchedulePlan::new())
    }

    /// Run `steps` steps, asking `policy` for each plan. Stops at the first
    /// error.
    pub fn run(
        &mut self,
        steps: u64,
        policy: &mut impl SchedulePolicy,
    ) -> Result<Vec<StepSnapshot>, SimError> {
        let mut snapshots = Vec::with_capacity(steps as usize);
        for _ in 0..steps {
            let plan = policy.plan(self);
            snapshots.push(self.step(&plan)?);
        }
        Ok(snapshots)
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    fn phase_schedule(&mut self, plan: &SchedulePlan, tick: Ticks) -> Result<(), SimError> {
        let outcome = self.scheduler.apply(plan, &mut self.devices, &self.catalog)?;
        for (device, from, to) in outcome.rebound {
            self.event_bus.emit(Event::RecipeBound {
                device,
                from,
                to,
                tick,
            });
        }
        for device in outcome.held {
            self.event_bus.emit(Event::DeviceHeld { device, tick });
        }
        Ok(())
    }

    fn phase_start(&mut self, tick: Ticks) -> Result<(), SimError> {
        self.started_this_step.clear();
        for runtime in &mut self.devices {
            if !runtime.can_start(&self.catalog, &self.stock) {
                continue;
            }
            if let Some(recipe) = runtime.try_start(&self.catalog, &mut self.stock)? {
                let device = runtime.device();
                self.started_this_step.push(device);
                self.event_bus.emit(Event::BatchStarted {
                    device,
                    recipe,
                    tick,
                });
            }
        }
        Ok(())
    }

    fn phase_energy(&mut self) -> Result<(), OverflowError> {
        let load_kw = self
            .devices
            .iter()
            .try_fold(Fixed64::ZERO, |acc, rt| acc.checked_add(rt.power_kw(&self.catalog)))
            .ok_or(OverflowError::Energy)?;
        self.step_energy =
            energy_kwh(load_kw, self.sim_state.dt).ok_or(OverflowError::Energy)?;
        Ok(())
    }

    fn phase_advance(&mut self, tick: Ticks) -> Result<(), OverflowError> {
        let dt = self.sim_state.dt;
        for runtime in &mut self.devices {
            // A batch started this step begins counting on the next one.
            if self.started_this_step.contains(&runtime.device()) {
                continue;
            }
            if let Some(recipe) = runtime.advance(dt, &self.catalog, &mut self.stock)? {
                self.event_bus.emit(Event::BatchCompleted {
                    device: runtime.device(),
                    recipe,
                    tick,
                });
            }
        }
        Ok(())
    }

    fn phase_settle(&mut self, tick: Ticks) -> Result<(), OverflowError> {
        let settlement = self.prices.settle(
            &mut self.stock,
            &mut self.orders,
            self.sim_state.dt,
            self.step_energy,
            &self.penalty,
            &self.catalog,
        )?;
        for r in &settlement.orders {
            self.event_bus.emit(Event::OrderSettled {
                order: r.order,
                material: r.material,
                requested: r.requested,
                delivered: r.delivered,
                result: r.result,
                tick,
            });
        }
        self.step_balance = settlement.step_balance()?;
        self.last_settlement = settlement;
        Ok(())
    }

    fn phase_bookkeeping(&mut self) -> Result<(), OverflowError> {
        let total_balance = self
            .total_balance
            .checked_add(self.step_balance)
            .ok_or(OverflowError::Money)?;
        let total_energy = self
            .total_energy
            .checked_add(self.step_energy)
            .ok_or(OverflowError::Energy)?;
        self.sim_state.advance()?;
        self.total_balance = total_balance;
        self.total_energy = total_energy;
        self.last_state_hash = self.compute_state_hash();
        Ok(())
    }

    /// Deterministic hash of every runtime ledger.
    pub(crate) fn compute_state_hash(&self) -> u64 {
        let mut h = StateHash::new();
        h.write_u64(self.sim_state.clock);
        h.write_u64(self.sim_state.steps);
        for (material, quantity) in self.stock.iter() {
            h.write_u32(material.0);
            h.write_fixed64(quantity);
        }
        for runtime in &self.devices {
            hash_device(&mut h, runtime);
        }
        for (_, order) in self.orders.iter() {
            h.write_u32(order.material.0);
            h.write_fixed64(order.quantity);
            h.write_i64(order.due_time);
        }
        h.write_fixed64(self.total_energy);
        h.write_fixed64(self.total_balance);
        h.finish()
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Queue a customer order. The material must have a sell price and the
    /// quantity must be positive.
    pub fn add_order(
        &mut self,
        material: &str,
        quantity: Fixed64,
        due_time: i64,
    ) -> Result<OrderId, ConfigError> {
        let id = self
            .catalog
            .material_id(material)
            .ok_or_else(|| ConfigError::UnknownMaterial(material.to_string()))?;
        if quantity <= Fixed64::ZERO {
            return Err(ConfigError::NonPositiveOrder {
                material: material.to_string(),
                quantity,
            });
        }
        if self.prices.price_sell(id).is_none() {
            return Err(ConfigError::NotSellable(material.to_string()));
        }
        let order_id = self.orders.insert(Order::new(id, quantity, due_time));
        debug!(material, quantity = %quantity, due_time, "Order queued");
        Ok(order_id)
    }

    pub fn cancel_order(&mut self, id: OrderId) -> Option<Order> {
        self.orders.cancel(id)
    }

    /// Replace the shortfall penalty. Restored snapshots start with the zero
    /// hook.
    pub fn set_penalty(&mut self, penalty: PenaltyHook) {
        self.penalty = penalty;
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) {
        self.event_bus.on_passive(kind, listener);
    }

    pub fn suppress_event(&mut self, kind: EventKind) {
        self.event_bus.suppress(kind);
    }

    // -----------------------------------------------------------------------
    // Query API (read-only)
    // -----------------------------------------------------------------------

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn clock(&self) -> Ticks {
        self.sim_state.clock
    }

    pub fn dt(&self) -> Ticks {
        self.sim_state.dt
    }

    pub fn steps(&self) -> u64 {
        self.sim_state.steps
    }

    pub fn stock(&self) -> &StockLedger {
        &self.stock
    }

    /// Balance of a material by name. `None` for unknown names.
    pub fn stock_of(&self, material: &str) -> Option<Fixed64> {
        self.catalog
            .material_id(material)
            .map(|m| self.stock.quantity(m))
    }

    pub fn orders(&self) -> &OrderBook {
        &self.orders
    }

    pub fn prices(&self) -> &PriceBook {
        &self.prices
    }

    pub fn devices(&self) -> &[DeviceRuntime] {
        &self.devices
    }

    pub fn device(&self, name: &str) -> Option<&DeviceRuntime> {
        self.catalog
            .device_id(name)
            .and_then(|id| self.devices.get(id.index()))
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The choice list for one device: `Keep`, then each allowed recipe.
    pub fn choices(&self, device: &str) -> Option<Vec<Directive>> {
        let id = self.catalog.device_id(device)?;
        let def = self.catalog.device(id)?;
        Some(Scheduler::choices(&self.catalog, def.category))
    }

    pub fn step_energy(&self) -> Fixed64 {
        self.step_energy
    }

    pub fn total_energy(&self) -> Fixed64 {
        self.total_energy
    }

    pub fn step_balance(&self) -> Fixed64 {
        self.step_balance
    }

    pub fn total_balance(&self) -> Fixed64 {
        self.total_balance
    }

    pub fn last_settlement(&self) -> &Settlement {
        &self.last_settlement
    }

    /// Hash recorded at the end of the last step (or at construction).
    pub fn state_hash(&self) -> u64 {
        self.last_state_hash
    }

    /// Build an owned snapshot of the current state.
    pub fn snapshot(&self) -> StepSnapshot {
        let catalog = &self.catalog;
        let stock = self
            .stock
            .iter()
            .map(|(m, quantity)| StockSnapshot {
                material: catalog.material_name(m).unwrap_or("?").to_string(),
                quantity,
            })
            .collect();
        let devices = self
            .devices
            .iter()
            .filter_map(|rt| {
                let def = catalog.device(rt.device())?;
                Some(DeviceSnapshot {
                    id: rt.device(),
                    name: def.id.clone(),
                    category: def.category,
                    state: rt.state(),
                    t_left: rt.state().t_left(),
                    bound_recipe: rt
                        .bound_recipe()
                        .and_then(|r| catalog.recipe(r))
                        .map(|r| r.name.clone()),
                    completed: rt.completed(),
                    held: rt.is_held(),
                })
            })
            .collect();
        let pending_orders = self
            .orders
            .iter()
            .map(|(id, o)| OrderSnapshot {
                id,
                material: catalog.material_name(o.material).unwrap_or("?").to_string(),
                quantity: o.quantity,
                due_time: o.due_time,
            })
            .collect();

        StepSnapshot {
            clock: self.sim_state.clock,
            dt: self.sim_state.dt,
            steps: self.sim_state.steps,
            stock,
            devices,
            step_energy: self.step_energy,
            total_energy: self.total_energy,
            step_balance: self.step_balance,
            total_balance: self.total_balance,
            settlement: self.last_settlement.clone(),
            pending_orders,
        }
    }

    /// Human-readable device name, for logs and errors.
    pub fn device_name(&self, id: DeviceId) -> String {
        device_name(&self.catalog, id)
    }
}

pub(crate) fn hash_device(h: &mut StateHash, runtime: &DeviceRuntime) {
    h.write_u32(runtime.device().0);
    match runtime.bound_recipe() {
        Some(r) => {
            h.write_u32(1);
            h.write_u32(r.0);
        }
        None => h.write_u32(0),
    }
    h.write_u64(runtime.state().t_left());
    h.write_u32(u32::from(runtime.state().is_running()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvariantViolation;
    use crate::price::{ENERGY, RENT};
    use crate::test_utils::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn build_creates_runtime_per_device() {
        let sim = Simulation::builder(motor_line_catalog()).build().unwrap();
        assert_eq!(sim.devices().len(), 11);
        assert!(sim.devices().iter().all(|rt| rt.is_idle()));
        assert_eq!(sim.clock(), 0);
    }

    #[test]
    fn zero_dt_is_rejected() {
        let err = Simulation::builder(motor_line_catalog())
            .dt(0)
            .build()
            .unwrap_err();
        assert_eq!(err, SimError::Config(ConfigError::ZeroTimestep));
    }

    #[test]
    fn matching_initial_binding_succeeds() {
        let sim = Simulation::builder(motor_line_catalog())
            .bind("CASTER-01", "Cast_Iron")
            .build()
            .unwrap();
        let rt = sim.device("CASTER-01").unwrap();
        assert_eq!(rt.bound_recipe(), sim.catalog().recipe_id("Cast_Iron"));
    }

    #[test]
    fn mismatched_initial_binding_is_config_error() {
        let err = Simulation::builder(motor_line_catalog())
            .bind("CASTER-01", "MotorFinal")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            SimError::Config(ConfigError::CategoryMismatch { .. })
        ));
    }

    #[test]
    fn negative_initial_stock_is_rejected() {
        let err = Simulation::builder(motor_line_catalog())
            .stock("IronOre", fx(-1.0))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            SimError::Config(ConfigError::NegativeStock { .. })
        ));
    }

    #[test]
    fn cast_iron_runs_for_sixty_one_steps() {
        let mut sim = cast_iron_sim();
        let ore = "IronOre";

        let snap = sim.step_keep().unwrap();
        assert_eq!(sim.stock_of(ore), Some(Fixed64::ZERO));
        let caster = snap.device("CASTER-01").unwrap();
        assert!(caster.state.is_running());
        assert_eq!(caster.t_left, 60);

        for _ in 0..59 {
            sim.step_keep().unwrap();
        }
        assert!(sim.device("CASTER-01").unwrap().state().is_running());
        assert_eq!(sim.stock_of("IronIngot"), Some(Fixed64::ZERO));

        let snap = sim.step_keep().unwrap();
        let caster = snap.device("CASTER-01").unwrap();
        assert!(caster.state.is_idle());
        assert!(caster.completed);
        assert_eq!(snap.stock_of("IronIngot"), Some(fx(30.0)));
    }

    #[test]
    fn energy_counts_running_devices() {
        let mut sim = Simulation::builder(motor_line_catalog())
            .dt(3600)
            .stock("IronOre", fx(30.0))
            .bind("CASTER-01", "Cast_Iron")
            .build()
            .unwrap();
        let snap = sim.step_keep().unwrap();
        // 45 kW for one hour.
        assert_eq!(snap.step_energy, fx(45.0));
        assert_eq!(snap.total_energy, fx(45.0));
    }

    #[test]
    fn busy_device_plan_leaves_state_unchanged() {
        let mut sim = cast_iron_sim();
        sim.step_keep().unwrap();
        let hash = sim.state_hash();
        let clock = sim.clock();

        let plan = SchedulePlan::new().assign("CASTER-01", "Cast_Steel");
        let err = sim.step(&plan).unwrap_err();
        assert!(matches!(
            err,
            SimError::Invariant(InvariantViolation::DeviceBusy { .. })
        ));
        assert_eq!(sim.state_hash(), hash);
        assert_eq!(sim.compute_state_hash(), hash);
        assert_eq!(sim.clock(), clock);
    }

    #[test]
    fn disabled_device_stays_idle() {
        let mut sim = cast_iron_sim();
        let snap = sim
            .step(&SchedulePlan::new().disable("CASTER-01"))
            .unwrap();
        let caster = snap.device("CASTER-01").unwrap();
        assert!(caster.state.is_idle());
        assert!(caster.held);
        assert_eq!(snap.stock_of("IronOre"), Some(fx(30.0)));

        // The hold lasts one step.
        let snap = sim.step_keep().unwrap();
        assert!(snap.device("CASTER-01").unwrap().state.is_running());
    }

    #[test]
    fn balance_accumulates_step_balances() {
        let mut sim = Simulation::builder(motor_line_catalog())
            .stock("IronOre", fx(60.0))
            .bind("CASTER-01", "Cast_Iron")
            .price(Price::new(ENERGY).with_buy(fx(0.5)))
            .price(Price::new(RENT).with_buy(fx(1.0)))
            .price(Price::new("IronOre").with_storage(fx(0.01)))
            .initial_money(fx(100.0))
            .build()
            .unwrap();
        let mut previous = sim.total_balance();
        for _ in 0..10 {
            let snap = sim.step_keep().unwrap();
            assert_eq!(snap.total_balance, previous + snap.step_balance);
            previous = snap.total_balance;
        }
    }

    #[test]
    fn order_for_unsellable_material_is_rejected() {
        let mut sim = motor_line_sim();
        let err = sim.add_order("IronOre", fx(1.0), 10).unwrap_err();
        assert_eq!(err, ConfigError::NotSellable("IronOre".into()));
        let err = sim.add_order("Motor", fx(0.0), 10).unwrap_err();
        assert!(matches!(err, ConfigError::NonPositiveOrder { .. }));
        let err = sim.add_order("Unobtainium", fx(1.0), 10).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMaterial(_)));
    }

    #[test]
    fn due_order_settles_against_stock() {
        let mut sim = Simulation::builder(motor_line_catalog())
            .stock("Motor", fx(4.0))
            .price(Price::new("Motor").with_sell(fx(3.0)))
            .order("Motor", fx(10.0), 0)
            .build()
            .unwrap();
        let snap = sim.step_keep().unwrap();
        assert_eq!(snap.settlement.orders.len(), 1);
        let r = &snap.settlement.orders[0];
        assert_eq!(r.delivered, fx(4.0));
        assert_eq!(r.sold_money, fx(12.0));
        assert_eq!(r.result, fx(12.0));
        assert_eq!(snap.stock_of("Motor"), Some(Fixed64::ZERO));
        assert!(snap.pending_orders.is_empty());
    }

    #[test]
    fn cancelled_order_never_settles() {
        let mut sim = motor_line_sim();
        let id = sim.add_order("Motor", fx(1.0), 0).unwrap();
        assert!(sim.cancel_order(id).is_some());
        let snap = sim.step_keep().unwrap();
        assert!(snap.settlement.orders.is_empty());
    }

    #[test]
    fn events_are_delivered_after_step() {
        let mut sim = cast_iron_sim();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        sim.on_passive(
            EventKind::BatchStarted,
            Box::new(move |e| sink.borrow_mut().push(e.tick())),
        );
        sim.step_keep().unwrap();
        assert_eq!(*seen.borrow(), vec![0]);
        assert_eq!(sim.event_bus.buffered_count(EventKind::BatchStarted), 0);
    }

    #[test]
    fn rebind_emits_event() {
        let mut sim = motor_line_sim();
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        sim.on_passive(EventKind::RecipeBound, Box::new(move |_| *c.borrow_mut() += 1));
        sim.step(&SchedulePlan::new().assign("CASTER-02", "Cast_Steel"))
            .unwrap();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn choices_follow_device_category() {
        let sim = motor_line_sim();
        let choices = sim.choices("CONSTRUCTOR-01").unwrap();
        assert_eq!(choices[0], Directive::Keep);
        assert_eq!(choices.len(), 3);
        assert!(sim.choices("NOPE").is_none());
    }
}
