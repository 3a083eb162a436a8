//! Headless run of the motor line under the greedy policy.
//!
//! ```text
//! RUST_LOG=info cargo run -p factory-core --example headless_line --features test-utils
//! ```

use factory_core::event::EventKind;
use factory_core::fixed::fixed64_to_f64;
use factory_core::policy::{GreedyPolicy, SchedulePolicy};
use factory_core::test_utils::{OrderGenerator, motor_line_sim};
use std::cell::Cell;
use std::rc::Rc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const STEPS: u64 = 300;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut sim = motor_line_sim();
    let mut demand = OrderGenerator::new(7, &["Rotor", "Motor"], 3, STEPS as i64);
    if let Err(e) = demand.fill(&mut sim, 12) {
        error!(%e, "Could not queue demand");
        return;
    }

    let completed = Rc::new(Cell::new(0u32));
    let counter = completed.clone();
    sim.on_passive(
        EventKind::BatchCompleted,
        Box::new(move |_| counter.set(counter.get() + 1)),
    );

    let mut policy = GreedyPolicy;
    for _ in 0..STEPS {
        let plan = policy.plan(&sim);
        let snap = match sim.step(&plan) {
            Ok(snap) => snap,
            Err(e) => {
                error!(clock = sim.clock(), %e, "Step failed");
                return;
            }
        };
        if snap.clock % 30 == 0 {
            info!(
                clock = snap.clock,
                running = snap.running_count(),
                rotors = fixed64_to_f64(snap.stock_of("Rotor").unwrap_or_default()),
                motors = fixed64_to_f64(snap.stock_of("Motor").unwrap_or_default()),
                total_energy_kwh = fixed64_to_f64(snap.total_energy),
                total_balance = fixed64_to_f64(snap.total_balance),
                "Line status"
            );
        }
    }

    info!(
        steps = sim.steps(),
        batches_completed = completed.get(),
        pending_orders = sim.orders().len(),
        total_balance = fixed64_to_f64(sim.total_balance()),
        state_hash = format_args!("{:016x}", sim.state_hash()),
        "Run finished"
    );
}
