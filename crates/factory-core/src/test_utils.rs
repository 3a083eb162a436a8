//! Shared test helpers for integration tests, benchmarks and the demo.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`.

use crate::catalog::{Catalog, CatalogBuilder, DeviceCategory, DeviceDef};
use crate::engine::Simulation;
use crate::error::ConfigError;
use crate::fixed::Fixed64;
use crate::id::OrderId;
use crate::price::{ENERGY, Price, RENT};
use crate::rng::SimRng;
use std::sync::Arc;

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fx(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

// ===========================================================================
// Motor line
// ===========================================================================

/// Four casters feeding four constructors, two rotor assemblers and one
/// motor manufacturer.
pub fn motor_line_catalog() -> Arc<Catalog> {
    use DeviceCategory::*;

    let mut b = CatalogBuilder::new();
    b.register_device(DeviceDef::new("CASTER-00", Caster).with_downstream(&["CONSTRUCTOR-01"]));
    b.register_device(DeviceDef::new("CASTER-01", Caster).with_downstream(&["CONSTRUCTOR-02"]));
    b.register_device(
        DeviceDef::new("CASTER-02", Caster)
            .with_channels(2, 1)
            .with_downstream(&["CONSTRUCTOR-03"]),
    );
    b.register_device(DeviceDef::new("CASTER-03", Caster).with_downstream(&["CONSTRUCTOR-04"]));
    b.register_device(
        DeviceDef::new("CONSTRUCTOR-01", Constructor)
            .with_upstream(&["CASTER-01"])
            .with_downstream(&["ASSEMBLER-01"]),
    );
    b.register_device(
        DeviceDef::new("CONSTRUCTOR-02", Constructor)
            .with_upstream(&["CASTER-02"])
            .with_downstream(&["ASSEMBLER-01"]),
    );
    b.register_device(
        DeviceDef::new("CONSTRUCTOR-03", Constructor)
            .with_upstream(&["CASTER-02"])
            .with_downstream(&["ASSEMBLER-02"]),
    );
    b.register_device(
        DeviceDef::new("CONSTRUCTOR-04", Constructor)
            .with_upstream(&["CASTER-02"])
            .with_downstream(&["ASSEMBLER-02"]),
    );
    b.register_device(
        DeviceDef::new("ASSEMBLER-01", Assembler)
            .with_channels(2, 1)
            .with_upstream(&["CONSTRUCTOR-01", "CONSTRUCTOR-02"])
            .with_downstream(&["MANUFACTURER-01"]),
    );
    b.register_device(
        DeviceDef::new("ASSEMBLER-02", Assembler)
            .with_channels(2, 1)
            .with_upstream(&["CONSTRUCTOR-01", "CONSTRUCTOR-02"])
            .with_downstream(&["MANUFACTURER-01"]),
    );
    b.register_device(
        DeviceDef::new("MANUFACTURER-01", Manufacturer)
            .with_channels(2, 1)
            .with_upstream(&["ASSEMBLER-01"]),
    );

    b.register_recipe(
        "Cast_Iron",
        Caster,
        60,
        fx(45.0),
        &[("IronOre", fx(30.0))],
        &[("IronIngot", fx(30.0))],
    );
    b.register_recipe(
        "Cast_Steel",
        Caster,
        60,
        fx(50.0),
        &[("IronOre", fx(45.0)), ("Coal", fx(45.0))],
        &[("SteelIngot", fx(45.0))],
    );
    b.register_recipe(
        "Ingot_2_Bar",
        Constructor,
        60,
        fx(15.0),
        &[("IronIngot", fx(15.0))],
        &[("IronBar", fx(15.0))],
    );
    b.register_recipe(
        "Ingot_2_Screw",
        Constructor,
        12,
        fx(12.0),
        &[("IronIngot", fx(12.5))],
        &[("Screw", fx(50.0))],
    );
    b.register_recipe(
        "RotorAsm",
        Assembler,
        20,
        fx(20.0),
        &[("IronBar", fx(4.0)), ("Screw", fx(100.0))],
        &[("Rotor", fx(1.0))],
    );
    b.register_recipe(
        "MotorFinal",
        Manufacturer,
        25,
        fx(30.0),
        &[("Rotor", fx(2.0))],
        &[("Motor", fx(1.0))],
    );

    match b.build() {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => panic!("motor line catalog is invalid: {e}"),
    }
}

/// Energy, rent, sell prices for finished goods and storage for everything.
pub fn motor_line_prices() -> Vec<Price> {
    vec![
        Price::new(ENERGY).with_buy(fx(0.125)),
        Price::new(RENT).with_buy(fx(0.25)),
        Price::new("IronOre").with_storage(fx(0.0005)),
        Price::new("Coal").with_storage(fx(0.0005)),
        Price::new("IronIngot").with_sell(fx(2.0)).with_storage(fx(0.001)),
        Price::new("SteelIngot").with_sell(fx(5.0)).with_storage(fx(0.001)),
        Price::new("IronBar").with_storage(fx(0.001)),
        Price::new("Screw").with_storage(fx(0.0001)),
        Price::new("Rotor").with_sell(fx(120.0)).with_storage(fx(0.005)),
        Price::new("Motor").with_sell(fx(500.0)).with_storage(fx(0.01)),
    ]
}

/// The motor line with preloaded raw stock, prices and the usual bindings.
/// `CASTER-02`, `CASTER-03`, `CONSTRUCTOR-03`, `CONSTRUCTOR-04` and
/// `ASSEMBLER-02` start unbound.
pub fn motor_line_sim() -> Simulation {
    let built = Simulation::builder(motor_line_catalog())
        .stock("IronOre", fx(600.0))
        .stock("Coal", fx(200.0))
        .prices(motor_line_prices())
        .bind("CASTER-00", "Cast_Iron")
        .bind("CASTER-01", "Cast_Iron")
        .bind("CONSTRUCTOR-01", "Ingot_2_Bar")
        .bind("CONSTRUCTOR-02", "Ingot_2_Screw")
        .bind("ASSEMBLER-01", "RotorAsm")
        .bind("MANUFACTURER-01", "MotorFinal")
        .initial_money(fx(1000.0))
        .build();
    match built {
        Ok(sim) => sim,
        Err(e) => panic!("motor line simulation is invalid: {e}"),
    }
}

/// One caster bound to `Cast_Iron` with exactly one batch of ore.
pub fn cast_iron_sim() -> Simulation {
    let built = Simulation::builder(motor_line_catalog())
        .stock("IronOre", fx(30.0))
        .bind("CASTER-01", "Cast_Iron")
        .build();
    match built {
        Ok(sim) => sim,
        Err(e) => panic!("cast iron simulation is invalid: {e}"),
    }
}

// ===========================================================================
// Random demand
// ===========================================================================

/// Reproducible stream of customer orders over a fixed set of materials.
#[derive(Debug, Clone)]
pub struct OrderGenerator {
    rng: SimRng,
    materials: Vec<String>,
    max_quantity: u32,
    max_due: i64,
}

impl OrderGenerator {
    pub fn new(seed: u64, materials: &[&str], max_quantity: u32, max_due: i64) -> Self {
        Self {
            rng: SimRng::new(seed),
            materials: materials.iter().map(|m| m.to_string()).collect(),
            max_quantity: max_quantity.max(1),
            max_due: max_due.max(0),
        }
    }

    /// `(material, quantity >= 1, due_time in [0, max_due])`.
    pub fn next_order(&mut self) -> Option<(String, Fixed64, i64)> {
        let material = self.rng.choose(&self.materials)?.clone();
        let quantity = 1 + self.rng.next_below(u64::from(self.max_quantity)) as i32;
        let due = self.rng.range_i64(0, self.max_due);
        Some((material, Fixed64::from_num(quantity), due))
    }

    /// Queue `count` orders on `sim`.
    pub fn fill(&mut self, sim: &mut Simulation, count: usize) -> Result<Vec<OrderId>, ConfigError> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let Some((material, quantity, due)) = self.next_order() else {
                break;
            };
            ids.push(sim.add_order(&material, quantity, due)?);
        }
        Ok(ids)
    }
}
