//! Binary save/load of a running simulation, plus per-subsystem hashes for
//! desync debugging.
//!
//! Snapshots are `bitcode` blobs behind a versioned header. The catalog is
//! not stored: it is injected again on load and must carry the same
//! fingerprint as the one the snapshot was taken with. Event listeners and
//! the penalty hook are closures and are not saved either.

use crate::catalog::Catalog;
use crate::device::DeviceRuntime;
use crate::engine::{Simulation, hash_device};
use crate::event::EventBus;
use crate::fixed::Fixed64;
use crate::order::OrderBook;
use crate::price::{PenaltyHook, PriceBook, Settlement};
use crate::scheduler::Scheduler;
use crate::sim::{SimState, StateHash};
use crate::stock::StockLedger;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a saved simulation.
pub const SNAPSHOT_MAGIC: u32 = 0xFAC7_0A01;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 2;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("snapshot was taken with catalog 0x{expected:016X}, got 0x{found:016X}")]
    CatalogMismatch { expected: u64, found: u64 },
    #[error("snapshot holds {found} device runtimes, catalog has {expected} devices")]
    DeviceCountMismatch { expected: usize, found: usize },
}

// ---------------------------------------------------------------------------
// Snapshot header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// Clock at the time the snapshot was taken.
    pub clock: u64,
    pub catalog_fingerprint: u64,
}

impl SnapshotHeader {
    pub fn new(clock: u64, catalog_fingerprint: u64) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            clock,
            catalog_fingerprint,
        }
    }

    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

/// Decode just enough to read the header. bitcode has no partial decode,
/// so this decodes the whole blob.
pub fn read_snapshot_header(data: &[u8]) -> Result<SnapshotHeader, DeserializeError> {
    let snapshot: SimulationSnapshot =
        bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
    Ok(snapshot.header)
}

// ---------------------------------------------------------------------------
// Serializable simulation state
// ---------------------------------------------------------------------------

/// Everything in a [`Simulation`] except the catalog, the penalty hook,
/// per-step scratch and the event bus beyond its buffer capacity.
#[derive(Debug, Serialize, Deserialize)]
struct SimulationSnapshot {
    header: SnapshotHeader,
    sim_state: SimState,
    stock: StockLedger,
    orders: OrderBook,
    prices: PriceBook,
    devices: Vec<DeviceRuntime>,
    scheduler: Scheduler,
    step_energy: Fixed64,
    total_energy: Fixed64,
    step_balance: Fixed64,
    total_balance: Fixed64,
    last_settlement: Settlement,
    last_state_hash: u64,
    event_capacity: usize,
}

impl Simulation {
    /// Encode the runtime state into a binary blob.
    pub fn save(&self) -> Result<Vec<u8>, SerializeError> {
        let snapshot = SimulationSnapshot {
            header: SnapshotHeader::new(self.sim_state.clock, self.catalog.fingerprint()),
            sim_state: self.sim_state.clone(),
            stock: self.stock.clone(),
            orders: self.orders.clone(),
            prices: self.prices.clone(),
            devices: self.devices.clone(),
            scheduler: self.scheduler.clone(),
            step_energy: self.step_energy,
            total_energy: self.total_energy,
            step_balance: self.step_balance,
            total_balance: self.total_balance,
            last_settlement: self.last_settlement.clone(),
            last_state_hash: self.last_state_hash,
            event_capacity: self.event_bus.default_capacity(),
        };
        bitcode::serialize(&snapshot).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    /// Restore a simulation saved with [`save`](Self::save).
    ///
    /// The header is validated and the catalog fingerprint compared before
    /// anything is rebuilt. The event bus keeps its buffer capacity but starts
    /// empty with no listeners or suppressions, and the penalty hook is the
    /// zero hook; re-register both as needed.
    pub fn load(data: &[u8], catalog: Arc<Catalog>) -> Result<Self, DeserializeError> {
        let snapshot: SimulationSnapshot =
            bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
        snapshot.header.validate()?;

        if snapshot.header.catalog_fingerprint != catalog.fingerprint() {
            return Err(DeserializeError::CatalogMismatch {
                expected: snapshot.header.catalog_fingerprint,
                found: catalog.fingerprint(),
            });
        }
        if snapshot.devices.len() != catalog.device_count() {
            return Err(DeserializeError::DeviceCountMismatch {
                expected: catalog.device_count(),
                found: snapshot.devices.len(),
            });
        }

        Ok(Simulation {
            catalog,
            sim_state: snapshot.sim_state,
            stock: snapshot.stock,
            orders: snapshot.orders,
            prices: snapshot.prices,
            devices: snapshot.devices,
            scheduler: snapshot.scheduler,
            step_energy: snapshot.step_energy,
            total_energy: snapshot.total_energy,
            step_balance: snapshot.step_balance,
            total_balance: snapshot.total_balance,
            last_settlement: snapshot.last_settlement,
            event_bus: EventBus::new(snapshot.event_capacity),
            penalty: PenaltyHook::zero(),
            started_this_step: Vec::new(),
            last_state_hash: snapshot.last_state_hash,
        })
    }
}

// ---------------------------------------------------------------------------
// Subsystem hashes
// ---------------------------------------------------------------------------

/// Independent hashes of each ledger, so a divergence between two runs can
/// be pinned to the subsystem that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsystemHashes {
    pub clock: u64,
    pub stock: u64,
    pub devices: u64,
    pub orders: u64,
    pub ledgers: u64,
}

impl Simulation {
    pub fn subsystem_hashes(&self) -> SubsystemHashes {
        SubsystemHashes {
            clock: self.hash_clock(),
            stock: self.hash_stock(),
            devices: self.hash_devices(),
            orders: self.hash_orders(),
            ledgers: self.hash_ledgers(),
        }
    }

    fn hash_clock(&self) -> u64 {
        let mut h = StateHash::new();
        h.write_u64(self.sim_state.clock);
        h.write_u64(self.sim_state.dt);
        h.write_u64(self.sim_state.steps);
        h.finish()
    }

    fn hash_stock(&self) -> u64 {
        let mut h = StateHash::new();
        for (material, quantity) in self.stock.iter() {
            h.write_u32(material.0);
            h.write_fixed64(quantity);
        }
        h.finish()
    }

    fn hash_devices(&self) -> u64 {
        let mut h = StateHash::new();
        for runtime in &self.devices {
            hash_device(&mut h, runtime);
        }
        h.finish()
    }

    fn hash_orders(&self) -> u64 {
        let mut h = StateHash::new();
        h.write_u64(self.orders.len() as u64);
        for (_, order) in self.orders.iter() {
            h.write_u32(order.material.0);
            h.write_fixed64(order.quantity);
            h.write_i64(order.due_time);
        }
        h.finish()
    }

    fn hash_ledgers(&self) -> u64 {
        let mut h = StateHash::new();
        h.write_fixed64(self.step_energy);
        h.write_fixed64(self.total_energy);
        h.write_fixed64(self.step_balance);
        h.write_fixed64(self.total_balance);
        h.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogBuilder, DeviceCategory, DeviceDef};
    use crate::test_utils::*;

    #[test]
    fn header_rejects_bad_magic() {
        let mut header = SnapshotHeader::new(0, 0);
        header.magic = 0xDEAD_BEEF;
        assert!(matches!(
            header.validate(),
            Err(DeserializeError::InvalidMagic(0xDEAD_BEEF))
        ));
    }

    #[test]
    fn header_rejects_future_version() {
        let mut header = SnapshotHeader::new(0, 0);
        header.version = FORMAT_VERSION + 1;
        assert!(matches!(
            header.validate(),
            Err(DeserializeError::FutureVersion(_))
        ));
    }

    #[test]
    fn save_and_load_preserve_state_hash() {
        let mut sim = motor_line_sim();
        for _ in 0..30 {
            sim.step_keep().unwrap();
        }
        let data = sim.save().unwrap();
        let restored = Simulation::load(&data, sim.catalog().clone()).unwrap();
        assert_eq!(restored.state_hash(), sim.state_hash());
        assert_eq!(restored.compute_state_hash(), sim.compute_state_hash());
        assert_eq!(restored.subsystem_hashes(), sim.subsystem_hashes());
        assert_eq!(restored.clock(), 30);
    }

    #[test]
    fn event_capacity_survives_save_and_load() {
        let sim = Simulation::builder(motor_line_catalog())
            .event_capacity(7)
            .build()
            .unwrap();
        let restored = Simulation::load(&sim.save().unwrap(), sim.catalog().clone()).unwrap();
        assert_eq!(restored.event_bus.default_capacity(), 7);
    }

    #[test]
    fn restored_simulation_continues_identically() {
        let mut sim = motor_line_sim();
        for _ in 0..10 {
            sim.step_keep().unwrap();
        }
        let mut restored = Simulation::load(&sim.save().unwrap(), sim.catalog().clone()).unwrap();
        for _ in 0..50 {
            let a = sim.step_keep().unwrap();
            let b = restored.step_keep().unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn header_is_readable() {
        let mut sim = cast_iron_sim();
        sim.step_keep().unwrap();
        let header = read_snapshot_header(&sim.save().unwrap()).unwrap();
        assert_eq!(header.clock, 1);
        assert_eq!(header.catalog_fingerprint, sim.catalog().fingerprint());
    }

    #[test]
    fn load_against_other_catalog_fails() {
        let sim = cast_iron_sim();
        let data = sim.save().unwrap();

        let mut b = CatalogBuilder::new();
        b.register_device(DeviceDef::new("CASTER-01", DeviceCategory::Caster));
        let other = Arc::new(b.build().unwrap());
        assert!(matches!(
            Simulation::load(&data, other),
            Err(DeserializeError::CatalogMismatch { .. })
        ));
    }

    #[test]
    fn garbage_fails_to_decode() {
        let catalog = motor_line_catalog();
        assert!(matches!(
            Simulation::load(&[1, 2, 3], catalog),
            Err(DeserializeError::Decode(_))
        ));
    }

    #[test]
    fn subsystem_hashes_isolate_stock_change() {
        let a = cast_iron_sim();
        let mut b = cast_iron_sim();
        b.stock.credit(b.catalog.material_id("Coal").unwrap(), fx(1.0)).unwrap();
        let ha = a.subsystem_hashes();
        let hb = b.subsystem_hashes();
        assert_ne!(ha.stock, hb.stock);
        assert_eq!(ha.devices, hb.devices);
        assert_eq!(ha.orders, hb.orders);
        assert_eq!(ha.clock, hb.clock);
    }
}
