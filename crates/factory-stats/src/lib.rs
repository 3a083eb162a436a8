//! Time-series history of a factory run.
//!
//! [`HistoryRecorder`] consumes the [`StepSnapshot`] returned by every
//! simulation step and keeps:
//!
//! - scalar series: clock, step/total energy, step/total balance
//! - one stock series per material
//! - one state series and one Gantt series (recipe while running) per device
//! - a rolling average of the step balance over a fixed window
//! - per-device utilisation (running steps / recorded steps)
//!
//! Values stay in [`Fixed64`] while recording. [`HistoryRecorder::to_json`]
//! converts them to `f64` for plotting tools.
//!
//! # Usage
//!
//! ```ignore
//! let mut history = HistoryRecorder::new(HistoryConfig::default());
//! for _ in 0..300 {
//!     let plan = policy.plan(&sim);
//!     history.record(&sim.step(&plan)?);
//! }
//! let json = history.to_json()?;
//! ```

use std::collections::BTreeMap;

use factory_core::device::DeviceState;
use factory_core::fixed::{Fixed64, Ticks, fixed64_to_f64};
use factory_core::query::StepSnapshot;
use fixed::types::I64F64;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Steps averaged by [`HistoryRecorder::rolling_step_balance`].
    pub balance_window: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { balance_window: 60 }
    }
}

// ---------------------------------------------------------------------------
// RingBuffer
// ---------------------------------------------------------------------------

/// Fixed-capacity buffer that overwrites its oldest value when full.
/// Iterates oldest to newest.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    /// Index the next push writes to.
    next: usize,
    len: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![T::default(); capacity.max(1)],
            next: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, value: T) {
        let capacity = self.capacity();
        self.slots[self.next] = value;
        self.next = (self.next + 1) % capacity;
        self.len = (self.len + 1).min(capacity);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    pub fn latest(&self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let idx = (self.next + self.capacity() - 1) % self.capacity();
        Some(self.slots[idx])
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = T> + '_ {
        let start = (self.next + self.capacity() - self.len) % self.capacity();
        (0..self.len).map(move |i| self.slots[(start + i) % self.capacity()])
    }

    pub fn clear(&mut self) {
        self.slots.fill(T::default());
        self.next = 0;
        self.len = 0;
    }
}

impl RingBuffer<Fixed64> {
    /// Widened so a full window of extreme values cannot overflow.
    pub fn sum(&self) -> I64F64 {
        self.iter().map(I64F64::from_num).sum()
    }

    /// Mean of the stored values. Zero when empty.
    pub fn mean(&self) -> Fixed64 {
        if self.is_empty() {
            return Fixed64::ZERO;
        }
        Fixed64::saturating_from_num(self.sum() / I64F64::from_num(self.len))
    }
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

/// Run-wide scalar series, one entry per recorded step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalarSeries {
    pub clock: Vec<Ticks>,
    pub step_energy: Vec<Fixed64>,
    pub total_energy: Vec<Fixed64>,
    pub step_balance: Vec<Fixed64>,
    pub total_balance: Vec<Fixed64>,
}

/// Per-device series, one entry per recorded step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSeries {
    pub state: Vec<DeviceState>,
    /// Bound recipe while running, `None` while idle.
    pub gantt: Vec<Option<String>>,
    pub running_steps: u64,
    pub completed_batches: u64,
}

/// One contiguous run of a recipe on a device, for Gantt charts.
/// `start` and `end` are clocks; `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GanttSegment {
    pub recipe: String,
    pub start: Ticks,
    pub end: Ticks,
}

// ---------------------------------------------------------------------------
// HistoryRecorder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HistoryRecorder {
    config: HistoryConfig,
    scalars: ScalarSeries,
    stock: BTreeMap<String, Vec<Fixed64>>,
    devices: BTreeMap<String, DeviceSeries>,
    /// Caller-defined scalars, logged with [`log_scalar`](Self::log_scalar).
    custom: BTreeMap<String, Vec<Fixed64>>,
    balance_window: RingBuffer<Fixed64>,
    /// Clock at the start of the first recorded step.
    first_start: Option<Ticks>,
}

impl HistoryRecorder {
    pub fn new(config: HistoryConfig) -> Self {
        let balance_window = RingBuffer::new(config.balance_window);
        Self {
            config,
            scalars: ScalarSeries::default(),
            stock: BTreeMap::new(),
            devices: BTreeMap::new(),
            custom: BTreeMap::new(),
            balance_window,
            first_start: None,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Append one step.
    pub fn record(&mut self, snap: &StepSnapshot) {
        self.first_start
            .get_or_insert(snap.clock.saturating_sub(snap.dt));
        self.scalars.clock.push(snap.clock);
        self.scalars.step_energy.push(snap.step_energy);
        self.scalars.total_energy.push(snap.total_energy);
        self.scalars.step_balance.push(snap.step_balance);
        self.scalars.total_balance.push(snap.total_balance);
        self.balance_window.push(snap.step_balance);

        for s in &snap.stock {
            self.stock
                .entry(s.material.clone())
                .or_default()
                .push(s.quantity);
        }

        for d in &snap.devices {
            let series = self.devices.entry(d.name.clone()).or_default();
            series.state.push(d.state);
            if d.state.is_running() {
                series.running_steps += 1;
                series.gantt.push(d.bound_recipe.clone());
            } else {
                series.gantt.push(None);
            }
            if d.completed {
                series.completed_batches += 1;
            }
        }
    }

    /// Record an extra scalar under `name` (reward signals, custom KPIs).
    pub fn log_scalar(&mut self, name: &str, value: Fixed64) {
        self.custom.entry(name.to_string()).or_default().push(value);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.scalars.clock.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scalars.clock.is_empty()
    }

    pub fn scalars(&self) -> &ScalarSeries {
        &self.scalars
    }

    pub fn stock_series(&self, material: &str) -> Option<&[Fixed64]> {
        self.stock.get(material).map(Vec::as_slice)
    }

    pub fn device_series(&self, device: &str) -> Option<&DeviceSeries> {
        self.devices.get(device)
    }

    pub fn custom_series(&self, name: &str) -> Option<&[Fixed64]> {
        self.custom.get(name).map(Vec::as_slice)
    }

    /// Mean step balance over the last `balance_window` recorded steps.
    pub fn rolling_step_balance(&self) -> Fixed64 {
        self.balance_window.mean()
    }

    /// Fraction of recorded steps the device spent running, in `[0, 1]`.
    pub fn utilization(&self, device: &str) -> Option<Fixed64> {
        let series = self.devices.get(device)?;
        if series.state.is_empty() {
            return Some(Fixed64::ZERO);
        }
        Some(Fixed64::from_num(series.running_steps) / Fixed64::from_num(series.state.len()))
    }

    /// Collapse a device's Gantt series into recipe segments.
    pub fn gantt_segments(&self, device: &str) -> Vec<GanttSegment> {
        let Some(series) = self.devices.get(device) else {
            return Vec::new();
        };
        let mut segments: Vec<GanttSegment> = Vec::new();
        let mut prev_clock: Option<Ticks> = None;
        for (recipe, &clock) in series.gantt.iter().zip(&self.scalars.clock) {
            // A step covers (prev_clock, clock]; the first one starts at clock - dt.
            let start = prev_clock.or(self.first_start).unwrap_or(clock);
            prev_clock = Some(clock);
            let Some(recipe) = recipe else {
                continue;
            };
            match segments.last_mut() {
                Some(last) if last.recipe == *recipe && last.end == start => last.end = clock,
                _ => segments.push(GanttSegment {
                    recipe: recipe.clone(),
                    start,
                    end: clock,
                }),
            }
        }
        segments
    }

    /// Drop every recorded value. The configuration is kept.
    pub fn clear(&mut self) {
        self.scalars = ScalarSeries::default();
        self.stock.clear();
        self.devices.clear();
        self.custom.clear();
        self.balance_window.clear();
        self.first_start = None;
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    /// Everything recorded, as `f64` series keyed by name.
    pub fn export(&self) -> HistoryExport {
        let to_f64 = |v: &[Fixed64]| v.iter().copied().map(fixed64_to_f64).collect::<Vec<_>>();
        HistoryExport {
            clock: self.scalars.clock.clone(),
            step_energy: to_f64(&self.scalars.step_energy),
            total_energy: to_f64(&self.scalars.total_energy),
            step_balance: to_f64(&self.scalars.step_balance),
            total_balance: to_f64(&self.scalars.total_balance),
            rolling_step_balance: fixed64_to_f64(self.rolling_step_balance()),
            stock: self
                .stock
                .iter()
                .map(|(name, v)| (name.clone(), to_f64(v)))
                .collect(),
            devices: self
                .devices
                .iter()
                .map(|(name, series)| {
                    let export = DeviceExport {
                        state: series
                            .state
                            .iter()
                            .map(|s| if s.is_running() { "running" } else { "idle" })
                            .collect(),
                        t_left: series.state.iter().map(|s| s.t_left()).collect(),
                        gantt: series.gantt.clone(),
                        segments: self.gantt_segments(name),
                        utilization: self
                            .utilization(name)
                            .map(fixed64_to_f64)
                            .unwrap_or_default(),
                        completed_batches: series.completed_batches,
                    };
                    (name.clone(), export)
                })
                .collect(),
            custom: self
                .custom
                .iter()
                .map(|(name, v)| (name.clone(), to_f64(v)))
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.export())
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.export())
    }
}

impl Default for HistoryRecorder {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Export types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HistoryExport {
    pub clock: Vec<Ticks>,
    pub step_energy: Vec<f64>,
    pub total_energy: Vec<f64>,
    pub step_balance: Vec<f64>,
    pub total_balance: Vec<f64>,
    pub rolling_step_balance: f64,
    pub stock: BTreeMap<String, Vec<f64>>,
    pub devices: BTreeMap<String, DeviceExport>,
    pub custom: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceExport {
    pub state: Vec<&'static str>,
    pub t_left: Vec<Ticks>,
    pub gantt: Vec<Option<String>>,
    pub segments: Vec<GanttSegment>,
    pub utilization: f64,
    pub completed_batches: u64,
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use factory_core::fixed::f64_to_fixed64;
    use factory_core::policy::GreedyPolicy;
    use factory_core::test_utils::*;

    fn small_config() -> HistoryConfig {
        HistoryConfig { balance_window: 4 }
    }

    // -----------------------------------------------------------------------
    // RingBuffer
    // -----------------------------------------------------------------------

    #[test]
    fn ring_buffer_push_and_iterate() {
        let mut buf = RingBuffer::new(4);
        buf.push(f64_to_fixed64(1.0));
        buf.push(f64_to_fixed64(2.0));
        buf.push(f64_to_fixed64(3.0));

        assert_eq!(buf.len(), 3);
        assert!(!buf.is_full());
        let values: Vec<Fixed64> = buf.iter().collect();
        assert_eq!(values, vec![fx(1.0), fx(2.0), fx(3.0)]);
        assert_eq!(buf.latest(), Some(fx(3.0)));
    }

    #[test]
    fn ring_buffer_overwrites_oldest() {
        let mut buf = RingBuffer::new(3);
        for i in 1..=5 {
            buf.push(fx(i as f64));
        }
        assert!(buf.is_full());
        assert_eq!(buf.iter().collect::<Vec<_>>(), vec![fx(3.0), fx(4.0), fx(5.0)]);
        assert_eq!(buf.iter().len(), 3);
        assert_eq!(buf.mean(), fx(4.0));
    }

    #[test]
    fn ring_buffer_zero_capacity_is_one() {
        let mut buf: RingBuffer<u64> = RingBuffer::new(0);
        assert_eq!(buf.capacity(), 1);
        buf.push(7);
        buf.push(8);
        assert_eq!(buf.latest(), Some(8));
        assert_eq!(buf.len(), 1);
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.latest(), None);
    }

    #[test]
    fn mean_of_extreme_values_does_not_overflow() {
        let mut buf = RingBuffer::new(4);
        for _ in 0..4 {
            buf.push(Fixed64::MAX);
        }
        assert_eq!(buf.mean(), Fixed64::MAX);
        assert_eq!(buf.sum(), I64F64::from_num(Fixed64::MAX) * I64F64::from_num(4));
    }

    #[test]
    fn empty_mean_is_zero() {
        let buf: RingBuffer<Fixed64> = RingBuffer::new(5);
        assert_eq!(buf.mean(), Fixed64::ZERO);
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    #[test]
    fn records_one_entry_per_step() {
        let mut sim = motor_line_sim();
        let mut history = HistoryRecorder::new(small_config());
        for snap in sim.run(10, &mut GreedyPolicy).unwrap() {
            history.record(&snap);
        }

        assert_eq!(history.len(), 10);
        assert_eq!(history.scalars().clock, (1..=10).collect::<Vec<_>>());
        assert_eq!(history.stock_series("IronOre").unwrap().len(), 10);
        assert_eq!(history.device_series("CASTER-00").unwrap().state.len(), 10);
        assert_eq!(
            *history.scalars().total_balance.last().unwrap(),
            sim.total_balance()
        );
    }

    #[test]
    fn rolling_balance_uses_last_window() {
        let mut sim = motor_line_sim();
        let mut history = HistoryRecorder::new(small_config());
        let snaps = sim.run(10, &mut GreedyPolicy).unwrap();
        for snap in &snaps {
            history.record(snap);
        }

        let tail: Fixed64 = snaps[6..].iter().map(|s| s.step_balance).sum();
        let diff = (history.rolling_step_balance() - tail / fx(4.0)).abs();
        assert!(diff <= Fixed64::DELTA);
    }

    #[test]
    fn gantt_and_utilization_for_single_batch() {
        let mut sim = cast_iron_sim();
        let mut history = HistoryRecorder::default();
        for _ in 0..80 {
            history.record(&sim.step_keep().unwrap());
        }

        let series = history.device_series("CASTER-01").unwrap();
        // Running from the first step through the 60th; idle once credited.
        assert_eq!(series.running_steps, 60);
        assert_eq!(series.completed_batches, 1);
        assert_eq!(series.gantt[0].as_deref(), Some("Cast_Iron"));
        assert_eq!(series.gantt[60], None);

        let segments = history.gantt_segments("CASTER-01");
        assert_eq!(
            segments,
            vec![GanttSegment {
                recipe: "Cast_Iron".into(),
                start: 0,
                end: 60,
            }]
        );
        assert_eq!(history.utilization("CASTER-01"), Some(fx(60.0) / fx(80.0)));
        assert_eq!(history.utilization("CASTER-00"), Some(Fixed64::ZERO));
        assert_eq!(history.utilization("NOPE"), None);
        assert!(history.gantt_segments("CASTER-00").is_empty());
    }

    #[test]
    fn gantt_first_segment_starts_one_dt_back() {
        let mut sim = factory_core::engine::Simulation::builder(motor_line_catalog())
            .dt(10)
            .stock("IronOre", fx(30.0))
            .bind("CASTER-01", "Cast_Iron")
            .build()
            .unwrap();
        let mut history = HistoryRecorder::default();
        for _ in 0..3 {
            history.record(&sim.step_keep().unwrap());
        }

        assert_eq!(history.scalars().clock, vec![10, 20, 30]);
        let segments = history.gantt_segments("CASTER-01");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start, 0);
        assert_eq!(segments[0].end, 30);

        history.clear();
        history.record(&sim.step_keep().unwrap());
        assert_eq!(history.gantt_segments("CASTER-01")[0].start, 30);
    }

    #[test]
    fn custom_scalars_are_kept_separately() {
        let mut history = HistoryRecorder::default();
        history.log_scalar("reward", fx(1.5));
        history.log_scalar("reward", fx(-0.5));
        assert_eq!(history.custom_series("reward"), Some(&[fx(1.5), fx(-0.5)][..]));
        assert!(history.is_empty());
    }

    #[test]
    fn json_export_has_every_series() {
        let mut sim = motor_line_sim();
        let mut history = HistoryRecorder::default();
        for snap in sim.run(5, &mut GreedyPolicy).unwrap() {
            history.record(&snap);
        }
        history.log_scalar("reward", fx(2.0));

        let json = history.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["clock"].as_array().unwrap().len(), 5);
        assert_eq!(value["stock"]["IronOre"].as_array().unwrap().len(), 5);
        assert_eq!(value["devices"]["CASTER-00"]["state"][0], "running");
        assert_eq!(value["devices"]["CASTER-00"]["gantt"][0], "Cast_Iron");
        assert_eq!(value["custom"]["reward"][0], 2.0);
        assert!(value["total_balance"][0].is_f64());
    }

    #[test]
    fn clear_drops_data_but_keeps_config() {
        let mut sim = cast_iron_sim();
        let mut history = HistoryRecorder::new(small_config());
        history.record(&sim.step_keep().unwrap());
        history.clear();
        assert!(history.is_empty());
        assert!(history.device_series("CASTER-01").is_none());
        assert_eq!(history.rolling_step_balance(), Fixed64::ZERO);
        assert_eq!(history.config().balance_window, 4);
    }
}
