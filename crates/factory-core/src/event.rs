//! Typed simulation events with per-kind ring buffers.
//!
//! Events are emitted while a step runs (binding, batch start, batch
//! completion, order settlement) and delivered in one batch at the end of the
//! step, after the snapshot has been taken. Each kind has its own
//! [`EventBuffer`]; listeners never observe a half-finished step.
//!
//! # Suppression
//!
//! Kinds can be suppressed via [`EventBus::suppress`], which drops their
//! buffer and skips recording entirely.

use crate::fixed::{Fixed64, Ticks};
use crate::id::{DeviceId, MaterialId, OrderId, RecipeId};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A simulation event. All events carry the clock value of the step that
/// produced them (the clock before it advanced).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The scheduler changed a device's bound recipe.
    RecipeBound {
        device: DeviceId,
        from: Option<RecipeId>,
        to: RecipeId,
        tick: Ticks,
    },
    /// The scheduler held an idle device for this step.
    DeviceHeld { device: DeviceId, tick: Ticks },
    BatchStarted {
        device: DeviceId,
        recipe: RecipeId,
        tick: Ticks,
    },
    BatchCompleted {
        device: DeviceId,
        recipe: RecipeId,
        tick: Ticks,
    },
    OrderSettled {
        order: OrderId,
        material: MaterialId,
        requested: Fixed64,
        delivered: Fixed64,
        result: Fixed64,
        tick: Ticks,
    },
}

/// Discriminant tag for event types, used for suppression and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RecipeBound,
    DeviceHeld,
    BatchStarted,
    BatchCompleted,
    OrderSettled,
}

const EVENT_KIND_COUNT: usize = 5;

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::RecipeBound { .. } => EventKind::RecipeBound,
            Event::DeviceHeld { .. } => EventKind::DeviceHeld,
            Event::BatchStarted { .. } => EventKind::BatchStarted,
            Event::BatchCompleted { .. } => EventKind::BatchCompleted,
            Event::OrderSettled { .. } => EventKind::OrderSettled,
        }
    }

    /// The step clock the event was recorded at.
    pub fn tick(&self) -> Ticks {
        match self {
            Event::RecipeBound { tick, .. }
            | Event::DeviceHeld { tick, .. }
            | Event::BatchStarted { tick, .. }
            | Event::BatchCompleted { tick, .. }
            | Event::OrderSettled { tick, .. } => *tick,
        }
    }

    /// The device the event concerns, if any.
    pub fn device(&self) -> Option<DeviceId> {
        match self {
            Event::RecipeBound { device, .. }
            | Event::DeviceHeld { device, .. }
            | Event::BatchStarted { device, .. }
            | Event::BatchCompleted { device, .. } => Some(*device),
            Event::OrderSettled { .. } => None,
        }
    }
}

impl EventKind {
    pub const ALL: [EventKind; EVENT_KIND_COUNT] = [
        EventKind::RecipeBound,
        EventKind::DeviceHeld,
        EventKind::BatchStarted,
        EventKind::BatchCompleted,
        EventKind::OrderSettled,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// Ring buffer
// ---------------------------------------------------------------------------

/// Fixed-capacity ring buffer. When full, the oldest event is overwritten.
#[derive(Debug)]
pub struct EventBuffer {
    events: Vec<Option<Event>>,
    head: usize,
    len: usize,
    total_written: u64,
    dropped: u64,
}

impl EventBuffer {
    /// Capacity is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            total_written: 0,
            dropped: 0,
        }
    }

    pub fn push(&mut self, event: Event) {
        let cap = self.capacity();
        self.events[self.head] = Some(event);
        self.head = (self.head + 1) % cap;
        if self.len < cap {
            self.len += 1;
        } else {
            self.dropped += 1;
        }
        self.total_written += 1;
    }

    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Events written since creation, including overwritten ones.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Events overwritten before delivery, since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Oldest to newest.
    pub fn iter(&self) -> EventBufferIter<'_> {
        let start = if self.len < self.capacity() { 0 } else { self.head };
        EventBufferIter {
            buffer: self,
            index: start,
            remaining: self.len,
        }
    }

    /// Empty the buffer. `total_written` and `dropped_count` are kept.
    pub fn clear(&mut self) {
        for slot in &mut self.events {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

pub struct EventBufferIter<'a> {
    buffer: &'a EventBuffer,
    index: usize,
    remaining: usize,
}

impl<'a> Iterator for EventBufferIter<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let event = self.buffer.events[self.index].as_ref();
        self.index = (self.index + 1) % self.buffer.capacity();
        self.remaining -= 1;
        event
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for EventBufferIter<'_> {}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// A passive listener receives events read-only.
pub type PassiveListener = Box<dyn FnMut(&Event)>;

/// Optional predicate that narrows what a listener receives.
pub type EventFilter = Box<dyn Fn(&Event) -> bool>;

struct ListenerEntry {
    listener: PassiveListener,
    filter: Option<EventFilter>,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// One lazily allocated ring buffer per event kind, plus listeners and
/// suppression flags.
pub struct EventBus {
    buffers: [Option<EventBuffer>; EVENT_KIND_COUNT],
    suppressed: [bool; EVENT_KIND_COUNT],
    listeners: [Vec<ListenerEntry>; EVENT_KIND_COUNT],
    default_capacity: usize,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listener_counts: Vec<usize> = self.listeners.iter().map(Vec::len).collect();
        f.debug_struct("EventBus")
            .field("buffers", &self.buffers)
            .field("suppressed", &self.suppressed)
            .field("listeners", &listener_counts)
            .field("default_capacity", &self.default_capacity)
            .finish()
    }
}

impl EventBus {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            buffers: Default::default(),
            suppressed: [false; EVENT_KIND_COUNT],
            listeners: Default::default(),
            default_capacity,
        }
    }

    /// Capacity given to each kind's buffer when first allocated.
    pub fn default_capacity(&self) -> usize {
        self.default_capacity
    }

    /// Stop recording a kind. Any buffered events of that kind are dropped.
    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = true;
        self.buffers[kind.index()] = None;
    }

    pub fn unsuppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = false;
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind.index()]
    }

    /// Buffer an event until the next [`deliver`](Self::deliver). No-op for
    /// suppressed kinds.
    pub fn emit(&mut self, event: Event) {
        let idx = event.kind().index();
        if self.suppressed[idx] {
            return;
        }
        let capacity = self.default_capacity;
        self.buffers[idx]
            .get_or_insert_with(|| EventBuffer::new(capacity))
            .push(event);
    }

    /// Register a listener for one kind. Listeners run in registration order.
    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) {
        self.on_passive_filtered(kind, None, listener);
    }

    pub fn on_passive_filtered(
        &mut self,
        kind: EventKind,
        filter: Option<EventFilter>,
        listener: PassiveListener,
    ) {
        self.listeners[kind.index()].push(ListenerEntry { listener, filter });
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners[kind.index()].len()
    }

    /// Hand every buffered event to its listeners, kind by kind in
    /// [`EventKind::ALL`] order and oldest first within a kind, then clear
    /// the buffers.
    pub fn deliver(&mut self) {
        for idx in 0..EVENT_KIND_COUNT {
            if self.suppressed[idx] {
                continue;
            }
            let Some(buffer) = self.buffers[idx].as_mut() else {
                continue;
            };
            if buffer.is_empty() {
                continue;
            }
            if !self.listeners[idx].is_empty() {
                for event in buffer.iter() {
                    for entry in &mut self.listeners[idx] {
                        if let Some(ref filter) = entry.filter
                            && !filter(event)
                        {
                            continue;
                        }
                        (entry.listener)(event);
                    }
                }
            }
            buffer.clear();
        }
    }

    /// Read-only view of one kind's buffer, if it was ever allocated.
    pub fn buffer(&self, kind: EventKind) -> Option<&EventBuffer> {
        self.buffers[kind.index()].as_ref()
    }

    pub fn buffered_count(&self, kind: EventKind) -> usize {
        self.buffers[kind.index()]
            .as_ref()
            .map(EventBuffer::len)
            .unwrap_or(0)
    }

    /// Events ever emitted for a kind, including dropped ones.
    pub fn total_emitted(&self, kind: EventKind) -> u64 {
        self.buffers[kind.index()]
            .as_ref()
            .map(EventBuffer::total_written)
            .unwrap_or(0)
    }

    /// Clear all buffers. Listeners and suppression flags are kept.
    pub fn clear_all(&mut self) {
        for buffer in self.buffers.iter_mut().flatten() {
            buffer.clear();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn started(device: u32, tick: Ticks) -> Event {
        Event::BatchStarted {
            device: DeviceId(device),
            recipe: RecipeId(0),
            tick,
        }
    }

    #[test]
    fn buffer_push_and_iterate() {
        let mut buf = EventBuffer::new(4);
        buf.push(started(0, 1));
        buf.push(started(1, 2));
        assert_eq!(buf.len(), 2);
        let ticks: Vec<Ticks> = buf.iter().map(Event::tick).collect();
        assert_eq!(ticks, vec![1, 2]);
    }

    #[test]
    fn buffer_overwrites_oldest_when_full() {
        let mut buf = EventBuffer::new(2);
        for t in 0..5 {
            buf.push(started(0, t));
        }
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.total_written(), 5);
        assert_eq!(buf.dropped_count(), 3);
        let ticks: Vec<Ticks> = buf.iter().map(Event::tick).collect();
        assert_eq!(ticks, vec![3, 4]);
    }

    #[test]
    fn delivered_events_are_not_counted_as_dropped() {
        let mut bus = EventBus::new(2);
        for t in 1..=3 {
            bus.emit(started(0, t));
            bus.deliver();
        }
        let buf = bus.buffer(EventKind::BatchStarted).unwrap();
        assert_eq!(buf.total_written(), 3);
        assert_eq!(buf.dropped_count(), 0);

        // Three events between deliveries overflow a two-slot buffer once.
        for t in 4..=6 {
            bus.emit(started(0, t));
        }
        let buf = bus.buffer(EventKind::BatchStarted).unwrap();
        assert_eq!(buf.dropped_count(), 1);
        bus.deliver();
        assert_eq!(bus.buffer(EventKind::BatchStarted).unwrap().dropped_count(), 1);
    }

    #[test]
    fn buffer_capacity_is_at_least_one() {
        let mut buf = EventBuffer::new(0);
        assert_eq!(buf.capacity(), 1);
        buf.push(started(0, 9));
        assert_eq!(buf.iter().len(), 1);
    }

    #[test]
    fn bus_delivers_to_listener_and_clears() {
        let mut bus = EventBus::new(16);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        bus.on_passive(
            EventKind::BatchStarted,
            Box::new(move |e| sink.borrow_mut().push(e.tick())),
        );

        bus.emit(started(0, 3));
        bus.emit(started(1, 3));
        assert_eq!(bus.buffered_count(EventKind::BatchStarted), 2);

        bus.deliver();
        assert_eq!(*seen.borrow(), vec![3, 3]);
        assert_eq!(bus.buffered_count(EventKind::BatchStarted), 0);
        assert_eq!(bus.total_emitted(EventKind::BatchStarted), 2);
    }

    #[test]
    fn listener_only_receives_its_kind() {
        let mut bus = EventBus::default();
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        bus.on_passive(EventKind::DeviceHeld, Box::new(move |_| *c.borrow_mut() += 1));

        bus.emit(started(0, 0));
        bus.emit(Event::DeviceHeld {
            device: DeviceId(2),
            tick: 0,
        });
        bus.deliver();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn filter_narrows_delivery() {
        let mut bus = EventBus::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        bus.on_passive_filtered(
            EventKind::BatchStarted,
            Some(Box::new(|e| e.device() == Some(DeviceId(1)))),
            Box::new(move |e| sink.borrow_mut().push(e.device())),
        );
        bus.emit(started(0, 0));
        bus.emit(started(1, 0));
        bus.deliver();
        assert_eq!(*seen.borrow(), vec![Some(DeviceId(1))]);
    }

    #[test]
    fn suppressed_kind_is_never_buffered() {
        let mut bus = EventBus::default();
        bus.suppress(EventKind::BatchStarted);
        bus.emit(started(0, 0));
        assert!(bus.buffer(EventKind::BatchStarted).is_none());
        assert!(bus.is_suppressed(EventKind::BatchStarted));

        bus.unsuppress(EventKind::BatchStarted);
        bus.emit(started(0, 1));
        assert_eq!(bus.buffered_count(EventKind::BatchStarted), 1);
    }

    #[test]
    fn clear_all_keeps_listeners() {
        let mut bus = EventBus::default();
        bus.on_passive(EventKind::BatchCompleted, Box::new(|_| {}));
        bus.emit(Event::BatchCompleted {
            device: DeviceId(0),
            recipe: RecipeId(0),
            tick: 0,
        });
        bus.clear_all();
        assert_eq!(bus.buffered_count(EventKind::BatchCompleted), 0);
        assert_eq!(bus.listener_count(EventKind::BatchCompleted), 1);
    }

    #[test]
    fn debug_does_not_require_listener_debug() {
        let mut bus = EventBus::new(4);
        bus.on_passive(EventKind::OrderSettled, Box::new(|_| {}));
        let s = format!("{bus:?}");
        assert!(s.contains("EventBus"));
    }
}
