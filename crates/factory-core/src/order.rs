//! Due-time-ordered book of pending customer orders.
//!
//! Orders are stored in a [`SlotMap`] and indexed by a [`BTreeMap`] keyed on
//! `(absolute deadline, insertion sequence)`. Ticking the book moves a single
//! elapsed-time offset instead of touching every order, so `tick` is O(1) and
//! `insert` / `pop_due` are O(log n). Because every order's countdown shrinks
//! by the same amount, the index order is exactly ascending `due_time` with
//! ties broken by insertion order.

use crate::fixed::{Fixed64, Ticks};
use crate::id::{MaterialId, OrderId};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::BTreeMap;

/// A customer order as seen from outside the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub material: MaterialId,
    pub quantity: Fixed64,
    /// Countdown until settlement. Zero or negative means due.
    pub due_time: i64,
}

impl Order {
    pub fn new(material: MaterialId, quantity: Fixed64, due_time: i64) -> Self {
        Self {
            material,
            quantity,
            due_time,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingOrder {
    material: MaterialId,
    quantity: Fixed64,
    /// `due_time` expressed on the book's own elapsed-time axis.
    deadline: i64,
    seq: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    orders: SlotMap<OrderId, PendingOrder>,
    queue: BTreeMap<(i64, u64), OrderId>,
    elapsed: i64,
    next_seq: u64,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an order at the position that keeps the book sorted.
    pub fn insert(&mut self, order: Order) -> OrderId {
        let deadline = self.elapsed.saturating_add(order.due_time);
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = self.orders.insert(PendingOrder {
            material: order.material,
            quantity: order.quantity,
            deadline,
            seq,
        });
        self.queue.insert((deadline, seq), id);
        id
    }

    /// Count every pending order down by `dt`.
    pub fn tick(&mut self, dt: Ticks) {
        let dt = i64::try_from(dt).unwrap_or(i64::MAX);
        self.elapsed = self.elapsed.saturating_add(dt);
    }

    /// Remove and return, earliest first, every order whose countdown has
    /// reached zero. Stops at the first order still in the future: due orders
    /// always form a prefix of the book.
    pub fn pop_due(&mut self) -> Vec<(OrderId, Order)> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            let (deadline, _) = *entry.key();
            if deadline.saturating_sub(self.elapsed) > 0 {
                break;
            }
            let id = entry.remove();
            if let Some(pending) = self.orders.remove(id) {
                due.push((id, self.view(&pending)));
            }
        }
        due
    }

    /// Withdraw a pending order without settling it.
    pub fn cancel(&mut self, id: OrderId) -> Option<Order> {
        let pending = self.orders.remove(id)?;
        self.queue.remove(&(pending.deadline, pending.seq));
        Some(self.view(&pending))
    }

    pub fn get(&self, id: OrderId) -> Option<Order> {
        self.orders.get(id).map(|p| self.view(p))
    }

    /// Pending orders in settlement order.
    pub fn iter(&self) -> impl Iterator<Item = (OrderId, Order)> + '_ {
        self.queue.values().filter_map(move |&id| {
            self.orders.get(id).map(|p| (id, self.view(p)))
        })
    }

    /// Countdown of the next order to fall due.
    pub fn earliest_due(&self) -> Option<i64> {
        self.queue
            .keys()
            .next()
            .map(|&(deadline, _)| deadline.saturating_sub(self.elapsed))
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn view(&self, pending: &PendingOrder) -> Order {
        Order {
            material: pending.material,
            quantity: pending.quantity,
            due_time: pending.deadline.saturating_sub(self.elapsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOTOR: MaterialId = MaterialId(7);

    fn order(due: i64) -> Order {
        Order::new(MOTOR, Fixed64::from_num(1), due)
    }

    fn due_times(book: &OrderBook) -> Vec<i64> {
        book.iter().map(|(_, o)| o.due_time).collect()
    }

    #[test]
    fn insert_keeps_ascending_order() {
        let mut book = OrderBook::new();
        for due in [30, 5, 12, 5, 100, 0] {
            book.insert(order(due));
        }
        assert_eq!(due_times(&book), vec![0, 5, 5, 12, 30, 100]);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let mut book = OrderBook::new();
        let first = book.insert(Order::new(MaterialId(1), Fixed64::from_num(1), 10));
        let second = book.insert(Order::new(MaterialId(2), Fixed64::from_num(1), 10));
        let ids: Vec<OrderId> = book.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn tick_counts_every_order_down() {
        let mut book = OrderBook::new();
        book.insert(order(3));
        book.insert(order(8));
        book.tick(2);
        assert_eq!(due_times(&book), vec![1, 6]);
    }

    #[test]
    fn insert_after_tick_uses_current_countdown() {
        let mut book = OrderBook::new();
        book.insert(order(10));
        book.tick(4);
        book.insert(order(3));
        assert_eq!(due_times(&book), vec![3, 6]);
    }

    #[test]
    fn zero_due_order_pops_after_one_tick() {
        let mut book = OrderBook::new();
        book.insert(Order::new(MOTOR, Fixed64::from_num(5), 0));
        book.tick(1);
        assert_eq!(book.earliest_due(), Some(-1));

        let due = book.pop_due();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].1.due_time, -1);
        assert_eq!(due[0].1.quantity, Fixed64::from_num(5));
        assert!(book.is_empty());
    }

    #[test]
    fn pop_due_stops_at_first_future_order() {
        let mut book = OrderBook::new();
        book.insert(order(1));
        book.insert(order(2));
        book.insert(order(5));
        book.tick(2);
        let due = book.pop_due();
        assert_eq!(due.len(), 2);
        assert_eq!(due_times(&book), vec![3]);
    }

    #[test]
    fn pop_due_on_empty_book() {
        let mut book = OrderBook::new();
        assert!(book.pop_due().is_empty());
        assert_eq!(book.earliest_due(), None);
    }

    #[test]
    fn cancel_removes_from_index() {
        let mut book = OrderBook::new();
        let a = book.insert(order(1));
        book.insert(order(2));
        let cancelled = book.cancel(a).unwrap();
        assert_eq!(cancelled.due_time, 1);
        assert_eq!(book.len(), 1);
        assert!(book.get(a).is_none());
        assert!(book.cancel(a).is_none());
        book.tick(5);
        assert_eq!(book.pop_due().len(), 1);
    }
}
