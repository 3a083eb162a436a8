//! Static prices and the per-step economic settlement.
//!
//! The price book owns nothing but its price table. Each step it reads the
//! stock ledger, pulls due orders out of the order book, debits what can be
//! delivered and folds energy, storage and rent costs into one step balance.
//! Raw materials are free: there is no purchase cost.

use crate::catalog::Catalog;
use crate::error::{ConfigError, OverflowError};
use crate::fixed::{Fixed64, Ticks};
use crate::id::{MaterialId, OrderId};
use crate::order::{Order, OrderBook};
use crate::stock::StockLedger;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Price name whose `price_buy` is the cost of one kWh.
pub const ENERGY: &str = "energy";
/// Price name whose `price_buy` is the flat cost charged every step.
pub const RENT: &str = "rent";

/// A price entry. Absent fields mean "not tradable / not storable".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub name: String,
    pub price_buy: Option<Fixed64>,
    pub price_sell: Option<Fixed64>,
    pub storage_cost_per_time_unit: Option<Fixed64>,
}

impl Price {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            price_buy: None,
            price_sell: None,
            storage_cost_per_time_unit: None,
        }
    }

    pub fn with_buy(mut self, v: Fixed64) -> Self {
        self.price_buy = Some(v);
        self
    }

    pub fn with_sell(mut self, v: Fixed64) -> Self {
        self.price_sell = Some(v);
        self
    }

    pub fn with_storage(mut self, v: Fixed64) -> Self {
        self.storage_cost_per_time_unit = Some(v);
        self
    }
}

// ---------------------------------------------------------------------------
// Penalty hook
// ---------------------------------------------------------------------------

/// Money charged when a due order is delivered short. Called with the
/// material name and the undelivered quantity.
pub struct PenaltyHook(Box<dyn Fn(&str, Fixed64) -> Fixed64>);

impl PenaltyHook {
    pub fn new(f: impl Fn(&str, Fixed64) -> Fixed64 + 'static) -> Self {
        Self(Box::new(f))
    }

    /// The default hook: shortfalls cost nothing.
    pub fn zero() -> Self {
        Self::new(|_, _| Fixed64::ZERO)
    }

    pub fn apply(&self, material: &str, shortfall: Fixed64) -> Fixed64 {
        (self.0)(material, shortfall)
    }
}

impl Default for PenaltyHook {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for PenaltyHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PenaltyHook(..)")
    }
}

// ---------------------------------------------------------------------------
// Settlement results
// ---------------------------------------------------------------------------

/// How one due order was settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order: OrderId,
    pub material: MaterialId,
    pub price_sell: Fixed64,
    pub requested: Fixed64,
    pub delivered: Fixed64,
    pub sold_money: Fixed64,
    pub penalty: Fixed64,
    /// `sold_money - penalty`.
    pub result: Fixed64,
}

impl OrderResult {
    pub fn shortfall(&self) -> Fixed64 {
        self.requested - self.delivered
    }
}

/// The money side of one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub energy_cost: Fixed64,
    pub storage_cost: Fixed64,
    pub rent_cost: Fixed64,
    pub orders: Vec<OrderResult>,
}

impl Settlement {
    /// Sum of every order result this step.
    pub fn order_income(&self) -> Result<Fixed64, OverflowError> {
        self.orders
            .iter()
            .try_fold(Fixed64::ZERO, |acc, o| acc.checked_add(o.result))
            .ok_or(OverflowError::Money)
    }

    /// `Σ order_result - energy_cost - storage_cost - rent_cost`.
    pub fn step_balance(&self) -> Result<Fixed64, OverflowError> {
        self.order_income()?
            .checked_sub(self.energy_cost)
            .and_then(|v| v.checked_sub(self.storage_cost))
            .and_then(|v| v.checked_sub(self.rent_cost))
            .ok_or(OverflowError::Money)
    }
}

// ---------------------------------------------------------------------------
// Price book
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBook {
    /// Indexed by `MaterialId`.
    materials: Vec<Option<Price>>,
    energy: Option<Price>,
    rent: Option<Price>,
}

impl PriceBook {
    /// Resolve price names against the catalog. Every name must be a catalog
    /// material or one of [`ENERGY`] / [`RENT`].
    pub fn new(prices: Vec<Price>, catalog: &Catalog) -> Result<Self, ConfigError> {
        let mut book = PriceBook {
            materials: vec![None; catalog.material_count()],
            energy: None,
            rent: None,
        };
        for price in prices {
            match price.name.as_str() {
                ENERGY => book.energy = Some(price),
                RENT => book.rent = Some(price),
                name => {
                    let id = catalog
                        .material_id(name)
                        .ok_or_else(|| ConfigError::UnknownMaterial(name.to_string()))?;
                    book.materials[id.index()] = Some(price);
                }
            }
        }
        Ok(book)
    }

    pub fn price(&self, material: MaterialId) -> Option<&Price> {
        self.materials.get(material.index()).and_then(Option::as_ref)
    }

    pub fn price_sell(&self, material: MaterialId) -> Option<Fixed64> {
        self.price(material).and_then(|p| p.price_sell)
    }

    pub fn price_buy(&self, material: MaterialId) -> Option<Fixed64> {
        self.price(material).and_then(|p| p.price_buy)
    }

    pub fn storage_cost_per_time_unit(&self, material: MaterialId) -> Option<Fixed64> {
        self.price(material).and_then(|p| p.storage_cost_per_time_unit)
    }

    /// Cost of one kWh. Zero when no energy price is configured.
    pub fn energy_price(&self) -> Fixed64 {
        self.energy
            .as_ref()
            .and_then(|p| p.price_buy)
            .unwrap_or(Fixed64::ZERO)
    }

    pub fn step_energy_cost(&self, step_energy_kwh: Fixed64) -> Result<Fixed64, OverflowError> {
        step_energy_kwh
            .checked_mul(self.energy_price())
            .ok_or(OverflowError::Money)
    }

    /// `Σ quantity * storage_cost` over every material with a storage price.
    pub fn step_storage_cost(&self, stock: &StockLedger) -> Result<Fixed64, OverflowError> {
        stock
            .iter()
            .filter_map(|(m, qty)| self.storage_cost_per_time_unit(m).map(|c| (qty, c)))
            .try_fold(Fixed64::ZERO, |acc, (qty, c)| {
                acc.checked_add(qty.checked_mul(c)?)
            })
            .ok_or(OverflowError::Money)
    }

    /// Flat rent, independent of stock.
    pub fn step_rent_cost(&self) -> Fixed64 {
        self.rent
            .as_ref()
            .and_then(|p| p.price_buy)
            .unwrap_or(Fixed64::ZERO)
    }

    /// Deliver a batch of due orders out of stock.
    pub fn settle_orders(
        &self,
        stock: &mut StockLedger,
        due: Vec<(OrderId, Order)>,
        penalty: &PenaltyHook,
        catalog: &Catalog,
    ) -> Result<Vec<OrderResult>, OverflowError> {
        due.into_iter()
            .map(|(id, order)| -> Result<OrderResult, OverflowError> {
                let name = catalog.material_name(order.material).unwrap_or("?");
                let price_sell = self.price_sell(order.material).unwrap_or(Fixed64::ZERO);
                let delivered = stock.debit(order.material, order.quantity);
                let sold_money = delivered
                    .checked_mul(price_sell)
                    .ok_or(OverflowError::Money)?;
                let mut penalty_money = Fixed64::ZERO;
                if delivered < order.quantity {
                    let shortfall = order.quantity - delivered;
                    penalty_money = penalty.apply(name, shortfall);
                    warn!(
                        material = name,
                        requested = %order.quantity,
                        delivered = %delivered,
                        penalty = %penalty_money,
                        "Order delivered short"
                    );
                } else {
                    info!(
                        material = name,
                        quantity = %delivered,
                        sold_money = %sold_money,
                        "Order delivered"
                    );
                }
                Ok(OrderResult {
                    order: id,
                    material: order.material,
                    price_sell,
                    requested: order.quantity,
                    delivered,
                    sold_money,
                    penalty: penalty_money,
                    result: sold_money
                        .checked_sub(penalty_money)
                        .ok_or(OverflowError::Money)?,
                })
            })
            .collect()
    }

    /// Run the full settlement for one step: count the order book down by
    /// `dt`, deliver due orders, then charge storage on what is left plus
    /// energy and rent.
    ///
    /// Fails with [`OverflowError::Money`] when a cost or result leaves the
    /// `Fixed64` range; due orders have already left the book by then.
    pub fn settle(
        &self,
        stock: &mut StockLedger,
        orders: &mut OrderBook,
        dt: Ticks,
        step_energy_kwh: Fixed64,
        penalty: &PenaltyHook,
        catalog: &Catalog,
    ) -> Result<Settlement, OverflowError> {
        orders.tick(dt);
        let due = orders.pop_due();
        let order_results = self.settle_orders(stock, due, penalty, catalog)?;

        Ok(Settlement {
            energy_cost: self.step_energy_cost(step_energy_kwh)?,
            storage_cost: self.step_storage_cost(stock)?,
            rent_cost: self.step_rent_cost(),
            orders: order_results,
        })
    }
}
