use crate::catalog::RecipeEntry;
use crate::error::OverflowError;
use crate::fixed::Fixed64;
use crate::id::MaterialId;
use serde::{Deserialize, Serialize};

/// Running inventory: one non-negative balance per catalog material.
///
/// Indexed by [`MaterialId`]. Materials the ledger has never seen read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLedger {
    balances: Vec<Fixed64>,
}

impl StockLedger {
    /// A ledger with `material_count` zero balances.
    pub fn new(material_count: usize) -> Self {
        Self {
            balances: vec![Fixed64::ZERO; material_count],
        }
    }

    /// Current balance of a material.
    pub fn quantity(&self, material: MaterialId) -> Fixed64 {
        self.balances
            .get(material.index())
            .copied()
            .unwrap_or(Fixed64::ZERO)
    }

    /// Add `quantity` to a material. Negative amounts are ignored. Fails,
    /// leaving the balance untouched, when the sum leaves the `Fixed64` range.
    pub fn credit(&mut self, material: MaterialId, quantity: Fixed64) -> Result<(), OverflowError> {
        if quantity <= Fixed64::ZERO {
            return Ok(());
        }
        let idx = material.index();
        if idx >= self.balances.len() {
            self.balances.resize(idx + 1, Fixed64::ZERO);
        }
        self.balances[idx] = self.balances[idx]
            .checked_add(quantity)
            .ok_or(OverflowError::Stock)?;
        Ok(())
    }

    /// Credit every entry, or none of them if any would overflow.
    pub fn credit_all(&mut self, entries: &[RecipeEntry]) -> Result<(), OverflowError> {
        let mut staged = self.clone();
        for e in entries {
            staged.credit(e.material, e.quantity)?;
        }
        *self = staged;
        Ok(())
    }

    /// Remove up to `requested`. Returns the amount actually removed, which is
    /// less than requested when the balance runs short. Never drives the
    /// balance below zero.
    #[must_use = "returns the quantity actually removed, which may be less than requested"]
    pub fn debit(&mut self, material: MaterialId, requested: Fixed64) -> Fixed64 {
        if requested <= Fixed64::ZERO {
            return Fixed64::ZERO;
        }
        let Some(balance) = self.balances.get_mut(material.index()) else {
            return Fixed64::ZERO;
        };
        let delivered = requested.min(*balance);
        *balance -= delivered;
        delivered
    }

    /// Whether every entry can be debited in full. Does not mutate.
    pub fn can_cover(&self, entries: &[RecipeEntry]) -> bool {
        entries
            .iter()
            .all(|e| self.quantity(e.material) >= e.quantity)
    }

    /// Balances in material-id order.
    pub fn iter(&self) -> impl Iterator<Item = (MaterialId, Fixed64)> + '_ {
        self.balances
            .iter()
            .enumerate()
            .map(|(i, &q)| (MaterialId(i as u32), q))
    }

    /// Sum of all balances, or `None` if it leaves the `Fixed64` range.
    pub fn total(&self) -> Option<Fixed64> {
        self.balances
            .iter()
            .try_fold(Fixed64::ZERO, |acc, &q| acc.checked_add(q))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(v: f64) -> Fixed64 {
        Fixed64::from_num(v)
    }

    const ORE: MaterialId = MaterialId(0);
    const INGOT: MaterialId = MaterialId(1);

    #[test]
    fn credit_and_debit() {
        let mut stock = StockLedger::new(2);
        stock.credit(ORE, q(50.0)).unwrap();
        assert_eq!(stock.quantity(ORE), q(50.0));

        let delivered = stock.debit(ORE, q(30.0));
        assert_eq!(delivered, q(30.0));
        assert_eq!(stock.quantity(ORE), q(20.0));
    }

    #[test]
    fn debit_clamps_at_balance() {
        let mut stock = StockLedger::new(2);
        stock.credit(INGOT, q(4.0)).unwrap();
        let delivered = stock.debit(INGOT, q(10.0));
        assert_eq!(delivered, q(4.0));
        assert_eq!(stock.quantity(INGOT), Fixed64::ZERO);
    }

    #[test]
    fn debit_unknown_material_delivers_nothing() {
        let mut stock = StockLedger::new(1);
        assert_eq!(stock.debit(MaterialId(9), q(1.0)), Fixed64::ZERO);
    }

    #[test]
    fn debit_negative_request_is_noop() {
        let mut stock = StockLedger::new(1);
        stock.credit(ORE, q(3.0)).unwrap();
        assert_eq!(stock.debit(ORE, q(-2.0)), Fixed64::ZERO);
        assert_eq!(stock.quantity(ORE), q(3.0));
    }

    #[test]
    fn credit_grows_ledger() {
        let mut stock = StockLedger::new(0);
        stock.credit(MaterialId(3), q(1.0)).unwrap();
        assert_eq!(stock.quantity(MaterialId(3)), q(1.0));
        assert_eq!(stock.quantity(MaterialId(2)), Fixed64::ZERO);
    }

    #[test]
    fn can_cover_checks_every_entry() {
        let mut stock = StockLedger::new(2);
        stock.credit(ORE, q(30.0)).unwrap();
        stock.credit(INGOT, q(2.0)).unwrap();
        let need = [
            RecipeEntry { material: ORE, quantity: q(30.0) },
            RecipeEntry { material: INGOT, quantity: q(2.5) },
        ];
        assert!(!stock.can_cover(&need));
        stock.credit(INGOT, q(0.5)).unwrap();
        assert!(stock.can_cover(&need));
        // Checking never mutates.
        assert_eq!(stock.quantity(ORE), q(30.0));
    }

    #[test]
    fn total_sums_balances() {
        let mut stock = StockLedger::new(2);
        stock.credit(ORE, q(1.25)).unwrap();
        stock.credit(INGOT, q(2.0)).unwrap();
        assert_eq!(stock.total(), Some(q(3.25)));
    }

    #[test]
    fn credit_past_range_fails_without_change() {
        let mut stock = StockLedger::new(2);
        stock.credit(ORE, Fixed64::MAX - q(1.0)).unwrap();
        assert_eq!(stock.credit(ORE, q(2.0)), Err(OverflowError::Stock));
        assert_eq!(stock.quantity(ORE), Fixed64::MAX - q(1.0));
    }

    #[test]
    fn credit_all_is_all_or_nothing() {
        let mut stock = StockLedger::new(2);
        stock.credit(INGOT, Fixed64::MAX).unwrap();
        let out = [
            RecipeEntry { material: ORE, quantity: q(5.0) },
            RecipeEntry { material: INGOT, quantity: q(1.0) },
        ];
        assert_eq!(stock.credit_all(&out), Err(OverflowError::Stock));
        assert_eq!(stock.quantity(ORE), Fixed64::ZERO);
        assert_eq!(stock.total(), None);
    }
}
