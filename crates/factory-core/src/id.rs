use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a pending order in the order book.
    pub struct OrderId;
}

/// Identifies a device in the catalog. Cheap to copy and compare; doubles as
/// the index of the device's runtime inside the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

/// Identifies a recipe in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecipeId(pub u32);

/// Identifies an interned material name in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MaterialId(pub u32);

impl DeviceId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl RecipeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl MaterialId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
