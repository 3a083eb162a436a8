//! Serde data file structs for factory definitions.
//!
//! These structs define the on-disk format for devices, recipes, prices,
//! initial stock, orders, bindings and run settings. They are deserialized
//! from RON, JSON, or TOML data files and then resolved into core types by
//! the loader.

use factory_core::catalog::DeviceCategory;
use serde::Deserialize;

// ===========================================================================
// Catalog: Devices
// ===========================================================================

/// A device definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceData {
    pub id: String,
    pub category: DeviceCategory,
    #[serde(default = "default_channels")]
    pub in_ch: u32,
    #[serde(default = "default_channels")]
    pub out_ch: u32,
    #[serde(default)]
    pub upstream: Vec<String>,
    #[serde(default)]
    pub downstream: Vec<String>,
}

fn default_channels() -> u32 {
    1
}

// ===========================================================================
// Catalog: Recipes
// ===========================================================================

/// A recipe input or output entry, in short tuple form or full form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EntryData {
    /// Short form: `("material_name", quantity)`.
    Short(String, f64),
    /// Full form with explicit fields.
    Full { material: String, quantity: f64 },
}

impl EntryData {
    pub fn material(&self) -> &str {
        match self {
            EntryData::Short(material, _) | EntryData::Full { material, .. } => material,
        }
    }

    pub fn quantity(&self) -> f64 {
        match self {
            EntryData::Short(_, quantity) | EntryData::Full { quantity, .. } => *quantity,
        }
    }
}

/// A recipe definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipeData {
    pub name: String,
    #[serde(alias = "device_category")]
    pub category: DeviceCategory,
    /// Ticks per batch.
    pub cycle_time: u64,
    pub power_kw: f64,
    #[serde(default)]
    pub inputs: Vec<EntryData>,
    #[serde(default)]
    pub outputs: Vec<EntryData>,
}

// ===========================================================================
// Runtime: Prices, stock, orders, bindings
// ===========================================================================

/// A price row. `name` is a material, `energy` or `rent`.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceData {
    pub name: String,
    #[serde(default)]
    pub price_buy: Option<f64>,
    #[serde(default)]
    pub price_sell: Option<f64>,
    #[serde(default)]
    pub storage_cost_per_time_unit: Option<f64>,
}

/// Initial quantity of one material.
#[derive(Debug, Clone, Deserialize)]
pub struct StockData {
    pub name: String,
    pub quantity: f64,
}

/// A customer order queued before the first step.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderData {
    pub name: String,
    pub quantity: f64,
    pub due_time: i64,
}

/// A device bound to a recipe before the first step.
#[derive(Debug, Clone, Deserialize)]
pub struct BindingData {
    pub device: String,
    pub recipe: String,
}

// ===========================================================================
// Settings
// ===========================================================================

/// Run-wide settings. Every field is optional in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsData {
    #[serde(default = "default_dt")]
    pub dt: u64,
    #[serde(default)]
    pub initial_money: f64,
    #[serde(default)]
    pub event_capacity: Option<usize>,
}

fn default_dt() -> u64 {
    1
}

impl Default for SettingsData {
    fn default() -> Self {
        Self {
            dt: default_dt(),
            initial_money: 0.0,
            event_capacity: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_defaults_to_single_channel() {
        let d: DeviceData =
            ron::from_str(r#"(id: "CASTER-00", category: caster)"#).unwrap();
        assert_eq!(d.category, DeviceCategory::Caster);
        assert_eq!((d.in_ch, d.out_ch), (1, 1));
        assert!(d.upstream.is_empty());
    }

    #[test]
    fn recipe_short_entries_from_ron() {
        let r: RecipeData = ron::from_str(
            r#"(
                name: "Cast_Iron",
                category: caster,
                cycle_time: 60,
                power_kw: 45.0,
                inputs: [("IronOre", 30.0)],
                outputs: [("IronIngot", 30.0)],
            )"#,
        )
        .unwrap();
        assert_eq!(r.inputs[0].material(), "IronOre");
        assert_eq!(r.outputs[0].quantity(), 30.0);
    }

    #[test]
    fn recipe_full_entries_from_json() {
        let r: RecipeData = serde_json::from_str(
            r#"{
                "name": "MotorFinal",
                "device_category": "manufacturer",
                "cycle_time": 25,
                "power_kw": 30,
                "inputs": [{"material": "Rotor", "quantity": 2}],
                "outputs": [["Motor", 1]]
            }"#,
        )
        .unwrap();
        assert_eq!(r.category, DeviceCategory::Manufacturer);
        assert_eq!(r.power_kw, 30.0);
        assert_eq!(r.inputs[0].material(), "Rotor");
        assert_eq!(r.inputs[0].quantity(), 2.0);
        assert_eq!(r.outputs[0].material(), "Motor");
    }

    #[test]
    fn unknown_category_fails() {
        let r: Result<DeviceData, _> =
            serde_json::from_str(r#"{"id": "X", "category": "smelter"}"#);
        assert!(r.is_err());
    }

    #[test]
    fn price_fields_are_optional() {
        let p: PriceData = toml::from_str(r#"name = "rent"
price_buy = 0.25"#)
        .unwrap();
        assert_eq!(p.price_buy, Some(0.25));
        assert_eq!(p.price_sell, None);
        assert_eq!(p.storage_cost_per_time_unit, None);
    }

    #[test]
    fn settings_default() {
        let s: SettingsData = serde_json::from_str("{}").unwrap();
        assert_eq!(s.dt, 1);
        assert_eq!(s.initial_money, 0.0);
        assert!(s.event_capacity.is_none());
    }
}
