//! Immutable catalog of devices, recipes and material names.
//!
//! Built once through [`CatalogBuilder`], validated in [`CatalogBuilder::build`]
//! and then shared read-only (`Arc<Catalog>`) by the scheduler and the
//! simulation. Names are interned to small integer ids at registration time so
//! the step loop never looks anything up by string.

use crate::fixed::{Fixed64, Ticks};
use crate::id::{DeviceId, MaterialId, RecipeId};
use crate::sim::StateHash;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Device categories
// ---------------------------------------------------------------------------

/// The closed set of machine kinds. A recipe runs only on devices of its
/// category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    Caster,
    Constructor,
    Assembler,
    Manufacturer,
}

impl DeviceCategory {
    pub const ALL: [DeviceCategory; 4] = [
        DeviceCategory::Caster,
        DeviceCategory::Constructor,
        DeviceCategory::Assembler,
        DeviceCategory::Manufacturer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceCategory::Caster => "caster",
            DeviceCategory::Constructor => "constructor",
            DeviceCategory::Assembler => "assembler",
            DeviceCategory::Manufacturer => "manufacturer",
        }
    }
}

impl fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceCategory {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CatalogError::UnknownCategory(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A device definition. Topology fields are informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDef {
    pub id: String,
    pub category: DeviceCategory,
    pub in_ch: u32,
    pub out_ch: u32,
    pub upstream: Vec<String>,
    pub downstream: Vec<String>,
}

impl DeviceDef {
    /// A single-input, single-output device with no declared neighbours.
    pub fn new(id: &str, category: DeviceCategory) -> Self {
        Self {
            id: id.to_string(),
            category,
            in_ch: 1,
            out_ch: 1,
            upstream: Vec::new(),
            downstream: Vec::new(),
        }
    }

    pub fn with_channels(mut self, in_ch: u32, out_ch: u32) -> Self {
        self.in_ch = in_ch;
        self.out_ch = out_ch;
        self
    }

    pub fn with_upstream(mut self, ids: &[&str]) -> Self {
        self.upstream = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_downstream(mut self, ids: &[&str]) -> Self {
        self.downstream = ids.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// A recipe input/output entry: material and quantity per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecipeEntry {
    pub material: MaterialId,
    pub quantity: Fixed64,
}

/// A recipe definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeDef {
    pub name: String,
    pub category: DeviceCategory,
    /// Ticks per batch. Always positive after `build()`.
    pub cycle_time: Ticks,
    pub power_kw: Fixed64,
    pub inputs: Vec<RecipeEntry>,
    pub outputs: Vec<RecipeEntry>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for an immutable [`Catalog`].
///
/// Materials are interned on first mention, whether through
/// [`register_material`](Self::register_material) or a recipe entry.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    materials: Vec<String>,
    material_name_to_id: HashMap<String, MaterialId>,
    recipes: Vec<RecipeDef>,
    recipe_name_to_id: HashMap<String, RecipeId>,
    devices: Vec<DeviceDef>,
    device_name_to_id: HashMap<String, DeviceId>,
    duplicates: Vec<(&'static str, String)>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a material name. Registering the same name twice returns the
    /// same id.
    pub fn register_material(&mut self, name: &str) -> MaterialId {
        if let Some(&id) = self.material_name_to_id.get(name) {
            return id;
        }
        let id = MaterialId(self.materials.len() as u32);
        self.materials.push(name.to_string());
        self.material_name_to_id.insert(name.to_string(), id);
        id
    }

    /// Register a recipe. Input and output materials are interned.
    pub fn register_recipe(
        &mut self,
        name: &str,
        category: DeviceCategory,
        cycle_time: Ticks,
        power_kw: Fixed64,
        inputs: &[(&str, Fixed64)],
        outputs: &[(&str, Fixed64)],
    ) -> RecipeId {
        let inputs = self.intern_entries(inputs);
        let outputs = self.intern_entries(outputs);
        let id = RecipeId(self.recipes.len() as u32);
        self.recipes.push(RecipeDef {
            name: name.to_string(),
            category,
            cycle_time,
            power_kw,
            inputs,
            outputs,
        });
        if self.recipe_name_to_id.contains_key(name) {
            self.duplicates.push(("recipe", name.to_string()));
        } else {
            self.recipe_name_to_id.insert(name.to_string(), id);
        }
        id
    }

    /// Register a device.
    pub fn register_device(&mut self, device: DeviceDef) -> DeviceId {
        let id = DeviceId(self.devices.len() as u32);
        if self.device_name_to_id.contains_key(&device.id) {
            self.duplicates.push(("device", device.id.clone()));
        } else {
            self.device_name_to_id.insert(device.id.clone(), id);
        }
        self.devices.push(device);
        id
    }

    pub fn material_id(&self, name: &str) -> Option<MaterialId> {
        self.material_name_to_id.get(name).copied()
    }

    pub fn recipe_id(&self, name: &str) -> Option<RecipeId> {
        self.recipe_name_to_id.get(name).copied()
    }

    fn intern_entries(&mut self, entries: &[(&str, Fixed64)]) -> Vec<RecipeEntry> {
        entries
            .iter()
            .map(|&(name, quantity)| RecipeEntry {
                material: self.register_material(name),
                quantity,
            })
            .collect()
    }

    /// Validate and freeze the catalog.
    pub fn build(self) -> Result<Catalog, CatalogError> {
        if let Some((kind, name)) = self.duplicates.into_iter().next() {
            return Err(CatalogError::DuplicateName { kind, name });
        }

        for recipe in &self.recipes {
            validate_recipe(recipe)?;
            if !self.devices.iter().any(|d| d.category == recipe.category) {
                return Err(CatalogError::OrphanRecipe {
                    recipe: recipe.name.clone(),
                    category: recipe.category,
                });
            }
        }

        for device in &self.devices {
            for neighbour in device.upstream.iter().chain(device.downstream.iter()) {
                if !self.device_name_to_id.contains_key(neighbour) {
                    return Err(CatalogError::UnknownTopologyRef {
                        device: device.id.clone(),
                        reference: neighbour.clone(),
                    });
                }
            }
        }

        let mut allowed: BTreeMap<DeviceCategory, Vec<RecipeId>> = BTreeMap::new();
        for (index, recipe) in self.recipes.iter().enumerate() {
            allowed
                .entry(recipe.category)
                .or_default()
                .push(RecipeId(index as u32));
        }

        let mut catalog = Catalog {
            materials: self.materials,
            material_name_to_id: self.material_name_to_id,
            recipes: self.recipes,
            recipe_name_to_id: self.recipe_name_to_id,
            devices: self.devices,
            device_name_to_id: self.device_name_to_id,
            allowed,
            fingerprint: 0,
        };
        catalog.fingerprint = catalog.compute_fingerprint();
        Ok(catalog)
    }
}

fn validate_recipe(recipe: &RecipeDef) -> Result<(), CatalogError> {
    let invalid = |reason: String| CatalogError::InvalidRecipe {
        recipe: recipe.name.clone(),
        reason,
    };
    if recipe.cycle_time == 0 {
        return Err(invalid("cycle_time must be positive".into()));
    }
    if recipe.power_kw < Fixed64::ZERO {
        return Err(invalid(format!("negative power_kw {}", recipe.power_kw)));
    }
    for entry in recipe.inputs.iter().chain(recipe.outputs.iter()) {
        if entry.quantity <= Fixed64::ZERO {
            return Err(invalid(format!(
                "non-positive quantity {} for material #{}",
                entry.quantity, entry.material.0
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Immutable catalog. Has no `&mut self` methods once built.
#[derive(Debug)]
pub struct Catalog {
    materials: Vec<String>,
    material_name_to_id: HashMap<String, MaterialId>,
    recipes: Vec<RecipeDef>,
    recipe_name_to_id: HashMap<String, RecipeId>,
    devices: Vec<DeviceDef>,
    device_name_to_id: HashMap<String, DeviceId>,
    allowed: BTreeMap<DeviceCategory, Vec<RecipeId>>,
    fingerprint: u64,
}

impl Catalog {
    pub fn device(&self, id: DeviceId) -> Option<&DeviceDef> {
        self.devices.get(id.index())
    }

    pub fn recipe(&self, id: RecipeId) -> Option<&RecipeDef> {
        self.recipes.get(id.index())
    }

    pub fn material_name(&self, id: MaterialId) -> Option<&str> {
        self.materials.get(id.index()).map(String::as_str)
    }

    pub fn device_id(&self, name: &str) -> Option<DeviceId> {
        self.device_name_to_id.get(name).copied()
    }

    pub fn recipe_id(&self, name: &str) -> Option<RecipeId> {
        self.recipe_name_to_id.get(name).copied()
    }

    pub fn material_id(&self, name: &str) -> Option<MaterialId> {
        self.material_name_to_id.get(name).copied()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn recipe_count(&self) -> usize {
        self.recipes.len()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    /// Devices in registration order.
    pub fn devices(&self) -> impl Iterator<Item = (DeviceId, &DeviceDef)> {
        self.devices
            .iter()
            .enumerate()
            .map(|(i, d)| (DeviceId(i as u32), d))
    }

    /// Recipes in registration order.
    pub fn recipes(&self) -> impl Iterator<Item = (RecipeId, &RecipeDef)> {
        self.recipes
            .iter()
            .enumerate()
            .map(|(i, r)| (RecipeId(i as u32), r))
    }

    /// Material names in interning order.
    pub fn materials(&self) -> impl Iterator<Item = (MaterialId, &str)> {
        self.materials
            .iter()
            .enumerate()
            .map(|(i, m)| (MaterialId(i as u32), m.as_str()))
    }

    /// Recipes a device of `category` may run, in registration order.
    pub fn allowed_recipes(&self, category: DeviceCategory) -> &[RecipeId] {
        self.allowed
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_allowed(&self, category: DeviceCategory, recipe: RecipeId) -> bool {
        self.allowed_recipes(category).contains(&recipe)
    }

    /// Stable hash over every name and number in the catalog. Saved
    /// simulations record it so they are only restored against the catalog
    /// they were produced with.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    fn compute_fingerprint(&self) -> u64 {
        let mut h = StateHash::new();
        for name in &self.materials {
            h.write(name.as_bytes());
        }
        for recipe in &self.recipes {
            h.write(recipe.name.as_bytes());
            h.write_u32(recipe.category as u32);
            h.write_u64(recipe.cycle_time);
            h.write_fixed64(recipe.power_kw);
            for entry in recipe.inputs.iter().chain(recipe.outputs.iter()) {
                h.write_u32(entry.material.0);
                h.write_fixed64(entry.quantity);
            }
        }
        for device in &self.devices {
            h.write(device.id.as_bytes());
            h.write_u32(device.category as u32);
        }
        h.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },
    #[error("invalid recipe '{recipe}': {reason}")]
    InvalidRecipe { recipe: String, reason: String },
    #[error("recipe '{recipe}' targets category {category} but no device has it")]
    OrphanRecipe {
        recipe: String,
        category: DeviceCategory,
    },
    #[error("device '{device}' references unknown device '{reference}'")]
    UnknownTopologyRef { device: String, reference: String },
    #[error("unknown device category '{0}'")]
    UnknownCategory(String),
}
