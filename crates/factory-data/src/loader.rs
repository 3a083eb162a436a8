//! Resolution pipeline: reads data files, resolves cross-references, builds
//! the catalog and the initial simulation.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization helpers used by [`load_factory_data`].

use crate::schema::*;
use factory_core::catalog::{Catalog, CatalogBuilder, CatalogError, DeviceDef};
use factory_core::engine::Simulation;
use factory_core::error::SimError;
use factory_core::fixed::{Fixed64, checked_f64_to_fixed64};
use factory_core::id::{DeviceId, MaterialId, RecipeId};
use factory_core::price::{ENERGY, Price, RENT};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A name reference could not be resolved.
    #[error("unresolved {expected_kind} reference '{name}' in {file}")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    /// A number does not fit the simulation's fixed-point range.
    #[error("value {value} for '{name}' in {file} is out of range")]
    OutOfRange {
        file: PathBuf,
        name: String,
        value: f64,
    },

    /// A duplicate name was found.
    #[error("duplicate name '{name}' in {file}")]
    DuplicateName { file: PathBuf, name: String },

    /// The definitions parsed but do not form a valid catalog.
    #[error("invalid catalog: {0}")]
    Catalog(#[from] CatalogError),

    /// The initial state was rejected by the simulation builder.
    #[error("invalid initial state: {0}")]
    Sim(#[from] SimError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for `{base_name}.ron`, `.toml` or `.json`.
///
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// more than one format exists for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;

    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

/// Like [`find_data_file`], but returns an error if no file is found.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

fn parse_error(path: &Path, e: impl std::fmt::Display) -> DataLoadError {
    DataLoadError::Parse {
        file: path.to_path_buf(),
        detail: e.to_string(),
    }
}

/// Read a file and deserialize it according to its format.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(path, e)),
    }
}

/// Deserialize a list from a file. TOML has no top-level arrays, so for TOML
/// the array is read from `toml_key` of the top-level table. RON and JSON
/// hold the list directly.
pub fn deserialize_list<T: DeserializeOwned>(
    path: &Path,
    toml_key: &str,
) -> Result<Vec<T>, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => {
            let mut table: toml::Table =
                toml::from_str(&content).map_err(|e| parse_error(path, e))?;
            let array = table
                .remove(toml_key)
                .ok_or_else(|| parse_error(path, format!("missing key '{toml_key}' in TOML file")))?;
            array
                .try_into()
                .map_err(|e: toml::de::Error| parse_error(path, e))
        }
    }
}

/// Optional list file: an absent file is an empty list.
fn load_optional_list<T: DeserializeOwned>(
    dir: &Path,
    base_name: &str,
) -> Result<(Vec<T>, Option<PathBuf>), DataLoadError> {
    match find_data_file(dir, base_name)? {
        Some(path) => Ok((deserialize_list(&path, base_name)?, Some(path))),
        None => Ok((Vec::new(), None)),
    }
}

// ===========================================================================
// Name resolution helpers
// ===========================================================================

/// Look up a name in a map, returning an `UnresolvedRef` error if not found.
pub fn resolve_name<'a, V>(
    map: &'a HashMap<String, V>,
    name: &str,
    file: &Path,
    expected_kind: &'static str,
) -> Result<&'a V, DataLoadError> {
    map.get(name).ok_or_else(|| DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    })
}

/// Check whether a name already exists in a map, returning a `DuplicateName`
/// error if so.
pub fn check_duplicate<V>(
    map: &HashMap<String, V>,
    name: &str,
    file: &Path,
) -> Result<(), DataLoadError> {
    if map.contains_key(name) {
        Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

// ===========================================================================
// Loaded factory
// ===========================================================================

/// Every definition file of one factory directory, parsed but not yet
/// resolved against a catalog.
#[derive(Debug, Clone)]
pub struct FactoryData {
    pub devices: Vec<DeviceData>,
    pub recipes: Vec<RecipeData>,
    pub prices: Vec<PriceData>,
    pub stock: Vec<StockData>,
    pub orders: Vec<OrderData>,
    pub bindings: Vec<BindingData>,
    pub settings: SettingsData,
    devices_path: PathBuf,
    recipes_path: PathBuf,
    prices_path: Option<PathBuf>,
    stock_path: Option<PathBuf>,
    orders_path: Option<PathBuf>,
    bindings_path: Option<PathBuf>,
    settings_path: Option<PathBuf>,
}

/// Load a factory from `dir`.
///
/// `devices` and `recipes` are required; `prices`, `stock`, `orders`,
/// `bindings` and `settings` are optional. Each may be `.ron`, `.json` or
/// `.toml`, but only one format per base name.
pub fn load_factory_data(dir: &Path) -> Result<FactoryData, DataLoadError> {
    let devices_path = require_data_file(dir, "devices")?;
    let devices: Vec<DeviceData> = deserialize_list(&devices_path, "devices")?;

    let recipes_path = require_data_file(dir, "recipes")?;
    let recipes: Vec<RecipeData> = deserialize_list(&recipes_path, "recipes")?;

    let (prices, prices_path) = load_optional_list(dir, "prices")?;
    let (stock, stock_path) = load_optional_list(dir, "stock")?;
    let (orders, orders_path) = load_optional_list(dir, "orders")?;
    let (bindings, bindings_path) = load_optional_list(dir, "bindings")?;

    let settings_path = find_data_file(dir, "settings")?;
    let settings = match &settings_path {
        Some(path) => deserialize_file(path)?,
        None => SettingsData::default(),
    };

    debug!(
        dir = %dir.display(),
        devices = devices.len(),
        recipes = recipes.len(),
        prices = prices.len(),
        orders = orders.len(),
        "Factory data loaded"
    );

    Ok(FactoryData {
        devices,
        recipes,
        prices,
        stock,
        orders,
        bindings,
        settings,
        devices_path,
        recipes_path,
        prices_path,
        stock_path,
        orders_path,
        bindings_path,
        settings_path,
    })
}

impl FactoryData {
    /// Resolve device and recipe definitions into an immutable catalog.
    pub fn build_catalog(&self) -> Result<Catalog, DataLoadError> {
        let mut builder = CatalogBuilder::new();

        let mut device_names: HashMap<String, DeviceId> = HashMap::new();
        for d in &self.devices {
            check_duplicate(&device_names, &d.id, &self.devices_path)?;
            let upstream: Vec<&str> = d.upstream.iter().map(String::as_str).collect();
            let downstream: Vec<&str> = d.downstream.iter().map(String::as_str).collect();
            let id = builder.register_device(
                DeviceDef::new(&d.id, d.category)
                    .with_channels(d.in_ch, d.out_ch)
                    .with_upstream(&upstream)
                    .with_downstream(&downstream),
            );
            device_names.insert(d.id.clone(), id);
        }

        let mut recipe_names: HashMap<String, RecipeId> = HashMap::new();
        for r in &self.recipes {
            check_duplicate(&recipe_names, &r.name, &self.recipes_path)?;
            let inputs = entries(&r.inputs, &self.recipes_path)?;
            let outputs = entries(&r.outputs, &self.recipes_path)?;
            let id = builder.register_recipe(
                &r.name,
                r.category,
                r.cycle_time,
                to_fixed(r.power_kw, &self.recipes_path, &r.name)?,
                &borrowed(&inputs),
                &borrowed(&outputs),
            );
            recipe_names.insert(r.name.clone(), id);
        }

        Ok(builder.build()?)
    }

    /// Build the catalog and the simulation in its initial state.
    ///
    /// Names in prices, stock, orders and bindings are checked against the
    /// catalog first so errors point at the file that holds them.
    pub fn build_simulation(&self) -> Result<Simulation, DataLoadError> {
        let catalog = Arc::new(self.build_catalog()?);
        self.resolve_refs(&catalog)?;

        let settings_path = source(&self.settings_path, "settings");
        let prices_path = source(&self.prices_path, "prices");
        let stock_path = source(&self.stock_path, "stock");
        let orders_path = source(&self.orders_path, "orders");

        let mut builder = Simulation::builder(catalog)
            .dt(self.settings.dt)
            .initial_money(to_fixed(
                self.settings.initial_money,
                &settings_path,
                "initial_money",
            )?);
        if let Some(capacity) = self.settings.event_capacity {
            builder = builder.event_capacity(capacity);
        }
        for p in &self.prices {
            builder = builder.price(price_from(p, &prices_path)?);
        }
        for s in &self.stock {
            builder = builder.stock(&s.name, to_fixed(s.quantity, &stock_path, &s.name)?);
        }
        for b in &self.bindings {
            builder = builder.bind(&b.device, &b.recipe);
        }
        for o in &self.orders {
            let quantity = to_fixed(o.quantity, &orders_path, &o.name)?;
            builder = builder.order(&o.name, quantity, o.due_time);
        }

        Ok(builder.build()?)
    }

    fn resolve_refs(&self, catalog: &Catalog) -> Result<(), DataLoadError> {
        let materials: HashMap<String, MaterialId> = catalog
            .materials()
            .map(|(id, name)| (name.to_string(), id))
            .collect();
        let devices: HashMap<String, DeviceId> = catalog
            .devices()
            .map(|(id, d)| (d.id.clone(), id))
            .collect();
        let recipes: HashMap<String, RecipeId> = catalog
            .recipes()
            .map(|(id, r)| (r.name.clone(), id))
            .collect();

        if let Some(path) = &self.prices_path {
            for p in &self.prices {
                if p.name != ENERGY && p.name != RENT {
                    resolve_name(&materials, &p.name, path, "material")?;
                }
            }
        }
        if let Some(path) = &self.stock_path {
            for s in &self.stock {
                resolve_name(&materials, &s.name, path, "material")?;
            }
        }
        if let Some(path) = &self.orders_path {
            for o in &self.orders {
                resolve_name(&materials, &o.name, path, "material")?;
            }
        }
        if let Some(path) = &self.bindings_path {
            for b in &self.bindings {
                resolve_name(&devices, &b.device, path, "device")?;
                resolve_name(&recipes, &b.recipe, path, "recipe")?;
            }
        }
        Ok(())
    }
}

/// Path to report for a definition list, falling back to its base name when
/// the list was filled in code.
fn source(path: &Option<PathBuf>, base_name: &str) -> PathBuf {
    path.clone().unwrap_or_else(|| PathBuf::from(base_name))
}

fn to_fixed(value: f64, file: &Path, name: &str) -> Result<Fixed64, DataLoadError> {
    checked_f64_to_fixed64(value).ok_or_else(|| DataLoadError::OutOfRange {
        file: file.to_path_buf(),
        name: name.to_string(),
        value,
    })
}

fn entries(data: &[EntryData], file: &Path) -> Result<Vec<(String, Fixed64)>, DataLoadError> {
    data.iter()
        .map(|e| Ok((e.material().to_string(), to_fixed(e.quantity(), file, e.material())?)))
        .collect()
}

fn borrowed(entries: &[(String, Fixed64)]) -> Vec<(&str, Fixed64)> {
    entries.iter().map(|(m, q)| (m.as_str(), *q)).collect()
}

fn price_from(p: &PriceData, file: &Path) -> Result<Price, DataLoadError> {
    let mut price = Price::new(&p.name);
    if let Some(v) = p.price_buy {
        price = price.with_buy(to_fixed(v, file, &p.name)?);
    }
    if let Some(v) = p.price_sell {
        price = price.with_sell(to_fixed(v, file, &p.name)?);
    }
    if let Some(v) = p.storage_cost_per_time_unit {
        price = price.with_storage(to_fixed(v, file, &p.name)?);
    }
    Ok(price)
}

// ===========================================================================
// Tests
// ===========================================================================
