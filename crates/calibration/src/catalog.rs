//! Catalog definitions: how rows of a catalog table become [`CatalogSource`]s,
//! and which magnitude expressions a catalog offers for non-native filters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use photocal_core::{CatalogSource, Mag};
use photocal_expr::{Context, Expr, ExprError};

/// Catalog magnitudes at or above this value are "no data" placeholders.
pub const MAG_NO_DATA: f64 = 99.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CatalogError {
    #[error("Unknown catalog \"{0}\"")]
    Unknown(String),

    #[error("Duplicate catalog \"{0}\"")]
    Duplicate(String),

    #[error("Unknown attribute \"{attr}\" in column mapping of catalog \"{catalog}\"")]
    UnknownAttribute { catalog: String, attr: String },

    #[error("Bad column definition \"{expr}\" for attribute \"{attr}\" of catalog \"{catalog}\": {source}")]
    BadColumnDefinition {
        catalog: String,
        attr: String,
        expr: String,
        #[source]
        source: ExprError,
    },
}

/// One cell of a catalog table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Null,
}

impl CellValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Null => None,
        }
    }

    fn into_text(self) -> Option<String> {
        match self {
            Self::Number(v) => Some(v.to_string()),
            Self::Text(s) => Some(s),
            Self::Null => None,
        }
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// A catalog table row keyed by column name.
pub type CatalogRow = BTreeMap<String, CellValue>;

const TEXT_ATTRS: &[&str] = &["id", "label"];
const NUMERIC_ATTRS: &[&str] = &[
    "ra_hours",
    "dec_degs",
    "pm_sky",
    "pm_pos_angle_sky",
    "x",
    "y",
    "pm_pixel",
    "pm_pos_angle_pixel",
    "fwhm_x",
    "fwhm_y",
    "theta",
    "mag",
    "mag_error",
];

fn default_col_mapping() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("ra_hours".to_string(), "RAJ2000/15".to_string()),
        ("dec_degs".to_string(), "DEJ2000".to_string()),
    ])
}

/// Definition of a reference catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub num_sources: Option<u64>,
    /// Standard band → `[magnitude column, error column]`; either may be missing.
    #[serde(default)]
    pub mags: BTreeMap<String, Vec<String>>,
    /// Filter → magnitude expression over this catalog's bands.
    #[serde(default)]
    pub filter_lookup: BTreeMap<String, String>,
    /// Source attribute → column name or expression over columns.
    #[serde(default = "default_col_mapping")]
    pub col_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub extra_cols: Vec<String>,
}

impl CatalogDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            num_sources: None,
            mags: BTreeMap::new(),
            filter_lookup: BTreeMap::new(),
            col_mapping: default_col_mapping(),
            extra_cols: Vec::new(),
        }
    }

    pub fn with_mag(mut self, band: &str, column: &str, error_column: Option<&str>) -> Self {
        let mut columns = vec![column.to_string()];
        columns.extend(error_column.map(str::to_string));
        self.mags.insert(band.to_string(), columns);
        self
    }

    pub fn with_filter_lookup(mut self, filter: &str, expr: &str) -> Self {
        self.filter_lookup.insert(filter.to_string(), expr.to_string());
        self
    }

    pub fn with_col_mapping(mut self, attr: &str, expr: &str) -> Self {
        self.col_mapping.insert(attr.to_string(), expr.to_string());
        self
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Check the column mapping.
    ///
    /// Entries that do not parse as expressions are taken as literal column
    /// names; expressions calling unknown functions are rejected.
    pub fn validate(&self) -> Result<(), CatalogError> {
        for (attr, expr) in &self.col_mapping {
            if !TEXT_ATTRS.contains(&attr.as_str()) && !NUMERIC_ATTRS.contains(&attr.as_str()) {
                return Err(CatalogError::UnknownAttribute {
                    catalog: self.name.clone(),
                    attr: attr.clone(),
                });
            }
            match Expr::parse(expr) {
                Ok(_) | Err(ExprError::Parse { .. }) => {}
                Err(source) => {
                    return Err(CatalogError::BadColumnDefinition {
                        catalog: self.name.clone(),
                        attr: attr.clone(),
                        expr: expr.clone(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Table columns needed to build sources.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        for expr in self.col_mapping.values() {
            match Expr::parse(expr) {
                Ok(parsed) => columns.extend(parsed.variables()),
                Err(_) => columns.push(expr.clone()),
            }
        }
        columns.extend(self.extra_cols.iter().cloned());
        for (mag_col, err_col) in self.mags.values().filter_map(|cols| mag_columns(cols)) {
            columns.push(mag_col.to_string());
            columns.extend(err_col.map(str::to_string));
        }
        columns
    }

    /// Convert table rows; rows without any usable magnitude are dropped.
    pub fn table_to_sources(&self, rows: &[CatalogRow]) -> Vec<CatalogSource> {
        let mapping: Vec<(&str, &str, Option<Expr>)> = self
            .col_mapping
            .iter()
            .map(|(attr, expr)| (attr.as_str(), expr.as_str(), Expr::parse(expr).ok()))
            .collect();

        rows.iter()
            .filter_map(|row| {
                let mut source = CatalogSource {
                    catalog_name: Some(self.name.clone()),
                    ..CatalogSource::default()
                };
                for (attr, expr, parsed) in &mapping {
                    if let Some(value) = column_value(row, expr, parsed.as_ref()) {
                        set_attribute(&mut source, attr, value);
                    }
                }
                for (band, cols) in &self.mags {
                    if let Some(mag) = mags_from_row(row, cols) {
                        source.mags.insert(band.clone(), mag);
                    }
                }
                (!source.mags.is_empty()).then_some(source)
            })
            .collect()
    }
}

fn mag_columns(cols: &[String]) -> Option<(&str, Option<&str>)> {
    let mag_col = cols.first().filter(|c| !c.is_empty())?;
    let err_col = cols.get(1).filter(|c| !c.is_empty());
    Some((mag_col, err_col.map(String::as_str)))
}

fn column_value(row: &CatalogRow, expr: &str, parsed: Option<&Expr>) -> Option<CellValue> {
    if let Some(cell) = row.get(expr) {
        return Some(cell.clone());
    }
    let parsed = parsed?;
    let ctx: Context = row
        .iter()
        .filter_map(|(name, cell)| cell.as_f64().map(|v| (name.as_str(), v)))
        .collect();
    match parsed.eval(&ctx) {
        Ok(value) => Some(CellValue::Number(value)),
        Err(error) => {
            debug!(expr, error = %error, "column expression not evaluated");
            None
        }
    }
}

fn set_attribute(source: &mut CatalogSource, attr: &str, value: CellValue) {
    if TEXT_ATTRS.contains(&attr) {
        let text = value.into_text();
        match attr {
            "id" => source.id = text,
            _ => source.label = text,
        }
        return;
    }
    let Some(value) = value.as_f64() else {
        return;
    };
    let a = &mut source.astrometry;
    let slot = match attr {
        "ra_hours" => &mut a.ra_hours,
        "dec_degs" => &mut a.dec_degs,
        "pm_sky" => &mut a.pm_sky,
        "pm_pos_angle_sky" => &mut a.pm_pos_angle_sky,
        "x" => &mut a.x,
        "y" => &mut a.y,
        "pm_pixel" => &mut a.pm_pixel,
        "pm_pos_angle_pixel" => &mut a.pm_pos_angle_pixel,
        "fwhm_x" => &mut a.fwhm_x,
        "fwhm_y" => &mut a.fwhm_y,
        "theta" => &mut a.theta,
        "mag" => &mut source.mag,
        "mag_error" => &mut source.mag_error,
        _ => return,
    };
    *slot = Some(value);
}

fn mags_from_row(row: &CatalogRow, cols: &[String]) -> Option<Mag> {
    let (mag_col, err_col) = mag_columns(cols)?;
    let lookup = |col: &str| row.get(&col.replace('\'', "_")).and_then(CellValue::as_f64);

    let value = lookup(mag_col).filter(|v| *v != 0.0 && *v < MAG_NO_DATA)?;
    let mut mag = Mag::new(value);
    mag.error = err_col.and_then(lookup).filter(|e| *e != 0.0);
    Some(mag)
}

/// Catalog definitions by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogRegistry {
    catalogs: BTreeMap<String, CatalogDefinition>,
}

impl CatalogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON array of catalog definitions, as found in host config.
    pub fn from_json(value: serde_json::Value) -> anyhow::Result<Self> {
        let definitions: Vec<CatalogDefinition> = serde_json::from_value(value)?;
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, definition: CatalogDefinition) -> Result<(), CatalogError> {
        definition.validate()?;
        if self.catalogs.contains_key(&definition.name) {
            return Err(CatalogError::Duplicate(definition.name));
        }
        self.catalogs.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&CatalogDefinition, CatalogError> {
        self.catalogs
            .get(name)
            .ok_or_else(|| CatalogError::Unknown(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.catalogs.keys().map(String::as_str)
    }

    /// Default magnitude expression of `catalog` for `filter`.
    pub fn filter_expression(&self, catalog: &str, filter: &str) -> Option<&str> {
        self.catalogs
            .get(catalog)
            .and_then(|definition| definition.filter_lookup.get(filter))
            .map(String::as_str)
    }
}
