//! Reference (catalog) magnitudes in the image's filter.

use std::collections::BTreeMap;

use tracing::trace;

use photocal_core::Mag;
use photocal_expr::{Context, Expr, ExprResult};

use crate::catalog::CatalogRegistry;
use crate::settings::FilterLookupTable;

/// Step used for numerical derivatives of magnitude expressions.
pub const MAG_EPSILON: f64 = 1e-7;

/// Finds the magnitude expression for a (filter, catalog) pair.
///
/// Job-level custom expressions take precedence over the catalog's defaults.
#[derive(Debug, Clone, Copy)]
pub struct FilterLookup<'a> {
    custom: Option<&'a FilterLookupTable>,
    catalogs: &'a CatalogRegistry,
}

impl<'a> FilterLookup<'a> {
    pub fn new(custom: Option<&'a FilterLookupTable>, catalogs: &'a CatalogRegistry) -> Self {
        Self { custom, catalogs }
    }

    pub fn expression(&self, filter: &str, catalog_name: &str) -> Option<&'a str> {
        self.custom
            .and_then(|table| table.get(filter))
            .and_then(|by_catalog| by_catalog.get(catalog_name))
            .map(String::as_str)
            .or_else(|| self.catalogs.filter_expression(catalog_name, filter))
    }
}

/// Reference magnitude of a source observed through `filter`.
///
/// An expression registered for the filter and catalog is evaluated over the
/// source's catalog magnitudes. When there is none, or it cannot be evaluated,
/// the magnitude stored under the filter name is used directly. `None` means
/// the source cannot serve as a calibrator.
pub fn resolve_reference_mag(
    filter: Option<&str>,
    catalog_name: Option<&str>,
    mags: &BTreeMap<String, Mag>,
    lookup: &FilterLookup<'_>,
) -> Option<Mag> {
    let filter = filter?;
    if let Some(expr) = catalog_name.and_then(|catalog| lookup.expression(filter, catalog)) {
        match evaluate_expression(expr, mags) {
            Ok(mag) => return Some(mag),
            Err(error) => trace!(filter, expr, error = %error, "falling back to catalog band"),
        }
    }
    mags.get(filter)
        .copied()
        .filter(|mag| mag.value.is_some_and(f64::is_finite))
}

/// Evaluate a magnitude expression, with its error propagated from the band errors.
pub fn evaluate_expression(expr: &str, mags: &BTreeMap<String, Mag>) -> ExprResult<Mag> {
    let expr = Expr::parse(expr)?;
    let ctx: Context = mags
        .iter()
        .filter_map(|(band, mag)| mag.value.map(|value| (band.clone(), value)))
        .collect();
    let value = expr.eval(&ctx)?;
    Ok(Mag {
        value: Some(value),
        error: propagate_error(&expr, &ctx, value, mags),
    })
}

/// First-order error propagation: `sqrt(Σ (∂f/∂band · σ_band)²)`, with each
/// partial derivative taken by forward difference.
///
/// `None` when no band contributes.
pub fn propagate_error(
    expr: &Expr,
    ctx: &Context,
    value: f64,
    mags: &BTreeMap<String, Mag>,
) -> Option<f64> {
    let variance: f64 = mags
        .iter()
        .filter(|(band, _)| ctx.contains(band))
        .filter_map(|(band, mag)| {
            let error = mag.error?;
            let shifted = expr.eval(&ctx.perturbed(band, MAG_EPSILON)).ok()?;
            let derivative = (shifted - value) / MAG_EPSILON;
            Some((derivative * error).powi(2))
        })
        .sum();
    (variance > 0.0).then(|| variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogDefinition;

    fn mags() -> BTreeMap<String, Mag> {
        BTreeMap::from([
            ("B".to_string(), Mag::new(12.0).with_error(0.1)),
            ("R".to_string(), Mag::new(10.0).with_error(0.2)),
            ("V".to_string(), Mag::new(11.0)),
        ])
    }

    fn custom() -> FilterLookupTable {
        BTreeMap::from([(
            "Open".to_string(),
            BTreeMap::from([("APASS".to_string(), "(3*B + 5*R)/8".to_string())]),
        )])
    }

    #[test]
    fn expression_value_and_propagated_error() {
        let registry = CatalogRegistry::new();
        let table = custom();
        let lookup = FilterLookup::new(Some(&table), &registry);

        let mag = resolve_reference_mag(Some("Open"), Some("APASS"), &mags(), &lookup).unwrap();

        assert!((mag.value.unwrap() - 10.75).abs() < 1e-12);
        let expected = ((0.375f64 * 0.1).powi(2) + (0.625f64 * 0.2).powi(2)).sqrt();
        assert!((mag.error.unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn failing_expression_falls_back_to_band() {
        let registry = CatalogRegistry::new();
        let table = BTreeMap::from([(
            "V".to_string(),
            BTreeMap::from([("APASS".to_string(), "B - Ic".to_string())]),
        )]);
        let lookup = FilterLookup::new(Some(&table), &registry);

        let mag = resolve_reference_mag(Some("V"), Some("APASS"), &mags(), &lookup).unwrap();
        assert_eq!(mag, Mag::new(11.0));
    }

    #[test]
    fn missing_band_means_no_reference() {
        let registry = CatalogRegistry::new();
        let lookup = FilterLookup::new(None, &registry);

        assert!(resolve_reference_mag(Some("I"), Some("APASS"), &mags(), &lookup).is_none());
        assert!(resolve_reference_mag(None, Some("APASS"), &mags(), &lookup).is_none());
    }

    #[test]
    fn catalog_default_expression_is_used() {
        let mut registry = CatalogRegistry::new();
        registry
            .register(CatalogDefinition::new("APASS").with_filter_lookup("Open", "(B + R)/2"))
            .unwrap();
        let lookup = FilterLookup::new(None, &registry);

        let mag = resolve_reference_mag(Some("Open"), Some("APASS"), &mags(), &lookup).unwrap();
        assert_eq!(mag.value, Some(11.0));
    }

    #[test]
    fn custom_table_overrides_catalog_default() {
        let mut registry = CatalogRegistry::new();
        registry
            .register(CatalogDefinition::new("APASS").with_filter_lookup("Open", "(B + R)/2"))
            .unwrap();
        let table = custom();
        let lookup = FilterLookup::new(Some(&table), &registry);

        assert_eq!(lookup.expression("Open", "APASS"), Some("(3*B + 5*R)/8"));
        assert_eq!(lookup.expression("Open", "SDSS"), None);
    }

    #[test]
    fn error_is_absent_without_band_errors() {
        let bands = BTreeMap::from([("V".to_string(), Mag::new(11.0))]);
        let mag = evaluate_expression("V - 0.1", &bands).unwrap();
        assert_eq!(mag.error, None);
    }
}
