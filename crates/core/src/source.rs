//! Source records flowing through the calibration pipeline.
//!
//! Two shapes exist:
//! - [`CatalogSource`]: a reference object supplied by the caller, with
//!   multi-band magnitudes.
//! - [`Source`]: a per-image record produced by extraction or photometry, which
//!   accumulates catalog identity and reference magnitudes as it moves through
//!   the pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::FileId;

/// A magnitude with an optional error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Mag {
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub error: Option<f64>,
}

impl Mag {
    pub fn new(value: f64) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    pub fn with_error(mut self, error: f64) -> Self {
        self.error = Some(error);
        self
    }
}

/// Positional and shape data shared by catalog and extracted sources.
///
/// Units: RA in hours, Dec in degrees, pixel coordinates 1-based (FITS
/// convention), `theta` in degrees. Proper motions are per second: `pm_sky`
/// in degrees with `pm_pos_angle_sky` east of north, `pm_pixel` in pixels with
/// `pm_pos_angle_pixel` counter-clockwise from +X. `pm_epoch` is the epoch the
/// positions refer to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Astrometry {
    pub ra_hours: Option<f64>,
    pub dec_degs: Option<f64>,
    pub pm_sky: Option<f64>,
    pub pm_pos_angle_sky: Option<f64>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub pm_pixel: Option<f64>,
    pub pm_pos_angle_pixel: Option<f64>,
    pub pm_epoch: Option<DateTime<Utc>>,
    pub fwhm_x: Option<f64>,
    pub fwhm_y: Option<f64>,
    pub theta: Option<f64>,
}

/// Uniqueness key of a source within a working set.
///
/// `file_id == None` means the id applies to every image of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey {
    pub id: String,
    pub file_id: Option<FileId>,
}

impl core::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.file_id {
            Some(file_id) => write!(f, "\"{}\" for file ID {}", self.id, file_id),
            None => write!(f, "\"{}\"", self.id),
        }
    }
}

/// Reference ("catalog") source supplied with a calibration job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSource {
    pub id: Option<String>,
    /// Pins the source to one image; unpinned sources apply to all images.
    pub file_id: Option<FileId>,
    pub catalog_name: Option<String>,
    pub label: Option<String>,
    #[serde(flatten)]
    pub astrometry: Astrometry,
    /// Instrumental magnitude, used when photometry is disabled.
    pub mag: Option<f64>,
    pub mag_error: Option<f64>,
    /// Catalog magnitudes by band name.
    pub mags: BTreeMap<String, Mag>,
}

impl CatalogSource {
    pub fn key(&self) -> Option<SourceKey> {
        self.id.as_ref().map(|id| SourceKey {
            id: id.clone(),
            file_id: self.file_id,
        })
    }

    /// Whether the source takes part in calibrating the given image.
    pub fn applies_to(&self, file_id: FileId) -> bool {
        self.file_id.is_none_or(|pinned| pinned == file_id)
    }
}

/// Per-image source record produced by extraction or photometry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    pub id: Option<String>,
    pub file_id: Option<FileId>,
    pub time: Option<DateTime<Utc>>,
    pub filter: Option<String>,
    pub telescope: Option<String>,
    pub exp_length: Option<f64>,
    #[serde(flatten)]
    pub astrometry: Astrometry,
    pub flux: Option<f64>,
    pub mag: Option<f64>,
    pub mag_error: Option<f64>,
    pub ref_mag: Option<f64>,
    pub ref_mag_error: Option<f64>,
    pub catalog_name: Option<String>,
    pub label: Option<String>,
    pub mags: BTreeMap<String, Mag>,
}

impl Source {
    /// Build a photometry record directly from a caller-supplied catalog source.
    pub fn from_catalog(source: &CatalogSource) -> Self {
        Self {
            id: source.id.clone(),
            file_id: source.file_id,
            astrometry: source.astrometry.clone(),
            mag: source.mag,
            mag_error: source.mag_error,
            catalog_name: source.catalog_name.clone(),
            label: source.label.clone(),
            mags: source.mags.clone(),
            ..Self::default()
        }
    }

    /// Copy catalog identity and photometric metadata onto this record.
    ///
    /// Positions and shape stay untouched; only fields present on the catalog
    /// source overwrite existing values.
    pub fn adopt_catalog_identity(&mut self, catalog: &CatalogSource) {
        if let Some(id) = &catalog.id {
            self.id = Some(id.clone());
        }
        if let Some(name) = &catalog.catalog_name {
            self.catalog_name = Some(name.clone());
        }
        if !catalog.mags.is_empty() {
            self.mags = catalog.mags.clone();
        }
        if let Some(label) = &catalog.label {
            self.label = Some(label.clone());
        }
        if let Some(mag) = catalog.mag {
            self.mag = Some(mag);
        }
        if let Some(mag_error) = catalog.mag_error {
            self.mag_error = Some(mag_error);
        }
    }

    pub fn key(&self) -> Option<SourceKey> {
        self.id.as_ref().map(|id| SourceKey {
            id: id.clone(),
            file_id: self.file_id,
        })
    }
}
