//! Job settings, deserialized from the job payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use photocal_core::CatalogSource;

/// Custom magnitude expressions: filter name → catalog name → expression.
pub type FilterLookupTable = BTreeMap<String, BTreeMap<String, String>>;

/// Image sub-region in 1-based pixel coordinates.
///
/// `width` / `height` of `None` extend to the image edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Region {
    pub fn full() -> Self {
        Self::default()
    }

    /// Convert region-local pixel coordinates to whole-image coordinates.
    pub fn to_image(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x + f64::from(self.x.max(1) - 1),
            y + f64::from(self.y.max(1) - 1),
        )
    }
}

impl Default for Region {
    fn default() -> Self {
        Self {
            x: 1,
            y: 1,
            width: None,
            height: None,
        }
    }
}

/// Parameters handed verbatim to the source detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Detection threshold in units of background RMS.
    pub threshold: f64,
    /// Background mesh size; values below 1 are a fraction of the image size.
    pub bk_size: f64,
    pub bk_filter_size: u32,
    /// FWHM prior in pixels (0 disables the matched filter).
    pub fwhm: f64,
    pub ratio: f64,
    /// Position angle prior in degrees.
    pub theta: f64,
    pub min_pixels: u32,
    pub deblend: bool,
    pub deblend_levels: u32,
    pub deblend_contrast: f64,
    /// Cleaning parameter; 0 disables cleaning.
    pub clean: f64,
    pub centroid: bool,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            threshold: 2.5,
            bk_size: 1.0 / 64.0,
            bk_filter_size: 3,
            fwhm: 0.0,
            ratio: 1.0,
            theta: 0.0,
            min_pixels: 3,
            deblend: false,
            deblend_levels: 32,
            deblend_contrast: 0.005,
            clean: 1.0,
            centroid: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceExtractionSettings {
    #[serde(flatten)]
    pub region: Region,
    /// Overrides the header gain.
    pub gain: Option<f64>,
    /// Keep only the N brightest sources per image.
    pub limit: Option<usize>,
    #[serde(flatten)]
    pub detection: DetectionParams,
}

/// Aperture photometry parameters.
///
/// Opaque to the pipeline apart from `gain`, which is filled from the image
/// header when unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotometrySettings {
    pub gain: Option<f64>,
    pub centroid_radius: f64,
    /// Aperture semi-major axis in pixels.
    pub a: f64,
    pub b: Option<f64>,
    pub theta: f64,
    pub a_in: Option<f64>,
    pub a_out: Option<f64>,
    pub b_out: Option<f64>,
    pub theta_out: Option<f64>,
    pub zero_point: f64,
}

/// Field calibration parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldCalSettings {
    pub name: Option<String>,
    pub catalog_sources: Vec<CatalogSource>,
    pub custom_filter_lookup: Option<FilterLookupTable>,
    /// Minimum share of images (percent) a source must appear in; 0 disables.
    pub source_inclusion_percent: f64,
    pub min_snr: f64,
    pub max_snr: f64,
    /// Match radius in pixels; required when source extraction is enabled.
    pub source_match_tol: Option<f64>,
}

impl FieldCalSettings {
    /// Whether either SNR bound is set.
    pub fn has_snr_bounds(&self) -> bool {
        self.min_snr != 0.0 || self.max_snr != 0.0
    }
}
