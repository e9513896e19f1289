//! External collaborators of the pipeline.
//!
//! Pixel access, source detection, aperture photometry and WCS construction
//! are opaque to the calibration algorithms. Each is a trait object held by
//! [`Services`], so hosts plug in their own storage and numerical kernels.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context as _, bail};
use chrono::{DateTime, Utc};
use ndarray::{Array2, s};
use serde::{Deserialize, Serialize};

use photocal_core::{FileId, FitsHeader, HeaderCard};

use crate::catalog::CatalogRegistry;
use crate::settings::{DetectionParams, PhotometrySettings, Region};
use crate::wcs::HeaderWcsFactory;

/// Header keyword of the photometric zero point.
pub const ZERO_POINT_KEYWORD: &str = "PHOT_M0";
/// Header keyword of the photometric zero point error.
pub const ZERO_POINT_ERROR_KEYWORD: &str = "PHOT_M0E";

/// Image storage.
pub trait DataFiles: Send + Sync + 'static {
    /// Pixel data of a region, indexed `[row, column]`.
    fn get_pixels(&self, file_id: FileId, region: &Region) -> anyhow::Result<Array2<f64>>;

    fn get_header(&self, file_id: FileId) -> anyhow::Result<FitsHeader>;

    fn update_header(&self, file_id: FileId, cards: &[HeaderCard]) -> anyhow::Result<()>;

    fn get_gain(&self, header: &FitsHeader) -> f64 {
        header.gain()
    }

    fn get_exposure_time(&self, header: &FitsHeader) -> Option<f64> {
        header.exposure_time()
    }

    fn get_observation_time(&self, header: &FitsHeader) -> Option<DateTime<Utc>> {
        header.observation_time()
    }

    /// Store a fitted zero point in the image header.
    fn persist_calibration(
        &self,
        file_id: FileId,
        zero_point: f64,
        zero_point_error: Option<f64>,
    ) -> anyhow::Result<()> {
        self.update_header(file_id, &calibration_cards(zero_point, zero_point_error))
    }
}

/// Header cards recording a photometric calibration.
pub fn calibration_cards(zero_point: f64, zero_point_error: Option<f64>) -> Vec<HeaderCard> {
    let mut cards =
        vec![HeaderCard::new(ZERO_POINT_KEYWORD, zero_point).with_comment("Photometric zero point")];
    if let Some(error) = zero_point_error {
        cards.push(
            HeaderCard::new(ZERO_POINT_ERROR_KEYWORD, error)
                .with_comment("Photometric zero point error"),
        );
    }
    cards
}

/// One detection in region-local, 1-based pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedSource {
    pub x: f64,
    pub y: f64,
    /// Semi-major axis (sigma) in pixels.
    pub a: f64,
    pub b: f64,
    /// Orientation in radians.
    pub theta: f64,
    pub flux: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub sources: Vec<DetectedSource>,
    pub background: Array2<f64>,
    pub background_rms: Array2<f64>,
}

pub trait SourceDetector: Send + Sync + 'static {
    fn detect_sources(
        &self,
        pixels: &Array2<f64>,
        gain: f64,
        params: &DetectionParams,
    ) -> anyhow::Result<Detection>;
}

/// Photometer output for one requested position, in request order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhotometryMeasurement {
    /// Position after optional centroiding.
    pub x: f64,
    pub y: f64,
    pub flux: Option<f64>,
    pub mag: Option<f64>,
    pub mag_error: Option<f64>,
}

pub trait Photometer: Send + Sync + 'static {
    /// Measure every position; the output has one entry per input position.
    fn measure_photometry(
        &self,
        pixels: &Array2<f64>,
        positions: &[(f64, f64)],
        settings: &PhotometrySettings,
    ) -> anyhow::Result<Vec<PhotometryMeasurement>>;
}

/// Pixel ↔ sky mapping of one image. Sky coordinates are in degrees.
pub trait CelestialTransform: Send + Sync + 'static {
    fn pixel_to_world(&self, x: f64, y: f64) -> Option<(f64, f64)>;

    fn world_to_pixel(&self, ra_degs: f64, dec_degs: f64) -> Option<(f64, f64)>;
}

pub trait WcsFactory: Send + Sync + 'static {
    /// `Ok(None)` when the header carries no celestial WCS.
    fn build_wcs(&self, header: &FitsHeader) -> anyhow::Result<Option<Arc<dyn CelestialTransform>>>;
}

/// Collaborators and catalog definitions shared by all jobs.
#[derive(Clone)]
pub struct Services {
    data_files: Arc<dyn DataFiles>,
    detector: Option<Arc<dyn SourceDetector>>,
    photometer: Option<Arc<dyn Photometer>>,
    wcs_factory: Arc<dyn WcsFactory>,
    catalogs: CatalogRegistry,
}

impl Services {
    pub fn new(data_files: Arc<dyn DataFiles>) -> Self {
        Self {
            data_files,
            detector: None,
            photometer: None,
            wcs_factory: Arc::new(HeaderWcsFactory),
            catalogs: CatalogRegistry::new(),
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn SourceDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_photometer(mut self, photometer: Arc<dyn Photometer>) -> Self {
        self.photometer = Some(photometer);
        self
    }

    pub fn with_wcs_factory(mut self, wcs_factory: Arc<dyn WcsFactory>) -> Self {
        self.wcs_factory = wcs_factory;
        self
    }

    pub fn with_catalogs(mut self, catalogs: CatalogRegistry) -> Self {
        self.catalogs = catalogs;
        self
    }

    pub fn data_files(&self) -> &dyn DataFiles {
        self.data_files.as_ref()
    }

    pub fn detector(&self) -> Option<&dyn SourceDetector> {
        self.detector.as_deref()
    }

    pub fn photometer(&self) -> Option<&dyn Photometer> {
        self.photometer.as_deref()
    }

    pub fn wcs_factory(&self) -> &dyn WcsFactory {
        self.wcs_factory.as_ref()
    }

    pub fn catalogs(&self) -> &CatalogRegistry {
        &self.catalogs
    }
}

impl core::fmt::Debug for Services {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Services")
            .field("detector", &self.detector.is_some())
            .field("photometer", &self.photometer.is_some())
            .field("catalogs", &self.catalogs.names().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Cut a 1-based region out of a full image.
pub fn crop(pixels: &Array2<f64>, region: &Region) -> anyhow::Result<Array2<f64>> {
    let (rows, cols) = pixels.dim();
    let x0 = region.x.max(1) as usize - 1;
    let y0 = region.y.max(1) as usize - 1;
    let x1 = region.width.map_or(cols, |w| x0 + w as usize);
    let y1 = region.height.map_or(rows, |h| y0 + h as usize);
    if x0 >= x1 || y0 >= y1 || x1 > cols || y1 > rows {
        bail!(
            "region {}x{} at ({}, {}) does not fit a {cols}x{rows} image",
            x1.saturating_sub(x0),
            y1.saturating_sub(y0),
            region.x,
            region.y
        );
    }
    Ok(pixels.slice(s![y0..y1, x0..x1]).to_owned())
}

#[derive(Debug, Clone)]
struct StoredImage {
    pixels: Array2<f64>,
    header: FitsHeader,
}

/// In-memory image store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDataFiles {
    inner: Mutex<HashMap<FileId, StoredImage>>,
}

impl InMemoryDataFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file_id: FileId, pixels: Array2<f64>, header: FitsHeader) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file_id, StoredImage { pixels, header });
    }

    pub fn header(&self, file_id: FileId) -> Option<FitsHeader> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&file_id)
            .map(|image| image.header.clone())
    }

    fn with_image<T>(
        &self,
        file_id: FileId,
        f: impl FnOnce(&mut StoredImage) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let mut images = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let image = images
            .get_mut(&file_id)
            .with_context(|| format!("unknown data file {file_id}"))?;
        f(image)
    }
}

impl DataFiles for InMemoryDataFiles {
    fn get_pixels(&self, file_id: FileId, region: &Region) -> anyhow::Result<Array2<f64>> {
        self.with_image(file_id, |image| crop(&image.pixels, region))
    }

    fn get_header(&self, file_id: FileId) -> anyhow::Result<FitsHeader> {
        self.with_image(file_id, |image| Ok(image.header.clone()))
    }

    fn update_header(&self, file_id: FileId, cards: &[HeaderCard]) -> anyhow::Result<()> {
        self.with_image(file_id, |image| {
            image.header.apply(cards);
            Ok(())
        })
    }
}
