//! `photocal-calibration`
//!
//! **Responsibility:** the field calibration pipeline.
//!
//! Source extraction → catalog matching → (optional) photometry → reference
//! magnitudes → SNR / inclusion filters → per-image zero points.
//!
//! Pixel-level work (detection, aperture photometry), data file access and
//! header write-back are delegated to collaborators supplied through
//! [`Services`]; this crate only orchestrates them and owns the algorithms
//! between them.

pub mod aggregate;
pub mod astrometry;
pub mod catalog;
pub mod context;
pub mod extraction;
pub mod job;
pub mod matching;
pub mod photometry;
pub mod refmag;
pub mod registry;
pub mod services;
pub mod settings;
pub mod wcs;

pub use aggregate::{FieldCalResult, ZeroPoint};
pub use catalog::{CatalogDefinition, CatalogError, CatalogRegistry, CatalogRow, CellValue};
pub use job::{
    FieldCalJob, FieldCalJobResult, PipelineJob, SourceExtractionJob, SourceExtractionJobResult,
};
pub use registry::{register_job, register_jobs};
pub use services::{
    CelestialTransform, DataFiles, DetectedSource, Detection, PhotometryMeasurement, Photometer,
    Services, SourceDetector, WcsFactory,
};
pub use settings::{
    DetectionParams, FieldCalSettings, FilterLookupTable, PhotometrySettings, Region,
    SourceExtractionSettings,
};
pub use wcs::{HeaderWcsFactory, TanWcs};
