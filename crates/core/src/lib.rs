//! `photocal-core` — shared building blocks for the calibration pipeline.
//!
//! This crate holds the **data model** (sources, catalog sources, FITS headers),
//! identifiers and the job-fatal error taxonomy. It has no knowledge of the
//! collaborators (pixel access, detectors, photometers) the pipeline talks to.

pub mod error;
pub mod header;
pub mod id;
pub mod source;

pub use error::{PipelineError, PipelineResult};
pub use header::{FitsHeader, HeaderCard, HeaderValue};
pub use id::{FileId, JobId};
pub use source::{Astrometry, CatalogSource, Mag, Source, SourceKey};
