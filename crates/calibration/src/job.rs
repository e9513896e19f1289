//! Calibration jobs.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use photocal_core::{FileId, PipelineError, PipelineResult, Source};
use photocal_jobs::{JobKind, JobState};

use crate::aggregate::{FieldCalResult, calibrate_images, inclusion_filter, snr_filter};
use crate::context::ImageContextCache;
use crate::extraction::run_source_extraction;
use crate::matching::{assign_source_ids, check_unique_ids, match_sources};
use crate::photometry::{run_photometry, use_supplied_photometry};
use crate::refmag::FilterLookup;
use crate::services::Services;
use crate::settings::{FieldCalSettings, PhotometrySettings, SourceExtractionSettings};

/// A unit of work run by the job executor.
///
/// Settings are deserialized from the job payload; collaborators come from
/// [`Services`]. Recoverable per-item problems go to the [`JobState`], while a
/// returned error fails the whole job.
pub trait PipelineJob: DeserializeOwned + Send + Sync + 'static {
    type Output: Serialize;

    fn kind() -> JobKind;

    fn run(&self, services: &Services, state: &mut JobState) -> PipelineResult<Self::Output>;
}

/// Photometric (zero-point) calibration of a batch of images against
/// reference catalog sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldCalJob {
    pub file_ids: Vec<FileId>,
    pub field_cal: FieldCalSettings,
    /// Detect sources and match them to the catalog; otherwise catalog
    /// sources are used as given.
    pub source_extraction_settings: Option<SourceExtractionSettings>,
    /// Measure magnitudes; otherwise every source must carry a `mag`.
    pub photometry_settings: Option<PhotometrySettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldCalJobResult {
    pub data: Vec<FieldCalResult>,
}

impl FieldCalJob {
    fn match_tolerance(&self) -> PipelineResult<f64> {
        match self.field_cal.source_match_tol {
            None => Err(PipelineError::validation(
                "Missing catalog source match tolerance",
            )),
            Some(tol) if !(tol > 0.0) => Err(PipelineError::validation(
                "Positive catalog source match tolerance expected",
            )),
            Some(tol) => Ok(tol),
        }
    }
}

impl PipelineJob for FieldCalJob {
    type Output = FieldCalJobResult;

    fn kind() -> JobKind {
        JobKind::FieldCal
    }

    fn run(&self, services: &Services, state: &mut JobState) -> PipelineResult<FieldCalJobResult> {
        let mut catalog = self.field_cal.catalog_sources.clone();
        if catalog.is_empty() {
            return Err(PipelineError::validation("Missing catalog sources"));
        }
        if self.file_ids.is_empty() {
            return Err(PipelineError::validation("No data file IDs provided"));
        }
        assign_source_ids(&mut catalog, state.job_id(), Utc::now());
        check_unique_ids(&catalog)?;

        let mut cache = ImageContextCache::new();
        let photometry_start = if self.photometry_settings.is_some() { 50.0 } else { 80.0 };

        let working: Vec<Source> = match &self.source_extraction_settings {
            Some(extraction) => {
                let tol = self.match_tolerance()?;
                state.set_stage(0.0, photometry_start - 10.0);
                let detected = run_source_extraction(services, extraction, &self.file_ids, state)?;
                state.set_stage(photometry_start - 10.0, photometry_start);
                match_sources(detected, &catalog, tol, services, &mut cache, state)?
            }
            None => catalog.iter().map(Source::from_catalog).collect(),
        };

        let phot_data = match &self.photometry_settings {
            Some(photometry) => {
                let start = if self.source_extraction_settings.is_some() { photometry_start } else { 0.0 };
                state.set_stage(start, 80.0);
                run_photometry(services, photometry, &self.file_ids, &working, &mut cache, state)?
            }
            None => use_supplied_photometry(working, &self.file_ids, services, &mut cache)?,
        };

        let phot_data = snr_filter(phot_data, self.field_cal.min_snr, self.field_cal.max_snr)?;
        let phot_data = inclusion_filter(
            phot_data,
            self.field_cal.source_inclusion_percent,
            self.file_ids.len(),
        )?;

        state.set_stage(80.0, 100.0);
        let lookup = FilterLookup::new(
            self.field_cal.custom_filter_lookup.as_ref(),
            services.catalogs(),
        );
        let data = calibrate_images(services, &self.file_ids, phot_data, &catalog, &lookup, state);
        if data.is_empty() {
            return Err(PipelineError::runtime("No images could be calibrated"));
        }

        info!(
            job_id = %state.job_id(),
            images = self.file_ids.len(),
            calibrated = data.len(),
            "field calibration job finished"
        );
        Ok(FieldCalJobResult { data })
    }
}

/// Source extraction over a batch of images, returning every detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceExtractionJob {
    pub file_ids: Vec<FileId>,
    pub source_extraction_settings: SourceExtractionSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceExtractionJobResult {
    pub data: Vec<Source>,
}

impl PipelineJob for SourceExtractionJob {
    type Output = SourceExtractionJobResult;

    fn kind() -> JobKind {
        JobKind::SourceExtraction
    }

    fn run(
        &self,
        services: &Services,
        state: &mut JobState,
    ) -> PipelineResult<SourceExtractionJobResult> {
        let data = run_source_extraction(
            services,
            &self.source_extraction_settings,
            &self.file_ids,
            state,
        )?;
        Ok(SourceExtractionJobResult { data })
    }
}
