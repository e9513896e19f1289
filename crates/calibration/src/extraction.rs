//! Batch source extraction.

use anyhow::Context as _;
use tracing::{debug, info};

use photocal_core::{Astrometry, FileId, PipelineError, PipelineResult, Source};
use photocal_jobs::JobState;

use crate::services::{CelestialTransform, DetectedSource, Services, SourceDetector};
use crate::settings::{Region, SourceExtractionSettings};

/// Gaussian sigma → FWHM.
pub const SIGMA_TO_FWHM: f64 = 2.354_820_045_030_949;

/// Detect sources on every image.
///
/// A failing image is recorded as a job error and skipped; progress advances
/// after every image either way.
pub fn run_source_extraction(
    services: &Services,
    settings: &SourceExtractionSettings,
    file_ids: &[FileId],
    state: &mut JobState,
) -> PipelineResult<Vec<Source>> {
    let detector = services
        .detector()
        .ok_or_else(|| PipelineError::validation("Source extraction is not available"))?;

    let mut sources = Vec::new();
    for (i, &file_id) in file_ids.iter().enumerate() {
        match extract_image(services, detector, settings, file_id) {
            Ok(mut image_sources) => {
                debug!(%file_id, sources = image_sources.len(), "image extracted");
                sources.append(&mut image_sources);
            }
            Err(error) => state.add_error(format!("Data file ID {file_id}: {error:#}")),
        }
        state.update_progress((i + 1) as f64 / file_ids.len() as f64 * 100.0);
    }

    info!(
        images = file_ids.len(),
        sources = sources.len(),
        "source extraction finished"
    );
    Ok(sources)
}

fn extract_image(
    services: &Services,
    detector: &dyn SourceDetector,
    settings: &SourceExtractionSettings,
    file_id: FileId,
) -> anyhow::Result<Vec<Source>> {
    let data_files = services.data_files();
    let pixels = data_files.get_pixels(file_id, &settings.region)?;
    let header = data_files.get_header(file_id)?;
    let gain = settings.gain.unwrap_or_else(|| data_files.get_gain(&header));

    let detection = detector
        .detect_sources(&pixels, gain, &settings.detection)
        .context("source detection failed")?;
    let mut rows = detection.sources;
    if let Some(limit) = settings.limit {
        if rows.len() > limit {
            rows.sort_by(|a, b| b.flux.total_cmp(&a.flux));
            rows.truncate(limit);
        }
    }

    let wcs = match services.wcs_factory().build_wcs(&header) {
        Ok(wcs) => wcs,
        Err(error) => {
            debug!(%file_id, error = %error, "sky coordinates disabled");
            None
        }
    };

    let template = Source {
        file_id: Some(file_id),
        time: data_files.get_observation_time(&header),
        filter: header.filter().map(str::to_string),
        telescope: header.telescope().map(str::to_string),
        exp_length: data_files.get_exposure_time(&header),
        ..Source::default()
    };
    Ok(rows
        .iter()
        .map(|row| source_from_detection(&template, row, &settings.region, wcs.as_deref()))
        .collect())
}

/// Turn a detector row into a per-image record.
///
/// Magnitudes are instrumental, `-2.5 log10(flux)`, until a catalog match or
/// photometry replaces them.
pub fn source_from_detection(
    template: &Source,
    row: &DetectedSource,
    region: &Region,
    wcs: Option<&dyn CelestialTransform>,
) -> Source {
    let (x, y) = region.to_image(row.x, row.y);
    let sky = wcs.and_then(|wcs| wcs.pixel_to_world(x, y));
    Source {
        astrometry: Astrometry {
            ra_hours: sky.map(|(ra, _)| ra / 15.0),
            dec_degs: sky.map(|(_, dec)| dec),
            x: Some(x),
            y: Some(y),
            fwhm_x: Some(row.a * SIGMA_TO_FWHM),
            fwhm_y: Some(row.b * SIGMA_TO_FWHM),
            theta: Some(row.theta.to_degrees()),
            ..Astrometry::default()
        },
        flux: Some(row.flux),
        mag: (row.flux > 0.0).then(|| -2.5 * row.flux.log10()),
        ..template.clone()
    }
}
