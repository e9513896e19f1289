//! Source filters and per-image zero-point fitting.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use photocal_core::{CatalogSource, FileId, PipelineError, PipelineResult, Source};
use photocal_jobs::JobState;

use crate::refmag::{FilterLookup, resolve_reference_mag};
use crate::services::Services;

/// Zero-point errors below this are treated as "no error information".
pub const MIN_ZERO_POINT_ERROR: f64 = 1e-7;

/// Keep sources whose signal-to-noise ratio, `1 / mag_error`, lies within
/// `[min_snr, max_snr]`. A zero bound is unset; sources without an error
/// always pass. Without bounds the set is returned unchanged.
pub fn snr_filter(sources: Vec<Source>, min_snr: f64, max_snr: f64) -> PipelineResult<Vec<Source>> {
    if min_snr == 0.0 && max_snr == 0.0 {
        return Ok(sources);
    }
    let max_snr = if max_snr == 0.0 { f64::INFINITY } else { max_snr };

    let total = sources.len();
    let kept: Vec<Source> = sources
        .into_iter()
        .filter(|source| match source.mag_error {
            None => true,
            Some(error) if error == 0.0 => true,
            Some(error) => (min_snr..=max_snr).contains(&(1.0 / error)),
        })
        .collect();
    if kept.is_empty() {
        return Err(PipelineError::runtime("All sources violate SNR constraints"));
    }
    debug!(total, kept = kept.len(), "SNR filter applied");
    Ok(kept)
}

/// Minimum number of images a source must appear in.
pub fn required_occurrences(percent: f64, num_images: usize) -> usize {
    ((percent / 100.0 * num_images as f64 + 0.5).floor() as usize).max(1)
}

/// Drop every source id that appears in fewer than `percent`% of the
/// `num_images` images. A non-positive percentage disables the filter.
pub fn inclusion_filter(
    sources: Vec<Source>,
    percent: f64,
    num_images: usize,
) -> PipelineResult<Vec<Source>> {
    if !(percent > 0.0) {
        return Ok(sources);
    }
    let nmin = required_occurrences(percent, num_images);

    let mut counts: HashMap<Option<&str>, usize> = HashMap::new();
    for source in &sources {
        *counts.entry(source.id.as_deref()).or_default() += 1;
    }
    let kept_ids: Vec<Option<String>> = counts
        .into_iter()
        .filter(|(_, n)| *n >= nmin)
        .map(|(id, _)| id.map(str::to_string))
        .collect();

    if kept_ids.is_empty() {
        let message = if nmin == num_images {
            "No sources found that are present in all images".to_string()
        } else if nmin == 1 {
            "No sources found that are present in at least one image".to_string()
        } else {
            format!("No sources found that are present in at least {nmin} images")
        };
        return Err(PipelineError::runtime(message));
    }

    let total = sources.len();
    let kept: Vec<Source> = sources
        .into_iter()
        .filter(|source| kept_ids.contains(&source.id))
        .collect();
    debug!(total, kept = kept.len(), nmin, "inclusion filter applied");
    Ok(kept)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZeroPoint {
    pub value: f64,
    pub error: Option<f64>,
}

/// Fit the zero point `m0` such that `ref_mag ≈ mag + m0`.
///
/// `m0` is the unweighted mean of `ref_mag - mag`. Its error comes from the
/// measurement and reference errors; when those are all missing, the scatter
/// of the differences is used instead (needs at least two sources).
/// Sources lacking either magnitude are ignored.
pub fn zero_point(sources: &[Source]) -> Option<ZeroPoint> {
    let samples: Vec<(f64, f64)> = sources
        .iter()
        .filter_map(|source| {
            let (mag, ref_mag) = (source.mag?, source.ref_mag?);
            let variance = source.mag_error.unwrap_or(0.0).powi(2)
                + source.ref_mag_error.unwrap_or(0.0).powi(2);
            Some((ref_mag - mag, variance))
        })
        .collect();
    if samples.is_empty() {
        return None;
    }

    let n = samples.len() as f64;
    let diffs: Vec<f64> = samples.iter().map(|(d, _)| *d).collect();
    let value = mean(&diffs);
    let mut error = Some(samples.iter().map(|(_, v)| v).sum::<f64>().sqrt() / n);
    if error.is_some_and(|e| e.abs() < MIN_ZERO_POINT_ERROR) {
        error = (samples.len() > 1).then(|| stddev_population(&diffs, value) / n.sqrt());
    }
    Some(ZeroPoint { value, error })
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / (xs.len() as f64)
}

/// Population standard deviation (n).
fn stddev_population(xs: &[f64], mean: f64) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let var = xs
        .iter()
        .map(|x| {
            let d = x - mean;
            d * d
        })
        .sum::<f64>()
        / (xs.len() as f64);
    var.sqrt()
}

/// Calibration of one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCalResult {
    pub file_id: FileId,
    /// Calibration sources with their reference magnitudes.
    pub phot_results: Vec<Source>,
    pub zero_point: f64,
    pub zero_point_error: Option<f64>,
}

/// Attach reference magnitudes, fit a zero point per image and store it in
/// the image header.
///
/// Images without any calibration source are recorded as job errors; failed
/// header updates as warnings. Neither stops the batch. An image listed more
/// than once is calibrated once per listing.
pub fn calibrate_images(
    services: &Services,
    file_ids: &[FileId],
    phot_data: Vec<Source>,
    catalog: &[CatalogSource],
    lookup: &FilterLookup<'_>,
    state: &mut JobState,
) -> Vec<FieldCalResult> {
    let mut by_file: BTreeMap<FileId, Vec<Source>> = BTreeMap::new();
    for source in phot_data {
        if let Some(file_id) = source.file_id {
            by_file.entry(file_id).or_default().push(source);
        }
    }

    let mut results = Vec::new();
    for (i, &file_id) in file_ids.iter().enumerate() {
        let sources: Vec<Source> = by_file
            .get(&file_id)
            .into_iter()
            .flatten()
            .cloned()
            .filter_map(|source| with_reference_mag(source, file_id, catalog, lookup))
            .collect();

        match zero_point(&sources) {
            None => state.add_error(format!("Data file ID {file_id}: No calibration sources")),
            Some(zp) => {
                debug!(%file_id, sources = sources.len(), m0 = zp.value, "zero point fitted");
                if let Err(error) =
                    services
                        .data_files()
                        .persist_calibration(file_id, zp.value, zp.error)
                {
                    state.add_warning(format!(
                        "Data file ID {file_id}: Error saving photometric calibration info \
                         to FITS header: {error:#}"
                    ));
                }
                results.push(FieldCalResult {
                    file_id,
                    phot_results: sources,
                    zero_point: zp.value,
                    zero_point_error: zp.error,
                });
            }
        }
        state.update_progress((i + 1) as f64 / file_ids.len() as f64 * 100.0);
    }

    info!(
        images = file_ids.len(),
        calibrated = results.len(),
        "field calibration finished"
    );
    results
}

fn with_reference_mag(
    mut source: Source,
    file_id: FileId,
    catalog: &[CatalogSource],
    lookup: &FilterLookup<'_>,
) -> Option<Source> {
    source.mag?;
    let reference = catalog
        .iter()
        .find(|cat| cat.id.is_some() && cat.id == source.id && cat.applies_to(file_id))?;
    let catalog_name = reference
        .catalog_name
        .as_deref()
        .or(source.catalog_name.as_deref());
    let mag = resolve_reference_mag(source.filter.as_deref(), catalog_name, &reference.mags, lookup)?;

    source.catalog_name = catalog_name.map(str::to_string);
    source.ref_mag = mag.value;
    source.ref_mag_error = mag.error;
    Some(source)
}
