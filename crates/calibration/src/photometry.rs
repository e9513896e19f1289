//! Instrumental magnitudes for the working source set.
//!
//! Either measured by the photometer at each source's expected position, or
//! taken from the caller-supplied `mag` values when photometry is disabled.

use std::collections::HashMap;

use anyhow::bail;
use tracing::{debug, info};

use photocal_core::{FileId, PipelineError, PipelineResult, Source};
use photocal_jobs::JobState;

use crate::astrometry::source_xy;
use crate::context::{ImageContext, ImageContextCache};
use crate::services::{Photometer, Services};
use crate::settings::{PhotometrySettings, Region};

/// Measure every applicable source on every image.
///
/// Sources without a `file_id` are measured on all images. Measurements
/// without a magnitude are dropped; an image whose photometry fails is
/// recorded as a job error and skipped.
pub fn run_photometry(
    services: &Services,
    settings: &PhotometrySettings,
    file_ids: &[FileId],
    sources: &[Source],
    cache: &mut ImageContextCache,
    state: &mut JobState,
) -> PipelineResult<Vec<Source>> {
    let photometer = services
        .photometer()
        .ok_or_else(|| PipelineError::validation("Photometry is not available"))?;

    let mut results = Vec::new();
    for (i, &file_id) in file_ids.iter().enumerate() {
        let context = cache.get_or_load(services, file_id);
        match photometer_image(services, photometer, settings, file_id, &context, sources) {
            Ok(mut measured) => {
                debug!(%file_id, sources = measured.len(), "image photometered");
                results.append(&mut measured);
            }
            Err(error) => state.add_error(format!("Data file ID {file_id}: {error:#}")),
        }
        state.update_progress((i + 1) as f64 / file_ids.len() as f64 * 100.0);
    }

    results.retain(|source| source.mag.is_some());
    if results.is_empty() {
        return Err(PipelineError::runtime(
            "No catalog sources could be photometered",
        ));
    }
    info!(sources = results.len(), "photometry finished");
    Ok(results)
}

fn photometer_image(
    services: &Services,
    photometer: &dyn Photometer,
    settings: &PhotometrySettings,
    file_id: FileId,
    context: &ImageContext,
    sources: &[Source],
) -> anyhow::Result<Vec<Source>> {
    let targets: Vec<(&Source, (f64, f64))> = sources
        .iter()
        .filter(|source| source.file_id.is_none_or(|id| id == file_id))
        .filter_map(|source| {
            source_xy(&source.astrometry, context.epoch, context.wcs.as_deref())
                .map(|xy| (source, xy))
        })
        .collect();
    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let pixels = services.data_files().get_pixels(file_id, &Region::full())?;
    let mut settings = settings.clone();
    if settings.gain.is_none() {
        settings.gain = context.gain;
    }
    let positions: Vec<(f64, f64)> = targets.iter().map(|(_, xy)| *xy).collect();
    let measurements = photometer.measure_photometry(&pixels, &positions, &settings)?;
    if measurements.len() != targets.len() {
        bail!(
            "photometer returned {} measurements for {} sources",
            measurements.len(),
            targets.len()
        );
    }

    Ok(targets
        .into_iter()
        .zip(measurements)
        .map(|((source, _), m)| {
            let mut source = source.clone();
            source.file_id = Some(file_id);
            source.time = context.epoch;
            source.filter = context.filter.clone();
            source.telescope = context.telescope.clone();
            source.exp_length = context.exp_length;
            source.astrometry.x = Some(m.x);
            source.astrometry.y = Some(m.y);
            source.flux = m.flux;
            source.mag = m.mag;
            source.mag_error = m.mag_error;
            source
        })
        .collect())
}

/// Use caller-supplied magnitudes instead of measuring.
///
/// Every source needs a `mag`, and in multi-image jobs a `file_id`; a
/// single-image job assigns its image to unpinned sources. The filter is
/// read from each image header once.
pub fn use_supplied_photometry(
    sources: Vec<Source>,
    file_ids: &[FileId],
    services: &Services,
    cache: &mut ImageContextCache,
) -> PipelineResult<Vec<Source>> {
    let single = match file_ids {
        [only] => Some(*only),
        _ => None,
    };

    let mut filters: HashMap<FileId, Option<String>> = HashMap::new();
    sources
        .into_iter()
        .map(|mut source| {
            let file_id = match (source.file_id, single) {
                (Some(file_id), _) => file_id,
                (None, Some(only)) => only,
                (None, None) => {
                    return Err(PipelineError::validation(
                        "\"file_id\" is required for all sources when photometry is not enabled",
                    ));
                }
            };
            if source.mag.is_none() {
                return Err(PipelineError::validation(
                    "\"mag\" is required for all sources when photometry is not enabled",
                ));
            }
            source.file_id = Some(file_id);
            if source.filter.is_none() {
                source.filter = filters
                    .entry(file_id)
                    .or_insert_with(|| cache.get_or_load(services, file_id).filter.clone())
                    .clone();
            }
            Ok(source)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ndarray::Array2;
    use photocal_core::{Astrometry, FitsHeader, JobId};

    use super::*;
    use crate::services::{InMemoryDataFiles, PhotometryMeasurement};

    struct FixedPhotometer;

    impl Photometer for FixedPhotometer {
        fn measure_photometry(
            &self,
            _pixels: &Array2<f64>,
            positions: &[(f64, f64)],
            settings: &PhotometrySettings,
        ) -> anyhow::Result<Vec<PhotometryMeasurement>> {
            Ok(positions
                .iter()
                .map(|&(x, y)| PhotometryMeasurement {
                    x,
                    y,
                    flux: None,
                    // Sources left of x = 50 are saturated.
                    mag: (x >= 50.0).then(|| settings.zero_point - x / 10.0),
                    mag_error: Some(settings.gain.unwrap_or_default()),
                })
                .collect())
        }
    }

    fn services() -> Services {
        let files = InMemoryDataFiles::new();
        files.insert(
            FileId(1),
            Array2::zeros((4, 4)),
            FitsHeader::new().with("FILTER", "V").with("GAIN", 2.0),
        );
        files.insert(
            FileId(2),
            Array2::zeros((4, 4)),
            FitsHeader::new().with("FILTER", "R"),
        );
        Services::new(Arc::new(files)).with_photometer(Arc::new(FixedPhotometer))
    }

    fn source(id: &str, x: f64, file_id: Option<i64>) -> Source {
        Source {
            id: Some(id.into()),
            file_id: file_id.map(FileId),
            astrometry: Astrometry {
                x: Some(x),
                y: Some(1.0),
                ..Astrometry::default()
            },
            ..Source::default()
        }
    }

    #[test]
    fn unpinned_sources_are_measured_on_every_image() {
        let services = services();
        let mut state = JobState::new(JobId::new());
        let settings = PhotometrySettings {
            zero_point: 25.0,
            ..PhotometrySettings::default()
        };
        let sources = [source("a", 60.0, None), source("b", 70.0, Some(2))];

        let results = run_photometry(
            &services,
            &settings,
            &[FileId(1), FileId(2)],
            &sources,
            &mut ImageContextCache::new(),
            &mut state,
        )
        .unwrap();

        let ids: Vec<_> = results
            .iter()
            .map(|s| (s.id.as_deref().unwrap(), s.file_id.unwrap().0))
            .collect();
        assert_eq!(ids, [("a", 1), ("a", 2), ("b", 2)]);
        assert_eq!(results[0].mag, Some(19.0));
        assert_eq!(results[0].filter.as_deref(), Some("V"));
        assert_eq!(results[0].mag_error, Some(2.0));
        assert_eq!(results[1].mag_error, Some(1.0));
        assert_eq!(state.progress(), 100.0);
    }

    #[test]
    fn failing_image_is_recorded_and_skipped() {
        let services = services();
        let mut state = JobState::new(JobId::new());

        let results = run_photometry(
            &services,
            &PhotometrySettings::default(),
            &[FileId(1), FileId(9)],
            &[source("a", 60.0, None)],
            &mut ImageContextCache::new(),
            &mut state,
        )
        .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(state.errors().len(), 1);
        assert!(state.errors()[0].starts_with("Data file ID 9: "));
    }

    #[test]
    fn nothing_photometered_is_a_runtime_error() {
        let services = services();
        let mut state = JobState::new(JobId::new());

        let err = run_photometry(
            &services,
            &PhotometrySettings::default(),
            &[FileId(1)],
            &[source("a", 10.0, None)],
            &mut ImageContextCache::new(),
            &mut state,
        )
        .unwrap_err();

        assert_eq!(
            err,
            PipelineError::runtime("No catalog sources could be photometered")
        );
    }

    #[test]
    fn supplied_magnitudes_single_image_assigns_file() {
        let services = services();
        let mut a = source("a", 1.0, None);
        a.mag = Some(12.0);

        let sources =
            use_supplied_photometry(vec![a], &[FileId(1)], &services, &mut ImageContextCache::new())
                .unwrap();

        assert_eq!(sources[0].file_id, Some(FileId(1)));
        assert_eq!(sources[0].filter.as_deref(), Some("V"));
    }

    #[test]
    fn supplied_magnitudes_require_file_id_for_batches() {
        let services = services();
        let mut a = source("a", 1.0, None);
        a.mag = Some(12.0);

        let err = use_supplied_photometry(
            vec![a],
            &[FileId(1), FileId(2)],
            &services,
            &mut ImageContextCache::new(),
        )
        .unwrap_err();

        assert_eq!(
            err,
            PipelineError::validation(
                "\"file_id\" is required for all sources when photometry is not enabled"
            )
        );
    }

    #[test]
    fn supplied_magnitudes_require_mag() {
        let services = services();
        let err = use_supplied_photometry(
            vec![source("a", 1.0, Some(1))],
            &[FileId(1)],
            &services,
            &mut ImageContextCache::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
