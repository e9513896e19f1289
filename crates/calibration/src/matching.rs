//! Catalog identity for detected sources.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::info;

use photocal_core::{CatalogSource, FileId, JobId, PipelineError, PipelineResult, Source};
use photocal_jobs::JobState;

use crate::astrometry::source_xy;
use crate::context::ImageContextCache;
use crate::services::Services;

/// Give every catalog source without an id a job-unique one,
/// `{timestamp}_{job_id}_{n}` with `n` the 1-based input position.
pub fn assign_source_ids(sources: &mut [CatalogSource], job_id: JobId, now: DateTime<Utc>) {
    let prefix = format!("{}_{}_", now.format("%Y%m%d%H%M%S"), job_id);
    for (i, source) in sources.iter_mut().enumerate() {
        if source.id.is_none() {
            source.id = Some(format!("{prefix}{}", i + 1));
        }
    }
}

/// Ids must be unique among unpinned sources, and per image among pinned ones.
pub fn check_unique_ids(sources: &[CatalogSource]) -> PipelineResult<()> {
    let mut seen = HashSet::new();
    for key in sources.iter().filter_map(CatalogSource::key) {
        if seen.contains(&key) {
            return Err(PipelineError::integrity(format!(
                "Non-unique source ID {key}"
            )));
        }
        seen.insert(key);
    }
    Ok(())
}

fn pixels_label(tol: f64) -> &'static str {
    if tol == 1.0 { "pixel" } else { "pixels" }
}

/// Attach catalog identity to detections lying within `tol` pixels of a
/// reference source; unmatched detections are dropped.
///
/// References are scanned in input order and the first one in range wins.
/// Within one image a reference is claimed by at most one detection: a later
/// detection whose first in-range reference is already claimed is rejected.
/// Further references in range of an already matched detection are excluded
/// from it with a `Catalog source "..." excluded` warning; that is the only
/// warning two references near one detection produce. The `Multiple matches`
/// warning is reserved for a reference already claimed in the same image.
pub fn match_sources(
    detected: Vec<Source>,
    catalog: &[CatalogSource],
    tol: f64,
    services: &Services,
    cache: &mut ImageContextCache,
    state: &mut JobState,
) -> PipelineResult<Vec<Source>> {
    if !(tol > 0.0) {
        return Err(PipelineError::validation(
            "Positive catalog source match tolerance expected",
        ));
    }
    if detected.is_empty() {
        return Err(PipelineError::runtime("Could not detect any sources"));
    }

    let total = detected.len();
    let unit = pixels_label(tol);
    let mut projected: HashMap<FileId, Vec<Option<(f64, f64)>>> = HashMap::new();
    let mut claimed: HashSet<(FileId, String)> = HashSet::new();
    let mut matched = Vec::new();

    for (i, mut source) in detected.into_iter().enumerate() {
        let position = source.astrometry.x.zip(source.astrometry.y);
        let (Some(file_id), Some((sx, sy))) = (source.file_id, position) else {
            continue;
        };
        let positions = projected.entry(file_id).or_insert_with(|| {
            let context = cache.get_or_load(services, file_id);
            catalog
                .iter()
                .map(|cat| {
                    if cat.applies_to(file_id) {
                        source_xy(&cat.astrometry, context.epoch, context.wcs.as_deref())
                    } else {
                        None
                    }
                })
                .collect()
        });

        let mut winner: Option<&CatalogSource> = None;
        for (cat, xy) in catalog.iter().zip(positions.iter().copied()) {
            let (Some((x, y)), Some(id)) = (xy, cat.id.as_deref()) else {
                continue;
            };
            if (x - sx).hypot(y - sy) >= tol {
                continue;
            }
            if let Some(first) = winner {
                state.add_warning(format!(
                    "Data file ID {file_id}: Catalog source \"{id}\" excluded: \
                     detection already matched to \"{}\" within {tol} {unit}",
                    first.id.as_deref().unwrap_or_default()
                ));
                continue;
            }
            if claimed.contains(&(file_id, id.to_string())) {
                state.add_warning(format!(
                    "Data file ID {file_id}: Multiple matches for catalog source \"{id}\" \
                     within {tol} {unit}"
                ));
                break;
            }
            winner = Some(cat);
        }

        if let Some(cat) = winner {
            if let Some(id) = &cat.id {
                claimed.insert((file_id, id.clone()));
            }
            source.adopt_catalog_identity(cat);
            matched.push(source);
        }
        state.update_progress((i + 1) as f64 / total as f64 * 100.0);
    }

    if matched.is_empty() {
        return Err(PipelineError::runtime(
            "Could not match any detected sources to the catalog sources provided",
        ));
    }
    info!(detected = total, matched = matched.len(), "catalog matching finished");
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use ndarray::Array2;
    use photocal_core::{Astrometry, FitsHeader};
    use proptest::prelude::*;

    use super::*;
    use crate::services::InMemoryDataFiles;

    fn services() -> Services {
        let files = InMemoryDataFiles::new();
        for id in 1..=2 {
            files.insert(FileId(id), Array2::zeros((1, 1)), FitsHeader::new());
        }
        Services::new(Arc::new(files))
    }

    fn reference(id: &str, x: f64, y: f64) -> CatalogSource {
        CatalogSource {
            id: Some(id.to_string()),
            catalog_name: Some("APASS".into()),
            astrometry: Astrometry {
                x: Some(x),
                y: Some(y),
                ..Astrometry::default()
            },
            ..CatalogSource::default()
        }
    }

    fn detection(file_id: i64, x: f64, y: f64) -> Source {
        Source {
            file_id: Some(FileId(file_id)),
            astrometry: Astrometry {
                x: Some(x),
                y: Some(y),
                ..Astrometry::default()
            },
            mag: Some(-7.0),
            ..Source::default()
        }
    }

    fn run(
        detected: Vec<Source>,
        catalog: &[CatalogSource],
        tol: f64,
        state: &mut JobState,
    ) -> PipelineResult<Vec<Source>> {
        match_sources(detected, catalog, tol, &services(), &mut ImageContextCache::new(), state)
    }

    #[test]
    fn auto_ids_use_timestamp_job_and_position() {
        let job_id = JobId::new();
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let mut sources = vec![CatalogSource::default(), reference("keep", 0.0, 0.0)];

        assign_source_ids(&mut sources, job_id, now);

        assert_eq!(
            sources[0].id.as_deref(),
            Some(format!("20240506070809_{job_id}_1").as_str())
        );
        assert_eq!(sources[1].id.as_deref(), Some("keep"));
    }

    #[test]
    fn duplicate_ids_are_an_integrity_error() {
        let sources = vec![reference("a", 0.0, 0.0), reference("a", 5.0, 5.0)];
        let err = check_unique_ids(&sources).unwrap_err();
        assert_eq!(err, PipelineError::integrity("Non-unique source ID \"a\""));

        let mut pinned = sources.clone();
        pinned[0].file_id = Some(FileId(1));
        pinned[1].file_id = Some(FileId(2));
        assert!(check_unique_ids(&pinned).is_ok());

        pinned[1].file_id = Some(FileId(1));
        let err = check_unique_ids(&pinned).unwrap_err();
        assert_eq!(
            err,
            PipelineError::integrity("Non-unique source ID \"a\" for file ID 1")
        );
    }

    #[test]
    fn match_copies_catalog_identity() {
        let mut state = JobState::new(JobId::new());
        let mut cat = reference("a", 10.0, 10.0);
        cat.mag = Some(12.0);

        let matched = run(vec![detection(1, 10.5, 10.0)], &[cat], 2.0, &mut state).unwrap();

        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id.as_deref(), Some("a"));
        assert_eq!(matched[0].catalog_name.as_deref(), Some("APASS"));
        assert_eq!(matched[0].mag, Some(12.0));
        assert_eq!(matched[0].astrometry.x, Some(10.5));
        assert_eq!(state.progress(), 100.0);
    }

    #[test]
    fn two_references_in_range_first_wins() {
        let mut state = JobState::new(JobId::new());
        let catalog = [reference("a", 10.0, 10.0), reference("b", 11.0, 10.0)];

        let matched = run(vec![detection(1, 10.5, 10.0)], &catalog, 2.0, &mut state).unwrap();

        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id.as_deref(), Some("a"));
        assert_eq!(state.warnings().len(), 1);
        assert!(state.warnings()[0].starts_with("Data file ID 1: Catalog source \"b\" excluded"));
    }

    #[test]
    fn reference_claimed_once_per_image() {
        let mut state = JobState::new(JobId::new());
        let catalog = [reference("a", 10.0, 10.0)];
        let detected = vec![
            detection(1, 10.0, 10.5),
            detection(1, 10.0, 9.5),
            detection(2, 10.0, 10.2),
        ];

        let matched = run(detected, &catalog, 1.0, &mut state).unwrap();

        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].file_id, Some(FileId(1)));
        assert_eq!(matched[1].file_id, Some(FileId(2)));
        assert_eq!(
            state.warnings(),
            ["Data file ID 1: Multiple matches for catalog source \"a\" within 1 pixel"]
        );
    }

    #[test]
    fn pinned_reference_ignores_other_images() {
        let mut state = JobState::new(JobId::new());
        let mut cat = reference("a", 10.0, 10.0);
        cat.file_id = Some(FileId(2));

        let err = run(vec![detection(1, 10.0, 10.0)], &[cat], 1.0, &mut state).unwrap_err();
        assert_eq!(
            err,
            PipelineError::runtime(
                "Could not match any detected sources to the catalog sources provided"
            )
        );
    }

    #[test]
    fn no_detections_is_a_runtime_error() {
        let mut state = JobState::new(JobId::new());
        let err = run(Vec::new(), &[reference("a", 0.0, 0.0)], 1.0, &mut state).unwrap_err();
        assert_eq!(err, PipelineError::runtime("Could not detect any sources"));
    }

    #[test]
    fn non_positive_tolerance_is_rejected() {
        let mut state = JobState::new(JobId::new());
        let err = run(vec![detection(1, 0.0, 0.0)], &[], 0.0, &mut state).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn distance_equal_to_tolerance_does_not_match() {
        let catalog = [reference("a", 50.0, 50.0)];

        let mut state = JobState::new(JobId::new());
        let err = run(vec![detection(1, 53.0, 54.0)], &catalog, 5.0, &mut state).unwrap_err();
        assert_eq!(
            err,
            PipelineError::runtime(
                "Could not match any detected sources to the catalog sources provided"
            )
        );

        let mut state = JobState::new(JobId::new());
        let matched = run(vec![detection(1, 53.0, 54.0)], &catalog, 5.0 + 1e-9, &mut state).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id.as_deref(), Some("a"));
    }

    #[test]
    fn matching_is_deterministic() {
        let catalog = [reference("a", 10.0, 10.0), reference("b", 20.0, 20.0)];
        let detected = vec![detection(1, 10.2, 10.0), detection(1, 19.0, 20.5)];

        let mut first = JobState::new(JobId::new());
        let mut second = JobState::new(JobId::new());
        let a = run(detected.clone(), &catalog, 2.0, &mut first).unwrap();
        let b = run(detected, &catalog, 2.0, &mut second).unwrap();

        assert_eq!(a, b);
        assert_eq!(first.warnings(), second.warnings());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn tolerance_is_strict(dx in -5.0f64..5.0, dy in -5.0f64..5.0, tol in 0.1f64..5.0) {
            let mut state = JobState::new(JobId::new());
            let distance = (50.0 - (50.0 + dx)).hypot(50.0 - (50.0 + dy));
            let result = run(
                vec![detection(1, 50.0 + dx, 50.0 + dy)],
                &[reference("a", 50.0, 50.0)],
                tol,
                &mut state,
            );
            prop_assert_eq!(result.is_ok(), distance < tol);
        }
    }
}
