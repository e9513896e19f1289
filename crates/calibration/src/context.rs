//! Per-image metadata shared by the pipeline stages.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use photocal_core::FileId;

use crate::services::{CelestialTransform, Services};

/// Header-derived facts about one image.
///
/// Every field is `None` when the header could not be read; a header without
/// a usable WCS only leaves `wcs` unset.
#[derive(Clone, Default)]
pub struct ImageContext {
    pub epoch: Option<DateTime<Utc>>,
    pub wcs: Option<Arc<dyn CelestialTransform>>,
    pub filter: Option<String>,
    pub telescope: Option<String>,
    pub exp_length: Option<f64>,
    pub gain: Option<f64>,
}

impl core::fmt::Debug for ImageContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ImageContext")
            .field("epoch", &self.epoch)
            .field("wcs", &self.wcs.is_some())
            .field("filter", &self.filter)
            .field("telescope", &self.telescope)
            .field("exp_length", &self.exp_length)
            .field("gain", &self.gain)
            .finish()
    }
}

impl ImageContext {
    pub fn load(services: &Services, file_id: FileId) -> Self {
        let data_files = services.data_files();
        let header = match data_files.get_header(file_id) {
            Ok(header) => header,
            Err(error) => {
                debug!(%file_id, error = %error, "cannot read header");
                return Self::default();
            }
        };
        let wcs = match services.wcs_factory().build_wcs(&header) {
            Ok(wcs) => wcs,
            Err(error) => {
                debug!(%file_id, error = %error, "no usable WCS");
                None
            }
        };
        Self {
            epoch: data_files.get_observation_time(&header),
            wcs,
            filter: header.filter().map(str::to_string),
            telescope: header.telescope().map(str::to_string),
            exp_length: data_files.get_exposure_time(&header),
            gain: Some(data_files.get_gain(&header)),
        }
    }
}

/// Loads each image's [`ImageContext`] at most once per job.
#[derive(Debug, Default)]
pub struct ImageContextCache {
    entries: HashMap<FileId, Arc<ImageContext>>,
}

impl ImageContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(&mut self, services: &Services, file_id: FileId) -> Arc<ImageContext> {
        self.entries
            .entry(file_id)
            .or_insert_with(|| Arc::new(ImageContext::load(services, file_id)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
