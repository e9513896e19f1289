//! Wiring of calibration jobs into the job executor.

use std::sync::Arc;

use tracing::debug;

use photocal_core::PipelineError;
use photocal_jobs::JobExecutor;

use crate::job::{FieldCalJob, PipelineJob, SourceExtractionJob};
use crate::services::Services;

/// Register every calibration job kind.
pub fn register_jobs(executor: &mut JobExecutor, services: Arc<Services>) {
    register_job::<FieldCalJob>(executor, Arc::clone(&services));
    register_job::<SourceExtractionJob>(executor, services);
}

/// Register one job type under its kind name.
///
/// The payload is parsed into `J`; a malformed payload fails the job as a
/// validation error.
pub fn register_job<J: PipelineJob>(executor: &mut JobExecutor, services: Arc<Services>) {
    let kind = J::kind();
    debug!(kind = kind.type_name(), "registering job handler");
    executor.register_handler(kind.type_name(), move |payload, state| {
        let job: J = serde_json::from_value(payload.clone())
            .map_err(|e| PipelineError::validation(format!("Invalid job settings: {e}")))?;
        let output = job.run(&services, state)?;
        serde_json::to_value(output)
            .map_err(|e| PipelineError::runtime(format!("Cannot serialize job result: {e}")))
    });
}
