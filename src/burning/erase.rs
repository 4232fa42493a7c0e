//! Erase orchestration
//!
//! Once the engine starts blanking the media the job runs to completion or
//! to an engine failure; it has no cancelled outcome.

use super::progress::{ProgressSender, ProgressSnapshot};
use crate::core::{
    EraseJob, EraseStage, FinalizeAction, JobError, JobResult, JobWarning, StageTracker,
};
use crate::device::DeviceSubsystem;

/// Run an erase job on the calling thread
pub fn run_erase(
    subsystem: &dyn DeviceSubsystem,
    job: &EraseJob,
    stage: &StageTracker<EraseStage>,
    progress: &mut ProgressSender,
) -> JobResult {
    log::info!(
        "=== {} erase of {} ===",
        if job.full_erase { "Full" } else { "Quick" },
        job.recorder.label()
    );

    let result = execute(subsystem, job, stage, progress);

    match &result {
        JobResult::Succeeded { .. } => {
            stage.advance(EraseStage::Completed);
            log::info!("Erase completed successfully");
        }
        _ => {
            stage.advance(EraseStage::Failed);
            if let Some(e) = result.error() {
                log::error!("Erase failed: {}", e);
            }
        }
    }
    result
}

fn execute(
    subsystem: &dyn DeviceSubsystem,
    job: &EraseJob,
    stage: &StageTracker<EraseStage>,
    progress: &mut ProgressSender,
) -> JobResult {
    stage.advance(EraseStage::AcquiringRecorder);
    let mut recorder = match subsystem.open(&job.recorder.id) {
        Ok(recorder) => recorder,
        Err(e) => return JobResult::Failed(JobError::device_unavailable(e)),
    };
    let mut eraser = match subsystem.erase_engine() {
        Ok(eraser) => eraser,
        Err(e) => return JobResult::Failed(JobError::environment(e)),
    };

    stage.advance(EraseStage::Erasing);
    let erased = eraser.erase(recorder.as_mut(), job.full_erase, &mut |event| {
        progress.push(ProgressSnapshot::erase(
            event.elapsed_secs,
            event.estimated_total_secs,
        ));
    });
    if let Err(e) = erased {
        return JobResult::Failed(JobError::erase_failed(e));
    }

    let mut warnings = Vec::new();
    if job.eject
        && let Err(e) = recorder.eject()
    {
        log::warn!("Could not eject media: {}", e);
        warnings.push(JobWarning::Finalize {
            action: FinalizeAction::Eject,
            code: e.code,
        });
    }

    JobResult::Succeeded { warnings }
}
