//! Burn orchestration - acquires the recorder, builds the image, writes it
//!
//! This module drives one burn job through its stages:
//! 1. Open the recorder and create the write engine
//! 2. Probe the media, reading prior sessions when it is not blank
//! 3. Build the image from the job's items
//! 4. Stream the image to the write engine, forwarding progress
//! 5. Optionally close the media and eject
//!
//! Every handle is an owned local, so all of them are released, newest
//! first, on every return path before the result leaves this module.

use std::ops::ControlFlow;

use super::image::{BuildOutcome, ImageRequest, build_image};
use super::progress::{ProgressSender, ProgressSnapshot, WriteProgressTracker};
use crate::core::{
    BurnJob, BurnStage, CancelToken, FinalizeAction, JobError, JobResult, JobWarning,
    StageTracker, VerificationLevel,
};
use crate::device::{DeviceSubsystem, WriteAction, WriteEvent, probe_acquired};

/// Runs a single burn job on the calling thread
pub struct BurnOrchestrator<'a> {
    subsystem: &'a dyn DeviceSubsystem,
    cancel: CancelToken,
    stage: StageTracker<BurnStage>,
    progress: ProgressSender,
}

impl<'a> BurnOrchestrator<'a> {
    pub fn new(
        subsystem: &'a dyn DeviceSubsystem,
        cancel: CancelToken,
        stage: StageTracker<BurnStage>,
        progress: ProgressSender,
    ) -> Self {
        Self {
            subsystem,
            cancel,
            stage,
            progress,
        }
    }

    /// Run the job to a terminal stage and return its result
    pub fn run(mut self, job: &BurnJob) -> JobResult {
        log::info!(
            "=== Burning {} item(s) to {} ===",
            job.items.len(),
            job.recorder.label()
        );

        let result = self.execute(job);

        let terminal = match &result {
            JobResult::Succeeded { .. } => BurnStage::Completed,
            JobResult::Cancelled => BurnStage::Cancelled,
            JobResult::Failed(_) => BurnStage::Failed,
        };
        self.stage.advance(terminal);

        match &result {
            JobResult::Succeeded { warnings } if warnings.is_empty() => {
                log::info!("Burn completed successfully")
            }
            JobResult::Succeeded { warnings } => {
                log::warn!("Burn completed with {} warning(s)", warnings.len())
            }
            JobResult::Cancelled => log::info!("Burn was cancelled"),
            JobResult::Failed(e) => log::error!("Burn failed: {}", e),
        }
        result
    }

    fn execute(&mut self, job: &BurnJob) -> JobResult {
        self.stage.advance(BurnStage::AcquiringRecorder);
        let mut recorder = match self.subsystem.open(&job.recorder.id) {
            Ok(recorder) => recorder,
            Err(e) => return JobResult::Failed(JobError::device_unavailable(e)),
        };
        let mut writer = match self.subsystem.write_engine() {
            Ok(writer) => writer,
            Err(e) => return JobResult::Failed(JobError::environment(e)),
        };

        self.stage.advance(BurnStage::ProbingMedia);
        let media = match probe_acquired(writer.as_ref(), recorder.as_ref()) {
            Ok(media) => media,
            Err(e) => return JobResult::Failed(e),
        };

        self.stage.advance(BurnStage::BuildingImage);
        // Kept alive until the write returns so handles drop newest first
        let mut image_engine = match self.subsystem.image_engine() {
            Ok(engine) => engine,
            Err(e) => return JobResult::Failed(JobError::build_failed(e)),
        };
        let request = ImageRequest {
            media_type: media.media_type,
            items: &job.items,
            prior_sessions: media.prior_sessions.as_ref(),
            volume_label: &job.volume_label,
            file_systems: job.file_systems,
        };
        let built = build_image(
            image_engine.as_mut(),
            &request,
            &self.cancel,
            &mut self.progress,
        );
        let image = match built {
            Ok(BuildOutcome::Built(image)) => image,
            Ok(BuildOutcome::Cancelled) => return JobResult::Cancelled,
            Err(e) => return JobResult::Failed(e),
        };

        self.stage.advance(BurnStage::Writing);
        let options = job.write_options();
        let verify = job.verification != VerificationLevel::None;
        let cancel = &self.cancel;
        let stage = &self.stage;
        let progress = &mut self.progress;
        let mut tracker = WriteProgressTracker::new();
        let mut completed = false;
        let mut cancel_issued = false;
        let mut verifying = false;

        let mut on_event = |event: &WriteEvent| -> ControlFlow<()> {
            match event.action {
                // Completion reported after a cancel was issued does not count
                Some(WriteAction::Completed) if !cancel_issued => completed = true,
                Some(WriteAction::Verifying) if verify && !verifying => {
                    verifying = true;
                    stage.advance(BurnStage::Verifying);
                }
                _ => {}
            }
            progress.push(ProgressSnapshot::Write(tracker.record(event)));

            if !completed && cancel.is_cancelled() {
                if !cancel_issued {
                    log::info!("Cancel requested - asking the write engine to stop");
                    cancel_issued = true;
                }
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        };

        let written = writer.write(recorder.as_mut(), image, &options, &mut on_event);

        if cancel_issued || (!completed && self.cancel.is_cancelled()) {
            if let Err(e) = &written
                && !e.is_cancelled()
            {
                log::warn!("Write ended after cancel request: {}", e);
            }
            return JobResult::Cancelled;
        }
        match written {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                log::info!("Write engine reported cancellation");
                return JobResult::Cancelled;
            }
            Err(e) => return JobResult::Failed(JobError::write_failed(e)),
        }

        self.stage.advance(BurnStage::Finalizing);
        let mut warnings = Vec::new();
        if job.close_media
            && let Err(e) = writer.close_media(recorder.as_mut())
        {
            log::warn!("Could not close media: {}", e);
            warnings.push(JobWarning::Finalize {
                action: FinalizeAction::CloseMedia,
                code: e.code,
            });
        }
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
}
