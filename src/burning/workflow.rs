//! Job execution on background threads
//!
//! [`Burner`] is the caller-facing entry point. Each started job runs on its
//! own thread and is observed through a [`JobHandle`]: stage, progress
//! snapshots, cooperative cancellation and the one-shot terminal result.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::burn::BurnOrchestrator;
use super::erase::run_erase;
use super::progress::{Progress, ProgressReceiver, ProgressSender, progress_bridge};
use crate::core::{
    BurnJob, BurnStage, CancelToken, EraseJob, EraseStage, JobError, JobResult, Stage,
    StageTracker,
};
use crate::device::{DeviceId, DeviceSubsystem};

type ActiveDevices = Arc<Mutex<HashSet<DeviceId>>>;

fn lock(active: &ActiveDevices) -> MutexGuard<'_, HashSet<DeviceId>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Claim on a device for the duration of one job
struct Reservation {
    active: ActiveDevices,
    device: DeviceId,
}

impl Reservation {
    fn claim(active: &ActiveDevices, device: &DeviceId) -> Result<Self, JobError> {
        if !lock(active).insert(device.clone()) {
            log::warn!("Recorder {} already has an active job", device);
            return Err(JobError::DeviceBusy(device.to_string()));
        }
        Ok(Self {
            active: active.clone(),
            device: device.clone(),
        })
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.device);
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}

/// Starts burn and erase jobs, at most one per device
#[derive(Clone)]
pub struct Burner {
    subsystem: Arc<dyn DeviceSubsystem>,
    active: ActiveDevices,
}

impl Burner {
    pub fn new(subsystem: Arc<dyn DeviceSubsystem>) -> Self {
        Self {
            subsystem,
            active: Arc::default(),
        }
    }

    pub fn subsystem(&self) -> &dyn DeviceSubsystem {
        self.subsystem.as_ref()
    }

    /// Whether a job is currently running on `device`
    pub fn is_busy(&self, device: &DeviceId) -> bool {
        lock(&self.active).contains(device)
    }

    /// Start a burn job in the background
    pub fn start_burn(&self, job: BurnJob) -> Result<JobHandle<BurnStage>, JobError> {
        let subsystem = self.subsystem.clone();
        self.spawn(JobKind::Burn, job.recorder.id.clone(), move |cancel, stage, progress| {
            BurnOrchestrator::new(subsystem.as_ref(), cancel, stage, progress).run(&job)
        })
    }

    /// Start an erase job in the background
    pub fn start_erase(&self, job: EraseJob) -> Result<JobHandle<EraseStage>, JobError> {
        let subsystem = self.subsystem.clone();
        self.spawn(JobKind::Erase, job.recorder.id.clone(), move |_cancel, stage, mut progress| {
            run_erase(subsystem.as_ref(), &job, &stage, &mut progress)
        })
    }

    fn spawn<S, F>(
        &self,
        kind: JobKind,
        device: DeviceId,
        body: F,
    ) -> Result<JobHandle<S>, JobError>
    where
        S: Stage + Default,
        F: FnOnce(CancelToken, StageTracker<S>, ProgressSender) -> JobResult + Send + 'static,
    {
        let reservation = Reservation::claim(&self.active, &device)?;
        let id = Uuid::new_v4();
        let cancel = CancelToken::new();
        let stage = StageTracker::new(S::default());
        let (progress_tx, progress_rx) = progress_bridge();
        let (result_tx, result_rx) = oneshot::channel();

        let job_cancel = cancel.clone();
        let job_stage = stage.clone();
        let thread = std::thread::Builder::new()
            .name(format!("{}-{}", kind.name(), device))
            .spawn(move || {
                log::debug!("Job {} started", id);
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    body(job_cancel, job_stage.clone(), progress_tx)
                }));
                let result = outcome.unwrap_or_else(|payload| {
                    let message = panic_message(payload);
                    log::error!("Job {} panicked: {}", id, message);
                    job_stage.advance(S::failed());
                    JobResult::Failed(JobError::Fault(message))
                });

                // The device is free again before anyone sees the result
                drop(reservation);
                if result_tx.send(result).is_err() {
                    log::debug!("Job {} finished with nobody waiting", id);
                }
            })
            .map_err(|e| JobError::Fault(format!("Failed to start job thread: {}", e)))?;

        log::info!("Started {} job {} on {}", kind.name(), id, device);
        Ok(JobHandle {
            id,
            kind,
            device,
            cancel,
            stage,
            progress: progress_rx,
            result: result_rx,
            thread: Some(thread),
        })
    }
}

/// Kind of background job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Burn,
    Erase,
}

impl JobKind {
    fn name(self) -> &'static str {
        match self {
            JobKind::Burn => "burn",
            JobKind::Erase => "erase",
        }
    }
}

/// Caller's view of a running job
pub struct JobHandle<S: Stage> {
    id: Uuid,
    kind: JobKind,
    device: DeviceId,
    cancel: CancelToken,
    stage: StageTracker<S>,
    progress: ProgressReceiver,
    result: oneshot::Receiver<JobResult>,
    thread: Option<JoinHandle<()>>,
}

impl<S: Stage> JobHandle<S> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn stage(&self) -> S {
        self.stage.get()
    }

    pub fn is_finished(&self) -> bool {
        self.stage.is_finished()
    }

    /// Shared view of the stage that outlives the handle
    pub fn stage_tracker(&self) -> StageTracker<S> {
        self.stage.clone()
    }

    /// Request cooperative cancellation.
    ///
    /// Erase jobs cannot be interrupted once started; the request is logged
    /// and ignored.
    pub fn cancel(&self) {
        match self.kind {
            JobKind::Burn => {
                log::info!("Cancel requested for job {}", self.id);
                self.cancel.cancel();
            }
            JobKind::Erase => log::info!("Erase job {} cannot be cancelled", self.id),
        }
    }

    /// Token that cancels this job, for use from another thread or handler
    pub fn cancel_token(&self) -> Option<CancelToken> {
        (self.kind == JobKind::Burn).then(|| self.cancel.clone())
    }

    /// Latest progress snapshot not returned before
    pub fn poll_progress(&mut self) -> Option<Progress> {
        self.progress.poll()
    }

    /// Wait for the next progress snapshot; `None` once the job has ended
    pub async fn next_progress(&mut self) -> Option<Progress> {
        self.progress.next().await
    }

    /// Snapshots the caller never saw because newer ones replaced them
    pub fn missed_progress(&self) -> u64 {
        self.progress.missed()
    }

    /// Block the calling thread until the job ends.
    ///
    /// Must not be called from within an async runtime; use [`Self::result`]
    /// there.
    pub fn await_result(mut self) -> JobResult {
        let result = match self.result.blocking_recv() {
            Ok(result) => result,
            Err(_) => JobResult::Failed(JobError::Fault(
                "job ended without reporting a result".to_string(),
            )),
        };
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        result
    }

    /// Wait for the job to end without blocking the runtime
    pub async fn result(self) -> JobResult {
        let JobHandle { result, .. } = self;
        match result.await {
            Ok(result) => result,
            Err(_) => JobResult::Failed(JobError::Fault(
                "job ended without reporting a result".to_string(),
            )),
        }
    }
}
