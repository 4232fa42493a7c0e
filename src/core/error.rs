//! Job outcome taxonomy
//!
//! Every collaborator failure is caught at the orchestrator boundary and
//! mapped to exactly one [`JobError`] kind, keeping the engine's raw code for
//! diagnostics. Cancellation is not an error: it is its own [`JobResult`]
//! variant.

use thiserror::Error;

use crate::device::EngineError;

/// Terminal failure of a burn or erase job
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The host lacks recording support altogether
    #[error("this environment does not support disc recording")]
    EnvironmentUnsupported,
    /// Engine objects could not be created while acquiring the recorder
    #[error("recording environment error (code {code:#010x})")]
    Environment { code: i32 },
    /// The recorder could not be opened
    #[error("recorder unavailable (code {code:#010x})")]
    DeviceUnavailable { code: i32 },
    /// Another job already owns this recorder
    #[error("recorder {0} is busy with another job")]
    DeviceBusy(String),
    #[error("recorder not supported")]
    RecorderNotSupported,
    #[error("media not supported")]
    MediaNotSupported,
    #[error("creating the file system image failed (code {code:#010x})")]
    BuildFailed { code: i32 },
    #[error("writing to the disc failed (code {code:#010x})")]
    WriteFailed { code: i32 },
    #[error("erasing the disc failed (code {code:#010x})")]
    EraseFailed { code: i32 },
    /// A source item could not be read from the local file system
    #[error("{0}")]
    Io(String),
    /// The background job panicked
    #[error("unexpected fault: {0}")]
    Fault(String),
}

impl JobError {
    /// Raw engine code carried by this error, if any
    pub fn code(&self) -> Option<i32> {
        match self {
            JobError::Environment { code }
            | JobError::DeviceUnavailable { code }
            | JobError::BuildFailed { code }
            | JobError::WriteFailed { code }
            | JobError::EraseFailed { code } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn environment(err: EngineError) -> Self {
        log::error!("Engine setup failed: {}", err);
        JobError::Environment { code: err.code }
    }

    pub(crate) fn device_unavailable(err: EngineError) -> Self {
        log::error!("Could not open recorder: {}", err);
        JobError::DeviceUnavailable { code: err.code }
    }

    pub(crate) fn build_failed(err: EngineError) -> Self {
        log::error!("Image build failed: {}", err);
        JobError::BuildFailed { code: err.code }
    }

    pub(crate) fn write_failed(err: EngineError) -> Self {
        log::error!("Write failed: {}", err);
        JobError::WriteFailed { code: err.code }
    }

    pub(crate) fn erase_failed(err: EngineError) -> Self {
        log::error!("Erase failed: {}", err);
        JobError::EraseFailed { code: err.code }
    }
}

/// Post-write action that failed without downgrading the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeAction {
    CloseMedia,
    Eject,
}

/// Non-fatal problem reported alongside a successful result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobWarning {
    #[error("{action:?} failed after a successful run (code {code:#010x})")]
    Finalize { action: FinalizeAction, code: i32 },
}

/// Terminal result of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Succeeded { warnings: Vec<JobWarning> },
    Failed(JobError),
    Cancelled,
}

impl JobResult {
    pub fn succeeded() -> Self {
        JobResult::Succeeded {
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Succeeded { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobResult::Cancelled)
    }

    pub fn error(&self) -> Option<&JobError> {
        match self {
            JobResult::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Status line for a finished burn job
    pub fn burn_status_text(&self) -> &'static str {
        match self {
            JobResult::Succeeded { .. } => "Finished Burning Disc!",
            JobResult::Failed(_) => "Error Burning Disc!",
            JobResult::Cancelled => "Burn cancelled",
        }
    }

    /// Status line for a finished erase job
    pub fn erase_status_text(&self) -> &'static str {
        match self {
            JobResult::Succeeded { .. } => "Finished Formatting Disc!",
            _ => "Error Formatting Disc!",
        }
    }
}
