//! Burning module - image building, burn and erase orchestration
//!
//! This module is front-end agnostic. Jobs run on background threads and
//! report through a progress channel and a one-shot result instead of
//! touching any caller state.

mod burn;
mod erase;
mod image;
mod progress;
mod workflow;


pub use burn::BurnOrchestrator;
pub use erase::run_erase;
pub use image::{BuildOutcome, ImageRequest, build_image};
pub use progress::{
    Progress, ProgressReceiver, ProgressSender, ProgressSnapshot, WriteProgress,
    WriteProgressTracker, build_percent, erase_percent, progress_bridge, write_percent,
};
pub use workflow::{Burner, JobHandle, JobKind};
