//! Core data model and job state
//!
//! This module contains:
//! - Media items and sector-rounded capacity arithmetic
//! - Burn and erase job configuration
//! - The job outcome taxonomy
//! - Stage state machines, cancellation and persisted settings
//! - The compilation (the user's selection before a job starts)

mod capacity;
mod compilation;
mod error;
mod job;
mod media_item;
mod state;

pub use capacity::{
    CapacityIndicator, CapacityReport, format_capacity, round_to_sector, sectors_for,
    total_image_size,
};
pub use compilation::Compilation;
pub use error::{FinalizeAction, JobError, JobResult, JobWarning};
pub use job::{
    BurnJob, CLIENT_NAME, EraseJob, VerificationLevel, default_volume_label, today_volume_label,
};
pub use media_item::{ItemIcon, MediaItem};
pub use state::{AppSettings, BurnStage, CancelToken, EraseStage, Stage, StageTracker};
