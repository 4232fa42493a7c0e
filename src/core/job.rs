//! Job configuration
//!
//! A job is configured once, before it starts. The background context only
//! ever reads these values; nothing mutates them after the recorder has been
//! acquired.

use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{AppSettings, MediaItem};
use crate::device::{FileSystems, RecorderDescriptor, WriteOptions};

/// Client name reported to the write engine
pub const CLIENT_NAME: &str = "DiscBurner";

/// Post-write read-back check intensity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationLevel {
    #[default]
    None,
    Quick,
    Full,
}

impl fmt::Display for VerificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VerificationLevel::None => "none",
            VerificationLevel::Quick => "quick",
            VerificationLevel::Full => "full",
        })
    }
}

impl FromStr for VerificationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(VerificationLevel::None),
            "quick" => Ok(VerificationLevel::Quick),
            "full" => Ok(VerificationLevel::Full),
            other => Err(format!("Unknown verification level: {}", other)),
        }
    }
}

/// A single burn attempt
#[derive(Debug, Clone)]
pub struct BurnJob {
    pub recorder: RecorderDescriptor,
    /// Items in the order they are added to the image
    pub items: Vec<MediaItem>,
    pub volume_label: String,
    pub verification: VerificationLevel,
    pub close_media: bool,
    pub eject: bool,
    pub file_systems: FileSystems,
}

impl BurnJob {
    /// A job with today's label and no verification, close or eject
    pub fn new(recorder: RecorderDescriptor, items: Vec<MediaItem>) -> Self {
        Self {
            recorder,
            items,
            volume_label: today_volume_label(),
            verification: VerificationLevel::None,
            close_media: false,
            eject: false,
            file_systems: FileSystems::default(),
        }
    }

    /// A job configured from the persisted preferences
    pub fn from_settings(
        recorder: RecorderDescriptor,
        items: Vec<MediaItem>,
        settings: &AppSettings,
    ) -> Self {
        let mut job = Self::new(recorder, items);
        if let Some(label) = settings.volume_label.as_ref().filter(|l| !l.is_empty()) {
            job.volume_label = label.clone();
        }
        job.verification = settings.verification;
        job.close_media = settings.close_media;
        job.eject = settings.eject_after_burn;
        job
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            client_name: CLIENT_NAME.to_string(),
            verification: self.verification,
            close_media: self.close_media,
        }
    }
}

/// A single erase attempt
#[derive(Debug, Clone)]
pub struct EraseJob {
    pub recorder: RecorderDescriptor,
    pub full_erase: bool,
    pub eject: bool,
}

impl EraseJob {
    pub fn new(recorder: RecorderDescriptor) -> Self {
        Self {
            recorder,
            full_erase: false,
            eject: false,
        }
    }

    pub fn from_settings(recorder: RecorderDescriptor, settings: &AppSettings) -> Self {
        Self {
            recorder,
            full_erase: !settings.quick_erase,
            eject: settings.eject_after_erase,
        }
    }
}

/// Volume label for a date: `Y_M_D` without zero padding, e.g. "2024_3_7"
pub fn default_volume_label(date: NaiveDate) -> String {
    format!("{}_{}_{}", date.year(), date.month(), date.day())
}

pub fn today_volume_label() -> String {
    default_volume_label(Local::now().date_naive())
}
