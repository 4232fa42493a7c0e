//! Application state types
//!
//! Contains shared state types used across the application:
//! - AppSettings: Global application preferences
//! - BurnStage / EraseStage: Job state machines
//! - StageTracker: Thread-safe, forward-only view of a job's stage
//! - CancelToken: Cooperative cancellation flag

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::VerificationLevel;

/// Application-wide settings
///
/// Persisted to <data dir>/DiscBurner/app_settings.json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Read-back check after writing
    pub verification: VerificationLevel,
    /// Close the media after writing so no further sessions can be added
    pub close_media: bool,
    pub eject_after_burn: bool,
    /// Quick erase only blanks the table of contents
    pub quick_erase: bool,
    pub eject_after_erase: bool,
    /// Whether to simulate burning (don't touch real hardware)
    pub simulate: bool,
    /// Fixed volume label instead of the date
    pub volume_label: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            verification: VerificationLevel::None,
            close_media: false,
            eject_after_burn: false,
            quick_erase: true,
            eject_after_erase: false,
            simulate: false,
            volume_label: None,
        }
    }
}

impl AppSettings {
    const SETTINGS_FILE: &'static str = "app_settings.json";

    /// Get the app data directory (~/Library/Application Support/DiscBurner/)
    fn get_app_data_dir() -> Result<PathBuf, String> {
        let data_dir =
            dirs::data_dir().ok_or_else(|| "Could not determine data directory".to_string())?;

        let app_dir = data_dir.join("DiscBurner");

        if !app_dir.exists() {
            std::fs::create_dir_all(&app_dir)
                .map_err(|e| format!("Failed to create app data directory: {}", e))?;
        }

        Ok(app_dir)
    }

    pub fn settings_path() -> Result<PathBuf, String> {
        Ok(Self::get_app_data_dir()?.join(Self::SETTINGS_FILE))
    }

    /// Load app settings from disk, or return defaults if not found
    pub fn load() -> Self {
        match Self::settings_path().and_then(|path| Self::load_from(&path)) {
            Ok(settings) => {
                log::debug!("Loaded app settings from disk");
                settings
            }
            Err(e) => {
                log::debug!("Using default app settings: {}", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Err("Settings file not found".to_string());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read settings: {}", e))?;

        serde_json::from_str(&contents).map_err(|e| format!("Failed to parse settings: {}", e))
    }

    /// Save app settings to disk
    pub fn save(&self) -> Result<(), String> {
        self.save_to(&Self::settings_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        std::fs::write(path, json).map_err(|e| format!("Failed to write settings: {}", e))?;

        log::debug!("Saved app settings to {:?}", path);
        Ok(())
    }
}

/// A job state machine stage
pub trait Stage: Copy + Eq + Debug + Send + 'static {
    /// Position in the machine; a stage may only move to a higher rank
    fn rank(self) -> u8;

    fn is_terminal(self) -> bool;

    fn display_text(self) -> &'static str;

    /// Terminal stage for a job that died unexpectedly
    fn failed() -> Self;
}

/// Current stage of the burn process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BurnStage {
    #[default]
    Idle,
    AcquiringRecorder,
    ProbingMedia,
    BuildingImage,
    Writing,
    /// Only entered when the job asked for verification
    Verifying,
    /// Closing the media and ejecting
    Finalizing,
    Completed,
    Cancelled,
    Failed,
}

impl Stage for BurnStage {
    fn rank(self) -> u8 {
        match self {
            BurnStage::Idle => 0,
            BurnStage::AcquiringRecorder => 1,
            BurnStage::ProbingMedia => 2,
            BurnStage::BuildingImage => 3,
            BurnStage::Writing => 4,
            BurnStage::Verifying => 5,
            BurnStage::Finalizing => 6,
            BurnStage::Completed | BurnStage::Cancelled | BurnStage::Failed => 7,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(
            self,
            BurnStage::Completed | BurnStage::Cancelled | BurnStage::Failed
        )
    }

    fn display_text(self) -> &'static str {
        match self {
            BurnStage::Idle => "Idle",
            BurnStage::AcquiringRecorder => "Opening recorder...",
            BurnStage::ProbingMedia => "Checking media...",
            BurnStage::BuildingImage => "Creating image...",
            BurnStage::Writing => "Burning...",
            BurnStage::Verifying => "Verifying...",
            BurnStage::Finalizing => "Finishing...",
            BurnStage::Completed => "Complete!",
            BurnStage::Cancelled => "Cancelled",
            BurnStage::Failed => "Failed",
        }
    }

    fn failed() -> Self {
        BurnStage::Failed
    }
}

/// Current stage of the erase process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EraseStage {
    #[default]
    Idle,
    AcquiringRecorder,
    Erasing,
    Completed,
    Failed,
}

impl Stage for EraseStage {
    fn rank(self) -> u8 {
        match self {
            EraseStage::Idle => 0,
            EraseStage::AcquiringRecorder => 1,
            EraseStage::Erasing => 2,
            EraseStage::Completed | EraseStage::Failed => 3,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, EraseStage::Completed | EraseStage::Failed)
    }

    fn display_text(self) -> &'static str {
        match self {
            EraseStage::Idle => "Idle",
            EraseStage::AcquiringRecorder => "Opening recorder...",
            EraseStage::Erasing => "Formatting...",
            EraseStage::Completed => "Complete!",
            EraseStage::Failed => "Failed",
        }
    }

    fn failed() -> Self {
        EraseStage::Failed
    }
}

/// Shared, forward-only stage of a running job
///
/// The background job advances it; any number of observers read it.
#[derive(Debug, Clone, Default)]
pub struct StageTracker<S: Stage> {
    current: Arc<Mutex<S>>,
}

impl<S: Stage> StageTracker<S> {
    pub fn new(initial: S) -> Self {
        Self {
            current: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn get(&self) -> S {
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move to `next`. Returns false, leaving the stage untouched, when that
    /// would leave a terminal stage or go back to an earlier one.
    pub fn advance(&self, next: S) -> bool {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if current.is_terminal() || next.rank() <= current.rank() {
            log::warn!("Ignoring stage change {:?} -> {:?}", *current, next);
            return false;
        }

        log::info!("Stage {:?} -> {:?}", *current, next);
        *current = next;
        true
    }

    pub fn is_finished(&self) -> bool {
        self.get().is_terminal()
    }
}

/// Cooperative cancellation flag shared between the caller and a job
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    requested: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_app_settings_default() {
        let settings = AppSettings::default();
        assert_eq!(settings.verification, VerificationLevel::None);
        assert!(!settings.close_media);
        assert!(settings.quick_erase);
        assert!(!settings.simulate);
        assert!(settings.volume_label.is_none());
    }

    #[test]
    fn test_app_settings_serialize() {
        let settings = AppSettings {
            verification: VerificationLevel::Full,
            simulate: true,
            ..AppSettings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"verification\":\"full\""));
        assert!(json.contains("\"simulate\":true"));
    }

    #[test]
    fn test_app_settings_missing_fields_default() {
        let json = r#"{"close_media": true}"#;
        let settings: AppSettings = serde_json::from_str(json).unwrap();
        assert!(settings.close_media);
        assert!(settings.quick_erase);
        assert_eq!(settings.verification, VerificationLevel::None);
    }

    #[test]
    fn test_app_settings_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app_settings.json");
        let settings = AppSettings {
            eject_after_burn: true,
            volume_label: Some("PHOTOS".to_string()),
            ..AppSettings::default()
        };

        settings.save_to(&path).unwrap();
        assert_eq!(AppSettings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn test_app_settings_load_errors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app_settings.json");
        assert!(AppSettings::load_from(&path).is_err());

        std::fs::write(&path, "not json").unwrap();
        let err = AppSettings::load_from(&path).unwrap_err();
        assert!(err.starts_with("Failed to parse settings"));
    }

    #[test]
    fn test_burn_stage_display_text() {
        assert_eq!(BurnStage::BuildingImage.display_text(), "Creating image...");
        assert_eq!(BurnStage::Writing.display_text(), "Burning...");
        assert_eq!(BurnStage::Completed.display_text(), "Complete!");
        assert_eq!(EraseStage::Erasing.display_text(), "Formatting...");
    }

    #[test]
    fn test_stage_tracker_moves_forward() {
        let tracker = StageTracker::new(BurnStage::Idle);
        assert!(tracker.advance(BurnStage::AcquiringRecorder));
        assert!(tracker.advance(BurnStage::ProbingMedia));
        assert!(!tracker.advance(BurnStage::AcquiringRecorder));
        assert_eq!(tracker.get(), BurnStage::ProbingMedia);
    }

    #[test]
    fn test_stage_tracker_may_skip_verifying() {
        let tracker = StageTracker::new(BurnStage::Writing);
        assert!(tracker.advance(BurnStage::Finalizing));
        assert!(!tracker.advance(BurnStage::Verifying));
    }

    #[test]
    fn test_terminal_stage_is_final() {
        let tracker = StageTracker::new(BurnStage::BuildingImage);
        assert!(tracker.advance(BurnStage::Cancelled));
        assert!(tracker.is_finished());
        assert!(!tracker.advance(BurnStage::Completed));
        assert!(!tracker.advance(BurnStage::Failed));
        assert_eq!(tracker.get(), BurnStage::Cancelled);
    }

    #[test]
    fn test_erase_stage_tracker() {
        let tracker = StageTracker::new(EraseStage::Idle);
        assert!(tracker.advance(EraseStage::AcquiringRecorder));
        assert!(tracker.advance(EraseStage::Failed));
        assert!(!tracker.advance(EraseStage::Erasing));
    }

    #[test]
    fn test_stage_tracker_clone_shares_state() {
        let tracker = StageTracker::new(EraseStage::Idle);
        let observer = tracker.clone();
        tracker.advance(EraseStage::Erasing);
        assert_eq!(observer.get(), EraseStage::Erasing);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
