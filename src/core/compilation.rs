//! The user's selection before a job starts
//!
//! Holds the ordered item list, the chosen recorder and the last media
//! snapshot for it. The snapshot is dropped whenever the recorder changes or
//! a job finishes, so the capacity report never mixes media states.

use std::path::Path;

use super::{AppSettings, BurnJob, CapacityReport, JobError, JobResult, MediaItem};
use crate::device::{DeviceSubsystem, E_DEVICE_MISSING, MediaSnapshot, RecorderDescriptor, probe};

#[derive(Debug, Clone, Default)]
pub struct Compilation {
    items: Vec<MediaItem>,
    recorder: Option<RecorderDescriptor>,
    media: Option<MediaSnapshot>,
}

impl Compilation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    pub fn add_file(&mut self, path: &Path) -> Result<&MediaItem, JobError> {
        self.push(MediaItem::file(path)?)
    }

    pub fn add_directory(&mut self, path: &Path) -> Result<&MediaItem, JobError> {
        self.push(MediaItem::directory(path)?)
    }

    pub fn add_path(&mut self, path: &Path) -> Result<&MediaItem, JobError> {
        self.push(MediaItem::from_path(path)?)
    }

    fn push(&mut self, item: MediaItem) -> Result<&MediaItem, JobError> {
        log::debug!("Added {} ({} bytes on disc)", item.path().display(), item.size_on_disc());
        self.items.push(item);
        self.items
            .last()
            .ok_or_else(|| JobError::Fault("item list empty after push".to_string()))
    }

    pub fn remove(&mut self, index: usize) -> Option<MediaItem> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn recorder(&self) -> Option<&RecorderDescriptor> {
        self.recorder.as_ref()
    }

    /// Change the target recorder, discarding the media snapshot
    pub fn select_recorder(&mut self, recorder: Option<RecorderDescriptor>) {
        if self.recorder != recorder {
            self.media = None;
        }
        self.recorder = recorder;
    }

    pub fn media(&self) -> Option<&MediaSnapshot> {
        self.media.as_ref()
    }

    /// Probe the selected recorder again and cache the result
    pub fn refresh_media(
        &mut self,
        subsystem: &dyn DeviceSubsystem,
    ) -> Result<&MediaSnapshot, JobError> {
        self.media = None;
        let recorder = self.recorder.as_ref().ok_or(JobError::DeviceUnavailable {
            code: E_DEVICE_MISSING,
        })?;
        let snapshot = probe(subsystem, recorder)?;
        Ok(self.media.insert(snapshot))
    }

    /// Call when a burn or erase on the selected recorder has ended.
    ///
    /// Whatever the outcome, the media may have changed, so the snapshot is
    /// dropped and the next capacity report shows no free space until
    /// [`Self::refresh_media`] runs again.
    pub fn job_finished(&mut self, result: &JobResult) {
        if self.media.take().is_some() {
            log::debug!("Media snapshot dropped (job succeeded: {})", result.is_success());
        }
    }

    /// Capacity bar for the current selection; zero free bytes without media
    pub fn capacity(&self) -> CapacityReport {
        let free = self.media.as_ref().map_or(0, |m| m.free_bytes);
        CapacityReport::for_items(&self.items, free)
    }

    pub fn can_burn(&self) -> bool {
        !self.items.is_empty() && self.recorder.is_some()
    }

    /// Capture the selection as an immutable job
    pub fn burn_job(&self, settings: &AppSettings) -> Option<BurnJob> {
        if !self.can_burn() {
            return None;
        }
        let recorder = self.recorder.clone()?;
        Some(BurnJob::from_settings(recorder, self.items.clone(), settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CapacityIndicator;
    use crate::device::list_recorders;
    use crate::burning::Burner;
    use crate::device::simulated::{Scenario, SimulatedDevice, SimulatedSubsystem};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_can_burn_needs_items_and_recorder() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.txt");
        fs::write(&file, b"hello").unwrap();

        let subsystem = SimulatedSubsystem::new(Scenario::single_cd_writer());
        let recorder = list_recorders(&subsystem).unwrap().remove(0);

        let mut compilation = Compilation::new();
        assert!(!compilation.can_burn());
        compilation.add_file(&file).unwrap();
        assert!(!compilation.can_burn());
        assert!(compilation.burn_job(&AppSettings::default()).is_none());

        compilation.select_recorder(Some(recorder));
        assert!(compilation.can_burn());
        let job = compilation.burn_job(&AppSettings::default()).unwrap();
        assert_eq!(job.items.len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a"), b"1").unwrap();
        fs::create_dir(temp.path().join("d")).unwrap();

        let mut compilation = Compilation::new();
        compilation.add_path(&temp.path().join("a")).unwrap();
        compilation.add_directory(&temp.path().join("d")).unwrap();
        assert_eq!(compilation.items().len(), 2);

        assert!(compilation.remove(5).is_none());
        let removed = compilation.remove(0).unwrap();
        assert_eq!(removed.display_name(), "a");
        compilation.clear();
        assert!(compilation.items().is_empty());
    }

    #[test]
    fn test_capacity_tracks_media_snapshot() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("big.bin");
        fs::File::create(&file).unwrap().set_len(10_000_000).unwrap();

        let scenario = Scenario::new()
            .with_device(SimulatedDevice::cd_writer("rec-0"))
            .with_device(SimulatedDevice::dvd_writer("rec-1"));
        let subsystem = SimulatedSubsystem::new(scenario);
        let recorders = list_recorders(&subsystem).unwrap();

        let mut compilation = Compilation::new();
        compilation.add_file(&file).unwrap();
        let report = compilation.capacity();
        assert_eq!(report.indicator, CapacityIndicator::OverCapacity);
        assert_eq!(report.free_text(), "0MB");

        compilation.select_recorder(Some(recorders[0].clone()));
        compilation.refresh_media(&subsystem).unwrap();
        let report = compilation.capacity();
        assert!(report.fits());
        assert_eq!(report.percent, 1);

        compilation.select_recorder(Some(recorders[1].clone()));
        assert!(compilation.media().is_none());
    }

    #[test]
    fn test_selecting_same_recorder_keeps_snapshot() {
        let subsystem = SimulatedSubsystem::new(Scenario::single_cd_writer());
        let recorder = list_recorders(&subsystem).unwrap().remove(0);

        let mut compilation = Compilation::new();
        compilation.select_recorder(Some(recorder.clone()));
        compilation.refresh_media(&subsystem).unwrap();
        compilation.select_recorder(Some(recorder));
        assert!(compilation.media().is_some());

        compilation.job_finished(&JobResult::Cancelled);
        assert!(compilation.media().is_none());
    }

    #[test]
    fn test_finished_burn_drops_snapshot() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("notes.txt");
        fs::write(&file, vec![b'n'; 20_000]).unwrap();

        let subsystem = Arc::new(SimulatedSubsystem::new(Scenario::single_cd_writer()));
        let recorder = list_recorders(subsystem.as_ref()).unwrap().remove(0);

        let mut compilation = Compilation::new();
        compilation.add_file(&file).unwrap();
        compilation.select_recorder(Some(recorder));
        let free_before = compilation.refresh_media(subsystem.as_ref()).unwrap().free_bytes;

        let job = compilation.burn_job(&AppSettings::default()).unwrap();
        let result = Burner::new(subsystem.clone())
            .start_burn(job)
            .unwrap()
            .await_result();
        assert!(result.is_success());

        compilation.job_finished(&result);
        assert!(compilation.media().is_none());
        assert_eq!(compilation.capacity().free_bytes, 0);

        let free_after = compilation.refresh_media(subsystem.as_ref()).unwrap().free_bytes;
        assert!(free_after < free_before);
    }
}
