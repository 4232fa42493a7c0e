//! Image building
//!
//! Adds the job's items to the image engine in order, reporting progress
//! after each one, and produces the stream handed to the write stage.

use super::progress::{ProgressSender, ProgressSnapshot, build_percent};
use crate::core::{CancelToken, JobError, MediaItem};
use crate::device::{FileSystems, ImageEngine, ImageStream, MediaType, PriorSessions};

/// Build-time configuration of an image
#[derive(Debug, Clone, Copy)]
pub struct ImageRequest<'a> {
    pub media_type: MediaType,
    pub items: &'a [MediaItem],
    /// Sessions to merge, only for media that is not blank
    pub prior_sessions: Option<&'a PriorSessions>,
    pub volume_label: &'a str,
    pub file_systems: FileSystems,
}

/// How a build ended when the engine did not fail
#[derive(Debug)]
pub enum BuildOutcome {
    Built(ImageStream),
    Cancelled,
}

/// Build an image from the request.
///
/// The cancel token is checked before each top-level item and once more
/// before the image is finalized. On cancellation or failure no stream is
/// produced; whatever the engine assembled so far goes away with the engine.
pub fn build_image(
    engine: &mut dyn ImageEngine,
    request: &ImageRequest<'_>,
    cancel: &CancelToken,
    progress: &mut ProgressSender,
) -> Result<BuildOutcome, JobError> {
    engine
        .choose_defaults(request.media_type)
        .map_err(JobError::build_failed)?;
    engine
        .set_file_systems(request.file_systems)
        .map_err(JobError::build_failed)?;
    engine
        .set_volume_name(request.volume_label)
        .map_err(JobError::build_failed)?;

    if let Some(sessions) = request.prior_sessions {
        log::info!("Importing {} prior session(s)", sessions.len());
        engine
            .import_prior_sessions(sessions)
            .map_err(JobError::build_failed)?;
    }

    let total_sectors: u64 = request.items.iter().map(MediaItem::sectors).sum();
    let mut copied_sectors = 0;
    log::info!(
        "Building image '{}' from {} item(s), {} sectors, {} blocks free",
        request.volume_label,
        request.items.len(),
        total_sectors,
        engine.free_media_blocks()
    );

    for item in request.items {
        if cancel.is_cancelled() {
            log::info!("Image build cancelled before {}", item.display_name());
            return Ok(BuildOutcome::Cancelled);
        }

        item.add_to_image(engine).map_err(JobError::build_failed)?;

        copied_sectors += item.sectors();
        progress.push(ProgressSnapshot::Build {
            item: item.display_name(),
            percent: build_percent(copied_sectors, total_sectors),
            copied_sectors,
            total_sectors,
        });
    }

    if cancel.is_cancelled() {
        log::info!("Image build cancelled before finalizing");
        return Ok(BuildOutcome::Cancelled);
    }

    let stream = engine.finalize().map_err(JobError::build_failed)?;
    log::info!("Image ready: {} sectors", stream.sector_count());
    Ok(BuildOutcome::Built(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burning::progress::progress_bridge;
    use crate::device::simulated::{JournalEntry, Resource, Scenario, SimulatedSubsystem};
    use crate::device::{DeviceSubsystem, SessionExtent};
    use std::fs;
    use tempfile::TempDir;

    fn items(temp: &TempDir, sizes: &[u64]) -> Vec<MediaItem> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, size)| {
                let path = temp.path().join(format!("item{}.bin", i));
                fs::File::create(&path).unwrap().set_len(*size).unwrap();
                MediaItem::file(path).unwrap()
            })
            .collect()
    }

    fn request(items: &[MediaItem]) -> ImageRequest<'_> {
        ImageRequest {
            media_type: MediaType::CdR,
            items,
            prior_sessions: None,
            volume_label: "TEST",
            file_systems: FileSystems::default(),
        }
    }

    #[test]
    fn test_build_reports_progress_per_item() {
        let temp = TempDir::new().unwrap();
        let items = items(&temp, &[2048, 6144]);
        let subsystem = SimulatedSubsystem::new(Scenario::single_cd_writer());
        let mut engine = subsystem.image_engine().unwrap();
        let (mut tx, mut rx) = progress_bridge();

        let outcome =
            build_image(engine.as_mut(), &request(&items), &CancelToken::new(), &mut tx).unwrap();

        let stream = match outcome {
            BuildOutcome::Built(stream) => stream,
            BuildOutcome::Cancelled => panic!("Expected an image"),
        };
        assert_eq!(stream.sector_count(), 4);
        assert_eq!(tx.pushed(), 2);

        let last = rx.poll().unwrap();
        assert_eq!(
            last.snapshot,
            ProgressSnapshot::Build {
                item: "item1.bin".to_string(),
                percent: 100,
                copied_sectors: 4,
                total_sectors: 4,
            }
        );
        assert!(subsystem.journal().contains(&JournalEntry::ImageFinalized { sectors: 4 }));
    }

    #[test]
    fn test_cancel_before_first_item_adds_nothing() {
        let temp = TempDir::new().unwrap();
        let items = items(&temp, &[10, 20]);
        let subsystem = SimulatedSubsystem::new(Scenario::single_cd_writer());
        let mut engine = subsystem.image_engine().unwrap();
        let (mut tx, _rx) = progress_bridge();
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = build_image(engine.as_mut(), &request(&items), &cancel, &mut tx).unwrap();

        assert!(matches!(outcome, BuildOutcome::Cancelled));
        assert_eq!(tx.pushed(), 0);
        let journal = subsystem.journal();
        assert!(!journal.entries().iter().any(|e| matches!(e, JournalEntry::ItemAdded(_))));
        assert!(!journal.acquired().contains(&Resource::ImageStream));
    }

    #[test]
    fn test_engine_failure_maps_to_build_failed() {
        let temp = TempDir::new().unwrap();
        let items = items(&temp, &[10]);
        let mut scenario = Scenario::single_cd_writer();
        scenario.build_failure = Some(-42);
        let subsystem = SimulatedSubsystem::new(scenario);
        let mut engine = subsystem.image_engine().unwrap();
        let (mut tx, _rx) = progress_bridge();

        let result = build_image(engine.as_mut(), &request(&items), &CancelToken::new(), &mut tx);

        assert!(matches!(result, Err(JobError::BuildFailed { code: -42 })));
        assert!(!subsystem
            .journal()
            .contains(&JournalEntry::ImageFinalized { sectors: 0 }));
    }

    #[test]
    fn test_prior_sessions_are_imported() {
        let temp = TempDir::new().unwrap();
        let items = items(&temp, &[10]);
        let subsystem = SimulatedSubsystem::new(Scenario::single_cd_writer());
        let mut engine = subsystem.image_engine().unwrap();
        let (mut tx, _rx) = progress_bridge();
        let sessions = PriorSessions {
            sessions: vec![SessionExtent {
                start_sector: 0,
                sector_count: 1000,
            }],
        };
        let request = ImageRequest {
            prior_sessions: Some(&sessions),
            ..request(&items)
        };

        build_image(engine.as_mut(), &request, &CancelToken::new(), &mut tx).unwrap();

        assert!(subsystem.journal().contains(&JournalEntry::SessionsImported));
        assert_eq!(engine.free_media_blocks(), 359_847 - 1000 - 1);
    }

    #[test]
    fn test_empty_selection_builds_empty_image() {
        let subsystem = SimulatedSubsystem::new(Scenario::single_cd_writer());
        let mut engine = subsystem.image_engine().unwrap();
        let (mut tx, _rx) = progress_bridge();

        let outcome =
            build_image(engine.as_mut(), &request(&[]), &CancelToken::new(), &mut tx).unwrap();
        assert!(matches!(outcome, BuildOutcome::Built(ref s) if s.sector_count() == 0));
    }
}
