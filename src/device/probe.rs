//! Media probing

use super::{
    DeviceSubsystem, MediaType, PriorSessions, RecorderDescriptor, RecorderHandle, SECTOR_SIZE,
    WriteEngine,
};
use crate::core::{CapacityReport, JobError, MediaItem};

/// State of the media in a recorder at probe time
///
/// Invalidated whenever the recorder selection changes or a job finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSnapshot {
    pub media_type: MediaType,
    pub heuristically_blank: bool,
    pub free_bytes: u64,
    /// Present only when the media is not heuristically blank
    pub prior_sessions: Option<PriorSessions>,
}

impl MediaSnapshot {
    pub fn capacity(&self, items: &[MediaItem]) -> CapacityReport {
        CapacityReport::for_items(items, self.free_bytes)
    }

    pub fn session_count(&self) -> usize {
        self.prior_sessions.as_ref().map_or(0, PriorSessions::len)
    }
}

/// Probe the media in a recorder, acquiring and releasing the handles it needs
pub fn probe(
    subsystem: &dyn DeviceSubsystem,
    recorder: &RecorderDescriptor,
) -> Result<MediaSnapshot, JobError> {
    let handle = subsystem
        .open(&recorder.id)
        .map_err(JobError::device_unavailable)?;
    let engine = subsystem.write_engine().map_err(JobError::environment)?;

    probe_acquired(engine.as_ref(), handle.as_ref())
}

/// Probe using handles the caller already owns
pub fn probe_acquired(
    engine: &dyn WriteEngine,
    recorder: &dyn RecorderHandle,
) -> Result<MediaSnapshot, JobError> {
    match engine.is_recorder_supported(recorder) {
        Ok(true) => {}
        Ok(false) => {
            log::warn!("Recorder {} is not supported by the write engine", recorder.id());
            return Err(JobError::RecorderNotSupported);
        }
        Err(e) => return Err(JobError::environment(e)),
    }

    match engine.is_current_media_supported(recorder) {
        Ok(true) => {}
        Ok(false) => {
            log::warn!("Media not supported in recorder {}", recorder.id());
            return Err(JobError::MediaNotSupported);
        }
        Err(e) => {
            log::warn!("Media check failed in recorder {}: {}", recorder.id(), e);
            return Err(JobError::MediaNotSupported);
        }
    }

    let info = engine.probe_media(recorder).map_err(|e| {
        log::warn!("Could not read media in recorder {}: {}", recorder.id(), e);
        JobError::MediaNotSupported
    })?;

    // Blank detection is heuristic, so it gates the session import request
    // rather than the other way around.
    let prior_sessions = if info.heuristically_blank {
        None
    } else {
        let sessions = engine.prior_sessions(recorder).map_err(|e| {
            log::warn!("Could not read prior sessions: {}", e);
            JobError::MediaNotSupported
        })?;
        Some(sessions)
    };

    let snapshot = MediaSnapshot {
        media_type: info.media_type,
        heuristically_blank: info.heuristically_blank,
        free_bytes: info.free_sectors.saturating_mul(SECTOR_SIZE),
        prior_sessions,
    };

    log::info!(
        "Media in {}: {} ({}, {} bytes free, {} prior session(s))",
        recorder.id(),
        snapshot.media_type.display_name(),
        if snapshot.heuristically_blank { "blank" } else { "not blank" },
        snapshot.free_bytes,
        snapshot.session_count()
    );

    Ok(snapshot)
}
