//! Device subsystem - recorder discovery, media probing and the engine contracts
//!
//! The orchestration core never talks to hardware directly. It drives the
//! collaborator traits defined here, which a backend implements:
//! - [`simulated`]: deterministic in-memory recorders for tests and dry runs
//! - [`drutil`]: macOS recorders driven through `drutil` and `hdiutil`
//!
//! Every handle returned by a backend is an owned value that releases its
//! native resource when dropped, so scoping a handle is enough to guarantee
//! release on every exit path.

pub mod drutil;
mod enumerator;
mod probe;
pub mod simulated;
mod types;

use std::ops::ControlFlow;
use std::path::Path;

pub use enumerator::{RecorderDescriptor, check_recorder, list_recorders};
pub use probe::{MediaSnapshot, probe, probe_acquired};
pub use types::{
    DeviceId, E_DEVICE_MISSING, E_NOT_SUPPORTED, E_REQUEST_CANCELLED, E_TOOL_FAILED, EngineError,
    EraseEvent, FileSystems, ImageStream, MediaInfo, MediaType, PriorSessions, ProfileType,
    SECTOR_SIZE, SessionExtent, WriteAction, WriteEvent,
};

use crate::core::VerificationLevel;

/// Entry point into a recording backend
pub trait DeviceSubsystem: Send + Sync {
    /// Whether the host supports disc recording at all
    fn is_supported_environment(&self) -> Result<bool, EngineError>;

    /// Identifiers of all recorders currently attached
    fn enumerate(&self) -> Result<Vec<DeviceId>, EngineError>;

    /// Open a recorder for exclusive use by the caller
    fn open(&self, id: &DeviceId) -> Result<Box<dyn RecorderHandle>, EngineError>;

    fn write_engine(&self) -> Result<Box<dyn WriteEngine>, EngineError>;

    fn erase_engine(&self) -> Result<Box<dyn EraseEngine>, EngineError>;

    fn image_engine(&self) -> Result<Box<dyn ImageEngine>, EngineError>;
}

/// An opened recorder
pub trait RecorderHandle: Send {
    fn id(&self) -> &DeviceId;

    fn product_id(&self) -> String;

    fn volume_paths(&self) -> Vec<String>;

    fn supported_profiles(&self) -> Result<Vec<ProfileType>, EngineError>;

    fn eject(&mut self) -> Result<(), EngineError>;
}

/// Options captured for a single write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    pub client_name: String,
    pub verification: VerificationLevel,
    /// Ask the engine to close the media once the data is written
    pub close_media: bool,
}

/// Media probing and data recording
pub trait WriteEngine: Send {
    fn is_recorder_supported(&self, recorder: &dyn RecorderHandle) -> Result<bool, EngineError>;

    fn is_current_media_supported(&self, recorder: &dyn RecorderHandle)
    -> Result<bool, EngineError>;

    fn probe_media(&self, recorder: &dyn RecorderHandle) -> Result<MediaInfo, EngineError>;

    /// Prior-session data, only meaningful for non-blank media
    fn prior_sessions(&self, recorder: &dyn RecorderHandle) -> Result<PriorSessions, EngineError>;

    /// Stream an image to the recorder.
    ///
    /// `on_event` is invoked for every progress event. Returning
    /// `ControlFlow::Break` is a cancel request; the engine acknowledges it by
    /// returning an error carrying [`E_REQUEST_CANCELLED`] at its next
    /// opportunity.
    fn write(
        &mut self,
        recorder: &mut dyn RecorderHandle,
        image: ImageStream,
        options: &WriteOptions,
        on_event: &mut dyn FnMut(&WriteEvent) -> ControlFlow<()>,
    ) -> Result<(), EngineError>;

    fn close_media(&mut self, recorder: &mut dyn RecorderHandle) -> Result<(), EngineError>;
}

/// Blanking of rewritable media
pub trait EraseEngine: Send {
    fn erase(
        &mut self,
        recorder: &mut dyn RecorderHandle,
        full: bool,
        on_event: &mut dyn FnMut(&EraseEvent),
    ) -> Result<(), EngineError>;
}

/// File-system image construction
pub trait ImageEngine: Send {
    /// Pick image defaults (file systems, capacity) for the media type
    fn choose_defaults(&mut self, media_type: MediaType) -> Result<(), EngineError>;

    fn set_volume_name(&mut self, name: &str) -> Result<(), EngineError>;

    fn set_file_systems(&mut self, file_systems: FileSystems) -> Result<(), EngineError>;

    /// Merge the content of previously recorded sessions into the image
    fn import_prior_sessions(&mut self, sessions: &PriorSessions) -> Result<(), EngineError>;

    fn free_media_blocks(&self) -> u64;

    /// Create a directory at `image_path` (components separated by `/`)
    fn add_directory(&mut self, image_path: &str) -> Result<(), EngineError>;

    /// Add the file at `source` under `image_path`
    fn add_file(&mut self, image_path: &str, source: &Path) -> Result<(), EngineError>;

    /// Produce the streamable image
    fn finalize(&mut self) -> Result<ImageStream, EngineError>;
}
