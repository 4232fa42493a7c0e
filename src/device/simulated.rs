//! Simulated recording backend
//!
//! A deterministic, in-memory device subsystem. It backs the `--simulate`
//! option and every orchestrator test. All handle acquisitions, releases and
//! engine calls are recorded in a [`Journal`] so callers can assert on
//! release order and on which engine operations were (or were not) invoked.
//!
//! Media state is shared between handles: a successful write appends a
//! session, an erase blanks the media.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{
    DeviceId, DeviceSubsystem, E_DEVICE_MISSING, EngineError, EraseEngine, EraseEvent,
    FileSystems, ImageEngine, ImageStream, MediaInfo, MediaType, PriorSessions, ProfileType,
    RecorderHandle, SECTOR_SIZE, SessionExtent, WriteAction, WriteEngine, WriteEvent,
    WriteOptions,
};
use crate::core::{VerificationLevel, sectors_for};

/// Engine code reported when the image outgrows the media
pub const E_IMAGE_TOO_LARGE: i32 = 0xC0AA_B120_u32 as i32;

/// A resource handed out by the simulated subsystem
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    Recorder(DeviceId),
    WriteEngine,
    EraseEngine,
    ImageEngine,
    ImageStream,
}

/// One recorded subsystem interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Acquired(Resource),
    Released(Resource),
    SessionsRead,
    SessionsImported,
    ItemAdded(String),
    ImageFinalized { sectors: u64 },
    WriteStarted,
    CancelRequested,
    MediaClosed,
    Ejected(DeviceId),
    EraseStarted { full: bool },
}

/// Shared, append-only record of subsystem interactions
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<JournalEntry>>>);

impl Journal {
    fn lock(&self) -> MutexGuard<'_, Vec<JournalEntry>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, entry: JournalEntry) {
        self.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.lock().clone()
    }

    pub fn contains(&self, entry: &JournalEntry) -> bool {
        self.lock().contains(entry)
    }

    /// Resources released so far, in release order
    pub fn released(&self) -> Vec<Resource> {
        self.lock()
            .iter()
            .filter_map(|entry| match entry {
                JournalEntry::Released(resource) => Some(resource.clone()),
                _ => None,
            })
            .collect()
    }

    /// Resources acquired so far, in acquisition order
    pub fn acquired(&self) -> Vec<Resource> {
        self.lock()
            .iter()
            .filter_map(|entry| match entry {
                JournalEntry::Acquired(resource) => Some(resource.clone()),
                _ => None,
            })
            .collect()
    }

    /// True when every acquired resource was released exactly once
    pub fn all_released(&self) -> bool {
        let mut balance: HashMap<Resource, i64> = HashMap::new();
        for entry in self.lock().iter() {
            match entry {
                JournalEntry::Acquired(r) => *balance.entry(r.clone()).or_default() += 1,
                JournalEntry::Released(r) => *balance.entry(r.clone()).or_default() -= 1,
                _ => {}
            }
        }
        balance.values().all(|count| *count == 0)
    }
}

/// Guard that records a release when dropped
struct Lease {
    journal: Journal,
    resource: Resource,
}

impl Lease {
    fn acquire(journal: &Journal, resource: Resource) -> Self {
        journal.record(JournalEntry::Acquired(resource.clone()));
        Self {
            journal: journal.clone(),
            resource,
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.journal
            .record(JournalEntry::Released(self.resource.clone()));
    }
}

/// Media loaded in a simulated recorder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedMedia {
    pub media_type: MediaType,
    pub sessions: Vec<SessionExtent>,
    /// Whether the write engine accepts this media
    pub supported: bool,
}

impl SimulatedMedia {
    pub fn blank(media_type: MediaType) -> Self {
        Self {
            media_type,
            sessions: Vec::new(),
            supported: true,
        }
    }

    pub fn with_sessions(media_type: MediaType, sessions: Vec<SessionExtent>) -> Self {
        Self {
            media_type,
            sessions,
            supported: true,
        }
    }

    pub fn unsupported(media_type: MediaType) -> Self {
        Self {
            media_type,
            sessions: Vec::new(),
            supported: false,
        }
    }

    fn used_sectors(&self) -> u64 {
        self.sessions.iter().map(|s| s.sector_count).sum()
    }

    fn free_sectors(&self) -> u64 {
        self.media_type
            .nominal_sectors()
            .saturating_sub(self.used_sectors())
    }
}

/// A simulated recorder
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub id: DeviceId,
    pub product_id: String,
    pub volume_paths: Vec<String>,
    pub profiles: Vec<ProfileType>,
    pub media: Option<SimulatedMedia>,
    pub recorder_supported: bool,
    pub open_failure: Option<i32>,
    pub eject_failure: Option<i32>,
}

impl SimulatedDevice {
    /// A CD writer holding a blank CD-R
    pub fn cd_writer(id: &str) -> Self {
        Self {
            id: DeviceId(id.to_string()),
            product_id: "Simulated CD-RW".to_string(),
            volume_paths: vec![format!("/Volumes/{}", id)],
            profiles: vec![ProfileType::CdRecordable, ProfileType::CdRewritable],
            media: Some(SimulatedMedia::blank(MediaType::CdR)),
            recorder_supported: true,
            open_failure: None,
            eject_failure: None,
        }
    }

    /// A DVD writer holding a blank DVD+RW
    pub fn dvd_writer(id: &str) -> Self {
        Self {
            id: DeviceId(id.to_string()),
            product_id: "Simulated DVD-RW".to_string(),
            volume_paths: vec![format!("/Volumes/{}", id)],
            profiles: vec![
                ProfileType::CdRecordable,
                ProfileType::CdRewritable,
                ProfileType::DvdDashRecordable,
                ProfileType::DvdDashRewritable,
                ProfileType::DvdPlusR,
                ProfileType::DvdPlusRw,
            ],
            media: Some(SimulatedMedia::blank(MediaType::DvdPlusRw)),
            recorder_supported: true,
            open_failure: None,
            eject_failure: None,
        }
    }
}

/// Observer invoked for every write event before it reaches the orchestrator
pub type WriteListener = Arc<dyn Fn(&WriteEvent) + Send + Sync>;

/// Behaviour of the simulated subsystem
#[derive(Clone)]
pub struct Scenario {
    pub supported_environment: bool,
    pub devices: Vec<SimulatedDevice>,
    /// Number of `WritingData` events per write
    pub write_steps: u32,
    pub step_delay: Duration,
    pub write_engine_failure: Option<i32>,
    pub image_engine_failure: Option<i32>,
    /// Fail the first file added to the image
    pub build_failure: Option<i32>,
    /// Fail halfway through writing data
    pub write_failure: Option<i32>,
    pub close_failure: Option<i32>,
    pub erase_failure: Option<i32>,
    pub erase_steps: u32,
    pub erase_estimated_secs: u32,
    /// When false the engine ignores cancel requests and finishes the write
    pub acknowledge_cancel: bool,
    pub write_listener: Option<WriteListener>,
}

impl Scenario {
    pub fn new() -> Self {
        Self {
            supported_environment: true,
            devices: Vec::new(),
            write_steps: 10,
            step_delay: Duration::ZERO,
            write_engine_failure: None,
            image_engine_failure: None,
            build_failure: None,
            write_failure: None,
            close_failure: None,
            erase_failure: None,
            erase_steps: 5,
            erase_estimated_secs: 60,
            acknowledge_cancel: true,
            write_listener: None,
        }
    }

    /// A single CD writer with a blank CD-R, the default dry-run setup
    pub fn single_cd_writer() -> Self {
        Self::new().with_device(SimulatedDevice::cd_writer("sim-0"))
    }

    pub fn with_device(mut self, device: SimulatedDevice) -> Self {
        self.devices.push(device);
        self
    }

    pub fn unsupported_environment(mut self) -> Self {
        self.supported_environment = false;
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn with_write_listener(
        mut self,
        listener: impl Fn(&WriteEvent) + Send + Sync + 'static,
    ) -> Self {
        self.write_listener = Some(Arc::new(listener));
        self
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

struct Shared {
    scenario: Scenario,
    journal: Journal,
    devices: Mutex<Vec<SimulatedDevice>>,
}

impl Shared {
    fn devices(&self) -> MutexGuard<'_, Vec<SimulatedDevice>> {
        self.devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_device<T>(
        &self,
        id: &DeviceId,
        f: impl FnOnce(&mut SimulatedDevice) -> T,
    ) -> Result<T, EngineError> {
        let mut devices = self.devices();
        devices
            .iter_mut()
            .find(|d| &d.id == id)
            .map(f)
            .ok_or_else(|| EngineError::new(E_DEVICE_MISSING, format!("no recorder {}", id)))
    }

    fn media(&self, id: &DeviceId) -> Result<SimulatedMedia, EngineError> {
        self.with_device(id, |d| d.media.clone())?
            .ok_or_else(|| EngineError::new(E_DEVICE_MISSING, "no media in recorder"))
    }

    fn pause(&self) {
        if !self.scenario.step_delay.is_zero() {
            std::thread::sleep(self.scenario.step_delay);
        }
    }
}

/// In-memory device subsystem
#[derive(Clone)]
pub struct SimulatedSubsystem {
    shared: Arc<Shared>,
}

impl SimulatedSubsystem {
    pub fn new(scenario: Scenario) -> Self {
        let devices = scenario.devices.clone();
        Self {
            shared: Arc::new(Shared {
                scenario,
                journal: Journal::default(),
                devices: Mutex::new(devices),
            }),
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.shared.journal
    }

    /// Current media of a device, reflecting writes and erases so far
    pub fn media_of(&self, id: &DeviceId) -> Option<SimulatedMedia> {
        self.shared.with_device(id, |d| d.media.clone()).ok().flatten()
    }
}

impl DeviceSubsystem for SimulatedSubsystem {
    fn is_supported_environment(&self) -> Result<bool, EngineError> {
        Ok(self.shared.scenario.supported_environment)
    }

    fn enumerate(&self) -> Result<Vec<DeviceId>, EngineError> {
        Ok(self.shared.devices().iter().map(|d| d.id.clone()).collect())
    }

    fn open(&self, id: &DeviceId) -> Result<Box<dyn RecorderHandle>, EngineError> {
        let device = self.shared.with_device(id, |d| d.clone())?;
        if let Some(code) = device.open_failure {
            return Err(EngineError::new(code, format!("cannot open {}", id)));
        }
        let lease = Lease::acquire(&self.shared.journal, Resource::Recorder(id.clone()));
        Ok(Box::new(SimulatedRecorder {
            shared: self.shared.clone(),
            device,
            _lease: lease,
        }))
    }

    fn write_engine(&self) -> Result<Box<dyn WriteEngine>, EngineError> {
        if let Some(code) = self.shared.scenario.write_engine_failure {
            return Err(EngineError::new(code, "write engine unavailable"));
        }
        let lease = Lease::acquire(&self.shared.journal, Resource::WriteEngine);
        Ok(Box::new(SimulatedWriter {
            shared: self.shared.clone(),
            _lease: lease,
        }))
    }

    fn erase_engine(&self) -> Result<Box<dyn EraseEngine>, EngineError> {
        let lease = Lease::acquire(&self.shared.journal, Resource::EraseEngine);
        Ok(Box::new(SimulatedEraser {
            shared: self.shared.clone(),
            _lease: lease,
        }))
    }

    fn image_engine(&self) -> Result<Box<dyn ImageEngine>, EngineError> {
        if let Some(code) = self.shared.scenario.image_engine_failure {
            return Err(EngineError::new(code, "image engine unavailable"));
        }
        let lease = Lease::acquire(&self.shared.journal, Resource::ImageEngine);
        Ok(Box::new(SimulatedImage {
            shared: self.shared.clone(),
            free_blocks: 0,
            used_blocks: 0,
            volume_name: String::new(),
            file_systems: FileSystems::default(),
            _lease: lease,
        }))
    }
}

struct SimulatedRecorder {
    shared: Arc<Shared>,
    device: SimulatedDevice,
    _lease: Lease,
}

impl RecorderHandle for SimulatedRecorder {
    fn id(&self) -> &DeviceId {
        &self.device.id
    }

    fn product_id(&self) -> String {
        self.device.product_id.clone()
    }

    fn volume_paths(&self) -> Vec<String> {
        self.device.volume_paths.clone()
    }

    fn supported_profiles(&self) -> Result<Vec<ProfileType>, EngineError> {
        Ok(self.device.profiles.clone())
    }

    fn eject(&mut self) -> Result<(), EngineError> {
        if let Some(code) = self.device.eject_failure {
            return Err(EngineError::new(code, "tray is locked"));
        }
        self.shared
            .journal
            .record(JournalEntry::Ejected(self.device.id.clone()));
        Ok(())
    }
}

struct SimulatedWriter {
    shared: Arc<Shared>,
    _lease: Lease,
}

impl SimulatedWriter {
    fn emit(
        &self,
        event: WriteEvent,
        on_event: &mut dyn FnMut(&WriteEvent) -> ControlFlow<()>,
    ) -> Result<(), EngineError> {
        if let Some(listener) = &self.shared.scenario.write_listener {
            listener(&event);
        }
        if on_event(&event).is_break() {
            self.shared.journal.record(JournalEntry::CancelRequested);
            if self.shared.scenario.acknowledge_cancel {
                return Err(EngineError::cancelled());
            }
        }
        Ok(())
    }
}

impl WriteEngine for SimulatedWriter {
    fn is_recorder_supported(&self, recorder: &dyn RecorderHandle) -> Result<bool, EngineError> {
        self.shared.with_device(recorder.id(), |d| d.recorder_supported)
    }

    fn is_current_media_supported(
        &self,
        recorder: &dyn RecorderHandle,
    ) -> Result<bool, EngineError> {
        let media = self.shared.with_device(recorder.id(), |d| d.media.clone())?;
        Ok(media.is_some_and(|m| m.supported))
    }

    fn probe_media(&self, recorder: &dyn RecorderHandle) -> Result<MediaInfo, EngineError> {
        let media = self.shared.media(recorder.id())?;
        Ok(MediaInfo {
            media_type: media.media_type,
            heuristically_blank: media.sessions.is_empty(),
            free_sectors: media.free_sectors(),
        })
    }

    fn prior_sessions(&self, recorder: &dyn RecorderHandle) -> Result<PriorSessions, EngineError> {
        let media = self.shared.media(recorder.id())?;
        self.shared.journal.record(JournalEntry::SessionsRead);
        Ok(PriorSessions {
            sessions: media.sessions,
        })
    }

    fn write(
        &mut self,
        recorder: &mut dyn RecorderHandle,
        mut image: ImageStream,
        options: &WriteOptions,
        on_event: &mut dyn FnMut(&WriteEvent) -> ControlFlow<()>,
    ) -> Result<(), EngineError> {
        let media = self.shared.media(recorder.id())?;
        self.shared.journal.record(JournalEntry::WriteStarted);

        let start_lba = media.used_sectors() as i64;
        let sector_count = image.sector_count() as i64;
        let steps = i64::from(self.shared.scenario.write_steps.max(1));
        let base = WriteEvent {
            start_lba,
            sector_count,
            total_secs: steps,
            total_system_buffer: 16 * 1024 * 1024,
            ..WriteEvent::default()
        };
        let phase = |action| WriteEvent {
            action: Some(action),
            ..base
        };

        for action in [
            WriteAction::ValidatingMedia,
            WriteAction::InitializingHardware,
            WriteAction::CalibratingPower,
        ] {
            self.emit(phase(action), on_event)?;
        }

        io::copy(&mut image, &mut io::sink())?;

        for step in 1..=steps {
            if step > steps / 2
                && let Some(code) = self.shared.scenario.write_failure
            {
                return Err(EngineError::new(code, "write error on media"));
            }
            let written = start_lba + sector_count * step / steps;
            let event = WriteEvent {
                action: Some(WriteAction::WritingData),
                elapsed_secs: step,
                remaining_secs: steps - step,
                last_read_lba: written,
                last_written_lba: written,
                used_system_buffer: 8 * 1024 * 1024,
                free_system_buffer: 8 * 1024 * 1024,
                ..base
            };
            self.emit(event, on_event)?;
            self.shared.pause();
        }

        self.emit(phase(WriteAction::Finalization), on_event)?;

        if options.verification != VerificationLevel::None {
            for _ in 0..2 {
                self.emit(phase(WriteAction::Verifying), on_event)?;
                self.shared.pause();
            }
        }

        self.shared.with_device(recorder.id(), |d| {
            if let Some(media) = d.media.as_mut() {
                media.sessions.push(SessionExtent {
                    start_sector: start_lba as u64,
                    sector_count: sector_count as u64,
                });
            }
        })?;

        self.emit(
            WriteEvent {
                action: Some(WriteAction::Completed),
                elapsed_secs: steps,
                ..base
            },
            on_event,
        )
    }

    fn close_media(&mut self, _recorder: &mut dyn RecorderHandle) -> Result<(), EngineError> {
        if let Some(code) = self.shared.scenario.close_failure {
            return Err(EngineError::new(code, "could not close media"));
        }
        self.shared.journal.record(JournalEntry::MediaClosed);
        Ok(())
    }
}

struct SimulatedEraser {
    shared: Arc<Shared>,
    _lease: Lease,
}

impl EraseEngine for SimulatedEraser {
    fn erase(
        &mut self,
        recorder: &mut dyn RecorderHandle,
        full: bool,
        on_event: &mut dyn FnMut(&EraseEvent),
    ) -> Result<(), EngineError> {
        self.shared.media(recorder.id())?;
        self.shared
            .journal
            .record(JournalEntry::EraseStarted { full });

        let steps = self.shared.scenario.erase_steps.max(1);
        let estimated = self.shared.scenario.erase_estimated_secs;
        for step in 1..=steps {
            let elapsed = if estimated == 0 {
                step
            } else {
                estimated * step / steps
            };
            on_event(&EraseEvent {
                elapsed_secs: elapsed,
                estimated_total_secs: estimated,
            });
            self.shared.pause();
        }

        if let Some(code) = self.shared.scenario.erase_failure {
            return Err(EngineError::new(code, "erase failed"));
        }

        self.shared.with_device(recorder.id(), |d| {
            if let Some(media) = d.media.as_mut() {
                media.sessions.clear();
            }
        })
    }
}

struct SimulatedImage {
    shared: Arc<Shared>,
    free_blocks: u64,
    used_blocks: u64,
    volume_name: String,
    file_systems: FileSystems,
    _lease: Lease,
}

impl ImageEngine for SimulatedImage {
    fn choose_defaults(&mut self, media_type: MediaType) -> Result<(), EngineError> {
        self.free_blocks = media_type.nominal_sectors();
        self.file_systems = FileSystems::default();
        Ok(())
    }

    fn set_volume_name(&mut self, name: &str) -> Result<(), EngineError> {
        self.volume_name = name.to_string();
        Ok(())
    }

    fn set_file_systems(&mut self, file_systems: FileSystems) -> Result<(), EngineError> {
        self.file_systems = file_systems;
        Ok(())
    }

    fn import_prior_sessions(&mut self, sessions: &PriorSessions) -> Result<(), EngineError> {
        self.free_blocks = self.free_blocks.saturating_sub(sessions.used_sectors());
        self.shared.journal.record(JournalEntry::SessionsImported);
        Ok(())
    }

    fn free_media_blocks(&self) -> u64 {
        self.free_blocks.saturating_sub(self.used_blocks)
    }

    fn add_directory(&mut self, image_path: &str) -> Result<(), EngineError> {
        self.shared
            .journal
            .record(JournalEntry::ItemAdded(format!("{}/", image_path)));
        Ok(())
    }

    fn add_file(&mut self, image_path: &str, source: &Path) -> Result<(), EngineError> {
        if let Some(code) = self.shared.scenario.build_failure {
            return Err(EngineError::new(code, format!("cannot add {}", image_path)));
        }
        let sectors = sectors_for(fs::metadata(source)?.len());
        if self.used_blocks + sectors > self.free_blocks {
            return Err(EngineError::new(E_IMAGE_TOO_LARGE, "image does not fit on media"));
        }
        self.used_blocks += sectors;
        self.shared
            .journal
            .record(JournalEntry::ItemAdded(image_path.to_string()));
        Ok(())
    }

    fn finalize(&mut self) -> Result<ImageStream, EngineError> {
        log::debug!(
            "Simulated image '{}' ({} sectors, joliet: {})",
            self.volume_name,
            self.used_blocks,
            self.file_systems.joliet
        );
        self.shared.journal.record(JournalEntry::ImageFinalized {
            sectors: self.used_blocks,
        });
        let lease = Lease::acquire(&self.shared.journal, Resource::ImageStream);
        Ok(ImageStream::new(
            self.used_blocks,
            Box::new(EmptyImage {
                remaining: self.used_blocks * SECTOR_SIZE,
                _lease: lease,
            }),
        ))
    }
}

/// Reader standing in for image content
struct EmptyImage {
    remaining: u64,
    _lease: Lease,
}

impl Read for EmptyImage {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining as usize);
        buf[..n].fill(0);
        self.remaining -= n as u64;
        Ok(n)
    }
}
