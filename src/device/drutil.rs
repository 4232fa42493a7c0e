//! macOS recording backend using drutil/hdiutil
//!
//! Recorders are enumerated and inspected with `drutil`, images are built
//! with `hdiutil makehybrid` from a staging directory, and written with
//! `hdiutil burn -puppetstrings` so progress can be parsed line by line.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Seek};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::{TempDir, TempPath};

use super::{
    DeviceId, DeviceSubsystem, E_NOT_SUPPORTED, E_TOOL_FAILED, EngineError, EraseEngine,
    EraseEvent, FileSystems, ImageEngine, ImageStream, MediaInfo, MediaType, PriorSessions,
    ProfileType, RecorderHandle, SECTOR_SIZE, SessionExtent, WriteAction, WriteEngine, WriteEvent,
    WriteOptions,
};
use crate::core::{VerificationLevel, sectors_for};

/// Erase duration estimates, drutil reports no timing of its own
const QUICK_ERASE_SECS: u32 = 60;
const FULL_ERASE_SECS: u32 = 1200;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Run a command and return its stdout
fn run_tool(program: &str, args: &[&str]) -> Result<String, EngineError> {
    log::debug!("Running {} {}", program, args.join(" "));
    let output = Command::new(program).args(args).output().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            EngineError::not_supported(format!("{} is not available", program))
        } else {
            EngineError::new(E_TOOL_FAILED, format!("Failed to execute {}: {}", program, e))
        }
    })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(EngineError::new(
            E_TOOL_FAILED,
            format!("{} {} failed: {}", program, args.join(" "), stderr.trim()),
        ))
    }
}

fn drutil(drive: &DeviceId, args: &[&str]) -> Result<String, EngineError> {
    let mut full = vec!["-drive", drive.0.as_str()];
    full.extend_from_slice(args);
    run_tool("drutil", &full)
}

/// Drive numbers and product names from `drutil list`
pub fn parse_drive_list(output: &str) -> Vec<(DeviceId, String)> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let index = fields.next()?;
            if !index.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let rest: Vec<&str> = fields.collect();
            // Trailing columns are revision, bus and support level
            let name_end = rest.len().saturating_sub(3);
            Some((DeviceId(index.to_string()), rest[..name_end].join(" ")))
        })
        .collect()
}

/// Recorder details from `drutil info`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DriveInfo {
    pub product: String,
    pub profiles: Vec<ProfileType>,
}

pub fn parse_drive_info(output: &str) -> DriveInfo {
    let mut info = DriveInfo::default();
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());

    if let Some(header) = lines.next()
        && header.starts_with("Vendor")
        && let Some(row) = lines.next()
    {
        info.product = row.split_whitespace().collect::<Vec<_>>().join(" ");
    }

    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let capabilities: Vec<&str> = value.split(',').map(str::trim).collect();
        let table: &[(&str, ProfileType)] = match key.trim() {
            "CD-Write" => &[
                ("-R", ProfileType::CdRecordable),
                ("-RW", ProfileType::CdRewritable),
            ],
            "DVD-Write" => &[
                ("-R", ProfileType::DvdDashRecordable),
                ("-R DL", ProfileType::DvdDashRDualLayerJump),
                ("-RW", ProfileType::DvdDashRewritable),
                ("+R", ProfileType::DvdPlusR),
                ("+R DL", ProfileType::DvdPlusRDual),
                ("+RW", ProfileType::DvdPlusRw),
                ("RAM", ProfileType::DvdRam),
            ],
            "BD-Write" => &[
                ("-R", ProfileType::BdRSequential),
                ("-RE", ProfileType::BdRewritable),
            ],
            _ => continue,
        };
        for (name, profile) in table {
            if capabilities.contains(name) {
                info.profiles.push(*profile);
            }
        }
    }

    info
}

/// Media details from `drutil status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStatus {
    pub media_type: MediaType,
    pub device_node: Option<String>,
    pub sessions: u32,
    pub blank: bool,
    /// False for pressed or finalized media
    pub writable: bool,
    pub free_blocks: u64,
    pub used_blocks: u64,
}

fn media_type_from_drutil(name: &str) -> MediaType {
    match name {
        "CD-ROM" => MediaType::CdRom,
        "CD-R" => MediaType::CdR,
        "CD-RW" => MediaType::CdRw,
        "DVD-ROM" => MediaType::DvdRom,
        "DVD-RAM" => MediaType::DvdRam,
        "DVD-R" => MediaType::DvdDashR,
        "DVD-RW" => MediaType::DvdDashRw,
        "DVD-R DL" => MediaType::DvdDashRDualLayer,
        "DVD+R" => MediaType::DvdPlusR,
        "DVD+RW" => MediaType::DvdPlusRw,
        "DVD+R DL" => MediaType::DvdPlusRDualLayer,
        "DVD+RW DL" => MediaType::DvdPlusRwDualLayer,
        "BD-ROM" => MediaType::BdRom,
        "BD-R" => MediaType::BdR,
        "BD-RE" => MediaType::BdRe,
        _ => MediaType::Unknown,
    }
}

/// Block count from a "... blocks:   359849 / 736.97MB / ..." column
fn blocks_in(line: &str) -> Option<u64> {
    let (_, rest) = line.split_once("blocks:")?;
    rest.split('/').next()?.trim().parse().ok()
}

/// Parse `drutil status`; `None` when no media is inserted
pub fn parse_media_status(output: &str) -> Option<MediaStatus> {
    if output.to_lowercase().contains("no media") {
        return None;
    }

    let mut status = MediaStatus {
        media_type: MediaType::Unknown,
        device_node: None,
        sessions: 0,
        blank: false,
        writable: false,
        free_blocks: 0,
        used_blocks: 0,
    };
    let mut saw_type = false;

    for line in output.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Type:") {
            saw_type = true;
            let (kind, name) = match rest.split_once("Name:") {
                Some((kind, name)) => (kind, Some(name.trim().to_string())),
                None => (rest, None),
            };
            status.media_type = media_type_from_drutil(kind.trim());
            status.device_node = name.filter(|n| !n.is_empty());
        } else if let Some(rest) = line.strip_prefix("Sessions:") {
            status.sessions = rest
                .split_whitespace()
                .next()
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
        } else if line.starts_with("Space Free:") {
            status.free_blocks = blocks_in(line).unwrap_or(0);
        } else if line.starts_with("Space Used:") {
            status.used_blocks = blocks_in(line).unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("Writability:") {
            let flags = rest.to_lowercase();
            status.blank = flags.contains("blank");
            status.writable = flags.contains("appendable") || flags.contains("blank");
        }
    }

    saw_type.then_some(status)
}

/// Output of `hdiutil burn -puppetstrings`
#[derive(Debug, Clone, PartialEq)]
pub enum PuppetLine {
    /// Percent done, negative while indeterminate
    Percent(f64),
    Message(String),
}

pub fn parse_puppet_line(line: &str) -> Option<PuppetLine> {
    if let Some(value) = line.strip_prefix("PERCENT:") {
        value.trim().parse().ok().map(PuppetLine::Percent)
    } else {
        line.strip_prefix("MESSAGE:")
            .map(|m| PuppetLine::Message(m.trim().to_string()))
    }
}

/// Write phase announced by an hdiutil status message
fn action_for_message(message: &str) -> Option<WriteAction> {
    let lower = message.to_lowercase();
    if lower.contains("preparing") {
        Some(WriteAction::ValidatingMedia)
    } else if lower.contains("erasing") {
        Some(WriteAction::FormattingMedia)
    } else if lower.contains("opening session") {
        Some(WriteAction::InitializingHardware)
    } else if lower.contains("closing") || lower.contains("finishing") {
        Some(WriteAction::Finalization)
    } else if lower.contains("verifying") {
        Some(WriteAction::Verifying)
    } else {
        None
    }
}

/// Ask a tool to stop the way Ctrl+C would, so it can leave the drive usable
fn interrupt(child: &mut Child) {
    #[cfg(unix)]
    {
        // SAFETY: kill(2) with a pid we spawned and still own
        let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGINT) };
        if rc == 0 {
            return;
        }
    }
    let _ = child.kill();
}

/// Spawn a long-running tool with stderr going to an unlinked temp file.
///
/// A pipe nobody drains would stall the tool once its buffer fills.
fn spawn_tool(command: &mut Command, what: &str) -> Result<(Child, File), EngineError> {
    let stderr = tempfile::tempfile()?;
    let child = command
        .stderr(Stdio::from(stderr.try_clone()?))
        .spawn()
        .map_err(|e| {
            EngineError::new(E_TOOL_FAILED, format!("Failed to execute {}: {}", what, e))
        })?;
    Ok((child, stderr))
}

fn captured_stderr(mut file: File) -> String {
    let mut text = String::new();
    if file.rewind().is_ok() {
        let _ = file.read_to_string(&mut text);
    }
    text.trim().to_string()
}

/// A drive as listed by `hdiutil burn -list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnDevice {
    /// IOService path accepted by `hdiutil burn -device`
    pub path: String,
    pub description: String,
}

/// Parse `hdiutil burn -list`: an IOService path line followed by an
/// indented vendor/product/revision line
pub fn parse_burn_devices(output: &str) -> Vec<BurnDevice> {
    let mut devices: Vec<BurnDevice> = Vec::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("IOService:") {
            devices.push(BurnDevice {
                path: trimmed.to_string(),
                description: String::new(),
            });
        } else if !trimmed.is_empty()
            && let Some(device) = devices.last_mut()
            && device.description.is_empty()
        {
            device.description = normalized(trimmed);
        }
    }
    devices
}

fn normalized(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The `-device` argument addressing `product`.
///
/// `Ok(None)` means hdiutil's default drive is the only drive, so no
/// argument is needed. A product that matches no listed drive, or more than
/// one, cannot be addressed when several drives are attached.
pub fn burn_device_for(
    devices: &[BurnDevice],
    product: &str,
) -> Result<Option<String>, EngineError> {
    let product = normalized(product);
    let matches: Vec<&BurnDevice> = devices
        .iter()
        .filter(|d| {
            !d.description.is_empty()
                && (d.description == product
                    || d.description.starts_with(&product)
                    || product.starts_with(&d.description))
        })
        .collect();

    match matches.as_slice() {
        [device] => Ok(Some(device.path.clone())),
        _ if devices.len() <= 1 => Ok(None),
        [] => Err(EngineError::not_supported(format!(
            "hdiutil lists no drive matching {}",
            product
        ))),
        _ => Err(EngineError::not_supported(format!(
            "{} drives match {}, cannot tell them apart",
            matches.len(),
            product
        ))),
    }
}

fn burn_device(recorder: &dyn RecorderHandle) -> Result<Option<String>, EngineError> {
    let devices = parse_burn_devices(&run_tool("hdiutil", &["burn", "-list"])?);
    burn_device_for(&devices, &recorder.product_id())
}

/// Recorders driven through the drutil and hdiutil command line tools
#[derive(Debug, Default, Clone, Copy)]
pub struct DrutilSubsystem;

impl DrutilSubsystem {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceSubsystem for DrutilSubsystem {
    fn is_supported_environment(&self) -> Result<bool, EngineError> {
        if !cfg!(target_os = "macos") {
            return Ok(false);
        }
        match run_tool("drutil", &["version"]) {
            Ok(_) => Ok(true),
            Err(e) if e.code == E_NOT_SUPPORTED => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn enumerate(&self) -> Result<Vec<DeviceId>, EngineError> {
        let output = run_tool("drutil", &["list"])?;
        Ok(parse_drive_list(&output)
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    fn open(&self, id: &DeviceId) -> Result<Box<dyn RecorderHandle>, EngineError> {
        let info = parse_drive_info(&drutil(id, &["info"])?);
        let device_node = parse_media_status(&drutil(id, &["status"])?)
            .and_then(|status| status.device_node);

        log::debug!("Opened drive {} ({})", id, info.product);
        Ok(Box::new(DrutilRecorder {
            id: id.clone(),
            info,
            device_node,
        }))
    }

    fn write_engine(&self) -> Result<Box<dyn WriteEngine>, EngineError> {
        Ok(Box::new(HdiutilWriter))
    }

    fn erase_engine(&self) -> Result<Box<dyn EraseEngine>, EngineError> {
        Ok(Box::new(DrutilEraser))
    }

    fn image_engine(&self) -> Result<Box<dyn ImageEngine>, EngineError> {
        Ok(Box::new(MakehybridImage::new()?))
    }
}

struct DrutilRecorder {
    id: DeviceId,
    info: DriveInfo,
    device_node: Option<String>,
}

impl RecorderHandle for DrutilRecorder {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn product_id(&self) -> String {
        self.info.product.clone()
    }

    fn volume_paths(&self) -> Vec<String> {
        self.device_node.iter().cloned().collect()
    }

    fn supported_profiles(&self) -> Result<Vec<ProfileType>, EngineError> {
        Ok(self.info.profiles.clone())
    }

    fn eject(&mut self) -> Result<(), EngineError> {
        drutil(&self.id, &["eject"]).map(|_| ())
    }
}

fn media_status(recorder: &dyn RecorderHandle) -> Result<Option<MediaStatus>, EngineError> {
    Ok(parse_media_status(&drutil(recorder.id(), &["status"])?))
}

struct HdiutilWriter;

impl WriteEngine for HdiutilWriter {
    fn is_recorder_supported(&self, recorder: &dyn RecorderHandle) -> Result<bool, EngineError> {
        if recorder.supported_profiles()?.is_empty() {
            return Ok(false);
        }
        match burn_device(recorder) {
            Ok(_) => Ok(true),
            Err(e) if e.code == E_NOT_SUPPORTED => {
                log::warn!("Drive {} cannot be addressed by hdiutil: {}", recorder.id(), e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn is_current_media_supported(
        &self,
        recorder: &dyn RecorderHandle,
    ) -> Result<bool, EngineError> {
        Ok(media_status(recorder)?
            .is_some_and(|s| s.writable && s.media_type != MediaType::Unknown))
    }

    fn probe_media(&self, recorder: &dyn RecorderHandle) -> Result<MediaInfo, EngineError> {
        let status = media_status(recorder)?
            .ok_or_else(|| EngineError::not_supported("no media in drive"))?;
        Ok(MediaInfo {
            media_type: status.media_type,
            heuristically_blank: status.blank,
            free_sectors: status.free_blocks,
        })
    }

    fn prior_sessions(&self, recorder: &dyn RecorderHandle) -> Result<PriorSessions, EngineError> {
        let status = media_status(recorder)?
            .ok_or_else(|| EngineError::not_supported("no media in drive"))?;
        // drutil only reports totals, so all sessions collapse into one extent
        let sessions = if status.sessions == 0 || status.used_blocks == 0 {
            Vec::new()
        } else {
            vec![SessionExtent {
                start_sector: 0,
                sector_count: status.used_blocks,
            }]
        };
        Ok(PriorSessions { sessions })
    }

    fn write(
        &mut self,
        recorder: &mut dyn RecorderHandle,
        mut image: ImageStream,
        options: &WriteOptions,
        on_event: &mut dyn FnMut(&WriteEvent) -> ControlFlow<()>,
    ) -> Result<(), EngineError> {
        let spooled;
        let image_path: PathBuf = match image.backing_path() {
            Some(path) => path.to_path_buf(),
            None => {
                let mut file = tempfile::Builder::new()
                    .prefix("discburner-")
                    .suffix(".iso")
                    .tempfile()?;
                io::copy(&mut image, &mut file)?;
                spooled = file.into_temp_path();
                spooled.to_path_buf()
            }
        };
        let image_str = image_path
            .to_str()
            .ok_or_else(|| EngineError::new(E_TOOL_FAILED, "image path is not valid UTF-8"))?;

        let device = burn_device(recorder)?;
        let mut args = vec!["burn", "-puppetstrings", "-noeject"];
        if let Some(device) = device.as_deref() {
            args.extend(["-device", device]);
        }
        if options.verification == VerificationLevel::None {
            args.push("-noverifyburn");
        }
        if options.close_media {
            args.push("-forceclose");
        }
        args.push(image_str);

        log::info!(
            "Starting burn of {} to drive {} for {}",
            image_path.display(),
            recorder.id(),
            options.client_name
        );

        let (mut child, stderr) = spawn_tool(
            Command::new("hdiutil").args(&args).stdout(Stdio::piped()),
            "hdiutil burn",
        )?;

        let sector_count = image.sector_count() as i64;
        let started = Instant::now();
        let mut event = WriteEvent {
            action: Some(WriteAction::ValidatingMedia),
            sector_count,
            ..WriteEvent::default()
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::new(E_TOOL_FAILED, "hdiutil stdout unavailable"))?;

        for line in BufReader::new(stdout).lines() {
            let line = line?;
            match parse_puppet_line(&line) {
                Some(PuppetLine::Percent(percent)) if percent >= 0.0 => {
                    if event.action != Some(WriteAction::Verifying) {
                        event.action = Some(WriteAction::WritingData);
                    }
                    event.last_written_lba = (sector_count as f64 * percent / 100.0) as i64;
                    event.last_read_lba = event.last_written_lba;
                }
                Some(PuppetLine::Message(message)) => {
                    log::debug!("hdiutil: {}", message);
                    match action_for_message(&message) {
                        Some(action) => event.action = Some(action),
                        None => continue,
                    }
                }
                _ => continue,
            }

            let elapsed = started.elapsed().as_secs() as i64;
            event.elapsed_secs = elapsed;
            if event.last_written_lba > 0 {
                event.total_secs = elapsed * sector_count / event.last_written_lba;
                event.remaining_secs = (event.total_secs - elapsed).max(0);
            }

            if on_event(&event).is_break() {
                log::info!("Burn cancelled - interrupting hdiutil");
                interrupt(&mut child);
                let _ = child.wait();
                return Err(EngineError::cancelled());
            }
        }

        let status = child.wait()?;
        if !status.success() {
            return Err(EngineError::new(
                E_TOOL_FAILED,
                format!("hdiutil burn failed: {}", captured_stderr(stderr)),
            ));
        }

        event.action = Some(WriteAction::Completed);
        event.last_written_lba = sector_count;
        event.remaining_secs = 0;
        // Completion is final, a cancel request here has nothing left to stop
        let _ = on_event(&event);
        Ok(())
    }

    fn close_media(&mut self, recorder: &mut dyn RecorderHandle) -> Result<(), EngineError> {
        // hdiutil closes the disc itself when burning with -forceclose
        log::debug!("Media in drive {} closed by hdiutil", recorder.id());
        Ok(())
    }
}

struct DrutilEraser;

impl EraseEngine for DrutilEraser {
    fn erase(
        &mut self,
        recorder: &mut dyn RecorderHandle,
        full: bool,
        on_event: &mut dyn FnMut(&EraseEvent),
    ) -> Result<(), EngineError> {
        let (mode, estimate) = if full {
            ("full", FULL_ERASE_SECS)
        } else {
            ("quick", QUICK_ERASE_SECS)
        };
        log::info!("Starting {} erase of drive {}", mode, recorder.id());

        let (mut child, stderr) = spawn_tool(
            Command::new("drutil")
                .args(["-drive", recorder.id().0.as_str(), "erase", mode])
                .stdout(Stdio::null()),
            "drutil erase",
        )?;

        let started = Instant::now();
        loop {
            match child.try_wait()? {
                Some(status) if status.success() => return Ok(()),
                Some(_) => {
                    return Err(EngineError::new(
                        E_TOOL_FAILED,
                        format!("drutil erase failed: {}", captured_stderr(stderr)),
                    ));
                }
                None => {
                    on_event(&EraseEvent {
                        elapsed_secs: started.elapsed().as_secs() as u32,
                        estimated_total_secs: estimate,
                    });
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }
}

/// Image built by `hdiutil makehybrid` from a staging directory
///
/// Files are hard-linked into the staging tree when possible and copied
/// otherwise. The staging directory is removed when the engine is dropped.
struct MakehybridImage {
    staging: TempDir,
    volume_name: String,
    file_systems: FileSystems,
    free_blocks: u64,
    used_blocks: u64,
}

impl MakehybridImage {
    fn new() -> Result<Self, EngineError> {
        let staging = tempfile::Builder::new()
            .prefix("discburner-staging-")
            .tempdir()?;
        Ok(Self {
            staging,
            volume_name: String::new(),
            file_systems: FileSystems::default(),
            free_blocks: 0,
            used_blocks: 0,
        })
    }

    fn staged(&self, image_path: &str) -> PathBuf {
        image_path
            .split('/')
            .filter(|c| !c.is_empty())
            .fold(self.staging.path().to_path_buf(), |path, c| path.join(c))
    }
}

impl ImageEngine for MakehybridImage {
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
        Err(EngineError::not_supported(format!(
            "hdiutil cannot import {} prior session(s)",
            sessions.len()
        )))
    }

    fn free_media_blocks(&self) -> u64 {
        self.free_blocks.saturating_sub(self.used_blocks)
    }

    fn add_directory(&mut self, image_path: &str) -> Result<(), EngineError> {
        fs::create_dir_all(self.staged(image_path))?;
        Ok(())
    }

    fn add_file(&mut self, image_path: &str, source: &Path) -> Result<(), EngineError> {
        let dest = self.staged(image_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        if fs::hard_link(source, &dest).is_err() {
            fs::copy(source, &dest)?;
        }
        self.used_blocks += sectors_for(fs::metadata(&dest)?.len());
        Ok(())
    }

    fn finalize(&mut self) -> Result<ImageStream, EngineError> {
        let iso_path: TempPath = tempfile::Builder::new()
            .prefix("discburner-")
            .suffix(".iso")
            .tempfile()?
            .into_temp_path();
        // makehybrid refuses to overwrite an existing file
        fs::remove_file(&iso_path)?;

        let iso_str = iso_path
            .to_str()
            .ok_or_else(|| EngineError::new(E_TOOL_FAILED, "image path is not valid UTF-8"))?;
        let staging_str = self
            .staging
            .path()
            .to_str()
            .ok_or_else(|| EngineError::new(E_TOOL_FAILED, "staging path is not valid UTF-8"))?;

        let mut args = vec!["makehybrid"];
        if self.file_systems.iso9660 {
            args.extend(["-iso", "-default-volume-name", self.volume_name.as_str()]);
        }
        if self.file_systems.joliet {
            args.extend(["-joliet", "-joliet-volume-name", self.volume_name.as_str()]);
        }
        if self.file_systems.udf {
            args.extend(["-udf", "-udf-volume-name", self.volume_name.as_str()]);
        }
        args.extend(["-o", iso_str, staging_str]);

        log::info!(
            "Creating image '{}' with {} sectors of content",
            self.volume_name,
            self.used_blocks
        );
        run_tool("hdiutil", &args)?;

        let len = fs::metadata(&iso_path)?.len();
        let reader = File::open(&iso_path)?;
        Ok(ImageStream::with_backing_file(
            len.div_ceil(SECTOR_SIZE),
            Box::new(reader),
            iso_path,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = "   Vendor   Product           Rev   Bus       SupportLevel
1  HL-DT-ST DVDRW  GX40N      RQ00  USB       Unsupported
2  MATSHITA DVD-R   UJ-868    KB19  ATAPI     Apple Shipping
";

    const INFO: &str = " Vendor   Product           Rev
 HL-DT-ST DVDRW  GX40N      RQ00

   Interconnect: USB
   SupportLevel: Unsupported
   Profile Path: None
          Cache: 768k
       CD-Write: -R, -RW, BUFE, Test, IndexPts, ISRC
      DVD-Write: -R, -R DL, -RW, +R, +R DL, +RW, BUFE, Test
 Write Strategies: CD-TAO, CD-SAO, CD-Raw, DVD-DAO
          Media: Insert media and type 'drutil status' for more info.
";

    const STATUS_BLANK: &str = " Vendor   Product           Rev
 HL-DT-ST DVDRW  GX40N      RQ00

           Type: CD-R                 Name: /dev/disk4
       Sessions: 0                  Tracks: 0
   Overwritable:   00:00:00         blocks:        0 /   0.00MB /   0.00MiB
     Space Free:   79:57:74         blocks:   359849 / 736.97MB / 702.83MiB
     Space Used:   00:00:00         blocks:        0 /   0.00MB /   0.00MiB
    Writability: appendable, blank
";

    const STATUS_USED: &str = "           Type: CD-RW                Name: /dev/disk5
       Sessions: 2                  Tracks: 2
     Space Free:   50:00:00         blocks:   225000 / 460.80MB / 439.45MiB
     Space Used:   29:57:74         blocks:   134849 / 276.17MB / 263.38MiB
    Writability: appendable, overwritable
";

    const BURN_LIST: &str = "IOService:/AppleARMPE/arm-io/usb-drd1/usb-drd1-port-hs/USB DVDRW@01100000/IOUSBMassStorageDriverNub/IOUSBMassStorageDriver/IOSCSILogicalUnitNub@0/IOSCSIPeripheralDeviceType05/IODVDServices
\tHL-DT-ST DVDRW  GX40N RQ00
IOService:/AppleACPIPlatformExpert/PCI0@0/AppleACPIPCI/SATA@1F,2/AppleAHCI/PRT1@1/IOAHCIDevice@0/AppleAHCIDiskDriver/IOAHCIBlockStorageDevice/IODVDServices
\tMATSHITA DVD-R   UJ-868 KB19
";

    #[test]
    fn test_parse_drive_list() {
        let drives = parse_drive_list(LIST);
        assert_eq!(drives.len(), 2);
        assert_eq!(drives[0].0, DeviceId("1".to_string()));
        assert_eq!(drives[0].1, "HL-DT-ST DVDRW GX40N");
        assert_eq!(drives[1].0, DeviceId("2".to_string()));
    }

    #[test]
    fn test_parse_drive_list_empty() {
        assert!(parse_drive_list("   Vendor   Product   Rev   Bus   SupportLevel\n").is_empty());
    }

    #[test]
    fn test_parse_drive_info_profiles() {
        let info = parse_drive_info(INFO);
        assert_eq!(info.product, "HL-DT-ST DVDRW GX40N RQ00");
        assert_eq!(
            info.profiles,
            vec![
                ProfileType::CdRecordable,
                ProfileType::CdRewritable,
                ProfileType::DvdDashRecordable,
                ProfileType::DvdDashRDualLayerJump,
                ProfileType::DvdDashRewritable,
                ProfileType::DvdPlusR,
                ProfileType::DvdPlusRDual,
                ProfileType::DvdPlusRw,
            ]
        );
    }

    #[test]
    fn test_parse_blank_status() {
        let status = parse_media_status(STATUS_BLANK).unwrap();
        assert_eq!(status.media_type, MediaType::CdR);
        assert_eq!(status.device_node.as_deref(), Some("/dev/disk4"));
        assert!(status.blank);
        assert!(status.writable);
        assert_eq!(status.free_blocks, 359_849);
        assert_eq!(status.used_blocks, 0);
        assert_eq!(status.sessions, 0);
    }

    #[test]
    fn test_parse_used_status() {
        let status = parse_media_status(STATUS_USED).unwrap();
        assert_eq!(status.media_type, MediaType::CdRw);
        assert!(!status.blank);
        assert!(status.writable);
        assert_eq!(status.sessions, 2);
        assert_eq!(status.used_blocks, 134_849);
    }

    #[test]
    fn test_parse_no_media() {
        let output = " Vendor   Product\n HL-DT-ST DVDRW\n\n           Type: No Media Inserted\n";
        assert!(parse_media_status(output).is_none());
    }

    #[test]
    fn test_parse_puppet_lines() {
        assert_eq!(
            parse_puppet_line("PERCENT:12.500000"),
            Some(PuppetLine::Percent(12.5))
        );
        assert_eq!(
            parse_puppet_line("PERCENT:-1.000000"),
            Some(PuppetLine::Percent(-1.0))
        );
        assert_eq!(
            parse_puppet_line("MESSAGE:Opening session"),
            Some(PuppetLine::Message("Opening session".to_string()))
        );
        assert_eq!(parse_puppet_line("garbage"), None);
    }

    #[test]
    fn test_action_for_message() {
        assert_eq!(
            action_for_message("Preparing data for burn"),
            Some(WriteAction::ValidatingMedia)
        );
        assert_eq!(
            action_for_message("Closing session"),
            Some(WriteAction::Finalization)
        );
        assert_eq!(
            action_for_message("Verifying burn..."),
            Some(WriteAction::Verifying)
        );
        assert_eq!(action_for_message("Writing track"), None);
    }

    #[test]
    fn test_parse_burn_devices() {
        let devices = parse_burn_devices(BURN_LIST);
        assert_eq!(devices.len(), 2);
        assert!(devices[0].path.starts_with("IOService:/AppleARMPE"));
        assert_eq!(devices[0].description, "HL-DT-ST DVDRW GX40N RQ00");
        assert_eq!(devices[1].description, "MATSHITA DVD-R UJ-868 KB19");
    }

    #[test]
    fn test_burn_device_matches_selected_drive() {
        let devices = parse_burn_devices(BURN_LIST);
        let info = parse_drive_info(INFO);

        let device = burn_device_for(&devices, &info.product).unwrap();
        assert_eq!(device.as_deref(), Some(devices[0].path.as_str()));

        let second = burn_device_for(&devices, "MATSHITA  DVD-R UJ-868 KB19").unwrap();
        assert_eq!(second.as_deref(), Some(devices[1].path.as_str()));
    }

    #[test]
    fn test_burn_device_unmapped_with_several_drives() {
        let devices = parse_burn_devices(BURN_LIST);
        let err = burn_device_for(&devices, "PIONEER BD-RW BDR-XD07").unwrap_err();
        assert_eq!(err.code, E_NOT_SUPPORTED);

        let twins = vec![devices[0].clone(), devices[0].clone()];
        let err = burn_device_for(&twins, "HL-DT-ST DVDRW GX40N RQ00").unwrap_err();
        assert_eq!(err.code, E_NOT_SUPPORTED);
    }

    #[test]
    fn test_burn_device_defaults_with_single_drive() {
        let devices = parse_burn_devices(BURN_LIST);
        let only = vec![devices[1].clone()];
        assert_eq!(burn_device_for(&only, "PIONEER BD-RW BDR-XD07").unwrap(), None);
        assert_eq!(burn_device_for(&[], "PIONEER BD-RW BDR-XD07").unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_spawned_tool_stderr_is_not_a_pipe() {
        // Far more than a pipe buffer holds, with stdout left unread until exit
        let (mut child, stderr) = spawn_tool(
            Command::new("sh")
                .args(["-c", "head -c 200000 /dev/zero | tr '\\0' x >&2; exit 3"])
                .stdout(Stdio::null()),
            "sh",
        )
        .unwrap();

        let status = child.wait().unwrap();
        assert!(!status.success());
        assert_eq!(captured_stderr(stderr).len(), 200_000);
    }

    #[test]
    fn test_staged_paths_stay_inside_staging() {
        let image = MakehybridImage::new().unwrap();
        let staged = image.staged("photos/trip 1/beach.jpg");
        assert!(staged.starts_with(image.staging.path()));
        assert!(staged.ends_with("photos/trip 1/beach.jpg"));
    }

    #[test]
    fn test_staging_tracks_used_blocks() {
        let source = tempfile::tempdir().unwrap();
        let file = source.path().join("a.bin");
        fs::write(&file, vec![0u8; 3000]).unwrap();

        let mut image = MakehybridImage::new().unwrap();
        image.choose_defaults(MediaType::CdR).unwrap();
        image.add_directory("docs").unwrap();
        image.add_file("docs/a.bin", &file).unwrap();

        assert!(image.staged("docs/a.bin").exists());
        assert_eq!(image.free_media_blocks(), 359_847 - 2);
        assert!(image.import_prior_sessions(&PriorSessions::default()).is_err());
    }
}
