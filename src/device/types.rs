//! Value types exchanged with the device subsystem
//!
//! Contains:
//! - DeviceId: opaque, stable recorder identifier
//! - ProfileType / MediaType: media profiles and physical media kinds
//! - MediaInfo / PriorSessions: raw media probe results
//! - WriteEvent / WriteAction / EraseEvent: engine progress events
//! - ImageStream: the finished image handed to the write engine
//! - EngineError: raw collaborator failure

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use tempfile::TempPath;
use thiserror::Error;

/// Size in bytes of one addressable sector on optical media
pub const SECTOR_SIZE: u64 = 2048;

/// Engine code reported when a write was aborted on request
pub const E_REQUEST_CANCELLED: i32 = 0xC0AA_0002_u32 as i32;
/// Engine code for an operation the backend cannot perform
pub const E_NOT_SUPPORTED: i32 = 0x8004_0001_u32 as i32;
/// Engine code for a recorder that has disappeared
pub const E_DEVICE_MISSING: i32 = 0xC0AA_0205_u32 as i32;
/// Engine code for a failure to launch or talk to a helper tool
pub const E_TOOL_FAILED: i32 = 0x8004_0002_u32 as i32;

/// Raw failure reported by a collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code:#010x})")]
pub struct EngineError {
    pub code: i32,
    pub message: String,
}

impl EngineError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(E_REQUEST_CANCELLED, "request cancelled")
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(E_NOT_SUPPORTED, message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == E_REQUEST_CANCELLED
    }
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        EngineError::new(E_TOOL_FAILED, err.to_string())
    }
}

/// Opaque, stable identifier of a recorder
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Media profile a recorder can handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfileType {
    CdRecordable,
    CdRewritable,
    DvdRom,
    DvdDashRecordable,
    DvdRam,
    DvdPlusR,
    DvdPlusRw,
    DvdPlusRDual,
    DvdDashRewritable,
    DvdDashRwSequential,
    DvdDashRDualSequential,
    DvdDashRDualLayerJump,
    DvdPlusRwDual,
    HdDvdRom,
    HdDvdRecordable,
    HdDvdRam,
    BdRom,
    BdRSequential,
    BdRRandomRecording,
    BdRewritable,
    /// Profiles the application has no name for
    Other(u16),
}

impl ProfileType {
    /// Display name, empty for profiles that are not shown
    pub fn display_name(&self) -> &'static str {
        match self {
            ProfileType::CdRecordable => "CD-R",
            ProfileType::CdRewritable => "CD-RW",
            ProfileType::DvdRom => "DVD ROM",
            ProfileType::DvdDashRecordable => "DVD-R",
            ProfileType::DvdRam => "DVD-RAM",
            ProfileType::DvdPlusR => "DVD+R",
            ProfileType::DvdPlusRw => "DVD+RW",
            ProfileType::DvdPlusRDual => "DVD+R Dual Layer",
            ProfileType::DvdDashRewritable => "DVD-RW",
            ProfileType::DvdDashRwSequential => "DVD-RW Sequential",
            ProfileType::DvdDashRDualSequential => "DVD-R DL Sequential",
            ProfileType::DvdDashRDualLayerJump => "DVD-R Dual Layer",
            ProfileType::DvdPlusRwDual => "DVD+RW DL",
            ProfileType::HdDvdRom => "HD DVD-ROM",
            ProfileType::HdDvdRecordable => "HD DVD-R",
            ProfileType::HdDvdRam => "HD DVD-RAM",
            ProfileType::BdRom => "Blu-ray DVD (BD-ROM)",
            ProfileType::BdRSequential => "Blu-ray media Sequential",
            ProfileType::BdRRandomRecording => "Blu-ray media",
            ProfileType::BdRewritable => "Blu-ray Rewritable media",
            ProfileType::Other(_) => "",
        }
    }
}

/// Physical media currently in a recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Unknown,
    CdRom,
    CdR,
    CdRw,
    DvdRom,
    DvdRam,
    DvdPlusR,
    DvdPlusRw,
    DvdPlusRDualLayer,
    DvdDashR,
    DvdDashRw,
    DvdDashRDualLayer,
    /// Random-access writable media
    Disk,
    DvdPlusRwDualLayer,
    HdDvdRom,
    HdDvdR,
    HdDvdRam,
    BdRom,
    BdR,
    BdRe,
}

impl MediaType {
    pub fn display_name(&self) -> &'static str {
        match self {
            MediaType::Unknown => "Unknown Media Type",
            MediaType::CdRom => "CD-ROM",
            MediaType::CdR => "CD-R",
            MediaType::CdRw => "CD-RW",
            MediaType::DvdRom => "DVD ROM",
            MediaType::DvdRam => "DVD-RAM",
            MediaType::DvdPlusR => "DVD+R",
            MediaType::DvdPlusRw => "DVD+RW",
            MediaType::DvdPlusRDualLayer => "DVD+R Dual Layer",
            MediaType::DvdDashR => "DVD-R",
            MediaType::DvdDashRw => "DVD-RW",
            MediaType::DvdDashRDualLayer => "DVD-R Dual Layer",
            MediaType::Disk => "random-access writes",
            MediaType::DvdPlusRwDualLayer => "DVD+RW DL",
            MediaType::HdDvdRom => "HD DVD-ROM",
            MediaType::HdDvdR => "HD DVD-R",
            MediaType::HdDvdRam => "HD DVD-RAM",
            MediaType::BdRom => "Blu-ray DVD (BD-ROM)",
            MediaType::BdR => "Blu-ray media",
            MediaType::BdRe => "Blu-ray Rewritable media",
        }
    }

    /// Nominal sector capacity of blank media of this type
    pub fn nominal_sectors(&self) -> u64 {
        match self {
            MediaType::CdR | MediaType::CdRw | MediaType::CdRom => 359_847,
            MediaType::DvdPlusRDualLayer
            | MediaType::DvdDashRDualLayer
            | MediaType::DvdPlusRwDualLayer => 4_173_824,
            MediaType::DvdRom
            | MediaType::DvdRam
            | MediaType::DvdPlusR
            | MediaType::DvdPlusRw
            | MediaType::DvdDashR
            | MediaType::DvdDashRw => 2_295_104,
            MediaType::HdDvdRom | MediaType::HdDvdR | MediaType::HdDvdRam => 7_361_536,
            MediaType::BdRom | MediaType::BdR | MediaType::BdRe => 12_219_392,
            MediaType::Unknown | MediaType::Disk => 0,
        }
    }
}

/// A previously recorded session on the media
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionExtent {
    pub start_sector: u64,
    pub sector_count: u64,
}

/// Prior-session data usable for multisession import
///
/// Only produced for media that is not heuristically blank.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PriorSessions {
    pub sessions: Vec<SessionExtent>,
}

impl PriorSessions {
    pub fn used_sectors(&self) -> u64 {
        self.sessions.iter().map(|s| s.sector_count).sum()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Raw result of probing the media in a recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaInfo {
    pub media_type: MediaType,
    /// Best-effort guess that no recognizable session exists
    pub heuristically_blank: bool,
    pub free_sectors: u64,
}

/// Phase reported by the write engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteAction {
    ValidatingMedia,
    FormattingMedia,
    InitializingHardware,
    CalibratingPower,
    WritingData,
    Finalization,
    Completed,
    Verifying,
}

/// One progress notification from the write engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteEvent {
    pub action: Option<WriteAction>,
    pub elapsed_secs: i64,
    pub remaining_secs: i64,
    pub total_secs: i64,
    pub start_lba: i64,
    pub sector_count: i64,
    pub last_read_lba: i64,
    pub last_written_lba: i64,
    pub total_system_buffer: i64,
    pub used_system_buffer: i64,
    pub free_system_buffer: i64,
}

/// One progress notification from the erase engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseEvent {
    pub elapsed_secs: u32,
    pub estimated_total_secs: u32,
}

/// File systems written into the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSystems {
    pub iso9660: bool,
    pub joliet: bool,
    pub udf: bool,
}

impl Default for FileSystems {
    fn default() -> Self {
        Self {
            iso9660: true,
            joliet: true,
            udf: false,
        }
    }
}

/// Finished file-system image, ready to stream to the write engine
///
/// Dropping the stream releases it, including any temporary backing file.
pub struct ImageStream {
    sector_count: u64,
    reader: Box<dyn Read + Send>,
    backing: Option<TempPath>,
}

impl ImageStream {
    pub fn new(sector_count: u64, reader: Box<dyn Read + Send>) -> Self {
        Self {
            sector_count,
            reader,
            backing: None,
        }
    }

    /// Stream backed by a temporary file that is deleted with the stream
    pub fn with_backing_file(
        sector_count: u64,
        reader: Box<dyn Read + Send>,
        path: TempPath,
    ) -> Self {
        Self {
            sector_count,
            reader,
            backing: Some(path),
        }
    }

    pub fn sector_count(&self) -> u64 {
        self.sector_count
    }

    pub fn backing_path(&self) -> Option<&Path> {
        self.backing.as_deref()
    }
}

impl Read for ImageStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl fmt::Debug for ImageStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageStream")
            .field("sector_count", &self.sector_count)
            .field("backing", &self.backing_path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_names() {
        assert_eq!(ProfileType::CdRecordable.display_name(), "CD-R");
        assert_eq!(ProfileType::DvdPlusRDual.display_name(), "DVD+R Dual Layer");
        assert_eq!(ProfileType::BdRewritable.display_name(), "Blu-ray Rewritable media");
        assert!(ProfileType::Other(0x42).display_name().is_empty());
    }

    #[test]
    fn test_media_names() {
        assert_eq!(MediaType::Unknown.display_name(), "Unknown Media Type");
        assert_eq!(MediaType::CdRw.display_name(), "CD-RW");
        assert_eq!(MediaType::Disk.display_name(), "random-access writes");
    }

    #[test]
    fn test_prior_sessions_used_sectors() {
        let sessions = PriorSessions {
            sessions: vec![
                SessionExtent {
                    start_sector: 0,
                    sector_count: 1000,
                },
                SessionExtent {
                    start_sector: 12_000,
                    sector_count: 500,
                },
            ],
        };
        assert_eq!(sessions.used_sectors(), 1500);
        assert_eq!(sessions.len(), 2);
    }

    #[test]
    fn test_cancelled_code() {
        assert!(EngineError::cancelled().is_cancelled());
        assert!(!EngineError::not_supported("nope").is_cancelled());
    }

    #[test]
    fn test_image_stream_reads_through() {
        let mut stream = ImageStream::new(1, Box::new(io::Cursor::new(vec![7u8; 4])));
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![7u8; 4]);
        assert_eq!(stream.sector_count(), 1);
        assert!(stream.backing_path().is_none());
    }
}
