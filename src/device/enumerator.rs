//! Recorder discovery

use std::fmt;

use super::{DeviceId, DeviceSubsystem, ProfileType};
use crate::core::JobError;

/// A discovered recorder and the media profiles it supports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderDescriptor {
    pub id: DeviceId,
    pub product_id: String,
    pub volume_paths: Vec<String>,
    pub profiles: Vec<ProfileType>,
}

impl RecorderDescriptor {
    /// Label shown to the user, e.g. "E:\,F:\ [DVD-RW DRIVE]"
    pub fn label(&self) -> String {
        format!("{} [{}]", self.volume_paths.join(","), self.product_id)
    }

    /// Comma separated names of the supported profiles, skipping unnamed ones
    pub fn supported_media_summary(&self) -> String {
        self.profiles
            .iter()
            .map(ProfileType::display_name)
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn supports(&self, profile: ProfileType) -> bool {
        self.profiles.contains(&profile)
    }
}

impl fmt::Display for RecorderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// List every recorder attached to the host, in subsystem order.
///
/// Handles opened to read labels and profiles are released before returning.
/// Any failure yields an error and no partial list.
pub fn list_recorders(
    subsystem: &dyn DeviceSubsystem,
) -> Result<Vec<RecorderDescriptor>, JobError> {
    match subsystem.is_supported_environment() {
        Ok(true) => {}
        Ok(false) => {
            log::error!("Disc recording is not supported in this environment");
            return Err(JobError::EnvironmentUnsupported);
        }
        Err(e) => {
            log::error!("Could not query recording support: {}", e);
            return Err(JobError::EnvironmentUnsupported);
        }
    }

    let ids = subsystem.enumerate().map_err(JobError::environment)?;
    let mut recorders = Vec::with_capacity(ids.len());

    for id in ids {
        let handle = subsystem.open(&id).map_err(JobError::device_unavailable)?;
        let profiles = handle
            .supported_profiles()
            .map_err(JobError::device_unavailable)?;

        recorders.push(RecorderDescriptor {
            id: handle.id().clone(),
            product_id: handle.product_id(),
            volume_paths: handle.volume_paths(),
            profiles,
        });
    }

    log::info!("Found {} recorder(s)", recorders.len());
    Ok(recorders)
}

/// Verify the write engine supports a recorder selected by the user.
///
/// Returns the recorder's supported media summary.
pub fn check_recorder(
    subsystem: &dyn DeviceSubsystem,
    recorder: &RecorderDescriptor,
) -> Result<String, JobError> {
    let handle = subsystem
        .open(&recorder.id)
        .map_err(JobError::device_unavailable)?;
    let engine = subsystem.write_engine().map_err(JobError::environment)?;

    match engine.is_recorder_supported(handle.as_ref()) {
        Ok(true) => Ok(recorder.supported_media_summary()),
        Ok(false) => {
            log::warn!("Recorder {} is not supported", recorder.label());
            Err(JobError::RecorderNotSupported)
        }
        Err(e) => Err(JobError::environment(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::simulated::{
        JournalEntry, Resource, Scenario, SimulatedDevice, SimulatedSubsystem,
    };

    #[test]
    fn test_label_joins_volume_paths() {
        let recorder = RecorderDescriptor {
            id: DeviceId("rec-0".to_string()),
            product_id: "DVD-RW DRIVE".to_string(),
            volume_paths: vec!["E:\\".to_string(), "F:\\".to_string()],
            profiles: vec![],
        };
        assert_eq!(recorder.label(), "E:\\,F:\\ [DVD-RW DRIVE]");
        assert_eq!(recorder.to_string(), recorder.label());
    }

    #[test]
    fn test_supported_media_summary_skips_unnamed() {
        let recorder = RecorderDescriptor {
            id: DeviceId("rec-0".to_string()),
            product_id: "X".to_string(),
            volume_paths: vec![],
            profiles: vec![
                ProfileType::CdRecordable,
                ProfileType::Other(0x99),
                ProfileType::DvdPlusRw,
            ],
        };
        assert_eq!(recorder.supported_media_summary(), "CD-R, DVD+RW");
        assert!(recorder.supports(ProfileType::DvdPlusRw));
        assert!(!recorder.supports(ProfileType::BdRom));
    }

    #[test]
    fn test_list_recorders_in_order_and_releases_handles() {
        let scenario = Scenario::new()
            .with_device(SimulatedDevice::cd_writer("rec-0"))
            .with_device(SimulatedDevice::cd_writer("rec-1"));
        let subsystem = SimulatedSubsystem::new(scenario);

        let recorders = list_recorders(&subsystem).unwrap();
        let ids: Vec<&str> = recorders.iter().map(|r| r.id.0.as_str()).collect();
        assert_eq!(ids, vec!["rec-0", "rec-1"]);
        assert!(subsystem.journal().all_released());
        assert!(subsystem.journal().contains(&JournalEntry::Released(Resource::Recorder(
            DeviceId("rec-1".to_string())
        ))));
    }

    #[test]
    fn test_unsupported_environment_yields_no_recorders() {
        let scenario = Scenario::new()
            .with_device(SimulatedDevice::cd_writer("rec-0"))
            .unsupported_environment();
        let subsystem = SimulatedSubsystem::new(scenario);

        assert_eq!(list_recorders(&subsystem), Err(JobError::EnvironmentUnsupported));
        assert!(subsystem.journal().entries().is_empty());
    }

    #[test]
    fn test_failing_device_yields_no_partial_list() {
        let mut broken = SimulatedDevice::cd_writer("rec-1");
        broken.open_failure = Some(-7);
        let scenario = Scenario::new()
            .with_device(SimulatedDevice::cd_writer("rec-0"))
            .with_device(broken);
        let subsystem = SimulatedSubsystem::new(scenario);

        assert_eq!(
            list_recorders(&subsystem),
            Err(JobError::DeviceUnavailable { code: -7 })
        );
        assert!(subsystem.journal().all_released());
    }

    #[test]
    fn test_check_recorder_rejects_unsupported() {
        let mut device = SimulatedDevice::cd_writer("rec-0");
        device.recorder_supported = false;
        let subsystem = SimulatedSubsystem::new(Scenario::new().with_device(device));
        let recorders = list_recorders(&subsystem).unwrap();

        assert_eq!(
            check_recorder(&subsystem, &recorders[0]),
            Err(JobError::RecorderNotSupported)
        );
    }

    #[test]
    fn test_check_recorder_returns_summary() {
        let subsystem = SimulatedSubsystem::new(
            Scenario::new().with_device(SimulatedDevice::cd_writer("rec-0")),
        );
        let recorders = list_recorders(&subsystem).unwrap();
        assert_eq!(check_recorder(&subsystem, &recorders[0]).unwrap(), "CD-R, CD-RW");
    }
}
