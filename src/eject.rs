//! Eject pipeline (component C5): the per-device unmount → eject state
//! machine described in spec §4.5, plus the disk-image fallback strategy.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::ffi::bridge::{DaDissolveFlags, UnmountEject};
use crate::ffi::hdiutil;
use crate::group::PhysicalDeviceGroup;

/// Options controlling how a device is ejected (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EjectOptions {
    pub force: bool,
    pub eject_physical_device: bool,
}

impl EjectOptions {
    pub const fn default_preset() -> Self {
        EjectOptions {
            force: false,
            eject_physical_device: true,
        }
    }

    pub const fn unmount_only() -> Self {
        EjectOptions {
            force: false,
            eject_physical_device: false,
        }
    }

    pub const fn force_eject() -> Self {
        EjectOptions {
            force: true,
            eject_physical_device: true,
        }
    }
}

impl Default for EjectOptions {
    fn default() -> Self {
        Self::default_preset()
    }
}

/// Outcome for one volume (spec §3).
#[derive(Debug, Clone)]
pub struct SingleEjectResult {
    pub volume_name: String,
    pub volume_path: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration: Duration,
}

/// Which backend a group's ejection should go through (spec §9 Design
/// Notes: "a clearly separated strategy object").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EjectStrategy {
    DiskArbitration,
    Hdiutil,
}

impl EjectStrategy {
    /// All-or-nothing selection rule of spec §4.5: the disk-image fast
    /// path is taken only when every volume in the group is a disk image
    /// and the caller asked to eject the physical device.
    pub fn select(group: &PhysicalDeviceGroup, options: &EjectOptions) -> EjectStrategy {
        let flags: Vec<bool> = group.volumes.iter().map(|v| v.info.is_disk_image).collect();
        Self::select_from_flags(&flags, options.eject_physical_device)
    }

    fn select_from_flags(is_disk_image: &[bool], eject_physical_device: bool) -> EjectStrategy {
        let all_disk_images = !is_disk_image.is_empty() && is_disk_image.iter().all(|&b| b);
        if all_disk_images && eject_physical_device {
            EjectStrategy::Hdiutil
        } else {
            EjectStrategy::DiskArbitration
        }
    }
}

fn results_for_group(
    group: &PhysicalDeviceGroup,
    success: bool,
    error_message: Option<String>,
    duration: Duration,
) -> Vec<SingleEjectResult> {
    group
        .volumes
        .iter()
        .map(|v| SingleEjectResult {
            volume_name: v.info.name.clone(),
            volume_path: v.info.path.to_string_lossy().into_owned(),
            success,
            error_message: error_message.clone(),
            duration,
        })
        .collect()
}

/// Run the state machine of spec §4.5 for one physical-device group.
pub async fn eject_group(
    group: PhysicalDeviceGroup,
    options: EjectOptions,
    backend: &(impl UnmountEject + ?Sized),
) -> Vec<SingleEjectResult> {
    let start = Instant::now();

    if EjectStrategy::select(&group, &options) == EjectStrategy::Hdiutil {
        debug!(disk = %group.whole_disk_bsd, "disk-image fast path selected");
        let result = hdiutil::detach(&group.whole_disk_bsd, options.force).await;
        let duration = start.elapsed();
        if result.success {
            info!(disk = %group.whole_disk_bsd, "hdiutil detach succeeded");
        } else {
            warn!(disk = %group.whole_disk_bsd, error = ?result.error, "hdiutil detach failed");
        }
        return results_for_group(&group, result.success, result.error, duration);
    }

    if !options.eject_physical_device {
        return eject_unmount_only(group, options, backend, start).await;
    }

    let Some(whole_disk_handle) = group.whole_disk_handle.clone() else {
        // spec §9 Open Question: no whole-disk handle means we can only
        // unmount per-volume, which will not physically eject the device.
        // This is a documented partial-success condition, not an error.
        warn!(
            disk = %group.whole_disk_bsd,
            "no whole-disk handle; falling back to per-volume unmount only"
        );
        return eject_unmount_only(group, options, backend, start).await;
    };

    debug!(disk = %group.whole_disk_bsd, "Pending -> Unmounting (whole disk)");
    let flags = DaDissolveFlags {
        whole: true,
        force: options.force,
    };
    let unmount_result = backend.unmount(&whole_disk_handle, flags).await;

    if !unmount_result.success {
        let duration = start.elapsed();
        warn!(disk = %group.whole_disk_bsd, error = ?unmount_result.error, "unmount failed");
        return results_for_group(&group, false, unmount_result.error, duration);
    }

    debug!(disk = %group.whole_disk_bsd, "Unmounted -> Ejecting");
    let eject_result = backend.eject(&whole_disk_handle).await;
    let duration = start.elapsed();

    if eject_result.success {
        info!(disk = %group.whole_disk_bsd, "eject succeeded");
    } else {
        warn!(disk = %group.whole_disk_bsd, error = ?eject_result.error, "eject failed");
    }

    results_for_group(&group, eject_result.success, eject_result.error, duration)
}

/// Unmount-only mode (spec §4.5): iterate volumes serially, unmounting each
/// volume handle individually rather than the whole disk.
async fn eject_unmount_only(
    group: PhysicalDeviceGroup,
    options: EjectOptions,
    backend: &(impl UnmountEject + ?Sized),
    start: Instant,
) -> Vec<SingleEjectResult> {
    let mut results = Vec::with_capacity(group.volumes.len());
    let flags = DaDissolveFlags {
        whole: false,
        force: options.force,
    };

    for volume in &group.volumes {
        let result = backend.unmount(&volume.handle, flags).await;
        let duration = start.elapsed();
        if !result.success {
            warn!(volume = %volume.info.name, error = ?result.error, "per-volume unmount failed");
        }
        results.push(SingleEjectResult {
            volume_name: volume.info.name.clone(),
            volume_path: volume.info.path.to_string_lossy().into_owned(),
            success: result.success,
            error_message: result.error,
            duration,
        });
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_round_trip_matches_spec() {
        let default = EjectOptions::default_preset();
        assert!(!default.force);
        assert!(default.eject_physical_device);

        let unmount_only = EjectOptions::unmount_only();
        assert!(!unmount_only.force);
        assert!(!unmount_only.eject_physical_device);

        let force = EjectOptions::force_eject();
        assert!(force.force);
        assert!(force.eject_physical_device);
    }

    #[test]
    fn all_disk_images_with_eject_selects_hdiutil() {
        let strategy = EjectStrategy::select_from_flags(&[true, true], true);
        assert_eq!(strategy, EjectStrategy::Hdiutil);
    }

    #[test]
    fn mixed_disk_image_and_regular_volume_selects_disk_arbitration() {
        // spec §4.5 edge case: one disk-image volume, one regular volume in
        // the same group — the fast path is all-or-nothing.
        let strategy = EjectStrategy::select_from_flags(&[true, false], true);
        assert_eq!(strategy, EjectStrategy::DiskArbitration);
    }

    #[test]
    fn all_disk_images_without_eject_flag_selects_disk_arbitration() {
        let strategy = EjectStrategy::select_from_flags(&[true, true], false);
        assert_eq!(strategy, EjectStrategy::DiskArbitration);
    }

    #[test]
    fn empty_group_selects_disk_arbitration() {
        let strategy = EjectStrategy::select_from_flags(&[], true);
        assert_eq!(strategy, EjectStrategy::DiskArbitration);
    }
}
