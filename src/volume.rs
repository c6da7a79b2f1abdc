//! Volume model & enumerator (component C3): scans `/Volumes`, applies the
//! hard safety gates of spec §4.3, and builds [`Volume`] values carrying
//! cached device handles.

use std::path::{Path, PathBuf};

use objc2_foundation::{
    NSNumber, NSString, NSURLIsRootFileSystemKey, NSURLVolumeIsBrowsableKey,
    NSURLVolumeIsEjectableKey, NSURLVolumeIsInternalKey, NSURLVolumeIsLocalKey,
    NSURLVolumeIsRemovableKey, NSURL,
};
use tracing::{debug, trace};

use crate::error::DiskError;
use crate::ffi::{DaDiskHandle, DaSessionHandle};

/// Device-content types that mark a partition as part of the boot volume's
/// support infrastructure even when it otherwise looks removable (spec
/// §4.3 step 5).
const SYSTEM_ONLY_CONTENT_TYPES: [&str; 4] = [
    "Apple_Boot",
    "Apple_APFS_Recovery",
    "Apple_APFS_ISC",
    "Apple_KernelCoreDump",
];

const SKIP_PREFIXES: [&str; 3] = [".", "com.apple.", "Backups of "];

/// Immutable descriptor for one mounted volume (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub name: String,
    pub path: PathBuf,
    pub bsd_name: Option<String>,
    pub is_ejectable: bool,
    pub is_removable: bool,
    pub is_internal: bool,
    pub is_disk_image: bool,
}

/// A [`VolumeInfo`] plus the two opaque OS handles needed to unmount/eject
/// it. Owned by the enumeration; ownership transfers to the batch pipeline.
#[derive(Clone)]
pub struct Volume {
    pub info: VolumeInfo,
    pub(crate) handle: DaDiskHandle,
    pub(crate) whole_disk_handle: Option<DaDiskHandle>,
}

impl Volume {
    pub fn whole_disk_bsd_name(&self) -> Option<String> {
        self.whole_disk_handle.as_ref().and_then(|h| h.bsd_name())
    }
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume").field("info", &self.info).finish()
    }
}

fn should_skip_name(name: &str) -> bool {
    SKIP_PREFIXES.iter().any(|p| name.starts_with(p))
}

fn media_content_is_system_only(handle: &DaDiskHandle) -> bool {
    let Some(content) = handle.description_string("MediaContent") else {
        return false;
    };
    SYSTEM_ONLY_CONTENT_TYPES.contains(&content.as_str())
}

fn device_model_is_disk_image(handle: &DaDiskHandle) -> bool {
    handle.description_string("DeviceModel").as_deref() == Some("Disk Image")
}

/// spec §4.3 step 5's second, independent skip condition: DiskArbitration
/// itself flags some containers (certain hidden/system volumes that still
/// pass the NSURL capability gates) as not user-mountable. Absence of the
/// key is treated as mountable, matching the OS default.
fn disk_is_not_user_mountable(handle: &DaDiskHandle) -> bool {
    handle.description_bool("VolumeMountable") == Some(false)
}

/// Capability bits read from the filesystem's resource-value API for one
/// mount point (spec §4.3 step 2). `is_local` is queried per the spec but
/// not consulted by any safety gate below; kept for parity with step 2.
#[allow(dead_code)]
struct CapabilityBits {
    is_root_filesystem: bool,
    is_browsable: bool,
    is_ejectable: bool,
    is_removable: bool,
    is_internal: bool,
    is_local: bool,
}

/// Read one boolean resource value off an `NSURL`, mirroring the
/// `getResourceValue:forKey:error:` + `NSNumber` downcast pattern used
/// throughout the example pack for per-key `NSURL` resource queries.
fn get_bool_resource_value(url: &NSURL, key: &NSString) -> bool {
    let mut value: Option<objc2::rc::Retained<objc2::runtime::AnyObject>> = None;
    let ok = unsafe { url.getResourceValue_forKey_error(&mut value, key) }.is_ok();
    if !ok {
        return false;
    }
    value
        .and_then(|v| v.downcast::<NSNumber>().ok())
        .map(|n| n.boolValue())
        .unwrap_or(false)
}

fn read_capability_bits(path: &Path) -> Option<CapabilityBits> {
    let url = NSURL::from_file_path(path)?;
    Some(CapabilityBits {
        is_root_filesystem: get_bool_resource_value(&url, unsafe { NSURLIsRootFileSystemKey }),
        is_browsable: get_bool_resource_value(&url, unsafe { NSURLVolumeIsBrowsableKey }),
        is_ejectable: get_bool_resource_value(&url, unsafe { NSURLVolumeIsEjectableKey }),
        is_removable: get_bool_resource_value(&url, unsafe { NSURLVolumeIsRemovableKey }),
        is_internal: get_bool_resource_value(&url, unsafe { NSURLVolumeIsInternalKey }),
        is_local: get_bool_resource_value(&url, unsafe { NSURLVolumeIsLocalKey }),
    })
}

fn passes_hard_safety_gates(bits: &CapabilityBits) -> bool {
    if bits.is_root_filesystem {
        return false;
    }
    if !bits.is_browsable {
        return false;
    }
    if !(bits.is_ejectable || bits.is_removable || !bits.is_internal) {
        return false;
    }
    true
}

/// Scan `/Volumes` and return every eligible, ejectable [`Volume`] (spec
/// §4.3). Enumeration itself is synchronous; this is an `async fn` purely
/// so it composes with the rest of the engine's async surface, running the
/// blocking directory walk on a dedicated thread.
pub async fn enumerate_ejectable(session: &DaSessionHandle) -> Result<Vec<Volume>, DiskError> {
    let session = session.clone();
    tokio::task::spawn_blocking(move || enumerate_ejectable_blocking(&session))
        .await
        .map_err(|_| DiskError::SessionCreationFailed)?
}

fn enumerate_ejectable_blocking(session: &DaSessionHandle) -> Result<Vec<Volume>, DiskError> {
    let mount_root = Path::new("/Volumes");
    let mut volumes = Vec::new();

    let entries = match std::fs::read_dir(mount_root) {
        Ok(entries) => entries,
        Err(_) => return Ok(volumes),
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();

        if should_skip_name(&name) {
            trace!(volume = %name, "skipping hidden/system volume by name prefix");
            continue;
        }

        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let Some(bits) = read_capability_bits(&path) else {
            continue;
        };

        if !passes_hard_safety_gates(&bits) {
            debug!(volume = %name, "failed hard safety gate, skipping");
            continue;
        }

        let Some(handle) = session.disk_for_volume_path(&path) else {
            continue;
        };

        if media_content_is_system_only(&handle) {
            debug!(volume = %name, "media content type is system-only, skipping");
            continue;
        }

        if disk_is_not_user_mountable(&handle) {
            debug!(volume = %name, "disk arbitration marks volume as not user-mountable, skipping");
            continue;
        }

        let bsd_name = handle.bsd_name();
        let is_disk_image = device_model_is_disk_image(&handle);
        let whole_disk_handle = handle.copy_whole_disk();

        volumes.push(Volume {
            info: VolumeInfo {
                name,
                path,
                bsd_name,
                is_ejectable: bits.is_ejectable,
                is_removable: bits.is_removable,
                is_internal: bits.is_internal,
                is_disk_image,
            },
            handle,
            whole_disk_handle,
        });
    }

    Ok(volumes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_names_match_spec_prefixes() {
        assert!(should_skip_name(".hidden"));
        assert!(should_skip_name("com.apple.TimeMachine.localsnapshots"));
        assert!(should_skip_name("Backups of MacBook"));
        assert!(!should_skip_name("My USB Drive"));
    }

    #[test]
    fn hard_gates_reject_root_filesystem_regardless_of_other_bits() {
        let bits = CapabilityBits {
            is_root_filesystem: true,
            is_browsable: true,
            is_ejectable: true,
            is_removable: true,
            is_internal: false,
            is_local: true,
        };
        assert!(!passes_hard_safety_gates(&bits));
    }

    #[test]
    fn hard_gates_reject_non_browsable() {
        let bits = CapabilityBits {
            is_root_filesystem: false,
            is_browsable: false,
            is_ejectable: true,
            is_removable: true,
            is_internal: false,
            is_local: true,
        };
        assert!(!passes_hard_safety_gates(&bits));
    }

    #[test]
    fn hard_gates_accept_external_even_if_not_ejectable_or_removable() {
        let bits = CapabilityBits {
            is_root_filesystem: false,
            is_browsable: true,
            is_ejectable: false,
            is_removable: false,
            is_internal: false,
            is_local: true,
        };
        assert!(passes_hard_safety_gates(&bits));
    }

    #[test]
    fn hard_gates_reject_internal_non_ejectable_non_removable() {
        let bits = CapabilityBits {
            is_root_filesystem: false,
            is_browsable: true,
            is_ejectable: false,
            is_removable: false,
            is_internal: true,
            is_local: true,
        };
        assert!(!passes_hard_safety_gates(&bits));
    }
}
