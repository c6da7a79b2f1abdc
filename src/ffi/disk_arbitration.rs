//! Safe wrappers over `objc2_disk_arbitration`'s `DASession`/`DADisk`
//! handles (spec §4.2). Each wrapper releases its retained CoreFoundation
//! reference on drop, exactly once; nothing above this module touches a raw
//! `DASession`/`DADisk` pointer.

use std::ffi::{c_void, CStr};
use std::path::Path;
use std::ptr::NonNull;

use objc2_core_foundation::{kCFAllocatorDefault, CFBoolean, CFDictionary, CFRetained, CFString, CFURL};
use objc2_disk_arbitration::{DADisk, DASession};

use crate::error::DiskError;

/// Read a `CFString`-valued entry out of a disk description dictionary.
/// Mirrors the `CFDictionaryExt` pattern used across the example pack for
/// typed reads of `CFDictionaryGetValue`-shaped APIs. The only unchecked
/// reference-count bump in this module, kept here per spec §4.2.
fn get_cfstring(description: &CFDictionary, key: &CFString) -> Option<CFRetained<CFString>> {
    unsafe {
        let value = description.value(key as *const _ as *const c_void);
        if value.is_null() {
            None
        } else {
            let ptr = NonNull::new_unchecked(value as *mut CFString);
            Some(CFRetained::retain(ptr))
        }
    }
}

/// Read a `CFBoolean`-valued entry out of a disk description dictionary
/// (e.g. `VolumeMountable`).
fn get_cfbool(description: &CFDictionary, key: &CFString) -> Option<bool> {
    unsafe {
        let value = description.value(key as *const _ as *const c_void);
        if value.is_null() {
            None
        } else {
            let ptr = NonNull::new_unchecked(value as *mut CFBoolean);
            Some(CFRetained::retain(ptr).value())
        }
    }
}

/// Owns a `DASession`. Cheap to clone (`CFRetained` is reference-counted);
/// device handles created from one session must never be used with another.
#[derive(Clone)]
pub struct DaSessionHandle {
    session: CFRetained<DASession>,
}

impl DaSessionHandle {
    pub fn new() -> Result<Self, DiskError> {
        let session =
            unsafe { DASession::new(kCFAllocatorDefault) }.ok_or(DiskError::SessionCreationFailed)?;
        Ok(Self { session })
    }

    pub(crate) fn raw(&self) -> &DASession {
        &self.session
    }

    /// Acquire a volume-level disk handle from an absolute mount path.
    pub fn disk_for_volume_path(&self, path: &Path) -> Option<DaDiskHandle> {
        let url = CFURL::from_file_system_representation(
            path.to_str()?.as_bytes(),
            true,
        )?;
        let disk = unsafe {
            DADisk::from_volume_path(kCFAllocatorDefault, &self.session, &url)
        }?;
        Some(DaDiskHandle { disk })
    }
}

/// Owns a `DADisk` reference. Thread-safe for read-only use once created
/// (spec §5); never re-bound to another session.
#[derive(Clone)]
pub struct DaDiskHandle {
    disk: CFRetained<DADisk>,
}

impl DaDiskHandle {
    pub(crate) fn raw(&self) -> &DADisk {
        &self.disk
    }

    pub fn bsd_name(&self) -> Option<String> {
        let ptr = unsafe { self.disk.bsd_name() };
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    fn description(&self) -> Option<CFRetained<CFDictionary>> {
        unsafe { self.disk.description() }
    }

    /// Read a `CFString`-valued entry out of this disk's description
    /// dictionary (e.g. `"MediaContent"`, `"DeviceModel"`). Returns `None`
    /// if the description is unavailable or the key is absent/not a
    /// string.
    pub fn description_string(&self, key: &str) -> Option<String> {
        let description = self.description()?;
        let key = CFString::from_str(key);
        get_cfstring(&description, &key).map(|s| s.to_string())
    }

    /// Read a `CFBoolean`-valued entry out of this disk's description
    /// dictionary (e.g. `"VolumeMountable"`).
    pub fn description_bool(&self, key: &str) -> Option<bool> {
        let description = self.description()?;
        let key = CFString::from_str(key);
        get_cfbool(&description, &key)
    }

    /// The whole-disk (physical device) handle aggregating this volume's
    /// partition, if one exists (spec §4.3 step 7).
    pub fn copy_whole_disk(&self) -> Option<DaDiskHandle> {
        let whole = unsafe { self.disk.copy_whole_disk() }?;
        Some(DaDiskHandle { disk: whole })
    }
}
