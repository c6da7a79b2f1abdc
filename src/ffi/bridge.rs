//! Callback-to-async bridge (spec §4.2) for the two DiskArbitration entry
//! points this engine needs: `DADiskUnmount` and `DADiskEject`.
//!
//! Each adapter allocates a heap-owned, ref-counted completion, hands a raw
//! pointer to it to the OS as the callback context, and awaits a one-shot
//! channel the C trampoline fills in exactly once. The trampoline reclaims
//! ownership of the context via `Arc::from_raw` and must not touch it again
//! after sending — this file is the crate's one unsafe boundary (spec §4.2).

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use objc2_disk_arbitration::{
    DADisk, DADissenter, DADissenterGetStatus, DADissenterGetStatusString, DADiskEject,
    DADiskEjectOptions, DADiskUnmount, DADiskUnmountOptions,
};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{DaOperation, DiskError};
use crate::ffi::disk_arbitration::DaDiskHandle;

const DA_UNMOUNT_OPTION_DEFAULT: DADiskUnmountOptions = 0;
const DA_UNMOUNT_OPTION_WHOLE: DADiskUnmountOptions = 1 << 1;
const DA_UNMOUNT_OPTION_FORCE: DADiskUnmountOptions = 1 << 19;
const DA_EJECT_OPTION_DEFAULT: DADiskEjectOptions = 0;

/// Flags for a whole-disk or per-volume unmount call (spec §4.5 step 1).
/// `force` is ORed in alongside `whole` into the same bitmask; the exact
/// interaction between the two flags is not formally specified upstream
/// and this engine preserves the historical OR-both behavior (spec §9).
#[derive(Debug, Clone, Copy, Default)]
pub struct DaDissolveFlags {
    pub whole: bool,
    pub force: bool,
}

impl DaDissolveFlags {
    fn to_unmount_options(self) -> DADiskUnmountOptions {
        let mut opts = DA_UNMOUNT_OPTION_DEFAULT;
        if self.whole {
            opts |= DA_UNMOUNT_OPTION_WHOLE;
        }
        if self.force {
            opts |= DA_UNMOUNT_OPTION_FORCE;
        }
        opts
    }
}

/// Outcome of one DiskArbitration call.
#[derive(Debug, Clone)]
pub struct DaResult {
    pub success: bool,
    pub error: Option<String>,
    pub duration: Duration,
}

struct Completion {
    tx: Option<oneshot::Sender<DissenterOutcome>>,
}

type DissenterOutcome = Option<(i32, Option<String>)>;

fn decode_dissenter(dissenter: *mut DADissenter) -> DissenterOutcome {
    if dissenter.is_null() {
        return None;
    }
    let status = unsafe { DADissenterGetStatus(NonNull::new_unchecked(dissenter).as_ref()) };
    let reason = unsafe { DADissenterGetStatusString(NonNull::new_unchecked(dissenter).as_ref()) }
        .map(|s| s.to_string());
    Some((status, reason))
}

unsafe extern "C-unwind" fn unmount_trampoline(
    _disk: NonNull<DADisk>,
    dissenter: *mut DADissenter,
    context: *mut c_void,
) {
    if context.is_null() {
        return;
    }
    let outcome = decode_dissenter(dissenter);
    let completion = unsafe { Arc::from_raw(context as *const Mutex<Completion>) };
    if let Ok(mut guard) = completion.lock() {
        if let Some(tx) = guard.tx.take() {
            let _ = tx.send(outcome);
        }
    }
}

unsafe extern "C-unwind" fn eject_trampoline(
    _disk: NonNull<DADisk>,
    dissenter: *mut DADissenter,
    context: *mut c_void,
) {
    if context.is_null() {
        return;
    }
    let outcome = decode_dissenter(dissenter);
    let completion = unsafe { Arc::from_raw(context as *const Mutex<Completion>) };
    if let Ok(mut guard) = completion.lock() {
        if let Some(tx) = guard.tx.take() {
            let _ = tx.send(outcome);
        }
    }
}

fn outcome_to_result(
    outcome: Result<DissenterOutcome, oneshot::error::RecvError>,
    op: DaOperation,
) -> (bool, Option<String>) {
    match outcome {
        Ok(None) => (true, None),
        Ok(Some((status, reason))) => {
            let err = DiskError::from_dissenter(status, reason, op);
            (false, Some(err.to_string()))
        }
        Err(_) => {
            warn!(?op, "disk arbitration channel dropped without a completion");
            (false, Some(DiskError::Timeout.to_string()))
        }
    }
}

/// Unmount a disk handle (whole-disk or per-volume) asynchronously.
pub async fn unmount(disk: &DaDiskHandle, flags: DaDissolveFlags) -> DaResult {
    let start = Instant::now();
    let (tx, rx) = oneshot::channel();
    let completion = Arc::new(Mutex::new(Completion { tx: Some(tx) }));
    let ctx = Arc::into_raw(completion) as *mut c_void;

    debug!(whole = flags.whole, force = flags.force, "issuing DADiskUnmount");
    unsafe {
        DADiskUnmount(
            disk.raw(),
            flags.to_unmount_options(),
            Some(unmount_trampoline),
            ctx,
        );
    }

    let (success, error) = outcome_to_result(rx.await, DaOperation::Unmount);
    DaResult {
        success,
        error,
        duration: start.elapsed(),
    }
}

/// Eject a whole-disk handle asynchronously.
pub async fn eject(disk: &DaDiskHandle) -> DaResult {
    let start = Instant::now();
    let (tx, rx) = oneshot::channel();
    let completion = Arc::new(Mutex::new(Completion { tx: Some(tx) }));
    let ctx = Arc::into_raw(completion) as *mut c_void;

    debug!("issuing DADiskEject");
    unsafe {
        DADiskEject(disk.raw(), DA_EJECT_OPTION_DEFAULT, Some(eject_trampoline), ctx);
    }

    let (success, error) = outcome_to_result(rx.await, DaOperation::Eject);
    DaResult {
        success,
        error,
        duration: start.elapsed(),
    }
}

/// Trait seam over the two DiskArbitration adapters above, so the eject
/// pipeline (C5) can be driven against a `mockall` double in tests instead
/// of real hardware.
#[async_trait]
pub trait UnmountEject: Send + Sync {
    async fn unmount(&self, disk: &DaDiskHandle, flags: DaDissolveFlags) -> DaResult;
    async fn eject(&self, disk: &DaDiskHandle) -> DaResult;
}

/// Production backend: dispatches straight to DiskArbitration.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskArbitrationBackend;

#[async_trait]
impl UnmountEject for DiskArbitrationBackend {
    async fn unmount(&self, disk: &DaDiskHandle, flags: DaDissolveFlags) -> DaResult {
        unmount(disk, flags).await
    }

    async fn eject(&self, disk: &DaDiskHandle) -> DaResult {
        eject(disk).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_and_whole_flags_are_ored_together() {
        let flags = DaDissolveFlags {
            whole: true,
            force: true,
        };
        let opts = flags.to_unmount_options();
        assert_eq!(opts & DA_UNMOUNT_OPTION_WHOLE, DA_UNMOUNT_OPTION_WHOLE);
        assert_eq!(opts & DA_UNMOUNT_OPTION_FORCE, DA_UNMOUNT_OPTION_FORCE);
    }

    #[test]
    fn default_flags_produce_default_options() {
        let flags = DaDissolveFlags::default();
        assert_eq!(flags.to_unmount_options(), DA_UNMOUNT_OPTION_DEFAULT);
    }
}
