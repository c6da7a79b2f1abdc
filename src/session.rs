//! Session actor (component C8): owns the OS disk-arbitration session and
//! serializes all lifecycle and mutation through a single domain (spec
//! §4.8).

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::batch::{self, BatchEjectResult};
use crate::eject::{EjectOptions, SingleEjectResult};
use crate::ffi::bridge::DiskArbitrationBackend;
use crate::ffi::DaSessionHandle;
use crate::volume::{self, Volume};

struct SessionInner {
    da_session: Option<DaSessionHandle>,
    valid: bool,
}

/// Owns a disk-arbitration session and serializes all public mutation
/// through an internal async mutex, per spec §4.8. Cloning a `Session`
/// shares the same underlying state (cheap `Arc` clone).
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
    backend: DiskArbitrationBackend,
}

impl Session {
    /// Create a new session bound to a fresh DiskArbitration session.
    /// Fails only if the underlying OS subsystem can't be reached (spec
    /// §7: "Fatal conditions: inability to create the OS session").
    pub fn new() -> Result<Self, crate::error::DiskError> {
        let da_session = DaSessionHandle::new()?;
        info!("disk arbitration session created");
        Ok(Session {
            inner: Arc::new(Mutex::new(SessionInner {
                da_session: Some(da_session),
                valid: true,
            })),
            backend: DiskArbitrationBackend,
        })
    }

    /// A process-wide convenience session. Fails fatally on construction
    /// error, which is acceptable because the failure mode is "no
    /// disk-arbitration subsystem available" (spec §4.8).
    pub fn shared() -> &'static Session {
        static SHARED: OnceCell<Session> = OnceCell::new();
        SHARED.get_or_init(|| Session::new().expect("failed to create shared disk arbitration session"))
    }

    pub async fn is_valid(&self) -> bool {
        self.inner.lock().await.valid
    }

    pub fn is_running_as_root(&self) -> bool {
        unsafe { libc::getuid() == 0 }
    }

    /// Enumerate every currently ejectable volume (spec §4.3).
    pub async fn enumerate_ejectable(&self) -> Result<Vec<Volume>, crate::error::DiskError> {
        let guard = self.inner.lock().await;
        if !guard.valid {
            return Ok(Vec::new());
        }
        let Some(da_session) = guard.da_session.clone() else {
            return Ok(Vec::new());
        };
        drop(guard);
        volume::enumerate_ejectable(&da_session).await
    }

    pub async fn count_ejectable(&self) -> usize {
        self.enumerate_ejectable().await.map(|v| v.len()).unwrap_or(0)
    }

    /// Unmount a single already-enumerated volume (not the whole disk).
    pub async fn unmount(&self, volume: &Volume, options: EjectOptions) -> SingleEjectResult {
        if !self.is_valid().await {
            return SingleEjectResult {
                volume_name: volume.info.name.clone(),
                volume_path: volume.info.path.to_string_lossy().into_owned(),
                success: false,
                error_message: Some("Session is invalid".to_string()),
                duration: std::time::Duration::ZERO,
            };
        }
        let flags = crate::ffi::bridge::DaDissolveFlags {
            whole: false,
            force: options.force,
        };
        let result = self.backend_unmount(volume, flags).await;
        SingleEjectResult {
            volume_name: volume.info.name.clone(),
            volume_path: volume.info.path.to_string_lossy().into_owned(),
            success: result.success,
            error_message: result.error,
            duration: result.duration,
        }
    }

    async fn backend_unmount(
        &self,
        volume: &Volume,
        flags: crate::ffi::bridge::DaDissolveFlags,
    ) -> crate::ffi::bridge::DaResult {
        use crate::ffi::bridge::UnmountEject;
        self.backend.unmount(&volume.handle, flags).await
    }

    /// Unmount the volume mounted at `path`, enumerating first to resolve
    /// it (spec §4.8's `unmount_by_path`).
    pub async fn unmount_by_path(&self, path: &Path, options: EjectOptions) -> SingleEjectResult {
        match self.enumerate_ejectable().await {
            Ok(volumes) => {
                if let Some(volume) = volumes.into_iter().find(|v| v.info.path == path) {
                    self.unmount(&volume, options).await
                } else {
                    SingleEjectResult {
                        volume_name: path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        volume_path: path.to_string_lossy().into_owned(),
                        success: false,
                        error_message: Some(format!("volume not found: {}", path.display())),
                        duration: std::time::Duration::ZERO,
                    }
                }
            }
            Err(e) => SingleEjectResult {
                volume_name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                volume_path: path.to_string_lossy().into_owned(),
                success: false,
                error_message: Some(e.to_string()),
                duration: std::time::Duration::ZERO,
            },
        }
    }

    /// Eject a given set of already-enumerated volumes (spec §4.6).
    pub async fn eject_all(&self, volumes: Vec<Volume>, options: EjectOptions) -> BatchEjectResult {
        let valid = self.is_valid().await;
        batch::eject_all(volumes, options, &self.backend, valid).await
    }

    /// Enumerate, then eject every ejectable external volume (spec §4.8).
    pub async fn eject_all_external(&self, options: EjectOptions) -> BatchEjectResult {
        match self.enumerate_ejectable().await {
            Ok(volumes) => self.eject_all(volumes, options).await,
            Err(_) => BatchEjectResult {
                total: 0,
                succeeded: 0,
                failed: 0,
                results: Vec::new(),
                total_duration: std::time::Duration::ZERO,
            },
        }
    }

    /// Detach the callback queue from the session *first*, then release
    /// the OS session handle, so no callback can fire after cleanup
    /// (spec §4.8).
    pub async fn invalidate(&self) {
        let mut guard = self.inner.lock().await;
        if !guard.valid {
            return;
        }
        guard.valid = false;
        guard.da_session = None;
        warn!("disk arbitration session invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_eject_all_on_no_volumes_is_trivial() {
        // Constructing a `Session` requires a live DiskArbitration
        // subsystem; this is exercised against `batch::eject_all`
        // directly, which is what `Session::eject_all` delegates to. The
        // non-empty "session is invalid" contract is covered in
        // `batch::tests`, where volumes can be built without a real
        // DiskArbitration handle.
        let result = batch::eject_all(Vec::new(), EjectOptions::default(), &DiskArbitrationBackend, true).await;
        assert_eq!(result.total, 0);
    }
}
