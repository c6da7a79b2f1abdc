//! Error taxonomy for the eject engine (component C1).
//!
//! The OS disk-arbitration layer reports failures as a status code, a
//! free-form reason string, or both. [`DiskError`] is the single surface
//! through which callers decide whether to retry; the engine itself never
//! retries on [`DiskError::Busy`] (see [`crate::eject`]).

use thiserror::Error;

/// Which DiskArbitration entry point produced a raw status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaOperation {
    Unmount,
    Eject,
}

/// Structured failure taxonomy shared across the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiskError {
    #[error("failed to create disk arbitration session")]
    SessionCreationFailed,

    #[error("volume not found: {path}")]
    NotFound { path: String },

    #[error("unmount failed (status {status}){}", reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    UnmountFailed {
        status: i32,
        reason: Option<String>,
    },

    #[error("eject failed (status {status}){}", reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    EjectFailed {
        status: i32,
        reason: Option<String>,
    },

    #[error("device busy: {message}")]
    Busy { message: String },

    #[error("not privileged: {message}")]
    NotPrivileged { message: String },

    #[error("operation timed out")]
    Timeout,

    #[error("subprocess failed: {stderr}")]
    SubprocessFailed { stderr: String },
}

/// Known "resource busy" status ranges on the POSIX/DiskArbitration
/// boundary. The high byte flags the originating subsystem; the low byte
/// carries a POSIX-shaped errno when the failure bubbled up from the BSD
/// layer underneath DiskArbitration.
const BUSY_LOW_BYTES: [i32; 2] = [libc::EBUSY, libc::EAGAIN];
const PRIVILEGE_LOW_BYTES: [i32; 2] = [libc::EPERM, libc::EACCES];

impl DiskError {
    /// Map a raw DiskArbitration dissenter (status + optional reason) to a
    /// structured [`DiskError`], per spec §4.1. Unrecognized codes preserve
    /// the raw status inside `UnmountFailed`/`EjectFailed` rather than being
    /// discarded.
    pub fn from_dissenter(status: i32, reason: Option<String>, op: DaOperation) -> DiskError {
        let low_byte = status & 0xff;
        if BUSY_LOW_BYTES.contains(&low_byte) {
            return DiskError::Busy {
                message: reason.unwrap_or_else(|| "resource busy".to_string()),
            };
        }
        if PRIVILEGE_LOW_BYTES.contains(&low_byte) {
            return DiskError::NotPrivileged {
                message: reason.unwrap_or_else(|| "not permitted".to_string()),
            };
        }
        match op {
            DaOperation::Unmount => DiskError::UnmountFailed { status, reason },
            DaOperation::Eject => DiskError::EjectFailed { status, reason },
        }
    }

    /// True for [`DiskError::Busy`] and for unmount/eject failures whose
    /// preserved status denotes a resource-in-use condition.
    pub fn is_disk_busy(&self) -> bool {
        match self {
            DiskError::Busy { .. } => true,
            DiskError::UnmountFailed { status, .. } | DiskError::EjectFailed { status, .. } => {
                BUSY_LOW_BYTES.contains(&(status & 0xff))
            }
            _ => false,
        }
    }

    /// Superset of [`Self::is_disk_busy`] that also counts [`DiskError::Timeout`]
    /// as transient. Used internally to pick a log level; never used to
    /// drive retries (the engine makes one attempt per transition).
    pub fn is_transient(&self) -> bool {
        matches!(self, DiskError::Timeout) || self.is_disk_busy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_status_maps_to_busy() {
        let err = DiskError::from_dissenter(libc::EBUSY, Some("in use".into()), DaOperation::Unmount);
        assert!(matches!(err, DiskError::Busy { .. }));
        assert!(err.is_disk_busy());
    }

    #[test]
    fn privilege_status_maps_to_not_privileged() {
        let err = DiskError::from_dissenter(libc::EPERM, None, DaOperation::Eject);
        assert!(matches!(err, DiskError::NotPrivileged { .. }));
        assert!(!err.is_disk_busy());
    }

    #[test]
    fn unrecognized_status_preserves_raw_code() {
        let err = DiskError::from_dissenter(9999, Some("weird".into()), DaOperation::Unmount);
        match err {
            DiskError::UnmountFailed { status, reason } => {
                assert_eq!(status, 9999);
                assert_eq!(reason.as_deref(), Some("weird"));
            }
            _ => panic!("expected UnmountFailed"),
        }
    }

    #[test]
    fn timeout_is_transient_but_not_busy() {
        let err = DiskError::Timeout;
        assert!(err.is_transient());
        assert!(!err.is_disk_busy());
    }

    #[test]
    fn not_privileged_message_contains_stable_token() {
        let err = DiskError::NotPrivileged {
            message: "not permitted".to_string(),
        };
        let rendered = err.to_string();
        assert!(
            rendered.contains("permission")
                || rendered.contains("rivileged")
                || rendered.contains("permitted")
        );
    }

    #[test]
    fn busy_message_contains_stable_token() {
        let err = DiskError::Busy {
            message: "resource busy".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("busy") || rendered.contains("Busy"));
    }
}
