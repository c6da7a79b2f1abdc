//! Concurrent volume enumeration and physical-device ejection engine for
//! macOS, built on the DiskArbitration framework.
//!
//! The public surface is [`session::Session`]: it owns the
//! DiskArbitration session and exposes enumeration, unmount, and eject as
//! async methods. Everything else in this crate is an implementation
//! detail of that actor, organized as:
//!
//! - [`error`] — the structured failure taxonomy (C1)
//! - [`ffi`] — safe wrappers over DiskArbitration plus the callback/async
//!   bridge (C2)
//! - [`volume`] — mount-point scanning and the hard safety gates (C3)
//! - [`group`] — partitioning volumes by physical device (C4)
//! - [`eject`] — the per-device unmount/eject state machine (C5)
//! - [`batch`] — fan-out across device groups and result aggregation (C6)
//! - [`diagnose`] — blocking-process lookup for diagnostics (C7)
//! - [`session`] — the actor tying the above together (C8)
//!
//! This crate targets macOS only; it has no meaningful behavior on other
//! platforms (spec Non-goals rule out cross-platform support).

pub mod batch;
pub mod diagnose;
pub mod eject;
pub mod error;
pub mod ffi;
pub mod group;
pub mod session;
pub mod volume;

pub use batch::BatchEjectResult;
pub use eject::{EjectOptions, EjectStrategy, SingleEjectResult};
pub use error::{DaOperation, DiskError};
pub use group::PhysicalDeviceGroup;
pub use session::Session;
pub use volume::{Volume, VolumeInfo};

/// Install a `tracing` subscriber reading its filter from `RUST_LOG`,
/// defaulting to `info` when unset. Intended for binaries embedding this
/// crate; library callers that already run their own subscriber should
/// not call this.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
