//! FFI bridge (component C2): safe wrappers over the OS disk-arbitration
//! handles, plus the callback-to-async adapters that let the rest of the
//! engine treat `unmount`/`eject` as ordinary `async fn`s.
//!
//! This module is the only place in the crate permitted to perform unsafe
//! pointer arithmetic or unchecked reference-count handling (spec §4.2);
//! everything above it sees only safe wrappers and `async fn`s.

#[cfg(target_os = "macos")]
pub mod bridge;
#[cfg(target_os = "macos")]
pub mod disk_arbitration;
pub mod hdiutil;

#[cfg(target_os = "macos")]
pub use bridge::{DaDissolveFlags, DaResult, UnmountEject};
#[cfg(target_os = "macos")]
pub use disk_arbitration::{DaDiskHandle, DaSessionHandle};
