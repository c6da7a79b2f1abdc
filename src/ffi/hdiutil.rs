//! Disk-image detach adapter (spec §4.2, §6.3): wraps `hdiutil detach
//! [-force] /dev/<bsd>`. The DiskArbitration layer denies disk-image
//! ejection with `NotPrivileged` even under elevated rights; `hdiutil`
//! succeeds and performs the unmount implicitly (spec §4.5).

use std::time::Instant;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::DiskError;
use crate::ffi::bridge::DaResult;

/// Run `hdiutil detach [-force] /dev/<bsd_name>` and map the result onto
/// the same `DaResult` shape the DiskArbitration adapters return, so the
/// eject pipeline (C5) can treat both strategies uniformly.
pub async fn detach(bsd_name: &str, force: bool) -> DaResult {
    let start = Instant::now();
    let device_path = format!("/dev/{bsd_name}");

    let mut cmd = Command::new("hdiutil");
    cmd.arg("detach");
    if force {
        cmd.arg("-force");
    }
    cmd.arg(&device_path);

    debug!(device = %device_path, force, "invoking hdiutil detach");

    let output = match cmd.output().await {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, "failed to spawn hdiutil");
            return DaResult {
                success: false,
                error: Some(
                    DiskError::SubprocessFailed {
                        stderr: e.to_string(),
                    }
                    .to_string(),
                ),
                duration: start.elapsed(),
            };
        }
    };

    if output.status.success() {
        DaResult {
            success: true,
            error: None,
            duration: start.elapsed(),
        }
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        DaResult {
            success: false,
            error: Some(DiskError::SubprocessFailed { stderr }.to_string()),
            duration: start.elapsed(),
        }
    }
}

#[cfg(all(test, target_os = "macos"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nonexistent_binary_maps_to_subprocess_failure() {
        // There is no device named this on any CI box; hdiutil itself is
        // real, so this exercises the non-zero-exit branch rather than the
        // spawn-failure branch, which is the common real-world case.
        let result = detach("disk_does_not_exist_999", false).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
