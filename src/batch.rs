//! Batch orchestrator (component C6): fans out the eject pipeline across
//! physical-device groups in parallel and aggregates their results (spec
//! §4.6).

use std::time::{Duration, Instant};

use tracing::info;

use crate::eject::{eject_group, EjectOptions, SingleEjectResult};
use crate::ffi::bridge::UnmountEject;
use crate::group::group_by_device;
use crate::volume::{Volume, VolumeInfo};

/// Aggregate outcome of ejecting a set of volumes (spec §3).
#[derive(Debug, Clone)]
pub struct BatchEjectResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<SingleEjectResult>,
    pub total_duration: Duration,
}

impl BatchEjectResult {
    fn empty() -> Self {
        BatchEjectResult {
            total: 0,
            succeeded: 0,
            failed: 0,
            results: Vec::new(),
            total_duration: Duration::ZERO,
        }
    }

    fn invalid_session(volumes: &[Volume]) -> Self {
        let infos: Vec<VolumeInfo> = volumes.iter().map(|v| v.info.clone()).collect();
        Self::from_invalid_infos(&infos)
    }

    fn from_invalid_infos(infos: &[VolumeInfo]) -> Self {
        let results = invalid_session_results(infos);
        let total = results.len();
        BatchEjectResult {
            total,
            succeeded: 0,
            failed: total,
            results,
            total_duration: Duration::ZERO,
        }
    }
}

/// Per-volume result for the "session is invalid" boundary case of spec
/// §8. Factored out as a pure function over [`VolumeInfo`] so the exact
/// message/duration contract is unit-testable without a live
/// DiskArbitration handle.
fn invalid_session_results(infos: &[VolumeInfo]) -> Vec<SingleEjectResult> {
    infos
        .iter()
        .map(|info| SingleEjectResult {
            volume_name: info.name.clone(),
            volume_path: info.path.to_string_lossy().into_owned(),
            success: false,
            error_message: Some("Session is invalid".to_string()),
            duration: Duration::ZERO,
        })
        .collect()
}

/// Eject every group in `volumes` concurrently, one task per physical
/// device, and join the results (spec §4.6). `session_valid` models the
/// "invalidated session" boundary case of spec §8 without forcing every
/// caller through [`crate::session::Session`].
pub async fn eject_all(
    volumes: Vec<Volume>,
    options: EjectOptions,
    backend: &(impl UnmountEject + Send + Sync + Clone + 'static),
    session_valid: bool,
) -> BatchEjectResult {
    let start = Instant::now();

    if volumes.is_empty() {
        return BatchEjectResult::empty();
    }
    if !session_valid {
        return BatchEjectResult::invalid_session(&volumes);
    }

    let groups = group_by_device(volumes);
    info!(group_count = groups.len(), "fanning out eject across device groups");

    let mut tasks = Vec::with_capacity(groups.len());
    for group in groups {
        let backend = backend.clone();
        tasks.push(tokio::spawn(async move { eject_group(group, options, &backend).await }));
    }

    let mut results = Vec::new();
    for task in tasks {
        match task.await {
            Ok(group_results) => results.extend(group_results),
            Err(join_error) => {
                tracing::error!(error = %join_error, "eject task panicked");
            }
        }
    }

    let succeeded = results.iter().filter(|r| r.success).count();
    let total = results.len();
    let failed = total - succeeded;

    BatchEjectResult {
        total,
        succeeded,
        failed,
        results,
        total_duration: start.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn info(name: &str) -> VolumeInfo {
        VolumeInfo {
            name: name.to_string(),
            path: PathBuf::from(format!("/Volumes/{name}")),
            bsd_name: Some(format!("disk{name}")),
            is_ejectable: true,
            is_removable: true,
            is_internal: false,
            is_disk_image: false,
        }
    }

    #[test]
    fn invalid_session_yields_one_failed_result_per_volume() {
        let infos = vec![info("A"), info("B")];
        let batch = BatchEjectResult::from_invalid_infos(&infos);

        assert_eq!(batch.total, 2);
        assert_eq!(batch.succeeded, 0);
        assert_eq!(batch.failed, 2);
        assert_eq!(batch.total_duration, Duration::ZERO);
        for result in &batch.results {
            assert!(!result.success);
            assert_eq!(result.error_message.as_deref(), Some("Session is invalid"));
            assert_eq!(result.duration, Duration::ZERO);
        }
    }

    #[test]
    fn empty_input_is_trivially_empty() {
        let result = BatchEjectResult::empty();
        assert_eq!(result.total, 0);
        assert_eq!(result.succeeded, 0);
        assert_eq!(result.failed, 0);
        assert!(result.results.is_empty());
        assert_eq!(result.total_duration, Duration::ZERO);
    }

    #[test]
    fn total_equals_succeeded_plus_failed_invariant() {
        let results = vec![
            SingleEjectResult {
                volume_name: "A".into(),
                volume_path: "/Volumes/A".into(),
                success: true,
                error_message: None,
                duration: Duration::from_millis(10),
            },
            SingleEjectResult {
                volume_name: "B".into(),
                volume_path: "/Volumes/B".into(),
                success: false,
                error_message: Some("busy".into()),
                duration: Duration::from_millis(20),
            },
        ];
        let succeeded = results.iter().filter(|r| r.success).count();
        let total = results.len();
        let failed = total - succeeded;
        let batch = BatchEjectResult {
            total,
            succeeded,
            failed,
            results,
            total_duration: Duration::from_millis(25),
        };
        assert_eq!(batch.succeeded + batch.failed, batch.total);
        assert_eq!(batch.total, batch.results.len());
        let max_result_duration = batch.results.iter().map(|r| r.duration).max().unwrap();
        assert!(batch.total_duration >= max_result_duration);
    }
}
