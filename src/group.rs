//! Device grouper (component C4): partitions a flat volume list into one
//! group per physical device, keyed by whole-disk BSD name (spec §4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ffi::DaDiskHandle;
use crate::volume::Volume;

/// All volumes that live on one physical device, plus a handle to the
/// whole disk itself when one could be obtained (spec §3).
pub struct PhysicalDeviceGroup {
    pub whole_disk_bsd: String,
    pub whole_disk_handle: Option<DaDiskHandle>,
    pub volumes: Vec<Volume>,
}

static SINGLETON_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Partition `volumes` into one [`PhysicalDeviceGroup`] per physical
/// device. Volumes whose whole-disk name can't be obtained fall into a
/// singleton group keyed by their own BSD name, or a freshly synthesized
/// unique key if even that is unavailable (spec §4.4).
pub fn group_by_device(volumes: Vec<Volume>) -> Vec<PhysicalDeviceGroup> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, (Option<DaDiskHandle>, Vec<Volume>)> = HashMap::new();

    for volume in volumes {
        let key = volume
            .whole_disk_bsd_name()
            .or_else(|| volume.info.bsd_name.clone())
            .unwrap_or_else(|| {
                format!(
                    "__singleton_{}",
                    SINGLETON_COUNTER.fetch_add(1, Ordering::Relaxed)
                )
            });

        let whole_disk_handle = volume.whole_disk_handle.clone();

        let entry = buckets.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            (whole_disk_handle.clone(), Vec::new())
        });
        if entry.0.is_none() {
            entry.0 = whole_disk_handle;
        }
        entry.1.push(volume);
    }

    order
        .into_iter()
        .filter_map(|key| {
            buckets.remove(&key).map(|(handle, volumes)| PhysicalDeviceGroup {
                whole_disk_bsd: key,
                whole_disk_handle: handle,
                volumes,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VolumeInfo;
    use std::path::PathBuf;

    /// Pure restatement of the partition rule for testing without a live
    /// DiskArbitration session: groups `VolumeInfo` by `bsd_name` prefix
    /// semantics, mirroring `group_by_device` one level up.
    fn group_by_device_info(volumes: Vec<(VolumeInfo, Option<String>)>) -> Vec<Vec<VolumeInfo>> {
        let mut order: Vec<String> = Vec::new();
        let mut buckets: HashMap<String, Vec<VolumeInfo>> = HashMap::new();
        let mut counter = 0u64;

        for (info, whole_disk_bsd) in volumes {
            let key = whole_disk_bsd
                .or_else(|| info.bsd_name.clone())
                .unwrap_or_else(|| {
                    counter += 1;
                    format!("__singleton_{counter}")
                });
            if !buckets.contains_key(&key) {
                order.push(key.clone());
            }
            buckets.entry(key).or_default().push(info);
        }

        order
            .into_iter()
            .map(|key| buckets.remove(&key).unwrap())
            .collect()
    }

    fn info(name: &str, bsd: Option<&str>) -> VolumeInfo {
        VolumeInfo {
            name: name.to_string(),
            path: PathBuf::from(format!("/Volumes/{name}")),
            bsd_name: bsd.map(str::to_string),
            is_ejectable: true,
            is_removable: true,
            is_internal: false,
            is_disk_image: false,
        }
    }

    #[test]
    fn two_partitions_on_same_disk_form_one_group() {
        let volumes = vec![
            (info("Part1", Some("disk4s1")), Some("disk4".to_string())),
            (info("Part2", Some("disk4s2")), Some("disk4".to_string())),
        ];
        let groups = group_by_device_info(volumes);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn volumes_with_no_whole_disk_fall_into_singleton_groups() {
        let volumes = vec![
            (info("A", None), None),
            (info("B", None), None),
        ];
        let groups = group_by_device_info(volumes);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[1].len(), 1);
    }

    #[test]
    fn flatten_group_preserves_multiset_of_inputs() {
        let volumes = vec![
            (info("Part1", Some("disk4s1")), Some("disk4".to_string())),
            (info("Lonely", Some("disk5")), None),
            (info("Part2", Some("disk4s2")), Some("disk4".to_string())),
        ];
        let total_in: usize = volumes.len();
        let groups = group_by_device_info(volumes);
        let total_out: usize = groups.iter().map(|g| g.len()).sum();
        assert_eq!(total_in, total_out);
    }

}
