//! Resource usage of a container.
//!
//! Read from the container's cgroup parameters when cgroups are enabled.

use std::collections::BTreeMap;

use appbox_common::types::ContainerId;
use appbox_core::cgroup::ParamValue;
use serde::{Deserialize, Serialize};

/// Snapshot of a container's resource usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Container this snapshot belongs to.
    pub container_id: ContainerId,
    /// CPU usage in nanoseconds.
    pub cpu_usage_ns: u64,
    /// Memory usage in bytes.
    pub memory_usage_bytes: u64,
    /// Memory limit in bytes, `0` when unlimited or unknown.
    pub memory_limit_bytes: u64,
}

impl MetricsSnapshot {
    /// A snapshot with every counter at zero.
    #[must_use]
    pub const fn empty(container_id: ContainerId) -> Self {
        Self {
            container_id,
            cpu_usage_ns: 0,
            memory_usage_bytes: 0,
            memory_limit_bytes: 0,
        }
    }

    /// Builds a snapshot from fetched cgroup parameters. Missing or
    /// unparsable values read as zero.
    #[must_use]
    pub fn from_params(container_id: ContainerId, params: &BTreeMap<String, ParamValue>) -> Self {
        let read = |key: &str| {
            params
                .get(key)
                .and_then(ParamValue::as_scalar)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
        };
        Self {
            container_id,
            cpu_usage_ns: read("cpuacct.usage"),
            memory_usage_bytes: read("memory.usage_in_bytes"),
            memory_limit_bytes: read("memory.limit_in_bytes"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_known_counters() {
        let mut params = BTreeMap::new();
        let _ = params.insert("cpuacct.usage".to_string(), ParamValue::from(1500u64));
        let _ = params.insert("memory.usage_in_bytes".to_string(), ParamValue::from("4096"));
        let _ = params.insert("memory.stat".to_string(), ParamValue::parse("cache 1\nrss 2"));

        let snapshot = MetricsSnapshot::from_params(ContainerId::new("c1"), &params);
        assert_eq!(snapshot.cpu_usage_ns, 1500);
        assert_eq!(snapshot.memory_usage_bytes, 4096);
        assert_eq!(snapshot.memory_limit_bytes, 0);
    }

    #[test]
    fn empty_snapshot_keeps_its_container() {
        let snapshot = MetricsSnapshot::empty(ContainerId::new("c1"));
        assert_eq!(snapshot.container_id.as_str(), "c1");
        assert_eq!(snapshot, MetricsSnapshot::from_params(ContainerId::new("c1"), &BTreeMap::new()));
    }
}
