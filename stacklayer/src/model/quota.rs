//! Quota dimensions and per-resource consumption.

use super::resource::ResourceDetails;
use std::collections::BTreeMap;
use std::fmt;

/// A quota counter tracked per service settings entry.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum QuotaName {
    Instances,
    Vcpu,
    Ram,
    Storage,
    Volumes,
    Snapshots,
    FloatingIpCount,
    SecurityGroupCount,
    NetworkCount,
    SubnetCount,
}

impl QuotaName {
    pub const ALL: [QuotaName; 10] = [
        Self::Instances,
        Self::Vcpu,
        Self::Ram,
        Self::Storage,
        Self::Volumes,
        Self::Snapshots,
        Self::FloatingIpCount,
        Self::SecurityGroupCount,
        Self::NetworkCount,
        Self::SubnetCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instances => "instances",
            Self::Vcpu => "vcpu",
            Self::Ram => "ram",
            Self::Storage => "storage",
            Self::Volumes => "volumes",
            Self::Snapshots => "snapshots",
            Self::FloatingIpCount => "floating_ip_count",
            Self::SecurityGroupCount => "security_group_count",
            Self::NetworkCount => "network_count",
            Self::SubnetCount => "subnet_count",
        }
    }
}

impl fmt::Display for QuotaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current usage and optional limit of one quota counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuotaUsage {
    pub usage: u64,
    /// `None` means unlimited.
    pub limit: Option<u64>,
}

impl QuotaUsage {
    /// Returns true if adding `delta` would exceed the limit.
    pub fn would_exceed(&self, delta: i64) -> bool {
        match self.limit {
            Some(limit) if delta > 0 => self.usage.saturating_add(delta as u64) > limit,
            _ => false,
        }
    }
}

/// Capacity a resource consumes while it exists.
pub fn consumption(details: &ResourceDetails) -> Vec<(QuotaName, u64)> {
    match details {
        ResourceDetails::Instance(i) => vec![
            (QuotaName::Instances, 1),
            (QuotaName::Vcpu, i.cores),
            (QuotaName::Ram, i.ram),
        ],
        ResourceDetails::Volume(v) => vec![(QuotaName::Volumes, 1), (QuotaName::Storage, v.size)],
        ResourceDetails::Snapshot(s) => {
            vec![(QuotaName::Snapshots, 1), (QuotaName::Storage, s.size)]
        }
        ResourceDetails::FloatingIp(_) => vec![(QuotaName::FloatingIpCount, 1)],
        ResourceDetails::SecurityGroup(_) => vec![(QuotaName::SecurityGroupCount, 1)],
        ResourceDetails::Network(_) => vec![(QuotaName::NetworkCount, 1)],
        ResourceDetails::Subnet(_) => vec![(QuotaName::SubnetCount, 1)],
        ResourceDetails::Backup(_) | ResourceDetails::Tenant(_) => Vec::new(),
    }
}

/// Per-counter difference between two consumption vectors.
pub fn consumption_delta(
    before: &[(QuotaName, u64)],
    after: &[(QuotaName, u64)],
) -> Vec<(QuotaName, i64)> {
    let mut deltas: BTreeMap<QuotaName, i64> = BTreeMap::new();
    for &(name, amount) in before {
        *deltas.entry(name).or_default() -= amount as i64;
    }
    for &(name, amount) in after {
        *deltas.entry(name).or_default() += amount as i64;
    }
    deltas.into_iter().filter(|&(_, delta)| delta != 0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstanceDetails, VolumeDetails};

    #[test]
    fn test_instance_consumption() {
        let details = ResourceDetails::Instance(InstanceDetails {
            cores: 2,
            ram: 4096,
            ..Default::default()
        });
        assert_eq!(
            consumption(&details),
            vec![
                (QuotaName::Instances, 1),
                (QuotaName::Vcpu, 2),
                (QuotaName::Ram, 4096)
            ]
        );
    }

    #[test]
    fn test_volume_consumption() {
        let details = ResourceDetails::Volume(VolumeDetails {
            size: 10240,
            ..Default::default()
        });
        assert_eq!(
            consumption(&details),
            vec![(QuotaName::Volumes, 1), (QuotaName::Storage, 10240)]
        );
    }

    #[test]
    fn test_consumption_delta_skips_unchanged_counters() {
        let before = [(QuotaName::Volumes, 1), (QuotaName::Storage, 10240)];
        let after = [(QuotaName::Volumes, 1), (QuotaName::Storage, 20480)];
        assert_eq!(
            consumption_delta(&before, &after),
            vec![(QuotaName::Storage, 10240)]
        );
    }

    #[test]
    fn test_would_exceed() {
        let quota = QuotaUsage {
            usage: 9,
            limit: Some(10),
        };
        assert!(!quota.would_exceed(1));
        assert!(quota.would_exceed(2));
        assert!(!quota.would_exceed(-5));

        let unlimited = QuotaUsage::default();
        assert!(!unlimited.would_exceed(1_000_000));
    }
}
