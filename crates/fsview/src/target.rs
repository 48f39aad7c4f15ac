// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage target records and their status enums.

use silo_core::FsId;
use std::collections::BTreeMap;

/// Administrative state of a target. Totally ordered:
/// `off < empty < drain < ro < wo < rw`. A target participates in deletion
/// scheduling from `drain` upward and takes writes from `wo` upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigStatus {
    Off,
    Empty,
    Drain,
    Ro,
    Wo,
    Rw,
}

silo_core::simple_display! {
    ConfigStatus {
        Off => "off",
        Empty => "empty",
        Drain => "drain",
        Ro => "ro",
        Wo => "wo",
        Rw => "rw",
    }
}

impl std::str::FromStr for ConfigStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ConfigStatus::Off),
            "empty" => Ok(ConfigStatus::Empty),
            "drain" => Ok(ConfigStatus::Drain),
            "ro" => Ok(ConfigStatus::Ro),
            "wo" => Ok(ConfigStatus::Wo),
            "rw" => Ok(ConfigStatus::Rw),
            other => Err(format!("unknown config status: {}", other)),
        }
    }
}

impl ConfigStatus {
    pub fn is_writable(self) -> bool {
        self >= ConfigStatus::Wo
    }

    pub fn is_readable(self) -> bool {
        self >= ConfigStatus::Ro
    }
}

/// Boot state reported by the target itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStatus {
    Down,
    Booting,
    Booted,
    Failed,
}

silo_core::simple_display! {
    BootStatus {
        Down => "down",
        Booting => "booting",
        Booted => "booted",
        Failed => "failed",
    }
}

/// Heartbeat-derived liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveStatus {
    Offline,
    Online,
}

silo_core::simple_display! {
    ActiveStatus {
        Offline => "offline",
        Online => "online",
    }
}

/// Capacity statistics published by the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetStats {
    pub used_bytes: u64,
    pub capacity_bytes: u64,
    pub files: u64,
}

impl TargetStats {
    pub fn free_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.used_bytes)
    }
}

/// Drain bookkeeping published while a target drains
/// (`stat.drainbytesleft`, `stat.drainfiles`, `stat.timeleft`,
/// `stat.drainretry`, `stat.drainprogress`, `stat.drainer`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub bytes_left: u64,
    pub files_left: u64,
    pub time_left: u64,
    pub retries: u32,
    /// Percent complete, 0..=100.
    pub progress: u32,
    /// Whether this target currently pulls replicas for a draining peer.
    pub puller: bool,
}

/// One storage target. `fsid` is stable for the lifetime of the target;
/// the target belongs to exactly one group and one space.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageTarget {
    pub fsid: FsId,
    pub host: String,
    pub port: u16,
    /// Local mount path on the node (the capability `localprefix`).
    pub mount: String,
    pub group: String,
    pub space: String,
    pub config_status: ConfigStatus,
    pub boot_status: BootStatus,
    pub active_status: ActiveStatus,
    pub stats: TargetStats,
    pub drain: DrainStats,
    pub config: BTreeMap<String, String>,
}

impl StorageTarget {
    pub fn new(
        fsid: FsId,
        host: impl Into<String>,
        port: u16,
        mount: impl Into<String>,
        group: impl Into<String>,
        space: impl Into<String>,
    ) -> Self {
        Self {
            fsid,
            host: host.into(),
            port,
            mount: mount.into(),
            group: group.into(),
            space: space.into(),
            config_status: ConfigStatus::Off,
            boot_status: BootStatus::Down,
            active_status: ActiveStatus::Offline,
            stats: TargetStats::default(),
            drain: DrainStats::default(),
            config: BTreeMap::new(),
        }
    }

    /// Node name: the host aggregating this target.
    pub fn node(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the target can currently serve a deletion capability.
    pub fn can_delete(&self) -> bool {
        self.config_status >= ConfigStatus::Drain
            && self.boot_status == BootStatus::Booted
            && self.active_status == ActiveStatus::Online
    }

    pub fn fill_ratio(&self) -> f64 {
        if self.stats.capacity_bytes == 0 {
            return 0.0;
        }
        self.stats.used_bytes as f64 / self.stats.capacity_bytes as f64
    }
}

#[cfg(test)]
#[path = "target_tests.rs"]
mod tests;
