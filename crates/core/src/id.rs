// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster-wide identifiers.
//!
//! A [`FsId`] names one storage target for the lifetime of the cluster.
//! [`FileId`] and [`ContainerId`] name namespace records; files are often
//! referred to by their hexadecimal form (`fxid`) in path-encoded protocols.

use serde::{Deserialize, Serialize};

/// Storage target identifier (`fsid`).
///
/// Small integer, stable for the lifetime of the target. Never reused while
/// the target is registered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct FsId(pub u32);

impl FsId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for FsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for FsId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>().map(FsId)
    }
}

/// File identifier within the namespace.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl FileId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Zero-padded hexadecimal form used in dropbox entry names (`fxid`).
    pub fn hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    /// Parse a hexadecimal `fxid`, padded or not.
    pub fn from_hex(s: &str) -> Option<Self> {
        u64::from_str_radix(s, 16).ok().map(FileId)
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Container (directory) identifier within the namespace.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ContainerId(pub u64);

impl ContainerId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        u64::from_str_radix(s, 16).ok().map(ContainerId)
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
