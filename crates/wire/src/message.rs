// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed storage-node control messages.
//!
//! A message is one env-string; `mgm.pcmd` selects the operation. Decoding
//! rejects malformed envelopes without state change.

use crate::env::EnvMap;
use silo_core::{FileId, FsId, MgmError};
use thiserror::Error;

/// Envelope decoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("missing key: {0}")]
    MissingKey(&'static str),

    #[error("bad value for {key}: {value}")]
    BadValue { key: &'static str, value: String },

    #[error("unknown op: {0}")]
    UnknownOp(String),
}

impl From<WireError> for MgmError {
    fn from(e: WireError) -> Self {
        MgmError::InvalidArg(e.to_string())
    }
}

fn require<'a>(env: &'a EnvMap, key: &'static str) -> Result<&'a str, WireError> {
    env.get(key).ok_or(WireError::MissingKey(key))
}

fn require_u64(env: &EnvMap, key: &'static str) -> Result<u64, WireError> {
    let raw = require(env, key)?;
    raw.parse().map_err(|_| WireError::BadValue { key, value: raw.to_string() })
}

fn require_hex(env: &EnvMap, key: &'static str) -> Result<u64, WireError> {
    let raw = require(env, key)?;
    u64::from_str_radix(raw, 16).map_err(|_| WireError::BadValue { key, value: raw.to_string() })
}

/// Commit behavior flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitFlags {
    pub verify_size: bool,
    pub verify_checksum: bool,
    pub commit_size: bool,
    pub commit_checksum: bool,
    /// Background replication commit (not a client write).
    pub replication: bool,
    /// RAIN rebuild; size and checksum are not authoritative.
    pub reconstruction: bool,
    /// Contents actually changed.
    pub modified: bool,
    /// The mutator is a fusex client.
    pub fusex: bool,
}

impl CommitFlags {
    fn from_env(env: &EnvMap) -> Self {
        Self {
            verify_size: env.flag("mgm.verify.size"),
            verify_checksum: env.flag("mgm.verify.checksum"),
            commit_size: env.flag("mgm.commit.size"),
            commit_checksum: env.flag("mgm.commit.checksum"),
            replication: env.flag("mgm.replication"),
            reconstruction: env.flag("mgm.reconstruction"),
            modified: env.flag("mgm.modified"),
            fusex: env.flag("mgm.fusex"),
        }
    }
}

/// Chunked-upload bookkeeping for OwnCloud-style uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OcChunk {
    pub index: u32,
    pub total: u32,
}

impl OcChunk {
    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total
    }
}

/// `mgm.pcmd=commit`: a storage node publishes replica state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub fid: FileId,
    pub fsid: FsId,
    pub size: u64,
    pub path: String,
    pub mtime: u64,
    pub mtime_ns: u64,
    pub checksum: Option<String>,
    /// Atomically remove this replica as part of the commit.
    pub drop_fsid: Option<FsId>,
    pub flags: CommitFlags,
    pub chunk: Option<OcChunk>,
}

impl CommitRequest {
    pub fn from_env(env: &EnvMap) -> Result<Self, WireError> {
        let chunk = if env.flag("mgm.oc.chunk") {
            let index = env
                .get_u32("mgm.oc.n")
                .ok_or(WireError::MissingKey("mgm.oc.n"))?;
            let total = env
                .get_u32("mgm.oc.max")
                .ok_or(WireError::MissingKey("mgm.oc.max"))?;
            if total == 0 || index >= total {
                return Err(WireError::BadValue {
                    key: "mgm.oc.n",
                    value: format!("{}/{}", index, total),
                });
            }
            Some(OcChunk { index, total })
        } else {
            None
        };
        Ok(Self {
            fid: FileId(require_hex(env, "mgm.fid")?),
            fsid: FsId(require_u64(env, "mgm.add.fsid")? as u32),
            size: require_u64(env, "mgm.size")?,
            path: require(env, "mgm.path")?.to_string(),
            mtime: require_u64(env, "mgm.mtime")?,
            mtime_ns: require_u64(env, "mgm.mtime_ns")?,
            checksum: env.get("mgm.checksum").map(str::to_lowercase),
            drop_fsid: env.get_u64("mgm.drop.fsid").map(|v| FsId(v as u32)),
            flags: CommitFlags::from_env(env),
            chunk,
        })
    }
}

/// `mgm.pcmd=drop`: forget a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropRequest {
    pub fid: FileId,
    pub fsid: FsId,
    pub drop_all: bool,
}

impl DropRequest {
    pub fn from_env(env: &EnvMap) -> Result<Self, WireError> {
        Ok(Self {
            fid: FileId(require_hex(env, "mgm.fid")?),
            fsid: FsId(require_u64(env, "mgm.fsid")? as u32),
            drop_all: env.flag("mgm.dropall"),
        })
    }
}

/// `mgm.pcmd=schedule2delete`: a node asks for its deletion backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDeleteRequest {
    pub node: String,
}

impl ScheduleDeleteRequest {
    pub fn from_env(env: &EnvMap) -> Result<Self, WireError> {
        Ok(Self { node: require(env, "mgm.target.nodename")?.to_string() })
    }
}

/// The storage-node operations the MGM core dispatches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsctlRequest {
    Commit(CommitRequest),
    Drop(DropRequest),
    ScheduleDelete(ScheduleDeleteRequest),
    ScheduleBalance { fsid: FsId },
    ScheduleDrain { fsid: FsId },
    /// Per-file workflow trigger.
    Event { fid: FileId, event: String, workflow: String },
    IsMaster,
    MasterSignalBounce,
    MasterSignalReload,
}

impl FsctlRequest {
    pub fn from_env(env: &EnvMap) -> Result<Self, WireError> {
        let op = require(env, "mgm.pcmd")?;
        match op {
            "commit" => Ok(FsctlRequest::Commit(CommitRequest::from_env(env)?)),
            "drop" => Ok(FsctlRequest::Drop(DropRequest::from_env(env)?)),
            "schedule2delete" => {
                Ok(FsctlRequest::ScheduleDelete(ScheduleDeleteRequest::from_env(env)?))
            }
            "schedule2balance" => Ok(FsctlRequest::ScheduleBalance {
                fsid: FsId(require_u64(env, "mgm.target.fsid")? as u32),
            }),
            "schedule2drain" => Ok(FsctlRequest::ScheduleDrain {
                fsid: FsId(require_u64(env, "mgm.target.fsid")? as u32),
            }),
            "event" => Ok(FsctlRequest::Event {
                fid: FileId(require_hex(env, "mgm.fid")?),
                event: require(env, "mgm.event")?.to_string(),
                workflow: require(env, "mgm.workflow")?.to_string(),
            }),
            "is_master" => Ok(FsctlRequest::IsMaster),
            "mastersignalbounce" => Ok(FsctlRequest::MasterSignalBounce),
            "mastersignalreload" => Ok(FsctlRequest::MasterSignalReload),
            other => Err(WireError::UnknownOp(other.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
