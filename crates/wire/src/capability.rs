// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signed capabilities.
//!
//! A capability is a short-lived token attached to a redirect URL or a
//! deletion message. It must be verifiable by the target without further
//! MGM interaction: the payload is signed with the shared symmetric key and
//! carries an expiry. A well-behaved target never accepts the unsigned form.

use crate::env::EnvMap;
use silo_core::{FileId, FsId};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("capability expired at {0}")]
    Expired(u64),

    #[error("capability signature mismatch")]
    BadSignature,

    #[error("capability missing field: {0}")]
    Missing(&'static str),
}

/// One id-list entry: `hexfid[:lpath:ctime]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionEntry {
    pub fid: FileId,
    pub lpath: Option<String>,
    pub ctime: Option<u64>,
}

impl DeletionEntry {
    pub fn new(fid: FileId) -> Self {
        Self { fid, lpath: None, ctime: None }
    }

    fn encode(&self) -> String {
        match (&self.lpath, self.ctime) {
            (Some(lpath), Some(ctime)) => format!("{}:{}:{}", self.fid.hex(), lpath, ctime),
            _ => self.fid.hex(),
        }
    }

    fn decode(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, ':');
        let fid = FileId::from_hex(parts.next()?)?;
        match (parts.next(), parts.next()) {
            (Some(lpath), Some(ctime)) => Some(Self {
                fid,
                lpath: Some(lpath.to_string()),
                ctime: ctime.parse().ok(),
            }),
            _ => Some(Self::new(fid)),
        }
    }
}

/// Deletion capability handed to a storage target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub access: String,
    pub manager: String,
    pub fsid: FsId,
    pub local_prefix: String,
    pub fids: Vec<DeletionEntry>,
}

impl Capability {
    pub fn delete(
        manager: impl Into<String>,
        fsid: FsId,
        local_prefix: impl Into<String>,
        fids: Vec<DeletionEntry>,
    ) -> Self {
        Self {
            access: "delete".to_string(),
            manager: manager.into(),
            fsid,
            local_prefix: local_prefix.into(),
            fids,
        }
    }

    fn payload(&self) -> EnvMap {
        let mut env = EnvMap::new();
        env.set("mgm.access", &self.access)
            .set("mgm.manager", &self.manager)
            .set("mgm.fsid", self.fsid.to_string())
            .set("mgm.localprefix", &self.local_prefix)
            .set(
                "mgm.fids",
                self.fids.iter().map(DeletionEntry::encode).collect::<Vec<_>>().join(","),
            );
        env
    }

    /// Approximate wire size of the unsigned payload, used for batching.
    pub fn encoded_len(&self) -> usize {
        self.payload().encode().len()
    }

    /// Sign the capability: appends `cap.valid` (expiry) and `cap.sig`.
    pub fn sign(&self, key: &str, expires_at: u64) -> String {
        let mut env = self.payload();
        env.set("cap.valid", expires_at.to_string());
        let sig = signature(key, expires_at, &env);
        env.set("cap.sig", sig);
        env.encode()
    }

    /// Verify and decode a signed capability string.
    pub fn verify(encoded: &str, key: &str, now: u64) -> Result<Self, CapabilityError> {
        let mut env = EnvMap::parse(encoded);
        let valid = env
            .get("cap.valid")
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or(CapabilityError::Missing("cap.valid"))?;
        let sig = env
            .get("cap.sig")
            .map(str::to_string)
            .ok_or(CapabilityError::Missing("cap.sig"))?;
        if valid < now {
            return Err(CapabilityError::Expired(valid));
        }
        // Recompute over the payload without the signature itself.
        let mut unsigned = EnvMap::new();
        for (k, v) in env.iter() {
            if k != "cap.sig" {
                unsigned.set(k, v);
            }
        }
        env = unsigned;
        if signature(key, valid, &env) != sig {
            return Err(CapabilityError::BadSignature);
        }
        let fids = env
            .get("mgm.fids")
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(DeletionEntry::decode)
            .collect();
        Ok(Self {
            access: env.get("mgm.access").ok_or(CapabilityError::Missing("mgm.access"))?.to_string(),
            manager: env
                .get("mgm.manager")
                .ok_or(CapabilityError::Missing("mgm.manager"))?
                .to_string(),
            fsid: FsId(
                env.get_u64("mgm.fsid").ok_or(CapabilityError::Missing("mgm.fsid"))? as u32,
            ),
            local_prefix: env
                .get("mgm.localprefix")
                .ok_or(CapabilityError::Missing("mgm.localprefix"))?
                .to_string(),
            fids,
        })
    }
}

fn signature(key: &str, expires_at: u64, payload: &EnvMap) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(expires_at.to_be_bytes());
    hasher.update(payload.encode().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
#[path = "capability_tests.rs"]
mod tests;
