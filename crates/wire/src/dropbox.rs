// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proc-dropbox filename codecs.
//!
//! The dropbox directories are persistent work queues; their entry names
//! are the record format. Converter entries are
//! `<016x-fid>:<destination>#<08x-layoutid>[~<placement-policy>]`, workflow
//! entries `<decimal-when>:<016x-fid>:<event>`, recycle entries the escaped
//! original path plus `.<016x-fid>[.d]`. Day directories are `yyyy-mm-dd`.

use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use silo_core::{FileId, LayoutId};

/// Path-separator escape inside recycle entry names.
const SLASH_ESCAPE: &str = "#:#";
/// Suffix marking a recursive directory entry.
const TREE_SUFFIX: &str = ".d";

/// A conversion dropbox entry: which file, where to, with which layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionTag {
    pub fid: FileId,
    /// Target space (LRU / policy conversions) or scheduling group
    /// (balancer conversions).
    pub destination: String,
    pub layout: LayoutId,
    pub policy: Option<String>,
}

impl ConversionTag {
    pub fn new(fid: FileId, destination: impl Into<String>, layout: LayoutId) -> Self {
        Self { fid, destination: destination.into(), layout, policy: None }
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    pub fn encode(&self) -> String {
        match &self.policy {
            Some(policy) => {
                format!("{}:{}#{}~{}", self.fid.hex(), self.destination, self.layout.hex(), policy)
            }
            None => format!("{}:{}#{}", self.fid.hex(), self.destination, self.layout.hex()),
        }
    }

    pub fn decode(name: &str) -> Option<Self> {
        let (fid_part, rest) = name.split_once(':')?;
        let fid = FileId::from_hex(fid_part)?;
        let (destination, layout_part) = rest.split_once('#')?;
        if destination.is_empty() {
            return None;
        }
        let (layout_hex, policy) = match layout_part.split_once('~') {
            Some((l, p)) => (l, Some(p.to_string())),
            None => (layout_part, None),
        };
        Some(Self {
            fid,
            destination: destination.to_string(),
            layout: LayoutId::from_hex(layout_hex)?,
            policy,
        })
    }
}

impl std::fmt::Display for ConversionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

/// A workflow queue entry name: `<when>:<016x-fid>:<event>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowEntryName {
    pub when: u64,
    pub fid: FileId,
    pub event: String,
}

impl WorkflowEntryName {
    pub fn new(when: u64, fid: FileId, event: impl Into<String>) -> Self {
        Self { when, fid, event: event.into() }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}:{}", self.when, self.fid.hex(), self.event)
    }

    pub fn decode(name: &str) -> Option<Self> {
        let mut parts = name.splitn(3, ':');
        let when = parts.next()?.parse().ok()?;
        let fid = FileId::from_hex(parts.next()?)?;
        let event = parts.next()?;
        if event.is_empty() {
            return None;
        }
        Some(Self { when, fid, event: event.to_string() })
    }
}

impl std::fmt::Display for WorkflowEntryName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Decoded recycle entry name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecycleName {
    pub original_path: String,
    pub fid: FileId,
    pub is_dir: bool,
}

/// Encode a recycle entry name: the original path with `/` escaped, the
/// file id as suffix, and `.d` for directory trees. The original path is
/// reconstructible from the name alone.
pub fn encode_recycle_name(original_path: &str, fid: FileId, is_dir: bool) -> String {
    let escaped = original_path.replace('/', SLASH_ESCAPE);
    if is_dir {
        format!("{}.{}{}", escaped, fid.hex(), TREE_SUFFIX)
    } else {
        format!("{}.{}", escaped, fid.hex())
    }
}

/// Decode a recycle entry name back into the original path and file id.
pub fn decode_recycle_name(name: &str) -> Option<RecycleName> {
    let (stem, is_dir) = match name.strip_suffix(TREE_SUFFIX) {
        Some(stem) => (stem, true),
        None => (name, false),
    };
    let (escaped, fid_part) = stem.rsplit_once('.')?;
    let fid = FileId::from_hex(fid_part)?;
    if fid_part.len() != 16 {
        return None;
    }
    Some(RecycleName {
        original_path: escaped.replace(SLASH_ESCAPE, "/"),
        fid,
        is_dir,
    })
}

/// Day-directory name for an epoch timestamp: `yyyy-mm-dd` (UTC).
pub fn day_dir(epoch_secs: u64) -> String {
    let dt = Utc.timestamp_opt(epoch_secs as i64, 0).single().unwrap_or_default();
    format!("{:04}-{:02}-{:02}", dt.year(), dt.month(), dt.day())
}

/// Parse a `yyyy-mm-dd` day-directory name to the epoch seconds of its
/// midnight.
pub fn parse_day_dir(name: &str) -> Option<u64> {
    let date = NaiveDate::parse_from_str(name, "%Y-%m-%d").ok()?;
    let dt = date.and_hms_opt(0, 0, 0)?;
    Some(dt.and_utc().timestamp().max(0) as u64)
}

#[cfg(test)]
#[path = "dropbox_tests.rs"]
mod tests;
