// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The recycle bin: time- and ratio-bounded retention of deleted trees.
//!
//! Deleted files and directories are renamed in place into a structured
//! tree under the recycle root; the inode survives and the original path
//! is reconstructible from the entry name alone. The purge loop removes
//! entries older than the keep-time, and in ratio mode only while the
//! recycle quota stays above the configured watermark.
//!
//! Two layouts are readable: the legacy `/<gid>/<uid>/<entry>` form and
//! the current `/uid:<uid>/<yyyy>/<mm>/<dd>/<idx>/<entry>` form. Only the
//! current form is ever written.

use crate::services::Services;
use crate::stats::Stats;
use chrono::{Datelike, TimeZone, Utc};
use silo_core::{Clock, ContainerId, FileId, MgmError, VirtualIdentity};
use silo_namespace::Namespace;
use silo_wire::{decode_recycle_name, encode_recycle_name};
use std::sync::Arc;
use std::time::Duration;

/// Xattrs on the recycle root.
pub const KEEPTIME_ATTR: &str = "sys.recycle.keeptime";
pub const KEEPRATIO_ATTR: &str = "sys.recycle.keepratio";
/// Xattr linking an entry to its version directory entry.
pub const VERSION_KEY_ATTR: &str = "sys.recycle.version.key";

/// Entries per index subdirectory before a new index is opened.
pub const INDEX_CAP: usize = 100_000;
/// Ratio mode stops deleting once usage fell this far below the keep-ratio.
pub const RATIO_STOP_MARGIN: f64 = 0.1;
/// Purge loop snooze floor.
pub const MIN_SNOOZE_SECS: u64 = 30;

const WALK_DEPTH: usize = 8;

/// Restore options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreFlags {
    /// `--force-original-name`: displace an occupant of the original path.
    pub force_original_name: bool,
    /// `--restore-versions`: also restore the linked version entry.
    pub restore_versions: bool,
}

/// One recyclable entry, file or tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecycleId {
    File(FileId),
    Tree(ContainerId),
}

#[derive(Debug, Clone)]
struct BinEntry {
    ctime: u64,
    id: RecycleId,
}

#[derive(Debug, Clone, Copy)]
struct BinConfig {
    keeptime: u64,
    keepratio: Option<f64>,
}

/// Outcome of one purge tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeOutcome {
    pub removed: u64,
    pub skipped_by_ratio: bool,
    /// Seconds until the next entry expires, if any survive.
    pub next_expiry_in: Option<u64>,
}

/// The recycle bin service.
pub struct Recycle<C: Clock> {
    svc: Arc<Services<C>>,
}

impl<C: Clock> Recycle<C> {
    pub fn new(svc: Arc<Services<C>>) -> Self {
        Self { svc }
    }

    fn root(&self) -> String {
        self.svc.paths.recycle.clone()
    }

    fn config(&self) -> Option<BinConfig> {
        let root = self.root();
        self.svc.ns.read(|ns| {
            let dir = ns.resolve_container(&root).ok()?;
            let md = ns.container(dir).ok()?;
            let keeptime = md.xattr(KEEPTIME_ATTR)?.parse().ok()?;
            let keepratio = md
                .xattr(KEEPRATIO_ATTR)
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|r| *r > 0.0 && *r < 1.0);
            Some(BinConfig { keeptime, keepratio })
        })
    }

    fn usage_ratio(&self) -> Option<f64> {
        let root = self.root();
        self.svc.ns.read(|ns| {
            let dir = ns.resolve_container(&root).ok()?;
            let qid = ns.quota_node_for(dir)?;
            ns.quota_node(qid).map(|q| q.max_ratio())
        })
    }

    /// Enumerate both layouts, oldest first.
    fn enumerate(&self) -> Vec<BinEntry> {
        let root = self.root();
        let mut entries: Vec<BinEntry> = self.svc.ns.read(|ns| {
            let Ok(root_id) = ns.resolve_container(&root) else {
                return Vec::new();
            };
            let mut out = Vec::new();
            for dir in ns.find_dirs(root_id, WALK_DEPTH) {
                let Ok(md) = ns.container(dir) else { continue };
                // Tree entries: child dirs whose name decodes (suffix .d).
                for child in md.dirs.values() {
                    if let Ok(cmd) = ns.container(*child) {
                        if decode_recycle_name(&cmd.name).map(|r| r.is_dir).unwrap_or(false) {
                            out.push(BinEntry { ctime: cmd.ctime.0, id: RecycleId::Tree(*child) });
                        }
                    }
                }
                // File entries.
                for fid in md.files.values() {
                    if let Ok(fmd) = ns.file(*fid) {
                        if decode_recycle_name(&fmd.name).is_some() {
                            out.push(BinEntry { ctime: fmd.ctime.0, id: RecycleId::File(*fid) });
                        }
                    }
                }
            }
            out
        });
        entries.sort_by_key(|e| e.ctime);
        entries
    }

    /// One purge pass.
    pub fn purge_tick(&self) -> PurgeOutcome {
        let mut outcome = PurgeOutcome::default();
        let Some(cfg) = self.config() else { return outcome };
        let now = self.svc.clock.epoch_secs();

        // Ratio mode: nothing to do while usage is below the keep-ratio.
        if let Some(keepratio) = cfg.keepratio {
            let ratio = self.usage_ratio().unwrap_or(0.0);
            if ratio < keepratio {
                outcome.skipped_by_ratio = true;
                return outcome;
            }
        }

        for entry in self.enumerate() {
            if entry.ctime + cfg.keeptime >= now {
                // Sorted by ctime: everything further is younger.
                outcome.next_expiry_in = Some(entry.ctime + cfg.keeptime - now);
                break;
            }
            if let Some(keepratio) = cfg.keepratio {
                let ratio = self.usage_ratio().unwrap_or(0.0);
                if ratio < keepratio - RATIO_STOP_MARGIN {
                    break;
                }
            }
            if self.remove_entry(&entry.id, now) {
                outcome.removed += 1;
                Stats::bump(&self.svc.stats.recycle_purged);
            }
        }
        outcome
    }

    fn remove_entry(&self, id: &RecycleId, now: u64) -> bool {
        self.svc.ns.write(|ns| match id {
            RecycleId::File(fid) => ns.unlink_file(*fid, now).is_ok(),
            RecycleId::Tree(cid) => ns.remove_tree(*cid, now).is_ok(),
        })
    }

    /// Sleep length until the next tick.
    pub fn snooze_secs(&self, outcome: &PurgeOutcome) -> u64 {
        let keeptime = self.config().map(|c| c.keeptime).unwrap_or(3600);
        outcome
            .next_expiry_in
            .unwrap_or(keeptime)
            .clamp(MIN_SNOOZE_SECS, keeptime.max(MIN_SNOOZE_SECS))
    }

    /// Run the purge loop until shutdown.
    pub async fn run(self) {
        let token = self.svc.shutdown.clone();
        while !self.svc.ns.is_booted() {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
        loop {
            let outcome = if self.svc.is_master() {
                self.purge_tick()
            } else {
                PurgeOutcome::default()
            };
            if outcome.removed > 0 {
                tracing::info!(removed = outcome.removed, "recycle purge pass");
            }
            let snooze = self.snooze_secs(&outcome);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(snooze)) => {}
            }
        }
    }

    // ---- ToGarbage ----------------------------------------------------

    /// Move a file or directory into the recycle bin by renaming in place.
    /// Returns the recycle-resident path.
    pub fn to_garbage(&self, path: &str, _vid: &VirtualIdentity) -> Result<String, MgmError> {
        let now = self.svc.clock.epoch_secs();
        let root = self.root();
        self.svc.ns.write(|ns| -> Result<String, MgmError> {
            let (owner_uid, id) = match ns.resolve_file(path) {
                Ok(fid) => (ns.file(fid)?.uid, RecycleId::File(fid)),
                Err(_) => {
                    let cid = ns
                        .resolve_container(path)
                        .map_err(|_| MgmError::NotFound(path.to_string()))?;
                    (ns.container(cid)?.uid, RecycleId::Tree(cid))
                }
            };

            let root_id =
                ns.resolve_container(&root).map_err(|_| MgmError::Fatal(format!("{} missing", root)))?;
            let (root_uid, root_gid) = {
                let md = ns.container(root_id)?;
                (md.uid, md.gid)
            };

            let day = Utc.timestamp_opt(now as i64, 0).single().unwrap_or_default();
            let base = format!(
                "{}/uid:{}/{:04}/{:02}/{:02}",
                root,
                owner_uid,
                day.year(),
                day.month(),
                day.day()
            );

            // First index directory with room, created on demand with the
            // recycle root's ownership.
            let mut index = 0usize;
            let index_dir = loop {
                let dir = format!("{}/{}", base, index);
                match ns.resolve_container(&dir) {
                    Ok(cid) => {
                        if ns.container(cid)?.child_count() >= INDEX_CAP {
                            index += 1;
                        } else {
                            break cid;
                        }
                    }
                    Err(_) => {
                        break ns
                            .mkdir_p(&dir, root_uid, root_gid, 0o700, now)
                            .map_err(|_| MgmError::Fatal(format!("cannot create {}", dir)))?;
                    }
                }
            };

            let (name, moved) = match id {
                RecycleId::File(fid) => {
                    let name = encode_recycle_name(path, fid, false);
                    (name.clone(), ns.rename_file(fid, index_dir, &name, now).is_ok())
                }
                RecycleId::Tree(cid) => {
                    let name = encode_recycle_name(path, FileId(cid.as_u64()), true);
                    (name.clone(), ns.rename_container(cid, index_dir, &name, now).is_ok())
                }
            };
            if !moved {
                return Err(MgmError::Fatal(format!("cannot move {} to recycle", path)));
            }
            // The entry's ctime becomes the deletion time the purge loop
            // ages against.
            match id {
                RecycleId::File(fid) => ns.file_mut(fid)?.ctime = (now, 0),
                RecycleId::Tree(cid) => ns.container_mut(cid)?.ctime = (now, 0),
            }
            Ok(format!("{}/{}/{}", base, index, name))
        })
    }

    // ---- Restore ------------------------------------------------------

    /// Restore a recycled entry. Key is `fxid:<hex>` (file) or
    /// `pxid:<hex>` (directory tree).
    pub fn restore(
        &self,
        key: &str,
        vid: &VirtualIdentity,
        flags: RestoreFlags,
    ) -> Result<String, MgmError> {
        let now = self.svc.clock.epoch_secs();
        let root = self.root();

        let (restored_path, version_key) = self.svc.ns.write(|ns| {
            restore_locked(ns, &root, key, vid, flags, now)
        })?;

        if flags.restore_versions {
            if let Some(vkey) = version_key {
                match self.restore(&vkey, vid, RestoreFlags { restore_versions: false, ..flags }) {
                    Ok(_) => {}
                    // The version entry may have expired meanwhile.
                    Err(MgmError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(restored_path)
    }

    // ---- Purge --------------------------------------------------------

    /// Purge recycle entries under a day prefix (`yyyy`, `yyyy/mm` or
    /// `yyyy/mm/dd`; empty for everything). Non-admins may only purge
    /// their own subtree. Returns (tree deletions, file deletions).
    pub fn purge(
        &self,
        vid: &VirtualIdentity,
        date: &str,
        global: bool,
    ) -> Result<(u64, u64), MgmError> {
        if global && !vid.is_admin() {
            return Err(MgmError::PermissionDenied(
                "global purge requires admin privileges".to_string(),
            ));
        }
        let now = self.svc.clock.epoch_secs();
        let root = self.root();
        let date_path = date.replace('-', "/");

        let uids: Vec<u32> = if global {
            self.svc.ns.read(|ns| {
                let Ok(root_id) = ns.resolve_container(&root) else { return Vec::new() };
                ns.container(root_id)
                    .map(|md| {
                        md.dirs
                            .keys()
                            .filter_map(|name| name.strip_prefix("uid:"))
                            .filter_map(|uid| uid.parse().ok())
                            .collect()
                    })
                    .unwrap_or_default()
            })
        } else {
            vec![vid.uid]
        };

        let mut trees = 0u64;
        let mut files = 0u64;
        for uid in uids {
            let base = if date_path.is_empty() {
                format!("{}/uid:{}", root, uid)
            } else {
                format!("{}/uid:{}/{}", root, uid, date_path)
            };
            let entries: Vec<BinEntry> = self.svc.ns.read(|ns| {
                let Ok(base_id) = ns.resolve_container(&base) else { return Vec::new() };
                let mut out = Vec::new();
                for dir in ns.find_dirs(base_id, 5) {
                    let Ok(md) = ns.container(dir) else { continue };
                    for child in md.dirs.values() {
                        if let Ok(cmd) = ns.container(*child) {
                            if decode_recycle_name(&cmd.name).map(|r| r.is_dir).unwrap_or(false) {
                                out.push(BinEntry {
                                    ctime: cmd.ctime.0,
                                    id: RecycleId::Tree(*child),
                                });
                            }
                        }
                    }
                    for fid in md.files.values() {
                        if let Ok(fmd) = ns.file(*fid) {
                            if decode_recycle_name(&fmd.name).is_some() {
                                out.push(BinEntry { ctime: fmd.ctime.0, id: RecycleId::File(*fid) });
                            }
                        }
                    }
                }
                out
            });
            for entry in entries {
                if self.remove_entry(&entry.id, now) {
                    match entry.id {
                        RecycleId::Tree(_) => trees += 1,
                        RecycleId::File(_) => files += 1,
                    }
                }
            }
        }
        Ok((trees, files))
    }
}

/// The restore body, one write-lock scope.
fn restore_locked(
    ns: &mut Namespace,
    root: &str,
    key: &str,
    vid: &VirtualIdentity,
    flags: RestoreFlags,
    now: u64,
) -> Result<(String, Option<String>), MgmError> {
    let id = parse_restore_key(key)?;

    let (entry_name, owner_uid, version_key, current_path) = match &id {
        RecycleId::File(fid) => {
            let md = ns.file(*fid)?;
            (
                md.name.clone(),
                md.uid,
                md.xattr(VERSION_KEY_ATTR).map(str::to_string),
                ns.file_path(*fid)?,
            )
        }
        RecycleId::Tree(cid) => {
            let md = ns.container(*cid)?;
            (
                md.name.clone(),
                md.uid,
                md.xattr(VERSION_KEY_ATTR).map(str::to_string),
                ns.container_path(*cid)?,
            )
        }
    };

    if !current_path.starts_with(root) {
        return Err(MgmError::InvalidArg(format!("{} is not recycle-resident", key)));
    }
    if vid.uid != owner_uid && !vid.is_admin() {
        return Err(MgmError::PermissionDenied(format!(
            "uid {} does not own recycle entry {}",
            vid.uid, key
        )));
    }

    let decoded = decode_recycle_name(&entry_name)
        .ok_or_else(|| MgmError::InvalidArg(format!("undecodable entry name {}", entry_name)))?;
    let original = decoded.original_path;
    let (parent_path, basename) = silo_namespace::view::split_parent(&original)
        .map_err(|_| MgmError::InvalidArg(original.clone()))?;

    let parent = ns
        .resolve_container(parent_path)
        .map_err(|_| MgmError::NotFound(format!("original parent {} is gone", parent_path)))?;

    // An occupant of the original name is only displaced when forced.
    let occupied_file = ns.container(parent)?.files.get(basename).copied();
    let occupied_dir = ns.container(parent)?.dirs.get(basename).copied();
    if occupied_file.is_some() || occupied_dir.is_some() {
        if !flags.force_original_name {
            return Err(MgmError::Exists(original.clone()));
        }
        if let Some(fid) = occupied_file {
            let stash = format!("{}.{:016x}", basename, fid.as_u64());
            ns.rename_file(fid, parent, &stash, now)?;
        }
        if let Some(cid) = occupied_dir {
            let stash = format!("{}.{:016x}", basename, cid.as_u64());
            ns.rename_container(cid, parent, &stash, now)?;
        }
    }

    match &id {
        RecycleId::File(fid) => ns.rename_file(*fid, parent, basename, now)?,
        RecycleId::Tree(cid) => ns.rename_container(*cid, parent, basename, now)?,
    }
    Ok((original, version_key))
}

fn parse_restore_key(key: &str) -> Result<RecycleId, MgmError> {
    if let Some(hex) = key.strip_prefix("fxid:") {
        return FileId::from_hex(hex)
            .map(RecycleId::File)
            .ok_or_else(|| MgmError::InvalidArg(key.to_string()));
    }
    if let Some(hex) = key.strip_prefix("pxid:") {
        return ContainerId::from_hex(hex)
            .map(RecycleId::Tree)
            .ok_or_else(|| MgmError::InvalidArg(key.to_string()));
    }
    Err(MgmError::InvalidArg(format!("restore key must be fxid:<hex> or pxid:<hex>: {}", key)))
}

#[cfg(test)]
#[path = "recycle_tests.rs"]
mod tests;
