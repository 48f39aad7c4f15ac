// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The commit / drop / schedule-delete protocol.
//!
//! Storage nodes publish replica-level state back through these three
//! messages. Each handler is one atomic lock scope on the namespace;
//! interleaving between messages for the same file stays correct because
//! of that.

use crate::services::Services;
use crate::stats::Stats;
use silo_core::{Checksum, Clock, FileId, LayoutType, MgmError};
use silo_namespace::Namespace;
use silo_wire::{Capability, CommitRequest, DeletionEntry, DropRequest};

/// Atomic-upload temporary name prefix (basename form).
pub const ATOMIC_PREFIX: &str = ".sys.a#.";
/// Xattr tagging the latest atomic upload for a target name.
pub const ATOMIC_TAG_ATTR: &str = "sys.tmp.atomic";
/// Temporary ETag attribute cleared when contents change.
pub const ETAG_ATTR: &str = "sys.tmp.etag";
/// Per-directory versioning policy attribute.
pub const VERSIONING_ATTR: &str = "sys.versioning";

/// Deletion batching: entries per capability message.
pub const DELETION_BATCH_MAX: usize = 1024;
/// Deletion batching: payload budget, 75 % of the transport frame.
pub const TRANSPORT_MAX: usize = 2 * 1024 * 1024;
pub const DELETION_PAYLOAD_MAX: usize = TRANSPORT_MAX / 4 * 3;

/// Deletion capability lifetime in seconds.
const CAPABILITY_TTL: u64 = 3600;

/// Accept one commit message. Returns `Ok` for the literal `OK` reply.
pub fn commit<C: Clock>(svc: &Services<C>, req: &CommitRequest) -> Result<(), MgmError> {
    // 1. The target must be writable.
    let target = svc
        .view
        .snapshot(req.fsid)
        .ok_or_else(|| MgmError::NonOperational(format!("fsid {} unknown", req.fsid)))?;
    if !target.config_status.is_writable() {
        return Err(MgmError::NonOperational(format!(
            "fsid {} is {}",
            req.fsid, target.config_status
        )));
    }

    let now = svc.clock.epoch_secs();
    let pending_delete = svc.ns.write(|ns| commit_locked(svc, ns, req, now))?;

    // The stashed previous target is removed after the lock dropped.
    if let Some(stale) = pending_delete {
        svc.ns.write(|ns| {
            if let Err(e) = ns.unlink_file(stale, now) {
                tracing::debug!(fid = %stale, error = %e, "stale atomic target already gone");
            }
        });
    }

    // A replication commit completes a scheduled movement.
    if req.flags.replication {
        svc.forget_scheduled(req.fid);
    }

    Stats::bump(&svc.stats.commits);
    Ok(())
}

/// Steps 2–7 under one namespace write lock.
fn commit_locked<C: Clock>(
    svc: &Services<C>,
    ns: &mut Namespace,
    req: &CommitRequest,
    now: u64,
) -> Result<Option<FileId>, MgmError> {
    // 2. The file must still exist.
    if !ns.has_file(req.fid) {
        return Err(MgmError::NotFound(format!("fid {} already removed", req.fid)));
    }

    // 3. Replication commits on a replicated layout verify against the
    // existing metadata. Reconstruction rebuilds skip both checks.
    let md = ns.file(req.fid)?.clone();
    if req.flags.replication
        && !req.flags.reconstruction
        && md.layout.layout_type() == LayoutType::Replica
    {
        if req.flags.fusex && md.has_unlinked_location(req.fsid) {
            return Err(MgmError::Conflict(format!(
                "fid {} fsid {} is a stale recovery",
                req.fid, req.fsid
            )));
        }
        if md.size != req.size {
            let _ = ns.remove_location(req.fid, req.fsid);
            Stats::bump(&svc.stats.replica_failed_size);
            return Err(MgmError::SizeMismatch(format!(
                "fid {} expects size {} got {}",
                req.fid, md.size, req.size
            )));
        }
        if let (Some(have), Some(got)) = (&md.checksum, &req.checksum) {
            if !have.matches_hex(got) {
                let _ = ns.remove_location(req.fid, req.fsid);
                Stats::bump(&svc.stats.replica_failed_checksum);
                return Err(MgmError::ChecksumMismatch(format!(
                    "fid {} expects {} got {}",
                    req.fid, have.hex, got
                )));
            }
        }
    }

    // 4. Publish the replica. Quota reattachment rides on the size update.
    ns.add_location(req.fid, req.fsid)?;
    ns.clear_unlinked(req.fid, req.fsid)?;
    if let Some(drop_fsid) = req.drop_fsid {
        ns.remove_location(req.fid, drop_fsid)?;
    }

    let mut updated = false;
    if req.flags.commit_size {
        if md.size != req.size {
            ns.set_file_size(req.fid, req.size)?;
            updated = true;
        }
        if req.flags.modified {
            updated = true;
        }
    }
    if req.flags.commit_checksum {
        let new = req
            .checksum
            .as_ref()
            .map(|hex| Checksum::new(md.layout.checksum_type(), hex.clone()));
        if new != md.checksum {
            ns.set_file_checksum(req.fid, new)?;
            updated = true;
        }
    }

    // 5. Chunked-upload bookkeeping.
    let upload_complete = match req.chunk {
        Some(chunk) if !chunk.is_last() => {
            ns.file_mut(req.fid)?.set_upload_in_progress(chunk.index);
            false
        }
        Some(_) => {
            ns.file_mut(req.fid)?.clear_upload_in_progress();
            true
        }
        None => true,
    };

    // 6. Times and invalidation.
    if updated && req.mtime != 0 {
        ns.set_file_mtime(req.fid, (req.mtime, req.mtime_ns))?;
        if let Ok(parent) = ns.container_mut(md.container) {
            parent.mtime = (req.mtime, 0);
        }
        let _ = ns.remove_file_xattr(req.fid, ETAG_ATTR);
        if !req.flags.fusex {
            Stats::bump(&svc.stats.fusex_broadcasts);
        }
    }

    // 7. Atomic-upload de-atomization.
    if md.name.starts_with(ATOMIC_PREFIX) && upload_complete {
        return deatomize(ns, req, now);
    }

    Ok(None)
}

/// Strip the atomic prefix and the trailing random tag:
/// `.sys.a#.file.XXXX` → `file`.
fn demangle_atomic(name: &str) -> Option<&str> {
    let stem = name.strip_prefix(ATOMIC_PREFIX)?;
    match stem.rsplit_once('.') {
        Some((target, _tag)) if !target.is_empty() => Some(target),
        _ => None,
    }
}

/// Swap the completed atomic temporary into place, within the same write
/// scope. Returns a file to remove after the lock drops.
fn deatomize(
    ns: &mut Namespace,
    req: &CommitRequest,
    now: u64,
) -> Result<Option<FileId>, MgmError> {
    let md = ns.file(req.fid)?.clone();
    let Some(target_name) = demangle_atomic(&md.name) else {
        return Ok(None);
    };
    let target_name = target_name.to_string();
    let dir = md.container;

    let occupant = ns.container(dir)?.files.get(&target_name).copied();

    let mut pending_delete = None;
    if let Some(existing) = occupant {
        // A different upload already tagged as latest wins the race.
        let tag = ns.file(existing)?.xattr(ATOMIC_TAG_ATTR).map(str::to_string);
        if let Some(tag) = tag {
            if tag != md.name {
                return Err(MgmError::Conflict(format!(
                    "atomic upload superseded by {}",
                    tag
                )));
            }
        }

        let versions = ns
            .container(dir)?
            .xattr(VERSIONING_ATTR)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);
        if versions > 0 {
            // Keep the occupant as a version, named by its inode.
            let version_name = format!("{}.{:016x}", target_name, existing.as_u64());
            ns.rename_file(existing, dir, &version_name, now)?;
        } else {
            let stash_name = format!("{}.delete.{:016x}", target_name, existing.as_u64());
            ns.rename_file(existing, dir, &stash_name, now)?;
            pending_delete = Some(existing);
        }
    }

    ns.rename_file(req.fid, dir, &target_name, now)?;
    let _ = ns.remove_file_xattr(req.fid, ATOMIC_TAG_ATTR);
    Ok(pending_delete)
}

/// Accept one drop message. Idempotent: a file or location already gone is
/// a silent success.
pub fn drop_replica<C: Clock>(svc: &Services<C>, req: &DropRequest) -> Result<(), MgmError> {
    let now = svc.clock.epoch_secs();
    svc.ns.write(|ns| {
        if !ns.has_file(req.fid) {
            return Ok(());
        }
        if req.drop_all {
            let md = ns.file(req.fid)?.clone();
            for fsid in md.locations.iter().chain(md.unlinked.iter()) {
                let _ = ns.remove_location(req.fid, *fsid);
            }
        } else {
            let _ = ns.remove_location(req.fid, req.fsid);
        }
        let md = ns.file(req.fid)?;
        if md.locations.is_empty() && md.unlinked.is_empty() {
            ns.remove_file(req.fid, now)?;
        }
        Ok(())
    })
    .map(|()| Stats::bump(&svc.stats.drops))
}

/// One signed deletion message bound for a storage target.
#[derive(Debug, Clone)]
pub struct DeletionMessage {
    pub fsid: silo_core::FsId,
    pub entries: usize,
    pub signed: String,
}

/// Build the per-node deletion messages for `schedule2delete`. Returns the
/// messages and the total entry count submitted.
pub fn schedule_deletions<C: Clock>(
    svc: &Services<C>,
    node: &str,
) -> Result<(usize, Vec<DeletionMessage>), MgmError> {
    let targets: Vec<_> = svc.view.read(|reg| {
        reg.targets_on_node(node)
            .into_iter()
            .filter_map(|fsid| reg.target(fsid).cloned())
            .collect()
    });

    let expiry = svc.clock.epoch_secs() + CAPABILITY_TTL;
    let mut messages = Vec::new();
    let mut submitted = 0usize;

    for target in targets {
        // Skip the whole target unless it can act on deletions right now.
        if !target.can_delete() {
            continue;
        }
        let unlinked = svc.ns.read(|ns| ns.unlinked_on(target.fsid));
        if unlinked.is_empty() {
            continue;
        }

        let base_len =
            Capability::delete(&svc.manager_id, target.fsid, &target.mount, Vec::new())
                .encoded_len();
        let mut batch: Vec<DeletionEntry> = Vec::new();
        let mut batch_len = base_len;
        let mut flush =
            |batch: &mut Vec<DeletionEntry>, batch_len: &mut usize| {
                if batch.is_empty() {
                    return;
                }
                let cap = Capability::delete(
                    &svc.manager_id,
                    target.fsid,
                    &target.mount,
                    std::mem::take(batch),
                );
                submitted += cap.fids.len();
                messages.push(DeletionMessage {
                    fsid: target.fsid,
                    entries: cap.fids.len(),
                    signed: cap.sign(&svc.capability_key, expiry),
                });
                *batch_len = base_len;
            };
        for fid in unlinked {
            let entry_len = fid.hex().len() + 1;
            // Flush before the next entry would breach either cap.
            if batch.len() >= DELETION_BATCH_MAX
                || batch_len + entry_len >= DELETION_PAYLOAD_MAX
            {
                flush(&mut batch, &mut batch_len);
            }
            batch.push(DeletionEntry::new(fid));
            batch_len += entry_len;
        }
        flush(&mut batch, &mut batch_len);
    }

    Ok((submitted, messages))
}

#[cfg(test)]
#[path = "commit_tests.rs"]
mod tests;
