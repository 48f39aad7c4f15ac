// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatcher for storage-node control messages.
//!
//! Each message is an opaque env-string; the access policy is consulted
//! first, then mutating operations on a slave are redirected to the
//! current master, then the typed request runs. Replies are `OK`, a proc
//! reply, a stall or a redirect.

use crate::commit;
use crate::services::Services;
use crate::stats::Stats;
use crate::wfe::WfEngine;
use silo_core::{Clock, FileId, FsId, VirtualIdentity};
use silo_wire::{EnvMap, FsctlReply, FsctlRequest, ProcReply};

/// Which operations mutate the namespace (and therefore only run on the
/// master).
fn is_mutating(req: &FsctlRequest) -> bool {
    matches!(
        req,
        FsctlRequest::Commit(_)
            | FsctlRequest::Drop(_)
            | FsctlRequest::Event { .. }
            | FsctlRequest::ScheduleBalance { .. }
            | FsctlRequest::ScheduleDrain { .. }
    )
}

/// Handle one storage-node message.
pub async fn dispatch<C: Clock>(
    svc: &Services<C>,
    wfe: &WfEngine<C>,
    raw: &str,
    vid: &VirtualIdentity,
) -> FsctlReply {
    let env = EnvMap::parse(raw);

    if let Err(reason) = svc.access.check(vid) {
        return FsctlReply::Reply(ProcReply::err(silo_core::errno::EPERM, reason));
    }

    let req = match FsctlRequest::from_env(&env) {
        Ok(req) => req,
        Err(e) => {
            Stats::bump(&svc.stats.invalid_envelopes);
            return FsctlReply::Reply(ProcReply::err(silo_core::errno::EINVAL, e.to_string()));
        }
    };

    let mutating = is_mutating(&req);
    if let Some((seconds, message)) = svc.access.stall_for(vid, mutating) {
        return FsctlReply::stall(seconds, message);
    }
    if let Some(url) = svc.access.redirect_for(vid, mutating) {
        return FsctlReply::redirect(url);
    }
    if mutating && !svc.is_master() {
        // Mutations go to the holder; without a known holder, stall.
        return match svc.master.master_id() {
            Some(holder) => FsctlReply::redirect(format!("root://{}", holder)),
            None => FsctlReply::stall(10, "no master available"),
        };
    }

    match req {
        FsctlRequest::Commit(req) => match commit::commit(svc, &req) {
            Ok(()) => FsctlReply::Ok,
            Err(e) => FsctlReply::Reply(ProcReply::err(e.errno(), e.to_string())),
        },
        FsctlRequest::Drop(req) => match commit::drop_replica(svc, &req) {
            Ok(()) => FsctlReply::Ok,
            Err(e) => FsctlReply::Reply(ProcReply::err(e.errno(), e.to_string())),
        },
        FsctlRequest::ScheduleDelete(req) => match commit::schedule_deletions(svc, &req.node) {
            Ok((submitted, _messages)) => {
                FsctlReply::Reply(ProcReply::ok(format!("submitted={}", submitted)))
            }
            Err(e) => FsctlReply::Reply(ProcReply::err(e.errno(), e.to_string())),
        },
        FsctlRequest::ScheduleBalance { fsid } => schedule_pull(svc, fsid, PullKind::Balance),
        FsctlRequest::ScheduleDrain { fsid } => schedule_pull(svc, fsid, PullKind::Drain),
        FsctlRequest::Event { fid, event, workflow } => {
            match wfe.trigger(fid, &event, &workflow, vid).await {
                Ok(msg) => FsctlReply::Reply(ProcReply::ok(msg)),
                Err(e) => FsctlReply::Reply(ProcReply::err(e.errno(), e.to_string())),
            }
        }
        FsctlRequest::IsMaster => {
            FsctlReply::Reply(ProcReply::ok(format!("is_master={}", svc.is_master() as u8)))
        }
        FsctlRequest::MasterSignalBounce => {
            svc.master.request_bounce();
            FsctlReply::Ok
        }
        FsctlRequest::MasterSignalReload => {
            svc.access.apply_access_config(svc.store.as_ref());
            FsctlReply::Ok
        }
    }
}

enum PullKind {
    Balance,
    Drain,
}

/// A target asks for one file to pull. Pick a source replica in the same
/// group (a draining member for drain pulls, the fullest member for
/// balance pulls) and hand back its coordinates, remembering the file in
/// the transient scheduling set so it is not handed out twice.
fn schedule_pull<C: Clock>(svc: &Services<C>, fsid: FsId, kind: PullKind) -> FsctlReply {
    let Some(target) = svc.view.snapshot(fsid) else {
        return FsctlReply::Reply(ProcReply::err(
            silo_core::errno::ENONET,
            format!("fsid {} unknown", fsid),
        ));
    };

    let sources: Vec<FsId> = svc.view.read(|reg| {
        let mut members: Vec<_> = reg
            .targets_in_group(&target.group)
            .into_iter()
            .filter(|s| *s != fsid)
            .filter_map(|s| reg.target(s).cloned())
            .collect();
        match kind {
            PullKind::Drain => members
                .into_iter()
                .filter(|t| t.config.get("stat.drain").map(|s| s == "draining" || s == "stalling")
                    == Some(true))
                .map(|t| t.fsid)
                .collect(),
            PullKind::Balance => {
                members.sort_by(|a, b| {
                    b.fill_ratio().partial_cmp(&a.fill_ratio()).unwrap_or(std::cmp::Ordering::Equal)
                });
                members.into_iter().map(|t| t.fsid).collect()
            }
        }
    });

    let scheduled = match kind {
        PullKind::Drain => &svc.scheduled_drain,
        PullKind::Balance => &svc.scheduled_balance,
    };

    for source in sources {
        let candidates: Vec<FileId> = svc.ns.read(|ns| ns.files_on(source));
        for fid in candidates {
            {
                let mut set = scheduled.lock();
                if set.contains(&fid) {
                    continue;
                }
                set.insert(fid);
            }
            let path = svc.ns.read(|ns| ns.file_path(fid)).unwrap_or_default();
            return FsctlReply::Reply(ProcReply::ok(format!(
                "source.fsid={}&fxid={}&path={}",
                source,
                fid.hex(),
                path
            )));
        }
    }
    FsctlReply::Reply(ProcReply::err(silo_core::errno::ENODATA, "nothing to schedule"))
}

#[cfg(test)]
#[path = "fsctl_tests.rs"]
mod tests;
