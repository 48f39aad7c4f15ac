// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Placeholder expansion for workflow shell actions.
//!
//! Action arguments may reference the triggering file and its container
//! through `<silo::wfe::…>` placeholders; unresolvable attribute lookups
//! expand to `UNDEF`. Script stderr may carry result tags that the engine
//! writes back as extended attributes.

use crate::services::Services;
use crate::wfe::job::WfeJob;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use silo_core::Clock;
use std::collections::BTreeMap;

const UNDEF: &str = "UNDEF";

/// Resolves numeric ids to account names for the owner placeholders
/// (`<silo::wfe::username>` and friends). The account database is
/// deployment-specific; unresolvable ids expand to `UNDEF`.
pub trait IdMap: Send + Sync {
    fn user_name(&self, uid: u32) -> Option<String>;
    fn group_name(&self, gid: u32) -> Option<String>;
}

/// Fixed-table mapper. Empty by default, which is also what the daemon
/// runs with until an account database is attached.
#[derive(Default)]
pub struct StaticIdMap {
    users: BTreeMap<u32, String>,
    groups: BTreeMap<u32, String>,
}

impl StaticIdMap {
    pub fn with_user(mut self, uid: u32, name: impl Into<String>) -> Self {
        self.users.insert(uid, name.into());
        self
    }

    pub fn with_group(mut self, gid: u32, name: impl Into<String>) -> Self {
        self.groups.insert(gid, name.into());
        self
    }
}

impl IdMap for StaticIdMap {
    fn user_name(&self, uid: u32) -> Option<String> {
        self.users.get(&uid).cloned()
    }

    fn group_name(&self, gid: u32) -> Option<String> {
        self.groups.get(&gid).cloned()
    }
}

/// Expand every `<silo::wfe::…>` placeholder in an argument string.
pub fn expand_args<C: Clock>(
    svc: &Services<C>,
    template: &str,
    job: &WfeJob,
    idmap: &dyn IdMap,
) -> String {
    let ctx = svc.ns.read(|ns| {
        let md = ns.file(job.fid).ok()?.clone();
        let path = ns.file_path(job.fid).ok()?;
        let cxattrs = ns.container(md.container).map(|c| c.xattrs.clone()).unwrap_or_default();
        Some((md, path, cxattrs))
    });
    let Some((md, path, cxattrs)) = ctx else {
        return template.replace("<silo::wfe::path>", UNDEF);
    };

    let vpath = job.path(&svc.paths.workflow);
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("<silo::wfe::") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find('>') else {
            out.push_str(tail);
            return out;
        };
        let key = &tail["<silo::wfe::".len()..end];
        out.push_str(&expand_one(key, &md, &path, &vpath, &cxattrs, job, idmap));
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    out
}

fn expand_one(
    key: &str,
    md: &silo_namespace::FileMD,
    path: &str,
    vpath: &str,
    cxattrs: &BTreeMap<String, String>,
    job: &WfeJob,
    idmap: &dyn IdMap,
) -> String {
    if let Some(attr) = key.strip_prefix("fxattr:") {
        return md.xattr(attr).unwrap_or(UNDEF).to_string();
    }
    if let Some(attr) = key.strip_prefix("cxattr:") {
        return cxattrs.get(attr).map(String::as_str).unwrap_or(UNDEF).to_string();
    }
    if let Some(inner) = key.strip_prefix("base64:") {
        let plain = expand_one(inner, md, path, vpath, cxattrs, job, idmap);
        return B64.encode(plain.as_bytes());
    }
    match key {
        "path" => path.to_string(),
        "vpath" => vpath.to_string(),
        "fid" => md.id.to_string(),
        "fxid" => md.id.hex(),
        "cid" => md.container.to_string(),
        "cxid" => md.container.hex(),
        "size" => md.size.to_string(),
        "uid" => md.uid.to_string(),
        "gid" => md.gid.to_string(),
        "username" => idmap.user_name(md.uid).unwrap_or_else(|| UNDEF.into()),
        "groupname" => idmap.group_name(md.gid).unwrap_or_else(|| UNDEF.into()),
        // Requester identity, from the triggering vid.
        "ruid" => job.vid.uid.to_string(),
        "rgid" => job.vid.gid.to_string(),
        "rusername" => job.vid.name.clone(),
        "rgroupname" => idmap.group_name(job.vid.gid).unwrap_or_else(|| UNDEF.into()),
        "ctime::s" => md.ctime.0.to_string(),
        "ctime::ns" => md.ctime.1.to_string(),
        "mtime::s" => md.mtime.0.to_string(),
        "mtime::ns" => md.mtime.1.to_string(),
        "checksum" => md.checksum.as_ref().map(|c| c.hex.clone()).unwrap_or_else(|| UNDEF.into()),
        "checksumtype" => md
            .checksum
            .as_ref()
            .map(|c| c.kind.to_string())
            .unwrap_or_else(|| UNDEF.into()),
        "event" => job.event.clone(),
        "queue" => job.queue.to_string(),
        "workflow" => job.workflow.clone(),
        _ => UNDEF.to_string(),
    }
}

/// A result tag parsed from script stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultTag {
    /// `<silo::wfe::path::fxattr:KEY>value`, set on the target file.
    FileAttr { key: String, value: String },
    /// `<silo::wfe::vpath::fxattr:KEY>value`, set on the workflow entry.
    EntryAttr { key: String, value: String },
}

/// Extract result tags from script stderr.
pub fn parse_result_tags(stderr: &str) -> Vec<ResultTag> {
    let mut tags = Vec::new();
    for line in stderr.lines() {
        for (prefix, is_file) in
            [("<silo::wfe::path::fxattr:", true), ("<silo::wfe::vpath::fxattr:", false)]
        {
            let Some(start) = line.find(prefix) else { continue };
            let tail = &line[start + prefix.len()..];
            let Some(end) = tail.find('>') else { continue };
            let key = tail[..end].to_string();
            if key.is_empty() {
                continue;
            }
            let value = tail[end + 1..].trim().to_string();
            tags.push(if is_file {
                ResultTag::FileAttr { key, value }
            } else {
                ResultTag::EntryAttr { key, value }
            });
        }
    }
    tags
}

/// Write parsed result tags back as extended attributes.
pub fn apply_result_tags<C: Clock>(svc: &Services<C>, job: &WfeJob, tags: &[ResultTag]) {
    let entry_path = job.path(&svc.paths.workflow);
    svc.ns.write(|ns| {
        for tag in tags {
            match tag {
                ResultTag::FileAttr { key, value } => {
                    let _ = ns.set_file_xattr(job.fid, key, value);
                }
                ResultTag::EntryAttr { key, value } => {
                    if let Ok(fid) = ns.resolve_file(&entry_path) {
                        let _ = ns.set_file_xattr(fid, key, value);
                    }
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "expand_tests.rs"]
mod tests;
