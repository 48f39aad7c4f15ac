// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The namespace view: one reader-writer lock over the whole namespace.
//!
//! Engines read under the shared lock and mutate under the write lock; a
//! whole protocol message is one lock scope. The closure API mirrors that:
//! [`NamespaceView::read`] / [`NamespaceView::write`] hold the lock for
//! exactly the closure's extent.

use crate::container::ContainerMD;
use crate::error::NamespaceError;
use crate::file::FileMD;
use crate::quota::QuotaNode;
use parking_lot::RwLock;
use silo_core::{Checksum, ContainerId, FileId, FsId, LayoutId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

/// The root container. Always present.
pub const ROOT_ID: ContainerId = ContainerId(1);

/// Sentinel parent of a file that was unlinked from the tree but still has
/// replicas awaiting physical deletion.
pub const DETACHED: ContainerId = ContainerId(0);

type Result<T> = std::result::Result<T, NamespaceError>;

/// The namespace proper. Only reachable through [`NamespaceView`].
#[derive(Debug, Default)]
pub struct Namespace {
    files: HashMap<FileId, FileMD>,
    containers: HashMap<ContainerId, ContainerMD>,
    /// Location index: which files hold a live replica on each target.
    files_by_fs: HashMap<FsId, BTreeSet<FileId>>,
    /// Which files hold a replica pending physical deletion on each target.
    unlinked_by_fs: HashMap<FsId, BTreeSet<FileId>>,
    quota: HashMap<ContainerId, QuotaNode>,
    next_file: u64,
    next_container: u64,
}

impl Namespace {
    fn new() -> Self {
        let mut ns = Namespace {
            next_file: 1,
            next_container: 2,
            ..Default::default()
        };
        ns.containers.insert(
            ROOT_ID,
            ContainerMD {
                id: ROOT_ID,
                parent: None,
                name: String::new(),
                uid: 0,
                gid: 0,
                mode: 0o755,
                ctime: (0, 0),
                mtime: (0, 0),
                tmtime: (0, 0),
                tree_size: 0,
                files: BTreeMap::new(),
                dirs: BTreeMap::new(),
                xattrs: BTreeMap::new(),
            },
        );
        ns
    }

    // ---- lookups ------------------------------------------------------

    pub fn file(&self, id: FileId) -> Result<&FileMD> {
        self.files.get(&id).ok_or_else(|| NamespaceError::NotFound(format!("fid {}", id)))
    }

    pub fn file_mut(&mut self, id: FileId) -> Result<&mut FileMD> {
        self.files.get_mut(&id).ok_or_else(|| NamespaceError::NotFound(format!("fid {}", id)))
    }

    pub fn container(&self, id: ContainerId) -> Result<&ContainerMD> {
        self.containers.get(&id).ok_or_else(|| NamespaceError::NotFound(format!("cid {}", id)))
    }

    pub fn container_mut(&mut self, id: ContainerId) -> Result<&mut ContainerMD> {
        self.containers.get_mut(&id).ok_or_else(|| NamespaceError::NotFound(format!("cid {}", id)))
    }

    pub fn has_file(&self, id: FileId) -> bool {
        self.files.contains_key(&id)
    }

    /// Resolve an absolute path to a container id.
    pub fn resolve_container(&self, path: &str) -> Result<ContainerId> {
        let mut cur = ROOT_ID;
        for part in split_path(path)? {
            let md = self.container(cur)?;
            cur = *md
                .dirs
                .get(part)
                .ok_or_else(|| NamespaceError::NotFound(path.to_string()))?;
        }
        Ok(cur)
    }

    /// Resolve an absolute path to a file id.
    pub fn resolve_file(&self, path: &str) -> Result<FileId> {
        let (dir, name) = split_parent(path)?;
        let parent = self.resolve_container(dir)?;
        let md = self.container(parent)?;
        md.files
            .get(name)
            .copied()
            .ok_or_else(|| NamespaceError::NotFound(path.to_string()))
    }

    /// Absolute path of a container.
    pub fn container_path(&self, id: ContainerId) -> Result<String> {
        let mut parts = Vec::new();
        let mut cur = id;
        loop {
            let md = self.container(cur)?;
            match md.parent {
                Some(parent) => {
                    parts.push(md.name.clone());
                    cur = parent;
                }
                None => break,
            }
        }
        parts.reverse();
        Ok(format!("/{}", parts.join("/")))
    }

    /// Absolute path of a file.
    pub fn file_path(&self, id: FileId) -> Result<String> {
        let md = self.file(id)?;
        let dir = self.container_path(md.container)?;
        if dir == "/" {
            Ok(format!("/{}", md.name))
        } else {
            Ok(format!("{}/{}", dir, md.name))
        }
    }

    // ---- mutation -----------------------------------------------------

    /// Create the directory chain for `path`, mkdir -p style.
    pub fn mkdir_p(&mut self, path: &str, uid: u32, gid: u32, mode: u32, now: u64) -> Result<ContainerId> {
        let mut cur = ROOT_ID;
        for part in split_path(path)? {
            let existing = self.container(cur)?.dirs.get(part).copied();
            cur = match existing {
                Some(id) => id,
                None => self.insert_container(cur, part, uid, gid, mode, now)?,
            };
        }
        Ok(cur)
    }

    /// Create one directory; the parent must exist, the name must be free.
    pub fn mkdir(&mut self, path: &str, uid: u32, gid: u32, mode: u32, now: u64) -> Result<ContainerId> {
        let (dir, name) = split_parent(path)?;
        let parent = self.resolve_container(dir)?;
        let parent_md = self.container(parent)?;
        if parent_md.dirs.contains_key(name) || parent_md.files.contains_key(name) {
            return Err(NamespaceError::Exists(path.to_string()));
        }
        self.insert_container(parent, name, uid, gid, mode, now)
    }

    fn insert_container(
        &mut self,
        parent: ContainerId,
        name: &str,
        uid: u32,
        gid: u32,
        mode: u32,
        now: u64,
    ) -> Result<ContainerId> {
        let id = ContainerId(self.next_container);
        self.next_container += 1;
        self.containers.insert(
            id,
            ContainerMD {
                id,
                parent: Some(parent),
                name: name.to_string(),
                uid,
                gid,
                mode,
                ctime: (now, 0),
                mtime: (now, 0),
                tmtime: (now, 0),
                tree_size: 0,
                files: BTreeMap::new(),
                dirs: BTreeMap::new(),
                xattrs: BTreeMap::new(),
            },
        );
        let parent_md = self.container_mut(parent)?;
        parent_md.dirs.insert(name.to_string(), id);
        parent_md.mtime = (now, 0);
        Ok(id)
    }

    /// Create a file under an existing parent directory.
    pub fn create_file(
        &mut self,
        path: &str,
        uid: u32,
        gid: u32,
        layout: LayoutId,
        now: u64,
    ) -> Result<FileId> {
        let (dir, name) = split_parent(path)?;
        let parent = self.resolve_container(dir)?;
        {
            let parent_md = self.container(parent)?;
            if parent_md.files.contains_key(name) || parent_md.dirs.contains_key(name) {
                return Err(NamespaceError::Exists(path.to_string()));
            }
        }
        let id = FileId(self.next_file);
        self.next_file += 1;
        self.files.insert(
            id,
            FileMD {
                id,
                name: name.to_string(),
                container: parent,
                uid,
                gid,
                mode: 0o644,
                size: 0,
                ctime: (now, 0),
                mtime: (now, 0),
                checksum: None,
                layout,
                locations: Vec::new(),
                unlinked: Vec::new(),
                flags: 0,
                xattrs: BTreeMap::new(),
            },
        );
        let parent_md = self.container_mut(parent)?;
        parent_md.files.insert(name.to_string(), id);
        parent_md.mtime = (now, 0);
        if let Some(qid) = self.quota_node_for(parent) {
            if let Some(q) = self.quota.get_mut(&qid) {
                q.account(0);
            }
        }
        Ok(id)
    }

    /// Remove a file record entirely: parent entry, quota, location indices.
    pub fn remove_file(&mut self, id: FileId, now: u64) -> Result<()> {
        let md = self.file(id)?.clone();
        for fsid in &md.locations {
            if let Some(set) = self.files_by_fs.get_mut(fsid) {
                set.remove(&id);
            }
        }
        for fsid in &md.unlinked {
            if let Some(set) = self.unlinked_by_fs.get_mut(fsid) {
                set.remove(&id);
            }
        }
        if md.container != DETACHED {
            if let Some(qid) = self.quota_node_for(md.container) {
                if let Some(q) = self.quota.get_mut(&qid) {
                    q.unaccount(md.size);
                }
            }
            self.adjust_tree_size(md.container, md.size, 0);
            if let Some(parent) = self.containers.get_mut(&md.container) {
                parent.files.remove(&md.name);
                parent.mtime = (now, 0);
                parent.tmtime = (now, 0);
            }
        }
        self.files.remove(&id);
        Ok(())
    }

    /// Unlink a file from the tree: every replica goes to the unlinked set
    /// and the name disappears from the parent, but the record survives
    /// until the last unlinked location is acked (see [`Self::remove_file`]).
    pub fn unlink_file(&mut self, id: FileId, now: u64) -> Result<()> {
        self.unlink_all_locations(id)?;
        let md = self.file(id)?.clone();
        if md.container == DETACHED {
            return Ok(());
        }
        if let Some(qid) = self.quota_node_for(md.container) {
            if let Some(q) = self.quota.get_mut(&qid) {
                q.unaccount(md.size);
            }
        }
        self.adjust_tree_size(md.container, md.size, 0);
        if let Some(parent) = self.containers.get_mut(&md.container) {
            parent.files.remove(&md.name);
            parent.mtime = (now, 0);
            parent.tmtime = (now, 0);
        }
        let fully_gone = {
            let md = self.file_mut(id)?;
            md.container = DETACHED;
            md.unlinked.is_empty()
        };
        if fully_gone {
            // Nothing to ack; the record can go right away.
            self.files.remove(&id);
        }
        Ok(())
    }

    /// Remove an empty directory.
    pub fn remove_container(&mut self, id: ContainerId, now: u64) -> Result<()> {
        let md = self.container(id)?;
        if !md.is_empty() {
            return Err(NamespaceError::NotEmpty(format!("cid {}", id)));
        }
        let name = md.name.clone();
        let parent = md.parent;
        self.quota.remove(&id);
        self.containers.remove(&id);
        if let Some(pid) = parent {
            if let Some(p) = self.containers.get_mut(&pid) {
                p.dirs.remove(&name);
                p.mtime = (now, 0);
            }
        }
        Ok(())
    }

    /// Set file size, keeping quota and tree sizes consistent.
    pub fn set_file_size(&mut self, id: FileId, size: u64) -> Result<()> {
        let (container, old) = {
            let md = self.file(id)?;
            (md.container, md.size)
        };
        if old == size {
            return Ok(());
        }
        if let Some(qid) = self.quota_node_for(container) {
            if let Some(q) = self.quota.get_mut(&qid) {
                q.resize(old, size);
            }
        }
        self.adjust_tree_size(container, old, size);
        self.file_mut(id)?.size = size;
        Ok(())
    }

    pub fn set_file_checksum(&mut self, id: FileId, checksum: Option<Checksum>) -> Result<()> {
        self.file_mut(id)?.checksum = checksum;
        Ok(())
    }

    pub fn set_file_mtime(&mut self, id: FileId, mtime: (u64, u64)) -> Result<()> {
        self.file_mut(id)?.mtime = mtime;
        Ok(())
    }

    fn adjust_tree_size(&mut self, from: ContainerId, old: u64, new: u64) {
        let mut cur = Some(from);
        while let Some(cid) = cur {
            match self.containers.get_mut(&cid) {
                Some(md) => {
                    md.tree_size = md.tree_size.saturating_sub(old).saturating_add(new);
                    cur = md.parent;
                }
                None => break,
            }
        }
    }

    // ---- locations ----------------------------------------------------

    /// Add a live replica location, maintaining the per-target index.
    pub fn add_location(&mut self, id: FileId, fsid: FsId) -> Result<()> {
        self.file_mut(id)?.add_location(fsid);
        self.files_by_fs.entry(fsid).or_default().insert(id);
        Ok(())
    }

    /// Move a live location to the unlinked set.
    pub fn unlink_location(&mut self, id: FileId, fsid: FsId) -> Result<()> {
        let md = self.file_mut(id)?;
        if !md.has_location(fsid) {
            return Ok(());
        }
        md.unlink_location(fsid);
        if let Some(set) = self.files_by_fs.get_mut(&fsid) {
            set.remove(&id);
        }
        self.unlinked_by_fs.entry(fsid).or_default().insert(id);
        Ok(())
    }

    /// Move every live location to the unlinked set.
    pub fn unlink_all_locations(&mut self, id: FileId) -> Result<()> {
        let locations = self.file(id)?.locations.clone();
        for fsid in locations {
            self.unlink_location(id, fsid)?;
        }
        Ok(())
    }

    /// Forget only the unlinked entry for a target (the physical delete
    /// was acked, or a fresh commit supersedes it).
    pub fn clear_unlinked(&mut self, id: FileId, fsid: FsId) -> Result<()> {
        self.file_mut(id)?.remove_unlinked(fsid);
        if let Some(set) = self.unlinked_by_fs.get_mut(&fsid) {
            set.remove(&id);
        }
        Ok(())
    }

    /// Forget a location from both sets (the physical delete was acked,
    /// or the replica is being discarded).
    pub fn remove_location(&mut self, id: FileId, fsid: FsId) -> Result<()> {
        self.file_mut(id)?.remove_location(fsid);
        if let Some(set) = self.files_by_fs.get_mut(&fsid) {
            set.remove(&id);
        }
        if let Some(set) = self.unlinked_by_fs.get_mut(&fsid) {
            set.remove(&id);
        }
        Ok(())
    }

    /// Files with a live replica on the target.
    pub fn files_on(&self, fsid: FsId) -> Vec<FileId> {
        self.files_by_fs.get(&fsid).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn file_count_on(&self, fsid: FsId) -> usize {
        self.files_by_fs.get(&fsid).map(BTreeSet::len).unwrap_or(0)
    }

    /// Files with a replica pending physical deletion on the target.
    pub fn unlinked_on(&self, fsid: FsId) -> Vec<FileId> {
        self.unlinked_by_fs.get(&fsid).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    // ---- rename / merge ----------------------------------------------

    /// Rename (possibly moving) a file. The inode is preserved.
    pub fn rename_file(
        &mut self,
        id: FileId,
        new_parent: ContainerId,
        new_name: &str,
        now: u64,
    ) -> Result<()> {
        if new_name.is_empty() || new_name.contains('/') {
            return Err(NamespaceError::InvalidPath(new_name.to_string()));
        }
        {
            let target = self.container(new_parent)?;
            if target.files.contains_key(new_name) || target.dirs.contains_key(new_name) {
                return Err(NamespaceError::Exists(new_name.to_string()));
            }
        }
        let (old_parent, old_name, size) = {
            let md = self.file(id)?;
            (md.container, md.name.clone(), md.size)
        };
        // Quota moves with the file when the quota node changes.
        let old_q = self.quota_node_for(old_parent);
        let new_q = self.quota_node_for(new_parent);
        if old_q != new_q {
            if let Some(qid) = old_q {
                if let Some(q) = self.quota.get_mut(&qid) {
                    q.unaccount(size);
                }
            }
            if let Some(qid) = new_q {
                if let Some(q) = self.quota.get_mut(&qid) {
                    q.account(size);
                }
            }
        }
        self.adjust_tree_size(old_parent, size, 0);
        self.adjust_tree_size(new_parent, 0, size);
        if let Some(p) = self.containers.get_mut(&old_parent) {
            p.files.remove(&old_name);
            p.mtime = (now, 0);
        }
        if let Some(p) = self.containers.get_mut(&new_parent) {
            p.files.insert(new_name.to_string(), id);
            p.mtime = (now, 0);
        }
        let md = self.file_mut(id)?;
        md.container = new_parent;
        md.name = new_name.to_string();
        Ok(())
    }

    /// Rename (possibly moving) a directory tree. The inode is preserved.
    pub fn rename_container(
        &mut self,
        id: ContainerId,
        new_parent: ContainerId,
        new_name: &str,
        now: u64,
    ) -> Result<()> {
        if new_name.is_empty() || new_name.contains('/') {
            return Err(NamespaceError::InvalidPath(new_name.to_string()));
        }
        // Refuse to move a tree under itself.
        let mut cur = Some(new_parent);
        while let Some(cid) = cur {
            if cid == id {
                return Err(NamespaceError::InvalidPath("move under own subtree".to_string()));
            }
            cur = self.container(cid)?.parent;
        }
        {
            let target = self.container(new_parent)?;
            if target.files.contains_key(new_name) || target.dirs.contains_key(new_name) {
                return Err(NamespaceError::Exists(new_name.to_string()));
            }
        }
        let (old_parent, old_name, tree_size) = {
            let md = self.container(id)?;
            (
                md.parent.ok_or_else(|| NamespaceError::InvalidPath("rename of root".to_string()))?,
                md.name.clone(),
                md.tree_size,
            )
        };
        self.adjust_tree_size(old_parent, tree_size, 0);
        self.adjust_tree_size(new_parent, 0, tree_size);
        if let Some(p) = self.containers.get_mut(&old_parent) {
            p.dirs.remove(&old_name);
            p.mtime = (now, 0);
        }
        if let Some(p) = self.containers.get_mut(&new_parent) {
            p.dirs.insert(new_name.to_string(), id);
            p.mtime = (now, 0);
        }
        let md = self.container_mut(id)?;
        md.parent = Some(new_parent);
        md.name = new_name.to_string();
        Ok(())
    }

    /// Merge a conversion result over its source: the source keeps its id,
    /// path and owner but adopts the proc file's size, checksum, layout and
    /// replica locations. The source's previous replicas go to the unlinked
    /// set for physical deletion; the proc file disappears.
    pub fn merge(&mut self, proc_id: FileId, target_id: FileId, now: u64) -> Result<()> {
        let proc_md = self.file(proc_id)?.clone();
        self.unlink_all_locations(target_id)?;
        self.set_file_size(target_id, proc_md.size)?;
        {
            let target = self.file_mut(target_id)?;
            target.checksum = proc_md.checksum.clone();
            target.layout = proc_md.layout;
            target.mtime = (now, 0);
        }
        for fsid in &proc_md.locations {
            self.add_location(target_id, *fsid)?;
            if let Some(set) = self.files_by_fs.get_mut(fsid) {
                set.remove(&proc_id);
            }
        }
        // The proc entry's locations were transferred; drop the record
        // without unlinking them.
        if let Some(qid) = self.quota_node_for(proc_md.container) {
            if let Some(q) = self.quota.get_mut(&qid) {
                q.unaccount(proc_md.size);
            }
        }
        self.adjust_tree_size(proc_md.container, proc_md.size, 0);
        if let Some(p) = self.containers.get_mut(&proc_md.container) {
            p.files.remove(&proc_md.name);
            p.mtime = (now, 0);
        }
        self.files.remove(&proc_id);
        Ok(())
    }

    // ---- xattrs -------------------------------------------------------

    pub fn set_file_xattr(&mut self, id: FileId, key: &str, value: &str) -> Result<()> {
        self.file_mut(id)?.xattrs.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn remove_file_xattr(&mut self, id: FileId, key: &str) -> Result<()> {
        self.file_mut(id)?.xattrs.remove(key);
        Ok(())
    }

    pub fn set_container_xattr(&mut self, id: ContainerId, key: &str, value: &str) -> Result<()> {
        self.container_mut(id)?.xattrs.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn remove_container_xattr(&mut self, id: ContainerId, key: &str) -> Result<()> {
        self.container_mut(id)?.xattrs.remove(key);
        Ok(())
    }

    // ---- quota --------------------------------------------------------

    /// Turn a directory into a quota node, re-accounting its subtree.
    pub fn set_quota(&mut self, id: ContainerId, capacity_bytes: u64, capacity_inodes: u64) -> Result<()> {
        self.container(id)?;
        let mut node = QuotaNode::new(capacity_bytes, capacity_inodes);
        let (bytes, inodes) = self.subtree_usage(id);
        node.used_bytes = bytes;
        node.used_inodes = inodes;
        self.quota.insert(id, node);
        Ok(())
    }

    /// The nearest enclosing quota node, if any.
    pub fn quota_node_for(&self, id: ContainerId) -> Option<ContainerId> {
        let mut cur = Some(id);
        while let Some(cid) = cur {
            if self.quota.contains_key(&cid) {
                return Some(cid);
            }
            cur = self.containers.get(&cid).and_then(|c| c.parent);
        }
        None
    }

    pub fn quota_node(&self, id: ContainerId) -> Option<QuotaNode> {
        self.quota.get(&id).copied()
    }

    fn subtree_usage(&self, id: ContainerId) -> (u64, u64) {
        let mut bytes = 0u64;
        let mut inodes = 0u64;
        let mut stack = vec![id];
        while let Some(cid) = stack.pop() {
            if let Some(md) = self.containers.get(&cid) {
                for fid in md.files.values() {
                    if let Some(f) = self.files.get(fid) {
                        bytes += f.size;
                        inodes += 1;
                    }
                }
                stack.extend(md.dirs.values().copied());
            }
        }
        (bytes, inodes)
    }
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    if !path.starts_with('/') {
        return Err(NamespaceError::InvalidPath(path.to_string()));
    }
    Ok(path.split('/').filter(|p| !p.is_empty()).collect())
}

/// Split an absolute path into (parent, basename).
pub fn split_parent(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() || !trimmed.starts_with('/') {
        return Err(NamespaceError::InvalidPath(path.to_string()));
    }
    match trimmed.rfind('/') {
        Some(0) => Ok(("/", &trimmed[1..])),
        Some(idx) => Ok((&trimmed[..idx], &trimmed[idx + 1..])),
        None => Err(NamespaceError::InvalidPath(path.to_string())),
    }
}

/// Process-wide handle to the namespace: the lock owner.
pub struct NamespaceView {
    inner: RwLock<Namespace>,
    booted: AtomicBool,
}

impl NamespaceView {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Namespace::new()), booted: AtomicBool::new(false) }
    }

    /// Run a closure under the shared read lock.
    pub fn read<T>(&self, f: impl FnOnce(&Namespace) -> T) -> T {
        let guard = self.inner.read();
        f(&guard)
    }

    /// Run a closure under the exclusive write lock. One protocol message
    /// is one such scope.
    pub fn write<T>(&self, f: impl FnOnce(&mut Namespace) -> T) -> T {
        let mut guard = self.inner.write();
        f(&mut guard)
    }

    /// Whether the namespace has finished loading from its backing store.
    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::Acquire)
    }

    pub fn set_booted(&self, booted: bool) {
        self.booted.store(booted, Ordering::Release);
    }
}

impl Default for NamespaceView {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "view_tests.rs"]
mod tests;
