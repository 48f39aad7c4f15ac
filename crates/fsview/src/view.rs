// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The FsView registry.
//!
//! Targets are indexed by fsid, by node, by group and by space; a target is
//! reachable through all four indices or through none. Schedulers never
//! keep a target reference across loop iterations; they re-resolve by
//! fsid under the lock on each use, which doubles as "target disappeared
//! mid-operation" detection.

use crate::config_store::ConfigStore;
use crate::target::{ActiveStatus, BootStatus, ConfigStatus, StorageTarget, TargetStats};
use parking_lot::RwLock;
use silo_core::FsId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Errors from registry mutations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FsViewError {
    #[error("fsid {0} already registered")]
    Exists(FsId),

    #[error("fsid {0} not registered")]
    NotFound(FsId),

    #[error("fsid {0} not removable in status {1}")]
    NotRemovable(FsId, String),
}

/// The registry proper. Only reachable through [`FsView`].
#[derive(Debug, Default)]
pub struct FsRegistry {
    targets: HashMap<FsId, StorageTarget>,
    by_node: BTreeMap<String, BTreeSet<FsId>>,
    by_group: BTreeMap<String, BTreeSet<FsId>>,
    by_space: BTreeMap<String, BTreeSet<FsId>>,
    /// Nodes flagged as protocol gateways.
    gateways: BTreeSet<String>,
    node_config: BTreeMap<String, BTreeMap<String, String>>,
    group_config: BTreeMap<String, BTreeMap<String, String>>,
    space_config: BTreeMap<String, BTreeMap<String, String>>,
}

impl FsRegistry {
    pub fn target(&self, fsid: FsId) -> Option<&StorageTarget> {
        self.targets.get(&fsid)
    }

    pub fn target_mut(&mut self, fsid: FsId) -> Option<&mut StorageTarget> {
        self.targets.get_mut(&fsid)
    }

    pub fn targets(&self) -> impl Iterator<Item = &StorageTarget> {
        self.targets.values()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn targets_in_group(&self, group: &str) -> Vec<FsId> {
        self.by_group.get(group).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn targets_in_space(&self, space: &str) -> Vec<FsId> {
        self.by_space.get(space).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn targets_on_node(&self, node: &str) -> Vec<FsId> {
        self.by_node.get(node).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn groups(&self) -> Vec<String> {
        self.by_group.keys().cloned().collect()
    }

    pub fn groups_in_space(&self, space: &str) -> Vec<String> {
        let mut groups = BTreeSet::new();
        for fsid in self.targets_in_space(space) {
            if let Some(t) = self.targets.get(&fsid) {
                groups.insert(t.group.clone());
            }
        }
        groups.into_iter().collect()
    }

    pub fn spaces(&self) -> Vec<String> {
        self.by_space.keys().cloned().collect()
    }

    pub fn nodes(&self) -> Vec<String> {
        self.by_node.keys().cloned().collect()
    }

    pub fn gateways(&self) -> Vec<String> {
        self.gateways.iter().cloned().collect()
    }

    pub fn node_config(&self, node: &str, key: &str) -> Option<&str> {
        self.node_config.get(node).and_then(|m| m.get(key)).map(String::as_str)
    }

    pub fn group_config(&self, group: &str, key: &str) -> Option<&str> {
        self.group_config.get(group).and_then(|m| m.get(key)).map(String::as_str)
    }

    pub fn space_config(&self, space: &str, key: &str) -> Option<&str> {
        self.space_config.get(space).and_then(|m| m.get(key)).map(String::as_str)
    }

    /// A group is disabled when its `status` key says so.
    pub fn group_disabled(&self, group: &str) -> bool {
        matches!(self.group_config(group, "status"), Some("off"))
    }

    fn index(&mut self, t: &StorageTarget) {
        self.by_node.entry(t.node()).or_default().insert(t.fsid);
        self.by_group.entry(t.group.clone()).or_default().insert(t.fsid);
        self.by_space.entry(t.space.clone()).or_default().insert(t.fsid);
    }

    fn unindex(&mut self, t: &StorageTarget) {
        for (map, key) in [
            (&mut self.by_node, t.node()),
            (&mut self.by_group, t.group.clone()),
            (&mut self.by_space, t.space.clone()),
        ] {
            if let Some(set) = map.get_mut(&key) {
                set.remove(&t.fsid);
                if set.is_empty() {
                    map.remove(&key);
                }
            }
        }
    }
}

/// Registry handle: one reader-writer lock, synchronous write-through of
/// configuration to the config store.
pub struct FsView {
    inner: RwLock<FsRegistry>,
    store: Arc<dyn ConfigStore>,
}

impl FsView {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { inner: RwLock::new(FsRegistry::default()), store }
    }

    /// Run a closure under the shared read lock. Iterations hold the lock
    /// for the whole loop.
    pub fn read<T>(&self, f: impl FnOnce(&FsRegistry) -> T) -> T {
        let guard = self.inner.read();
        f(&guard)
    }

    /// Run a closure under the exclusive write lock.
    pub fn write<T>(&self, f: impl FnOnce(&mut FsRegistry) -> T) -> T {
        let mut guard = self.inner.write();
        f(&mut guard)
    }

    // ---- registration -------------------------------------------------

    /// Register a target created by an admin command. Never auto-created.
    pub fn register(&self, target: StorageTarget) -> Result<(), FsViewError> {
        let mut guard = self.inner.write();
        if guard.targets.contains_key(&target.fsid) {
            return Err(FsViewError::Exists(target.fsid));
        }
        self.store_target(&target);
        guard.index(&target);
        guard.targets.insert(target.fsid, target);
        Ok(())
    }

    /// Remove a target. Refused unless it has been drained empty (or was
    /// never enabled).
    pub fn unregister(&self, fsid: FsId) -> Result<(), FsViewError> {
        let mut guard = self.inner.write();
        let target = guard.targets.get(&fsid).ok_or(FsViewError::NotFound(fsid))?;
        if target.config_status > ConfigStatus::Empty {
            return Err(FsViewError::NotRemovable(fsid, target.config_status.to_string()));
        }
        let target = target.clone();
        guard.unindex(&target);
        guard.targets.remove(&fsid);
        self.store.erase(&format!("fs:{}", fsid));
        Ok(())
    }

    /// Move a target to another scheduling group, re-homing it in all
    /// indices atomically.
    pub fn move_to_group(&self, fsid: FsId, group: &str) -> Result<(), FsViewError> {
        let mut guard = self.inner.write();
        let target = guard.targets.get(&fsid).ok_or(FsViewError::NotFound(fsid))?.clone();
        guard.unindex(&target);
        let updated = {
            let t = guard.targets.get_mut(&fsid).ok_or(FsViewError::NotFound(fsid))?;
            t.group = group.to_string();
            t.clone()
        };
        guard.index(&updated);
        self.store_target(&updated);
        Ok(())
    }

    // ---- snapshots ----------------------------------------------------

    /// Copy of status + config + counters, consistent under one lock acquire.
    pub fn snapshot(&self, fsid: FsId) -> Option<StorageTarget> {
        self.inner.read().targets.get(&fsid).cloned()
    }

    /// Mutate one target in place. Returns None when it disappeared.
    pub fn with_target_mut<T>(
        &self,
        fsid: FsId,
        f: impl FnOnce(&mut StorageTarget) -> T,
    ) -> Option<T> {
        let mut guard = self.inner.write();
        guard.targets.get_mut(&fsid).map(f)
    }

    // ---- status + stats -----------------------------------------------

    pub fn set_config_status(&self, fsid: FsId, status: ConfigStatus) -> Result<(), FsViewError> {
        let mut guard = self.inner.write();
        let t = guard.targets.get_mut(&fsid).ok_or(FsViewError::NotFound(fsid))?;
        t.config_status = status;
        let t = t.clone();
        self.store_target(&t);
        Ok(())
    }

    pub fn set_boot_status(&self, fsid: FsId, status: BootStatus) -> Result<(), FsViewError> {
        self.with_target_mut(fsid, |t| t.boot_status = status).ok_or(FsViewError::NotFound(fsid))
    }

    pub fn set_active_status(&self, fsid: FsId, status: ActiveStatus) -> Result<(), FsViewError> {
        self.with_target_mut(fsid, |t| t.active_status = status).ok_or(FsViewError::NotFound(fsid))
    }

    pub fn update_stats(&self, fsid: FsId, stats: TargetStats) -> Result<(), FsViewError> {
        self.with_target_mut(fsid, |t| t.stats = stats).ok_or(FsViewError::NotFound(fsid))
    }

    // ---- configuration ------------------------------------------------

    pub fn set_target_config(&self, fsid: FsId, key: &str, value: &str) -> Result<(), FsViewError> {
        let mut guard = self.inner.write();
        let t = guard.targets.get_mut(&fsid).ok_or(FsViewError::NotFound(fsid))?;
        t.config.insert(key.to_string(), value.to_string());
        self.store.store(&format!("fs:{}:{}", fsid, key), value);
        Ok(())
    }

    pub fn target_config(&self, fsid: FsId, key: &str) -> Option<String> {
        self.inner.read().targets.get(&fsid).and_then(|t| t.config.get(key).cloned())
    }

    /// Set a node-level key and broadcast it to every target on the node.
    pub fn set_node_config(&self, node: &str, key: &str, value: &str) {
        let mut guard = self.inner.write();
        guard
            .node_config
            .entry(node.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        let members = guard.targets_on_node(node);
        for fsid in members {
            if let Some(t) = guard.targets.get_mut(&fsid) {
                t.config.insert(key.to_string(), value.to_string());
            }
        }
        self.store.store(&format!("node:{}:{}", node, key), value);
    }

    pub fn set_group_config(&self, group: &str, key: &str, value: &str) {
        self.inner
            .write()
            .group_config
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self.store.store(&format!("group:{}:{}", group, key), value);
    }

    pub fn set_space_config(&self, space: &str, key: &str, value: &str) {
        self.inner
            .write()
            .space_config
            .entry(space.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self.store.store(&format!("space:{}:{}", space, key), value);
    }

    pub fn space_config(&self, space: &str, key: &str) -> Option<String> {
        self.inner.read().space_config(space, key).map(str::to_string)
    }

    pub fn add_gateway(&self, node: &str) {
        self.inner.write().gateways.insert(node.to_string());
    }

    fn store_target(&self, t: &StorageTarget) {
        self.store.store(
            &format!("fs:{}", t.fsid),
            &format!(
                "host={}&port={}&mount={}&group={}&space={}&configstatus={}",
                t.host, t.port, t.mount, t.group, t.space, t.config_status
            ),
        );
    }
}

#[cfg(test)]
#[path = "view_tests.rs"]
mod tests;
