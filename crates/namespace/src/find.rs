// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded namespace walks.
//!
//! The LRU engine and the recycle purger both consume the find output in
//! reverse, which must therefore yield ancestors before descendants so the
//! reversal is deepest-first and empty ancestors can collapse in one pass.

use crate::view::Namespace;
use silo_core::{ContainerId, FileId};

impl Namespace {
    /// All directories under `root` (inclusive), parents before children.
    /// `max_depth` bounds the descent; 0 means just the root.
    pub fn find_dirs(&self, root: ContainerId, max_depth: usize) -> Vec<ContainerId> {
        let mut out = Vec::new();
        let mut stack = vec![(root, 0usize)];
        while let Some((cid, depth)) = stack.pop() {
            let Ok(md) = self.container(cid) else { continue };
            out.push(cid);
            if depth < max_depth {
                // Reverse so the stack pops children in name order.
                for child in md.dirs.values().rev() {
                    stack.push((*child, depth + 1));
                }
            }
        }
        out
    }

    /// Directories under `root` carrying any attribute with the prefix,
    /// parents before children (reverse for deepest-first).
    pub fn find_dirs_with_attr_prefix(
        &self,
        root: ContainerId,
        prefix: &str,
        max_depth: usize,
    ) -> Vec<ContainerId> {
        self.find_dirs(root, max_depth)
            .into_iter()
            .filter(|cid| {
                self.container(*cid).map(|md| md.has_attr_with_prefix(prefix)).unwrap_or(false)
            })
            .collect()
    }

    /// Files directly inside a directory, in name order.
    pub fn files_in(&self, dir: ContainerId) -> Vec<FileId> {
        self.container(dir).map(|md| md.files.values().copied().collect()).unwrap_or_default()
    }

    /// Every file under `root`, any depth.
    pub fn files_under(&self, root: ContainerId, max_depth: usize) -> Vec<FileId> {
        let mut out = Vec::new();
        for cid in self.find_dirs(root, max_depth) {
            out.extend(self.files_in(cid));
        }
        out
    }

    /// Remove a whole subtree: unlink every file, then drop the
    /// directories deepest first.
    pub fn remove_tree(&mut self, root: ContainerId, now: u64) -> Result<(), crate::NamespaceError> {
        let mut dirs = self.find_dirs(root, usize::MAX);
        for dir in &dirs {
            for fid in self.files_in(*dir) {
                let _ = self.unlink_file(fid, now);
            }
        }
        dirs.reverse();
        for dir in dirs {
            self.remove_container(dir, now)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "find_tests.rs"]
mod tests;
