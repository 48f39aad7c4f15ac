// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write-through configuration persistence.
//!
//! The real store lives behind the configuration subsystem; this crate only
//! needs the seam. Keys are flat strings (`fs:<fsid>:<key>`,
//! `space:<name>:<key>`, `global:<key>`).

use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Synchronous key-value persistence for cluster configuration.
pub trait ConfigStore: Send + Sync {
    fn store(&self, key: &str, value: &str);
    fn erase(&self, key: &str);
    fn load(&self, key: &str) -> Option<String>;
    fn entries(&self) -> Vec<(String, String)>;
}

/// In-memory store used in tests and as the default backing.
#[derive(Default)]
pub struct MemConfigStore {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemConfigStore {
    fn store(&self, key: &str, value: &str) {
        self.map.lock().insert(key.to_string(), value.to_string());
    }

    fn erase(&self, key: &str) {
        self.map.lock().remove(key);
    }

    fn load(&self, key: &str) -> Option<String> {
        self.map.lock().get(key).cloned()
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.map.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}
