// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Virtual identity of a request.
//!
//! The authentication mapping that produces one is out of scope; the MGM
//! only consumes the result. Serialized as JSON when stored on workflow
//! entries (`sys.vid`).

use serde::{Deserialize, Serialize};

/// Identity attached to every request reaching the MGM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualIdentity {
    pub uid: u32,
    pub gid: u32,
    pub name: String,
    /// Originating host, used by the host/domain ban sets.
    pub host: String,
    /// Application tag (e.g. "converter", "fuse").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    /// Granted operator privileges (sudoer).
    #[serde(default)]
    pub sudoer: bool,
}

impl VirtualIdentity {
    pub fn new(uid: u32, gid: u32, name: impl Into<String>, host: impl Into<String>) -> Self {
        Self { uid, gid, name: name.into(), host: host.into(), app: None, sudoer: false }
    }

    /// The in-process root identity used by the engines themselves.
    pub fn root() -> Self {
        Self {
            uid: 0,
            gid: 0,
            name: "root".to_string(),
            host: "localhost".to_string(),
            app: None,
            sudoer: true,
        }
    }

    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    /// Admin = root or an explicitly granted sudoer.
    pub fn is_admin(&self) -> bool {
        self.uid == 0 || self.sudoer
    }

    /// Domain part of the originating host (`a.b.example.org` → `example.org`).
    pub fn domain(&self) -> &str {
        let mut dots = self.host.rmatch_indices('.');
        let _ = dots.next();
        match dots.next() {
            Some((idx, _)) => &self.host[idx + 1..],
            None => &self.host,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(s: &str) -> Option<Self> {
        serde_json::from_str(s).ok()
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
