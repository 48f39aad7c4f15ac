// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access policy: ban/allow sets and stall/redirect rules.
//!
//! Queried on every request. One reader-writer lock; the derived policy
//! booleans are recomputed on every mutation so they never drift from the
//! rule set. Config round-trips through the config store: ban sets as
//! `:`-separated strings, rules as `,`-separated `key~value~comment`
//! records with `,` and `~` escaped inside comments.

use parking_lot::RwLock;
use silo_core::VirtualIdentity;
use silo_fsview::ConfigStore;
use std::collections::{BTreeMap, BTreeSet};

const KOMMA_ESCAPE: &str = "_#KOMMA#_";
const TILDE_ESCAPE: &str = "_#TILDE#_";

/// Config-store keys for the policy strings.
mod keys {
    pub const BAN_USERS: &str = "access:banned.users";
    pub const BAN_GROUPS: &str = "access:banned.groups";
    pub const BAN_HOSTS: &str = "access:banned.hosts";
    pub const BAN_DOMAINS: &str = "access:banned.domains";
    pub const ALLOW_USERS: &str = "access:allowed.users";
    pub const ALLOW_GROUPS: &str = "access:allowed.groups";
    pub const ALLOW_HOSTS: &str = "access:allowed.hosts";
    pub const ALLOW_DOMAINS: &str = "access:allowed.domains";
    pub const STALL: &str = "access:stall";
    pub const REDIRECT: &str = "access:redirect";
}

/// One stall rule: delay value (seconds, or a rate for `rate:` keys) plus
/// an operator comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StallEntry {
    pub value: String,
    pub comment: String,
}

/// One redirect rule: target URL plus comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectEntry {
    pub target: String,
    pub comment: String,
}

/// Previous rule state returned by [`AccessPolicy::set_stall_rule`] so the
/// caller can restore it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviousStall {
    pub existed: bool,
    pub value: String,
    pub comment: String,
    pub was_global: bool,
}

#[derive(Debug, Default)]
pub struct AccessRules {
    pub banned_users: BTreeSet<u32>,
    pub banned_groups: BTreeSet<u32>,
    pub banned_hosts: BTreeSet<String>,
    pub banned_domains: BTreeSet<String>,
    pub allowed_users: BTreeSet<u32>,
    pub allowed_groups: BTreeSet<u32>,
    pub allowed_hosts: BTreeSet<String>,
    pub allowed_domains: BTreeSet<String>,
    pub stall_rules: BTreeMap<String, StallEntry>,
    pub redirect_rules: BTreeMap<String, RedirectEntry>,
    pub stall_global: bool,
    pub stall_read: bool,
    pub stall_write: bool,
    pub stall_user_group: bool,
}

impl AccessRules {
    /// Recompute the derived booleans from the stall rule set.
    fn recompute(&mut self) {
        self.stall_global = self.stall_rules.contains_key("*");
        self.stall_read = self.stall_rules.contains_key("r:*");
        self.stall_write = self.stall_rules.contains_key("w:*");
        self.stall_user_group = self.stall_rules.keys().any(|k| k.starts_with("rate:"));
    }
}

/// Process-wide access policy.
pub struct AccessPolicy {
    inner: RwLock<AccessRules>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessPolicy {
    pub fn new() -> Self {
        Self { inner: RwLock::new(AccessRules::default()) }
    }

    pub fn read<T>(&self, f: impl FnOnce(&AccessRules) -> T) -> T {
        let guard = self.inner.read();
        f(&guard)
    }

    /// Clear every set and rule.
    pub fn reset(&self) {
        let mut guard = self.inner.write();
        *guard = AccessRules::default();
    }

    // ---- bans ---------------------------------------------------------

    pub fn ban_user(&self, uid: u32) {
        self.inner.write().banned_users.insert(uid);
    }

    pub fn unban_user(&self, uid: u32) {
        self.inner.write().banned_users.remove(&uid);
    }

    pub fn ban_group(&self, gid: u32) {
        self.inner.write().banned_groups.insert(gid);
    }

    pub fn ban_host(&self, host: &str) {
        self.inner.write().banned_hosts.insert(host.to_string());
    }

    pub fn ban_domain(&self, domain: &str) {
        self.inner.write().banned_domains.insert(domain.to_string());
    }

    pub fn allow_user(&self, uid: u32) {
        self.inner.write().allowed_users.insert(uid);
    }

    pub fn allow_host(&self, host: &str) {
        self.inner.write().allowed_hosts.insert(host.to_string());
    }

    /// Whether the identity may talk to the MGM at all. Admins always may.
    /// When an allow set is non-empty, absence from it is a ban.
    pub fn check(&self, vid: &VirtualIdentity) -> Result<(), String> {
        if vid.is_admin() {
            return Ok(());
        }
        let rules = self.inner.read();
        if rules.banned_users.contains(&vid.uid) {
            return Err(format!("uid {} is banned", vid.uid));
        }
        if rules.banned_groups.contains(&vid.gid) {
            return Err(format!("gid {} is banned", vid.gid));
        }
        if rules.banned_hosts.contains(&vid.host) {
            return Err(format!("host {} is banned", vid.host));
        }
        if rules.banned_domains.contains(vid.domain()) {
            return Err(format!("domain {} is banned", vid.domain()));
        }
        if !rules.allowed_users.is_empty() && !rules.allowed_users.contains(&vid.uid) {
            return Err(format!("uid {} is not in the allow set", vid.uid));
        }
        if !rules.allowed_groups.is_empty() && !rules.allowed_groups.contains(&vid.gid) {
            return Err(format!("gid {} is not in the allow set", vid.gid));
        }
        if !rules.allowed_hosts.is_empty() && !rules.allowed_hosts.contains(&vid.host) {
            return Err(format!("host {} is not in the allow set", vid.host));
        }
        if !rules.allowed_domains.is_empty()
            && !rules.allowed_domains.contains(vid.domain())
        {
            return Err(format!("domain {} is not in the allow set", vid.domain()));
        }
        Ok(())
    }

    // ---- stall / redirect rules ---------------------------------------

    /// Install (value = `Some`) or remove (value = `None`) a stall rule
    /// atomically, returning the previous rule so the caller can restore it.
    pub fn set_stall_rule(
        &self,
        key: &str,
        entry: Option<StallEntry>,
    ) -> PreviousStall {
        let mut rules = self.inner.write();
        let previous = rules.stall_rules.get(key).cloned();
        let was_global = rules.stall_global;
        match entry {
            Some(entry) => rules.stall_rules.insert(key.to_string(), entry),
            None => rules.stall_rules.remove(key),
        };
        rules.recompute();
        match previous {
            Some(p) => PreviousStall { existed: true, value: p.value, comment: p.comment, was_global },
            None => PreviousStall { existed: false, value: String::new(), comment: String::new(), was_global },
        }
    }

    pub fn set_redirect_rule(&self, key: &str, entry: Option<RedirectEntry>) {
        let mut rules = self.inner.write();
        match entry {
            Some(entry) => rules.redirect_rules.insert(key.to_string(), entry),
            None => rules.redirect_rules.remove(key),
        };
    }

    /// The stall applying to this request, if any: `*` first, then the
    /// read/write wildcard. Admins are never stalled.
    pub fn stall_for(&self, vid: &VirtualIdentity, is_write: bool) -> Option<(u32, String)> {
        if vid.is_admin() {
            return None;
        }
        let rules = self.inner.read();
        let hit = rules
            .stall_rules
            .get("*")
            .or_else(|| rules.stall_rules.get(if is_write { "w:*" } else { "r:*" }))?;
        Some((hit.value.parse().unwrap_or(1), hit.comment.clone()))
    }

    /// The redirect applying to this request, if any.
    pub fn redirect_for(&self, vid: &VirtualIdentity, is_write: bool) -> Option<String> {
        if vid.is_admin() {
            return None;
        }
        let rules = self.inner.read();
        rules
            .redirect_rules
            .get("*")
            .or_else(|| rules.redirect_rules.get(if is_write { "w:*" } else { "r:*" }))
            .map(|r| r.target.clone())
    }

    /// Find-rate limits: `rate:user:<uid>:FindFiles`, then
    /// `rate:group:<gid>:FindFiles`, then `rate:user:*:FindFiles`; first
    /// hit wins. Same for dirs. Admins are unlimited.
    pub fn find_limits(&self, vid: &VirtualIdentity) -> (Option<u64>, Option<u64>) {
        if vid.is_admin() {
            return (None, None);
        }
        let rules = self.inner.read();
        let lookup = |op: &str| -> Option<u64> {
            [
                format!("rate:user:{}:{}", vid.uid, op),
                format!("rate:group:{}:{}", vid.gid, op),
                format!("rate:user:*:{}", op),
            ]
            .iter()
            .find_map(|key| rules.stall_rules.get(key))
            .and_then(|e| e.value.parse().ok())
        };
        (lookup("FindFiles"), lookup("FindDirs"))
    }

    // ---- config round-trip --------------------------------------------

    /// Write the current policy to the config store.
    pub fn store_access_config(&self, store: &dyn ConfigStore) {
        let rules = self.inner.read();
        store.store(keys::BAN_USERS, &join_ids(&rules.banned_users));
        store.store(keys::BAN_GROUPS, &join_ids(&rules.banned_groups));
        store.store(keys::BAN_HOSTS, &join_strs(&rules.banned_hosts));
        store.store(keys::BAN_DOMAINS, &join_strs(&rules.banned_domains));
        store.store(keys::ALLOW_USERS, &join_ids(&rules.allowed_users));
        store.store(keys::ALLOW_GROUPS, &join_ids(&rules.allowed_groups));
        store.store(keys::ALLOW_HOSTS, &join_strs(&rules.allowed_hosts));
        store.store(keys::ALLOW_DOMAINS, &join_strs(&rules.allowed_domains));

        let stall = rules
            .stall_rules
            .iter()
            .map(|(k, e)| format!("{}~{}~{}", k, e.value, escape_comment(&e.comment)))
            .collect::<Vec<_>>()
            .join(",");
        store.store(keys::STALL, &stall);

        let redirect = rules
            .redirect_rules
            .iter()
            .map(|(k, e)| format!("{}~{}~{}", k, e.target, escape_comment(&e.comment)))
            .collect::<Vec<_>>()
            .join(",");
        store.store(keys::REDIRECT, &redirect);
    }

    /// Load the policy from the config store, replacing the current state.
    pub fn apply_access_config(&self, store: &dyn ConfigStore) {
        let mut rules = self.inner.write();
        *rules = AccessRules::default();
        rules.banned_users = split_ids(store.load(keys::BAN_USERS));
        rules.banned_groups = split_ids(store.load(keys::BAN_GROUPS));
        rules.banned_hosts = split_strs(store.load(keys::BAN_HOSTS));
        rules.banned_domains = split_strs(store.load(keys::BAN_DOMAINS));
        rules.allowed_users = split_ids(store.load(keys::ALLOW_USERS));
        rules.allowed_groups = split_ids(store.load(keys::ALLOW_GROUPS));
        rules.allowed_hosts = split_strs(store.load(keys::ALLOW_HOSTS));
        rules.allowed_domains = split_strs(store.load(keys::ALLOW_DOMAINS));

        for record in store.load(keys::STALL).unwrap_or_default().split(',') {
            let mut parts = record.splitn(3, '~');
            if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
                if key.is_empty() {
                    continue;
                }
                let comment = unescape_comment(parts.next().unwrap_or_default());
                rules
                    .stall_rules
                    .insert(key.to_string(), StallEntry { value: value.to_string(), comment });
            }
        }
        for record in store.load(keys::REDIRECT).unwrap_or_default().split(',') {
            let mut parts = record.splitn(3, '~');
            if let (Some(key), Some(target)) = (parts.next(), parts.next()) {
                if key.is_empty() {
                    continue;
                }
                let comment = unescape_comment(parts.next().unwrap_or_default());
                rules
                    .redirect_rules
                    .insert(key.to_string(), RedirectEntry { target: target.to_string(), comment });
            }
        }
        rules.recompute();
    }
}

fn escape_comment(comment: &str) -> String {
    comment.replace(',', KOMMA_ESCAPE).replace('~', TILDE_ESCAPE)
}

fn unescape_comment(comment: &str) -> String {
    comment.replace(KOMMA_ESCAPE, ",").replace(TILDE_ESCAPE, "~")
}

fn join_ids(set: &BTreeSet<u32>) -> String {
    set.iter().map(u32::to_string).collect::<Vec<_>>().join(":")
}

fn join_strs(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(":")
}

fn split_ids(s: Option<String>) -> BTreeSet<u32> {
    s.unwrap_or_default().split(':').filter_map(|t| t.parse().ok()).collect()
}

fn split_strs(s: Option<String>) -> BTreeSet<String> {
    s.unwrap_or_default()
        .split(':')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[path = "access_tests.rs"]
mod tests;
