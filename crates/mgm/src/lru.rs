// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The LRU engine: attribute-driven expiration, conversion and eviction.
//!
//! Periodically walks the namespace for directories carrying any
//! `sys.lru.*` attribute and applies, in order: empty-directory expiry,
//! age-based match expiry, watermark eviction against the project quota,
//! and match-driven conversion scheduling. The walk output is consumed in
//! reverse, deepest first, so emptied ancestors collapse in one pass.

use crate::services::Services;
use glob::Pattern;
use silo_core::{parse_duration, Clock, ContainerId, FileId, LayoutId, LayoutType};
use silo_namespace::ROOT_ID;
use silo_wire::ConversionTag;
use std::sync::Arc;
use std::time::Duration;

/// Attribute names.
pub const EXPIRE_EMPTY_ATTR: &str = "sys.lru.expire.empty";
pub const EXPIRE_MATCH_ATTR: &str = "sys.lru.expire.match";
pub const LOW_WATERMARK_ATTR: &str = "sys.lru.lowwatermark";
pub const HIGH_WATERMARK_ATTR: &str = "sys.lru.highwatermark";
pub const CONVERT_MATCH_ATTR: &str = "sys.lru.convert.match";
pub const CONVERSION_ATTR_PREFIX: &str = "sys.conversion.";

/// Walk depth bound.
const MAX_DEPTH: usize = 64;
/// Default pass interval in seconds.
pub const DEFAULT_INTERVAL: u64 = 3600;

/// What one pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LruPass {
    pub dirs_scanned: usize,
    pub dirs_removed: usize,
    pub files_removed: usize,
    pub conversions_scheduled: usize,
}

/// One `<glob>:<duration>` policy entry.
#[derive(Debug, Clone)]
struct MatchRule {
    pattern: Pattern,
    max_age: u64,
}

fn parse_match_list(value: &str) -> Vec<MatchRule> {
    value
        .split(',')
        .filter_map(|item| {
            let (glob, age) = item.trim().rsplit_once(':')?;
            let pattern = Pattern::new(glob).ok()?;
            let max_age = parse_duration(age).ok()?.as_secs();
            Some(MatchRule { pattern, max_age })
        })
        .collect()
}

/// Parse a conversion target: a hex layout id, or `replica:<n>` /
/// `plain`, each optionally suffixed with `~<placement-policy>`.
fn parse_layout_spec(value: &str) -> Option<(LayoutId, Option<String>)> {
    let (spec, policy) = match value.split_once('~') {
        Some((s, p)) => (s, Some(p.to_string())),
        None => (value, None),
    };
    if let Some(layout) = LayoutId::from_hex(spec) {
        return Some((layout, policy));
    }
    let mut parts = spec.split(':');
    let kind = parts.next()?;
    match kind {
        "plain" => Some((LayoutId::plain(silo_core::ChecksumType::Adler32), policy)),
        "replica" => {
            let n = parts.next().and_then(|v| v.parse().ok()).unwrap_or(2);
            Some((LayoutId::replica(n, silo_core::ChecksumType::Adler32), policy))
        }
        "rain" => {
            let n = parts.next().and_then(|v| v.parse().ok()).unwrap_or(6);
            Some((
                LayoutId::new(LayoutType::Rain, n, silo_core::ChecksumType::Adler32, 0),
                policy,
            ))
        }
        _ => None,
    }
}

/// The LRU engine. Singleton; space config drives it.
pub struct LruEngine<C: Clock> {
    svc: Arc<Services<C>>,
    space: String,
}

impl<C: Clock> LruEngine<C> {
    pub fn new(svc: Arc<Services<C>>, space: impl Into<String>) -> Self {
        Self { svc, space: space.into() }
    }

    fn enabled(&self) -> bool {
        self.svc.view.space_config(&self.space, "lru").as_deref() == Some("on")
    }

    fn interval(&self) -> u64 {
        self.svc
            .view
            .space_config(&self.space, "lru.interval")
            .and_then(|v| silo_core::duration::parse_duration_secs(&v).ok())
            .unwrap_or(DEFAULT_INTERVAL)
    }

    /// Per-directory settle to bound namespace load on very large trees.
    fn scan_sleep_ms(&self, dir_count: usize) -> u64 {
        if dir_count < 10_000_000 {
            return 0;
        }
        self.svc
            .view
            .space_config(&self.space, "lru.scan.ms")
            .and_then(|v| v.parse().ok())
            .unwrap_or(10)
    }

    /// One full pass over every policy directory.
    pub fn tick(&self) -> LruPass {
        let mut pass = LruPass::default();
        if !self.enabled() || !self.svc.is_master() {
            return pass;
        }
        let now = self.svc.clock.epoch_secs();
        let mut dirs = self
            .svc
            .ns
            .read(|ns| ns.find_dirs_with_attr_prefix(ROOT_ID, "sys.lru.", MAX_DEPTH));
        // Deepest first, so empty ancestors collapse in one pass.
        dirs.reverse();
        pass.dirs_scanned = dirs.len();
        let settle = self.scan_sleep_ms(dirs.len());

        for dir in dirs {
            if settle > 0 {
                // Bound the namespace lock pressure on very large trees.
                std::thread::sleep(std::time::Duration::from_millis(settle));
            }
            let attrs = self.svc.ns.read(|ns| ns.container(dir).map(|md| md.xattrs.clone()));
            let Ok(attrs) = attrs else { continue };

            if let Some(age) = attrs.get(EXPIRE_EMPTY_ATTR) {
                pass.dirs_removed += self.expire_empty(dir, age, now) as usize;
            }
            if let Some(rules) = attrs.get(EXPIRE_MATCH_ATTR) {
                pass.files_removed += self.expire_match(dir, rules, now);
            }
            if let (Some(low), Some(high)) =
                (attrs.get(LOW_WATERMARK_ATTR), attrs.get(HIGH_WATERMARK_ATTR))
            {
                pass.files_removed += self.watermark_evict(dir, low, high, now);
            }
            if let Some(rules) = attrs.get(CONVERT_MATCH_ATTR) {
                pass.conversions_scheduled += self.convert_match(dir, rules, &attrs, now);
            }
        }
        pass
    }

    /// `sys.lru.expire.empty`: remove the directory itself once it has been
    /// empty for longer than the configured age.
    fn expire_empty(&self, dir: ContainerId, age: &str, now: u64) -> bool {
        let Ok(max_age) = parse_duration(age).map(|d| d.as_secs()) else {
            return false;
        };
        self.svc.ns.write(|ns| {
            let Ok(md) = ns.container(dir) else { return false };
            if !md.is_empty() || md.ctime.0 + max_age >= now {
                return false;
            }
            ns.remove_container(dir, now).is_ok()
        })
    }

    /// `sys.lru.expire.match`: delete files whose name matches a glob and
    /// whose age passed the rule's bound.
    fn expire_match(&self, dir: ContainerId, rules: &str, now: u64) -> usize {
        let rules = parse_match_list(rules);
        if rules.is_empty() {
            return 0;
        }
        let victims: Vec<FileId> = self.svc.ns.read(|ns| {
            ns.files_in(dir)
                .into_iter()
                .filter(|fid| {
                    ns.file(*fid)
                        .map(|md| {
                            rules.iter().any(|r| {
                                r.pattern.matches(&md.name) && md.ctime.0 + r.max_age < now
                            })
                        })
                        .unwrap_or(false)
                })
                .collect()
        });
        let mut removed = 0;
        for fid in victims {
            let ok = self.svc.ns.write(|ns| ns.unlink_file(fid, now).is_ok());
            if ok {
                removed += 1;
            }
        }
        removed
    }

    /// Watermark eviction: when the project quota reaches the high mark,
    /// delete oldest-first until usage falls back to the low mark.
    fn watermark_evict(&self, dir: ContainerId, low: &str, high: &str, now: u64) -> usize {
        let (Ok(low), Ok(high)) = (low.parse::<f64>(), high.parse::<f64>()) else {
            return 0;
        };
        let usage = self.svc.ns.read(|ns| {
            let qid = ns.quota_node_for(dir)?;
            let node = ns.quota_node(qid)?;
            Some((node.used_bytes, node.capacity_bytes))
        });
        let Some((used, capacity)) = usage else { return 0 };
        if capacity == 0 || (used as f64) < capacity as f64 * high / 100.0 {
            return 0;
        }
        let goal = capacity as f64 * low / 100.0;
        let mut to_free = used.saturating_sub(goal as u64);

        // Oldest first by ctime, bounded to exactly cover the excess.
        let mut files: Vec<(u64, u64, FileId)> = self.svc.ns.read(|ns| {
            ns.files_under(dir, MAX_DEPTH)
                .into_iter()
                .filter_map(|fid| ns.file(fid).ok().map(|md| (md.ctime.0, md.size, fid)))
                .collect()
        });
        files.sort_unstable();

        let mut removed = 0;
        for (_, size, fid) in files {
            if to_free == 0 {
                break;
            }
            if self.svc.ns.write(|ns| ns.unlink_file(fid, now).is_ok()) {
                to_free = to_free.saturating_sub(size);
                removed += 1;
            }
        }
        removed
    }

    /// `sys.lru.convert.match` + `sys.conversion.<glob>`: schedule layout
    /// conversions for matching, old-enough files.
    fn convert_match(
        &self,
        dir: ContainerId,
        rules: &str,
        attrs: &std::collections::BTreeMap<String, String>,
        now: u64,
    ) -> usize {
        let rules = parse_match_list(rules);
        let mut scheduled = 0;
        for rule in rules {
            let glob_str = rule.pattern.as_str();
            let Some(target) = attrs.get(&format!("{}{}", CONVERSION_ATTR_PREFIX, glob_str))
            else {
                continue;
            };
            let Some((target_layout, policy)) = parse_layout_spec(target) else {
                continue;
            };
            let candidates: Vec<FileId> = self.svc.ns.read(|ns| {
                ns.files_in(dir)
                    .into_iter()
                    .filter(|fid| {
                        ns.file(*fid)
                            .map(|md| {
                                rule.pattern.matches(&md.name)
                                    && md.ctime.0 + rule.max_age < now
                                    && md.layout != target_layout
                            })
                            .unwrap_or(false)
                    })
                    .collect()
            });
            for fid in candidates {
                let mut tag = ConversionTag::new(fid, self.space.clone(), target_layout);
                if let Some(policy) = &policy {
                    tag = tag.with_policy(policy.clone());
                }
                let dropbox = self.svc.paths.conversion.clone();
                let created = self.svc.ns.write(|ns| {
                    let path = format!("{}/{}", dropbox, tag.encode());
                    if ns.resolve_file(&path).is_ok() {
                        return false;
                    }
                    if ns.mkdir_p(&dropbox, 0, 0, 0o755, now).is_err() {
                        return false;
                    }
                    ns.create_file(&path, 0, 0, target_layout, now).is_ok()
                });
                if created {
                    scheduled += 1;
                }
            }
        }
        scheduled
    }

    /// Run until shutdown: pass, then sleep the remaining interval in 60 s
    /// slices, re-checking the `lru` switch each wake-up.
    pub async fn run(self) {
        let token = self.svc.shutdown.clone();
        while !self.svc.ns.is_booted() {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
        loop {
            let started = self.svc.clock.epoch_secs();
            let pass = self.tick();
            if pass != LruPass::default() {
                tracing::info!(
                    dirs = pass.dirs_scanned,
                    files_removed = pass.files_removed,
                    dirs_removed = pass.dirs_removed,
                    conversions = pass.conversions_scheduled,
                    "lru pass done"
                );
            }
            let elapsed = self.svc.clock.epoch_secs().saturating_sub(started);
            let mut remaining = self.interval().saturating_sub(elapsed);
            while remaining > 0 {
                let slice = remaining.min(60);
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(slice)) => {}
                }
                if !self.enabled() {
                    break;
                }
                remaining -= slice;
            }
            if token.is_cancelled() {
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "lru_tests.rs"]
mod tests;
