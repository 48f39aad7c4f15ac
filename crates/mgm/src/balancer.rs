// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The group balancer: equalize fill ratios across scheduling groups.
//!
//! One balancer per space. It never moves bytes itself: it schedules
//! conversion jobs through the converter dropbox and updates its cached
//! group sizes speculatively so subsequent picks see the swap without
//! re-reading the registry.

use crate::services::Services;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use silo_core::{Clock, FileId, FsId, MgmError};
use silo_fsview::ActiveStatus;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Cached group sizes are re-read after this long.
pub const CACHE_TTL_SECS: u64 = 60;

/// Used/capacity pair for one scheduling group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSize {
    pub used: u64,
    pub capacity: u64,
}

impl GroupSize {
    pub fn filled(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.used as f64 / self.capacity as f64
    }

    /// Account a file moving away from this group into `to`.
    fn swap_file(&mut self, to: &mut GroupSize, size: u64) {
        self.used = self.used.saturating_sub(size);
        to.used = to.used.saturating_add(size);
    }
}

struct SizeCache {
    sizes: HashMap<String, GroupSize>,
    avg: f64,
    refreshed_at: u64,
}

/// One balancer per space.
pub struct GroupBalancer<C: Clock> {
    svc: Arc<Services<C>>,
    space: String,
    cache: Mutex<SizeCache>,
    /// Conversion entries we created and still believe pending.
    in_flight: Mutex<HashMap<FileId, String>>,
    rng: Mutex<StdRng>,
}

impl<C: Clock> GroupBalancer<C> {
    pub fn new(svc: Arc<Services<C>>, space: impl Into<String>) -> Self {
        Self {
            svc,
            space: space.into(),
            cache: Mutex::new(SizeCache { sizes: HashMap::new(), avg: 0.0, refreshed_at: 0 }),
            in_flight: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Seed the picker (test hook).
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    fn enabled(&self) -> bool {
        let on = |key: &str| {
            self.svc.view.space_config(&self.space, key).as_deref() == Some("on")
        };
        on("groupbalancer") && on("converter")
    }

    fn threshold(&self) -> f64 {
        self.svc
            .view
            .space_config(&self.space, "groupbalancer.threshold")
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(5.0)
            / 100.0
    }

    fn ntx(&self) -> usize {
        self.svc
            .view
            .space_config(&self.space, "groupbalancer.ntx")
            .and_then(|v| v.parse().ok())
            .unwrap_or(10)
    }

    /// Recompute the cache from online targets when the TTL lapsed.
    fn refresh_cache(&self, now: u64) {
        let mut cache = self.cache.lock();
        if now < cache.refreshed_at + CACHE_TTL_SECS && !cache.sizes.is_empty() {
            return;
        }
        let sizes: HashMap<String, GroupSize> = self.svc.view.read(|reg| {
            let mut sizes: HashMap<String, GroupSize> = HashMap::new();
            for group in reg.groups_in_space(&self.space) {
                let mut total = GroupSize { used: 0, capacity: 0 };
                for fsid in reg.targets_in_group(&group) {
                    if let Some(t) = reg.target(fsid) {
                        total.used += t.stats.used_bytes;
                        total.capacity += t.stats.capacity_bytes;
                    }
                }
                if total.capacity > 0 {
                    sizes.insert(group, total);
                }
            }
            sizes
        });
        cache.avg = if sizes.is_empty() {
            0.0
        } else {
            sizes.values().map(GroupSize::filled).sum::<f64>() / sizes.len() as f64
        };
        cache.sizes = sizes;
        cache.refreshed_at = now;
    }

    /// Forget in-flight entries the converter already consumed.
    fn prune_in_flight(&self) {
        let dropbox = self.svc.paths.conversion.clone();
        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|_, name| {
            let path = format!("{}/{}", dropbox, name);
            self.svc.ns.read(|ns| ns.resolve_file(&path).is_ok())
        });
    }

    fn pick_random<T: Clone>(&self, items: &[T]) -> Option<T> {
        if items.is_empty() {
            return None;
        }
        let idx = self.rng.lock().gen_range(0..items.len());
        items.get(idx).cloned()
    }

    /// One balancing pass. Returns how many conversions were scheduled.
    pub fn tick(&self) -> usize {
        if !self.enabled() || !self.svc.is_master() {
            return 0;
        }
        let now = self.svc.clock.epoch_secs();
        self.refresh_cache(now);
        self.prune_in_flight();

        let threshold = self.threshold();
        let ntx = self.ntx();
        let mut scheduled = 0;

        while self.in_flight.lock().len() < ntx {
            let (over, under) = {
                let cache = self.cache.lock();
                let over: Vec<String> = cache
                    .sizes
                    .iter()
                    .filter(|(_, s)| s.filled() - cache.avg > threshold)
                    .map(|(g, _)| g.clone())
                    .collect();
                let under: Vec<String> = cache
                    .sizes
                    .iter()
                    .filter(|(_, s)| cache.avg - s.filled() > threshold)
                    .map(|(g, _)| g.clone())
                    .collect();
                (over, under)
            };
            let (Some(source), Some(target)) =
                (self.pick_random(&over), self.pick_random(&under))
            else {
                break;
            };
            match self.schedule_swap(&source, &target) {
                Some(size) => {
                    let mut cache = self.cache.lock();
                    apply_swap(&mut cache.sizes, &source, &target, size);
                    scheduled += 1;
                }
                None => break,
            }
        }
        scheduled
    }

    /// Pick a random file on a random online target of the source group and
    /// drop a conversion entry routing it to the target group.
    fn schedule_swap(&self, source_group: &str, target_group: &str) -> Option<u64> {
        let candidates: Vec<FsId> = self.svc.view.read(|reg| {
            reg.targets_in_group(source_group)
                .into_iter()
                .filter(|fsid| {
                    reg.target(*fsid)
                        .map(|t| t.active_status == ActiveStatus::Online)
                        .unwrap_or(false)
                })
                .collect()
        });
        let fsid = self.pick_random(&candidates)?;

        let files = self.svc.ns.read(|ns| ns.files_on(fsid));
        if files.is_empty() {
            return None;
        }
        // A bounded number of draws; a busy target may only hold files that
        // are already scheduled.
        for _ in 0..10 {
            let Some(fid) = self.pick_random(&files) else { break };
            if self.in_flight.lock().contains_key(&fid) {
                continue;
            }
            if self.svc.scheduled_balance.lock().contains(&fid)
                || self.svc.scheduled_drain.lock().contains(&fid)
            {
                continue;
            }
            match self.create_entry(fid, target_group) {
                Ok(Some(size)) => return Some(size),
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "balancer entry creation failed");
                    return None;
                }
            }
        }
        None
    }

    /// Create the dropbox entry. `Ok(None)` means the file is unsuitable.
    fn create_entry(&self, fid: FileId, target_group: &str) -> Result<Option<u64>, MgmError> {
        let dropbox = self.svc.paths.conversion.clone();
        let now = self.svc.clock.epoch_secs();
        let entry = self.svc.ns.write(|ns| -> Result<Option<(String, u64)>, MgmError> {
            let md = ns.file(fid)?.clone();
            if md.size == 0 {
                return Ok(None);
            }
            let tag = silo_wire::ConversionTag::new(fid, target_group, md.layout);
            let name = tag.encode();
            let path = format!("{}/{}", dropbox, name);
            if ns.resolve_file(&path).is_ok() {
                // Already being converted.
                return Ok(None);
            }
            ns.mkdir_p(&dropbox, 0, 0, 0o755, now)?;
            ns.create_file(&path, 0, 0, md.layout, now)?;
            Ok(Some((name, md.size)))
        })?;
        match entry {
            Some((name, size)) => {
                self.in_flight.lock().insert(fid, name);
                self.svc.scheduled_balance.lock().insert(fid);
                Ok(Some(size))
            }
            None => Ok(None),
        }
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Run until shutdown.
    pub async fn run(self) {
        let token = self.svc.shutdown.clone();
        loop {
            self.tick();
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(10)) => {}
            }
        }
    }
}

/// Speculatively account a swap of `size` bytes between two cached groups.
fn apply_swap(map: &mut HashMap<String, GroupSize>, from: &str, to: &str, size: u64) {
    if from == to {
        return;
    }
    let (Some(mut src), Some(mut dst)) = (map.get(from).copied(), map.get(to).copied()) else {
        return;
    };
    src.swap_file(&mut dst, size);
    map.insert(from.to_string(), src);
    map.insert(to.to_string(), dst);
}

#[cfg(test)]
#[path = "balancer_tests.rs"]
mod tests;
