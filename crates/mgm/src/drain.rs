// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The drain engine: evacuate one storage target.
//!
//! One engine per draining target. The engine only supervises: the byte
//! movement is performed by peer targets pulling replicas once their
//! `drainer` flag is on. Every FsView access re-checks that the target
//! still exists; a target removed mid-drain ends the engine cleanly.
//!
//! State machine:
//! `NoDrain → Prepare → Wait → Draining ⇄ Stalling → (Drained | Expired)`

use crate::services::Services;
use silo_core::{Clock, FsId};
use silo_fsview::ConfigStatus;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// No file-count progress for this long means the drain is stalling.
pub const STALL_THRESHOLD_SECS: u64 = 600;
/// Floor of the settle delay before draining starts.
pub const SERVICE_DELAY_FLOOR: u64 = 60;
/// Drain attempts before giving up expired.
pub const MAX_TRY: u32 = 1;
/// Fallback drain period when neither target nor space configure one.
pub const DEFAULT_DRAIN_PERIOD: u64 = 86400;

/// Target config key publishing the engine state.
pub const DRAIN_STATE_KEY: &str = "stat.drain";

/// Per-target drain state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    NoDrain,
    Prepare,
    Wait,
    Draining,
    Stalling,
    Drained,
    Expired,
    Failed,
}

silo_core::simple_display! {
    DrainState {
        NoDrain => "nodrain",
        Prepare => "prepare",
        Wait => "waiting",
        Draining => "draining",
        Stalling => "stalling",
        Drained => "drained",
        Expired => "expired",
        Failed => "failed",
    }
}

/// Drain supervisor bookkeeping for one target.
pub struct DrainEngine<C: Clock> {
    svc: Arc<Services<C>>,
    fsid: FsId,
    state: DrainState,
    total_files: u64,
    last_count: u64,
    last_filesleft_change: u64,
    deadline: u64,
    retries: u32,
}

impl<C: Clock> DrainEngine<C> {
    pub fn new(svc: Arc<Services<C>>, fsid: FsId) -> Self {
        Self {
            svc,
            fsid,
            state: DrainState::NoDrain,
            total_files: 0,
            last_count: 0,
            last_filesleft_change: 0,
            deadline: 0,
            retries: 0,
        }
    }

    pub fn state(&self) -> DrainState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    fn drain_period(&self) -> u64 {
        let by_target = self
            .svc
            .view
            .target_config(self.fsid, "drainperiod")
            .and_then(|v| v.parse().ok());
        by_target
            .or_else(|| {
                let space = self.svc.view.snapshot(self.fsid).map(|t| t.space)?;
                self.svc.view.space_config(&space, "drainperiod").and_then(|v| v.parse().ok())
            })
            .unwrap_or(DEFAULT_DRAIN_PERIOD)
    }

    /// Publish the engine state and a stats update. Returns false when the
    /// target disappeared mid-drain.
    fn publish(&self, f: impl FnOnce(&mut silo_fsview::StorageTarget)) -> bool {
        let state = self.state.to_string();
        self.svc
            .view
            .with_target_mut(self.fsid, |t| {
                t.config.insert(DRAIN_STATE_KEY.to_string(), state);
                f(t);
            })
            .is_some()
    }

    /// Reset counters and enter `Prepare`. Returns false if the target is
    /// gone.
    pub fn start(&mut self, now: u64) -> bool {
        self.state = DrainState::Prepare;
        self.deadline = now + self.drain_period();
        self.retries = 0;
        self.publish(|t| {
            t.drain = silo_fsview::DrainStats::default();
        })
    }

    /// Snapshot the work at the end of the settle delay. Returns the file
    /// count, or None when the target is gone.
    pub fn take_snapshot(&mut self, now: u64) -> Option<u64> {
        let count = self.svc.ns.read(|ns| ns.file_count_on(self.fsid)) as u64;
        self.total_files = count;
        self.last_count = count;
        self.last_filesleft_change = now;
        self.state = if count == 0 { DrainState::Drained } else { DrainState::Draining };
        if !self.publish(|t| {
            t.drain.files_left = count;
            t.drain.bytes_left = t.stats.used_bytes;
        }) {
            return None;
        }
        Some(count)
    }

    /// One observation during the draining phase.
    pub fn observe(&mut self, now: u64) -> DrainState {
        if self.svc.view.snapshot(self.fsid).is_none() {
            self.state = DrainState::Failed;
            return self.state;
        }
        let count = self.svc.ns.read(|ns| ns.file_count_on(self.fsid)) as u64;
        if count != self.last_count {
            self.last_count = count;
            self.last_filesleft_change = now;
        }

        self.state = if count == 0 {
            DrainState::Drained
        } else if now >= self.deadline {
            DrainState::Expired
        } else if now - self.last_filesleft_change >= STALL_THRESHOLD_SECS {
            DrainState::Stalling
        } else {
            DrainState::Draining
        };

        let progress = if self.total_files == 0 {
            100
        } else {
            (100 * (self.total_files - count.min(self.total_files)) / self.total_files) as u32
        };
        let time_left = self.deadline.saturating_sub(now);
        self.publish(|t| {
            t.drain.files_left = count;
            t.drain.progress = progress;
            t.drain.time_left = time_left;
            t.drain.retries = self.retries;
        });
        self.state
    }

    /// Finish successfully: clear counters, disable pull, mark the target
    /// empty unless the process is shutting down.
    pub fn finish_drained(&mut self, shutting_down: bool) {
        self.state = DrainState::Drained;
        self.publish(|t| {
            t.drain = silo_fsview::DrainStats::default();
        });
        if let Some(group) = self.svc.view.snapshot(self.fsid).map(|t| t.group) {
            update_group_pull(&self.svc, &group);
        }
        if !shutting_down {
            let _ = self.svc.view.set_config_status(self.fsid, ConfigStatus::Empty);
        }
    }

    /// The group deadline passed. Starts another attempt while the try
    /// ceiling allows one; otherwise gives up expired with the target left
    /// in `drain` and the retry counter at its attempt-start value.
    pub fn finish_expired(&mut self, now: u64) -> bool {
        if self.retries + 1 < MAX_TRY {
            self.retries += 1;
            let retries = self.retries;
            self.publish(|t| t.drain.retries = retries);
            self.deadline = now + self.drain_period();
            self.state = DrainState::Draining;
            true
        } else {
            self.state = DrainState::Expired;
            self.publish(|t| t.drain.time_left = 0);
            if let Some(group) = self.svc.view.snapshot(self.fsid).map(|t| t.group) {
                update_group_pull(&self.svc, &group);
            }
            false
        }
    }

    /// Enable pulling on the peer group and publish per-node caps.
    pub fn enable_pull(&self) {
        let Some(target) = self.svc.view.snapshot(self.fsid) else { return };
        update_group_pull(&self.svc, &target.group);

        let ntx = self.svc.view.space_config(&target.space, "drainer.node.ntx");
        let rate = self.svc.view.space_config(&target.space, "drainer.node.rate");
        let nodes: Vec<String> = self.svc.view.read(|reg| {
            reg.targets_in_group(&target.group)
                .into_iter()
                .filter_map(|fsid| reg.target(fsid).map(|t| t.node()))
                .collect()
        });
        for node in nodes {
            if let Some(ntx) = &ntx {
                self.svc.view.set_node_config(&node, "drainer.node.ntx", ntx);
            }
            if let Some(rate) = &rate {
                self.svc.view.set_node_config(&node, "drainer.node.rate", rate);
            }
        }
    }

    /// Drive the full state machine until done or cancelled.
    pub async fn run(mut self) {
        let token = self.svc.shutdown.clone();
        let now = self.svc.clock.epoch_secs();
        if !self.start(now) {
            return;
        }

        // Settle delay with a per-second timeleft countdown.
        let period = self.drain_period();
        let service_delay = SERVICE_DELAY_FLOOR.max(period / 10).min(period);
        for elapsed in 0..service_delay {
            if token.is_cancelled() {
                return;
            }
            let remaining = self.deadline.saturating_sub(self.svc.clock.epoch_secs());
            if !self.publish(|t| t.drain.time_left = remaining) {
                return;
            }
            let _ = elapsed;
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }

        // Hold in Wait until the namespace is fully booted.
        self.state = DrainState::Wait;
        self.publish(|_| {});
        while !self.svc.ns.is_booted() {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }

        let now = self.svc.clock.epoch_secs();
        match self.take_snapshot(now) {
            None => return,
            Some(0) => {
                self.finish_drained(token.is_cancelled());
                return;
            }
            Some(_) => {}
        }

        self.enable_pull();

        loop {
            let now = self.svc.clock.epoch_secs();
            match self.observe(now) {
                DrainState::Drained => {
                    self.finish_drained(token.is_cancelled());
                    return;
                }
                DrainState::Expired => {
                    if !self.finish_expired(now) {
                        return;
                    }
                }
                DrainState::Failed => {
                    tracing::info!(fsid = %self.fsid, "target disappeared mid-drain");
                    return;
                }
                _ => {}
            }
            // Cancellation at ~100 ms granularity.
            for _ in 0..10 {
                if token.is_cancelled() {
                    return;
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
            }
        }
    }
}

/// Recompute the drainer-pull flag for every member of a group: on iff any
/// member wants a pull and the group is not disabled.
pub fn update_group_pull<C: Clock>(svc: &Services<C>, group: &str) {
    svc.view.write(|reg| {
        let members = reg.targets_in_group(group);
        let draining = !reg.group_disabled(group)
            && members.iter().any(|fsid| {
                reg.target(*fsid)
                    .and_then(|t| t.config.get(DRAIN_STATE_KEY))
                    .map(|s| s == "draining" || s == "stalling")
                    .unwrap_or(false)
            });
        for fsid in members {
            if let Some(t) = reg.target_mut(fsid) {
                t.drain.puller = draining;
            }
        }
    });
}

/// Watches the registry and runs one engine per target entering `drain`.
pub struct DrainSupervisor<C: Clock> {
    svc: Arc<Services<C>>,
    active: Arc<parking_lot::Mutex<HashSet<FsId>>>,
}

impl<C: Clock> DrainSupervisor<C> {
    pub fn new(svc: Arc<Services<C>>) -> Self {
        Self { svc, active: Arc::new(parking_lot::Mutex::new(HashSet::new())) }
    }

    /// Spawn engines for newly draining targets. Returns how many started.
    pub fn reconcile(&self) -> usize {
        let draining: Vec<FsId> = self.svc.view.read(|reg| {
            reg.targets()
                .filter(|t| t.config_status == ConfigStatus::Drain)
                .map(|t| t.fsid)
                .collect()
        });
        let mut started = 0;
        for fsid in draining {
            let mut active = self.active.lock();
            if !active.insert(fsid) {
                continue;
            }
            drop(active);
            started += 1;
            let engine = DrainEngine::new(self.svc.clone(), fsid);
            let active = self.active.clone();
            let _engine = tokio::spawn(async move {
                engine.run().await;
                active.lock().remove(&fsid);
            });
        }
        started
    }

    pub async fn run(self) {
        let token = self.svc.shutdown.clone();
        loop {
            self.reconcile();
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(2)) => {}
            }
        }
    }
}

#[cfg(test)]
#[path = "drain_tests.rs"]
mod tests;
