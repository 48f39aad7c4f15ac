// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide operation counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters bumped by the protocol handlers and engines. Reads are
/// unsynchronized snapshots.
#[derive(Debug, Default)]
pub struct Stats {
    pub commits: AtomicU64,
    pub drops: AtomicU64,
    pub invalid_envelopes: AtomicU64,
    pub replica_failed_size: AtomicU64,
    pub replica_failed_checksum: AtomicU64,
    pub conversion_done: AtomicU64,
    pub conversion_failed: AtomicU64,
    pub fusex_broadcasts: AtomicU64,
    pub wfe_dispatched: AtomicU64,
    pub wfe_failed: AtomicU64,
    pub recycle_purged: AtomicU64,
}

impl Stats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
