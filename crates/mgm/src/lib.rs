// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! silo-mgm: the management server core.
//!
//! The single authoritative coordinator of the cluster: it owns the
//! namespace view, places and rebalances replicas, schedules background
//! data movement and mediates storage-node commits. Long-running
//! subsystems each own a task with cooperative cancellation; a shared
//! worker pool executes converter jobs and async workflow jobs.
//!
//! Lock order, everywhere: FsView → Namespace → Quota.

pub mod access;
pub mod balancer;
pub mod commit;
pub mod config;
pub mod converter;
pub mod drain;
pub mod fsctl;
pub mod lifecycle;
pub mod lru;
pub mod master;
pub mod pool;
pub mod recycle;
pub mod services;
pub mod stats;
pub mod wfe;

pub use access::AccessPolicy;
pub use converter::{Converter, MockTpc, TpcClient, TpcJob};
pub use drain::{DrainEngine, DrainState};
pub use master::{LeaseStore, MasterState, MasterSupervisor, MemLeaseStore};
pub use services::{ProcPaths, Services};
pub use wfe::{ArchiveClient, MockArchiveClient, WfEngine};
