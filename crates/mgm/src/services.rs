// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The process-scope services record.
//!
//! Everything the engines share lives here and is passed explicitly;
//! components take a reference, never touch globals. Initialized at start,
//! torn down in reverse order by dropping the record.
//!
//! Lock order (always acquire in this order, never the reverse):
//! FsView.ViewMutex → Namespace.ViewMutex → Quota.MapMutex.

use crate::master::MasterState;
use crate::pool::{WorkPool, PROTO_POOL_MAX, SHARED_POOL_MAX};
use crate::stats::Stats;
use crate::AccessPolicy;
use parking_lot::Mutex;
use silo_core::{Clock, FileId};
use silo_fsview::{ConfigStore, FsView, MemConfigStore};
use silo_namespace::NamespaceView;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Well-known namespace locations used as persistent work queues.
#[derive(Debug, Clone)]
pub struct ProcPaths {
    pub conversion: String,
    pub workflow: String,
    pub recycle: String,
}

impl Default for ProcPaths {
    fn default() -> Self {
        Self {
            conversion: "/proc/conversion".to_string(),
            workflow: "/proc/workflow".to_string(),
            recycle: "/recycle".to_string(),
        }
    }
}

/// Shared state of one MGM process.
pub struct Services<C: Clock> {
    pub clock: C,
    pub view: Arc<FsView>,
    pub ns: Arc<NamespaceView>,
    pub access: Arc<AccessPolicy>,
    pub store: Arc<dyn ConfigStore>,
    pub stats: Arc<Stats>,
    pub master: Arc<MasterState>,
    pub paths: ProcPaths,
    /// Own identity, `host:port`, as clients reach this MGM.
    pub manager_id: String,
    /// Shared symmetric key signing capabilities.
    pub capability_key: String,
    /// Files currently scheduled for a drain pull; guarded against
    /// double-scheduling by the commit path.
    pub scheduled_drain: Mutex<HashSet<FileId>>,
    /// Files currently scheduled for a balance pull.
    pub scheduled_balance: Mutex<HashSet<FileId>>,
    pub pool: WorkPool,
    pub proto_pool: WorkPool,
    pub shutdown: CancellationToken,
}

impl<C: Clock> Services<C> {
    /// Assemble a services record with in-memory backing, the shape used
    /// by tests and by `silod` startup before persistence is attached.
    pub fn new(clock: C, manager_id: impl Into<String>) -> Arc<Self> {
        let store: Arc<dyn ConfigStore> = Arc::new(MemConfigStore::new());
        Arc::new(Self {
            clock,
            view: Arc::new(FsView::new(store.clone())),
            ns: Arc::new(NamespaceView::new()),
            access: Arc::new(AccessPolicy::new()),
            store,
            stats: Arc::new(Stats::default()),
            master: Arc::new(MasterState::new()),
            paths: ProcPaths::default(),
            manager_id: manager_id.into(),
            capability_key: "silo-shared-key".to_string(),
            scheduled_drain: Mutex::new(HashSet::new()),
            scheduled_balance: Mutex::new(HashSet::new()),
            pool: WorkPool::new(SHARED_POOL_MAX),
            proto_pool: WorkPool::new(PROTO_POOL_MAX),
            shutdown: CancellationToken::new(),
        })
    }

    /// True while this instance holds the master lease.
    pub fn is_master(&self) -> bool {
        self.master.is_master()
    }

    /// Drop a file from both transient scheduling sets (a replication
    /// commit for it arrived, so the movement completed).
    pub fn forget_scheduled(&self, fid: FileId) {
        self.scheduled_drain.lock().remove(&fid);
        self.scheduled_balance.lock().remove(&fid);
    }
}
