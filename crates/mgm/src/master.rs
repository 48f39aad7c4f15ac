// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Master election and lease.
//!
//! One supervisor task runs forever: it acquires or renews a named lease in
//! the external strongly-consistent store, learns the current holder, and
//! drives master/slave transitions. Between iterations, if a holder exists,
//! it sleeps half the lease timeout.

use crate::access::{RedirectEntry, StallEntry};
use crate::services::Services;
use crate::wfe;
use async_trait::async_trait;
use parking_lot::Mutex;
use silo_core::{Clock, MgmError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fixed lease timeout.
pub const LEASE_TIMEOUT: Duration = Duration::from_secs(10);
/// Lease name in the store.
pub const LEASE_NAME: &str = "master-lease";
/// The standing stall installed while the namespace is loading.
pub const BOOTING_STALL_SECONDS: &str = "100";

/// Result of one acquire attempt: whether we hold the lease, and who does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseAttempt {
    pub acquired: bool,
    pub holder: Option<String>,
}

/// Interface to the strongly-consistent key-value store's lease primitive
/// (the same store backing the namespace).
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Acquire or renew. Returns the (possibly other) current holder.
    async fn try_acquire(
        &self,
        name: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<LeaseAttempt, MgmError>;

    /// Release if held by `owner`. Returns whether a release happened.
    async fn release(&self, name: &str, owner: &str) -> Result<bool, MgmError>;
}

/// In-memory lease store for tests and single-node deployments.
pub struct MemLeaseStore {
    inner: Mutex<Option<(String, std::time::Instant)>>,
}

impl Default for MemLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemLeaseStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(None) }
    }

    /// Grab the lease for another owner (test hook).
    pub fn seize(&self, owner: &str, ttl: Duration) {
        *self.inner.lock() = Some((owner.to_string(), std::time::Instant::now() + ttl));
    }
}

#[async_trait]
impl LeaseStore for MemLeaseStore {
    async fn try_acquire(
        &self,
        _name: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<LeaseAttempt, MgmError> {
        let mut guard = self.inner.lock();
        let now = std::time::Instant::now();
        match guard.as_mut() {
            Some((holder, expires)) if *expires > now && holder.as_str() != owner => {
                Ok(LeaseAttempt { acquired: false, holder: Some(holder.clone()) })
            }
            _ => {
                *guard = Some((owner.to_string(), now + ttl));
                Ok(LeaseAttempt { acquired: true, holder: Some(owner.to_string()) })
            }
        }
    }

    async fn release(&self, _name: &str, owner: &str) -> Result<bool, MgmError> {
        let mut guard = self.inner.lock();
        match guard.as_ref() {
            Some((holder, _)) if holder == owner => {
                *guard = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Shared master state read by every engine and by the fsctl dispatcher.
pub struct MasterState {
    is_master: AtomicBool,
    master_id: Mutex<Option<String>>,
    /// Epoch ms before which the supervisor must not reacquire.
    suppress_until_ms: AtomicU64,
    /// Admin asked for a lease bounce.
    bounce_requested: AtomicBool,
    /// The booting stall rule is still armed.
    booting_stall_armed: AtomicBool,
}

impl Default for MasterState {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterState {
    pub fn new() -> Self {
        Self {
            is_master: AtomicBool::new(false),
            master_id: Mutex::new(None),
            suppress_until_ms: AtomicU64::new(0),
            bounce_requested: AtomicBool::new(false),
            booting_stall_armed: AtomicBool::new(false),
        }
    }

    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::Acquire)
    }

    /// The current lease holder, as far as this instance knows.
    pub fn master_id(&self) -> Option<String> {
        self.master_id.lock().clone()
    }

    pub fn request_bounce(&self) {
        self.bounce_requested.store(true, Ordering::Release);
    }

    /// Force master mode without a lease round-trip.
    #[cfg(any(test, feature = "test-support"))]
    pub fn set_master_for_tests(&self) {
        self.is_master.store(true, Ordering::Release);
    }

    fn take_bounce(&self) -> bool {
        self.bounce_requested.swap(false, Ordering::AcqRel)
    }
}

/// The lease supervisor.
pub struct MasterSupervisor<C: Clock> {
    services: Arc<Services<C>>,
    store: Arc<dyn LeaseStore>,
}

impl<C: Clock> MasterSupervisor<C> {
    pub fn new(services: Arc<Services<C>>, store: Arc<dyn LeaseStore>) -> Self {
        Self { services, store }
    }

    /// Install the "namespace is booting" stall before the namespace has
    /// finished loading. Removed on the first transition.
    pub fn arm_booting_stall(&self) {
        self.services.access.set_stall_rule(
            "*",
            Some(StallEntry {
                value: BOOTING_STALL_SECONDS.to_string(),
                comment: "namespace is booting".to_string(),
            }),
        );
        self.services.master.booting_stall_armed.store(true, Ordering::Release);
    }

    fn disarm_booting_stall(&self) {
        if self.services.master.booting_stall_armed.swap(false, Ordering::AcqRel) {
            self.services.access.set_stall_rule("*", None);
        }
    }

    /// Point the cluster at another master: suppress reacquisition for two
    /// lease timeouts so the other candidate can win, and release our hold.
    pub async fn set_master_id(&self, target: &str) -> Result<(), MgmError> {
        let until = self.services.clock.epoch_ms() + 2 * LEASE_TIMEOUT.as_millis() as u64;
        self.services.master.suppress_until_ms.store(until, Ordering::Release);
        if target != self.services.manager_id {
            self.release_lease().await?;
        }
        Ok(())
    }

    /// Intentional release: drop the lease and clear the cached holder so
    /// we don't redirect to ourselves.
    pub async fn release_lease(&self) -> Result<(), MgmError> {
        self.store.release(LEASE_NAME, &self.services.manager_id).await?;
        *self.services.master.master_id.lock() = None;
        if self.services.master.is_master.swap(false, Ordering::AcqRel) {
            self.demote(None);
        }
        Ok(())
    }

    /// One supervisor iteration. Returns how long to sleep before the next.
    pub async fn step(&self) -> Duration {
        let svc = &self.services;

        if svc.master.take_bounce() {
            if let Err(e) = self.release_lease().await {
                tracing::warn!(error = %e, "lease bounce failed");
            }
            return Duration::from_secs(1);
        }

        // Deliberate back-off after set_master_id.
        if svc.clock.epoch_ms() < svc.master.suppress_until_ms.load(Ordering::Acquire) {
            return Duration::from_secs(1);
        }

        let attempt = match self
            .store
            .try_acquire(LEASE_NAME, &svc.manager_id, LEASE_TIMEOUT)
            .await
        {
            Ok(attempt) => attempt,
            Err(e) => {
                tracing::warn!(error = %e, "lease acquire failed");
                return Duration::from_secs(1);
            }
        };

        let was_master = svc.master.is_master();
        *svc.master.master_id.lock() = attempt.holder.clone();

        if attempt.acquired && !was_master {
            if let Err(e) = self.promote() {
                // Refuse to become master; retry on the next iteration.
                tracing::error!(error = %e, "master promotion failed, releasing lease");
                let _ = self.store.release(LEASE_NAME, &svc.manager_id).await;
                return Duration::from_secs(1);
            }
            svc.master.is_master.store(true, Ordering::Release);
        } else if !attempt.acquired && was_master {
            svc.master.is_master.store(false, Ordering::Release);
            self.demote(attempt.holder.as_deref());
        }

        if attempt.holder.is_some() {
            LEASE_TIMEOUT / 2
        } else {
            Duration::from_millis(500)
        }
    }

    /// Run until shutdown.
    pub async fn run(&self) {
        let token = self.services.shutdown.clone();
        loop {
            let sleep = self.step().await;
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
        }
        tracing::info!("lease supervisor stopped");
    }

    /// Slave → master: reload configuration, resurrect interrupted
    /// workflow jobs, clear blanket stalls.
    fn promote(&self) -> Result<(), MgmError> {
        let svc = &self.services;
        svc.access.apply_access_config(svc.store.as_ref());
        wfe::move_from_r_back_to_q(svc);
        self.disarm_booting_stall();
        // Slave-to-master rules: no blanket stall, no mutation redirect.
        svc.access.set_stall_rule("*", None);
        svc.access.set_redirect_rule("w:*", None);
        tracing::info!(id = %svc.manager_id, "promoted to master");
        Ok(())
    }

    /// Master → not-master: redirect mutating requests to the holder.
    fn demote(&self, holder: Option<&str>) {
        let svc = &self.services;
        self.disarm_booting_stall();
        if let Some(holder) = holder {
            svc.access.set_redirect_rule(
                "w:*",
                Some(RedirectEntry {
                    target: format!("root://{}", holder),
                    comment: "redirect writes to master".to_string(),
                }),
            );
        }
        tracing::info!(holder = holder.unwrap_or("none"), "demoted to slave");
    }
}

#[cfg(test)]
#[path = "master_tests.rs"]
mod tests;
