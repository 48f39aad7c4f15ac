// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded worker pools.
//!
//! Converter jobs and async workflow jobs share one pool; outbound archive
//! dialogues get a smaller best-effort pool. A permit is held for the whole
//! task lifetime, so the cap bounds concurrency, not queue depth.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Shared pool size for converter and async workflow jobs.
pub const SHARED_POOL_MAX: usize = 500;
/// Pool size for outbound archive dialogues.
pub const PROTO_POOL_MAX: usize = 10;

/// Fixed-size worker pool over the tokio runtime.
#[derive(Clone)]
pub struct WorkPool {
    sem: Arc<Semaphore>,
    cap: usize,
}

impl WorkPool {
    pub fn new(cap: usize) -> Self {
        Self { sem: Arc::new(Semaphore::new(cap)), cap }
    }

    /// Spawn a task once a permit is free. Waits when the pool is full.
    pub async fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let permit = match self.sem.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                // Semaphore closed only on shutdown; run detached.
                return tokio::spawn(fut);
            }
        };
        tokio::spawn(async move {
            let _permit = permit;
            fut.await;
        })
    }

    /// Spawn only if a permit is immediately free.
    pub fn try_spawn<F>(&self, fut: F) -> Option<JoinHandle<()>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let permit = self.sem.clone().try_acquire_owned().ok()?;
        Some(tokio::spawn(async move {
            let _permit = permit;
            fut.await;
        }))
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.cap - self.sem.available_permits()
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
