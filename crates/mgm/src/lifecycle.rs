// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup, engine supervision, shutdown.
//!
//! Startup locks the pid file, assembles the services record, installs
//! the booting stall, and spawns the lease supervisor plus the background
//! engines. Shutdown cancels the root token; every loop exits within one
//! tick.

use crate::balancer::GroupBalancer;
use crate::config::Config;
use crate::converter::{Converter, TpcClient, TpcJob};
use crate::drain::DrainSupervisor;
use crate::lru::LruEngine;
use crate::master::{LeaseStore, MasterSupervisor, MemLeaseStore};
use crate::recycle::Recycle;
use crate::services::Services;
use crate::wfe::{ArchiveClient, ArchiveRequest, ArchiveResponse, WfEngine};
use async_trait::async_trait;
use silo_core::Clock;
use fs2::FileExt;
use silo_core::{MgmError, SystemClock};
use std::fs::File;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("another silod instance holds {0}")]
    AlreadyRunning(std::path::PathBuf),

    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport placeholder until a third-party-copy adapter is attached.
struct UnconfiguredTpc;

#[async_trait]
impl TpcClient for UnconfiguredTpc {
    async fn copy(&self, _job: &TpcJob) -> Result<(), MgmError> {
        Err(MgmError::Transient("no third-party-copy transport attached".to_string()))
    }
}

/// Endpoint placeholder until the archive dialogue is configured.
struct UnconfiguredArchive;

#[async_trait]
impl ArchiveClient for UnconfiguredArchive {
    async fn call(&self, _req: ArchiveRequest) -> Result<ArchiveResponse, MgmError> {
        Err(MgmError::Transient("no archive endpoint configured".to_string()))
    }
}

/// The running daemon.
pub struct Daemon {
    pub services: Arc<Services<SystemClock>>,
    pub wfe: Arc<WfEngine<SystemClock>>,
    // NOTE(lifetime): held to maintain the exclusive pid-file lock;
    // released on drop.
    #[allow(dead_code)]
    lock_file: File,
    tasks: Vec<JoinHandle<()>>,
}

/// Bring the daemon up and spawn every background engine.
pub async fn startup(config: &Config) -> Result<Daemon, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;
    let lock_file = File::create(&config.lock_path)?;
    if lock_file.try_lock_exclusive().is_err() {
        return Err(LifecycleError::AlreadyRunning(config.lock_path.clone()));
    }

    let services = Services::new(SystemClock, config.manager_id.clone());
    let lease_store: Arc<dyn LeaseStore> = Arc::new(MemLeaseStore::new());
    let supervisor = Arc::new(MasterSupervisor::new(services.clone(), lease_store));

    // Stall everything until the namespace view is loaded.
    supervisor.arm_booting_stall();
    let now = services.clock.epoch_secs();
    services.ns.write(|ns| {
        for path in
            [&services.paths.conversion, &services.paths.workflow, &services.paths.recycle]
        {
            let _ = ns.mkdir_p(path, 0, 0, 0o700, now);
        }
    });
    services.ns.set_booted(true);

    let wfe = Arc::new(
        WfEngine::new(services.clone(), Arc::new(UnconfiguredArchive))
            .with_bash_dir(config.bash_dir.clone()),
    );

    let mut tasks = Vec::new();
    {
        let supervisor = supervisor.clone();
        tasks.push(tokio::spawn(async move {
            supervisor.run().await;
        }));
    }
    tasks.push(tokio::spawn(DrainSupervisor::new(services.clone()).run()));
    let spaces: Vec<String> = {
        let mut spaces = services.view.read(|reg| reg.spaces());
        if spaces.is_empty() {
            spaces.push("default".to_string());
        }
        spaces
    };
    for space in spaces {
        tasks.push(tokio::spawn(
            GroupBalancer::new(services.clone(), space.clone()).run(),
        ));
        tasks.push(tokio::spawn(
            Converter::new(services.clone(), space, Arc::new(UnconfiguredTpc)).run(),
        ));
    }
    tasks.push(tokio::spawn(LruEngine::new(services.clone(), "default").run()));
    tasks.push(tokio::spawn(Recycle::new(services.clone()).run()));
    {
        let wfe = wfe.clone();
        tasks.push(tokio::spawn(async move {
            wfe.run().await;
        }));
    }

    tracing::info!(id = %config.manager_id, "silod started");
    Ok(Daemon { services, wfe, lock_file, tasks })
}

impl Daemon {
    /// Cancel the root token and wait for every engine to wind down.
    pub async fn shutdown(self) {
        self.services.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "engine task ended abnormally");
                }
            }
        }
        tracing::info!("silod stopped");
    }
}
