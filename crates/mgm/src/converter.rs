// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The converter: third-party-copy rewrites driven by the proc dropbox.
//!
//! One converter per space. The dropbox directory is the single source of
//! truth for pending conversions; in-memory maps are caches. An entry is
//! claimed by chowning it to the scheduled sentinel pair, so a restarted
//! master can tell claimed from pending and reset them.

use crate::services::Services;
use crate::stats::Stats;
use async_trait::async_trait;
use parking_lot::Mutex;
use silo_core::{Checksum, Clock, FileId, MgmError};
use silo_namespace::NamespaceView;
use silo_wire::ConversionTag;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Sentinel owner marking a claimed dropbox entry.
pub const SCHEDULED_UID: u32 = 3;
pub const SCHEDULED_GID: u32 = 4;

/// Copy parameters: one stream, 4 MiB chunks, 120 s per request.
pub const TPC_STREAMS: u8 = 1;
pub const TPC_CHUNK_SIZE: u64 = 4 * 1024 * 1024;
pub const TPC_TIMEOUT: Duration = Duration::from_secs(120);

/// One third-party-copy assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpcJob {
    pub source_url: String,
    pub target_url: String,
    pub streams: u8,
    pub chunk_size: u64,
    pub timeout: Duration,
}

/// Third-party-copy transport.
#[async_trait]
pub trait TpcClient: Send + Sync {
    async fn copy(&self, job: &TpcJob) -> Result<(), MgmError>;
}

/// Test transport: "copies" by materializing the proc target in the
/// namespace, adopting the source's current size and checksum.
pub struct MockTpc {
    ns: Arc<NamespaceView>,
    /// Target the converted replica lands on.
    place_on: silo_core::FsId,
    fail_next: Mutex<bool>,
    pub jobs: Mutex<Vec<TpcJob>>,
}

impl MockTpc {
    pub fn new(ns: Arc<NamespaceView>, place_on: silo_core::FsId) -> Self {
        Self { ns, place_on, fail_next: Mutex::new(false), jobs: Mutex::new(Vec::new()) }
    }

    pub fn fail_next(&self) {
        *self.fail_next.lock() = true;
    }

    fn path_of(url: &str) -> Option<&str> {
        let rest = url.strip_prefix("root://localhost")?;
        Some(rest.split('?').next().unwrap_or(rest))
    }
}

#[async_trait]
impl TpcClient for MockTpc {
    async fn copy(&self, job: &TpcJob) -> Result<(), MgmError> {
        self.jobs.lock().push(job.clone());
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(MgmError::Transient("tpc copy failed".to_string()));
        }
        let source = Self::path_of(&job.source_url)
            .ok_or_else(|| MgmError::InvalidArg(job.source_url.clone()))?;
        let target = Self::path_of(&job.target_url)
            .ok_or_else(|| MgmError::InvalidArg(job.target_url.clone()))?;
        self.ns.write(|ns| -> Result<(), MgmError> {
            let src_fid = ns.resolve_file(source)?;
            let (size, checksum) = {
                let md = ns.file(src_fid)?;
                (md.size, md.checksum.clone())
            };
            let dst_fid = ns.resolve_file(target)?;
            ns.set_file_size(dst_fid, size)?;
            ns.set_file_checksum(dst_fid, checksum)?;
            ns.add_location(dst_fid, self.place_on)?;
            Ok(())
        })
    }
}

/// Layout CGI appended to the copy target URL.
fn layout_cgi(layout: silo_core::LayoutId) -> String {
    format!(
        "silo.layout.type={}&silo.layout.nstripes={}&silo.layout.checksum={}&silo.layout.blocksize={}",
        layout.layout_type(),
        layout.stripe_count(),
        layout.checksum_type(),
        layout.blocksize()
    )
}

/// One converter per space.
pub struct Converter<C: Clock> {
    svc: Arc<Services<C>>,
    space: String,
    tpc: Arc<dyn TpcClient>,
    active: Arc<Mutex<HashSet<FileId>>>,
}

impl<C: Clock> Converter<C> {
    pub fn new(svc: Arc<Services<C>>, space: impl Into<String>, tpc: Arc<dyn TpcClient>) -> Self {
        Self { svc, space: space.into(), tpc, active: Arc::new(Mutex::new(HashSet::new())) }
    }

    fn enabled(&self) -> bool {
        self.svc.view.space_config(&self.space, "converter").as_deref() == Some("on")
    }

    fn ntx(&self) -> usize {
        self.svc
            .view
            .space_config(&self.space, "converter.ntx")
            .and_then(|v| v.parse().ok())
            .unwrap_or(2)
    }

    pub fn active_len(&self) -> usize {
        self.active.lock().len()
    }

    /// Scan the dropbox: collect unclaimed entries for this space, remove
    /// entries that do not parse.
    pub fn scan(&self) -> Vec<ConversionTag> {
        let dropbox = self.svc.paths.conversion.clone();
        let now = self.svc.clock.epoch_secs();
        // FsView before the namespace lock, per the lock order.
        let groups = self.svc.view.read(|reg| reg.groups_in_space(&self.space));
        let owns = |dest: &str| dest == self.space || groups.iter().any(|g| g == dest);
        let (pending, invalid) = self.svc.ns.read(|ns| {
            let mut pending = Vec::new();
            let mut invalid = Vec::new();
            let Ok(dir) = ns.resolve_container(&dropbox) else {
                return (pending, invalid);
            };
            let Ok(md) = ns.container(dir) else {
                return (pending, invalid);
            };
            for (name, fid) in &md.files {
                match ConversionTag::decode(name) {
                    Some(tag) => {
                        if !owns(&tag.destination) {
                            continue;
                        }
                        let owner = ns.file(*fid).map(|f| f.uid).unwrap_or(0);
                        if owner != 0 {
                            // Already claimed by a job.
                            continue;
                        }
                        pending.push(tag);
                    }
                    None => invalid.push(*fid),
                }
            }
            (pending, invalid)
        });
        if !invalid.is_empty() {
            self.svc.ns.write(|ns| {
                for fid in invalid {
                    let _ = ns.remove_file(fid, now);
                }
            });
        }
        pending
    }

    /// Claim an entry: chown it to the scheduled sentinel pair.
    fn claim(&self, tag: &ConversionTag) -> bool {
        let path = format!("{}/{}", self.svc.paths.conversion, tag.encode());
        self.svc.ns.write(|ns| {
            let Ok(fid) = ns.resolve_file(&path) else { return false };
            match ns.file_mut(fid) {
                Ok(md) => {
                    md.uid = SCHEDULED_UID;
                    md.gid = SCHEDULED_GID;
                    true
                }
                Err(_) => false,
            }
        })
    }

    /// Chown every dropbox entry back to root so it is reconsidered. Run on
    /// converter startup after a master election.
    pub fn reset_jobs(&self) {
        let dropbox = self.svc.paths.conversion.clone();
        self.svc.ns.write(|ns| {
            let Ok(dir) = ns.resolve_container(&dropbox) else { return };
            let fids: Vec<FileId> =
                ns.container(dir).map(|md| md.files.values().copied().collect()).unwrap_or_default();
            for fid in fids {
                if let Ok(md) = ns.file_mut(fid) {
                    md.uid = 0;
                    md.gid = 0;
                }
            }
        });
    }

    /// Spawn jobs for pending entries up to the concurrency cap.
    pub async fn dispatch(&self, pending: Vec<ConversionTag>) -> usize {
        let ntx = self.ntx();
        let mut started = 0;
        for tag in pending {
            {
                let mut active = self.active.lock();
                if active.len() >= ntx || !active.insert(tag.fid) {
                    continue;
                }
            }
            if !self.claim(&tag) {
                self.active.lock().remove(&tag.fid);
                continue;
            }
            started += 1;
            let svc = self.svc.clone();
            let tpc = self.tpc.clone();
            let space = self.space.clone();
            let active = self.active.clone();
            let fid = tag.fid;
            let _job = self
                .svc
                .pool
                .spawn(async move {
                    if let Err(e) = run_job(&svc, tpc.as_ref(), &space, &tag).await {
                        tracing::info!(fid = %tag.fid, error = %e, "conversion failed");
                    }
                    // Always signal back so the slot frees up.
                    active.lock().remove(&fid);
                })
                .await;
        }
        started
    }

    /// Run until shutdown: scan and dispatch while master and enabled.
    pub async fn run(self) {
        let token = self.svc.shutdown.clone();
        while !self.svc.ns.is_booted() {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
        self.reset_jobs();
        loop {
            if self.svc.is_master() && self.enabled() {
                let pending = self.scan();
                self.dispatch(pending).await;
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
            }
        }
    }
}

/// One conversion job: copy, verify, merge.
pub async fn run_job<C: Clock>(
    svc: &Services<C>,
    tpc: &dyn TpcClient,
    space: &str,
    tag: &ConversionTag,
) -> Result<(), MgmError> {
    let entry_path = format!("{}/{}", svc.paths.conversion, tag.encode());
    let now = svc.clock.epoch_secs();

    let source = svc.ns.read(|ns| -> Result<(String, u64, Option<Checksum>), MgmError> {
        let md = ns.file(tag.fid)?;
        Ok((ns.file_path(tag.fid)?, md.size, md.checksum.clone()))
    });
    let (src_path, src_size, src_checksum) = match source {
        Ok(s) => s,
        Err(e) => {
            // Source gone; the entry is garbage.
            remove_entry(svc, &entry_path, now);
            return Err(e);
        }
    };

    // Converting to the layout the file already has is a no-op.
    let current_layout = svc.ns.read(|ns| ns.file(tag.fid).map(|md| md.layout));
    if tag.destination == space && current_layout.as_ref() == Ok(&tag.layout) {
        remove_entry(svc, &entry_path, now);
        return Ok(());
    }

    let checksum_hex = src_checksum.as_ref().map(|c| c.hex.clone()).unwrap_or_default();
    let job = TpcJob {
        source_url: format!(
            "root://localhost{}?silo.ruid=0&silo.rgid=0&silo.app=converter",
            src_path
        ),
        target_url: format!(
            "root://localhost{}?silo.targetsize={}&silo.checksum={}&silo.app=converter&{}",
            entry_path,
            src_size,
            checksum_hex,
            layout_cgi(tag.layout)
        ),
        streams: TPC_STREAMS,
        chunk_size: TPC_CHUNK_SIZE,
        timeout: TPC_TIMEOUT,
    };

    if let Err(e) = tpc.copy(&job).await {
        fail_job(svc, &entry_path, now);
        return Err(e);
    }

    // The source must not have changed mid-copy.
    let checksum_now = svc.ns.read(|ns| ns.file(tag.fid).map(|md| md.checksum.clone()));
    match checksum_now {
        Ok(ref c) if *c == src_checksum => {}
        _ => {
            fail_job(svc, &entry_path, now);
            return Err(MgmError::Conflict(format!(
                "fid {} changed during conversion",
                tag.fid
            )));
        }
    }

    let merged = svc.ns.write(|ns| -> Result<(), MgmError> {
        let proc_fid = ns.resolve_file(&entry_path)?;
        let mut proc_layout_fix = None;
        {
            let md = ns.file(proc_fid)?;
            if md.layout != tag.layout {
                proc_layout_fix = Some(proc_fid);
            }
        }
        if let Some(fid) = proc_layout_fix {
            ns.file_mut(fid)?.layout = tag.layout;
        }
        ns.merge(proc_fid, tag.fid, now)?;
        Ok(())
    });
    match merged {
        Ok(()) => {
            Stats::bump(&svc.stats.conversion_done);
            svc.scheduled_balance.lock().remove(&tag.fid);
            Ok(())
        }
        Err(e) => {
            fail_job(svc, &entry_path, now);
            Err(e)
        }
    }
}

fn remove_entry<C: Clock>(svc: &Services<C>, entry_path: &str, now: u64) {
    svc.ns.write(|ns| {
        if let Ok(fid) = ns.resolve_file(entry_path) {
            let _ = ns.unlink_file(fid, now);
        }
    });
}

fn fail_job<C: Clock>(svc: &Services<C>, entry_path: &str, now: u64) {
    remove_entry(svc, entry_path, now);
    Stats::bump(&svc.stats.conversion_failed);
}

#[cfg(test)]
#[path = "converter_tests.rs"]
mod tests;
