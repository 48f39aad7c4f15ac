// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The workflow engine: event-driven per-file actions.
//!
//! Events (`create`, `closew`, `prepare`, `delete`, …) reach files through
//! a workflow name; the matching action comes from the parent container's
//! `sys.workflow.<event>.<workflow>` attribute. Synchronous variants
//! (`sync::` prefix) run on the caller's thread and never retry; async
//! jobs queue as namespace entries, run on the shared pool, and climb a
//! retry ladder into the `e` queue until the ceiling drops them in `f`.

pub mod expand;
pub mod job;
pub mod proto;

pub use expand::{IdMap, StaticIdMap};
pub use job::{Queue, WfeJob};
pub use proto::{
    ArchiveClient, ArchiveRequest, ArchiveResponse, MockArchiveClient, RETRIEVE_WRITTEN_WORKFLOW,
    TAPE_FS_ID,
};

use crate::services::Services;
use crate::stats::Stats;
use silo_core::{errno, Clock, FileId, MgmError, VirtualIdentity};
use silo_wire::{day_dir, parse_day_dir};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Retry defaults; per-directory attributes override them.
pub const DEFAULT_RETRY_MAX: u32 = 25;
pub const DEFAULT_RETRY_DELAY: u64 = 3600;
/// Delay before the final attempt.
pub const FINAL_RETRY_DELAY: u64 = 7200;
/// Day directories older than this are cleaned up.
pub const DEFAULT_KEEPTIME: u64 = 7 * 86400;

/// Where shell actions live.
pub const DEFAULT_BASH_DIR: &str = "/var/silo/wfe/bash";

/// The workflow engine.
pub struct WfEngine<C: Clock> {
    svc: Arc<Services<C>>,
    archive: Arc<dyn ArchiveClient>,
    idmap: Arc<dyn IdMap>,
    bash_dir: PathBuf,
    active: Arc<AtomicUsize>,
}

impl<C: Clock> WfEngine<C> {
    pub fn new(svc: Arc<Services<C>>, archive: Arc<dyn ArchiveClient>) -> Self {
        Self {
            svc,
            archive,
            idmap: Arc::new(StaticIdMap::default()),
            bash_dir: PathBuf::from(DEFAULT_BASH_DIR),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_bash_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bash_dir = dir.into();
        self
    }

    /// Attach an account database for the owner-name placeholders.
    pub fn with_idmap(mut self, idmap: Arc<dyn IdMap>) -> Self {
        self.idmap = idmap;
        self
    }

    fn ntx(&self) -> usize {
        self.svc
            .view
            .space_config("default", "wfe.ntx")
            .and_then(|v| v.parse().ok())
            .unwrap_or(10)
    }

    fn keeptime(&self) -> u64 {
        self.svc
            .view
            .space_config("default", "wfe.keeptime")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_KEEPTIME)
    }

    fn enabled(&self) -> bool {
        self.svc.view.space_config("default", "wfe").as_deref() != Some("off")
    }

    /// Resolve the action configured for (event, workflow) on the file's
    /// parent directory. None means no workflow applies.
    fn resolve_action(&self, fid: FileId, event: &str, workflow: &str) -> Option<String> {
        let bare = event.strip_prefix("sync::").unwrap_or(event);
        self.svc.ns.read(|ns| {
            let md = ns.file(fid).ok()?;
            let parent = ns.container(md.container).ok()?;
            parent
                .xattr(&format!("sys.workflow.{}.{}", event, workflow))
                .or_else(|| parent.xattr(&format!("sys.workflow.{}.{}", bare, workflow)))
                .map(str::to_string)
        })
    }

    /// Retry ceiling and delay for a job, from the parent directory.
    fn retry_limits(&self, job: &WfeJob) -> (u32, u64) {
        let bare = job.event.strip_prefix("sync::").unwrap_or(&job.event);
        let prefix = format!("sys.workflow.{}.{}", bare, job.workflow);
        self.svc.ns.read(|ns| {
            let attrs = ns
                .file(job.fid)
                .ok()
                .and_then(|md| ns.container(md.container).ok())
                .map(|c| c.xattrs.clone())
                .unwrap_or_default();
            let max = attrs
                .get(&format!("{}.retry.max", prefix))
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_MAX);
            let delay = attrs
                .get(&format!("{}.retry.delay", prefix))
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_DELAY);
            (max, delay)
        })
    }

    /// Entry point for a per-file event. Sync events execute inline and
    /// report their error directly; async events enqueue and return.
    pub async fn trigger(
        &self,
        fid: FileId,
        event: &str,
        workflow: &str,
        vid: &VirtualIdentity,
    ) -> Result<String, MgmError> {
        let Some(action) = self.resolve_action(fid, event, workflow) else {
            return Ok("no workflow configured".to_string());
        };
        let now = self.svc.clock.epoch_secs();
        let job = WfeJob::new(fid, event, workflow, now, action, vid.clone());
        Stats::bump(&self.svc.stats.wfe_dispatched);

        if event.starts_with("sync::") {
            // Sync jobs never retry; the caller gets the error.
            return self.run_action(&job).await;
        }

        job.save(&self.svc)?;
        Ok("workflow queued".to_string())
    }

    /// Jobs in today's and yesterday's `q` and `e` queues whose scheduled
    /// time has come.
    pub fn collect_due(&self) -> Vec<WfeJob> {
        let now = self.svc.clock.epoch_secs();
        let base = self.svc.paths.workflow.clone();
        let days = [day_dir(now), day_dir(now.saturating_sub(86400))];
        let mut due = Vec::new();
        for day in &days {
            for queue in [Queue::Queued, Queue::Retry] {
                let queue_dir = format!("{}/{}/{}", base, day, queue);
                let entries: Vec<(String, String)> = self.svc.ns.read(|ns| {
                    let Ok(qid) = ns.resolve_container(&queue_dir) else {
                        return Vec::new();
                    };
                    let mut out = Vec::new();
                    let Ok(qmd) = ns.container(qid) else { return Vec::new() };
                    for (workflow, wid) in &qmd.dirs {
                        if let Ok(wmd) = ns.container(*wid) {
                            for name in wmd.files.keys() {
                                out.push((workflow.clone(), name.clone()));
                            }
                        }
                    }
                    out
                });
                for (workflow, name) in entries {
                    let Ok(loaded) = WfeJob::load(&self.svc, day, queue, &workflow, &name) else {
                        continue;
                    };
                    if loaded.when <= now {
                        due.push(loaded);
                    }
                }
            }
        }
        due
    }

    /// Execute one async job to completion: move to `r`, run, settle into
    /// `d`, `e` or `f`.
    pub async fn execute(&self, mut job: WfeJob) {
        let now = self.svc.clock.epoch_secs();
        if let Err(e) = job.move_to(&self.svc, Queue::Running, now) {
            tracing::warn!(error = %e, "cannot move workflow job to running");
            return;
        }

        match self.run_action(&job).await {
            Ok(log) => {
                let done_at = self.svc.clock.epoch_secs();
                if job.move_to(&self.svc, Queue::Done, done_at).is_ok() {
                    let _ = job.write_results(&self.svc, 0, &log);
                }
            }
            Err(e) => {
                Stats::bump(&self.svc.stats.wfe_failed);
                let (max, delay) = self.retry_limits(&job);
                let now = self.svc.clock.epoch_secs();
                job.errmsg = e.to_string();
                if e.is_transient() && job.retry + 1 < max {
                    job.retry += 1;
                    let delay = if job.retry + 1 == max { FINAL_RETRY_DELAY } else { delay };
                    let _ = job.move_to(&self.svc, Queue::Retry, now + delay);
                } else if job.move_to(&self.svc, Queue::Failed, now).is_ok() {
                    let _ = job.write_results(&self.svc, e.errno(), &e.to_string());
                }
            }
        }
    }

    /// One dispatcher pass: run due jobs up to the concurrency cap.
    pub async fn tick(&self) -> usize {
        if !self.svc.is_master() || !self.enabled() {
            return 0;
        }
        let ntx = self.ntx();
        let mut dispatched = 0;
        for job in self.collect_due() {
            if self.active.load(Ordering::Acquire) >= ntx {
                break;
            }
            self.active.fetch_add(1, Ordering::AcqRel);
            dispatched += 1;
            let engine = self.clone_for_job();
            let _job = self
                .svc
                .pool
                .spawn(async move {
                    engine.execute(job).await;
                    engine.active.fetch_sub(1, Ordering::AcqRel);
                })
                .await;
        }
        dispatched
    }

    fn clone_for_job(&self) -> WfEngine<C> {
        WfEngine {
            svc: self.svc.clone(),
            archive: self.archive.clone(),
            idmap: self.idmap.clone(),
            bash_dir: self.bash_dir.clone(),
            active: self.active.clone(),
        }
    }

    /// Remove day directories older than the keep-time.
    pub fn cleanup(&self) -> usize {
        let now = self.svc.clock.epoch_secs();
        let keeptime = self.keeptime();
        let base = self.svc.paths.workflow.clone();
        let old_days: Vec<String> = self.svc.ns.read(|ns| {
            let Ok(root) = ns.resolve_container(&base) else { return Vec::new() };
            ns.container(root)
                .map(|md| {
                    md.dirs
                        .keys()
                        .filter(|name| {
                            parse_day_dir(name)
                                .map(|day| day + keeptime < now)
                                .unwrap_or(false)
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        });
        let mut removed = 0;
        for day in old_days {
            let ok = self.svc.ns.write(|ns| {
                ns.resolve_container(&format!("{}/{}", base, day))
                    .ok()
                    .map(|cid| ns.remove_tree(cid, now).is_ok())
                    .unwrap_or(false)
            });
            if ok {
                removed += 1;
            }
        }
        removed
    }

    /// Dispatch forever; hourly cleanup on master.
    pub async fn run(&self) {
        let token = self.svc.shutdown.clone();
        let mut last_cleanup = 0u64;
        loop {
            if self.svc.is_master() {
                self.tick().await;
                let now = self.svc.clock.epoch_secs();
                if now.saturating_sub(last_cleanup) >= 3600 {
                    last_cleanup = now;
                    let removed = self.cleanup();
                    if removed > 0 {
                        tracing::info!(removed, "workflow day-directory cleanup");
                    }
                }
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(10)) => {}
            }
        }
    }

    /// Run a job's action and return its log output.
    async fn run_action(&self, job: &WfeJob) -> Result<String, MgmError> {
        let (method, args) = match job.action.split_once(':') {
            Some((m, rest)) => (m, rest),
            None => (job.action.as_str(), ""),
        };
        match method {
            "proto" => proto::handle_proto_event(&self.svc, self.archive.as_ref(), job).await,
            "bash" => self.run_bash(job, args).await,
            "mail" => self.run_mail(job, args).await,
            "notify" => {
                tracing::info!(fid = %job.fid, event = %job.event, "workflow notification");
                Ok("notified".to_string())
            }
            other => Err(MgmError::InvalidArg(format!("unknown workflow method {}", other))),
        }
    }

    /// `bash:<exe> <args…>`: run a script from the bash directory with
    /// placeholder-expanded arguments; stderr result tags are written back.
    async fn run_bash(&self, job: &WfeJob, spec: &str) -> Result<String, MgmError> {
        let spec = spec.trim_start();
        let mut parts = spec.split_whitespace();
        let exe = parts
            .next()
            .ok_or_else(|| MgmError::InvalidArg("bash action without executable".to_string()))?;
        let arg_str =
            expand::expand_args(&self.svc, spec[exe.len()..].trim_start(), job, self.idmap.as_ref());
        let args: Vec<&str> = arg_str.split_whitespace().collect();

        let program = self.bash_dir.join(exe);
        let output = tokio::process::Command::new(&program)
            .args(&args)
            .output()
            .await
            .map_err(|e| MgmError::Transient(format!("cannot run {}: {}", program.display(), e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let tags = expand::parse_result_tags(&stderr);
        if !tags.is_empty() {
            expand::apply_result_tags(&self.svc, job, &tags);
        }
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(MgmError::Transient(format!(
                "{} exited with {}: {}",
                exe,
                output.status.code().unwrap_or(errno::EIO),
                stderr.lines().next().unwrap_or_default()
            )))
        }
    }

    /// `mail:<addr>:<text>`: a shell pipeline through the local mailer.
    async fn run_mail(&self, job: &WfeJob, spec: &str) -> Result<String, MgmError> {
        let (addr, text) = spec
            .split_once(':')
            .ok_or_else(|| MgmError::InvalidArg("mail action needs addr:text".to_string()))?;
        let body = expand::expand_args(&self.svc, text, job, self.idmap.as_ref());
        let pipeline = format!(
            "echo '{}' | mail -s 'silo workflow {}' {}",
            body.replace('\'', ""),
            job.event,
            addr
        );
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&pipeline)
            .status()
            .await
            .map_err(|e| MgmError::Transient(format!("cannot run mailer: {}", e)))?;
        if status.success() {
            Ok(format!("mail sent to {}", addr))
        } else {
            Err(MgmError::Transient(format!("mailer exited with {:?}", status.code())))
        }
    }
}

/// Resurrect jobs stuck in `r` (interrupted by a master transition) back
/// into `q`. Called on promotion.
pub fn move_from_r_back_to_q<C: Clock>(svc: &Services<C>) -> usize {
    let base = svc.paths.workflow.clone();
    let now = svc.clock.epoch_secs();
    let days: Vec<String> = svc.ns.read(|ns| {
        let Ok(root) = ns.resolve_container(&base) else { return Vec::new() };
        ns.container(root).map(|md| md.dirs.keys().cloned().collect()).unwrap_or_default()
    });
    let mut moved = 0;
    for day in days {
        let running_dir = format!("{}/{}/r", base, day);
        let entries: Vec<(String, String)> = svc.ns.read(|ns| {
            let Ok(rid) = ns.resolve_container(&running_dir) else { return Vec::new() };
            let mut out = Vec::new();
            let Ok(rmd) = ns.container(rid) else { return Vec::new() };
            for (workflow, wid) in &rmd.dirs {
                if let Ok(wmd) = ns.container(*wid) {
                    for name in wmd.files.keys() {
                        out.push((workflow.clone(), name.clone()));
                    }
                }
            }
            out
        });
        for (workflow, name) in entries {
            if let Ok(mut job) = WfeJob::load(svc, &day, Queue::Running, &workflow, &name) {
                if job.move_to(svc, Queue::Queued, now).is_ok() {
                    moved += 1;
                }
            }
        }
    }
    moved
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
