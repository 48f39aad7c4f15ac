// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The typed request/response dialogue with the external archival service.
//!
//! The transport encoding is the endpoint's concern; the MGM side speaks
//! typed messages through [`ArchiveClient`]. Requests carry everything the
//! service needs to act without calling back, plus report URLs for async
//! failure notification.

use crate::services::Services;
use crate::wfe::job::WfeJob;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use silo_core::{Clock, FileId, FsId, MgmError};
use std::sync::Arc;

/// The reserved tape target: a file whose only location is this fsid lives
/// on tape only.
pub const TAPE_FS_ID: FsId = FsId(65535);

/// Workflow name used for the retrieve-written callback.
pub const RETRIEVE_WRITTEN_WORKFLOW: &str = "retrieve_written";

/// Xattrs used by the archive dialogue.
pub const RETRIEVE_REQS_ATTR: &str = "sys.retrieve.req_ids";
pub const RETRIEVE_ERROR_ATTR: &str = "sys.retrieve.error";
pub const ARCHIVE_ERROR_ATTR: &str = "sys.archive.error";
/// Parent-directory policy for disk replicas after archival.
pub const DROP_DISK_REPLICAS_ATTR: &str = "sys.wfe.archived.dropdiskreplicas";

/// Requests sent to the archival endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArchiveRequest {
    /// Synchronous gate before file contents exist.
    Create { fid: FileId, path: String, uid: u32, gid: u32 },
    /// File written and closed; carries what tape needs to archive it.
    CloseWrite {
        fid: FileId,
        path: String,
        size: u64,
        checksum: Option<String>,
        report_url: String,
    },
    /// Bring the file back to disk.
    Prepare { fid: FileId, path: String, dst_url: String, error_report_url: String },
    /// The last retriever gave up.
    AbortPrepare { fid: FileId, path: String },
    /// Fire-and-forget removal.
    Delete { fid: FileId, path: String },
}

/// Response from the archival endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

impl ArchiveResponse {
    pub fn ok() -> Self {
        Self { success: true, message: String::new() }
    }
}

/// Transport to the archival endpoint (`protowfendpoint` /
/// `protowfresource` in the space configuration).
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    async fn call(&self, req: ArchiveRequest) -> Result<ArchiveResponse, MgmError>;
}

/// Recording mock for tests.
#[derive(Default)]
pub struct MockArchiveClient {
    pub calls: Mutex<Vec<ArchiveRequest>>,
    fail_next: Mutex<bool>,
    delay: Mutex<std::time::Duration>,
}

impl MockArchiveClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self) {
        *self.fail_next.lock() = true;
    }

    /// Make every call linger (test hook for concurrency caps).
    pub fn set_delay(&self, delay: std::time::Duration) {
        *self.delay.lock() = delay;
    }

    pub fn take_calls(&self) -> Vec<ArchiveRequest> {
        std::mem::take(&mut *self.calls.lock())
    }
}

#[async_trait]
impl ArchiveClient for MockArchiveClient {
    async fn call(&self, req: ArchiveRequest) -> Result<ArchiveResponse, MgmError> {
        self.calls.lock().push(req);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(MgmError::Transient("archive endpoint unreachable".to_string()));
        }
        Ok(ArchiveResponse::ok())
    }
}

/// Handle one `proto` workflow event. The `sync::` prefix only selects the
/// calling context; the dialogue is the same.
pub async fn handle_proto_event<C: Clock>(
    svc: &Services<C>,
    archive: &dyn ArchiveClient,
    job: &WfeJob,
) -> Result<String, MgmError> {
    let event = job.event.strip_prefix("sync::").unwrap_or(&job.event);
    match event {
        "prepare" => prepare(svc, archive, job).await,
        "abort_prepare" => abort_prepare(svc, archive, job).await,
        "create" => create(svc, archive, job).await,
        "closew" => closew(svc, archive, job).await,
        "delete" => delete(svc, archive, job).await,
        "archived" => archived(svc, job),
        "retrieve_failed" => record_error(svc, job, RETRIEVE_ERROR_ATTR),
        "archive_failed" => record_error(svc, job, ARCHIVE_ERROR_ATTR),
        other => Err(MgmError::InvalidArg(format!("unknown proto event {}", other))),
    }
}

fn file_path<C: Clock>(svc: &Services<C>, fid: FileId) -> Result<String, MgmError> {
    svc.ns.read(|ns| ns.file_path(fid)).map_err(MgmError::from)
}

fn has_disk_replica<C: Clock>(svc: &Services<C>, fid: FileId) -> Result<bool, MgmError> {
    Ok(svc
        .ns
        .read(|ns| ns.file(fid).map(|md| md.locations.iter().any(|l| *l != TAPE_FS_ID)))?)
}

fn retrieve_count<C: Clock>(svc: &Services<C>, fid: FileId) -> u64 {
    svc.ns.read(|ns| {
        ns.file(fid)
            .ok()
            .and_then(|md| md.xattr(RETRIEVE_REQS_ATTR))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    })
}

fn set_retrieve_count<C: Clock>(svc: &Services<C>, fid: FileId, count: u64) {
    svc.ns.write(|ns| {
        let _ = ns.set_file_xattr(fid, RETRIEVE_REQS_ATTR, &count.to_string());
    });
}

/// `prepare`: bring a tape-only file back to disk. Only the first
/// retriever sends the request; later ones just join the count.
async fn prepare<C: Clock>(
    svc: &Services<C>,
    archive: &dyn ArchiveClient,
    job: &WfeJob,
) -> Result<String, MgmError> {
    if has_disk_replica(svc, job.fid)? {
        return Ok("file has disk replicas".to_string());
    }
    let count = retrieve_count(svc, job.fid);
    set_retrieve_count(svc, job.fid, count + 1);
    if count > 0 {
        return Ok(format!("joined retrieve in flight ({} requesters)", count + 1));
    }

    let path = file_path(svc, job.fid)?;
    let req = ArchiveRequest::Prepare {
        fid: job.fid,
        path: path.clone(),
        dst_url: format!(
            "root://{}/{}?silo.workflow={}",
            svc.manager_id, path, RETRIEVE_WRITTEN_WORKFLOW
        ),
        error_report_url: format!(
            "silo://{}{}?action=report_retrieve_error",
            svc.manager_id, path
        ),
    };
    match archive.call(req).await {
        Ok(resp) if resp.success => Ok("retrieve requested".to_string()),
        Ok(resp) => {
            set_retrieve_count(svc, job.fid, count);
            record_error_message(svc, job.fid, RETRIEVE_ERROR_ATTR, &resp.message);
            Err(MgmError::Transient(resp.message))
        }
        Err(e) => {
            set_retrieve_count(svc, job.fid, count);
            record_error_message(svc, job.fid, RETRIEVE_ERROR_ATTR, &e.to_string());
            Err(e)
        }
    }
}

/// `abort_prepare`: drop one retriever; the last one aborts on the
/// archive side.
async fn abort_prepare<C: Clock>(
    svc: &Services<C>,
    archive: &dyn ArchiveClient,
    job: &WfeJob,
) -> Result<String, MgmError> {
    let count = retrieve_count(svc, job.fid);
    let remaining = count.saturating_sub(1);
    set_retrieve_count(svc, job.fid, remaining);
    if remaining > 0 || count == 0 {
        return Ok(format!("{} retrievers remain", remaining));
    }
    let path = file_path(svc, job.fid)?;
    let resp = archive.call(ArchiveRequest::AbortPrepare { fid: job.fid, path }).await?;
    if resp.success {
        Ok("retrieve aborted".to_string())
    } else {
        Err(MgmError::Transient(resp.message))
    }
}

async fn create<C: Clock>(
    svc: &Services<C>,
    archive: &dyn ArchiveClient,
    job: &WfeJob,
) -> Result<String, MgmError> {
    let (path, uid, gid) = svc.ns.read(|ns| -> Result<_, MgmError> {
        let md = ns.file(job.fid)?;
        Ok((ns.file_path(job.fid)?, md.uid, md.gid))
    })?;
    let resp = archive.call(ArchiveRequest::Create { fid: job.fid, path, uid, gid }).await?;
    if resp.success {
        Ok("create acknowledged".to_string())
    } else {
        Err(MgmError::Transient(resp.message))
    }
}

/// `closew`: a written file is handed to tape. On the retrieve-written
/// workflow this is the retrieve completion callback instead.
async fn closew<C: Clock>(
    svc: &Services<C>,
    archive: &dyn ArchiveClient,
    job: &WfeJob,
) -> Result<String, MgmError> {
    if job.workflow == RETRIEVE_WRITTEN_WORKFLOW {
        set_retrieve_count(svc, job.fid, 0);
        return Ok("retrieve completed".to_string());
    }
    let (path, size, checksum) = svc.ns.read(|ns| -> Result<_, MgmError> {
        let md = ns.file(job.fid)?;
        Ok((ns.file_path(job.fid)?, md.size, md.checksum.as_ref().map(|c| c.hex.clone())))
    })?;
    let req = ArchiveRequest::CloseWrite {
        fid: job.fid,
        path: path.clone(),
        size,
        checksum,
        report_url: format!("silo://{}{}?action=report_archive_error", svc.manager_id, path),
    };
    match archive.call(req).await {
        Ok(resp) if resp.success => Ok("queued for archival".to_string()),
        Ok(resp) => {
            record_error_message(svc, job.fid, ARCHIVE_ERROR_ATTR, &resp.message);
            Err(MgmError::Transient(resp.message))
        }
        Err(e) => {
            record_error_message(svc, job.fid, ARCHIVE_ERROR_ATTR, &e.to_string());
            Err(e)
        }
    }
}

/// `delete`: best-effort, fire-and-forget on the proto pool.
async fn delete<C: Clock>(
    svc: &Services<C>,
    archive: &dyn ArchiveClient,
    job: &WfeJob,
) -> Result<String, MgmError> {
    let path = file_path(svc, job.fid).unwrap_or_default();
    let req = ArchiveRequest::Delete { fid: job.fid, path };
    if let Err(e) = archive.call(req).await {
        tracing::info!(fid = %job.fid, error = %e, "archive delete failed");
    }
    Ok("delete dispatched".to_string())
}

/// `archived`: the file now lives on tape. Record the tape location,
/// clear the error marker, and drop disk replicas unless the parent
/// directory opts out.
fn archived<C: Clock>(svc: &Services<C>, job: &WfeJob) -> Result<String, MgmError> {
    svc.ns.write(|ns| -> Result<String, MgmError> {
        let md = ns.file(job.fid)?.clone();
        ns.add_location(job.fid, TAPE_FS_ID)?;
        let _ = ns.remove_file_xattr(job.fid, ARCHIVE_ERROR_ATTR);

        let keep = ns
            .container(md.container)
            .ok()
            .and_then(|c| c.xattr(DROP_DISK_REPLICAS_ATTR).map(str::to_string))
            .map(|v| v == "keep")
            .unwrap_or(false);
        if keep {
            return Ok("archived, disk replicas kept".to_string());
        }
        for fsid in md.locations {
            if fsid != TAPE_FS_ID {
                ns.unlink_location(job.fid, fsid)?;
            }
        }
        Ok("archived, disk replicas dropped".to_string())
    })
}

fn record_error<C: Clock>(
    svc: &Services<C>,
    job: &WfeJob,
    attr: &str,
) -> Result<String, MgmError> {
    let message = if job.errmsg.is_empty() { job.event.clone() } else { job.errmsg.clone() };
    record_error_message(svc, job.fid, attr, &message);
    Ok(format!("recorded {}", attr))
}

fn record_error_message<C: Clock>(svc: &Services<C>, fid: FileId, attr: &str, message: &str) {
    svc.ns.write(|ns| {
        let _ = ns.set_file_xattr(fid, attr, message);
    });
}

#[cfg(test)]
#[path = "proto_tests.rs"]
mod tests;
