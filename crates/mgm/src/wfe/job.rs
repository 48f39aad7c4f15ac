// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow jobs persisted as zero-length namespace entries.
//!
//! A job lives at `<base>/<day>/<queue>/<workflow>/<when>:<fxid>:<event>`
//! with its action, identity, retry count and error message as extended
//! attributes. Moving between queues is save-then-delete; the directory
//! tree is the queue.

use crate::services::Services;
use silo_core::{Clock, FileId, LayoutId, MgmError, VirtualIdentity};
use silo_wire::{day_dir, WorkflowEntryName};

pub const ACTION_ATTR: &str = "sys.action";
pub const VID_ATTR: &str = "sys.vid";
pub const RETRY_ATTR: &str = "sys.wfe.retry";
pub const ERRMSG_ATTR: &str = "sys.wfe.errmsg";
pub const RETC_ATTR: &str = "sys.wfe.retc";
pub const LOG_ATTR: &str = "sys.wfe.log";

/// The workflow queues. Single letters on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    Queued,
    Running,
    Retry,
    Done,
    Failed,
    Garbage,
}

silo_core::simple_display! {
    Queue {
        Queued => "q",
        Running => "r",
        Retry => "e",
        Done => "d",
        Failed => "f",
        Garbage => "g",
    }
}

impl Queue {
    pub fn from_letter(s: &str) -> Option<Queue> {
        match s {
            "q" => Some(Queue::Queued),
            "r" => Some(Queue::Running),
            "e" => Some(Queue::Retry),
            "d" => Some(Queue::Done),
            "f" => Some(Queue::Failed),
            "g" => Some(Queue::Garbage),
            _ => None,
        }
    }

    /// Queues the dispatcher polls for runnable work.
    pub fn is_pollable(self) -> bool {
        matches!(self, Queue::Queued | Queue::Retry)
    }
}

/// One workflow job.
#[derive(Debug, Clone, PartialEq)]
pub struct WfeJob {
    pub fid: FileId,
    pub event: String,
    pub workflow: String,
    pub queue: Queue,
    pub day: String,
    pub when: u64,
    pub retry: u32,
    pub errmsg: String,
    pub action: String,
    pub vid: VirtualIdentity,
}

impl WfeJob {
    pub fn new(
        fid: FileId,
        event: impl Into<String>,
        workflow: impl Into<String>,
        when: u64,
        action: impl Into<String>,
        vid: VirtualIdentity,
    ) -> Self {
        Self {
            fid,
            event: event.into(),
            workflow: workflow.into(),
            queue: Queue::Queued,
            day: day_dir(when),
            when,
            retry: 0,
            errmsg: String::new(),
            action: action.into(),
            vid,
        }
    }

    pub fn dir(&self, base: &str) -> String {
        format!("{}/{}/{}/{}", base, self.day, self.queue, self.workflow)
    }

    pub fn entry_name(&self) -> String {
        WorkflowEntryName::new(self.when, self.fid, self.event.clone()).encode()
    }

    pub fn path(&self, base: &str) -> String {
        format!("{}/{}", self.dir(base), self.entry_name())
    }

    /// Persist as a zero-length entry with the job attributes. The parent
    /// container mtime moves with the insert.
    pub fn save<C: Clock>(&self, svc: &Services<C>) -> Result<(), MgmError> {
        let base = svc.paths.workflow.clone();
        let now = svc.clock.epoch_secs();
        svc.ns.write(|ns| -> Result<(), MgmError> {
            ns.mkdir_p(&self.dir(&base), 0, 0, 0o700, now)?;
            let path = self.path(&base);
            let fid = match ns.resolve_file(&path) {
                Ok(fid) => fid,
                Err(_) => ns.create_file(&path, 0, 0, LayoutId::default(), now)?,
            };
            ns.set_file_xattr(fid, ACTION_ATTR, &self.action)?;
            ns.set_file_xattr(fid, VID_ATTR, &self.vid.to_json())?;
            ns.set_file_xattr(fid, RETRY_ATTR, &self.retry.to_string())?;
            ns.set_file_xattr(fid, ERRMSG_ATTR, &self.errmsg)?;
            Ok(())
        })
    }

    /// Load a job back from its queue entry.
    pub fn load<C: Clock>(
        svc: &Services<C>,
        day: &str,
        queue: Queue,
        workflow: &str,
        entry: &str,
    ) -> Result<WfeJob, MgmError> {
        let base = svc.paths.workflow.clone();
        let name = WorkflowEntryName::decode(entry)
            .ok_or_else(|| MgmError::InvalidArg(format!("bad workflow entry {}", entry)))?;
        let path = format!("{}/{}/{}/{}/{}", base, day, queue, workflow, entry);
        svc.ns.read(|ns| -> Result<WfeJob, MgmError> {
            let fid = ns.resolve_file(&path)?;
            let md = ns.file(fid)?;
            Ok(WfeJob {
                fid: name.fid,
                event: name.event.clone(),
                workflow: workflow.to_string(),
                queue,
                day: day.to_string(),
                when: name.when,
                retry: md.xattr(RETRY_ATTR).and_then(|v| v.parse().ok()).unwrap_or(0),
                errmsg: md.xattr(ERRMSG_ATTR).unwrap_or_default().to_string(),
                action: md.xattr(ACTION_ATTR).unwrap_or_default().to_string(),
                vid: md
                    .xattr(VID_ATTR)
                    .and_then(VirtualIdentity::from_json)
                    .unwrap_or_else(VirtualIdentity::root),
            })
        })
    }

    /// Remove the queue entry.
    pub fn delete<C: Clock>(&self, svc: &Services<C>) -> Result<(), MgmError> {
        let base = svc.paths.workflow.clone();
        let now = svc.clock.epoch_secs();
        let path = self.path(&base);
        svc.ns.write(|ns| -> Result<(), MgmError> {
            let fid = ns.resolve_file(&path)?;
            ns.remove_file(fid, now)?;
            Ok(())
        })
    }

    /// Move = save into the target queue, then delete the old entry. The
    /// day follows the new scheduled time.
    pub fn move_to<C: Clock>(
        &mut self,
        svc: &Services<C>,
        queue: Queue,
        when: u64,
    ) -> Result<(), MgmError> {
        let old = self.clone();
        self.queue = queue;
        self.when = when;
        self.day = day_dir(when);
        self.save(svc)?;
        if old.path(&svc.paths.workflow) != self.path(&svc.paths.workflow) {
            let _ = old.delete(svc);
        }
        Ok(())
    }

    /// Write back the execution result onto the entry.
    pub fn write_results<C: Clock>(
        &self,
        svc: &Services<C>,
        retc: i32,
        log: &str,
    ) -> Result<(), MgmError> {
        let base = svc.paths.workflow.clone();
        let path = self.path(&base);
        svc.ns.write(|ns| -> Result<(), MgmError> {
            let fid = ns.resolve_file(&path)?;
            ns.set_file_xattr(fid, RETC_ATTR, &retc.to_string())?;
            ns.set_file_xattr(fid, LOG_ATTR, log)?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
