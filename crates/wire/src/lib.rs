// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! silo-wire: string protocols between the MGM and its storage nodes.
//!
//! Wire format: opaque `key=value&…` env-strings over the file-access
//! protocol's plugin channel. Every ad-hoc string format (dropbox entry
//! names, capability CGI, workflow entry names) gets a dedicated
//! encode/decode pair here, never string concatenation at call sites.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod capability;
mod dropbox;
mod env;
mod message;
mod reply;

pub use capability::{Capability, CapabilityError, DeletionEntry};
pub use dropbox::{
    day_dir, decode_recycle_name, encode_recycle_name, parse_day_dir, ConversionTag, RecycleName,
    WorkflowEntryName,
};
pub use env::EnvMap;
pub use message::{
    CommitFlags, CommitRequest, DropRequest, FsctlRequest, OcChunk, ScheduleDeleteRequest,
    WireError,
};
pub use reply::{FsctlReply, ProcReply};
