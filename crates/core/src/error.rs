// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy of the management server.
//!
//! Every failure maps to one kind, propagated as a POSIX errno plus a human
//! message. Handlers pick the variant by policy, never ad-hoc: idempotent
//! operations swallow `NotFound`, async jobs turn `Transient` into a retry,
//! the lease supervisor refuses promotion on `Fatal`.

use thiserror::Error;

/// POSIX errno values used across the MGM. Kept local so the crate builds
/// identically on every platform.
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EAGAIN: i32 = 11;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const ENOSPC: i32 = 28;
    pub const ENAMETOOLONG: i32 = 36;
    pub const ENODATA: i32 = 61;
    pub const ENONET: i32 = 64;
    pub const EBADE: i32 = 52;
    pub const EBADR: i32 = 53;
    pub const EREMCHG: i32 = 78;
}

/// One error kind per failure policy (see the table in the module docs).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MgmError {
    /// File or container gone mid-operation.
    #[error("not found: {0}")]
    NotFound(String),

    /// Banned identity, wrong owner, missing privilege.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Malformed envelope or parameter; no state change happened.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// Target name already taken.
    #[error("exists: {0}")]
    Exists(String),

    /// A concurrent mutation won; current state left consistent.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Replica commit disagrees on size.
    #[error("size mismatch: {0}")]
    SizeMismatch(String),

    /// Replica commit disagrees on checksum.
    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),

    /// Target is not in a state to take this operation.
    #[error("non-operational: {0}")]
    NonOperational(String),

    /// Retryable failure (outbound RPC, namespace booting).
    #[error("transient: {0}")]
    Transient(String),

    /// Unrecoverable for this process instance.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl MgmError {
    /// The errno this kind propagates as.
    pub fn errno(&self) -> i32 {
        match self {
            MgmError::NotFound(_) => errno::ENOENT,
            MgmError::PermissionDenied(_) => errno::EPERM,
            MgmError::InvalidArg(_) => errno::EINVAL,
            MgmError::Exists(_) => errno::EEXIST,
            MgmError::Conflict(_) => errno::EREMCHG,
            MgmError::SizeMismatch(_) => errno::EBADE,
            MgmError::ChecksumMismatch(_) => errno::EBADR,
            MgmError::NonOperational(_) => errno::ENONET,
            MgmError::Transient(_) => errno::EAGAIN,
            MgmError::Fatal(_) => errno::EIO,
        }
    }

    /// Whether an async job hitting this error should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, MgmError::Transient(_))
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
