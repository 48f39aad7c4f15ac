// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Namespace error type.

use silo_core::MgmError;
use thiserror::Error;

/// Errors from namespace operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NamespaceError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("not a directory: {0}")]
    NotDir(String),

    #[error("is a directory: {0}")]
    IsDir(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("no such attribute: {0}")]
    NoAttr(String),
}

impl From<NamespaceError> for MgmError {
    fn from(e: NamespaceError) -> Self {
        match e {
            NamespaceError::NotFound(m) | NamespaceError::NoAttr(m) => MgmError::NotFound(m),
            NamespaceError::Exists(m) => MgmError::Exists(m),
            NamespaceError::NotEmpty(m)
            | NamespaceError::NotDir(m)
            | NamespaceError::IsDir(m)
            | NamespaceError::InvalidPath(m) => MgmError::InvalidArg(m),
        }
    }
}
