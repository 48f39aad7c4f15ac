// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! silo-namespace: the hierarchical namespace as seen by the MGM.
//!
//! The metadata store backing the namespace is external; this crate is the
//! [`NamespaceView`] the engines go through: one reader-writer lock, file
//! and container records, quota accounting and the bounded find used by the
//! background engines. Every "does not exist" surfaces as a typed
//! [`NamespaceError`], never as control flow.

pub mod container;
pub mod error;
pub mod file;
pub mod find;
pub mod quota;
pub mod view;

pub use container::ContainerMD;
pub use error::NamespaceError;
pub use file::FileMD;
pub use quota::QuotaNode;
pub use view::{Namespace, NamespaceView, DETACHED, ROOT_ID};
