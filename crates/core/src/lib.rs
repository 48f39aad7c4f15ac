// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! silo-core: shared vocabulary of the Silo management server.
//!
//! Identifiers, the layout-id codec, checksums, virtual identities, the
//! errno-carrying error taxonomy, and the clock abstraction every engine
//! is driven by.

pub mod macros;

pub mod checksum;
pub mod clock;
pub mod duration;
pub mod error;
pub mod id;
pub mod identity;
pub mod layout;

pub use checksum::{Checksum, ChecksumType};
pub use clock::{Clock, FakeClock, SystemClock};
pub use duration::parse_duration;
pub use error::{errno, MgmError};
pub use id::{ContainerId, FileId, FsId};
pub use identity::VirtualIdentity;
pub use layout::{LayoutId, LayoutType};
