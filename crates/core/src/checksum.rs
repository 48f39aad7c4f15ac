// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Checksum type and value carried in file metadata.
//!
//! Values are kept in their lowercase hexadecimal form; every comparison in
//! the commit path is on that form.

use serde::{Deserialize, Serialize};

/// Checksum algorithm, as encoded in the layout id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ChecksumType {
    #[default]
    None,
    Adler32,
    Crc32,
    Crc32c,
    Md5,
    Sha1,
}

crate::simple_display! {
    ChecksumType {
        None => "none",
        Adler32 => "adler",
        Crc32 => "crc32",
        Crc32c => "crc32c",
        Md5 => "md5",
        Sha1 => "sha1",
    }
}

impl ChecksumType {
    pub(crate) fn from_bits(v: u32) -> ChecksumType {
        match v {
            1 => ChecksumType::Adler32,
            2 => ChecksumType::Crc32,
            3 => ChecksumType::Crc32c,
            4 => ChecksumType::Md5,
            5 => ChecksumType::Sha1,
            _ => ChecksumType::None,
        }
    }

    pub(crate) fn bits(self) -> u32 {
        match self {
            ChecksumType::None => 0,
            ChecksumType::Adler32 => 1,
            ChecksumType::Crc32 => 2,
            ChecksumType::Crc32c => 3,
            ChecksumType::Md5 => 4,
            ChecksumType::Sha1 => 5,
        }
    }

    pub fn from_name(name: &str) -> Option<ChecksumType> {
        match name {
            "none" => Some(ChecksumType::None),
            "adler" | "adler32" => Some(ChecksumType::Adler32),
            "crc32" => Some(ChecksumType::Crc32),
            "crc32c" => Some(ChecksumType::Crc32c),
            "md5" => Some(ChecksumType::Md5),
            "sha1" | "sha" => Some(ChecksumType::Sha1),
            _ => None,
        }
    }
}

/// A checksum value: algorithm plus lowercase hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub kind: ChecksumType,
    pub hex: String,
}

impl Checksum {
    pub fn new(kind: ChecksumType, hex: impl Into<String>) -> Self {
        Self { kind, hex: hex.into().to_lowercase() }
    }

    /// Compare on the hex form, ignoring case.
    pub fn matches_hex(&self, other: &str) -> bool {
        self.hex.eq_ignore_ascii_case(other)
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.hex)
    }
}

#[cfg(test)]
#[path = "checksum_tests.rs"]
mod tests;
