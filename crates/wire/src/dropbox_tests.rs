// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use silo_core::ChecksumType;
use yare::parameterized;

#[test]
fn conversion_tag_roundtrip() {
    let layout = LayoutId::replica(2, ChecksumType::Adler32);
    let tag = ConversionTag::new(FileId(0x1000), "g1", layout);
    let name = tag.encode();
    assert_eq!(name, format!("0000000000001000:g1#{}", layout.hex()));
    assert_eq!(ConversionTag::decode(&name), Some(tag));
}

#[test]
fn conversion_tag_with_policy() {
    let layout = LayoutId::plain(ChecksumType::Adler32);
    let tag = ConversionTag::new(FileId(5), "default", layout).with_policy("gathered:site1");
    let name = tag.encode();
    assert!(name.ends_with("~gathered:site1"));
    assert_eq!(ConversionTag::decode(&name), Some(tag));
}

#[parameterized(
    no_colon = { "0000000000001000" },
    no_hash = { "0000000000001000:g1" },
    bad_fid = { "zz:g1#00100002" },
    bad_layout = { "0000000000001000:g1#zz" },
    empty_dest = { "0000000000001000:#00100002" },
)]
fn conversion_tag_rejects(name: &str) {
    assert_eq!(ConversionTag::decode(name), None);
}

#[test]
fn workflow_entry_roundtrip() {
    let entry = WorkflowEntryName::new(1700000000, FileId(0xabc), "closew");
    let name = entry.encode();
    assert_eq!(name, "1700000000:0000000000000abc:closew");
    assert_eq!(WorkflowEntryName::decode(&name), Some(entry));
}

#[test]
fn workflow_entry_rejects_malformed() {
    assert_eq!(WorkflowEntryName::decode("notatime:abc:closew"), None);
    assert_eq!(WorkflowEntryName::decode("100:zz:closew"), None);
    assert_eq!(WorkflowEntryName::decode("100:abc"), None);
    assert_eq!(WorkflowEntryName::decode("100:abc:"), None);
}

#[test]
fn recycle_name_roundtrip_file() {
    let name = encode_recycle_name("/silo/project/data.root", FileId(0x99), false);
    assert_eq!(name, "#:#silo#:#project#:#data.root.0000000000000099");
    let decoded = decode_recycle_name(&name).unwrap();
    assert_eq!(decoded.original_path, "/silo/project/data.root");
    assert_eq!(decoded.fid, FileId(0x99));
    assert!(!decoded.is_dir);
}

#[test]
fn recycle_name_roundtrip_dir() {
    let name = encode_recycle_name("/silo/olddir", FileId(7), true);
    assert!(name.ends_with(".d"));
    let decoded = decode_recycle_name(&name).unwrap();
    assert_eq!(decoded.original_path, "/silo/olddir");
    assert!(decoded.is_dir);
}

#[test]
fn recycle_name_keeps_dotted_names() {
    // The fid suffix is the last dot component; earlier dots belong to the name.
    let name = encode_recycle_name("/d/archive.tar.gz", FileId(0x1), false);
    let decoded = decode_recycle_name(&name).unwrap();
    assert_eq!(decoded.original_path, "/d/archive.tar.gz");
}

#[test]
fn recycle_name_rejects_short_fid() {
    assert!(decode_recycle_name("file.1234").is_none());
    assert!(decode_recycle_name("nodots").is_none());
}

#[test]
fn day_dir_format() {
    // 2020-01-01T00:00:00Z
    assert_eq!(day_dir(1577836800), "2020-01-01");
    assert_eq!(parse_day_dir("2020-01-01"), Some(1577836800));
}

#[test]
fn day_dir_rejects_malformed() {
    assert_eq!(parse_day_dir("20200101"), None);
    assert_eq!(parse_day_dir("2020-13-01"), None);
}
