// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use silo_core::ChecksumType;

fn file() -> FileMD {
    FileMD {
        id: FileId(1),
        name: "f".to_string(),
        container: ContainerId(1),
        uid: 0,
        gid: 0,
        mode: 0o644,
        size: 0,
        ctime: (0, 0),
        mtime: (0, 0),
        checksum: None,
        layout: LayoutId::replica(2, ChecksumType::Adler32),
        locations: Vec::new(),
        unlinked: Vec::new(),
        flags: 0,
        xattrs: BTreeMap::new(),
    }
}

#[test]
fn add_location_is_idempotent() {
    let mut f = file();
    f.add_location(FsId(1));
    f.add_location(FsId(1));
    assert_eq!(f.locations, vec![FsId(1)]);
}

#[test]
fn unlink_moves_between_sets() {
    let mut f = file();
    f.add_location(FsId(1));
    f.add_location(FsId(2));

    f.unlink_location(FsId(1));
    assert_eq!(f.locations, vec![FsId(2)]);
    assert_eq!(f.unlinked, vec![FsId(1)]);

    // Disjointness holds
    assert!(!f.has_location(FsId(1)));
    assert!(f.has_unlinked_location(FsId(1)));
}

#[test]
fn unlink_all_drains_locations() {
    let mut f = file();
    f.add_location(FsId(1));
    f.add_location(FsId(2));
    f.unlink_all_locations();
    assert!(f.locations.is_empty());
    assert_eq!(f.unlinked, vec![FsId(1), FsId(2)]);
}

#[test]
fn remove_location_clears_both() {
    let mut f = file();
    f.add_location(FsId(1));
    f.unlink_location(FsId(1));
    f.remove_location(FsId(1));
    assert!(f.locations.is_empty());
    assert!(f.unlinked.is_empty());
}

#[test]
fn upload_flag_carries_chunk_index() {
    let mut f = file();
    assert!(!f.upload_in_progress());

    f.set_upload_in_progress(5);
    assert!(f.upload_in_progress());
    assert_eq!(f.flags & !FLAG_IN_PROGRESS, 5);

    f.clear_upload_in_progress();
    assert!(!f.upload_in_progress());
}
