// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use silo_core::ChecksumType;

fn layout() -> LayoutId {
    LayoutId::replica(2, ChecksumType::Adler32)
}

fn view_with_dir(path: &str) -> NamespaceView {
    let view = NamespaceView::new();
    view.write(|ns| ns.mkdir_p(path, 0, 0, 0o755, 100).unwrap());
    view
}

#[test]
fn mkdir_p_creates_chain() {
    let view = view_with_dir("/a/b/c");
    view.read(|ns| {
        let id = ns.resolve_container("/a/b/c").unwrap();
        assert_eq!(ns.container_path(id).unwrap(), "/a/b/c");
    });
}

#[test]
fn mkdir_p_is_idempotent() {
    let view = view_with_dir("/a/b");
    let (first, second) = view.write(|ns| {
        (ns.mkdir_p("/a/b", 0, 0, 0o755, 1).unwrap(), ns.mkdir_p("/a/b", 0, 0, 0o755, 2).unwrap())
    });
    assert_eq!(first, second);
}

#[test]
fn mkdir_rejects_existing() {
    let view = view_with_dir("/a");
    let err = view.write(|ns| ns.mkdir("/a", 0, 0, 0o755, 1).unwrap_err());
    assert!(matches!(err, NamespaceError::Exists(_)));
}

#[test]
fn create_and_resolve_file() {
    let view = view_with_dir("/d");
    let fid = view.write(|ns| ns.create_file("/d/f", 1001, 100, layout(), 200).unwrap());
    view.read(|ns| {
        assert_eq!(ns.resolve_file("/d/f").unwrap(), fid);
        assert_eq!(ns.file_path(fid).unwrap(), "/d/f");
        let md = ns.file(fid).unwrap();
        assert_eq!(md.uid, 1001);
        assert_eq!(md.ctime.0, 200);
    });
}

#[test]
fn duplicate_file_name_rejected() {
    let view = view_with_dir("/d");
    view.write(|ns| {
        ns.create_file("/d/f", 0, 0, layout(), 1).unwrap();
        let err = ns.create_file("/d/f", 0, 0, layout(), 2).unwrap_err();
        assert!(matches!(err, NamespaceError::Exists(_)));
    });
}

#[test]
fn location_index_tracks_adds_and_unlinks() {
    let view = view_with_dir("/d");
    let fid = view.write(|ns| {
        let fid = ns.create_file("/d/f", 0, 0, layout(), 1).unwrap();
        ns.add_location(fid, FsId(1)).unwrap();
        ns.add_location(fid, FsId(2)).unwrap();
        fid
    });
    view.read(|ns| {
        assert_eq!(ns.files_on(FsId(1)), vec![fid]);
        assert_eq!(ns.file_count_on(FsId(2)), 1);
    });

    view.write(|ns| ns.unlink_location(fid, FsId(1)).unwrap());
    view.read(|ns| {
        assert!(ns.files_on(FsId(1)).is_empty());
        assert_eq!(ns.unlinked_on(FsId(1)), vec![fid]);
    });

    view.write(|ns| ns.remove_location(fid, FsId(1)).unwrap());
    view.read(|ns| {
        assert!(ns.unlinked_on(FsId(1)).is_empty());
        let md = ns.file(fid).unwrap();
        assert_eq!(md.locations, vec![FsId(2)]);
        assert!(md.unlinked.is_empty());
    });
}

#[test]
fn remove_file_clears_indices_and_parent() {
    let view = view_with_dir("/d");
    let fid = view.write(|ns| {
        let fid = ns.create_file("/d/f", 0, 0, layout(), 1).unwrap();
        ns.add_location(fid, FsId(3)).unwrap();
        ns.set_file_size(fid, 500).unwrap();
        fid
    });
    view.write(|ns| ns.remove_file(fid, 50).unwrap());
    view.read(|ns| {
        assert!(ns.resolve_file("/d/f").is_err());
        assert!(ns.files_on(FsId(3)).is_empty());
        let dir = ns.resolve_container("/d").unwrap();
        assert_eq!(ns.container(dir).unwrap().mtime.0, 50);
        assert_eq!(ns.container(dir).unwrap().tree_size, 0);
    });
}

#[test]
fn tree_size_follows_resize() {
    let view = view_with_dir("/a/b");
    let fid = view.write(|ns| ns.create_file("/a/b/f", 0, 0, layout(), 1).unwrap());
    view.write(|ns| ns.set_file_size(fid, 4096).unwrap());
    view.read(|ns| {
        let a = ns.resolve_container("/a").unwrap();
        let b = ns.resolve_container("/a/b").unwrap();
        assert_eq!(ns.container(a).unwrap().tree_size, 4096);
        assert_eq!(ns.container(b).unwrap().tree_size, 4096);
        assert_eq!(ns.container(ROOT_ID).unwrap().tree_size, 4096);
    });
}

#[test]
fn quota_accounts_subtree() {
    let view = view_with_dir("/q/sub");
    let q = view.write(|ns| {
        let q = ns.resolve_container("/q").unwrap();
        ns.set_quota(q, 10_000, 100).unwrap();
        q
    });
    let fid = view.write(|ns| ns.create_file("/q/sub/f", 0, 0, layout(), 1).unwrap());
    view.write(|ns| ns.set_file_size(fid, 6000).unwrap());
    view.read(|ns| {
        let node = ns.quota_node(q).unwrap();
        assert_eq!(node.used_bytes, 6000);
        assert_eq!(node.used_inodes, 1);
        assert!((node.max_ratio() - 0.6).abs() < 1e-9);
    });

    view.write(|ns| ns.remove_file(fid, 2).unwrap());
    view.read(|ns| {
        let node = ns.quota_node(q).unwrap();
        assert_eq!(node.used_bytes, 0);
        assert_eq!(node.used_inodes, 0);
    });
}

#[test]
fn quota_set_after_population_recounts() {
    let view = view_with_dir("/q");
    let fid = view.write(|ns| ns.create_file("/q/f", 0, 0, layout(), 1).unwrap());
    view.write(|ns| ns.set_file_size(fid, 100).unwrap());
    let q = view.write(|ns| {
        let q = ns.resolve_container("/q").unwrap();
        ns.set_quota(q, 1000, 10).unwrap();
        q
    });
    view.read(|ns| {
        let node = ns.quota_node(q).unwrap();
        assert_eq!(node.used_bytes, 100);
        assert_eq!(node.used_inodes, 1);
    });
}

#[test]
fn rename_file_preserves_inode() {
    let view = view_with_dir("/a");
    view.write(|ns| ns.mkdir_p("/b", 0, 0, 0o755, 1).unwrap());
    let fid = view.write(|ns| {
        let fid = ns.create_file("/a/f", 0, 0, layout(), 1).unwrap();
        ns.set_file_size(fid, 100).unwrap();
        fid
    });
    view.write(|ns| {
        let b = ns.resolve_container("/b").unwrap();
        ns.rename_file(fid, b, "g", 9).unwrap();
    });
    view.read(|ns| {
        assert_eq!(ns.file_path(fid).unwrap(), "/b/g");
        assert!(ns.resolve_file("/a/f").is_err());
        let a = ns.resolve_container("/a").unwrap();
        let b = ns.resolve_container("/b").unwrap();
        assert_eq!(ns.container(a).unwrap().tree_size, 0);
        assert_eq!(ns.container(b).unwrap().tree_size, 100);
    });
}

#[test]
fn rename_file_rejects_occupied_name() {
    let view = view_with_dir("/a");
    let (f1, _f2) = view.write(|ns| {
        let f1 = ns.create_file("/a/f", 0, 0, layout(), 1).unwrap();
        let f2 = ns.create_file("/a/g", 0, 0, layout(), 1).unwrap();
        (f1, f2)
    });
    let err = view.write(|ns| {
        let a = ns.resolve_container("/a").unwrap();
        ns.rename_file(f1, a, "g", 2).unwrap_err()
    });
    assert!(matches!(err, NamespaceError::Exists(_)));
}

#[test]
fn rename_container_moves_tree() {
    let view = view_with_dir("/a/sub");
    view.write(|ns| ns.mkdir_p("/b", 0, 0, 0o755, 1).unwrap());
    let fid = view.write(|ns| ns.create_file("/a/sub/f", 0, 0, layout(), 1).unwrap());
    view.write(|ns| ns.set_file_size(fid, 77).unwrap());
    view.write(|ns| {
        let sub = ns.resolve_container("/a/sub").unwrap();
        let b = ns.resolve_container("/b").unwrap();
        ns.rename_container(sub, b, "moved", 5).unwrap();
    });
    view.read(|ns| {
        assert_eq!(ns.file_path(fid).unwrap(), "/b/moved/f");
        let b = ns.resolve_container("/b").unwrap();
        assert_eq!(ns.container(b).unwrap().tree_size, 77);
    });
}

#[test]
fn rename_container_refuses_cycle() {
    let view = view_with_dir("/a/b");
    let err = view.write(|ns| {
        let a = ns.resolve_container("/a").unwrap();
        let b = ns.resolve_container("/a/b").unwrap();
        ns.rename_container(a, b, "inside", 1).unwrap_err()
    });
    assert!(matches!(err, NamespaceError::InvalidPath(_)));
}

#[test]
fn merge_adopts_proc_replicas_and_unlinks_old() {
    let view = view_with_dir("/d");
    view.write(|ns| ns.mkdir_p("/proc/conversion", 0, 0, 0o755, 1).unwrap());
    let (target, proc_fid) = view.write(|ns| {
        let target = ns.create_file("/d/f", 0, 0, layout(), 1).unwrap();
        ns.set_file_size(target, 100).unwrap();
        ns.add_location(target, FsId(1)).unwrap();
        let proc_fid = ns.create_file("/proc/conversion/x", 0, 0, layout(), 2).unwrap();
        ns.set_file_size(proc_fid, 100).unwrap();
        ns.add_location(proc_fid, FsId(7)).unwrap();
        (target, proc_fid)
    });
    view.write(|ns| ns.merge(proc_fid, target, 9).unwrap());
    view.read(|ns| {
        let md = ns.file(target).unwrap();
        assert_eq!(md.locations, vec![FsId(7)]);
        assert_eq!(md.unlinked, vec![FsId(1)]);
        assert!(!ns.has_file(proc_fid));
        assert_eq!(ns.files_on(FsId(7)), vec![target]);
        assert_eq!(ns.unlinked_on(FsId(1)), vec![target]);
    });
}

#[test]
fn remove_container_requires_empty() {
    let view = view_with_dir("/a");
    view.write(|ns| {
        ns.create_file("/a/f", 0, 0, layout(), 1).unwrap();
    });
    let err = view.write(|ns| {
        let a = ns.resolve_container("/a").unwrap();
        ns.remove_container(a, 1).unwrap_err()
    });
    assert!(matches!(err, NamespaceError::NotEmpty(_)));
}

#[test]
fn split_parent_cases() {
    assert_eq!(split_parent("/a").unwrap(), ("/", "a"));
    assert_eq!(split_parent("/a/b/c").unwrap(), ("/a/b", "c"));
    assert!(split_parent("relative").is_err());
    assert!(split_parent("/").is_err());
}

#[test]
fn unlink_file_keeps_record_until_acked() {
    let view = view_with_dir("/d");
    let fid = view.write(|ns| {
        let fid = ns.create_file("/d/f", 0, 0, layout(), 1).unwrap();
        ns.set_file_size(fid, 100).unwrap();
        ns.add_location(fid, FsId(1)).unwrap();
        fid
    });
    view.write(|ns| ns.unlink_file(fid, 5).unwrap());
    view.read(|ns| {
        // Name gone, record and unlinked replica still there.
        assert!(ns.resolve_file("/d/f").is_err());
        assert!(ns.has_file(fid));
        assert_eq!(ns.unlinked_on(FsId(1)), vec![fid]);
        let d = ns.resolve_container("/d").unwrap();
        assert_eq!(ns.container(d).unwrap().tree_size, 0);
    });

    // The target acks the physical delete.
    view.write(|ns| {
        ns.clear_unlinked(fid, FsId(1)).unwrap();
        ns.remove_file(fid, 6).unwrap();
    });
    view.read(|ns| assert!(!ns.has_file(fid)));
}

#[test]
fn unlink_file_without_replicas_drops_record() {
    let view = view_with_dir("/d");
    let fid = view.write(|ns| ns.create_file("/d/f", 0, 0, layout(), 1).unwrap());
    view.write(|ns| ns.unlink_file(fid, 2).unwrap());
    view.read(|ns| assert!(!ns.has_file(fid)));
}

#[test]
fn clear_unlinked_leaves_locations() {
    let view = view_with_dir("/d");
    let fid = view.write(|ns| {
        let fid = ns.create_file("/d/f", 0, 0, layout(), 1).unwrap();
        ns.add_location(fid, FsId(1)).unwrap();
        ns.add_location(fid, FsId(2)).unwrap();
        ns.unlink_location(fid, FsId(1)).unwrap();
        ns.clear_unlinked(fid, FsId(1)).unwrap();
        fid
    });
    view.read(|ns| {
        let md = ns.file(fid).unwrap();
        assert_eq!(md.locations, vec![FsId(2)]);
        assert!(md.unlinked.is_empty());
        assert!(ns.unlinked_on(FsId(1)).is_empty());
    });
}

#[test]
fn booted_flag() {
    let view = NamespaceView::new();
    assert!(!view.is_booted());
    view.set_booted(true);
    assert!(view.is_booted());
}
