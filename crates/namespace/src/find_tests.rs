// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::view::{NamespaceView, ROOT_ID};
use silo_core::{ChecksumType, LayoutId};

fn populated() -> NamespaceView {
    let view = NamespaceView::new();
    view.write(|ns| {
        ns.mkdir_p("/a/x", 0, 0, 0o755, 1).unwrap();
        ns.mkdir_p("/a/y", 0, 0, 0o755, 1).unwrap();
        ns.mkdir_p("/b", 0, 0, 0o755, 1).unwrap();
        ns.create_file("/a/x/f1", 0, 0, LayoutId::plain(ChecksumType::None), 1).unwrap();
        ns.create_file("/b/f2", 0, 0, LayoutId::plain(ChecksumType::None), 1).unwrap();
    });
    view
}

#[test]
fn find_dirs_parents_before_children() {
    let view = populated();
    view.read(|ns| {
        let dirs = ns.find_dirs(ROOT_ID, 16);
        let pos = |p: &str| {
            let id = ns.resolve_container(p).unwrap();
            dirs.iter().position(|d| *d == id).unwrap()
        };
        assert_eq!(dirs[0], ROOT_ID);
        assert!(pos("/a") < pos("/a/x"));
        assert!(pos("/a") < pos("/a/y"));
    });
}

#[test]
fn find_dirs_reversed_is_deepest_first() {
    let view = populated();
    view.read(|ns| {
        let mut dirs = ns.find_dirs(ROOT_ID, 16);
        dirs.reverse();
        let pos = |p: &str| {
            let id = ns.resolve_container(p).unwrap();
            dirs.iter().position(|d| *d == id).unwrap()
        };
        assert!(pos("/a/x") < pos("/a"));
        assert_eq!(dirs.last(), Some(&ROOT_ID));
    });
}

#[test]
fn find_depth_bound() {
    let view = populated();
    view.read(|ns| {
        let dirs = ns.find_dirs(ROOT_ID, 1);
        let deep = ns.resolve_container("/a/x").unwrap();
        assert!(!dirs.contains(&deep));
    });
}

#[test]
fn attr_prefix_filter() {
    let view = populated();
    view.write(|ns| {
        let x = ns.resolve_container("/a/x").unwrap();
        ns.set_container_xattr(x, "sys.lru.expire.match", "*:1d").unwrap();
    });
    view.read(|ns| {
        let hits = ns.find_dirs_with_attr_prefix(ROOT_ID, "sys.lru.", 16);
        let x = ns.resolve_container("/a/x").unwrap();
        assert_eq!(hits, vec![x]);
    });
}

#[test]
fn files_under_collects_all() {
    let view = populated();
    view.read(|ns| {
        assert_eq!(ns.files_under(ROOT_ID, 16).len(), 2);
        let b = ns.resolve_container("/b").unwrap();
        assert_eq!(ns.files_under(b, 16).len(), 1);
    });
}
