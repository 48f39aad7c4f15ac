// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn config_status_total_order() {
    use ConfigStatus::*;
    assert!(Off < Empty);
    assert!(Empty < Drain);
    assert!(Drain < Ro);
    assert!(Ro < Wo);
    assert!(Wo < Rw);
}

#[parameterized(
    off = { "off", ConfigStatus::Off },
    empty = { "empty", ConfigStatus::Empty },
    drain = { "drain", ConfigStatus::Drain },
    ro = { "ro", ConfigStatus::Ro },
    wo = { "wo", ConfigStatus::Wo },
    rw = { "rw", ConfigStatus::Rw },
)]
fn config_status_roundtrip(s: &str, status: ConfigStatus) {
    assert_eq!(s.parse::<ConfigStatus>().unwrap(), status);
    assert_eq!(status.to_string(), s);
}

#[test]
fn writable_threshold() {
    assert!(!ConfigStatus::Ro.is_writable());
    assert!(ConfigStatus::Wo.is_writable());
    assert!(ConfigStatus::Rw.is_writable());
    assert!(ConfigStatus::Ro.is_readable());
    assert!(!ConfigStatus::Drain.is_readable());
}

fn target() -> StorageTarget {
    StorageTarget::new(silo_core::FsId(7), "fst1.cern.ch", 1095, "/data07", "g0", "default")
}

#[test]
fn node_name() {
    assert_eq!(target().node(), "fst1.cern.ch:1095");
}

#[test]
fn can_delete_requires_all_three() {
    let mut t = target();
    t.config_status = ConfigStatus::Drain;
    t.boot_status = BootStatus::Booted;
    t.active_status = ActiveStatus::Online;
    assert!(t.can_delete());

    t.config_status = ConfigStatus::Empty;
    assert!(!t.can_delete());

    t.config_status = ConfigStatus::Rw;
    t.boot_status = BootStatus::Booting;
    assert!(!t.can_delete());

    t.boot_status = BootStatus::Booted;
    t.active_status = ActiveStatus::Offline;
    assert!(!t.can_delete());
}

#[test]
fn fill_ratio() {
    let mut t = target();
    t.stats = TargetStats { used_bytes: 250, capacity_bytes: 1000, files: 3 };
    assert!((t.fill_ratio() - 0.25).abs() < 1e-9);
    assert_eq!(t.stats.free_bytes(), 750);
}
