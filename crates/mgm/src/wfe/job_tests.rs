// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::services::Services;
use silo_core::FakeClock;
use std::sync::Arc;

fn services() -> Arc<Services<FakeClock>> {
    let svc = Services::new(FakeClock::new(), "mgm1:1094");
    svc.clock.set_epoch_secs(1_600_000_000);
    svc
}

fn job(when: u64) -> WfeJob {
    WfeJob::new(
        FileId(0xabc),
        "closew",
        "default",
        when,
        "proto",
        VirtualIdentity::new(1001, 100, "alice", "client"),
    )
}

#[test]
fn queue_letters_roundtrip() {
    for q in [Queue::Queued, Queue::Running, Queue::Retry, Queue::Done, Queue::Failed, Queue::Garbage]
    {
        assert_eq!(Queue::from_letter(&q.to_string()), Some(q));
    }
    assert_eq!(Queue::from_letter("x"), None);
    assert!(Queue::Queued.is_pollable());
    assert!(Queue::Retry.is_pollable());
    assert!(!Queue::Done.is_pollable());
}

#[test]
fn path_layout() {
    let j = job(1_600_000_000);
    let path = j.path("/proc/workflow");
    // 2020-09-13 is the UTC day of 1600000000.
    assert_eq!(
        path,
        "/proc/workflow/2020-09-13/q/default/1600000000:0000000000000abc:closew"
    );
}

#[test]
fn save_load_roundtrip() {
    let svc = services();
    let mut j = job(1_600_000_000);
    j.retry = 3;
    j.errmsg = "previous failure".to_string();
    j.save(&svc).unwrap();

    let loaded =
        WfeJob::load(&svc, &j.day, Queue::Queued, "default", &j.entry_name()).unwrap();
    assert_eq!(loaded, j);
}

#[test]
fn save_writes_the_advertised_attrs() {
    let svc = services();
    let j = job(1_600_000_000);
    j.save(&svc).unwrap();

    svc.ns.read(|ns| {
        let fid = ns.resolve_file(&j.path("/proc/workflow")).unwrap();
        let md = ns.file(fid).unwrap();
        assert_eq!(md.size, 0);
        assert_eq!(md.xattr(ACTION_ATTR), Some("proto"));
        assert_eq!(md.xattr(RETRY_ATTR), Some("0"));
        assert!(md.xattr(VID_ATTR).unwrap().contains("alice"));
    });
}

#[test]
fn move_to_changes_queue_and_day() {
    let svc = services();
    let mut j = job(1_600_000_000);
    j.save(&svc).unwrap();
    let old_path = j.path("/proc/workflow");

    // Retry scheduled the next day.
    j.move_to(&svc, Queue::Retry, 1_600_000_000 + 86_400).unwrap();

    assert_eq!(j.queue, Queue::Retry);
    assert_eq!(j.day, "2020-09-14");
    svc.ns.read(|ns| {
        assert!(ns.resolve_file(&old_path).is_err());
        assert!(ns.resolve_file(&j.path("/proc/workflow")).is_ok());
    });
}

#[test]
fn results_written_back() {
    let svc = services();
    let j = job(1_600_000_000);
    j.save(&svc).unwrap();
    j.write_results(&svc, 0, "all good").unwrap();

    svc.ns.read(|ns| {
        let fid = ns.resolve_file(&j.path("/proc/workflow")).unwrap();
        let md = ns.file(fid).unwrap();
        assert_eq!(md.xattr(RETC_ATTR), Some("0"));
        assert_eq!(md.xattr(LOG_ATTR), Some("all good"));
    });
}

#[test]
fn queues_partition_the_day_directory() {
    let svc = services();
    let mut j = job(1_600_000_000);
    j.save(&svc).unwrap();
    j.move_to(&svc, Queue::Running, j.when).unwrap();

    // The entry exists in exactly one queue.
    svc.ns.read(|ns| {
        let mut found = 0;
        for q in ["q", "r", "e", "d", "f", "g"] {
            let path = format!(
                "/proc/workflow/2020-09-13/{}/default/{}",
                q,
                j.entry_name()
            );
            if ns.resolve_file(&path).is_ok() {
                found += 1;
            }
        }
        assert_eq!(found, 1);
    });
}
