// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::services::Services;
use silo_core::{ChecksumType, FakeClock, FileId, LayoutId};
use silo_fsview::StorageTarget;

fn services() -> Arc<Services<FakeClock>> {
    let svc = Services::new(FakeClock::new(), "mgm1:1094");
    svc.clock.set_epoch_secs(10_000);
    for fsid in [7u32, 8] {
        svc.view
            .register(StorageTarget::new(
                FsId(fsid),
                format!("fst{}", fsid),
                1095,
                format!("/data{:02}", fsid),
                "g0",
                "default",
            ))
            .unwrap();
        svc.view.set_config_status(FsId(fsid), ConfigStatus::Rw).unwrap();
    }
    svc.ns.set_booted(true);
    svc
}

fn put_files(svc: &Services<FakeClock>, fsid: u32, count: u64) -> Vec<FileId> {
    svc.ns.write(|ns| {
        ns.mkdir_p("/d", 0, 0, 0o755, 1).unwrap();
        (0..count)
            .map(|i| {
                let fid = ns
                    .create_file(
                        &format!("/d/fs{}-{}", fsid, i),
                        0,
                        0,
                        LayoutId::plain(ChecksumType::Adler32),
                        1,
                    )
                    .unwrap();
                ns.add_location(fid, FsId(fsid)).unwrap();
                fid
            })
            .collect()
    })
}

#[test]
fn empty_target_goes_straight_to_drained() {
    let svc = services();
    let mut engine = DrainEngine::new(svc.clone(), FsId(7));
    let now = svc.clock.epoch_secs();
    assert!(engine.start(now));
    assert_eq!(engine.take_snapshot(now), Some(0));
    assert_eq!(engine.state(), DrainState::Drained);

    engine.finish_drained(false);
    assert_eq!(svc.snapshot_status(FsId(7)), ConfigStatus::Empty);
}

#[test]
fn progress_and_stall_detection() {
    let svc = services();
    svc.view.set_target_config(FsId(7), "drainperiod", "3000").unwrap();
    let files = put_files(&svc, 7, 10);

    let mut engine = DrainEngine::new(svc.clone(), FsId(7));
    let start = svc.clock.epoch_secs();
    engine.start(start);
    assert_eq!(engine.take_snapshot(start), Some(10));
    assert_eq!(engine.state(), DrainState::Draining);

    // Peers pull half the files; progress grows monotonically.
    svc.ns.write(|ns| {
        for fid in &files[..5] {
            ns.remove_location(*fid, FsId(7)).unwrap();
        }
    });
    assert_eq!(engine.observe(start + 100), DrainState::Draining);
    let snap = svc.view.snapshot(FsId(7)).unwrap();
    assert_eq!(snap.drain.progress, 50);
    assert_eq!(snap.drain.files_left, 5);

    // No progress for the stall threshold: Stalling.
    assert_eq!(
        engine.observe(start + 100 + STALL_THRESHOLD_SECS),
        DrainState::Stalling
    );

    // Movement resumes: back to Draining.
    svc.ns.write(|ns| ns.remove_location(files[5], FsId(7)).unwrap());
    assert_eq!(
        engine.observe(start + 110 + STALL_THRESHOLD_SECS),
        DrainState::Draining
    );

    // The rest drains; Drained.
    svc.ns.write(|ns| {
        for fid in &files[6..] {
            ns.remove_location(*fid, FsId(7)).unwrap();
        }
    });
    assert_eq!(engine.observe(start + 120 + STALL_THRESHOLD_SECS), DrainState::Drained);
}

#[test]
fn deadline_expiry_without_retry() {
    let svc = services();
    svc.view.set_target_config(FsId(7), "drainperiod", "300").unwrap();
    put_files(&svc, 7, 10);

    let mut engine = DrainEngine::new(svc.clone(), FsId(7));
    let start = svc.clock.epoch_secs();
    engine.start(start);
    engine.take_snapshot(start);
    engine.enable_pull();
    assert!(svc.view.snapshot(FsId(8)).unwrap().drain.puller);

    // Zero files per second pulled; one second past the deadline.
    assert_eq!(engine.observe(start + 301), DrainState::Expired);
    assert!(!engine.finish_expired(start + 301));
    assert_eq!(engine.state(), DrainState::Expired);
    // The single allowed try was consumed without publishing a retry.
    assert_eq!(engine.retries(), 0);

    let snap = svc.view.snapshot(FsId(7)).unwrap();
    // Not marked empty; retry counter untouched; pull disabled on peers.
    assert_eq!(snap.config_status, ConfigStatus::Rw);
    assert_eq!(snap.drain.retries, 0);
    assert!(!svc.view.snapshot(FsId(8)).unwrap().drain.puller);
}

#[test]
fn target_removed_mid_drain_fails_cleanly() {
    let svc = services();
    put_files(&svc, 7, 2);
    let mut engine = DrainEngine::new(svc.clone(), FsId(7));
    let start = svc.clock.epoch_secs();
    engine.start(start);
    engine.take_snapshot(start);

    svc.view.set_config_status(FsId(7), ConfigStatus::Empty).unwrap();
    svc.view.unregister(FsId(7)).unwrap();

    assert_eq!(engine.observe(start + 1), DrainState::Failed);
}

#[test]
fn group_pull_requires_enabled_group() {
    let svc = services();
    put_files(&svc, 7, 1);
    let mut engine = DrainEngine::new(svc.clone(), FsId(7));
    let start = svc.clock.epoch_secs();
    engine.start(start);
    engine.take_snapshot(start);

    svc.view.set_group_config("g0", "status", "off");
    engine.enable_pull();
    assert!(!svc.view.snapshot(FsId(8)).unwrap().drain.puller);

    svc.view.set_group_config("g0", "status", "on");
    engine.enable_pull();
    assert!(svc.view.snapshot(FsId(8)).unwrap().drain.puller);
}

#[test]
fn node_caps_published_from_space_config() {
    let svc = services();
    svc.view.set_space_config("default", "drainer.node.ntx", "4");
    svc.view.set_space_config("default", "drainer.node.rate", "25");
    put_files(&svc, 7, 1);

    let mut engine = DrainEngine::new(svc.clone(), FsId(7));
    let start = svc.clock.epoch_secs();
    engine.start(start);
    engine.take_snapshot(start);
    engine.enable_pull();

    assert_eq!(svc.view.target_config(FsId(8), "drainer.node.ntx").as_deref(), Some("4"));
    assert_eq!(svc.view.target_config(FsId(8), "drainer.node.rate").as_deref(), Some("25"));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn run_drains_empty_target_end_to_end() {
    let svc = services();
    svc.view.set_target_config(FsId(7), "drainperiod", "300").unwrap();
    svc.view.set_config_status(FsId(7), ConfigStatus::Drain).unwrap();

    let supervisor = DrainSupervisor::new(svc.clone());
    assert_eq!(supervisor.reconcile(), 1);
    // Re-reconciling does not double-spawn.
    assert_eq!(supervisor.reconcile(), 0);

    // Paused tokio time auto-advances through the settle delay.
    for _ in 0..200 {
        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        if svc.view.snapshot(FsId(7)).map(|t| t.config_status) == Some(ConfigStatus::Empty) {
            break;
        }
    }
    assert_eq!(svc.snapshot_status(FsId(7)), ConfigStatus::Empty);
}

trait SnapshotStatus {
    fn snapshot_status(&self, fsid: FsId) -> ConfigStatus;
}

impl SnapshotStatus for Services<FakeClock> {
    fn snapshot_status(&self, fsid: FsId) -> ConfigStatus {
        self.view.snapshot(fsid).map(|t| t.config_status).unwrap_or(ConfigStatus::Off)
    }
}
