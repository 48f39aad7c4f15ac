// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::services::Services;
use silo_core::{ChecksumType, FakeClock, LayoutId, VirtualIdentity};

fn services() -> Arc<Services<FakeClock>> {
    let svc = Services::new(FakeClock::new(), "mgm1:1094");
    svc.clock.set_epoch_secs(1_600_000_000);
    svc
}

fn tape_file(svc: &Services<FakeClock>, path: &str) -> FileId {
    svc.ns.write(|ns| {
        ns.mkdir_p("/tape/exp", 0, 0, 0o755, 1).unwrap();
        let fid = ns
            .create_file(path, 1001, 100, LayoutId::plain(ChecksumType::Adler32), 1)
            .unwrap();
        ns.set_file_size(fid, 1024).unwrap();
        ns.add_location(fid, TAPE_FS_ID).unwrap();
        fid
    })
}

fn disk_file(svc: &Services<FakeClock>, path: &str) -> FileId {
    svc.ns.write(|ns| {
        ns.mkdir_p("/tape/exp", 0, 0, 0o755, 1).unwrap();
        let fid = ns
            .create_file(path, 1001, 100, LayoutId::plain(ChecksumType::Adler32), 1)
            .unwrap();
        ns.set_file_size(fid, 1024).unwrap();
        ns.set_file_checksum(fid, Some(silo_core::Checksum::new(ChecksumType::Adler32, "abcd0123")))
            .unwrap();
        ns.add_location(fid, silo_core::FsId(1)).unwrap();
        fid
    })
}

fn job(fid: FileId, event: &str, workflow: &str) -> WfeJob {
    WfeJob::new(
        fid,
        event,
        workflow,
        1_600_000_000,
        "proto",
        VirtualIdentity::new(1001, 100, "alice", "client"),
    )
}

#[tokio::test]
async fn prepare_counts_and_sends_once() {
    let svc = services();
    let fid = tape_file(&svc, "/tape/exp/f");
    let mock = MockArchiveClient::new();

    // First retriever: counter 0 -> 1, PREPARE sent.
    handle_proto_event(&svc, &mock, &job(fid, "sync::prepare", "default")).await.unwrap();
    let calls = mock.take_calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        ArchiveRequest::Prepare { dst_url, error_report_url, .. } => {
            assert!(dst_url.contains("mgm1:1094"));
            assert!(dst_url.contains(RETRIEVE_WRITTEN_WORKFLOW));
            assert!(error_report_url.contains("report_retrieve_error"));
        }
        other => panic!("unexpected request {:?}", other),
    }

    // Second retriever: counter 1 -> 2, no request.
    handle_proto_event(&svc, &mock, &job(fid, "sync::prepare", "default")).await.unwrap();
    assert!(mock.take_calls().is_empty());

    svc.ns.read(|ns| {
        assert_eq!(ns.file(fid).unwrap().xattr(RETRIEVE_REQS_ATTR), Some("2"));
    });

    // The retrieve-written closew resets the counter.
    handle_proto_event(&svc, &mock, &job(fid, "sync::closew", RETRIEVE_WRITTEN_WORKFLOW))
        .await
        .unwrap();
    assert!(mock.take_calls().is_empty());
    svc.ns.read(|ns| {
        assert_eq!(ns.file(fid).unwrap().xattr(RETRIEVE_REQS_ATTR), Some("0"));
    });
}

#[tokio::test]
async fn prepare_with_disk_replica_is_noop() {
    let svc = services();
    let fid = disk_file(&svc, "/tape/exp/f");
    let mock = MockArchiveClient::new();

    handle_proto_event(&svc, &mock, &job(fid, "prepare", "default")).await.unwrap();
    assert!(mock.take_calls().is_empty());
    svc.ns.read(|ns| {
        assert_eq!(ns.file(fid).unwrap().xattr(RETRIEVE_REQS_ATTR), None);
    });
}

#[tokio::test]
async fn prepare_failure_resets_counter_and_stamps_error() {
    let svc = services();
    let fid = tape_file(&svc, "/tape/exp/f");
    let mock = MockArchiveClient::new();
    mock.fail_next();

    let err =
        handle_proto_event(&svc, &mock, &job(fid, "prepare", "default")).await.unwrap_err();
    assert!(err.is_transient());
    svc.ns.read(|ns| {
        let md = ns.file(fid).unwrap();
        assert_eq!(md.xattr(RETRIEVE_REQS_ATTR), Some("0"));
        assert!(md.xattr(RETRIEVE_ERROR_ATTR).is_some());
    });
}

#[tokio::test]
async fn abort_prepare_sends_on_last() {
    let svc = services();
    let fid = tape_file(&svc, "/tape/exp/f");
    let mock = MockArchiveClient::new();

    handle_proto_event(&svc, &mock, &job(fid, "prepare", "default")).await.unwrap();
    handle_proto_event(&svc, &mock, &job(fid, "prepare", "default")).await.unwrap();
    mock.take_calls();

    // First abort: one retriever remains, nothing sent.
    handle_proto_event(&svc, &mock, &job(fid, "abort_prepare", "default")).await.unwrap();
    assert!(mock.take_calls().is_empty());

    // Last abort: ABORT_PREPARE goes out.
    handle_proto_event(&svc, &mock, &job(fid, "abort_prepare", "default")).await.unwrap();
    let calls = mock.take_calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(calls[0], ArchiveRequest::AbortPrepare { .. }));
}

#[tokio::test]
async fn closew_carries_size_and_checksum() {
    let svc = services();
    let fid = disk_file(&svc, "/tape/exp/f");
    let mock = MockArchiveClient::new();

    handle_proto_event(&svc, &mock, &job(fid, "closew", "default")).await.unwrap();
    let calls = mock.take_calls();
    match &calls[0] {
        ArchiveRequest::CloseWrite { size, checksum, report_url, .. } => {
            assert_eq!(*size, 1024);
            assert_eq!(checksum.as_deref(), Some("abcd0123"));
            assert!(report_url.contains("report_archive_error"));
        }
        other => panic!("unexpected request {:?}", other),
    }
}

#[tokio::test]
async fn closew_failure_stamps_archive_error() {
    let svc = services();
    let fid = disk_file(&svc, "/tape/exp/f");
    let mock = MockArchiveClient::new();
    mock.fail_next();

    let err = handle_proto_event(&svc, &mock, &job(fid, "closew", "default")).await.unwrap_err();
    assert!(err.is_transient());
    svc.ns.read(|ns| {
        assert!(ns.file(fid).unwrap().xattr(ARCHIVE_ERROR_ATTR).is_some());
    });
}

#[tokio::test]
async fn create_gates_on_endpoint() {
    let svc = services();
    let fid = disk_file(&svc, "/tape/exp/f");
    let mock = MockArchiveClient::new();

    handle_proto_event(&svc, &mock, &job(fid, "sync::create", "default")).await.unwrap();
    assert!(matches!(mock.take_calls()[0], ArchiveRequest::Create { uid: 1001, gid: 100, .. }));
}

#[tokio::test]
async fn delete_swallows_endpoint_failure() {
    let svc = services();
    let fid = disk_file(&svc, "/tape/exp/f");
    let mock = MockArchiveClient::new();
    mock.fail_next();

    // Fire-and-forget: failure is not surfaced.
    handle_proto_event(&svc, &mock, &job(fid, "delete", "default")).await.unwrap();
}

#[tokio::test]
async fn archived_drops_disk_replicas_by_default() {
    let svc = services();
    let fid = disk_file(&svc, "/tape/exp/f");
    svc.ns.write(|ns| ns.set_file_xattr(fid, ARCHIVE_ERROR_ATTR, "stale").unwrap());
    let mock = MockArchiveClient::new();

    handle_proto_event(&svc, &mock, &job(fid, "archived", "default")).await.unwrap();

    svc.ns.read(|ns| {
        let md = ns.file(fid).unwrap();
        assert_eq!(md.locations, vec![TAPE_FS_ID]);
        assert_eq!(md.unlinked, vec![silo_core::FsId(1)]);
        assert_eq!(md.xattr(ARCHIVE_ERROR_ATTR), None);
    });
}

#[tokio::test]
async fn archived_keeps_replicas_when_told() {
    let svc = services();
    let fid = disk_file(&svc, "/tape/exp/f");
    svc.ns.write(|ns| {
        let d = ns.resolve_container("/tape/exp").unwrap();
        ns.set_container_xattr(d, DROP_DISK_REPLICAS_ATTR, "keep").unwrap();
    });
    let mock = MockArchiveClient::new();

    handle_proto_event(&svc, &mock, &job(fid, "archived", "default")).await.unwrap();
    svc.ns.read(|ns| {
        let md = ns.file(fid).unwrap();
        assert!(md.locations.contains(&silo_core::FsId(1)));
        assert!(md.locations.contains(&TAPE_FS_ID));
    });
}

#[tokio::test]
async fn failure_events_record_error_attrs() {
    let svc = services();
    let fid = tape_file(&svc, "/tape/exp/f");
    let mock = MockArchiveClient::new();

    let mut j = job(fid, "retrieve_failed", "default");
    j.errmsg = "tape drive on fire".to_string();
    handle_proto_event(&svc, &mock, &j).await.unwrap();

    let mut j = job(fid, "archive_failed", "default");
    j.errmsg = "no pool space".to_string();
    handle_proto_event(&svc, &mock, &j).await.unwrap();

    svc.ns.read(|ns| {
        let md = ns.file(fid).unwrap();
        assert_eq!(md.xattr(RETRIEVE_ERROR_ATTR), Some("tape drive on fire"));
        assert_eq!(md.xattr(ARCHIVE_ERROR_ATTR), Some("no pool space"));
    });
}

#[tokio::test]
async fn unknown_event_rejected() {
    let svc = services();
    let fid = disk_file(&svc, "/tape/exp/f");
    let mock = MockArchiveClient::new();
    let err = handle_proto_event(&svc, &mock, &job(fid, "defrag", "default")).await.unwrap_err();
    assert!(matches!(err, MgmError::InvalidArg(_)));
}
