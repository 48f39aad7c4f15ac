// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn ratios() {
    let mut q = QuotaNode::new(1000, 10);
    q.account(600);
    assert!((q.byte_ratio() - 0.6).abs() < 1e-9);
    assert!((q.inode_ratio() - 0.1).abs() < 1e-9);
    assert!((q.max_ratio() - 0.6).abs() < 1e-9);
}

#[test]
fn zero_capacity_reads_as_empty() {
    let q = QuotaNode::default();
    assert_eq!(q.max_ratio(), 0.0);
}

#[test]
fn account_unaccount_balance() {
    let mut q = QuotaNode::new(1000, 10);
    q.account(100);
    q.account(200);
    q.unaccount(100);
    assert_eq!(q.used_bytes, 200);
    assert_eq!(q.used_inodes, 1);
}

#[test]
fn resize_moves_bytes_only() {
    let mut q = QuotaNode::new(1000, 10);
    q.account(100);
    q.resize(100, 400);
    assert_eq!(q.used_bytes, 400);
    assert_eq!(q.used_inodes, 1);
}

#[test]
fn unaccount_saturates() {
    let mut q = QuotaNode::new(1000, 10);
    q.unaccount(50);
    assert_eq!(q.used_bytes, 0);
    assert_eq!(q.used_inodes, 0);
}
