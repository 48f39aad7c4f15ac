// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use silo_fsview::MemConfigStore;

fn user(uid: u32, gid: u32, host: &str) -> VirtualIdentity {
    VirtualIdentity::new(uid, gid, format!("u{}", uid), host)
}

#[test]
fn bans_and_allow_mirrors() {
    let policy = AccessPolicy::new();
    policy.ban_user(1001);
    assert!(policy.check(&user(1001, 100, "h.example.org")).is_err());
    assert!(policy.check(&user(1002, 100, "h.example.org")).is_ok());

    policy.ban_domain("bad.org");
    assert!(policy.check(&user(1002, 100, "node.bad.org")).is_err());

    // Non-empty allow set turns absence into a ban.
    policy.allow_user(1002);
    assert!(policy.check(&user(1003, 100, "h.example.org")).is_err());
    assert!(policy.check(&user(1002, 100, "h.example.org")).is_ok());
}

#[test]
fn admin_bypasses_everything() {
    let policy = AccessPolicy::new();
    policy.ban_user(0);
    assert!(policy.check(&VirtualIdentity::root()).is_ok());
    assert!(policy.stall_for(&VirtualIdentity::root(), true).is_none());
}

#[test]
fn stall_booleans_track_rules() {
    let policy = AccessPolicy::new();
    policy.set_stall_rule("*", Some(StallEntry { value: "100".into(), comment: "boot".into() }));
    policy.read(|r| {
        assert!(r.stall_global);
        assert!(!r.stall_read && !r.stall_write && !r.stall_user_group);
    });

    policy.set_stall_rule("r:*", Some(StallEntry { value: "5".into(), comment: String::new() }));
    policy.set_stall_rule(
        "rate:user:42:FindFiles",
        Some(StallEntry { value: "1000".into(), comment: String::new() }),
    );
    policy.read(|r| {
        assert!(r.stall_read);
        assert!(r.stall_user_group);
    });

    policy.set_stall_rule("*", None);
    policy.set_stall_rule("r:*", None);
    policy.set_stall_rule("rate:user:42:FindFiles", None);
    policy.read(|r| {
        assert!(!r.stall_global && !r.stall_read && !r.stall_write && !r.stall_user_group);
    });
}

#[test]
fn set_stall_rule_returns_previous() {
    let policy = AccessPolicy::new();
    let prev = policy
        .set_stall_rule("*", Some(StallEntry { value: "100".into(), comment: "boot".into() }));
    assert!(!prev.existed);
    assert!(!prev.was_global);

    let prev =
        policy.set_stall_rule("*", Some(StallEntry { value: "60".into(), comment: "new".into() }));
    assert!(prev.existed);
    assert_eq!(prev.value, "100");
    assert_eq!(prev.comment, "boot");
    assert!(prev.was_global);

    // Restore from the previous rule.
    policy.set_stall_rule("*", Some(StallEntry { value: prev.value, comment: prev.comment }));
    policy.read(|r| assert_eq!(r.stall_rules["*"].value, "100"));
}

#[test]
fn stall_lookup_order() {
    let policy = AccessPolicy::new();
    policy.set_stall_rule("w:*", Some(StallEntry { value: "30".into(), comment: "wr".into() }));
    let vid = user(1001, 100, "h");

    assert_eq!(policy.stall_for(&vid, true), Some((30, "wr".into())));
    assert!(policy.stall_for(&vid, false).is_none());

    // Global rule wins over the directional one.
    policy.set_stall_rule("*", Some(StallEntry { value: "100".into(), comment: "all".into() }));
    assert_eq!(policy.stall_for(&vid, true), Some((100, "all".into())));
}

#[test]
fn find_limits_first_hit_wins() {
    let policy = AccessPolicy::new();
    policy.set_stall_rule(
        "rate:user:*:FindFiles",
        Some(StallEntry { value: "100".into(), comment: String::new() }),
    );
    policy.set_stall_rule(
        "rate:group:100:FindFiles",
        Some(StallEntry { value: "500".into(), comment: String::new() }),
    );
    policy.set_stall_rule(
        "rate:user:1001:FindFiles",
        Some(StallEntry { value: "9".into(), comment: String::new() }),
    );
    policy.set_stall_rule(
        "rate:user:*:FindDirs",
        Some(StallEntry { value: "50".into(), comment: String::new() }),
    );

    assert_eq!(policy.find_limits(&user(1001, 100, "h")), (Some(9), Some(50)));
    assert_eq!(policy.find_limits(&user(1002, 100, "h")), (Some(500), Some(50)));
    assert_eq!(policy.find_limits(&user(1002, 101, "h")), (Some(100), Some(50)));
    assert_eq!(policy.find_limits(&VirtualIdentity::root()), (None, None));
}

#[test]
fn config_roundtrip_is_identity() {
    let policy = AccessPolicy::new();
    policy.ban_user(10);
    policy.ban_user(20);
    policy.ban_group(7);
    policy.ban_host("evil.host");
    policy.allow_user(30);
    policy.set_stall_rule(
        "*",
        Some(StallEntry { value: "100".into(), comment: "boot, phase ~1".into() }),
    );
    policy.set_stall_rule(
        "rate:user:42:FindFiles",
        Some(StallEntry { value: "1000".into(), comment: String::new() }),
    );
    policy.set_redirect_rule(
        "w:*",
        Some(RedirectEntry { target: "root://master:1094".into(), comment: "to master".into() }),
    );

    let store = MemConfigStore::new();
    policy.store_access_config(&store);

    let restored = AccessPolicy::new();
    restored.apply_access_config(&store);

    policy.read(|a| {
        restored.read(|b| {
            assert_eq!(a.banned_users, b.banned_users);
            assert_eq!(a.banned_groups, b.banned_groups);
            assert_eq!(a.banned_hosts, b.banned_hosts);
            assert_eq!(a.allowed_users, b.allowed_users);
            assert_eq!(a.stall_rules, b.stall_rules);
            assert_eq!(a.redirect_rules, b.redirect_rules);
            assert_eq!(a.stall_global, b.stall_global);
            assert_eq!(a.stall_user_group, b.stall_user_group);
        });
    });
}

#[test]
fn comment_escaping_in_stored_form() {
    let policy = AccessPolicy::new();
    policy.set_stall_rule(
        "*",
        Some(StallEntry { value: "1".into(), comment: "a,b~c".into() }),
    );
    let store = MemConfigStore::new();
    policy.store_access_config(&store);

    let raw = store.load("access:stall").unwrap();
    assert!(raw.contains("_#KOMMA#_"));
    assert!(raw.contains("_#TILDE#_"));
    assert!(!raw.contains("a,b"));

    let restored = AccessPolicy::new();
    restored.apply_access_config(&store);
    restored.read(|r| assert_eq!(r.stall_rules["*"].comment, "a,b~c"));
}

#[test]
fn reset_clears_all() {
    let policy = AccessPolicy::new();
    policy.ban_user(1);
    policy.set_stall_rule("*", Some(StallEntry { value: "1".into(), comment: String::new() }));
    policy.reset();
    policy.read(|r| {
        assert!(r.banned_users.is_empty());
        assert!(r.stall_rules.is_empty());
        assert!(!r.stall_global);
    });
}
