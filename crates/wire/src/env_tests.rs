// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn parse_and_get() {
    let env = EnvMap::parse("mgm.pcmd=commit&mgm.size=4096&mgm.fid=1000");
    assert_eq!(env.get("mgm.pcmd"), Some("commit"));
    assert_eq!(env.get_u64("mgm.size"), Some(4096));
    assert_eq!(env.get_hex("mgm.fid"), Some(0x1000));
    assert_eq!(env.get("missing"), None);
}

#[test]
fn bare_token_is_empty_value() {
    let env = EnvMap::parse("mgm.dropall&x=1");
    assert!(env.contains("mgm.dropall"));
    assert_eq!(env.get("mgm.dropall"), Some(""));
}

#[test]
fn flags_require_one() {
    let env = EnvMap::parse("a=1&b=0&c=yes");
    assert!(env.flag("a"));
    assert!(!env.flag("b"));
    assert!(!env.flag("c"));
    assert!(!env.flag("missing"));
}

#[test]
fn later_occurrence_wins() {
    let env = EnvMap::parse("k=1&k=2");
    assert_eq!(env.get("k"), Some("2"));
}

#[test]
fn encode_roundtrip() {
    let mut env = EnvMap::new();
    env.set("b", "2").set("a", "1");
    let encoded = env.encode();
    assert_eq!(encoded, "a=1&b=2");
    assert_eq!(EnvMap::parse(&encoded), env);
}
