//! Atomic transaction tests

use pretty_assertions::assert_eq;
use swcfg_common::{InterpState, ResultCode};
use swcfg_test::{assert_ret, bridge_fixtures, policer_fixtures, CallVerifier, TestEngine};

#[test]
fn test_commit_applies_in_dependency_order() {
    let mut t = TestEngine::new();
    let script = policer_fixtures::policer("p", &["a1"])
        .then(bridge_fixtures::bridge_with_l2("br0", "l2", 1))
        .atomic();
    t.script(&script).unwrap();

    let verifier = CallVerifier::new(t.dataplane.calls());
    verifier
        .assert_order("policer_action_create :a1", "policer_create :p")
        .unwrap();
    verifier
        .assert_order("l2_bridge_create :l2", "bridge_create :br0")
        .unwrap();
    assert_eq!(t.engine.state(), InterpState::AutoCommit);
    assert!(t.engine.stores().policer_actions.find(":a1").unwrap().is_used);
}

#[test]
fn test_commit_failure_rolls_back_every_object() {
    let mut t = TestEngine::new();
    t.script(&bridge_fixtures::bridge("br0", 1)).unwrap();
    t.dataplane
        .fail_always("bridge_create", ":br9", ResultCode::AnyFailures);

    t.ok("atomic begin").unwrap();
    t.ok("bridge br0 config -dpid 2").unwrap();
    t.ok("l2-bridge l2 create").unwrap();
    t.ok("bridge br9 create -l2-bridge l2").unwrap();
    assert_ret(&t.run("atomic commit").unwrap(), "ANY_FAILURES").unwrap();

    let stores = t.engine.stores();
    let br0 = stores.bridges.find(":br0").unwrap();
    assert_eq!(br0.current.as_ref().map(|a| a.dpid), Some(1));
    assert!(br0.modified.is_none());
    assert!(!stores.bridges.contains(":br9"));
    assert!(!stores.l2_bridges.contains(":l2"));
    assert_eq!(t.engine.state(), InterpState::AutoCommit);
    assert!(!t.dataplane.soft().is_bridge_running(":br9"));
}

#[test]
fn test_failed_rollback_reloads_snapshot() {
    let mut t = TestEngine::new();
    t.script(&bridge_fixtures::bridge("br0", 1)).unwrap();
    // Fails the commit and the rollback re-create; the reload succeeds.
    t.dataplane
        .fail_times("bridge_create", ":br0", ResultCode::AnyFailures, 2);

    t.ok("atomic begin").unwrap();
    t.ok("bridge br0 config -dpid 2").unwrap();
    assert_ret(&t.run("atomic commit").unwrap(), "ANY_FAILURES").unwrap();

    assert_eq!(t.engine.state(), InterpState::AutoCommit);
    let br0 = t.engine.stores().bridges.find(":br0").unwrap();
    assert_eq!(br0.current.as_ref().map(|a| a.dpid), Some(1));
    assert!(br0.modified.is_none());
    assert_eq!(t.dataplane.calls_of("bridge_create").len(), 4);
}

#[test]
fn test_abort_restores_used_flags() {
    let mut t = TestEngine::new();
    t.script(&policer_fixtures::policer("p", &["a1"])).unwrap();
    t.script(&policer_fixtures::action("a2")).unwrap();
    t.dataplane.clear_calls();

    t.ok("atomic begin").unwrap();
    t.ok("policer p config -action a2").unwrap();
    {
        let actions = &t.engine.stores().policer_actions;
        assert!(actions.find(":a2").unwrap().is_used);
    }
    t.ok("atomic abort").unwrap();

    let actions = &t.engine.stores().policer_actions;
    assert!(actions.find(":a1").unwrap().is_used);
    assert!(!actions.find(":a2").unwrap().is_used);
    assert!(t.dataplane.calls().is_empty());
}

#[test]
fn test_deferred_destroy() {
    let mut t = TestEngine::new();
    t.script(&bridge_fixtures::bridge("br0", 1)).unwrap();

    t.ok("atomic begin").unwrap();
    t.ok("bridge br0 destroy").unwrap();
    assert_ret(&t.run("bridge br0").unwrap(), "NOT_FOUND").unwrap();
    assert!(t.engine.stores().bridges.contains(":br0"));
    t.ok("atomic commit").unwrap();

    assert!(!t.engine.stores().bridges.contains(":br0"));
    CallVerifier::new(t.dataplane.calls())
        .assert_called("bridge_destroy :br0")
        .unwrap();
}

#[test]
fn test_transaction_commands_need_matching_state() {
    let mut t = TestEngine::new();
    assert_ret(&t.run("atomic commit").unwrap(), "INVALID_STATE_TRANSITION").unwrap();
    t.ok("atomic begin").unwrap();
    assert_ret(&t.run("atomic begin").unwrap(), "INVALID_STATE_TRANSITION").unwrap();
    assert_ret(&t.run("namespace add ns1").unwrap(), "INVALID_STATE_TRANSITION").unwrap();
    t.ok("atomic rollback-force").unwrap();
    assert_eq!(t.engine.state(), InterpState::AutoCommit);
}

#[test]
fn test_rolled_back_enable_leaves_bridge_stopped() {
    let mut t = TestEngine::new();
    t.script(&bridge_fixtures::bridge("br0", 1)).unwrap();
    t.dataplane
        .fail_always("bridge_create", ":br9", ResultCode::AnyFailures);

    t.ok("atomic begin").unwrap();
    t.ok("bridge br0 enable").unwrap();
    t.ok("bridge br9 create").unwrap();
    assert_ret(&t.run("atomic commit").unwrap(), "ANY_FAILURES").unwrap();

    let br0 = t.engine.stores().bridges.find(":br0").unwrap();
    assert!(!br0.is_enabled);
    assert!(!br0.is_enabling);
    assert!(!t.dataplane.soft().is_bridge_running(":br0"));
    CallVerifier::new(t.dataplane.calls())
        .assert_order("bridge_start :br0", "bridge_stop :br0")
        .unwrap();
}

#[test]
fn test_rolled_back_destroy_keeps_bridge_running() {
    let mut t = TestEngine::new();
    t.script(&bridge_fixtures::bridge("br0", 1).line("bridge br0 enable"))
        .unwrap();
    t.dataplane
        .fail_always("bridge_create", ":br9", ResultCode::AnyFailures);

    t.ok("atomic begin").unwrap();
    t.ok("bridge br0 destroy").unwrap();
    t.ok("bridge br9 create").unwrap();
    assert_ret(&t.run("atomic commit").unwrap(), "ANY_FAILURES").unwrap();

    let br0 = t.engine.stores().bridges.find(":br0").unwrap();
    assert!(br0.is_enabled);
    assert!(!br0.is_destroying);
    assert!(!br0.is_disabling);
    assert!(t.dataplane.soft().is_bridge_running(":br0"));
    assert_eq!(t.run("bridge br0").unwrap()["data"][0]["is-enabled"], true);
}

#[test]
fn test_rolled_back_enable_stops_l2_bridge() {
    let mut t = TestEngine::new();
    t.script(&bridge_fixtures::bridge_with_l2("br0", "l2", 1))
        .unwrap();
    t.dataplane
        .fail_always("bridge_create", ":br9", ResultCode::AnyFailures);

    t.ok("atomic begin").unwrap();
    t.ok("bridge br0 enable").unwrap();
    t.ok("bridge br9 create").unwrap();
    assert_ret(&t.run("atomic commit").unwrap(), "ANY_FAILURES").unwrap();

    let stores = t.engine.stores();
    assert!(!stores.bridges.find(":br0").unwrap().is_enabled);
    let l2 = stores.l2_bridges.find(":l2").unwrap();
    assert!(!l2.is_enabled);
    assert!(l2.is_used);
    assert!(!t.dataplane.soft().is_l2_bridge_running(":l2"));
    CallVerifier::new(t.dataplane.calls())
        .assert_order("l2_bridge_start :l2", "l2_bridge_stop :l2")
        .unwrap();
}
