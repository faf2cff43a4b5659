//! Rule write, read-back and enable/disable against a two-slice DMAC chain.

use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use sonic_ffu::{
    FfuAction, FfuActionKind, FfuError, FfuRule, FfuSliceInfo, FfuSliceKey, RegKey,
    ScenarioBinding, SliceChain,
};
use sonic_ffu_test::{
    chain_fixtures, init_test_logging, lookup, rule_fixtures, RegisterCall, TestEngine,
};

fn dmac_rule(valid: bool) -> FfuRule {
    FfuRule::new(
        vec![FfuSliceKey::new(0x1, 0x1), FfuSliceKey::any()],
        vec![rule_fixtures::drop_action()],
        valid,
    )
}

#[test]
fn test_dmac_rule_round_trip() {
    init_test_logging();
    let t = TestEngine::new().unwrap();
    let info = chain_fixtures::dmac_chain();
    t.engine.configure_slice(&chain_fixtures::dmac_binding()).unwrap();
    t.blank_rows(&info, 4).unwrap();

    let rule = dmac_rule(true);
    t.engine.set_rule(&info, 0, &rule, true).unwrap();
    assert_eq!(t.engine.get_rule(&info, 0, true).unwrap(), rule);
    assert_eq!(t.engine.get_rule(&info, 0, false).unwrap(), rule);

    let drop_words = t.action_words(&rule_fixtures::drop_action()).unwrap();
    let hit = lookup(t.regs.registers(), info.chain, 4, &[0x1, 0xABCD]).unwrap();
    assert_eq!(hit.rule, 0);
    assert_eq!(hit.actions, vec![drop_words]);
    assert_eq!(lookup(t.regs.registers(), info.chain, 4, &[0x2, 0]), None);
}

#[test]
fn test_disable_and_reenable() {
    let t = TestEngine::new().unwrap();
    let info = chain_fixtures::dmac_chain();
    t.blank_rows(&info, 4).unwrap();
    let rule = dmac_rule(true);
    t.engine.set_rule(&info, 0, &rule, true).unwrap();

    t.engine.set_rule_valid(&info, 0, false, true).unwrap();
    let disabled = t.engine.get_rule(&info, 0, false).unwrap();
    assert!(!disabled.valid);
    assert_eq!(disabled.keys, rule.keys);
    assert_eq!(disabled.actions, rule.actions);
    assert_eq!(lookup(t.regs.registers(), info.chain, 4, &[0x1, 0]), None);

    t.engine.set_rule_valid(&info, 0, true, true).unwrap();
    assert_eq!(t.engine.get_rule(&info, 0, false).unwrap(), rule);
    assert_eq!(
        lookup(t.regs.registers(), info.chain, 4, &[0x1, 0]).map(|h| h.rule),
        Some(0)
    );
}

#[test]
fn test_set_valid_twice_writes_once() {
    let t = TestEngine::new().unwrap();
    let info = chain_fixtures::dmac_chain();
    t.engine.set_rule(&info, 0, &dmac_rule(true), false).unwrap();
    t.regs.clear_calls();

    t.engine.set_rule_valid(&info, 0, true, true).unwrap();
    assert_eq!(t.regs.call_count(), 0);

    t.engine.set_rule_valid(&info, 0, false, true).unwrap();
    let writes = t.regs.write_count();
    assert!(writes > 0);
    t.engine.set_rule_valid(&info, 0, false, true).unwrap();
    assert_eq!(t.regs.write_count(), writes);
}

#[test]
fn test_invalid_chain_touches_nothing() {
    let t = TestEngine::new().unwrap();
    let info = FfuSliceInfo::new(SliceChain::new(5, 2, 5));
    let rule = FfuRule::new(vec![], vec![FfuAction::nop()], true);

    assert!(matches!(
        t.engine.set_rule(&info, 0, &rule, false),
        Err(FfuError::InvalidSlice { .. })
    ));
    assert!(matches!(
        t.engine.get_rule(&info, 0, false),
        Err(FfuError::InvalidSlice { .. })
    ));
    assert!(matches!(
        t.engine.move_rules(&info, 0, 1, 2),
        Err(FfuError::InvalidSlice { .. })
    ));
    assert!(t
        .engine
        .configure_slice(&ScenarioBinding::new(info, 1))
        .is_err());
    assert_eq!(t.regs.call_count(), 0);
}

#[test]
fn test_bad_rule_shape_touches_nothing() {
    let t = TestEngine::new().unwrap();
    let info = chain_fixtures::dmac_chain();

    let mut short = dmac_rule(true);
    short.keys.pop();
    assert!(matches!(
        t.engine.set_rule(&info, 0, &short, false),
        Err(FfuError::InvalidArgument { .. })
    ));

    let beyond = t.engine.config().geometry.rules_per_slice;
    assert!(matches!(
        t.engine.set_rule(&info, beyond, &dmac_rule(true), false),
        Err(FfuError::InvalidArgument { .. })
    ));

    // Second rule in the batch has an unknown port: nothing is written.
    let bad_route = FfuRule::new(
        vec![FfuSliceKey::any(); 2],
        vec![FfuAction::new(FfuActionKind::RouteLogicalPort { port: 99 })],
        true,
    );
    assert!(t
        .engine
        .set_rules(&info, 0, &[dmac_rule(true), bad_route], false)
        .is_err());
    assert_eq!(t.regs.call_count(), 0);
}

#[test]
fn test_non_live_writes_actions_before_keys() {
    let t = TestEngine::new().unwrap();
    let info = chain_fixtures::dmac_chain();
    t.engine.set_rule(&info, 2, &dmac_rule(true), false).unwrap();

    let sram = RegKey::sram(1, 2).address(0);
    let tcam = RegKey::tcam(0, 2).address(0);
    let calls = t.regs.calls();
    let position = |addr: u32| calls.iter().position(|c| c.written().contains(&addr));
    assert!(position(sram).unwrap() < position(tcam).unwrap());
}

#[test]
fn test_live_overwrite_never_mixes_rules() {
    let t = TestEngine::new().unwrap();
    let info = chain_fixtures::dmac_chain();
    t.blank_rows(&info, 2).unwrap();

    let old_action = rule_fixtures::user_action(0x11);
    let new_action = rule_fixtures::user_action(0x22);
    let old_words = t.action_words(&old_action).unwrap();
    let new_words = t.action_words(&new_action).unwrap();
    t.install(&info, 0, &rule_fixtures::exact_rule(&info, 0x5, old_action, true))
        .unwrap();

    let violations = Arc::new(Mutex::new(Vec::new()));
    let seen = violations.clone();
    let chain = info.chain;
    let (old_packet, new_packet) = (rule_fixtures::packet(&info, 0x5), rule_fixtures::packet(&info, 0x6));
    t.regs.set_observer(move |regs| {
        if let Some(hit) = lookup(regs, chain, 2, &old_packet) {
            if hit.actions != vec![old_words] {
                seen.lock().push(format!("old packet saw {:?}", hit));
            }
        }
        if let Some(hit) = lookup(regs, chain, 2, &new_packet) {
            if hit.actions != vec![new_words] {
                seen.lock().push(format!("new packet saw {:?}", hit));
            }
        }
    });

    let replacement = rule_fixtures::exact_rule(&info, 0x6, new_action, true);
    t.engine.set_rule(&info, 0, &replacement, true).unwrap();
    t.regs.clear_observer();

    assert_eq!(*violations.lock(), Vec::<String>::new());
    assert_eq!(t.engine.get_rule(&info, 0, false).unwrap(), replacement);
    assert!(t
        .regs
        .calls()
        .iter()
        .all(|c| !matches!(c, RegisterCall::Sequence { .. })));
}
