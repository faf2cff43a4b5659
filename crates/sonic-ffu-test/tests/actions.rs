//! Actions stored across the action slices of a cascading chain.

use pretty_assertions::assert_eq;
use sonic_ffu::{
    ArpType, FfuAction, FfuActionKind, FfuError, FfuFieldSet, FfuRule, FfuSliceKey, VlanTxTag,
};
use sonic_ffu_test::{chain_fixtures, TestEngine};

#[test]
fn test_cascade_actions_round_trip() {
    let t = TestEngine::new().unwrap();
    let info = chain_fixtures::cascade_chain(8);

    let actions = vec![
        FfuAction::new(FfuActionKind::RouteLogicalPort { port: 2 })
            .with_precedence(3)
            .with_counter(1, 77),
        FfuAction::new(FfuActionKind::RouteArp {
            arp_type: ArpType::MinRange,
            count: 16,
            arp_index: 0x200,
        }),
        FfuAction::new(FfuActionKind::SetFields(FfuFieldSet::Vlan {
            vlan: 100,
            tx_tag: VlanTxTag::Add,
            set_pri: true,
            set_vpri: false,
            priority: 5,
        })),
    ];
    let rule = FfuRule::new(vec![FfuSliceKey::new(0x64, 0xFFF)], actions, true);

    t.engine.set_rule(&info, 10, &rule, true).unwrap();
    assert_eq!(t.engine.get_rule(&info, 10, false).unwrap(), rule);
}

#[test]
fn test_flood_and_raw_glort_routes() {
    let t = TestEngine::new().unwrap();

    let flood = FfuAction::new(FfuActionKind::RouteFloodDest { port: 4 });
    let words = t.engine.encode_action(&flood).unwrap();
    assert_eq!(t.engine.decode_action(words).unwrap(), flood);

    // A glort no logical port maps to decodes as a raw glort route.
    let raw = FfuAction::new(FfuActionKind::RouteGlort { glort: 0x7000 });
    let words = t.engine.encode_action(&raw).unwrap();
    assert_eq!(t.engine.decode_action(words).unwrap(), raw);

    // A known glort decodes back to its port.
    let known = FfuAction::new(FfuActionKind::RouteGlort { glort: 0x101 });
    let words = t.engine.encode_action(&known).unwrap();
    assert_eq!(
        t.engine.decode_action(words).unwrap().kind,
        FfuActionKind::RouteLogicalPort { port: 2 }
    );
}

#[test]
fn test_action_range_errors() {
    let t = TestEngine::new().unwrap();

    assert!(matches!(
        t.engine
            .encode_action(&FfuAction::new(FfuActionKind::RouteLogicalPort { port: 42 })),
        Err(FfuError::InvalidPort { port: 42 })
    ));
    let vlan = FfuAction::new(FfuActionKind::SetFields(FfuFieldSet::Vlan {
        vlan: 4096,
        tx_tag: VlanTxTag::Normal,
        set_pri: false,
        set_vpri: false,
        priority: 0,
    }));
    assert!(matches!(
        t.engine.encode_action(&vlan),
        Err(FfuError::InvalidArgument { .. })
    ));
    assert!(t
        .engine
        .encode_action(&FfuAction::nop().with_precedence(8))
        .is_err());
    assert_eq!(t.regs.call_count(), 0);
}
