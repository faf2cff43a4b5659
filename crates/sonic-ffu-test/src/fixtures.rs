//! Test fixtures for common FFU setups
//!
//! Provides a switch, a small geometry, a two-slice DMAC chain and rule
//! builders, plus [`TestEngine`] tying an engine to a recording backend.

use std::sync::Arc;

use sonic_ffu::{
    FfuAction, FfuConfig, FfuEngine, FfuResult, FfuRule, FfuSliceInfo, FfuSliceKey,
    RegisterAccess,
};
use tracing::debug;

use crate::recording::RecordingRegisters;

/// Switch and configuration fixtures
pub mod switch_fixtures {
    use sonic_ffu::{FfuConfig, StaticGlortMap, SwitchFamily, SwitchInfo};

    pub fn fm6000() -> SwitchInfo {
        SwitchInfo::new(0, SwitchFamily::Fm6000)
    }

    /// Full slice count with a shallow TCAM, cache enabled.
    pub fn small_config() -> FfuConfig {
        let mut config = FfuConfig::default();
        config.geometry.rules_per_slice = 64;
        config
    }

    pub fn uncached_config() -> FfuConfig {
        let mut config = small_config();
        config.cache.enabled = false;
        config
    }

    /// Logical ports 1..=4 on glorts 0x100..=0x103.
    pub fn glort_map() -> StaticGlortMap {
        (1..=4u32).fold(StaticGlortMap::new(), |map, port| {
            map.with_port(port, 0x100 + port as u16 - 1)
        })
    }
}

/// Slice chain fixtures
pub mod chain_fixtures {
    use sonic_ffu::{generic, FfuSliceInfo, ScenarioBinding, SliceChain, SliceSelects};

    /// Scenario the DMAC chain is bound to.
    pub const DMAC_SCENARIO: usize = 3;

    /// Destination MAC plus EtherType, top mux unused.
    pub fn dmac_selects() -> SliceSelects {
        SliceSelects::new(
            [
                generic::DMAC_15_0,
                generic::DMAC_31_16,
                generic::DMAC_47_32,
                generic::ETHER_TYPE,
            ],
            generic::NONE,
        )
    }

    /// Slices 0 and 1 as conditions, action on slice 1.
    pub fn dmac_chain() -> FfuSliceInfo {
        FfuSliceInfo::new(SliceChain::new(0, 1, 1)).with_selects(vec![dmac_selects(); 2])
    }

    pub fn dmac_binding() -> ScenarioBinding {
        ScenarioBinding::new(dmac_chain(), 1u64 << DMAC_SCENARIO)
    }

    /// Single condition slice cascading its action into two more slices.
    pub fn cascade_chain(first: usize) -> FfuSliceInfo {
        FfuSliceInfo::new(SliceChain::new(first, first, first + 2))
            .with_selects(vec![SliceSelects::new([generic::VLAN_ID, 0, 0, 0], generic::PROT)])
    }
}

/// Rule and action fixtures
pub mod rule_fixtures {
    use sonic_ffu::{
        FfuAction, FfuActionKind, FfuFlags, FfuRule, FfuSliceInfo, FfuSliceKey, FlagOp,
    };

    /// All 40 key bits.
    pub const FULL_MASK: u64 = (1 << 40) - 1;

    pub fn drop_action() -> FfuAction {
        FfuAction::new(FfuActionKind::SetFlags(FfuFlags {
            drop: FlagOp::Set,
            ..Default::default()
        }))
    }

    /// Action carrying `value` in the user field, distinguishable per rule.
    pub fn user_action(value: u8) -> FfuAction {
        FfuAction::new(FfuActionKind::SetUser { mask: 0xFF, value })
    }

    /// Rule matching `tag` exactly on every condition slice.
    pub fn exact_rule(info: &FfuSliceInfo, tag: u64, action: FfuAction, valid: bool) -> FfuRule {
        FfuRule::new(
            vec![FfuSliceKey::new(tag, FULL_MASK); info.chain.condition_count()],
            vec![action; info.chain.action_count()],
            valid,
        )
    }

    /// Disabled match-all rule, used to blank rows.
    pub fn blank_rule(info: &FfuSliceInfo) -> FfuRule {
        FfuRule::new(
            vec![FfuSliceKey::any(); info.chain.condition_count()],
            vec![FfuAction::nop(); info.chain.action_count()],
            false,
        )
    }

    /// Lookup keys a packet tagged with `tag` presents to every condition
    /// slice of `info`.
    pub fn packet(info: &FfuSliceInfo, tag: u64) -> Vec<u64> {
        vec![tag & FULL_MASK; info.chain.condition_count()]
    }
}

/// An [`FfuEngine`] over a [`RecordingRegisters`] backend.
pub struct TestEngine {
    pub regs: Arc<RecordingRegisters>,
    pub engine: FfuEngine,
}

impl TestEngine {
    pub fn new() -> FfuResult<Self> {
        Self::with_config(switch_fixtures::small_config())
    }

    pub fn with_config(config: FfuConfig) -> FfuResult<Self> {
        let regs = Arc::new(RecordingRegisters::new());
        let hw: Arc<dyn RegisterAccess> = regs.clone();
        let engine = FfuEngine::new(
            switch_fixtures::fm6000(),
            config,
            hw,
            Arc::new(switch_fixtures::glort_map()),
        )?;
        debug!(?config, "Test engine ready");
        Ok(Self { regs, engine })
    }

    /// Writes disabled match-all rules to rows `0..rows` and clears the
    /// call log. Returns the number of register write calls issued.
    pub fn blank_rows(&self, info: &FfuSliceInfo, rows: usize) -> FfuResult<usize> {
        let before = self.regs.write_count();
        let blanks = vec![rule_fixtures::blank_rule(info); rows];
        self.engine.set_rules(info, 0, &blanks, false)?;
        let writes = self.regs.write_count() - before;
        self.regs.clear_calls();
        Ok(writes)
    }

    /// Writes `rule` at `index` without the live sequence.
    pub fn install(&self, info: &FfuSliceInfo, index: usize, rule: &FfuRule) -> FfuResult<()> {
        self.engine.set_rule(info, index, rule, false)
    }

    /// Encoded SRAM words of `action`.
    pub fn action_words(&self, action: &FfuAction) -> FfuResult<[u32; 2]> {
        self.engine.encode_action(action)
    }

    /// Reads back a rule's keys without consulting the cache.
    pub fn hardware_keys(&self, info: &FfuSliceInfo, index: usize) -> FfuResult<Vec<FfuSliceKey>> {
        Ok(self.engine.get_rule(info, index, false)?.keys)
    }
}

impl std::fmt::Debug for TestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestEngine")
            .field("engine", &self.engine)
            .field("regs", &self.regs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TcamRow;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fixtures_are_consistent() {
        let info = chain_fixtures::dmac_chain();
        info.validate_selects(32).unwrap();

        let rule = rule_fixtures::exact_rule(&info, 7, rule_fixtures::drop_action(), true);
        assert_eq!(rule.keys.len(), 2);
        assert_eq!(rule.actions.len(), 1);
        assert_eq!(rule_fixtures::packet(&info, 7), vec![7, 7]);

        chain_fixtures::cascade_chain(4).validate_selects(32).unwrap();
    }

    #[test]
    fn test_engine_blank_rows() {
        let t = TestEngine::new().unwrap();
        let info = chain_fixtures::dmac_chain();
        // Two TCAM rows of four words and one SRAM row of two per rule.
        assert_eq!(t.blank_rows(&info, 4).unwrap(), 4 * (2 * 4 + 2));
        assert_eq!(t.regs.call_count(), 0);

        for rule in 0..4 {
            for slice in info.chain.condition_slices() {
                let row = TcamRow::read(t.regs.registers(), slice, rule);
                assert!(!row.is_valid(), "slice {} rule {}", slice, rule);
            }
        }
        let rules = t.engine.get_rules(&info, 0, 4, false).unwrap();
        assert!(rules.iter().all(|r| !r.valid));
        assert!(rules.iter().all(|r| r.keys.iter().all(|k| k.key_mask == 0)));
    }
}
