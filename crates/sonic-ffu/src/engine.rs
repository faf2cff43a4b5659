//! Per-switch FFU engine.
//!
//! [`FfuEngine`] binds the register cache, slice configuration and rule
//! engine to one switch. Every operation first checks that the switch is
//! up; marking it down drops the register cache since the hardware may be
//! reset behind our back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::action::FfuAction;
use crate::cache::RegisterCache;
use crate::config::FfuConfig;
use crate::error::{FfuError, FfuResult};
use crate::hw::{GlortResolver, RegisterAccess, SwitchInfo};
use crate::mux::{MuxPosition, MuxSelectMap};
use crate::rule::RuleEngine;
use crate::slice::{SliceConfigManager, SliceScenarioConfig};
use crate::types::{FfuRule, FfuSliceInfo, ScenarioBinding, SliceOwner};

pub struct FfuEngine {
    switch: SwitchInfo,
    config: FfuConfig,
    cache: Arc<RegisterCache>,
    slices: SliceConfigManager,
    rules: RuleEngine,
    up: AtomicBool,
}

impl FfuEngine {
    /// Creates an engine with the standard mux selector table.
    pub fn new(
        switch: SwitchInfo,
        config: FfuConfig,
        hw: Arc<dyn RegisterAccess>,
        glorts: Arc<dyn GlortResolver>,
    ) -> FfuResult<Self> {
        Self::with_mux_map(switch, config, hw, glorts, Arc::new(MuxSelectMap::standard()))
    }

    pub fn with_mux_map(
        switch: SwitchInfo,
        config: FfuConfig,
        hw: Arc<dyn RegisterAccess>,
        glorts: Arc<dyn GlortResolver>,
        mux: Arc<MuxSelectMap>,
    ) -> FfuResult<Self> {
        config.validate()?;
        if !switch.family.has_ffu_slices() {
            return Err(FfuError::UnsupportedSwitchType {
                family: switch.family.to_string(),
            });
        }

        let cache = Arc::new(RegisterCache::new(hw));
        let slices = SliceConfigManager::new(config.geometry, cache.clone(), mux);
        let rules = RuleEngine::new(config.geometry, cache.clone(), glorts, config.cache.enabled);

        info!(
            switch_id = switch.switch_id,
            family = %switch.family,
            slices = config.geometry.slice_count,
            rules_per_slice = config.geometry.rules_per_slice,
            "FFU engine created"
        );

        Ok(Self {
            switch,
            config,
            cache,
            slices,
            rules,
            up: AtomicBool::new(true),
        })
    }

    pub fn switch_info(&self) -> SwitchInfo {
        self.switch
    }

    pub fn config(&self) -> &FfuConfig {
        &self.config
    }

    pub fn register_cache(&self) -> &RegisterCache {
        &self.cache
    }

    pub fn mux_map(&self) -> &MuxSelectMap {
        self.slices.mux_map()
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    /// Marks the switch up or down. Going down invalidates the register
    /// cache.
    pub fn set_switch_up(&self, up: bool) {
        let was_up = self.up.swap(up, Ordering::SeqCst);
        if was_up && !up {
            warn!(switch_id = self.switch.switch_id, "Switch down, dropping FFU register cache");
            self.cache.invalidate_all();
        } else if !was_up && up {
            info!(switch_id = self.switch.switch_id, "Switch up");
        }
    }

    /// Drops all cached register state after an out-of-band reset.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate_all();
    }

    fn ensure_up(&self) -> FfuResult<()> {
        if self.is_up() {
            Ok(())
        } else {
            Err(FfuError::InvalidSwitch {
                switch_id: self.switch.switch_id,
            })
        }
    }

    // Ownership

    pub fn set_slice_ownership(&self, first: usize, last: usize, owner: SliceOwner) -> FfuResult<()> {
        self.ensure_up()?;
        self.slices.set_slice_ownership(first, last, owner)
    }

    pub fn get_slice_ownership(&self, owner: SliceOwner) -> FfuResult<(usize, usize)> {
        self.ensure_up()?;
        self.slices.get_slice_ownership(owner)
    }

    pub fn get_slice_owner(&self, slice: usize) -> FfuResult<SliceOwner> {
        self.ensure_up()?;
        self.slices.get_slice_owner(slice)
    }

    // Slice configuration

    pub fn map_generic_select(&self, generic: u8, position: MuxPosition) -> FfuResult<u8> {
        self.slices.map_generic_select(generic, position)
    }

    pub fn configure_slice(&self, binding: &ScenarioBinding) -> FfuResult<()> {
        self.ensure_up()?;
        self.slices.configure_slice(binding, self.config.cache.enabled)
    }

    pub fn unconfigure_slice(&self, binding: &ScenarioBinding) -> FfuResult<()> {
        self.ensure_up()?;
        self.slices.unconfigure_slice(binding, self.config.cache.enabled)
    }

    pub fn get_slice_config(
        &self,
        slice: usize,
        scenario: usize,
        use_cache: bool,
    ) -> FfuResult<SliceScenarioConfig> {
        self.ensure_up()?;
        self.slices.get_slice_config(slice, scenario, use_cache)
    }

    pub fn get_cascade_action(&self, slice: usize, use_cache: bool) -> FfuResult<u64> {
        self.ensure_up()?;
        self.slices.get_cascade_action(slice, use_cache)
    }

    pub fn set_master_valid(&self, ingress: u32, egress: u32, use_cache: bool) -> FfuResult<()> {
        self.ensure_up()?;
        self.slices.set_master_valid(ingress, egress, use_cache)
    }

    pub fn get_master_valid(&self, use_cache: bool) -> FfuResult<(u32, u32)> {
        self.ensure_up()?;
        self.slices.get_master_valid(use_cache)
    }

    // Rules

    pub fn set_rule(&self, info: &FfuSliceInfo, index: usize, rule: &FfuRule, live: bool) -> FfuResult<()> {
        self.ensure_up()?;
        self.rules
            .set_rule(info, index, rule, live, self.config.cache.enabled)
    }

    pub fn set_rules(
        &self,
        info: &FfuSliceInfo,
        first: usize,
        rules: &[FfuRule],
        live: bool,
    ) -> FfuResult<()> {
        self.ensure_up()?;
        self.rules
            .set_rules(info, first, rules, live, self.config.cache.enabled)
    }

    pub fn get_rule(&self, info: &FfuSliceInfo, index: usize, use_cache: bool) -> FfuResult<FfuRule> {
        self.ensure_up()?;
        self.rules.get_rule(info, index, use_cache)
    }

    pub fn get_rules(
        &self,
        info: &FfuSliceInfo,
        first: usize,
        n: usize,
        use_cache: bool,
    ) -> FfuResult<Vec<FfuRule>> {
        self.ensure_up()?;
        self.rules.get_rules(info, first, n, use_cache)
    }

    pub fn set_rule_valid(
        &self,
        info: &FfuSliceInfo,
        index: usize,
        valid: bool,
        use_cache: bool,
    ) -> FfuResult<()> {
        self.ensure_up()?;
        self.rules.set_rule_valid(info, index, valid, use_cache)
    }

    pub fn move_rules(&self, info: &FfuSliceInfo, from: usize, n: usize, to: usize) -> FfuResult<()> {
        self.ensure_up()?;
        self.rules.move_rules(info, from, n, to)
    }

    pub fn copy_rules(
        &self,
        info: &FfuSliceInfo,
        from: usize,
        n: usize,
        to: usize,
        live: bool,
    ) -> FfuResult<()> {
        self.ensure_up()?;
        self.rules.copy_rules(info, from, n, to, live)
    }

    // Actions

    pub fn encode_action(&self, action: &FfuAction) -> FfuResult<[u32; 2]> {
        self.rules.encode_action(action)
    }

    pub fn decode_action(&self, words: [u32; 2]) -> FfuResult<FfuAction> {
        self.rules.decode_action(words)
    }
}

impl std::fmt::Debug for FfuEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfuEngine")
            .field("switch", &self.switch)
            .field("config", &self.config)
            .field("up", &self.is_up())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::{MemoryRegisters, StaticGlortMap, SwitchFamily};
    use crate::regs::RegKey;

    fn engine(family: SwitchFamily) -> FfuResult<FfuEngine> {
        FfuEngine::new(
            SwitchInfo::new(0, family),
            FfuConfig::default(),
            Arc::new(MemoryRegisters::new()),
            Arc::new(StaticGlortMap::new()),
        )
    }

    #[test]
    fn test_unsupported_family() {
        assert!(engine(SwitchFamily::Fm6000).is_ok());
        assert!(matches!(
            engine(SwitchFamily::Fm10000),
            Err(FfuError::UnsupportedSwitchType { .. })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = FfuConfig::default();
        config.geometry.slice_count = 0;
        let result = FfuEngine::new(
            SwitchInfo::new(0, SwitchFamily::Fm6000),
            config,
            Arc::new(MemoryRegisters::new()),
            Arc::new(StaticGlortMap::new()),
        );
        assert!(matches!(result, Err(FfuError::Config { .. })));
    }

    #[test]
    fn test_switch_down() {
        let engine = engine(SwitchFamily::Fm6000).unwrap();
        engine.set_master_valid(0x3, 0, true).unwrap();
        assert!(engine.register_cache().cached(RegKey::master_valid()).is_some());

        engine.set_switch_up(false);
        assert_eq!(
            engine.get_master_valid(true).unwrap_err(),
            FfuError::InvalidSwitch { switch_id: 0 }
        );
        assert!(engine.register_cache().cached(RegKey::master_valid()).is_none());

        engine.set_switch_up(true);
        assert_eq!(engine.get_master_valid(true).unwrap(), (0x3, 0));
    }
}
