//! Slice ownership, scenario configuration and master valid.
//!
//! A scenario binding programs one FFU_SLICE_CFG row per (condition slice,
//! scenario) and ORs the scenario bits into the cascade-action mask of every
//! action slice after `key_end`. Unconfiguring only clears those cascade
//! bits; the CFG rows stay behind, unreachable.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::cache::RegisterCache;
use crate::config::GeometryConfig;
use crate::error::{FfuError, FfuResult};
use crate::mux::{MuxPosition, MuxSelectMap, MUX_POSITIONS, MUX_POSITION_COUNT};
use crate::regs::{get_field, join, set_field, slice_cfg, split, RegKey};
use crate::types::{CaseLocation, ScenarioBinding, SliceOwner, SCENARIO_COUNT};

/// Decoded FFU_SLICE_CFG row of one (slice, scenario).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SliceScenarioConfig {
    /// Hardware mux codes for mux0..mux3 and top.
    pub select_codes: [u8; MUX_POSITION_COUNT],
    pub start_compare: bool,
    pub start_action: bool,
    pub valid_low: bool,
    pub valid_high: bool,
    pub case: u8,
    pub case_location: CaseLocation,
}

const SELECT_FIELDS: [(u32, u32); MUX_POSITION_COUNT] = [
    slice_cfg::SELECT0,
    slice_cfg::SELECT1,
    slice_cfg::SELECT2,
    slice_cfg::SELECT3,
    slice_cfg::SELECT_TOP,
];

fn flag(word: u64, f: (u32, u32)) -> bool {
    get_field(word, f.0, f.1) != 0
}

impl SliceScenarioConfig {
    pub fn to_words(&self) -> [u32; 2] {
        let mut word = 0u64;
        for (f, code) in SELECT_FIELDS.iter().zip(self.select_codes) {
            word = set_field(word, f.0, f.1, code as u64);
        }
        let bits = [
            (slice_cfg::START_COMPARE, self.start_compare as u64),
            (slice_cfg::START_ACTION, self.start_action as u64),
            (slice_cfg::VALID_LOW, self.valid_low as u64),
            (slice_cfg::VALID_HIGH, self.valid_high as u64),
            (slice_cfg::CASE, self.case as u64),
            (slice_cfg::CASE_LOCATION, self.case_location.to_raw() as u64),
        ];
        for ((lsb, width), value) in bits {
            word = set_field(word, lsb, width, value);
        }
        split(word)
    }

    pub fn from_words(words: [u32; 2]) -> FfuResult<Self> {
        let word = join(words);
        let raw_location =
            get_field(word, slice_cfg::CASE_LOCATION.0, slice_cfg::CASE_LOCATION.1) as u32;
        let case_location = CaseLocation::from_raw(raw_location).ok_or_else(|| {
            FfuError::invalid_argument(format!("unknown case location {}", raw_location))
        })?;

        let mut select_codes = [0u8; MUX_POSITION_COUNT];
        for (code, f) in select_codes.iter_mut().zip(SELECT_FIELDS) {
            *code = get_field(word, f.0, f.1) as u8;
        }

        Ok(Self {
            select_codes,
            start_compare: flag(word, slice_cfg::START_COMPARE),
            start_action: flag(word, slice_cfg::START_ACTION),
            valid_low: flag(word, slice_cfg::VALID_LOW),
            valid_high: flag(word, slice_cfg::VALID_HIGH),
            case: get_field(word, slice_cfg::CASE.0, slice_cfg::CASE.1) as u8,
            case_location,
        })
    }

    /// Generic selector IDs behind the mux codes, where the map knows them.
    pub fn generic_selects(&self, map: &MuxSelectMap) -> [Option<u8>; MUX_POSITION_COUNT] {
        let mut out = [None; MUX_POSITION_COUNT];
        for (slot, position) in out.iter_mut().zip(MUX_POSITIONS) {
            *slot = map.generic(self.select_codes[position.index()], position);
        }
        out
    }
}

/// Owns slice ownership state and programs scenario configuration.
#[derive(Debug)]
pub struct SliceConfigManager {
    geometry: GeometryConfig,
    cache: Arc<RegisterCache>,
    mux: Arc<MuxSelectMap>,
    owners: RwLock<Vec<SliceOwner>>,
}

impl SliceConfigManager {
    pub fn new(geometry: GeometryConfig, cache: Arc<RegisterCache>, mux: Arc<MuxSelectMap>) -> Self {
        Self {
            owners: RwLock::new(vec![SliceOwner::None; geometry.slice_count]),
            geometry,
            cache,
            mux,
        }
    }

    pub fn mux_map(&self) -> &MuxSelectMap {
        &self.mux
    }

    /// Hardware code for a generic selector at a mux position.
    pub fn map_generic_select(&self, generic: u8, position: MuxPosition) -> FfuResult<u8> {
        self.mux
            .hw_code(generic, position)
            .ok_or(FfuError::InvalidMuxSelect { generic, position })
    }

    fn check_slice(&self, slice: usize) -> FfuResult<()> {
        if slice >= self.geometry.slice_count {
            return Err(FfuError::invalid_slice(format!(
                "slice {} outside the {} configured slices",
                slice, self.geometry.slice_count
            )));
        }
        Ok(())
    }

    /// Claims `first..=last` for `owner`, or releases it when `owner` is
    /// `None`. Nothing changes if any slice is held by another owner.
    pub fn set_slice_ownership(&self, first: usize, last: usize, owner: SliceOwner) -> FfuResult<()> {
        if first > last {
            return Err(FfuError::invalid_slice(format!(
                "first slice {} > last slice {}",
                first, last
            )));
        }
        self.check_slice(last)?;

        let mut owners = self.owners.write();
        if owner != SliceOwner::None {
            if let Some((slice, current)) = owners[first..=last]
                .iter()
                .enumerate()
                .find(|(_, o)| **o != SliceOwner::None && **o != owner)
            {
                return Err(FfuError::ResourceOwned {
                    slice: first + slice,
                    owner: *current,
                });
            }
        }

        if owners[first..=last].iter().all(|o| *o == owner) {
            debug!(first, last, %owner, "Slice ownership unchanged");
            return Ok(());
        }
        owners[first..=last].fill(owner);
        info!(first, last, %owner, "Set slice ownership");
        Ok(())
    }

    /// Lowest and highest slice held by `owner`.
    pub fn get_slice_ownership(&self, owner: SliceOwner) -> FfuResult<(usize, usize)> {
        let owners = self.owners.read();
        let first = owners.iter().position(|o| *o == owner);
        let last = owners.iter().rposition(|o| *o == owner);
        match (first, last) {
            (Some(first), Some(last)) => Ok((first, last)),
            _ => Err(FfuError::NoResourceFound { owner }),
        }
    }

    pub fn get_slice_owner(&self, slice: usize) -> FfuResult<SliceOwner> {
        self.check_slice(slice)?;
        Ok(self.owners.read()[slice])
    }

    /// Validates a binding and resolves its mux codes, one row per condition
    /// slice. No register is touched.
    fn prepare(&self, binding: &ScenarioBinding) -> FfuResult<Vec<SliceScenarioConfig>> {
        let info = &binding.info;
        info.validate_selects(self.geometry.slice_count)?;
        if binding.valid_scenarios == 0 {
            return Err(FfuError::invalid_argument("no scenarios selected"));
        }

        let chain = info.chain;
        let mut rows = Vec::with_capacity(chain.condition_count());
        for (offset, slice) in chain.condition_slices().enumerate() {
            let selects = &info.selects[offset];
            let mut select_codes = [0u8; MUX_POSITION_COUNT];
            for (position, generic) in selects.positions() {
                select_codes[position.index()] = self.map_generic_select(generic, position)?;
            }
            rows.push(SliceScenarioConfig {
                select_codes,
                start_compare: slice == chain.key_start,
                start_action: slice == chain.key_end,
                valid_low: info.valid_low,
                valid_high: info.valid_high,
                case: selects.case,
                case_location: info.case_location(offset),
            });
        }
        Ok(rows)
    }

    /// Programs a chain for every scenario in `valid_scenarios`. Calling it
    /// again with the same binding leaves registers as they are.
    pub fn configure_slice(&self, binding: &ScenarioBinding, use_cache: bool) -> FfuResult<()> {
        let rows = self.prepare(binding)?;
        let chain = binding.info.chain;

        let mut regs = self.cache.lock();
        for scenario in binding.scenarios() {
            for (slice, row) in chain.condition_slices().zip(&rows) {
                regs.write_one(RegKey::slice_cfg(slice, scenario), &row.to_words(), use_cache)?;
            }
        }
        for slice in chain.cascade_slices() {
            let key = RegKey::cascade_action(slice);
            let words = regs.read_one(key, use_cache)?;
            let mask = join([words[0], words[1]]) | binding.valid_scenarios;
            regs.write_one(key, &split(mask), use_cache)?;
        }

        info!(
            chain = %chain,
            scenarios = format_args!("0x{:016x}", binding.valid_scenarios),
            "Configured FFU slice chain"
        );
        Ok(())
    }

    /// Removes a chain's scenarios from the cascade-action masks. The
    /// binding must be the one passed to [`Self::configure_slice`].
    pub fn unconfigure_slice(&self, binding: &ScenarioBinding, use_cache: bool) -> FfuResult<()> {
        binding.info.chain.validate(self.geometry.slice_count)?;
        let chain = binding.info.chain;

        let mut regs = self.cache.lock();
        for slice in chain.cascade_slices() {
            let key = RegKey::cascade_action(slice);
            let words = regs.read_one(key, use_cache)?;
            let mask = join([words[0], words[1]]) & !binding.valid_scenarios;
            regs.write_one(key, &split(mask), use_cache)?;
        }

        info!(
            chain = %chain,
            scenarios = format_args!("0x{:016x}", binding.valid_scenarios),
            "Unconfigured FFU slice chain"
        );
        Ok(())
    }

    /// Reads back one FFU_SLICE_CFG row.
    pub fn get_slice_config(
        &self,
        slice: usize,
        scenario: usize,
        use_cache: bool,
    ) -> FfuResult<SliceScenarioConfig> {
        self.check_slice(slice)?;
        if scenario >= SCENARIO_COUNT {
            return Err(FfuError::invalid_argument(format!(
                "scenario {} must be below {}",
                scenario, SCENARIO_COUNT
            )));
        }
        let words = self
            .cache
            .lock()
            .read_one(RegKey::slice_cfg(slice, scenario), use_cache)?;
        SliceScenarioConfig::from_words([words[0], words[1]])
    }

    /// Scenario mask of a slice's cascade-action register.
    pub fn get_cascade_action(&self, slice: usize, use_cache: bool) -> FfuResult<u64> {
        self.check_slice(slice)?;
        let words = self
            .cache
            .lock()
            .read_one(RegKey::cascade_action(slice), use_cache)?;
        Ok(join([words[0], words[1]]))
    }

    fn check_master_masks(&self, ingress: u32, egress: u32) -> FfuResult<()> {
        if bits_beyond(ingress, self.geometry.slice_count) {
            return Err(FfuError::invalid_argument(format!(
                "ingress mask 0x{:08x} covers slices beyond {}",
                ingress, self.geometry.slice_count
            )));
        }
        if bits_beyond(egress, self.geometry.egress_chunks) {
            return Err(FfuError::invalid_argument(format!(
                "egress mask 0x{:08x} covers chunks beyond {}",
                egress, self.geometry.egress_chunks
            )));
        }
        Ok(())
    }

    /// Writes the per-slice and per-egress-chunk enable bits.
    pub fn set_master_valid(&self, ingress: u32, egress: u32, use_cache: bool) -> FfuResult<()> {
        self.check_master_masks(ingress, egress)?;
        self.cache
            .lock()
            .write_one(RegKey::master_valid(), &[ingress, egress], use_cache)?;
        debug!(
            ingress = format_args!("0x{:08x}", ingress),
            egress = format_args!("0x{:08x}", egress),
            "Set FFU master valid"
        );
        Ok(())
    }

    /// Returns `(ingress, egress)` enable bits.
    pub fn get_master_valid(&self, use_cache: bool) -> FfuResult<(u32, u32)> {
        let words = self.cache.lock().read_one(RegKey::master_valid(), use_cache)?;
        Ok((words[0], words[1]))
    }
}

/// True when `mask` has a bit at or above `width`.
fn bits_beyond(mask: u32, width: usize) -> bool {
    u32::try_from(width)
        .ok()
        .and_then(|w| u64::from(mask).checked_shr(w))
        .unwrap_or(0)
        != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::MemoryRegisters;
    use crate::mux::generic;
    use crate::types::{FfuSliceInfo, SliceChain, SliceSelects};
    use pretty_assertions::assert_eq;

    fn manager() -> (Arc<MemoryRegisters>, SliceConfigManager) {
        let regs = Arc::new(MemoryRegisters::new());
        let cache = Arc::new(RegisterCache::new(regs.clone()));
        let mgr = SliceConfigManager::new(
            GeometryConfig::default(),
            cache,
            Arc::new(MuxSelectMap::standard()),
        );
        (regs, mgr)
    }

    fn dmac_binding(scenarios: u64) -> ScenarioBinding {
        let selects = SliceSelects::new(
            [
                generic::DMAC_15_0,
                generic::DMAC_31_16,
                generic::DMAC_47_32,
                generic::ETHER_TYPE,
            ],
            generic::PROT,
        );
        let info = FfuSliceInfo::new(SliceChain::new(4, 5, 7))
            .with_selects(vec![selects, selects.with_case(2)])
            .with_case_locations(vec![CaseLocation::NotMapped, CaseLocation::TopLowNibble]);
        ScenarioBinding::new(info, scenarios)
    }

    #[test]
    fn test_cfg_row_codec() {
        let row = SliceScenarioConfig {
            select_codes: [1, 2, 3, 0x3F, 4],
            start_compare: true,
            start_action: false,
            valid_low: true,
            valid_high: false,
            case: 9,
            case_location: CaseLocation::TopHighNibble,
        };
        assert_eq!(SliceScenarioConfig::from_words(row.to_words()).unwrap(), row);
        assert!(SliceScenarioConfig::from_words([0, 3 << 6]).is_err());
    }

    #[test]
    fn test_ownership() {
        let (_regs, mgr) = manager();
        mgr.set_slice_ownership(0, 3, SliceOwner::Acl).unwrap();
        mgr.set_slice_ownership(0, 3, SliceOwner::Acl).unwrap();
        assert_eq!(mgr.get_slice_ownership(SliceOwner::Acl).unwrap(), (0, 3));

        let err = mgr.set_slice_ownership(3, 5, SliceOwner::Routing).unwrap_err();
        assert_eq!(
            err,
            FfuError::ResourceOwned {
                slice: 3,
                owner: SliceOwner::Acl
            }
        );
        // All-or-nothing: slices 4 and 5 stay free.
        assert_eq!(mgr.get_slice_owner(4).unwrap(), SliceOwner::None);

        mgr.set_slice_ownership(2, 3, SliceOwner::None).unwrap();
        assert_eq!(mgr.get_slice_ownership(SliceOwner::Acl).unwrap(), (0, 1));
        assert!(matches!(
            mgr.get_slice_ownership(SliceOwner::Policer),
            Err(FfuError::NoResourceFound { .. })
        ));
        assert!(mgr.set_slice_ownership(30, 32, SliceOwner::Acl).is_err());
    }

    #[test]
    fn test_configure_writes_rows_and_cascade() {
        let (_regs, mgr) = manager();
        let binding = dmac_binding((1 << 3) | (1 << 40));
        mgr.configure_slice(&binding, true).unwrap();

        let first = mgr.get_slice_config(4, 3, false).unwrap();
        assert!(first.start_compare);
        assert!(!first.start_action);
        assert_eq!(first.select_codes, [0x01, 0x02, 0x03, 0x07, 0x02]);
        assert_eq!(
            first.generic_selects(mgr.mux_map()),
            [
                Some(generic::DMAC_15_0),
                Some(generic::DMAC_31_16),
                Some(generic::DMAC_47_32),
                Some(generic::ETHER_TYPE),
                Some(generic::PROT),
            ]
        );

        let last = mgr.get_slice_config(5, 40, false).unwrap();
        assert!(!last.start_compare);
        assert!(last.start_action);
        assert_eq!(last.case, 2);
        assert_eq!(last.case_location, CaseLocation::TopLowNibble);

        assert_eq!(mgr.get_cascade_action(5, false).unwrap(), 0);
        assert_eq!(mgr.get_cascade_action(6, false).unwrap(), (1 << 3) | (1 << 40));
        assert_eq!(mgr.get_cascade_action(7, false).unwrap(), (1 << 3) | (1 << 40));
    }

    #[test]
    fn test_configure_idempotent() {
        let (regs, mgr) = manager();
        let binding = dmac_binding(1 << 3);
        mgr.configure_slice(&binding, true).unwrap();
        let once = regs.snapshot();
        mgr.configure_slice(&binding, true).unwrap();
        assert_eq!(regs.snapshot(), once);
    }

    #[test]
    fn test_unconfigure_preserves_other_scenarios() {
        let (_regs, mgr) = manager();
        mgr.configure_slice(&dmac_binding(1 << 1), true).unwrap();
        mgr.configure_slice(&dmac_binding(1 << 2), true).unwrap();
        assert_eq!(mgr.get_cascade_action(6, true).unwrap(), 0b110);

        mgr.unconfigure_slice(&dmac_binding(1 << 1), true).unwrap();
        assert_eq!(mgr.get_cascade_action(6, false).unwrap(), 0b100);
        // CFG rows stay behind.
        assert!(mgr.get_slice_config(4, 1, false).unwrap().start_compare);
    }

    #[test]
    fn test_configure_validation_touches_nothing() {
        let (regs, mgr) = manager();

        let mut binding = dmac_binding(1);
        binding.info.selects[1].top = generic::DMAC_15_0;
        assert_eq!(
            mgr.configure_slice(&binding, true).unwrap_err(),
            FfuError::InvalidMuxSelect {
                generic: generic::DMAC_15_0,
                position: MuxPosition::Top
            }
        );

        assert!(matches!(
            mgr.configure_slice(&dmac_binding(0), true),
            Err(FfuError::InvalidArgument { .. })
        ));

        let mut binding = dmac_binding(1);
        binding.info.chain = SliceChain::new(5, 2, 5);
        assert!(matches!(
            mgr.configure_slice(&binding, true),
            Err(FfuError::InvalidSlice { .. })
        ));
        assert!(regs.snapshot().is_empty());
    }

    #[test]
    fn test_empty_geometry_rejects_every_slice() {
        let regs = Arc::new(MemoryRegisters::new());
        let mgr = SliceConfigManager::new(
            GeometryConfig {
                slice_count: 0,
                rules_per_slice: 16,
                egress_chunks: 0,
            },
            Arc::new(RegisterCache::new(regs)),
            Arc::new(MuxSelectMap::standard()),
        );
        assert!(matches!(
            mgr.get_slice_owner(0),
            Err(FfuError::InvalidSlice { .. })
        ));
        assert!(mgr.set_slice_ownership(0, 0, SliceOwner::Acl).is_err());
        assert!(mgr.get_cascade_action(0, true).is_err());
        assert!(mgr.set_master_valid(1, 0, true).is_err());
        mgr.set_master_valid(0, 0, true).unwrap();
    }

    #[test]
    fn test_master_valid() {
        let (regs, mgr) = manager();
        mgr.set_master_valid(0xFFFF_FFFF, 0x1, true).unwrap();
        assert_eq!(mgr.get_master_valid(false).unwrap(), (0xFFFF_FFFF, 0x1));
        assert_eq!(regs.peek(RegKey::master_valid().address(0)), 0xFFFF_FFFF);
    }

    #[test]
    fn test_master_valid_masks_checked() {
        let regs = Arc::new(MemoryRegisters::new());
        let geometry = GeometryConfig {
            slice_count: 8,
            rules_per_slice: 64,
            egress_chunks: 4,
        };
        let mgr = SliceConfigManager::new(
            geometry,
            Arc::new(RegisterCache::new(regs)),
            Arc::new(MuxSelectMap::standard()),
        );
        assert!(mgr.set_master_valid(0xFF, 0xF, true).is_ok());
        assert!(mgr.set_master_valid(0x100, 0, true).is_err());
        assert!(mgr.set_master_valid(0, 0x10, true).is_err());
    }
}
