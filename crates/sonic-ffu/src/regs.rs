//! FFU register map.
//!
//! Addresses are `base + index0 * stride0 + index1 * stride1 + word`. The
//! strides encode the real addressing geometry of the slice bank and must
//! not change: the raw sequential write path in rule moves computes the
//! same addresses without going through the cache.

use std::fmt;

/// Hardware maximum slice count (width of the master-valid slice word).
pub const MAX_SLICES: usize = 32;
/// Hardware maximum TCAM depth per slice.
pub const MAX_RULES_PER_SLICE: usize = 4096;
/// Hardware maximum egress chunk count.
pub const MAX_EGRESS_CHUNKS: usize = 32;

pub const FFU_SLICE_TCAM_BASE: u32 = 0x00C0_0000;
pub const FFU_SLICE_TCAM_SLICE_STRIDE: u32 = 0x4000;
pub const FFU_SLICE_TCAM_RULE_STRIDE: u32 = 4;

pub const FFU_SLICE_SRAM_BASE: u32 = 0x00C8_0000;
pub const FFU_SLICE_SRAM_SLICE_STRIDE: u32 = 0x2000;
pub const FFU_SLICE_SRAM_RULE_STRIDE: u32 = 2;

pub const FFU_SLICE_CFG_BASE: u32 = 0x00CC_0000;
pub const FFU_SLICE_CFG_SLICE_STRIDE: u32 = 0x80;
pub const FFU_SLICE_CFG_SCENARIO_STRIDE: u32 = 2;

pub const FFU_SLICE_CASCADE_ACTION_BASE: u32 = 0x00CD_0000;
pub const FFU_SLICE_CASCADE_ACTION_STRIDE: u32 = 2;

pub const FFU_MASTER_VALID: u32 = 0x00CD_1000;

/// Register sets the cache knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterSet {
    /// index0 = slice, index1 = rule. Words: key, key top, key invert,
    /// key top invert.
    SliceTcam,
    /// index0 = slice, index1 = rule. Words: action low, action high.
    SliceSram,
    /// index0 = slice, index1 = scenario.
    SliceCfg,
    /// index0 = slice. Words: scenario mask low, high.
    SliceCascadeAction,
    /// Words: slice valid bits, egress chunk valid bits.
    MasterValid,
}

impl RegisterSet {
    /// Number of 32-bit words in one register of this set.
    pub const fn word_count(self) -> usize {
        match self {
            Self::SliceTcam => 4,
            Self::SliceSram
            | Self::SliceCfg
            | Self::SliceCascadeAction
            | Self::MasterValid => 2,
        }
    }

    const fn base(self) -> u32 {
        match self {
            Self::SliceTcam => FFU_SLICE_TCAM_BASE,
            Self::SliceSram => FFU_SLICE_SRAM_BASE,
            Self::SliceCfg => FFU_SLICE_CFG_BASE,
            Self::SliceCascadeAction => FFU_SLICE_CASCADE_ACTION_BASE,
            Self::MasterValid => FFU_MASTER_VALID,
        }
    }

    const fn strides(self) -> (u32, u32) {
        match self {
            Self::SliceTcam => (FFU_SLICE_TCAM_SLICE_STRIDE, FFU_SLICE_TCAM_RULE_STRIDE),
            Self::SliceSram => (FFU_SLICE_SRAM_SLICE_STRIDE, FFU_SLICE_SRAM_RULE_STRIDE),
            Self::SliceCfg => (FFU_SLICE_CFG_SLICE_STRIDE, FFU_SLICE_CFG_SCENARIO_STRIDE),
            Self::SliceCascadeAction => (FFU_SLICE_CASCADE_ACTION_STRIDE, 0),
            Self::MasterValid => (0, 0),
        }
    }
}

impl fmt::Display for RegisterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SliceTcam => write!(f, "FFU_SLICE_TCAM"),
            Self::SliceSram => write!(f, "FFU_SLICE_SRAM"),
            Self::SliceCfg => write!(f, "FFU_SLICE_CFG"),
            Self::SliceCascadeAction => write!(f, "FFU_SLICE_CASCADE_ACTION"),
            Self::MasterValid => write!(f, "FFU_MASTER_VALID"),
        }
    }
}

/// Identity of one cached register: `(set, index0, index1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegKey {
    pub set: RegisterSet,
    pub index0: usize,
    pub index1: usize,
}

impl RegKey {
    pub const fn new(set: RegisterSet, index0: usize, index1: usize) -> Self {
        Self {
            set,
            index0,
            index1,
        }
    }

    pub const fn tcam(slice: usize, rule: usize) -> Self {
        Self::new(RegisterSet::SliceTcam, slice, rule)
    }

    pub const fn sram(slice: usize, rule: usize) -> Self {
        Self::new(RegisterSet::SliceSram, slice, rule)
    }

    pub const fn slice_cfg(slice: usize, scenario: usize) -> Self {
        Self::new(RegisterSet::SliceCfg, slice, scenario)
    }

    pub const fn cascade_action(slice: usize) -> Self {
        Self::new(RegisterSet::SliceCascadeAction, slice, 0)
    }

    pub const fn master_valid() -> Self {
        Self::new(RegisterSet::MasterValid, 0, 0)
    }

    pub const fn word_count(&self) -> usize {
        self.set.word_count()
    }

    /// Address of word `word` of this register.
    pub fn address(&self, word: usize) -> u32 {
        let (stride0, stride1) = self.set.strides();
        self.set.base()
            + self.index0 as u32 * stride0
            + self.index1 as u32 * stride1
            + word as u32
    }
}

impl fmt::Display for RegKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}][{}]", self.set, self.index0, self.index1)
    }
}

/// Extracts `width` bits starting at `lsb`.
#[inline]
pub const fn get_field(word: u64, lsb: u32, width: u32) -> u64 {
    (word >> lsb) & ((1u64 << width) - 1)
}

/// Returns `word` with `width` bits at `lsb` replaced by `value`.
#[inline]
pub const fn set_field(word: u64, lsb: u32, width: u32, value: u64) -> u64 {
    let mask = ((1u64 << width) - 1) << lsb;
    (word & !mask) | ((value << lsb) & mask)
}

/// Joins a two-word register into one 64-bit value.
#[inline]
pub const fn join(words: [u32; 2]) -> u64 {
    words[0] as u64 | ((words[1] as u64) << 32)
}

/// Splits a 64-bit value into low and high words.
#[inline]
pub const fn split(value: u64) -> [u32; 2] {
    [value as u32, (value >> 32) as u32]
}

/// FFU_SLICE_CFG fields (64-bit view of both words).
pub mod slice_cfg {
    pub const SELECT0: (u32, u32) = (0, 6);
    pub const SELECT1: (u32, u32) = (6, 6);
    pub const SELECT2: (u32, u32) = (12, 6);
    pub const SELECT3: (u32, u32) = (18, 6);
    pub const SELECT_TOP: (u32, u32) = (24, 6);
    pub const START_COMPARE: (u32, u32) = (30, 1);
    pub const START_ACTION: (u32, u32) = (31, 1);
    pub const VALID_LOW: (u32, u32) = (32, 1);
    pub const VALID_HIGH: (u32, u32) = (33, 1);
    pub const CASE: (u32, u32) = (34, 4);
    pub const CASE_LOCATION: (u32, u32) = (38, 2);
}

/// FFU_SLICE_SRAM fields (64-bit view of both words).
pub mod sram {
    pub const DATA: (u32, u32) = (0, 24);
    pub const COMMAND: (u32, u32) = (24, 3);
    pub const PRECEDENCE: (u32, u32) = (27, 3);
    pub const COUNTER_BANK: (u32, u32) = (30, 2);
    pub const COUNTER_INDEX: (u32, u32) = (32, 12);

    pub const CMD_ROUTE_ARP: u64 = 0;
    pub const CMD_ROUTE_GLORT: u64 = 1;
    pub const CMD_BIT_SET: u64 = 2;
    pub const CMD_FIELD_SET: u64 = 3;

    // Data layout, ROUTE_ARP
    pub const ARP_INDEX: (u32, u32) = (0, 14);
    pub const ARP_COUNT: (u32, u32) = (14, 4);
    pub const ARP_TYPE: (u32, u32) = (18, 2);

    // Data layout, ROUTE_GLORT
    pub const GLORT: (u32, u32) = (0, 16);
    pub const FLOOD: (u32, u32) = (16, 1);

    // Data layout, BIT_SET
    pub const BYTE_DATA: (u32, u32) = (0, 8);
    pub const BYTE_MASK: (u32, u32) = (8, 8);
    pub const BIT_SET_TARGET: (u32, u32) = (16, 2);

    pub const TARGET_FLAGS: u64 = 0;
    pub const TARGET_TRIGGER: u64 = 1;
    pub const TARGET_USER: u64 = 2;

    // Data layout, FIELD_SET
    pub const VLAN: (u32, u32) = (0, 12);
    pub const DSCP: (u32, u32) = (0, 6);
    pub const PRIORITY: (u32, u32) = (12, 4);
    pub const SET_VLAN: (u32, u32) = (16, 1);
    pub const SET_DSCP: (u32, u32) = (17, 1);
    pub const TX_TAG: (u32, u32) = (18, 2);
    pub const SET_PRI: (u32, u32) = (20, 1);
    pub const SET_VPRI: (u32, u32) = (21, 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcam_addressing() {
        assert_eq!(RegKey::tcam(0, 0).address(0), FFU_SLICE_TCAM_BASE);
        assert_eq!(RegKey::tcam(0, 1).address(0), FFU_SLICE_TCAM_BASE + 4);
        assert_eq!(RegKey::tcam(1, 0).address(3), FFU_SLICE_TCAM_BASE + 0x4003);
        // Last TCAM word stays below the SRAM block.
        let last = RegKey::tcam(MAX_SLICES - 1, MAX_RULES_PER_SLICE - 1).address(3);
        assert!(last < FFU_SLICE_SRAM_BASE);
    }

    #[test]
    fn test_register_blocks_disjoint() {
        let sram_last = RegKey::sram(MAX_SLICES - 1, MAX_RULES_PER_SLICE - 1).address(1);
        assert!(sram_last < FFU_SLICE_CFG_BASE);
        let cfg_last = RegKey::slice_cfg(MAX_SLICES - 1, 63).address(1);
        assert!(cfg_last < FFU_SLICE_CASCADE_ACTION_BASE);
        let cascade_last = RegKey::cascade_action(MAX_SLICES - 1).address(1);
        assert!(cascade_last < FFU_MASTER_VALID);
    }

    #[test]
    fn test_fields() {
        let w = set_field(0, 24, 3, 0b101);
        assert_eq!(get_field(w, 24, 3), 0b101);
        // Value is truncated to the field width.
        let w = set_field(w, 0, 4, 0xFF);
        assert_eq!(get_field(w, 0, 4), 0xF);
        assert_eq!(get_field(w, 24, 3), 0b101);
        assert_eq!(join(split(0x1234_5678_9abc_def0)), 0x1234_5678_9abc_def0);
    }
}
