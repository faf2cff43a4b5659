//! Slice geometry and rule data model.
//!
//! A rule lives in a chain of slices: `key_start..=key_end` hold the match
//! keys, `key_end..=action_end` hold actions. The descriptors here carry no
//! hardware state; they are validated against the configured geometry
//! before any register is touched.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::action::FfuAction;
use crate::error::{FfuError, FfuResult};
use crate::mux::{MuxPosition, MUX_POSITIONS};

/// Number of scenario bits in a [`ScenarioBinding`] mask.
pub const SCENARIO_COUNT: usize = 64;

/// Largest value of the 4-bit case discriminator.
pub const CASE_MAX: u8 = 0xF;

/// Subsystem that owns a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SliceOwner {
    #[default]
    None,
    Acl,
    Routing,
    Policer,
    Application,
}

impl fmt::Display for SliceOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Acl => write!(f, "ACL"),
            Self::Routing => write!(f, "ROUTING"),
            Self::Policer => write!(f, "POLICER"),
            Self::Application => write!(f, "APPLICATION"),
        }
    }
}

impl FromStr for SliceOwner {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "ACL" => Ok(Self::Acl),
            "ROUTING" => Ok(Self::Routing),
            "POLICER" => Ok(Self::Policer),
            "APPLICATION" | "APP" => Ok(Self::Application),
            _ => Err(format!("Unknown slice owner: {}", s)),
        }
    }
}

/// Where the 4-bit case value sits in a condition slice's top key byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CaseLocation {
    /// The top byte carries key bits 32..39.
    #[default]
    NotMapped,
    /// Case in bits 3:0 of the top byte, key bits 36..39 in 7:4.
    TopLowNibble,
    /// Case in bits 7:4 of the top byte, key bits 32..35 in 3:0.
    TopHighNibble,
}

impl CaseLocation {
    /// Hardware encoding of the CaseLocation field.
    pub const fn to_raw(self) -> u32 {
        match self {
            Self::NotMapped => 0,
            Self::TopLowNibble => 1,
            Self::TopHighNibble => 2,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::NotMapped),
            1 => Some(Self::TopLowNibble),
            2 => Some(Self::TopHighNibble),
            _ => None,
        }
    }
}

/// A contiguous range of slices acting as one wider rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SliceChain {
    pub key_start: usize,
    pub key_end: usize,
    pub action_end: usize,
}

impl SliceChain {
    pub const fn new(key_start: usize, key_end: usize, action_end: usize) -> Self {
        Self {
            key_start,
            key_end,
            action_end,
        }
    }

    /// A single slice holding both key and action.
    pub const fn single(slice: usize) -> Self {
        Self::new(slice, slice, slice)
    }

    /// Checks `key_start <= key_end <= action_end < slice_count`.
    pub fn validate(&self, slice_count: usize) -> FfuResult<()> {
        if self.key_start > self.key_end {
            return Err(FfuError::invalid_slice(format!(
                "keyStart {} > keyEnd {}",
                self.key_start, self.key_end
            )));
        }
        if self.key_end > self.action_end {
            return Err(FfuError::invalid_slice(format!(
                "keyEnd {} > actionEnd {}",
                self.key_end, self.action_end
            )));
        }
        if self.action_end >= slice_count {
            return Err(FfuError::invalid_slice(format!(
                "actionEnd {} beyond last slice {}",
                self.action_end,
                slice_count.saturating_sub(1)
            )));
        }
        Ok(())
    }

    /// Slices holding match keys.
    pub fn condition_slices(&self) -> RangeInclusive<usize> {
        self.key_start..=self.key_end
    }

    /// Slices holding actions. The last condition slice is also the first
    /// action slice.
    pub fn action_slices(&self) -> RangeInclusive<usize> {
        self.key_end..=self.action_end
    }

    /// Action slices that take their action from the cascade.
    pub fn cascade_slices(&self) -> RangeInclusive<usize> {
        (self.key_end + 1)..=self.action_end
    }

    pub fn condition_count(&self) -> usize {
        self.key_end - self.key_start + 1
    }

    pub fn action_count(&self) -> usize {
        self.action_end - self.key_end + 1
    }
}

impl fmt::Display for SliceChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slices {}..{} (actions to {})",
            self.key_start, self.key_end, self.action_end
        )
    }
}

/// Generic selectors and scenario case value for one condition slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SliceSelects {
    /// Generic selector IDs for mux0..mux3.
    pub mux: [u8; 4],
    /// Generic selector ID for the top mux.
    pub top: u8,
    /// Case value inserted by the scenario.
    pub case: u8,
}

impl SliceSelects {
    pub fn new(mux: [u8; 4], top: u8) -> Self {
        Self { mux, top, case: 0 }
    }

    pub fn with_case(mut self, case: u8) -> Self {
        self.case = case;
        self
    }

    /// Generic selector for a mux position.
    pub fn generic(&self, position: MuxPosition) -> u8 {
        match position {
            MuxPosition::Mux0 => self.mux[0],
            MuxPosition::Mux1 => self.mux[1],
            MuxPosition::Mux2 => self.mux[2],
            MuxPosition::Mux3 => self.mux[3],
            MuxPosition::Top => self.top,
        }
    }

    /// Iterates `(position, generic)` over all five positions.
    pub fn positions(&self) -> impl Iterator<Item = (MuxPosition, u8)> + '_ {
        MUX_POSITIONS.iter().map(move |&p| (p, self.generic(p)))
    }
}

/// Chain descriptor shared by slice configuration and rule operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FfuSliceInfo {
    pub chain: SliceChain,
    /// Low 32 key bits participate in the match.
    pub valid_low: bool,
    /// Top key byte participates in the match.
    pub valid_high: bool,
    /// One entry per condition slice.
    pub selects: Vec<SliceSelects>,
    /// One entry per condition slice.
    pub case_locations: Vec<CaseLocation>,
}

impl FfuSliceInfo {
    /// Creates a descriptor with default selects and unmapped case for every
    /// condition slice.
    pub fn new(chain: SliceChain) -> Self {
        let n = if chain.key_start <= chain.key_end {
            chain.condition_count()
        } else {
            0
        };
        Self {
            chain,
            valid_low: true,
            valid_high: true,
            selects: vec![SliceSelects::default(); n],
            case_locations: vec![CaseLocation::NotMapped; n],
        }
    }

    pub fn with_selects(mut self, selects: Vec<SliceSelects>) -> Self {
        self.selects = selects;
        self
    }

    pub fn with_case_locations(mut self, case_locations: Vec<CaseLocation>) -> Self {
        self.case_locations = case_locations;
        self
    }

    pub fn with_valid(mut self, valid_low: bool, valid_high: bool) -> Self {
        self.valid_low = valid_low;
        self.valid_high = valid_high;
        self
    }

    /// Validates the chain and the per-slice vectors.
    pub fn validate(&self, slice_count: usize) -> FfuResult<()> {
        self.chain.validate(slice_count)?;
        let n = self.chain.condition_count();
        if self.case_locations.len() != n {
            return Err(FfuError::invalid_argument(format!(
                "{} case locations for {} condition slices",
                self.case_locations.len(),
                n
            )));
        }
        Ok(())
    }

    /// Validates the selects vector in addition to [`Self::validate`].
    pub fn validate_selects(&self, slice_count: usize) -> FfuResult<()> {
        self.validate(slice_count)?;
        let n = self.chain.condition_count();
        if self.selects.len() != n {
            return Err(FfuError::invalid_argument(format!(
                "{} select sets for {} condition slices",
                self.selects.len(),
                n
            )));
        }
        if let Some(s) = self.selects.iter().find(|s| s.case > CASE_MAX) {
            return Err(FfuError::invalid_argument(format!(
                "case value {} exceeds {}",
                s.case, CASE_MAX
            )));
        }
        Ok(())
    }

    /// Case location of the condition slice at `offset` within the chain.
    pub fn case_location(&self, offset: usize) -> CaseLocation {
        self.case_locations
            .get(offset)
            .copied()
            .unwrap_or_default()
    }
}

/// A chain descriptor bound to a set of scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioBinding {
    pub info: FfuSliceInfo,
    pub valid_scenarios: u64,
}

impl ScenarioBinding {
    pub fn new(info: FfuSliceInfo, valid_scenarios: u64) -> Self {
        Self {
            info,
            valid_scenarios,
        }
    }

    /// Scenario indices selected by the mask.
    pub fn scenarios(&self) -> impl Iterator<Item = usize> + '_ {
        (0..SCENARIO_COUNT).filter(move |s| self.valid_scenarios & (1u64 << s) != 0)
    }
}

/// Ternary match on the 4-bit case discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FfuCase {
    pub value: u8,
    pub mask: u8,
}

impl FfuCase {
    pub const DONT_CARE: Self = Self { value: 0, mask: 0 };

    pub const fn exact(value: u8) -> Self {
        Self {
            value,
            mask: CASE_MAX,
        }
    }

    pub const fn is_dont_care(&self) -> bool {
        self.mask == 0
    }
}

/// Ternary key for one condition slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FfuSliceKey {
    /// Key bits 0..39.
    pub key: u64,
    /// Care bits for `key`.
    pub key_mask: u64,
    pub case: FfuCase,
}

impl FfuSliceKey {
    pub const fn new(key: u64, key_mask: u64) -> Self {
        Self {
            key,
            key_mask,
            case: FfuCase::DONT_CARE,
        }
    }

    pub const fn with_case(mut self, case: FfuCase) -> Self {
        self.case = case;
        self
    }

    /// Matches everything.
    pub const fn any() -> Self {
        Self::new(0, 0)
    }
}

/// One rule across a slice chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FfuRule {
    /// One key per condition slice.
    pub keys: Vec<FfuSliceKey>,
    /// One action per action slice.
    pub actions: Vec<FfuAction>,
    pub valid: bool,
}

impl FfuRule {
    pub fn new(keys: Vec<FfuSliceKey>, actions: Vec<FfuAction>, valid: bool) -> Self {
        Self {
            keys,
            actions,
            valid,
        }
    }
}
