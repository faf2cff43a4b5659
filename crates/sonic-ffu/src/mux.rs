//! Generic field selector to hardware mux code mapping.
//!
//! Callers name key fields with 8-bit generic selector IDs (see [`generic`]).
//! Each condition slice has five muxes, and each mux position encodes the
//! same field with its own 6-bit hardware code. The map is built once from a
//! static table and shared read-only through `Arc`.

use std::fmt;

use tracing::warn;

/// Number of mux positions per condition slice.
pub const MUX_POSITION_COUNT: usize = 5;

/// Number of distinct hardware mux codes (6-bit field).
pub const MUX_CODE_COUNT: usize = 64;

/// A mux position of a condition slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MuxPosition {
    Mux0,
    Mux1,
    Mux2,
    Mux3,
    /// Selects the 8-bit top key byte.
    Top,
}

/// All positions in register field order.
pub const MUX_POSITIONS: [MuxPosition; MUX_POSITION_COUNT] = [
    MuxPosition::Mux0,
    MuxPosition::Mux1,
    MuxPosition::Mux2,
    MuxPosition::Mux3,
    MuxPosition::Top,
];

impl MuxPosition {
    pub const fn index(self) -> usize {
        match self {
            Self::Mux0 => 0,
            Self::Mux1 => 1,
            Self::Mux2 => 2,
            Self::Mux3 => 3,
            Self::Top => 4,
        }
    }
}

impl fmt::Display for MuxPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mux0 => write!(f, "mux0"),
            Self::Mux1 => write!(f, "mux1"),
            Self::Mux2 => write!(f, "mux2"),
            Self::Mux3 => write!(f, "mux3"),
            Self::Top => write!(f, "top"),
        }
    }
}

/// Generic selector IDs.
pub mod generic {
    pub const NONE: u8 = 0x00;
    pub const DMAC_15_0: u8 = 0x01;
    pub const DMAC_31_16: u8 = 0x02;
    pub const DMAC_47_32: u8 = 0x03;
    pub const SMAC_15_0: u8 = 0x04;
    pub const SMAC_31_16: u8 = 0x05;
    pub const SMAC_47_32: u8 = 0x06;
    pub const ETHER_TYPE: u8 = 0x07;
    pub const VLAN_ID: u8 = 0x08;
    pub const VLAN_PRI: u8 = 0x09;
    pub const SRC_PORT: u8 = 0x0A;

    /// DIP bits 15:0; DIP_BASE + n selects bits 16n+15:16n.
    pub const DIP_BASE: u8 = 0x10;
    /// SIP bits 15:0; SIP_BASE + n selects bits 16n+15:16n.
    pub const SIP_BASE: u8 = 0x18;

    pub const L4_SRC: u8 = 0x20;
    pub const L4_DST: u8 = 0x21;
    pub const PROT: u8 = 0x22;
    pub const TOS: u8 = 0x23;
    pub const TTL: u8 = 0x24;
    pub const ISL_USER: u8 = 0x25;
    pub const MAP_SRC: u8 = 0x26;
}

/// One row of the mapping table: a generic ID and its hardware code at
/// mux0..mux3 and top (`None` where the position cannot select it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxSelectEntry {
    pub generic: u8,
    pub codes: [Option<u8>; MUX_POSITION_COUNT],
}

impl MuxSelectEntry {
    /// Field available on the four 16-bit muxes under the same code.
    pub const fn wide(generic: u8, code: u8) -> Self {
        Self {
            generic,
            codes: [Some(code), Some(code), Some(code), Some(code), None],
        }
    }

    /// Field available on every position, with its own top code.
    pub const fn wide_and_top(generic: u8, code: u8, top: u8) -> Self {
        Self {
            generic,
            codes: [Some(code), Some(code), Some(code), Some(code), Some(top)],
        }
    }
}

/// FM6000 selector table.
pub const DEFAULT_MUX_TABLE: &[MuxSelectEntry] = &[
    MuxSelectEntry::wide_and_top(generic::NONE, 0x00, 0x00),
    MuxSelectEntry::wide(generic::DMAC_15_0, 0x01),
    MuxSelectEntry::wide(generic::DMAC_31_16, 0x02),
    MuxSelectEntry::wide(generic::DMAC_47_32, 0x03),
    MuxSelectEntry::wide(generic::SMAC_15_0, 0x04),
    MuxSelectEntry::wide(generic::SMAC_31_16, 0x05),
    MuxSelectEntry::wide(generic::SMAC_47_32, 0x06),
    MuxSelectEntry::wide(generic::ETHER_TYPE, 0x07),
    MuxSelectEntry::wide(generic::VLAN_ID, 0x08),
    MuxSelectEntry::wide_and_top(generic::VLAN_PRI, 0x09, 0x01),
    MuxSelectEntry::wide_and_top(generic::SRC_PORT, 0x0A, 0x07),
    MuxSelectEntry::wide(generic::DIP_BASE, 0x10),
    MuxSelectEntry::wide(generic::DIP_BASE + 1, 0x11),
    MuxSelectEntry::wide(generic::DIP_BASE + 2, 0x12),
    MuxSelectEntry::wide(generic::DIP_BASE + 3, 0x13),
    MuxSelectEntry::wide(generic::DIP_BASE + 4, 0x14),
    MuxSelectEntry::wide(generic::DIP_BASE + 5, 0x15),
    MuxSelectEntry::wide(generic::DIP_BASE + 6, 0x16),
    MuxSelectEntry::wide(generic::DIP_BASE + 7, 0x17),
    MuxSelectEntry::wide(generic::SIP_BASE, 0x18),
    MuxSelectEntry::wide(generic::SIP_BASE + 1, 0x19),
    MuxSelectEntry::wide(generic::SIP_BASE + 2, 0x1A),
    MuxSelectEntry::wide(generic::SIP_BASE + 3, 0x1B),
    MuxSelectEntry::wide(generic::SIP_BASE + 4, 0x1C),
    MuxSelectEntry::wide(generic::SIP_BASE + 5, 0x1D),
    MuxSelectEntry::wide(generic::SIP_BASE + 6, 0x1E),
    MuxSelectEntry::wide(generic::SIP_BASE + 7, 0x1F),
    MuxSelectEntry::wide(generic::L4_SRC, 0x20),
    MuxSelectEntry::wide(generic::L4_DST, 0x21),
    MuxSelectEntry::wide_and_top(generic::PROT, 0x22, 0x02),
    MuxSelectEntry::wide_and_top(generic::TOS, 0x23, 0x03),
    MuxSelectEntry::wide_and_top(generic::TTL, 0x24, 0x04),
    MuxSelectEntry::wide_and_top(generic::ISL_USER, 0x25, 0x05),
    MuxSelectEntry::wide_and_top(generic::MAP_SRC, 0x26, 0x06),
];

/// Immutable forward and reverse selector lookup.
#[derive(Clone)]
pub struct MuxSelectMap {
    forward: [[Option<u8>; 256]; MUX_POSITION_COUNT],
    reverse: [[Option<u8>; MUX_CODE_COUNT]; MUX_POSITION_COUNT],
}

impl MuxSelectMap {
    /// Builds the map from a table.
    ///
    /// A hardware code claimed twice at one position keeps its first
    /// generic; the later row loses that position. Codes that do not fit
    /// the 6-bit field are skipped.
    pub fn build(table: &[MuxSelectEntry]) -> Self {
        let mut forward = [[None; 256]; MUX_POSITION_COUNT];
        let mut reverse = [[None; MUX_CODE_COUNT]; MUX_POSITION_COUNT];

        for entry in table {
            for (position, code) in MUX_POSITIONS.iter().zip(entry.codes) {
                let Some(code) = code else { continue };
                let p = position.index();

                if code as usize >= MUX_CODE_COUNT {
                    warn!(
                        generic = entry.generic,
                        %position,
                        code,
                        "Mux code does not fit the select field, skipping"
                    );
                    continue;
                }
                if let Some(owner) = reverse[p][code as usize] {
                    warn!(
                        generic = entry.generic,
                        owner,
                        %position,
                        code,
                        "Duplicate mux code in selector table, keeping first entry"
                    );
                    continue;
                }
                if forward[p][entry.generic as usize].is_some() {
                    warn!(
                        generic = entry.generic,
                        %position,
                        "Generic selector listed twice, keeping first entry"
                    );
                    continue;
                }

                forward[p][entry.generic as usize] = Some(code);
                reverse[p][code as usize] = Some(entry.generic);
            }
        }

        Self { forward, reverse }
    }

    /// Map over [`DEFAULT_MUX_TABLE`].
    pub fn standard() -> Self {
        Self::build(DEFAULT_MUX_TABLE)
    }

    /// Hardware code for a generic selector at a position.
    pub fn hw_code(&self, generic: u8, position: MuxPosition) -> Option<u8> {
        self.forward[position.index()][generic as usize]
    }

    /// Generic selector behind a hardware code at a position.
    pub fn generic(&self, code: u8, position: MuxPosition) -> Option<u8> {
        self.reverse[position.index()]
            .get(code as usize)
            .copied()
            .flatten()
    }

    /// Number of generic selectors reachable at a position.
    pub fn len(&self, position: MuxPosition) -> usize {
        self.forward[position.index()]
            .iter()
            .filter(|c| c.is_some())
            .count()
    }
}

impl Default for MuxSelectMap {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for MuxSelectMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("MuxSelectMap");
        for position in MUX_POSITIONS {
            d.field(&position.to_string(), &self.len(position));
        }
        d.finish()
    }
}
