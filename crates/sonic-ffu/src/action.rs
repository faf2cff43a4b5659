//! SRAM action codec.
//!
//! An action slice holds one 64-bit SRAM word per rule:
//!
//! | bits   | field         |
//! |--------|---------------|
//! | 0..23  | command data  |
//! | 24..26 | command       |
//! | 27..29 | precedence    |
//! | 30..31 | counter bank  |
//! | 32..43 | counter index |
//!
//! The command selects the data layout (see [`crate::regs::sram`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FfuError, FfuResult};
use crate::hw::GlortResolver;
use crate::regs::{get_field, join, set_field, split, sram};

/// Largest VLAN ID plus one.
pub const MAX_VLAN: u16 = 4096;
/// Number of DSCP values.
pub const MAX_DSCP_PRIORITIES: u8 = 64;
/// Number of switch priorities.
pub const MAX_SWITCH_PRIORITIES: u8 = 16;
/// Number of VLAN priorities.
pub const MAX_VLAN_PRIORITIES: u8 = 16;
pub const MAX_PRECEDENCE: u8 = 8;
pub const MAX_COUNTER_BANK: u8 = 4;
pub const MAX_COUNTER_INDEX: u16 = 4096;
/// Largest ARP index plus one (14-bit field).
pub const MAX_ARP_INDEX: u32 = 1 << 14;
/// Largest ARP count of a MinRange block.
pub const MAX_ARP_MIN_RANGE_COUNT: u8 = 16;
/// Largest ARP count of MaxRange and PowerOfTwo blocks.
pub const MAX_ARP_COUNT: u8 = 12;

/// How an ARP block is indexed from the packet hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArpType {
    /// `count` entries starting at `arp_index`; 16 entries encode as 0.
    MinRange,
    /// Up to `count` hash bits select inside the block.
    MaxRange,
    /// Block of `2^count` entries.
    PowerOfTwo,
}

impl ArpType {
    const fn to_raw(self) -> u64 {
        match self {
            Self::MinRange => 0,
            Self::MaxRange => 1,
            Self::PowerOfTwo => 2,
        }
    }

    fn from_raw(raw: u64) -> FfuResult<Self> {
        match raw {
            0 => Ok(Self::MinRange),
            1 => Ok(Self::MaxRange),
            2 => Ok(Self::PowerOfTwo),
            _ => Err(FfuError::invalid_argument(format!("unknown ARP type {}", raw))),
        }
    }
}

/// Per-flag operation of a SetFlags action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FlagOp {
    #[default]
    Nop,
    Set,
    Clear,
}

/// Frame flags a SetFlags action can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FfuFlags {
    pub drop: FlagOp,
    pub trap: FlagOp,
    pub log: FlagOp,
    pub no_route: FlagOp,
    pub rx_mirror: FlagOp,
    pub capture_time: FlagOp,
}

const FLAG_COUNT: u32 = 6;

impl FfuFlags {
    fn ops(&self) -> [FlagOp; FLAG_COUNT as usize] {
        [
            self.drop,
            self.trap,
            self.log,
            self.no_route,
            self.rx_mirror,
            self.capture_time,
        ]
    }

    fn from_ops(ops: [FlagOp; FLAG_COUNT as usize]) -> Self {
        let [drop, trap, log, no_route, rx_mirror, capture_time] = ops;
        Self {
            drop,
            trap,
            log,
            no_route,
            rx_mirror,
            capture_time,
        }
    }

    /// Byte mask and data of the bit-set command.
    fn to_bits(self) -> (u8, u8) {
        self.ops()
            .iter()
            .enumerate()
            .fold((0u8, 0u8), |(mask, data), (bit, op)| match op {
                FlagOp::Nop => (mask, data),
                FlagOp::Set => (mask | 1 << bit, data | 1 << bit),
                FlagOp::Clear => (mask | 1 << bit, data),
            })
    }

    fn from_bits(mask: u8, data: u8) -> FfuResult<Self> {
        if mask >> FLAG_COUNT != 0 {
            return Err(FfuError::invalid_argument(format!(
                "flag mask 0x{:02x} uses undefined flags",
                mask
            )));
        }
        let mut ops = [FlagOp::Nop; FLAG_COUNT as usize];
        for (bit, op) in ops.iter_mut().enumerate() {
            if mask & (1 << bit) != 0 {
                *op = if data & (1 << bit) != 0 {
                    FlagOp::Set
                } else {
                    FlagOp::Clear
                };
            }
        }
        Ok(Self::from_ops(ops))
    }
}

/// VLAN tag handling on egress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VlanTxTag {
    #[default]
    Normal,
    Add,
    Delete,
    UpdateOrAdd,
}

impl VlanTxTag {
    const fn to_raw(self) -> u64 {
        match self {
            Self::Normal => 0,
            Self::Add => 1,
            Self::Delete => 2,
            Self::UpdateOrAdd => 3,
        }
    }

    const fn from_raw(raw: u64) -> Self {
        match raw & 0x3 {
            0 => Self::Normal,
            1 => Self::Add,
            2 => Self::Delete,
            _ => Self::UpdateOrAdd,
        }
    }
}

/// Field rewrite carried by a SetFields action. `set_pri` and `set_vpri`
/// share the single priority field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FfuFieldSet {
    Vlan {
        vlan: u16,
        tx_tag: VlanTxTag,
        set_pri: bool,
        set_vpri: bool,
        priority: u8,
    },
    Dscp {
        dscp: u8,
        set_pri: bool,
        set_vpri: bool,
        priority: u8,
    },
    Neither {
        set_pri: bool,
        set_vpri: bool,
        priority: u8,
    },
}

impl FfuFieldSet {
    fn priority_bits(&self) -> (bool, bool, u8) {
        match *self {
            Self::Vlan {
                set_pri,
                set_vpri,
                priority,
                ..
            }
            | Self::Dscp {
                set_pri,
                set_vpri,
                priority,
                ..
            }
            | Self::Neither {
                set_pri,
                set_vpri,
                priority,
            } => (set_pri, set_vpri, priority),
        }
    }
}

/// Action command and its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FfuActionKind {
    #[default]
    Nop,
    RouteArp {
        arp_type: ArpType,
        count: u8,
        arp_index: u32,
    },
    RouteLogicalPort {
        port: u32,
    },
    RouteFloodDest {
        port: u32,
    },
    RouteGlort {
        glort: u16,
    },
    SetFlags(FfuFlags),
    SetTrigger {
        mask: u8,
        value: u8,
    },
    SetUser {
        mask: u8,
        value: u8,
    },
    SetFields(FfuFieldSet),
}

impl fmt::Display for FfuActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nop => write!(f, "NOP"),
            Self::RouteArp { .. } => write!(f, "ROUTE_ARP"),
            Self::RouteLogicalPort { .. } => write!(f, "ROUTE_LOGICAL_PORT"),
            Self::RouteFloodDest { .. } => write!(f, "ROUTE_FLOOD_DEST"),
            Self::RouteGlort { .. } => write!(f, "ROUTE_GLORT"),
            Self::SetFlags(_) => write!(f, "SET_FLAGS"),
            Self::SetTrigger { .. } => write!(f, "SET_TRIGGER"),
            Self::SetUser { .. } => write!(f, "SET_USER"),
            Self::SetFields(_) => write!(f, "SET_FIELDS"),
        }
    }
}

/// One action slice's action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FfuAction {
    pub kind: FfuActionKind,
    pub precedence: u8,
    pub counter_bank: u8,
    pub counter_index: u16,
}

impl FfuAction {
    pub const fn new(kind: FfuActionKind) -> Self {
        Self {
            kind,
            precedence: 0,
            counter_bank: 0,
            counter_index: 0,
        }
    }

    pub const fn nop() -> Self {
        Self::new(FfuActionKind::Nop)
    }

    pub const fn with_precedence(mut self, precedence: u8) -> Self {
        self.precedence = precedence;
        self
    }

    pub const fn with_counter(mut self, bank: u8, index: u16) -> Self {
        self.counter_bank = bank;
        self.counter_index = index;
        self
    }

    fn validate_common(&self) -> FfuResult<()> {
        if self.precedence >= MAX_PRECEDENCE {
            return Err(FfuError::invalid_argument(format!(
                "{} precedence {} must be below {}",
                self.kind, self.precedence, MAX_PRECEDENCE
            )));
        }
        if self.counter_bank >= MAX_COUNTER_BANK {
            return Err(FfuError::invalid_argument(format!(
                "{} counter bank {} must be below {}",
                self.kind, self.counter_bank, MAX_COUNTER_BANK
            )));
        }
        if self.counter_index >= MAX_COUNTER_INDEX {
            return Err(FfuError::invalid_argument(format!(
                "{} counter index {} must be below {}",
                self.kind, self.counter_index, MAX_COUNTER_INDEX
            )));
        }
        Ok(())
    }
}

fn bit_set(target: u64, mask: u8, value: u8) -> (u64, u64) {
    let mut data = set_field(0, sram::BYTE_DATA.0, sram::BYTE_DATA.1, value as u64);
    data = set_field(data, sram::BYTE_MASK.0, sram::BYTE_MASK.1, mask as u64);
    data = set_field(data, sram::BIT_SET_TARGET.0, sram::BIT_SET_TARGET.1, target);
    (sram::CMD_BIT_SET, data)
}

fn field(word: u64, f: (u32, u32)) -> u64 {
    get_field(word, f.0, f.1)
}

fn with_field(word: u64, f: (u32, u32), value: u64) -> u64 {
    set_field(word, f.0, f.1, value)
}

fn encode_route_arp(arp_type: ArpType, count: u8, arp_index: u32) -> FfuResult<u64> {
    if arp_index >= MAX_ARP_INDEX {
        return Err(FfuError::invalid_argument(format!(
            "ARP index {} must be below {}",
            arp_index, MAX_ARP_INDEX
        )));
    }
    let raw_count = match arp_type {
        ArpType::MinRange => {
            if count == 0 || count > MAX_ARP_MIN_RANGE_COUNT {
                return Err(FfuError::invalid_argument(format!(
                    "MinRange ARP count {} must be 1-{}",
                    count, MAX_ARP_MIN_RANGE_COUNT
                )));
            }
            (count % MAX_ARP_MIN_RANGE_COUNT) as u64
        }
        ArpType::MaxRange | ArpType::PowerOfTwo => {
            if count > MAX_ARP_COUNT {
                return Err(FfuError::invalid_argument(format!(
                    "{:?} ARP count {} must be 0-{}",
                    arp_type, count, MAX_ARP_COUNT
                )));
            }
            count as u64
        }
    };

    let mut data = with_field(0, sram::ARP_INDEX, arp_index as u64);
    data = with_field(data, sram::ARP_COUNT, raw_count);
    data = with_field(data, sram::ARP_TYPE, arp_type.to_raw());
    Ok(data)
}

fn encode_glort(glort: u16, flood: bool) -> u64 {
    let data = with_field(0, sram::GLORT, glort as u64);
    with_field(data, sram::FLOOD, flood as u64)
}

fn resolve_port(port: u32, glorts: &dyn GlortResolver) -> FfuResult<u16> {
    glorts
        .logical_port_to_glort(port)
        .ok_or(FfuError::InvalidPort { port })
}

fn encode_field_set(fields: &FfuFieldSet) -> FfuResult<u64> {
    let (set_pri, set_vpri, priority) = fields.priority_bits();
    if priority >= MAX_SWITCH_PRIORITIES || priority >= MAX_VLAN_PRIORITIES {
        return Err(FfuError::invalid_argument(format!(
            "priority {} must be below {}",
            priority,
            MAX_SWITCH_PRIORITIES.min(MAX_VLAN_PRIORITIES)
        )));
    }

    let mut data = match *fields {
        FfuFieldSet::Vlan { vlan, tx_tag, .. } => {
            if vlan >= MAX_VLAN {
                return Err(FfuError::invalid_argument(format!(
                    "VLAN {} must be below {}",
                    vlan, MAX_VLAN
                )));
            }
            let data = with_field(0, sram::VLAN, vlan as u64);
            let data = with_field(data, sram::SET_VLAN, 1);
            with_field(data, sram::TX_TAG, tx_tag.to_raw())
        }
        FfuFieldSet::Dscp { dscp, .. } => {
            if dscp >= MAX_DSCP_PRIORITIES {
                return Err(FfuError::invalid_argument(format!(
                    "DSCP {} must be below {}",
                    dscp, MAX_DSCP_PRIORITIES
                )));
            }
            let data = with_field(0, sram::DSCP, dscp as u64);
            with_field(data, sram::SET_DSCP, 1)
        }
        FfuFieldSet::Neither { .. } => 0,
    };
    data = with_field(data, sram::PRIORITY, priority as u64);
    data = with_field(data, sram::SET_PRI, set_pri as u64);
    data = with_field(data, sram::SET_VPRI, set_vpri as u64);
    Ok(data)
}

/// Packs an action into its two SRAM words.
pub fn encode(action: &FfuAction, glorts: &dyn GlortResolver) -> FfuResult<[u32; 2]> {
    action.validate_common()?;

    let (command, data) = match action.kind {
        FfuActionKind::Nop => bit_set(sram::TARGET_FLAGS, 0, 0),
        FfuActionKind::RouteArp {
            arp_type,
            count,
            arp_index,
        } => (
            sram::CMD_ROUTE_ARP,
            encode_route_arp(arp_type, count, arp_index)?,
        ),
        FfuActionKind::RouteLogicalPort { port } => (
            sram::CMD_ROUTE_GLORT,
            encode_glort(resolve_port(port, glorts)?, false),
        ),
        FfuActionKind::RouteFloodDest { port } => (
            sram::CMD_ROUTE_GLORT,
            encode_glort(resolve_port(port, glorts)?, true),
        ),
        FfuActionKind::RouteGlort { glort } => (sram::CMD_ROUTE_GLORT, encode_glort(glort, false)),
        FfuActionKind::SetFlags(flags) => {
            let (mask, value) = flags.to_bits();
            bit_set(sram::TARGET_FLAGS, mask, value)
        }
        FfuActionKind::SetTrigger { mask, value } => bit_set(sram::TARGET_TRIGGER, mask, value),
        FfuActionKind::SetUser { mask, value } => bit_set(sram::TARGET_USER, mask, value),
        FfuActionKind::SetFields(ref fields) => (sram::CMD_FIELD_SET, encode_field_set(fields)?),
    };

    let mut word = with_field(0, sram::DATA, data);
    word = with_field(word, sram::COMMAND, command);
    word = with_field(word, sram::PRECEDENCE, action.precedence as u64);
    word = with_field(word, sram::COUNTER_BANK, action.counter_bank as u64);
    word = with_field(word, sram::COUNTER_INDEX, action.counter_index as u64);
    Ok(split(word))
}

fn decode_route_arp(data: u64) -> FfuResult<FfuActionKind> {
    let arp_type = ArpType::from_raw(field(data, sram::ARP_TYPE))?;
    let raw_count = field(data, sram::ARP_COUNT) as u8;
    let count = match arp_type {
        ArpType::MinRange if raw_count == 0 => MAX_ARP_MIN_RANGE_COUNT,
        ArpType::MinRange => raw_count,
        ArpType::MaxRange | ArpType::PowerOfTwo => {
            if raw_count > MAX_ARP_COUNT {
                return Err(FfuError::invalid_argument(format!(
                    "{:?} ARP count {} above {}",
                    arp_type, raw_count, MAX_ARP_COUNT
                )));
            }
            raw_count
        }
    };
    Ok(FfuActionKind::RouteArp {
        arp_type,
        count,
        arp_index: field(data, sram::ARP_INDEX) as u32,
    })
}

fn decode_glort(data: u64, glorts: &dyn GlortResolver) -> FfuActionKind {
    let glort = field(data, sram::GLORT) as u16;
    let flood = field(data, sram::FLOOD) != 0;
    match glorts.glort_to_logical_port(glort) {
        Some(port) if flood => FfuActionKind::RouteFloodDest { port },
        Some(port) => FfuActionKind::RouteLogicalPort { port },
        None => FfuActionKind::RouteGlort { glort },
    }
}

fn decode_bit_set(data: u64) -> FfuResult<FfuActionKind> {
    let mask = field(data, sram::BYTE_MASK) as u8;
    let value = field(data, sram::BYTE_DATA) as u8;
    let target = field(data, sram::BIT_SET_TARGET);
    if target > sram::TARGET_USER {
        return Err(FfuError::invalid_argument(format!(
            "unknown bit-set target {}",
            target
        )));
    }
    if mask == 0 {
        return Ok(FfuActionKind::Nop);
    }
    Ok(match target {
        sram::TARGET_FLAGS => FfuActionKind::SetFlags(FfuFlags::from_bits(mask, value)?),
        sram::TARGET_TRIGGER => FfuActionKind::SetTrigger { mask, value },
        _ => FfuActionKind::SetUser { mask, value },
    })
}

fn decode_field_set(data: u64) -> FfuResult<FfuActionKind> {
    let set_pri = field(data, sram::SET_PRI) != 0;
    let set_vpri = field(data, sram::SET_VPRI) != 0;
    let priority = field(data, sram::PRIORITY) as u8;
    let set_vlan = field(data, sram::SET_VLAN) != 0;
    let set_dscp = field(data, sram::SET_DSCP) != 0;

    let fields = match (set_vlan, set_dscp) {
        (true, true) => {
            return Err(FfuError::invalid_argument(
                "field-set action sets both VLAN and DSCP",
            ))
        }
        (true, false) => FfuFieldSet::Vlan {
            vlan: field(data, sram::VLAN) as u16,
            tx_tag: VlanTxTag::from_raw(field(data, sram::TX_TAG)),
            set_pri,
            set_vpri,
            priority,
        },
        (false, true) => FfuFieldSet::Dscp {
            dscp: field(data, sram::DSCP) as u8,
            set_pri,
            set_vpri,
            priority,
        },
        (false, false) => FfuFieldSet::Neither {
            set_pri,
            set_vpri,
            priority,
        },
    };
    Ok(FfuActionKind::SetFields(fields))
}

/// Unpacks two SRAM words into an action.
pub fn decode(words: [u32; 2], glorts: &dyn GlortResolver) -> FfuResult<FfuAction> {
    let word = join(words);
    let data = field(word, sram::DATA);

    let kind = match field(word, sram::COMMAND) {
        sram::CMD_ROUTE_ARP => decode_route_arp(data)?,
        sram::CMD_ROUTE_GLORT => decode_glort(data, glorts),
        sram::CMD_BIT_SET => decode_bit_set(data)?,
        sram::CMD_FIELD_SET => decode_field_set(data)?,
        other => {
            return Err(FfuError::invalid_argument(format!(
                "unknown action command {}",
                other
            )))
        }
    };

    Ok(FfuAction {
        kind,
        precedence: field(word, sram::PRECEDENCE) as u8,
        counter_bank: field(word, sram::COUNTER_BANK) as u8,
        counter_index: field(word, sram::COUNTER_INDEX) as u16,
    })
}
