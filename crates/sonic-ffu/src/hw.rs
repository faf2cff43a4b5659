//! Collaborators the FFU core consumes.
//!
//! Register access and port/glort resolution are supplied by the platform
//! layer. [`MemoryRegisters`] is a register file held in memory, used for
//! bring-up without hardware and by the test suites.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::error::{FfuError, FfuResult};

/// Raw hardware register access.
pub trait RegisterAccess: Send + Sync {
    /// Reads one 32-bit register word.
    fn read_register(&self, addr: u32) -> FfuResult<u32>;

    /// Writes one 32-bit register word.
    fn write_register(&self, addr: u32, value: u32) -> FfuResult<()>;

    /// Writes a sequence of words in order, as one bulk transfer.
    fn write_register_sequence(&self, writes: &[(u32, u32)]) -> FfuResult<()>;
}

/// Logical port ↔ glort resolution.
pub trait GlortResolver: Send + Sync {
    fn logical_port_to_glort(&self, port: u32) -> Option<u16>;

    fn glort_to_logical_port(&self, glort: u16) -> Option<u32>;
}

/// Port map held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticGlortMap {
    port_to_glort: HashMap<u32, u16>,
    glort_to_port: HashMap<u16, u32>,
}

impl StaticGlortMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a port/glort pair, replacing earlier mappings of either side.
    pub fn with_port(mut self, port: u32, glort: u16) -> Self {
        self.insert(port, glort);
        self
    }

    pub fn insert(&mut self, port: u32, glort: u16) {
        if let Some(old) = self.port_to_glort.insert(port, glort) {
            self.glort_to_port.remove(&old);
        }
        if let Some(old) = self.glort_to_port.insert(glort, port) {
            if old != port {
                self.port_to_glort.remove(&old);
            }
        }
    }
}

impl GlortResolver for StaticGlortMap {
    fn logical_port_to_glort(&self, port: u32) -> Option<u16> {
        self.port_to_glort.get(&port).copied()
    }

    fn glort_to_logical_port(&self, glort: u16) -> Option<u32> {
        self.glort_to_port.get(&glort).copied()
    }
}

/// Switch families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchFamily {
    /// FM6000-class: TCAM slice bank with cascaded actions.
    Fm6000,
    /// FM10000-class: different FFU layout, not handled here.
    Fm10000,
    /// Switch managed by a remote agent, no local registers.
    Remote,
}

impl SwitchFamily {
    /// True if this family carries the slice engine programmed by this crate.
    pub const fn has_ffu_slices(self) -> bool {
        matches!(self, Self::Fm6000)
    }
}

impl fmt::Display for SwitchFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fm6000 => write!(f, "FM6000"),
            Self::Fm10000 => write!(f, "FM10000"),
            Self::Remote => write!(f, "REMOTE"),
        }
    }
}

/// Capability description of the switch an engine is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwitchInfo {
    pub switch_id: u32,
    pub family: SwitchFamily,
}

impl SwitchInfo {
    pub const fn new(switch_id: u32, family: SwitchFamily) -> Self {
        Self { switch_id, family }
    }
}

/// Register file held in memory. Unwritten registers read as zero.
#[derive(Debug, Default)]
pub struct MemoryRegisters {
    words: Mutex<HashMap<u32, u32>>,
}

impl MemoryRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a register without going through the trait.
    pub fn peek(&self, addr: u32) -> u32 {
        self.words.lock().get(&addr).copied().unwrap_or(0)
    }

    /// Sets a register behind the cache's back, as an out-of-band writer would.
    pub fn poke(&self, addr: u32, value: u32) {
        self.words.lock().insert(addr, value);
    }

    /// Copy of the whole register file.
    pub fn snapshot(&self) -> HashMap<u32, u32> {
        self.words.lock().clone()
    }

    /// Clears every register, as a hardware reset would.
    pub fn reset(&self) {
        self.words.lock().clear();
    }
}

impl RegisterAccess for MemoryRegisters {
    fn read_register(&self, addr: u32) -> FfuResult<u32> {
        Ok(self.peek(addr))
    }

    fn write_register(&self, addr: u32, value: u32) -> FfuResult<()> {
        self.poke(addr, value);
        Ok(())
    }

    fn write_register_sequence(&self, writes: &[(u32, u32)]) -> FfuResult<()> {
        let mut words = self.words.lock();
        for &(addr, value) in writes {
            words.insert(addr, value);
        }
        Ok(())
    }
}

/// Register access that fails every call. Stand-in for a detached device.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedRegisters;

impl RegisterAccess for DetachedRegisters {
    fn read_register(&self, addr: u32) -> FfuResult<u32> {
        Err(FfuError::io(addr, "device detached"))
    }

    fn write_register(&self, addr: u32, _value: u32) -> FfuResult<()> {
        Err(FfuError::io(addr, "device detached"))
    }

    fn write_register_sequence(&self, writes: &[(u32, u32)]) -> FfuResult<()> {
        let addr = writes.first().map(|w| w.0).unwrap_or(0);
        Err(FfuError::io(addr, "device detached"))
    }
}
