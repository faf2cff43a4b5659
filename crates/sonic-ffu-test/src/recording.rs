//! Register backend that records every access.
//!
//! Wraps [`MemoryRegisters`] and keeps a log of calls, so tests can assert
//! on exactly which registers an operation touched. Faults can be injected
//! per address or after a number of write calls, and an observer can look
//! at the register file after every completed write call.

use std::collections::HashSet;

use parking_lot::Mutex;
use sonic_ffu::{FfuError, FfuResult, MemoryRegisters, RegisterAccess};

/// One call made through [`RegisterAccess`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterCall {
    Read { addr: u32 },
    Write { addr: u32, value: u32 },
    Sequence { writes: Vec<(u32, u32)> },
}

impl RegisterCall {
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Read { .. })
    }

    /// Addresses written by this call.
    pub fn written(&self) -> Vec<u32> {
        match self {
            Self::Read { .. } => Vec::new(),
            Self::Write { addr, .. } => vec![*addr],
            Self::Sequence { writes } => writes.iter().map(|w| w.0).collect(),
        }
    }
}

type Observer = Box<dyn Fn(&MemoryRegisters) + Send + Sync>;

#[derive(Default)]
struct Faults {
    read_addresses: HashSet<u32>,
    write_addresses: HashSet<u32>,
    /// Write calls left before every further write fails.
    writes_left: Option<usize>,
}

/// Recording register backend.
#[derive(Default)]
pub struct RecordingRegisters {
    inner: MemoryRegisters,
    calls: Mutex<Vec<RegisterCall>>,
    faults: Mutex<Faults>,
    observer: Mutex<Option<Observer>>,
}

impl RecordingRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Underlying register file.
    pub fn registers(&self) -> &MemoryRegisters {
        &self.inner
    }

    pub fn calls(&self) -> Vec<RegisterCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn read_count(&self) -> usize {
        self.calls.lock().iter().filter(|c| !c.is_write()).count()
    }

    pub fn write_count(&self) -> usize {
        self.calls.lock().iter().filter(|c| c.is_write()).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Makes reads of `addr` fail.
    pub fn fail_reads_at(&self, addr: u32) {
        self.faults.lock().read_addresses.insert(addr);
    }

    /// Makes writes touching `addr` fail.
    pub fn fail_writes_at(&self, addr: u32) {
        self.faults.lock().write_addresses.insert(addr);
    }

    /// Lets `n` more write calls through, then fails every write call.
    pub fn fail_after_writes(&self, n: usize) {
        self.faults.lock().writes_left = Some(n);
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    /// Runs `observer` after every successful write call.
    pub fn set_observer(&self, observer: impl Fn(&MemoryRegisters) + Send + Sync + 'static) {
        *self.observer.lock() = Some(Box::new(observer));
    }

    pub fn clear_observer(&self) {
        *self.observer.lock() = None;
    }

    fn check_write(&self, addrs: &[u32]) -> FfuResult<()> {
        let mut faults = self.faults.lock();
        if let Some(left) = faults.writes_left.as_mut() {
            if *left == 0 {
                return Err(FfuError::io(addrs.first().copied().unwrap_or(0), "injected fault"));
            }
            *left -= 1;
        }
        if let Some(addr) = addrs.iter().find(|a| faults.write_addresses.contains(a)) {
            return Err(FfuError::io(*addr, "injected fault"));
        }
        Ok(())
    }

    fn notify(&self) {
        if let Some(observer) = self.observer.lock().as_ref() {
            observer(&self.inner);
        }
    }
}

impl RegisterAccess for RecordingRegisters {
    fn read_register(&self, addr: u32) -> FfuResult<u32> {
        self.calls.lock().push(RegisterCall::Read { addr });
        if self.faults.lock().read_addresses.contains(&addr) {
            return Err(FfuError::io(addr, "injected fault"));
        }
        self.inner.read_register(addr)
    }

    fn write_register(&self, addr: u32, value: u32) -> FfuResult<()> {
        self.calls.lock().push(RegisterCall::Write { addr, value });
        self.check_write(&[addr])?;
        self.inner.write_register(addr, value)?;
        self.notify();
        Ok(())
    }

    fn write_register_sequence(&self, writes: &[(u32, u32)]) -> FfuResult<()> {
        self.calls.lock().push(RegisterCall::Sequence {
            writes: writes.to_vec(),
        });
        let addrs: Vec<u32> = writes.iter().map(|w| w.0).collect();
        self.check_write(&addrs)?;
        self.inner.write_register_sequence(writes)?;
        self.notify();
        Ok(())
    }
}

impl std::fmt::Debug for RecordingRegisters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingRegisters")
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}
