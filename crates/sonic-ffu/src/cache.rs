//! Register shadow cache.
//!
//! Every FFU register access goes through [`RegisterCache`]. The cache's
//! mutex is the register lock: [`RegisterCache::lock`] hands out a
//! [`RegisterGuard`] and a multi-register sequence must run entirely on one
//! guard. Raw sequential writes additionally take the platform lock, always
//! after the register lock.
//!
//! Alongside the words, TCAM rows carry a [`KeyValid`] tag remembering the
//! real bit0 pair while the row holds the invalid sentinel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error};

use crate::error::{FfuError, FfuResult};
use crate::hw::RegisterAccess;
use crate::key::KeyValid;
use crate::regs::{RegKey, RegisterSet};

#[derive(Debug, Default)]
struct CacheState {
    words: HashMap<RegKey, Vec<u32>>,
    key_valid: HashMap<RegKey, KeyValid>,
}

/// Shadow copy of FFU registers plus the register and platform locks.
pub struct RegisterCache {
    hw: Arc<dyn RegisterAccess>,
    state: Mutex<CacheState>,
    platform: Mutex<()>,
}

impl RegisterCache {
    pub fn new(hw: Arc<dyn RegisterAccess>) -> Self {
        Self {
            hw,
            state: Mutex::new(CacheState::default()),
            platform: Mutex::new(()),
        }
    }

    /// Takes the register lock.
    pub fn lock(&self) -> RegisterGuard<'_> {
        RegisterGuard {
            hw: self.hw.as_ref(),
            platform: &self.platform,
            state: self.state.lock(),
        }
    }

    /// Drops every cached word and KeyValid tag.
    pub fn invalidate_all(&self) {
        let mut state = self.state.lock();
        debug!(
            words = state.words.len(),
            tags = state.key_valid.len(),
            "Invalidating FFU register cache"
        );
        state.words.clear();
        state.key_valid.clear();
    }

    /// Cached words of a register, if any.
    pub fn cached(&self, key: RegKey) -> Option<Vec<u32>> {
        self.state.lock().words.get(&key).cloned()
    }

    /// Stored KeyValid tag of a TCAM row, if any.
    pub fn key_valid(&self, key: RegKey) -> Option<KeyValid> {
        self.state.lock().key_valid.get(&key).copied()
    }

    pub fn cached_count(&self) -> usize {
        self.state.lock().words.len()
    }
}

impl std::fmt::Debug for RegisterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterCache")
            .field("cached", &self.cached_count())
            .finish_non_exhaustive()
    }
}

/// Register lock held over a critical section. Released on drop.
pub struct RegisterGuard<'a> {
    hw: &'a dyn RegisterAccess,
    platform: &'a Mutex<()>,
    state: MutexGuard<'a, CacheState>,
}

fn check_len(key: RegKey, words: &[u32]) -> FfuResult<()> {
    if words.len() != key.word_count() {
        return Err(FfuError::internal(format!(
            "{} expects {} words, got {}",
            key,
            key.word_count(),
            words.len()
        )));
    }
    Ok(())
}

impl RegisterGuard<'_> {
    /// Reads a batch of registers.
    ///
    /// Either every register is returned or nothing is stored: results of
    /// hardware reads are only committed to the cache once the whole batch
    /// has succeeded.
    pub fn read(&mut self, keys: &[RegKey], use_cache: bool) -> FfuResult<Vec<Vec<u32>>> {
        let mut out = Vec::with_capacity(keys.len());
        let mut staged = Vec::new();

        for &key in keys {
            if use_cache {
                if let Some(words) = self.state.words.get(&key) {
                    out.push(words.clone());
                    continue;
                }
            }
            let mut words = Vec::with_capacity(key.word_count());
            for w in 0..key.word_count() {
                let addr = key.address(w);
                let value = self.hw.read_register(addr).map_err(|e| {
                    error!(register = %key, address = addr, error = %e, "Register read failed");
                    e
                })?;
                words.push(value);
            }
            staged.push((key, words.clone()));
            out.push(words);
        }

        for (key, words) in staged {
            self.state.words.insert(key, words);
        }
        Ok(out)
    }

    pub fn read_one(&mut self, key: RegKey, use_cache: bool) -> FfuResult<Vec<u32>> {
        let mut words = self.read(&[key], use_cache)?;
        words
            .pop()
            .ok_or_else(|| FfuError::internal(format!("empty read of {}", key)))
    }

    /// Writes a batch of registers in order.
    ///
    /// With `use_cache`, a register whose cached copy already equals the new
    /// value is not written. The cache always ends up holding the new value,
    /// except for a register whose hardware write failed: its entry is
    /// dropped and the error returned. Writes already issued stand.
    pub fn write<W: AsRef<[u32]>>(
        &mut self,
        entries: &[(RegKey, W)],
        use_cache: bool,
    ) -> FfuResult<()> {
        for (key, words) in entries {
            check_len(*key, words.as_ref())?;
        }

        for (key, words) in entries {
            let (key, words) = (*key, words.as_ref());
            if use_cache && self.state.words.get(&key).is_some_and(|c| c == words) {
                continue;
            }
            for (w, &value) in words.iter().enumerate() {
                let addr = key.address(w);
                if let Err(e) = self.hw.write_register(addr, value) {
                    error!(register = %key, address = addr, error = %e, "Register write failed");
                    self.state.words.remove(&key);
                    return Err(e);
                }
            }
            self.state.words.insert(key, words.to_vec());
        }
        Ok(())
    }

    pub fn write_one(&mut self, key: RegKey, words: &[u32], use_cache: bool) -> FfuResult<()> {
        self.write(&[(key, words)], use_cache)
    }

    /// Writes registers as one raw sequential transfer under the platform
    /// lock, bypassing the write-if-changed check.
    pub fn write_sequence<W: AsRef<[u32]>>(&mut self, entries: &[(RegKey, W)]) -> FfuResult<()> {
        let mut writes = Vec::new();
        for (key, words) in entries {
            let (key, words) = (*key, words.as_ref());
            check_len(key, words)?;
            writes.extend(
                words
                    .iter()
                    .enumerate()
                    .map(|(w, &value)| (key.address(w), value)),
            );
        }

        let result = {
            let _platform = self.platform.lock();
            self.hw.write_register_sequence(&writes)
        };

        match result {
            Ok(()) => {
                for (key, words) in entries {
                    self.state.words.insert(*key, words.as_ref().to_vec());
                }
                Ok(())
            }
            Err(e) => {
                error!(registers = entries.len(), error = %e, "Sequential register write failed");
                for (key, _) in entries {
                    self.state.words.remove(key);
                }
                Err(e)
            }
        }
    }

    /// Records the real bit0 pair of a TCAM row.
    pub fn write_key_valid(&mut self, key: RegKey, tag: KeyValid) {
        debug_assert_eq!(key.set, RegisterSet::SliceTcam);
        self.state.key_valid.insert(key, tag);
    }

    pub fn key_valid(&self, key: RegKey) -> Option<KeyValid> {
        self.state.key_valid.get(&key).copied()
    }

    /// Overwrites bit0 of `key_word`/`key_invert` from the stored tag.
    /// Returns false and leaves the words alone when no tag is stored.
    pub fn restore_key_valid(&self, key: RegKey, key_word: &mut u32, key_invert: &mut u32) -> bool {
        match self.state.key_valid.get(&key) {
            Some(tag) => {
                tag.apply(key_word, key_invert);
                true
            }
            None => false,
        }
    }

    /// Copies the tag of `from` onto `to`; clears `to` when `from` has none.
    pub fn copy_key_valid(&mut self, from: RegKey, to: RegKey) {
        match self.state.key_valid.get(&from).copied() {
            Some(tag) => {
                self.state.key_valid.insert(to, tag);
            }
            None => {
                self.state.key_valid.remove(&to);
            }
        }
    }

    pub fn clear_key_valid(&mut self, key: RegKey) {
        self.state.key_valid.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::{DetachedRegisters, MemoryRegisters};
    use pretty_assertions::assert_eq;

    fn cache() -> (Arc<MemoryRegisters>, RegisterCache) {
        let regs = Arc::new(MemoryRegisters::new());
        let cache = RegisterCache::new(regs.clone());
        (regs, cache)
    }

    #[test]
    fn test_read_fills_cache() {
        let (regs, cache) = cache();
        let key = RegKey::sram(1, 2);
        regs.poke(key.address(0), 0x11);
        regs.poke(key.address(1), 0x22);

        let words = cache.lock().read_one(key, true).unwrap();
        assert_eq!(words, vec![0x11, 0x22]);
        assert_eq!(cache.cached(key), Some(vec![0x11, 0x22]));

        // A cached read does not see an out-of-band change; an uncached one does.
        regs.poke(key.address(0), 0x33);
        assert_eq!(cache.lock().read_one(key, true).unwrap(), vec![0x11, 0x22]);
        assert_eq!(cache.lock().read_one(key, false).unwrap(), vec![0x33, 0x22]);
        assert_eq!(cache.cached(key), Some(vec![0x33, 0x22]));
    }

    #[test]
    fn test_write_updates_cache_and_hw() {
        let (regs, cache) = cache();
        let key = RegKey::tcam(0, 5);
        cache.lock().write_one(key, &[1, 2, 3, 4], true).unwrap();
        assert_eq!(regs.peek(key.address(3)), 4);
        assert_eq!(cache.cached(key), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_write_if_changed() {
        let (regs, cache) = cache();
        let key = RegKey::master_valid();
        cache.lock().write_one(key, &[7, 0], true).unwrap();

        // Hardware drifts; a cached write of the same value is skipped.
        regs.poke(key.address(0), 0);
        cache.lock().write_one(key, &[7, 0], true).unwrap();
        assert_eq!(regs.peek(key.address(0)), 0);

        cache.lock().write_one(key, &[7, 0], false).unwrap();
        assert_eq!(regs.peek(key.address(0)), 7);
    }

    #[test]
    fn test_read_failure_stores_nothing() {
        let cache = RegisterCache::new(Arc::new(DetachedRegisters));
        let err = cache
            .lock()
            .read(&[RegKey::sram(0, 0), RegKey::sram(0, 1)], true)
            .unwrap_err();
        assert!(matches!(err, FfuError::Io { .. }));
        assert_eq!(cache.cached_count(), 0);
    }

    #[test]
    fn test_wrong_word_count_rejected() {
        let (regs, cache) = cache();
        let err = cache
            .lock()
            .write_one(RegKey::tcam(0, 0), &[1, 2], false)
            .unwrap_err();
        assert!(matches!(err, FfuError::InternalInvariantViolation { .. }));
        assert!(regs.snapshot().is_empty());
    }

    #[test]
    fn test_write_sequence() {
        let (regs, cache) = cache();
        let a = RegKey::sram(0, 0);
        let b = RegKey::tcam(0, 0);
        cache
            .lock()
            .write_sequence(&[(a, vec![5, 6]), (b, vec![1, 0, 1, 0])])
            .unwrap();
        assert_eq!(regs.peek(a.address(1)), 6);
        assert_eq!(regs.peek(b.address(2)), 1);
        assert_eq!(cache.cached(b), Some(vec![1, 0, 1, 0]));
    }

    #[test]
    fn test_key_valid_table() {
        let (_regs, cache) = cache();
        let a = RegKey::tcam(0, 0);
        let b = RegKey::tcam(0, 1);

        let mut guard = cache.lock();
        guard.write_key_valid(a, KeyValid::MatchZero);

        let (mut k, mut ki) = (0xFF, 0xFF);
        assert!(guard.restore_key_valid(a, &mut k, &mut ki));
        assert_eq!((k, ki), (0xFE, 0xFF));
        assert!(!guard.restore_key_valid(b, &mut k, &mut ki));

        guard.copy_key_valid(a, b);
        assert_eq!(guard.key_valid(b), Some(KeyValid::MatchZero));

        guard.clear_key_valid(a);
        assert!(!guard.restore_key_valid(a, &mut k, &mut ki));
        guard.copy_key_valid(a, b);
        assert_eq!(guard.key_valid(b), None);
    }

    #[test]
    fn test_invalidate_all() {
        let (_regs, cache) = cache();
        let key = RegKey::tcam(2, 2);
        {
            let mut guard = cache.lock();
            guard.write_one(key, &[0, 0, 0, 0], false).unwrap();
            guard.write_key_valid(key, KeyValid::MatchOne);
        }
        cache.invalidate_all();
        assert_eq!(cache.cached(key), None);
        assert_eq!(cache.key_valid(key), None);
    }
}
