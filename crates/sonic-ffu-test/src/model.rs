//! Software model of an FFU lookup.
//!
//! Evaluates the register file the way the TCAM does for one slice chain:
//! the lowest rule index whose every condition row matches wins, and its
//! SRAM words are the action. Used to check what traffic would see at any
//! point during a multi-step update.

use sonic_ffu::{MemoryRegisters, RegKey, SliceChain};

const KEY_MASK: u64 = (1 << 40) - 1;

/// Raw TCAM row as stored in the register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcamRow {
    pub key: u64,
    pub key_invert: u64,
}

impl TcamRow {
    pub fn read(regs: &MemoryRegisters, slice: usize, rule: usize) -> Self {
        let reg = RegKey::tcam(slice, rule);
        let word = |w: usize| regs.peek(reg.address(w)) as u64;
        Self {
            key: word(0) | (word(1) & 0xFF) << 32,
            key_invert: word(2) | (word(3) & 0xFF) << 32,
        }
    }

    /// Ternary match of a 40-bit lookup key. `1/1` bits never match.
    pub fn matches(&self, lookup: u64) -> bool {
        let lookup = lookup & KEY_MASK;
        if self.key & self.key_invert != 0 {
            return false;
        }
        (lookup & self.key) == self.key && (!lookup & self.key_invert) == self.key_invert
    }

    pub fn is_valid(&self) -> bool {
        self.key & self.key_invert & 1 == 0
    }
}

/// Result of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub rule: usize,
    /// SRAM words of each action slice, in chain order.
    pub actions: Vec<[u32; 2]>,
}

/// Looks up one packet against rows `0..rows` of a chain. `keys` carries
/// the 40-bit lookup key each condition slice sees.
pub fn lookup(regs: &MemoryRegisters, chain: SliceChain, rows: usize, keys: &[u64]) -> Option<Hit> {
    let rule = (0..rows).find(|&rule| {
        chain
            .condition_slices()
            .zip(keys)
            .all(|(slice, &k)| TcamRow::read(regs, slice, rule).matches(k))
    })?;

    let actions = chain
        .action_slices()
        .map(|slice| {
            let reg = RegKey::sram(slice, rule);
            [regs.peek(reg.address(0)), regs.peek(reg.address(1))]
        })
        .collect();
    Some(Hit { rule, actions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonic_ffu::RegisterAccess;

    fn poke_row(regs: &MemoryRegisters, slice: usize, rule: usize, words: [u32; 4]) {
        let reg = RegKey::tcam(slice, rule);
        for (w, value) in words.iter().enumerate() {
            regs.poke(reg.address(w), *value);
        }
    }

    #[test]
    fn test_row_matching() {
        let exact_one = TcamRow { key: 0b1, key_invert: 0 };
        assert!(exact_one.matches(0b1));
        assert!(!exact_one.matches(0b0));

        let exact_zero = TcamRow { key: 0, key_invert: 0b10 };
        assert!(exact_zero.matches(0b01));
        assert!(!exact_zero.matches(0b10));

        let invalid = TcamRow { key: 1, key_invert: 1 };
        assert!(!invalid.matches(0));
        assert!(!invalid.matches(1));
        assert!(!invalid.is_valid());

        let any = TcamRow { key: 0, key_invert: 0 };
        assert!(any.matches(0xFF_FFFF_FFFF));
    }

    #[test]
    fn test_first_match_wins() {
        let regs = MemoryRegisters::new();
        let chain = SliceChain::single(2);
        poke_row(&regs, 2, 0, [1, 0, 1, 0]);
        poke_row(&regs, 2, 1, [0x5, 0, 0xA, 0]);
        poke_row(&regs, 2, 2, [0, 0, 0, 0]);
        let sram = RegKey::sram(2, 1);
        regs.write_register(sram.address(0), 0xAB).unwrap();

        let hit = lookup(&regs, chain, 3, &[0x5]).unwrap();
        assert_eq!(hit.rule, 1);
        assert_eq!(hit.actions, vec![[0xAB, 0]]);

        assert_eq!(lookup(&regs, chain, 3, &[0x4]).unwrap().rule, 2);
        assert_eq!(lookup(&regs, chain, 2, &[0x4]), None);
    }
}
