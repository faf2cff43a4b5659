//! Rule read/write, validity and relocation across a slice chain.
//!
//! A rule at index `i` of a chain is TCAM row `i` of every condition slice
//! plus SRAM row `i` of every action slice. The rule matches only while no
//! condition row holds the invalid sentinel.
//!
//! Live writes never expose a half-written rule: keys go in invalid, then
//! actions, then bit0 is restored. Moves go action, condition, then source
//! invalidate, one raw sequential write per phase, so a packet always
//! resolves to the moved rule's own action through either copy.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::action::{self, FfuAction};
use crate::cache::{RegisterCache, RegisterGuard};
use crate::config::GeometryConfig;
use crate::error::{FfuError, FfuResult};
use crate::hw::GlortResolver;
use crate::key::{self, KeyValid, TcamWords};
use crate::regs::{RegKey, RegisterSet};
use crate::types::{FfuRule, FfuSliceInfo, SliceChain};

/// Encoded form of a rule, built before any register is touched.
#[derive(Debug, Clone)]
struct EncodedRule {
    keys: Vec<TcamWords>,
    actions: Vec<[u32; 2]>,
    valid: bool,
}

/// Flat copy of a block of rows, addressed by (slice offset, row, word).
#[derive(Debug)]
struct RowArena {
    slices: usize,
    rows: usize,
    width: usize,
    words: Vec<u32>,
}

impl RowArena {
    fn new(slices: usize, rows: usize, width: usize) -> Self {
        Self {
            slices,
            rows,
            width,
            words: vec![0; slices * rows * width],
        }
    }

    fn offset(&self, slice: usize, row: usize, word: usize) -> FfuResult<usize> {
        if slice >= self.slices || row >= self.rows || word >= self.width {
            return Err(FfuError::internal(format!(
                "arena index ({}, {}, {}) outside {}x{}x{}",
                slice, row, word, self.slices, self.rows, self.width
            )));
        }
        Ok((slice * self.rows + row) * self.width + word)
    }

    fn row(&self, slice: usize, row: usize) -> FfuResult<&[u32]> {
        let start = self.offset(slice, row, 0)?;
        Ok(&self.words[start..start + self.width])
    }

    fn set_row(&mut self, slice: usize, row: usize, words: &[u32]) -> FfuResult<()> {
        if words.len() != self.width {
            return Err(FfuError::internal(format!(
                "arena row of {} words, expected {}",
                words.len(),
                self.width
            )));
        }
        let start = self.offset(slice, row, 0)?;
        self.words[start..start + self.width].copy_from_slice(words);
        Ok(())
    }
}

/// Snapshot of the source rows of a move or copy.
#[derive(Debug)]
struct SourceBlock {
    tcam: RowArena,
    sram: RowArena,
    /// Logical bit0 per (condition slice offset, row).
    tags: Vec<Option<KeyValid>>,
    rows: usize,
}

impl SourceBlock {
    fn snapshot(
        regs: &mut RegisterGuard<'_>,
        chain: SliceChain,
        first: usize,
        n: usize,
        use_cache: bool,
    ) -> FfuResult<Self> {
        let conditions = chain.condition_count();
        let actions = chain.action_count();

        let tcam_keys: Vec<RegKey> = chain
            .condition_slices()
            .flat_map(|slice| (first..first + n).map(move |row| RegKey::tcam(slice, row)))
            .collect();
        let sram_keys: Vec<RegKey> = chain
            .action_slices()
            .flat_map(|slice| (first..first + n).map(move |row| RegKey::sram(slice, row)))
            .collect();

        let keys: Vec<RegKey> = tcam_keys.iter().chain(&sram_keys).copied().collect();
        let words = regs.read(&keys, use_cache)?;
        let (tcam_words, sram_words) = words.split_at(tcam_keys.len());

        let mut tcam = RowArena::new(conditions, n, RegisterSet::SliceTcam.word_count());
        let mut tags = Vec::with_capacity(conditions * n);
        for (i, (key, raw)) in tcam_keys.iter().zip(tcam_words).enumerate() {
            tcam.set_row(i / n, i % n, raw)?;
            let row = TcamWords::from_words(raw)?;
            tags.push(row.key_valid().or_else(|| regs.key_valid(*key)));
        }

        let mut sram = RowArena::new(actions, n, RegisterSet::SliceSram.word_count());
        for (i, raw) in sram_words.iter().enumerate() {
            sram.set_row(i / n, i % n, raw)?;
        }

        Ok(Self {
            tcam,
            sram,
            tags,
            rows: n,
        })
    }

    fn tag(&self, slice: usize, row: usize) -> FfuResult<Option<KeyValid>> {
        self.tags
            .get(slice * self.rows + row)
            .copied()
            .ok_or_else(|| FfuError::internal(format!("no tag slot ({}, {})", slice, row)))
    }
}

fn set_tag(regs: &mut RegisterGuard<'_>, key: RegKey, tag: Option<KeyValid>) {
    match tag {
        Some(tag) => regs.write_key_valid(key, tag),
        None => regs.clear_key_valid(key),
    }
}

/// Records the tags of rows once their write landed. A failed write leaves
/// the rows untagged, so they cannot be re-enabled from a stale bit0.
fn commit_tags(
    regs: &mut RegisterGuard<'_>,
    tags: &[(RegKey, Option<KeyValid>)],
    written: FfuResult<()>,
) -> FfuResult<()> {
    match written {
        Ok(()) => {
            for &(key, tag) in tags {
                set_tag(regs, key, tag);
            }
            Ok(())
        }
        Err(e) => {
            for &(key, _) in tags {
                regs.clear_key_valid(key);
            }
            Err(e)
        }
    }
}

/// Rows processed in the order that walks away from the overlap.
fn walk_order(from: usize, to: usize, n: usize) -> Vec<usize> {
    if to > from {
        (0..n).rev().collect()
    } else {
        (0..n).collect()
    }
}

fn sram_pair(raw: &[u32]) -> FfuResult<[u32; 2]> {
    <[u32; 2]>::try_from(raw)
        .map_err(|_| FfuError::internal(format!("SRAM entry has {} words", raw.len())))
}

/// Restores bit0 of a sentinel row for reading back, assuming don't-care
/// when no tag was recorded.
fn restore_row(regs: &RegisterGuard<'_>, key: RegKey, row: &mut TcamWords) {
    if !regs.restore_key_valid(key, &mut row.key, &mut row.key_invert) {
        warn!(register = %key, "No KeyValid tag for invalid row, restoring bit0 as don't-care");
        row.restore(KeyValid::DontCare);
    }
}

/// Reads, writes and relocates rules.
pub struct RuleEngine {
    geometry: GeometryConfig,
    cache: Arc<RegisterCache>,
    glorts: Arc<dyn GlortResolver>,
    use_cache: bool,
}

impl RuleEngine {
    pub fn new(
        geometry: GeometryConfig,
        cache: Arc<RegisterCache>,
        glorts: Arc<dyn GlortResolver>,
        use_cache: bool,
    ) -> Self {
        Self {
            geometry,
            cache,
            glorts,
            use_cache,
        }
    }

    fn check_rows(&self, first: usize, n: usize) -> FfuResult<()> {
        let depth = self.geometry.rules_per_slice;
        match first.checked_add(n) {
            Some(end) if end <= depth => Ok(()),
            _ => Err(FfuError::invalid_argument(format!(
                "rules {}..{} exceed slice depth {}",
                first,
                first.saturating_add(n),
                depth
            ))),
        }
    }

    fn check(&self, info: &FfuSliceInfo, first: usize, n: usize) -> FfuResult<()> {
        info.validate(self.geometry.slice_count)?;
        self.check_rows(first, n)
    }

    fn encode_rule(&self, info: &FfuSliceInfo, rule: &FfuRule) -> FfuResult<EncodedRule> {
        let chain = info.chain;
        if rule.keys.len() != chain.condition_count() {
            return Err(FfuError::invalid_argument(format!(
                "{} keys for {} condition slices",
                rule.keys.len(),
                chain.condition_count()
            )));
        }
        if rule.actions.len() != chain.action_count() {
            return Err(FfuError::invalid_argument(format!(
                "{} actions for {} action slices",
                rule.actions.len(),
                chain.action_count()
            )));
        }

        let keys = rule
            .keys
            .iter()
            .enumerate()
            .map(|(offset, k)| key::encode_slice_key(k, info.case_location(offset)))
            .collect::<FfuResult<Vec<_>>>()?;
        let actions = rule
            .actions
            .iter()
            .map(|a| action::encode(a, self.glorts.as_ref()))
            .collect::<FfuResult<Vec<_>>>()?;

        Ok(EncodedRule {
            keys,
            actions,
            valid: rule.valid,
        })
    }

    fn write_keys_locked(
        regs: &mut RegisterGuard<'_>,
        chain: SliceChain,
        index: usize,
        keys: &[TcamWords],
        valid: bool,
        use_cache: bool,
    ) -> FfuResult<()> {
        let mut entries = Vec::with_capacity(keys.len());
        let mut tags = Vec::with_capacity(keys.len());
        for (slice, words) in chain.condition_slices().zip(keys) {
            let key = RegKey::tcam(slice, index);
            let mut words = *words;
            tags.push((key, words.key_valid()));
            if !valid {
                words.force_invalid();
            }
            entries.push((key, words.to_words()));
        }
        let written = regs.write(&entries, use_cache);
        commit_tags(regs, &tags, written)
    }

    fn write_actions_locked(
        regs: &mut RegisterGuard<'_>,
        chain: SliceChain,
        index: usize,
        actions: &[[u32; 2]],
        use_cache: bool,
    ) -> FfuResult<()> {
        let entries: Vec<(RegKey, [u32; 2])> = chain
            .action_slices()
            .zip(actions)
            .map(|(slice, words)| (RegKey::sram(slice, index), *words))
            .collect();
        regs.write(&entries, use_cache)
    }

    fn write_rule_locked(
        regs: &mut RegisterGuard<'_>,
        chain: SliceChain,
        index: usize,
        rule: &EncodedRule,
        live: bool,
        use_cache: bool,
    ) -> FfuResult<()> {
        if live {
            Self::set_valid_locked(regs, chain, index, false, use_cache)?;
            Self::write_keys_locked(regs, chain, index, &rule.keys, false, use_cache)?;
            Self::write_actions_locked(regs, chain, index, &rule.actions, use_cache)?;
            if rule.valid {
                Self::set_valid_locked(regs, chain, index, true, use_cache)?;
            }
        } else {
            Self::write_actions_locked(regs, chain, index, &rule.actions, use_cache)?;
            Self::write_keys_locked(regs, chain, index, &rule.keys, rule.valid, use_cache)?;
        }
        Ok(())
    }

    /// Flips only the bit0 pair of each condition row.
    ///
    /// Rows are written word by word, so a valid row being rewritten is
    /// invalidated through here first: a bit0 flip can only narrow what the
    /// row matches while the other words still hold the old key.
    ///
    /// Enabling fails without writing anything when a sentinel row has no
    /// recorded bit0, as for rows vacated by a move or left behind by a
    /// failed write.
    fn set_valid_locked(
        regs: &mut RegisterGuard<'_>,
        chain: SliceChain,
        index: usize,
        valid: bool,
        use_cache: bool,
    ) -> FfuResult<()> {
        let mut updates = Vec::with_capacity(chain.condition_count());
        for slice in chain.condition_slices() {
            let key = RegKey::tcam(slice, index);
            let current = TcamWords::from_words(&regs.read_one(key, use_cache)?)?;
            let mut next = current;

            if valid {
                if !current.is_valid()
                    && !regs.restore_key_valid(key, &mut next.key, &mut next.key_invert)
                {
                    return Err(FfuError::invalid_argument(format!(
                        "rule {} has no recorded bit0 at {}, rewrite it before enabling",
                        index, key
                    )));
                }
            } else if let Some(tag) = current.key_valid() {
                regs.write_key_valid(key, tag);
                next.force_invalid();
            }

            if next != current {
                updates.push((key, next.to_words()));
            }
        }

        for (key, words) in &updates {
            regs.write_one(*key, words, use_cache)?;
        }
        Ok(())
    }

    fn read_rule_locked(
        &self,
        regs: &mut RegisterGuard<'_>,
        info: &FfuSliceInfo,
        index: usize,
        use_cache: bool,
    ) -> FfuResult<FfuRule> {
        let chain = info.chain;
        let tcam_keys: Vec<RegKey> = chain
            .condition_slices()
            .map(|slice| RegKey::tcam(slice, index))
            .collect();
        let keys: Vec<RegKey> = tcam_keys
            .iter()
            .copied()
            .chain(chain.action_slices().map(|slice| RegKey::sram(slice, index)))
            .collect();

        let words = regs.read(&keys, use_cache)?;
        let (tcam_words, sram_words) = words.split_at(tcam_keys.len());

        let mut valid = true;
        let mut rule_keys = Vec::with_capacity(tcam_keys.len());
        for (offset, (key, raw)) in tcam_keys.iter().zip(tcam_words).enumerate() {
            let mut row = TcamWords::from_words(raw)?;
            if !row.is_valid() {
                valid = false;
                restore_row(regs, *key, &mut row);
            }
            rule_keys.push(key::decode_slice_key(&row, info.case_location(offset))?);
        }

        let mut actions = Vec::with_capacity(sram_words.len());
        for raw in sram_words {
            actions.push(action::decode(sram_pair(raw)?, self.glorts.as_ref())?);
        }

        Ok(FfuRule::new(rule_keys, actions, valid))
    }

    /// Writes consecutive rules starting at `first`.
    pub fn set_rules(
        &self,
        info: &FfuSliceInfo,
        first: usize,
        rules: &[FfuRule],
        live: bool,
        use_cache: bool,
    ) -> FfuResult<()> {
        self.check(info, first, rules.len())?;
        let encoded = rules
            .iter()
            .map(|rule| self.encode_rule(info, rule))
            .collect::<FfuResult<Vec<_>>>()?;

        debug!(chain = %info.chain, first, count = rules.len(), live, "Writing FFU rules");

        let mut regs = self.cache.lock();
        for (offset, rule) in encoded.iter().enumerate() {
            Self::write_rule_locked(&mut regs, info.chain, first + offset, rule, live, use_cache)?;
        }
        Ok(())
    }

    pub fn set_rule(
        &self,
        info: &FfuSliceInfo,
        index: usize,
        rule: &FfuRule,
        live: bool,
        use_cache: bool,
    ) -> FfuResult<()> {
        self.set_rules(info, index, std::slice::from_ref(rule), live, use_cache)
    }

    /// Reads `n` consecutive rules starting at `first`.
    pub fn get_rules(
        &self,
        info: &FfuSliceInfo,
        first: usize,
        n: usize,
        use_cache: bool,
    ) -> FfuResult<Vec<FfuRule>> {
        self.check(info, first, n)?;
        let mut regs = self.cache.lock();
        (first..first + n)
            .map(|index| self.read_rule_locked(&mut regs, info, index, use_cache))
            .collect()
    }

    pub fn get_rule(&self, info: &FfuSliceInfo, index: usize, use_cache: bool) -> FfuResult<FfuRule> {
        self.check(info, index, 1)?;
        let mut regs = self.cache.lock();
        self.read_rule_locked(&mut regs, info, index, use_cache)
    }

    /// Enables or disables a rule without touching anything but bit0.
    pub fn set_rule_valid(
        &self,
        info: &FfuSliceInfo,
        index: usize,
        valid: bool,
        use_cache: bool,
    ) -> FfuResult<()> {
        self.check(info, index, 1)?;
        debug!(chain = %info.chain, rule = index, valid, "Setting FFU rule valid");
        let mut regs = self.cache.lock();
        Self::set_valid_locked(&mut regs, info.chain, index, valid, use_cache)
    }

    fn check_block(&self, info: &FfuSliceInfo, from: usize, n: usize, to: usize) -> FfuResult<()> {
        self.check(info, from, n)?;
        self.check_rows(to, n)
    }

    /// Relocates `n` rules from `from` to `to` within the chain while
    /// traffic is flowing. Vacated source rows are left invalid and zeroed.
    pub fn move_rules(&self, info: &FfuSliceInfo, from: usize, n: usize, to: usize) -> FfuResult<()> {
        self.check_block(info, from, n, to)?;
        if n == 0 || from == to {
            return Ok(());
        }
        let chain = info.chain;
        debug!(chain = %chain, from, to, count = n, "Moving FFU rules");

        let mut regs = self.cache.lock();
        let block = SourceBlock::snapshot(&mut regs, chain, from, n, self.use_cache)?;

        for i in walk_order(from, to, n) {
            let (src, dst) = (from + i, to + i);

            let mut actions = Vec::with_capacity(chain.action_count());
            for (a, slice) in chain.action_slices().enumerate() {
                actions.push((RegKey::sram(slice, dst), block.sram.row(a, i)?));
            }
            regs.write_sequence(&actions)?;

            let mut conditions = Vec::with_capacity(chain.condition_count());
            let mut moved = Vec::with_capacity(chain.condition_count());
            for (c, slice) in chain.condition_slices().enumerate() {
                let (src_key, dst_key) = (RegKey::tcam(slice, src), RegKey::tcam(slice, dst));
                conditions.push((dst_key, block.tcam.row(c, i)?));
                moved.push((src_key, dst_key));
            }
            // The source tag is still in place: the walk order never lands
            // on a row whose rule has not moved yet.
            if let Err(e) = regs.write_sequence(&conditions) {
                for &(_, dst_key) in &moved {
                    regs.clear_key_valid(dst_key);
                }
                return Err(e);
            }
            for &(src_key, dst_key) in &moved {
                regs.copy_key_valid(src_key, dst_key);
            }

            let cleared: Vec<(RegKey, [u32; 4])> = chain
                .condition_slices()
                .map(|slice| (RegKey::tcam(slice, src), TcamWords::INVALID.to_words()))
                .collect();
            regs.write_sequence(&cleared)?;
            for slice in chain.condition_slices() {
                regs.clear_key_valid(RegKey::tcam(slice, src));
            }
        }
        Ok(())
    }

    /// Duplicates `n` rules from `from` to `to`. Live copies land invalid
    /// and are re-validated to the source's state one rule at a time.
    pub fn copy_rules(
        &self,
        info: &FfuSliceInfo,
        from: usize,
        n: usize,
        to: usize,
        live: bool,
    ) -> FfuResult<()> {
        self.check_block(info, from, n, to)?;
        if n == 0 || from == to {
            return Ok(());
        }
        let chain = info.chain;
        let use_cache = self.use_cache;
        debug!(chain = %chain, from, to, count = n, live, "Copying FFU rules");

        let mut regs = self.cache.lock();
        let block = SourceBlock::snapshot(&mut regs, chain, from, n, use_cache)?;

        if !live {
            let mut entries: Vec<(RegKey, &[u32])> = Vec::new();
            for (c, slice) in chain.condition_slices().enumerate() {
                for i in 0..n {
                    entries.push((RegKey::tcam(slice, to + i), block.tcam.row(c, i)?));
                }
            }
            for (a, slice) in chain.action_slices().enumerate() {
                for i in 0..n {
                    entries.push((RegKey::sram(slice, to + i), block.sram.row(a, i)?));
                }
            }
            let mut tags = Vec::with_capacity(chain.condition_count() * n);
            for (c, slice) in chain.condition_slices().enumerate() {
                for i in 0..n {
                    tags.push((RegKey::tcam(slice, to + i), block.tag(c, i)?));
                }
            }
            let written = regs.write(&entries, use_cache);
            return commit_tags(&mut regs, &tags, written);
        }

        for i in walk_order(from, to, n) {
            let dst = to + i;
            Self::set_valid_locked(&mut regs, chain, dst, false, use_cache)?;
            let mut source_valid = true;
            let mut keys = Vec::with_capacity(chain.condition_count());
            let mut tags = Vec::with_capacity(chain.condition_count());
            for (c, slice) in chain.condition_slices().enumerate() {
                let mut row = TcamWords::from_words(block.tcam.row(c, i)?)?;
                source_valid &= row.is_valid();
                row.force_invalid();
                let key = RegKey::tcam(slice, dst);
                tags.push((key, block.tag(c, i)?));
                keys.push((key, row.to_words()));
            }
            let written = regs.write(&keys, use_cache);
            commit_tags(&mut regs, &tags, written)?;

            let mut actions = Vec::with_capacity(chain.action_count());
            for (a, slice) in chain.action_slices().enumerate() {
                actions.push((RegKey::sram(slice, dst), block.sram.row(a, i)?));
            }
            regs.write(&actions, use_cache)?;

            if source_valid {
                Self::set_valid_locked(&mut regs, chain, dst, true, use_cache)?;
            }
        }
        Ok(())
    }

    /// Encodes an action with this engine's port map.
    pub fn encode_action(&self, action: &FfuAction) -> FfuResult<[u32; 2]> {
        action::encode(action, self.glorts.as_ref())
    }

    pub fn decode_action(&self, words: [u32; 2]) -> FfuResult<FfuAction> {
        action::decode(words, self.glorts.as_ref())
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("geometry", &self.geometry)
            .field("use_cache", &self.use_cache)
            .finish_non_exhaustive()
    }
}
