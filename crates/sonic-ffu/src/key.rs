//! Ternary key codec.
//!
//! A ternary `(value, mask)` is stored as a `(key, key_invert)` pair: a care
//! bit matching 1 is `1/0`, matching 0 is `0/1`, don't-care is `0/0`. The
//! `1/1` combination never matches; on bit0 of the low word it is the
//! hardware's "row invalid" sentinel. Because the sentinel overwrites the
//! rule's real bit0, the real pair is kept aside as a [`KeyValid`] tag.

use crate::error::{FfuError, FfuResult};
use crate::types::{CaseLocation, FfuCase, FfuSliceKey, CASE_MAX};

/// Width of a slice key.
pub const KEY_BITS: u32 = 40;
/// Bits of `key` carried by the top word.
pub const KEY_TOP_BITS: u32 = 8;

const KEY_LOW_MASK: u64 = 0xFFFF_FFFF;
const KEY_FULL_MASK: u64 = (1u64 << KEY_BITS) - 1;
const TOP_MASK: u32 = (1 << KEY_TOP_BITS) - 1;

/// Logical bit0 pair of a TCAM key, as it was before any forced invalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyValid {
    /// `0/0`
    #[default]
    DontCare,
    /// `1/0`
    MatchOne,
    /// `0/1`
    MatchZero,
}

impl KeyValid {
    /// Tag for a bit0 pair, or `None` for the `1/1` sentinel.
    pub const fn from_bits(key: u32, key_invert: u32) -> Option<Self> {
        match (key & 1, key_invert & 1) {
            (0, 0) => Some(Self::DontCare),
            (1, 0) => Some(Self::MatchOne),
            (0, 1) => Some(Self::MatchZero),
            _ => None,
        }
    }

    /// `(key bit0, key_invert bit0)` implied by the tag.
    pub const fn bits(self) -> (u32, u32) {
        match self {
            Self::DontCare => (0, 0),
            Self::MatchOne => (1, 0),
            Self::MatchZero => (0, 1),
        }
    }

    /// Overwrites bit0 of both words with the pair implied by the tag.
    pub fn apply(self, key: &mut u32, key_invert: &mut u32) {
        let (k, ki) = self.bits();
        *key = (*key & !1) | k;
        *key_invert = (*key_invert & !1) | ki;
    }
}

/// False exactly when bit0 of both words is set.
pub const fn is_valid(key: u32, key_invert: u32) -> bool {
    (key & key_invert & 1) == 0
}

/// Encodes a ternary value over the 40 key bits.
pub const fn encode(value: u64, mask: u64) -> (u64, u64) {
    let mask = mask & KEY_FULL_MASK;
    (value & mask, !value & mask)
}

/// Decodes a `(key, key_invert)` pair back to `(value, mask)`.
///
/// A `1/1` pair on any bit other than bit0 cannot be produced by
/// [`encode`] and is reported as an internal invariant violation. On bit0 it
/// decodes as a care bit matching 1; restore the KeyValid tag first to get
/// the rule's real bit0.
pub fn decode(key: u64, key_invert: u64) -> FfuResult<(u64, u64)> {
    let both = key & key_invert & !1;
    if both != 0 {
        return Err(FfuError::internal(format!(
            "key 0x{:010x} / invert 0x{:010x} has never-match bits 0x{:010x}",
            key, key_invert, both
        )));
    }
    Ok((key, key | key_invert))
}

/// The four TCAM words of one slice row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TcamWords {
    pub key: u32,
    pub key_top: u32,
    pub key_invert: u32,
    pub key_top_invert: u32,
}

impl TcamWords {
    /// Row content written when a row is invalidated and cleared.
    pub const INVALID: Self = Self {
        key: 1,
        key_top: 0,
        key_invert: 1,
        key_top_invert: 0,
    };

    pub fn from_words(words: &[u32]) -> FfuResult<Self> {
        match words {
            [key, key_top, key_invert, key_top_invert] => Ok(Self {
                key: *key,
                key_top: *key_top,
                key_invert: *key_invert,
                key_top_invert: *key_top_invert,
            }),
            _ => Err(FfuError::internal(format!(
                "TCAM entry has {} words, expected 4",
                words.len()
            ))),
        }
    }

    pub const fn to_words(self) -> [u32; 4] {
        [self.key, self.key_top, self.key_invert, self.key_top_invert]
    }

    pub const fn is_valid(&self) -> bool {
        is_valid(self.key, self.key_invert)
    }

    /// Current bit0 tag, `None` while the sentinel is in place.
    pub const fn key_valid(&self) -> Option<KeyValid> {
        KeyValid::from_bits(self.key, self.key_invert)
    }

    /// Forces the row-invalid sentinel onto bit0.
    pub fn force_invalid(&mut self) {
        self.key |= 1;
        self.key_invert |= 1;
    }

    /// Restores bit0 from a tag.
    pub fn restore(&mut self, tag: KeyValid) {
        tag.apply(&mut self.key, &mut self.key_invert);
    }

    fn key64(&self) -> u64 {
        self.key as u64 | ((self.key_top & TOP_MASK) as u64) << 32
    }

    fn key_invert64(&self) -> u64 {
        self.key_invert as u64 | ((self.key_top_invert & TOP_MASK) as u64) << 32
    }
}

/// Key bits the case value occupies for a location.
const fn case_bits(location: CaseLocation) -> u64 {
    match location {
        CaseLocation::NotMapped => 0,
        CaseLocation::TopLowNibble => 0xF << 32,
        CaseLocation::TopHighNibble => 0xF << 36,
    }
}

const fn case_shift(location: CaseLocation) -> u32 {
    match location {
        CaseLocation::TopHighNibble => 36,
        CaseLocation::NotMapped | CaseLocation::TopLowNibble => 32,
    }
}

/// Encodes one slice key into TCAM words, packing the case value where
/// `location` says.
pub fn encode_slice_key(key: &FfuSliceKey, location: CaseLocation) -> FfuResult<TcamWords> {
    let case_region = case_bits(location);
    let usable = KEY_FULL_MASK & !case_region;

    if key.key_mask & !usable != 0 {
        return Err(FfuError::invalid_argument(format!(
            "key mask 0x{:x} uses bits outside 0x{:010x} ({:?})",
            key.key_mask, usable, location
        )));
    }
    if key.case.value > CASE_MAX || key.case.mask > CASE_MAX {
        return Err(FfuError::invalid_argument(format!(
            "case {}/{} exceeds 4 bits",
            key.case.value, key.case.mask
        )));
    }
    if location == CaseLocation::NotMapped && !key.case.is_dont_care() {
        return Err(FfuError::invalid_argument(
            "case match requested on a slice with no case location",
        ));
    }

    let (mut k, mut ki) = encode(key.key, key.key_mask);
    if location != CaseLocation::NotMapped {
        let shift = case_shift(location);
        let (ck, cki) = encode(key.case.value as u64, key.case.mask as u64);
        k |= (ck & 0xF) << shift;
        ki |= (cki & 0xF) << shift;
    }

    Ok(TcamWords {
        key: (k & KEY_LOW_MASK) as u32,
        key_top: (k >> 32) as u32 & TOP_MASK,
        key_invert: (ki & KEY_LOW_MASK) as u32,
        key_top_invert: (ki >> 32) as u32 & TOP_MASK,
    })
}

/// Decodes TCAM words back into a slice key using the same case location
/// they were encoded with.
pub fn decode_slice_key(words: &TcamWords, location: CaseLocation) -> FfuResult<FfuSliceKey> {
    let (value, mask) = decode(words.key64(), words.key_invert64())?;

    let region = case_bits(location);
    let case = if location == CaseLocation::NotMapped {
        FfuCase::DONT_CARE
    } else {
        let shift = case_shift(location);
        FfuCase {
            value: ((value >> shift) & 0xF) as u8,
            mask: ((mask >> shift) & 0xF) as u8,
        }
    };

    Ok(FfuSliceKey {
        key: value & !region,
        key_mask: mask & !region,
        case,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const LOCATIONS: [CaseLocation; 3] = [
        CaseLocation::NotMapped,
        CaseLocation::TopLowNibble,
        CaseLocation::TopHighNibble,
    ];

    #[test]
    fn test_encode_basic() {
        let (k, ki) = encode(0b1010, 0b1110);
        assert_eq!(k, 0b1010);
        assert_eq!(ki, 0b0100);
        assert_eq!(decode(k, ki).unwrap(), (0b1010, 0b1110));
    }

    #[test]
    fn test_sentinel() {
        assert!(is_valid(0, 0));
        assert!(is_valid(1, 0));
        assert!(is_valid(0, 1));
        assert!(!is_valid(1, 1));
        assert!(!is_valid(0xFFFF_FFFF, 0x0000_0001));
        assert!(is_valid(0xFFFF_FFFE, 0xFFFF_FFFF));
    }

    #[test]
    fn test_decode_rejects_never_match_bits() {
        let err = decode(0b110, 0b010).unwrap_err();
        assert!(matches!(err, FfuError::InternalInvariantViolation { .. }));
        // bit0 1/1 is the sentinel and decodes without error.
        assert_eq!(decode(1, 1).unwrap(), (1, 1));
    }

    #[test]
    fn test_key_valid_tags() {
        assert_eq!(KeyValid::from_bits(0, 0), Some(KeyValid::DontCare));
        assert_eq!(KeyValid::from_bits(3, 2), Some(KeyValid::MatchOne));
        assert_eq!(KeyValid::from_bits(2, 1), Some(KeyValid::MatchZero));
        assert_eq!(KeyValid::from_bits(1, 1), None);

        let (mut k, mut ki) = (0xF1, 0x01);
        KeyValid::MatchZero.apply(&mut k, &mut ki);
        assert_eq!((k, ki), (0xF0, 0x01));
    }

    #[test]
    fn test_force_invalid_then_restore() {
        let key = FfuSliceKey::new(0x12_3456_7800, 0xFF_FFFF_FF01);
        let mut words = encode_slice_key(&key, CaseLocation::NotMapped).unwrap();
        let tag = words.key_valid().unwrap();
        assert_eq!(tag, KeyValid::MatchZero);

        words.force_invalid();
        assert!(!words.is_valid());

        words.restore(tag);
        assert!(words.is_valid());
        assert_eq!(decode_slice_key(&words, CaseLocation::NotMapped).unwrap(), key);
    }

    #[test]
    fn test_case_low_nibble() {
        let key = FfuSliceKey::new(0xA0_0000_0001, 0xF0_0000_0001).with_case(FfuCase::exact(0x5));
        let words = encode_slice_key(&key, CaseLocation::TopLowNibble).unwrap();
        assert_eq!(words.key_top, 0xA5);
        assert_eq!(words.key_top_invert, 0x5A);
        assert_eq!(decode_slice_key(&words, CaseLocation::TopLowNibble).unwrap(), key);
    }

    #[test]
    fn test_case_high_nibble() {
        let key = FfuSliceKey::new(0x03_0000_0000, 0x0F_0000_0000).with_case(FfuCase::exact(0x9));
        let words = encode_slice_key(&key, CaseLocation::TopHighNibble).unwrap();
        assert_eq!(words.key_top, 0x93);
        assert_eq!(decode_slice_key(&words, CaseLocation::TopHighNibble).unwrap(), key);
    }

    #[test]
    fn test_case_region_rejected() {
        let key = FfuSliceKey::new(0x1_0000_0000, 0x1_0000_0000);
        assert!(encode_slice_key(&key, CaseLocation::TopLowNibble).is_err());
        assert!(encode_slice_key(&key, CaseLocation::NotMapped).is_ok());

        let key = FfuSliceKey::new(0, 1 << 40);
        assert!(encode_slice_key(&key, CaseLocation::NotMapped).is_err());

        let key = FfuSliceKey::any().with_case(FfuCase::exact(1));
        assert!(encode_slice_key(&key, CaseLocation::NotMapped).is_err());
    }

    fn usable(location: CaseLocation) -> u64 {
        KEY_FULL_MASK & !case_bits(location)
    }

    proptest! {
        #[test]
        fn prop_slice_key_round_trip(
            value in any::<u64>(),
            mask in any::<u64>(),
            case_value in 0u8..16,
            case_mask in 0u8..16,
            loc in 0usize..3,
        ) {
            let location = LOCATIONS[loc];
            let mask = mask & usable(location);
            let case = if location == CaseLocation::NotMapped {
                FfuCase::DONT_CARE
            } else {
                FfuCase { value: case_value & case_mask, mask: case_mask }
            };
            let key = FfuSliceKey::new(value & mask, mask).with_case(case);

            let mut words = encode_slice_key(&key, location).unwrap();
            prop_assert!(words.is_valid());
            prop_assert_eq!(decode_slice_key(&words, location).unwrap(), key);

            let tag = words.key_valid().unwrap();
            words.force_invalid();
            prop_assert!(!words.is_valid());
            words.restore(tag);
            prop_assert_eq!(decode_slice_key(&words, location).unwrap(), key);
        }
    }
}
