//! Bit addressing: slot extraction from key hashes and slot bitmaps
//!
//! A node has `2^bit_width` slots. The slot used for a key at a given depth
//! is read from the key's hash as a big-endian bit stream, `bit_width` bits
//! at a time. Bitmaps record which slots are occupied and map a slot to its
//! position in the node's dense element array.

use crate::{Error, Result};
use serde::de::{self, SeqAccess, Unexpected, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Largest supported bit width (256 slots per node)
pub const MAX_BIT_WIDTH: u32 = 8;

const WORDS: usize = 4;
const WORD_BITS: usize = 64;

/// Number of slots in a node with the given bit width
pub fn slot_count(bit_width: u32) -> usize {
    1usize << bit_width
}

/// Read `bit_width` bits starting at `bit_offset` from `bytes`, most
/// significant bit first, spanning byte boundaries.
///
/// Bits past the end of `bytes` read as zero; callers bound the offset by the
/// maximum depth so this never happens for a valid trie.
pub fn extract_bits(bytes: &[u8], bit_offset: usize, bit_width: u32) -> usize {
    (0..bit_width as usize).fold(0usize, |acc, i| {
        let pos = bit_offset + i;
        let bit = bytes.get(pos / 8).map_or(0, |b| (b >> (7 - pos % 8)) & 1);
        (acc << 1) | usize::from(bit)
    })
}

pub fn bitmap_test(bitmap: &Bitmap, pos: usize) -> bool {
    bitmap.test(pos)
}

pub fn bitmap_set(bitmap: Bitmap, pos: usize, value: bool) -> Bitmap {
    bitmap.set(pos, value)
}

/// Dense element offset of slot `pos`
pub fn popcount_below(bitmap: &Bitmap, pos: usize) -> usize {
    bitmap.popcount_below(pos)
}

/// Slot occupancy bitmap for up to 256 slots.
///
/// Bit `i` is bit `i` of the bitmap read as an unsigned integer, so the top
/// slot of a 32-slot node is the integer's bit 31 and never wraps into a sign.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Bitmap([u64; WORDS]);

impl Bitmap {
    pub const EMPTY: Bitmap = Bitmap([0; WORDS]);

    /// Build from the low 64 slots
    pub fn from_u64(bits: u64) -> Self {
        Bitmap([bits, 0, 0, 0])
    }

    /// Test whether slot `pos` is set
    pub fn test(&self, pos: usize) -> bool {
        pos < WORDS * WORD_BITS && (self.0[pos / WORD_BITS] >> (pos % WORD_BITS)) & 1 == 1
    }

    /// Return a copy with slot `pos` set or cleared; slots past 255 do not
    /// exist and leave the bitmap unchanged
    pub fn set(self, pos: usize, value: bool) -> Self {
        if pos >= WORDS * WORD_BITS {
            return self;
        }
        let mut words = self.0;
        let mask = 1u64 << (pos % WORD_BITS);
        if value {
            words[pos / WORD_BITS] |= mask;
        } else {
            words[pos / WORD_BITS] &= !mask;
        }
        Bitmap(words)
    }

    /// Number of set slots strictly below `pos`; this is the dense array
    /// offset of slot `pos`. `pos` may equal the slot count.
    pub fn popcount_below(&self, pos: usize) -> usize {
        let word = pos / WORD_BITS;
        let bit = pos % WORD_BITS;
        let whole: usize = self.0[..word.min(WORDS)]
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum();
        if word < WORDS && bit > 0 {
            whole + (self.0[word] & ((1u64 << bit) - 1)).count_ones() as usize
        } else {
            whole
        }
    }

    pub fn count_ones(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    /// True when no slot is set in both bitmaps
    pub fn is_disjoint(&self, other: &Bitmap) -> bool {
        (*self & *other).is_empty()
    }

    /// Iterate set slots in ascending order
    pub fn ones(self) -> impl Iterator<Item = usize> {
        (0..WORDS * WORD_BITS).filter(move |pos| self.test(*pos))
    }

    /// Reject any slot at or above the slot count of `bit_width`
    pub fn check_width(&self, bit_width: u32) -> Result<()> {
        let slots = slot_count(bit_width);
        if self.popcount_below(slots) != self.count_ones() {
            return Err(Error::malformed(format!(
                "bitmap has bits set beyond slot {}",
                slots - 1
            )));
        }
        Ok(())
    }

    fn fits_u64(&self) -> bool {
        self.0[1..].iter().all(|w| *w == 0)
    }
}

/// Human-readable formats get the bitmap integer itself. A bitmap with a slot
/// at 64 or above (bit widths 7 and 8) does not fit a JSON integer and is
/// written as its four 64-bit words, most significant first. Binary formats
/// always carry the four words.
impl Serialize for Bitmap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if !serializer.is_human_readable() {
            return self.0.serialize(serializer);
        }
        if self.fits_u64() {
            serializer.serialize_u64(self.0[0])
        } else {
            serializer.collect_seq(self.0.iter().rev())
        }
    }
}

impl<'de> Deserialize<'de> for Bitmap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(BitmapVisitor)
        } else {
            <[u64; WORDS]>::deserialize(deserializer).map(Bitmap)
        }
    }
}

struct BitmapVisitor;

impl<'de> Visitor<'de> for BitmapVisitor {
    type Value = Bitmap;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a non-negative bitmap integer or {} big-endian u64 words", WORDS)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Bitmap, E> {
        Ok(Bitmap::from_u64(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Bitmap, E> {
        u64::try_from(v)
            .map(Bitmap::from_u64)
            .map_err(|_| E::invalid_value(Unexpected::Signed(v), &self))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Bitmap, A::Error> {
        let mut words = [0u64; WORDS];
        for (read, word) in words.iter_mut().rev().enumerate() {
            *word = seq
                .next_element::<u64>()?
                .ok_or_else(|| <A::Error as de::Error>::invalid_length(read, &self))?;
        }
        if seq.next_element::<u64>()?.is_some() {
            return Err(de::Error::invalid_length(WORDS + 1, &self));
        }
        Ok(Bitmap(words))
    }
}

impl BitOr for Bitmap {
    type Output = Bitmap;

    fn bitor(self, rhs: Bitmap) -> Bitmap {
        let mut words = self.0;
        for (w, r) in words.iter_mut().zip(rhs.0) {
            *w |= r;
        }
        Bitmap(words)
    }
}

impl BitAnd for Bitmap {
    type Output = Bitmap;

    fn bitand(self, rhs: Bitmap) -> Bitmap {
        let mut words = self.0;
        for (w, r) in words.iter_mut().zip(rhs.0) {
            *w &= r;
        }
        Bitmap(words)
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitmap({:?})", self.ones().collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_within_byte() {
        assert_eq!(extract_bits(&[0b1111_1111], 0, 5), 0b11111);
        assert_eq!(extract_bits(&[0b1010_1010], 0, 5), 0b10101);
        assert_eq!(extract_bits(&[0b1010_1010], 3, 5), 0b01010);
        assert_eq!(extract_bits(&[0x32], 0, 4), 3);
        assert_eq!(extract_bits(&[0x32], 4, 4), 2);
        assert_eq!(extract_bits(&[0x32, 0x54], 8, 4), 5);
        assert_eq!(extract_bits(&[0x32, 0x54], 12, 4), 4);
    }

    #[test]
    fn test_extract_spans_bytes() {
        // two bits from the first byte, one from the second
        assert_eq!(extract_bits(&[0b0000_0011, 0b1000_0000], 6, 3), 0b111);
        assert_eq!(extract_bits(&[0b0000_0001, 0b0111_1111], 7, 8), 0b1011_1111);
        assert_eq!(extract_bits(&[0xff, 0x00, 0xff], 5, 5), 0b11100);
    }

    #[test]
    fn test_extract_past_end_reads_zero() {
        assert_eq!(extract_bits(&[0xff], 6, 4), 0b1100);
        assert_eq!(extract_bits(&[], 0, 8), 0);
    }

    #[test]
    fn test_bitmap_test() {
        let b = Bitmap::from_u64(0b101010);
        assert!(!b.test(0));
        assert!(b.test(1));
        assert!(!b.test(2));
        assert!(b.test(3));
        assert!(b.test(5));
        assert!(!b.test(6));
        assert!(!Bitmap::EMPTY.test(255));
    }

    #[test]
    fn test_bitmap_set_and_clear() {
        assert_eq!(Bitmap::EMPTY.set(0, true), Bitmap::from_u64(1));
        assert_eq!(Bitmap::EMPTY.set(7, true), Bitmap::from_u64(0b1000_0000));
        assert_eq!(
            Bitmap::from_u64(0b0101_0101).set(1, true),
            Bitmap::from_u64(0b0101_0111)
        );
        assert_eq!(
            Bitmap::from_u64(0b1111_1111).set(7, false),
            Bitmap::from_u64(0b0111_1111)
        );
        assert_eq!(Bitmap::EMPTY.set(7, false), Bitmap::EMPTY);
        let b = Bitmap::from_u64(0b0110_0001_0110_1001_0010_0101_0000_0001);
        assert_eq!(b.set(0, false).set(0, true), b);
    }

    #[test]
    fn test_top_bit_of_32_slot_bitmap() {
        let b = Bitmap::EMPTY.set(31, true);
        assert_eq!(b, Bitmap::from_u64(0x8000_0000));
        assert_eq!(serde_json::to_value(b).unwrap(), serde_json::json!(0x8000_0000u64));
        assert_eq!(b.count_ones(), 1);
        assert_eq!(b.popcount_below(31), 0);
        assert_eq!(b.popcount_below(32), 1);
    }

    #[test]
    fn test_popcount_below() {
        let full = Bitmap::from_u64(0b111111);
        assert_eq!(full.popcount_below(0), 0);
        assert_eq!(full.popcount_below(4), 4);
        assert_eq!(Bitmap::from_u64(0b111100).popcount_below(2), 0);
        assert_eq!(Bitmap::from_u64(0b111101).popcount_below(4), 3);
        assert_eq!(Bitmap::from_u64(0b111001).popcount_below(4), 2);
        assert_eq!(Bitmap::EMPTY.popcount_below(3), 0);
    }

    #[test]
    fn test_wide_bitmap() {
        let b = Bitmap::EMPTY.set(63, true).set(64, true).set(255, true);
        assert!(b.test(64));
        assert_eq!(b.popcount_below(64), 1);
        assert_eq!(b.popcount_below(255), 2);
        assert_eq!(b.popcount_below(256), 3);
        assert_eq!(b.ones().collect::<Vec<_>>(), vec![63, 64, 255]);
        assert!(b.check_width(8).is_ok());
        assert!(b.check_width(7).is_err());
    }

    #[test]
    fn test_set_beyond_last_slot_is_ignored() {
        let b = Bitmap::from_u64(0b11);
        assert_eq!(b.set(256, true), b);
        assert_eq!(b.set(10_000, false), b);
        assert_eq!(bitmap_set(Bitmap::EMPTY, 300, true), Bitmap::EMPTY);
        assert!(!bitmap_test(&b, 300));
    }

    #[test]
    fn test_check_width() {
        // bit width 2 has four slots; bit 4 does not exist
        assert!(Bitmap::from_u64(0b1_0000).check_width(2).is_err());
        assert!(Bitmap::from_u64(0b1010).check_width(2).is_ok());
        assert!(Bitmap::EMPTY.set(31, true).check_width(5).is_ok());
        assert!(Bitmap::EMPTY.set(32, true).check_width(5).is_err());
    }

    #[test]
    fn test_json_form_is_an_integer() {
        assert_eq!(serde_json::to_string(&Bitmap::EMPTY).unwrap(), "0");
        assert_eq!(serde_json::to_string(&Bitmap::from_u64(0b110011)).unwrap(), "51");
        let b: Bitmap = serde_json::from_str("42").unwrap();
        assert_eq!(b, Bitmap::from_u64(42));
        assert_eq!(serde_json::from_str::<Bitmap>("0").unwrap(), Bitmap::EMPTY);
        for bad in ["-1", "1.5", "\"foo\"", "null", "[1, 2]"] {
            assert!(serde_json::from_str::<Bitmap>(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_json_form_of_wide_bitmap_is_words() {
        let b = Bitmap::EMPTY.set(0, true).set(64, true).set(255, true);
        let json = serde_json::to_value(b).unwrap();
        assert_eq!(json, serde_json::json!([0x8000_0000_0000_0000u64, 0, 1, 1]));
        assert_eq!(serde_json::from_value::<Bitmap>(json).unwrap(), b);
    }

    #[test]
    fn test_binary_form_roundtrip() {
        for b in [Bitmap::EMPTY, Bitmap::from_u64(7), Bitmap::EMPTY.set(200, true)] {
            let bytes = bincode::serialize(&b).unwrap();
            assert_eq!(bincode::deserialize::<Bitmap>(&bytes).unwrap(), b);
        }
    }

    #[test]
    fn test_disjoint() {
        let a = Bitmap::from_u64(0b110011);
        let b = Bitmap::from_u64(0b001100);
        assert!(a.is_disjoint(&b));
        assert!(!a.is_disjoint(&Bitmap::from_u64(0b000010)));
        assert_eq!((a | b).count_ones(), 6);
    }
}
