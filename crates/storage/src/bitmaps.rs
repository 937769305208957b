//! Bitmap engine capability contract
//!
//! Every index above this layer is generic over [`Bitmaps`], so the backing
//! representation can be swapped without touching index logic. Implementations
//! are stateless or cheaply shareable; the bitmap values themselves are the
//! associated [`Bitmaps::Bitmap`] type.
//!
//! None of these operations fail under normal input. Negative ids are a
//! programming error and panic (see [`to_bit`]).

use std::fmt::Debug;
use std::io;

/// Convert a signed internal id to a bit position.
///
/// # Panics
///
/// Panics if `id` is negative. Ids below zero are sentinels (`-1` = none) and
/// must never reach a bitmap.
#[inline]
pub fn to_bit(id: i32) -> u32 {
    assert!(id >= 0, "negative id {} passed to bitmap", id);
    id as u32
}

/// Read access to a time index, as needed to build time range masks.
pub trait TimeIndex: Send + Sync {
    /// Largest assigned id, or -1 when empty
    fn last_id(&self) -> i32;

    /// Smallest indexed timestamp, or `i64::MAX` when empty
    fn smallest_timestamp(&self) -> i64;

    /// Largest indexed timestamp, or `i64::MIN` when empty
    fn largest_timestamp(&self) -> i64;

    /// Whether each timestamp already has an id
    fn contains(&self, timestamps: &[i64]) -> Vec<bool>;

    /// Id assigned to exactly this timestamp, or -1
    fn get_exact_id(&self, timestamp: i64) -> i32;

    /// First id whose timestamp is strictly greater than `timestamp`
    ///
    /// Returns `last_id() + 1` when no such id exists.
    fn smallest_exclusive_timestamp_index(&self, timestamp: i64) -> i32;

    /// Last id whose timestamp is less than or equal to `timestamp`, or -1
    fn largest_inclusive_timestamp_index(&self, timestamp: i64) -> i32;
}

/// A bitmap plus the largest id ever appended to it.
///
/// `last_id` survives removals: it is the high-water mark of the posting list,
/// not the largest bit currently set.
#[derive(Debug, Clone, PartialEq)]
pub struct BitmapAndLastId<BM> {
    /// Postings
    pub bitmap: BM,
    /// High-water mark, -1 when nothing was ever appended
    pub last_id: i32,
}

impl<BM> BitmapAndLastId<BM> {
    /// Pair a bitmap with its last id
    pub fn new(bitmap: BM, last_id: i32) -> Self {
        Self { bitmap, last_id }
    }
}

/// Compressed bitmap capability set.
pub trait Bitmaps: Send + Sync + 'static {
    /// Concrete bitmap representation
    type Bitmap: Clone + Debug + Send + Sync + 'static;

    /// Empty bitmap
    fn create(&self) -> Self::Bitmap;

    /// Bitmap with exactly these bits set
    fn create_with_bits(&self, ids: &[u32]) -> Self::Bitmap {
        let mut bitmap = self.create();
        self.set(&mut bitmap, ids);
        bitmap
    }

    /// Bitmap with every bit in `[from, to_exclusive)` set
    fn create_range(&self, from: u32, to_exclusive: u32) -> Self::Bitmap;

    /// Set bits in place
    fn set(&self, bitmap: &mut Self::Bitmap, ids: &[u32]);

    /// Clear bits in place
    fn remove(&self, bitmap: &mut Self::Bitmap, ids: &[u32]);

    /// Union of two bitmaps
    fn or(&self, a: &Self::Bitmap, b: &Self::Bitmap) -> Self::Bitmap;

    /// Union of many bitmaps
    fn or_many(&self, bitmaps: &[&Self::Bitmap]) -> Self::Bitmap {
        let mut result = self.create();
        for bitmap in bitmaps {
            result = self.or(&result, bitmap);
        }
        result
    }

    /// Intersection of two bitmaps
    fn and(&self, a: &Self::Bitmap, b: &Self::Bitmap) -> Self::Bitmap;

    /// Intersection of many bitmaps; empty input yields an empty bitmap
    fn and_many(&self, bitmaps: &[&Self::Bitmap]) -> Self::Bitmap {
        match bitmaps.split_first() {
            None => self.create(),
            Some((first, rest)) => rest
                .iter()
                .fold((*first).clone(), |acc, bitmap| self.and(&acc, bitmap)),
        }
    }

    /// Bits of `original` not set in `not`
    fn and_not(&self, original: &Self::Bitmap, not: &Self::Bitmap) -> Self::Bitmap;

    /// Bits of `original` not set in any of `nots`
    fn and_not_many(&self, original: &Self::Bitmap, nots: &[&Self::Bitmap]) -> Self::Bitmap {
        nots.iter()
            .fold(original.clone(), |acc, not| self.and_not(&acc, not))
    }

    /// Number of set bits
    fn cardinality(&self, bitmap: &Self::Bitmap) -> u64;

    /// True when no bit is set
    fn is_empty(&self, bitmap: &Self::Bitmap) -> bool {
        self.cardinality(bitmap) == 0
    }

    /// Logical width: last set bit + 1, or 0 when empty
    fn size_in_bits(&self, bitmap: &Self::Bitmap) -> u64;

    /// Serialized footprint in bytes
    fn size_in_bytes(&self, bitmap: &Self::Bitmap) -> u64;

    /// Whether a bit is set
    fn is_set(&self, bitmap: &Self::Bitmap, id: u32) -> bool;

    /// Largest set bit, or -1 when empty
    fn last_set_bit(&self, bitmap: &Self::Bitmap) -> i32;

    /// Forward iterator over set bits. Finite; call again to restart.
    fn int_iter<'a>(&self, bitmap: &'a Self::Bitmap) -> Box<dyn Iterator<Item = u32> + 'a>;

    /// Bitmap selecting `[0, last_id]` minus removed ids
    fn build_index_mask(&self, last_id: i32, removal: Option<&Self::Bitmap>) -> Self::Bitmap {
        let mask = if last_id < 0 {
            self.create()
        } else {
            self.create_range(0, to_bit(last_id) + 1)
        };
        match removal {
            Some(removed) => self.and_not(&mask, removed),
            None => mask,
        }
    }

    /// Bitmap selecting ids whose timestamp is in `(lo, hi]`
    fn build_time_range_mask(&self, time_index: &dyn TimeIndex, lo: i64, hi: i64) -> Self::Bitmap {
        let smallest = time_index.smallest_exclusive_timestamp_index(lo);
        let largest = time_index.largest_inclusive_timestamp_index(hi);
        if largest < 0 || smallest > largest {
            return self.create();
        }
        self.create_range(to_bit(smallest.max(0)), to_bit(largest) + 1)
    }

    /// Append the portable encoding of a bitmap to `out`
    fn serialize(&self, bitmap: &Self::Bitmap, out: &mut Vec<u8>) -> io::Result<()>;

    /// Decode a bitmap produced by [`Bitmaps::serialize`]
    fn deserialize(&self, bytes: &[u8]) -> io::Result<Self::Bitmap>;
}

/// Render the set bits of a bitmap, one per line.
pub fn debug_string<B: Bitmaps>(bitmaps: &B, bitmap: &B::Bitmap) -> String {
    let mut buf = String::new();
    for id in bitmaps.int_iter(bitmap) {
        buf.push_str(&id.to_string());
        buf.push('\n');
    }
    buf
}

/// One-line summary per bitmap: cardinality, width and byte size.
pub fn debug_summary<B: Bitmaps>(bitmaps: &B, message: &str, iter: &[&B::Bitmap]) -> String {
    let mut buf = String::from(message);
    for (i, bitmap) in iter.iter().enumerate() {
        buf.push_str(&format!(
            "\n  {}. cardinality={} sizeInBits={} sizeInBytes={}",
            i + 1,
            bitmaps.cardinality(bitmap),
            bitmaps.size_in_bits(bitmap),
            bitmaps.size_in_bytes(bitmap)
        ));
    }
    if iter.is_empty() {
        buf.push_str(" -0-");
    }
    buf
}
