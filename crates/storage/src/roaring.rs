//! Container-based compressed bitmaps backed by `roaring::RoaringBitmap`

use crate::bitmaps::Bitmaps;
use roaring::RoaringBitmap;
use std::io;

/// [`Bitmaps`] implementation over roaring bitmaps.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoaringBitmaps;

impl RoaringBitmaps {
    /// Create the backend
    pub fn new() -> Self {
        RoaringBitmaps
    }
}

impl Bitmaps for RoaringBitmaps {
    type Bitmap = RoaringBitmap;

    fn create(&self) -> RoaringBitmap {
        RoaringBitmap::new()
    }

    fn create_range(&self, from: u32, to_exclusive: u32) -> RoaringBitmap {
        let mut bitmap = RoaringBitmap::new();
        if from < to_exclusive {
            bitmap.insert_range(from..to_exclusive);
        }
        bitmap
    }

    fn set(&self, bitmap: &mut RoaringBitmap, ids: &[u32]) {
        for &id in ids {
            bitmap.insert(id);
        }
    }

    fn remove(&self, bitmap: &mut RoaringBitmap, ids: &[u32]) {
        for &id in ids {
            bitmap.remove(id);
        }
    }

    fn or(&self, a: &RoaringBitmap, b: &RoaringBitmap) -> RoaringBitmap {
        a | b
    }

    fn or_many(&self, bitmaps: &[&RoaringBitmap]) -> RoaringBitmap {
        let mut result = RoaringBitmap::new();
        for bitmap in bitmaps {
            result |= *bitmap;
        }
        result
    }

    fn and(&self, a: &RoaringBitmap, b: &RoaringBitmap) -> RoaringBitmap {
        a & b
    }

    fn and_not(&self, original: &RoaringBitmap, not: &RoaringBitmap) -> RoaringBitmap {
        original - not
    }

    fn and_not_many(&self, original: &RoaringBitmap, nots: &[&RoaringBitmap]) -> RoaringBitmap {
        let mut result = original.clone();
        for not in nots {
            result -= *not;
        }
        result
    }

    fn cardinality(&self, bitmap: &RoaringBitmap) -> u64 {
        bitmap.len()
    }

    fn is_empty(&self, bitmap: &RoaringBitmap) -> bool {
        bitmap.is_empty()
    }

    fn size_in_bits(&self, bitmap: &RoaringBitmap) -> u64 {
        bitmap.max().map(|max| max as u64 + 1).unwrap_or(0)
    }

    fn size_in_bytes(&self, bitmap: &RoaringBitmap) -> u64 {
        bitmap.serialized_size() as u64
    }

    fn is_set(&self, bitmap: &RoaringBitmap, id: u32) -> bool {
        bitmap.contains(id)
    }

    fn last_set_bit(&self, bitmap: &RoaringBitmap) -> i32 {
        bitmap.max().map(|max| max as i32).unwrap_or(-1)
    }

    fn int_iter<'a>(&self, bitmap: &'a RoaringBitmap) -> Box<dyn Iterator<Item = u32> + 'a> {
        Box::new(bitmap.iter())
    }

    fn serialize(&self, bitmap: &RoaringBitmap, out: &mut Vec<u8>) -> io::Result<()> {
        bitmap.serialize_into(out)
    }

    fn deserialize(&self, bytes: &[u8]) -> io::Result<RoaringBitmap> {
        RoaringBitmap::deserialize_from(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmaps::{debug_string, debug_summary, TimeIndex};

    /// Time index over a fixed, ascending timestamp array (id = position)
    struct FixedTimes(Vec<i64>);

    impl TimeIndex for FixedTimes {
        fn last_id(&self) -> i32 {
            self.0.len() as i32 - 1
        }
        fn smallest_timestamp(&self) -> i64 {
            self.0.first().copied().unwrap_or(i64::MAX)
        }
        fn largest_timestamp(&self) -> i64 {
            self.0.last().copied().unwrap_or(i64::MIN)
        }
        fn contains(&self, timestamps: &[i64]) -> Vec<bool> {
            timestamps.iter().map(|t| self.0.contains(t)).collect()
        }
        fn get_exact_id(&self, timestamp: i64) -> i32 {
            self.0
                .iter()
                .position(|t| *t == timestamp)
                .map(|p| p as i32)
                .unwrap_or(-1)
        }
        fn smallest_exclusive_timestamp_index(&self, timestamp: i64) -> i32 {
            self.0.partition_point(|t| *t <= timestamp) as i32
        }
        fn largest_inclusive_timestamp_index(&self, timestamp: i64) -> i32 {
            self.0.partition_point(|t| *t <= timestamp) as i32 - 1
        }
    }

    #[test]
    fn test_or() {
        let bitmaps = RoaringBitmaps::new();
        let ors: Vec<RoaringBitmap> = (0..10).map(|i| bitmaps.create_with_bits(&[i * 137])).collect();
        let refs: Vec<&RoaringBitmap> = ors.iter().collect();
        let container = bitmaps.or_many(&refs);
        for i in 0..10u32 {
            if i > 0 {
                assert!(!bitmaps.is_set(&container, i * 137 - 1));
            }
            assert!(bitmaps.is_set(&container, i * 137));
            assert!(!bitmaps.is_set(&container, i * 137 + 1));
        }
    }

    #[test]
    fn test_and() {
        let bitmaps = RoaringBitmaps::new();
        let num_bits = 10u32;
        let and_bits = 3u32;
        let ands: Vec<RoaringBitmap> = (0..num_bits - and_bits)
            .map(|i| {
                let bits: Vec<u32> = (i + 1..num_bits).map(|j| j * 137).collect();
                bitmaps.create_with_bits(&bits)
            })
            .collect();
        let refs: Vec<&RoaringBitmap> = ands.iter().collect();
        let container = bitmaps.and_many(&refs);
        for i in 0..num_bits {
            assert_eq!(bitmaps.is_set(&container, i * 137), i >= num_bits - and_bits);
        }
    }

    #[test]
    fn test_and_not() {
        let bitmaps = RoaringBitmaps::new();
        let original_bits: Vec<u32> = (0..10).map(|i| i * 137).collect();
        let not_bits: Vec<u32> = (0..3).map(|i| i * 137).collect();
        let original = bitmaps.create_with_bits(&original_bits);
        let not = bitmaps.create_with_bits(&not_bits);
        let container = bitmaps.and_not(&original, &not);
        for i in 0..10u32 {
            assert_eq!(bitmaps.is_set(&container, i * 137), i >= 3);
        }
    }

    #[test]
    fn test_and_not_many() {
        let bitmaps = RoaringBitmaps::new();
        let original_bits: Vec<u32> = (0..10).map(|i| i * 137).collect();
        let original = bitmaps.create_with_bits(&original_bits);
        let nots: Vec<RoaringBitmap> = (0..3).map(|i| bitmaps.create_with_bits(&[i * 137])).collect();
        let refs: Vec<&RoaringBitmap> = nots.iter().collect();
        let container = bitmaps.and_not_many(&original, &refs);
        for i in 0..10u32 {
            assert_eq!(bitmaps.is_set(&container, i * 137), i >= 3);
        }
    }

    #[test]
    fn test_and_many_of_nothing_is_empty() {
        let bitmaps = RoaringBitmaps::new();
        assert!(bitmaps.is_empty(&bitmaps.and_many(&[])));
    }

    #[test]
    fn test_sizes_and_last_bit() {
        let bitmaps = RoaringBitmaps::new();
        let empty = bitmaps.create();
        assert_eq!(bitmaps.size_in_bits(&empty), 0);
        assert_eq!(bitmaps.last_set_bit(&empty), -1);

        let bitmap = bitmaps.create_with_bits(&[3, 64, 1000]);
        assert_eq!(bitmaps.cardinality(&bitmap), 3);
        assert_eq!(bitmaps.size_in_bits(&bitmap), 1001);
        assert_eq!(bitmaps.last_set_bit(&bitmap), 1000);
        assert!(bitmaps.size_in_bytes(&bitmap) > 0);
    }

    #[test]
    fn test_int_iter_is_restartable() {
        let bitmaps = RoaringBitmaps::new();
        let bitmap = bitmaps.create_with_bits(&[9, 1, 5]);
        let first: Vec<u32> = bitmaps.int_iter(&bitmap).collect();
        let second: Vec<u32> = bitmaps.int_iter(&bitmap).collect();
        assert_eq!(first, vec![1, 5, 9]);
        assert_eq!(first, second);
        assert_eq!(debug_string(&bitmaps, &bitmap), "1\n5\n9\n");
    }

    #[test]
    fn test_build_index_mask() {
        let bitmaps = RoaringBitmaps::new();
        let removed = bitmaps.create_with_bits(&[2, 4]);
        let mask = bitmaps.build_index_mask(5, Some(&removed));
        let ids: Vec<u32> = bitmaps.int_iter(&mask).collect();
        assert_eq!(ids, vec![0, 1, 3, 5]);
        assert!(bitmaps.is_empty(&bitmaps.build_index_mask(-1, None)));
    }

    #[test]
    fn test_build_time_range_mask() {
        let bitmaps = RoaringBitmaps::new();
        let times = FixedTimes(vec![10, 20, 30, 40, 50]);
        let mask = bitmaps.build_time_range_mask(&times, 20, 40);
        let ids: Vec<u32> = bitmaps.int_iter(&mask).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(bitmaps.is_empty(&bitmaps.build_time_range_mask(&times, 50, 90)));
        assert!(bitmaps.is_empty(&bitmaps.build_time_range_mask(&times, 0, 5)));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let bitmaps = RoaringBitmaps::new();
        let bitmap = bitmaps.create_with_bits(&[1, 70_000, 3]);
        let mut buf = Vec::new();
        bitmaps.serialize(&bitmap, &mut buf).unwrap();
        assert_eq!(bitmaps.deserialize(&buf).unwrap(), bitmap);
    }

    #[test]
    fn test_debug_summary() {
        let bitmaps = RoaringBitmaps::new();
        let bitmap = bitmaps.create_with_bits(&[1, 2]);
        let summary = debug_summary(&bitmaps, "ands", &[&bitmap]);
        assert!(summary.contains("cardinality=2"));
        assert!(debug_summary(&bitmaps, "none", &[]).ends_with("-0-"));
    }

    #[test]
    #[should_panic(expected = "negative id")]
    fn test_negative_id_is_fatal() {
        crate::bitmaps::to_bit(-1);
    }
}
