//! Checksummed record framing for persisted postings
//!
//! Every value written to a [`ValueIndex`](crate::ValueIndex) by the delta
//! indexes goes through [`seal`] and comes back through [`unseal`]:
//!
//! ```text
//! [crc32 u32 LE][payload ...]
//! ```
//!
//! Postings payloads are `[last_id i32 LE][bitmap bytes]`. A checksum
//! mismatch or a payload that fails to decode is reported as
//! [`SiftError::Corruption`], which the partition context treats as sticky.

use crate::bitmaps::{BitmapAndLastId, Bitmaps};
use byteorder::{ByteOrder, LittleEndian};
use sift_core::{SiftError, SiftResult};

const CRC_LEN: usize = 4;
const LAST_ID_LEN: usize = 4;

/// Prefix a payload with its crc32.
pub fn seal(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(CRC_LEN + payload.len());
    out.extend_from_slice(&[0u8; CRC_LEN]);
    out.extend_from_slice(payload);
    LittleEndian::write_u32(&mut out[..CRC_LEN], crc32fast::hash(payload));
    out
}

/// Verify and strip the crc32 prefix.
pub fn unseal(record: &[u8]) -> SiftResult<&[u8]> {
    if record.len() < CRC_LEN {
        return Err(SiftError::corruption(format!(
            "record too short: {} bytes",
            record.len()
        )));
    }
    let expected = LittleEndian::read_u32(&record[..CRC_LEN]);
    let payload = &record[CRC_LEN..];
    let actual = crc32fast::hash(payload);
    if expected != actual {
        return Err(SiftError::corruption(format!(
            "checksum mismatch: expected {:08x}, got {:08x}",
            expected, actual
        )));
    }
    Ok(payload)
}

/// Encode a posting list with its last id as a sealed record.
pub fn encode_postings<B: Bitmaps>(
    bitmaps: &B,
    postings: &BitmapAndLastId<B::Bitmap>,
) -> SiftResult<Vec<u8>> {
    let mut payload = vec![0u8; LAST_ID_LEN];
    LittleEndian::write_i32(&mut payload, postings.last_id);
    bitmaps
        .serialize(&postings.bitmap, &mut payload)
        .map_err(|e| SiftError::Serialization(e.to_string()))?;
    Ok(seal(&payload))
}

/// Decode a sealed posting list record.
pub fn decode_postings<B: Bitmaps>(
    bitmaps: &B,
    record: &[u8],
) -> SiftResult<BitmapAndLastId<B::Bitmap>> {
    let payload = unseal(record)?;
    if payload.len() < LAST_ID_LEN {
        return Err(SiftError::corruption("postings payload missing last id"));
    }
    let last_id = LittleEndian::read_i32(&payload[..LAST_ID_LEN]);
    let bitmap = bitmaps
        .deserialize(&payload[LAST_ID_LEN..])
        .map_err(|e| SiftError::corruption(format!("undecodable postings: {}", e)))?;
    Ok(BitmapAndLastId::new(bitmap, last_id))
}

/// Read the last id of a sealed postings record without decoding the bitmap.
///
/// Does not verify the checksum; used only on the skip fast path where a wrong
/// answer costs a redundant rescore, never a wrong result.
pub fn peek_last_id(record: &[u8]) -> Option<i32> {
    if record.len() < CRC_LEN + LAST_ID_LEN {
        return None;
    }
    Some(LittleEndian::read_i32(&record[CRC_LEN..CRC_LEN + LAST_ID_LEN]))
}
