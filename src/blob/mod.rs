//! # Item blob decoder
//!
//! Item rows in the game snapshot keep their properties in an opaque `data` column.
//! The layout, as far as it is known:
//!
//! ```text
//! [u32 version][12-byte magic]                       fixed 16-byte header
//! [u32 0x4321ABCD][8 reserved bytes]                 optional section preamble
//! [u32 len][class path bytes, NUL padded]
//! [u32 len][instance name bytes, NUL padded]
//! ... padding of unknown purpose ...
//! [u32 template id][u32 count][count × (u32 id, 4-byte value)]   first block
//! [u32 count][count × (u32 id, 4-byte value)] ...                 trailing blocks
//! ```
//!
//! There are no block boundary markers, so the first block is located by searching
//! for the template id's value after the strings. Values are kept as raw 4-byte
//! little-endian cells; whether a cell is an int or a float is decided later by
//! [`crate::schema::PropertySchema`].
//!
//! Decoding is a pure function of its input and never reads past the buffer end.

mod reader;

use log::debug;
use serde::Serialize;

use crate::errors::DecodeError;
use crate::logutil::escape_log;
use crate::model::{PropertyModel, PropertyRecord, Truncation};
use crate::schema::CategoryHint;

pub use reader::Reader;

pub const HEADER_LEN: usize = 16;

/// Bytes 4..16 of every known blob.
pub const HEADER_MAGIC: [u8; 12] = [
    0xEF, 0xBE, 0xAD, 0xDE, 0x0F, 0xCA, 0xFE, 0xBA, 0xCA, 0xFB, 0xCF, 0xAB,
];

/// Marker of the optional preamble that follows the header in blobs written by
/// current server builds.
pub const SECTION_MARKER: u32 = 0x4321_ABCD;
const SECTION_RESERVED_LEN: usize = 8;

/// Upper bound on records across all blocks.
pub const MAX_RECORDS: usize = 4096;

const PAIR_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    /// Always true on a decoded header: a bad magic fails with `MalformedHeader`
    /// instead. Kept so serialized models state the check was made.
    pub magic_valid: bool,
    pub version: u32,
    pub class_path: String,
    pub instance_name: String,
}

impl Header {
    pub fn category(&self) -> CategoryHint {
        CategoryHint::from_class_path(&self.class_path)
    }
}

/// Decode `buffer` into a [`PropertyModel`], anchoring on `expected_template_id`.
///
/// A trailing block that would overrun the buffer is dropped and the model is
/// returned with a [`Truncation`] warning; anything wrong before the first block is
/// complete is an error.
pub fn decode(buffer: &[u8], expected_template_id: u32) -> Result<PropertyModel, DecodeError> {
    let mut reader = Reader::new(buffer);
    let header = read_header(&mut reader)?;

    let searched_from = reader.position();
    if reader.seek_u32(expected_template_id).is_none() {
        return Err(DecodeError::AnchorNotFound {
            template_id: expected_template_id,
            searched_from,
        });
    }

    let mut records = Vec::new();

    // First block: an implausible count here means we anchored on garbage.
    let count_offset = reader.position();
    let count = reader.read_u32("property count")?;
    if !block_fits(count, reader.remaining_len(), 0) {
        return Err(DecodeError::CorruptCount {
            count,
            offset: count_offset,
            remaining: reader.remaining_len(),
        });
    }
    read_pairs(&mut reader, count, 0, &mut records)?;

    let mut truncation = None;
    let mut block = 1;
    while !reader.is_empty() {
        let offset = reader.position();
        let fits = match reader.peek_u32() {
            Some(count) => block_fits(count, reader.remaining_len() - 4, records.len()),
            None => false,
        };
        if !fits {
            truncation = Some(Truncation {
                offset,
                dropped_block: block,
            });
            break;
        }
        let count = reader.read_u32("block count")?;
        read_pairs(&mut reader, count, block, &mut records)?;
        block += 1;
    }

    debug!(
        "decoded template {} ({}): {} records in {} blocks{}",
        expected_template_id,
        escape_log(&header.class_path),
        records.len(),
        block,
        if truncation.is_some() { ", truncated" } else { "" }
    );

    Ok(PropertyModel::new(
        expected_template_id,
        header,
        records,
        truncation,
    ))
}

fn read_header(reader: &mut Reader<'_>) -> Result<Header, DecodeError> {
    let fixed = reader
        .read_bytes(HEADER_LEN, "header")
        .map_err(|_| DecodeError::MalformedHeader(format!("need {} bytes", HEADER_LEN)))?;
    if fixed[4..] != HEADER_MAGIC {
        return Err(DecodeError::MalformedHeader(format!(
            "bad magic {}",
            crate::logutil::hex_preview(&fixed[4..])
        )));
    }
    let version = u32::from_le_bytes([fixed[0], fixed[1], fixed[2], fixed[3]]);

    if reader.peek_u32() == Some(SECTION_MARKER) {
        reader.read_bytes(4 + SECTION_RESERVED_LEN, "section preamble")?;
    }

    let class_path = reader.read_prefixed_string("class path")?;
    let instance_name = reader.read_prefixed_string("instance name")?;

    Ok(Header {
        magic_valid: true,
        version,
        class_path,
        instance_name,
    })
}

fn block_fits(count: u32, remaining: usize, already: usize) -> bool {
    let count = count as usize;
    count <= remaining / PAIR_LEN && already + count <= MAX_RECORDS
}

fn read_pairs(
    reader: &mut Reader<'_>,
    count: u32,
    block: usize,
    records: &mut Vec<PropertyRecord>,
) -> Result<(), DecodeError> {
    for _ in 0..count {
        let id = reader.read_u32("property id")?;
        let raw = reader.read_raw4("property value")?;
        records.push(PropertyRecord {
            id,
            raw,
            order: records.len(),
            block,
        });
    }
    Ok(())
}
