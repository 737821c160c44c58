use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::ContainerReader;
use crate::codec::{self, COMP_STORED, COMP_ZLIB};
use crate::error::{MdxError, Result};

/// Compression of a record block. LZO (tag 1) is rejected when the index
/// is built, so rows only ever carry these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordBlockType {
    Stored,
    Zlib,
}

impl RecordBlockType {
    pub fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            COMP_STORED => Ok(RecordBlockType::Stored),
            COMP_ZLIB => Ok(RecordBlockType::Zlib),
            other => Err(MdxError::UnsupportedCompression(other)),
        }
    }

    pub fn as_tag(self) -> u32 {
        match self {
            RecordBlockType::Stored => COMP_STORED,
            RecordBlockType::Zlib => COMP_ZLIB,
        }
    }
}

/// Everything needed to fetch one record without re-reading the catalogs:
/// where its block sits in the file, how to decompress it, and where the
/// record lives inside the decompressed stream.
///
/// Invariant: `offset <= record_start < record_end <= offset + decompressed_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub key_text: String,
    /// Absolute file offset of the record block holding this record.
    pub file_pos: u64,
    pub compressed_size: u64,
    pub decompressed_size: u64,
    pub block_type: RecordBlockType,
    /// Half-open bounds in the concatenated decompressed record stream.
    pub record_start: u64,
    pub record_end: u64,
    /// Decompressed stream offset where this record block begins.
    pub offset: u64,
}

pub(super) fn build_index(reader: &ContainerReader, check_blocks: bool) -> Result<Vec<IndexRow>> {
    let mut file = File::open(&reader.path)?;
    file.seek(SeekFrom::Start(reader.record_block_offset))?;
    let width = reader.header.width;

    let num_record_blocks = width.read_from(&mut file)?;
    let num_entries = width.read_from(&mut file)?;
    if num_entries != reader.num_entries {
        return Err(MdxError::CorruptCatalog(format!(
            "record catalog announces {num_entries} entries, key catalog held {}",
            reader.num_entries
        )));
    }
    let record_info_size = width.read_from(&mut file)?;
    let _record_block_size = width.read_from(&mut file)?;

    let mut infos = Vec::with_capacity(num_record_blocks as usize);
    let mut counted = 0u64;
    for _ in 0..num_record_blocks {
        let compressed_size = width.read_from(&mut file)?;
        let decompressed_size = width.read_from(&mut file)?;
        infos.push((compressed_size, decompressed_size));
        counted += 2 * width.bytes() as u64;
    }
    if counted != record_info_size {
        return Err(MdxError::CorruptCatalog(format!(
            "record catalog of {counted} bytes, header announced {record_info_size}"
        )));
    }

    let key_list = &reader.key_list;
    let mut rows = Vec::with_capacity(key_list.len());
    let mut offset = 0u64;
    let mut i = 0usize;
    for (compressed_size, decompressed_size) in infos {
        let file_pos = file.stream_position()?;
        if compressed_size < 8 {
            return Err(MdxError::CorruptBlock(format!(
                "record block of {compressed_size} bytes at {file_pos} is shorter than its header"
            )));
        }
        let mut head = [0u8; 8];
        file.read_exact(&mut head)?;
        let tag = LittleEndian::read_u32(&head[0..4]);
        let checksum = BigEndian::read_u32(&head[4..8]);
        let block_type = RecordBlockType::from_tag(tag)?;

        if check_blocks {
            let mut payload = vec![0u8; compressed_size as usize - 8];
            file.read_exact(&mut payload)?;
            let decompressed = match block_type {
                RecordBlockType::Stored => payload,
                RecordBlockType::Zlib => codec::zlib_inflate(&payload)?,
            };
            if codec::adler32_of(&decompressed) != checksum {
                return Err(MdxError::CorruptBlock(format!(
                    "record block at {file_pos} fails its Adler-32 check"
                )));
            }
            if decompressed.len() as u64 != decompressed_size {
                return Err(MdxError::CorruptBlock(format!(
                    "record block at {file_pos} decompressed to {} bytes, catalog says {decompressed_size}",
                    decompressed.len()
                )));
            }
        } else {
            file.seek(SeekFrom::Current(compressed_size as i64 - 8))?;
        }

        // assign every key whose record starts inside this block
        while i < key_list.len() {
            let entry = &key_list[i];
            if entry.record_offset >= offset + decompressed_size {
                break;
            }
            let record_end = if i + 1 < key_list.len() {
                key_list[i + 1].record_offset
            } else {
                offset + decompressed_size
            };
            rows.push(IndexRow {
                key_text: entry.key_text.clone(),
                file_pos,
                compressed_size,
                decompressed_size,
                block_type,
                record_start: entry.record_offset,
                record_end,
                offset,
            });
            i += 1;
        }
        offset += decompressed_size;
    }
    Ok(rows)
}

pub(super) fn read_block(path: &Path, row: &IndexRow, verify: bool) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(row.file_pos))?;
    let mut slab = vec![0u8; row.compressed_size as usize];
    file.read_exact(&mut slab)?;
    if slab.len() < 8 {
        return Err(MdxError::CorruptBlock(format!(
            "record block at {} is shorter than its 8-byte header",
            row.file_pos
        )));
    }
    let payload = match row.block_type {
        RecordBlockType::Stored => slab[8..].to_vec(),
        RecordBlockType::Zlib => codec::zlib_inflate(&slab[8..])?,
    };
    if verify {
        let checksum = BigEndian::read_u32(&slab[4..8]);
        if codec::adler32_of(&payload) != checksum {
            return Err(MdxError::CorruptBlock(format!(
                "record block at {} fails its Adler-32 check",
                row.file_pos
            )));
        }
    }
    Ok(payload)
}

pub(super) fn slice_record(block: &[u8], row: &IndexRow) -> Result<Vec<u8>> {
    let start = row
        .record_start
        .checked_sub(row.offset)
        .ok_or_else(|| bounds_error(row, block.len()))? as usize;
    let end = row
        .record_end
        .checked_sub(row.offset)
        .ok_or_else(|| bounds_error(row, block.len()))? as usize;
    if start > end || end > block.len() {
        return Err(bounds_error(row, block.len()));
    }
    Ok(block[start..end].to_vec())
}

fn bounds_error(row: &IndexRow, block_len: usize) -> MdxError {
    MdxError::CorruptBlock(format!(
        "record bounds {}..{} (block offset {}) fall outside a {block_len}-byte block",
        row.record_start, row.record_end, row.offset
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(start: u64, end: u64, offset: u64) -> IndexRow {
        IndexRow {
            key_text: "k".to_string(),
            file_pos: 0,
            compressed_size: 0,
            decompressed_size: 16,
            block_type: RecordBlockType::Stored,
            record_start: start,
            record_end: end,
            offset,
        }
    }

    #[test]
    fn slice_respects_block_offset() {
        let block = b"aaaabbbbcccc";
        assert_eq!(slice_record(block, &row(104, 108, 100)).unwrap(), b"bbbb");
    }

    #[test]
    fn out_of_bounds_slice_is_corrupt() {
        let block = b"tiny";
        assert!(matches!(
            slice_record(block, &row(0, 32, 0)),
            Err(MdxError::CorruptBlock(_))
        ));
        assert!(matches!(
            slice_record(block, &row(2, 4, 8)),
            Err(MdxError::CorruptBlock(_))
        ));
    }

    #[test]
    fn lzo_tag_is_rejected() {
        assert!(matches!(
            RecordBlockType::from_tag(1),
            Err(MdxError::UnsupportedCompression(1))
        ));
        assert_eq!(RecordBlockType::from_tag(0).unwrap(), RecordBlockType::Stored);
        assert_eq!(RecordBlockType::from_tag(2).unwrap(), RecordBlockType::Zlib);
    }
}
