use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use encoding_rs::UTF_16LE;

use super::header::ContainerHeader;
use super::KeyEntry;
use crate::codec::{self, NumberWidth};
use crate::error::{MdxError, Result};

pub(super) struct KeyScan {
    pub key_list: Vec<KeyEntry>,
    pub record_block_offset: u64,
    pub num_entries: u64,
}

/// Bounds-checked reader over an in-memory catalog slice. Running off the
/// end is a catalog corruption, not a panic.
struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(MdxError::CorruptCatalog(format!(
                "needed {n} bytes at offset {} of a {}-byte catalog",
                self.pos,
                self.data.len()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn number(&mut self, width: NumberWidth) -> Result<u64> {
        Ok(width.get(self.take(width.bytes())?))
    }

    fn advance(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }
}

/// Strict key-catalog parse: the counted header fields, the compressed
/// catalog of per-block sizes, then the key blocks themselves.
pub(super) fn read_keys(file: &mut File, header: &ContainerHeader) -> Result<KeyScan> {
    file.seek(SeekFrom::Start(header.key_block_offset))?;
    let width = header.width;
    let v2 = header.engine_version >= 2.0;

    let meta_len = if v2 { 8 * 5 } else { 4 * 4 };
    let mut meta = vec![0u8; meta_len];
    file.read_exact(&mut meta)?;

    let mut reader = SliceReader::new(&meta);
    let num_key_blocks = reader.number(width)?;
    let num_entries = reader.number(width)?;
    if v2 {
        let _key_info_decompressed_size = reader.number(width)?;
    }
    let key_info_size = reader.number(width)?;
    let key_block_size = reader.number(width)?;

    if v2 {
        let checksum = file.read_u32::<BigEndian>()?;
        if codec::adler32_of(&meta) != checksum {
            return Err(MdxError::CorruptCatalog(
                "key catalog header checksum mismatch".to_string(),
            ));
        }
    }

    let mut key_info = vec![0u8; key_info_size as usize];
    file.read_exact(&mut key_info)?;
    let infos = decode_key_block_info(&key_info, header, Some(num_entries))?;
    if infos.len() as u64 != num_key_blocks {
        return Err(MdxError::CorruptCatalog(format!(
            "catalog describes {} key blocks, header announced {num_key_blocks}",
            infos.len()
        )));
    }

    let mut key_block = vec![0u8; key_block_size as usize];
    file.read_exact(&mut key_block)?;
    let key_list = decode_key_blocks(&key_block, &infos, header)?;
    if key_list.len() as u64 != num_entries {
        return Err(MdxError::CorruptCatalog(format!(
            "decoded {} key entries, header announced {num_entries}",
            key_list.len()
        )));
    }

    Ok(KeyScan {
        key_list,
        record_block_offset: file.stream_position()?,
        num_entries,
    })
}

/// Best-effort recovery for files with nonstandard padding: skip the
/// counted header fields blindly and scan forward in 1 KiB slices for the
/// first key-block compression magic. Everything between the header region
/// and the magic is treated as the raw key-block catalog.
pub(super) fn read_keys_raw_scan(file: &mut File, header: &ContainerHeader) -> Result<KeyScan> {
    file.seek(SeekFrom::Start(header.key_block_offset))?;
    let v2 = header.engine_version >= 2.0;
    let (skip, magic) = if v2 {
        (8 * 5 + 4, [0x02u8, 0, 0, 0])
    } else {
        (4 * 4, [0x01u8, 0, 0, 0])
    };
    file.seek(SeekFrom::Current(skip as i64))?;

    let mut key_info = vec![0u8; 8];
    file.read_exact(&mut key_info)?;
    if v2 && key_info[0..4] != [0x02, 0, 0, 0] {
        return Err(MdxError::CorruptCatalog(
            "compressed key catalog magic not found".to_string(),
        ));
    }

    loop {
        let chunk_pos = file.stream_position()?;
        let mut chunk = vec![0u8; 1024];
        let n = file.read(&mut chunk)?;
        if n == 0 {
            return Err(MdxError::CorruptCatalog(
                "key block magic not found before end of file".to_string(),
            ));
        }
        chunk.truncate(n);
        if let Some(idx) = find_subslice(&chunk, &magic) {
            key_info.extend_from_slice(&chunk[..idx]);
            file.seek(SeekFrom::Start(chunk_pos + idx as u64))?;
            break;
        }
        key_info.extend_from_slice(&chunk);
    }

    let infos = decode_key_block_info(&key_info, header, None)?;
    let key_block_size: u64 = infos.iter().map(|&(cs, _)| cs).sum();
    let mut key_block = vec![0u8; key_block_size as usize];
    file.read_exact(&mut key_block)?;
    let key_list = decode_key_blocks(&key_block, &infos, header)?;

    Ok(KeyScan {
        num_entries: key_list.len() as u64,
        key_list,
        record_block_offset: file.stream_position()?,
    })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Decode the per-block catalog into `(compressed_size, decompressed_size)`
/// pairs, skipping each block's text head and tail. For version 2.0 and up
/// the catalog arrives zlib-compressed behind a `02 00 00 00` magic and an
/// Adler-32 of the inflated payload.
fn decode_key_block_info(
    raw: &[u8],
    header: &ContainerHeader,
    expected_entries: Option<u64>,
) -> Result<Vec<(u64, u64)>> {
    let v2 = header.engine_version >= 2.0;
    let inflated;
    let data: &[u8] = if v2 {
        if raw.len() < 8 || raw[0..4] != [0x02, 0, 0, 0] {
            return Err(MdxError::CorruptCatalog(
                "compressed key catalog magic missing".to_string(),
            ));
        }
        let checksum = BigEndian::read_u32(&raw[4..8]);
        inflated = codec::zlib_inflate(&raw[8..])
            .map_err(|e| MdxError::CorruptCatalog(format!("key catalog inflation: {e}")))?;
        if codec::adler32_of(&inflated) != checksum {
            return Err(MdxError::CorruptCatalog(
                "key catalog checksum mismatch".to_string(),
            ));
        }
        &inflated
    } else {
        raw
    };

    // the length prefix of the text head/tail is 2 bytes with a 1-byte
    // terminator in v2, 1 byte with no terminator in v1; UTF-16 doubles
    // the span
    let utf16 = header.encoding == UTF_16LE;
    let mut reader = SliceReader::new(data);
    let mut infos = Vec::new();
    let mut entries = 0u64;
    while !reader.is_empty() {
        entries += reader.number(header.width)?;
        for _ in 0..2 {
            let text_len = if v2 {
                BigEndian::read_u16(reader.take(2)?) as usize
            } else {
                reader.take(1)?[0] as usize
            };
            let span = text_len + if v2 { 1 } else { 0 };
            reader.advance(if utf16 { span * 2 } else { span })?;
        }
        let compressed_size = reader.number(header.width)?;
        let decompressed_size = reader.number(header.width)?;
        infos.push((compressed_size, decompressed_size));
    }

    if let Some(expected) = expected_entries {
        if entries != expected {
            return Err(MdxError::CorruptCatalog(format!(
                "key blocks hold {entries} entries, header announced {expected}"
            )));
        }
    }
    Ok(infos)
}

fn decode_key_blocks(
    raw: &[u8],
    infos: &[(u64, u64)],
    header: &ContainerHeader,
) -> Result<Vec<KeyEntry>> {
    let mut entries = Vec::new();
    let mut start = 0usize;
    for &(compressed_size, _decompressed_size) in infos {
        let end = start + compressed_size as usize;
        if end > raw.len() {
            return Err(MdxError::CorruptCatalog(format!(
                "key block of {compressed_size} bytes overruns the {}-byte key section",
                raw.len()
            )));
        }
        let block = codec::decode_block(&raw[start..end], true)?;
        split_key_block(&block, header, &mut entries)?;
        start = end;
    }
    Ok(entries)
}

/// Split one decompressed key block into `(record_offset, key_text)`
/// entries. Key text is NUL-terminated, with a two-byte terminator aligned
/// on two bytes under UTF-16LE.
fn split_key_block(
    block: &[u8],
    header: &ContainerHeader,
    out: &mut Vec<KeyEntry>,
) -> Result<()> {
    let step = if header.encoding == UTF_16LE { 2 } else { 1 };
    let mut reader = SliceReader::new(block);
    while !reader.is_empty() {
        let record_offset = reader.number(header.width)?;
        let rest = reader.remaining();
        let mut terminator = None;
        let mut i = 0;
        while i + step <= rest.len() {
            if rest[i..i + step].iter().all(|b| *b == 0) {
                terminator = Some(i);
                break;
            }
            i += step;
        }
        let end = terminator.ok_or_else(|| {
            MdxError::CorruptCatalog("unterminated key text in key block".to_string())
        })?;
        let text = codec::decode_text(&rest[..end], header.encoding);
        out.push(KeyEntry {
            record_offset,
            key_text: text.trim().to_string(),
        });
        reader.advance(end + step)?;
    }
    Ok(())
}
