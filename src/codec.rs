//! Shared decoders: Adler-32 checksums, block decompression and text
//! encodings used by both container formats.

use std::io::Read;

use adler32::RollingAdler32;
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use encoding_rs::{Encoding, BIG5, GB18030, UTF_16LE, UTF_8};
use flate2::read::ZlibDecoder;

use crate::error::{MdxError, Result};

/// Compression tags as stored in the leading 4 bytes of a block.
pub const COMP_STORED: u32 = 0;
pub const COMP_LZO: u32 = 1;
pub const COMP_ZLIB: u32 = 2;

/// Width of sizes and record offsets, decided by the engine version:
/// 4-byte big-endian before 2.0, 8-byte big-endian from 2.0 on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberWidth {
    U32,
    U64,
}

impl NumberWidth {
    pub fn for_version(version: f32) -> Self {
        if version < 2.0 {
            NumberWidth::U32
        } else {
            NumberWidth::U64
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            NumberWidth::U32 => 4,
            NumberWidth::U64 => 8,
        }
    }

    pub fn read_from<R: Read>(self, reader: &mut R) -> std::io::Result<u64> {
        Ok(match self {
            NumberWidth::U32 => u64::from(reader.read_u32::<BigEndian>()?),
            NumberWidth::U64 => reader.read_u64::<BigEndian>()?,
        })
    }

    pub fn get(self, buf: &[u8]) -> u64 {
        match self {
            NumberWidth::U32 => u64::from(BigEndian::read_u32(buf)),
            NumberWidth::U64 => BigEndian::read_u64(buf),
        }
    }
}

pub fn adler32_of(data: &[u8]) -> u32 {
    RollingAdler32::from_buffer(data).hash()
}

pub fn zlib_inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| MdxError::CorruptBlock(format!("zlib inflation failed: {e}")))?;
    Ok(out)
}

/// Decode one compressed slab: 4-byte compression tag, 4-byte Adler-32 of
/// the decompressed payload, then the payload itself.
pub fn decode_block(slab: &[u8], verify: bool) -> Result<Vec<u8>> {
    if slab.len() < 8 {
        return Err(MdxError::CorruptBlock(format!(
            "block of {} bytes is shorter than its 8-byte header",
            slab.len()
        )));
    }
    let tag = LittleEndian::read_u32(&slab[0..4]);
    let checksum = BigEndian::read_u32(&slab[4..8]);
    let payload = match tag {
        COMP_STORED => slab[8..].to_vec(),
        COMP_ZLIB => zlib_inflate(&slab[8..])?,
        other => return Err(MdxError::UnsupportedCompression(other)),
    };
    if verify && adler32_of(&payload) != checksum {
        return Err(MdxError::CorruptBlock(
            "decompressed block does not match its Adler-32 checksum".to_string(),
        ));
    }
    Ok(payload)
}

/// Normalize an encoding label to one of the supported encodings.
/// GBK and GB2312 collapse to GB18030; an empty label means UTF-8.
pub fn normalize_encoding(label: &str) -> Result<(&'static Encoding, &'static str)> {
    match label.trim().to_uppercase().as_str() {
        "" | "UTF-8" | "UTF8" => Ok((UTF_8, "UTF-8")),
        "UTF-16" | "UTF-16LE" | "UTF16" => Ok((UTF_16LE, "UTF-16")),
        "GBK" | "GB2312" | "GB18030" => Ok((GB18030, "GB18030")),
        "BIG5" | "BIG-5" => Ok((BIG5, "BIG5")),
        _ => Err(MdxError::Encoding(label.to_string())),
    }
}

pub fn decode_text(bytes: &[u8], encoding: &'static Encoding) -> String {
    encoding.decode(bytes).0.into_owned()
}
