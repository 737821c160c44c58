//! MDX/MDD binary container reader.
//!
//! A container is parsed once at open time: the header, then the two-level
//! key-block catalog. The record-block catalog is walked on demand when the
//! persistent index is built, and records are read back with one
//! seek + read per lookup.

mod header;
mod keys;
mod records;

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::warn;

pub use header::ContainerHeader;
pub use records::{IndexRow, RecordBlockType};

use crate::error::{MdxError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Mdx,
    Mdd,
}

impl ContainerKind {
    pub fn extension(self) -> &'static str {
        match self {
            ContainerKind::Mdx => "mdx",
            ContainerKind::Mdd => "mdd",
        }
    }
}

/// One key-list entry: the decompressed offset of the record inside the
/// concatenated record stream, and the key text decoded to UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub record_offset: u64,
    pub key_text: String,
}

#[derive(Debug)]
pub struct ContainerReader {
    path: PathBuf,
    kind: ContainerKind,
    header: ContainerHeader,
    key_list: Vec<KeyEntry>,
    record_block_offset: u64,
    num_entries: u64,
}

impl ContainerReader {
    pub fn open<P: AsRef<Path>>(path: P, kind: ContainerKind) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;

        let header = header::read_header(&mut file, kind)?;

        let scan = match keys::read_keys(&mut file, &header) {
            Ok(scan) => scan,
            Err(err @ MdxError::UnsupportedCompression(_)) => return Err(err),
            Err(primary) => {
                warn!(
                    path = %path.display(),
                    error = %primary,
                    "key catalog parse failed, retrying with raw magic scan"
                );
                match keys::read_keys_raw_scan(&mut file, &header) {
                    Ok(scan) => scan,
                    Err(err @ MdxError::UnsupportedCompression(_)) => return Err(err),
                    Err(secondary) => {
                        return Err(MdxError::CorruptCatalog(format!(
                            "{primary}; recovery failed: {secondary}"
                        )))
                    }
                }
            }
        };

        Ok(Self {
            path,
            kind,
            header,
            key_list: scan.key_list,
            record_block_offset: scan.record_block_offset,
            num_entries: scan.num_entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn keys(&self) -> &[KeyEntry] {
        &self.key_list
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Walk the record-block catalog and produce one index row per key.
    /// With `check_blocks` every block is decompressed and verified against
    /// its Adler-32 checksum and declared size.
    pub fn build_index(&self, check_blocks: bool) -> Result<Vec<IndexRow>> {
        records::build_index(self, check_blocks)
    }

    /// Random access: fetch the record a row points at, decompressing only
    /// its block. Checksum verification is off on the lookup path unless
    /// asked for.
    pub fn read_record(&self, row: &IndexRow, verify: bool) -> Result<Vec<u8>> {
        let block = self.read_block(row, verify)?;
        Self::slice_record(&block, row)
    }

    /// Fetch and decompress the whole record block a row points at.
    pub fn read_block(&self, row: &IndexRow, verify: bool) -> Result<Vec<u8>> {
        records::read_block(&self.path, row, verify)
    }

    /// Cut one record out of its decompressed block.
    pub fn slice_record(block: &[u8], row: &IndexRow) -> Result<Vec<u8>> {
        records::slice_record(block, row)
    }
}
