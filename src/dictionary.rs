//! One dictionary: an MDX text container bound to its index store, plus an
//! optional companion MDD resource container discovered by filename stem.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::debug;

use crate::codec;
use crate::container::{ContainerKind, ContainerReader, IndexRow};
use crate::error::{MdxError, Result};
use crate::index::IndexStore;

const BLOCK_CACHE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct DictionaryOptions {
    pub force_rebuild: bool,
    pub check_blocks: bool,
    pub cache_enabled: bool,
}

impl Default for DictionaryOptions {
    fn default() -> Self {
        Self {
            force_rebuild: false,
            check_blocks: false,
            cache_enabled: true,
        }
    }
}

type BlockCache = Mutex<LruCache<(ContainerKind, u64), Arc<Vec<u8>>>>;

pub struct Dictionary {
    path: PathBuf,
    mdx: ContainerReader,
    mdx_store: IndexStore,
    mdd: Option<ContainerReader>,
    mdd_store: Option<IndexStore>,
    block_cache: Option<BlockCache>,
}

impl Dictionary {
    pub fn open<P: AsRef<Path>>(path: P, opts: &DictionaryOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.extension().and_then(|e| e.to_str()) != Some("mdx") {
            return Err(MdxError::InvalidInput(format!(
                "expected an .mdx file, got {}",
                path.display()
            )));
        }
        if !path.is_file() {
            return Err(MdxError::NotFound(format!(
                "dictionary file {}",
                path.display()
            )));
        }

        let mdx = ContainerReader::open(&path, ContainerKind::Mdx)?;
        let mdx_store = IndexStore::open(&mdx, opts.force_rebuild, opts.check_blocks)?;

        let mdd_path = path.with_extension("mdd");
        let (mdd, mdd_store) = if mdd_path.is_file() {
            let container = ContainerReader::open(&mdd_path, ContainerKind::Mdd)?;
            let store = IndexStore::open(&container, opts.force_rebuild, opts.check_blocks)?;
            (Some(container), Some(store))
        } else {
            (None, None)
        };

        let block_cache = opts.cache_enabled.then(|| {
            Mutex::new(LruCache::new(NonZeroUsize::new(BLOCK_CACHE_SIZE).unwrap()))
        });

        Ok(Self {
            path,
            mdx,
            mdx_store,
            mdd,
            mdd_store,
            block_cache,
        })
    }

    /// Path of the text container file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn title(&self) -> &str {
        &self.mdx_store.meta().title
    }

    pub fn description(&self) -> &str {
        &self.mdx_store.meta().description
    }

    pub fn stylesheet(&self) -> &HashMap<String, (String, String)> {
        self.mdx_store.stylesheet()
    }

    pub fn has_resources(&self) -> bool {
        self.mdd.is_some()
    }

    /// Look a headword up and return every matching record, decoded under
    /// the container's encoding and re-encoded as UTF-8. Homographs yield
    /// multiple records; a missing word yields an empty list.
    pub fn lookup_text(&self, word: &str) -> Result<Vec<String>> {
        let rows = self.mdx_store.lookup(word)?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let (encoding, _) = codec::normalize_encoding(self.mdx_store.encoding())?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let bytes = self.read_record(&self.mdx, ContainerKind::Mdx, row)?;
            let text = encoding.decode(&bytes).0;
            records.push(text.trim_matches('\0').to_string());
        }
        Ok(records)
    }

    /// Look a resource path up in the companion container. Returns the raw
    /// payload bytes, or `None` when there is no companion, no such key, or
    /// the stored payload is empty.
    pub fn lookup_resource(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let (Some(mdd), Some(store)) = (&self.mdd, &self.mdd_store) else {
            return Ok(None);
        };
        let rows = store.lookup(key)?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let bytes = self.read_record(mdd, ContainerKind::Mdd, row)?;
        if bytes.is_empty() {
            debug!(key, "resource record is empty");
            return Ok(None);
        }
        Ok(Some(bytes))
    }

    pub fn mdx_keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.mdx_store.keys(pattern)
    }

    pub fn mdd_keys(&self, pattern: &str) -> Result<Vec<String>> {
        match &self.mdd_store {
            Some(store) => store.keys(pattern),
            None => Ok(Vec::new()),
        }
    }

    pub fn mdx_store(&self) -> &IndexStore {
        &self.mdx_store
    }

    pub fn mdd_store(&self) -> Option<&IndexStore> {
        self.mdd_store.as_ref()
    }

    fn read_record(
        &self,
        container: &ContainerReader,
        kind: ContainerKind,
        row: &IndexRow,
    ) -> Result<Vec<u8>> {
        let Some(cache) = &self.block_cache else {
            return container.read_record(row, false);
        };
        let cache_key = (kind, row.file_pos);
        let cached = cache.lock().unwrap().get(&cache_key).cloned();
        let block = match cached {
            Some(block) => block,
            None => {
                let block = Arc::new(container.read_block(row, false)?);
                cache.lock().unwrap().put(cache_key, block.clone());
                block
            }
        };
        ContainerReader::slice_record(&block, row)
    }
}
