//! Persistent keyword index: one SQLite sidecar per container, holding one
//! row per key plus the container metadata needed to decode records without
//! re-parsing the header.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::container::{ContainerKind, ContainerReader, IndexRow, RecordBlockType};
use crate::error::Result;

/// Bumped whenever the sidecar layout changes; a mismatch forces a rebuild.
pub const SCHEMA_VERSION: &str = "1.1";

#[derive(Debug, Clone, Default)]
pub struct StoreMeta {
    pub encoding: String,
    pub stylesheet: HashMap<String, (String, String)>,
    pub title: String,
    pub description: String,
}

pub struct IndexStore {
    db_path: PathBuf,
    meta: StoreMeta,
}

impl IndexStore {
    /// Open the sidecar for a container, building it when it is missing,
    /// carries a stale schema version, or a rebuild is forced.
    pub fn open(container: &ContainerReader, force_rebuild: bool, check_blocks: bool) -> Result<Self> {
        let db_path = sidecar_path(container.path());
        if !force_rebuild && db_path.is_file() {
            match load_meta(&db_path) {
                Ok(Some(meta)) => {
                    return Ok(Self { db_path, meta });
                }
                Ok(None) => {
                    info!(db = %db_path.display(), "index schema version changed, rebuilding");
                }
                Err(err) => {
                    warn!(db = %db_path.display(), error = %err, "unreadable index sidecar, rebuilding");
                }
            }
        }
        let meta = build(container, &db_path, check_blocks)?;
        Ok(Self { db_path, meta })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    pub fn encoding(&self) -> &str {
        &self.meta.encoding
    }

    pub fn stylesheet(&self) -> &HashMap<String, (String, String)> {
        &self.meta.stylesheet
    }

    /// Exact-match lookup. Rows come back in storage iteration order.
    pub fn lookup(&self, key: &str) -> Result<Vec<IndexRow>> {
        if key.is_empty() {
            return Ok(Vec::new());
        }
        let conn = Connection::open(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT key_text, file_pos, compressed_size, decompressed_size, \
             record_block_type, record_start, record_end, offset \
             FROM rows WHERE key_text = ?1",
        )?;
        let rows = stmt
            .query_map([key], row_from_sql)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Enumerate keys. An empty pattern returns every key; `*` maps to the
    /// SQL wildcard; anything else matches as a prefix.
    pub fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let conn = Connection::open(&self.db_path)?;
        let keys = if pattern.is_empty() {
            let mut stmt = conn.prepare("SELECT key_text FROM rows")?;
            let keys = stmt
                .query_map([], |r| r.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            keys
        } else {
            let query = if pattern.contains('*') {
                pattern.replace('*', "%")
            } else {
                format!("{pattern}%")
            };
            let mut stmt = conn.prepare("SELECT key_text FROM rows WHERE key_text LIKE ?1")?;
            let keys = stmt
                .query_map([query], |r| r.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            keys
        };
        Ok(keys)
    }

    /// Every row in the store, for consistency checks.
    pub fn all_rows(&self) -> Result<Vec<IndexRow>> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT key_text, file_pos, compressed_size, decompressed_size, \
             record_block_type, record_start, record_end, offset FROM rows",
        )?;
        let rows = stmt
            .query_map([], row_from_sql)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

/// `foo.mdx` -> `foo.mdx.db`, `foo.mdd` -> `foo.mdd.db`.
pub fn sidecar_path(container_path: &Path) -> PathBuf {
    let mut name = container_path.as_os_str().to_os_string();
    name.push(".db");
    PathBuf::from(name)
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexRow> {
    let tag: i64 = row.get(4)?;
    let block_type = RecordBlockType::from_tag(tag as u32).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Integer, Box::new(err))
    })?;
    Ok(IndexRow {
        key_text: row.get(0)?,
        file_pos: row.get::<_, i64>(1)? as u64,
        compressed_size: row.get::<_, i64>(2)? as u64,
        decompressed_size: row.get::<_, i64>(3)? as u64,
        block_type,
        record_start: row.get::<_, i64>(5)? as u64,
        record_end: row.get::<_, i64>(6)? as u64,
        offset: row.get::<_, i64>(7)? as u64,
    })
}

fn load_meta(db_path: &Path) -> Result<Option<StoreMeta>> {
    let conn = Connection::open(db_path)?;
    let version = meta_value(&conn, "version")?;
    if version.as_deref() != Some(SCHEMA_VERSION) {
        return Ok(None);
    }
    let stylesheet = match meta_value(&conn, "stylesheet")? {
        Some(json) => serde_json::from_str(&json)?,
        None => HashMap::new(),
    };
    Ok(Some(StoreMeta {
        encoding: meta_value(&conn, "encoding")?.unwrap_or_default(),
        stylesheet,
        title: meta_value(&conn, "title")?.unwrap_or_default(),
        description: meta_value(&conn, "description")?.unwrap_or_default(),
    }))
}

fn meta_value(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", [key], |r| r.get(0))
        .optional()
}

/// Materialize the index: scan the container, bulk-insert into a temp
/// sidecar, then rename it over the old one so readers never see a
/// half-built file.
fn build(container: &ContainerReader, db_path: &Path, check_blocks: bool) -> Result<StoreMeta> {
    let rows = container.build_index(check_blocks)?;
    let header = container.header();
    let meta = StoreMeta {
        encoding: header.encoding_label.clone(),
        stylesheet: header.stylesheet.clone(),
        title: header.title.clone(),
        description: header.description.clone(),
    };

    let tmp_path = {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    };
    if tmp_path.exists() {
        fs::remove_file(&tmp_path)?;
    }

    let mut conn = Connection::open(&tmp_path)?;
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE rows (\
            key_text TEXT NOT NULL,\
            file_pos INTEGER,\
            compressed_size INTEGER,\
            decompressed_size INTEGER,\
            record_block_type INTEGER,\
            record_start INTEGER,\
            record_end INTEGER,\
            offset INTEGER);\
         CREATE TABLE meta (key TEXT, value TEXT);",
    )?;
    {
        let mut stmt = tx.prepare("INSERT INTO rows VALUES (?1,?2,?3,?4,?5,?6,?7,?8)")?;
        for row in &rows {
            stmt.execute(params![
                row.key_text,
                row.file_pos as i64,
                row.compressed_size as i64,
                row.decompressed_size as i64,
                row.block_type.as_tag() as i64,
                row.record_start as i64,
                row.record_end as i64,
                row.offset as i64,
            ])?;
        }
    }
    {
        let stylesheet_json = serde_json::to_string(&meta.stylesheet)?;
        let mut stmt = tx.prepare("INSERT INTO meta VALUES (?1,?2)")?;
        for (key, value) in [
            ("encoding", meta.encoding.as_str()),
            ("stylesheet", stylesheet_json.as_str()),
            ("title", meta.title.as_str()),
            ("description", meta.description.as_str()),
            ("version", SCHEMA_VERSION),
        ] {
            stmt.execute(params![key, value])?;
        }
    }
    // resource paths are unique per container, headwords are not
    match container.kind() {
        ContainerKind::Mdd => {
            tx.execute_batch("CREATE UNIQUE INDEX key_index ON rows (key_text)")?
        }
        ContainerKind::Mdx => tx.execute_batch("CREATE INDEX key_index ON rows (key_text)")?,
    }
    tx.commit()?;
    drop(conn);

    fs::rename(&tmp_path, db_path)?;
    info!(
        db = %db_path.display(),
        rows = rows.len(),
        "index built"
    );
    Ok(meta)
}
