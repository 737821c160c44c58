//! Index-store persistence: rebuild policy, load/rebuild equivalence and
//! wildcard key queries.

mod common;

use common::{write_fixture, FixtureSpec};
use mdx_server::index::{sidecar_path, IndexStore, SCHEMA_VERSION};
use mdx_server::{ContainerKind, ContainerReader, IndexRow};
use rusqlite::Connection;
use tempfile::tempdir;

fn sorted(mut rows: Vec<IndexRow>) -> Vec<IndexRow> {
    rows.sort_by(|a, b| {
        (&a.key_text, a.record_start).cmp(&(&b.key_text, b.record_start))
    });
    rows
}

#[test]
fn loading_an_existing_index_matches_a_fresh_build() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dict.mdx");
    let mut spec = FixtureSpec::mdx(&[
        ("apple", "a fruit"),
        ("application", "a request"),
        ("banana", "another fruit"),
        ("pineapple", "a tropical fruit"),
    ]);
    spec.records_per_block = 2;
    spec.stylesheet = Some("1\n<b>\n</b>".to_string());
    write_fixture(&path, &spec);

    let container = ContainerReader::open(&path, ContainerKind::Mdx).unwrap();

    let built = IndexStore::open(&container, false, true).unwrap();
    let built_rows = sorted(built.all_rows().unwrap());
    assert_eq!(built_rows.len(), 4);
    assert_eq!(built.encoding(), "UTF-8");
    assert_eq!(built.meta().title, "Test Dictionary");
    assert_eq!(
        built.stylesheet().get("1"),
        Some(&("<b>".to_string(), "</b>".to_string()))
    );
    drop(built);

    // second open loads the sidecar instead of rebuilding
    let loaded = IndexStore::open(&container, false, true).unwrap();
    assert_eq!(sorted(loaded.all_rows().unwrap()), built_rows);
    assert_eq!(loaded.encoding(), "UTF-8");
    assert_eq!(
        loaded.stylesheet().get("1"),
        Some(&("<b>".to_string(), "</b>".to_string()))
    );

    // and a forced rebuild produces the same row set again
    let rebuilt = IndexStore::open(&container, true, true).unwrap();
    assert_eq!(sorted(rebuilt.all_rows().unwrap()), built_rows);
}

#[test]
fn stale_schema_version_triggers_a_rebuild() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dict.mdx");
    write_fixture(&path, &FixtureSpec::mdx(&[("word", "text")]));

    let container = ContainerReader::open(&path, ContainerKind::Mdx).unwrap();
    let store = IndexStore::open(&container, false, false).unwrap();
    drop(store);

    let db_path = sidecar_path(&path);
    let conn = Connection::open(&db_path).unwrap();
    conn.execute("UPDATE meta SET value = '0.0' WHERE key = 'version'", [])
        .unwrap();
    drop(conn);

    let store = IndexStore::open(&container, false, false).unwrap();
    let conn = Connection::open(&db_path).unwrap();
    let version: String = conn
        .query_row("SELECT value FROM meta WHERE key = 'version'", [], |r| {
            r.get(0)
        })
        .unwrap();
    assert_eq!(version, SCHEMA_VERSION);
    assert_eq!(store.lookup("word").unwrap().len(), 1);
}

#[test]
fn garbage_sidecar_is_rebuilt_not_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dict.mdx");
    write_fixture(&path, &FixtureSpec::mdx(&[("word", "text")]));
    std::fs::write(sidecar_path(&path), b"not a database").unwrap();

    let container = ContainerReader::open(&path, ContainerKind::Mdx).unwrap();
    let store = IndexStore::open(&container, false, false).unwrap();
    assert_eq!(store.lookup("word").unwrap().len(), 1);
}

#[test]
fn wildcard_key_queries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dict.mdx");
    write_fixture(
        &path,
        &FixtureSpec::mdx(&[
            ("apple", "x"),
            ("application", "x"),
            ("banana", "x"),
            ("pineapple", "x"),
        ]),
    );
    let container = ContainerReader::open(&path, ContainerKind::Mdx).unwrap();
    let store = IndexStore::open(&container, false, false).unwrap();

    // empty pattern: every key
    let mut all = store.keys("").unwrap();
    all.sort();
    assert_eq!(all, vec!["apple", "application", "banana", "pineapple"]);

    // bare pattern: prefix match
    let mut prefixed = store.keys("app").unwrap();
    prefixed.sort();
    assert_eq!(prefixed, vec!["apple", "application"]);

    // leading wildcard: suffix match
    let mut suffixed = store.keys("*apple").unwrap();
    suffixed.sort();
    assert_eq!(suffixed, vec!["apple", "pineapple"]);

    // wildcard on both sides: substring match
    let mut inner = store.keys("*app*").unwrap();
    inner.sort();
    assert_eq!(inner, vec!["apple", "application", "pineapple"]);

    assert!(store.keys("zzz").unwrap().is_empty());
}

#[test]
fn exact_lookup_rows_satisfy_offset_invariants() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dict.mdx");
    let mut spec = FixtureSpec::mdx(&[("alpha", "first"), ("beta", "second"), ("gamma", "third")]);
    spec.records_per_block = 1;
    write_fixture(&path, &spec);

    let container = ContainerReader::open(&path, ContainerKind::Mdx).unwrap();
    let store = IndexStore::open(&container, false, true).unwrap();
    for key in ["alpha", "beta", "gamma"] {
        let rows = store.lookup(key).unwrap();
        assert_eq!(rows.len(), 1, "{key}");
        let row = &rows[0];
        assert!(row.offset <= row.record_start);
        assert!(row.record_start < row.record_end);
        assert!(row.record_end <= row.offset + row.decompressed_size);
    }
    assert!(store.lookup("delta").unwrap().is_empty());
    assert!(store.lookup("").unwrap().is_empty());
}
