//! Ordered key-value record sources
//!
//! Scraped records are (request URL, raw response body) pairs. Keys sort
//! bytewise, so all records of one (endpoint, project) group form one
//! contiguous prefix range.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, bail};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;
use serde_json::Value;

/// Read access to scraped records in key order.
pub trait RecordSource: Sync {
    /// All keys starting with `prefix`, ascending.
    fn keys_with_prefix(&self, prefix: &[u8]) -> anyhow::Result<Vec<Vec<u8>>>;

    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Smallest byte string greater than every string starting with `prefix`,
/// or `None` when no such bound exists (empty or all-0xFF prefix).
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.pop() {
        if last < u8::MAX {
            bound.push(last + 1);
            return Some(bound);
        }
    }
    None
}

/// In-memory source.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    records: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.records.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<K: Into<Vec<u8>>, V: Into<Vec<u8>>> FromIterator<(K, V)> for MemorySource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut source = Self::new();
        for (k, v) in iter {
            source.insert(k, v);
        }
        source
    }
}

impl RecordSource for MemorySource {
    fn keys_with_prefix(&self, prefix: &[u8]) -> anyhow::Result<Vec<Vec<u8>>> {
        Ok(self
            .records
            .range(prefix.to_vec()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.records.get(key).cloned())
    }
}

/// One line of an import file.
#[derive(Debug, Deserialize)]
struct ImportLine {
    key: String,
    value: Value,
}

/// Counts from a JSONL import.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    pub imported: usize,
    pub replaced: usize,
}

/// SQLite-backed ordered KV store.
///
/// Table: `records(key BLOB PRIMARY KEY, value BLOB) WITHOUT ROWID`.
#[derive(Debug)]
pub struct KvStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl KvStore {
    /// Open or create a store.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             CREATE TABLE IF NOT EXISTS records (
                 key BLOB PRIMARY KEY,
                 value BLOB NOT NULL
             ) WITHOUT ROWID;",
        )
        .with_context(|| format!("initializing {}", path.display()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Open a store that must already exist.
    pub fn open_existing(path: &Path) -> anyhow::Result<Self> {
        if !path.is_file() {
            bail!("record source {} does not exist", path.display());
        }
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("record source connection poisoned"))
    }

    /// Insert or replace one record. Returns true if the key already existed.
    pub fn put(&self, key: &[u8], value: &[u8]) -> anyhow::Result<bool> {
        let conn = self.conn()?;
        put_record(&conn, key, value)
    }

    /// Load `{"key": ..., "value": ...}` lines. A string value is stored as
    /// is; any other JSON value is stored as its serialized text.
    pub fn import_jsonl(&self, reader: impl BufRead) -> anyhow::Result<ImportStats> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut stats = ImportStats::default();
        for (n, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("reading line {}", n + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ImportLine = serde_json::from_str(&line)
                .with_context(|| format!("line {}: expected {{\"key\", \"value\"}}", n + 1))?;
            let body = match record.value {
                Value::String(s) => s.into_bytes(),
                other => serde_json::to_vec(&other)?,
            };
            if put_record(&tx, record.key.as_bytes(), &body)? {
                stats.replaced += 1;
            }
            stats.imported += 1;
        }
        tx.commit()?;
        Ok(stats)
    }

    pub fn count_prefix(&self, prefix: &[u8]) -> anyhow::Result<usize> {
        let conn = self.conn()?;
        let count: i64 = match prefix_upper_bound(prefix) {
            Some(upper) => conn.query_row(
                "SELECT COUNT(*) FROM records WHERE key >= ?1 AND key < ?2",
                params![prefix, upper],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM records WHERE key >= ?1",
                params![prefix],
                |row| row.get(0),
            )?,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Delete every record under `prefix`. Returns the number removed.
    pub fn delete_prefix(&self, prefix: &[u8]) -> anyhow::Result<usize> {
        let conn = self.conn()?;
        let removed = match prefix_upper_bound(prefix) {
            Some(upper) => conn.execute(
                "DELETE FROM records WHERE key >= ?1 AND key < ?2",
                params![prefix, upper],
            )?,
            None => conn.execute("DELETE FROM records WHERE key >= ?1", params![prefix])?,
        };
        Ok(removed)
    }
}

fn put_record(conn: &Connection, key: &[u8], value: &[u8]) -> anyhow::Result<bool> {
    let existed = conn
        .query_row("SELECT 1 FROM records WHERE key = ?1", params![key], |_| Ok(()))
        .optional()?
        .is_some();
    conn.execute(
        "INSERT OR REPLACE INTO records (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(existed)
}

impl RecordSource for KvStore {
    fn keys_with_prefix(&self, prefix: &[u8]) -> anyhow::Result<Vec<Vec<u8>>> {
        let conn = self.conn()?;
        let keys = match prefix_upper_bound(prefix) {
            Some(upper) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT key FROM records WHERE key >= ?1 AND key < ?2 ORDER BY key",
                )?;
                let rows = stmt.query_map(params![prefix, upper], |row| row.get(0))?;
                rows.collect::<Result<Vec<Vec<u8>>, _>>()?
            }
            None => {
                let mut stmt =
                    conn.prepare_cached("SELECT key FROM records WHERE key >= ?1 ORDER BY key")?;
                let rows = stmt.query_map(params![prefix], |row| row.get(0))?;
                rows.collect::<Result<Vec<Vec<u8>>, _>>()?
            }
        };
        Ok(keys)
    }

    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM records WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn upper_bound() {
        assert_eq!(prefix_upper_bound(b"abc"), Some(b"abd".to_vec()));
        assert_eq!(prefix_upper_bound(b"a\xff"), Some(b"b".to_vec()));
        assert_eq!(prefix_upper_bound(b"\xff\xff"), None);
        assert_eq!(prefix_upper_bound(b""), None);
    }

    #[test]
    fn memory_prefix_scan() {
        let source: MemorySource = [
            ("a/en/1", "x"),
            ("a/en/2", "y"),
            ("a/enx/1", "z"),
            ("b/en/1", "w"),
        ]
        .into_iter()
        .collect();
        let keys = source.keys_with_prefix(b"a/en/").unwrap();
        assert_eq!(keys, vec![b"a/en/1".to_vec(), b"a/en/2".to_vec()]);
        assert_eq!(source.get(b"b/en/1").unwrap(), Some(b"w".to_vec()));
        assert_eq!(source.get(b"nope").unwrap(), None);
    }

    #[test]
    fn sqlite_roundtrip_and_prefix() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(&dir.path().join("records.db")).unwrap();
        assert!(!store.put(b"k/b", b"2").unwrap());
        store.put(b"k/a", b"1").unwrap();
        store.put(b"l/a", b"3").unwrap();
        assert!(store.put(b"k/a", b"1'").unwrap());

        assert_eq!(
            store.keys_with_prefix(b"k/").unwrap(),
            vec![b"k/a".to_vec(), b"k/b".to_vec()]
        );
        assert_eq!(store.get(b"k/a").unwrap(), Some(b"1'".to_vec()));
        assert_eq!(store.count_prefix(b"").unwrap(), 3);
        assert_eq!(store.delete_prefix(b"k/").unwrap(), 2);
        assert_eq!(store.count_prefix(b"").unwrap(), 1);
    }

    #[test]
    fn import_jsonl_accepts_objects_and_strings() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(&dir.path().join("records.db")).unwrap();
        let input = concat!(
            r#"{"key":"u/1","value":{"items":[]}}"#,
            "\n\n",
            r#"{"key":"u/2","value":"{\"type\":\"x/not_found\"}"}"#,
            "\n",
            r#"{"key":"u/1","value":{"items":[1]}}"#,
            "\n",
        );
        let stats = store.import_jsonl(input.as_bytes()).unwrap();
        assert_eq!(stats, ImportStats { imported: 3, replaced: 1 });
        assert_eq!(store.get(b"u/1").unwrap(), Some(br#"{"items":[1]}"#.to_vec()));
        assert_eq!(
            store.get(b"u/2").unwrap(),
            Some(br#"{"type":"x/not_found"}"#.to_vec())
        );
    }

    #[test]
    fn import_rejects_bad_line_atomically() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(&dir.path().join("records.db")).unwrap();
        let input = "{\"key\":\"u/1\",\"value\":1}\nnot json\n";
        assert!(store.import_jsonl(input.as_bytes()).is_err());
        assert_eq!(store.count_prefix(b"").unwrap(), 0);
    }

    #[test]
    fn open_existing_requires_file() {
        let dir = TempDir::new().unwrap();
        assert!(KvStore::open_existing(&dir.path().join("missing.db")).is_err());
    }
}
