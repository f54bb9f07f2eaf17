use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::models::CommentsForItem;

/// Storage key for the serialized comment map. The whole map lives under
/// this one key as a JSON object of stringified item ids to string arrays.
const COMMENTS_KEY: &str = "comments_for_item";

/// Local key-value storage backed by a small SQLite database in the user's
/// app data directory. Reads return `None` for keys never written; writes
/// overwrite wholesale.
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn new() -> Result<Self> {
        let app_data_dir = Self::get_app_data_dir()?;
        if !app_data_dir.exists() {
            std::fs::create_dir_all(&app_data_dir)?;
        }

        Self::open(&app_data_dir.join("store.db"))
    }

    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Fallback when the on-disk database cannot be opened. Comments written
    /// to it are lost when the process exits.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn get_app_data_dir() -> Result<PathBuf> {
        let home_dir =
            dirs_next::home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
        Ok(home_dir.join(".photo_feed"))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("Failed to lock storage connection"))?;
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("Failed to lock storage connection"))?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;

        Ok(())
    }
}

/// Serializes the comment map into [`Storage`] and hydrates it back out.
///
/// Every persist rewrites the full map rather than a delta; comment volume
/// is small and writes happen once per submission, so the write
/// amplification is not worth avoiding.
#[derive(Clone)]
pub struct CommentStore {
    storage: Arc<Storage>,
}

impl CommentStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// One-time startup read of the persisted map. Nothing stored, or a
    /// value that doesn't parse, hydrates to the empty map; the failure is
    /// logged and otherwise swallowed.
    pub fn load(&self) -> CommentsForItem {
        match self.storage.get(COMMENTS_KEY) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(map) => map,
                Err(e) => {
                    eprintln!("Failed to parse stored comments: {}", e);
                    CommentsForItem::new()
                }
            },
            Ok(None) => CommentsForItem::new(),
            Err(e) => {
                eprintln!("Failed to load comments: {}", e);
                CommentsForItem::new()
            }
        }
    }

    /// Returns a new map with `text` appended at `item_id`, creating the
    /// bucket if absent. The input map is left untouched; the caller swaps
    /// the result in as the authoritative map.
    pub fn append(map: &CommentsForItem, item_id: i64, text: &str) -> CommentsForItem {
        let mut updated = map.clone();
        updated.entry(item_id).or_default().push(text.to_string());
        updated
    }

    pub fn persist(&self, map: &CommentsForItem) -> Result<()> {
        let raw = serde_json::to_string(map)?;
        self.storage.set(COMMENTS_KEY, &raw)
    }

    /// Fire-and-forget persist on its own thread. A failed write is logged
    /// and not retried; the in-memory map keeps the comment either way.
    pub fn persist_detached(&self, map: CommentsForItem) {
        let store = self.clone();
        thread::spawn(move || {
            if let Err(e) = store.persist(&map) {
                eprintln!("Failed to save comments: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, Arc<Storage>, CommentStore) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(&dir.path().join("store.db")).unwrap());
        let store = CommentStore::new(storage.clone());
        (dir, storage, store)
    }

    #[test]
    fn kv_get_returns_none_when_never_written() {
        let (_dir, storage, _store) = temp_store();
        assert_eq!(storage.get("missing").unwrap(), None);
    }

    #[test]
    fn in_memory_storage_reads_and_writes() {
        let storage = Storage::in_memory().unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn kv_set_overwrites_wholesale() {
        let (_dir, storage, _store) = temp_store();
        storage.set("k", "first").unwrap();
        storage.set("k", "second").unwrap();
        assert_eq!(storage.get("k").unwrap(), Some("second".to_string()));
    }

    #[test]
    fn load_with_no_prior_value_is_empty() {
        let (_dir, _storage, store) = temp_store();
        assert!(store.load().is_empty());
    }

    #[test]
    fn persist_then_load_round_trips() {
        let (_dir, _storage, store) = temp_store();

        let mut map = CommentsForItem::new();
        map.insert(1, vec!["first".to_string(), "second".to_string()]);
        map.insert(7, vec!["only".to_string()]);

        store.persist(&map).unwrap();
        assert_eq!(store.load(), map);
    }

    #[test]
    fn load_swallows_garbage_in_storage() {
        let (_dir, storage, store) = temp_store();
        storage.set(COMMENTS_KEY, "not json at all").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn persisted_form_uses_stringified_ids() {
        let (_dir, storage, store) = temp_store();

        let map = CommentStore::append(&CommentsForItem::new(), 42, "Nice!");
        store.persist(&map).unwrap();

        let raw = storage.get(COMMENTS_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["42"][0], "Nice!");
    }

    #[test]
    fn append_preserves_call_order() {
        let mut map = CommentsForItem::new();
        map = CommentStore::append(&map, 3, "a");
        map = CommentStore::append(&map, 3, "b");
        map = CommentStore::append(&map, 5, "x");
        map = CommentStore::append(&map, 3, "a");

        // No dedup, no reordering
        assert_eq!(map[&3], vec!["a", "b", "a"]);
        assert_eq!(map[&5], vec!["x"]);
    }

    #[test]
    fn append_does_not_mutate_its_input() {
        let mut original = CommentsForItem::new();
        original.insert(9, vec!["kept".to_string()]);

        let updated = CommentStore::append(&original, 9, "new");

        assert_eq!(original[&9], vec!["kept"]);
        assert_eq!(updated[&9], vec!["kept", "new"]);
    }

    #[test]
    fn append_creates_missing_bucket() {
        let map = CommentStore::append(&CommentsForItem::new(), 100, "hello");
        assert_eq!(map[&100], vec!["hello"]);
    }
}
