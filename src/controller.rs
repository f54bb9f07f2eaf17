use std::sync::mpsc;
use std::thread;

use crate::models::CommentsForItem;
use crate::store::CommentStore;

/// Owns the authoritative comment map plus the selection state shared by
/// the feed and comments screens. The UI thread is the only writer.
///
/// Invariant: `comments_visible == true` implies a selected item.
pub struct AppController {
    store: CommentStore,
    comments_for_item: CommentsForItem,
    selected_item: Option<i64>,
    comments_visible: bool,
    hydration_receiver: Option<mpsc::Receiver<CommentsForItem>>,
    hydrated: bool,
}

impl AppController {
    pub fn new(store: CommentStore) -> Self {
        Self {
            store,
            comments_for_item: CommentsForItem::new(),
            selected_item: None,
            comments_visible: false,
            hydration_receiver: None,
            hydrated: false,
        }
    }

    /// Kicks off the one-time background read of the persisted map.
    pub fn start_hydration(&mut self) {
        if self.hydrated || self.hydration_receiver.is_some() {
            return;
        }

        let store = self.store.clone();
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let _ = tx.send(store.load());
        });

        self.hydration_receiver = Some(rx);
    }

    /// Checks whether the startup load has finished; returns true when the
    /// map was replaced and the view should repaint.
    pub fn poll_hydration(&mut self) -> bool {
        if let Some(rx) = &self.hydration_receiver {
            match rx.try_recv() {
                Ok(map) => {
                    self.apply_hydration(map);
                    self.hydration_receiver = None;
                    return true;
                }
                Err(mpsc::TryRecvError::Disconnected) => {
                    self.hydration_receiver = None;
                    self.hydrated = true;
                }
                Err(mpsc::TryRecvError::Empty) => {}
            }
        }
        false
    }

    // Hydration replaces the map wholesale. A comment submitted before the
    // startup load resolves is lost here; storage reads on a local disk
    // settle long before a user can type, so no merge is attempted.
    fn apply_hydration(&mut self, map: CommentsForItem) {
        self.comments_for_item = map;
        self.hydrated = true;
    }

    pub fn open_comments(&mut self, item_id: i64) {
        self.selected_item = Some(item_id);
        self.comments_visible = true;
    }

    pub fn close_comments(&mut self) {
        self.selected_item = None;
        self.comments_visible = false;
    }

    /// Appends `text` to the selected item's comments and schedules a
    /// detached persist of the whole map. The readable list and count
    /// update before this returns; the write is never awaited.
    pub fn submit_comment(&mut self, text: &str) {
        let Some(item_id) = self.selected_item else {
            eprintln!("Ignoring comment submitted with no item selected");
            return;
        };

        self.comments_for_item = CommentStore::append(&self.comments_for_item, item_id, text);
        self.store.persist_detached(self.comments_for_item.clone());
    }

    pub fn comments_for(&self, item_id: i64) -> &[String] {
        self.comments_for_item
            .get(&item_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn comment_count(&self, item_id: i64) -> usize {
        self.comments_for(item_id).len()
    }

    pub fn selected_item(&self) -> Option<i64> {
        self.selected_item
    }

    pub fn comments_visible(&self) -> bool {
        self.comments_visible
    }

    pub fn is_hydrating(&self) -> bool {
        self.hydration_receiver.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Storage;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn temp_controller() -> (TempDir, Arc<Storage>, AppController) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(&dir.path().join("store.db")).unwrap());
        let controller = AppController::new(CommentStore::new(storage.clone()));
        (dir, storage, controller)
    }

    /// The persist after a submission is detached, so tests that assert on
    /// the stored value poll until the write lands.
    fn wait_for_persisted(storage: &Storage) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(raw) = storage.get("comments_for_item").unwrap() {
                return raw;
            }
            assert!(Instant::now() < deadline, "persist never landed");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn open_then_close_clears_selection() {
        let (_dir, _storage, mut controller) = temp_controller();

        controller.open_comments(5);
        assert_eq!(controller.selected_item(), Some(5));
        assert!(controller.comments_visible());

        controller.close_comments();
        assert_eq!(controller.selected_item(), None);
        assert!(!controller.comments_visible());
    }

    #[test]
    fn open_is_idempotent_for_the_same_item() {
        let (_dir, _storage, mut controller) = temp_controller();

        controller.open_comments(5);
        controller.open_comments(5);
        assert_eq!(controller.selected_item(), Some(5));
        assert!(controller.comments_visible());
    }

    #[test]
    fn submitted_comment_is_readable_synchronously() {
        let (_dir, _storage, mut controller) = temp_controller();

        controller.open_comments(7);
        controller.submit_comment("first");
        controller.submit_comment("second");

        // No waiting on the detached persist
        assert_eq!(controller.comments_for(7), &["first", "second"]);
        assert_eq!(controller.comment_count(7), 2);
    }

    #[test]
    fn submit_with_no_selection_is_dropped() {
        let (_dir, _storage, mut controller) = temp_controller();

        controller.submit_comment("nowhere to go");
        assert!(controller.comments_for_item.is_empty());
    }

    #[test]
    fn absent_item_reads_as_empty() {
        let (_dir, _storage, controller) = temp_controller();
        assert!(controller.comments_for(999).is_empty());
        assert_eq!(controller.comment_count(999), 0);
    }

    #[test]
    fn first_comment_persists_the_expected_map() {
        let (_dir, storage, mut controller) = temp_controller();

        controller.open_comments(42);
        controller.submit_comment("Nice!");
        assert_eq!(controller.comment_count(42), 1);

        let raw = wait_for_persisted(&storage);
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value, serde_json::json!({ "42": ["Nice!"] }));
    }

    #[test]
    fn comments_survive_a_new_controller_on_the_same_storage() {
        let (_dir, storage, mut controller) = temp_controller();

        controller.open_comments(3);
        controller.submit_comment("persisted");
        wait_for_persisted(&storage);

        let mut restarted = AppController::new(CommentStore::new(storage.clone()));
        restarted.start_hydration();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !restarted.poll_hydration() {
            assert!(Instant::now() < deadline, "hydration never finished");
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(restarted.comments_for(3), &["persisted"]);
    }

    #[test]
    fn hydration_replaces_the_map_wholesale() {
        let (_dir, _storage, mut controller) = temp_controller();

        // A submission landing before hydration resolves is clobbered by
        // the hydrated map.
        controller.open_comments(1);
        controller.submit_comment("early");

        let mut stored = CommentsForItem::new();
        stored.insert(2, vec!["from disk".to_string()]);
        controller.apply_hydration(stored);

        assert!(controller.comments_for(1).is_empty());
        assert_eq!(controller.comments_for(2), &["from disk"]);
    }
}
