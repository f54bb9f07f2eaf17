use anyhow::Result;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::models::ImageItem;

const FEED_URL: &str = "https://picsum.photos/list";

/// URL of the square photo for a feed item. Pure derivation, no I/O.
pub fn image_url_for(id: i64) -> String {
    format!("https://picsum.photos/600/600?image={}", id)
}

/// Read-only client for the remote photo listing.
#[derive(Clone)]
pub struct FeedClient {
    client: reqwest::blocking::Client,
}

impl FeedClient {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("photo_feed/0.1")
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// One GET of the full feed listing. The source's order is kept as-is.
    pub fn fetch_images(&self) -> Result<Vec<ImageItem>> {
        let response = self.client.get(FEED_URL).send()?;
        let items = response.json::<Vec<ImageItem>>()?;

        println!("Loaded feed listing with {} items", items.len());
        Ok(items)
    }

    /// Raw bytes of one photo, for decoding into a card texture.
    pub fn fetch_image(&self, id: i64) -> Result<Vec<u8>> {
        let response = self.client.get(image_url_for(id)).send()?;
        Ok(response.bytes()?.to_vec())
    }
}

/// Loaded items sit behind an `Arc` so views can hold onto the list for a
/// frame without copying it.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedState {
    Loading,
    Loaded(Arc<Vec<ImageItem>>),
    Failed,
}

/// Runs the one feed fetch of the session on a background thread and holds
/// the tri-state result. `Loaded` and `Failed` are terminal; there is no
/// retry short of restarting the app.
pub struct FeedLoader {
    state: FeedState,
    receiver: Option<mpsc::Receiver<Option<Vec<ImageItem>>>>,
    started: bool,
}

impl FeedLoader {
    pub fn new() -> Self {
        Self {
            state: FeedState::Loading,
            receiver: None,
            started: false,
        }
    }

    /// Kicks off the fetch. Calling again is a no-op; the fetch runs at
    /// most once per loader.
    pub fn start(&mut self, client: &FeedClient) {
        if self.started {
            return;
        }
        self.started = true;

        let client = client.clone();
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || match client.fetch_images() {
            Ok(items) => {
                let _ = tx.send(Some(items));
            }
            Err(e) => {
                eprintln!("Failed to load feed: {}", e);
                let _ = tx.send(None);
            }
        });

        self.receiver = Some(rx);
    }

    /// Drains the completion channel without blocking. Returns true when
    /// the state changed and the view should repaint.
    pub fn poll(&mut self) -> bool {
        if let Some(rx) = &self.receiver {
            match rx.try_recv() {
                Ok(result) => {
                    self.resolve(result);
                    self.receiver = None;
                    return true;
                }
                Err(mpsc::TryRecvError::Disconnected) => {
                    self.resolve(None);
                    self.receiver = None;
                    return true;
                }
                Err(mpsc::TryRecvError::Empty) => {}
            }
        }
        false
    }

    fn resolve(&mut self, result: Option<Vec<ImageItem>>) {
        self.state = match result {
            Some(items) => FeedState::Loaded(Arc::new(items)),
            None => FeedState::Failed,
        };
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, FeedState::Loading)
    }

    pub fn items(&self) -> &[ImageItem] {
        match &self.state {
            FeedState::Loaded(items) => items.as_slice(),
            _ => &[],
        }
    }

    /// Cheap per-frame handle to the loaded items; empty until `Loaded`.
    pub fn items_handle(&self) -> Arc<Vec<ImageItem>> {
        match &self.state {
            FeedState::Loaded(items) => Arc::clone(items),
            _ => Arc::new(Vec::new()),
        }
    }
}
