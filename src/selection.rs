use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// The currently selected media file and the currently active tag.
///
/// Each field is replaced atomically on its own. Writing the filename and
/// the tag id are two separate operations, so a reader may observe a new
/// filename alongside the previous tag id.
#[derive(Debug, Default)]
pub struct SelectionState {
    selected_filename: RwLock<Option<String>>,
    active_tag_id: RwLock<Option<String>>,
    updates: AtomicU64,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_selection(&self, filename: Option<String>) {
        let mut guard = self.selected_filename.write().await;
        *guard = filename;
        self.updates.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn get_selection(&self) -> Option<String> {
        self.selected_filename.read().await.clone()
    }

    pub async fn set_active_tag(&self, tag_id: Option<String>) {
        *self.active_tag_id.write().await = tag_id;
    }

    pub async fn get_active_tag(&self) -> Option<String> {
        self.active_tag_id.read().await.clone()
    }

    /// Number of selection writes since startup
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }
}
