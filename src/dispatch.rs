//! Tag presence decisions shared by the serial listener and the HTTP webhook.

use std::{path::PathBuf, sync::Arc};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    media,
    selection::SelectionState,
    tagmap::{normalize_tag_id, TagMapStore},
};

/// Result of handling a present tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagOutcome {
    /// The tag is mapped and its media file was selected
    Selected { tag_id: String, filename: String },
    /// The tag is not in the map; the selection was left alone
    Unknown { tag_id: String },
}

/// Result of handling a tag removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// Selection reverted to the default; `changed` is false when it
    /// already was the default
    Reset { default: String, changed: bool },
    /// No default configured; the selection was left alone
    NoDefault,
    /// No default configured; the selection was cleared. `changed` is false
    /// when nothing was selected
    Cleared { changed: bool },
}

/// What a removal does to the selection when the map has no default
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingDefault {
    KeepSelection,
    ClearSelection,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Media file '{filename}' for tag {tag_id} not found")]
    MediaFileNotFound { tag_id: String, filename: String },
}

/// Applies tag presence events to the shared selection
pub struct TagDispatcher {
    tag_map: Arc<TagMapStore>,
    selection: Arc<SelectionState>,
    media_dir: PathBuf,
}

impl TagDispatcher {
    pub fn new(tag_map: Arc<TagMapStore>, selection: Arc<SelectionState>, media_dir: PathBuf) -> Self {
        Self {
            tag_map,
            selection,
            media_dir,
        }
    }

    pub fn tag_map(&self) -> &Arc<TagMapStore> {
        &self.tag_map
    }

    pub fn selection(&self) -> &Arc<SelectionState> {
        &self.selection
    }

    /// Record `raw_tag_id` as the active tag and select its media file.
    ///
    /// The selection is only written when the tag is mapped and the mapped
    /// file exists in the media directory.
    pub async fn tag_present(&self, raw_tag_id: &str, source: &str) -> Result<TagOutcome, DispatchError> {
        let tag_id = normalize_tag_id(raw_tag_id);
        self.selection.set_active_tag(Some(tag_id.clone())).await;

        let map = self.tag_map.snapshot().await;
        let Some(filename) = map.lookup(&tag_id).map(str::to_owned) else {
            warn!(source, tag_id = %tag_id, "Unknown RFID tag; selection unchanged");
            return Ok(TagOutcome::Unknown { tag_id });
        };

        if !media::media_file_exists(&self.media_dir, &filename).await {
            warn!(
                source,
                tag_id = %tag_id,
                filename = %filename,
                media_dir = %self.media_dir.display(),
                "Mapped media file missing on disk; selection unchanged"
            );
            return Err(DispatchError::MediaFileNotFound { tag_id, filename });
        }

        self.selection.set_selection(Some(filename.clone())).await;
        info!(source, tag_id = %tag_id, filename = %filename, "RFID tag read, displaying media");
        Ok(TagOutcome::Selected { tag_id, filename })
    }

    /// Clear the active tag and revert the selection to the default file.
    ///
    /// `missing_default` decides what happens when the map has no default.
    pub async fn tag_removed(&self, source: &str, missing_default: MissingDefault) -> RemovalOutcome {
        self.selection.set_active_tag(None).await;

        let map = self.tag_map.snapshot().await;
        let Some(default) = map.default_filename().map(str::to_owned) else {
            return match missing_default {
                MissingDefault::KeepSelection => {
                    warn!(source, "Tag removed but no default media configured; selection unchanged");
                    RemovalOutcome::NoDefault
                }
                MissingDefault::ClearSelection => {
                    let changed = self.selection.get_selection().await.is_some();
                    if changed {
                        self.selection.set_selection(None).await;
                        info!(source, "Tag removed and no default media configured; selection cleared");
                    }
                    RemovalOutcome::Cleared { changed }
                }
            };
        };

        let changed = self.selection.get_selection().await.as_deref() != Some(default.as_str());
        if changed {
            self.selection.set_selection(Some(default.clone())).await;
            info!(source, filename = %default, "Tag removed, reverting to default media");
        }

        RemovalOutcome::Reset { default, changed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tagmap::TagMap;
    use tempfile::TempDir;

    fn dispatcher(media_dir: &TempDir, pairs: &[(&str, &str)]) -> TagDispatcher {
        let map = TagMap::from_pairs(pairs.iter().copied());
        let store = Arc::new(TagMapStore::with_map(media_dir.path().join("rfid_map.json"), map));
        TagDispatcher::new(
            store,
            Arc::new(SelectionState::new()),
            media_dir.path().to_path_buf(),
        )
    }

    #[tokio::test]
    async fn test_known_tag_selects_existing_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cat.png"), b"png").unwrap();
        let dispatcher = dispatcher(&dir, &[("04AB", "cat.png")]);

        let outcome = dispatcher.tag_present(" 04ab ", "test").await.unwrap();
        assert_eq!(
            outcome,
            TagOutcome::Selected {
                tag_id: "04AB".to_string(),
                filename: "cat.png".to_string()
            }
        );
        assert_eq!(dispatcher.selection().get_selection().await.as_deref(), Some("cat.png"));
        assert_eq!(dispatcher.selection().get_active_tag().await.as_deref(), Some("04AB"));
    }

    #[tokio::test]
    async fn test_unknown_tag_keeps_selection() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, &[("04AB", "cat.png")]);
        dispatcher.selection().set_selection(Some("prior.png".to_string())).await;

        let outcome = dispatcher.tag_present("FFFF", "test").await.unwrap();
        assert_eq!(outcome, TagOutcome::Unknown { tag_id: "FFFF".to_string() });
        assert_eq!(dispatcher.selection().get_selection().await.as_deref(), Some("prior.png"));
        assert_eq!(dispatcher.selection().get_active_tag().await.as_deref(), Some("FFFF"));
    }

    #[tokio::test]
    async fn test_missing_file_keeps_selection() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, &[("04AB", "gone.png")]);
        dispatcher.selection().set_selection(Some("prior.png".to_string())).await;

        let err = dispatcher.tag_present("04AB", "test").await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::MediaFileNotFound {
                tag_id: "04AB".to_string(),
                filename: "gone.png".to_string()
            }
        );
        assert_eq!(dispatcher.selection().get_selection().await.as_deref(), Some("prior.png"));
        assert_eq!(dispatcher.selection().update_count(), 1);
    }

    #[tokio::test]
    async fn test_removal_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, &[("default", "idle.png")]);
        dispatcher.selection().set_selection(Some("cat.png".to_string())).await;
        dispatcher.selection().set_active_tag(Some("04AB".to_string())).await;

        let first = dispatcher.tag_removed("test", MissingDefault::KeepSelection).await;
        let second = dispatcher.tag_removed("test", MissingDefault::KeepSelection).await;

        assert_eq!(
            first,
            RemovalOutcome::Reset {
                default: "idle.png".to_string(),
                changed: true
            }
        );
        assert_eq!(
            second,
            RemovalOutcome::Reset {
                default: "idle.png".to_string(),
                changed: false
            }
        );
        assert_eq!(dispatcher.selection().get_active_tag().await, None);
        assert_eq!(dispatcher.selection().update_count(), 2);
    }

    #[tokio::test]
    async fn test_removal_without_default() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, &[("04AB", "cat.png")]);
        dispatcher.selection().set_selection(Some("cat.png".to_string())).await;

        assert_eq!(dispatcher.tag_removed("test", MissingDefault::KeepSelection).await, RemovalOutcome::NoDefault);
        assert_eq!(dispatcher.selection().get_selection().await.as_deref(), Some("cat.png"));
    }

    #[tokio::test]
    async fn test_removal_without_default_can_clear_selection() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir, &[("04AB", "cat.png")]);
        dispatcher.selection().set_selection(Some("cat.png".to_string())).await;

        let first = dispatcher.tag_removed("test", MissingDefault::ClearSelection).await;
        let second = dispatcher.tag_removed("test", MissingDefault::ClearSelection).await;

        assert_eq!(first, RemovalOutcome::Cleared { changed: true });
        assert_eq!(second, RemovalOutcome::Cleared { changed: false });
        assert_eq!(dispatcher.selection().get_selection().await, None);
        assert_eq!(dispatcher.selection().update_count(), 2);
    }
}
