use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov"];

/// Media type inferred purely from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Unknown,
}

impl MediaKind {
    /// Classify a filename by its lowercased extension
    pub fn classify(filename: &str) -> Self {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        match extension.as_deref() {
            Some(ext) if IMAGE_EXTENSIONS.contains(&ext) => MediaKind::Image,
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext) => MediaKind::Video,
            _ => MediaKind::Unknown,
        }
    }

    /// `None` for files that are neither image nor video
    pub fn known(self) -> Option<Self> {
        match self {
            MediaKind::Unknown => None,
            kind => Some(kind),
        }
    }

    pub fn is_displayable(self) -> bool {
        self != MediaKind::Unknown
    }

    /// MIME type used when serving the file
    pub fn mime_type(filename: &str) -> &'static str {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        match extension.as_deref() {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("gif") => "image/gif",
            Some("mp4") => "video/mp4",
            Some("webm") => "video/webm",
            Some("mov") => "video/quicktime",
            _ => "application/octet-stream",
        }
    }
}

/// A filename paired with its classification, computed at query time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaEntry {
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
}

impl MediaEntry {
    pub fn new(filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let kind = MediaKind::classify(&filename);
        Self { filename, kind }
    }
}

/// Resolves a bare filename inside the media directory.
///
/// Returns `None` for names that are empty, absolute, or contain any
/// component other than a plain file name, so a mapping entry can never
/// point outside the media directory.
pub fn resolve_media_path(media_dir: &Path, filename: &str) -> Option<PathBuf> {
    let candidate = Path::new(filename);
    let mut components = candidate.components();

    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Some(media_dir.join(name)),
        _ => None,
    }
}

/// Checks that `filename` names an existing regular file in the media directory
pub async fn media_file_exists(media_dir: &Path, filename: &str) -> bool {
    let Some(path) = resolve_media_path(media_dir, filename) else {
        warn!(filename, "Rejected media filename outside the media directory");
        return false;
    };

    match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata.is_file(),
        Err(e) => {
            debug!(path = %path.display(), "Media file lookup failed: {}", e);
            false
        }
    }
}

/// Lists displayable files in the media directory, sorted by name
pub async fn list_media_files(media_dir: &Path) -> std::io::Result<Vec<MediaEntry>> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(media_dir).await?;

    while let Some(entry) = dir.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            warn!(path = %entry.path().display(), "Skipping media file with non UTF-8 name");
            continue;
        };
        let media = MediaEntry::new(name);
        if media.kind.is_displayable() {
            entries.push(media);
        }
    }

    entries.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(entries)
}
