use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::{path::Path, sync::Arc, time::Duration};
use tokio::{
    sync::mpsc,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use super::TagMapStore;

const DEBOUNCE_DURATION: Duration = Duration::from_millis(500);

/// Reload `store` whenever its mapping document is created or modified.
///
/// The returned watcher must be kept alive for as long as reloads are wanted;
/// dropping it stops the background task.
pub fn watch_tag_map(store: Arc<TagMapStore>) -> Result<RecommendedWatcher> {
    let (tx, mut rx) = mpsc::channel(100);

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            let _ = tx.try_send(event);
        }
    })
    .context("Failed to create tag map watcher")?;

    // Editors often replace the file, so watch the parent directory
    let map_path = store.path().to_path_buf();
    let watch_dir = match map_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    watcher
        .watch(&watch_dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", watch_dir.display()))?;

    info!(path = %map_path.display(), "Watching tag map for changes");

    let file_name = map_path.file_name().map(|name| name.to_os_string());
    tokio::spawn(async move {
        // Reload once the file has been quiet for the debounce window
        let mut deadline: Option<Instant> = None;

        loop {
            let event = match deadline {
                Some(at) => tokio::select! {
                    event = rx.recv() => event,
                    _ = sleep_until(at) => {
                        deadline = None;
                        let map = store.reload().await;
                        info!(entries = map.len(), "Tag map reloaded after file change");
                        continue;
                    }
                },
                None => rx.recv().await,
            };
            let Some(event) = event else { break };

            let is_map_file = event
                .paths
                .iter()
                .any(|path| path.file_name().map(|name| name.to_os_string()) == file_name);
            if !is_map_file {
                continue;
            }

            match event.kind {
                EventKind::Modify(_) | EventKind::Create(_) => {
                    if deadline.is_some() {
                        debug!("Tag map changed again; postponing reload");
                    }
                    deadline = Some(Instant::now() + DEBOUNCE_DURATION);
                }
                EventKind::Remove(_) => {
                    warn!(path = %store.path().display(), "Tag map file removed; keeping current map");
                }
                _ => {}
            }
        }

        debug!("Tag map watcher stopped");
    });

    Ok(watcher)
}
