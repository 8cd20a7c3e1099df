use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::SerialConfig,
    dispatch::{MissingDefault, TagDispatcher},
    tagmap::normalize_tag_id,
};

const SOURCE: &str = "serial";
const NO_TAG_SENTINEL: &str = "NO_TAG";
const READ_CHUNK_SIZE: usize = 256;
const MAX_PENDING_BYTES: usize = 4096;

/// Byte stream delivered by a connected reader
pub type SerialReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Error, Debug)]
pub enum SerialConnectionError {
    #[error("Failed to open serial device {device}: {reason}")]
    Open { device: String, reason: String },

    #[error("Serial read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial connection closed by peer")]
    Closed,
}

/// Opens connections to the tag reader
#[async_trait]
pub trait SerialConnector: Send + Sync {
    /// Human readable name of the device, used in logs
    fn describe(&self) -> String;

    async fn connect(&self) -> Result<SerialReader, SerialConnectionError>;
}

/// Connector for a real serial device such as `/dev/rfcomm0`
pub struct TokioSerialConnector {
    device: String,
    baud_rate: u32,
    io_timeout: Duration,
}

impl TokioSerialConnector {
    pub fn new(device: impl Into<String>, baud_rate: u32, io_timeout: Duration) -> Self {
        Self {
            device: device.into(),
            baud_rate,
            io_timeout,
        }
    }

    pub fn from_config(config: &SerialConfig) -> Self {
        Self::new(
            config.device.clone(),
            config.baud_rate,
            Duration::from_millis(config.poll_interval_ms),
        )
    }
}

#[async_trait]
impl SerialConnector for TokioSerialConnector {
    fn describe(&self) -> String {
        format!("{} @ {} baud", self.device, self.baud_rate)
    }

    async fn connect(&self) -> Result<SerialReader, SerialConnectionError> {
        let port = tokio_serial::new(self.device.as_str(), self.baud_rate)
            .timeout(self.io_timeout)
            .open_native_async()
            .map_err(|e| SerialConnectionError::Open {
                device: self.device.clone(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(port))
    }
}

/// Splits a byte stream into lines terminated by `\n` or `\r`
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every completed line, keeping the partial
    /// trailing fragment for the next call
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));

        let mut lines = Vec::new();
        while let Some(end) = self.pending.find(['\n', '\r']) {
            lines.push(self.pending[..end].to_string());
            self.pending.drain(..=end);
        }

        if self.pending.len() > MAX_PENDING_BYTES {
            warn!(
                bytes = self.pending.len(),
                "Discarding oversized serial fragment without line terminator"
            );
            self.pending.clear();
        }
        lines
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// One parsed line from the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialLine {
    Empty,
    NoTag,
    Tag(String),
}

impl SerialLine {
    pub fn parse(line: &str) -> Self {
        let normalized = normalize_tag_id(line);
        if normalized.is_empty() {
            SerialLine::Empty
        } else if normalized == NO_TAG_SENTINEL {
            SerialLine::NoTag
        } else {
            SerialLine::Tag(normalized)
        }
    }
}

/// Timing knobs for the listener loop
#[derive(Debug, Clone, Copy)]
pub struct ListenerSettings {
    pub reload_interval: Duration,
    pub reconnect_delay: Duration,
    pub poll_interval: Duration,
}

impl From<&SerialConfig> for ListenerSettings {
    fn from(config: &SerialConfig) -> Self {
        Self {
            reload_interval: Duration::from_secs(config.reload_interval_secs),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

/// Background task turning reader lines into selection changes
pub struct SerialTagListener {
    connector: Arc<dyn SerialConnector>,
    dispatcher: Arc<TagDispatcher>,
    settings: ListenerSettings,
    buffer: LineBuffer,
    last_reload: Instant,
}

impl SerialTagListener {
    pub fn new(
        connector: Arc<dyn SerialConnector>,
        dispatcher: Arc<TagDispatcher>,
        settings: ListenerSettings,
    ) -> Self {
        Self {
            connector,
            dispatcher,
            settings,
            buffer: LineBuffer::new(),
            last_reload: Instant::now(),
        }
    }

    /// Spawn the listener on the current runtime
    pub fn start(self) -> ListenerHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(cancel.clone()));
        info!("RFID listener task started");
        ListenerHandle { cancel, task }
    }

    /// Connect, read and reconnect until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        let device = self.connector.describe();
        info!(device = %device, "Starting serial tag listener");

        loop {
            self.reload_if_due().await;

            let connection = tokio::select! {
                _ = cancel.cancelled() => break,
                connection = self.connector.connect() => connection,
            };

            match connection {
                Ok(reader) => {
                    info!(device = %device, "Listening for RFID tags");
                    match self.read_until_failure(reader, &cancel).await {
                        Ok(()) => break,
                        Err(e) => warn!(device = %device, "{}; waiting for reconnection", e),
                    }
                }
                Err(e) => warn!(device = %device, "{}; retrying", e),
            }

            self.buffer.clear();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.settings.reconnect_delay) => {}
            }
        }

        info!(device = %device, "Serial tag listener stopped");
    }

    /// Returns `Ok` only when cancelled
    async fn read_until_failure(
        &mut self,
        mut reader: SerialReader,
        cancel: &CancellationToken,
    ) -> Result<(), SerialConnectionError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            self.reload_if_due().await;

            let read = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                read = timeout(self.settings.poll_interval, reader.read(&mut chunk)) => read,
            };

            let len = match read {
                // No data within the poll window
                Err(_) => continue,
                Ok(Ok(0)) => return Err(SerialConnectionError::Closed),
                Ok(Ok(len)) => len,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Ok(Err(e)) => return Err(e.into()),
            };

            for line in self.buffer.push(&chunk[..len]) {
                self.handle_line(&line).await;
            }
        }
    }

    async fn reload_if_due(&mut self) {
        if self.last_reload.elapsed() >= self.settings.reload_interval {
            self.dispatcher.tag_map().reload().await;
            self.last_reload = Instant::now();
        }
    }

    /// Apply one complete line from the reader
    pub async fn handle_line(&self, line: &str) {
        match SerialLine::parse(line) {
            SerialLine::Empty => {}
            SerialLine::NoTag => {
                self.dispatcher.tag_removed(SOURCE, MissingDefault::ClearSelection).await;
            }
            SerialLine::Tag(tag_id) => {
                let active = self.dispatcher.selection().get_active_tag().await;
                if active.as_deref() == Some(tag_id.as_str()) {
                    debug!(tag_id = %tag_id, "Ignoring repeated read of active tag");
                    return;
                }
                if let Err(e) = self.dispatcher.tag_present(&tag_id, SOURCE).await {
                    debug!(tag_id = %tag_id, "Serial tag not applied: {}", e);
                }
            }
        }
    }
}

/// Owner of a running listener task
pub struct ListenerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Cancel the listener and wait for it to exit
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("RFID listener task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        selection::SelectionState,
        tagmap::{TagMap, TagMapStore},
    };
    use std::{collections::VecDeque, path::Path, sync::Mutex};
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    struct ScriptedConnector {
        connections: Mutex<VecDeque<SerialReader>>,
        attempts: Mutex<usize>,
    }

    impl ScriptedConnector {
        fn new(readers: Vec<SerialReader>) -> Self {
            Self {
                connections: Mutex::new(readers.into_iter().collect()),
                attempts: Mutex::new(0),
            }
        }

        fn attempts(&self) -> usize {
            *self.attempts.lock().unwrap()
        }
    }

    #[async_trait]
    impl SerialConnector for ScriptedConnector {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        async fn connect(&self) -> Result<SerialReader, SerialConnectionError> {
            *self.attempts.lock().unwrap() += 1;
            self.connections
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| SerialConnectionError::Open {
                    device: "scripted".to_string(),
                    reason: "no device".to_string(),
                })
        }
    }

    fn fast_settings() -> ListenerSettings {
        ListenerSettings {
            reload_interval: Duration::from_secs(3600),
            reconnect_delay: Duration::from_millis(10),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn media_dir_with(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in files {
            std::fs::write(dir.path().join(file), b"media").unwrap();
        }
        dir
    }

    fn dispatcher(dir: &Path, map_path: &Path, pairs: &[(&str, &str)]) -> Arc<TagDispatcher> {
        let store = TagMapStore::with_map(map_path, TagMap::from_pairs(pairs.iter().copied()));
        Arc::new(TagDispatcher::new(
            Arc::new(store),
            Arc::new(SelectionState::new()),
            dir.to_path_buf(),
        ))
    }

    async fn wait_for<F>(mut condition: F)
    where
        F: FnMut() -> bool,
    {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_line_buffer_keeps_partial_fragment() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"04A").is_empty());
        assert_eq!(buffer.pending(), "04A");

        assert_eq!(buffer.push(b"B\r\nNO_T"), vec!["04AB", ""]);
        assert_eq!(buffer.pending(), "NO_T");

        assert_eq!(buffer.push(b"AG\rnext"), vec!["NO_TAG"]);
        assert_eq!(buffer.pending(), "next");
    }

    #[test]
    fn test_line_buffer_discards_oversized_fragment() {
        let mut buffer = LineBuffer::new();
        let noise = vec![b'x'; MAX_PENDING_BYTES + 1];
        assert!(buffer.push(&noise).is_empty());
        assert_eq!(buffer.pending(), "");
    }

    #[test]
    fn test_parse_lines() {
        assert_eq!(SerialLine::parse("   "), SerialLine::Empty);
        assert_eq!(SerialLine::parse(" no_tag "), SerialLine::NoTag);
        assert_eq!(SerialLine::parse("04ab\t"), SerialLine::Tag("04AB".to_string()));
    }

    #[tokio::test]
    async fn test_repeated_tag_is_debounced() {
        let dir = media_dir_with(&["cat.png"]);
        let dispatcher = dispatcher(dir.path(), &dir.path().join("map.json"), &[("04AB", "cat.png")]);
        let listener = SerialTagListener::new(
            Arc::new(ScriptedConnector::new(Vec::new())),
            dispatcher.clone(),
            fast_settings(),
        );

        listener.handle_line("04ab").await;
        listener.handle_line("04AB").await;

        assert_eq!(dispatcher.selection().update_count(), 1);
        assert_eq!(dispatcher.selection().get_selection().await.as_deref(), Some("cat.png"));
    }

    #[tokio::test]
    async fn test_repeated_no_tag_updates_once() {
        let dir = media_dir_with(&["cat.png", "idle.png"]);
        let dispatcher = dispatcher(
            dir.path(),
            &dir.path().join("map.json"),
            &[("04AB", "cat.png"), ("default", "idle.png")],
        );
        let listener = SerialTagListener::new(
            Arc::new(ScriptedConnector::new(Vec::new())),
            dispatcher.clone(),
            fast_settings(),
        );

        listener.handle_line("04AB").await;
        assert_eq!(dispatcher.selection().update_count(), 1);

        listener.handle_line("NO_TAG").await;
        listener.handle_line("NO_TAG").await;

        assert_eq!(dispatcher.selection().update_count(), 2);
        assert_eq!(dispatcher.selection().get_selection().await.as_deref(), Some("idle.png"));
        assert_eq!(dispatcher.selection().get_active_tag().await, None);

        // After removal the same tag is accepted again
        listener.handle_line("04AB").await;
        assert_eq!(dispatcher.selection().update_count(), 3);
    }

    #[tokio::test]
    async fn test_no_tag_without_default_clears_selection() {
        let dir = media_dir_with(&["cat.png"]);
        let dispatcher = dispatcher(dir.path(), &dir.path().join("map.json"), &[("04AB", "cat.png")]);
        let listener = SerialTagListener::new(
            Arc::new(ScriptedConnector::new(Vec::new())),
            dispatcher.clone(),
            fast_settings(),
        );

        listener.handle_line("04AB").await;
        assert_eq!(dispatcher.selection().get_selection().await.as_deref(), Some("cat.png"));

        listener.handle_line("NO_TAG").await;
        assert_eq!(dispatcher.selection().get_selection().await, None);
        assert_eq!(dispatcher.selection().get_active_tag().await, None);
        assert_eq!(dispatcher.selection().update_count(), 2);

        listener.handle_line("NO_TAG").await;
        assert_eq!(dispatcher.selection().update_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tag_recorded_but_selection_unchanged() {
        let dir = media_dir_with(&["cat.png"]);
        let dispatcher = dispatcher(dir.path(), &dir.path().join("map.json"), &[("04AB", "cat.png")]);
        let listener = SerialTagListener::new(
            Arc::new(ScriptedConnector::new(Vec::new())),
            dispatcher.clone(),
            fast_settings(),
        );

        listener.handle_line("04AB").await;
        listener.handle_line("DEADBEEF").await;

        assert_eq!(dispatcher.selection().get_selection().await.as_deref(), Some("cat.png"));
        assert_eq!(dispatcher.selection().get_active_tag().await.as_deref(), Some("DEADBEEF"));
        assert_eq!(dispatcher.selection().update_count(), 1);
    }

    #[tokio::test]
    async fn test_listener_reads_stream_and_reconnects() {
        let dir = media_dir_with(&["cat.png", "idle.png"]);
        let dispatcher = dispatcher(
            dir.path(),
            &dir.path().join("map.json"),
            &[("04AB", "cat.png"), ("default", "idle.png")],
        );

        let first: SerialReader = Box::new(
            tokio_test::io::Builder::new()
                .read(b"04AB\r\n04A")
                .read(b"B\n")
                .build(),
        );
        let second: SerialReader = Box::new(
            tokio_test::io::Builder::new()
                .read(b"NO_TAG\nNO_TAG\n")
                .build(),
        );
        let connector = Arc::new(ScriptedConnector::new(vec![first, second]));

        let handle = SerialTagListener::new(connector.clone(), dispatcher.clone(), fast_settings()).start();

        let selection = dispatcher.selection().clone();
        wait_for(|| selection.update_count() >= 2 && connector.attempts() >= 3).await;
        handle.stop().await;

        assert_eq!(selection.update_count(), 2);
        assert_eq!(selection.get_selection().await.as_deref(), Some("idle.png"));
    }

    #[tokio::test]
    async fn test_listener_reloads_map_periodically() {
        let dir = media_dir_with(&["old.png", "new.png"]);
        let map_path = dir.path().join("map.json");
        std::fs::write(&map_path, r#"{"04AB": "new.png"}"#).unwrap();
        let dispatcher = dispatcher(dir.path(), &map_path, &[("04AB", "old.png")]);

        let (mut writer, reader) = tokio::io::duplex(64);
        let reader: SerialReader = Box::new(reader);
        let connector = Arc::new(ScriptedConnector::new(vec![reader]));
        let settings = ListenerSettings {
            reload_interval: Duration::from_millis(20),
            ..fast_settings()
        };
        let handle = SerialTagListener::new(connector, dispatcher.clone(), settings).start();

        let store = dispatcher.tag_map().clone();
        timeout(Duration::from_secs(5), async {
            while store.snapshot().await.lookup("04AB") != Some("new.png") {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("map was not reloaded");

        writer.write_all(b"04AB\n").await.unwrap();
        let selection = dispatcher.selection().clone();
        wait_for(|| selection.update_count() >= 1).await;
        assert_eq!(selection.get_selection().await.as_deref(), Some("new.png"));

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_while_disconnected() {
        let dir = media_dir_with(&[]);
        let dispatcher = dispatcher(dir.path(), &dir.path().join("map.json"), &[]);
        let connector = Arc::new(ScriptedConnector::new(Vec::new()));

        let handle = SerialTagListener::new(connector.clone(), dispatcher, fast_settings()).start();
        wait_for(|| connector.attempts() >= 2).await;

        timeout(Duration::from_secs(5), handle.stop())
            .await
            .expect("listener did not stop");
    }
}
