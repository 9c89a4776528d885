//! Background stream tasks: one per (session, filename).
//!
//! Tasks are cancellable and self-healing: an error inside the loop is
//! logged, the task sleeps for its interval, and tries again. The engine
//! tolerates session closure; stopped sessions simply produce no new data.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::dedup::LineDeduplicator;
use crate::error::{Result, SilcError};
use crate::session::Session;

/// Lines of screen captured per render pass.
const RENDER_LINES: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Overwrite the file with the current rendered screen.
    Render,
    /// Append only novel lines, deduplicated.
    Append,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub mode: StreamMode,
    pub filename: String,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

fn default_interval() -> u64 {
    5
}

fn default_window_size() -> usize {
    2000
}

fn default_similarity_threshold() -> f64 {
    0.85
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub active: bool,
    pub mode: StreamMode,
}

struct StreamTask {
    handle: JoinHandle<()>,
    mode: StreamMode,
}

/// Owns the background stream tasks for one session.
pub struct StreamEngine {
    session: Arc<Session>,
    tasks: Mutex<HashMap<String, StreamTask>>,
}

impl StreamEngine {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Start a stream task. One task per filename; duplicates are rejected.
    pub async fn start_stream(&self, config: StreamConfig) -> Result<String> {
        let mut tasks = self.tasks.lock().await;

        if let Some(existing) = tasks.get(&config.filename) {
            if !existing.handle.is_finished() {
                return Err(SilcError::StreamExists(config.filename));
            }
            tasks.remove(&config.filename);
        }

        let session = Arc::clone(&self.session);
        let mode = config.mode;
        let filename = config.filename.clone();
        let handle = match mode {
            StreamMode::Render => tokio::spawn(render_loop(session, config)),
            StreamMode::Append => tokio::spawn(append_loop(session, config)),
        };

        tasks.insert(filename.clone(), StreamTask { handle, mode });
        debug!(filename = %filename, ?mode, "stream started");
        Ok(filename)
    }

    /// Stop a stream task and freeze its file.
    pub async fn stop_stream(&self, filename: &str) -> Result<()> {
        let task = self
            .tasks
            .lock()
            .await
            .remove(filename)
            .ok_or_else(|| SilcError::StreamNotFound(filename.to_string()))?;

        task.handle.abort();
        let _ = tokio::time::timeout(Duration::from_secs(1), task.handle).await;
        debug!(filename, "stream stopped");
        Ok(())
    }

    /// Status of all streams by filename.
    pub async fn status(&self) -> HashMap<String, StreamStatus> {
        let tasks = self.tasks.lock().await;
        tasks
            .iter()
            .map(|(filename, task)| {
                (
                    filename.clone(),
                    StreamStatus {
                        active: !task.handle.is_finished(),
                        mode: task.mode,
                    },
                )
            })
            .collect()
    }

    /// Cancel every stream task, used on session teardown.
    pub async fn stop_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (filename, task) in tasks.drain() {
            task.handle.abort();
            debug!(filename = %filename, "stream cancelled");
        }
    }
}

async fn render_loop(session: Arc<Session>, config: StreamConfig) {
    let interval = Duration::from_secs(config.interval.max(1));
    loop {
        if let Err(e) = render_once(&session, &config.filename).await {
            warn!(filename = %config.filename, "render stream error: {e}");
        }
        tokio::time::sleep(interval).await;
    }
}

/// Write the rendered screen atomically: temp file, then rename.
async fn render_once(session: &Session, filename: &str) -> std::io::Result<()> {
    let output = session.get_output(RENDER_LINES, false).await;
    let tmp = format!("{filename}.tmp");
    tokio::fs::write(&tmp, output.as_bytes()).await?;
    tokio::fs::rename(&tmp, filename).await?;
    Ok(())
}

async fn append_loop(session: Arc<Session>, config: StreamConfig) {
    let interval = Duration::from_secs(config.interval.max(1));
    let mut dedup = LineDeduplicator::new(config.window_size, config.similarity_threshold);
    loop {
        if let Err(e) = append_once(&session, &config, &mut dedup).await {
            warn!(filename = %config.filename, "append stream error: {e}");
        }
        tokio::time::sleep(interval).await;
    }
}

async fn append_once(
    session: &Session,
    config: &StreamConfig,
    dedup: &mut LineDeduplicator,
) -> std::io::Result<()> {
    let new_lines = session.buffer_last(config.window_size).await;
    let existing = read_file_tail(&config.filename, config.window_size).await;

    let novel = dedup.compute_diff(&existing, &new_lines);
    if novel.is_empty() {
        return Ok(());
    }

    let mut payload = novel.join("\n");
    payload.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.filename)
        .await?;
    file.write_all(payload.as_bytes()).await?;
    Ok(())
}

async fn read_file_tail(filename: &str, max_lines: usize) -> Vec<String> {
    match tokio::fs::read_to_string(filename).await {
        Ok(content) => {
            let lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();
            let skip = lines.len().saturating_sub(max_lines);
            lines.into_iter().skip(skip).collect()
        }
        Err(_) => Vec::new(),
    }
}
