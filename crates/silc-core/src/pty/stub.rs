//! No-op PTY used in tests and on platforms without PTY support.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use super::PtyBackend;

/// Test-side handle for driving a `StubPty`.
#[derive(Clone)]
pub struct StubHandle {
    feeder: mpsc::Sender<Bytes>,
    written: Arc<StdMutex<Vec<u8>>>,
}

impl StubHandle {
    /// Feed bytes that the session will observe as shell output.
    pub async fn feed(&self, bytes: &[u8]) {
        let _ = self.feeder.send(Bytes::copy_from_slice(bytes)).await;
    }

    /// Everything the session has written to the PTY so far.
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

pub struct StubPty {
    reader_rx: Mutex<mpsc::Receiver<Bytes>>,
    written: Arc<StdMutex<Vec<u8>>>,
    killed: AtomicBool,
}

impl StubPty {
    pub fn new() -> (Self, StubHandle) {
        let (feeder, reader_rx) = mpsc::channel(64);
        let written = Arc::new(StdMutex::new(Vec::new()));
        let stub = Self {
            reader_rx: Mutex::new(reader_rx),
            written: written.clone(),
            killed: AtomicBool::new(false),
        };
        (stub, StubHandle { feeder, written })
    }
}

#[async_trait]
impl PtyBackend for StubPty {
    async fn read(&self) -> Bytes {
        if self.killed.load(Ordering::SeqCst) {
            return Bytes::new();
        }
        let mut rx = self.reader_rx.lock().await;
        rx.recv().await.unwrap_or_else(Bytes::new)
    }

    async fn write(&self, data: &[u8]) {
        if let Ok(mut written) = self.written.lock() {
            written.extend_from_slice(data);
        }
    }

    fn resize(&self, _rows: u16, _cols: u16) {}

    async fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn send_sigterm(&self) {}

    fn send_sigkill(&self) {}
}
