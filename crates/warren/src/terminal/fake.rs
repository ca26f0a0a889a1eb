//! In-memory terminal attacher for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Attachment, AttachmentHandle, RelayError, TerminalAttacher, TerminalSize};

/// Observable state of one fake attachment.
#[derive(Debug)]
pub struct FakeTerminal {
    pub container: String,
    pub backing_session: String,
    pub initial_size: TerminalSize,
    writes: Mutex<Vec<Bytes>>,
    resizes: Mutex<Vec<TerminalSize>>,
    killed: AtomicBool,
    output: Mutex<Option<mpsc::Sender<Bytes>>>,
    echo: bool,
    stalled: bool,
}

impl FakeTerminal {
    /// Everything written to stdin so far, concatenated.
    pub fn input(&self) -> String {
        let writes = self.writes.lock();
        writes
            .iter()
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect()
    }

    pub fn resizes(&self) -> Vec<TerminalSize> {
        self.resizes.lock().clone()
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Emit terminal output. Returns false once the process has ended.
    pub async fn emit(&self, data: &str) -> bool {
        let sender = self.output.lock().clone();
        match sender {
            Some(tx) => tx.send(Bytes::copy_from_slice(data.as_bytes())).await.is_ok(),
            None => false,
        }
    }

    /// Simulate the process exiting on its own.
    pub fn exit(&self) {
        self.output.lock().take();
    }

    fn terminate(&self) {
        self.killed.store(true, Ordering::SeqCst);
        self.output.lock().take();
    }
}

struct FakeHandle(Arc<FakeTerminal>);

#[async_trait]
impl AttachmentHandle for FakeHandle {
    async fn write(&self, data: Bytes) -> Result<(), RelayError> {
        if self.0.is_killed() {
            return Err(RelayError::Attach("terminal input closed".to_string()));
        }
        if self.0.stalled {
            // A process that never reads stdin.
            std::future::pending::<()>().await;
        }
        self.0.writes.lock().push(data.clone());
        if self.0.echo {
            let sender = self.0.output.lock().clone();
            if let Some(tx) = sender {
                let _ = tx.send(data).await;
            }
        }
        Ok(())
    }

    fn resize(&self, size: TerminalSize) -> Result<(), RelayError> {
        self.0.resizes.lock().push(size);
        Ok(())
    }

    fn kill(&self) {
        self.0.terminate();
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.0.terminate();
    }
}

/// Records every attachment it opens; optionally echoes input back as output.
#[derive(Debug, Default)]
pub struct FakeAttacher {
    terminals: Mutex<Vec<Arc<FakeTerminal>>>,
    echo: bool,
    stalled: bool,
    fail: AtomicBool,
}

impl FakeAttacher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    /// Attachments whose input writes never complete.
    pub fn stalled() -> Self {
        Self {
            stalled: true,
            ..Self::default()
        }
    }

    pub fn fail_attach(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn terminals(&self) -> Vec<Arc<FakeTerminal>> {
        self.terminals.lock().clone()
    }

    /// Wait until at least `count` attachments have been opened.
    pub async fn wait_for(&self, count: usize) -> Vec<Arc<FakeTerminal>> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let terminals = self.terminals();
            if terminals.len() >= count || tokio::time::Instant::now() >= deadline {
                return terminals;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl TerminalAttacher for FakeAttacher {
    async fn attach(
        &self,
        container: &str,
        backing_session: &str,
        size: TerminalSize,
    ) -> Result<Attachment, RelayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::Attach("scripted attach failure".to_string()));
        }

        let (tx, rx) = mpsc::channel(64);
        let terminal = Arc::new(FakeTerminal {
            container: container.to_string(),
            backing_session: backing_session.to_string(),
            initial_size: size,
            writes: Mutex::new(Vec::new()),
            resizes: Mutex::new(Vec::new()),
            killed: AtomicBool::new(false),
            output: Mutex::new(Some(tx)),
            echo: self.echo,
            stalled: self.stalled,
        });
        self.terminals.lock().push(terminal.clone());

        Ok(Attachment {
            output: rx,
            handle: Box::new(FakeHandle(terminal)),
        })
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
