//! Terminal attachments: a process on a PTY bridged to async channels.

use std::io::{Read, Write};

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::RelayError;
use crate::session::multiplexer;

/// Chunk size for PTY reads.
const READ_BUFFER_SIZE: usize = 8192;

/// Output chunks buffered between the reader thread and the relay.
const OUTPUT_QUEUE: usize = 256;

/// Input messages buffered between the relay and the writer thread.
const INPUT_QUEUE: usize = 256;

/// Terminal geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl From<TerminalSize> for PtySize {
    fn from(size: TerminalSize) -> Self {
        PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// Control side of a running attachment.
///
/// Implementations must kill the process when dropped.
#[async_trait]
pub trait AttachmentHandle: Send + Sync {
    /// Queue bytes for the process's stdin.
    async fn write(&self, data: Bytes) -> Result<(), RelayError>;

    fn resize(&self, size: TerminalSize) -> Result<(), RelayError>;

    fn kill(&self);
}

/// A running terminal process.
///
/// `output` ends when the process exits.
pub struct Attachment {
    pub output: mpsc::Receiver<Bytes>,
    pub handle: Box<dyn AttachmentHandle>,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment").finish_non_exhaustive()
    }
}

/// Opens terminal attachments to in-container sessions.
#[async_trait]
pub trait TerminalAttacher: Send + Sync {
    async fn attach(
        &self,
        container: &str,
        backing_session: &str,
        size: TerminalSize,
    ) -> Result<Attachment, RelayError>;
}

/// Attaches through `lxc exec -t <container> -- tmux attach-session` on a local PTY.
#[derive(Debug, Clone)]
pub struct PtyAttacher {
    binary: String,
    term: String,
}

impl PtyAttacher {
    pub fn new(binary: impl Into<String>, term: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            term: term.into(),
        }
    }

    fn command(&self, container: &str, backing_session: &str) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.binary);
        cmd.args(["exec", "-t", "--env"]);
        cmd.arg(format!("TERM={}", self.term));
        cmd.args([container, "--"]);
        cmd.args(multiplexer::attach_session(backing_session));
        cmd
    }
}

impl Default for PtyAttacher {
    fn default() -> Self {
        Self::new("lxc", "xterm-256color")
    }
}

#[async_trait]
impl TerminalAttacher for PtyAttacher {
    async fn attach(
        &self,
        container: &str,
        backing_session: &str,
        size: TerminalSize,
    ) -> Result<Attachment, RelayError> {
        let cmd = self.command(container, backing_session);
        let label = format!("{}/{}", container, backing_session);

        tokio::task::spawn_blocking(move || spawn_pty(cmd, size, label))
            .await
            .map_err(|e| RelayError::Attach(format!("spawn task failed: {}", e)))?
    }
}

fn spawn_pty(cmd: CommandBuilder, size: TerminalSize, label: String) -> Result<Attachment, RelayError> {
    let pair = native_pty_system()
        .openpty(size.into())
        .map_err(|e| RelayError::Attach(e.to_string()))?;

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| RelayError::Attach(e.to_string()))?;
    // Only the child keeps the slave open, so the reader sees EOF when it exits.
    drop(pair.slave);

    let killer = child.clone_killer();

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| RelayError::Attach(e.to_string()))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| RelayError::Attach(e.to_string()))?;

    let (output_tx, output_rx) = mpsc::channel(OUTPUT_QUEUE);
    let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);

    spawn_reader_thread(label.clone(), reader, output_tx, move || {
        match child.wait() {
            Ok(status) => debug!("Attachment process exited: {:?}", status),
            Err(e) => warn!("Failed to reap attachment process: {}", e),
        }
    });
    spawn_writer_thread(label.clone(), writer, input_rx);

    info!("[pty:{}] attached ({}x{})", label, size.cols, size.rows);

    Ok(Attachment {
        output: output_rx,
        handle: Box::new(PtyHandle {
            label,
            master: Mutex::new(pair.master),
            killer: Mutex::new(killer),
            input: input_tx,
        }),
    })
}

/// Reads PTY output until EOF, then reaps the child.
fn spawn_reader_thread<F>(
    label: String,
    mut reader: Box<dyn Read + Send>,
    output: mpsc::Sender<Bytes>,
    reap: F,
) where
    F: FnOnce() + Send + 'static,
{
    std::thread::spawn(move || {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if output.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                        debug!("[pty:{}] output receiver gone", label);
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // EIO is how Linux reports a closed PTY.
                    debug!("[pty:{}] read ended: {}", label, e);
                    break;
                }
            }
        }
        drop(output);
        reap();
        debug!("[pty:{}] reader thread finished", label);
    });
}

/// Drains queued input into the PTY on a dedicated thread.
fn spawn_writer_thread(
    label: String,
    mut writer: Box<dyn Write + Send>,
    mut input: mpsc::Receiver<Bytes>,
) {
    std::thread::spawn(move || {
        while let Some(data) = input.blocking_recv() {
            if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                error!("[pty:{}] write failed: {}", label, e);
                return;
            }
        }
        debug!("[pty:{}] writer thread finished", label);
    });
}

struct PtyHandle {
    label: String,
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    input: mpsc::Sender<Bytes>,
}

#[async_trait]
impl AttachmentHandle for PtyHandle {
    async fn write(&self, data: Bytes) -> Result<(), RelayError> {
        self.input
            .send(data)
            .await
            .map_err(|_| RelayError::Attach("terminal input closed".to_string()))
    }

    fn resize(&self, size: TerminalSize) -> Result<(), RelayError> {
        self.master
            .lock()
            .resize(size.into())
            .map_err(|e| RelayError::Attach(format!("resize failed: {}", e)))
    }

    fn kill(&self) {
        if let Err(e) = self.killer.lock().kill() {
            // Already exited.
            debug!("[pty:{}] kill: {}", self.label, e);
        }
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        self.kill();
    }
}
