//! Bidirectional bridge between a client channel and a terminal attachment.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, trace, warn};

use super::protocol::{RelayCommand, parse_envelope};
use super::{Attachment, RelayError};

/// Input held while the terminal is not consuming stdin. Frames beyond it are dropped.
pub const MAX_PENDING_INPUT: usize = 1024 * 1024;

/// A frame received from the client, transport details stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Bytes),
    Close,
}

/// Which side ended the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The client closed, errored, or could no longer be written to.
    ChannelClosed,
    /// The terminal process exited.
    AttachmentExited,
}

/// Pump bytes between `inbound`/`outbound` and `attachment` until either ends.
///
/// Terminal output is forwarded verbatim. Client frames must be JSON envelopes;
/// anything else is ignored without closing the channel. When the client goes
/// away the attachment is killed; when the process exits the sink is closed.
///
/// Input is written to the terminal concurrently with draining its output, so a
/// process that stops reading stdin never stalls output or hides a client close.
pub async fn bridge<I, O>(mut inbound: I, mut outbound: O, attachment: Attachment) -> RelayEnd
where
    I: Stream<Item = InboundFrame> + Unpin,
    O: Sink<Bytes> + Unpin,
    O::Error: std::fmt::Display,
{
    let Attachment {
        mut output,
        handle,
    } = attachment;

    let mut pending: VecDeque<Bytes> = VecDeque::new();
    let mut pending_bytes = 0usize;
    let mut writing: Option<BoxFuture<'_, Result<(), RelayError>>> = None;

    let end = loop {
        if writing.is_none() {
            writing = pending.pop_front().map(|data| {
                pending_bytes -= data.len();
                handle.write(data)
            });
        }

        tokio::select! {
            written = async {
                match writing.as_mut() {
                    Some(write) => write.await,
                    None => std::future::pending().await,
                }
            }, if writing.is_some() => {
                writing = None;
                if let Err(e) = written {
                    debug!("Dropping input: {}", e);
                }
            }
            frame = inbound.next() => {
                let payload = match frame {
                    None | Some(InboundFrame::Close) => break RelayEnd::ChannelClosed,
                    Some(InboundFrame::Text(text)) => Bytes::from(text),
                    Some(InboundFrame::Binary(data)) => data,
                };

                match parse_envelope(&payload) {
                    Some(RelayCommand::Input(data)) => {
                        let data = Bytes::from(data);
                        if pending_bytes + data.len() > MAX_PENDING_INPUT {
                            warn!("Terminal is not reading input, dropping {} bytes", data.len());
                        } else {
                            pending_bytes += data.len();
                            pending.push_back(data);
                        }
                    }
                    Some(RelayCommand::Resize(size)) => {
                        if let Err(e) = handle.resize(size) {
                            warn!("{}", e);
                        }
                    }
                    None => trace!("Ignoring malformed relay frame ({} bytes)", payload.len()),
                }
            }
            chunk = output.recv() => {
                match chunk {
                    Some(data) => {
                        if let Err(e) = outbound.send(data).await {
                            debug!("Client channel send failed: {}", e);
                            break RelayEnd::ChannelClosed;
                        }
                    }
                    None => {
                        let _ = outbound.close().await;
                        break RelayEnd::AttachmentExited;
                    }
                }
            }
        }
    };

    drop(writing);
    if end == RelayEnd::ChannelClosed {
        handle.kill();
    }
    end
}
