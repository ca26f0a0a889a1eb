//! Terminal relay.
//!
//! Bridges a client WebSocket to a PTY attached to an in-container tmux
//! session. Client frames carry JSON envelopes (`input`, `resize`); terminal
//! output goes back as raw binary frames.

mod attach;
mod error;
pub mod fake;
pub mod protocol;
pub mod relay;

pub use attach::{Attachment, AttachmentHandle, PtyAttacher, TerminalAttacher, TerminalSize};
pub use error::RelayError;
pub use fake::FakeAttacher;
pub use relay::{InboundFrame, RelayEnd, bridge};
