//! Client to server relay envelopes.

use serde::Deserialize;

use super::attach::TerminalSize;

/// Largest accepted terminal dimension.
pub const MAX_DIMENSION: i64 = 65535;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientEnvelope {
    Input { data: String },
    Resize { cols: i64, rows: i64 },
}

/// A validated client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCommand {
    /// Bytes for the terminal's stdin.
    Input(String),
    Resize(TerminalSize),
}

/// Decode one client frame. Anything malformed or out of range yields `None`.
pub fn parse_envelope(frame: &[u8]) -> Option<RelayCommand> {
    match serde_json::from_slice::<ClientEnvelope>(frame).ok()? {
        ClientEnvelope::Input { data } => Some(RelayCommand::Input(data)),
        ClientEnvelope::Resize { cols, rows } => {
            let valid = 1..=MAX_DIMENSION;
            if !valid.contains(&cols) || !valid.contains(&rows) {
                return None;
            }
            Some(RelayCommand::Resize(TerminalSize {
                cols: u16::try_from(cols).ok()?,
                rows: u16::try_from(rows).ok()?,
            }))
        }
    }
}
