//! Text encodings of IR codes, and sending a batch of them.
//!
//! A command string is either `b64:` followed by standard base64, or plain
//! hex (whitespace allowed between bytes).  Learned codes are printed in the
//! `b64:` form so they can be pasted straight back into `emit`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;
use tracing::{error, info};

use super::allone::AllOne;

/// Prefix marking a base64-encoded command.
pub const BASE64_PREFIX: &str = "b64:";

/// A command string that cannot be turned into IR code bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("command {0:?} is neither b64:-prefixed base64 nor hex")]
    UnknownEncoding(String),
    #[error("invalid base64 in command: {0}")]
    Base64(String),
    #[error("invalid hex in command: {0}")]
    Hex(String),
}

/// Decodes one command string into IR code bytes.
///
/// # Errors
///
/// See [`CommandError`].
pub fn decode_command(command: &str) -> Result<Vec<u8>, CommandError> {
    let command = command.trim();
    if command.is_empty() {
        return Err(CommandError::Empty);
    }

    if let Some(encoded) = command.strip_prefix(BASE64_PREFIX) {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CommandError::Base64(e.to_string()))?;
        return if bytes.is_empty() {
            Err(CommandError::Empty)
        } else {
            Ok(bytes)
        };
    }

    let compact: String = command.split_whitespace().collect();
    if !compact.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CommandError::UnknownEncoding(command.to_string()));
    }
    hex::decode(&compact).map_err(|e| CommandError::Hex(e.to_string()))
}

/// Renders code bytes in the `b64:` form accepted by [`decode_command`].
pub fn encode_command(code: &[u8]) -> String {
    format!("{BASE64_PREFIX}{}", STANDARD.encode(code))
}

/// Outcome of [`send_commands`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SendReport {
    /// Commands the device acknowledged.
    pub acknowledged: usize,
    /// Indices of commands that got no acknowledgement.
    pub unacknowledged: Vec<usize>,
}

impl SendReport {
    pub fn all_acknowledged(&self) -> bool {
        self.unacknowledged.is_empty()
    }
}

/// Decodes every command, then emits them in order.
///
/// Decoding happens up front, so a malformed command aborts the batch before
/// anything is sent.  A command that is not acknowledged is logged and the
/// batch carries on with the next one.
///
/// # Errors
///
/// The first [`CommandError`] met while decoding.
pub async fn send_commands<S: AsRef<str>>(
    device: &mut AllOne,
    commands: &[S],
) -> Result<SendReport, CommandError> {
    let codes = commands
        .iter()
        .map(|c| decode_command(c.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut report = SendReport::default();
    for (index, code) in codes.iter().enumerate() {
        match device.emit_ir(code, None, None).await {
            Ok(Some(ack)) => {
                info!(index, ack = %hex::encode(&ack), "command sent");
                report.acknowledged += 1;
            }
            Ok(None) => {
                error!(index, device = %device.session(), "command not acknowledged");
                report.unacknowledged.push(index);
            }
            Err(e) => {
                error!(index, "command rejected: {e}");
                report.unacknowledged.push(index);
            }
        }
    }
    Ok(report)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
