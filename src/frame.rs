//! STOMP wire codec.
//!
//! Text frames, newline separated, NUL terminated on the wire:
//!
//! ```text
//! COMMAND
//! header-name:header-value
//! ...
//! <blank line>
//! body...\0
//! ```
//!
//! Header lines are split on the first colon and never escaped, so names
//! cannot contain `:` and values cannot contain `\n`.
//!
//! The `encode_*` functions build request frames without the terminator;
//! the transport appends it. [`Frame::decode`] parses one frame whose
//! terminator has already been stripped. [`FrameSplitter`] reassembles
//! terminated frames from a byte stream.

// Rust guideline compliant 2026-02

use std::collections::HashMap;

use anyhow::{bail, Result};

/// Byte that ends every frame on the wire.
pub const FRAME_TERMINATOR: u8 = b'\0';

/// Protocol version advertised in `accept-version`.
pub const PROTOCOL_VERSION: &str = "1.2";

/// Maximum size of a single frame (1 MB).
const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Command keywords used by this client.
pub mod command {
    /// Client → broker: open a session.
    pub const CONNECT: &str = "CONNECT";
    /// Broker → client: session accepted.
    pub const CONNECTED: &str = "CONNECTED";
    /// Client → broker: subscribe to a destination.
    pub const SUBSCRIBE: &str = "SUBSCRIBE";
    /// Client → broker: cancel a subscription.
    pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
    /// Client → broker: publish a body to a destination.
    pub const SEND: &str = "SEND";
    /// Client → broker: close the session.
    pub const DISCONNECT: &str = "DISCONNECT";
    /// Broker → client: a published body.
    pub const MESSAGE: &str = "MESSAGE";
    /// Broker → client: acknowledgment of a `receipt` header.
    pub const RECEIPT: &str = "RECEIPT";
    /// Broker → client: request failed.
    pub const ERROR: &str = "ERROR";
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// Command keyword from the first line.
    pub command: String,
    /// Header mapping. When a header repeats, the last occurrence wins.
    pub headers: HashMap<String, String>,
    /// Everything after the blank line that ends the header block.
    pub body: String,
}

impl Frame {
    /// Parse a frame whose terminator has been removed.
    ///
    /// Parsing happens in two phases: the header block (command line plus
    /// `key:value` lines up to the first blank line) and then the body.
    /// Header lines without a colon are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the text holds no command line.
    pub fn decode(text: &str) -> Result<Self> {
        let mut lines = Lines::new(text);

        let command = loop {
            match lines.next_line() {
                Some("") => continue, // EOLs between frames
                Some(line) => break line.to_string(),
                None => bail!("empty frame"),
            }
        };

        let mut headers = HashMap::new();
        while let Some(line) = lines.next_line() {
            if line.is_empty() {
                break;
            }
            match line.split_once(':') {
                Some((key, value)) => {
                    headers.insert(key.to_string(), value.to_string());
                }
                None => log::warn!("[frame] Malformed header in {command} frame: {line:?}"),
            }
        }

        Ok(Self {
            command,
            headers,
            body: lines.rest().to_string(),
        })
    }

    /// Look up a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Look up a header value, treating an empty value as absent.
    pub fn non_empty_header(&self, name: &str) -> Option<&str> {
        self.header(name).filter(|value| !value.is_empty())
    }
}

/// Line cursor that accepts both `\n` and `\r\n` endings and can hand back
/// the unread remainder verbatim.
struct Lines<'a> {
    rest: &'a str,
}

impl<'a> Lines<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }

    fn next_line(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }
        let (line, rest) = match self.rest.find('\n') {
            Some(idx) => (&self.rest[..idx], &self.rest[idx + 1..]),
            None => (self.rest, ""),
        };
        self.rest = rest;
        Some(line.strip_suffix('\r').unwrap_or(line))
    }

    fn rest(&self) -> &'a str {
        self.rest
    }
}

// ── Encoders ────────────────────────────────────────────────────────────────

/// Build a CONNECT frame.
pub fn encode_connect(host: &str, login: &str, passcode: &str) -> String {
    format!(
        "{}\naccept-version:{PROTOCOL_VERSION}\nhost:{host}\nlogin:{login}\npasscode:{passcode}\n\n",
        command::CONNECT
    )
}

/// Build a SUBSCRIBE frame.
pub fn encode_subscribe(destination: &str, subscription_id: u64, receipt_id: u64) -> String {
    format!(
        "{}\ndestination:{destination}\nid:{subscription_id}\nreceipt:{receipt_id}\n\n",
        command::SUBSCRIBE
    )
}

/// Build an UNSUBSCRIBE frame.
pub fn encode_unsubscribe(subscription_id: u64, receipt_id: u64) -> String {
    format!(
        "{}\nid:{subscription_id}\nreceipt:{receipt_id}\n\n",
        command::UNSUBSCRIBE
    )
}

/// Build a SEND frame.
///
/// If the body names its author with a `user:` line, the name is promoted
/// to a `user` header so the broker can stamp it on the MESSAGE it fans out.
pub fn encode_send(destination: &str, body: &str, receipt_id: u64) -> String {
    let mut frame = format!(
        "{}\ndestination:{destination}\nreceipt:{receipt_id}\n",
        command::SEND
    );
    if let Some(user) = body_user(body) {
        frame.push_str("user:");
        frame.push_str(user);
        frame.push('\n');
    }
    frame.push('\n');
    frame.push_str(body);
    frame.push('\n');
    frame
}

/// Build a DISCONNECT frame.
pub fn encode_disconnect(receipt_id: u64) -> String {
    format!("{}\nreceipt:{receipt_id}\n\n", command::DISCONNECT)
}

/// Extract the author from the first body line starting with `user:`.
///
/// The value ends at `;` or at the end of the line.
fn body_user(body: &str) -> Option<&str> {
    body.lines()
        .find_map(|line| line.strip_prefix("user:"))
        .map(|value| value.split(';').next().unwrap_or(value).trim())
        .filter(|value| !value.is_empty())
}

// ── Stream reassembly ───────────────────────────────────────────────────────

/// Incremental splitter for terminator-delimited frames.
///
/// Feed bytes via [`FrameSplitter::feed`] and collect complete frame texts.
/// Partial frames are buffered until their terminator arrives.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buf: Vec<u8>,
}

impl FrameSplitter {
    /// Create a splitter with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and extract all complete frames, terminator stripped.
    ///
    /// A frame that is not valid UTF-8 is dropped with a warning; the frames
    /// around it are still returned.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame grows past the size limit without a
    /// terminator.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(end) = self.buf.iter().position(|b| *b == FRAME_TERMINATOR) {
            let raw: Vec<u8> = self.buf.drain(..=end).take(end).collect();
            match String::from_utf8(raw) {
                Ok(text) => frames.push(text),
                Err(e) => log::warn!(
                    "[frame] Dropping {}-byte frame that is not valid UTF-8: {}",
                    e.as_bytes().len(),
                    e.utf8_error()
                ),
            }
        }

        if self.buf.len() > MAX_FRAME_SIZE {
            bail!(
                "Frame too large: {} bytes buffered without terminator (max {MAX_FRAME_SIZE})",
                self.buf.len()
            );
        }

        Ok(frames)
    }

    /// Returns true if the splitter holds an unterminated frame.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}
