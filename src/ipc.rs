//! Wire format between the process backend and the render-process helper
//!
//! Newline-delimited JSON, one message per line, over the helper's stdin
//! (host → helper) and stdout (helper → host). Paint bitmaps travel base64
//! encoded.

use std::io::{BufRead, Write};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Error, ProcessMessage, Result, SessionSettings};

/// Host → helper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Create the page for `url` with a `width` x `height` view
    Navigate {
        url: String,
        width: u32,
        height: u32,
        settings: SessionSettings,
    },
    /// Repaint at the given size and send the bitmap back
    Paint { width: u32, height: u32 },
    /// Deliver a message to the page's script side
    Process { message: ProcessMessage },
    /// Tear the page down and exit
    Close,
}

/// Helper → host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HelperMessage {
    Created {
        browser_id: u64,
    },
    LoadEnd {
        http_status: i32,
    },
    LoadError {
        code: i32,
        text: String,
        failed_url: String,
    },
    /// Premultiplied BGRA, base64
    Paint {
        width: u32,
        height: u32,
        data: String,
    },
    Process {
        message: ProcessMessage,
    },
    Closed,
}

impl HelperMessage {
    pub fn paint(width: u32, height: u32, bitmap: &[u8]) -> Self {
        HelperMessage::Paint {
            width,
            height,
            data: STANDARD.encode(bitmap),
        }
    }
}

/// Decode a paint payload.
pub fn decode_bitmap(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data)
        .map_err(|e| Error::IpcError(format!("bad paint payload: {}", e)))
}

/// Write one message and flush.
pub fn write_message<W: Write, T: Serialize>(out: &mut W, message: &T) -> Result<()> {
    let line = serde_json::to_string(message)?;
    writeln!(out, "{}", line)?;
    out.flush()?;
    Ok(())
}

/// Read the next message; `None` at end of stream. Blank lines are skipped.
pub fn read_message<R: BufRead, T: DeserializeOwned>(input: &mut R) -> Result<Option<T>> {
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            return Ok(Some(serde_json::from_str(line.trim_end())?));
        }
    }
}
