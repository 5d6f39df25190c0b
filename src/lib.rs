//! webfilter
//!
//! A per-frame video filter that drives an asynchronous, offscreen web
//! rendering engine and composites the rendered page over every frame the
//! caller submits, synchronously.
//!
//! # Features
//!
//! - **Synchronous frame protocol**: one `submit_frame` call performs a tick
//!   round trip with the page's animation callbacks and, when any ran, waits
//!   for the repaint and composites it into the caller's buffer
//! - **Pixel-exact compositing**: premultiplied BGRA over straight RGBA/BGRA
//!   in 16-bit working precision (see [`composite`])
//! - **Swappable engines**: the engine sits behind [`RenderBackend`]; the
//!   `builtin` feature (default) ships a render-process backend scripted with
//!   Boa
//! - **C ABI**: `filter_init` / `filter_frame` / `filter_uninit` (see [`ffi`])
//!
//! # Example
//!
//! ```no_run
//! use webfilter::{FrameFilter, PixelFormat};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut filter = FrameFilter::builtin(
//!     "url=file:///srv/overlay.html;subprocess=/usr/lib/webfilter-helper",
//!     PixelFormat::Rgba,
//! )?;
//!
//! let (width, height) = (1280, 720);
//! let mut frame = vec![0u8; width * height * 4];
//! filter.submit_frame(&mut frame, width as i32, height as i32, (width * 4) as i32, 0.0)?;
//! filter.shutdown();
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod bridge;
pub mod client;
pub mod composite;
pub mod signal;
pub mod tick;

// Async-friendly facade over a filter session (worker-thread backed)
pub mod async_api;

// Shipped engine: render-process backend, its wire format and the process side
#[cfg(feature = "builtin")]
pub mod builtin;
#[cfg(feature = "builtin")]
pub mod helper;
#[cfg(feature = "builtin")]
pub mod ipc;
#[cfg(feature = "builtin")]
pub mod rendering;
#[cfg(feature = "builtin")]
pub mod script;

// C ABI entry points
#[cfg(feature = "builtin")]
pub mod ffi;

pub use bridge::{FrameFilter, LOAD_TIMEOUT};
pub use client::RenderClient;

/// Channel order of the caller's 32-bit packed pixels
///
/// Green always sits at byte offset 1 and alpha at offset 3; the two formats
/// differ only in where red and blue live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba,
    Bgra,
}

impl PixelFormat {
    /// Byte offset of the red channel within a pixel
    pub fn red_offset(self) -> usize {
        match self {
            PixelFormat::Rgba => 0,
            PixelFormat::Bgra => 2,
        }
    }

    /// Byte offset of the blue channel within a pixel
    pub fn blue_offset(self) -> usize {
        2 - self.red_offset()
    }
}

impl TryFrom<i32> for PixelFormat {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(PixelFormat::Rgba),
            1 => Ok(PixelFormat::Bgra),
            other => Err(Error::ConfigError(format!("unknown pixel format {}", other))),
        }
    }
}

/// Offscreen view dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Size in bytes of a tightly packed 32-bit bitmap of this view
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Settings handed to the engine when the offscreen browser is created
///
/// The defaults describe a transparent page with conservative script limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Page background as `0xAARRGGBB`; fully transparent by default
    pub background_color: u32,
    /// Maximum loop iterations before a page script is aborted (0 => disabled)
    pub script_loop_iteration_limit: u64,
    /// Maximum script recursion depth (usize::MAX => disabled)
    pub script_recursion_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            background_color: 0x0000_0000,
            script_loop_iteration_limit: 1_000_000,
            script_recursion_limit: 1024,
        }
    }
}

/// Parsed filter config string: `url=<url>;subprocess=<path>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    /// Normalized page URL (`http`, `https` or `file` scheme)
    pub url: String,
    /// Render-process executable handed to the engine
    pub subprocess: PathBuf,
}

impl FilterConfig {
    /// Parse a config string.
    ///
    /// The grammar is fixed: exactly `url=<nonempty>;subprocess=<nonempty>`,
    /// no escaping. A URL without an `http://`, `https://` or `file://` prefix
    /// is taken as a filesystem path and turned into a `file://` URL.
    ///
    /// # Examples
    ///
    /// ```
    /// let cfg = webfilter::FilterConfig::parse("url=file:///t.html;subprocess=/bin/helper").unwrap();
    /// assert_eq!(cfg.url, "file:///t.html");
    /// assert_eq!(cfg.subprocess, std::path::PathBuf::from("/bin/helper"));
    /// ```
    pub fn parse(config: &str) -> Result<Self> {
        let re = regex::Regex::new(r"^url=(.+);subprocess=(.+)$")
            .map_err(|e| Error::ConfigError(format!("config grammar: {}", e)))?;
        let caps = re.captures(config).ok_or_else(|| {
            Error::ConfigError(format!(
                "expected url=<url>;subprocess=<path>, got {:?}",
                config
            ))
        })?;

        Ok(Self {
            url: normalize_url(&caps[1])?,
            subprocess: PathBuf::from(&caps[2]),
        })
    }
}

fn normalize_url(raw: &str) -> Result<String> {
    const SCHEMES: [&str; 3] = ["http://", "https://", "file://"];

    if SCHEMES.iter().any(|scheme| raw.starts_with(scheme)) {
        let url = url::Url::parse(raw)
            .map_err(|e| Error::ConfigError(format!("invalid url {:?}: {}", raw, e)))?;
        return Ok(url.to_string());
    }

    let path = Path::new(raw);
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| Error::ConfigError(format!("resolving {:?}: {}", raw, e)))?
            .join(path)
    };
    url::Url::from_file_path(&path)
        .map(|u| u.to_string())
        .map_err(|_| Error::ConfigError(format!("not a usable file path: {:?}", raw)))
}

/// One argument of a cross-process message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageValue {
    Bool(bool),
    Double(f64),
    String(String),
}

/// A named message with positional arguments, exchanged between the
/// controller and the script execution side of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMessage {
    pub name: String,
    pub args: Vec<MessageValue>,
}

impl ProcessMessage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, value: MessageValue) -> Self {
        self.args.push(value);
        self
    }

    pub fn bool_arg(&self, index: usize) -> Option<bool> {
        match self.args.get(index) {
            Some(MessageValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn double_arg(&self, index: usize) -> Option<f64> {
        match self.args.get(index) {
            Some(MessageValue::Double(d)) => Some(*d),
            _ => None,
        }
    }
}

/// Callback-style notifications an engine delivers for its browser
///
/// Backends post these through an [`EventSink`]; they are dispatched to the
/// session's [`RenderClient`] on the engine-loop thread, in posting order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The browser exists; `browser_id` identifies it for the session
    AfterCreated { browser_id: u64 },
    /// Main frame finished loading
    LoadEnd { http_status: i32 },
    /// Main frame failed to load
    LoadError {
        code: i32,
        text: String,
        failed_url: String,
    },
    /// A repaint of the view: tightly packed, premultiplied BGRA
    Paint {
        width: u32,
        height: u32,
        bitmap: Vec<u8>,
    },
    /// A message from the script execution side
    MessageReceived(ProcessMessage),
    /// The browser is gone; nothing more will be delivered for it
    BeforeClose,
}

/// Handle through which a backend delivers [`SessionEvent`]s to the engine
/// loop. Cheap to clone and usable from any thread.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<bridge::LoopMessage>,
}

impl EventSink {
    pub(crate) fn new(tx: Sender<bridge::LoopMessage>) -> Self {
        Self { tx }
    }

    /// Queue an event for the engine loop. Returns `false` once the loop has
    /// exited and the event was dropped.
    pub fn post(&self, event: SessionEvent) -> bool {
        self.tx.send(bridge::LoopMessage::Event(event)).is_ok()
    }
}

/// The rendering engine, seen from the engine-loop thread
///
/// A backend is constructed on the engine-loop thread and only ever touched
/// from there. Requests return once issued; their outcomes arrive later as
/// [`SessionEvent`]s through the [`EventSink`] the backend was built with.
/// An `Err` return means the request was never issued.
pub trait RenderBackend {
    /// Create the offscreen browser for `url` at `view` size. Delivers
    /// `AfterCreated` followed by `LoadEnd` or `LoadError`.
    fn create_browser(&mut self, url: &str, view: Viewport, settings: &SessionSettings)
        -> Result<()>;

    /// Request a repaint at `view` size. Delivers `Paint`.
    fn invalidate(&mut self, view: Viewport) -> Result<()>;

    /// Send a message to the script execution side of the browser
    fn send_process_message(&mut self, message: ProcessMessage) -> Result<()>;

    /// Close the browser. Delivers `BeforeClose`.
    fn close_browser(&mut self) -> Result<()>;

    /// Release engine resources; called once as the engine loop exits
    fn shutdown(&mut self) {}
}
