//! Shipped render backend: a helper render process driven over pipes
//!
//! [`ProcessBackend`] starts the configured subprocess with
//! `--render-process` when the browser is created and speaks the
//! newline-delimited JSON protocol of [`crate::ipc`] with it. A reader thread
//! turns helper messages into [`SessionEvent`]s; end of the helper's output
//! is reported as `BeforeClose`.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use crate::ipc::{self, HelperMessage, HostMessage};
use crate::{
    Error, EventSink, FilterConfig, ProcessMessage, RenderBackend, Result, SessionEvent,
    SessionSettings, Viewport,
};

/// Environment variable naming the engine runtime directory
pub const RUNTIME_ROOT_ENV: &str = "WEBFILTER_RUNTIME_ROOT";

/// Argument the helper binary expects in render-process mode
pub const RENDER_PROCESS_ARG: &str = "--render-process";

/// Check the engine runtime. An explicitly configured root must be an
/// existing directory; without one the runtime is linked in.
pub fn load_runtime(root: Option<&Path>) -> Result<()> {
    match root {
        None => Ok(()),
        Some(dir) if dir.is_dir() => {
            debug!("engine runtime at {}", dir.display());
            Ok(())
        }
        Some(dir) => Err(Error::RuntimeLoadError(format!(
            "runtime root {} is not a directory",
            dir.display()
        ))),
    }
}

struct HelperProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
}

/// Render backend running pages in a helper subprocess
pub struct ProcessBackend {
    executable: PathBuf,
    sink: EventSink,
    helper: Option<HelperProcess>,
}

impl ProcessBackend {
    /// Factory for [`crate::FrameFilter::init`]: checks the runtime and
    /// remembers the helper executable. The helper starts on `create_browser`.
    pub fn new(config: &FilterConfig, sink: EventSink) -> Result<Self> {
        let root = std::env::var_os(RUNTIME_ROOT_ENV).map(PathBuf::from);
        load_runtime(root.as_deref())?;
        Ok(Self {
            executable: config.subprocess.clone(),
            sink,
            helper: None,
        })
    }

    fn send(&mut self, message: &HostMessage) -> Result<()> {
        let stdin = self
            .helper
            .as_mut()
            .and_then(|h| h.stdin.as_mut())
            .ok_or_else(|| Error::Closed("render process is not running".into()))?;
        ipc::write_message(stdin, message)
    }

    fn spawn(&self) -> Result<HelperProcess> {
        let mut child = Command::new(&self.executable)
            .arg(RENDER_PROCESS_ARG)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                Error::LoadError(format!(
                    "failed to start render process {}: {}",
                    self.executable.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::IpcError("render process has no stdout".into()))?;

        let sink = self.sink.clone();
        let reader = thread::Builder::new()
            .name("webfilter-helper-reader".into())
            .spawn(move || read_events(BufReader::new(stdout), sink))
            .map_err(|e| Error::IpcError(format!("spawning reader thread: {}", e)))?;

        info!("render process {} started", child.id());
        Ok(HelperProcess {
            child,
            stdin,
            reader: Some(reader),
        })
    }
}

/// Forward helper output to the engine loop until the helper goes away.
fn read_events<R: std::io::BufRead>(mut input: R, sink: EventSink) {
    loop {
        let message = match ipc::read_message::<_, HelperMessage>(&mut input) {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) => {
                warn!("render process: {}", e);
                break;
            }
        };
        let event = match message {
            HelperMessage::Created { browser_id } => SessionEvent::AfterCreated { browser_id },
            HelperMessage::LoadEnd { http_status } => SessionEvent::LoadEnd { http_status },
            HelperMessage::LoadError {
                code,
                text,
                failed_url,
            } => SessionEvent::LoadError {
                code,
                text,
                failed_url,
            },
            HelperMessage::Paint {
                width,
                height,
                data,
            } => match ipc::decode_bitmap(&data) {
                Ok(bitmap) => SessionEvent::Paint {
                    width,
                    height,
                    bitmap,
                },
                Err(e) => {
                    warn!("dropping paint: {}", e);
                    continue;
                }
            },
            HelperMessage::Process { message } => SessionEvent::MessageReceived(message),
            HelperMessage::Closed => break,
        };
        if !sink.post(event) {
            return;
        }
    }
    sink.post(SessionEvent::BeforeClose);
}

impl RenderBackend for ProcessBackend {
    fn create_browser(
        &mut self,
        url: &str,
        view: Viewport,
        settings: &SessionSettings,
    ) -> Result<()> {
        if self.helper.is_none() {
            self.helper = Some(self.spawn()?);
        }
        self.send(&HostMessage::Navigate {
            url: url.to_string(),
            width: view.width,
            height: view.height,
            settings: settings.clone(),
        })
    }

    fn invalidate(&mut self, view: Viewport) -> Result<()> {
        self.send(&HostMessage::Paint {
            width: view.width,
            height: view.height,
        })
    }

    fn send_process_message(&mut self, message: ProcessMessage) -> Result<()> {
        self.send(&HostMessage::Process { message })
    }

    fn close_browser(&mut self) -> Result<()> {
        self.send(&HostMessage::Close)
    }

    fn shutdown(&mut self) {
        let Some(mut helper) = self.helper.take() else {
            return;
        };
        // Closing stdin ends the helper's input loop
        drop(helper.stdin.take());
        match helper.child.wait() {
            Ok(status) => debug!("render process exited: {}", status),
            Err(e) => {
                warn!("waiting for render process: {}", e);
                let _ = helper.child.kill();
                let _ = helper.child.wait();
            }
        }
        if let Some(reader) = helper.reader.take() {
            if reader.join().is_err() {
                warn!("render process reader panicked");
            }
        }
    }
}

impl Drop for ProcessBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
