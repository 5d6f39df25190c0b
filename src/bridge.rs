//! Frame synchronization bridge
//!
//! [`FrameFilter`] is the top-level session object. It owns the engine-loop
//! thread ([`EngineLoop`]), creates the browser lazily on the first frame, and
//! turns each frame into a strictly synchronous sequence: tick round trip,
//! then (only if the page had animation work) repaint and composite.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::client::{DestinationBuffer, PaintSlot};
use crate::signal::{self, Signal};
use crate::{
    Error, EventSink, FilterConfig, PixelFormat, RenderBackend, RenderClient, Result,
    SessionEvent, SessionSettings, Viewport,
};

/// How long the first frame waits for the page to load
pub const LOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the engine-loop thread consumes, in arrival order
pub(crate) enum LoopMessage {
    Task(Task),
    Event(SessionEvent),
    Quit,
}

/// Requests from the caller's thread
pub(crate) enum Task {
    CreateBrowser {
        url: String,
        view: Viewport,
        settings: SessionSettings,
        loaded: Signal<bool>,
    },
    Resize(Viewport),
    Tick {
        timestamp_ms: f64,
        response: Signal<bool>,
    },
    Paint(PaintSlot),
    CloseBrowser,
}

/// The dedicated engine-loop thread of one session
///
/// `start` blocks until the backend is up; `request_stop` asks the loop to
/// exit after the messages already queued; `join` waits for it. Dropping an
/// `EngineLoop` stops and joins it.
pub struct EngineLoop {
    tx: Sender<LoopMessage>,
    handle: Option<JoinHandle<()>>,
}

impl EngineLoop {
    /// Spawn the loop thread, build the backend on it, and wait until it is
    /// ready to take requests.
    pub fn start<B, F>(config: FilterConfig, format: PixelFormat, factory: F) -> Result<Self>
    where
        B: RenderBackend + 'static,
        F: FnOnce(&FilterConfig, EventSink) -> Result<B> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<LoopMessage>();
        let sink = EventSink::new(tx.clone());
        let (ready, ready_waiter) = signal::signal::<Result<()>>();

        let handle = thread::Builder::new()
            .name("webfilter-engine".into())
            .spawn(move || {
                // Initialize the backend on the loop thread
                let backend = match factory(&config, sink) {
                    Ok(b) => b,
                    Err(err) => {
                        ready.fire(Err(err));
                        return;
                    }
                };
                ready.fire(Ok(()));
                run(backend, RenderClient::new(format), rx);
            })
            .map_err(|e| Error::RuntimeLoadError(format!("spawning engine loop: {}", e)))?;

        let mut engine = Self {
            tx,
            handle: Some(handle),
        };
        match ready_waiter.wait("engine start") {
            Ok(Ok(())) => Ok(engine),
            Ok(Err(e)) => {
                engine.join();
                Err(match e {
                    e @ Error::RuntimeLoadError(_) => e,
                    other => Error::RuntimeLoadError(other.to_string()),
                })
            }
            Err(e) => {
                engine.join();
                Err(Error::RuntimeLoadError(e.to_string()))
            }
        }
    }

    fn post(&self, task: Task) -> Result<()> {
        self.tx
            .send(LoopMessage::Task(task))
            .map_err(|_| Error::Closed("engine loop has exited".into()))
    }

    /// Ask the loop to exit once it has drained what is already queued.
    pub fn request_stop(&self) {
        let _ = self.tx.send(LoopMessage::Quit);
    }

    /// Wait for the loop thread to exit. Idempotent.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("engine loop thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for EngineLoop {
    fn drop(&mut self) {
        if self.is_running() {
            self.request_stop();
            self.join();
        }
    }
}

fn run<B: RenderBackend>(mut backend: B, mut client: RenderClient, rx: Receiver<LoopMessage>) {
    debug!("engine loop running");
    while let Ok(message) = rx.recv() {
        match message {
            LoopMessage::Event(event) => client.dispatch(event),
            LoopMessage::Task(task) => handle_task(&mut backend, &mut client, task),
            LoopMessage::Quit => break,
        }
    }
    backend.shutdown();
    debug!("engine loop exited");
}

fn handle_task<B: RenderBackend>(backend: &mut B, client: &mut RenderClient, task: Task) {
    match task {
        Task::CreateBrowser {
            url,
            view,
            settings,
            loaded,
        } => {
            client.update_view(view);
            client.begin_load(loaded);
            if let Err(e) = backend.create_browser(&url, view, &settings) {
                client.on_load_error(-1, &e.to_string(), &url);
            }
        }
        Task::Resize(view) => client.update_view(view),
        Task::Tick {
            timestamp_ms,
            response,
        } => client.send_tick(backend, timestamp_ms, response),
        Task::Paint(slot) => client.request_paint(backend, slot),
        Task::CloseBrowser => client.close(backend),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Loop running, no browser yet
    Ready,
    /// Browser created and loaded
    Active,
    /// Shut down, or failed fatally
    Closed,
}

/// A filter session: one page, one pixel format, one engine loop
pub struct FrameFilter {
    config: FilterConfig,
    format: PixelFormat,
    settings: SessionSettings,
    engine: EngineLoop,
    state: SessionState,
    view: Viewport,
}

impl FrameFilter {
    /// Parse `config` (`url=<url>;subprocess=<path>`) and start a session
    /// whose backend is built by `factory` on the engine-loop thread.
    pub fn init<B, F>(config: &str, format: PixelFormat, factory: F) -> Result<Self>
    where
        B: RenderBackend + 'static,
        F: FnOnce(&FilterConfig, EventSink) -> Result<B> + Send + 'static,
    {
        let config = FilterConfig::parse(config)?;
        Self::with_config(config, format, SessionSettings::default(), factory)
    }

    /// Start a session from an already parsed config.
    pub fn with_config<B, F>(
        config: FilterConfig,
        format: PixelFormat,
        settings: SessionSettings,
        factory: F,
    ) -> Result<Self>
    where
        B: RenderBackend + 'static,
        F: FnOnce(&FilterConfig, EventSink) -> Result<B> + Send + 'static,
    {
        info!(
            "starting filter session: url = {}, subprocess = {}",
            config.url,
            config.subprocess.display()
        );
        let engine = EngineLoop::start(config.clone(), format, factory)?;
        Ok(Self {
            config,
            format,
            settings,
            engine,
            state: SessionState::Ready,
            view: Viewport { width: 0, height: 0 },
        })
    }

    /// Start a session backed by the shipped render-process engine.
    #[cfg(feature = "builtin")]
    pub fn builtin(config: &str, format: PixelFormat) -> Result<Self> {
        Self::init(config, format, crate::builtin::ProcessBackend::new)
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    /// `false` once the session was shut down or failed fatally
    pub fn is_usable(&self) -> bool {
        self.state != SessionState::Closed
    }

    /// Composite the page over one frame.
    ///
    /// `buffer` holds `height` rows of `stride` bytes in the session's pixel
    /// format, and `stride` must equal `width * 4`. Frames with a
    /// non-positive dimension are ignored. The buffer is left untouched
    /// unless the page ran animation work for this timestamp.
    ///
    /// Geometry and load failures are fatal: the session is closed and every
    /// later call fails with [`Error::Closed`].
    pub fn submit_frame(
        &mut self,
        buffer: &mut [u8],
        width: i32,
        height: i32,
        stride: i32,
        timestamp_ms: f64,
    ) -> Result<()> {
        if width <= 0 || height <= 0 {
            return Ok(());
        }
        if self.state == SessionState::Closed {
            return Err(Error::Closed("session is no longer usable".into()));
        }

        let view = match check_geometry(buffer.len(), width, height, stride) {
            Ok(view) => view,
            Err(e) => {
                error!("{}", e);
                self.abort();
                return Err(e);
            }
        };

        match self.state {
            SessionState::Ready => {
                if let Err(e) = self.create_browser(view) {
                    error!("could not create browser for {}: {}", self.config.url, e);
                    self.abort();
                    return Err(e);
                }
            }
            SessionState::Active if view != self.view => {
                debug!("view resized to {}x{}", view.width, view.height);
                self.view = view;
                self.engine.post(Task::Resize(view))?;
            }
            _ => {}
        }

        if !self.tick(timestamp_ms)? {
            return Ok(());
        }
        self.paint(buffer, view)
    }

    fn create_browser(&mut self, view: Viewport) -> Result<()> {
        let (loaded, waiter) = signal::signal();
        self.engine.post(Task::CreateBrowser {
            url: self.config.url.clone(),
            view,
            settings: self.settings.clone(),
            loaded,
        })?;

        match waiter.wait_timeout("page load", LOAD_TIMEOUT) {
            Ok(true) => {
                self.state = SessionState::Active;
                self.view = view;
                Ok(())
            }
            Ok(false) => Err(Error::LoadError(format!("{} failed to load", self.config.url))),
            Err(Error::Timeout(ms)) => Err(Error::LoadError(format!(
                "{} did not load within {}ms",
                self.config.url, ms
            ))),
            Err(e) => Err(Error::LoadError(e.to_string())),
        }
    }

    fn tick(&mut self, timestamp_ms: f64) -> Result<bool> {
        let (response, waiter) = signal::signal();
        self.engine.post(Task::Tick {
            timestamp_ms,
            response,
        })?;
        let has_pending_work = waiter.wait("tick response")?;
        debug!("tick {}ms: pending work = {}", timestamp_ms, has_pending_work);
        Ok(has_pending_work)
    }

    fn paint(&mut self, buffer: &mut [u8], view: Viewport) -> Result<()> {
        let (done, waiter) = signal::signal();
        // SAFETY: `buffer` is borrowed for this whole call and we do not return
        // before the slot's signal fires or the slot is dropped (`wait` returns
        // on either). A slot refused by `post` is dropped inside the error.
        let slot = PaintSlot::new(unsafe { DestinationBuffer::new(buffer) }, view, done);
        self.engine.post(Task::Paint(slot))?;
        waiter.wait("paint completion")
    }

    /// Fatal error: tell the loop to quit and refuse further frames.
    fn abort(&mut self) {
        self.state = SessionState::Closed;
        self.engine.request_stop();
    }

    /// Close the browser, stop the engine loop and wait for it to exit.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if !self.engine.is_running() {
            return;
        }
        info!("shutting down filter session for {}", self.config.url);
        if self.state == SessionState::Active && self.engine.post(Task::CloseBrowser).is_err() {
            warn!("engine loop already gone at shutdown");
        }
        self.engine.request_stop();
        self.engine.join();
        self.state = SessionState::Closed;
    }
}

impl Drop for FrameFilter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Validate a frame's declared geometry against its buffer.
fn check_geometry(len: usize, width: i32, height: i32, stride: i32) -> Result<Viewport> {
    let expected_stride = width.checked_mul(4);
    if expected_stride != Some(stride) {
        return Err(Error::GeometryError(format!(
            "line size {} does not match width {} (expected {} bytes per row)",
            stride,
            width,
            i64::from(width) * 4
        )));
    }

    let expected_len = (height as usize).checked_mul(stride as usize);
    if expected_len != Some(len) {
        return Err(Error::GeometryError(format!(
            "buffer holds {} bytes, {} rows of {} need {}",
            len,
            height,
            stride,
            i64::from(height) * i64::from(stride)
        )));
    }

    Ok(Viewport {
        width: width as u32,
        height: height as u32,
    })
}
