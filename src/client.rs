//! Render client: the session's callback surface on the engine-loop thread
//!
//! The client turns engine callbacks into the one-shot signals the bridge
//! blocks on, and holds the per-session view state. It lives on the
//! engine-loop thread for the whole session and never blocks.

use std::ptr::NonNull;

use log::{debug, info, warn};

use crate::composite;
use crate::signal::Signal;
use crate::tick::{TickRequest, TickResponse};
use crate::{PixelFormat, ProcessMessage, RenderBackend, SessionEvent, Viewport};

/// The caller's frame buffer, lent to the engine-loop thread for one paint
pub(crate) struct DestinationBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the buffer is only dereferenced by whichever thread currently owns
// the `PaintSlot` holding it, and the lending thread does not touch it until
// that slot is completed or dropped.
unsafe impl Send for DestinationBuffer {}

impl DestinationBuffer {
    /// # Safety
    ///
    /// `buffer` must stay valid and unaliased until the `PaintSlot` built from
    /// this value has fired its completion signal or been dropped.
    pub(crate) unsafe fn new(buffer: &mut [u8]) -> Self {
        Self {
            ptr: NonNull::new_unchecked(buffer.as_mut_ptr()),
            len: buffer.len(),
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: upheld by the contract of `DestinationBuffer::new`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

/// One frame's pending paint: where to composite and whom to tell
///
/// A slot is "waiting" while the client holds it; delivering a paint takes it
/// out and fires `done` exactly once.
pub struct PaintSlot {
    buffer: DestinationBuffer,
    view: Viewport,
    done: Signal<()>,
}

impl PaintSlot {
    pub(crate) fn new(buffer: DestinationBuffer, view: Viewport, done: Signal<()>) -> Self {
        Self { buffer, view, done }
    }
}

/// Per-session engine callback handler
pub struct RenderClient {
    format: PixelFormat,
    view: Viewport,
    browser_id: Option<u64>,
    loaded: Option<Signal<bool>>,
    tick_response: Option<Signal<bool>>,
    paint: Option<PaintSlot>,
}

impl RenderClient {
    pub fn new(format: PixelFormat) -> Self {
        Self {
            format,
            view: Viewport { width: 0, height: 0 },
            browser_id: None,
            loaded: None,
            tick_response: None,
            paint: None,
        }
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    /// Size the offscreen view is rendered at
    pub fn view_rect(&self) -> Viewport {
        self.view
    }

    pub fn update_view(&mut self, view: Viewport) {
        self.view = view;
    }

    pub fn has_browser(&self) -> bool {
        self.browser_id.is_some()
    }

    /// Arm the load signal for a creation attempt.
    pub fn begin_load(&mut self, loaded: Signal<bool>) {
        self.loaded = Some(loaded);
    }

    /// Route an engine event to its handler.
    pub fn dispatch(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::AfterCreated { browser_id } => self.on_after_created(browser_id),
            SessionEvent::LoadEnd { http_status } => self.on_load_end(http_status),
            SessionEvent::LoadError {
                code,
                text,
                failed_url,
            } => self.on_load_error(code, &text, &failed_url),
            SessionEvent::Paint {
                width,
                height,
                bitmap,
            } => self.on_paint(&bitmap, width, height),
            SessionEvent::MessageReceived(message) => {
                if !self.on_process_message_received(&message) {
                    debug!("unhandled message {:?}", message.name);
                }
            }
            SessionEvent::BeforeClose => self.on_before_close(),
        }
    }

    pub fn on_after_created(&mut self, browser_id: u64) {
        debug!("browser {} created", browser_id);
        self.browser_id = Some(browser_id);
    }

    pub fn on_load_end(&mut self, http_status: i32) {
        info!("page loaded (status {})", http_status);
        self.finish_load(true);
    }

    pub fn on_load_error(&mut self, code: i32, text: &str, failed_url: &str) {
        warn!("load of {} failed ({}): {}", failed_url, code, text);
        self.finish_load(false);
    }

    fn finish_load(&mut self, ok: bool) {
        // Only the first outcome of a creation attempt counts.
        if let Some(loaded) = self.loaded.take() {
            loaded.fire(ok);
        }
    }

    /// Composite a delivered repaint into the waiting slot, if any.
    pub fn on_paint(&mut self, bitmap: &[u8], width: u32, height: u32) {
        let Some(mut slot) = self.paint.take() else {
            debug!("paint {}x{} with no frame waiting, dropped", width, height);
            return;
        };

        if slot.view != (Viewport { width, height }) {
            warn!(
                "paint is {}x{} but the frame is {}x{}; frame left untouched",
                width, height, slot.view.width, slot.view.height
            );
        } else if let Err(e) = composite::composite(
            slot.buffer.as_mut_slice(),
            self.format,
            bitmap,
            width as usize,
            height as usize,
        ) {
            warn!("paint not composited: {}", e);
        }

        slot.done.fire(());
    }

    /// Returns `true` if the message was consumed.
    pub fn on_process_message_received(&mut self, message: &ProcessMessage) -> bool {
        let Some(response) = TickResponse::from_message(message) else {
            return false;
        };
        match self.tick_response.take() {
            Some(signal) => {
                signal.fire(response.has_pending_work);
            }
            None => warn!("tick response with no tick outstanding, dropped"),
        }
        true
    }

    /// The browser is gone: abandon everything still waiting on it.
    pub fn on_before_close(&mut self) {
        debug!("browser closed");
        self.browser_id = None;
        self.finish_load(false);
        self.tick_response = None;
        self.paint = None;
    }

    /// Dispatch a tick request, arming `response` for its answer.
    pub fn send_tick(
        &mut self,
        backend: &mut dyn RenderBackend,
        timestamp_ms: f64,
        response: Signal<bool>,
    ) {
        self.tick_response = Some(response);
        let request = TickRequest { timestamp_ms }.to_message();
        if let Err(e) = backend.send_process_message(request) {
            warn!("tick request not sent: {}", e);
            self.tick_response = None;
        }
    }

    /// Arm `slot` and request a repaint of the view.
    pub fn request_paint(&mut self, backend: &mut dyn RenderBackend, slot: PaintSlot) {
        if self.paint.is_some() {
            // The bridge never overlaps frames; refuse rather than orphan a slot.
            warn!("paint requested while another is waiting, refused");
            return;
        }
        self.paint = Some(slot);
        if let Err(e) = backend.invalidate(self.view) {
            warn!("repaint not requested: {}", e);
            self.paint = None;
        }
    }

    /// Close the browser if one exists.
    pub fn close(&mut self, backend: &mut dyn RenderBackend) {
        if self.has_browser() {
            if let Err(e) = backend.close_browser() {
                warn!("close request failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::signal;
    use crate::tick::TICK_REQUEST;
    use crate::{Error, Result, SessionSettings};

    #[derive(Default)]
    struct RecordingBackend {
        sent: Vec<ProcessMessage>,
        invalidated: Vec<Viewport>,
        fail: bool,
    }

    impl RenderBackend for RecordingBackend {
        fn create_browser(&mut self, _: &str, _: Viewport, _: &SessionSettings) -> Result<()> {
            Ok(())
        }

        fn invalidate(&mut self, view: Viewport) -> Result<()> {
            if self.fail {
                return Err(Error::IpcError("down".into()));
            }
            self.invalidated.push(view);
            Ok(())
        }

        fn send_process_message(&mut self, message: ProcessMessage) -> Result<()> {
            if self.fail {
                return Err(Error::IpcError("down".into()));
            }
            self.sent.push(message);
            Ok(())
        }

        fn close_browser(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn slot(buf: &mut [u8], view: Viewport) -> (PaintSlot, crate::signal::Waiter<()>) {
        let (done, waiter) = signal();
        let slot = PaintSlot::new(unsafe { DestinationBuffer::new(buf) }, view, done);
        (slot, waiter)
    }

    #[test]
    fn load_signal_fires_once_with_first_outcome() {
        let mut client = RenderClient::new(PixelFormat::Rgba);
        let (sig, waiter) = signal();
        client.begin_load(sig);
        client.dispatch(SessionEvent::AfterCreated { browser_id: 7 });
        client.dispatch(SessionEvent::LoadEnd { http_status: 200 });
        client.dispatch(SessionEvent::LoadError {
            code: -2,
            text: "late".into(),
            failed_url: "file:///x".into(),
        });
        assert!(client.has_browser());
        assert!(waiter.wait("load").unwrap());
    }

    #[test]
    fn load_error_reports_false() {
        let mut client = RenderClient::new(PixelFormat::Rgba);
        let (sig, waiter) = signal();
        client.begin_load(sig);
        client.on_load_error(-105, "name not resolved", "http://nowhere.invalid/");
        assert!(!waiter.wait("load").unwrap());
    }

    #[test]
    fn paint_without_waiting_slot_is_dropped() {
        let mut client = RenderClient::new(PixelFormat::Rgba);
        client.on_paint(&[0, 0, 255, 255], 1, 1);
        assert!(client.paint.is_none());
    }

    #[test]
    fn paint_composites_into_slot_and_completes() {
        let mut client = RenderClient::new(PixelFormat::Rgba);
        let view = Viewport { width: 2, height: 1 };
        client.update_view(view);
        let mut backend = RecordingBackend::default();
        let mut frame = vec![0x55u8; 8];

        let (slot, waiter) = slot(&mut frame, view);
        client.request_paint(&mut backend, slot);
        assert_eq!(backend.invalidated, vec![view]);

        // opaque red, premultiplied BGRA
        client.dispatch(SessionEvent::Paint {
            width: 2,
            height: 1,
            bitmap: [0, 0, 255, 255].repeat(2),
        });
        waiter.wait("paint").unwrap();
        assert_eq!(frame, [255, 0, 0, 255].repeat(2));

        // second delivery has no owner
        client.on_paint(&[0u8; 8], 2, 1);
        assert_eq!(frame, [255, 0, 0, 255].repeat(2));
    }

    #[test]
    fn mismatched_paint_completes_without_writing() {
        let mut client = RenderClient::new(PixelFormat::Bgra);
        let view = Viewport { width: 1, height: 1 };
        let mut backend = RecordingBackend::default();
        let mut frame = vec![9u8; 4];
        let (slot, waiter) = slot(&mut frame, view);
        client.request_paint(&mut backend, slot);
        client.on_paint(&[0, 0, 255, 255].repeat(4), 2, 2);
        waiter.wait("paint").unwrap();
        assert_eq!(frame, vec![9u8; 4]);
    }

    #[test]
    fn tick_round_trip_through_client() {
        let mut client = RenderClient::new(PixelFormat::Rgba);
        let mut backend = RecordingBackend::default();
        let (sig, waiter) = signal();
        client.send_tick(&mut backend, 33.0, sig);
        assert_eq!(backend.sent.len(), 1);
        assert_eq!(backend.sent[0].name, TICK_REQUEST);

        assert!(client.on_process_message_received(
            &TickResponse { has_pending_work: true }.to_message()
        ));
        assert!(waiter.wait("tick").unwrap());
        assert!(!client.on_process_message_received(&ProcessMessage::new("console")));
    }

    #[test]
    fn failed_sends_abandon_their_waiters() {
        let mut client = RenderClient::new(PixelFormat::Rgba);
        let mut backend = RecordingBackend { fail: true, ..Default::default() };

        let (sig, tick) = signal();
        client.send_tick(&mut backend, 0.0, sig);
        assert!(matches!(tick.wait("tick"), Err(Error::Closed(_))));

        let mut frame = vec![0u8; 4];
        let (slot, paint) = slot(&mut frame, Viewport { width: 1, height: 1 });
        client.request_paint(&mut backend, slot);
        assert!(matches!(paint.wait("paint"), Err(Error::Closed(_))));
    }

    #[test]
    fn before_close_abandons_pending_waits() {
        let mut client = RenderClient::new(PixelFormat::Rgba);
        let mut backend = RecordingBackend::default();
        client.on_after_created(1);
        let (sig, tick) = signal();
        client.send_tick(&mut backend, 0.0, sig);
        client.dispatch(SessionEvent::BeforeClose);
        assert!(!client.has_browser());
        assert!(tick.wait("tick").is_err());
    }
}
