//! Scripted in-process backend for driving `FrameFilter` without a real engine

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use webfilter::tick::{TickRequest, TickResponse};
use webfilter::{
    Error, EventSink, FilterConfig, ProcessMessage, RenderBackend, Result, SessionEvent,
    SessionSettings, Viewport,
};

/// Config string accepted by `FrameFilter::init`; the mock ignores both parts.
pub const CONFIG: &str = "url=https://overlay.test/page;subprocess=/nonexistent/helper";

/// How the mock answers `create_browser`
#[derive(Debug, Clone, Copy)]
pub enum LoadOutcome {
    Succeed,
    Fail,
    /// Never report an outcome
    Hang,
}

/// What the mock page does
#[derive(Debug, Clone)]
pub struct MockPage {
    pub load: LoadOutcome,
    /// Number of ticks that will find animation work
    pub animation_frames: u32,
    /// Solid premultiplied BGRA colour painted on every repaint
    pub paint_bgra: [u8; 4],
    /// Deliver paints this much smaller than requested
    pub paint_shrink: u32,
}

impl Default for MockPage {
    fn default() -> Self {
        Self {
            load: LoadOutcome::Succeed,
            animation_frames: 1,
            paint_bgra: [0, 0, 255, 255],
            paint_shrink: 0,
        }
    }
}

/// Everything the mock was asked to do, in order
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub struct MockBackend {
    page: MockPage,
    sink: EventSink,
    calls: CallLog,
}

impl MockBackend {
    /// A factory for `FrameFilter::init` plus the log it records into.
    pub fn factory(
        page: MockPage,
    ) -> (
        impl FnOnce(&FilterConfig, EventSink) -> Result<MockBackend> + Send + 'static,
        CallLog,
    ) {
        let calls = CallLog::default();
        let log = calls.clone();
        let factory = move |_: &FilterConfig, sink: EventSink| {
            Ok::<_, Error>(MockBackend {
                page,
                sink,
                calls: log,
            })
        };
        (factory, calls)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl RenderBackend for MockBackend {
    fn create_browser(&mut self, url: &str, view: Viewport, _: &SessionSettings) -> Result<()> {
        self.record(format!("create {} {}x{}", url, view.width, view.height));
        self.sink.post(SessionEvent::AfterCreated { browser_id: 7 });
        match self.page.load {
            LoadOutcome::Succeed => {
                self.sink.post(SessionEvent::LoadEnd { http_status: 200 });
            }
            LoadOutcome::Fail => {
                self.sink.post(SessionEvent::LoadError {
                    code: -105,
                    text: "name not resolved".into(),
                    failed_url: url.to_string(),
                });
            }
            LoadOutcome::Hang => {}
        }
        Ok(())
    }

    fn invalidate(&mut self, view: Viewport) -> Result<()> {
        self.record(format!("invalidate {}x{}", view.width, view.height));
        let width = view.width.saturating_sub(self.page.paint_shrink);
        let height = view.height;
        let bitmap = self
            .page
            .paint_bgra
            .repeat(width as usize * height as usize);
        self.sink.post(SessionEvent::Paint {
            width,
            height,
            bitmap,
        });
        Ok(())
    }

    fn send_process_message(&mut self, message: ProcessMessage) -> Result<()> {
        let request = TickRequest::from_message(&message)
            .ok_or_else(|| Error::IpcError(format!("unexpected message {}", message.name)))?;
        self.record(format!("tick {}", request.timestamp_ms));
        let has_pending_work = self.page.animation_frames > 0;
        if has_pending_work {
            self.page.animation_frames -= 1;
        }
        self.sink.post(SessionEvent::MessageReceived(
            TickResponse { has_pending_work }.to_message(),
        ));
        Ok(())
    }

    fn close_browser(&mut self) -> Result<()> {
        self.record("close".to_string());
        self.sink.post(SessionEvent::BeforeClose);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.record("shutdown".to_string());
    }
}

/// A tightly packed frame filled with one pixel value.
pub fn solid_frame(width: usize, height: usize, px: [u8; 4]) -> Vec<u8> {
    px.repeat(width * height)
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}
