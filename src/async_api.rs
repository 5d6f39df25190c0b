use std::sync::mpsc::{self, Sender};
use std::thread;

use tokio::sync::oneshot;

use crate::{Error, EventSink, FilterConfig, FrameFilter, PixelFormat, RenderBackend, Result};

enum Command {
    Frame {
        buffer: Vec<u8>,
        width: i32,
        height: i32,
        timestamp_ms: f64,
        resp: oneshot::Sender<Result<Vec<u8>>>,
    },
    Close(oneshot::Sender<Result<()>>),
}

/// An async-friendly filter session backed by a dedicated worker thread.
///
/// The worker thread owns a synchronous [`FrameFilter`] and runs frames sent
/// from async tasks, so a frame's blocking waits never park an executor
/// thread.
#[derive(Clone)]
pub struct AsyncFrameFilter {
    cmd_tx: Sender<Command>,
}

impl AsyncFrameFilter {
    /// Start a session (spawns a background thread that owns the filter).
    pub async fn new<B, F>(config: String, format: PixelFormat, factory: F) -> Result<Self>
    where
        B: RenderBackend + 'static,
        F: FnOnce(&FilterConfig, EventSink) -> Result<B> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        thread::Builder::new()
            .name("webfilter-async".into())
            .spawn(move || {
                let mut filter = match FrameFilter::init(&config, format, factory) {
                    Ok(f) => f,
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };
                let _ = init_tx.send(Ok(()));

                while let Ok(cmd) = cmd_rx.recv() {
                    match cmd {
                        Command::Frame {
                            mut buffer,
                            width,
                            height,
                            timestamp_ms,
                            resp,
                        } => {
                            let stride = width.saturating_mul(4);
                            let res = filter
                                .submit_frame(&mut buffer, width, height, stride, timestamp_ms)
                                .map(|()| buffer);
                            let _ = resp.send(res);
                        }
                        Command::Close(resp) => {
                            filter.shutdown();
                            let _ = resp.send(Ok(()));
                            return;
                        }
                    }
                }
                filter.shutdown();
            })
            .map_err(|e| Error::RuntimeLoadError(format!("spawning filter worker: {}", e)))?;

        init_rx
            .await
            .map_err(|e| Error::Other(format!("Worker init canceled: {}", e)))??;

        Ok(Self { cmd_tx })
    }

    /// Composite the page over a tightly packed frame and hand it back.
    pub async fn submit_frame(
        &self,
        frame: Vec<u8>,
        width: i32,
        height: i32,
        timestamp_ms: f64,
    ) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Frame {
                buffer: frame,
                width,
                height,
                timestamp_ms,
                resp: tx,
            })
            .map_err(|_| Error::Closed("filter worker has exited".into()))?;
        rx.await
            .map_err(|_| Error::Closed("filter worker has exited".into()))?
    }

    /// Shut the session down and stop the worker.
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Close(tx))
            .map_err(|_| Error::Closed("filter worker has exited".into()))?;
        rx.await
            .map_err(|e| Error::Other(format!("Close canceled: {}", e)))?
    }
}
