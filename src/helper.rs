//! Render-process side of the built-in engine
//!
//! The helper binary runs [`run`] over its stdin/stdout. It owns the page:
//! it loads the document, runs its scripts in a Boa context with the
//! scheduler shim and the `surface` drawing API installed, answers tick
//! requests through the [`TickHost`], and rasterizes the page on repaint.

use std::io::{BufRead, Write};
use std::time::Duration;

use scraper::{Html, Selector};

use crate::ipc::{self, HelperMessage, HostMessage};
use crate::rendering::{self, PaintCommand, Surface};
use crate::script::BoaContext;
use crate::tick::{ScriptContext, TickHost};
use crate::{Error, Result, SessionSettings};

/// Timeout for fetching the document and its external scripts
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// The only browser a helper process hosts
const BROWSER_ID: u64 = 1;

/// Serve one browser over `input`/`output` until `Close` or end of input.
pub fn run<R: BufRead, W: Write>(mut input: R, output: W) -> Result<()> {
    let mut process = RenderProcess::new(output);
    while let Some(message) = ipc::read_message::<_, HostMessage>(&mut input)? {
        if !process.handle(message)? {
            break;
        }
    }
    process.host.browser_destroyed();
    Ok(())
}

struct Page {
    surface: Surface,
}

struct RenderProcess<W> {
    out: W,
    host: TickHost<BoaContext>,
    page: Option<Page>,
    next_context_id: u64,
}

impl<W: Write> RenderProcess<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            host: TickHost::new(),
            page: None,
            next_context_id: 1,
        }
    }

    fn send(&mut self, message: &HelperMessage) -> Result<()> {
        ipc::write_message(&mut self.out, message)
    }

    /// Returns `false` once the browser is closed.
    fn handle(&mut self, message: HostMessage) -> Result<bool> {
        match message {
            HostMessage::Navigate {
                url,
                width,
                height,
                settings,
            } => self.navigate(&url, width, height, &settings)?,
            HostMessage::Paint { width, height } => self.paint(width, height)?,
            HostMessage::Process { message } => {
                if let Some(reply) = self.host.on_process_message(&message) {
                    self.send(&HelperMessage::Process { message: reply })?;
                } else {
                    eprintln!("webfilter-helper: ignoring message {:?}", message.name);
                }
            }
            HostMessage::Close => {
                self.host.browser_destroyed();
                self.page = None;
                self.send(&HelperMessage::Closed)?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn navigate(
        &mut self,
        url: &str,
        width: u32,
        height: u32,
        settings: &SessionSettings,
    ) -> Result<()> {
        self.send(&HelperMessage::Created {
            browser_id: BROWSER_ID,
        })?;

        let document = match fetch(url) {
            Ok(doc) => doc,
            Err(e) => {
                return self.send(&HelperMessage::LoadError {
                    code: -2,
                    text: e.to_string(),
                    failed_url: url.to_string(),
                })
            }
        };

        let scripts = match extract_scripts(url, &document.body) {
            Ok(scripts) => scripts,
            Err(e) => {
                return self.send(&HelperMessage::LoadError {
                    code: -3,
                    text: e.to_string(),
                    failed_url: url.to_string(),
                })
            }
        };

        // Replacing the page releases the previous document's context.
        self.host.browser_destroyed();
        let id = self.next_context_id;
        self.next_context_id += 1;
        let mut context = BoaContext::new(id, settings);
        context.eval(&rendering::surface_prelude(width, height))?;
        self.host.context_created(context)?;

        if let Some(context) = self.host.contexts_mut().last_mut() {
            for (source, code) in &scripts {
                let res = context.eval(code)?;
                if res.is_error {
                    // A throwing script does not fail the load, same as a browser.
                    eprintln!("webfilter-helper: {}: {}", source, res.value);
                }
            }
        }

        self.page = Some(Page {
            surface: Surface::new(width, height, settings.background_color),
        });
        self.send(&HelperMessage::LoadEnd {
            http_status: document.status,
        })
    }

    fn paint(&mut self, width: u32, height: u32) -> Result<()> {
        let Some(page) = self.page.as_mut() else {
            eprintln!("webfilter-helper: paint requested with no page loaded");
            return Ok(());
        };

        let resized = (width, height) != (page.surface.width(), page.surface.height());
        page.surface.resize(width, height);
        for context in self.host.contexts_mut() {
            if resized {
                context.eval(&rendering::surface_resize(width, height))?;
            }
            let drained = context.eval(rendering::DRAIN_SCRIPT)?;
            if drained.is_error {
                eprintln!("webfilter-helper: draw queue unavailable: {}", drained.value);
                continue;
            }
            match PaintCommand::parse_queue(&drained.value) {
                Ok(commands) => commands.iter().for_each(|c| page.surface.apply(c)),
                Err(e) => eprintln!("webfilter-helper: {}", e),
            }
        }

        let message = HelperMessage::paint(width, height, page.surface.pixels());
        self.send(&message)
    }
}

struct Document {
    status: i32,
    body: String,
}

/// Load a document from a `file`, `http` or `https` URL.
fn fetch(url: &str) -> Result<Document> {
    let parsed = url::Url::parse(url).map_err(|e| Error::LoadError(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "file" => {
            let path = parsed
                .to_file_path()
                .map_err(|_| Error::LoadError(format!("{} is not a local path", url)))?;
            let body = std::fs::read_to_string(&path)
                .map_err(|e| Error::LoadError(format!("{}: {}", path.display(), e)))?;
            Ok(Document { status: 200, body })
        }
        "http" | "https" => {
            let client = reqwest::blocking::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .map_err(|e| Error::LoadError(format!("Failed to build HTTP client: {}", e)))?;
            let resp = client
                .get(parsed)
                .send()
                .map_err(|e| Error::LoadError(format!("Failed to fetch {}: {}", url, e)))?;
            let status = i32::from(resp.status().as_u16());
            let body = resp
                .text()
                .map_err(|e| Error::LoadError(format!("Failed to read response body: {}", e)))?;
            Ok(Document { status, body })
        }
        other => Err(Error::LoadError(format!("unsupported scheme {:?}", other))),
    }
}

/// Collect the page's classic scripts in document order as `(source, code)`.
///
/// External scripts are resolved against `base_url` and fetched.
fn extract_scripts(base_url: &str, html: &str) -> Result<Vec<(String, String)>> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("script")
        .map_err(|e| Error::LoadError(format!("script selector: {:?}", e)))?;

    let mut scripts = Vec::new();
    for (index, node) in document.select(&selector).enumerate() {
        let element = node.value();
        if let Some(kind) = element.attr("type") {
            let kind = kind.trim().to_ascii_lowercase();
            if !kind.is_empty() && !kind.contains("javascript") {
                continue;
            }
        }

        match element.attr("src") {
            Some(src) => {
                let resolved = url::Url::parse(base_url)
                    .and_then(|base| base.join(src))
                    .map_err(|e| Error::LoadError(format!("script src {:?}: {}", src, e)))?;
                let script = fetch(resolved.as_str())?;
                scripts.push((resolved.to_string(), script.body));
            }
            None => {
                let code = node.text().collect::<String>();
                if !code.trim().is_empty() {
                    scripts.push((format!("{}#script{}", base_url, index), code));
                }
            }
        }
    }
    Ok(scripts)
}
