use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use image::RgbaImage;
use webfilter::{FrameFilter, PixelFormat};

/// Drive one filter session over a run of synthetic grey frames.
#[derive(Parser, Debug)]
#[command(name = "webfilter-run", version)]
struct Cli {
    /// Page to overlay (http(s) or file URL, or a filesystem path).
    url: String,

    /// Render-process helper executable. Defaults to `webfilter-helper`
    /// next to this binary.
    #[arg(long)]
    helper: Option<PathBuf>,

    #[arg(long, default_value_t = 1280)]
    width: i32,

    #[arg(long, default_value_t = 720)]
    height: i32,

    /// Number of frames to submit.
    #[arg(long, default_value_t = 2)]
    frames: u32,

    /// Timestamp step between frames, in milliseconds.
    #[arg(long, default_value_t = 16.0)]
    interval_ms: f64,

    /// Timestamp of the first frame, in milliseconds.
    #[arg(long, default_value_t = 0.0)]
    start: f64,

    /// Channel order of the frames.
    #[arg(long, value_enum, default_value_t = FormatChoice::Rgba)]
    format: FormatChoice,

    /// Write the last frame as PNG.
    #[arg(long)]
    png_out: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatChoice {
    Rgba,
    Bgra,
}

impl From<FormatChoice> for PixelFormat {
    fn from(choice: FormatChoice) -> Self {
        match choice {
            FormatChoice::Rgba => PixelFormat::Rgba,
            FormatChoice::Bgra => PixelFormat::Bgra,
        }
    }
}

const GREY: u8 = 0x55;

fn default_helper() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("locate current executable")?;
    let dir = exe
        .parent()
        .context("current executable has no parent directory")?;
    Ok(dir.join("webfilter-helper"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    anyhow::ensure!(cli.width > 0 && cli.height > 0, "frame size must be positive");

    let helper = match cli.helper {
        Some(path) => path,
        None => default_helper()?,
    };
    let config = format!("url={};subprocess={}", cli.url, helper.display());
    let format = PixelFormat::from(cli.format);

    let mut filter = FrameFilter::builtin(&config, format)
        .with_context(|| format!("start filter session for {}", cli.url))?;

    let stride = cli.width * 4;
    let mut frame = Vec::new();
    for i in 0..cli.frames {
        frame.clear();
        frame.resize(stride as usize * cli.height as usize, GREY);

        let ts = cli.start + f64::from(i) * cli.interval_ms;
        let started = Instant::now();
        filter
            .submit_frame(&mut frame, cli.width, cli.height, stride, ts)
            .with_context(|| format!("frame {} at {}ms", i, ts))?;
        let touched = frame.iter().any(|&b| b != GREY);
        println!(
            "frame {:>4}  ts {:>9.2}ms  {:>7.2}ms  {}",
            i,
            ts,
            started.elapsed().as_secs_f64() * 1000.0,
            if touched { "composited" } else { "pass-through" }
        );
    }
    filter.shutdown();

    if let Some(path) = cli.png_out {
        if format == PixelFormat::Bgra {
            for px in frame.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
        }
        let image = RgbaImage::from_raw(cli.width as u32, cli.height as u32, frame)
            .context("frame buffer does not match its size")?;
        image
            .save(&path)
            .with_context(|| format!("write '{}'", path.display()))?;
        println!("wrote {}", path.display());
    }
    Ok(())
}
