//! CLI binary for proofcrop.
//!
//! A thin shim over the library crate that drives one `ImageWizard` run
//! from flags: select the file, apply the crop, then save or upload.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use proofcrop::{
    AspectRatio, CropGeometry, Dimensions, HttpRemover, ImageWizard, Notice, NoticeLevel,
    OutputFormat, SelectedFile, SharedObserver, SourceInfo, WizardConfig, WizardObserver,
    WizardState,
};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Spinner that follows the wizard through its states.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Select");
        bar.set_message("Reading image…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl WizardObserver for CliObserver {
    fn on_transition(&self, _from: WizardState, to: WizardState) {
        let (prefix, msg) = match to {
            WizardState::Select => ("Select", "Validating…"),
            WizardState::Crop => ("Crop", "Rendering…"),
            WizardState::Preview => ("Preview", "Encoded"),
            WizardState::Uploading => ("Upload", "Sending…"),
            WizardState::Closed => ("Done", ""),
        };
        self.bar.set_prefix(prefix);
        self.bar.set_message(msg);
    }

    fn on_notice(&self, notice: &Notice) {
        // Errors surface through the returned error instead.
        if notice.level == NoticeLevel::Success {
            self.bar.println(format!("{} {}", green("✔"), notice.message));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Square crop, zoomed in, uploaded to the backend
  proofcrop raid.png --aspect 1:1 --zoom 1.5 --upload-url https://guild.example.com/api/proof

  # Rotate a sideways phone screenshot and save locally
  proofcrop shot.jpg --rotation 90 -o shot-cropped.jpg

  # Nudge the crop window right and up, force PNG output
  proofcrop shot.webp --aspect 16:9 --zoom 2 --pan 120,-40 --format png -o out.png

  # Inspect the file without cropping
  proofcrop --inspect-only --json raid.png

  # Delete the image currently stored for the slot
  proofcrop --remove https://guild.example.com/api/proof/42

ASPECT RATIOS:
  free (default), 1:1, 16:9, 4:3, 3:2 (any N:M, NxM or N/M is accepted)

LIMITS:
  Accepted formats: JPEG, PNG, WebP. Maximum size: 20 MiB.

ENVIRONMENT VARIABLES:
  PROOFCROP_UPLOAD_URL    Multipart upload endpoint (used when -o is not given)
  PROOFCROP_UPLOAD_FIELD  Multipart field name (default: file)
  RUST_LOG                Override log filter (e.g. proofcrop=debug)
"#;

/// Crop, rotate and re-encode a proof image, then upload or save it.
#[derive(Parser, Debug)]
#[command(
    name = "proofcrop",
    version,
    about = "Crop, rotate and re-encode a proof image, then upload or save it",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// JPEG, PNG or WebP image to crop.
    #[arg(required_unless_present = "remove")]
    image: Option<PathBuf>,

    /// Delete the stored image at this URL (HTTP DELETE) instead of cropping.
    #[arg(long, value_name = "URL", conflicts_with_all = ["image", "output", "inspect_only"])]
    remove: Option<String>,

    /// Aspect ratio: free, 1:1, 16:9, 4:3, 3:2.
    #[arg(long, env = "PROOFCROP_ASPECT", default_value = "free")]
    aspect: String,

    /// Zoom factor (1.0–3.0).
    #[arg(long, env = "PROOFCROP_ZOOM", default_value_t = 1.0)]
    zoom: f64,

    /// Clockwise rotation in degrees; wraps into 0–359.
    #[arg(long, env = "PROOFCROP_ROTATION", default_value_t = 0, allow_hyphen_values = true)]
    rotation: i32,

    /// Move the crop window by DX,DY pixels (e.g. 120,-40).
    #[arg(long, allow_hyphen_values = true)]
    pan: Option<String>,

    /// JPEG quality (1–100).
    #[arg(long, env = "PROOFCROP_QUALITY", default_value_t = 92,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Output format. Default: keep the source format.
    #[arg(long, env = "PROOFCROP_FORMAT", value_enum)]
    format: Option<FormatArg>,

    /// Save the cropped image to this file instead of uploading it.
    #[arg(short, long, env = "PROOFCROP_OUTPUT")]
    output: Option<PathBuf>,

    /// Multipart upload endpoint.
    #[arg(long, env = "PROOFCROP_UPLOAD_URL")]
    upload_url: Option<String>,

    /// Multipart field name the backend expects.
    #[arg(long, env = "PROOFCROP_UPLOAD_FIELD", default_value = "file")]
    upload_field: String,

    /// Upload timeout in seconds.
    #[arg(long, env = "PROOFCROP_UPLOAD_TIMEOUT", default_value_t = 60)]
    upload_timeout: u64,

    /// Print file details only, no crop.
    #[arg(long)]
    inspect_only: bool,

    /// Print a JSON summary instead of text.
    #[arg(long, env = "PROOFCROP_JSON")]
    json: bool,

    /// Disable the spinner.
    #[arg(long, env = "PROOFCROP_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PROOFCROP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PROOFCROP_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Jpeg,
    Png,
    Webp,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Jpeg => OutputFormat::Jpeg,
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Webp => OutputFormat::WebP,
        }
    }
}

/// Result printed with `--json`.
#[derive(Serialize)]
struct Summary {
    source: SourceInfo,
    geometry: CropGeometry,
    output: OutputSummary,
}

#[derive(Serialize)]
struct OutputSummary {
    file_name: String,
    format: OutputFormat,
    dimensions: Dimensions,
    bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved_to: Option<PathBuf>,
    uploaded: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner covers INFO-level feedback; keep library logs quiet
    // unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if let Some(ref url) = cli.remove {
        return remove(&cli, url).await;
    }

    let path = cli.image.as_ref().context("No image given")?;
    let file = SelectedFile::from_path(path)
        .await
        .context("Failed to read image")?;

    let observer = show_progress.then(CliObserver::new);
    let config = build_config(&cli, observer.clone().map(|o| o as SharedObserver))?;
    let mut wizard = ImageWizard::new(config);

    let outcome = run(&cli, &mut wizard, file).await;
    if let Some(ref o) = observer {
        o.finish();
    }
    let summary = match outcome? {
        Some(summary) => summary,
        None => return Ok(()),
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        let out = &summary.output;
        let target = match out.saved_to {
            Some(ref p) => p.display().to_string(),
            None => "uploaded".to_string(),
        };
        eprintln!(
            "{}  {}x{} {}  {}  →  {}",
            green("✔"),
            out.dimensions.width,
            out.dimensions.height,
            out.format,
            dim(&format!("{} bytes", out.bytes)),
            bold(&target),
        );
    }

    Ok(())
}

/// Drive the wizard. Returns `None` for `--inspect-only`.
async fn run(cli: &Cli, wizard: &mut ImageWizard, file: SelectedFile) -> Result<Option<Summary>> {
    wizard.select_file(file).context("Image rejected")?;
    let source = wizard
        .source()
        .map(|s| s.info())
        .context("No source image after selection")?;

    if cli.inspect_only {
        print_inspect(cli, &source)?;
        wizard.close();
        return Ok(None);
    }

    let aspect: AspectRatio = cli.aspect.parse().context("Invalid --aspect")?;
    let pan = cli.pan.as_deref().map(parse_pan).transpose()?;
    {
        let stage = wizard
            .crop_stage_mut()
            .context("Crop stage is not available")?;
        stage.set_aspect(aspect);
        stage.set_rotation(cli.rotation);
        stage.set_zoom(cli.zoom);
        if let Some((dx, dy)) = pan {
            stage.pan(dx, dy);
        }
    }

    wizard.confirm_crop().await.context("Crop failed")?;
    let geometry = wizard
        .geometry()
        .cloned()
        .context("Crop geometry missing after confirmation")?;
    let artifact = wizard.preview().context("Nothing to preview")?;
    let mut output = OutputSummary {
        file_name: artifact.file_name().to_string(),
        format: artifact.format(),
        dimensions: artifact.dimensions(),
        bytes: artifact.bytes().len(),
        saved_to: None,
        uploaded: false,
    };

    if let Some(ref path) = cli.output {
        artifact.save_to(path).context("Failed to save image")?;
        output.saved_to = Some(path.clone());
        wizard.close();
    } else {
        wizard.confirm_upload().await.context("Upload failed")?;
        output.uploaded = true;
    }

    Ok(Some(Summary {
        source,
        geometry,
        output,
    }))
}

/// `--remove URL`: run the wizard's removal path against an HTTP backend.
async fn remove(cli: &Cli, url: &str) -> Result<()> {
    let remover =
        HttpRemover::new(url, cli.upload_timeout).context("Invalid --remove URL")?;
    let config = WizardConfig::builder()
        .upload_timeout_secs(cli.upload_timeout)
        .current_image_url(url)
        .remover(Arc::new(remover))
        .build()
        .context("Invalid configuration")?;
    let mut wizard = ImageWizard::new(config);
    wizard
        .remove_existing()
        .await
        .context("Failed to remove image")?;

    if cli.json {
        println!("{}", serde_json::json!({ "removed": url }));
    } else if !cli.quiet {
        eprintln!("{}  removed  {}", green("✔"), bold(url));
    }
    Ok(())
}

/// Map CLI args to `WizardConfig`.
fn build_config(cli: &Cli, observer: Option<SharedObserver>) -> Result<WizardConfig> {
    let mut builder = WizardConfig::builder()
        .jpeg_quality(cli.quality)
        .upload_field(cli.upload_field.clone())
        .upload_timeout_secs(cli.upload_timeout);

    if let Some(format) = cli.format {
        builder = builder
            .preserve_source_format(false)
            .fallback_format(format.into());
    }
    if let Some(ref url) = cli.upload_url {
        builder = builder.upload_endpoint(url.clone());
    }
    if let Some(observer) = observer {
        builder = builder.observer(observer);
    }

    builder.build().context("Invalid configuration")
}

fn print_inspect(cli: &Cli, source: &SourceInfo) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(source).context("Failed to serialise file details")?
        );
    } else {
        println!("File:         {}", source.name);
        println!("Type:         {}", source.mime_type);
        println!("Size:         {} bytes", source.byte_len);
        match source.dimensions {
            Some(d) => println!("Dimensions:   {}x{}", d.width, d.height),
            None => println!("Dimensions:   unknown"),
        }
    }
    Ok(())
}

/// Parse `--pan DX,DY`.
fn parse_pan(s: &str) -> Result<(f64, f64)> {
    let (dx, dy) = s
        .split_once(',')
        .with_context(|| format!("Invalid --pan '{}': expected DX,DY", s))?;
    let dx: f64 = dx.trim().parse().context("Invalid pan DX")?;
    let dy: f64 = dy.trim().parse().context("Invalid pan DY")?;
    if !dx.is_finite() || !dy.is_finite() {
        anyhow::bail!("Invalid --pan '{}': offsets must be finite", s);
    }
    Ok((dx, dy))
}
