//! CLI binary for storyforge.
//!
//! A thin shim over the library crate: `serve` runs the HTTP surface,
//! `generate` runs one job in-process and renders its progress stream.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use storyforge::{
    BookSpecs, Collaborators, ForgeConfig, JobManager, JobStatus, ProgressEvent, Segmentation,
};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service
  storyforge serve --bind 0.0.0.0:8000 --data-dir ./data

  # Generate one book locally
  storyforge generate chapter.pdf --theme Kindness --humor 7 --age-group 4-6 -o kindness.pdf

  # Only pages 3-9 of the source, with a hint for the story model
  storyforge generate novel.pdf --theme Courage --page-start 3 --page-end 9 \
      --section "the storm chapter"

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY             OpenAI API key (story model)
  ANTHROPIC_API_KEY          Anthropic API key
  EDGEQUAKE_LLM_PROVIDER     Provider override (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL            Model override
  STORYFORGE_IMAGE_ENDPOINT  txt2img base URL; books are text-only when unset
  PDFIUM_LIB_PATH            Path to libpdfium (file or directory)
"#;

/// Turn source documents into illustrated books.
#[derive(Parser, Debug)]
#[command(
    name = "storyforge",
    version,
    about = "Turn source documents into illustrated books",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "STORYFORGE_BIND", default_value = "0.0.0.0:8000")]
        bind: SocketAddr,
    },

    /// Generate a single book and wait for it.
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Source document (PDF, .txt or .md).
    input: PathBuf,

    /// Theme the story should convey.
    #[arg(long)]
    theme: String,

    /// Humor level, 0-10.
    #[arg(long, default_value_t = 5)]
    humor: i64,

    /// Target reader age group, e.g. 4-6.
    #[arg(long, default_value = "6-8")]
    age_group: String,

    /// Which section of the source to draw from.
    #[arg(long)]
    section: Option<String>,

    /// Extra context passed to the story model.
    #[arg(long)]
    context: Option<String>,

    /// First source page (1-indexed).
    #[arg(long)]
    page_start: Option<u32>,

    /// Last source page (1-indexed, inclusive).
    #[arg(long)]
    page_end: Option<u32>,

    /// Copy the finished book here.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, env = "STORYFORGE_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Root for uploads, books, images and manifests.
    #[arg(long, global = true, env = "STORYFORGE_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Story model ID.
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Story provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// txt2img service base URL.
    #[arg(long, global = true, env = "STORYFORGE_IMAGE_ENDPOINT")]
    image_endpoint: Option<String>,

    /// Per-call timeout for extraction, story, image and assembly calls.
    #[arg(long, global = true, env = "STORYFORGE_TIMEOUT", default_value_t = 600)]
    timeout: u64,

    /// Keep uploads after their job finishes.
    #[arg(long, global = true, env = "STORYFORGE_KEEP_SOURCES")]
    keep_sources: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "STORYFORGE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "STORYFORGE_QUIET")]
    quiet: bool,
}

impl CommonArgs {
    fn config(&self) -> Result<ForgeConfig> {
        let mut builder = ForgeConfig::builder()
            .data_dir(&self.data_dir)
            .collaborator_timeout_secs(self.timeout)
            .keep_sources(self.keep_sources);
        if let Some(model) = &self.model {
            builder = builder.model(model);
        }
        if let Some(provider) = &self.provider {
            builder = builder.provider_name(provider);
        }
        if let Some(endpoint) = &self.image_endpoint {
            builder = builder.image_endpoint(endpoint);
        }
        builder.build().context("Invalid configuration")
    }
}

fn init_logging(common: &CommonArgs, progress_bar: bool) {
    // The bar carries the feedback in generate mode; library INFO logs would
    // tear it.
    let filter = if common.verbose {
        "debug"
    } else if common.quiet || progress_bar {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let show_progress = match &cli.command {
        Command::Generate(args) => !cli.common.quiet && !args.no_progress,
        Command::Serve { .. } => false,
    };
    init_logging(&cli.common, show_progress);

    let config = cli.common.config()?;
    config
        .ensure_dirs()
        .await
        .context("Failed to create data directories")?;
    let collaborators =
        Collaborators::from_config(&config).context("Failed to set up collaborators")?;
    let manager = JobManager::new(config, collaborators);

    match cli.command {
        Command::Serve { bind } => {
            storyforge::http::serve(manager, bind)
                .await
                .context("Server failed")?;
        }
        Command::Generate(args) => generate(&manager, args, show_progress, cli.common.quiet).await?,
    }
    Ok(())
}

async fn generate(
    manager: &JobManager,
    args: GenerateArgs,
    show_progress: bool,
    quiet: bool,
) -> Result<()> {
    // Submit a copy: the pipeline removes its upload when the job ends.
    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let file_name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.pdf".to_string());

    let specs = BookSpecs::new(args.theme, args.humor, args.age_group);
    let segmentation = Segmentation {
        section_description: args.section,
        additional_context: args.context,
        page_start: args.page_start,
        page_end: args.page_end,
    };
    let submission = manager
        .submit_upload(&file_name, &bytes, specs, segmentation)
        .await
        .context("Failed to submit job")?;

    let bar = if show_progress {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Generating");
        bar.enable_steady_tick(Duration::from_millis(80));
        Some(bar)
    } else {
        None
    };

    let mut events = Box::pin(manager.watch(&submission.job_id));
    let mut last = None;
    while let Some(event) = events.next().await {
        if let (Some(bar), ProgressEvent::Snapshot(snapshot)) = (&bar, &event) {
            bar.set_position(snapshot.progress as u64);
            bar.set_message(snapshot.message.clone());
        }
        last = Some(event);
    }
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    let snapshot = match last {
        Some(ProgressEvent::Snapshot(s)) => s,
        _ => bail!("Job {} disappeared", submission.job_id),
    };
    if snapshot.status != JobStatus::Completed {
        let error = snapshot.error.unwrap_or(snapshot.message);
        eprintln!("{} {}", red("✘"), red(&error));
        bail!("Book generation failed");
    }

    let (path, _) = manager
        .download(&submission.job_id)
        .await
        .context("Finished book is missing")?;
    let final_path = match args.output {
        Some(out) => {
            tokio::fs::copy(&path, &out)
                .await
                .with_context(|| format!("Failed to write {}", out.display()))?;
            out
        }
        None => path,
    };

    if !quiet {
        eprintln!(
            "{} {} {}",
            green("✔"),
            bold(snapshot.title.as_deref().unwrap_or("Untitled")),
            snapshot.message
        );
    }
    println!("{}", final_path.display());
    Ok(())
}
