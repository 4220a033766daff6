//! CLI binary for edgequake-pdf2fields.
//!
//! A thin shim over the library crate: maps CLI flags to `PipelineConfig`,
//! runs one document through a `Pipeline`, and folds its event stream into a
//! progress bar (or prints it raw with `--events`).

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2fields::{
    inspect, pipeline::input, write_atomic, ExtractionResult, Failure, Outcome, OutcomeKind,
    PageSelection, PageStatus, Pipeline, PipelineConfig, PipelineEvent, ProgressSnapshot,
    TerminalEvent,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Progress view folded from the event stream ───────────────────────────────

/// Terminal rendering of one request's events. Starts as a spinner and turns
/// into a bar on the first snapshot, which is when the page count is known.
struct ProgressView {
    bar: ProgressBar,
    sized: bool,
}

impl ProgressView {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar, sized: false }
    }

    fn on_event(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Progress(snapshot) => self.on_progress(snapshot),
            PipelineEvent::Terminal(terminal) => self.on_terminal(terminal),
        }
    }

    fn on_progress(&mut self, s: &ProgressSnapshot) {
        if !self.sized {
            if let Some(total) = s.total_pages {
                self.bar.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.cyan} {prefix:.bold}  \
                         [{bar:42.green/238}] {pos:>3}/{len} pages  \
                         ⏱ {elapsed_precise}  ETA {eta_precise}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("█▉▊▋▌▍▎▏  ")
                    .tick_strings(TICKS),
                );
                self.bar.set_length(total as u64);
                self.bar.set_prefix("Extracting");
                self.bar.reset_eta();
                self.sized = true;
            }
        }

        let mark = match s.page_status {
            PageStatus::Done => green("✓"),
            _ => red("✗"),
        };
        self.bar.println(format!(
            "  {} Page {:>3}  {}",
            mark,
            s.page_index + 1,
            dim(&format!("{:>5.1}%", s.percent.unwrap_or(0.0))),
        ));
        self.bar.set_position(s.current_page as u64);
    }

    fn on_terminal(&mut self, t: &TerminalEvent) {
        self.bar.finish_and_clear();
        let total = t.total_pages.unwrap_or(0);
        match t.outcome {
            OutcomeKind::Success => eprintln!(
                "{} {} pages extracted",
                green("✔"),
                bold(&t.succeeded.to_string())
            ),
            OutcomeKind::PartialSuccess => eprintln!(
                "{} {}/{} pages extracted  ({} failed)",
                yellow("⚠"),
                bold(&t.succeeded.to_string()),
                total,
                red(&t.failed.to_string()),
            ),
            OutcomeKind::Failure => eprintln!(
                "{} extraction failed{}",
                red("✘"),
                t.message
                    .as_deref()
                    .map(|m| format!(": {m}"))
                    .unwrap_or_default()
            ),
            OutcomeKind::Cancelled => eprintln!(
                "{} cancelled after {} pages",
                yellow("■"),
                t.succeeded + t.failed
            ),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract every page, JSON on stdout
  pdf2fields invoice.pdf

  # Spreadsheet-ready table into a file
  pdf2fields --format table invoice.pdf -o invoice.tsv

  # Recalculate one page
  pdf2fields --pages 3 invoice.pdf

  # Stream progress events as JSON lines (for piping into another tool)
  pdf2fields --events invoice.pdf -o invoice.json

  # Use a specific model
  pdf2fields --model gpt-4.1 --provider openai invoice.pdf

  # Inspect PDF metadata (no API key needed)
  pdf2fields --inspect-only invoice.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium
  PDF2FIELDS_*            Any flag below, e.g. PDF2FIELDS_CONCURRENCY=8

Press Ctrl-C during a run to cancel it; pages already extracted are still
written out.
"#;

/// Extract structured fields from PDF pages using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2fields",
    version,
    about = "Extract supplier, totals and line items from PDF pages using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write results to this file instead of stdout.
    #[arg(short, long, env = "PDF2FIELDS_OUTPUT")]
    output: Option<PathBuf>,

    /// Result format.
    #[arg(long, env = "PDF2FIELDS_FORMAT", value_enum, default_value = "json")]
    format: Format,

    /// Print every progress event as a JSON line on stdout.
    #[arg(long, env = "PDF2FIELDS_EVENTS")]
    events: bool,

    /// Number of concurrent VLM calls.
    #[arg(short, long, env = "PDF2FIELDS_CONCURRENCY", default_value_t = 4,
          value_parser = clap::value_parser!(u64).range(1..))]
    concurrency: u64,

    /// Refuse documents with more pages than this.
    #[arg(long, env = "PDF2FIELDS_MAX_PAGES", default_value_t = 200)]
    max_pages: usize,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "PDF2FIELDS_PAGES", default_value = "all")]
    pages: String,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2FIELDS_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2FIELDS_PASSWORD")]
    password: Option<String>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2FIELDS_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per page.
    #[arg(long, env = "PDF2FIELDS_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2FIELDS_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries per page on a service error. Off by default.
    #[arg(long, env = "PDF2FIELDS_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Per-page LLM call timeout in seconds (0 disables).
    #[arg(long, env = "PDF2FIELDS_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2FIELDS_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print PDF metadata only, no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2FIELDS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2FIELDS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2FIELDS_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Json,
    Table,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar gives all the feedback that matters, so library INFO
    // logs are muted while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.events;
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

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let meta = inspect(&cli.input).await.context("Failed to inspect PDF")?;
        match cli.format {
            Format::Json => println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialise metadata")?
            ),
            Format::Table => {
                println!("File:         {}", cli.input);
                for (label, value) in [
                    ("Title", &meta.title),
                    ("Author", &meta.author),
                    ("Subject", &meta.subject),
                    ("Producer", &meta.producer),
                    ("Creator", &meta.creator),
                ] {
                    if let Some(v) = value {
                        println!("{:<13} {}", format!("{label}:"), v);
                    }
                }
                println!("Pages:        {}", meta.page_count);
                println!("PDF Version:  {}", meta.pdf_version);
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let config = build_config(&cli).await?;
    let loaded = input::load_input(&cli.input, config.download_timeout_secs)
        .await
        .context("Failed to load input")?;
    let pipeline = Pipeline::from_config(config).context("Failed to set up pipeline")?;
    let run = pipeline
        .process(loaded.bytes, &loaded.media_type)
        .with_context(|| format!("'{}' was not accepted", loaded.source))?;
    let mut events = pipeline
        .subscribe(&run.id())
        .context("Progress stream already taken")?;

    let mut view = show_progress.then(ProgressView::new);
    let mut cancelled = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                cancelled = true;
                run.cancel();
            }
            next = events.next() => {
                let Some(event) = next else { break };
                if cli.events {
                    println!("{}", serde_json::to_string(&event).context("Failed to serialise event")?);
                }
                if let Some(view) = view.as_mut() {
                    view.on_event(&event);
                }
            }
        }
    }

    let outcome = run.wait().await.context("Extraction failed")?;
    let code = match outcome.kind() {
        OutcomeKind::Success | OutcomeKind::PartialSuccess => ExitCode::SUCCESS,
        OutcomeKind::Failure | OutcomeKind::Cancelled => ExitCode::FAILURE,
    };

    match outcome {
        Outcome::Failure(Failure::Render(e)) => {
            if !show_progress {
                eprintln!("{} {e}", red("✘"));
            }
        }
        other => {
            if let Some(result) = other.result() {
                emit(&cli, result).await?;
                if !cli.quiet && !show_progress && !cli.events {
                    let stats = result.stats();
                    eprintln!(
                        "Extracted {}/{} pages ({:?})",
                        stats.succeeded,
                        stats.total,
                        other.kind()
                    );
                }
            }
        }
    }

    Ok(code)
}

/// Write the result to `--output` or stdout in the chosen format.
async fn emit(cli: &Cli, result: &ExtractionResult) -> Result<()> {
    let body = match cli.format {
        Format::Json => {
            let mut s =
                serde_json::to_string_pretty(result).context("Failed to serialise result")?;
            s.push('\n');
            s
        }
        Format::Table => result.to_table(),
    };

    match &cli.output {
        Some(path) => {
            write_atomic(path, body.as_bytes()).await?;
            if !cli.quiet {
                eprintln!("   →  {}", bold(&path.display().to_string()));
            }
        }
        // With --events stdout carries the event lines.
        None if cli.events => {}
        None => {
            io::stdout()
                .lock()
                .write_all(body.as_bytes())
                .context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .concurrency(cli.concurrency as usize)
        .max_pages(cli.max_pages)
        .pages(parse_pages(&cli.pages)?)
        .dpi(cli.dpi)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {path:?}"))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }
        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;
        if pages.contains(&0) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got 0)");
        }
        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}
