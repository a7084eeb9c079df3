//! CLI binary for pagepress.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, picks the backends and reports results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pagepress::pipeline::input::resolve_input;
use pagepress::{
    Backends, FailurePolicy, JobHandle, JobState, LpSubmitter, PageCounter, PdfiumBackend,
    PipelineConfig, PipelineResult, PrintPipeline, PrintProgressCallback, PrintSubmitter,
    ProgressCallback, SpoolDirSubmitter,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback. The bar counts pages settled by the consumer
/// (printed or skipped); conversions only update the message line, since
/// they complete out of order.
struct CliProgressCallback {
    bar: Mutex<ProgressBar>,
    converted: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: Mutex::new(Self::spinner()),
            converted: AtomicUsize::new(0),
        })
    }

    /// Spinner shown while the document is resolved and counted.
    fn spinner() -> ProgressBar {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    }

    fn bar(&self) -> ProgressBar {
        self.bar
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl PrintProgressCallback for CliProgressCallback {
    fn on_job_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        // A finished bar does not redraw, so every job gets a new one.
        let bar = ProgressBar::new(total_pages as u64);
        bar.set_style(style);
        bar.set_prefix("Printing");
        bar.enable_steady_tick(Duration::from_millis(80));
        {
            let mut slot = self.bar.lock().unwrap_or_else(|e| e.into_inner());
            slot.finish_and_clear();
            *slot = bar.clone();
        }
        self.converted.store(0, Ordering::SeqCst);

        bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Printing {total_pages} pages…"))
        ));
    }

    fn on_page_converted(&self, _page_index: usize, total_pages: usize, _size_bytes: usize) {
        let done = self.converted.fetch_add(1, Ordering::SeqCst) + 1;
        self.bar()
            .set_message(dim(&format!("{done}/{total_pages} rendered")));
    }

    fn on_page_failed(&self, page_index: usize, total_pages: usize, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar().println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            red("✗"),
            page_index + 1,
            total_pages,
            red(&msg),
        ));
    }

    fn on_page_printed(&self, page_index: usize, total_pages: usize) {
        let bar = self.bar();
        bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_index + 1,
            total_pages,
            dim(&format!("{:.1}s", bar.elapsed().as_secs_f64())),
        ));
        bar.inc(1);
    }

    fn on_page_skipped(&self, _page_index: usize, _total_pages: usize) {
        self.bar().inc(1);
    }

    fn on_job_complete(&self, result: &PipelineResult) {
        self.bar().finish_and_clear();

        let failed = result.failed_page_indices.len();
        match result.final_state {
            JobState::Completed if failed == 0 => eprintln!(
                "{} {} pages printed",
                green("✔"),
                bold(&result.succeeded_count.to_string())
            ),
            JobState::Completed => eprintln!(
                "{} {}/{} pages printed  ({} skipped: {})",
                cyan("⚠"),
                bold(&result.succeeded_count.to_string()),
                result.total_pages,
                red(&failed.to_string()),
                one_based(&result.failed_page_indices),
            ),
            JobState::Cancelled => eprintln!(
                "{} cancelled after {}/{} pages",
                cyan("⚠"),
                result.succeeded_count,
                result.total_pages
            ),
            _ => eprintln!(
                "{} failed after {}/{} pages: {}",
                red("✘"),
                result.succeeded_count,
                result.total_pages,
                result.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

fn one_based(pages: &[usize]) -> String {
    pages
        .iter()
        .map(|p| (p + 1).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Print on the default CUPS printer
  pagepress contract.pdf

  # Named printer, 4 workers, stop at the first bad page
  pagepress --device office-laser --workers 4 --policy abort report.pdf

  # Print a document sent as a media link
  pagepress https://media.example.com/files/menu.pdf

  # Dry run: write numbered PNGs into ./out/<device>/
  pagepress --spool-dir out scans.pdf

  # Print every PDF in a folder, in name order
  pagepress ./inbox/

  # Page count only
  pagepress --inspect-only contract.pdf

ENVIRONMENT VARIABLES:
  PAGEPRESS_DEVICE        Target printer / spool label
  PAGEPRESS_WORKERS       Concurrent rasterisations
  PAGEPRESS_SPOOL_DIR     Write PNG files instead of calling lp
  PDFIUM_LIB_PATH         Path to libpdfium (otherwise the system library)
  RUST_LOG                Log filter, overrides -v / -q
"#;

/// Print PDF files and URLs page by page, in order.
#[derive(Parser, Debug)]
#[command(
    name = "pagepress",
    version,
    about = "Print PDF files and URLs page by page, in order",
    long_about = "Rasterise PDF documents (local files, folders or URLs) on a bounded worker \
pool and send the pages to a printer strictly in page order, starting as soon as page 1 is ready.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file, folder of PDFs, or HTTP/HTTPS URL.
    input: String,

    /// Target device: CUPS queue name, or `default` for the system printer.
    #[arg(short, long, env = "PAGEPRESS_DEVICE", default_value = "default")]
    device: String,

    /// Rendering DPI (72–600).
    #[arg(long, env = "PAGEPRESS_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Concurrent rasterisations. Default: available parallelism.
    #[arg(short, long, env = "PAGEPRESS_WORKERS")]
    workers: Option<usize>,

    /// Pages held out of order. Default: 2 × workers.
    #[arg(short, long, env = "PAGEPRESS_BUFFER")]
    buffer: Option<usize>,

    /// What to do when a page fails permanently.
    #[arg(long, env = "PAGEPRESS_POLICY", value_enum, default_value = "skip")]
    policy: PolicyArg,

    /// Rasterisation retries per page.
    #[arg(long, env = "PAGEPRESS_RETRIES", default_value_t = 3)]
    retries: u32,

    /// Submission retries per page.
    #[arg(long, env = "PAGEPRESS_SUBMIT_RETRIES", default_value_t = 2)]
    submit_retries: u32,

    /// Seconds to wait for the device to accept a page.
    #[arg(long, env = "PAGEPRESS_SUBMIT_TIMEOUT", default_value_t = 60)]
    submit_timeout: u64,

    /// Write numbered PNGs into this folder instead of calling `lp`.
    #[arg(long, env = "PAGEPRESS_SPOOL_DIR")]
    spool_dir: Option<PathBuf>,

    /// Extra `lp -o` options, e.g. `media=A4`. Repeatable.
    #[arg(short = 'o', long = "lp-option")]
    lp_options: Vec<String>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PAGEPRESS_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print the page count only, no printing.
    #[arg(long)]
    inspect_only: bool,

    /// Output structured JSON results on stdout.
    #[arg(long, env = "PAGEPRESS_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PAGEPRESS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PAGEPRESS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PAGEPRESS_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    Abort,
    Skip,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(v: PolicyArg) -> Self {
        match v {
            PolicyArg::Abort => FailurePolicy::AbortOnFailure,
            PolicyArg::Skip => FailurePolicy::SkipAndContinue,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs unless -v is given.
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

    let documents = collect_documents(&cli.input)?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        return inspect(&cli, &documents).await;
    }

    // ── Build config and backends ────────────────────────────────────────
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PrintProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;

    let submitter: Arc<dyn PrintSubmitter> = match &cli.spool_dir {
        Some(dir) => Arc::new(SpoolDirSubmitter::new(dir)),
        None => Arc::new(
            cli.lp_options
                .iter()
                .fold(LpSubmitter::new(), |lp, opt| lp.with_option(opt)),
        ),
    };
    let backends = Backends::pdfium(PdfiumBackend::new(config.max_rendered_pixels), submitter);
    let dpi = config.dpi;
    let pipeline = PrintPipeline::start(config, backends);

    // ── Print, one document after another ────────────────────────────────
    let mut results = Vec::with_capacity(documents.len());
    let mut interrupted = false;
    for document in &documents {
        let job = pipeline.submit(document.clone(), dpi);
        let result = wait_or_interrupt(&job, &mut interrupted).await;

        if !cli.quiet && !show_progress && !cli.json {
            eprintln!(
                "{}: {} ({}/{} pages in {}ms)",
                document,
                result.final_state,
                result.succeeded_count,
                result.total_pages,
                result.duration_ms
            );
            if let Some(err) = &result.error {
                eprintln!("  {}", red(err));
            }
        }
        results.push((document.clone(), result));
        if interrupted {
            break;
        }
    }
    pipeline.reap();

    if cli.json {
        let report: Vec<_> = results
            .iter()
            .map(|(document, result)| serde_json::json!({ "document": document, "result": result }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise results")?
        );
    }

    let unfinished = results
        .iter()
        .filter(|(_, r)| r.final_state != JobState::Completed)
        .count();
    if interrupted {
        anyhow::bail!("Interrupted");
    }
    if unfinished > 0 {
        anyhow::bail!("{} of {} documents did not print completely", unfinished, results.len());
    }
    Ok(())
}

/// Wait for `job`; the first Ctrl-C cancels it and sets `interrupted`.
async fn wait_or_interrupt(job: &JobHandle, interrupted: &mut bool) -> PipelineResult {
    tokio::select! {
        result = job.wait() => result,
        signal = tokio::signal::ctrl_c() => {
            if signal.is_ok() {
                eprintln!("{} cancelling {}…", cyan("⚠"), job.id());
            }
            *interrupted = true;
            job.cancel_and_wait().await
        }
    }
}

/// One document for a file or URL, every `*.pdf` in name order for a folder.
fn collect_documents(input: &str) -> Result<Vec<String>> {
    let path = Path::new(input);
    if !path.is_dir() {
        return Ok(vec![input.to_string()]);
    }

    let mut pdfs: Vec<PathBuf> = std::fs::read_dir(path)
        .with_context(|| format!("Failed to read folder {}", path.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    pdfs.sort();

    if pdfs.is_empty() {
        anyhow::bail!("No PDF files in {}", path.display());
    }
    Ok(pdfs
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect())
}

async fn inspect(cli: &Cli, documents: &[String]) -> Result<()> {
    let pdfium = PdfiumBackend::new(PipelineConfig::default().max_rendered_pixels);
    let mut counts = Vec::with_capacity(documents.len());
    for document in documents {
        let resolved = resolve_input(document, cli.download_timeout)
            .await
            .with_context(|| format!("Failed to open {document}"))?;
        let pages = pdfium
            .count(resolved.path())
            .await
            .with_context(|| format!("Failed to inspect {document}"))?;
        counts.push((document.as_str(), pages));
    }

    if cli.json {
        let report: Vec<_> = counts
            .iter()
            .map(|(document, pages)| serde_json::json!({ "document": document, "pages": pages }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise page counts")?
        );
    } else {
        for (document, pages) in counts {
            println!("File:   {document}");
            println!("Pages:  {pages}");
        }
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .device_id(cli.device.clone())
        .dpi(cli.dpi)
        .failure_policy(cli.policy.into())
        .max_retries(cli.retries)
        .submit_retries(cli.submit_retries)
        .submit_timeout_secs(cli.submit_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(workers) = cli.workers {
        builder = builder.worker_count(workers);
    }
    if let Some(buffer) = cli.buffer {
        builder = builder.buffer_capacity(buffer);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_maps_to_library_enum() {
        assert_eq!(
            FailurePolicy::from(PolicyArg::Abort),
            FailurePolicy::AbortOnFailure
        );
        assert_eq!(
            FailurePolicy::from(PolicyArg::Skip),
            FailurePolicy::SkipAndContinue
        );
    }

    #[test]
    fn flags_reach_the_config() {
        let cli = Cli::parse_from([
            "pagepress",
            "--workers",
            "3",
            "--policy",
            "abort",
            "--device",
            "office",
            "doc.pdf",
        ]);
        let config = build_config(&cli, None).unwrap();
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.buffer_capacity, 6);
        assert_eq!(config.failure_policy, FailurePolicy::AbortOnFailure);
        assert_eq!(config.device_id, "office");
    }

    #[test]
    fn folder_lists_pdfs_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.pdf", "a.PDF", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"%PDF").unwrap();
        }
        let docs = collect_documents(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs[0].ends_with("a.PDF"));
        assert!(docs[1].ends_with("b.pdf"));
    }

    #[test]
    fn single_file_passes_through() {
        assert_eq!(
            collect_documents("https://example.com/x.pdf").unwrap(),
            vec!["https://example.com/x.pdf".to_string()]
        );
    }

    #[test]
    fn one_based_page_list() {
        assert_eq!(one_based(&[0, 4]), "1, 5");
    }
}
