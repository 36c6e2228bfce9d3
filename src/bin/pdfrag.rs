//! CLI binary for pdf-rag.
//!
//! A thin shim over the library crate that maps subcommands and flags to
//! `RagConfig` and prints reports and answers.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdf_rag::pipeline::parse::parsed_result_dir;
use pdf_rag::store::CorpusStore;
use pdf_rag::{
    ask, embed_parsed, ingest_pdfs, list_collections, IngestProgressCallback, IngestReport,
    ProgressCallback, RagConfig,
};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
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

/// Terminal progress callback: one bar over the documents of a batch, with a
/// log line per finished or failed document. Image descriptions complete
/// out of order, so only counters are shared between tasks.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Image descriptions seen so far across the batch.
    images: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_ingest_start` tells us the batch size.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Resolving inputs…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            images: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} docs  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Ingesting");
        self.bar.set_message("parsing with MinerU…");
        self.bar.reset_eta();
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_ingest_start(&self, total_documents: usize) {
        self.activate_bar(total_documents);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Ingesting {total_documents} document(s)…"))
        ));
    }

    fn on_document_start(&self, index: usize, total: usize, name: &str) {
        self.bar.set_message(format!("{name} ({index}/{total})"));
    }

    fn on_image_described(&self, document: &str, done: usize, total_images: usize) {
        self.images.fetch_add(1, Ordering::Relaxed);
        self.bar
            .set_message(format!("{document}: image {done}/{total_images}"));
    }

    fn on_document_complete(&self, name: &str, node_count: usize) {
        self.bar.println(format!(
            "  {} {:<40}  {}",
            green("✓"),
            name,
            dim(&format!("{node_count:>5} nodes")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, name: &str, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            let mut s: String = error.chars().take(79).collect();
            s.push('\u{2026}');
            s
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {:<40}  {}", red("✗"), name, red(&msg)));
        self.bar.inc(1);
    }

    fn on_ingest_complete(&self, total_documents: usize, success_count: usize) {
        let failed = total_documents.saturating_sub(success_count);
        let images = self.images.load(Ordering::Relaxed);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} document(s) ingested successfully  {}",
                green("✔"),
                bold(&success_count.to_string()),
                dim(&format!("{images} image(s) described")),
            );
        } else {
            eprintln!(
                "{} {}/{} document(s) ingested  ({} failed)",
                if failed == total_documents {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_documents,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Parse, describe and embed a paper (one corpus per PDF)
  pdfrag ingest deepseek-r1.pdf

  # Papers straight from arXiv
  pdfrag ingest https://arxiv.org/pdf/1706.03762 https://arxiv.org/pdf/2501.12948

  # Rebuild corpora from MinerU results already on disk
  pdfrag embed pdf_docs/parse_results/deepseek-r1/auto
  pdfrag embed deepseek-r1.pdf

  # Ask a question
  pdfrag query --corpus deepseek-r1 "How was R1-Zero trained?"

  # Machine-readable answer with sources
  pdfrag query --corpus deepseek-r1 --top-k 8 --json "What does Figure 2 show?"

  # Web UI
  pdfrag serve --addr 0.0.0.0:8501

ENVIRONMENT VARIABLES:
  DASHSCOPE_API_KEY                 API key for the OpenAI-compatible endpoint
  DASHSCOPE_BASE_URL                Endpoint (default: DashScope compatible mode)
  DASHSCOPE_VLM_MODEL_NAME          Vision model (default: qwen-vl-max)
  DASHSCOPE_TEXT_EMBED_MODEL_NAME   Embedding model (default: text-embedding-v3)
  PDFRAG_LLM_PROVIDER               edgequake-llm provider (default: openai)
  PDFRAG_PERSIST_DIR                Corpus directory (default: chroma_storage)
  PDFRAG_PARSE_DIR                  Parse results (default: pdf_docs/parse_results)
  PDFRAG_PARSER_CMD                 MinerU executable (default: mineru)
  PDFRAG_PARSER_BACKEND             MinerU backend (default: pipeline)
  RUST_LOG                          Log filter, overrides --verbose/--quiet

  A .env file in the working directory is loaded automatically.

SETUP:
  1. Install MinerU:  pip install -U "mineru[core]"
  2. Set API key:     export DASHSCOPE_API_KEY=sk-...
  3. Ingest:          pdfrag ingest paper.pdf
  4. Ask:             pdfrag query --corpus paper "What is the main result?"
"#;

/// Ask questions about PDF documents, figures and tables included.
#[derive(Parser, Debug)]
#[command(
    name = "pdfrag",
    version,
    about = "Multimodal question answering over PDF documents",
    long_about = "Parse PDFs with MinerU, describe their figures with a vision-language model, \
embed every text, equation, table and image node, and answer questions with the retrieved \
text and images. Works with any OpenAI-compatible endpoint (DashScope by default).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the persisted corpora.
    #[arg(long, global = true, env = "PDFRAG_PERSIST_DIR")]
    persist_dir: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDFRAG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, global = true, env = "PDFRAG_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse, describe and embed PDFs (paths or URLs), one corpus per file.
    Ingest {
        /// Local PDF paths or HTTP/HTTPS URLs.
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Concurrent image-description calls.
        #[arg(short, long, env = "PDFRAG_CONCURRENCY")]
        concurrency: Option<usize>,

        /// MinerU backend: pipeline, vlm-transformers, vlm-sglang-engine, ….
        #[arg(long, env = "PDFRAG_PARSER_BACKEND")]
        backend: Option<String>,

        /// Print the ingestion report as JSON.
        #[arg(long)]
        json: bool,

        /// Disable the progress bar.
        #[arg(long, env = "PDFRAG_NO_PROGRESS")]
        no_progress: bool,
    },

    /// Build corpora from existing MinerU result directories.
    Embed {
        /// Directories containing `*_content_list.json`, or PDF names whose
        /// results already sit under the parse directory.
        #[arg(required = true)]
        dirs: Vec<PathBuf>,

        /// Concurrent image-description calls.
        #[arg(short, long, env = "PDFRAG_CONCURRENCY")]
        concurrency: Option<usize>,

        /// Print the ingestion report as JSON.
        #[arg(long)]
        json: bool,

        /// Disable the progress bar.
        #[arg(long, env = "PDFRAG_NO_PROGRESS")]
        no_progress: bool,
    },

    /// Answer a question from one corpus.
    Query {
        /// Corpus (collection) name, see `pdfrag list`.
        #[arg(long)]
        corpus: String,

        /// The question.
        question: String,

        /// Nodes retrieved per question.
        #[arg(long, env = "PDFRAG_TOP_K")]
        top_k: Option<usize>,

        /// Output the answer and its sources as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the available corpora.
    List {
        /// Output as a JSON array.
        #[arg(long)]
        json: bool,
    },

    /// Serve the web UI.
    Serve {
        /// Listen address.
        #[arg(long, env = "PDFRAG_ADDR", default_value = "127.0.0.1:8501")]
        addr: SocketAddr,
    },
}

impl Command {
    /// Whether this run shows the ingestion progress bar.
    fn shows_progress(&self, quiet: bool) -> bool {
        match self {
            Command::Ingest {
                json, no_progress, ..
            }
            | Command::Embed {
                json, no_progress, ..
            } => !quiet && !json && !no_progress,
            _ => false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during ingestion.
    let show_progress = cli.command.shows_progress(cli.quiet);
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

    // ── Build config ─────────────────────────────────────────────────────
    let mut config = RagConfig::from_env().context("Invalid configuration")?;
    if let Some(ref dir) = cli.persist_dir {
        config.persist_dir = dir.clone();
    }

    if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        config.progress_callback = Some(cb as ProgressCallback);
    }

    match cli.command {
        Command::Ingest {
            inputs,
            concurrency,
            backend,
            json,
            ..
        } => {
            if let Some(n) = concurrency {
                config.concurrency = n.max(1);
            }
            if let Some(b) = backend {
                config.parser_backend = b;
            }
            let report = ingest_pdfs(&inputs, &config)
                .await
                .context("Ingestion failed")?;
            print_report(&report, json, cli.quiet)?;
            if report.collections.is_empty() {
                bail!("no corpus was built");
            }
        }

        Command::Embed {
            dirs,
            concurrency,
            json,
            ..
        } => {
            if let Some(n) = concurrency {
                config.concurrency = n.max(1);
            }
            let dirs: Vec<PathBuf> = dirs
                .into_iter()
                .map(|p| {
                    let is_pdf = p
                        .extension()
                        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
                    if is_pdf && !p.is_dir() {
                        parsed_result_dir(&config.parse_output_dir, &p, &config.parser_backend)
                    } else {
                        p
                    }
                })
                .collect();
            let report = embed_parsed(&dirs, &config)
                .await
                .context("Building corpora from parse results failed")?;
            print_report(&report, json, cli.quiet)?;
            if report.collections.is_empty() {
                bail!("no corpus was built");
            }
        }

        Command::Query {
            corpus,
            question,
            top_k,
            json,
        } => {
            if let Some(k) = top_k {
                config.similarity_top_k = k.max(1);
            }
            let answer = ask(&question, &corpus, &config)
                .await
                .with_context(|| format!("Failed to answer from corpus '{corpus}'"))?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&answer).context("Failed to serialize answer")?
                );
            } else {
                println!("{}", answer.text);
                if !cli.quiet && !answer.sources.is_empty() {
                    eprintln!();
                    eprintln!("{}", bold("Sources:"));
                    for s in &answer.sources {
                        eprintln!(
                            "  {} {} p.{}  {}  {}",
                            cyan("•"),
                            s.source_file,
                            s.page_idx + 1,
                            s.content_type.as_str(),
                            dim(&format!("{:.3}", s.score)),
                        );
                    }
                }
            }
        }

        Command::List { json } => {
            let store = CorpusStore::open(&config.persist_dir)
                .await
                .context("Failed to open corpus store")?;
            let names = list_collections(&store)
                .await
                .context("Failed to list corpora")?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&names).context("Failed to serialize list")?
                );
            } else if names.is_empty() {
                if !cli.quiet {
                    eprintln!(
                        "No corpora in {}. Run `pdfrag ingest <PDF>` first.",
                        config.persist_dir.display()
                    );
                }
            } else {
                for name in names {
                    println!("{name}");
                }
            }
        }

        Command::Serve { addr } => {
            if !cli.quiet {
                eprintln!("{} Web UI on {}", cyan("◆"), bold(&format!("http://{addr}")));
            }
            pdf_rag::web::serve(config, addr)
                .await
                .context("Web server failed")?;
        }
    }

    Ok(())
}

fn print_report(report: &IngestReport, json: bool, quiet: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("Failed to serialize report")?
        );
        return Ok(());
    }

    for c in &report.collections {
        let kinds = c
            .by_type
            .iter()
            .map(|(kind, n)| format!("{} {n}", kind.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        println!("{}\t{} nodes\t{}", c.name, c.nodes, dim(&kinds));
    }

    if quiet {
        return Ok(());
    }

    for e in &report.errors {
        eprintln!("{} {}", red("✗"), e);
    }
    eprintln!(
        "{}",
        dim(&format!(
            "parse {:.1}s · nodes {:.1}s · embed {:.1}s · total {:.1}s",
            report.parse_duration_ms as f64 / 1000.0,
            report.nodes_duration_ms as f64 / 1000.0,
            report.embed_duration_ms as f64 / 1000.0,
            report.total_duration_ms as f64 / 1000.0,
        ))
    );
    Ok(())
}
