//! # Readiness report CLI (`readiness`)
//!
//! ## Usage
//!
//! ```bash
//! readiness --config ./config/readiness.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `readiness init` | Create the SQLite database and index schema |
//! | `readiness ingest <url>...` | Acquire pages and rebuild an index namespace |
//! | `readiness search "<query>"` | Query the retrieval index |
//! | `readiness status` | Show the active retrieval tier and namespaces |
//! | `readiness report <request.json>` | Generate (and optionally email) one report |
//! | `readiness serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Load the provider's service catalog
//! readiness ingest --namespace provider --company "Beacon" https://beacon.example/services
//!
//! # Generate a report from a saved survey submission
//! readiness report ./submission.json --out ./acme.pdf
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use readiness_report::acquire::Acquirer;
use readiness_report::chunk::Chunker;
use readiness_report::config::{self, Config};
use readiness_report::coordinator::ReportService;
use readiness_report::index::RetrievalIndex;
use readiness_report::models::ReportRequest;
use readiness_report::{ingest, migrate, server};

/// Readiness report CLI: retrieval-grounded readiness assessments,
/// assembled as PDF and delivered best-effort.
#[derive(Parser)]
#[command(name = "readiness", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/readiness.toml`. Credentials are read from the
    /// environment variables named in the file.
    #[arg(long, global = true, default_value = "./config/readiness.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Acquire one or more pages and rebuild an index namespace from them.
    Ingest {
        /// Index namespace to replace.
        #[arg(long, default_value = "provider")]
        namespace: String,

        /// Company the pages belong to (stored as chunk metadata).
        #[arg(long)]
        company: String,

        /// Page URLs; bare hostnames get `https://`.
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Search the retrieval index.
    Search {
        query: String,

        /// Restrict the search to one namespace.
        #[arg(long)]
        namespace: Option<String>,

        /// Maximum number of results.
        #[arg(long, default_value = "5")]
        limit: usize,
    },

    /// Show the active retrieval tier and indexed namespaces.
    Status,

    /// Generate a report from a JSON request file.
    ///
    /// Runs the full pipeline: lead logging and email are attempted when
    /// configured, and never fail the command.
    Report {
        /// Path to a JSON `ReportRequest`.
        input: PathBuf,

        /// Override the recipient address in the request.
        #[arg(long)]
        email: Option<String>,

        /// Also write the PDF to this path.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

/// Config file if present; otherwise defaults plus environment.
fn load_or_minimal(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        return config::load_config(path);
    }
    tracing::warn!(path = %path.display(), "config file not found, using defaults");
    let mut cfg = Config::minimal();
    cfg.resolve_env();
    cfg.validate()?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_or_minimal(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            namespace,
            company,
            urls,
        } => {
            let index = RetrievalIndex::open(&cfg).await?;
            let acquirer = Acquirer::from_config(&cfg.acquire)?;
            let chunker = Chunker::from_config(&cfg.chunking)?;
            let report =
                ingest::ingest_sites(&acquirer, &chunker, &index, &namespace, &company, &urls)
                    .await?;
            println!(
                "Ingested namespace '{}': {} pages, {} skipped, {} chunks ({} tier).",
                report.namespace,
                report.pages_acquired,
                report.pages_skipped,
                report.chunks,
                index.tier()
            );
        }
        Commands::Search {
            query,
            namespace,
            limit,
        } => {
            let index = RetrievalIndex::open(&cfg).await?;
            let outcome = match &namespace {
                Some(ns) => index.search_namespace(ns, &query, limit).await,
                None => index.search(&query, limit).await,
            };
            if let Some(reason) = outcome.reason() {
                println!("(degraded: {})", reason);
            }
            for (i, hit) in outcome.value().iter().enumerate() {
                let snippet: String = hit.content.chars().take(160).collect();
                println!(
                    "{}. [{:.3}] {}: {}",
                    i + 1,
                    hit.score,
                    hit.namespace,
                    snippet.replace('\n', " ")
                );
            }
        }
        Commands::Status => {
            let index = RetrievalIndex::open(&cfg).await?;
            println!("Retrieval tier: {}", index.tier());
            if index.is_empty() {
                println!("No namespaces indexed; default context will be used.");
            }
            for (ns, chunks) in index.namespaces() {
                println!("  {:<24} {} chunks", ns, chunks);
            }
        }
        Commands::Report { input, email, out } => {
            let raw = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read request: {}", input.display()))?;
            let mut request: ReportRequest = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid request JSON: {}", input.display()))?;
            if email.is_some() {
                request.recipient_email = email;
            }

            let index = Arc::new(RetrievalIndex::open(&cfg).await?);
            let service = ReportService::from_config(&cfg, index)?;
            let outcome = service.run(&request).await?;

            if let Some(out) = out {
                std::fs::write(&out, &outcome.artifact_bytes)
                    .with_context(|| format!("Failed to write {}", out.display()))?;
                println!("Report written to {}", out.display());
            }
            if let Some(path) = &outcome.artifact_path {
                println!("Report saved to {}", path.display());
            }
            println!("Report: {} ({} bytes)", outcome.artifact_name, outcome.artifact_bytes.len());
            println!("Email: {}", outcome.email_status);
            println!("Lead logged: {}", outcome.lead_logged);
            if let Some(reason) = &outcome.synthesis_failure {
                println!("Recommendations degraded: {}", reason);
            }
        }
        Commands::Serve => {
            let index = Arc::new(RetrievalIndex::open(&cfg).await?);
            let service = Arc::new(ReportService::from_config(&cfg, index)?);
            server::run_server(&cfg, service).await?;
        }
    }

    Ok(())
}
