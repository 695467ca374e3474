//! # RAG Coder CLI (`ragcoder`)
//!
//! The `ragcoder` binary codes open-ended survey responses against a
//! codebook with a generative model, keeping an append-only audit trail of
//! every prompt and answer.
//!
//! ## Usage
//!
//! ```bash
//! ragcoder --config ./config/ragcoder.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragcoder init` | Create the audit database and run schema migrations |
//! | `ragcoder validate` | Load the codebook and responses and print counts |
//! | `ragcoder preview <id>` | Print the prompt that would be sent for one response |
//! | `ragcoder run` | Code every response and write the results |
//! | `ragcoder audit export` | Dump audit records as JSON Lines |
//! | `ragcoder stats` | Summarize the audit log per batch |
//! | `ragcoder completions <shell>` | Print shell completions |
//!
//! ## Exit status
//!
//! `0` on success, `1` on any fatal error, `2` when a run was cancelled
//! before every response was attempted.

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

use rag_coder::progress::ProgressMode;
use rag_coder::run::RunOptions;
use rag_coder::{config, export, migrate, preview, run, stats};

/// RAG Coder CLI: retrieval-augmented, auditable qualitative coding.
///
/// All commands except `completions` read a TOML configuration file.
/// See `config/ragcoder.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ragcoder",
    about = "RAG Coder — retrieval-augmented, auditable qualitative coding of survey responses",
    version,
    long_about = "RAG Coder assigns codes from a fixed codebook to free-text survey responses \
    using a generative model. Each prompt is grounded in the most relevant codebook entries, \
    and every model attempt is written to an append-only audit log."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragcoder.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the audit database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Check the configuration, codebook, and responses without calling the model.
    Validate,

    /// Print the exact prompt that would be sent for one response.
    Preview {
        /// Response id from the responses file.
        response_id: String,
    },

    /// Code all responses.
    Run {
        /// Code only the first N responses.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress output on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` on a terminal, otherwise `off`.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Inspect the audit log.
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Summarize the audit log.
    Stats,

    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

/// Audit subcommands.
#[derive(Subcommand)]
enum AuditAction {
    /// Export audit records as JSON Lines.
    Export {
        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Only records from this batch id.
        #[arg(long)]
        batch: Option<String>,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "rag_coder=debug,info",
        _ => "rag_coder=trace,debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "ragcoder", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Audit log initialized at {}.", cfg.audit.log_path.display());
        }
        Commands::Validate => {
            preview::run_validate(&cfg)?;
        }
        Commands::Preview { response_id } => {
            preview::run_preview(&cfg, &response_id)?;
        }
        Commands::Run { limit, progress } => {
            let progress = match progress.as_deref() {
                None => ProgressMode::default_for_tty(),
                Some(value) => ProgressMode::parse(value).ok_or_else(|| {
                    anyhow::anyhow!("--progress must be off, human, or json (got '{}')", value)
                })?,
            };
            let complete = run::run_batch(&cfg, RunOptions { limit, progress }).await?;
            if !complete {
                std::process::exit(2);
            }
        }
        Commands::Audit { action } => match action {
            AuditAction::Export { output, batch } => {
                export::run_export(&cfg, output.as_deref(), batch.as_deref()).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
