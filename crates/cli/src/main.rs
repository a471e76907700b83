mod backup;
mod offline;
mod serve;
mod status;
mod trust;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use scorebook_model::GameId;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Scorebook cluster node and operator tools.
#[derive(Parser)]
#[command(name = "scorebook", version, about = "Scorebook cluster node and operator tools")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Log at debug level (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a cluster node
    Serve {
        /// Path to the node's TOML config
        #[arg(long, short)]
        config: PathBuf,
        /// Form a new cluster with this node as its only voter
        #[arg(long, conflicts_with = "join")]
        bootstrap: bool,
        /// Seed node to join (overrides `join` in the config)
        #[arg(long)]
        join: Option<String>,
    },

    /// Generate an ed25519 node keypair
    Keygen {
        /// Output file prefix (writes <prefix>.secret and <prefix>.pub)
        #[arg(long, default_value = "node")]
        out: String,
    },

    /// Show a node's consensus status
    Status {
        /// Node address (host:port or URL)
        #[arg(long, default_value = "127.0.0.1:7401")]
        node: String,
    },

    /// Replay a backup and print the resulting game state
    Replay {
        /// Path to a backup file written by `scorebook export`
        backup: PathBuf,
    },

    /// Print the reviewable play history of a backup
    History {
        /// Path to a backup file written by `scorebook export`
        backup: PathBuf,
        /// Include stricken items
        #[arg(long)]
        all: bool,
    },

    /// Export a game from a node as a backup file
    Export {
        /// Node address (host:port or URL)
        #[arg(long, default_value = "127.0.0.1:7401")]
        node: String,
        /// Game id
        #[arg(long)]
        game: GameId,
        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Principal sent to the node's access checks
        #[arg(long)]
        user: Option<String>,
    },

    /// Create a game on a node from a backup file
    Import {
        /// Node address (host:port or URL)
        #[arg(long, default_value = "127.0.0.1:7401")]
        node: String,
        /// Path to the backup file
        backup: PathBuf,
        /// Principal sent to the node's access checks
        #[arg(long)]
        user: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve {
            config,
            bootstrap,
            join,
        } => {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    report_error(
                        &format!("error: failed to start runtime: {}", e),
                        cli.output,
                        cli.quiet,
                    );
                    process::exit(1);
                }
            };
            let overrides = serve::Overrides { bootstrap, join };
            if let Err(e) = rt.block_on(serve::run_node(&config, overrides)) {
                report_error(&format!("error: {}", e), cli.output, cli.quiet);
                process::exit(1);
            }
        }
        Commands::Keygen { out } => {
            trust::keygen::cmd_keygen(&out, cli.output, cli.quiet);
        }
        Commands::Status { node } => {
            status::cmd_status(&node, cli.output, cli.quiet);
        }
        Commands::Replay { backup } => {
            offline::cmd_replay(&backup, cli.output, cli.quiet);
        }
        Commands::History { backup, all } => {
            offline::cmd_history(&backup, all, cli.output, cli.quiet);
        }
        Commands::Export {
            node,
            game,
            out,
            user,
        } => {
            backup::cmd_export(
                &node,
                game,
                out.as_deref(),
                user.as_deref(),
                cli.output,
                cli.quiet,
            );
        }
        Commands::Import { node, backup, user } => {
            backup::cmd_import(&node, &backup, user.as_deref(), cli.output, cli.quiet);
        }
    }
}

/// `RUST_LOG` when set, else `debug` with `-v`, else `info`. Logs go to
/// stderr so `--output json` on stdout stays parseable.
fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug,hyper=warn,ureq=warn,rustls=warn")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Report an error message respecting output format and quiet settings.
///
/// In quiet mode, errors are suppressed entirely (exit code is the signal).
pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}

/// Print a JSON value to stdout, pretty-printed.
pub(crate) fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("error: failed to serialize output: {}", e),
    }
}

/// Read and parse a backup file, exiting with a reported error on failure.
pub(crate) fn load_backup(
    path: &std::path::Path,
    output: OutputFormat,
    quiet: bool,
) -> scorebook_model::Restored {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            report_error(
                &format!("error: cannot read '{}': {}", path.display(), e),
                output,
                quiet,
            );
            process::exit(1);
        }
    };
    let restored = match scorebook_model::import_game(&text) {
        Ok(r) => r,
        Err(e) => {
            report_error(
                &format!("error: {}: {}", path.display(), e),
                output,
                quiet,
            );
            process::exit(1);
        }
    };
    for (line, reason) in &restored.skipped {
        tracing::warn!(file = %path.display(), line, %reason, "skipped backup line");
    }
    restored
}
