use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::audit::AuditCommands;
use commands::escalations::EscalationArgs;
use commands::query::QueryArgs;

#[derive(Parser)]
#[command(
    name = "medroute",
    version,
    about = "MedRoute CLI: submit clinical requests and inspect the audit trail"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "MEDROUTE_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health {
        /// Show orchestrator detail (capability counts, timeouts, counters)
        #[arg(long)]
        detailed: bool,
    },
    /// Submit a clinical request
    Query(QueryArgs),
    /// List registered capabilities
    Agents {
        #[arg(long)]
        raw: bool,
    },
    /// Audit trail operations
    Audit {
        /// Skip pretty-printing (raw JSON for piping)
        #[arg(long, global = true)]
        raw: bool,
        #[command(subcommand)]
        command: AuditCommands,
    },
    /// List escalations awaiting or past clinician review
    Escalations(EscalationArgs),
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Health { detailed } => commands::health::run(&cli.api_url, detailed).await,
        Commands::Query(args) => commands::query::run(&cli.api_url, args).await,
        Commands::Agents { raw } => commands::agents::run(&cli.api_url, raw).await,
        Commands::Audit { raw, command } => commands::audit::run(&cli.api_url, raw, command).await,
        Commands::Escalations(args) => commands::escalations::run(&cli.api_url, args).await,
    };

    std::process::exit(code);
}
