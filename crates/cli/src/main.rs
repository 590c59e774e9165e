//! # rowguard
//!
//! Command-line interface for the row-level authorization framework:
//! - `rowguard apply` — render a policy template and converge tables onto it
//! - `rowguard audit` — flag enforcement gaps without mutating anything
//! - `rowguard test` — run the isolation scenario matrix against one table
//! - `rowguard run-all` — audit plus isolation tests across a schema
//! - `rowguard drop` — remove managed policies (destructive, confirmed)
//!
//! Exit codes: 0 all clear, 1 critical findings or failures, 2 usage or
//! configuration error.

mod commands;
mod config;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// Row-level security policies: apply, audit, and verify.
#[derive(Parser)]
#[command(name = "rowguard", version, about)]
struct Cli {
    /// Postgres connection string. Credentials are masked in all output.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a policy template and converge tables onto it.
    Apply(commands::apply::ApplyArgs),
    /// Audit policy coverage. Read-only.
    Audit(commands::audit::AuditArgs),
    /// Run the isolation scenario matrix against one table.
    Test(commands::test::TestArgs),
    /// Audit plus isolation tests across the schema.
    RunAll(commands::run_all::RunAllArgs),
    /// Drop managed policies from a table. Destructive; requires --yes.
    Drop(commands::drop::DropArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    rowguard_observability::init();
    let cli = Cli::parse();

    let max_connections = match &cli.command {
        Commands::RunAll(args) => (commands::run_all::job_count(args) + 1) as u32,
        _ => 5,
    };
    let pool = match config::connect(&cli.database_url, max_connections).await {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(2);
        }
    };

    let outcome = match cli.command {
        Commands::Apply(args) => commands::apply::execute(args, pool).await,
        Commands::Audit(args) => commands::audit::execute(args, pool).await,
        Commands::Test(args) => commands::test::execute(args, pool).await,
        Commands::RunAll(args) => commands::run_all::execute(args, pool).await,
        Commands::Drop(args) => commands::drop::execute(args, pool).await,
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(commands::exit_code_for(&err))
        }
    }
}
