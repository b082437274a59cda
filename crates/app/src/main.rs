use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod pipeline;
mod prompt;

use commands::RunFlags;
use config::{Overrides, Settings};

#[derive(Parser)]
#[command(name = "yna", version)]
#[command(about = "Annotate YNAB transactions with the Amazon orders behind them")]
struct Cli {
    /// TOML file with settings (keys are the environment variable names in lower case)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging for this tool's crates
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(flatten)]
    credentials: CredentialArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Default)]
struct CredentialArgs {
    #[arg(long, global = true)]
    ynab_api_key: Option<String>,

    #[arg(long, global = true)]
    ynab_budget_id: Option<String>,

    #[arg(long, global = true)]
    amazon_user: Option<String>,

    #[arg(long, global = true)]
    amazon_password: Option<String>,
}

#[derive(Args, Default, Clone)]
struct AmazonArgs {
    /// Order years to load (e.g. `--years 2024 --years 23`); defaults to the years the window touches
    #[arg(long, value_delimiter = ',')]
    years: Vec<i32>,

    /// How many days of payment transactions to load
    #[arg(long)]
    days: Option<u32>,

    /// Sign out of Amazon and start a fresh session
    #[arg(long)]
    force_logout: bool,
}

#[derive(Args, Default)]
struct RunArgs {
    #[command(flatten)]
    amazon: AmazonArgs,

    /// Show the memos without updating YNAB
    #[arg(long)]
    dry_run: bool,

    /// Ask before each update
    #[arg(long)]
    confirm: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Print Amazon transactions matched to their orders
    PrintAmazon(AmazonArgs),
    /// Print YNAB transactions waiting for a memo
    PrintYnab,
    /// Match transactions and update YNAB (the default)
    Run(RunArgs),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) {
    let fallback = if debug {
        "info,yna=debug,ynamazon_core=debug,ynamazon_reconcile=debug,ynamazon_amazon=debug,ynamazon_ynab=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let command = cli.command.unwrap_or(Command::Run(RunArgs::default()));
    let amazon_args = match &command {
        Command::PrintAmazon(args) => args.clone(),
        Command::Run(args) => args.amazon.clone(),
        Command::PrintYnab => AmazonArgs::default(),
    };

    let overrides = Overrides {
        ynab_api_key: cli.credentials.ynab_api_key,
        ynab_budget_id: cli.credentials.ynab_budget_id,
        amazon_user: cli.credentials.amazon_user,
        amazon_password: cli.credentials.amazon_password,
        order_years: amazon_args.years.clone(),
        transaction_days: amazon_args.days,
    };
    let settings = Settings::load(cli.config.as_deref(), &overrides).context("Invalid configuration")?;
    tracing::debug!("{settings:?}");

    let today = chrono::Local::now().date_naive();
    match command {
        Command::PrintAmazon(args) => {
            commands::print_amazon(&settings, args.force_logout, today).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::PrintYnab => {
            commands::print_ynab(&settings).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(args) => {
            let flags = RunFlags {
                dry_run: args.dry_run,
                confirm: args.confirm,
                force_logout: args.amazon.force_logout,
            };
            let summary = commands::run(&settings, &flags, today).await?;
            println!("{summary}");
            if summary.has_failures() {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}
