use std::process::ExitCode;

use chrono::Local;
use clap::error::ErrorKind;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use in_out_analytics::app::{App, RunOptions};
use in_out_analytics::auth::Credentials;
use in_out_analytics::bigquery::BigQueryHttpClient;
use in_out_analytics::config::{ConfigLoader, PeriodFallback};
use in_out_analytics::error::ElError;
use in_out_analytics::firestore::FirestoreHttpClient;
use in_out_analytics::output::JsonOutput;

#[derive(Parser)]
#[command(name = "in-out-el")]
#[command(about = "Load one month of inbound/outbound movements from Firestore into BigQuery")]
#[command(version)]
struct Cli {
    /// Target year (defaults to $YEAR, then the current year)
    year: Option<i32>,

    /// Target month, 1-12 (defaults to $MONTH, then the current month)
    month: Option<u32>,

    /// Default to the previous calendar month instead of the current one
    #[arg(long)]
    previous_month: bool,

    /// Fetch and normalize without loading into BigQuery
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    if let Err(report) = run(cli) {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ElError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ElError) -> u8 {
    if error.is_configuration() {
        return 1;
    }
    match error {
        ElError::StoreHttp(_)
        | ElError::StoreStatus { .. }
        | ElError::StoreResponse(_)
        | ElError::WarehouseHttp(_)
        | ElError::WarehouseStatus { .. }
        | ElError::WarehouseJob(_)
        | ElError::Auth(_) => 3,
        _ => 1,
    }
}

fn run(cli: Cli) -> miette::Result<()> {
    ConfigLoader::load_dotenv()?;

    let fallback = if cli.previous_month {
        PeriodFallback::PreviousMonth
    } else {
        PeriodFallback::CurrentMonth
    };
    let period = ConfigLoader::resolve_period(
        cli.year,
        cli.month,
        fallback,
        Local::now().date_naive(),
        |key| std::env::var(key).ok(),
    )?;
    let config = ConfigLoader::resolve()?;

    let credentials = Credentials::from_env()?;
    let store = FirestoreHttpClient::new(
        config.project_id.clone(),
        config.database.clone(),
        credentials.clone(),
    )?;
    let warehouse = BigQueryHttpClient::new(config.project_id.clone(), credentials)?;
    let app = App::new(store, warehouse);

    let summary = app.run(
        period,
        &config.destination,
        RunOptions {
            dry_run: cli.dry_run,
        },
    )?;
    JsonOutput::print_summary(&summary).into_diagnostic()?;
    Ok(())
}
