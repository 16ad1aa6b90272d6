use std::error::Error;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use covid_service::config::{Config, DEFAULT_CONFIG_PATH};
use covid_service::logging::{self, DataSource};
use covid_service::server;
use covid_service::service::QueryService;
use covid_service::verify;

#[derive(Debug, Parser)]
#[command(name = "covid_service", version, about = "COVID-19 time-series query API")]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH, help = "Path to the TOML configuration")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve(ServeArgs),
    /// Check the warehouse and annotation store
    Verify(VerifyArgs),
    /// Print one country's forecast as JSON
    Forecast(ForecastArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long, help = "Listen address, overrides [server] bind")]
    bind: Option<String>,
}

#[derive(Debug, Args)]
struct VerifyArgs {
    #[arg(long, default_value_t = 5, help = "Countries to sample")]
    sample: usize,

    #[arg(long, default_value_t = false, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct ForecastArgs {
    country: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let level = config.logging.min_level()?;
    logging::init_logger(level, config.logging.file.as_deref(), config.logging.console_timestamps);
    logging::info(
        DataSource::System,
        None,
        &format!("Configuration from {} (log level {})", cli.config, level),
    );

    // Blocking clients (postgres, reqwest::blocking) are built here, outside
    // the async runtime.
    let service = QueryService::from_config(&config)?;

    match cli.command {
        Commands::Serve(args) => {
            let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
            let state = Arc::new(service);
            let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            let served = runtime.block_on(server::serve(Arc::clone(&state), &bind));
            // Blocking clients must be released after the runtime is gone.
            drop(runtime);
            drop(state);
            served?;
        }
        Commands::Verify(args) => {
            let report = verify::run_verification(service.store(), service.annotation_store(), args.sample);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                verify::print_summary(&report);
            }
            if report.status == verify::VerificationStatus::Failed {
                std::process::exit(1);
            }
        }
        Commands::Forecast(args) => {
            let points = service.get_forecast(&args.country)?;
            if points.is_empty() {
                logging::warn(
                    DataSource::Forecast,
                    Some(&args.country),
                    "No forecast available for this country",
                );
            }
            println!("{}", serde_json::to_string_pretty(&points)?);
        }
    }

    Ok(())
}
