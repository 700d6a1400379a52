use anyhow::{Context, bail};
use chrono::{NaiveDate, Utc};
use clap::{Arg, ArgMatches, Command, value_parser};
use common::config::Settings;
use common::logging::init_logging;
use ingest::IngestRequest;
use tracing::info;

const DEFAULT_CONFIG: &str = "config/lakehouse.toml";

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Sets a custom config file")
}

fn cli() -> Command {
    Command::new("lakehouse-cli")
        .version("1.0")
        .about("Ingests ONS reservoir time series into a partitioned Parquet lake")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("serve")
                .about("Run the ingest and query HTTP API")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("ingest")
                .about("Run one ingestion; defaults to yesterday in the publisher's time zone")
                .arg(config_arg())
                .arg(
                    Arg::new("start-date")
                        .long("start-date")
                        .value_name("YYYY-MM-DD")
                        .value_parser(value_parser!(NaiveDate))
                        .requires("end-date"),
                )
                .arg(
                    Arg::new("end-date")
                        .long("end-date")
                        .value_name("YYYY-MM-DD")
                        .value_parser(value_parser!(NaiveDate))
                        .requires("start-date"),
                ),
        )
}

fn load_settings(matches: &ArgMatches) -> anyhow::Result<Settings> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_CONFIG);
    let settings =
        Settings::new(config_path).with_context(|| format!("loading config {}", config_path))?;
    init_logging(settings.log_format);
    info!(config = config_path, "Configuration loaded");
    Ok(settings)
}

fn ingest_request(matches: &ArgMatches) -> IngestRequest {
    let start = matches.get_one::<NaiveDate>("start-date").copied();
    let end = matches.get_one::<NaiveDate>("end-date").copied();
    match (start, end) {
        (Some(start_date), Some(end_date)) => IngestRequest { start_date, end_date },
        _ => {
            let day = lakehouse::publisher_yesterday(Utc::now());
            IngestRequest {
                start_date: day,
                end_date: day,
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("serve", serve_matches)) => {
            let settings = load_settings(serve_matches)?;
            lakehouse::serve(&settings).await.context("API server failed")?;
        }
        Some(("ingest", ingest_matches)) => {
            let settings = load_settings(ingest_matches)?;
            let request = ingest_request(ingest_matches);
            let summary = lakehouse::ingest_once(&settings, request)
                .await
                .context("ingestion failed")?;
            info!(
                start = %request.start_date,
                end = %request.end_date,
                total_records_saved = summary.total_records_saved,
                skipped = summary.skipped_resources.len(),
                "Ingestion complete"
            );
        }
        _ => bail!("No subcommand specified. Use --help for usage information."),
    }

    Ok(())
}
