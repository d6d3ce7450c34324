// src/main.rs
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use voyon_aggregator::{
    load_config, utils::setup_logging, Aggregator, AttributeKind, EntityKind, FlightQuery,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Travel data aggregation: resolve names, enrich them, search flights")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a name and fetch its attributes
    Lookup {
        name: String,
        /// city, country, place, airline or airport
        #[arg(long, default_value = "city")]
        kind: EntityKind,
        /// Comma-separated attributes; defaults to every single-entity attribute
        #[arg(long, value_delimiter = ',')]
        attributes: Vec<AttributeKind>,
    },
    /// Driving route between two places
    Route { origin: String, destination: String },
    /// Flight offers between the airports nearest two cities
    Flights {
        origin: String,
        destination: String,
        /// Departure date, YYYY-MM-DD
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, default_value_t = 1)]
        adults: u32,
        #[arg(long, default_value_t = 20)]
        max: u32,
        /// Only offers flown by this carrier code
        #[arg(long)]
        carrier: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config().context("invalid configuration")?;
    setup_logging(config.log_level).context("failed to initialize logging")?;
    config.validate_and_log();
    info!("voyon-aggregator {} starting", env!("CARGO_PKG_VERSION"));

    let aggregator = Aggregator::from_config(&config).context("failed to build HTTP client")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight requests");
            on_interrupt.cancel();
        }
    });

    match args.command {
        Command::Lookup {
            name,
            kind,
            attributes,
        } => {
            let attributes = if attributes.is_empty() {
                AttributeKind::SINGLE_ENTITY.to_vec()
            } else {
                attributes
            };
            let view = aggregator
                .view_model(&name, kind, &attributes, &cancel)
                .await
                .with_context(|| format!("lookup of {} '{}' failed", kind, name))?;
            print_json(&view)?;
        }
        Command::Route {
            origin,
            destination,
        } => {
            let route = aggregator
                .route_between(&origin, &destination, &cancel)
                .await
                .with_context(|| format!("no route from '{}' to '{}'", origin, destination))?;
            print_json(&route)?;
        }
        Command::Flights {
            origin,
            destination,
            date,
            adults,
            max,
            carrier,
        } => {
            let query = FlightQuery {
                departure_date: date,
                adults,
                max_results: max,
                carrier,
            };
            let view = aggregator
                .search_flights(&origin, &destination, &query, &cancel)
                .await
                .with_context(|| format!("flight search {} -> {} failed", origin, destination))?;
            print_json(&view)?;
        }
    }

    aggregator.log_cache_stats();
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
