use anyhow::Result;
use clap::{Parser, Subcommand};
use parcel_tracker::{
    carriers,
    config::Config,
    fetcher::{Shipment, ShipmentWatcher},
    models::Platform,
    scheduler,
};
use std::str::FromStr;
use std::sync::Arc;
use strum::IntoEnumIterator;

#[derive(Parser)]
#[command(name = "parcel-tracker", version, about = "Track parcels across Taiwanese carriers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Look up one shipment and print its latest status
    Track {
        /// Carrier tag or alias, e.g. 7-11, hct, tcat
        carrier: String,
        order_id: String,
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },
    /// List supported carriers
    Carriers,
    /// Re-poll shipments on CRON_SCHEDULE until all are delivered
    Watch {
        /// Shipments written as carrier:order-id
        #[arg(required = true)]
        shipments: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Carriers => {
            for platform in Platform::iter() {
                println!("{}", platform);
            }
        }
        Command::Track {
            carrier,
            order_id,
            json,
        } => {
            let Ok(platform) = Platform::from_str(carrier.trim()) else {
                eprintln!("Unknown carrier: {}", carrier);
                std::process::exit(2);
            };

            let tracker = carriers::tracker_for(platform, &config);
            let Some(info) = tracker.track_status(&order_id).await else {
                println!("❔ No information available for {}", order_id);
                std::process::exit(1);
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("🚚 Carrier: {}", info.platform());
                println!("📦 Tracking: {}", info.order_id());
                println!("📍 Status: {}", info.status());
                println!("🕒 Time: {}", info.time().unwrap_or("-"));
                println!("✅ Delivered: {}", if info.is_delivered() { "yes" } else { "no" });
            }
        }
        Command::Watch { shipments } => {
            let mut parsed = Vec::with_capacity(shipments.len());
            for shipment in &shipments {
                match Shipment::from_str(shipment) {
                    Ok(s) => parsed.push(s),
                    Err(e) => {
                        eprintln!("Invalid shipment '{}': {}", shipment, e);
                        std::process::exit(2);
                    }
                }
            }

            println!("Cron schedule: {}", config.cron_schedule);
            println!("Watching {} shipment(s)", parsed.len());
            println!("================================");

            let watcher = Arc::new(ShipmentWatcher::new(config.clone(), parsed));
            scheduler::create_and_run_scheduler(config, watcher).await?;
        }
    }

    Ok(())
}
