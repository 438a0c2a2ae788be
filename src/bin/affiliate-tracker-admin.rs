use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};

use affiliate_tracker::config::Config;
use affiliate_tracker::models::{MetaValue, Metadata};
use affiliate_tracker::storage;
use affiliate_tracker::token::LinkGenerator;

#[derive(Parser)]
#[command(name = "affiliate-tracker-admin")]
#[command(about = "Affiliate tracker management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a signed tracking link for a destination
    Generate {
        /// Destination URL
        url: String,
        /// Metadata entry as key=value (repeatable); JSON scalars keep their type
        #[arg(short, long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
        /// Skip the configured default metadata
        #[arg(long)]
        no_defaults: bool,
    },
    /// Verify a payload/signature pair and print its contents
    Decode {
        payload: String,
        signature: String,
    },
    /// Show click counts
    Stats,
}

fn parse_meta(entries: &[String]) -> Result<Metadata> {
    entries
        .iter()
        .map(|entry| {
            let (key, raw) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("metadata entry '{entry}' is not key=value"))?;
            let value = serde_json::from_str::<MetaValue>(raw)
                .unwrap_or_else(|_| MetaValue::Text(raw.to_string()));
            Ok((key.to_string(), value))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Generate {
            url,
            meta,
            no_defaults,
        } => {
            let generator = LinkGenerator::from_config(&config.tracker)?;
            let metadata = parse_meta(&meta)?;
            let link = if no_defaults {
                generator.generate(&url, &metadata)?
            } else {
                generator.track_url(&url, &metadata)?
            };
            println!("{link}");
        }
        Commands::Decode { payload, signature } => {
            let generator = LinkGenerator::from_config(&config.tracker)?;
            let token = generator
                .codec()
                .decode(&payload, &signature)
                .context("link rejected")?;
            println!("Destination: {}", token.destination_url);
            if token.metadata.is_empty() {
                println!("Metadata:    (none)");
            } else {
                println!("Metadata:");
                for (key, value) in &token.metadata {
                    println!("  {:<20} {}", key, serde_json::to_string(value)?);
                }
            }
        }
        Commands::Stats => {
            let store = storage::connect(&config.database).await?;
            store.init().await?;

            let now = Utc::now();
            let today = now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|t| t.and_utc().timestamp())
                .unwrap_or_default();
            let week_ago = (now - Duration::days(7)).timestamp();

            let daily = store.summary(today).await?;
            let weekly = store.summary(week_ago).await?;

            println!("{:<22} {}", "Total clicks", daily.total);
            println!("{:<22} {}", "Today", daily.since);
            println!("{:<22} {}", "Last 7 days", weekly.since);
            println!("{:<22} {}", "Unique destinations", daily.unique_destinations);
        }
    }

    Ok(())
}
