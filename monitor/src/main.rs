use anyhow::{bail, Context, Result};
use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use monitor::config::Config;
use monitor::dispatch::{AlertDispatcher, SENT_TEXT, SENT_TITLE};
use monitor::errors::DispatchError;
use monitor::metrics;
use monitor::model::{Coordinates, LatestReading};
use monitor::profile::{keys, FileProfileStore, ProfileStore};
use monitor::stream::{self, ConnectionState};
use monitor::AlertReceipt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "monitor", about = "Fire and smoke monitor: live telemetry and alert dispatch")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream readings and send an alert when `alert` is typed
    Watch,

    /// Send a single alert once a reading is available
    Alert {
        /// How long to wait for the first reading
        #[arg(long, default_value_t = 10)]
        wait_secs: u64,
    },

    /// Inspect or edit the stored profile
    #[command(subcommand)]
    Profile(ProfileCommand),
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    /// Print every stored field
    Show,

    /// Store one field
    Set { key: String, value: String },

    /// Store the current location
    Locate {
        #[arg(allow_negative_numbers = true)]
        latitude: f64,
        #[arg(allow_negative_numbers = true)]
        longitude: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    cli.config.validate()?;

    match cli.command {
        Command::Watch => watch(&cli.config).await,
        Command::Alert { wait_secs } => alert_once(&cli.config, Duration::from_secs(wait_secs)).await,
        Command::Profile(command) => profile(&cli.config, command).await,
    }
}

async fn open_store(config: &Config) -> Result<Arc<FileProfileStore>> {
    let store = FileProfileStore::open(&config.profile_path)
        .await
        .with_context(|| format!("Failed to open profile {}", config.profile_path.display()))?;
    Ok(Arc::new(store))
}

async fn watch(config: &Config) -> Result<()> {
    info!("Starting monitor");
    info!("Server: {}", config.server_url);
    info!("Profile: {}", config.profile_path.display());

    metrics::init_metrics().context("Failed to register metrics")?;
    if let Some(addr) = &config.metrics_addr {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind metrics listener to {}", addr))?;
        info!("Metrics available at http://{}/metrics", addr);
        let app = Router::new().route("/metrics", get(metrics_handler));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let store = open_store(config).await?;
    let mut stream = stream::start(config.stream_config());
    let dispatcher = AlertDispatcher::new(&config.server_url, store, stream.readings());

    let mut readings = stream.readings();
    let mut states = stream.state_changes();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    println!("Type `alert` and press Enter to notify the authorities. Ctrl-C to quit.");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
            latest = readings.changed() => match latest {
                Some(latest) => print_reading(&latest),
                None => {
                    warn!("Telemetry stream ended");
                    break;
                }
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                if state == ConnectionState::Disconnected {
                    println!("-- disconnected (last reading kept)");
                }
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "alert" | "a" => report(dispatcher.dispatch_alert().await),
                    "" => {}
                    other => println!("Unknown command {:?}; type `alert` to send an alert", other),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    stream.stop().await;
    info!("Shutting down");
    Ok(())
}

async fn alert_once(config: &Config, wait: Duration) -> Result<()> {
    let store = open_store(config).await?;
    let mut stream = stream::start(config.stream_config());
    let dispatcher = AlertDispatcher::new(&config.server_url, store, stream.readings());

    let mut readings = stream.readings();
    if tokio::time::timeout(wait, readings.first()).await.is_err() {
        warn!("No reading within {:?}", wait);
    }

    let result = dispatcher.dispatch_alert().await;
    stream.stop().await;

    let failed = result.is_err();
    report(result);
    if failed {
        bail!("alert was not delivered");
    }
    Ok(())
}

async fn profile(config: &Config, command: ProfileCommand) -> Result<()> {
    let store = open_store(config).await?;

    match command {
        ProfileCommand::Show => {
            let entries = store.entries().await;
            for key in keys::ALL {
                let value = entries.get(key).map(String::as_str).unwrap_or("-");
                println!("{:<16} {}", key, value);
            }
            match store.resolve_location().await {
                Some(c) => println!("{:<16} lat {} lon {}", "(resolved)", c.latitude, c.longitude),
                None => println!("{:<16} none", "(resolved)"),
            }
        }
        ProfileCommand::Set { key, value } => {
            if !keys::ALL.contains(&key.as_str()) {
                warn!("{:?} is not a field the alert uses", key);
            }
            store.set(&key, &value).await?;
            println!("Saved {}", key);
        }
        ProfileCommand::Locate {
            latitude,
            longitude,
        } => {
            if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
                bail!("coordinates out of range: lat {} lon {}", latitude, longitude);
            }
            store
                .set_location(Coordinates {
                    longitude,
                    latitude,
                })
                .await?;
            println!("Location saved");
        }
    }
    Ok(())
}

fn print_reading(latest: &LatestReading) {
    let r = &latest.reading;
    println!(
        "[{}] temp {:.1}°C  humidity {:.1}%  smoke {:.0}  flame {}",
        latest.received_at.format("%H:%M:%S"),
        r.temperature,
        r.humidity,
        r.smoke_level,
        if r.flame_detected { "YES" } else { "no" }
    );
}

fn report(result: std::result::Result<AlertReceipt, DispatchError>) {
    match result {
        Ok(receipt) => {
            println!("{}: {}", SENT_TITLE, SENT_TEXT);
            if let Some(message) = receipt.message {
                println!("  server said: {}", message);
            }
        }
        Err(e) => println!("{}: {}", e.title(), e),
    }
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
