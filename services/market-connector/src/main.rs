//! Market Connector Service
//!
//! Streams normalized ticks for one broker session and logs what reaches
//! the tick bus. Credentials come from `{BROKER}_AUTH_TOKEN`,
//! `{BROKER}_FEED_TOKEN`, `{BROKER}_API_KEY` and `{BROKER}_CLIENT_CODE`.

use anyhow::{Result, anyhow};
use auth::EnvCredentialStore;
use clap::Parser;
use market_connector::{ConnectorConfig, MarketConnectorService, WebSocketTransport};
use services_common::{EventBusError, TickBus};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Market Connector CLI
#[derive(Parser)]
#[clap(name = "market-connector")]
#[clap(about = "Multi-broker market data ingestion")]
struct Cli {
    /// Broker to connect to
    #[clap(long, default_value = "zerodha")]
    broker: String,

    /// Session id used for credential lookup
    #[clap(long, default_value = "default")]
    session: String,

    /// Instruments as EXCHANGE:SYMBOL, repeatable
    #[clap(long = "subscribe", value_name = "EXCHANGE:SYMBOL")]
    instruments: Vec<String>,

    /// 1 = LTP, 2 = Quote, 3 = Depth
    #[clap(long, default_value = "2")]
    mode: u8,

    /// Depth levels per side for depth mode
    #[clap(long, default_value = "5")]
    depth: u8,

    /// Bus topic pattern to log
    #[clap(long, default_value = "*")]
    topic: String,

    /// JSON config file, overrides MARKET_CONNECTOR_CONFIG
    #[clap(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "market_connector=info,services_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(broker = %cli.broker, session = %cli.session, "Starting Market Connector Service");

    let config = match &cli.config {
        Some(path) => {
            let mut config = ConnectorConfig::from_json_file(path)?;
            config.apply_overrides(|name| std::env::var(name).ok())?;
            config
        }
        None => ConnectorConfig::load()?,
    };

    let bus = Arc::new(TickBus::new(config.bus.clone()));
    let transport = Arc::new(WebSocketTransport::new(config.inbound_queue_size));
    let credentials = Arc::new(EnvCredentialStore::from_env(&cli.broker));
    let service = MarketConnectorService::new(config, Arc::clone(&bus), transport, credentials);
    service.load_instruments()?;

    let mut ticks = bus.subscribe(&cli.topic).map_err(|e| anyhow!("{e}"))?;

    service
        .initialize(&cli.broker, &cli.session)
        .map_err(|e| anyhow!("{e}"))?;
    service
        .connect(&cli.broker, &cli.session)
        .await
        .map_err(|e| anyhow!("{e}"))?;

    for instrument in &cli.instruments {
        let Some((exchange, symbol)) = instrument.split_once(':') else {
            warn!(instrument = %instrument, "Expected EXCHANGE:SYMBOL, skipping");
            continue;
        };
        match service.subscribe(&cli.broker, &cli.session, symbol, exchange, cli.mode, cli.depth) {
            Ok(response) => info!(
                instrument = %instrument,
                actual_depth = response.actual_depth,
                is_fallback = response.is_fallback,
                "Subscribed"
            ),
            Err(e) => error!(instrument = %instrument, error = %e, "Subscribe failed"),
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            received = ticks.recv() => match received {
                Ok(envelope) => info!(
                    topic = %envelope.topic,
                    ltp = envelope.message.ltp,
                    volume = envelope.message.volume,
                    "Tick"
                ),
                Err(EventBusError::Lagged(missed)) => warn!(missed, "Tick logger lagged"),
                Err(e) => {
                    error!(error = %e, "Tick bus closed");
                    break;
                }
            },
        }
    }

    service.shutdown().await;
    Ok(())
}
