use anyhow::Result;
use clap::Parser;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tickwire::{
    ConnectionState, ReconnectingChannel, RetryPolicy, UpdateCoalescer, WsTransport, cli::Args,
    config::Config, monitoring::setup_metrics, tracing_setup::setup_tracing, types::PriceTick,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

const MARKET_REFRESH_KEY: &str = "market";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_tracing(&args.log_level, args.json_logs)?;

    info!("Starting tickwire v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_args(&args)?;

    if config.metrics.enabled {
        setup_metrics(config.metrics.port).await?;
    }

    let channel = ReconnectingChannel::new(
        WsTransport::new(config.channel.url.clone()),
        RetryPolicy::new(config.channel.max_reconnects, config.channel.base_delay),
    );

    // Latest quote per symbol, refreshed in bulk by the coalesced action
    // rather than once per tick.
    let quotes: Arc<Mutex<HashMap<String, PriceTick>>> = Arc::new(Mutex::new(HashMap::new()));
    let coalescer = Arc::new(UpdateCoalescer::new());

    for topic in &config.channel.topics {
        channel.subscribe(topic);
        let quotes = Arc::clone(&quotes);
        let coalescer = Arc::clone(&coalescer);
        let streaming_debounce = config.refresh.streaming_debounce;
        channel.on_message(topic, move |payload| {
            let tick: PriceTick = match serde_json::from_value(payload.clone()) {
                Ok(tick) => tick,
                Err(e) => {
                    warn!("dropping unparseable tick payload: {}", e);
                    return;
                }
            };
            quotes
                .lock()
                .unwrap()
                .insert(tick.symbol.clone(), tick.clone());

            let snapshot = Arc::clone(&quotes);
            coalescer.signal(MARKET_REFRESH_KEY, streaming_debounce, move || {
                print_snapshot(&snapshot.lock().unwrap());
            });
        });
    }

    let (failed_tx, mut failed_rx) = mpsc::channel::<()>(1);
    channel.on_state_change(move |state| {
        info!("connection state: {:?}", state);
        if state == ConnectionState::Failed {
            let _ = failed_tx.try_send(());
        }
    });

    channel.connect();
    info!(
        "Subscribed to {:?} on {}. Press Ctrl+C to shutdown...",
        config.channel.topics, config.channel.url
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
        _ = failed_rx.recv() => warn!("connection failed permanently, shutting down"),
    }

    // Don't let a pending refresh window swallow the final snapshot.
    coalescer.flush_now(MARKET_REFRESH_KEY);
    channel.close();

    info!("Client stopped successfully");
    Ok(())
}

fn print_snapshot(quotes: &HashMap<String, PriceTick>) {
    if quotes.is_empty() {
        return;
    }
    let mut symbols: Vec<_> = quotes.keys().collect();
    symbols.sort();
    for symbol in symbols {
        let tick = &quotes[symbol];
        info!(
            "{:<8} {:>12.4} {:>+7.2}% @ {}",
            tick.symbol, tick.price, tick.change_percent, tick.ts
        );
    }
}
