use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "tickwire",
    about = "reconnecting push-update client with debounced refresh propagation",
    version
)]
pub struct Args {
    /// Push-update endpoint URL
    #[arg(short, long, default_value = "wss://push.example-dashboard.dev/ws")]
    pub url: String,

    /// Topic to subscribe to (repeatable, e.g. --topic ticks --topic news)
    #[arg(short, long = "topic", default_values_t = vec!["ticks".to_string()])]
    pub topics: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,

    /// Enable metrics server
    #[arg(long)]
    pub metrics: bool,

    /// Metrics server port
    #[arg(long, default_value = "9090")]
    pub metrics_port: u16,

    /// Base reconnection delay in milliseconds (doubles per attempt)
    #[arg(long, default_value = "1000")]
    pub base_delay_ms: u64,

    /// Maximum number of reconnection attempts before giving up (0 for none)
    #[arg(long, default_value = "5")]
    pub max_reconnects: u32,

    /// Debounce window for structural changes (add/remove) in milliseconds
    #[arg(long, default_value = "1200")]
    pub structural_debounce_ms: u64,

    /// Debounce window for high-frequency streaming ticks in milliseconds
    #[arg(long, default_value = "20000")]
    pub streaming_debounce_ms: u64,
}
