/// file: src/config.rs
/// description: Runtime configuration folded from CLI arguments
use crate::cli::Args;
use anyhow::Result;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub channel: ChannelConfig,
    pub refresh: RefreshConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: Url,
    pub topics: Vec<String>,
    pub base_delay: Duration,
    pub max_reconnects: u32,
}

/// Debounce windows for refresh propagation. The split between a short
/// structural window and a long streaming window comes from the dashboard's
/// tuning for perceived smoothness; both are product knobs, not invariants.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub structural_debounce: Duration,
    pub streaming_debounce: Duration,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self> {
        let url = Url::parse(&args.url)?;

        Ok(Config {
            channel: ChannelConfig {
                url,
                topics: args.topics.clone(),
                base_delay: Duration::from_millis(args.base_delay_ms),
                max_reconnects: args.max_reconnects,
            },
            refresh: RefreshConfig {
                structural_debounce: Duration::from_millis(args.structural_debounce_ms),
                streaming_debounce: Duration::from_millis(args.streaming_debounce_ms),
            },
            metrics: MetricsConfig {
                enabled: args.metrics,
                port: args.metrics_port,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_fold_into_typed_config() {
        let args = Args::parse_from(["tickwire"]);
        let config = Config::from_args(&args).unwrap();

        assert_eq!(config.channel.topics, vec!["ticks".to_string()]);
        assert_eq!(config.channel.base_delay, Duration::from_millis(1000));
        assert_eq!(config.channel.max_reconnects, 5);
        assert_eq!(
            config.refresh.structural_debounce,
            Duration::from_millis(1200)
        );
        assert_eq!(
            config.refresh.streaming_debounce,
            Duration::from_millis(20_000)
        );
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn rejects_a_malformed_url() {
        let args = Args::parse_from(["tickwire", "--url", "not a url"]);
        assert!(Config::from_args(&args).is_err());
    }
}
