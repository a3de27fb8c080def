use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::hub::DEFAULT_CONSUMER_BUFFER;
use crate::metrics::aggregator::{DEFAULT_GRACE_PERIOD, DEFAULT_QUEUE_CAPACITY};
use crate::metrics::window::DEFAULT_WINDOW_CAPACITY;
use crate::metrics::AggregatorConfig;

#[derive(Debug, Parser, Clone)]
#[command(
    version,
    about = "Live per-key interval latency statistics, pushed to WebSocket subscribers."
)]
pub struct ServerArgs {
    /// Address to bind
    #[arg(long, env = "LATENCY_DASH_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Timestamps retained per series
    #[arg(
        long = "window-capacity",
        env = "LATENCY_DASH_WINDOW",
        default_value_t = DEFAULT_WINDOW_CAPACITY,
        value_parser = parse_positive_usize
    )]
    pub window_capacity: usize,

    /// Inbound events buffered before producers are refused
    #[arg(
        long = "queue-capacity",
        env = "LATENCY_DASH_QUEUE",
        default_value_t = DEFAULT_QUEUE_CAPACITY
    )]
    pub queue_capacity: usize,

    /// Outbound messages buffered per consumer before it is dropped
    #[arg(
        long = "consumer-buffer",
        env = "LATENCY_DASH_CONSUMER_BUFFER",
        default_value_t = DEFAULT_CONSUMER_BUFFER
    )]
    pub consumer_buffer: usize,

    /// Seconds an unwatched target keeps accumulating before it is purged
    #[arg(
        long = "grace-period-secs",
        env = "LATENCY_DASH_GRACE_SECS",
        default_value_t = DEFAULT_GRACE_PERIOD.as_secs()
    )]
    pub grace_period_secs: u64,

    /// Seconds between sweeps for expired targets
    #[arg(long = "sweep-interval-secs", env = "LATENCY_DASH_SWEEP_SECS", default_value_t = 30)]
    pub sweep_interval_secs: u64,

    /// Directory served for any path not matched by the API
    #[arg(long = "static-dir", env = "LATENCY_DASH_STATIC", default_value = "static")]
    pub static_dir: String,

    /// Do not start the built-in synthetic event generators
    #[arg(long = "no-demo")]
    pub no_demo: bool,

    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_owned()),
        Ok(n) => Ok(n),
        Err(err) => Err(err.to_string()),
    }
}

impl ServerArgs {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            window_capacity: self.window_capacity,
            queue_capacity: self.queue_capacity,
            grace_period: Duration::from_secs(self.grace_period_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_library_defaults() {
        let args = ServerArgs::try_parse_from(["latency-dash"]).unwrap();
        assert!(!args.no_demo);
        assert!(!args.verbose);

        let cfg = args.aggregator_config();
        let defaults = AggregatorConfig::default();
        assert_eq!(cfg.window_capacity, defaults.window_capacity);
        assert_eq!(cfg.queue_capacity, defaults.queue_capacity);
        assert_eq!(cfg.grace_period, defaults.grace_period);
        assert_eq!(args.sweep_interval(), Duration::from_secs(30));
    }

    #[test]
    fn flags_override_defaults() {
        let args = ServerArgs::try_parse_from([
            "latency-dash",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--window-capacity",
            "10",
            "--grace-period-secs",
            "5",
            "--no-demo",
        ])
        .unwrap();
        assert_eq!(args.listen_addr().to_string(), "127.0.0.1:9000");
        assert_eq!(args.aggregator_config().window_capacity, 10);
        assert_eq!(
            args.aggregator_config().grace_period,
            Duration::from_secs(5)
        );
        assert!(args.no_demo);
    }

    #[test]
    fn zero_window_is_rejected() {
        let parsed = ServerArgs::try_parse_from(["latency-dash", "--window-capacity", "0"]);
        assert!(parsed.is_err());
    }
}
