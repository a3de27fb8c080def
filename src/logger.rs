use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install the global fmt subscriber. `LATENCY_DASH_LOG` wins over
/// `RUST_LOG`; without either the level is `info` (`debug` if verbose).
pub fn init_logging(verbose: bool) {
    let filter = std::env::var("LATENCY_DASH_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map_or_else(
            |_| {
                if verbose {
                    EnvFilter::new("debug")
                } else {
                    EnvFilter::new("info")
                }
            },
            |value| EnvFilter::try_new(value).unwrap_or_else(|_| EnvFilter::new("info")),
        );

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set global default subscriber: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(false);
        init_logging(true);
    }
}
