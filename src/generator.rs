use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;

use crate::error::IngestError;
use crate::metrics::{unix_nanos_now, Aggregator, Event, Metadata};
use crate::shutdown::ShutdownSender;

// ─── Configuration ───────────────────────────────────────────────

/// One synthetic producer: a target, a pool of keys and a pacing range.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub target: String,
    pub key_prefix: String,
    pub num_keys: usize,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub min_payload: u32,
    pub max_payload: u32,
    /// metadata name → candidate values, one picked per event
    pub metadata: Vec<(String, Vec<String>)>,
    /// metadata name → value → interval multiplier
    pub rules: Vec<(String, Vec<(String, f64)>)>,
}

impl GeneratorConfig {
    /// Multiplier for one event's metadata; unknown values count as 1.0.
    fn multiplier(&self, metadata: &Metadata) -> f64 {
        self.rules
            .iter()
            .filter_map(|(name, values)| {
                let chosen = metadata.get(name)?;
                values.iter().find(|(value, _)| value == chosen).map(|(_, m)| *m)
            })
            .product()
    }

    /// Next sleep: uniform in [min, max], scaled by metadata, never below min.
    fn next_interval(&self, rng: &mut StdRng, metadata: &Metadata) -> Duration {
        let min = self.min_interval.as_secs_f64();
        let max = self.max_interval.as_secs_f64().max(min);
        let base = if max > min { rng.gen_range(min..=max) } else { min };
        Duration::from_secs_f64(base * self.multiplier(metadata)).max(self.min_interval)
    }

    fn next_payload(&self, rng: &mut StdRng) -> u32 {
        let max = self.max_payload.max(self.min_payload);
        rng.gen_range(self.min_payload..=max)
    }

    fn next_event(&self, rng: &mut StdRng) -> Event {
        let index = rng.gen_range(0..self.num_keys.max(1));
        let metadata: Metadata = self
            .metadata
            .iter()
            .filter_map(|(name, values)| values.choose(rng).map(|v| (name.clone(), v.clone())))
            .collect();

        Event {
            target: self.target.clone(),
            key: format!("{}{}", self.key_prefix, key_suffix(index)),
            server_timestamp_nanos: unix_nanos_now(),
            payload_size: self.next_payload(rng),
            metadata,
        }
    }
}

/// 0 → "A", 25 → "Z", 26 → "AA" …
fn key_suffix(mut index: usize) -> String {
    let mut suffix = Vec::new();
    loop {
        suffix.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    suffix.reverse();
    String::from_utf8_lossy(&suffix).into_owned()
}

fn pairs(items: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
    items
        .iter()
        .map(|(name, values)| (name.to_string(), values.iter().map(|v| v.to_string()).collect()))
        .collect()
}

fn tier_region_rules() -> Vec<(String, Vec<(String, f64)>)> {
    let rule = |name: &str, values: &[(&str, f64)]| {
        (
            name.to_string(),
            values.iter().map(|(v, m)| (v.to_string(), *m)).collect(),
        )
    };
    vec![
        rule("tier", &[("free", 1.5), ("premium", 1.0), ("enterprise", 0.7)]),
        rule("region", &[("us-east", 1.0), ("us-west", 1.1), ("eu-west", 1.4)]),
    ]
}

/// The two demo producers started by the binary.
pub fn demo_configs() -> Vec<GeneratorConfig> {
    vec![
        GeneratorConfig {
            target: "prod-us-east".into(),
            key_prefix: "service-".into(),
            num_keys: 10,
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(1000),
            min_payload: 100,
            max_payload: 1000,
            metadata: pairs(&[
                ("tier", &["free", "premium", "enterprise"]),
                ("region", &["us-east", "us-west"]),
            ]),
            rules: tier_region_rules(),
        },
        GeneratorConfig {
            target: "prod-eu-west".into(),
            key_prefix: "service-".into(),
            num_keys: 8,
            min_interval: Duration::from_millis(150),
            max_interval: Duration::from_millis(1500),
            min_payload: 80,
            max_payload: 800,
            metadata: pairs(&[
                ("tier", &["premium", "enterprise"]),
                ("region", &["eu-west"]),
            ]),
            rules: tier_region_rules(),
        },
    ]
}

// ─── Public entry point ──────────────────────────────────────────

/// Spawns one task per config. They run until shutdown is signalled.
pub fn spawn_all(
    aggregator: Arc<Aggregator>,
    configs: Vec<GeneratorConfig>,
    shutdown: &ShutdownSender,
) -> Vec<tokio::task::JoinHandle<()>> {
    configs
        .into_iter()
        .enumerate()
        .map(|(id, config)| {
            let aggregator = aggregator.clone();
            let mut shutdown = shutdown.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.recv() => {}
                    _ = worker(id as u64, aggregator, config) => {}
                }
            })
        })
        .collect()
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker(id: u64, aggregator: Arc<Aggregator>, config: GeneratorConfig) {
    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(1000 + id);
    tracing::info!(target_id = %config.target, keys = config.num_keys, "generator started");

    loop {
        let event = config.next_event(&mut rng);
        let pause = config.next_interval(&mut rng, &event.metadata);

        match aggregator.try_ingest(event) {
            Ok(()) | Err(IngestError::QueueFull) => {}
            Err(IngestError::Closed) => break,
        }

        tokio::time::sleep(pause).await;
    }
    tracing::info!(target_id = %config.target, "generator stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::AggregatorConfig;

    fn config() -> GeneratorConfig {
        GeneratorConfig {
            target: "t".into(),
            key_prefix: "k-".into(),
            num_keys: 3,
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(200),
            min_payload: 10,
            max_payload: 20,
            metadata: pairs(&[("tier", &["free", "enterprise"])]),
            rules: tier_region_rules(),
        }
    }

    #[test]
    fn key_suffixes_are_spreadsheet_letters() {
        assert_eq!(key_suffix(0), "A");
        assert_eq!(key_suffix(25), "Z");
        assert_eq!(key_suffix(26), "AA");
        assert_eq!(key_suffix(27), "AB");
    }

    #[test]
    fn events_stay_within_configured_bounds() {
        let cfg = config();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let event = cfg.next_event(&mut rng);
            assert_eq!(event.target, "t");
            assert!(["k-A", "k-B", "k-C"].contains(&event.key.as_str()));
            assert!((10..=20).contains(&event.payload_size));
            assert!(event.metadata.contains_key("tier"));

            let pause = cfg.next_interval(&mut rng, &event.metadata);
            assert!(pause >= cfg.min_interval);
            assert!(pause <= Duration::from_millis(300));
        }
    }

    #[test]
    fn multipliers_compose_across_metadata() {
        let cfg = config();
        let mut metadata = Metadata::new();
        metadata.insert("tier".into(), "free".into());
        metadata.insert("region".into(), "eu-west".into());
        assert!((cfg.multiplier(&metadata) - 1.5 * 1.4).abs() < 1e-9);

        metadata.insert("tier".into(), "unknown".into());
        assert!((cfg.multiplier(&metadata) - 1.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn generators_feed_the_queue_until_shutdown() {
        let (aggregator, mut events) = Aggregator::new(AggregatorConfig::default());
        let aggregator = Arc::new(aggregator);
        let shutdown = crate::shutdown::channel();

        let handles = spawn_all(aggregator, vec![config()], &shutdown);
        let first = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.target, "t");

        shutdown.send(()).unwrap();
        for h in handles {
            h.await.unwrap();
        }
    }
}
