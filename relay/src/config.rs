//! Top-level configuration for a relay process.
//!
//! This module aggregates configuration for:
//!
//! - the pipeline coordinator (`PipelineConfig`),
//! - bulk submission (`SubmissionConfig`),
//! - the dedup cache and its snapshot (`DedupConfig`),
//! - the RocksDB-backed upstream log (`RocksDbLogConfig`),
//! - the ledger connection (`LedgerConfig`),
//! - the metrics exporter (`MetricsConfig`),
//! - and the HTTP intake (`IntakeConfig`).
//!
//! [`RelayConfig::from_env`] reads everything from the process environment
//! once at startup. Unset variables fall back to the `Default` impls.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::codec::KeySource;
use crate::dedup::DedupConfig;
use crate::ledger::LedgerConfig;
use crate::pipeline::PipelineConfig;
use crate::submission::SubmissionConfig;
use crate::types::Cursor;
use crate::upstream::RocksDbLogConfig;

/// Configuration for the Prometheus metrics exporter.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Whether to run a `/metrics` HTTP exporter.
    pub enabled: bool,
    /// Address to bind the metrics HTTP server to.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9898)),
        }
    }
}

/// Configuration for the HTTP intake.
#[derive(Clone, Debug)]
pub struct IntakeConfig {
    pub listen_addr: SocketAddr,
    /// Capacity of the queue between request handlers and the appender.
    pub queue_depth: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9997)),
            queue_depth: 1024,
        }
    }
}

/// Everything needed to wire up a relay process.
#[derive(Clone, Debug, Default)]
pub struct RelayConfig {
    pub pipeline: PipelineConfig,
    pub submission: SubmissionConfig,
    pub dedup: DedupConfig,
    pub log: RocksDbLogConfig,
    pub ledger: LedgerConfig,
    pub metrics: MetricsConfig,
    pub intake: IntakeConfig,
}

/// Errors produced while reading configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    Missing(&'static str),
    /// A variable is set but cannot be parsed.
    Invalid { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(var) => write!(f, "missing required variable {var}"),
            ConfigError::Invalid { var, value } => {
                write!(f, "invalid value for {var}: {value:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl RelayConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = RelayConfig::default();

        let ledger = LedgerConfig {
            rpc_url: env.string("RPC_URL", defaults.ledger.rpc_url),
            chain_id: env.parse("NETWORK_ID", defaults.ledger.chain_id)?,
            contract_address: env.required("CONTRACT_ADDRESS")?,
            private_key: env.required("PK")?,
            poll_interval_ms: env.parse("RECEIPT_POLL_MS", defaults.ledger.poll_interval_ms)?,
        };

        let pipeline = PipelineConfig {
            batch_size: env.positive("BATCH_SIZE", defaults.pipeline.batch_size)?,
            start_cursor: Cursor(
                env.parse("STARTING_HASH_ID", defaults.pipeline.start_cursor.offset())?,
            ),
            read_count: env.positive("READ_COUNT", defaults.pipeline.read_count)?,
            read_wait: env.millis("READ_WAIT_MS", defaults.pipeline.read_wait)?,
            flush_interval: env.millis("FLUSH_INTERVAL_MS", defaults.pipeline.flush_interval)?,
            submit_delay: env.millis("SUBMIT_DELAY_MS", defaults.pipeline.submit_delay)?,
            retry_interval: env.millis("RETRY_INTERVAL_MS", defaults.pipeline.retry_interval)?,
            max_retries: env.optional("MAX_RETRIES")?,
            key_source: env.key_source("KEY_SOURCE", defaults.pipeline.key_source)?,
        };

        let submission = SubmissionConfig {
            confirmations: env.parse("CONFIRMATIONS", defaults.submission.confirmations)?,
            max_fee_per_gas: env
                .optional("MAX_FEE_PER_GAS")?
                .or(defaults.submission.max_fee_per_gas),
            max_priority_fee_per_gas: env
                .optional("MAX_PRIORITY_FEE_PER_GAS")?
                .or(defaults.submission.max_priority_fee_per_gas),
            rpc_timeout: env.secs("RPC_TIMEOUT_SECS", defaults.submission.rpc_timeout)?,
            receipt_timeout: env.secs("RECEIPT_TIMEOUT_SECS", defaults.submission.receipt_timeout)?,
            ..defaults.submission
        };

        let dedup = DedupConfig {
            capacity: env.positive("DEDUP_CAPACITY", defaults.dedup.capacity)?,
            false_positive_rate: env.rate("DEDUP_FP_RATE", defaults.dedup.false_positive_rate)?,
            strict: env.flag("DEDUP_STRICT", defaults.dedup.strict)?,
            state_path: env.string("DEDUP_STATE_PATH", defaults.dedup.state_path),
        };

        let log = RocksDbLogConfig {
            path: env.string("LOG_DB_PATH", defaults.log.path),
            ..defaults.log
        };

        let metrics = MetricsConfig {
            enabled: env.flag("METRICS_ENABLED", defaults.metrics.enabled)?,
            listen_addr: env.parse("METRICS_ADDR", defaults.metrics.listen_addr)?,
        };

        let port: u16 = env.parse("PORT", defaults.intake.listen_addr.port())?;
        let intake = IntakeConfig {
            listen_addr: SocketAddr::new(defaults.intake.listen_addr.ip(), port),
            queue_depth: env.positive("INTAKE_QUEUE", defaults.intake.queue_depth)?,
        };

        Ok(RelayConfig {
            pipeline,
            submission,
            dedup,
            log,
            ledger,
            metrics,
            intake,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; empty counts as unset.
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, var: &str, default: String) -> String {
        self.get(var).unwrap_or(default)
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.get(var).ok_or(ConfigError::Missing(var))
    }

    fn optional<T: FromStr>(&self, var: &'static str) -> Result<Option<T>, ConfigError> {
        self.get(var)
            .map(|value| value.parse().map_err(|_| ConfigError::Invalid { var, value }))
            .transpose()
    }

    fn parse<T: FromStr>(&self, var: &'static str, default: T) -> Result<T, ConfigError> {
        Ok(self.optional(var)?.unwrap_or(default))
    }

    fn positive(&self, var: &'static str, default: usize) -> Result<usize, ConfigError> {
        let n = self.parse(var, default)?;
        if n == 0 {
            return Err(ConfigError::Invalid {
                var,
                value: n.to_string(),
            });
        }
        Ok(n)
    }

    fn millis(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .optional(var)?
            .map(Duration::from_millis)
            .unwrap_or(default))
    }

    fn secs(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .optional(var)?
            .map(Duration::from_secs)
            .unwrap_or(default))
    }

    fn rate(&self, var: &'static str, default: f64) -> Result<f64, ConfigError> {
        let p: f64 = self.parse(var, default)?;
        if !(p > 0.0 && p < 1.0) {
            return Err(ConfigError::Invalid {
                var,
                value: p.to_string(),
            });
        }
        Ok(p)
    }

    fn flag(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.get(var) else {
            return Ok(default);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { var, value }),
        }
    }

    fn key_source(&self, var: &'static str, default: KeySource) -> Result<KeySource, ConfigError> {
        let Some(value) = self.get(var) else {
            return Ok(default);
        };
        match value.to_ascii_lowercase().as_str() {
            "key" | "record_key" => Ok(KeySource::RecordKey),
            "digest" => Ok(KeySource::Digest),
            _ => Err(ConfigError::Invalid { var, value }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let mut vars: HashMap<String, String> = HashMap::from([
            (
                "CONTRACT_ADDRESS".to_string(),
                "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".to_string(),
            ),
            ("PK".to_string(), "0xabc".to_string()),
        ]);
        for (k, v) in pairs {
            vars.insert(k.to_string(), v.to_string());
        }
        RelayConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let cfg = load(&[]).expect("config");

        assert_eq!(cfg.ledger.rpc_url, "https://x1-testnet.infrafc.org");
        assert_eq!(cfg.ledger.chain_id, 204_005);
        assert_eq!(cfg.pipeline.batch_size, 10);
        assert_eq!(cfg.pipeline.start_cursor, Cursor(0));
        assert_eq!(cfg.pipeline.max_retries, None);
        assert_eq!(cfg.pipeline.key_source, KeySource::Digest);
        assert_eq!(cfg.dedup.capacity, 65_535);
        assert!(!cfg.dedup.strict);
        assert_eq!(cfg.intake.listen_addr.port(), 9997);
        assert_eq!(cfg.intake.queue_depth, 1024);
        assert_eq!(cfg.submission.receipt_timeout, Duration::from_secs(180));
    }

    #[test]
    fn required_vars_are_enforced() {
        let err = RelayConfig::from_lookup(|var| {
            (var == "CONTRACT_ADDRESS").then(|| "0x00".to_string())
        })
        .expect_err("PK is required");
        assert_eq!(err, ConfigError::Missing("PK"));

        let err = load(&[("CONTRACT_ADDRESS", "   ")]).expect_err("blank is unset");
        assert_eq!(err, ConfigError::Missing("CONTRACT_ADDRESS"));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = load(&[
            ("BATCH_SIZE", "25"),
            ("STARTING_HASH_ID", "1200"),
            ("RETRY_INTERVAL_MS", "250"),
            ("MAX_RETRIES", "5"),
            ("DEDUP_STRICT", "yes"),
            ("DEDUP_FP_RATE", "0.01"),
            ("MAX_FEE_PER_GAS", "30000000000"),
            ("PORT", "8080"),
            ("METRICS_ADDR", "0.0.0.0:9100"),
            ("METRICS_ENABLED", "false"),
            ("KEY_SOURCE", "record_key"),
        ])
        .expect("config");

        assert_eq!(cfg.pipeline.batch_size, 25);
        assert_eq!(cfg.pipeline.start_cursor, Cursor(1200));
        assert_eq!(cfg.pipeline.retry_interval, Duration::from_millis(250));
        assert_eq!(cfg.pipeline.max_retries, Some(5));
        assert_eq!(cfg.pipeline.key_source, KeySource::RecordKey);
        assert!(cfg.dedup.strict);
        assert_eq!(cfg.dedup.false_positive_rate, 0.01);
        assert_eq!(cfg.submission.max_fee_per_gas, Some(30_000_000_000));
        assert_eq!(cfg.intake.listen_addr.port(), 8080);
        assert_eq!(cfg.metrics.listen_addr.port(), 9100);
        assert!(!cfg.metrics.enabled);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = load(&[("BATCH_SIZE", "ten")]).expect_err("not a number");
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "BATCH_SIZE",
                value: "ten".to_string()
            }
        );

        assert!(matches!(
            load(&[("BATCH_SIZE", "0")]),
            Err(ConfigError::Invalid { var: "BATCH_SIZE", .. })
        ));
        assert!(matches!(
            load(&[("DEDUP_FP_RATE", "1.5")]),
            Err(ConfigError::Invalid { var: "DEDUP_FP_RATE", .. })
        ));
        assert!(matches!(
            load(&[("DEDUP_STRICT", "maybe")]),
            Err(ConfigError::Invalid { var: "DEDUP_STRICT", .. })
        ));
    }

    #[test]
    fn debug_output_hides_the_signing_key() {
        let cfg = load(&[("PK", "0xdeadbeefcafe")]).expect("config");
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("deadbeefcafe"));
    }
}
