//! Configuration for cartbench runs.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `CARTBENCH__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! Environment variables use double underscores (`__`) to denote nested configuration structures.
//! For example:
//!
//! - `CARTBENCH__TARGET__BASE_URL=http://localhost:8080` sets the service under test
//! - `CARTBENCH__TARGET__CART_PATH=shopping-carts/dynamodb` selects the backend's routes
//! - `CARTBENCH__CONSISTENCY__PROBE__INTERVAL=20ms` sets the polling interval
//!
//! The same configuration in YAML:
//!
//! ```yaml
//! target:
//!   base_url: http://localhost:8080
//!   cart_path: shopping-carts/dynamodb
//!   backend: dynamodb
//!
//! consistency:
//!   probe:
//!     interval: 20ms
//! ```
//!
//! The configuration is only read at the edge of the program. Every component receives the values
//! it needs when it is constructed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "CARTBENCH__";

/// The service under test.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Target {
    /// Base URL of the service. The health endpoint is `<base_url>/health`.
    pub base_url: String,
    /// Path of the cart collection below `base_url`, selecting the storage backend's routes.
    ///
    /// For example `shopping-carts` or `shopping-carts/dynamodb`.
    pub cart_path: String,
    /// Label of the backend, used to key artifacts and reports.
    pub backend: String,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            cart_path: "shopping-carts".into(),
            backend: "mysql".into(),
        }
    }
}

/// Shape of the sequential performance run.
///
/// Used in: [`Config::performance`]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Performance {
    /// Number of carts created in the first phase.
    pub creates: usize,
    /// Number of items added to randomly chosen carts.
    pub adds: usize,
    /// Number of item quantity updates. Requires the backend to return item identifiers.
    pub updates: usize,
    /// Number of item removals. Requires the backend to return item identifiers.
    pub removes: usize,
    /// Number of cart reads.
    pub gets: usize,
    /// Pause between two consecutive calls.
    #[serde(with = "humantime_serde")]
    pub pause: Duration,
    /// Seed for choosing carts and generating payloads. Random if absent.
    pub seed: Option<u64>,
    /// Wall-clock budget of the whole run. Exceeding it is reported, not enforced.
    #[serde(with = "humantime_serde")]
    pub time_limit: Duration,
}

impl Default for Performance {
    fn default() -> Self {
        Self {
            creates: 50,
            adds: 50,
            updates: 0,
            removes: 0,
            gets: 50,
            pause: Duration::from_millis(50),
            seed: None,
            time_limit: Duration::from_secs(300),
        }
    }
}

impl Performance {
    /// Upper bound of calls issued by a run.
    pub fn total_calls(&self) -> usize {
        self.creates + self.adds + self.updates + self.removes + self.gets
    }
}

/// Polling schedule of the consistency prober.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbePolicy {
    /// Maximum number of reads after a write before it is declared not visible.
    pub max_attempts: u32,
    /// Pause after a read that did not show the write.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_millis(10),
        }
    }
}

/// Shape of the concurrent-update test.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ConcurrentPlan {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Number of mutations each worker issues.
    pub ops_per_worker: usize,
    /// Delay between two calls of the same worker.
    #[serde(with = "humantime_serde")]
    pub call_delay: Duration,
    /// Delay between the last worker finishing and the final read.
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
}

impl ConcurrentPlan {
    /// The number of successful mutations if nothing is lost.
    pub fn expected_mutations(&self) -> u64 {
        (self.workers as u64).saturating_mul(self.ops_per_worker as u64)
    }
}

impl Default for ConcurrentPlan {
    fn default() -> Self {
        Self {
            workers: 5,
            ops_per_worker: 5,
            call_delay: Duration::from_millis(10),
            settle_delay: Duration::from_secs(2),
        }
    }
}

/// Configuration of the consistency phases.
///
/// Used in: [`Config::consistency`]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Consistency {
    /// Polling schedule shared by both probes.
    pub probe: ProbePolicy,
    /// Iterations of the create-then-read probe.
    pub read_after_create: usize,
    /// Iterations of the add-item-then-read probe.
    pub add_item: usize,
    /// The concurrent-update test.
    pub concurrent: ConcurrentPlan,
}

impl Default for Consistency {
    fn default() -> Self {
        Self {
            probe: ProbePolicy::default(),
            read_after_create: 50,
            add_item: 30,
            concurrent: ConcurrentPlan::default(),
        }
    }
}

/// The log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,
    /// Pretty printing with colors.
    Pretty,
    /// Simplified plain text output.
    Simplified,
    /// Dump out JSON lines.
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::error::Error for FormatParseError {}

impl FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(LogFormat::Auto),
            "pretty" => Ok(LogFormat::Pretty),
            "simplified" => Ok(LogFormat::Simplified),
            "json" => Ok(LogFormat::Json),
            _ => Err(FormatParseError(s.to_owned())),
        }
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration. Logs are always written to stderr.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Main configuration struct for cartbench.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The service under test.
    pub target: Target,

    /// Timeout of every call to the service.
    ///
    /// A call exceeding it is recorded as a transport failure.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Timeout of the pre-flight health check.
    #[serde(with = "humantime_serde")]
    pub health_timeout: Duration,

    /// Directory where run artifacts are written.
    pub output_dir: PathBuf,

    /// The sequential performance run.
    pub performance: Performance,

    /// The consistency probes and the concurrent-update test.
    pub consistency: Consistency,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: Target::default(),
            timeout: Duration::from_secs(10),
            health_timeout: Duration::from_secs(5),
            output_dir: PathBuf::from("."),
            performance: Performance::default(),
            consistency: Consistency::default(),
            logging: Logging::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided)
    /// 3. Environment variables (prefixed with `CARTBENCH__`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}
