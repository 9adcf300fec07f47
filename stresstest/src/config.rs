//! Configuration for the stresstest.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Command line flags
//! 2. Environment variables (prefixed with `FST__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `FST__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `FST__BACKEND__TYPE=weed` selects the weed-fs backend
//! - `FST__BACKEND__URL=localhost:9333` sets the address of the master
//! - `FST__PAYLOAD__MAX_SIZE=4MiB` sets the largest payload size
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! backend:
//!   type: weed
//!   url: localhost:9333
//!
//! payload:
//!   max_size: 4MiB
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tracing::level_filters::LevelFilter;

use crate::backend::BackendConfig;
use crate::error::Error;
use crate::payload::PayloadConfig;
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::reader::ReaderConfig;
use crate::retry::RetryPolicy;
use crate::round::RoundConfig;
use crate::stresstest::RunConfig;
use crate::upload::CheckOptions;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "FST__";

/// The format in which to output logs.
///
/// Parsed case-insensitively from `auto`, `pretty`, `simplified` or `json`. An empty value
/// means [`LogFormat::Auto`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    #[default]
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

impl LogFormat {
    const ALL: [LogFormat; 4] = [
        LogFormat::Auto,
        LogFormat::Pretty,
        LogFormat::Simplified,
        LogFormat::Json,
    ];

    fn name(self) -> &'static str {
        match self {
            LogFormat::Auto => "auto",
            LogFormat::Pretty => "pretty",
            LogFormat::Simplified => "simplified",
            LogFormat::Json => "json",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A log format name that is not one of the [`LogFormat`] variants.
#[derive(Debug, ThisError)]
#[error("unknown log format `{0}`, expected auto, pretty, simplified or json")]
pub struct UnknownLogFormat(String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(LogFormat::Auto);
        }

        Self::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownLogFormat(s.to_owned()))
    }
}

/// Logging configuration. Logs are always written to stderr.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable takes precedence if it is set.
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    #[serde(with = "display_fromstr")]
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

/// Main configuration struct of the stresstest.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The backend under test. There is no default, a backend must be selected explicitly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendConfig>,

    /// Number of concurrent upload workers.
    pub parallel_write: usize,

    /// Total number of payloads to upload, split evenly across the upload workers.
    pub request_num: usize,

    /// Upload a payload twice with a chance of `1 / same_odds`. Zero disables repeated uploads.
    pub same_odds: u32,

    /// Sizes and contents of generated payloads.
    pub payload: PayloadConfig,

    /// Retries when reading back a fresh upload.
    pub readback: RetryPolicy,

    /// The readers running alongside the uploads. `reader.workers` is the read parallelism.
    pub reader: ReaderConfig,

    /// Capacity of the locator queue between uploads and readers.
    pub queue_capacity: usize,

    /// Request gzip-compressed responses from HTTP backends.
    pub gzip: bool,

    /// Log the details of the first upload.
    pub dump: bool,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: None,
            parallel_write: 1,
            request_num: 100,
            same_odds: 0,
            payload: PayloadConfig::default(),
            readback: RetryPolicy::default(),
            reader: ReaderConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            gzip: false,
            dump: false,
            logging: Logging::default(),
        }
    }
}

impl Config {
    /// Loads configuration from defaults, an optional YAML file and the environment.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if `path` is given)
    /// 3. Environment variables (prefixed with `FST__`)
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

    /// Checks the settings that cannot be expressed in types.
    pub fn validate(&self) -> Result<(), Error> {
        if self.backend.is_none() {
            return Err(Error::Config(
                "no backend selected, use --aostor, --weed or --memory".into(),
            ));
        }
        if self.parallel_write == 0 {
            return Err(Error::Config("parallel_write must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.reader.requeue_probability) {
            return Err(Error::Config(format!(
                "reader.requeue_probability must be within 0 and 1, got {}",
                self.reader.requeue_probability
            )));
        }

        Ok(())
    }

    /// The number of uploads each upload worker performs.
    pub fn per_worker(&self) -> usize {
        self.request_num.div_ceil(self.parallel_write.max(1))
    }

    /// Derives the parameters of a run.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            round: RoundConfig {
                parallel: self.parallel_write,
                per_worker: self.per_worker(),
                same_odds: self.same_odds,
                check: CheckOptions {
                    readback: self.readback,
                    dump: self.dump,
                },
            },
            reader: self.reader,
            queue_capacity: self.queue_capacity,
        }
    }
}
