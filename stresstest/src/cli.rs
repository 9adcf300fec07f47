//! Command line entry point of the stresstest binary.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use argh::FromArgs;
use bytesize::ByteSize;
use tracing::level_filters::LevelFilter;
use yansi::Paint;

use crate::backend::{BackendConfig, normalize_base_url};
use crate::config::{Config, LogFormat};
use crate::error::Error;
use crate::observability;
use crate::payload::PayloadGenerator;
use crate::stresstest::{RunSummary, run};

/// Stresstester for content-addressable file stores.
///
/// Uploads random payloads, verifies every upload by reading it back and keeps previously written
/// objects under read load. Flags override the configuration file and `FST__` environment
/// variables.
#[derive(Debug, Default, FromArgs)]
pub struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    /// test an aostor server at `host:port/realm`
    #[argh(option)]
    pub aostor: Option<String>,

    /// test a weed-fs master at `host:port`
    #[argh(option)]
    pub weed: Option<String>,

    /// test the in-process memory store
    #[argh(switch)]
    pub memory: bool,

    /// number of concurrent readers
    #[argh(option)]
    pub parallel_read: Option<usize>,

    /// number of concurrent upload workers
    #[argh(option)]
    pub parallel_write: Option<usize>,

    /// total number of uploads
    #[argh(option)]
    pub request_num: Option<usize>,

    /// smallest payload size
    #[argh(option)]
    pub size_init: Option<ByteSize>,

    /// largest payload size
    #[argh(option)]
    pub size_max: Option<ByteSize>,

    /// growth of the payload size between tiers
    #[argh(option)]
    pub size_step: Option<ByteSize>,

    /// generate compressible payloads
    #[argh(switch)]
    pub compressible: bool,

    /// upload a payload twice with a chance of 1 in N
    #[argh(option)]
    pub same: Option<u32>,

    /// ask HTTP backends for gzip-compressed responses
    #[argh(switch)]
    pub gzip: bool,

    /// log the details of the first upload
    #[argh(switch)]
    pub dump: bool,

    /// log at debug level
    #[argh(switch)]
    pub debug: bool,

    /// log output format: auto, pretty, simplified or json
    #[argh(option)]
    pub log_format: Option<LogFormat>,
}

impl Args {
    fn backend(&self) -> Result<Option<BackendConfig>, Error> {
        let mut selected = Vec::new();
        if let Some(url) = &self.aostor {
            selected.push(BackendConfig::Aostor {
                url: normalize_base_url(url),
            });
        }
        if let Some(url) = &self.weed {
            selected.push(BackendConfig::Weed {
                url: normalize_base_url(url),
            });
        }
        if self.memory {
            selected.push(BackendConfig::Memory);
        }

        if selected.len() > 1 {
            return Err(Error::Config(
                "select only one of --aostor, --weed and --memory".into(),
            ));
        }
        Ok(selected.pop())
    }

    /// Applies the flags on top of the loaded configuration.
    pub fn apply(&self, config: &mut Config) -> Result<(), Error> {
        if let Some(backend) = self.backend()? {
            config.backend = Some(backend);
        }
        if let Some(workers) = self.parallel_read {
            config.reader.workers = workers;
        }
        if let Some(parallel) = self.parallel_write {
            config.parallel_write = parallel;
        }
        if let Some(requests) = self.request_num {
            config.request_num = requests;
        }
        if let Some(size) = self.size_init {
            config.payload.init_size = size;
        }
        if let Some(size) = self.size_max {
            config.payload.max_size = size;
        }
        if let Some(size) = self.size_step {
            config.payload.size_step = size;
        }
        if let Some(odds) = self.same {
            config.same_odds = odds;
        }

        config.payload.compressible |= self.compressible;
        config.gzip |= self.gzip;
        config.dump |= self.dump;
        if self.debug {
            config.logging.level = LevelFilter::DEBUG;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }

        Ok(())
    }
}

/// Parses the command line, runs the stresstest and prints a summary.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    let mut config =
        Config::load(args.config.as_deref()).map_err(|e| Error::Config(e.to_string()))?;
    args.apply(&mut config)?;

    observability::initialize_tracing(&config.logging);
    tracing::debug!(?config);
    config.validate()?;

    let backend = match &config.backend {
        Some(backend) => backend.build(config.gzip)?,
        None => return Err(Error::Config("no backend selected".into()).into()),
    };
    let generator = PayloadGenerator::new(&config.payload)?;
    let run_config = config.run_config();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("stresstest-rt")
        .enable_all()
        .build()?;

    let start = Instant::now();
    let summary = runtime.block_on(run(backend, generator, &run_config))?;
    print_summary(&summary, start.elapsed());

    Ok(())
}

fn print_summary(summary: &RunSummary, duration: Duration) {
    println!();
    println!("{}", "## TOTALS".bold());

    print!("{} ({} ops)", "WRITE:".bold().green(), summary.round.uploads.bold());
    println!("  {}", throughput(summary.round.bytes, duration));

    print!("{} ({} ops)", "READ:".bold().green(), summary.reads.reads.bold());
    println!("  {}", throughput(summary.reads.bytes, duration));

    println!("  duration: {}", format!("{duration:.2?}").bold());
}

fn throughput(bytes: u64, duration: Duration) -> String {
    let secs = duration.as_secs_f64().max(f64::EPSILON);
    let per_sec = ByteSize::b((bytes as f64 / secs) as u64);
    format!("{} total, {}/s", ByteSize::b(bytes), per_sec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::from_args(&["filestore-stresstest"], args).unwrap()
    }

    #[test]
    fn flags_override_config() {
        let args = parse(&[
            "--weed",
            ":9333",
            "--parallel-write",
            "3",
            "--parallel-read",
            "0",
            "--size-max",
            "2MiB",
            "--same",
            "5",
            "--compressible",
            "--debug",
            "--log-format",
            "JSON",
        ]);

        let mut config = Config::default();
        args.apply(&mut config).unwrap();

        assert_eq!(
            config.backend,
            Some(BackendConfig::Weed {
                url: "http://localhost:9333".into()
            })
        );
        assert_eq!(config.parallel_write, 3);
        assert_eq!(config.reader.workers, 0);
        assert_eq!(config.payload.max_size, ByteSize::mib(2));
        assert_eq!(config.same_odds, 5);
        assert!(config.payload.compressible);
        assert_eq!(config.logging.level, LevelFilter::DEBUG);
        assert_eq!(config.logging.format, LogFormat::Json);
        config.validate().unwrap();
    }

    #[test]
    fn keeps_config_without_flags() {
        let mut config = Config {
            backend: Some(BackendConfig::Memory),
            request_num: 7,
            ..Default::default()
        };
        Args::default().apply(&mut config).unwrap();

        assert_eq!(config.backend, Some(BackendConfig::Memory));
        assert_eq!(config.request_num, 7);
        assert_eq!(config.logging.level, LevelFilter::INFO);
        assert_eq!(config.logging.format, LogFormat::Auto);
    }

    #[test]
    fn rejects_unknown_log_format() {
        let result = Args::from_args(&["filestore-stresstest"], &["--log-format", "xml"]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_multiple_backends() {
        let args = parse(&["--memory", "--aostor", "localhost:8341/test"]);
        let error = args.apply(&mut Config::default()).unwrap_err();

        assert!(matches!(error, Error::Config(_)));
        assert_eq!(error.exit_code(), crate::error::EXIT_CONFIG);
    }
}
