use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Error, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use linkvet_lib::probe::{DEFAULT_MAX_REDIRECTS, DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_USER_AGENT};
use linkvet_lib::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRYABLE_STATUSES};
use linkvet_lib::validator::{
    DEFAULT_CACHE_TTL, DEFAULT_CONCURRENCY, DEFAULT_MAX_CACHE_ENTRIES, DEFAULT_PER_HOST_BURST,
    DEFAULT_PER_HOST_RATE, DEFAULT_TIMEOUT,
};
use linkvet_lib::{MethodPolicy, ValidationPolicy};
use serde::Deserialize;
use strum::{Display, VariantNames};

use crate::verbosity::Verbosity;

pub(crate) const LINKVET_CONFIG_FILE: &str = "linkvet.toml";
pub(crate) const LINKVET_CACHE_DIR: &str = ".linkvetcache";

/// Output format of results and summaries
#[derive(Debug, Deserialize, Default, Clone, Copy, Display, VariantNames, PartialEq, Eq)]
#[non_exhaustive]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub(crate) enum OutputFormat {
    /// One line per result, then a summary
    #[default]
    Plain,
    /// A single JSON document once the batch is done
    Json,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(format: &str) -> Result<Self, Self::Err> {
        match format.to_lowercase().as_str() {
            "plain" | "text" => Ok(OutputFormat::Plain),
            "json" => Ok(OutputFormat::Json),
            _ => Err(anyhow!("Unknown format {format}")),
        }
    }
}

// Macro for generating default functions to be used by serde
macro_rules! default_function {
    ( $( $name:ident : $T:ty = $e:expr; )* ) => {
        $(
            #[allow(clippy::missing_const_for_fn)]
            fn $name() -> $T {
                $e
            }
        )*
    };
}

default_function! {
    concurrency: usize = DEFAULT_CONCURRENCY;
    per_host_rate: f64 = DEFAULT_PER_HOST_RATE;
    per_host_burst: u32 = DEFAULT_PER_HOST_BURST;
    timeout: Duration = DEFAULT_TIMEOUT;
    max_attempts: u32 = DEFAULT_MAX_ATTEMPTS;
    backoff_base: Duration = DEFAULT_BASE_DELAY;
    cache_ttl: Duration = DEFAULT_CACHE_TTL;
    max_cache_entries: usize = DEFAULT_MAX_CACHE_ENTRIES;
    max_response_bytes: usize = DEFAULT_MAX_RESPONSE_BYTES;
    max_redirects: u32 = DEFAULT_MAX_REDIRECTS;
    user_agent: String = DEFAULT_USER_AGENT.to_string();
    retry_status: Vec<u16> = DEFAULT_RETRYABLE_STATUSES.to_vec();
    cache_dir: PathBuf = PathBuf::from(LINKVET_CACHE_DIR);
}

// Macro for merging configuration values
macro_rules! fold_in {
    ($cli:ident , $toml:ident ; $ty:ident { $(..$ignore:ident,)* $( $key:ident : $default:expr, )* } ) => {
        if (false) {
            #[allow(dead_code, unused, clippy::diverging_sub_expression)]
            let _check_fold_in_exhaustivity = $ty {
                $($key: unreachable!(), )*
                $($ignore: unreachable!(), )*
            };
        };
        $(
            if $cli.$key == $default && $toml.$key != $default {
                $cli.$key = $toml.$key;
            }
        )*
    };
}

/// linkvet checks whether externally supplied URLs are still reachable.
///
/// Results are remembered in an on-disk cache, so that repeated runs within
/// the cache TTL don't touch the network again.
#[derive(Parser, Debug)]
#[command(version, about)]
pub(crate) struct LinkvetOptions {
    /// Configuration file to use
    ///
    /// Defaults to `linkvet.toml` in the working directory, if it exists.
    #[arg(short, long = "config", global = true)]
    pub(crate) config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

impl LinkvetOptions {
    pub(crate) const fn config(&self) -> &Config {
        match &self.command {
            Command::Check { config, .. } | Command::Cache { config, .. } => config,
        }
    }

    pub(crate) const fn config_mut(&mut self) -> &mut Config {
        match &mut self.command {
            Command::Check { config, .. } | Command::Cache { config, .. } => config,
        }
    }
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Validate the targets listed in a CSV file
    Check {
        /// CSV rows of `identifier,url` without a header, or `-` for stdin
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[command(flatten)]
        config: Config,
    },

    /// Inspect or maintain the result cache
    Cache {
        #[arg(value_enum)]
        action: CacheAction,

        #[command(flatten)]
        config: Config,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheAction {
    /// Show the number of entries and where they are stored
    Stats,
    /// Drop expired entries and enforce `--max-cache-entries`
    Sweep,
    /// Remove every entry
    Clear,
}

/// Settings shared by the command line and the configuration file
#[derive(Parser, Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Verbose program output
    #[clap(flatten)]
    #[serde(default)]
    pub(crate) verbose: Verbosity,

    /// Maximum number of requests in flight across all hosts
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    #[serde(default = "concurrency")]
    pub(crate) concurrency: usize,

    /// Sustained requests per second sent to the same host
    #[arg(long, default_value_t = DEFAULT_PER_HOST_RATE)]
    #[serde(default = "per_host_rate")]
    pub(crate) per_host_rate: f64,

    /// Requests a host may receive back to back before throttling starts
    #[arg(long, default_value_t = DEFAULT_PER_HOST_BURST)]
    #[serde(default = "per_host_burst")]
    pub(crate) per_host_burst: u32,

    /// Timeout of every single request, e.g. `20s` or `500ms`
    #[arg(long, value_parser = humantime::parse_duration, default_value = "20s")]
    #[serde(default = "timeout", with = "humantime_serde")]
    pub(crate) timeout: Duration,

    /// Probe attempts per target, including the first
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    #[serde(default = "max_attempts")]
    pub(crate) max_attempts: u32,

    /// Delay before the first retry; doubles with every further attempt
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    #[serde(default = "backoff_base", with = "humantime_serde")]
    pub(crate) backoff_base: Duration,

    /// How long a cached result stays fresh
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1day")]
    #[serde(default = "cache_ttl", with = "humantime_serde")]
    pub(crate) cache_ttl: Duration,

    /// Upper bound of cache entries, enforced by evicting the oldest
    #[arg(long, default_value_t = DEFAULT_MAX_CACHE_ENTRIES)]
    #[serde(default = "max_cache_entries")]
    pub(crate) max_cache_entries: usize,

    /// Body bytes inspected for bot protection markers
    #[arg(long, default_value_t = DEFAULT_MAX_RESPONSE_BYTES)]
    #[serde(default = "max_response_bytes")]
    pub(crate) max_response_bytes: usize,

    /// Maximum number of redirects followed
    #[arg(long, default_value_t = DEFAULT_MAX_REDIRECTS)]
    #[serde(default = "max_redirects")]
    pub(crate) max_redirects: u32,

    /// HTTP methods used to probe: `head_then_get`, `get_only` or `head_only`
    #[arg(long, default_value_t = MethodPolicy::default())]
    #[serde(default)]
    pub(crate) method_policy: MethodPolicy,

    /// User agent sent with every request
    #[arg(short, long, default_value = DEFAULT_USER_AGENT)]
    #[serde(default = "user_agent")]
    pub(crate) user_agent: String,

    /// Response status codes worth retrying, e.g. `--retry-status 429,503`
    #[arg(
        long,
        value_delimiter = ',',
        value_parser = clap::value_parser!(u16).range(100..600),
        default_values_t = DEFAULT_RETRYABLE_STATUSES
    )]
    #[serde(default = "retry_status")]
    pub(crate) retry_status: Vec<u16>,

    /// Don't read or write the result cache
    #[arg(long)]
    #[serde(default)]
    pub(crate) no_cache: bool,

    /// Directory holding the result cache
    #[arg(long, value_name = "DIR", default_value = LINKVET_CACHE_DIR)]
    #[serde(default = "cache_dir")]
    pub(crate) cache_dir: PathBuf,

    /// Output format
    #[arg(short, long, default_value_t = OutputFormat::default(), value_parser = OutputFormat::from_str)]
    #[serde(default)]
    pub(crate) format: OutputFormat,

    /// Show per-host statistics at the end of the run
    #[arg(long)]
    #[serde(default)]
    pub(crate) host_stats: bool,

    /// Number of threads to utilize.
    /// Defaults to number of cores available to the system
    #[arg(short = 'T', long)]
    #[serde(default)]
    pub(crate) threads: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbose: Verbosity::default(),
            concurrency: concurrency(),
            per_host_rate: per_host_rate(),
            per_host_burst: per_host_burst(),
            timeout: timeout(),
            max_attempts: max_attempts(),
            backoff_base: backoff_base(),
            cache_ttl: cache_ttl(),
            max_cache_entries: max_cache_entries(),
            max_response_bytes: max_response_bytes(),
            max_redirects: max_redirects(),
            method_policy: MethodPolicy::default(),
            user_agent: user_agent(),
            retry_status: retry_status(),
            no_cache: false,
            cache_dir: cache_dir(),
            format: OutputFormat::default(),
            host_stats: false,
            threads: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub(crate) fn load_from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).with_context(|| "Failed to parse configuration file")
    }

    /// Merge the configuration from TOML into the CLI configuration.
    ///
    /// A command-line value wins unless it equals the built-in default.
    pub(crate) fn merge(&mut self, toml: Config) {
        // NOTE: if you see an error within this macro call, check to make sure that
        // that the fields provided to fold_in! match all the fields of the Config struct.
        fold_in! {
            // Destination and source configs
            self, toml;

            Config {
                // Keys with defaults to assign
                verbose: Verbosity::default(),
                concurrency: DEFAULT_CONCURRENCY,
                per_host_rate: DEFAULT_PER_HOST_RATE,
                per_host_burst: DEFAULT_PER_HOST_BURST,
                timeout: DEFAULT_TIMEOUT,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                backoff_base: DEFAULT_BASE_DELAY,
                cache_ttl: DEFAULT_CACHE_TTL,
                max_cache_entries: DEFAULT_MAX_CACHE_ENTRIES,
                max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
                max_redirects: DEFAULT_MAX_REDIRECTS,
                method_policy: MethodPolicy::default(),
                user_agent: DEFAULT_USER_AGENT,
                retry_status: DEFAULT_RETRYABLE_STATUSES.to_vec(),
                no_cache: false,
                cache_dir: PathBuf::from(LINKVET_CACHE_DIR),
                format: OutputFormat::default(),
                host_stats: false,
                threads: None,
            }
        }
    }

    /// The validation policy described by this configuration
    pub(crate) fn policy(&self) -> ValidationPolicy {
        ValidationPolicy::builder()
            .concurrency_limit(self.concurrency)
            .per_host_rate(self.per_host_rate)
            .per_host_burst(self.per_host_burst)
            .timeout(self.timeout)
            .max_attempts(self.max_attempts)
            .backoff_base(self.backoff_base)
            .cache_ttl(self.cache_ttl)
            .max_cache_entries(self.max_cache_entries)
            .max_response_bytes(self.max_response_bytes)
            .max_redirects(self.max_redirects)
            .method_policy(self.method_policy)
            .user_agent(self.user_agent.clone())
            .retryable_statuses(self.retry_status.iter().copied().collect())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(args: &[&str]) -> LinkvetOptions {
        LinkvetOptions::try_parse_from(args).unwrap()
    }

    #[test]
    fn verify_app() {
        LinkvetOptions::command().debug_assert();
    }

    #[test]
    fn test_defaults_match_serde_defaults() {
        let cli = parse(&["linkvet", "check", "targets.csv"]);
        let toml: Config = toml::from_str("").unwrap();
        let cli = cli.config();
        assert_eq!(cli.concurrency, toml.concurrency);
        assert_eq!(cli.timeout, toml.timeout);
        assert_eq!(cli.backoff_base, toml.backoff_base);
        assert_eq!(cli.cache_ttl, toml.cache_ttl);
        assert_eq!(cli.cache_dir, toml.cache_dir);
        assert_eq!(cli.user_agent, toml.user_agent);
        assert_eq!(cli.method_policy, toml.method_policy);
        assert_eq!(cli.format, toml.format);
    }

    #[test]
    fn test_merge_prefers_cli() {
        let mut opts = parse(&["linkvet", "check", "-", "--concurrency", "4", "--timeout", "3s"]);
        let toml: Config = toml::from_str(
            r#"
            concurrency = 16
            timeout = "9s"
            per_host_rate = 0.5
            cache_dir = "/tmp/linkvet"
            method_policy = "get_only"
            format = "json"
            "#,
        )
        .unwrap();
        opts.config_mut().merge(toml);

        let config = opts.config();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.per_host_rate, 0.5);
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/linkvet"));
        assert_eq!(config.method_policy, MethodPolicy::GetOnly);
        assert_eq!(config.format, OutputFormat::Json);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("concurency = 3").is_err());
    }

    #[test]
    fn test_cache_subcommands() {
        let opts = parse(&["linkvet", "cache", "sweep", "--max-cache-entries", "10"]);
        match opts.command {
            Command::Cache { action, config } => {
                assert_eq!(action, CacheAction::Sweep);
                assert_eq!(config.max_cache_entries, 10);
            }
            Command::Check { .. } => panic!("expected cache subcommand"),
        }

        let opts = parse(&["linkvet", "cache", "--cache-dir", "/tmp/c", "stats", "-f", "json"]);
        let config = opts.config();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/c"));
        assert_eq!(config.format, OutputFormat::Json);
        assert!(LinkvetOptions::try_parse_from(["linkvet", "cache", "compact"]).is_err());
    }

    #[test]
    fn test_retry_status() {
        let opts = parse(&["linkvet", "check", "-", "--retry-status", "429,503"]);
        let policy = opts.config().policy();
        assert_eq!(
            policy.retryable_statuses,
            std::collections::HashSet::from([429, 503])
        );
        assert!(LinkvetOptions::try_parse_from(["linkvet", "check", "-", "--retry-status", "42"]).is_err());

        let default = parse(&["linkvet", "check", "-"]);
        assert_eq!(default.config().retry_status, DEFAULT_RETRYABLE_STATUSES.to_vec());

        let mut opts = parse(&["linkvet", "check", "-"]);
        opts.config_mut()
            .merge(toml::from_str("retry_status = [502]").unwrap());
        assert_eq!(opts.config().retry_status, vec![502]);
    }

    #[test]
    fn test_policy() {
        let opts = parse(&[
            "linkvet",
            "check",
            "-",
            "--per-host-rate",
            "5",
            "--method-policy",
            "head_only",
            "--max-attempts",
            "2",
        ]);
        let policy = opts.config().policy();
        assert_eq!(policy.per_host_rate, 5.0);
        assert_eq!(policy.method_policy, MethodPolicy::HeadOnly);
        assert_eq!(policy.max_attempts, 2);
        assert!(policy.validate().is_ok());
    }
}
