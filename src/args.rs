use clap::builder::RangedU64ValueParser;
use clap::{Args, Parser, Subcommand, ValueEnum};
use pairguard_types::{ManifestKeys, PairingMode, RetryConfig, DEFAULT_PRIMARY_KEY, DEFAULT_SECONDARY_KEY};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{ValidatorConfig, DEFAULT_BULK_TIMEOUT_SECS};

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Shell out to the `gsutil` CLI.
    Gsutil,
    /// Cloud Storage JSON API over HTTP (needs an access token).
    GcsJson,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum PairingArg {
    /// Reject manifests whose primary and secondary lists differ in length.
    Strict,
    /// Pair the first min(len) entries and drop the rest.
    Truncate,
}

impl From<PairingArg> for PairingMode {
    fn from(p: PairingArg) -> Self {
        match p {
            PairingArg::Strict => PairingMode::Strict,
            PairingArg::Truncate => PairingMode::Truncate,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "pairguard", author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate a single manifest from --input-dir by name.
    Validate {
        /// Manifest name (file stem, e.g. `liver_226`) or file name.
        name: String,
    },
    /// Validate every `*.json` manifest in --input-dir.
    ValidateAll,
    /// Manage the cached existence index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum IndexAction {
    /// List the prefixes and replace the cache file.
    Rebuild,
    /// Print what the cache file holds.
    Show,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Directory containing input manifests.
    #[arg(long, short = 'i', global = true, value_name = "DIR", default_value = "inputs")]
    pub input_dir: PathBuf,

    /// Directory for filtered output manifests.
    #[arg(long, short = 'o', global = true, value_name = "DIR", default_value = "validated")]
    pub output_dir: PathBuf,

    /// Directory for validation reports.
    #[arg(long, short = 'r', global = true, value_name = "DIR", default_value = "validation_reports")]
    pub report_dir: PathBuf,

    /// Billing project for requester-pays buckets.
    #[arg(long, global = true, env = "PAIRGUARD_BILLING_PROJECT")]
    pub billing_project: Option<String>,

    /// Remote store used for existence queries.
    #[arg(long, global = true, value_enum, default_value_t = Backend::Gsutil)]
    pub backend: Backend,

    /// Path or name of the gsutil executable.
    #[arg(long, global = true, default_value = "gsutil")]
    pub gsutil_binary: String,

    /// Bearer token for the JSON API backend and listing.
    #[arg(long, global = true, env = "PAIRGUARD_GCS_TOKEN", hide_env_values = true)]
    pub gcs_token: Option<String>,

    /// Concurrent existence checks within one manifest.
    #[arg(long, global = true, default_value_t = 32, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub workers: usize,

    /// Manifests validated concurrently.
    #[arg(long, global = true, default_value_t = 1, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub manifest_workers: usize,

    /// Per-attempt timeout for a point query, in seconds.
    #[arg(long, global = true, default_value_t = 20, value_parser = RangedU64ValueParser::<u64>::new().range(1..))]
    pub timeout_secs: u64,

    /// Retries per object after the first attempt.
    #[arg(long, global = true, default_value_t = 3)]
    pub retries: usize,

    /// Initial retry backoff in milliseconds (doubles per attempt).
    #[arg(long, global = true, default_value_t = 500)]
    pub backoff_ms: u64,

    /// Maximum random jitter added to each backoff, in milliseconds.
    #[arg(long, global = true, default_value_t = 200)]
    pub jitter_ms: u64,

    /// Timeout for bulk queries and prefix listings, in seconds.
    #[arg(long, global = true, default_value_t = DEFAULT_BULK_TIMEOUT_SECS)]
    pub bulk_timeout_secs: u64,

    /// Skip the bulk-query tier; unresolved objects go straight to point queries.
    #[arg(long, global = true, default_value_t = false)]
    pub no_batch: bool,

    /// Skip manifests whose validated output already exists.
    #[arg(long, global = true, default_value_t = false)]
    pub skip_existing: bool,

    /// How to treat primary/secondary count mismatches.
    #[arg(long, global = true, value_enum, default_value_t = PairingArg::Strict)]
    pub pairing: PairingArg,

    /// Document key holding the primary reference list.
    #[arg(long, global = true, default_value = DEFAULT_PRIMARY_KEY)]
    pub primary_key: String,

    /// Document key holding the secondary reference list.
    #[arg(long, global = true, default_value = DEFAULT_SECONDARY_KEY)]
    pub secondary_key: String,

    /// Existence index cache file (default: <cache dir>/pairguard/existence_index.json.gz).
    #[arg(long, global = true, value_name = "PATH")]
    pub index_cache: Option<PathBuf>,

    /// Do not use an existence index.
    #[arg(long, global = true, default_value_t = false)]
    pub no_index: bool,

    /// Rebuild the index even if a cache exists.
    #[arg(long, global = true, default_value_t = false)]
    pub refresh_index: bool,

    /// Listing prefix for the index (repeatable). Inferred from manifests when omitted.
    #[arg(long = "prefix", global = true, value_name = "URL")]
    pub prefixes: Vec<String>,

    /// Debug-level logging.
    #[arg(long, short = 'v', global = true, default_value_t = false)]
    pub verbose: bool,
}

impl GlobalArgs {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.retries, self.backoff_ms, self.jitter_ms, self.timeout_secs)
    }

    pub fn to_config(&self) -> ValidatorConfig {
        let bulk_timeout = Duration::from_secs(self.bulk_timeout_secs);
        let mut config = ValidatorConfig::new(&self.input_dir, &self.output_dir, &self.report_dir);
        config.workers = self.workers;
        config.manifest_workers = self.manifest_workers;
        config.retry = self.retry_config();
        config.batch_timeout = (!self.no_batch).then_some(bulk_timeout);
        config.list_timeout = bulk_timeout;
        config.scope = self.billing_project.clone().filter(|s| !s.trim().is_empty());
        config.skip_existing = self.skip_existing;
        config.pairing = self.pairing.into();
        config.keys = ManifestKeys {
            primary: self.primary_key.clone(),
            secondary: self.secondary_key.clone(),
        };
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_config() {
        let cli = Cli::try_parse_from(["pairguard", "validate-all"]).unwrap();
        let config = cli.global.to_config();
        assert_eq!(config.workers, 32);
        assert_eq!(config.manifest_workers, 1);
        assert_eq!(config.retry, RetryConfig::default());
        assert!(config.batch_timeout.is_some());
        assert_eq!(config.keys, ManifestKeys::default());
        assert!(matches!(cli.command, Command::ValidateAll));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "pairguard",
            "validate",
            "liver_226",
            "--workers",
            "8",
            "--pairing",
            "truncate",
            "--no-batch",
            "--billing-project",
            "proj",
        ])
        .unwrap();
        let config = cli.global.to_config();
        assert_eq!(config.workers, 8);
        assert_eq!(config.pairing, PairingMode::Truncate);
        assert!(config.batch_timeout.is_none());
        assert_eq!(config.scope.as_deref(), Some("proj"));
        match cli.command {
            Command::Validate { name } => assert_eq!(name, "liver_226"),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_workers() {
        assert!(Cli::try_parse_from(["pairguard", "--workers", "0", "validate-all"]).is_err());
        assert!(Cli::try_parse_from(["pairguard", "--manifest-workers", "0", "validate-all"]).is_err());
    }
}
