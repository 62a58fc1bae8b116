use crate::{archive::ArchiveFormat, services::pipeline::FailurePolicy};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use std::{env, path::PathBuf, str::FromStr};

const ENV_PREFIX: &str = "ARCHIVE_INGEST_";
const DEFAULT_MAX_ARCHIVE_BYTES: usize = 256 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub container: String,
    pub failure_policy: FailurePolicy,
    pub max_archive_bytes: usize,
}

/// What the process should do once configured.
#[derive(Debug, Clone, PartialEq)]
pub enum RunMode {
    Serve,
    /// Create the schema and exit.
    Migrate,
    /// Extract one local archive and exit.
    Ingest {
        path: PathBuf,
        format: Option<ArchiveFormat>,
    },
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Extract archives into object storage and record their contents")]
pub struct Args {
    /// Host to bind to (overrides ARCHIVE_INGEST_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides ARCHIVE_INGEST_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where extracted objects are stored (overrides ARCHIVE_INGEST_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides ARCHIVE_INGEST_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Destination container (overrides ARCHIVE_INGEST_CONTAINER)
    #[arg(long)]
    pub container: Option<String>,

    /// What to do after a failed entry (overrides ARCHIVE_INGEST_FAILURE_POLICY)
    #[arg(long, value_enum)]
    pub failure_policy: Option<FailurePolicy>,

    /// Largest accepted archive upload in bytes (overrides ARCHIVE_INGEST_MAX_ARCHIVE_BYTES)
    #[arg(long)]
    pub max_archive_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long, conflicts_with = "ingest")]
    pub migrate: bool,

    /// Extract a local archive file and exit
    #[arg(long, value_name = "PATH")]
    pub ingest: Option<PathBuf>,

    /// Archive format of --ingest (zip, tar, tar.gz); sniffed when omitted
    #[arg(long, requires = "ingest")]
    pub format: Option<ArchiveFormat>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        Self::resolve(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge `args` over values from `lookup` (environment), then defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, RunMode)> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        let env_port = parse_var(&var, "PORT")?.unwrap_or(3000);
        let env_policy = match var("FAILURE_POLICY") {
            Some(value) => <FailurePolicy as ValueEnum>::from_str(&value, true)
                .map_err(|err| anyhow!(err))
                .with_context(|| format!("parsing {ENV_PREFIX}FAILURE_POLICY value `{}`", value))?,
            None => FailurePolicy::default(),
        };
        let env_max_bytes = parse_var(&var, "MAX_ARCHIVE_BYTES")?.unwrap_or(DEFAULT_MAX_ARCHIVE_BYTES);

        // --- Merge ---
        let cfg = Self {
            host: args
                .host
                .or_else(|| var("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: args.port.unwrap_or(env_port),
            storage_dir: args
                .storage_dir
                .or_else(|| var("STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .or_else(|| var("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/archive_ingest.db".into()),
            container: args
                .container
                .or_else(|| var("CONTAINER"))
                .unwrap_or_else(|| "extracted".into()),
            failure_policy: args.failure_policy.unwrap_or(env_policy),
            max_archive_bytes: args.max_archive_bytes.unwrap_or(env_max_bytes),
        };

        let mode = match (args.migrate, args.ingest) {
            (true, _) => RunMode::Migrate,
            (false, Some(path)) => RunMode::Ingest {
                path,
                format: args.format,
            },
            (false, None) => RunMode::Serve,
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(var: impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{}`", value))
        })
        .transpose()
}
