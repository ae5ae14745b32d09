//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "aside";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_REDIS_INSTANCE_PREFIX: &str = "aside:";
const DEFAULT_CACHE_ABSOLUTE_MINUTES: u32 = 60;
const DEFAULT_CACHE_SLIDING_MINUTES: u32 = 20;
const DEFAULT_SWEEP_INTERVAL_MINUTES: u64 = 30;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_MEMORY_MAX_ENTRIES: usize = 10_000;
/// Upper bound on configured default lifetimes: one year.
const MAX_CACHE_LIFETIME_MINUTES: u32 = 365 * 24 * 60;

/// Command-line arguments for the aside binary.
#[derive(Debug, Parser)]
#[command(name = "aside", version, about = "Cache-aside response caching service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "ASIDE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service and the metadata sweeper.
    Serve(Box<ServeArgs>),
    /// Delete expired metadata rows once and exit.
    Sweep(SweepArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,

    /// Override the prefix applied to every Redis key.
    #[arg(long = "redis-instance-prefix", value_name = "PREFIX")]
    pub redis_instance_prefix: Option<String>,

    /// Override the default absolute expiration in minutes (0 disables).
    #[arg(long = "cache-default-absolute-minutes", value_name = "MINUTES")]
    pub cache_default_absolute_minutes: Option<u32>,

    /// Override the default sliding expiration in minutes (0 disables).
    #[arg(long = "cache-default-sliding-minutes", value_name = "MINUTES")]
    pub cache_default_sliding_minutes: Option<u32>,

    /// Override the metadata sweep interval.
    #[arg(long = "cache-sweep-interval-minutes", value_name = "MINUTES")]
    pub cache_sweep_interval_minutes: Option<u64>,

    /// Override the entry limit of the in-process store.
    #[arg(long = "cache-memory-max-entries", value_name = "COUNT")]
    pub cache_memory_max_entries: Option<usize>,

    /// Toggle metadata tracking.
    #[arg(
        long = "cache-track-metadata",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_track_metadata: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// Without a URL the in-process store is used.
    pub url: Option<String>,
    pub instance_prefix: String,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub default_absolute_minutes: u32,
    pub default_sliding_minutes: u32,
    pub sweep_interval_minutes: NonZeroU64,
    pub max_body_bytes: NonZeroUsize,
    pub memory_max_entries: NonZeroUsize,
    pub track_metadata: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("ASIDE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Sweep(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    redis: RawRedisSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.redis.url = Some(url.clone());
        }
        if let Some(prefix) = overrides.redis_instance_prefix.as_ref() {
            self.redis.instance_prefix = Some(prefix.clone());
        }
        if let Some(minutes) = overrides.cache_default_absolute_minutes {
            self.cache.default_absolute_minutes = Some(minutes);
        }
        if let Some(minutes) = overrides.cache_default_sliding_minutes {
            self.cache.default_sliding_minutes = Some(minutes);
        }
        if let Some(minutes) = overrides.cache_sweep_interval_minutes {
            self.cache.sweep_interval_minutes = Some(minutes);
        }
        if let Some(count) = overrides.cache_memory_max_entries {
            self.cache.memory_max_entries = Some(count);
        }
        if let Some(track) = overrides.cache_track_metadata {
            self.cache.track_metadata = Some(track);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            redis,
            cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            redis: build_redis_settings(redis),
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        public_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let max_connections = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);

    Ok(DatabaseSettings {
        url: non_blank(database.url),
        max_connections: non_zero_u32(max_connections.into(), "database.max_connections")?,
    })
}

fn build_redis_settings(redis: RawRedisSettings) -> RedisSettings {
    RedisSettings {
        url: non_blank(redis.url),
        instance_prefix: redis
            .instance_prefix
            .unwrap_or_else(|| DEFAULT_REDIS_INSTANCE_PREFIX.to_string()),
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let sweep_minutes = cache
        .sweep_interval_minutes
        .unwrap_or(DEFAULT_SWEEP_INTERVAL_MINUTES);
    let sweep_interval_minutes = NonZeroU64::new(sweep_minutes).ok_or_else(|| {
        LoadError::invalid("cache.sweep_interval_minutes", "must be greater than zero")
    })?;

    let max_body_bytes = NonZeroUsize::new(cache.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES))
        .ok_or_else(|| LoadError::invalid("cache.max_body_bytes", "must be greater than zero"))?;

    let memory_max_entries = NonZeroUsize::new(
        cache
            .memory_max_entries
            .unwrap_or(DEFAULT_MEMORY_MAX_ENTRIES),
    )
    .ok_or_else(|| LoadError::invalid("cache.memory_max_entries", "must be greater than zero"))?;

    Ok(CacheSettings {
        default_absolute_minutes: lifetime_minutes(
            cache.default_absolute_minutes,
            DEFAULT_CACHE_ABSOLUTE_MINUTES,
            "cache.default_absolute_minutes",
        )?,
        default_sliding_minutes: lifetime_minutes(
            cache.default_sliding_minutes,
            DEFAULT_CACHE_SLIDING_MINUTES,
            "cache.default_sliding_minutes",
        )?,
        sweep_interval_minutes,
        max_body_bytes,
        memory_max_entries,
        track_metadata: cache.track_metadata.unwrap_or(true),
    })
}

fn lifetime_minutes(
    value: Option<u32>,
    default: u32,
    key: &'static str,
) -> Result<u32, LoadError> {
    let minutes = value.unwrap_or(default);
    if minutes > MAX_CACHE_LIFETIME_MINUTES {
        return Err(LoadError::invalid(
            key,
            format!("must not exceed {MAX_CACHE_LIFETIME_MINUTES} minutes"),
        ));
    }
    Ok(minutes)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    public_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    url: Option<String>,
    instance_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    default_absolute_minutes: Option<u32>,
    default_sliding_minutes: Option<u32>,
    sweep_interval_minutes: Option<u64>,
    max_body_bytes: Option<usize>,
    memory_max_entries: Option<usize>,
    track_metadata: Option<bool>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
