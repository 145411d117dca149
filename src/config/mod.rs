//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

mod cli;

pub use cli::{
    CliArgs, Command, ImportArgs, MaintenanceArgs, ServeArgs, ServeOverrides, StoreOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "catalog";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_DB_STATEMENT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_CACHE_STATS_TTL_SECS: u64 = 3_600;
const DEFAULT_CACHE_RESULT_TTL_SECS: u64 = 3_600;
const DEFAULT_CACHE_SCRATCH_TTL_SECS: u64 = 60;
const DEFAULT_CACHE_OPERATION_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_REBUILD_BATCH_SIZE: usize = 1_000;
pub(crate) const DEFAULT_PRIMARY_FACET_SLUG: &str = "brend";
const DEFAULT_EXCLUDED_SLUGS: [&str; 2] = ["angl-yske-naymenuvannya", "english_name"];
const DEFAULT_PAGE_SIZE: u32 = 10;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub catalog: CatalogSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    pub expose_error_detail: bool,
    pub rebuild_on_start: bool,
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
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Redis { url: String },
    Memory,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub stats_ttl: Duration,
    pub result_ttl: Duration,
    pub scratch_ttl: Duration,
    pub operation_timeout: Duration,
    pub rebuild_batch_size: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub primary_facet_slug: String,
    pub excluded_slugs: Vec<String>,
    pub default_page_size: NonZeroU32,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            primary_facet_slug: DEFAULT_PRIMARY_FACET_SLUG.to_string(),
            excluded_slugs: DEFAULT_EXCLUDED_SLUGS
                .iter()
                .map(|slug| slug.to_string())
                .collect(),
            default_page_size: NonZeroU32::new(DEFAULT_PAGE_SIZE).unwrap_or(NonZeroU32::MIN),
        }
    }
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

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("CATALOG")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("catalog.excluded_slugs")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Rebuild(args)) | Some(Command::Stats(args)) => {
            raw.apply_store_overrides(&args.stores)
        }
        Some(Command::Import(args)) => raw.apply_store_overrides(&args.stores),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    catalog: RawCatalogSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_store_overrides(&overrides.stores);

        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(expose) = overrides.expose_error_detail {
            self.server.expose_error_detail = Some(expose);
        }
        if overrides.rebuild_on_start {
            self.server.rebuild_on_start = Some(true);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(slug) = overrides.primary_facet_slug.as_ref() {
            self.catalog.primary_facet_slug = Some(slug.clone());
        }
    }

    fn apply_store_overrides(&mut self, overrides: &StoreOverrides) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            catalog,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let cache = build_cache_settings(cache)?;
        let catalog = build_catalog_settings(catalog)?;

        Ok(Self {
            server,
            logging,
            database,
            cache,
            catalog,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

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
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        expose_error_detail: server.expose_error_detail.unwrap_or(false),
        rebuild_on_start: server.rebuild_on_start.unwrap_or(false),
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
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    let acquire_timeout = positive_duration(
        database
            .acquire_timeout_seconds
            .unwrap_or(DEFAULT_DB_ACQUIRE_TIMEOUT_SECS),
        Duration::from_secs,
        "database.acquire_timeout_seconds",
    )?;
    let statement_timeout = positive_duration(
        database
            .statement_timeout_ms
            .unwrap_or(DEFAULT_DB_STATEMENT_TIMEOUT_MS),
        Duration::from_millis,
        "database.statement_timeout_ms",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
        acquire_timeout,
        statement_timeout,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend_name = cache
        .backend
        .as_deref()
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "redis".to_string());

    let backend = match backend_name.as_str() {
        "redis" => {
            let url = cache
                .redis_url
                .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
            let parsed = Url::parse(url.trim())
                .map_err(|err| LoadError::invalid("cache.redis_url", err.to_string()))?;
            if !matches!(parsed.scheme(), "redis" | "rediss" | "redis+unix" | "unix") {
                return Err(LoadError::invalid(
                    "cache.redis_url",
                    format!("unsupported scheme `{}`", parsed.scheme()),
                ));
            }
            CacheBackend::Redis {
                url: url.trim().to_string(),
            }
        }
        "memory" => CacheBackend::Memory,
        "disabled" | "none" | "off" => CacheBackend::Disabled,
        other => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}` (expected redis, memory or disabled)"),
            ));
        }
    };

    let stats_ttl = positive_duration(
        cache
            .stats_ttl_seconds
            .unwrap_or(DEFAULT_CACHE_STATS_TTL_SECS),
        Duration::from_secs,
        "cache.stats_ttl_seconds",
    )?;
    let result_ttl = positive_duration(
        cache
            .result_ttl_seconds
            .unwrap_or(DEFAULT_CACHE_RESULT_TTL_SECS),
        Duration::from_secs,
        "cache.result_ttl_seconds",
    )?;
    let scratch_ttl = positive_duration(
        cache
            .scratch_ttl_seconds
            .unwrap_or(DEFAULT_CACHE_SCRATCH_TTL_SECS),
        Duration::from_secs,
        "cache.scratch_ttl_seconds",
    )?;
    let operation_timeout = positive_duration(
        cache
            .operation_timeout_ms
            .unwrap_or(DEFAULT_CACHE_OPERATION_TIMEOUT_MS),
        Duration::from_millis,
        "cache.operation_timeout_ms",
    )?;

    let rebuild_batch_size = NonZeroUsize::new(
        cache
            .rebuild_batch_size
            .unwrap_or(DEFAULT_REBUILD_BATCH_SIZE),
    )
    .ok_or_else(|| LoadError::invalid("cache.rebuild_batch_size", "must be greater than zero"))?;

    Ok(CacheSettings {
        backend,
        stats_ttl,
        result_ttl,
        scratch_ttl,
        operation_timeout,
        rebuild_batch_size,
    })
}

fn build_catalog_settings(catalog: RawCatalogSettings) -> Result<CatalogSettings, LoadError> {
    let defaults = CatalogSettings::default();

    let primary_facet_slug = match catalog.primary_facet_slug {
        Some(slug) if slug.trim().is_empty() => {
            return Err(LoadError::invalid(
                "catalog.primary_facet_slug",
                "slug must not be empty",
            ));
        }
        Some(slug) => slug.trim().to_string(),
        None => defaults.primary_facet_slug,
    };

    let excluded_slugs = match catalog.excluded_slugs {
        Some(slugs) => slugs
            .into_iter()
            .map(|slug| slug.trim().to_string())
            .filter(|slug| !slug.is_empty())
            .collect(),
        None => defaults.excluded_slugs,
    };
    if excluded_slugs.contains(&primary_facet_slug) {
        return Err(LoadError::invalid(
            "catalog.excluded_slugs",
            "the primary facet cannot be excluded",
        ));
    }

    let default_page_size = non_zero_u32(
        catalog
            .default_page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .into(),
        "catalog.default_page_size",
    )?;

    Ok(CatalogSettings {
        primary_facet_slug,
        excluded_slugs,
        default_page_size,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    expose_error_detail: Option<bool>,
    rebuild_on_start: Option<bool>,
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
    acquire_timeout_seconds: Option<u64>,
    statement_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    redis_url: Option<String>,
    stats_ttl_seconds: Option<u64>,
    result_ttl_seconds: Option<u64>,
    scratch_ttl_seconds: Option<u64>,
    operation_timeout_ms: Option<u64>,
    rebuild_batch_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCatalogSettings {
    primary_facet_slug: Option<String>,
    excluded_slugs: Option<Vec<String>>,
    default_page_size: Option<u32>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_duration(
    value: u64,
    unit: fn(u64) -> Duration,
    key: &'static str,
) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(unit(value))
}

#[cfg(test)]
mod tests;
