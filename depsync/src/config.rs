//! Configuration.
//!
//! Two layers:
//!
//! - [`SyncConfig`]: the options a single run uses, built with `with_*`
//!   methods.
//! - [`ConfigFile`]: persisted user defaults in INI format, by default at
//!   `~/.config/depsync/config.ini`.
//!
//! Settings resolve in this order, first match wins: command line, then
//! environment (`HTTP_PROXY`, `DEPSYNC_CACHE`), then config file, then
//! built-in defaults.
//!
//! ```ini
//! [sync]
//! threads = 4
//! max_retries = 4
//! base_url = http://cdn.example.com/dependencies
//!
//! [network]
//! proxy = proxy.local:3128
//! timeout_secs = 300
//!
//! [cache]
//! enabled = true
//! directory = /var/cache/depsync
//!
//! [filters]
//! include = Android
//! exclude = HTML5, Linux
//!
//! [logging]
//! file = /tmp/depsync.log
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::fetch::{
    ProxySettings, DEFAULT_BASE_URL, DEFAULT_MAX_RETRIES, DEFAULT_THREADS, DEFAULT_TIMEOUT_SECS,
};
use crate::reconcile::FolderFilter;
use crate::sync::OverwriteMode;

/// Environment variable naming the proxy.
pub const PROXY_ENV: &str = "HTTP_PROXY";

/// Environment variable naming the pack cache directory.
pub const CACHE_ENV: &str = "DEPSYNC_CACHE";

/// Errors loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read or parsed.
    #[error("failed to read config {}: {source}", path.display())]
    Read { path: PathBuf, source: ini::Error },

    /// A setting has a value of the wrong type.
    #[error("invalid value '{value}' for {section}.{key}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },

    /// The config file could not be written.
    #[error("failed to write config {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The log file could not be opened.
    #[error("failed to open log file {}: {reason}", path.display())]
    LogFile { path: PathBuf, reason: String },
}

/// Where the pack cache lives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CacheLocation {
    /// No cache.
    Disabled,
    /// `.git/depsync` in the enclosing repository, if there is one.
    #[default]
    Discover,
    /// An explicit directory.
    At(PathBuf),
}

/// Options for one synchronization run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory holding the modules and the working manifest.
    pub root_dir: PathBuf,
    /// Number of pack worker threads.
    pub threads: usize,
    /// Retries per pack after the first attempt.
    pub max_retries: u32,
    /// What to do with locally modified files.
    pub overwrite: OverwriteMode,
    /// Report changes without making them.
    pub dry_run: bool,
    /// Folders whose files are skipped.
    pub filter: FolderFilter,
    pub cache: CacheLocation,
    /// Directory for decompressed pack staging files.
    pub staging_dir: PathBuf,
    /// Base URL for packs whose manifest declares none.
    pub base_url: String,
    pub proxy: Option<ProxySettings>,
    /// HTTP request timeout.
    pub timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            threads: DEFAULT_THREADS,
            max_retries: DEFAULT_MAX_RETRIES,
            overwrite: OverwriteMode::default(),
            dry_run: false,
            filter: FolderFilter::platform_defaults(),
            cache: CacheLocation::default(),
            staging_dir: std::env::temp_dir().join("depsync-staging"),
            base_url: DEFAULT_BASE_URL.to_string(),
            proxy: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl SyncConfig {
    /// Create a configuration for the given root directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Default::default()
        }
    }

    /// Set the number of worker threads (minimum 1).
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Set the retry count per pack.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set how tampered files are handled.
    pub fn with_overwrite(mut self, overwrite: OverwriteMode) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Replace the folder filter.
    pub fn with_filter(mut self, filter: FolderFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the cache location.
    pub fn with_cache(mut self, cache: CacheLocation) -> Self {
        self.cache = cache;
        self
    }

    /// Set the staging directory.
    pub fn with_staging_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.staging_dir = path.into();
        self
    }

    /// Set the default pack base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the HTTP proxy.
    pub fn with_proxy(mut self, proxy: Option<ProxySettings>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Set the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Apply settings from the config file.
    pub fn with_file(mut self, file: &ConfigFile) -> Self {
        if let Some(threads) = file.sync.threads {
            self = self.with_threads(threads);
        }
        if let Some(max_retries) = file.sync.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(base_url) = &file.sync.base_url {
            self.base_url = base_url.clone();
        }
        if let Some(proxy) = &file.network.proxy {
            self.proxy = Some(ProxySettings::new(proxy.clone()));
        }
        if let Some(secs) = file.network.timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        if !file.cache.enabled {
            self.cache = CacheLocation::Disabled;
        } else if let Some(dir) = &file.cache.directory {
            self.cache = CacheLocation::At(dir.clone());
        }
        for folder in &file.filters.include {
            self.filter.include(folder);
        }
        for folder in &file.filters.exclude {
            self.filter.exclude(folder);
        }
        self
    }

    /// Apply `HTTP_PROXY` and `DEPSYNC_CACHE` from the environment.
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(proxy) = lookup(PROXY_ENV).filter(|v| !v.is_empty()) {
            self.proxy = Some(ProxySettings::new(proxy));
        }
        if let Some(dir) = lookup(CACHE_ENV).filter(|v| !v.is_empty()) {
            self.cache = CacheLocation::At(PathBuf::from(dir));
        }
        self
    }
}

/// `[sync]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSection {
    pub threads: Option<usize>,
    pub max_retries: Option<u32>,
    pub base_url: Option<String>,
}

/// `[network]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSection {
    pub proxy: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSection {
    pub enabled: bool,
    pub directory: Option<PathBuf>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
        }
    }
}

/// `[filters]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FiltersSection {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingSection {
    pub file: Option<PathBuf>,
}

/// Persisted user configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub sync: SyncSection,
    pub network: NetworkSection,
    pub cache: CacheSection,
    pub filters: FiltersSection,
    pub logging: LoggingSection,
}

impl ConfigFile {
    /// Default location: `<user config dir>/depsync/config.ini`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("depsync").join("config.ini"))
    }

    /// Load from the default location, or defaults if there is none.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_ini(&ini)
    }

    /// Parse INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Read {
            path: PathBuf::from("<string>"),
            source: ini::Error::Parse(e),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let get = |section: &str, key: &str| -> Option<String> {
            ini.section(Some(section))
                .and_then(|props| props.get(key))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        config.sync.threads = parse_opt(get("sync", "threads"), "sync", "threads")?;
        config.sync.max_retries = parse_opt(get("sync", "max_retries"), "sync", "max_retries")?;
        config.sync.base_url = get("sync", "base_url");

        config.network.proxy = get("network", "proxy");
        config.network.timeout_secs =
            parse_opt(get("network", "timeout_secs"), "network", "timeout_secs")?;

        if let Some(enabled) = get("cache", "enabled") {
            config.cache.enabled = parse_bool(&enabled).ok_or_else(|| ConfigError::InvalidValue {
                section: "cache".to_string(),
                key: "enabled".to_string(),
                value: enabled.clone(),
            })?;
        }
        config.cache.directory = get("cache", "directory").map(PathBuf::from);

        config.filters.include = get("filters", "include").map(split_list).unwrap_or_default();
        config.filters.exclude = get("filters", "exclude").map(split_list).unwrap_or_default();

        config.logging.file = get("logging", "file").map(PathBuf::from);

        Ok(config)
    }

    /// Render as INI, omitting unset values.
    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();

        {
            let mut section = ini.with_section(Some("sync"));
            if let Some(threads) = self.sync.threads {
                section.set("threads", threads.to_string());
            }
            if let Some(retries) = self.sync.max_retries {
                section.set("max_retries", retries.to_string());
            }
            if let Some(url) = &self.sync.base_url {
                section.set("base_url", url.as_str());
            }
        }
        {
            let mut section = ini.with_section(Some("network"));
            if let Some(proxy) = &self.network.proxy {
                section.set("proxy", proxy.as_str());
            }
            if let Some(secs) = self.network.timeout_secs {
                section.set("timeout_secs", secs.to_string());
            }
        }
        {
            let mut section = ini.with_section(Some("cache"));
            section.set("enabled", self.cache.enabled.to_string());
            if let Some(dir) = &self.cache.directory {
                section.set("directory", dir.display().to_string());
            }
        }
        {
            let mut section = ini.with_section(Some("filters"));
            if !self.filters.include.is_empty() {
                section.set("include", self.filters.include.join(", "));
            }
            if !self.filters.exclude.is_empty() {
                section.set("exclude", self.filters.exclude.join(", "));
            }
        }
        if let Some(file) = &self.logging.file {
            ini.with_section(Some("logging"))
                .set("file", file.display().to_string());
        }

        ini
    }

    /// Write to `path`, creating its directory.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        self.to_ini().write_to_file(path).map_err(write_error)
    }
}

fn parse_opt<T: FromStr>(
    value: Option<String>,
    section: &str,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| {
            v.parse().map_err(|_| ConfigError::InvalidValue {
                section: section.to_string(),
                key: key.to_string(),
                value: v.clone(),
            })
        })
        .transpose()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn split_list(value: String) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
