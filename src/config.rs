use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub watch_dir: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Minimum time a file must go unmodified before `FileDetected` fires.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_ignored_suffixes")]
    pub ignored_suffixes: Vec<String>,
    #[serde(default = "default_book_extensions")]
    pub extensions: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
            ignored_suffixes: default_ignored_suffixes(),
            extensions: default_book_extensions(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_book_extensions")]
    pub extensions: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            extensions: default_book_extensions(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
        }
    }
}

/// Per-external-source configuration block.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    pub rate_limit: u32,
    pub rate_limit_window_ms: u64,
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_openlibrary")]
    pub openlibrary: SourceConfig,
    #[serde(default = "default_googlebooks")]
    pub googlebooks: SourceConfig,
    #[serde(default = "default_anilist")]
    pub anilist: SourceConfig,
    #[serde(default = "default_myanimelist")]
    pub myanimelist: SourceConfig,
    #[serde(default = "default_mangadex")]
    pub mangadex: SourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            openlibrary: default_openlibrary(),
            googlebooks: default_googlebooks(),
            anilist: default_anilist(),
            myanimelist: default_myanimelist(),
            mangadex: default_mangadex(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply the required
    /// `WATCH_DIR` / `DATA_DIR` environment overrides.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("WATCH_DIR") {
            self.watch_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
    }

    pub fn covers_dir(&self) -> PathBuf {
        self.data_dir.join("covers")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

// Default value functions

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_settle_ms() -> u64 {
    2_000
}

fn default_ignored_suffixes() -> Vec<String> {
    vec![".tmp".into(), ".part".into(), ".crdownload".into()]
}

fn default_book_extensions() -> Vec<String> {
    vec!["epub".into(), "cbz".into(), "cbr".into()]
}

fn default_db_url() -> String {
    "sqlite://archivist.db".to_string()
}

fn default_search_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_openlibrary() -> SourceConfig {
    SourceConfig {
        base_url: "https://openlibrary.org".into(),
        api_key: None,
        client_id: None,
        rate_limit: 100,
        rate_limit_window_ms: 5 * 60_000,
        search_timeout_ms: default_search_timeout_ms(),
        max_retries: default_max_retries(),
    }
}

fn default_googlebooks() -> SourceConfig {
    SourceConfig {
        base_url: "https://www.googleapis.com/books/v1".into(),
        api_key: None,
        client_id: None,
        rate_limit: 100,
        rate_limit_window_ms: 60_000,
        search_timeout_ms: 5_000,
        max_retries: default_max_retries(),
    }
}

fn default_anilist() -> SourceConfig {
    SourceConfig {
        base_url: "https://graphql.anilist.co".into(),
        api_key: None,
        client_id: None,
        rate_limit: 90,
        rate_limit_window_ms: 60_000,
        search_timeout_ms: default_search_timeout_ms(),
        max_retries: default_max_retries(),
    }
}

fn default_myanimelist() -> SourceConfig {
    SourceConfig {
        base_url: "https://api.myanimelist.net/v2".into(),
        api_key: None,
        client_id: None,
        rate_limit: 60,
        rate_limit_window_ms: 60_000,
        search_timeout_ms: default_search_timeout_ms(),
        max_retries: default_max_retries(),
    }
}

fn default_mangadex() -> SourceConfig {
    SourceConfig {
        base_url: "https://api.mangadex.org".into(),
        api_key: None,
        client_id: None,
        rate_limit: 5,
        rate_limit_window_ms: 1_000,
        search_timeout_ms: default_search_timeout_ms(),
        max_retries: default_max_retries(),
    }
}
