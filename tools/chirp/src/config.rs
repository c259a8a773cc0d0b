use crate::errors::ChirpError;
use crate::logging::DEFAULT_DISK_BUDGET_BYTES;
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub cassette_dir: Option<PathBuf>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub site: SiteConfig,
    pub database: DatabaseConfig,
    pub pagination: PaginationConfig,
    pub updates: UpdatesConfig,
    pub hub: HubConfig,
    pub cassettes: CassetteConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutOfRangePolicy {
    /// Report the cursor as `ChirpError::InvalidCursor`.
    Reject,
    /// Serve the nearest valid page instead.
    Clamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationConfig {
    pub page_size: u32,
    pub out_of_range: OutOfRangePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdatesConfig {
    pub min_length: usize,
    pub max_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HubConfig {
    pub url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordMode {
    /// Replay only; a missing cassette is an error.
    None,
    /// Replay when a recording exists, otherwise record live traffic.
    Once,
    /// Always record live traffic, replacing any existing recording.
    All,
}

impl RecordMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Once => "once",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MatchOn {
    Method,
    Uri,
    Body,
    Headers,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CassetteConfig {
    pub dir: PathBuf,
    pub record_mode: RecordMode,
    pub match_on: Vec<MatchOn>,
    pub allow_playback_repeats: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig {
                base_url: "http://localhost:9292".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from(".cache/chirp/chirp.sqlite"),
            },
            pagination: PaginationConfig {
                page_size: 20,
                out_of_range: OutOfRangePolicy::Reject,
            },
            updates: UpdatesConfig {
                min_length: 1,
                max_length: 140,
            },
            hub: HubConfig {
                url: "http://pubsubhubbub.appspot.com/publish".to_string(),
            },
            cassettes: CassetteConfig::default(),
            logging: LoggingConfig {
                path: PathBuf::from(".cache/chirp/logs/run.jsonl"),
                max_payload_bytes: 4096,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

impl Default for CassetteConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("tests/fixtures/cassettes"),
            record_mode: RecordMode::None,
            match_on: vec![MatchOn::Method, MatchOn::Uri],
            allow_playback_repeats: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    site: Option<PartialSiteConfig>,
    database: Option<PartialDatabaseConfig>,
    pagination: Option<PartialPaginationConfig>,
    updates: Option<PartialUpdatesConfig>,
    hub: Option<PartialHubConfig>,
    cassettes: Option<PartialCassetteConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSiteConfig {
    base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialDatabaseConfig {
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialPaginationConfig {
    page_size: Option<u32>,
    out_of_range: Option<OutOfRangePolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialUpdatesConfig {
    min_length: Option<usize>,
    max_length: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialHubConfig {
    url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialCassetteConfig {
    dir: Option<PathBuf>,
    record_mode: Option<RecordMode>,
    match_on: Option<Vec<MatchOn>>,
    allow_playback_repeats: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

/// Defaults, then the TOML file (if any), then CLI overrides. Relative paths
/// resolve against `process_cwd`.
pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<AppConfig, ChirpError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        cfg = parse_config(&file_contents)?;
    }

    apply_cli_overrides(&mut cfg, overrides);
    absolutize_paths(&mut cfg, process_cwd);
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Parse a TOML document over the defaults without validating it.
pub fn parse_config(contents: &str) -> Result<AppConfig, ChirpError> {
    let partial: PartialAppConfig =
        toml::from_str(contents).map_err(|e| ChirpError::ConfigParse(e.to_string()))?;
    let mut cfg = AppConfig::default();
    merge_partial_config(&mut cfg, partial);
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(site) = partial.site {
        if let Some(base_url) = site.base_url {
            cfg.site.base_url = base_url.trim_end_matches('/').to_string();
        }
    }

    if let Some(database) = partial.database {
        if let Some(path) = database.path {
            cfg.database.path = path;
        }
    }

    if let Some(pagination) = partial.pagination {
        if let Some(value) = pagination.page_size {
            cfg.pagination.page_size = value;
        }
        if let Some(value) = pagination.out_of_range {
            cfg.pagination.out_of_range = value;
        }
    }

    if let Some(updates) = partial.updates {
        if let Some(value) = updates.min_length {
            cfg.updates.min_length = value;
        }
        if let Some(value) = updates.max_length {
            cfg.updates.max_length = value;
        }
    }

    if let Some(hub) = partial.hub {
        if let Some(url) = hub.url {
            cfg.hub.url = url;
        }
    }

    if let Some(cassettes) = partial.cassettes {
        if let Some(value) = cassettes.dir {
            cfg.cassettes.dir = value;
        }
        if let Some(value) = cassettes.record_mode {
            cfg.cassettes.record_mode = value;
        }
        if let Some(mut value) = cassettes.match_on {
            value.sort();
            value.dedup();
            cfg.cassettes.match_on = value;
        }
        if let Some(value) = cassettes.allow_playback_repeats {
            cfg.cassettes.allow_playback_repeats = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.path {
            cfg.logging.path = value;
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(path) = &overrides.database_path {
        cfg.database.path = path.clone();
    }
    if let Some(dir) = &overrides.cassette_dir {
        cfg.cassettes.dir = dir.clone();
    }
    if let Some(page_size) = overrides.page_size {
        cfg.pagination.page_size = page_size;
    }
}

fn absolutize_paths(cfg: &mut AppConfig, base: &Path) {
    cfg.database.path = absolutize_path(base, &cfg.database.path);
    cfg.cassettes.dir = absolutize_path(base, &cfg.cassettes.dir);
    cfg.logging.path = absolutize_path(base, &cfg.logging.path);
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

pub fn validate_config(cfg: &AppConfig) -> Result<(), ChirpError> {
    if cfg.site.base_url.trim().is_empty() {
        return Err(ChirpError::InvalidConfig(
            "site.base_url must not be empty".to_string(),
        ));
    }

    if cfg.pagination.page_size == 0 {
        return Err(ChirpError::InvalidConfig(
            "pagination.page_size must be greater than zero".to_string(),
        ));
    }

    if cfg.updates.max_length == 0 || cfg.updates.min_length > cfg.updates.max_length {
        return Err(ChirpError::InvalidConfig(
            "updates.min_length must not exceed a non-zero updates.max_length".to_string(),
        ));
    }

    if cfg.hub.url.trim().is_empty() {
        return Err(ChirpError::InvalidConfig(
            "hub.url must not be empty".to_string(),
        ));
    }

    if !cfg
        .cassettes
        .match_on
        .iter()
        .any(|rule| matches!(rule, MatchOn::Method | MatchOn::Uri))
    {
        return Err(ChirpError::InvalidConfig(
            "cassettes.match_on must include method or uri".to_string(),
        ));
    }

    Ok(())
}
