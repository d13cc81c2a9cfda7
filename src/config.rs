use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_DEFAULT_SHEET: &str = "Sheet1";
const DEFAULT_MAX_TOOL_RANGE_CELLS: u64 = 200_000;
const DEFAULT_MAX_READ_RANGE_CELLS: u64 = 250_000;
const DEFAULT_MAX_EXTERNAL_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_PREVIEW_CHANGES: usize = 500;
const DEFAULT_CACHE_MAX_ENTRIES: u64 = 10_000;
const DEFAULT_CACHE_MAX_BYTES: u64 = 256 * 1024 * 1024;
const DEFAULT_CACHE_DEFAULT_TTL_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// The resolved, validated configuration consumed by the executor, DLP
/// enforcement, cache manager, and logging init. Resolution order is
/// CLI flag > environment variable > config file (YAML/JSON) > default.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub default_sheet: String,
    pub allow_external_data: bool,
    pub allowed_external_hosts: Vec<String>,
    pub max_external_bytes: u64,
    pub max_tool_range_cells: u64,
    pub max_read_range_cells: u64,
    pub preview_mode: bool,
    pub max_preview_changes: usize,
    pub log_format: LogFormat,
    pub log_level: String,
    pub cache_dir: Option<PathBuf>,
    pub cache_max_entries: u64,
    pub cache_max_bytes: u64,
    pub cache_default_ttl_ms: i64,
    pub cache_encryption_key_hex: Option<String>,
}

impl ServerConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            default_sheet: cli_default_sheet,
            allow_external_data: cli_allow_external_data,
            allowed_external_hosts: cli_allowed_external_hosts,
            max_external_bytes: cli_max_external_bytes,
            max_tool_range_cells: cli_max_tool_range_cells,
            max_read_range_cells: cli_max_read_range_cells,
            preview_mode: cli_preview_mode,
            max_preview_changes: cli_max_preview_changes,
            log_format: cli_log_format,
            log_level: cli_log_level,
            cache_dir: cli_cache_dir,
            cache_max_entries: cli_cache_max_entries,
            cache_max_bytes: cli_cache_max_bytes,
            cache_default_ttl_ms: cli_cache_default_ttl_ms,
            cache_encryption_key_hex: cli_cache_encryption_key_hex,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let default_sheet = cli_default_sheet
            .or(file_config.default_sheet)
            .unwrap_or_else(|| DEFAULT_DEFAULT_SHEET.to_string());
        anyhow::ensure!(!default_sheet.trim().is_empty(), "default_sheet must not be empty");

        let allow_external_data = cli_allow_external_data
            .or(file_config.allow_external_data)
            .unwrap_or(false);

        let allowed_external_hosts = cli_allowed_external_hosts
            .or(file_config.allowed_external_hosts)
            .unwrap_or_default()
            .into_iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect::<Vec<_>>();

        let max_external_bytes = cli_max_external_bytes
            .or(file_config.max_external_bytes)
            .unwrap_or(DEFAULT_MAX_EXTERNAL_BYTES);
        anyhow::ensure!(max_external_bytes > 0, "max_external_bytes must be positive");

        let max_tool_range_cells = cli_max_tool_range_cells
            .or(file_config.max_tool_range_cells)
            .unwrap_or(DEFAULT_MAX_TOOL_RANGE_CELLS);
        anyhow::ensure!(max_tool_range_cells > 0, "max_tool_range_cells must be positive");

        let max_read_range_cells = cli_max_read_range_cells
            .or(file_config.max_read_range_cells)
            .unwrap_or(DEFAULT_MAX_READ_RANGE_CELLS);
        anyhow::ensure!(max_read_range_cells > 0, "max_read_range_cells must be positive");
        anyhow::ensure!(
            max_read_range_cells <= max_tool_range_cells,
            "max_read_range_cells must not exceed max_tool_range_cells"
        );

        let preview_mode = cli_preview_mode.or(file_config.preview_mode).unwrap_or(false);

        let max_preview_changes = cli_max_preview_changes
            .or(file_config.max_preview_changes)
            .unwrap_or(DEFAULT_MAX_PREVIEW_CHANGES)
            .max(1);

        let log_format = cli_log_format
            .or(file_config.log_format)
            .unwrap_or(LogFormat::Pretty);

        let log_level = cli_log_level
            .or(file_config.log_level)
            .unwrap_or_else(|| "info".to_string());

        let cache_dir = cli_cache_dir.or(file_config.cache_dir);

        let cache_max_entries = cli_cache_max_entries
            .or(file_config.cache_max_entries)
            .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES);

        let cache_max_bytes = cli_cache_max_bytes
            .or(file_config.cache_max_bytes)
            .unwrap_or(DEFAULT_CACHE_MAX_BYTES);

        let cache_default_ttl_ms = cli_cache_default_ttl_ms
            .or(file_config.cache_default_ttl_ms)
            .unwrap_or(DEFAULT_CACHE_DEFAULT_TTL_MS);
        anyhow::ensure!(cache_default_ttl_ms >= 0, "cache_default_ttl_ms must not be negative");

        let cache_encryption_key_hex = cli_cache_encryption_key_hex.or(file_config.cache_encryption_key_hex);
        if let Some(key_hex) = cache_encryption_key_hex.as_ref() {
            anyhow::ensure!(
                key_hex.len() == 64 && key_hex.chars().all(|c| c.is_ascii_hexdigit()),
                "cache_encryption_key_hex must be 64 hex characters (32 bytes)"
            );
        }

        Ok(Self {
            default_sheet,
            allow_external_data,
            allowed_external_hosts,
            max_external_bytes,
            max_tool_range_cells,
            max_read_range_cells,
            preview_mode,
            max_preview_changes,
            log_format,
            log_level,
            cache_dir,
            cache_max_entries,
            cache_max_bytes,
            cache_default_ttl_ms,
            cache_encryption_key_hex,
        })
    }

    pub fn is_host_allowed(&self, host: &str) -> bool {
        self.allowed_external_hosts.is_empty()
            || self.allowed_external_hosts.iter().any(|h| h == &host.to_ascii_lowercase())
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(name = "sheet-governor", about = "Spreadsheet tool executor with DLP and caching", version)]
pub struct CliArgs {
    #[arg(long, value_name = "FILE", help = "Path to a configuration file (YAML or JSON)", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, env = "SHEET_GOVERNOR_DEFAULT_SHEET", value_name = "NAME")]
    pub default_sheet: Option<String>,

    #[arg(long, env = "SHEET_GOVERNOR_ALLOW_EXTERNAL_DATA")]
    pub allow_external_data: Option<bool>,

    #[arg(long, env = "SHEET_GOVERNOR_ALLOWED_EXTERNAL_HOSTS", value_delimiter = ',')]
    pub allowed_external_hosts: Option<Vec<String>>,

    #[arg(long, env = "SHEET_GOVERNOR_MAX_EXTERNAL_BYTES")]
    pub max_external_bytes: Option<u64>,

    #[arg(long, env = "SHEET_GOVERNOR_MAX_TOOL_RANGE_CELLS")]
    pub max_tool_range_cells: Option<u64>,

    #[arg(long, env = "SHEET_GOVERNOR_MAX_READ_RANGE_CELLS")]
    pub max_read_range_cells: Option<u64>,

    #[arg(long, env = "SHEET_GOVERNOR_PREVIEW_MODE")]
    pub preview_mode: Option<bool>,

    #[arg(long, env = "SHEET_GOVERNOR_MAX_PREVIEW_CHANGES")]
    pub max_preview_changes: Option<usize>,

    #[arg(long, env = "SHEET_GOVERNOR_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,

    #[arg(long, env = "SHEET_GOVERNOR_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[arg(long, env = "SHEET_GOVERNOR_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    #[arg(long, env = "SHEET_GOVERNOR_CACHE_MAX_ENTRIES")]
    pub cache_max_entries: Option<u64>,

    #[arg(long, env = "SHEET_GOVERNOR_CACHE_MAX_BYTES")]
    pub cache_max_bytes: Option<u64>,

    #[arg(long, env = "SHEET_GOVERNOR_CACHE_DEFAULT_TTL_MS")]
    pub cache_default_ttl_ms: Option<i64>,

    #[arg(long, env = "SHEET_GOVERNOR_CACHE_ENCRYPTION_KEY_HEX")]
    pub cache_encryption_key_hex: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    default_sheet: Option<String>,
    allow_external_data: Option<bool>,
    allowed_external_hosts: Option<Vec<String>>,
    max_external_bytes: Option<u64>,
    max_tool_range_cells: Option<u64>,
    max_read_range_cells: Option<u64>,
    preview_mode: Option<bool>,
    max_preview_changes: Option<usize>,
    log_format: Option<LogFormat>,
    log_level: Option<String>,
    cache_dir: Option<PathBuf>,
    cache_max_entries: Option<u64>,
    cache_max_bytes: Option<u64>,
    cache_default_ttl_ms: Option<i64>,
    cache_encryption_key_hex: Option<String>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => {
            serde_yaml::from_str(&contents).with_context(|| format!("failed to parse YAML config {:?}", path))?
        }
        "json" => serde_json::from_str(&contents).with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_set() {
        let config = ServerConfig::from_args(CliArgs::default()).unwrap();
        assert_eq!(config.default_sheet, "Sheet1");
        assert!(!config.allow_external_data);
        assert_eq!(config.max_tool_range_cells, DEFAULT_MAX_TOOL_RANGE_CELLS);
    }

    #[test]
    fn read_range_cap_cannot_exceed_tool_range_cap() {
        let args = CliArgs {
            max_tool_range_cells: Some(100),
            max_read_range_cells: Some(200),
            ..Default::default()
        };
        assert!(ServerConfig::from_args(args).is_err());
    }

    #[test]
    fn rejects_malformed_encryption_key() {
        let args = CliArgs {
            cache_encryption_key_hex: Some("not-hex".into()),
            ..Default::default()
        };
        assert!(ServerConfig::from_args(args).is_err());
    }

    #[test]
    fn empty_allowlist_allows_every_host() {
        let config = ServerConfig::from_args(CliArgs::default()).unwrap();
        assert!(config.is_host_allowed("anything.example.com"));
    }

    #[test]
    fn nonempty_allowlist_is_exact_match() {
        let args = CliArgs {
            allowed_external_hosts: Some(vec!["api.example.com".into()]),
            ..Default::default()
        };
        let config = ServerConfig::from_args(args).unwrap();
        assert!(config.is_host_allowed("API.EXAMPLE.COM"));
        assert!(!config.is_host_allowed("other.example.com"));
    }
}
