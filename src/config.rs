#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_YT_DLP: &str = "yt-dlp";
pub const DEFAULT_BOOTSTRAP_DIR: &str = "output/mp3";

const DOWNLOADS_DIR: &str = "Downloads";

/// Everything the binaries need to know before they touch yt-dlp.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory yt-dlp writes into; defaults to the user's Downloads folder.
    pub output_root: PathBuf,
    pub host: String,
    pub port: u16,
    pub yt_dlp: PathBuf,
    /// Gives every invocation its own subdirectory below `output_root`.
    pub isolate_requests: bool,
    /// Created at startup next to the working directory.
    pub bootstrap_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub output_root: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub yt_dlp: Option<PathBuf>,
    pub isolate_requests: Option<bool>,
    pub env_path: Option<PathBuf>,
}

/// Which environment variable names the user's home directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Windows,
    Unix,
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    fn home_var(self) -> &'static str {
        match self {
            Self::Windows => "USERPROFILE",
            Self::Unix => "HOME",
        }
    }
}

pub fn resolve_server_config(overrides: ConfigOverrides) -> Result<ServerConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_server_config(&file_vars, env_var_string, HostPlatform::current(), overrides)
}

fn build_server_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    platform: HostPlatform,
    overrides: ConfigOverrides,
) -> Result<ServerConfig> {
    // The Downloads fallback is only resolved when nothing else names a root,
    // so a missing HOME is harmless once TOOLBOX_OUTPUT_DIR is set.
    let output_root = match overrides
        .output_root
        .or_else(|| lookup_value("TOOLBOX_OUTPUT_DIR", file_vars, &env_lookup).map(PathBuf::from))
    {
        Some(root) => root,
        None => default_output_dir(&env_lookup, platform)?,
    };
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("TOOLBOX_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value("TOOLBOX_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let yt_dlp = overrides
        .yt_dlp
        .or_else(|| lookup_value("TOOLBOX_YT_DLP", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YT_DLP));
    let isolate_requests = overrides
        .isolate_requests
        .or_else(|| {
            lookup_value("TOOLBOX_ISOLATE_REQUESTS", file_vars, &env_lookup)
                .and_then(|value| parse_flag(&value))
        })
        .unwrap_or(false);
    let bootstrap_dir = lookup_value("TOOLBOX_BOOTSTRAP_DIR", file_vars, &env_lookup)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BOOTSTRAP_DIR));

    Ok(ServerConfig {
        output_root,
        host,
        port,
        yt_dlp,
        isolate_requests,
        bootstrap_dir,
    })
}

/// Returns `<home>/Downloads`, failing when the platform's home variable is
/// absent.
pub fn default_output_dir(
    env_lookup: impl Fn(&str) -> Option<String>,
    platform: HostPlatform,
) -> Result<PathBuf> {
    let key = platform.home_var();
    let home = env_lookup(key).ok_or_else(|| anyhow!("{key} not set"))?;
    Ok(PathBuf::from(home).join(DOWNLOADS_DIR))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

/// Reads `KEY=value` pairs, tolerating `export`, quotes and comments. A
/// missing file yields an empty map.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    Ok(content.lines().filter_map(parse_env_line).collect())
}

fn parse_env_line(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let raw = raw.trim();
    let value = raw
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .or_else(|| raw.strip_prefix('\'').and_then(|value| value.strip_suffix('\'')))
        .unwrap_or(raw);
    Some((key.to_string(), value.to_string()))
}
