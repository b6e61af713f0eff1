use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    anyhow::{Context, Result, bail},
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    env_subst::substitute_env,
    schema::{Endpoint, TollgateConfig},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "tollgate.toml",
    "tollgate.yaml",
    "tollgate.yml",
    "tollgate.json",
];

const ENV_ENDPOINTS: &str = "TOLLGATE_ENDPOINTS";
const ENV_AUTH_MODE: &str = "TOLLGATE_AUTH_MODE";
const ENV_TOKEN_EXPIRATION: &str = "TOLLGATE_TOKEN_EXPIRATION_SECS";
const ENV_CLIENT_ID: &str = "TOLLGATE_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "TOLLGATE_CLIENT_SECRET";

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Restrict config discovery to `path`. Each call replaces the previous
/// override.
pub fn set_config_dir(path: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = None;
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

/// Load config from `path`, then apply `TOLLGATE_*` environment overrides.
pub fn load_config(path: &Path) -> Result<TollgateConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./tollgate.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/tollgate/tollgate.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to defaults (plus env overrides) when nothing is found or the
/// file cannot be parsed.
pub fn discover_and_load() -> TollgateConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }

    let mut config = TollgateConfig::default();
    if let Err(e) = apply_env_overrides(&mut config) {
        warn!(error = %e, "ignoring invalid environment overrides");
    }
    config
}

/// Find the first config file in standard locations.
///
/// When a config dir override is set, only that directory is searched.
pub fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return first_existing(&dir);
    }

    CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .or_else(|| user_config_dir().and_then(|dir| first_existing(&dir)))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the config directory: override, or `~/.config/tollgate/`.
pub fn config_dir() -> Option<PathBuf> {
    config_dir_override().or_else(user_config_dir)
}

fn user_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("tollgate"))
}

fn parse_config(raw: &str, path: &Path) -> Result<TollgateConfig> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).with_context(|| format!("invalid TOML in {}", path.display())),
        "yaml" | "yml" => {
            serde_yaml::from_str(raw).with_context(|| format!("invalid YAML in {}", path.display()))
        },
        "json" => {
            serde_json::from_str(raw).with_context(|| format!("invalid JSON in {}", path.display()))
        },
        _ => bail!("unsupported config format: .{ext}"),
    }
}

/// Apply `TOLLGATE_*` environment variables on top of file values.
pub fn apply_env_overrides(config: &mut TollgateConfig) -> Result<()> {
    if let Ok(raw) = std::env::var(ENV_ENDPOINTS) {
        config.endpoints = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<Endpoint>)
            .collect::<Result<_, _>>()
            .with_context(|| format!("invalid {ENV_ENDPOINTS}"))?;
    }
    if let Ok(mode) = std::env::var(ENV_AUTH_MODE) {
        config.auth.mode = mode;
    }
    if let Ok(raw) = std::env::var(ENV_TOKEN_EXPIRATION) {
        config.auth.token_expiration_secs = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {ENV_TOKEN_EXPIRATION}: {raw}"))?;
    }
    if let Ok(id) = std::env::var(ENV_CLIENT_ID) {
        config.auth.client_id = Some(id);
    }
    if let Ok(secret) = std::env::var(ENV_CLIENT_SECRET) {
        config.auth.client_secret = Some(Secret::new(secret));
    }
    Ok(())
}
