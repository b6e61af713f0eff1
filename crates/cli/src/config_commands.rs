use std::path::{Path, PathBuf};

use {
    anyhow::{Result, bail},
    clap::Subcommand,
    tollgate_config::{
        ConfigIssue, IssueSeverity, TollgateConfig, apply_env_overrides, find_config_file,
        load_config,
    },
    tracing::debug,
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the resolved configuration as JSON (secrets redacted).
    Show,
    /// Validate the configuration; fails when errors are found.
    Check,
    /// Print the path of the config file that would be loaded.
    Path,
}

pub fn handle_config(action: ConfigAction, explicit: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => show(&resolve(explicit)?),
        ConfigAction::Check => check(&resolve(explicit)?),
        ConfigAction::Path => path(explicit),
    }
}

/// Load the config the way a service would, but surface parse errors
/// instead of falling back to defaults.
fn resolve(explicit: Option<&Path>) -> Result<TollgateConfig> {
    match explicit.map(Path::to_path_buf).or_else(find_config_file) {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path)
        },
        None => {
            debug!("no config file found, using defaults");
            let mut config = TollgateConfig::default();
            apply_env_overrides(&mut config)?;
            Ok(config)
        },
    }
}

fn show(config: &TollgateConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn check(config: &TollgateConfig) -> Result<()> {
    let issues = config.validate();
    print!("{}", render_issues(&issues));

    let errors = issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::Error)
        .count();
    if errors > 0 {
        bail!("configuration has {errors} error(s)");
    }
    Ok(())
}

fn path(explicit: Option<&Path>) -> Result<()> {
    let found: Option<PathBuf> = explicit.map(Path::to_path_buf).or_else(find_config_file);
    match found {
        Some(p) => println!("{}", p.display()),
        None => println!("no config file found, defaults apply"),
    }
    Ok(())
}

fn render_issues(issues: &[ConfigIssue]) -> String {
    if issues.is_empty() {
        return "configuration OK\n".into();
    }
    issues
        .iter()
        .map(|i| {
            let level = match i.severity {
                IssueSeverity::Warning => "warning",
                IssueSeverity::Error => "error",
            };
            format!("{level}: {}: {}\n", i.field, i.message)
        })
        .collect()
}
