use std::path::{Path, PathBuf};

use super::schema::{default_settings_path, Settings};
use crate::error::ConfigError;
use crate::pipeline::ActionMode;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Loads settings from `path`, or from `~/.mailsort/config.yaml` when it
/// exists, or falls back to defaults. `MAILSORT_*` env vars override the file.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut settings = match path {
        Some(path) => read_settings(path)?,
        None => {
            let default_path = default_settings_path();
            if default_path.exists() {
                read_settings(&default_path)?
            } else {
                Settings::default()
            }
        }
    };

    apply_env_overrides(&mut settings)?;
    validate_settings(&settings)?;
    Ok(settings)
}

fn read_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    load_settings_from_str(&content)
}

/// Parses and validates a settings document. Env overrides are not applied.
pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }
    let settings: Settings = serde_yaml::from_str(content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

fn apply_env_overrides(settings: &mut Settings) -> Result<(), ConfigError> {
    if let Some(v) = env_value("MAILSORT_DATABASE_PATH") {
        settings.database_path = PathBuf::from(v);
    }
    if let Some(v) = env_value("MAILSORT_RULES_PATH") {
        settings.rules_path = PathBuf::from(v);
    }
    if let Some(v) = env_value("MAILSORT_LOG_LEVEL") {
        settings.log_level = v;
    }
    if let Some(v) = env_value("MAILSORT_OLLAMA_HOST") {
        settings.classifier.host = v;
    }
    if let Some(v) = env_value("MAILSORT_OLLAMA_MODEL") {
        settings.classifier.model = v;
    }
    if let Some(v) = env_value("MAILSORT_ACTION_MODE") {
        settings.actions.mode = ActionMode::parse(&v).ok_or_else(|| ConfigError::InvalidValue {
            key: "MAILSORT_ACTION_MODE".to_string(),
            reason: format!("expected 'auto' or 'suggest', got '{}'", v),
        })?;
    }
    Ok(())
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    let invalid = |key: &str, reason: String| ConfigError::InvalidValue {
        key: key.to_string(),
        reason,
    };

    if settings.scheduler.interval_secs == 0 {
        return Err(invalid("scheduler.interval_secs", "must be greater than 0".into()));
    }
    if settings.scheduler.max_concurrent_accounts == 0 {
        return Err(invalid(
            "scheduler.max_concurrent_accounts",
            "must be at least 1".into(),
        ));
    }
    if !(1..=500).contains(&settings.sync.fetch_limit) {
        return Err(invalid(
            "sync.fetch_limit",
            format!("must be between 1 and 500, got {}", settings.sync.fetch_limit),
        ));
    }
    if settings.sync.batch_limit == 0 {
        return Err(invalid("sync.batch_limit", "must be at least 1".into()));
    }
    if settings.sync.body_preview_chars == 0 {
        return Err(invalid("sync.body_preview_chars", "must be at least 1".into()));
    }
    if settings.sync.folder.trim().is_empty() {
        return Err(invalid("sync.folder", "must not be empty".into()));
    }
    if settings.classifier.max_concurrent == 0 {
        return Err(invalid("classifier.max_concurrent", "must be at least 1".into()));
    }
    if settings.retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts", "must be at least 1".into()));
    }
    if settings.retry.base_delay_ms > settings.retry.max_delay_ms {
        return Err(invalid(
            "retry.base_delay_ms",
            "must not exceed retry.max_delay_ms".into(),
        ));
    }
    if !LOG_LEVELS.contains(&settings.log_level.to_ascii_lowercase().as_str()) {
        return Err(invalid(
            "log_level",
            format!("expected one of {}", LOG_LEVELS.join(", ")),
        ));
    }
    for client in settings.oauth.gmail.iter().chain(settings.oauth.outlook.iter()) {
        if client.client_id.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "oauth client_id must not be empty".to_string(),
            });
        }
    }
    Ok(())
}
