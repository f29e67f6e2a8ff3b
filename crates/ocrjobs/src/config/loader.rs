use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub const ENV_ENGINE_URL: &str = "OCRJOBS_ENGINE_URL";
pub const ENV_DATABASE_PATH: &str = "OCRJOBS_DATABASE_PATH";
pub const ENV_LOG_LEVEL: &str = "OCRJOBS_LOG_LEVEL";

const MAX_RETRIES_LIMIT: u32 = 10;
const MAX_RETRY_DELAY_SECS: u64 = 3600;
const MAX_SWEEP_BATCH_SIZE: u32 = 100;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = serde_json::from_str(content)?;

    apply_env_overrides(&mut config);

    validate_config(&config)?;

    Ok(config)
}

/// Loads `path` when given, otherwise starts from defaults. Environment
/// overrides apply either way.
pub fn load_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let mut config = Config::default();
            apply_env_overrides(&mut config);
            validate_config(&config)?;
            Ok(config)
        }
    }
}

pub fn apply_env_overrides(config: &mut Config) {
    if let Some(url) = env_value(ENV_ENGINE_URL) {
        config.engine.base_url = url;
    }
    if let Some(path) = env_value(ENV_DATABASE_PATH) {
        config.database.path = path.into();
    }
    if let Some(level) = env_value(ENV_LOG_LEVEL) {
        config.logging.level = level;
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let url = config.engine.base_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::Validation {
            message: format!(
                "engine.base_url must be an http(s) URL, got '{}'",
                config.engine.base_url
            ),
        });
    }

    if config.engine.timeout_secs == 0 || config.engine.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "engine timeouts must be greater than zero".to_string(),
        });
    }

    if config.scheduler.max_retries > MAX_RETRIES_LIMIT {
        return Err(ConfigError::Validation {
            message: format!(
                "scheduler.max_retries must be at most {}, got {}",
                MAX_RETRIES_LIMIT, config.scheduler.max_retries
            ),
        });
    }

    if config.scheduler.retry_delay_secs > MAX_RETRY_DELAY_SECS {
        return Err(ConfigError::Validation {
            message: format!(
                "scheduler.retry_delay_secs must be at most {}, got {}",
                MAX_RETRY_DELAY_SECS, config.scheduler.retry_delay_secs
            ),
        });
    }

    if config.scheduler.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler.sweep_interval_secs must be greater than zero".to_string(),
        });
    }

    if !(1..=MAX_SWEEP_BATCH_SIZE).contains(&config.scheduler.sweep_batch_size) {
        return Err(ConfigError::Validation {
            message: format!(
                "scheduler.sweep_batch_size must be within 1..={}, got {}",
                MAX_SWEEP_BATCH_SIZE, config.scheduler.sweep_batch_size
            ),
        });
    }

    if config.database.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "database.path must not be empty".to_string(),
        });
    }

    Ok(())
}
