use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::DocketError;

pub const CONFIG_FILE: &str = "docket.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub term: Option<String>,
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub scripts_dir: Option<String>,
    #[serde(default)]
    pub max_amicus_briefs: Option<usize>,
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub steps: Option<Vec<StepEntry>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub oyez: Option<ServiceEntry>,
    #[serde(default)]
    pub scotus: Option<ServiceEntry>,
    #[serde(default)]
    pub courtlistener: Option<ServiceEntry>,
    #[serde(default)]
    pub scoring: Option<ServiceEntry>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct ServiceEntry {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub request_delay_ms: Option<u64>,
    #[serde(default)]
    pub retry_base_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepEntry {
    pub script: String,
    pub label: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default = "default_true")]
    pub needs_case_dir: bool,
    #[serde(default)]
    pub cost: f64,
}

fn default_true() -> bool {
    true
}

/// Connection settings for one external service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub name: &'static str,
    pub base_url: String,
    pub request_delay: Duration,
    pub retry_base: Duration,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub data_dir: Utf8PathBuf,
    pub term: String,
    pub interpreter: String,
    pub scripts_dir: Utf8PathBuf,
    pub max_amicus_briefs: usize,
    pub step_timeout: Duration,
    pub oyez: ServiceSettings,
    pub scotus: ServiceSettings,
    pub courtlistener: ServiceSettings,
    pub scoring: ServiceSettings,
    pub steps: Option<Vec<StepEntry>>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads an explicit config path, else `docket.json` in the working
    /// directory, else the user config directory; falls back to defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, DocketError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => default_config_path(),
        };

        let config = match config_path {
            Some(config_path) => {
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| DocketError::ConfigRead(config_path.clone()))?;
                serde_json::from_str(&content)
                    .map_err(|err| DocketError::ConfigParse(err.to_string()))?
            }
            None => Config::default(),
        };

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, DocketError> {
        let term = config.term.unwrap_or_else(|| "2025".to_string());
        let term = term.trim().trim_start_matches("OT").to_string();
        if term.len() != 4 || !term.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(DocketError::ConfigParse(format!(
                "term must be a four-digit year, got {term}"
            )));
        }

        let max_amicus_briefs = config.max_amicus_briefs.unwrap_or(5);
        if max_amicus_briefs == 0 {
            return Err(DocketError::ConfigParse(
                "max_amicus_briefs must be at least 1".to_string(),
            ));
        }

        if let Some(steps) = &config.steps {
            if steps.is_empty() {
                return Err(DocketError::ConfigParse(
                    "steps must not be empty when given".to_string(),
                ));
            }
        }

        let services = config.services;
        Ok(ResolvedConfig {
            data_dir: Utf8PathBuf::from(config.data_dir.unwrap_or_else(|| "data".to_string())),
            term,
            interpreter: config.interpreter.unwrap_or_else(|| "python3".to_string()),
            scripts_dir: Utf8PathBuf::from(config.scripts_dir.unwrap_or_else(|| ".".to_string())),
            max_amicus_briefs,
            step_timeout: Duration::from_secs(config.step_timeout_secs.unwrap_or(30 * 60)),
            oyez: service_settings("oyez", services.oyez, "https://api.oyez.org", 1_000),
            scotus: service_settings(
                "supremecourt.gov",
                services.scotus,
                "https://www.supremecourt.gov",
                2_000,
            ),
            courtlistener: service_settings(
                "courtlistener",
                services.courtlistener,
                "https://www.courtlistener.com/api/rest/v4",
                30_000,
            ),
            scoring: service_settings(
                "anthropic",
                services.scoring,
                "https://api.anthropic.com/v1",
                0,
            ),
            steps: config.steps,
        })
    }
}

fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    BaseDirs::new()
        .map(|dirs| dirs.config_dir().join("docket-pipeline").join(CONFIG_FILE))
        .filter(|path| path.exists())
}

fn service_settings(
    name: &'static str,
    entry: Option<ServiceEntry>,
    default_base: &str,
    default_delay_ms: u64,
) -> ServiceSettings {
    let entry = entry.unwrap_or_default();
    ServiceSettings {
        name,
        base_url: entry
            .base_url
            .unwrap_or_else(|| default_base.to_string())
            .trim_end_matches('/')
            .to_string(),
        request_delay: Duration::from_millis(entry.request_delay_ms.unwrap_or(default_delay_ms)),
        retry_base: Duration::from_millis(entry.retry_base_ms.unwrap_or(10_000)),
        max_retries: entry.max_retries.unwrap_or(3),
    }
}

/// Credentials read from the environment (after `.env` has been loaded).
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub courtlistener_token: Option<String>,
    pub anthropic_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self {
            courtlistener_token: non_empty_var("COURTLISTENER_API_TOKEN"),
            anthropic_api_key: non_empty_var("ANTHROPIC_API_KEY"),
        }
    }

    pub fn require_courtlistener(&self) -> Result<&str, DocketError> {
        self.courtlistener_token
            .as_deref()
            .ok_or(DocketError::MissingCredential("COURTLISTENER_API_TOKEN"))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_config_empty() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.term, "2025");
        assert_eq!(resolved.max_amicus_briefs, 5);
        assert_eq!(resolved.step_timeout, Duration::from_secs(1800));
        assert_eq!(resolved.scotus.request_delay, Duration::from_secs(2));
        assert_eq!(resolved.courtlistener.max_retries, 3);
        assert_eq!(resolved.courtlistener.retry_base, Duration::from_secs(10));
    }

    #[test]
    fn term_accepts_ot_prefix() {
        let config = Config {
            term: Some("OT2024".to_string()),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.term, "2024");
    }

    #[test]
    fn rejects_malformed_term_and_empty_steps() {
        let config = Config {
            term: Some("25".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            ConfigLoader::resolve_config(config),
            Err(DocketError::ConfigParse(_))
        ));

        let config = Config {
            steps: Some(Vec::new()),
            ..Config::default()
        };
        assert!(matches!(
            ConfigLoader::resolve_config(config),
            Err(DocketError::ConfigParse(_))
        ));
    }

    #[test]
    fn service_overrides_and_step_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "services": {
                    "courtlistener": {
                        "base_url": "http://localhost:8080/api/",
                        "request_delay_ms": 0,
                        "max_retries": 1
                    }
                },
                "steps": [{"script": "only.py", "label": "Only"}]
            }"#,
        )
        .unwrap();
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.courtlistener.base_url, "http://localhost:8080/api");
        assert_eq!(resolved.courtlistener.request_delay, Duration::ZERO);
        assert_eq!(resolved.courtlistener.max_retries, 1);
        assert_eq!(resolved.oyez.base_url, "https://api.oyez.org");

        let steps = resolved.steps.unwrap();
        assert!(steps[0].needs_case_dir);
        assert_eq!(steps[0].output, None);
        assert_eq!(steps[0].cost, 0.0);
    }
}
