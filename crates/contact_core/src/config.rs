//! Run configuration loaded from TOML.
//!
//! # Responsibility
//! - Bootstrap settings for the store, logging and batch imports.
//! - Own the versioned source-label to canonical-tag mapping.
//!
//! # Invariants
//! - A loaded `AppConfig` is validated and never mutated afterwards; one
//!   instance is shared read-only by a whole run.
//! - Tag mapping keys are stored normalized, so lookups are insensitive to
//!   case and inner whitespace.

use crate::model::normalize::{normalize_source_system, normalize_tag};
use crate::service::scoring_engine::ConfidenceTier;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_MAX_ERROR_RATE: f64 = 0.10;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 250;

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(toml::de::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "malformed config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value)
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// SQLite file; in-memory store when absent.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub import: ImportSettings,
    #[serde(default)]
    pub tag_mapping: TagMapping,
    #[serde(default)]
    pub mailing: MailingSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LoggingSettings {
    /// `trace|debug|info|warn|error`; build default when absent.
    #[serde(default)]
    pub level: Option<String>,
    /// Absolute log directory; file logging stays off when absent.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImportSettings {
    /// Share of invalid rows above which a whole batch is rejected.
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,
    /// Sources allowed to overwrite protected fields; also earn the
    /// trusted-source scoring bonus.
    #[serde(default)]
    pub trusted_sources: BTreeSet<String>,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            max_error_rate: default_max_error_rate(),
            trusted_sources: BTreeSet::new(),
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MailingSettings {
    /// Lowest tier admitted to the mailing list.
    #[serde(default = "default_min_tier", deserialize_with = "deserialize_tier")]
    pub min_tier: ConfidenceTier,
}

impl Default for MailingSettings {
    fn default() -> Self {
        Self {
            min_tier: default_min_tier(),
        }
    }
}

fn default_min_tier() -> ConfidenceTier {
    ConfidenceTier::High
}

fn deserialize_tier<'de, D>(deserializer: D) -> Result<ConfidenceTier, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    ConfidenceTier::parse(&raw).ok_or_else(|| {
        D::Error::custom(format!(
            "unknown tier `{raw}`, expected very_low, low, medium, high or very_high"
        ))
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl RetrySettings {
    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1_u64 << exponent))
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

fn default_max_error_rate() -> f64 {
    DEFAULT_MAX_ERROR_RATE
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

/// Versioned source-label to canonical-tag mapping.
///
/// Loaded once per run. Labels without an entry pass through normalized.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawTagMapping")]
pub struct TagMapping {
    version: String,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawTagMapping {
    #[serde(default = "default_tag_mapping_version")]
    version: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

fn default_tag_mapping_version() -> String {
    "unversioned".to_string()
}

impl TagMapping {
    /// Builds a validated mapping from raw label pairs.
    pub fn new(
        version: impl Into<String>,
        labels: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let version = version.into().trim().to_string();
        if version.is_empty() {
            return Err(ConfigError::Invalid(
                "tag_mapping.version must not be blank".to_string(),
            ));
        }

        let mut normalized = BTreeMap::new();
        for (label, tag) in labels {
            let key = normalize_tag(&label).ok_or_else(|| {
                ConfigError::Invalid("tag_mapping contains a blank label".to_string())
            })?;
            let value = normalize_tag(&tag).ok_or_else(|| {
                ConfigError::Invalid(format!("tag_mapping label `{key}` maps to a blank tag"))
            })?;
            if normalized.insert(key.clone(), value).is_some() {
                return Err(ConfigError::Invalid(format!(
                    "tag_mapping labels collide after normalization: `{key}`"
                )));
            }
        }

        Ok(Self {
            version,
            labels: normalized,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Canonical tag for a source label, or the normalized label itself.
    pub fn map_label(&self, label: &str) -> Option<String> {
        let key = normalize_tag(label)?;
        Some(self.labels.get(&key).cloned().unwrap_or(key))
    }
}

impl Default for TagMapping {
    fn default() -> Self {
        Self {
            version: default_tag_mapping_version(),
            labels: BTreeMap::new(),
        }
    }
}

impl TryFrom<RawTagMapping> for TagMapping {
    type Error = ConfigError;

    fn try_from(value: RawTagMapping) -> Result<Self, Self::Error> {
        Self::new(value.version, value.labels)
    }
}

impl AppConfig {
    /// Reads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text)?;
        config.import.trusted_sources = config
            .import
            .trusted_sources
            .iter()
            .map(|source| normalize_source_system(source))
            .filter(|source| !source.is_empty())
            .collect();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let rate = self.import.max_error_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::Invalid(format!(
                "import.max_error_rate must be within 0.0..=1.0, got {rate}"
            )));
        }
        if self.import.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "import.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(dir) = &self.logging.dir {
            if !dir.is_absolute() {
                return Err(ConfigError::Invalid(
                    "logging.dir must be an absolute path".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, ConfigError, TagMapping};
    use crate::service::scoring_engine::ConfidenceTier;
    use std::time::Duration;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.database_path, None);
        assert!((config.import.max_error_rate - 0.10).abs() < f64::EPSILON);
        assert_eq!(config.import.retry.max_attempts, 3);
        assert_eq!(config.import.retry.base_delay_ms, 250);
        assert!(config.tag_mapping.is_empty());
        assert_eq!(config.mailing.min_tier, ConfidenceTier::High);
    }

    #[test]
    fn mailing_tier_is_parsed_case_insensitively() {
        let config =
            AppConfig::from_toml_str("[mailing]\nmin_tier = \" Medium \"\n").unwrap();
        assert_eq!(config.mailing.min_tier, ConfidenceTier::Medium);

        let err = AppConfig::from_toml_str("[mailing]\nmin_tier = \"gold\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn full_document_is_parsed_and_normalized() {
        let config = AppConfig::from_toml_str(
            r#"
            database_path = "/var/lib/contacts/store.sqlite3"

            [logging]
            level = "debug"
            dir = "/var/log/contacts"

            [import]
            max_error_rate = 0.25
            trusted_sources = [" CRM ", "hubspot"]

            [import.retry]
            max_attempts = 5
            base_delay_ms = 100

            [tag_mapping]
            version = "2024-06"

            [tag_mapping.labels]
            "Course  Buyer" = "customer"
            "VIP Member" = "vip"
            "#,
        )
        .unwrap();

        assert!(config.import.trusted_sources.contains("crm"));
        assert_eq!(config.import.retry.max_attempts, 5);
        assert_eq!(config.tag_mapping.version(), "2024-06");
        assert_eq!(
            config.tag_mapping.map_label("course buyer").as_deref(),
            Some("customer")
        );
        assert_eq!(
            config.tag_mapping.map_label("  Newsletter ").as_deref(),
            Some("newsletter")
        );
        assert_eq!(config.tag_mapping.map_label("   "), None);
    }

    #[test]
    fn colliding_labels_are_rejected() {
        let err = TagMapping::new(
            "v1",
            vec![
                ("VIP".to_string(), "vip".to_string()),
                ("vip".to_string(), "gold".to_string()),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn out_of_range_error_rate_is_rejected() {
        let err = AppConfig::from_toml_str("[import]\nmax_error_rate = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = AppConfig::from_toml_str("databse_path = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn retry_delay_doubles_per_attempt() {
        let config = AppConfig::default();
        let retry = &config.import.retry;
        assert_eq!(retry.delay_for(1), Duration::from_millis(250));
        assert_eq!(retry.delay_for(3), Duration::from_millis(1_000));
    }
}
