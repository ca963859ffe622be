//! Audit configuration.
//!
//! Settings load from `VIGIL_AUDIT_*` environment variables. Every value has
//! a default, so an empty environment yields a valid (disabled) config.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};
use crate::event::AuditEventType;
use crate::index_name::{INDEX_NAME_PREFIX, Rollover};
use crate::store::validate_index_name;

const ENV_ENABLED: &str = "VIGIL_AUDIT_ENABLED";
const ENV_OUTPUTS: &str = "VIGIL_AUDIT_OUTPUTS";
const ENV_INDEX_PREFIX: &str = "VIGIL_AUDIT_INDEX_PREFIX";
const ENV_INDEX_ROLLOVER: &str = "VIGIL_AUDIT_INDEX_ROLLOVER";
const ENV_INDEX_QUEUE_MAX_SIZE: &str = "VIGIL_AUDIT_INDEX_QUEUE_MAX_SIZE";
const ENV_INDEX_BULK_SIZE: &str = "VIGIL_AUDIT_INDEX_BULK_SIZE";
const ENV_INDEX_FLUSH_INTERVAL_MS: &str = "VIGIL_AUDIT_INDEX_FLUSH_INTERVAL_MS";
const ENV_INDEX_MAX_RETRIES: &str = "VIGIL_AUDIT_INDEX_MAX_RETRIES";
const ENV_INDEX_RETRY_BACKOFF_MS: &str = "VIGIL_AUDIT_INDEX_RETRY_BACKOFF_MS";
const ENV_INDEX_EVENTS_INCLUDE: &str = "VIGIL_AUDIT_INDEX_EVENTS_INCLUDE";
const ENV_INDEX_EVENTS_EXCLUDE: &str = "VIGIL_AUDIT_INDEX_EVENTS_EXCLUDE";
const ENV_LOGFILE_EVENTS_INCLUDE: &str = "VIGIL_AUDIT_LOGFILE_EVENTS_INCLUDE";
const ENV_LOGFILE_EVENTS_EXCLUDE: &str = "VIGIL_AUDIT_LOGFILE_EVENTS_EXCLUDE";

const DEFAULT_QUEUE_MAX_SIZE: usize = 10_000;
const DEFAULT_BULK_SIZE: usize = 1_000;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// Event types audited unless configured otherwise.
pub const DEFAULT_EVENT_TYPES: [AuditEventType; 8] = [
    AuditEventType::AccessDenied,
    AuditEventType::AccessGranted,
    AuditEventType::AnonymousAccessDenied,
    AuditEventType::AuthenticationFailed,
    AuditEventType::ConnectionDenied,
    AuditEventType::TamperedRequest,
    AuditEventType::RunAsDenied,
    AuditEventType::RunAsGranted,
];

/// Where audit events are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutput {
    /// Persisted to rollover indices.
    Index,
    /// Written to the process log.
    Logfile,
}

impl fmt::Display for AuditOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Index => "index",
            Self::Logfile => "logfile",
        })
    }
}

impl FromStr for AuditOutput {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "index" => Ok(Self::Index),
            "logfile" => Ok(Self::Logfile),
            other => Err(AuditError::settings(format!(
                "unknown audit output [{other}], expected index or logfile"
            ))),
        }
    }
}

/// Include and exclude lists of event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFilter {
    /// Event types to audit.
    pub include: Vec<AuditEventType>,
    /// Event types never audited, even if included.
    pub exclude: Vec<AuditEventType>,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            include: DEFAULT_EVENT_TYPES.to_vec(),
            exclude: Vec::new(),
        }
    }
}

impl EventFilter {
    /// Returns the include list minus the exclude list.
    #[must_use]
    pub fn effective(&self) -> BTreeSet<AuditEventType> {
        self.include
            .iter()
            .copied()
            .filter(|t| !self.exclude.contains(t))
            .collect()
    }

    fn load<F>(get_env: &F, include_key: &str, exclude_key: &str) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            include: parse_list(get_env, include_key)?.unwrap_or(defaults.include),
            exclude: parse_list(get_env, exclude_key)?.unwrap_or(defaults.exclude),
        })
    }
}

/// Settings of the index output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Index name prefix.
    pub prefix: String,
    /// Index time bucket.
    pub rollover: Rollover,
    /// Maximum number of queued events.
    pub queue_max_size: usize,
    /// Maximum number of events per bulk write.
    pub bulk_size: usize,
    /// Interval between periodic flushes, in milliseconds.
    pub flush_interval_ms: u64,
    /// Retries of a failed bulk write.
    pub max_retries: u32,
    /// Initial retry backoff, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Audited event types.
    pub events: EventFilter,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            prefix: INDEX_NAME_PREFIX.to_string(),
            rollover: Rollover::Daily,
            queue_max_size: DEFAULT_QUEUE_MAX_SIZE,
            bulk_size: DEFAULT_BULK_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            events: EventFilter::default(),
        }
    }
}

impl IndexSettings {
    /// Interval between periodic flushes.
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Initial retry backoff.
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Validates sizes, intervals and the prefix.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSettings` naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.prefix.trim().is_empty() {
            return Err(AuditError::settings("index prefix must not be empty"));
        }
        validate_index_name(&self.prefix)
            .map_err(|err| AuditError::settings(format!("index prefix: {err}")))?;
        if self.queue_max_size == 0 {
            return Err(AuditError::settings("queue_max_size must be greater than zero"));
        }
        if self.bulk_size == 0 {
            return Err(AuditError::settings("bulk_size must be greater than zero"));
        }
        if self.bulk_size > self.queue_max_size {
            return Err(AuditError::settings(format!(
                "bulk_size ({}) must not exceed queue_max_size ({})",
                self.bulk_size, self.queue_max_size
            )));
        }
        if self.flush_interval_ms == 0 {
            return Err(AuditError::settings(
                "flush_interval_ms must be greater than zero",
            ));
        }
        if self.retry_backoff_ms == 0 {
            return Err(AuditError::settings(
                "retry_backoff_ms must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Settings of the logfile output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogfileSettings {
    /// Audited event types.
    pub events: EventFilter,
}

/// Top-level audit configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Whether auditing is on.
    pub enabled: bool,
    /// Active outputs.
    pub outputs: Vec<AuditOutput>,
    /// Index output settings.
    pub index: IndexSettings,
    /// Logfile output settings.
    pub logfile: LogfileSettings,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            outputs: vec![AuditOutput::Logfile],
            index: IndexSettings::default(),
            logfile: LogfileSettings::default(),
        }
    }
}

impl AuditSettings {
    /// Loads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSettings` when a value cannot be parsed or the result
    /// fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads settings with a custom environment source.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSettings` when a value cannot be parsed or the result
    /// fails [`validate`](Self::validate).
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let index_defaults = defaults.index;

        let settings = Self {
            enabled: parse_value(&get_env, ENV_ENABLED)?.unwrap_or(defaults.enabled),
            outputs: parse_list(&get_env, ENV_OUTPUTS)?.unwrap_or(defaults.outputs),
            index: IndexSettings {
                prefix: get_env(ENV_INDEX_PREFIX)
                    .map_or(index_defaults.prefix, |p| p.trim().to_string()),
                rollover: parse_value(&get_env, ENV_INDEX_ROLLOVER)?
                    .unwrap_or(index_defaults.rollover),
                queue_max_size: parse_value(&get_env, ENV_INDEX_QUEUE_MAX_SIZE)?
                    .unwrap_or(index_defaults.queue_max_size),
                bulk_size: parse_value(&get_env, ENV_INDEX_BULK_SIZE)?
                    .unwrap_or(index_defaults.bulk_size),
                flush_interval_ms: parse_value(&get_env, ENV_INDEX_FLUSH_INTERVAL_MS)?
                    .unwrap_or(index_defaults.flush_interval_ms),
                max_retries: parse_value(&get_env, ENV_INDEX_MAX_RETRIES)?
                    .unwrap_or(index_defaults.max_retries),
                retry_backoff_ms: parse_value(&get_env, ENV_INDEX_RETRY_BACKOFF_MS)?
                    .unwrap_or(index_defaults.retry_backoff_ms),
                events: EventFilter::load(
                    &get_env,
                    ENV_INDEX_EVENTS_INCLUDE,
                    ENV_INDEX_EVENTS_EXCLUDE,
                )?,
            },
            logfile: LogfileSettings {
                events: EventFilter::load(
                    &get_env,
                    ENV_LOGFILE_EVENTS_INCLUDE,
                    ENV_LOGFILE_EVENTS_EXCLUDE,
                )?,
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Returns true if `output` is configured.
    #[must_use]
    pub fn has_output(&self, output: AuditOutput) -> bool {
        self.outputs.contains(&output)
    }

    /// Validates the settings.
    ///
    /// Index settings are only checked when the index output is configured.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSettings` naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.has_output(AuditOutput::Index) {
            self.index.validate()?;
        }
        Ok(())
    }
}

fn parse_value<F, T>(get_env: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let Some(raw) = get_env(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|err| AuditError::settings(format!("{key}: invalid value '{raw}': {err}")))
}

fn parse_list<F, T>(get_env: &F, key: &str) -> Result<Option<Vec<T>>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr<Err = AuditError> + PartialEq,
{
    let Some(raw) = get_env(key) else {
        return Ok(None);
    };
    let mut items = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let item = part
            .parse::<T>()
            .map_err(|err| AuditError::settings(format!("{key}: {err}")))?;
        if !items.contains(&item) {
            items.push(item);
        }
    }
    Ok(Some(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let settings = AuditSettings::from_env_with(env(&[])).unwrap();
        assert_eq!(settings, AuditSettings::default());
        assert!(!settings.enabled);
        assert_eq!(settings.outputs, vec![AuditOutput::Logfile]);
        assert_eq!(settings.index.prefix, ".security_audit_log");
        assert_eq!(settings.index.flush_interval(), Duration::from_secs(1));
        assert_eq!(settings.index.events.effective().len(), 8);
        assert!(
            !settings
                .index
                .events
                .effective()
                .contains(&AuditEventType::AuthenticationSuccess)
        );
    }

    #[test]
    fn loads_overrides() {
        let settings = AuditSettings::from_env_with(env(&[
            ("VIGIL_AUDIT_ENABLED", "true"),
            ("VIGIL_AUDIT_OUTPUTS", "index, logfile,index"),
            ("VIGIL_AUDIT_INDEX_ROLLOVER", "HOURLY"),
            ("VIGIL_AUDIT_INDEX_BULK_SIZE", "5"),
            ("VIGIL_AUDIT_INDEX_QUEUE_MAX_SIZE", "50"),
            ("VIGIL_AUDIT_INDEX_EVENTS_EXCLUDE", "access_granted"),
            ("VIGIL_AUDIT_LOGFILE_EVENTS_INCLUDE", "authentication_success"),
        ]))
        .unwrap();

        assert!(settings.enabled);
        assert_eq!(settings.outputs, vec![AuditOutput::Index, AuditOutput::Logfile]);
        assert_eq!(settings.index.rollover, Rollover::Hourly);
        assert_eq!(settings.index.bulk_size, 5);
        assert!(
            !settings
                .index
                .events
                .effective()
                .contains(&AuditEventType::AccessGranted)
        );
        assert_eq!(
            settings.logfile.events.effective().into_iter().collect::<Vec<_>>(),
            vec![AuditEventType::AuthenticationSuccess]
        );
    }

    #[test]
    fn rejects_unknown_names() {
        let err = AuditSettings::from_env_with(env(&[("VIGIL_AUDIT_OUTPUTS", "index,syslog")]))
            .unwrap_err();
        assert!(err.to_string().contains("syslog"));

        let err = AuditSettings::from_env_with(env(&[(
            "VIGIL_AUDIT_INDEX_EVENTS_INCLUDE",
            "access_denied,system_access_granted",
        )]))
        .unwrap_err();
        assert!(matches!(err, AuditError::InvalidSettings { .. }));
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(
            AuditSettings::from_env_with(env(&[("VIGIL_AUDIT_INDEX_BULK_SIZE", "lots")])).is_err()
        );
        assert!(AuditSettings::from_env_with(env(&[("VIGIL_AUDIT_ENABLED", "yes")])).is_err());
    }

    #[test]
    fn index_validation_only_applies_to_index_output() {
        let zero_queue = [("VIGIL_AUDIT_INDEX_QUEUE_MAX_SIZE", "0")];
        assert!(AuditSettings::from_env_with(env(&zero_queue)).is_ok());

        let with_index = [
            ("VIGIL_AUDIT_OUTPUTS", "index"),
            ("VIGIL_AUDIT_INDEX_QUEUE_MAX_SIZE", "0"),
        ];
        assert!(AuditSettings::from_env_with(env(&with_index)).is_err());
    }

    #[test]
    fn index_validation_rules() {
        let valid = IndexSettings::default();
        assert!(valid.validate().is_ok());

        let mut s = valid.clone();
        s.bulk_size = s.queue_max_size + 1;
        assert!(s.validate().is_err());

        let mut s = valid.clone();
        s.prefix = "  ".into();
        assert!(s.validate().is_err());

        let mut s = valid.clone();
        s.prefix = "audit/log".into();
        assert!(s.validate().is_err());

        let mut s = valid.clone();
        s.flush_interval_ms = 0;
        assert!(s.validate().is_err());

        let mut s = valid;
        s.max_retries = 0;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn empty_include_list_audits_nothing() {
        let settings =
            AuditSettings::from_env_with(env(&[("VIGIL_AUDIT_INDEX_EVENTS_INCLUDE", "")])).unwrap();
        assert!(settings.index.events.effective().is_empty());
    }
}
