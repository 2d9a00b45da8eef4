//! Agent configuration
//!
//! Every tunable of a run lives in [`AgentConfig`]. All sections default to
//! the production values, so a config file only names what it overrides.
//! A config that fails [`AgentConfig::validate`] must not be run.

use crate::aggregate::DEFAULT_WINDOW_SECS;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete configuration of one agent run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Autonomy guardrails
    pub guardrail: GuardrailConfig,
    /// Event window
    pub aggregation: AggregationConfig,
    /// Loop cadence and buffers
    pub control: ControlConfig,
    /// Diagnosis cutoffs
    pub rules: RuleThresholds,
    /// Lesson feedback
    pub feedback: FeedbackConfig,
    /// Parameters handed to external actions
    pub actions: ActionConfig,
    /// Lesson persistence
    pub history: HistoryConfig,
    /// Synthetic signal source
    pub source: SourceConfig,
}

/// What the guardrail does when volume exceeds the autonomous limit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeBreachPolicy {
    /// Hand the decision to a human
    #[default]
    Escalate,
    /// Record a non-escalated skip and alert
    Skip,
}

/// Guardrail thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    /// Minimum confidence for autonomous execution
    pub confidence_threshold: f64,
    /// Maximum window volume for autonomous execution
    pub max_autonomous_volume: u64,
    /// Behaviour on volume breach
    pub volume_breach: VolumeBreachPolicy,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            max_autonomous_volume: 5000,
            volume_breach: VolumeBreachPolicy::Escalate,
        }
    }
}

/// Aggregation window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Window length in seconds
    pub window_secs: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }
}

/// Control loop cadence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Tick period in milliseconds
    pub tick_ms: u64,
    /// Lessons consulted per cycle
    pub lesson_window: usize,
    /// Cycle records kept in short-term memory
    pub short_term_capacity: usize,
    /// Bound on one signal source call
    pub source_timeout_ms: u64,
    /// Bound on one external action call
    pub dispatch_timeout_ms: u64,
    /// Stop after this many cycles (run forever when unset)
    pub max_cycles: Option<u64>,
}

impl ControlConfig {
    /// Tick period
    #[inline]
    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Signal source timeout
    #[inline]
    #[must_use]
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    /// Action dispatch timeout
    #[inline]
    #[must_use]
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_ms: 5_000,
            lesson_window: 5,
            short_term_capacity: 200,
            source_timeout_ms: 2_000,
            dispatch_timeout_ms: 2_000,
            max_cycles: None,
        }
    }
}

/// Cutoffs used by the ordered diagnosis rules
///
/// Shares are fractions of `failure_count`; comparisons are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleThresholds {
    /// Below this many transactions nothing is diagnosed
    pub min_sample: u64,
    /// Failures needed before attributing them to an entity or code
    pub min_attributable_failures: u64,
    /// Absolute floor on a code count for code-driven rules
    pub min_code_failures: u64,
    /// USER_DECLINED share that makes failures user-related
    pub user_declined_share: f64,
    /// Top bank share that counts as concentrated
    pub bank_concentration: f64,
    /// Top issuer share that counts as concentrated
    pub issuer_concentration: f64,
    /// Entity share at which the path is suppressed rather than rerouted
    pub extreme_concentration: f64,
    /// ISSUER_DOWN share that indicates issuer degradation
    pub issuer_down_share: f64,
    /// BANK_TIMEOUT share that indicates bank timeouts
    pub bank_timeout_share: f64,
    /// NETWORK_ERROR share that indicates a network failure
    pub network_error_share: f64,
    /// Failure rate considered a spike
    pub failure_spike_rate: f64,
    /// Latency that, with a spike, points at the network
    pub critical_latency_ms: f64,
    /// Latency that, with a spike, points at retries or routing
    pub elevated_latency_ms: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            min_sample: 10,
            min_attributable_failures: 3,
            min_code_failures: 2,
            user_declined_share: 0.5,
            bank_concentration: 0.6,
            issuer_concentration: 0.6,
            extreme_concentration: 0.8,
            issuer_down_share: 0.4,
            bank_timeout_share: 0.4,
            network_error_share: 0.35,
            failure_spike_rate: 0.15,
            critical_latency_ms: 1800.0,
            elevated_latency_ms: 1500.0,
        }
    }
}

/// Lesson feedback bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Largest confidence adjustment lessons may apply
    pub max_nudge: f64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self { max_nudge: 0.05 }
    }
}

/// Parameters passed to external actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Share of traffic moved by a reroute
    pub reroute_percent: f64,
    /// Backoff installed by a retry policy change
    pub retry_backoff_ms: u64,
    /// Retry ceiling installed by a retry policy change
    pub max_retries: Option<u32>,
    /// Longest reason string attached to an action
    pub reason_max_len: usize,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            reroute_percent: 30.0,
            retry_backoff_ms: 2_000,
            max_retries: None,
            reason_max_len: 50,
        }
    }
}

/// Lesson persistence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Append-only lesson log; lessons stay in memory when unset
    pub path: Option<PathBuf>,
}

/// Synthetic traffic profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// RNG seed; random when unset
    pub seed: Option<u64>,
    /// Events generated per tick
    pub events_per_tick: usize,
    /// Bank that intermittently degrades
    pub degraded_bank: String,
    /// Probability that the degraded bank reports ISSUER_DOWN
    pub degradation_rate: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            seed: None,
            events_per_tick: 8,
            degraded_bank: "SBI".to_string(),
            degradation_rate: 0.35,
        }
    }
}

impl AgentConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With tick period
    #[inline]
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.control.tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With cycle limit
    #[inline]
    #[must_use]
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.control.max_cycles = Some(cycles);
        self
    }

    /// With lesson log path
    #[inline]
    #[must_use]
    pub fn with_history_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.history.path = Some(path.into());
        self
    }

    /// Parse from TOML
    ///
    /// # Errors
    /// Returns error if TOML is invalid
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml)?)
    }

    /// Parse from YAML
    ///
    /// # Errors
    /// Returns error if YAML is invalid
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load and validate a config file, picking the format from its extension
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed, or validated
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let config = match ext.as_str() {
            "toml" => Self::from_toml_str(&text)?,
            "yaml" | "yml" => Self::from_yaml_str(&text)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the loop must not start with
    ///
    /// # Errors
    /// Returns the first invalid setting
    pub fn validate(&self) -> Result<(), ConfigError> {
        unit("guardrail.confidence_threshold", self.guardrail.confidence_threshold)?;

        let window = self.aggregation.window_secs;
        if window == 0 || window > 86_400 {
            return Err(ConfigError::out_of_range(
                "aggregation.window_secs",
                window,
                "1..=86400",
            ));
        }

        let control = &self.control;
        positive("control.tick_ms", control.tick_ms)?;
        positive("control.source_timeout_ms", control.source_timeout_ms)?;
        positive("control.dispatch_timeout_ms", control.dispatch_timeout_ms)?;
        positive("control.lesson_window", control.lesson_window as u64)?;
        positive("control.short_term_capacity", control.short_term_capacity as u64)?;

        self.rules.validate()?;
        unit("feedback.max_nudge", self.feedback.max_nudge)?;

        let pct = self.actions.reroute_percent;
        if !pct.is_finite() || pct <= 0.0 || pct > 100.0 {
            return Err(ConfigError::out_of_range(
                "actions.reroute_percent",
                pct,
                "(0, 100]",
            ));
        }

        unit("source.degradation_rate", self.source.degradation_rate)?;
        Ok(())
    }
}

impl RuleThresholds {
    /// Check ranges and ordering of the cutoffs
    ///
    /// # Errors
    /// Returns the first invalid cutoff
    pub fn validate(&self) -> Result<(), ConfigError> {
        unit("rules.user_declined_share", self.user_declined_share)?;
        unit("rules.bank_concentration", self.bank_concentration)?;
        unit("rules.issuer_concentration", self.issuer_concentration)?;
        unit("rules.extreme_concentration", self.extreme_concentration)?;
        unit("rules.issuer_down_share", self.issuer_down_share)?;
        unit("rules.bank_timeout_share", self.bank_timeout_share)?;
        unit("rules.network_error_share", self.network_error_share)?;
        unit("rules.failure_spike_rate", self.failure_spike_rate)?;
        non_negative("rules.critical_latency_ms", self.critical_latency_ms)?;
        non_negative("rules.elevated_latency_ms", self.elevated_latency_ms)?;

        if self.extreme_concentration < self.bank_concentration.min(self.issuer_concentration) {
            return Err(ConfigError::Inconsistent(format!(
                "rules.extreme_concentration ({}) is below the concentration cutoffs",
                self.extreme_concentration
            )));
        }
        Ok(())
    }
}

fn unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(field, value, "0.0..=1.0"))
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(field, value, ">= 0"))
    }
}

fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(field, value, "> 0"))
    }
}
