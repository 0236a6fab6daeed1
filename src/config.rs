//! Runtime configuration
//!
//! Values come from the environment (optionally seeded from `.env`) and are
//! validated once at load time. Nothing here is global: callers pass the
//! resulting `ThresholdConfig` into every evaluation.

use crate::error::TriageError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Decision thresholds for the disposition policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ThresholdConfig {
    pub auto_clear_conf: f64,
    pub escalate_l2_conf: f64,
    pub risk_high: i64,
    pub risk_severe: i64,
    #[serde(default = "default_min_data_completeness")]
    pub min_data_completeness: f64,
}

fn default_min_data_completeness() -> f64 {
    0.60
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            auto_clear_conf: 0.85,
            escalate_l2_conf: 0.70,
            risk_high: 70,
            risk_severe: 85,
            min_data_completeness: default_min_data_completeness(),
        }
    }
}

impl ThresholdConfig {
    /// Range and ordering checks. Auto-clearing must demand at least as much
    /// confidence as escalating, and the severe band must sit at or above the
    /// high band.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("auto_clear_conf", self.auto_clear_conf),
            ("escalate_l2_conf", self.escalate_l2_conf),
            ("min_data_completeness", self.min_data_completeness),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(TriageError::ThresholdConfiguration(format!(
                    "{} = {} outside [0, 1]",
                    name, value
                )));
            }
        }

        for (name, value) in [("risk_high", self.risk_high), ("risk_severe", self.risk_severe)] {
            if !(0..=100).contains(&value) {
                return Err(TriageError::ThresholdConfiguration(format!(
                    "{} = {} outside [0, 100]",
                    name, value
                )));
            }
        }

        if self.auto_clear_conf < self.escalate_l2_conf {
            return Err(TriageError::ThresholdConfiguration(format!(
                "auto_clear_conf {} must be >= escalate_l2_conf {}",
                self.auto_clear_conf, self.escalate_l2_conf
            )));
        }

        if self.risk_high > self.risk_severe {
            return Err(TriageError::ThresholdConfiguration(format!(
                "risk_high {} must be <= risk_severe {}",
                self.risk_high, self.risk_severe
            )));
        }

        Ok(())
    }
}

/// Process settings: thresholds plus the knobs of the surrounding pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub thresholds: ThresholdConfig,
    pub max_concurrent_alerts: usize,
    pub stage_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub log_level: String,
    pub api_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            max_concurrent_alerts: 10,
            stage_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
            log_level: "info".to_string(),
            api_port: 8080,
        }
    }
}

impl Settings {
    /// Load from `.env` and the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let t = defaults.thresholds;

        let thresholds = ThresholdConfig {
            auto_clear_conf: parse_or(&lookup, "AUTO_CLEAR_THRESHOLD", t.auto_clear_conf)?,
            escalate_l2_conf: parse_or(&lookup, "ESCALATE_L2_THRESHOLD", t.escalate_l2_conf)?,
            risk_high: parse_or(&lookup, "RISK_SCORE_HIGH_THRESHOLD", t.risk_high)?,
            risk_severe: parse_or(&lookup, "RISK_SCORE_SEVERE_THRESHOLD", t.risk_severe)?,
            min_data_completeness: parse_or(
                &lookup,
                "MIN_DATA_COMPLETENESS",
                t.min_data_completeness,
            )?,
        };
        thresholds.validate()?;

        let max_concurrent_alerts: usize =
            parse_or(&lookup, "MAX_CONCURRENT_ALERTS", defaults.max_concurrent_alerts)?;
        if max_concurrent_alerts == 0 {
            return Err(TriageError::Config(
                "MAX_CONCURRENT_ALERTS must be at least 1".into(),
            ));
        }

        let timeout_secs: u64 = parse_or(
            &lookup,
            "AGENT_TIMEOUT_SECONDS",
            defaults.stage_timeout.as_secs(),
        )?;
        let max_retries: u32 = parse_or(&lookup, "MAX_RETRIES", defaults.max_retries)?;
        let backoff_ms: u64 = parse_or(
            &lookup,
            "RETRY_BACKOFF_MS",
            defaults.retry_backoff.as_millis() as u64,
        )?;

        let api_port = match lookup("PORT").or_else(|| lookup("API_PORT")) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| TriageError::Config(format!("invalid port '{}'", raw)))?,
            None => defaults.api_port,
        };

        Ok(Self {
            thresholds,
            max_concurrent_alerts,
            stage_timeout: Duration::from_secs(timeout_secs),
            max_retries: max_retries.max(1),
            retry_backoff: Duration::from_millis(backoff_ms),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            api_port,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| TriageError::Config(format!("invalid value for {}: '{}'", key, raw))),
        None => Ok(default),
    }
}
