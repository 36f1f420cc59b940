//! Engine configuration
//!
//! Every threshold the engine uses lives here and is passed to each component
//! at construction. Configurations are validated once, before any analysis
//! runs; an invalid configuration aborts the whole run.

use crate::error::EngineError;
use crate::types::MetricPair;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Default minimum samples for a valid baseline
pub const DEFAULT_BASELINE_MIN_SAMPLES: usize = 14;

/// Default drift and rolling window length in days
pub const DEFAULT_WINDOW_DAYS: usize = 14;

/// Default minimum aligned days for a correlation
pub const DEFAULT_MIN_ALIGNED_DAYS: usize = 10;

/// Default anomaly threshold in multiples of baseline spread
pub const DEFAULT_DEVIATION_MULTIPLIER: f64 = 2.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Samples required for a valid baseline
    pub min_samples: usize,
    /// Length of the non-overlapping drift windows
    pub drift_window_days: usize,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            min_samples: DEFAULT_BASELINE_MIN_SAMPLES,
            drift_window_days: DEFAULT_WINDOW_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Aligned days required for a coefficient (applies to each rolling window)
    pub min_aligned_days: usize,
    pub rolling_window_days: usize,
    /// Two-sided significance level for the `significant` flag
    pub significance_level: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            min_aligned_days: DEFAULT_MIN_ALIGNED_DAYS,
            rolling_window_days: DEFAULT_WINDOW_DAYS,
            significance_level: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// A sample is anomalous beyond this many spreads from the center
    pub deviation_multiplier: f64,
    /// Peak deviations at or above this are at least moderate
    pub moderate_multiplier: f64,
    /// Peak deviations at or above this are severe
    pub severe_multiplier: f64,
    /// Missing expected readings tolerated inside an episode
    pub gap_tolerance: u32,
    /// Consecutive in-band samples that close an episode and confirm recovery
    pub sustain_count: usize,
    /// Drift flagged when consecutive window centers move more than this
    /// fraction of the baseline spread
    pub drift_shift_fraction: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            deviation_multiplier: DEFAULT_DEVIATION_MULTIPLIER,
            moderate_multiplier: 3.0,
            severe_multiplier: 5.0,
            gap_tolerance: 1,
            sustain_count: 2,
            drift_shift_fraction: 0.5,
        }
    }
}

/// Full configuration surface of the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads for participant analysis; 0 uses one per core
    pub workers: usize,
    /// Metric pairs to correlate. Member order is normalized to the fixed
    /// driver-to-response direction used by LAG1.
    pub pairs: Vec<MetricPair>,
    pub baseline: BaselineConfig,
    pub correlation: CorrelationConfig,
    pub anomaly: AnomalyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            pairs: MetricPair::default_pairs(),
            baseline: BaselineConfig::default(),
            correlation: CorrelationConfig::default(),
            anomaly: AnomalyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML configuration
    pub fn from_toml_str(toml_str: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Configuration(e.to_string()))
    }

    /// Reject thresholds that cannot produce a meaningful run
    pub fn validate(&self) -> Result<(), EngineError> {
        let anomaly = &self.anomaly;

        for (name, value) in [
            ("anomaly.deviation_multiplier", anomaly.deviation_multiplier),
            ("anomaly.moderate_multiplier", anomaly.moderate_multiplier),
            ("anomaly.severe_multiplier", anomaly.severe_multiplier),
            ("anomaly.drift_shift_fraction", anomaly.drift_shift_fraction),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(format!("{} must be positive, got {}", name, value)));
            }
        }

        if anomaly.deviation_multiplier > anomaly.moderate_multiplier
            || anomaly.moderate_multiplier > anomaly.severe_multiplier
        {
            return Err(invalid(format!(
                "anomaly multipliers must satisfy deviation ({}) <= moderate ({}) <= severe ({})",
                anomaly.deviation_multiplier, anomaly.moderate_multiplier, anomaly.severe_multiplier
            )));
        }

        if anomaly.sustain_count == 0 {
            return Err(invalid("anomaly.sustain_count must be at least 1"));
        }

        if self.baseline.min_samples < 2 {
            return Err(invalid("baseline.min_samples must be at least 2"));
        }
        if self.baseline.drift_window_days == 0 {
            return Err(invalid("baseline.drift_window_days must be at least 1"));
        }

        let correlation = &self.correlation;
        if correlation.min_aligned_days < 3 {
            return Err(invalid("correlation.min_aligned_days must be at least 3"));
        }
        if correlation.rolling_window_days == 0 {
            return Err(invalid("correlation.rolling_window_days must be at least 1"));
        }
        if !(correlation.significance_level > 0.0 && correlation.significance_level < 1.0) {
            return Err(invalid(format!(
                "correlation.significance_level must be in (0, 1), got {}",
                correlation.significance_level
            )));
        }

        if self.pairs.is_empty() {
            return Err(invalid("pairs must not be empty"));
        }
        let mut seen = BTreeSet::new();
        for pair in &self.pairs {
            if !seen.insert(*pair) {
                return Err(invalid(format!("duplicate metric pair {}", pair)));
            }
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::Configuration(message.into())
}
