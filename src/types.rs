//! Core types for the Synheart Cohort engine
//!
//! This module defines the data structures that flow between the engine
//! components: input samples and series, baselines, correlation results,
//! anomaly episodes and recovery profiles.

use crate::error::{EngineError, StatError};
use chrono::{DateTime, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Scope key used for cohort-level correlation results
pub const COHORT_SCOPE: &str = "cohort";

/// Health metric identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    BpSystolic,
    BpDiastolic,
    Hr,
    Steps,
    Sleep,
    Spo2,
    Temp,
}

impl MetricType {
    /// Every metric the engine understands
    pub const ALL: [MetricType; 7] = [
        MetricType::BpSystolic,
        MetricType::BpDiastolic,
        MetricType::Hr,
        MetricType::Steps,
        MetricType::Sleep,
        MetricType::Spo2,
        MetricType::Temp,
    ];

    /// The six metric types paired by default. Blood pressure is represented
    /// by its systolic reading.
    pub const CORRELATED: [MetricType; 6] = [
        MetricType::BpSystolic,
        MetricType::Hr,
        MetricType::Steps,
        MetricType::Sleep,
        MetricType::Spo2,
        MetricType::Temp,
    ];

    /// Snake-case identifier used in JSON, TOML and labels
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::BpSystolic => "bp_systolic",
            MetricType::BpDiastolic => "bp_diastolic",
            MetricType::Hr => "hr",
            MetricType::Steps => "steps",
            MetricType::Sleep => "sleep",
            MetricType::Spo2 => "spo2",
            MetricType::Temp => "temp",
        }
    }

    /// Unit of the primary value as delivered by the loader
    pub fn unit(&self) -> &'static str {
        match self {
            MetricType::BpSystolic | MetricType::BpDiastolic => "mmHg",
            MetricType::Hr => "bpm",
            MetricType::Steps => "steps",
            MetricType::Sleep => "hours",
            MetricType::Spo2 => "%",
            MetricType::Temp => "°F",
        }
    }

    /// Position in the driver-to-response order of next-day correlations.
    /// Activity and sleep lead, then heart rate, temperature, SpO2 and
    /// blood pressure.
    fn lag_rank(self) -> u8 {
        match self {
            MetricType::Steps => 0,
            MetricType::Sleep => 1,
            MetricType::Hr => 2,
            MetricType::Temp => 3,
            MetricType::Spo2 => 4,
            MetricType::BpSystolic => 5,
            MetricType::BpDiastolic => 6,
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality of a sample that survived upstream cleaning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleQuality {
    #[default]
    Valid,
    Imputed,
}

/// A single cleaned reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub participant_id: String,
    pub metric: MetricType,
    pub timestamp: DateTime<Utc>,
    /// Primary value (systolic BP, bpm, step count, sleep hours, SpO2 %, temperature)
    pub value: f64,
    /// Secondary value (diastolic BP, sleep quality, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_value: Option<f64>,
    #[serde(default)]
    pub quality: SampleQuality,
}

impl Sample {
    /// A valid reading with no secondary value
    pub fn new(
        participant_id: impl Into<String>,
        metric: MetricType,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            metric,
            timestamp,
            value,
            secondary_value: None,
            quality: SampleQuality::Valid,
        }
    }

    /// Attach the secondary value (diastolic BP, sleep quality)
    pub fn with_secondary(mut self, secondary: f64) -> Self {
        self.secondary_value = Some(secondary);
        self
    }

    /// Mark the reading as imputed upstream
    pub fn imputed(mut self) -> Self {
        self.quality = SampleQuality::Imputed;
        self
    }

    /// Calendar day (UTC) the sample belongs to
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// All cleaned series for one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSeries {
    pub participant_id: String,
    #[serde(default)]
    pub metrics: BTreeMap<MetricType, Vec<Sample>>,
    pub monitoring_start: DateTime<Utc>,
    pub monitoring_end: DateTime<Utc>,
}

impl ParticipantSeries {
    /// Empty series over a monitoring window
    pub fn new(
        participant_id: impl Into<String>,
        monitoring_start: DateTime<Utc>,
        monitoring_end: DateTime<Utc>,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            metrics: BTreeMap::new(),
            monitoring_start,
            monitoring_end,
        }
    }

    /// Attach a metric series, replacing any existing one
    pub fn with_samples(mut self, metric: MetricType, samples: Vec<Sample>) -> Self {
        self.metrics.insert(metric, samples);
        self
    }

    /// Samples for a metric, empty if the metric was never recorded
    pub fn samples(&self, metric: MetricType) -> &[Sample] {
        self.metrics.get(&metric).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Metrics with at least one sample
    pub fn recorded_metrics(&self) -> impl Iterator<Item = MetricType> + '_ {
        self.metrics
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(metric, _)| *metric)
    }

    /// Derive a diastolic series from systolic secondary values when the
    /// loader did not provide one explicitly.
    pub(crate) fn derive_diastolic(&mut self) {
        if self
            .metrics
            .get(&MetricType::BpDiastolic)
            .is_some_and(|s| !s.is_empty())
        {
            return;
        }

        let derived: Vec<Sample> = self
            .samples(MetricType::BpSystolic)
            .iter()
            .filter_map(|s| {
                s.secondary_value.map(|diastolic| Sample {
                    participant_id: s.participant_id.clone(),
                    metric: MetricType::BpDiastolic,
                    timestamp: s.timestamp,
                    value: diastolic,
                    secondary_value: None,
                    quality: s.quality,
                })
            })
            .collect();

        if !derived.is_empty() {
            self.metrics.insert(MetricType::BpDiastolic, derived);
        }
    }

    /// Check the input contract: owner, metric key, monitoring window,
    /// strictly increasing timestamps and finite values.
    pub fn validate(&self) -> Result<(), EngineError> {
        let id = self.participant_id.as_str();

        if self.monitoring_start > self.monitoring_end {
            return Err(EngineError::misaligned(
                id,
                format!(
                    "monitoring window starts at {} after it ends at {}",
                    self.monitoring_start, self.monitoring_end
                ),
            ));
        }

        for (metric, samples) in &self.metrics {
            let mut previous: Option<DateTime<Utc>> = None;

            for (idx, sample) in samples.iter().enumerate() {
                if sample.participant_id != self.participant_id {
                    return Err(EngineError::misaligned(
                        id,
                        format!(
                            "{} sample {} belongs to participant {}",
                            metric, idx, sample.participant_id
                        ),
                    ));
                }
                if sample.metric != *metric {
                    return Err(EngineError::misaligned(
                        id,
                        format!("{} sample {} is tagged {}", metric, idx, sample.metric),
                    ));
                }
                if sample.timestamp < self.monitoring_start
                    || sample.timestamp > self.monitoring_end
                {
                    return Err(EngineError::misaligned(
                        id,
                        format!(
                            "{} sample at {} is outside the monitoring window",
                            metric, sample.timestamp
                        ),
                    ));
                }
                if !sample.value.is_finite() {
                    return Err(EngineError::misaligned(
                        id,
                        format!("{} sample at {} has a non-finite value", metric, sample.timestamp),
                    ));
                }
                if let Some(prev) = previous {
                    if sample.timestamp <= prev {
                        return Err(EngineError::misaligned(
                            id,
                            format!(
                                "{} timestamps not strictly increasing at {}",
                                metric, sample.timestamp
                            ),
                        ));
                    }
                }
                previous = Some(sample.timestamp);
            }
        }

        Ok(())
    }
}

/// Unordered metric pair. `MetricPair::new(a, b) == MetricPair::new(b, a)`.
///
/// Members are stored in next-day order: `first` is the driver observed on
/// day d and `second` the response observed on day d+1. Steps lead heart
/// rate, and every metric leads blood pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "(MetricType, MetricType)", into = "(MetricType, MetricType)")]
pub struct MetricPair {
    first: MetricType,
    second: MetricType,
}

impl MetricPair {
    pub fn new(a: MetricType, b: MetricType) -> Self {
        if a.lag_rank() <= b.lag_rank() {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    /// Driver metric, day d in LAG1
    pub fn first(&self) -> MetricType {
        self.first
    }

    /// Response metric, day d+1 in LAG1
    pub fn second(&self) -> MetricType {
        self.second
    }

    /// All 15 unordered pairs among the correlated metric types
    pub fn default_pairs() -> Vec<MetricPair> {
        let metrics = MetricType::CORRELATED;
        let mut pairs = Vec::with_capacity(15);
        for (i, a) in metrics.iter().enumerate() {
            for b in &metrics[i + 1..] {
                pairs.push(MetricPair::new(*a, *b));
            }
        }
        pairs
    }

    /// Report label, `"steps_vs_hr"`
    pub fn label(&self) -> String {
        format!("{}_vs_{}", self.first, self.second)
    }
}

impl From<(MetricType, MetricType)> for MetricPair {
    fn from((a, b): (MetricType, MetricType)) -> Self {
        MetricPair::new(a, b)
    }
}

impl From<MetricPair> for (MetricType, MetricType) {
    fn from(pair: MetricPair) -> Self {
        (pair.first, pair.second)
    }
}

impl fmt::Display for MetricPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.first, self.second)
    }
}

/// Who a correlation result describes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Participant(String),
    Cohort,
}

impl Scope {
    /// Key used in the report's correlation map
    pub fn key(&self) -> &str {
        match self {
            Scope::Participant(id) => id.as_str(),
            Scope::Cohort => COHORT_SCOPE,
        }
    }
}

/// Correlation regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationKind {
    /// Same calendar day
    Daily,
    /// First metric on day d against second metric on day d+1
    Lag1,
    /// Sliding calendar window advanced one day at a time
    Rolling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMethod {
    Pearson,
    Spearman,
}

impl CorrelationMethod {
    pub const ALL: [CorrelationMethod; 2] = [CorrelationMethod::Pearson, CorrelationMethod::Spearman];
}

/// A correlation coefficient, or the explicit reason it could not be computed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Coefficient {
    Computed {
        r: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        p_value: Option<f64>,
    },
    NotComputable {
        reason: StatError,
    },
}

impl Coefficient {
    /// `r` when computed
    pub fn value(&self) -> Option<f64> {
        match self {
            Coefficient::Computed { r, .. } => Some(*r),
            Coefficient::NotComputable { .. } => None,
        }
    }

    /// Two-sided p-value; never present for rolling summaries
    pub fn p_value(&self) -> Option<f64> {
        match self {
            Coefficient::Computed { p_value, .. } => *p_value,
            Coefficient::NotComputable { .. } => None,
        }
    }

    pub fn is_computable(&self) -> bool {
        matches!(self, Coefficient::Computed { .. })
    }
}

/// Qualitative strength of |r|
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStrength {
    Strong,
    Moderate,
    Weak,
    VeryWeak,
}

/// How much weight a computed correlation deserves given its sample size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Solid,
    PrettySure,
    MightBeAThing,
    NotConfident,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Strengthening,
    Weakening,
    Stable,
    InsufficientData,
}

/// Trend of the coefficient across rolling windows
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollingTrend {
    pub direction: TrendDirection,
    /// OLS slope of coefficient per window step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slope: Option<f64>,
}

/// One entry of a rolling correlation series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollingPoint {
    pub window_start: NaiveDate,
    pub coefficient: Coefficient,
    pub sample_size: usize,
}

/// Correlation between one metric pair under one regime and method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub scope: Scope,
    pub pair: MetricPair,
    pub kind: CorrelationKind,
    pub method: CorrelationMethod,
    pub coefficient: Coefficient,
    /// Aligned observations (rolling: computable windows)
    pub sample_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub significant: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<CorrelationStrength>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceLevel>,
    /// Population standard deviation of the computable rolling coefficients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<Vec<RollingPoint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<RollingTrend>,
}

/// Why a baseline is or is not usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineStatus {
    Valid,
    InsufficientData,
    DegenerateSeries,
}

/// Descriptive statistics reported alongside the robust baseline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DescriptiveStats {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub p10: f64,
    pub p25: f64,
    pub p75: f64,
    pub p90: f64,
}

/// Center of one non-overlapping drift window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftPoint {
    pub window_start: NaiveDate,
    pub center: f64,
    pub sample_count: usize,
}

/// Mean reading for one hour of the day (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyMean {
    pub hour: u32,
    pub mean: f64,
    pub sample_count: usize,
}

/// Mean reading for one day of the week (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeekdayMean {
    pub weekday: Weekday,
    pub mean: f64,
    pub sample_count: usize,
}

/// Time-of-day and day-of-week structure of a metric's history.
///
/// Hours and weekdays with fewer than two samples are left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalPatterns {
    /// Hour with the highest mean reading
    pub peak_hour: Option<HourlyMean>,
    /// Hour with the lowest mean reading
    pub low_hour: Option<HourlyMean>,
    /// Monday first
    pub weekday_means: Vec<WeekdayMean>,
}

/// Personal normal range for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub participant_id: String,
    pub metric: MetricType,
    /// Median of the full history
    pub center: f64,
    /// IQR of the full history (scaled mean absolute deviation when the IQR collapses)
    pub spread: f64,
    pub sample_count: usize,
    pub valid: bool,
    pub status: BaselineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<DescriptiveStats>,
    #[serde(default)]
    pub temporal_patterns: TemporalPatterns,
    pub drift_curve: Vec<DriftPoint>,
}

impl Baseline {
    /// Deviation of a value from the center in multiples of spread.
    /// `None` for invalid baselines.
    pub fn deviation(&self, value: f64) -> Option<f64> {
        if !self.valid {
            return None;
        }
        Some((value - self.center) / self.spread)
    }

    /// Whether a value lies within `multiplier` spreads of the center
    pub fn in_band(&self, value: f64, multiplier: f64) -> Option<bool> {
        self.deviation(value).map(|z| z.abs() <= multiplier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationDirection {
    Above,
    Below,
}

/// How an anomaly episode ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeClosure {
    /// Sustained run of in-band samples
    Recovered,
    /// Readings stopped for longer than the gap tolerance
    DataGap,
    /// Series ended while the episode was open
    SeriesEnd,
}

/// A gap-tolerant run of out-of-baseline samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub event_id: String,
    pub participant_id: String,
    pub metric: MetricType,
    pub episode_start: DateTime<Utc>,
    /// Timestamp of the last anomalous sample
    pub episode_end: DateTime<Utc>,
    /// Signed deviation of the most extreme sample, in multiples of spread
    pub peak_deviation: f64,
    pub peak_value: f64,
    pub direction: DeviationDirection,
    pub severity: Severity,
    /// Samples in the episode beyond the deviation band
    pub anomalous_samples: usize,
    /// `false` only when the series ended with the episode still open
    pub closed: bool,
    pub closure: EpisodeClosure,
    pub samples: Vec<Sample>,
}

/// Slow shift of the baseline center between consecutive drift windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftSignal {
    pub participant_id: String,
    pub metric: MetricType,
    pub from_window: NaiveDate,
    pub to_window: NaiveDate,
    pub from_center: f64,
    pub to_center: f64,
    pub shift: f64,
    pub shift_in_spreads: f64,
}

/// Return-to-baseline characterization of one anomaly episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryProfile {
    /// Lookup key of the episode this profile describes
    pub event_id: String,
    #[serde(rename = "recovery_duration_secs", with = "optional_duration_secs")]
    pub recovery_duration: Option<Duration>,
    pub recovered_at: Option<DateTime<Utc>>,
    /// `false` when the observation ended before a sustained return
    pub resolved: bool,
    /// Value units per day from episode start to the recovery point
    pub trajectory_slope: Option<f64>,
}

/// An episode with its recovery profile attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub event: AnomalyEvent,
    pub recovery: RecoveryProfile,
}

/// Recovery behaviour aggregated over every episode of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySummary {
    pub metric: MetricType,
    pub event_count: usize,
    /// Out-of-band samples across every episode of the metric
    pub anomaly_count: usize,
    /// `anomaly_count` as a percentage of the metric's samples
    pub anomaly_pct: f64,
    pub resolved_count: usize,
    pub recovery_rate_pct: f64,
    pub mean_recovery_days: Option<f64>,
    pub median_recovery_days: Option<f64>,
}

/// Outcome of one participant's analysis unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParticipantStatus {
    Completed,
    /// No usable baseline and no computable correlation
    InsufficientData,
    Failed { error: String },
    /// The run was aborted before this participant was analyzed
    Aborted,
}

mod optional_duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.num_seconds()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<i64>::deserialize(d)?.map(Duration::seconds))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;

    pub fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap() + Duration::days(n)
    }

    /// One sample per day starting at day 0
    pub fn daily_samples(participant: &str, metric: MetricType, values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample::new(participant, metric, day(i as i64), *v))
            .collect()
    }

    /// A series spanning `days` days with the given metric data
    pub fn series_with(
        participant: &str,
        days: i64,
        metrics: Vec<(MetricType, Vec<f64>)>,
    ) -> ParticipantSeries {
        let mut series = ParticipantSeries::new(participant, day(0), day(days.max(1)));
        for (metric, values) in metrics {
            let samples = daily_samples(participant, metric, &values);
            series = series.with_samples(metric, samples);
        }
        series
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_metric_pair_is_unordered() {
        let a = MetricPair::new(MetricType::Steps, MetricType::Hr);
        let b = MetricPair::new(MetricType::Hr, MetricType::Steps);
        assert_eq!(a, b);
        assert_eq!(a.first(), MetricType::Steps);
        assert_eq!(a.label(), "steps_vs_hr");
    }

    #[test]
    fn test_pair_direction_follows_driver_order() {
        let directed = [
            (MetricType::Steps, MetricType::Hr),
            (MetricType::Steps, MetricType::BpSystolic),
            (MetricType::Sleep, MetricType::Hr),
            (MetricType::Sleep, MetricType::BpSystolic),
            (MetricType::Hr, MetricType::BpSystolic),
            (MetricType::Temp, MetricType::Spo2),
            (MetricType::Temp, MetricType::BpSystolic),
            (MetricType::Spo2, MetricType::BpSystolic),
            (MetricType::Steps, MetricType::Sleep),
            (MetricType::Hr, MetricType::Temp),
        ];
        for (driver, response) in directed {
            let pair = MetricPair::new(response, driver);
            assert_eq!((pair.first(), pair.second()), (driver, response), "{}", pair);
        }
    }

    #[test]
    fn test_default_pairs() {
        let pairs = MetricPair::default_pairs();
        assert_eq!(pairs.len(), 15);
        assert!(pairs
            .iter()
            .all(|p| p.first() != MetricType::BpDiastolic && p.second() != MetricType::BpDiastolic));
        let mut dedup = pairs.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), 15);
    }

    #[test]
    fn test_pair_deserializes_in_either_order() {
        let pair: MetricPair = serde_json::from_str(r#"["temp", "hr"]"#).unwrap();
        assert_eq!(pair, MetricPair::new(MetricType::Hr, MetricType::Temp));
        assert_eq!(serde_json::to_string(&pair).unwrap(), r#"["hr","temp"]"#);
    }

    #[test]
    fn test_not_computable_serializes_explicitly() {
        let c = Coefficient::NotComputable {
            reason: StatError::InsufficientData {
                required: 10,
                available: 5,
            },
        };
        let json = serde_json::to_value(c).unwrap();
        assert_eq!(json["status"], "not_computable");
        assert_eq!(json["reason"]["kind"], "insufficient_data");
        assert_eq!(json["reason"]["available"], 5);
    }

    #[test]
    fn test_validate_rejects_non_increasing_timestamps() {
        let mut samples = daily_samples("p1", MetricType::Hr, &[60.0, 61.0, 62.0]);
        samples[2].timestamp = samples[1].timestamp;
        let series = ParticipantSeries::new("p1", day(0), day(5)).with_samples(MetricType::Hr, samples);
        assert!(matches!(
            series.validate(),
            Err(EngineError::MisalignedInput { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_sample_outside_window() {
        let samples = daily_samples("p1", MetricType::Hr, &[60.0, 61.0, 62.0]);
        let series = ParticipantSeries::new("p1", day(0), day(1)).with_samples(MetricType::Hr, samples);
        assert!(series.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_metric_mismatch() {
        let samples = daily_samples("p1", MetricType::Steps, &[6000.0]);
        let series = ParticipantSeries::new("p1", day(0), day(3)).with_samples(MetricType::Hr, samples);
        let err = series.validate().unwrap_err();
        assert!(err.to_string().contains("tagged steps"));
    }

    #[test]
    fn test_derive_diastolic_from_secondary_values() {
        let samples: Vec<Sample> = (0..3)
            .map(|i| Sample::new("p1", MetricType::BpSystolic, day(i), 120.0).with_secondary(80.0 + i as f64))
            .collect();
        let mut series =
            ParticipantSeries::new("p1", day(0), day(3)).with_samples(MetricType::BpSystolic, samples);
        series.derive_diastolic();

        let diastolic = series.samples(MetricType::BpDiastolic);
        assert_eq!(diastolic.len(), 3);
        assert_eq!(diastolic[2].value, 82.0);
        assert!(series.validate().is_ok());
    }

    #[test]
    fn test_recovery_profile_duration_roundtrip() {
        let profile = RecoveryProfile {
            event_id: "p1:hr:0".to_string(),
            recovery_duration: Some(Duration::hours(24)),
            recovered_at: Some(day(3)),
            resolved: true,
            trajectory_slope: Some(-12.5),
        };
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["recovery_duration_secs"], 86_400);

        let back: RecoveryProfile = serde_json::from_value(json).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn test_unresolved_profile_keeps_null_sentinels() {
        let profile = RecoveryProfile {
            event_id: "p1:hr:0".to_string(),
            recovery_duration: None,
            recovered_at: None,
            resolved: false,
            trajectory_slope: None,
        };
        let json = serde_json::to_value(&profile).unwrap();
        assert!(json["recovery_duration_secs"].is_null());
        assert_eq!(json["resolved"], false);
    }
}
