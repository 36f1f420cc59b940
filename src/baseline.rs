//! Baseline computation
//!
//! This module derives a personal normal range for each metric from the
//! participant's full history using robust statistics (median, IQR), plus a
//! drift curve of window medians used to detect slow baseline shift.
//! Baselines are computed once per run and never updated incrementally.

use crate::config::BaselineConfig;
use crate::stats;
use crate::types::{
    Baseline, BaselineStatus, DescriptiveStats, DriftPoint, HourlyMean, MetricType,
    ParticipantSeries, Sample, TemporalPatterns, WeekdayMean,
};
use chrono::{Datelike, Duration, NaiveDate, Timelike, Weekday};
use std::collections::BTreeMap;
use tracing::debug;

/// Baseline model for computing per-metric normal ranges
#[derive(Debug, Clone)]
pub struct BaselineModel {
    config: BaselineConfig,
}

impl Default for BaselineModel {
    fn default() -> Self {
        Self::new(BaselineConfig::default())
    }
}

impl BaselineModel {
    pub fn new(config: BaselineConfig) -> Self {
        Self { config }
    }

    /// Compute the baseline of one metric from the full valid history.
    ///
    /// Fails softly: too few samples or a constant series produce a baseline
    /// with `valid = false` and the matching status.
    pub fn compute(&self, series: &ParticipantSeries, metric: MetricType) -> Baseline {
        let samples = series.samples(metric);
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let sample_count = values.len();

        let center = stats::median(&values).unwrap_or(f64::NAN);
        let spread = robust_spread(&values).unwrap_or(f64::NAN);

        let status = if sample_count < self.config.min_samples {
            BaselineStatus::InsufficientData
        } else if spread.is_nan() || spread <= 0.0 {
            BaselineStatus::DegenerateSeries
        } else {
            BaselineStatus::Valid
        };

        debug!(
            participant = %series.participant_id,
            %metric,
            sample_count,
            ?status,
            "computed baseline"
        );

        Baseline {
            participant_id: series.participant_id.clone(),
            metric,
            center,
            spread,
            sample_count,
            valid: status == BaselineStatus::Valid,
            status,
            summary: describe(&values),
            temporal_patterns: temporal_patterns(samples),
            drift_curve: self.drift_curve(samples, series.monitoring_start.date_naive()),
        }
    }

    /// Baselines for every recorded metric, in metric order
    pub fn compute_all(&self, series: &ParticipantSeries) -> Vec<Baseline> {
        series
            .recorded_metrics()
            .map(|metric| self.compute(series, metric))
            .collect()
    }

    /// Medians over non-overlapping windows anchored at `anchor`; empty
    /// windows are omitted.
    fn drift_curve(&self, samples: &[Sample], anchor: NaiveDate) -> Vec<DriftPoint> {
        let window = self.config.drift_window_days as i64;
        let mut windows: BTreeMap<i64, Vec<f64>> = BTreeMap::new();

        for sample in samples {
            let offset = (sample.day() - anchor).num_days();
            windows
                .entry(offset.div_euclid(window))
                .or_default()
                .push(sample.value);
        }

        windows
            .into_iter()
            .filter_map(|(index, values)| {
                Some(DriftPoint {
                    window_start: anchor + Duration::days(index * window),
                    center: stats::median(&values)?,
                    sample_count: values.len(),
                })
            })
            .collect()
    }
}

/// Smallest hour or weekday group reported in temporal patterns
const MIN_GROUP_SAMPLES: usize = 2;

/// Hourly peak and low, plus weekday means, over groups of at least
/// `MIN_GROUP_SAMPLES` readings
fn temporal_patterns(samples: &[Sample]) -> TemporalPatterns {
    let mut by_hour: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    let mut by_weekday: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for sample in samples {
        by_hour
            .entry(sample.timestamp.hour())
            .or_default()
            .push(sample.value);
        by_weekday
            .entry(sample.timestamp.weekday().num_days_from_monday())
            .or_default()
            .push(sample.value);
    }

    let mut peak_hour: Option<HourlyMean> = None;
    let mut low_hour: Option<HourlyMean> = None;
    for (hour, values) in by_hour {
        if values.len() < MIN_GROUP_SAMPLES {
            continue;
        }
        let Some(mean) = stats::mean(&values) else {
            continue;
        };
        let entry = HourlyMean {
            hour,
            mean,
            sample_count: values.len(),
        };
        // ties keep the earliest hour
        if peak_hour.map_or(true, |p| mean > p.mean) {
            peak_hour = Some(entry);
        }
        if low_hour.map_or(true, |l| mean < l.mean) {
            low_hour = Some(entry);
        }
    }

    let mut weekday = Weekday::Mon;
    let mut weekday_means = Vec::new();
    for offset in 0..7 {
        if let Some(values) = by_weekday.get(&offset) {
            if values.len() >= MIN_GROUP_SAMPLES {
                if let Some(mean) = stats::mean(values) {
                    weekday_means.push(WeekdayMean {
                        weekday,
                        mean,
                        sample_count: values.len(),
                    });
                }
            }
        }
        weekday = weekday.succ();
    }

    TemporalPatterns {
        peak_hour,
        low_hour,
        weekday_means,
    }
}

/// Ratio of IQR to mean absolute deviation for normally distributed data
const IQR_PER_MEAN_ABS_DEVIATION: f64 = 1.349 / 0.798;

/// IQR, falling back to the IQR-scaled mean absolute deviation when the
/// quartiles coincide (mostly-constant readings such as integer SpO2)
fn robust_spread(values: &[f64]) -> Option<f64> {
    let iqr = stats::iqr(values)?;
    if iqr > 0.0 {
        return Some(iqr);
    }
    stats::mean_abs_deviation(values).map(|d| d * IQR_PER_MEAN_ABS_DEVIATION)
}

fn describe(values: &[f64]) -> Option<DescriptiveStats> {
    let sorted = stats::sorted(values);
    Some(DescriptiveStats {
        mean: stats::mean(values)?,
        std_dev: stats::std_dev(values)?,
        min: *sorted.first()?,
        max: *sorted.last()?,
        p10: stats::quantile_sorted(&sorted, 0.10)?,
        p25: stats::quantile_sorted(&sorted, 0.25)?,
        p75: stats::quantile_sorted(&sorted, 0.75)?,
        p90: stats::quantile_sorted(&sorted, 0.90)?,
    })
}
