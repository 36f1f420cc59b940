//! Recovery analysis
//!
//! Characterizes how each anomaly episode returned to baseline. Episodes the
//! observation window cut off before a sustained return are reported as
//! unresolved, never as fast recoveries.

use crate::config::AnomalyConfig;
use crate::stats;
use crate::types::{
    AnomalyEvent, AnomalyRecord, Baseline, MetricType, ParticipantSeries, RecoveryProfile,
    RecoverySummary,
};
use std::collections::BTreeMap;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone)]
pub struct RecoveryAnalyzer {
    deviation_multiplier: f64,
    sustain_count: usize,
}

impl Default for RecoveryAnalyzer {
    fn default() -> Self {
        Self::new(&AnomalyConfig::default())
    }
}

impl RecoveryAnalyzer {
    /// Uses the detector's band and sustain count so recovery matches
    /// episode closure
    pub fn new(config: &AnomalyConfig) -> Self {
        Self {
            deviation_multiplier: config.deviation_multiplier,
            sustain_count: config.sustain_count,
        }
    }

    /// Recovery profile of one episode.
    ///
    /// The first run of `sustain_count` in-band samples after `episode_end`
    /// marks recovery. An anomalous sample, or the end of the series, before
    /// such a run leaves the episode unresolved.
    pub fn analyze(
        &self,
        event: &AnomalyEvent,
        series: &ParticipantSeries,
        baseline: &Baseline,
    ) -> RecoveryProfile {
        let samples = series.samples(event.metric);
        let after = samples.partition_point(|s| s.timestamp <= event.episode_end);

        let mut run_start = None;
        let mut run = 0;
        let mut recovered = None;
        for (idx, sample) in samples.iter().enumerate().skip(after) {
            if !baseline
                .in_band(sample.value, self.deviation_multiplier)
                .unwrap_or(false)
            {
                break;
            }
            let start = *run_start.get_or_insert(idx);
            run += 1;
            if run >= self.sustain_count {
                recovered = Some(start);
                break;
            }
        }

        let begin = samples.partition_point(|s| s.timestamp < event.episode_start);
        let end = match recovered {
            Some(idx) => idx + 1,
            None => samples.len(),
        };
        let points: Vec<(f64, f64)> = samples[begin.min(end)..end]
            .iter()
            .map(|s| {
                let elapsed = (s.timestamp - event.episode_start).num_seconds() as f64;
                (elapsed / SECONDS_PER_DAY, s.value)
            })
            .collect();

        let recovered_at = recovered.map(|idx| samples[idx].timestamp);

        RecoveryProfile {
            event_id: event.event_id.clone(),
            recovery_duration: recovered_at.map(|at| at - event.episode_end),
            recovered_at,
            resolved: recovered.is_some(),
            trajectory_slope: stats::ols_slope(&points),
        }
    }

    /// Per-metric recovery statistics over a participant's episodes.
    /// `series` supplies the sample totals behind `anomaly_pct`.
    pub fn summarize(
        &self,
        records: &[AnomalyRecord],
        series: &ParticipantSeries,
    ) -> Vec<RecoverySummary> {
        let mut by_metric: BTreeMap<MetricType, Vec<&AnomalyRecord>> = BTreeMap::new();
        for record in records {
            by_metric.entry(record.event.metric).or_default().push(record);
        }

        by_metric
            .into_iter()
            .map(|(metric, records)| {
                let days: Vec<f64> = records
                    .iter()
                    .filter_map(|r| r.recovery.recovery_duration)
                    .map(|d| d.num_seconds() as f64 / SECONDS_PER_DAY)
                    .collect();
                let event_count = records.len();
                let resolved_count = records.iter().filter(|r| r.recovery.resolved).count();
                let anomaly_count: usize = records.iter().map(|r| r.event.anomalous_samples).sum();
                let total = series.samples(metric).len();

                RecoverySummary {
                    metric,
                    event_count,
                    anomaly_count,
                    anomaly_pct: if total == 0 {
                        0.0
                    } else {
                        anomaly_count as f64 / total as f64 * 100.0
                    },
                    resolved_count,
                    recovery_rate_pct: resolved_count as f64 / event_count as f64 * 100.0,
                    mean_recovery_days: stats::mean(&days),
                    median_recovery_days: stats::median(&days),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::AnomalyDetector;
    use crate::baseline::BaselineModel;
    use crate::types::test_support::*;
    use crate::types::{EpisodeClosure, Sample};
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn hr_series(overrides: &[(usize, f64)]) -> ParticipantSeries {
        let mut values: Vec<f64> = (0..30).map(|i| 60.0 + (i % 11) as f64).collect();
        for (idx, value) in overrides {
            values[*idx] = *value;
        }
        series_with("p1", 30, vec![(MetricType::Hr, values)])
    }

    fn records(series: &ParticipantSeries) -> Vec<AnomalyRecord> {
        let baseline = BaselineModel::default().compute(series, MetricType::Hr);
        let analyzer = RecoveryAnalyzer::default();
        AnomalyDetector::default()
            .detect(series, &baseline)
            .into_iter()
            .map(|event| {
                let recovery = analyzer.analyze(&event, series, &baseline);
                AnomalyRecord { event, recovery }
            })
            .collect()
    }

    #[test]
    fn test_spike_recovers_next_day() {
        let series = hr_series(&[(15, 130.0)]);
        let records = records(&series);
        assert_eq!(records.len(), 1);

        let recovery = &records[0].recovery;
        assert!(recovery.resolved);
        assert_eq!(recovery.recovery_duration, Some(Duration::days(1)));
        assert_eq!(recovery.recovered_at, Some(day(16)));
        assert_eq!(recovery.event_id, records[0].event.event_id);
        // 130 on day 15 down to 65 (60 + 16 % 11) on day 16
        assert_eq!(recovery.trajectory_slope, Some(-65.0));
    }

    #[test]
    fn test_episode_at_series_end_is_unresolved() {
        let series = hr_series(&[(28, 130.0), (29, 135.0)]);
        let records = records(&series);
        assert_eq!(records.len(), 1);

        let recovery = &records[0].recovery;
        assert!(!recovery.resolved);
        assert_eq!(recovery.recovery_duration, None);
        assert_eq!(recovery.recovered_at, None);
        assert_eq!(recovery.trajectory_slope, Some(5.0));
    }

    #[test]
    fn test_single_in_band_reading_is_not_recovery() {
        let series = hr_series(&[(28, 130.0)]);
        let records = records(&series);
        let recovery = &records[0].recovery;
        assert!(!recovery.resolved);
        // slope runs through the trailing in-band sample
        assert!(recovery.trajectory_slope.unwrap() < 0.0);
    }

    #[test]
    fn test_single_point_has_no_slope() {
        let series = hr_series(&[(29, 130.0)]);
        let records = records(&series);
        let recovery = &records[0].recovery;
        assert!(!recovery.resolved);
        assert_eq!(recovery.trajectory_slope, None);
    }

    #[test]
    fn test_summary_per_metric() {
        let series = hr_series(&[(5, 130.0), (28, 130.0), (29, 132.0)]);
        let records = records(&series);
        let summary = RecoveryAnalyzer::default().summarize(&records, &series);

        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].metric, MetricType::Hr);
        assert_eq!(summary[0].event_count, 2);
        assert_eq!(summary[0].anomaly_count, 3);
        assert_eq!(summary[0].anomaly_pct, 10.0);
        assert_eq!(summary[0].resolved_count, 1);
        assert_eq!(summary[0].recovery_rate_pct, 50.0);
        assert_eq!(summary[0].mean_recovery_days, Some(1.0));
        assert_eq!(summary[0].median_recovery_days, Some(1.0));
    }

    /// One elevated day, a five-day silence, then `tail`
    fn gap_series(tail: &[f64]) -> ParticipantSeries {
        let mut samples = daily_samples("p1", MetricType::Hr, &(0..20).map(|i| 60.0 + (i % 11) as f64).collect::<Vec<_>>());
        samples[19].value = 130.0;
        for (offset, value) in tail.iter().enumerate() {
            samples.push(Sample::new("p1", MetricType::Hr, day(25 + offset as i64), *value));
        }
        ParticipantSeries::new("p1", day(0), day(30)).with_samples(MetricType::Hr, samples)
    }

    #[test]
    fn test_sustained_return_after_data_gap_recovers() {
        let series = gap_series(&[64.0, 65.0, 63.0]);
        let records = records(&series);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event.closure, EpisodeClosure::DataGap);

        let recovery = &records[0].recovery;
        assert!(recovery.resolved);
        assert_eq!(recovery.recovered_at, Some(day(25)));
        assert_eq!(recovery.recovery_duration, Some(Duration::days(6)));
    }

    #[test]
    fn test_anomalous_reading_after_data_gap_leaves_episode_unresolved() {
        let series = gap_series(&[132.0, 64.0, 65.0]);
        let records = records(&series);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event.closure, EpisodeClosure::DataGap);
        assert_eq!(records[1].event.episode_start, day(25));

        let first = &records[0].recovery;
        assert!(!first.resolved);
        assert_eq!(first.recovered_at, None);
        assert_eq!(first.recovery_duration, None);
        // the later episode recovers on its own
        assert!(records[1].recovery.resolved);
    }
}
