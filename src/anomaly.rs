//! Anomaly detection
//!
//! Point deviations from a valid baseline are grouped into gap-tolerant
//! episodes. Slow baseline drift is reported separately from the drift curve.

use crate::config::{AnomalyConfig, BaselineConfig};
use crate::stats;
use crate::types::{
    AnomalyEvent, Baseline, DeviationDirection, DriftSignal, EpisodeClosure, ParticipantSeries,
    Sample, Severity,
};
use tracing::debug;

/// Episode being accumulated by the scanner
#[derive(Debug, Clone, Copy)]
struct OpenEpisode {
    start: usize,
    /// Index of the latest anomalous sample
    last_anomalous: usize,
    peak: usize,
    peak_deviation: f64,
    /// Samples beyond the band so far
    anomalous: usize,
    /// Consecutive in-band samples since `last_anomalous`
    in_band_run: usize,
}

impl OpenEpisode {
    fn open(idx: usize, z: f64) -> Self {
        Self {
            start: idx,
            last_anomalous: idx,
            peak: idx,
            peak_deviation: z,
            anomalous: 1,
            in_band_run: 0,
        }
    }

    fn extend(&mut self, idx: usize, z: f64) {
        self.last_anomalous = idx;
        self.anomalous += 1;
        self.in_band_run = 0;
        if z.abs() > self.peak_deviation.abs() {
            self.peak = idx;
            self.peak_deviation = z;
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
    /// Length of the baseline drift windows in days
    drift_window_days: usize,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(AnomalyConfig::default())
    }
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            drift_window_days: BaselineConfig::default().drift_window_days,
        }
    }

    /// Match the drift window length used by the baseline model
    pub fn with_drift_window(mut self, days: usize) -> Self {
        self.drift_window_days = days;
        self
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Scan one metric series against its baseline.
    ///
    /// Returns nothing for invalid baselines. Episodes come out in
    /// chronological order and never overlap.
    pub fn detect(&self, series: &ParticipantSeries, baseline: &Baseline) -> Vec<AnomalyEvent> {
        if !baseline.valid {
            return Vec::new();
        }

        let samples = series.samples(baseline.metric);
        let max_gap_secs = expected_cadence_secs(samples)
            .map(|cadence| cadence * (self.config.gap_tolerance as f64 + 1.0));

        let mut events = Vec::new();
        let mut open: Option<OpenEpisode> = None;

        for (idx, sample) in samples.iter().enumerate() {
            let Some(z) = baseline.deviation(sample.value) else {
                continue;
            };

            if let (Some(episode), Some(limit)) = (open, max_gap_secs) {
                let gap = (sample.timestamp - samples[idx - 1].timestamp).num_seconds() as f64;
                if gap > limit {
                    let ordinal = events.len();
                    events.push(self.emit(series, baseline, samples, episode, EpisodeClosure::DataGap, ordinal));
                    open = None;
                }
            }

            let anomalous = z.abs() > self.config.deviation_multiplier;
            if anomalous {
                match open.as_mut() {
                    Some(episode) => episode.extend(idx, z),
                    None => open = Some(OpenEpisode::open(idx, z)),
                }
            } else if let Some(episode) = open.as_mut() {
                episode.in_band_run += 1;
                if episode.in_band_run >= self.config.sustain_count {
                    let closed = *episode;
                    let ordinal = events.len();
                    events.push(self.emit(series, baseline, samples, closed, EpisodeClosure::Recovered, ordinal));
                    open = None;
                }
            }
        }

        if let Some(episode) = open {
            let ordinal = events.len();
            events.push(self.emit(series, baseline, samples, episode, EpisodeClosure::SeriesEnd, ordinal));
        }

        debug!(
            participant = %series.participant_id,
            metric = %baseline.metric,
            episodes = events.len(),
            "scanned metric for anomalies"
        );

        events
    }

    /// Adjacent drift windows whose centers moved by more than the
    /// configured fraction of the baseline spread.
    ///
    /// Windows separated by an empty window are not compared.
    pub fn detect_drift(&self, baseline: &Baseline) -> Vec<DriftSignal> {
        if !baseline.valid {
            return Vec::new();
        }
        let threshold = self.config.drift_shift_fraction * baseline.spread;
        let step = self.drift_window_days as i64;

        baseline
            .drift_curve
            .windows(2)
            .filter(|w| (w[1].window_start - w[0].window_start).num_days() == step)
            .filter_map(|w| {
                let shift = w[1].center - w[0].center;
                (shift.abs() > threshold).then(|| DriftSignal {
                    participant_id: baseline.participant_id.clone(),
                    metric: baseline.metric,
                    from_window: w[0].window_start,
                    to_window: w[1].window_start,
                    from_center: w[0].center,
                    to_center: w[1].center,
                    shift,
                    shift_in_spreads: shift / baseline.spread,
                })
            })
            .collect()
    }

    /// Severity of an episode from its peak deviation in spreads
    pub fn classify(&self, peak_deviation: f64) -> Severity {
        let abs = peak_deviation.abs();
        if abs < self.config.moderate_multiplier {
            Severity::Mild
        } else if abs < self.config.severe_multiplier {
            Severity::Moderate
        } else {
            Severity::Severe
        }
    }

    fn emit(
        &self,
        series: &ParticipantSeries,
        baseline: &Baseline,
        samples: &[Sample],
        episode: OpenEpisode,
        closure: EpisodeClosure,
        ordinal: usize,
    ) -> AnomalyEvent {
        let peak = &samples[episode.peak];
        AnomalyEvent {
            event_id: format!("{}:{}:{}", series.participant_id, baseline.metric, ordinal),
            participant_id: series.participant_id.clone(),
            metric: baseline.metric,
            episode_start: samples[episode.start].timestamp,
            episode_end: samples[episode.last_anomalous].timestamp,
            peak_deviation: episode.peak_deviation,
            peak_value: peak.value,
            direction: if episode.peak_deviation >= 0.0 {
                DeviationDirection::Above
            } else {
                DeviationDirection::Below
            },
            severity: self.classify(episode.peak_deviation),
            anomalous_samples: episode.anomalous,
            closed: closure != EpisodeClosure::SeriesEnd,
            closure,
            samples: samples[episode.start..=episode.last_anomalous].to_vec(),
        }
    }
}

/// Median interval between consecutive samples, in seconds
pub fn expected_cadence_secs(samples: &[Sample]) -> Option<f64> {
    let intervals: Vec<f64> = samples
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_seconds() as f64)
        .collect();
    stats::median(&intervals)
}
