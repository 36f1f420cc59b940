//! Pipeline orchestration
//!
//! This module provides the public API for Synheart Cohort. It runs every
//! participant as an independent unit on a worker pool, then reduces the
//! per-participant intermediates into cohort correlations.
//!
//! Per-participant stages:
//! 1. Input validation
//! 2. BaselineModel - personal normal range per metric
//! 3. CorrelationEngine - participant correlations and cohort contributions
//! 4. AnomalyDetector - episodes and drift against valid baselines
//! 5. RecoveryAnalyzer - recovery profile per episode

use crate::anomaly::AnomalyDetector;
use crate::baseline::BaselineModel;
use crate::config::EngineConfig;
use crate::correlation::{CorrelationEngine, PairContribution, ParticipantCorrelations};
use crate::error::EngineError;
use crate::recovery::RecoveryAnalyzer;
use crate::store::TimeSeriesStore;
use crate::types::{
    AnomalyRecord, Baseline, CorrelationResult, DriftSignal, ParticipantSeries, ParticipantStatus,
    RecoverySummary, COHORT_SCOPE,
};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Run a full analysis with the given configuration.
///
/// # Example
/// ```ignore
/// let store = TimeSeriesStore::from_ndjson(&ndjson)?;
/// let report = analyze_cohort(&store, EngineConfig::default())?;
/// println!("{}", report.to_json_pretty()?);
/// ```
pub fn analyze_cohort(
    store: &TimeSeriesStore,
    config: EngineConfig,
) -> Result<AnalysisReport, EngineError> {
    AnalysisEngine::new(config)?.run(store)
}

/// Stops a running analysis between participant units
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Request that no further participant units start
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Whether `abort` has been called on any clone of this handle
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Everything computed for one participant
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantAnalysis {
    pub participant_id: String,
    pub status: ParticipantStatus,
    pub baselines: Vec<Baseline>,
    pub correlations: ParticipantCorrelations,
    /// Episodes in chronological order with their recovery profiles
    pub anomalies: Vec<AnomalyRecord>,
    pub drift: Vec<DriftSignal>,
    pub recovery_summaries: Vec<RecoverySummary>,
}

/// Serializable output of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub engine_version: String,
    pub config: EngineConfig,
    pub participants: BTreeMap<String, ParticipantStatus>,
    pub baselines: BTreeMap<String, Vec<Baseline>>,
    /// Keyed by participant id, plus the `"cohort"` key
    pub correlations: BTreeMap<String, Vec<CorrelationResult>>,
    pub anomalies: BTreeMap<String, Vec<AnomalyRecord>>,
    pub drift: BTreeMap<String, Vec<DriftSignal>>,
    pub recovery_summaries: BTreeMap<String, Vec<RecoverySummary>>,
}

impl AnalysisReport {
    /// Compact JSON; NaN statistics serialize as `null`
    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Indented JSON for the CLI `--pretty` flag
    pub fn to_json_pretty(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Results under the `"cohort"` key, empty if absent
    pub fn cohort_correlations(&self) -> &[CorrelationResult] {
        self.correlations
            .get(COHORT_SCOPE)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of participants per status name
    pub fn status_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for status in self.participants.values() {
            let name = match status {
                ParticipantStatus::Completed => "completed",
                ParticipantStatus::InsufficientData => "insufficient_data",
                ParticipantStatus::Failed { .. } => "failed",
                ParticipantStatus::Aborted => "aborted",
            };
            *counts.entry(name).or_insert(0) += 1;
        }
        counts
    }

    /// Record a participant that produced no analysis. Every map still gets
    /// an entry so consumers never see a missing key.
    fn insert_empty(&mut self, participant_id: String, status: ParticipantStatus) {
        self.baselines.insert(participant_id.clone(), Vec::new());
        self.correlations.insert(participant_id.clone(), Vec::new());
        self.anomalies.insert(participant_id.clone(), Vec::new());
        self.drift.insert(participant_id.clone(), Vec::new());
        self.recovery_summaries.insert(participant_id.clone(), Vec::new());
        self.participants.insert(participant_id, status);
    }
}

/// Result of one participant unit
enum UnitOutcome {
    Analyzed(Box<ParticipantAnalysis>),
    Failed { participant_id: String, error: String },
    Aborted { participant_id: String },
}

/// Analysis engine holding the configured components.
pub struct AnalysisEngine {
    config: EngineConfig,
    baseline: BaselineModel,
    correlation: CorrelationEngine,
    detector: AnomalyDetector,
    recovery: RecoveryAnalyzer,
    run_id: Option<Uuid>,
    abort: AbortHandle,
}

impl AnalysisEngine {
    /// Create an engine; fails before any analysis if the configuration is
    /// invalid.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            baseline: BaselineModel::new(config.baseline.clone()),
            correlation: CorrelationEngine::new(config.correlation.clone(), config.pairs.clone()),
            detector: AnomalyDetector::new(config.anomaly.clone())
                .with_drift_window(config.baseline.drift_window_days),
            recovery: RecoveryAnalyzer::new(&config.anomaly),
            config,
            run_id: None,
            abort: AbortHandle::default(),
        })
    }

    /// Use a fixed run id instead of a random one
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// The validated configuration the engine runs with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle that stops this engine's runs between units
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Analyze a single participant
    pub fn analyze_participant(
        &self,
        series: &ParticipantSeries,
    ) -> Result<ParticipantAnalysis, EngineError> {
        series.validate()?;

        let baselines = self.baseline.compute_all(series);
        let correlations = self.correlation.analyze_participant(series);

        let mut anomalies = Vec::new();
        let mut drift = Vec::new();
        for baseline in baselines.iter().filter(|b| b.valid) {
            for event in self.detector.detect(series, baseline) {
                let recovery = self.recovery.analyze(&event, series, baseline);
                anomalies.push(AnomalyRecord { event, recovery });
            }
            drift.extend(self.detector.detect_drift(baseline));
        }
        anomalies.sort_by(|a, b| {
            (a.event.episode_start, a.event.metric).cmp(&(b.event.episode_start, b.event.metric))
        });
        let recovery_summaries = self.recovery.summarize(&anomalies, series);

        let status = if !baselines.iter().any(|b| b.valid) && !correlations.any_computable() {
            warn!(participant = %series.participant_id, "insufficient data for analysis");
            ParticipantStatus::InsufficientData
        } else {
            ParticipantStatus::Completed
        };

        Ok(ParticipantAnalysis {
            participant_id: series.participant_id.clone(),
            status,
            baselines,
            correlations,
            anomalies,
            drift,
            recovery_summaries,
        })
    }

    /// Analyze every participant in the store and aggregate the cohort.
    ///
    /// A failing participant is recorded with a `failed` status and does not
    /// affect the others.
    pub fn run(&self, store: &TimeSeriesStore) -> Result<AnalysisReport, EngineError> {
        let run_id = self.run_id.unwrap_or_else(Uuid::new_v4);
        info!(%run_id, participants = store.len(), workers = self.config.workers, "starting analysis run");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .map_err(|e| EngineError::Configuration(format!("worker pool: {}", e)))?;

        let series: Vec<&ParticipantSeries> = store.participants().collect();

        let (outcomes, cohort) = pool.install(|| {
            let outcomes: Vec<UnitOutcome> = series.par_iter().map(|s| self.run_unit(s)).collect();

            // barrier: every unit has finished
            let cohort = {
                let contributions: Vec<&[PairContribution]> = outcomes
                    .iter()
                    .filter_map(|o| match o {
                        UnitOutcome::Analyzed(a) => Some(a.correlations.contributions.as_slice()),
                        _ => None,
                    })
                    .collect();
                self.correlation.aggregate_cohort(&contributions)
            };
            (outcomes, cohort)
        });

        let mut report = AnalysisReport {
            run_id,
            generated_at: Utc::now(),
            engine_version: crate::ENGINE_VERSION.to_string(),
            config: self.config.clone(),
            participants: BTreeMap::new(),
            baselines: BTreeMap::new(),
            correlations: BTreeMap::new(),
            anomalies: BTreeMap::new(),
            drift: BTreeMap::new(),
            recovery_summaries: BTreeMap::new(),
        };

        for outcome in outcomes {
            match outcome {
                UnitOutcome::Analyzed(analysis) => {
                    let analysis = *analysis;
                    let id = analysis.participant_id;
                    report.participants.insert(id.clone(), analysis.status);
                    report.baselines.insert(id.clone(), analysis.baselines);
                    report.correlations.insert(id.clone(), analysis.correlations.results);
                    report.anomalies.insert(id.clone(), analysis.anomalies);
                    report.drift.insert(id.clone(), analysis.drift);
                    report.recovery_summaries.insert(id, analysis.recovery_summaries);
                }
                UnitOutcome::Failed { participant_id, error } => {
                    report.insert_empty(participant_id, ParticipantStatus::Failed { error });
                }
                UnitOutcome::Aborted { participant_id } => {
                    report.insert_empty(participant_id, ParticipantStatus::Aborted);
                }
            }
        }
        report.correlations.insert(COHORT_SCOPE.to_string(), cohort);

        let counts = report.status_counts();
        info!(%run_id, ?counts, "analysis run finished");

        Ok(report)
    }

    fn run_unit(&self, series: &ParticipantSeries) -> UnitOutcome {
        let participant_id = series.participant_id.clone();
        if self.abort.is_aborted() {
            return UnitOutcome::Aborted { participant_id };
        }

        match panic::catch_unwind(AssertUnwindSafe(|| self.analyze_participant(series))) {
            Ok(Ok(analysis)) => UnitOutcome::Analyzed(Box::new(analysis)),
            Ok(Err(e)) => {
                warn!(participant = %participant_id, error = %e, "participant analysis failed");
                UnitOutcome::Failed {
                    participant_id,
                    error: e.to_string(),
                }
            }
            Err(payload) => {
                let error = panic_message(payload.as_ref());
                warn!(participant = %participant_id, %error, "participant analysis panicked");
                UnitOutcome::Failed { participant_id, error }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic: unknown cause".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::*;
    use crate::types::{MetricType, Severity};
    use pretty_assertions::assert_eq;

    fn healthy(id: &str, spike: bool) -> ParticipantSeries {
        let mut hr: Vec<f64> = (0..30).map(|i| 60.0 + (i % 11) as f64).collect();
        if spike {
            hr[15] = 130.0;
        }
        let steps: Vec<f64> = (0..30).map(|i| 4000.0 + ((i * 7) % 13) as f64 * 400.0).collect();
        let sleep: Vec<f64> = steps.iter().map(|s| 10.0 - s / 2000.0).collect();
        series_with(
            id,
            30,
            vec![(MetricType::Hr, hr), (MetricType::Steps, steps), (MetricType::Sleep, sleep)],
        )
    }

    fn short(id: &str) -> ParticipantSeries {
        series_with(
            id,
            5,
            vec![
                (MetricType::Hr, vec![60.0, 65.0, 140.0, 62.0, 61.0]),
                (MetricType::Steps, vec![5000.0, 8000.0, 3000.0, 9000.0, 4000.0]),
            ],
        )
    }

    fn misaligned(id: &str) -> ParticipantSeries {
        let mut samples = daily_samples(id, MetricType::Hr, &[60.0, 61.0, 62.0]);
        samples.swap(0, 2);
        ParticipantSeries::new(id, day(0), day(3)).with_samples(MetricType::Hr, samples)
    }

    fn store(series: Vec<ParticipantSeries>) -> TimeSeriesStore {
        let mut store = TimeSeriesStore::new();
        for s in series {
            store.insert_series(s).unwrap();
        }
        store
    }

    #[test]
    fn test_invalid_config_fails_before_run() {
        let mut config = EngineConfig::default();
        config.anomaly.deviation_multiplier = 0.0;
        assert!(matches!(AnalysisEngine::new(config), Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_partial_failure_is_isolated() {
        let store = store(vec![healthy("p1", true), misaligned("p2"), short("p3"), healthy("p4", false)]);
        let report = analyze_cohort(&store, EngineConfig::default()).unwrap();

        assert_eq!(report.participants["p1"], ParticipantStatus::Completed);
        assert!(matches!(report.participants["p2"], ParticipantStatus::Failed { .. }));
        assert_eq!(report.participants["p3"], ParticipantStatus::InsufficientData);
        assert_eq!(report.participants["p4"], ParticipantStatus::Completed);
        assert!(report.baselines["p2"].is_empty());
        assert!(report.correlations["p2"].is_empty());
        assert!(report.anomalies["p2"].is_empty());
        assert!(report.drift["p2"].is_empty());
        assert!(report.recovery_summaries["p2"].is_empty());

        let p1_events = &report.anomalies["p1"];
        assert_eq!(p1_events.len(), 1);
        assert_eq!(p1_events[0].event.severity, Severity::Severe);
        assert!(p1_events[0].recovery.resolved);
        assert!(report.anomalies["p4"].is_empty());
    }

    #[test]
    fn test_short_participant_has_nothing_computable() {
        let store = store(vec![short("p1")]);
        let report = analyze_cohort(&store, EngineConfig::default()).unwrap();

        assert!(report.baselines["p1"].iter().all(|b| !b.valid));
        assert!(report.correlations["p1"].iter().all(|r| !r.coefficient.is_computable()));
        assert!(report.anomalies["p1"].is_empty());
        assert!(report.cohort_correlations().iter().all(|r| !r.coefficient.is_computable()));
    }

    #[test]
    fn test_cohort_results_present() {
        let store = store(vec![healthy("p1", false), healthy("p2", true)]);
        let report = analyze_cohort(&store, EngineConfig::default()).unwrap();

        let cohort = report.cohort_correlations();
        assert_eq!(cohort.len(), 15 * 3 * 2);
        let steps_sleep = cohort
            .iter()
            .find(|r| {
                r.pair.first() == MetricType::Steps
                    && r.pair.second() == MetricType::Sleep
                    && r.kind == crate::types::CorrelationKind::Daily
            })
            .unwrap();
        assert_eq!(steps_sleep.sample_size, 60);
        assert!((steps_sleep.coefficient.value().unwrap() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_abort_before_run_marks_all_aborted() {
        let store = store(vec![healthy("p1", false), healthy("p2", false)]);
        let engine = AnalysisEngine::new(EngineConfig::default()).unwrap();
        engine.abort_handle().abort();
        let report = engine.run(&store).unwrap();

        assert_eq!(report.status_counts()["aborted"], 2);
        assert_eq!(report.baselines.len(), 2);
        assert!(report.baselines.values().all(Vec::is_empty));
        assert!(report.anomalies.values().all(Vec::is_empty));
        // participants plus the cohort key
        assert_eq!(report.correlations.len(), 3);
        assert!(report.cohort_correlations().iter().all(|r| !r.coefficient.is_computable()));
    }

    #[test]
    fn test_worker_count_does_not_change_results() {
        let store = store(vec![healthy("p1", true), healthy("p2", false), short("p3")]);
        let run_id = Uuid::nil();

        let mut single = EngineConfig::default();
        single.workers = 1;
        let mut multi = EngineConfig::default();
        multi.workers = 4;

        let a = AnalysisEngine::new(single).unwrap().with_run_id(run_id).run(&store).unwrap();
        let b = AnalysisEngine::new(multi).unwrap().with_run_id(run_id).run(&store).unwrap();

        assert_eq!(a.run_id, b.run_id);
        assert_eq!(a.correlations, b.correlations);
        assert_eq!(a.anomalies, b.anomalies);
        assert_eq!(a.participants, b.participants);
    }

    #[test]
    fn test_report_json_keeps_sentinels() {
        let mut tail_spike = healthy("p1", false);
        let hr = tail_spike.metrics.get_mut(&MetricType::Hr).unwrap();
        hr[29].value = 135.0;
        let store = store(vec![tail_spike, short("p2")]);
        let report = analyze_cohort(&store, EngineConfig::default()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        assert_eq!(json["participants"]["p2"]["status"], "insufficient_data");
        assert_eq!(json["correlations"]["p2"][0]["coefficient"]["status"], "not_computable");
        assert!(json["correlations"]["cohort"].is_array());

        let record = &json["anomalies"]["p1"][0];
        assert_eq!(record["event"]["closed"], false);
        assert_eq!(record["recovery"]["resolved"], false);
        assert!(record["recovery"]["recovery_duration_secs"].is_null());

        let hr_baseline = &json["baselines"]["p1"][0];
        assert_eq!(hr_baseline["metric"], "hr");
        assert_eq!(hr_baseline["temporal_patterns"]["peak_hour"]["hour"], 8);
        assert_eq!(hr_baseline["temporal_patterns"]["weekday_means"][0]["weekday"], "Mon");
        assert_eq!(json["recovery_summaries"]["p1"][0]["anomaly_count"], 1);
    }
}
