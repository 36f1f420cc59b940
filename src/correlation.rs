//! Correlation analysis
//!
//! Daily, next-day (lag-1) and rolling-window correlations between metric
//! pairs, computed per participant and pooled across the cohort. Pearson and
//! Spearman are always both reported.

use crate::alignment::{self, AlignedDay, DailyTable};
use crate::config::CorrelationConfig;
use crate::error::StatError;
use crate::stats;
use crate::types::{
    Coefficient, ConfidenceLevel, CorrelationKind, CorrelationMethod, CorrelationResult,
    CorrelationStrength, MetricPair, ParticipantSeries, RollingPoint, RollingTrend, Scope,
    TrendDirection,
};
use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use tracing::debug;

/// Regimes computed for every pair, in report order
const KINDS: [CorrelationKind; 3] = [
    CorrelationKind::Daily,
    CorrelationKind::Lag1,
    CorrelationKind::Rolling,
];

/// What one participant contributes to the cohort pool for one pair.
///
/// A regime the participant could not compute individually contributes
/// nothing (`None`) rather than an imputed value.
#[derive(Debug, Clone, PartialEq)]
pub struct PairContribution {
    pub pair: MetricPair,
    /// First and last day either metric was observed
    pub span: Option<(NaiveDate, NaiveDate)>,
    /// Same-day observations; also feeds cohort rolling windows
    pub daily: Option<Vec<AlignedDay>>,
    pub lag: Option<Vec<AlignedDay>>,
}

/// Correlation output of one participant unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticipantCorrelations {
    pub results: Vec<CorrelationResult>,
    pub contributions: Vec<PairContribution>,
}

impl ParticipantCorrelations {
    /// Whether at least one result carries a coefficient
    pub fn any_computable(&self) -> bool {
        self.results.iter().any(|r| r.coefficient.is_computable())
    }
}

/// Correlation engine over a fixed list of metric pairs
#[derive(Debug, Clone)]
pub struct CorrelationEngine {
    config: CorrelationConfig,
    pairs: Vec<MetricPair>,
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new(CorrelationConfig::default(), MetricPair::default_pairs())
    }
}

impl CorrelationEngine {
    pub fn new(config: CorrelationConfig, pairs: Vec<MetricPair>) -> Self {
        Self { config, pairs }
    }

    /// Configured pairs in report order
    pub fn pairs(&self) -> &[MetricPair] {
        &self.pairs
    }

    /// All configured pairs, regimes and methods for one participant, plus
    /// the aligned observations needed for cohort pooling.
    pub fn analyze_participant(&self, series: &ParticipantSeries) -> ParticipantCorrelations {
        let table = DailyTable::from_series(series);
        let scope = Scope::Participant(series.participant_id.clone());
        let mut out = ParticipantCorrelations::default();

        for pair in &self.pairs {
            let first = table.get(pair.first());
            let second = table.get(pair.second());
            let daily = alignment::align_same_day(first, second);
            let lag = alignment::align_next_day(first, second);
            let span = alignment::day_span(first, second);

            let results = self.pair_results(&scope, *pair, &daily, &lag, span);
            let computable = |kind: CorrelationKind| {
                results
                    .iter()
                    .any(|r| r.kind == kind && r.coefficient.is_computable())
            };
            let daily_ok = computable(CorrelationKind::Daily);
            let lag_ok = computable(CorrelationKind::Lag1);

            out.contributions.push(PairContribution {
                pair: *pair,
                span,
                daily: daily_ok.then_some(daily),
                lag: lag_ok.then_some(lag),
            });
            out.results.extend(results);
        }

        debug!(
            participant = %series.participant_id,
            total_days = table.total_days(),
            computable = out.results.iter().filter(|r| r.coefficient.is_computable()).count(),
            "computed participant correlations"
        );

        out
    }

    /// A single correlation for one participant
    pub fn correlate(
        &self,
        series: &ParticipantSeries,
        pair: MetricPair,
        kind: CorrelationKind,
        method: CorrelationMethod,
    ) -> CorrelationResult {
        let table = DailyTable::from_series(series);
        let first = table.get(pair.first());
        let second = table.get(pair.second());
        let scope = Scope::Participant(series.participant_id.clone());

        match kind {
            CorrelationKind::Daily => {
                let days = alignment::align_same_day(first, second);
                self.static_result(&scope, pair, kind, method, &days)
            }
            CorrelationKind::Lag1 => {
                let days = alignment::align_next_day(first, second);
                self.static_result(&scope, pair, kind, method, &days)
            }
            CorrelationKind::Rolling => {
                let days = alignment::align_same_day(first, second);
                let span = alignment::day_span(first, second);
                self.rolling_result(&scope, pair, method, &days, span)
            }
        }
    }

    /// Pool every participant's contributions and compute cohort results.
    ///
    /// This is the reduction step: it must only run once all participant
    /// units have finished.
    pub fn aggregate_cohort(&self, participants: &[&[PairContribution]]) -> Vec<CorrelationResult> {
        self.pairs
            .par_iter()
            .flat_map_iter(|pair| {
                let mut daily: Vec<AlignedDay> = Vec::new();
                let mut lag: Vec<AlignedDay> = Vec::new();
                let mut span: Option<(NaiveDate, NaiveDate)> = None;

                for contribution in participants
                    .iter()
                    .flat_map(|c| c.iter())
                    .filter(|c| c.pair == *pair)
                {
                    if let Some(days) = &contribution.daily {
                        daily.extend_from_slice(days);
                        span = merge_span(span, contribution.span);
                    }
                    if let Some(days) = &contribution.lag {
                        lag.extend_from_slice(days);
                    }
                }

                daily.sort_by_key(|d| d.day);
                lag.sort_by_key(|d| d.day);

                self.pair_results(&Scope::Cohort, *pair, &daily, &lag, span)
            })
            .collect()
    }

    fn pair_results(
        &self,
        scope: &Scope,
        pair: MetricPair,
        daily: &[AlignedDay],
        lag: &[AlignedDay],
        span: Option<(NaiveDate, NaiveDate)>,
    ) -> Vec<CorrelationResult> {
        let mut results = Vec::with_capacity(KINDS.len() * CorrelationMethod::ALL.len());
        for kind in KINDS {
            for method in CorrelationMethod::ALL {
                let result = match kind {
                    CorrelationKind::Daily => self.static_result(scope, pair, kind, method, daily),
                    CorrelationKind::Lag1 => self.static_result(scope, pair, kind, method, lag),
                    CorrelationKind::Rolling => self.rolling_result(scope, pair, method, daily, span),
                };
                results.push(result);
            }
        }
        results
    }

    fn coefficient(&self, days: &[AlignedDay], method: CorrelationMethod) -> Coefficient {
        let (x, y) = alignment::unzip_values(days);
        let min_n = self.config.min_aligned_days;
        let r = match method {
            CorrelationMethod::Pearson => stats::pearson(&x, &y, min_n),
            CorrelationMethod::Spearman => stats::spearman(&x, &y, min_n),
        };
        match r {
            Ok(r) => Coefficient::Computed {
                r,
                p_value: stats::correlation_p_value(r, days.len()),
            },
            Err(reason) => Coefficient::NotComputable { reason },
        }
    }

    fn static_result(
        &self,
        scope: &Scope,
        pair: MetricPair,
        kind: CorrelationKind,
        method: CorrelationMethod,
        days: &[AlignedDay],
    ) -> CorrelationResult {
        let coefficient = self.coefficient(days, method);
        let n = days.len();

        let (significant, strength_label, confidence_label) = match coefficient {
            Coefficient::Computed { r, p_value } => (
                p_value.map(|p| p < self.config.significance_level),
                Some(strength(r)),
                Some(confidence(n, r)),
            ),
            Coefficient::NotComputable { .. } => (None, None, None),
        };

        CorrelationResult {
            scope: scope.clone(),
            pair,
            kind,
            method,
            coefficient,
            sample_size: n,
            significant,
            strength: strength_label,
            confidence: confidence_label,
            std_dev: None,
            window: None,
            trend: None,
        }
    }

    /// Sliding calendar windows over `span`, advanced one day at a time.
    /// `days` must be sorted by day.
    fn rolling_result(
        &self,
        scope: &Scope,
        pair: MetricPair,
        method: CorrelationMethod,
        days: &[AlignedDay],
        span: Option<(NaiveDate, NaiveDate)>,
    ) -> CorrelationResult {
        let window_len = self.config.rolling_window_days;
        let total_days = span
            .map(|(start, end)| (end - start).num_days() as usize + 1)
            .unwrap_or(0);
        let window_count = (total_days + 1).saturating_sub(window_len);

        let mut points = Vec::with_capacity(window_count);
        if let Some((start, _)) = span {
            for offset in 0..window_count {
                let window_start = start + Duration::days(offset as i64);
                let window_end = window_start + Duration::days(window_len as i64);
                let lo = days.partition_point(|d| d.day < window_start);
                let hi = days.partition_point(|d| d.day < window_end);
                let in_window = &days[lo..hi];
                points.push(RollingPoint {
                    window_start,
                    coefficient: self.coefficient(in_window, method),
                    sample_size: in_window.len(),
                });
            }
        }

        let computed: Vec<f64> = points.iter().filter_map(|p| p.coefficient.value()).collect();
        let coefficient = match stats::mean(&computed) {
            Some(r) => Coefficient::Computed { r, p_value: None },
            None => Coefficient::NotComputable {
                reason: rolling_failure(&points, window_len, total_days, self.config.min_aligned_days),
            },
        };

        CorrelationResult {
            scope: scope.clone(),
            pair,
            kind: CorrelationKind::Rolling,
            method,
            coefficient,
            sample_size: computed.len(),
            significant: None,
            strength: coefficient.value().map(strength),
            confidence: None,
            std_dev: stats::std_dev(&computed),
            trend: Some(trend(&computed)),
            window: Some(points),
        }
    }
}

fn merge_span(
    current: Option<(NaiveDate, NaiveDate)>,
    other: Option<(NaiveDate, NaiveDate)>,
) -> Option<(NaiveDate, NaiveDate)> {
    match (current, other) {
        (Some((a0, a1)), Some((b0, b1))) => Some((a0.min(b0), a1.max(b1))),
        (Some(span), None) | (None, Some(span)) => Some(span),
        (None, None) => None,
    }
}

/// Reason a rolling series produced no computable window
fn rolling_failure(
    points: &[RollingPoint],
    window_len: usize,
    total_days: usize,
    min_aligned_days: usize,
) -> StatError {
    if points.is_empty() {
        return StatError::InsufficientData {
            required: window_len,
            available: total_days,
        };
    }
    let all_degenerate = points.iter().all(|p| {
        matches!(
            p.coefficient,
            Coefficient::NotComputable {
                reason: StatError::DegenerateSeries
            }
        )
    });
    if all_degenerate {
        StatError::DegenerateSeries
    } else {
        StatError::InsufficientData {
            required: min_aligned_days,
            available: points.iter().map(|p| p.sample_size).max().unwrap_or(0),
        }
    }
}

/// Strength label from |r|: strong at 0.7, moderate at 0.5, weak at 0.3
pub fn strength(r: f64) -> CorrelationStrength {
    let abs = r.abs();
    if abs >= 0.7 {
        CorrelationStrength::Strong
    } else if abs >= 0.5 {
        CorrelationStrength::Moderate
    } else if abs >= 0.3 {
        CorrelationStrength::Weak
    } else {
        CorrelationStrength::VeryWeak
    }
}

/// Confidence label from the aligned sample size and |r|
pub fn confidence(n: usize, r: f64) -> ConfidenceLevel {
    let abs = r.abs();
    if n >= 30 && abs >= 0.5 {
        ConfidenceLevel::Solid
    } else if n >= 14 && abs >= 0.3 {
        ConfidenceLevel::PrettySure
    } else if abs >= 0.2 {
        ConfidenceLevel::MightBeAThing
    } else {
        ConfidenceLevel::NotConfident
    }
}

/// Trend of computable rolling coefficients over window index
pub fn trend(coefficients: &[f64]) -> RollingTrend {
    if coefficients.len() < 3 {
        return RollingTrend {
            direction: TrendDirection::InsufficientData,
            slope: None,
        };
    }

    let points: Vec<(f64, f64)> = coefficients
        .iter()
        .enumerate()
        .map(|(i, r)| (i as f64, *r))
        .collect();

    let slope = stats::ols_slope(&points);
    let direction = match slope {
        Some(s) if s > 0.005 => TrendDirection::Strengthening,
        Some(s) if s < -0.005 => TrendDirection::Weakening,
        Some(_) => TrendDirection::Stable,
        None => TrendDirection::InsufficientData,
    };

    RollingTrend { direction, slope }
}
