//! Calendar-day alignment
//!
//! Metric series are joined explicitly by calendar day (UTC). A day with
//! several samples contributes their mean; a day without samples for a
//! metric is absent from that metric's daily series and therefore excluded
//! from any join involving it.

use crate::types::{MetricType, ParticipantSeries, Sample};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Daily mean value keyed by calendar day
pub type DailySeries = BTreeMap<NaiveDate, f64>;

/// One joined observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignedDay {
    /// Day of the first metric's observation
    pub day: NaiveDate,
    pub first: f64,
    pub second: f64,
}

/// Collapse samples into daily means
pub fn daily_means(samples: &[Sample]) -> DailySeries {
    let mut sums: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for sample in samples {
        let entry = sums.entry(sample.day()).or_insert((0.0, 0));
        entry.0 += sample.value;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(day, (sum, count))| (day, sum / count as f64))
        .collect()
}

/// Daily series for every recorded metric of one participant
#[derive(Debug, Clone, Default)]
pub struct DailyTable {
    metrics: BTreeMap<MetricType, DailySeries>,
}

impl DailyTable {
    pub fn from_series(series: &ParticipantSeries) -> Self {
        let metrics = series
            .recorded_metrics()
            .map(|metric| (metric, daily_means(series.samples(metric))))
            .collect();
        Self { metrics }
    }

    /// Daily series of a metric, empty when the metric was not recorded
    pub fn get(&self, metric: MetricType) -> &DailySeries {
        static EMPTY: DailySeries = BTreeMap::new();
        self.metrics.get(&metric).unwrap_or(&EMPTY)
    }

    /// Number of distinct calendar days with any metric recorded
    pub fn total_days(&self) -> usize {
        let mut days: Vec<NaiveDate> = self.metrics.values().flat_map(|s| s.keys().copied()).collect();
        days.sort();
        days.dedup();
        days.len()
    }
}

/// Days where both metrics have a value
pub fn align_same_day(first: &DailySeries, second: &DailySeries) -> Vec<AlignedDay> {
    first
        .iter()
        .filter_map(|(day, a)| {
            second.get(day).map(|b| AlignedDay {
                day: *day,
                first: *a,
                second: *b,
            })
        })
        .collect()
}

/// First metric on day d joined with second metric on day d+1
pub fn align_next_day(first: &DailySeries, second: &DailySeries) -> Vec<AlignedDay> {
    first
        .iter()
        .filter_map(|(day, a)| {
            let next = *day + Duration::days(1);
            second.get(&next).map(|b| AlignedDay {
                day: *day,
                first: *a,
                second: *b,
            })
        })
        .collect()
}

/// First and last calendar day on which either metric has data
pub fn day_span(first: &DailySeries, second: &DailySeries) -> Option<(NaiveDate, NaiveDate)> {
    let start = [first.keys().next(), second.keys().next()]
        .into_iter()
        .flatten()
        .min()?;
    let end = [first.keys().next_back(), second.keys().next_back()]
        .into_iter()
        .flatten()
        .max()?;
    Some((*start, *end))
}

/// Split aligned observations into parallel value vectors
pub fn unzip_values(days: &[AlignedDay]) -> (Vec<f64>, Vec<f64>) {
    days.iter().map(|d| (d.first, d.second)).unzip()
}
