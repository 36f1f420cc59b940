//! Time-series store
//!
//! Read-only container of cleaned participant series handed to the engine.
//! Built in memory or loaded from JSON / NDJSON produced by the upstream
//! cleaning stage.

use crate::error::EngineError;
use crate::types::{MetricType, ParticipantSeries, Sample, COHORT_SCOPE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// JSON document layout: `{"participants": {"<id>": ParticipantSeries}}`
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    participants: BTreeMap<String, ParticipantSeries>,
}

/// Cleaned series for every participant, keyed by participant id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeriesStore {
    participants: BTreeMap<String, ParticipantSeries>,
}

impl TimeSeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a complete participant series.
    ///
    /// A diastolic series is derived from systolic secondary values when
    /// none was provided.
    pub fn insert_series(&mut self, mut series: ParticipantSeries) -> Result<(), EngineError> {
        check_id(&series.participant_id)?;
        if self.participants.contains_key(&series.participant_id) {
            return Err(EngineError::DuplicateParticipant(series.participant_id));
        }
        series.derive_diastolic();
        self.participants.insert(series.participant_id.clone(), series);
        Ok(())
    }

    /// Add loose samples, grouped by participant and metric.
    ///
    /// Participants not yet in the store get a monitoring window spanning
    /// their samples. Existing windows are kept as they are.
    pub fn insert_samples(&mut self, samples: Vec<Sample>) -> Result<(), EngineError> {
        let mut grouped: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
        for sample in samples {
            check_id(&sample.participant_id)?;
            grouped
                .entry(sample.participant_id.clone())
                .or_default()
                .push(sample);
        }

        for (participant_id, samples) in grouped {
            let Some(start) = samples.iter().map(|s| s.timestamp).min() else {
                continue;
            };
            let end = samples.iter().map(|s| s.timestamp).max().unwrap_or(start);

            let series = self
                .participants
                .entry(participant_id.clone())
                .or_insert_with(|| ParticipantSeries::new(participant_id, start, end));

            for sample in samples {
                series.metrics.entry(sample.metric).or_default().push(sample);
            }
            for metric_samples in series.metrics.values_mut() {
                metric_samples.sort_by_key(|s| s.timestamp);
            }
            series.derive_diastolic();
        }

        Ok(())
    }

    pub fn get(&self, participant_id: &str) -> Option<&ParticipantSeries> {
        self.participants.get(participant_id)
    }

    /// Participants in id order
    pub fn participants(&self) -> impl Iterator<Item = &ParticipantSeries> {
        self.participants.values()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Load a JSON document of participant series
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let document: StoreDocument = serde_json::from_str(json)?;
        let mut store = Self::new();
        for (key, series) in document.participants {
            if key != series.participant_id {
                return Err(EngineError::ParseError(format!(
                    "participant key '{}' does not match series id '{}'",
                    key, series.participant_id
                )));
            }
            store.insert_series(series)?;
        }
        debug!(participants = store.len(), "loaded store from JSON");
        Ok(store)
    }

    /// Load newline-delimited JSON samples, one per line
    pub fn from_ndjson(ndjson: &str) -> Result<Self, EngineError> {
        let mut samples = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Sample>(trimmed) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    return Err(EngineError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }

        let mut store = Self::new();
        store.insert_samples(samples)?;
        debug!(participants = store.len(), "loaded store from NDJSON");
        Ok(store)
    }

    /// Serialize as a JSON document accepted by `from_json`
    pub fn to_json(&self) -> Result<String, EngineError> {
        let document = StoreDocument {
            participants: self.participants.clone(),
        };
        Ok(serde_json::to_string(&document)?)
    }

    /// Input contract violations per participant, in id order
    pub fn validate_all(&self) -> Vec<EngineError> {
        self.participants()
            .filter_map(|series| series.validate().err())
            .collect()
    }

    /// Number of samples per metric across all participants
    pub fn sample_counts(&self) -> BTreeMap<MetricType, usize> {
        let mut counts = BTreeMap::new();
        for series in self.participants() {
            for (metric, samples) in &series.metrics {
                *counts.entry(*metric).or_insert(0) += samples.len();
            }
        }
        counts
    }
}

fn check_id(participant_id: &str) -> Result<(), EngineError> {
    if participant_id == COHORT_SCOPE {
        return Err(EngineError::ReservedParticipantId(participant_id.to_string()));
    }
    if participant_id.is_empty() {
        return Err(EngineError::ParseError("empty participant id".to_string()));
    }
    Ok(())
}
