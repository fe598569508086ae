//! Per-variant metric accumulation.
//!
//! A [`VariantMetrics`] accumulator is fed finished sessions, either live
//! [`SessionResult`]s or persisted [`SessionLog`]s. Replaying the same sessions
//! into a fresh accumulator yields the same summary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::session::{SessionLog, SessionResult};

/// Failure bucket for a non-successful session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Abandoned,
    Parsing,
    Misclick,
    Other,
}

impl FailureKind {
    fn from_label(label: &str) -> Self {
        if label.contains("abandoned") {
            FailureKind::Abandoned
        } else if label == "parsing_error" {
            FailureKind::Parsing
        } else if label == "misclick" {
            FailureKind::Misclick
        } else {
            FailureKind::Other
        }
    }
}

/// Accumulated results for one variant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantMetrics {
    pub variant: String,
    pub total_sessions: u32,
    pub successful_sessions: u32,
    pub abandoned_sessions: u32,
    pub parsing_errors: u32,
    pub misclick_errors: u32,
    pub other_failures: u32,
    pub session_lengths: Vec<u32>,
    pub hesitation_steps: Vec<u32>,
    pub processing_times: Vec<f64>,
    pub success_processing_times: Vec<f64>,
    pub failure_processing_times: Vec<f64>,
    outcomes: BTreeMap<String, u32>,
}

impl VariantMetrics {
    pub fn new(variant: impl Into<String>) -> Self {
        Self {
            variant: variant.into(),
            ..Default::default()
        }
    }

    pub fn add_session_result(&mut self, result: &SessionResult) {
        self.record(
            result.success,
            result.outcome.as_str(),
            result.steps_taken,
            result.total_hesitation,
            result.total_processing_time,
        );
    }

    pub fn add_session_log(&mut self, log: &SessionLog) {
        self.record(
            log.success,
            &log.final_outcome,
            log.steps_taken(),
            log.total_hesitation(),
            log.total_processing_time(),
        );
    }

    fn record(&mut self, success: bool, label: &str, steps: u32, hesitation: u32, processing_time: f64) {
        self.total_sessions += 1;
        *self.outcomes.entry(label.to_string()).or_default() += 1;

        if success {
            self.successful_sessions += 1;
            self.success_processing_times.push(processing_time);
        } else {
            match FailureKind::from_label(label) {
                FailureKind::Abandoned => self.abandoned_sessions += 1,
                FailureKind::Parsing => self.parsing_errors += 1,
                FailureKind::Misclick => self.misclick_errors += 1,
                FailureKind::Other => self.other_failures += 1,
            }
            self.failure_processing_times.push(processing_time);
        }

        self.session_lengths.push(steps);
        self.hesitation_steps.push(hesitation);
        self.processing_times.push(processing_time);
    }

    /// Fraction of sessions that converted, 0 when empty
    pub fn task_success_rate(&self) -> f64 {
        ratio(self.successful_sessions, self.total_sessions)
    }

    /// Sessions per outcome label
    pub fn outcome_counts(&self) -> &BTreeMap<String, u32> {
        &self.outcomes
    }

    pub fn summary(&self) -> MetricsSummary {
        let errors = self.parsing_errors + self.misclick_errors + self.other_failures;
        MetricsSummary {
            variant: self.variant.clone(),
            total_sessions: self.total_sessions,
            successful_sessions: self.successful_sessions,
            abandoned_sessions: self.abandoned_sessions,
            parsing_errors: self.parsing_errors,
            misclick_errors: self.misclick_errors,
            other_failures: self.other_failures,
            task_success_rate: round2(self.task_success_rate() * 100.0),
            error_rate: round2(ratio(errors, self.total_sessions) * 100.0),
            avg_session_length: round2(mean_u32(&self.session_lengths)),
            min_session_length: self.session_lengths.iter().copied().min().unwrap_or(0),
            max_session_length: self.session_lengths.iter().copied().max().unwrap_or(0),
            avg_hesitation_steps: round2(mean_u32(&self.hesitation_steps)),
            avg_processing_time: round2(mean(&self.processing_times)),
            avg_processing_time_to_success: round2(mean(&self.success_processing_times)),
            avg_processing_time_to_failure: round2(mean(&self.failure_processing_times)),
        }
    }
}

/// Report-ready view of a [`VariantMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub variant: String,
    pub total_sessions: u32,
    pub successful_sessions: u32,
    pub abandoned_sessions: u32,
    pub parsing_errors: u32,
    pub misclick_errors: u32,
    pub other_failures: u32,
    /// Percent, two decimals
    pub task_success_rate: f64,
    /// Percent of sessions that failed for a reason other than abandonment
    pub error_rate: f64,
    pub avg_session_length: f64,
    pub min_session_length: u32,
    pub max_session_length: u32,
    pub avg_hesitation_steps: f64,
    pub avg_processing_time: f64,
    pub avg_processing_time_to_success: f64,
    pub avg_processing_time_to_failure: f64,
}

fn ratio(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub(crate) fn mean_u32(values: &[u32]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
