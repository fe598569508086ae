//! Cross-session analysis shared by the suite report and `summarize`.
//!
//! Everything here is a pure function over [`SessionRecord`]s, which can be
//! built from live [`SessionResult`]s or from persisted [`SessionLog`]s.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::metrics::{MetricsSummary, VariantMetrics, mean, mean_u32, round2};
use crate::persona::Persona;
use crate::session::{RunDirectory, SessionLog, SessionResult};
use crate::suite::{SuiteError, SuiteResult};

/// Number of personas listed in each ranking
pub const RANKING_SIZE: usize = 5;

/// The fields of a finished session the analysis needs
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub variant: String,
    pub persona_id: String,
    pub success: bool,
    pub steps: u32,
    pub hesitation: u32,
    pub processing_time: f64,
}

impl From<&SessionResult> for SessionRecord {
    fn from(r: &SessionResult) -> Self {
        Self {
            variant: r.variant.clone(),
            persona_id: r.persona_id.clone(),
            success: r.success,
            steps: r.steps_taken,
            hesitation: r.total_hesitation,
            processing_time: r.total_processing_time,
        }
    }
}

impl From<&SessionLog> for SessionRecord {
    fn from(log: &SessionLog) -> Self {
        Self {
            variant: log.variant.clone(),
            persona_id: log.persona_id.clone(),
            success: log.success,
            steps: log.steps_taken(),
            hesitation: log.total_hesitation(),
            processing_time: log.total_processing_time(),
        }
    }
}

/// Aggregates over a group of sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub sessions: u32,
    /// Percent, two decimals
    pub success_rate: f64,
    pub avg_steps: f64,
    pub avg_processing_time: f64,
    pub avg_hesitation: f64,
}

impl GroupStats {
    pub fn of<'a>(records: impl IntoIterator<Item = &'a SessionRecord>) -> Self {
        let records: Vec<&SessionRecord> = records.into_iter().collect();
        if records.is_empty() {
            return Self::default();
        }
        let steps: Vec<u32> = records.iter().map(|r| r.steps).collect();
        let hesitation: Vec<u32> = records.iter().map(|r| r.hesitation).collect();
        let times: Vec<f64> = records.iter().map(|r| r.processing_time).collect();
        let successes = records.iter().filter(|r| r.success).count();
        Self {
            sessions: records.len() as u32,
            success_rate: round2(successes as f64 / records.len() as f64 * 100.0),
            avg_steps: round2(mean_u32(&steps)),
            avg_processing_time: round2(mean(&times)),
            avg_hesitation: round2(mean_u32(&hesitation)),
        }
    }
}

/// One variant measured against the baseline (first) variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantComparison {
    pub baseline: String,
    pub variant: String,
    /// Percentage points
    pub success_rate_change: f64,
    pub session_length_change: f64,
    pub hesitation_change: f64,
    pub processing_time_change: f64,
    pub processing_time_to_success_change: f64,
    pub processing_time_to_failure_change: f64,
}

pub fn compare(baseline: &MetricsSummary, variant: &MetricsSummary) -> VariantComparison {
    VariantComparison {
        baseline: baseline.variant.clone(),
        variant: variant.variant.clone(),
        success_rate_change: round2(variant.task_success_rate - baseline.task_success_rate),
        session_length_change: round2(variant.avg_session_length - baseline.avg_session_length),
        hesitation_change: round2(variant.avg_hesitation_steps - baseline.avg_hesitation_steps),
        processing_time_change: round2(variant.avg_processing_time - baseline.avg_processing_time),
        processing_time_to_success_change: round2(
            variant.avg_processing_time_to_success - baseline.avg_processing_time_to_success,
        ),
        processing_time_to_failure_change: round2(
            variant.avg_processing_time_to_failure - baseline.avg_processing_time_to_failure,
        ),
    }
}

/// Every variant compared against the first summary
pub fn compare_all(summaries: &[MetricsSummary]) -> Vec<VariantComparison> {
    match summaries.split_first() {
        Some((baseline, rest)) => rest.iter().map(|s| compare(baseline, s)).collect(),
        None => Vec::new(),
    }
}

/// Sessions of one variant that all succeeded, or all failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceGroup {
    pub variant: String,
    pub success: bool,
    pub count: u32,
    /// Share of all sessions in the run, percent, one decimal
    pub percentage: f64,
    pub avg_steps: f64,
    pub avg_processing_time: f64,
    pub avg_hesitation: f64,
    pub personas: Vec<String>,
}

/// Split each variant's sessions into success and failure groups
pub fn experience_groups(variants: &[String], records: &[SessionRecord]) -> Vec<ExperienceGroup> {
    let total = records.len();
    let mut groups = Vec::with_capacity(variants.len() * 2);

    for variant in variants {
        for success in [true, false] {
            let members: Vec<&SessionRecord> = records
                .iter()
                .filter(|r| &r.variant == variant && r.success == success)
                .collect();
            let stats = GroupStats::of(members.iter().copied());
            let personas: BTreeSet<String> = members.iter().map(|r| r.persona_id.clone()).collect();
            let percentage = if total == 0 {
                0.0
            } else {
                (members.len() as f64 / total as f64 * 1000.0).round() / 10.0
            };
            groups.push(ExperienceGroup {
                variant: variant.clone(),
                success,
                count: stats.sessions,
                percentage,
                avg_steps: stats.avg_steps,
                avg_processing_time: stats.avg_processing_time,
                avg_hesitation: stats.avg_hesitation,
                personas: personas.into_iter().collect(),
            });
        }
    }
    groups
}

/// How one persona fared in each variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaBreakdown {
    pub persona_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub per_variant: BTreeMap<String, GroupStats>,
    /// Success-rate change per non-baseline variant, percentage points
    pub success_rate_change: BTreeMap<String, f64>,
    /// Processing-time change per non-baseline variant, seconds
    pub processing_time_change: BTreeMap<String, f64>,
}

pub fn persona_breakdown(
    variants: &[String],
    records: &[SessionRecord],
    names: &BTreeMap<String, String>,
) -> Vec<PersonaBreakdown> {
    let persona_ids: BTreeSet<&str> = records.iter().map(|r| r.persona_id.as_str()).collect();

    persona_ids
        .into_iter()
        .map(|persona_id| {
            let per_variant: BTreeMap<String, GroupStats> = variants
                .iter()
                .map(|v| {
                    let stats = GroupStats::of(
                        records.iter().filter(|r| r.persona_id == persona_id && &r.variant == v),
                    );
                    (v.clone(), stats)
                })
                .collect();

            let mut success_rate_change = BTreeMap::new();
            let mut processing_time_change = BTreeMap::new();
            if let Some((baseline, rest)) = variants.split_first() {
                let base = &per_variant[baseline];
                for v in rest {
                    let stats = &per_variant[v];
                    success_rate_change.insert(v.clone(), round2(stats.success_rate - base.success_rate));
                    processing_time_change.insert(
                        v.clone(),
                        round2(stats.avg_processing_time - base.avg_processing_time),
                    );
                }
            }

            PersonaBreakdown {
                persona_id: persona_id.to_string(),
                name: names.get(persona_id).cloned(),
                per_variant,
                success_rate_change,
                processing_time_change,
            }
        })
        .collect()
}

/// Personas with the largest and smallest success-rate change for one variant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonaRanking {
    pub variant: String,
    pub most_improved: Vec<RankedPersona>,
    pub most_regressed: Vec<RankedPersona>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPersona {
    pub persona_id: String,
    pub success_rate_change: f64,
}

/// Rank personas by their success-rate change in `variant`
pub fn rank_personas(breakdown: &[PersonaBreakdown], variant: &str, n: usize) -> PersonaRanking {
    let mut ranked: Vec<RankedPersona> = breakdown
        .iter()
        .filter_map(|p| {
            p.success_rate_change.get(variant).map(|&change| RankedPersona {
                persona_id: p.persona_id.clone(),
                success_rate_change: change,
            })
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.success_rate_change
            .total_cmp(&a.success_rate_change)
            .then_with(|| a.persona_id.cmp(&b.persona_id))
    });

    let most_improved = ranked.iter().take(n).cloned().collect();
    let most_regressed = ranked.iter().rev().take(n).cloned().collect();
    PersonaRanking {
        variant: variant.to_string(),
        most_improved,
        most_regressed,
    }
}

/// Results grouped by one persona attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemographicBreakdown {
    pub dimension: String,
    /// attribute value -> variant -> stats
    pub groups: BTreeMap<String, BTreeMap<String, GroupStats>>,
}

/// Break results down by each attribute in `dimensions`.
///
/// Personas without the attribute are left out of that dimension; a dimension
/// no persona carries is omitted.
pub fn demographic_breakdown(
    dimensions: &[String],
    variants: &[String],
    personas: &[Persona],
    records: &[SessionRecord],
) -> Vec<DemographicBreakdown> {
    dimensions
        .iter()
        .filter_map(|dimension| {
            let values: BTreeMap<&str, String> = personas
                .iter()
                .filter_map(|p| p.attribute(dimension).map(|v| (p.persona_id.as_str(), v)))
                .collect();
            if values.is_empty() {
                return None;
            }

            let distinct: BTreeSet<&String> = values.values().collect();
            let groups: BTreeMap<String, BTreeMap<String, GroupStats>> = distinct
                .into_iter()
                .map(|value| {
                    let per_variant: BTreeMap<String, GroupStats> = variants
                        .iter()
                        .map(|v| {
                            let stats = GroupStats::of(records.iter().filter(|r| {
                                &r.variant == v
                                    && values.get(r.persona_id.as_str()) == Some(value)
                            }));
                            (v.clone(), stats)
                        })
                        .collect();
                    (value.clone(), per_variant)
                })
                .collect();

            Some(DemographicBreakdown {
                dimension: dimension.clone(),
                groups,
            })
        })
        .collect()
}

/// Per-variant metrics as rendered in reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSummary {
    pub summary: MetricsSummary,
    pub outcome_distribution: BTreeMap<String, u32>,
}

impl From<&VariantMetrics> for VariantSummary {
    fn from(metrics: &VariantMetrics) -> Self {
        Self {
            summary: metrics.summary(),
            outcome_distribution: metrics.outcome_counts().clone(),
        }
    }
}

/// Analysis of a run rebuilt from its persisted session logs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub sessions: usize,
    /// Log files that could not be read
    pub skipped_logs: usize,
    pub variants: Vec<VariantSummary>,
    pub comparisons: Vec<VariantComparison>,
    pub experience_groups: Vec<ExperienceGroup>,
    pub persona_breakdown: Vec<PersonaBreakdown>,
}

/// Rebuild metrics for a run from its session logs.
///
/// Variants are ordered by label. Unreadable logs are skipped with a warning.
pub fn summarize_run(run: &RunDirectory) -> SuiteResult<RunSummary> {
    let paths = run.list_session_logs().map_err(|source| SuiteError::Io {
        path: run.dir.clone(),
        source,
    })?;

    let mut logs = Vec::with_capacity(paths.len());
    let mut skipped_logs = 0;
    for path in &paths {
        match SessionLog::read(path) {
            Ok(log) => logs.push(log),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable session log");
                skipped_logs += 1;
            }
        }
    }

    let summary = summarize_logs(&run.id, &logs, skipped_logs);
    info!(run_id = %run.id, sessions = summary.sessions, skipped = skipped_logs, "Summarized run");
    Ok(summary)
}

/// Metrics, comparisons and groups for a set of session logs
pub fn summarize_logs(run_id: &str, logs: &[SessionLog], skipped_logs: usize) -> RunSummary {
    let mut metrics: BTreeMap<&str, VariantMetrics> = BTreeMap::new();
    for log in logs {
        metrics
            .entry(log.variant.as_str())
            .or_insert_with(|| VariantMetrics::new(log.variant.clone()))
            .add_session_log(log);
    }

    let variant_labels: Vec<String> = metrics.keys().map(|k| k.to_string()).collect();
    let variants: Vec<VariantSummary> = metrics.values().map(VariantSummary::from).collect();
    let summaries: Vec<MetricsSummary> = variants.iter().map(|v| v.summary.clone()).collect();
    let records: Vec<SessionRecord> = logs.iter().map(SessionRecord::from).collect();

    RunSummary {
        run_id: run_id.to_string(),
        sessions: logs.len(),
        skipped_logs,
        comparisons: compare_all(&summaries),
        experience_groups: experience_groups(&variant_labels, &records),
        persona_breakdown: persona_breakdown(&variant_labels, &records, &BTreeMap::new()),
        variants,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(variant: &str, persona: &str, success: bool, steps: u32) -> SessionRecord {
        SessionRecord {
            variant: variant.into(),
            persona_id: persona.into(),
            success,
            steps,
            hesitation: steps,
            processing_time: steps as f64,
        }
    }

    fn labels() -> Vec<String> {
        vec!["A".into(), "B".into()]
    }

    #[test]
    fn test_group_stats_empty_is_zeroed() {
        assert_eq!(GroupStats::of(Vec::<SessionRecord>::new().iter()), GroupStats::default());
    }

    #[test]
    fn test_experience_groups_cover_every_session() {
        let records = vec![
            record("A", "p1", true, 2),
            record("A", "p2", false, 5),
            record("B", "p1", true, 1),
            record("B", "p2", true, 3),
        ];
        let groups = experience_groups(&labels(), &records);
        assert_eq!(groups.len(), 4);
        assert_eq!(groups.iter().map(|g| g.count).sum::<u32>(), 4);

        let b_success = groups.iter().find(|g| g.variant == "B" && g.success).unwrap();
        assert_eq!(b_success.count, 2);
        assert_eq!(b_success.percentage, 50.0);
        assert_eq!(b_success.avg_steps, 2.0);
        assert_eq!(b_success.personas, vec!["p1", "p2"]);

        let b_failure = groups.iter().find(|g| g.variant == "B" && !g.success).unwrap();
        assert_eq!(b_failure.count, 0);
        assert!(b_failure.personas.is_empty());
    }

    #[test]
    fn test_persona_breakdown_and_ranking() {
        let records = vec![
            record("A", "p1", false, 5),
            record("B", "p1", true, 2),
            record("A", "p2", true, 2),
            record("B", "p2", false, 5),
            record("A", "p3", true, 1),
            record("B", "p3", true, 1),
        ];
        let names = BTreeMap::from([("p1".to_string(), "Ana".to_string())]);
        let breakdown = persona_breakdown(&labels(), &records, &names);
        assert_eq!(breakdown.len(), 3);
        assert_eq!(breakdown[0].name.as_deref(), Some("Ana"));
        assert_eq!(breakdown[0].success_rate_change["B"], 100.0);
        assert_eq!(breakdown[0].processing_time_change["B"], -3.0);
        assert_eq!(breakdown[1].success_rate_change["B"], -100.0);

        let ranking = rank_personas(&breakdown, "B", 2);
        let improved: Vec<&str> = ranking.most_improved.iter().map(|r| r.persona_id.as_str()).collect();
        let regressed: Vec<&str> = ranking.most_regressed.iter().map(|r| r.persona_id.as_str()).collect();
        assert_eq!(improved, vec!["p1", "p3"]);
        assert_eq!(regressed, vec!["p2", "p3"]);
    }

    #[test]
    fn test_demographic_breakdown_skips_missing_dimensions() {
        let personas = vec![
            Persona::new("p1", "Ana").with_attribute("gender", "female"),
            Persona::new("p2", "Ben").with_attribute("gender", "male"),
        ];
        let records = vec![
            record("A", "p1", true, 1),
            record("A", "p2", false, 3),
            record("B", "p2", true, 2),
        ];
        let dims = vec!["gender".to_string(), "age_group".to_string()];
        let breakdown = demographic_breakdown(&dims, &labels(), &personas, &records);
        assert_eq!(breakdown.len(), 1);
        let male = &breakdown[0].groups["male"];
        assert_eq!(male["A"].success_rate, 0.0);
        assert_eq!(male["B"].success_rate, 100.0);
        assert_eq!(breakdown[0].groups["female"]["B"].sessions, 0);
    }

    #[test]
    fn test_compare_all_uses_first_as_baseline() {
        let mut a = VariantMetrics::new("A");
        let mut b = VariantMetrics::new("B");
        let result = |variant: &str, success: bool| SessionResult {
            session_id: "s".into(),
            persona_id: "p".into(),
            variant: variant.into(),
            success,
            outcome: if success {
                crate::outcome::OutcomeKind::Converted
            } else {
                crate::outcome::OutcomeKind::AbandonedByAgent
            },
            steps_taken: 2,
            total_hesitation: 0,
            total_processing_time: 1.0,
            abandonment_reasoning: None,
        };
        a.add_session_result(&result("A", false));
        a.add_session_result(&result("A", true));
        b.add_session_result(&result("B", true));

        let comparisons = compare_all(&[a.summary(), b.summary()]);
        assert_eq!(comparisons.len(), 1);
        assert_eq!(comparisons[0].baseline, "A");
        assert_eq!(comparisons[0].success_rate_change, 50.0);
        assert!(compare_all(&[]).is_empty());
    }
}
