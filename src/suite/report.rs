//! The suite report written to `report.json` at the end of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::metrics::VariantMetrics;
use crate::persona::Persona;
use crate::session::SessionResult;
use crate::suite::analysis::{
    DemographicBreakdown, ExperienceGroup, PersonaBreakdown, PersonaRanking, RANKING_SIZE,
    SessionRecord, VariantComparison, VariantSummary, compare_all, demographic_breakdown,
    experience_groups, persona_breakdown, rank_personas,
};
use crate::suite::SuiteConfig;

/// Sessions of one variant, in run order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRun {
    pub label: String,
    pub name: String,
    pub results: Vec<SessionResult>,
}

/// What was run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOverview {
    pub name: String,
    pub total_personas: usize,
    pub iterations_per_persona: u32,
    pub max_steps: u32,
    pub total_sessions: usize,
    pub personas: Vec<String>,
    pub variants: Vec<String>,
}

/// One variant's section of the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantReport {
    pub label: String,
    pub name: String,
    #[serde(flatten)]
    pub metrics: VariantSummary,
    pub sessions: Vec<SessionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub overview: RunOverview,
    pub variants: Vec<VariantReport>,
    pub comparisons: Vec<VariantComparison>,
    pub persona_breakdown: Vec<PersonaBreakdown>,
    pub persona_rankings: Vec<PersonaRanking>,
    pub experience_groups: Vec<ExperienceGroup>,
    pub demographics: Vec<DemographicBreakdown>,
}

impl SuiteReport {
    /// Assemble the report from finished variant batches
    pub fn build(run_id: &str, config: &SuiteConfig, personas: &[Persona], runs: &[VariantRun]) -> Self {
        let labels: Vec<String> = runs.iter().map(|r| r.label.clone()).collect();
        let records: Vec<SessionRecord> = runs
            .iter()
            .flat_map(|r| r.results.iter().map(SessionRecord::from))
            .collect();

        let variants: Vec<VariantReport> = runs
            .iter()
            .map(|run| {
                let mut metrics = VariantMetrics::new(run.label.clone());
                run.results.iter().for_each(|r| metrics.add_session_result(r));
                VariantReport {
                    label: run.label.clone(),
                    name: run.name.clone(),
                    metrics: VariantSummary::from(&metrics),
                    sessions: run.results.clone(),
                }
            })
            .collect();
        let summaries: Vec<_> = variants.iter().map(|v| v.metrics.summary.clone()).collect();

        let names: BTreeMap<String, String> = personas
            .iter()
            .map(|p| (p.persona_id.clone(), p.name.clone()))
            .collect();
        let breakdown = persona_breakdown(&labels, &records, &names);
        let persona_rankings = labels
            .iter()
            .skip(1)
            .map(|label| rank_personas(&breakdown, label, RANKING_SIZE))
            .collect();

        Self {
            run_id: run_id.to_string(),
            generated_at: Utc::now(),
            overview: RunOverview {
                name: config.name.clone(),
                total_personas: personas.len(),
                iterations_per_persona: config.iterations,
                max_steps: config.max_steps,
                total_sessions: records.len(),
                personas: personas.iter().map(|p| p.persona_id.clone()).collect(),
                variants: labels.clone(),
            },
            comparisons: compare_all(&summaries),
            experience_groups: experience_groups(&labels, &records),
            demographics: demographic_breakdown(&config.demographics, &labels, personas, &records),
            persona_breakdown: breakdown,
            persona_rankings,
            variants,
        }
    }

    /// Human-readable Markdown rendering
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Persona A/B Test Report: {}\n", self.overview.name);
        let _ = writeln!(out, "- **Run:** {}", self.run_id);
        let _ = writeln!(out, "- **Generated:** {}", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "- **Personas:** {}", self.overview.total_personas);
        let _ = writeln!(out, "- **Iterations per persona:** {}", self.overview.iterations_per_persona);
        let _ = writeln!(out, "- **Total sessions:** {}\n", self.overview.total_sessions);

        out.push_str("## Variants\n\n");
        out.push_str("| Variant | Sessions | Success % | Error % | Avg steps | Avg hesitation | Avg time (s) |\n");
        out.push_str("|---|---|---|---|---|---|---|\n");
        for v in &self.variants {
            let s = &v.metrics.summary;
            let _ = writeln!(
                out,
                "| {} ({}) | {} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} |",
                v.label,
                v.name,
                s.total_sessions,
                s.task_success_rate,
                s.error_rate,
                s.avg_session_length,
                s.avg_hesitation_steps,
                s.avg_processing_time
            );
        }
        out.push('\n');

        for v in &self.variants {
            let _ = writeln!(out, "### Outcomes: {}\n", v.label);
            for (outcome, count) in &v.metrics.outcome_distribution {
                let _ = writeln!(out, "- {outcome}: {count}");
            }
            out.push('\n');
        }

        if !self.comparisons.is_empty() {
            out.push_str("## Comparison\n\n");
            for c in &self.comparisons {
                let _ = writeln!(
                    out,
                    "- **{} vs {}:** success {:+.2} pts, steps {:+.2}, time {:+.2}s (to success {:+.2}s, to failure {:+.2}s)",
                    c.variant,
                    c.baseline,
                    c.success_rate_change,
                    c.session_length_change,
                    c.processing_time_change,
                    c.processing_time_to_success_change,
                    c.processing_time_to_failure_change
                );
            }
            out.push('\n');
        }

        out.push_str("## Experience Groups\n\n");
        for g in &self.experience_groups {
            let kind = if g.success { "success" } else { "failure" };
            let _ = writeln!(
                out,
                "- **{} {}:** {} sessions ({:.1}%), {:.2} steps, {:.2}s, {:.2} hesitation",
                g.variant, kind, g.count, g.percentage, g.avg_steps, g.avg_processing_time, g.avg_hesitation
            );
        }
        out.push('\n');

        for ranking in &self.persona_rankings {
            let _ = writeln!(out, "## Persona Ranking: {}\n", ranking.variant);
            let list = |ranked: &[crate::suite::analysis::RankedPersona]| {
                ranked
                    .iter()
                    .map(|r| format!("{} ({:+.2})", r.persona_id, r.success_rate_change))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let _ = writeln!(out, "- **Most improved:** {}", list(&ranking.most_improved));
            let _ = writeln!(out, "- **Most regressed:** {}\n", list(&ranking.most_regressed));
        }

        for d in &self.demographics {
            let _ = writeln!(out, "## Demographics: {}\n", d.dimension);
            for (value, per_variant) in &d.groups {
                let cells: Vec<String> = per_variant
                    .iter()
                    .map(|(variant, s)| {
                        format!("{variant}: {:.1}% success over {} sessions", s.success_rate, s.sessions)
                    })
                    .collect();
                let _ = writeln!(out, "- **{value}:** {}", cells.join("; "));
            }
            out.push('\n');
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::OutcomeKind;

    fn result(variant: &str, persona: &str, outcome: OutcomeKind) -> SessionResult {
        SessionResult {
            session_id: format!("session_{persona}_{variant}"),
            persona_id: persona.into(),
            variant: variant.into(),
            success: outcome.is_success(),
            outcome,
            steps_taken: 2,
            total_hesitation: 3,
            total_processing_time: 1.5,
            abandonment_reasoning: None,
        }
    }

    fn config() -> SuiteConfig {
        serde_json::from_str(
            r#"{"personas_dir": "p", "variants": [
                {"label": "A", "elements": "a.json"},
                {"label": "B", "elements": "b.json"}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_build_report() {
        let personas = vec![
            Persona::new("p1", "Ana").with_attribute("gender", "female"),
            Persona::new("p2", "Ben"),
        ];
        let runs = vec![
            VariantRun {
                label: "A".into(),
                name: "Control".into(),
                results: vec![
                    result("A", "p1", OutcomeKind::AbandonedByAgent),
                    result("A", "p2", OutcomeKind::Converted),
                ],
            },
            VariantRun {
                label: "B".into(),
                name: "Treatment".into(),
                results: vec![
                    result("B", "p1", OutcomeKind::Converted),
                    result("B", "p2", OutcomeKind::Converted),
                ],
            },
        ];

        let report = SuiteReport::build("run_1", &config(), &personas, &runs);
        assert_eq!(report.overview.total_sessions, 4);
        assert_eq!(report.variants[0].metrics.summary.task_success_rate, 50.0);
        assert_eq!(report.variants[1].metrics.summary.task_success_rate, 100.0);
        assert_eq!(report.comparisons[0].success_rate_change, 50.0);
        assert_eq!(report.experience_groups.len(), 4);
        assert_eq!(report.persona_rankings.len(), 1);
        assert_eq!(report.persona_rankings[0].most_improved[0].persona_id, "p1");
        assert_eq!(report.persona_breakdown[0].name.as_deref(), Some("Ana"));
        assert_eq!(report.demographics.len(), 1);
        assert_eq!(report.demographics[0].dimension, "gender");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["variants"][0]["outcome_distribution"]["abandoned_by_agent"], 1);
        assert_eq!(json["variants"][0]["summary"]["total_sessions"], 2);

        let markdown = report.to_markdown();
        assert!(markdown.contains("| A (Control) | 2 | 50.00 |"));
        assert!(markdown.contains("**B vs A:** success +50.00 pts"));
    }
}
