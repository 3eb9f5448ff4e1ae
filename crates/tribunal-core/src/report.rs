//! Markdown rendering of a finished audit.

use chrono::Utc;
use std::fmt::Write as _;

use crate::state::SharedState;
use crate::types::{EvaluatorRole, Opinion};

/// Criteria at or below this score get a remediation section.
pub const REMEDIATION_THRESHOLD: u8 = 3;

const EVIDENCE_EXCERPT_CHARS: usize = 200;
const DIALECTIC_EXCERPT_CHARS: usize = 200;

/// Render the full audit report.
pub fn render_markdown(state: &SharedState) -> String {
    let mut out = String::new();
    let rubric = &state.inputs.rubric;

    let generated = state.finished_at.unwrap_or_else(Utc::now);
    let elapsed = state
        .started_at
        .map(|start| (generated - start).num_milliseconds() as f64 / 1000.0);

    let _ = writeln!(out, "# Audit Report: {}\n", rubric.name());
    let _ = writeln!(out, "**Generated:** {}  ", generated.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(secs) = elapsed {
        let _ = writeln!(out, "**Execution Time:** {:.2} seconds  ", secs);
    }
    let _ = writeln!(out, "**Repository:** {}  ", state.inputs.repo_url);
    let _ = writeln!(out, "**Report Document:** {}\n", state.inputs.report_path.display());
    out.push_str("---\n\n## Executive Summary\n\n");
    if let Some(summary) = &state.synthesis_summary {
        let _ = writeln!(out, "{}\n", summary);
    }

    out.push_str("### Scores\n\n| Criterion | Name | Score |\n|-----------|------|-------|\n");
    let mut total = 0u32;
    for (criterion_id, score) in ordered_scores(state) {
        let name = rubric
            .dimension(&criterion_id)
            .map(|d| d.name.as_str())
            .unwrap_or("-");
        let _ = writeln!(out, "| {} | {} | {}/5 |", criterion_id, name, score);
        total += u32::from(score);
    }
    let max = state.final_scores.len() as u32 * 5;
    if max > 0 {
        let _ = writeln!(
            out,
            "\n**Total:** {}/{} ({:.1}%)\n",
            total,
            max,
            f64::from(total) / f64::from(max) * 100.0
        );
    }

    if !state.errors.is_empty() {
        out.push_str("### Degraded Nodes\n\n");
        for error in &state.errors {
            let _ = writeln!(out, "- {}", error);
        }
        out.push('\n');
    }

    out.push_str("---\n\n## Evidence\n\n");
    for (producer, items) in &state.evidences {
        let _ = writeln!(out, "### {}\n", producer);
        for evidence in items {
            let status = if evidence.found { "Found" } else { "Not Found" };
            let _ = writeln!(out, "**{}** - {}", status, evidence.location);
            let _ = writeln!(out, "- **Confidence:** {:.2}", evidence.confidence);
            if let Some(content) = &evidence.content {
                let _ = writeln!(out, "- **Content:** {}", excerpt(content, EVIDENCE_EXCERPT_CHARS));
            }
            out.push('\n');
        }
    }

    out.push_str("---\n\n## Evaluator Opinions\n\n");
    for (criterion_id, score) in ordered_scores(state) {
        let _ = writeln!(out, "### {}\n", criterion_id);
        for opinion in state.opinions_for(&criterion_id) {
            let _ = writeln!(out, "#### {}\n", opinion.evaluator);
            let _ = writeln!(out, "**Score:** {}/5\n", opinion.score);
            let _ = writeln!(out, "**Argument:**\n{}\n", opinion.argument);
            out.push_str("**Cited Evidence:**\n");
            for citation in &opinion.cited_evidence {
                let _ = writeln!(out, "- {}", citation);
            }
            out.push('\n');
        }
        let _ = writeln!(out, "**Final Verdict:** {}/5\n\n---\n", score);
    }

    out.push_str("## Remediation Plan\n\n");
    out.push_str(&render_remediation(state));
    out.push_str("\n---\n\n## Appendix: Disagreements\n\n");
    out.push_str(&render_dialectics(state));

    out
}

fn render_remediation(state: &SharedState) -> String {
    let mut low: Vec<(String, u8)> = ordered_scores(state)
        .into_iter()
        .filter(|(_, score)| *score <= REMEDIATION_THRESHOLD)
        .collect();

    if low.is_empty() {
        return "All criteria met expectations. No immediate remediation required.\n".to_string();
    }

    low.sort_by_key(|(_, score)| *score);
    let mut out = String::from("### Priority Issues\n\n");
    for (criterion_id, score) in low {
        let _ = writeln!(out, "#### {} (Score: {}/5)\n", criterion_id, score);
        let opinions: Vec<&Opinion> = state.opinions_for(&criterion_id).collect();
        if let Some(critic) = find(&opinions, EvaluatorRole::Critic) {
            let _ = writeln!(out, "**Critical Issues:**\n{}\n", critic.argument);
        }
        if let Some(pragmatist) = find(&opinions, EvaluatorRole::Pragmatist) {
            let _ = writeln!(out, "**Technical Recommendations:**\n{}\n", pragmatist.argument);
        }
    }
    out
}

fn render_dialectics(state: &SharedState) -> String {
    let mut out = String::new();
    for (criterion_id, _) in ordered_scores(state) {
        let opinions: Vec<&Opinion> = state.opinions_for(&criterion_id).collect();
        let spread = match (
            opinions.iter().map(|o| o.score).max(),
            opinions.iter().map(|o| o.score).min(),
        ) {
            (Some(high), Some(low)) => high - low,
            _ => continue,
        };
        if spread <= 1 {
            continue;
        }

        let _ = writeln!(out, "### {}\n\n**Score spread:** {}\n", criterion_id, spread);
        if let (Some(critic), Some(advocate)) = (
            find(&opinions, EvaluatorRole::Critic),
            find(&opinions, EvaluatorRole::Advocate),
        ) {
            let _ = writeln!(
                out,
                "**Critic ({}):** {}\n\n**Advocate ({}):** {}\n",
                critic.score,
                excerpt(&critic.argument, DIALECTIC_EXCERPT_CHARS),
                advocate.score,
                excerpt(&advocate.argument, DIALECTIC_EXCERPT_CHARS)
            );
        }
    }
    if out.is_empty() {
        out.push_str("Evaluators broadly agreed on every criterion.\n");
    }
    out
}

/// Scores in rubric order, followed by any criterion outside the rubric.
fn ordered_scores(state: &SharedState) -> Vec<(String, u8)> {
    let rubric = &state.inputs.rubric;
    let mut ordered: Vec<(String, u8)> = rubric
        .dimensions
        .iter()
        .filter_map(|d| state.final_scores.get(&d.id).map(|s| (d.id.clone(), *s)))
        .collect();
    for (id, score) in &state.final_scores {
        if rubric.dimension(id).is_none() {
            ordered.push((id.clone(), *score));
        }
    }
    ordered
}

fn find<'a>(opinions: &[&'a Opinion], role: EvaluatorRole) -> Option<&'a Opinion> {
    opinions.iter().copied().find(|o| o.evaluator == role)
}

fn excerpt(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let cut: String = text.chars().take(limit).collect();
        format!("{}...", cut)
    }
}
