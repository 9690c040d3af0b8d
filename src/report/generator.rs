//! Markdown report generation.
//!
//! This module renders a project's run results, findings and synthesized
//! patterns as a Markdown or JSON report.

use crate::analysis::aggregator::{group_by_entity, tag_distribution, top_findings};
use crate::models::{
    Entity, Finding, FindingSummary, Pattern, PatternKind, ProjectRunSummary, Report,
    ReportMetadata, RunSummary, Severity,
};
use anyhow::Result;
use uuid::Uuid;

/// Findings listed in the "Top Findings" table.
const TOP_FINDINGS: usize = 10;

/// Tags listed in the summary.
const TOP_TAGS: usize = 10;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str(&format!("# Valkyrie Report: {}\n\n", report.metadata.project_name));

    output.push_str(&generate_metadata_section(&report.metadata, report.run.as_ref()));

    if let Some(ref run) = report.run {
        output.push_str(&generate_run_section(run));
    }

    output.push_str(&generate_summary_section(&report.summary, &report.findings));

    output.push_str(&generate_findings_section(&report.entities, &report.findings));

    output.push_str(&generate_patterns_section(
        &report.entities,
        &report.patterns,
        report.analysis_error.as_deref(),
    ));

    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata, run: Option<&ProjectRunSummary>) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Project:** {} (`{}`)\n", metadata.project_name, metadata.project_id));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(ref model) = metadata.model_used {
        section.push_str(&format!("- **Model Used:** `{}`\n", model));
    }
    section.push_str(&format!("- **Entities:** {}\n", metadata.entities));
    section.push_str(&format!("- **Total Findings:** {}\n", metadata.total_findings));

    if let Some(run) = run {
        section.push_str(&format!(
            "- **Run Started:** {}\n",
            run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        section.push_str(&format!("- **Findings Created:** {}\n", run.findings_created()));
        if run.cancelled {
            section.push_str("- **Run Cancelled:** yes\n");
        }
    }

    section.push_str(&format!("- **Duration:** {:.1}s\n\n", metadata.duration_seconds));

    section
}

/// Generate the per-entity run results section.
fn generate_run_section(run: &ProjectRunSummary) -> String {
    let mut section = String::new();

    section.push_str("## Run Results\n\n");
    section.push_str(&format!(
        "| ✅ Success | ❌ Failure | ⏱️ Timeout | ⏭️ Skipped | **Total** |\n\
         |:---:|:---:|:---:|:---:|:---:|\n\
         | {} | {} | {} | {} | **{}** |\n\n",
        run.totals.success,
        run.totals.failure,
        run.totals.timeout,
        run.totals.skipped,
        run.totals.total()
    ));

    if run.entities.is_empty() {
        section.push_str("No live entities in this project.\n\n");
        return section;
    }

    for entity in &run.entities {
        section.push_str(&generate_entity_run_block(entity));
    }

    section
}

fn generate_entity_run_block(summary: &RunSummary) -> String {
    let mut block = String::new();

    block.push_str(&format!(
        "### {}: {}\n\n",
        summary.entity_type, summary.entity_value
    ));

    if summary.results.is_empty() {
        block.push_str("*No tools are registered for this entity type.*\n\n");
        return block;
    }

    block.push_str("| Tool | Outcome | Duration | Attempts | Detail |\n");
    block.push_str("|:---|:---:|---:|:---:|:---|\n");
    for result in &summary.results {
        block.push_str(&format!(
            "| {} | {} {} | {} ms | {} | {} |\n",
            result.tool_name,
            result.outcome.emoji(),
            result.outcome,
            result.duration_ms,
            result.attempts,
            escape_cell(result.error_detail.as_deref().unwrap_or(""))
        ));
    }
    block.push('\n');

    block
}

/// Generate the finding summary section.
fn generate_summary_section(summary: &FindingSummary, findings: &[Finding]) -> String {
    let mut section = String::new();

    section.push_str("## Findings Summary\n\n");

    // Severity breakdown
    section.push_str(&format!(
        "| {} Critical | {} High | {} Medium | {} Low | {} Info | **Total** |\n",
        Severity::Critical.emoji(),
        Severity::High.emoji(),
        Severity::Medium.emoji(),
        Severity::Low.emoji(),
        Severity::Info.emoji(),
    ));
    section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} | **{}** |\n\n",
        summary.critical, summary.high, summary.medium, summary.low, summary.info, summary.total
    ));

    if !summary.by_tool.is_empty() {
        section.push_str("### Findings by Tool\n\n");
        section.push_str("| Tool | Findings |\n");
        section.push_str("|:---|:---:|\n");

        let mut tools: Vec<_> = summary.by_tool.iter().collect();
        tools.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        for (tool, count) in tools {
            section.push_str(&format!("| {} | {} |\n", tool, count));
        }
        section.push('\n');
    }

    let tags = tag_distribution(findings);
    if !tags.is_empty() {
        section.push_str("### Top Tags\n\n");
        let line: Vec<String> = tags
            .iter()
            .take(TOP_TAGS)
            .map(|(tag, count)| format!("`{}` ({})", tag, count))
            .collect();
        section.push_str(&line.join(", "));
        section.push_str("\n\n");
    }

    section
}

/// Generate the findings section: the most severe overall, then per entity.
fn generate_findings_section(entities: &[Entity], findings: &[Finding]) -> String {
    let mut section = String::new();

    section.push_str("## Findings\n\n");

    if findings.is_empty() {
        section.push_str("No findings recorded yet.\n\n");
        return section;
    }

    let describe = |id: Uuid| {
        entities
            .iter()
            .find(|e| e.id == id)
            .map(Entity::describe)
            .unwrap_or_else(|| id.to_string())
    };

    section.push_str("### Top Findings\n\n");
    section.push_str("| Severity | Entity | Tool | Summary |\n");
    section.push_str("|:---|:---|:---|:---|\n");
    for finding in top_findings(findings, TOP_FINDINGS) {
        section.push_str(&format!(
            "| {} {} | {} | {} | {} |\n",
            finding.severity.emoji(),
            finding.severity,
            describe(finding.entity_id),
            finding.tool_name,
            escape_cell(&finding.summary)
        ));
    }
    section.push('\n');

    let grouped = group_by_entity(findings);
    for entity in entities {
        let Some(entity_findings) = grouped.get(&entity.id) else {
            continue;
        };

        section.push_str(&format!("### {}\n\n", entity.describe()));
        for finding in entity_findings {
            section.push_str(&format!(
                "- {} **{}** ({}): {}\n",
                finding.severity.emoji(),
                finding.tool_name,
                finding.created_at.format("%Y-%m-%d %H:%M"),
                finding.summary
            ));
        }
        section.push('\n');
    }

    section
}

/// Generate the synthesized patterns section.
fn generate_patterns_section(
    entities: &[Entity],
    patterns: &[Pattern],
    analysis_error: Option<&str>,
) -> String {
    let mut section = String::new();

    section.push_str("## Patterns\n\n");

    if let Some(error) = analysis_error {
        section.push_str(&format!("> ⚠️ **Analysis failed:** {}\n\n", error));
    }

    if patterns.is_empty() {
        section.push_str("No patterns synthesized.\n\n");
        return section;
    }

    if let Some(risk) = patterns.iter().find(|p| p.kind == PatternKind::RiskScore) {
        let severity = Severity::parse(&risk.description).unwrap_or_default();
        section.push_str(&format!(
            "**Overall risk:** {} {} (confidence {:.2})\n\n",
            severity.emoji(),
            risk.description.to_uppercase(),
            risk.confidence
        ));
    }

    for pattern in patterns.iter().filter(|p| p.kind != PatternKind::RiskScore) {
        section.push_str(&format!("### {}\n\n", pattern.kind));
        section.push_str(&pattern.description);
        section.push_str("\n\n");

        let related: Vec<String> = entities
            .iter()
            .filter(|e| pattern.related_entity_ids.contains(&e.id))
            .map(|e| format!("`{}`", e.value))
            .collect();
        if !related.is_empty() {
            section.push_str(&format!(
                "*Related: {} | Confidence: {:.2}*\n\n",
                related.join(", "),
                pattern.confidence
            ));
        }
    }

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    format!(
        "---\n\n*Report generated by Valkyrie v{}*\n",
        env!("CARGO_PKG_VERSION")
    )
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, RunCounts, RunOutcome, RunResult};
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn create_test_report() -> Report {
        let project_id = Uuid::new_v4();
        let entity = Entity::new(project_id, EntityType::Domain, "example.com");
        let finding = Finding {
            id: Uuid::new_v4(),
            entity_id: entity.id,
            tool_name: "WHOIS".to_string(),
            tool_category: "network".to_string(),
            raw_data: json!({"registrar": "Example Registrar"}),
            summary: "WHOIS registrant found".to_string(),
            severity: Severity::Info,
            tags: ["whois".to_string()].into_iter().collect(),
            created_at: Utc::now(),
        };
        let results = vec![
            RunResult {
                entity_id: entity.id,
                tool_name: "WHOIS".to_string(),
                outcome: RunOutcome::Success,
                error_detail: None,
                duration_ms: 120,
                attempts: 1,
                finding_id: Some(finding.id),
            },
            RunResult {
                entity_id: entity.id,
                tool_name: "DomainRep".to_string(),
                outcome: RunOutcome::Timeout,
                error_detail: Some("tool timed out after 30s".to_string()),
                duration_ms: 30000,
                attempts: 1,
                finding_id: None,
            },
        ];
        let run_summary = RunSummary::from_results(&entity, results);
        let mut totals = RunCounts::default();
        totals.merge(&run_summary.counts);

        let patterns = vec![
            Pattern {
                id: Uuid::new_v4(),
                project_id,
                kind: PatternKind::RiskScore,
                description: "medium".to_string(),
                confidence: 0.5,
                related_entity_ids: BTreeSet::from([entity.id]),
                model: Some("mistral".to_string()),
                created_at: Utc::now(),
            },
            Pattern {
                id: Uuid::new_v4(),
                project_id,
                kind: PatternKind::Lead,
                description: "Check historical WHOIS for example.com".to_string(),
                confidence: 0.6,
                related_entity_ids: BTreeSet::from([entity.id]),
                model: Some("mistral".to_string()),
                created_at: Utc::now(),
            },
        ];

        Report {
            metadata: ReportMetadata {
                project_id,
                project_name: "Acme investigation".to_string(),
                generated_at: Utc::now(),
                model_used: Some("mistral".to_string()),
                entities: 1,
                total_findings: 1,
                duration_seconds: 30.2,
            },
            run: Some(ProjectRunSummary {
                project_id,
                started_at: Utc::now(),
                duration_ms: 30200,
                entities: vec![run_summary],
                totals,
                cancelled: false,
            }),
            summary: FindingSummary::from_findings(std::slice::from_ref(&finding)),
            findings: vec![finding],
            entities: vec![entity],
            patterns,
            analysis_error: None,
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report();
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("# Valkyrie Report: Acme investigation"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("## Run Results"));
        assert!(markdown.contains("## Findings Summary"));
        assert!(markdown.contains("## Patterns"));
        assert!(markdown.contains("### domain: example.com"));
        assert!(markdown.contains("WHOIS registrant found"));
        assert!(markdown.contains("**Overall risk:** 🟡 MEDIUM"));
        assert!(markdown.contains("Check historical WHOIS"));
    }

    #[test]
    fn test_run_results_keep_registration_order() {
        let report = create_test_report();
        let section = generate_run_section(report.run.as_ref().unwrap());

        let whois = section.find("| WHOIS |").unwrap();
        let rep = section.find("| DomainRep |").unwrap();
        assert!(whois < rep);
        assert!(section.contains("tool timed out after 30s"));
    }

    #[test]
    fn test_analysis_error_is_shown() {
        let section = generate_patterns_section(&[], &[], Some("reasoning service timed out after 600s"));
        assert!(section.contains("Analysis failed"));
        assert!(section.contains("No patterns synthesized."));
    }

    #[test]
    fn test_escape_cell() {
        assert_eq!(escape_cell("a|b\nc"), "a\\|b c");
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();

        assert!(json.contains("\"project_name\""));
        assert!(json.contains("\"findings\""));
        assert!(json.contains("\"patterns\""));
        assert!(json.contains("\"risk_score\""));
    }
}
