//! Corpus selection and prompt construction.
//!
//! A project's findings rarely fit a local model's context window, so the
//! corpus is cut down deterministically before prompting: findings are
//! ranked by severity (highest first), then by age (newest first), then by
//! id. Walking that ranking, a finding is kept unless its entity already
//! has `max_findings_per_entity` findings or would be one entity too many.
//! Selection stops at `max_findings`. The oldest, lowest-severity findings
//! are therefore the first to go.

use crate::config::AnalysisConfig;
use crate::models::{Entity, Finding};
use std::collections::HashMap;
use uuid::Uuid;

/// Budget for one prompt.
#[derive(Debug, Clone, Copy)]
pub struct CorpusLimits {
    pub max_findings: usize,
    pub max_findings_per_entity: usize,
    pub max_entities: usize,
    pub raw_snippet_chars: usize,
    pub max_links: usize,
}

impl From<&AnalysisConfig> for CorpusLimits {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            max_findings: config.max_findings,
            max_findings_per_entity: config.max_findings_per_entity,
            max_entities: config.max_entities,
            raw_snippet_chars: config.raw_snippet_chars,
            max_links: config.max_links,
        }
    }
}

impl Default for CorpusLimits {
    fn default() -> Self {
        Self::from(&AnalysisConfig::default())
    }
}

/// The part of a project's corpus that goes into the prompt.
#[derive(Debug)]
pub struct Corpus<'a> {
    /// Selected entities in project order, each with its selected findings
    /// in rank order.
    pub sections: Vec<(&'a Entity, Vec<&'a Finding>)>,
    pub total_entities: usize,
    pub total_findings: usize,
}

impl<'a> Corpus<'a> {
    pub fn entities(&self) -> impl Iterator<Item = &'a Entity> + '_ {
        self.sections.iter().map(|(e, _)| *e)
    }

    pub fn shown_findings(&self) -> usize {
        self.sections.iter().map(|(_, f)| f.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Rank findings: severity desc, created_at desc, id asc.
pub fn rank(findings: &[Finding]) -> Vec<&Finding> {
    let mut ranked: Vec<&Finding> = findings.iter().collect();
    ranked.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked
}

/// Pick the findings and entities that fit the budget.
pub fn select<'a>(entities: &'a [Entity], findings: &'a [Finding], limits: &CorpusLimits) -> Corpus<'a> {
    let known: HashMap<Uuid, usize> = entities.iter().enumerate().map(|(i, e)| (e.id, i)).collect();
    let mut per_entity: HashMap<Uuid, Vec<&'a Finding>> = HashMap::new();
    let mut kept = 0;

    for finding in rank(findings) {
        if kept == limits.max_findings {
            break;
        }
        if !known.contains_key(&finding.entity_id) {
            continue;
        }

        let admitted = per_entity.contains_key(&finding.entity_id);
        if !admitted && per_entity.len() == limits.max_entities {
            continue;
        }

        let slot = per_entity.entry(finding.entity_id).or_default();
        if slot.len() < limits.max_findings_per_entity {
            slot.push(finding);
            kept += 1;
        }
    }

    let mut sections: Vec<(&'a Entity, Vec<&'a Finding>)> = per_entity
        .into_iter()
        .filter(|(_, f)| !f.is_empty())
        .map(|(id, f)| (&entities[known[&id]], f))
        .collect();
    sections.sort_by_key(|(e, _)| known[&e.id]);

    Corpus {
        sections,
        total_entities: entities.len(),
        total_findings: findings.len(),
    }
}

/// Cut a raw payload down to a one-line snippet.
pub fn snippet(raw: &serde_json::Value, max_chars: usize) -> String {
    if raw.is_null() {
        return "N/A".to_string();
    }
    let text = serde_json::to_string(raw).unwrap_or_default();
    text.chars().take(max_chars).collect()
}

/// Build the analysis prompt.
pub fn build_prompt(corpus: &Corpus<'_>, limits: &CorpusLimits, links_section: &str) -> String {
    let targets: Vec<String> = corpus.entities().map(Entity::describe).collect();
    let mut targets = if targets.is_empty() {
        "multiple targets".to_string()
    } else {
        targets.join(", ")
    };
    if corpus.total_entities > corpus.sections.len() {
        targets.push_str(&format!(
            " (+ {} more entities not shown)",
            corpus.total_entities - corpus.sections.len()
        ));
    }

    let scope = if corpus.total_findings > corpus.shown_findings() {
        format!(
            "(Showing the {} most severe of {} findings)",
            corpus.shown_findings(),
            corpus.total_findings
        )
    } else {
        format!("({} findings)", corpus.total_findings)
    };

    let mut prompt = String::new();
    prompt.push_str(&format!(
        "You are a senior OSINT analyst. Analyze the findings below for targets [{}]. {}\n\n",
        targets, scope
    ));
    prompt.push_str(
        "Look for patterns, risks, connections between targets and threat indicators. \
         Pay attention to data shared across tools or targets, such as the same email in \
         WHOIS and breach data or the same hosting provider.\n\n",
    );
    prompt.push_str("Respond with ONLY a JSON object with exactly these keys:\n");
    prompt.push_str(RESPONSE_SHAPE);
    prompt.push_str("\nBe specific and reference actual values from the data. Do not invent data.\n\n");

    prompt.push_str("=== INTELLIGENCE DATA ===\n\n");
    for (entity, findings) in &corpus.sections {
        prompt.push_str(&format!(
            "Entity: {} = {} (label: {})\n",
            entity.entity_type,
            entity.value,
            entity.label.as_deref().unwrap_or("N/A")
        ));
        for finding in findings {
            prompt.push_str(&format!(
                "  - Tool: {} | Severity: {}\n    Summary: {}\n    Data: {}\n",
                finding.tool_name,
                finding.severity,
                finding.summary,
                snippet(&finding.raw_data, limits.raw_snippet_chars)
            ));
        }
        prompt.push('\n');
    }
    prompt.push_str("=== END DATA ===\n");

    if !links_section.is_empty() {
        prompt.push_str("\n=== CONNECTIONS WITHIN THIS INVESTIGATION ===\n");
        prompt.push_str(links_section);
        prompt.push_str("=== END CONNECTIONS ===\n");
    }

    prompt.push_str("\nRespond with ONLY the JSON object. No markdown, no explanation.");
    prompt
}

const RESPONSE_SHAPE: &str = r#"{
  "risk_score": "low" | "medium" | "high" | "critical",
  "summary": "paragraph summarizing the findings and how the targets connect",
  "relationships": "specific connections between targets",
  "anomalies": "suspicious patterns, inconsistencies or red flags",
  "leads": "next investigation steps",
  "recommendations": "actionable security or investigative recommendations"
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, Severity};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn finding(entity: &Entity, severity: Severity, age_minutes: i64) -> Finding {
        Finding {
            id: Uuid::new_v4(),
            entity_id: entity.id,
            tool_name: format!("{}-{}", severity, age_minutes),
            tool_category: "test".to_string(),
            raw_data: json!({"age": age_minutes}),
            summary: "s".to_string(),
            severity,
            tags: BTreeSet::new(),
            created_at: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    fn limits(max_findings: usize, per_entity: usize, max_entities: usize) -> CorpusLimits {
        CorpusLimits {
            max_findings,
            max_findings_per_entity: per_entity,
            max_entities,
            ..CorpusLimits::default()
        }
    }

    #[test]
    fn test_rank_orders_by_severity_then_recency() {
        let e = Entity::new(Uuid::new_v4(), EntityType::Domain, "example.com");
        let findings = vec![
            finding(&e, Severity::Info, 1),
            finding(&e, Severity::High, 30),
            finding(&e, Severity::High, 5),
        ];

        let ranked: Vec<_> = rank(&findings).iter().map(|f| f.tool_name.clone()).collect();
        assert_eq!(ranked, vec!["High-5", "High-30", "Info-1"]);
    }

    #[test]
    fn test_select_drops_oldest_lowest_first() {
        let e = Entity::new(Uuid::new_v4(), EntityType::Domain, "example.com");
        let findings = vec![
            finding(&e, Severity::Low, 100),
            finding(&e, Severity::Low, 1),
            finding(&e, Severity::Critical, 500),
        ];

        let corpus = select(std::slice::from_ref(&e), &findings, &limits(2, 5, 8));
        let kept: Vec<_> = corpus.sections[0].1.iter().map(|f| f.tool_name.as_str()).collect();
        assert_eq!(kept, vec!["Critical-500", "Low-1"]);
        assert_eq!(corpus.shown_findings(), 2);
        assert_eq!(corpus.total_findings, 3);
    }

    #[test]
    fn test_select_respects_entity_caps() {
        let project = Uuid::new_v4();
        let entities: Vec<Entity> = (0..4)
            .map(|i| Entity::new(project, EntityType::Username, format!("user{}", i)))
            .collect();
        let mut findings = Vec::new();
        for (i, e) in entities.iter().enumerate() {
            for age in 0..3 {
                let severity = if i == 3 { Severity::Critical } else { Severity::Info };
                findings.push(finding(e, severity, age));
            }
        }

        let corpus = select(&entities, &findings, &limits(15, 2, 2));
        let values: Vec<_> = corpus.entities().map(|e| e.value.as_str()).collect();
        // user3 wins on severity; one info-only entity fills the second slot.
        assert_eq!(corpus.sections.len(), 2);
        assert!(values.contains(&"user3"));
        assert!(corpus.sections.iter().all(|(_, f)| f.len() == 2));
        // Project order is preserved in the output.
        assert_eq!(corpus.sections.last().map(|(e, _)| e.value.as_str()), Some("user3"));
    }

    #[test]
    fn test_select_is_deterministic() {
        let e = Entity::new(Uuid::new_v4(), EntityType::Ip, "8.8.8.8");
        let findings: Vec<Finding> = (0..10).map(|i| finding(&e, Severity::Medium, i % 3)).collect();

        let a: Vec<Uuid> = select(std::slice::from_ref(&e), &findings, &limits(4, 4, 1)).sections[0]
            .1
            .iter()
            .map(|f| f.id)
            .collect();
        let mut reversed = findings.clone();
        reversed.reverse();
        let b: Vec<Uuid> = select(std::slice::from_ref(&e), &reversed, &limits(4, 4, 1)).sections[0]
            .1
            .iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_snippet_truncates() {
        let raw = json!({"data": "x".repeat(500)});
        assert_eq!(snippet(&raw, 150).chars().count(), 150);
        assert_eq!(snippet(&serde_json::Value::Null, 150), "N/A");
    }

    #[test]
    fn test_prompt_contents() {
        let e = Entity::new(Uuid::new_v4(), EntityType::Email, "alice@acme.com");
        let findings = vec![finding(&e, Severity::High, 1)];
        let lim = CorpusLimits::default();
        let corpus = select(std::slice::from_ref(&e), &findings, &lim);

        let prompt = build_prompt(&corpus, &lim, "Found 1 connection(s)\n");
        assert!(prompt.contains("[email: alice@acme.com]"));
        assert!(prompt.contains("Tool: High-1 | Severity: High"));
        assert!(prompt.contains("\"risk_score\""));
        assert!(prompt.contains("=== CONNECTIONS WITHIN THIS INVESTIGATION ==="));

        let prompt = build_prompt(&corpus, &lim, "");
        assert!(!prompt.contains("CONNECTIONS"));
    }
}
