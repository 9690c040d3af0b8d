//! Pattern synthesis across a project's findings.

use super::corpus::{build_prompt, select, CorpusLimits};
use super::links::{find_links, render_links};
use crate::config::{AnalysisConfig, PatternPolicy};
use crate::error::AnalysisError;
use crate::llm::ReasoningService;
use crate::models::{Entity, Pattern, PatternKind};
use crate::store::Store;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Confidence given to every non-risk pattern.
const DEFAULT_CONFIDENCE: f64 = 0.6;

/// Response keys and the pattern kind each one produces.
const FIELDS: &[(&str, PatternKind)] = &[
    ("summary", PatternKind::Summary),
    ("relationships", PatternKind::Relationship),
    ("anomalies", PatternKind::Anomaly),
    ("leads", PatternKind::Lead),
    ("recommendations", PatternKind::Recommendation),
];

/// Reads a project's findings, asks the reasoning service for patterns
/// and stores them.
pub struct PatternAnalyzer {
    store: Arc<dyn Store>,
    reasoning: Arc<dyn ReasoningService>,
    limits: CorpusLimits,
    policy: PatternPolicy,
}

impl PatternAnalyzer {
    pub fn new(
        store: Arc<dyn Store>,
        reasoning: Arc<dyn ReasoningService>,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            store,
            reasoning,
            limits: CorpusLimits::from(config),
            policy: config.pattern_policy,
        }
    }

    /// Synthesize and persist patterns for a project.
    ///
    /// A project without findings yields no patterns and the reasoning
    /// service is not called. Nothing is persisted unless the response
    /// parses.
    pub async fn analyze(&self, project_id: Uuid) -> Result<Vec<Pattern>, AnalysisError> {
        let project = self.store.get_project(project_id).await?;
        let entities = self.store.list_entities(project_id, true).await?;
        let findings = self.store.list_findings(project_id).await?;

        if findings.is_empty() {
            info!("Project '{}' has no findings; nothing to analyze", project.name);
            return Ok(Vec::new());
        }

        let corpus = select(&entities, &findings, &self.limits);
        if corpus.is_empty() {
            info!(
                "No findings of project '{}' fit the analysis limits; nothing to analyze",
                project.name
            );
            return Ok(Vec::new());
        }

        let links = find_links(&entities, &findings, self.limits.max_links);
        let prompt = build_prompt(&corpus, &self.limits, &render_links(&entities, &links));

        info!(
            "Analyzing project '{}': {} of {} findings, {} links, model {}",
            project.name,
            corpus.shown_findings(),
            findings.len(),
            links.len(),
            self.reasoning.model()
        );
        debug!("Prompt is {} chars", prompt.len());

        let response = self.reasoning.complete(&prompt).await?;
        let prompt_entities: Vec<&Entity> = corpus.entities().collect();
        let patterns = parse_response(
            &response,
            project_id,
            &prompt_entities,
            Some(self.reasoning.model()),
        )
        .map_err(|e| {
            warn!("Discarding analysis response: {}", e);
            e
        })?;

        match self.policy {
            PatternPolicy::Replace => {
                self.store
                    .replace_patterns(project_id, patterns.clone())
                    .await?;
            }
            PatternPolicy::Append => {
                self.store.append_patterns(patterns.clone()).await?;
            }
        }

        info!("Stored {} patterns for project '{}'", patterns.len(), project.name);
        Ok(patterns)
    }
}

/// Turn a model response into patterns.
///
/// Markdown fences and chatter around the JSON object are tolerated. A
/// response without a JSON object is an error.
pub fn parse_response(
    response: &str,
    project_id: Uuid,
    entities: &[&Entity],
    model: Option<&str>,
) -> Result<Vec<Pattern>, AnalysisError> {
    let object = extract_object(response)?;
    let created_at = Utc::now();
    let mut patterns = Vec::new();

    let mut push = |kind: PatternKind, description: String, confidence: f64| {
        patterns.push(Pattern {
            id: Uuid::new_v4(),
            project_id,
            kind,
            related_entity_ids: related_entities(&description, entities),
            description,
            confidence,
            model: model.map(str::to_string),
            created_at,
        });
    };

    if let Some(level) = object.get("risk_score").and_then(Value::as_str) {
        let level = level.trim().to_lowercase();
        if let Some(confidence) = risk_confidence(&level) {
            push(PatternKind::RiskScore, level, confidence);
        }
    }

    for (key, kind) in FIELDS {
        if let Some(description) = object.get(*key).and_then(field_text) {
            push(*kind, description, DEFAULT_CONFIDENCE);
        }
    }

    Ok(patterns)
}

fn extract_object(response: &str) -> Result<Map<String, Value>, AnalysisError> {
    let mut text = response;
    if let Some((_, rest)) = text.split_once("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        text = rest.split_once("```").map(|(inner, _)| inner).unwrap_or(rest);
    }

    let (start, end) = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => (start, end),
        _ => return Err(AnalysisError::Parse("no JSON object in response".to_string())),
    };

    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AnalysisError::Parse("response is not a JSON object".to_string())),
        Err(e) => Err(AnalysisError::Parse(e.to_string())),
    }
}

fn risk_confidence(level: &str) -> Option<f64> {
    match level {
        "low" => Some(0.25),
        "medium" => Some(0.5),
        "high" => Some(0.75),
        "critical" => Some(0.95),
        _ => None,
    }
}

/// Text of a response field; models sometimes answer with a list.
fn field_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    };

    match text.to_lowercase().as_str() {
        "" | "none" | "n/a" | "null" => None,
        _ => Some(text),
    }
}

/// Prompt entities mentioned in the text, or all of them if none is.
fn related_entities(description: &str, entities: &[&Entity]) -> BTreeSet<Uuid> {
    let haystack = description.to_lowercase();
    let mentioned: BTreeSet<Uuid> = entities
        .iter()
        .filter(|e| haystack.contains(&e.value.to_lowercase()))
        .map(|e| e.id)
        .collect();

    if mentioned.is_empty() {
        entities.iter().map(|e| e.id).collect()
    } else {
        mentioned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockReasoning;
    use crate::models::{EntityType, Finding, Severity};
    use crate::store::MemoryStore;
    use serde_json::json;

    const RESPONSE: &str = r#"Here is the analysis:
```json
{
  "risk_score": "High",
  "summary": "acme.com and alice@acme.com share registrant data.",
  "relationships": ["alice@acme.com is the WHOIS contact for acme.com"],
  "anomalies": "none",
  "leads": "",
  "recommendations": "Monitor new registrations by the same registrant."
}
```"#;

    struct Fixture {
        store: Arc<MemoryStore>,
        project_id: Uuid,
        domain: Entity,
        email: Entity,
    }

    async fn fixture(with_findings: bool) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let project = store.add_project("case").unwrap();
        let domain = store.add_entity(project.id, EntityType::Domain, "acme.com").unwrap();
        let email = store.add_entity(project.id, EntityType::Email, "alice@acme.com").unwrap();

        if with_findings {
            for entity in [&domain, &email] {
                store
                    .create_finding(Finding {
                        id: Uuid::new_v4(),
                        entity_id: entity.id,
                        tool_name: "WHOIS".to_string(),
                        tool_category: "network".to_string(),
                        raw_data: json!({"emails": ["alice@acme.com"]}),
                        summary: "WHOIS registrant found".to_string(),
                        severity: Severity::Info,
                        tags: BTreeSet::new(),
                        created_at: Utc::now(),
                    })
                    .await
                    .unwrap();
            }
        }

        Fixture {
            store,
            project_id: project.id,
            domain,
            email,
        }
    }

    fn analyzer(f: &Fixture, reasoning: Arc<MockReasoning>, policy: PatternPolicy) -> PatternAnalyzer {
        let config = AnalysisConfig {
            pattern_policy: policy,
            ..AnalysisConfig::default()
        };
        PatternAnalyzer::new(f.store.clone(), reasoning, &config)
    }

    #[tokio::test]
    async fn test_empty_corpus_skips_reasoning_service() {
        let f = fixture(false).await;
        let reasoning = Arc::new(MockReasoning::new().with_response(RESPONSE));

        let patterns = analyzer(&f, reasoning.clone(), PatternPolicy::Replace)
            .analyze(f.project_id)
            .await
            .unwrap();

        assert!(patterns.is_empty());
        assert_eq!(reasoning.calls(), 0);
        assert!(f.store.list_patterns(f.project_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_budget_skips_reasoning_service() {
        let f = fixture(true).await;
        let reasoning = Arc::new(MockReasoning::new().with_response(RESPONSE));
        let config = AnalysisConfig {
            max_findings: 0,
            ..AnalysisConfig::default()
        };

        let patterns = PatternAnalyzer::new(f.store.clone(), reasoning.clone(), &config)
            .analyze(f.project_id)
            .await
            .unwrap();

        assert!(patterns.is_empty());
        assert_eq!(reasoning.calls(), 0);
    }

    #[tokio::test]
    async fn test_analyze_persists_parsed_patterns() {
        let f = fixture(true).await;
        let reasoning = Arc::new(MockReasoning::new().with_response(RESPONSE));

        let patterns = analyzer(&f, reasoning.clone(), PatternPolicy::Replace)
            .analyze(f.project_id)
            .await
            .unwrap();

        let kinds: Vec<PatternKind> = patterns.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                PatternKind::RiskScore,
                PatternKind::Summary,
                PatternKind::Relationship,
                PatternKind::Recommendation
            ]
        );
        assert_eq!(patterns[0].description, "high");
        assert_eq!(patterns[0].confidence, 0.75);
        assert_eq!(patterns[1].confidence, 0.6);
        assert_eq!(patterns[0].model.as_deref(), Some("mock"));
        assert_eq!(reasoning.calls(), 1);

        let prompt = reasoning.last_prompt().unwrap();
        assert!(prompt.contains("WHOIS registrant found"));
        assert!(prompt.contains("share email 'alice@acme.com'"));

        assert_eq!(f.store.list_patterns(f.project_id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_unparseable_response_persists_nothing() {
        let f = fixture(true).await;
        let reasoning = Arc::new(
            MockReasoning::new()
                .with_response(RESPONSE)
                .with_response("I could not find any patterns."),
        );
        let analyzer = analyzer(&f, reasoning, PatternPolicy::Replace);

        analyzer.analyze(f.project_id).await.unwrap();
        let result = analyzer.analyze(f.project_id).await;

        assert!(matches!(result, Err(AnalysisError::Parse(_))));
        // The earlier batch survives a failed re-analysis.
        assert_eq!(f.store.list_patterns(f.project_id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_service_failure_surfaces() {
        let f = fixture(true).await;
        let reasoning = Arc::new(
            MockReasoning::new().with_error(AnalysisError::ServiceUnavailable("down".into())),
        );

        let result = analyzer(&f, reasoning, PatternPolicy::Replace)
            .analyze(f.project_id)
            .await;
        assert!(matches!(result, Err(AnalysisError::ServiceUnavailable(_))));
        assert!(f.store.list_patterns(f.project_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_policy_swaps_batches() {
        let f = fixture(true).await;
        let reasoning = Arc::new(MockReasoning::new().with_response(RESPONSE).with_response(
            r#"{"risk_score": "low", "summary": "Nothing notable."}"#,
        ));
        let analyzer = analyzer(&f, reasoning, PatternPolicy::Replace);

        analyzer.analyze(f.project_id).await.unwrap();
        analyzer.analyze(f.project_id).await.unwrap();

        let stored = f.store.list_patterns(f.project_id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].description, "low");
    }

    #[tokio::test]
    async fn test_append_policy_keeps_batches() {
        let f = fixture(true).await;
        let reasoning = Arc::new(
            MockReasoning::new()
                .with_response(RESPONSE)
                .with_response(RESPONSE),
        );
        let analyzer = analyzer(&f, reasoning, PatternPolicy::Append);

        analyzer.analyze(f.project_id).await.unwrap();
        analyzer.analyze(f.project_id).await.unwrap();

        assert_eq!(f.store.list_patterns(f.project_id).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_related_entities_follow_mentions() {
        let f = fixture(false).await;
        let entities = vec![&f.domain, &f.email];
        let patterns = parse_response(
            r#"{"leads": "Pivot on alice@acme.com", "summary": "Two targets."}"#,
            f.project_id,
            &entities,
            None,
        )
        .unwrap();

        let lead = patterns.iter().find(|p| p.kind == PatternKind::Lead).unwrap();
        // "alice@acme.com" contains "acme.com", so both are mentioned.
        assert_eq!(lead.related_entity_ids.len(), 2);

        let summary = patterns.iter().find(|p| p.kind == PatternKind::Summary).unwrap();
        assert_eq!(
            summary.related_entity_ids,
            [f.domain.id, f.email.id].into_iter().collect()
        );
    }

    #[test]
    fn test_extract_object_variants() {
        assert!(extract_object(r#"{"summary": "x"}"#).is_ok());
        assert!(extract_object("```\n{\"summary\": \"x\"}\n```").is_ok());
        assert!(extract_object("noise {\"a\": 1} trailing").is_ok());
        assert!(matches!(extract_object("no json"), Err(AnalysisError::Parse(_))));
        assert!(matches!(extract_object("{not json}"), Err(AnalysisError::Parse(_))));
    }

    #[test]
    fn test_unknown_risk_level_is_ignored() {
        let patterns = parse_response(r#"{"risk_score": "unknown"}"#, Uuid::new_v4(), &[], None).unwrap();
        assert!(patterns.is_empty());
    }
}
