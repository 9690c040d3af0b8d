//! Finding aggregation and statistics.
//!
//! The [`Aggregator`] turns a tool's payload into a normalized [`Finding`]
//! and persists it. The free functions below compute the groupings and
//! counts used by the reports.

use crate::error::StoreError;
use crate::models::{Entity, Finding, FindingPayload, Severity};
use crate::store::Store;
use crate::tools::ToolDescriptor;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Boolean payload fields that mark a strong risk signal when true.
const RISK_FLAGS: &[&str] = &["malicious", "blacklisted", "suspicious", "proxy", "hosting"];

/// Payload fields that count breaches. A bare `count` is not one of them:
/// line and field counts from informational tools say nothing about risk.
const BREACH_FIELDS: &[&str] = &["breach_count", "breaches_count"];

/// Normalizes tool payloads into findings and records them.
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn Store>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Normalize a payload and persist it as a finding for `entity`.
    pub async fn record(
        &self,
        entity: &Entity,
        descriptor: &ToolDescriptor,
        payload: FindingPayload,
    ) -> Result<Finding, StoreError> {
        let finding = normalize(entity, descriptor, payload);
        self.store.create_finding(finding.clone()).await?;
        debug!(
            entity_id = %entity.id,
            tool = %descriptor.name,
            severity = %finding.severity,
            "Recorded finding"
        );
        Ok(finding)
    }
}

/// Build a finding from a payload, filling in whatever the tool left out.
pub fn normalize(entity: &Entity, descriptor: &ToolDescriptor, payload: FindingPayload) -> Finding {
    let summary = payload
        .summary
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| derive_summary(&descriptor.name, &payload.raw_data));

    let severity = payload
        .severity
        .unwrap_or_else(|| derive_severity(&payload.raw_data));

    let mut tags: BTreeSet<String> = payload
        .tags
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    tags.insert(descriptor.category.to_lowercase());
    tags.insert(entity.entity_type.as_str().to_string());
    tags.insert(descriptor.name.to_lowercase());

    Finding {
        id: Uuid::new_v4(),
        entity_id: entity.id,
        tool_name: descriptor.name.clone(),
        tool_category: descriptor.category.clone(),
        raw_data: payload.raw_data,
        summary,
        severity,
        tags,
        created_at: Utc::now(),
    }
}

fn derive_summary(tool: &str, raw: &Value) -> String {
    for key in ["summary", "message", "description"] {
        if let Some(text) = raw.get(key).and_then(Value::as_str) {
            if !text.trim().is_empty() {
                return format!("{}: {}", tool, text.trim());
            }
        }
    }

    match raw {
        Value::Object(map) => format!("{} returned {} fields", tool, map.len()),
        Value::Array(items) => format!("{} returned {} records", tool, items.len()),
        Value::Null => format!("{} returned no data", tool),
        _ => format!("{} returned a result", tool),
    }
}

fn derive_severity(raw: &Value) -> Severity {
    let flagged = RISK_FLAGS
        .iter()
        .any(|key| raw.get(*key).and_then(Value::as_bool).unwrap_or(false));
    if flagged {
        return Severity::High;
    }

    let breaches = BREACH_FIELDS
        .iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_u64))
        .unwrap_or(0);

    match breaches {
        0 => Severity::Info,
        1..=5 => Severity::Medium,
        _ => Severity::High,
    }
}

/// Sort findings by severity (critical first).
pub fn sort_by_severity(findings: &mut [Finding]) {
    findings.sort_by(|a, b| b.severity.cmp(&a.severity));
}

/// Group findings by entity, keeping severity order within each group.
pub fn group_by_entity(findings: &[Finding]) -> HashMap<Uuid, Vec<Finding>> {
    let mut grouped: HashMap<Uuid, Vec<Finding>> = HashMap::new();

    for finding in findings {
        grouped
            .entry(finding.entity_id)
            .or_default()
            .push(finding.clone());
    }

    for findings in grouped.values_mut() {
        sort_by_severity(findings);
    }

    grouped
}

/// Get the top N findings by severity.
pub fn top_findings(findings: &[Finding], n: usize) -> Vec<Finding> {
    let mut sorted = findings.to_vec();
    sort_by_severity(&mut sorted);
    sorted.truncate(n);
    sorted
}

/// How often each tag occurs, most frequent first.
pub fn tag_distribution(findings: &[Finding]) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for tag in findings.iter().flat_map(|f| f.tags.iter()) {
        *counts.entry(tag.as_str()).or_default() += 1;
    }

    let mut tags: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(tag, count)| (tag.to_string(), count))
        .collect();
    tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    tags
}
