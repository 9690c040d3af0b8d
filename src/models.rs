//! Data models for the intelligence pipeline.
//!
//! This module contains the core data structures shared by the
//! orchestrator, the aggregator, the pattern analyzer and the reports:
//! projects, entities, findings, run results and patterns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of identifying information under investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Phone,
    Email,
    Username,
    Domain,
    Ip,
    Name,
    Social,
    File,
}

impl EntityType {
    /// All entity types, in declaration order.
    pub const ALL: [EntityType; 8] = [
        EntityType::Phone,
        EntityType::Email,
        EntityType::Username,
        EntityType::Domain,
        EntityType::Ip,
        EntityType::Name,
        EntityType::Social,
        EntityType::File,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Phone => "phone",
            EntityType::Email => "email",
            EntityType::Username => "username",
            EntityType::Domain => "domain",
            EntityType::Ip => "ip",
            EntityType::Name => "name",
            EntityType::Social => "social",
            EntityType::File => "file",
        }
    }

    /// Check that a value is plausible for this entity type.
    ///
    /// Returns a human-readable reason when it is not. This is a cheap
    /// syntactic check, run before any tool spends I/O on the value.
    pub fn validate_value(&self, value: &str) -> Result<(), String> {
        let value = value.trim();
        if value.is_empty() {
            return Err("value is empty".to_string());
        }

        match self {
            EntityType::Phone => {
                let digits = value.chars().filter(|c| c.is_ascii_digit()).count();
                let allowed = value
                    .chars()
                    .all(|c| c.is_ascii_digit() || "+-() .".contains(c));
                if !allowed || !(7..=15).contains(&digits) {
                    return Err(format!("'{}' is not a phone number", value));
                }
            }
            EntityType::Email => {
                let mut parts = value.splitn(2, '@');
                let local = parts.next().unwrap_or("");
                let domain = parts.next().unwrap_or("");
                if local.is_empty() || !domain.contains('.') || domain.contains('@') {
                    return Err(format!("'{}' is not an email address", value));
                }
            }
            EntityType::Domain => {
                if !value.contains('.') || value.contains(char::is_whitespace) || value.contains('/')
                {
                    return Err(format!("'{}' is not a domain name", value));
                }
            }
            EntityType::Ip => {
                if value.parse::<IpAddr>().is_err() {
                    return Err(format!("'{}' is not an IP address", value));
                }
            }
            EntityType::Username | EntityType::Social => {
                if value.contains(char::is_whitespace) {
                    return Err(format!("'{}' contains whitespace", value));
                }
            }
            EntityType::Name | EntityType::File => {}
        }

        Ok(())
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown entity type: {}", s))
    }
}

/// Severity level of a finding.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - context with no direct risk
    #[default]
    Info,
    /// Low severity - minor exposure
    Low,
    /// Medium severity - notable exposure, e.g. accounts found or breaches
    Medium,
    /// High severity - strong risk signal, e.g. many breaches or a proxy
    High,
    /// Critical severity - confirmed malicious or severe exposure
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "Info"),
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
            Severity::Critical => write!(f, "Critical"),
        }
    }
}

impl Severity {
    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Info => "🔵",
            Severity::Low => "🟢",
            Severity::Medium => "🟡",
            Severity::High => "🟠",
            Severity::Critical => "🔴",
        }
    }

    /// Parse a severity leniently; unknown labels yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "info" | "informational" => Some(Severity::Info),
            "low" => Some(Severity::Low),
            "medium" | "moderate" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// An investigation grouping a set of entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Archived projects are not run.
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

/// A piece of identifying information under investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub project_id: Uuid,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Soft-deletion marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl Entity {
    /// Creates a new live entity with a fresh identifier.
    pub fn new(project_id: Uuid, entity_type: EntityType, value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            entity_type,
            value: value.into(),
            label: None,
            created_at: Utc::now(),
            archived_at: None,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Short `type: value` description used in logs, prompts and reports.
    pub fn describe(&self) -> String {
        format!("{}: {}", self.entity_type, self.value)
    }
}

/// What a tool adapter hands back after a successful run.
///
/// Everything but `raw_data` is a hint; the aggregator fills in
/// missing pieces with its own heuristics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindingPayload {
    pub raw_data: Value,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl FindingPayload {
    pub fn new(raw_data: Value) -> Self {
        Self {
            raw_data,
            ..Default::default()
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// A normalized unit of intelligence produced by one tool for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub tool_name: String,
    pub tool_category: String,
    pub raw_data: Value,
    pub summary: String,
    pub severity: Severity,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one (entity, tool) invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Failure,
    Skipped,
    Timeout,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success => write!(f, "success"),
            RunOutcome::Failure => write!(f, "failure"),
            RunOutcome::Skipped => write!(f, "skipped"),
            RunOutcome::Timeout => write!(f, "timeout"),
        }
    }
}

impl RunOutcome {
    pub fn emoji(&self) -> &'static str {
        match self {
            RunOutcome::Success => "✅",
            RunOutcome::Failure => "❌",
            RunOutcome::Skipped => "⏭️",
            RunOutcome::Timeout => "⏱️",
        }
    }
}

/// Result of invoking one tool against one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub entity_id: Uuid,
    pub tool_name: String,
    pub outcome: RunOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Wall-clock time spent on the invocation, retries included.
    pub duration_ms: u64,
    /// Number of `run` calls made (0 when skipped).
    pub attempts: u32,
    /// The finding created from a successful run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finding_id: Option<Uuid>,
}

/// Per-outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub success: usize,
    pub failure: usize,
    pub timeout: usize,
    pub skipped: usize,
}

impl RunCounts {
    pub fn record(&mut self, outcome: RunOutcome) {
        match outcome {
            RunOutcome::Success => self.success += 1,
            RunOutcome::Failure => self.failure += 1,
            RunOutcome::Timeout => self.timeout += 1,
            RunOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.success + self.failure + self.timeout + self.skipped
    }

    pub fn merge(&mut self, other: &RunCounts) {
        self.success += other.success;
        self.failure += other.failure;
        self.timeout += other.timeout;
        self.skipped += other.skipped;
    }
}

/// Summary of one entity-level run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub entity_id: Uuid,
    pub entity_type: EntityType,
    pub entity_value: String,
    /// One result per applicable tool, in registry registration order.
    pub results: Vec<RunResult>,
    pub counts: RunCounts,
    pub finding_ids: Vec<Uuid>,
}

impl RunSummary {
    /// Builds a summary from results already in registration order.
    pub fn from_results(entity: &Entity, results: Vec<RunResult>) -> Self {
        let mut counts = RunCounts::default();
        let mut finding_ids = Vec::new();

        for result in &results {
            counts.record(result.outcome);
            if let Some(id) = result.finding_id {
                finding_ids.push(id);
            }
        }

        Self {
            entity_id: entity.id,
            entity_type: entity.entity_type,
            entity_value: entity.value.clone(),
            results,
            counts,
            finding_ids,
        }
    }
}

/// Summary of a project-level run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRunSummary {
    pub project_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Per-entity summaries, in the store's entity listing order.
    pub entities: Vec<RunSummary>,
    pub totals: RunCounts,
    /// Whether cancellation was signalled while the run was in progress.
    pub cancelled: bool,
}

impl ProjectRunSummary {
    pub fn findings_created(&self) -> usize {
        self.entities.iter().map(|e| e.finding_ids.len()).sum()
    }
}

/// Kind of synthesized insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    RiskScore,
    Summary,
    Relationship,
    Anomaly,
    Lead,
    Recommendation,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternKind::RiskScore => write!(f, "Risk Score"),
            PatternKind::Summary => write!(f, "Summary"),
            PatternKind::Relationship => write!(f, "Relationship"),
            PatternKind::Anomaly => write!(f, "Anomaly"),
            PatternKind::Lead => write!(f, "Lead"),
            PatternKind::Recommendation => write!(f, "Recommendation"),
        }
    }
}

/// A higher-level insight synthesized across findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: Uuid,
    pub project_id: Uuid,
    pub kind: PatternKind,
    pub description: String,
    /// Confidence in `0.0..=1.0`.
    pub confidence: f64,
    pub related_entity_ids: BTreeSet<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Summary of findings by severity and tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindingSummary {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
    pub by_tool: HashMap<String, usize>,
}

impl FindingSummary {
    /// Creates a summary from a list of findings.
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = Self {
            total: findings.len(),
            ..Default::default()
        };

        for finding in findings {
            match finding.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
                Severity::Info => summary.info += 1,
            }

            *summary
                .by_tool
                .entry(finding.tool_name.clone())
                .or_insert(0) += 1;
        }

        summary
    }
}

/// Metadata about a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub project_id: Uuid,
    pub project_name: String,
    pub generated_at: DateTime<Utc>,
    /// Model used for pattern synthesis, when analysis ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    pub entities: usize,
    pub total_findings: usize,
    pub duration_seconds: f64,
}

/// Everything a run-and-analysis report shows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub entities: Vec<Entity>,
    /// Absent when the run was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<ProjectRunSummary>,
    pub summary: FindingSummary,
    pub findings: Vec<Finding>,
    pub patterns: Vec<Pattern>,
    /// Why analysis produced no patterns, if it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_error: Option<String>,
}
