//! Tool adapters for OSINT collectors.
//!
//! Every collector, whether it shells out to a local binary or calls a
//! REST API, is wrapped in a [`ToolAdapter`]. The orchestrator only ever
//! sees this trait; how a tool gets its data is hidden behind `run`.

pub mod http;
pub mod subprocess;

pub use http::HttpTool;
pub use subprocess::SubprocessTool;

use crate::config::{ToolConfig, ToolKind};
use crate::error::{RegistryError, ToolError};
use crate::models::{EntityType, FindingPayload, Severity};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Static description of a tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub category: String,
    pub supported_entity_types: BTreeSet<EntityType>,
    /// Per-tool time limit; the orchestrator default applies when unset.
    #[serde(skip)]
    pub timeout: Option<Duration>,
    /// Read-only lookups may be retried once on a transient failure.
    pub idempotent: bool,
    /// Premium tools only run when the caller opts in.
    pub premium_only: bool,
}

impl ToolDescriptor {
    pub fn new<I>(name: impl Into<String>, category: impl Into<String>, types: I) -> Self
    where
        I: IntoIterator<Item = EntityType>,
    {
        Self {
            name: name.into(),
            category: category.into(),
            supported_entity_types: types.into_iter().collect(),
            timeout: None,
            idempotent: false,
            premium_only: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn premium_only(mut self, premium_only: bool) -> Self {
        self.premium_only = premium_only;
        self
    }
}

/// Capability contract every collector satisfies.
///
/// Implementations must be safe to call concurrently; any rate-limit or
/// credential state lives inside the adapter behind its own lock. Adapters
/// never write findings themselves.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    /// `(name, category)` of the tool.
    fn identity(&self) -> (&str, &str) {
        let d = self.descriptor();
        (&d.name, &d.category)
    }

    fn supports(&self, entity_type: EntityType) -> bool {
        self.descriptor().supported_entity_types.contains(&entity_type)
    }

    /// Run the tool against one entity value.
    async fn run(&self, value: &str, timeout: Duration) -> Result<FindingPayload, ToolError>;
}

/// Hints a configured tool attaches to its payloads.
#[derive(Debug, Clone, Default)]
pub struct ToolHints {
    pub tags: Vec<String>,
    /// Extra tags for payloads with at least one hit.
    pub hit_tags: Vec<String>,
    /// Severity when the tool reports at least one hit, `info` otherwise.
    pub hit_severity: Option<Severity>,
    /// Summary with `{tool}`, `{value}` and `{count}` placeholders.
    pub summary_template: Option<String>,
    /// JSON pointer to the hit count inside the raw payload.
    pub count_pointer: Option<String>,
}

impl ToolHints {
    fn from_config(config: &ToolConfig) -> Self {
        Self {
            tags: config.tags.clone(),
            hit_tags: config.hit_tags.clone(),
            hit_severity: config.hit_severity,
            summary_template: config.summary_template.clone(),
            count_pointer: config.count_pointer.clone(),
        }
    }

    /// Wrap a raw payload with whatever hints are configured.
    pub fn apply(&self, tool: &str, value: &str, raw: Value) -> FindingPayload {
        let count = count_hits(&raw, self.count_pointer.as_deref());
        let mut payload = FindingPayload::new(raw).with_tags(self.tags.iter().cloned());
        if count.unwrap_or(0) > 0 {
            payload = payload.with_tags(self.hit_tags.iter().cloned());
        }

        if let Some(severity) = self.hit_severity {
            payload.severity = Some(if count.unwrap_or(0) > 0 {
                severity
            } else {
                Severity::Info
            });
        }

        if let Some(ref template) = self.summary_template {
            let count = count.map(|c| c.to_string()).unwrap_or_else(|| "?".to_string());
            payload.summary = Some(
                template
                    .replace("{tool}", tool)
                    .replace("{value}", value)
                    .replace("{count}", &count),
            );
        }

        payload
    }
}

/// Number of hits in a raw payload.
///
/// Uses the pointer when given, then falls back to array length or a
/// top-level `count` field.
pub fn count_hits(raw: &Value, pointer: Option<&str>) -> Option<usize> {
    let target = match pointer {
        Some(p) => raw.pointer(p)?,
        None => raw,
    };

    match target {
        Value::Array(items) => Some(items.len()),
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::Object(map) if pointer.is_none() => map
            .get("count")
            .and_then(|c| c.as_u64())
            .map(|c| c as usize),
        _ => None,
    }
}

/// Replace the `{value}` placeholder in a template.
pub fn substitute(template: &str, value: &str) -> String {
    template.replace("{value}", value)
}

/// Build one adapter from its configuration entry.
pub fn build_adapter(config: &ToolConfig) -> Result<Arc<dyn ToolAdapter>, RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidTool {
        name: config.name.clone(),
        reason: reason.to_string(),
    };

    if config.name.trim().is_empty() {
        return Err(invalid("name is empty"));
    }

    let mut descriptor = ToolDescriptor::new(
        config.name.clone(),
        config.category.clone(),
        config.entity_types.iter().copied(),
    )
    .premium_only(config.premium_only);

    if let Some(secs) = config.timeout_seconds {
        if secs == 0 {
            return Err(invalid("timeout_seconds must be at least 1"));
        }
        descriptor = descriptor.with_timeout(Duration::from_secs(secs));
    }

    let hints = ToolHints::from_config(config);

    let adapter: Arc<dyn ToolAdapter> = match config.kind {
        ToolKind::Subprocess => {
            let command = config
                .command
                .clone()
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| invalid("subprocess tools need a command"))?;
            let descriptor = descriptor.idempotent(config.idempotent.unwrap_or(false));
            Arc::new(
                SubprocessTool::new(descriptor, command, config.args.clone(), config.output)
                    .with_line_prefix(config.line_prefix.clone())
                    .with_hints(hints),
            )
        }
        ToolKind::Http => {
            let is_http = |u: &String| u.starts_with("http://") || u.starts_with("https://");
            let url = config.url.clone().filter(is_http);
            if config.url.is_some() && url.is_none() {
                return Err(invalid("http tools need an http(s) url"));
            }
            if !config.endpoints.values().all(is_http) {
                return Err(invalid("every endpoint needs an http(s) url"));
            }
            if url.is_none() && config.endpoints.is_empty() {
                return Err(invalid("http tools need an http(s) url"));
            }

            let descriptor = descriptor.idempotent(config.idempotent.unwrap_or(true));
            let mut tool = HttpTool::new(descriptor, url.unwrap_or_default())
                .with_endpoints(config.endpoints.clone())
                .with_hints(hints)
                .with_not_found_is_empty(config.not_found_is_empty)
                .with_email_domain(config.email_domain)
                .with_text_match(config.text_match.clone())
                .with_min_interval(Duration::from_millis(config.min_interval_ms));
            if let Some(ref var) = config.api_key_env {
                tool = tool.with_api_key(
                    var.clone(),
                    config.api_key_header.clone(),
                    config.api_key_param.clone(),
                );
            }
            Arc::new(tool)
        }
    };

    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputMode;
    use serde_json::json;

    fn subprocess_config() -> ToolConfig {
        ToolConfig {
            name: "Sherlock".to_string(),
            category: "username".to_string(),
            entity_types: vec![EntityType::Username, EntityType::Social],
            kind: ToolKind::Subprocess,
            command: Some("sherlock".to_string()),
            args: vec!["{value}".to_string()],
            output: OutputMode::Lines,
            line_prefix: Some("[+]".to_string()),
            timeout_seconds: Some(60),
            ..Default::default()
        }
    }

    #[test]
    fn test_count_hits() {
        assert_eq!(count_hits(&json!([1, 2, 3]), None), Some(3));
        assert_eq!(count_hits(&json!({"count": 4}), None), Some(4));
        assert_eq!(count_hits(&json!({"a": {"b": 7}}), Some("/a/b")), Some(7));
        assert_eq!(count_hits(&json!({"hits": [1]}), Some("/hits")), Some(1));
        assert_eq!(count_hits(&json!({"x": 1}), None), None);
        assert_eq!(count_hits(&json!({"x": 1}), Some("/missing")), None);
    }

    #[test]
    fn test_hints_apply() {
        let hints = ToolHints {
            tags: vec!["username".to_string()],
            hit_tags: vec!["exposed".to_string()],
            hit_severity: Some(Severity::Medium),
            summary_template: Some("{tool}: {count} platforms for {value}".to_string()),
            count_pointer: None,
        };

        let payload = hints.apply("Sherlock", "jdoe", json!({"matches": ["a", "b"], "count": 2}));
        assert_eq!(payload.severity, Some(Severity::Medium));
        assert_eq!(
            payload.summary.as_deref(),
            Some("Sherlock: 2 platforms for jdoe")
        );
        assert!(payload.tags.contains("username"));
        assert!(payload.tags.contains("exposed"));

        let empty = hints.apply("Sherlock", "jdoe", json!({"matches": [], "count": 0}));
        assert_eq!(empty.severity, Some(Severity::Info));
        assert!(!empty.tags.contains("exposed"));
    }

    #[test]
    fn test_hints_absent_leave_payload_bare() {
        let payload = ToolHints::default().apply("WHOIS", "example.com", json!({"org": "x"}));
        assert!(payload.summary.is_none());
        assert!(payload.severity.is_none());
        assert!(payload.tags.is_empty());
    }

    #[test]
    fn test_build_subprocess_adapter() {
        let adapter = build_adapter(&subprocess_config()).unwrap();
        assert_eq!(adapter.identity(), ("Sherlock", "username"));
        assert!(adapter.supports(EntityType::Social));
        assert!(!adapter.supports(EntityType::Email));
        assert!(!adapter.descriptor().idempotent);
        assert_eq!(adapter.descriptor().timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_build_http_adapter_defaults_to_idempotent() {
        let config = ToolConfig {
            name: "IP-Geo".to_string(),
            category: "network".to_string(),
            entity_types: vec![EntityType::Ip],
            kind: ToolKind::Http,
            url: Some("http://ip-api.com/json/{value}".to_string()),
            ..Default::default()
        };
        let adapter = build_adapter(&config).unwrap();
        assert!(adapter.descriptor().idempotent);
    }

    #[test]
    fn test_build_adapter_rejects_incomplete_config() {
        let mut config = subprocess_config();
        config.command = None;
        assert!(matches!(
            build_adapter(&config),
            Err(RegistryError::InvalidTool { .. })
        ));

        let config = ToolConfig {
            name: "Broken".to_string(),
            kind: ToolKind::Http,
            url: Some("ftp://example.com".to_string()),
            entity_types: vec![EntityType::Domain],
            ..Default::default()
        };
        assert!(build_adapter(&config).is_err());
    }

    #[test]
    fn test_build_http_adapter_from_endpoints() {
        let mut config = ToolConfig {
            name: "DNSDumpster".to_string(),
            category: "network".to_string(),
            entity_types: vec![EntityType::Domain],
            kind: ToolKind::Http,
            endpoints: [(
                "A".to_string(),
                "https://dns.google/resolve?name={value}&type=A".to_string(),
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        assert!(build_adapter(&config).is_ok());

        config
            .endpoints
            .insert("MX".to_string(), "dns://8.8.8.8/{value}".to_string());
        assert!(matches!(
            build_adapter(&config),
            Err(RegistryError::InvalidTool { .. })
        ));
    }
}
