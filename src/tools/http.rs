//! Tools backed by a REST lookup API.

use super::{substitute, ToolAdapter, ToolDescriptor, ToolHints};
use crate::error::ToolError;
use crate::models::FindingPayload;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

const USER_AGENT: &str = concat!("Valkyrie-OSINT/", env!("CARGO_PKG_VERSION"));

/// Longest response-body excerpt carried into an error message.
const BODY_EXCERPT: usize = 300;

/// How the adapter authenticates, if at all.
#[derive(Debug, Clone)]
struct ApiKey {
    env_var: String,
    header: Option<String>,
    param: Option<String>,
}

/// A collector reached over HTTP GET, e.g. ip-api or HaveIBeenPwned.
pub struct HttpTool {
    descriptor: ToolDescriptor,
    client: reqwest::Client,
    url_template: String,
    /// Named URL templates fetched together instead of `url_template`.
    endpoints: BTreeMap<String, String>,
    api_key: Option<ApiKey>,
    not_found_is_empty: bool,
    email_domain: bool,
    text_match: Option<String>,
    min_interval: Duration,
    /// Time of the last request, for spacing calls to rate-limited APIs.
    last_request: Mutex<Option<Instant>>,
    hints: ToolHints,
}

impl HttpTool {
    pub fn new(descriptor: ToolDescriptor, url_template: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            descriptor,
            client,
            url_template: url_template.into(),
            endpoints: BTreeMap::new(),
            api_key: None,
            not_found_is_empty: false,
            email_domain: false,
            text_match: None,
            min_interval: Duration::ZERO,
            last_request: Mutex::new(None),
            hints: ToolHints::default(),
        }
    }

    /// Read an API key from `env_var` at call time and send it as a header
    /// or query parameter.
    pub fn with_api_key(
        mut self,
        env_var: String,
        header: Option<String>,
        param: Option<String>,
    ) -> Self {
        self.api_key = Some(ApiKey {
            env_var,
            header,
            param,
        });
        self
    }

    pub fn with_not_found_is_empty(mut self, enabled: bool) -> Self {
        self.not_found_is_empty = enabled;
        self
    }

    pub fn with_endpoints(mut self, endpoints: BTreeMap<String, String>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Query only the domain of an email value (`alice@example.com` → `example.com`).
    pub fn with_email_domain(mut self, enabled: bool) -> Self {
        self.email_domain = enabled;
        self
    }

    pub fn with_text_match(mut self, marker: Option<String>) -> Self {
        self.text_match = marker;
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_hints(mut self, hints: ToolHints) -> Self {
        self.hints = hints;
        self
    }

    /// Wait until at least `min_interval` has passed since the previous
    /// request. Holding the lock across the sleep serializes callers.
    async fn throttle(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn resolve_api_key(&self) -> Result<Option<(String, &ApiKey)>, ToolError> {
        match self.api_key {
            Some(ref key) => match std::env::var(&key.env_var) {
                Ok(secret) if !secret.trim().is_empty() => Ok(Some((secret, key))),
                _ => Err(ToolError::Unavailable(format!(
                    "{} is not configured",
                    key.env_var
                ))),
            },
            None => Ok(None),
        }
    }

    fn query_for<'a>(&self, value: &'a str) -> &'a str {
        if self.email_domain {
            value.rsplit_once('@').map_or(value, |(_, domain)| domain)
        } else {
            value
        }
    }

    /// GET one URL template and return its body as JSON.
    async fn fetch(
        &self,
        template: &str,
        query: &str,
        api_key: Option<&(String, &ApiKey)>,
        timeout: Duration,
    ) -> Result<Value, ToolError> {
        let url = substitute(template, &urlencoding::encode(query));
        debug!("GET {}", url);

        let mut request = self.client.get(&url).timeout(timeout);
        if let Some((secret, key)) = api_key {
            if let Some(ref header) = key.header {
                request = request.header(header.as_str(), secret.as_str());
            }
            if let Some(ref param) = key.param {
                request = request.query(&[(param.as_str(), secret.as_str())]);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_send_error(e, timeout))?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND && self.not_found_is_empty {
            return Ok(json!({ "query": query, "results": [], "count": 0 }));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_send_error(e, timeout))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body));
        }

        match (serde_json::from_str(&body), self.text_match.as_deref()) {
            (Ok(raw), _) => Ok(raw),
            (Err(_), Some(marker)) => Ok(parse_text_body(&body, marker)),
            (Err(e), None) => Err(ToolError::ExternalError(format!(
                "response is not JSON: {}",
                e
            ))),
        }
    }
}

/// Split a plain-text body into lines and pick the ones mentioning `marker`.
///
/// Lines saying "not <marker>" are not hits.
pub fn parse_text_body(body: &str, marker: &str) -> Value {
    let marker = marker.to_lowercase();
    let negated = format!("not {}", marker);

    let lines: Vec<&str> = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let matches: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|line| {
            let lower = line.to_lowercase();
            lower.contains(&marker) && !lower.contains(&negated)
        })
        .collect();

    let count = matches.len();
    json!({ "lines": lines, "matches": matches, "count": count })
}

/// Merge per-endpoint results into one object keyed by endpoint name.
///
/// A failed endpoint is recorded as `{"error": ...}`; the call only fails
/// when every endpoint did.
fn combine_endpoints(results: Vec<(&String, Result<Value, ToolError>)>) -> Result<Value, ToolError> {
    let mut combined = Map::new();
    let mut first_error = None;
    let mut succeeded = false;

    for (name, result) in results {
        match result {
            Ok(raw) => {
                succeeded = true;
                combined.insert(name.clone(), raw);
            }
            Err(e) => {
                debug!("Endpoint {} failed: {}", name, e);
                combined.insert(name.clone(), json!({ "error": e.to_string() }));
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if !succeeded => Err(e),
        _ => Ok(Value::Object(combined)),
    }
}

/// Map a non-success HTTP status to a tool error.
pub fn classify_status(status: u16, body: &str) -> ToolError {
    let excerpt: String = body.trim().chars().take(BODY_EXCERPT).collect();
    let detail = if excerpt.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, excerpt)
    };

    match status {
        400 | 422 => ToolError::InvalidInput(detail),
        429 | 500..=599 => ToolError::Unavailable(detail),
        _ => ToolError::ExternalError(detail),
    }
}

fn classify_send_error(e: reqwest::Error, timeout: Duration) -> ToolError {
    if e.is_timeout() {
        ToolError::Timeout(timeout)
    } else if e.is_connect() {
        ToolError::Unavailable(format!("cannot connect: {}", e))
    } else {
        ToolError::Unavailable(format!("request failed: {}", e))
    }
}

#[async_trait]
impl ToolAdapter for HttpTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn run(&self, value: &str, timeout: Duration) -> Result<FindingPayload, ToolError> {
        let value = value.trim();
        let query = self.query_for(value);
        let api_key = self.resolve_api_key()?;

        self.throttle().await;

        let raw = if self.endpoints.is_empty() {
            self.fetch(&self.url_template, query, api_key.as_ref(), timeout)
                .await?
        } else {
            let api_key = api_key.as_ref();
            let fetches = self.endpoints.iter().map(|(name, template)| async move {
                (name, self.fetch(template, query, api_key, timeout).await)
            });
            combine_endpoints(join_all(fetches).await)?
        };

        Ok(self.hints.apply(&self.descriptor.name, value, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, Severity};
    use mockito::Matcher;

    fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new("HIBP", "email", [EntityType::Email]).idempotent(true)
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(400, "bad email"),
            ToolError::InvalidInput(_)
        ));
        assert!(matches!(classify_status(429, ""), ToolError::Unavailable(_)));
        assert!(matches!(classify_status(503, ""), ToolError::Unavailable(_)));
        assert!(matches!(
            classify_status(401, "Invalid API key"),
            ToolError::ExternalError(_)
        ));

        let err = classify_status(404, "");
        assert_eq!(err.to_string(), "external error: HTTP 404");
    }

    #[test]
    fn test_classify_status_truncates_body() {
        let body = "x".repeat(2000);
        let err = classify_status(500, &body);
        assert!(err.to_string().len() < 400);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_unavailable() {
        let tool = HttpTool::new(descriptor(), "https://haveibeenpwned.com/api/v3/breachedaccount/{value}")
            .with_api_key(
                "VALKYRIE_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
                Some("hibp-api-key".to_string()),
                None,
            );

        let result = tool.run("alice@example.com", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ToolError::Unavailable(ref m)) if m.contains("not configured")));
    }

    #[tokio::test]
    async fn test_throttle_spaces_requests() {
        let tool = HttpTool::new(descriptor(), "http://localhost/{value}")
            .with_min_interval(Duration::from_millis(50));

        let started = Instant::now();
        tool.throttle().await;
        tool.throttle().await;
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_unavailable() {
        // Port 9 on localhost is the discard service; it is closed almost everywhere.
        let tool = HttpTool::new(descriptor(), "http://127.0.0.1:9/{value}");
        let result = tool.run("alice@example.com", Duration::from_secs(2)).await;
        assert!(matches!(
            result,
            Err(ToolError::Unavailable(_)) | Err(ToolError::Timeout(_))
        ));
    }

    fn reputation_hints() -> ToolHints {
        ToolHints {
            tags: vec!["reputation".to_string()],
            hit_tags: vec!["blacklisted".to_string()],
            hit_severity: Some(Severity::High),
            summary_template: Some("{value} listed on {count} DNSBL(s)".to_string()),
            count_pointer: Some("/dnsbl/count".to_string()),
        }
    }

    fn reputation_tool(base: &str) -> HttpTool {
        let endpoints = BTreeMap::from([
            ("dnsbl".to_string(), format!("{}/dnsbl/?q={{value}}", base)),
            ("urlscan".to_string(), format!("{}/search/?q=domain:{{value}}", base)),
        ]);
        HttpTool::new(
            ToolDescriptor::new("DomainRep", "network", [EntityType::Domain]),
            "",
        )
        .with_endpoints(endpoints)
        .with_text_match(Some("listed".to_string()))
        .with_hints(reputation_hints())
    }

    #[test]
    fn test_parse_text_body() {
        let body = "Query: example.com\n\nzen.spamhaus.org LISTED\nbl.spamcop.net not listed\n";
        let raw = parse_text_body(body, "listed");
        assert_eq!(raw["lines"].as_array().unwrap().len(), 3);
        assert_eq!(raw["matches"], json!(["zen.spamhaus.org LISTED"]));
        assert_eq!(raw["count"], 1);
    }

    #[tokio::test]
    async fn test_endpoints_are_combined_by_name() {
        let mut server = mockito::Server::new_async().await;
        let dnsbl = server
            .mock("GET", Matcher::Regex("^/dnsbl".to_string()))
            .match_query(Matcher::Any)
            .with_body("zen.spamhaus.org LISTED\nbl.spamcop.net not listed")
            .create_async()
            .await;
        let urlscan = server
            .mock("GET", Matcher::Regex("^/search".to_string()))
            .match_query(Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(r#"{"total": 3, "results": []}"#)
            .create_async()
            .await;

        let tool = reputation_tool(&server.url());
        let payload = tool.run("example.com", Duration::from_secs(5)).await.unwrap();

        dnsbl.assert_async().await;
        urlscan.assert_async().await;
        assert_eq!(payload.raw_data["dnsbl"]["count"], 1);
        assert_eq!(payload.raw_data["urlscan"]["total"], 3);
        assert_eq!(payload.severity, Some(Severity::High));
        assert!(payload.tags.contains("blacklisted"));
        assert_eq!(
            payload.summary.as_deref(),
            Some("example.com listed on 1 DNSBL(s)")
        );
    }

    #[tokio::test]
    async fn test_failed_endpoint_is_recorded_in_payload() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Regex("^/dnsbl".to_string()))
            .match_query(Matcher::Any)
            .with_body("bl.spamcop.net not listed")
            .create_async()
            .await;
        server
            .mock("GET", Matcher::Regex("^/search".to_string()))
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let payload = reputation_tool(&server.url())
            .run("example.com", Duration::from_secs(5))
            .await
            .unwrap();

        assert!(payload.raw_data["urlscan"]["error"]
            .as_str()
            .unwrap()
            .contains("503"));
        assert_eq!(payload.raw_data["dnsbl"]["count"], 0);
        assert_eq!(payload.severity, Some(Severity::Info));
        assert!(!payload.tags.contains("blacklisted"));
    }

    #[tokio::test]
    async fn test_all_endpoints_failing_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let result = reputation_tool(&server.url())
            .run("example.com", Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(ToolError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_email_domain_is_queried_for_email_values() {
        let mut server = mockito::Server::new_async().await;
        let lookup = server
            .mock("GET", "/domains/example.com")
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": {"attributes": {"last_analysis_stats": {"malicious": 0}}}}"#)
            .expect(1)
            .create_async()
            .await;

        let tool = HttpTool::new(
            ToolDescriptor::new("VirusTotal", "network", [EntityType::Email, EntityType::Domain]),
            format!("{}/domains/{{value}}", server.url()),
        )
        .with_email_domain(true)
        .with_hints(ToolHints {
            summary_template: Some("{count} engine(s) flag {value}".to_string()),
            count_pointer: Some("/data/attributes/last_analysis_stats/malicious".to_string()),
            ..Default::default()
        });

        let payload = tool
            .run("alice@example.com", Duration::from_secs(5))
            .await
            .unwrap();

        lookup.assert_async().await;
        assert_eq!(
            payload.summary.as_deref(),
            Some("0 engine(s) flag alice@example.com")
        );
    }

    #[tokio::test]
    async fn test_plain_text_without_marker_is_external_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/lookup/example.com")
            .with_body("not json at all")
            .create_async()
            .await;

        let tool = HttpTool::new(descriptor(), format!("{}/lookup/{{value}}", server.url()));
        let result = tool.run("example.com", Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ToolError::ExternalError(ref m)) if m.contains("not JSON")));
    }
}
