//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.valkyrie.toml` files, including the static tool table the
//! registry is built from.

use crate::models::{EntityType, Severity};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".valkyrie.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Run orchestration settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Pattern analysis settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Tool table, in registration order.
    #[serde(default = "default_tools")]
    pub tools: Vec<ToolConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            analysis: AnalysisConfig::default(),
            tools: default_tools(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// JSON workspace file holding projects, entities, findings and patterns.
    #[serde(default = "default_store")]
    pub store: String,

    /// Default report output path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            store: default_store(),
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_store() -> String {
    "valkyrie.json".to_string()
}

fn default_output() -> String {
    "valkyrie_report.md".to_string()
}

/// Concurrency, timeout and retry policy for runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum entity-level runs in flight at once.
    #[serde(default = "default_worker_pool")]
    pub worker_pool: usize,

    /// Maximum tool invocations in flight per entity (0 = no limit).
    #[serde(default)]
    pub per_entity_concurrency: usize,

    /// Timeout for tools that do not set their own.
    #[serde(default = "default_tool_timeout")]
    pub default_timeout_seconds: u64,

    /// Pause before retrying an idempotent tool.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Run premium-only tools.
    #[serde(default)]
    pub include_premium: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_pool: default_worker_pool(),
            per_entity_concurrency: 0,
            default_timeout_seconds: default_tool_timeout(),
            retry_backoff_ms: default_retry_backoff(),
            include_premium: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn default_worker_pool() -> usize {
    4
}

fn default_tool_timeout() -> u64 {
    60
}

fn default_retry_backoff() -> u64 {
    500
}

/// What re-running analysis does to a project's earlier patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternPolicy {
    /// Swap the whole pattern set for the new batch.
    #[default]
    Replace,
    /// Keep earlier batches and add the new one.
    Append,
}

/// LLM and prompt-budget settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Context window requested from the model.
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,

    /// Request timeout in seconds.
    #[serde(default = "default_analysis_timeout")]
    pub timeout_seconds: u64,

    /// Most findings included in a prompt.
    #[serde(default = "default_max_findings")]
    pub max_findings: usize,

    /// Most findings included per entity.
    #[serde(default = "default_max_findings_per_entity")]
    pub max_findings_per_entity: usize,

    /// Most entities included in a prompt.
    #[serde(default = "default_max_entities")]
    pub max_entities: usize,

    /// Characters of raw payload shown per finding.
    #[serde(default = "default_raw_snippet_chars")]
    pub raw_snippet_chars: usize,

    /// Most cross-entity connections listed in a prompt.
    #[serde(default = "default_max_links")]
    pub max_links: usize,

    /// Replace or append patterns on re-analysis.
    #[serde(default)]
    pub pattern_policy: PatternPolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            model: default_model(),
            temperature: default_temperature(),
            num_ctx: default_num_ctx(),
            timeout_seconds: default_analysis_timeout(),
            max_findings: default_max_findings(),
            max_findings_per_entity: default_max_findings_per_entity(),
            max_entities: default_max_entities(),
            raw_snippet_chars: default_raw_snippet_chars(),
            max_links: default_max_links(),
            pattern_policy: PatternPolicy::default(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "mistral".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_num_ctx() -> u32 {
    8192
}

fn default_analysis_timeout() -> u64 {
    600
}

fn default_max_findings() -> usize {
    15
}

fn default_max_findings_per_entity() -> usize {
    2
}

fn default_max_entities() -> usize {
    8
}

fn default_raw_snippet_chars() -> usize {
    150
}

fn default_max_links() -> usize {
    20
}

/// How a tool gets its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// Local command-line collector.
    #[default]
    Subprocess,
    /// REST lookup over HTTP GET.
    Http,
}

/// How a subprocess tool's stdout is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// stdout is one JSON document.
    #[default]
    Json,
    /// Matching lines are collected into `{matches, count}`.
    Lines,
    /// `Key: Value` lines (WHOIS style) are collected into named fields.
    Fields,
}

/// One entry of the static tool table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,

    #[serde(default)]
    pub category: String,

    /// Entity types the tool applies to.
    #[serde(default)]
    pub entity_types: Vec<EntityType>,

    #[serde(default)]
    pub kind: ToolKind,

    /// Executable for subprocess tools.
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments; `{value}` is replaced with the entity value.
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub output: OutputMode,

    /// Only lines starting with this prefix count (lines mode).
    #[serde(default)]
    pub line_prefix: Option<String>,

    /// URL for http tools; `{value}` is replaced with the encoded value.
    #[serde(default)]
    pub url: Option<String>,

    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Header the API key is sent in.
    #[serde(default)]
    pub api_key_header: Option<String>,

    /// Query parameter the API key is sent in.
    #[serde(default)]
    pub api_key_param: Option<String>,

    /// Per-tool timeout; falls back to the orchestrator default.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// Whether a transient failure may be retried (http tools default to true).
    #[serde(default)]
    pub idempotent: Option<bool>,

    #[serde(default)]
    pub premium_only: bool,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Severity when the tool reports hits.
    #[serde(default)]
    pub hit_severity: Option<Severity>,

    /// Summary with `{tool}`, `{value}` and `{count}` placeholders.
    #[serde(default)]
    pub summary_template: Option<String>,

    /// JSON pointer to the hit count in the raw payload.
    #[serde(default)]
    pub count_pointer: Option<String>,

    /// Treat HTTP 404 as "no records" instead of an error.
    #[serde(default)]
    pub not_found_is_empty: bool,

    /// Minimum spacing between requests, for rate-limited APIs.
    #[serde(default)]
    pub min_interval_ms: u64,

    /// Look up only the domain part of email values.
    #[serde(default)]
    pub email_domain: bool,

    /// Tags added when the tool reports at least one hit.
    #[serde(default)]
    pub hit_tags: Vec<String>,

    /// Plain-text responses are split into lines; lines containing this
    /// (case-insensitive, unless negated with "not") count as hits.
    #[serde(default)]
    pub text_match: Option<String>,

    /// Named URLs fetched together; the payload holds one entry per name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub endpoints: BTreeMap<String, String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// The built-in tool table.
pub fn default_tools() -> Vec<ToolConfig> {
    use EntityType::*;

    vec![
        ToolConfig {
            name: "PhoneInfoga".to_string(),
            category: "phone".to_string(),
            entity_types: vec![Phone],
            kind: ToolKind::Http,
            url: Some("http://phoneinfoga:8080/api/numbers/{value}/scan/local".to_string()),
            timeout_seconds: Some(30),
            tags: strings(&["phone", "phoneinfoga"]),
            summary_template: Some("PhoneInfoga scan for {value}".to_string()),
            ..Default::default()
        },
        ToolConfig {
            name: "NumVerify".to_string(),
            category: "phone".to_string(),
            entity_types: vec![Phone],
            kind: ToolKind::Http,
            url: Some("http://apilayer.net/api/validate?number={value}".to_string()),
            api_key_env: Some("NUMVERIFY_API_KEY".to_string()),
            api_key_param: Some("access_key".to_string()),
            timeout_seconds: Some(15),
            tags: strings(&["phone", "numverify", "carrier"]),
            ..Default::default()
        },
        ToolConfig {
            name: "Holehe".to_string(),
            category: "email".to_string(),
            entity_types: vec![Email],
            kind: ToolKind::Subprocess,
            command: Some("holehe".to_string()),
            args: strings(&["{value}", "--only-used", "--no-color"]),
            output: OutputMode::Lines,
            line_prefix: Some("[+]".to_string()),
            timeout_seconds: Some(120),
            tags: strings(&["email", "holehe", "accounts"]),
            hit_severity: Some(Severity::Medium),
            summary_template: Some("{value} is registered on {count} site(s)".to_string()),
            ..Default::default()
        },
        ToolConfig {
            name: "HaveIBeenPwned".to_string(),
            category: "email".to_string(),
            entity_types: vec![Email],
            kind: ToolKind::Http,
            url: Some(
                "https://haveibeenpwned.com/api/v3/breachedaccount/{value}?truncateResponse=false"
                    .to_string(),
            ),
            api_key_env: Some("HIBP_API_KEY".to_string()),
            api_key_header: Some("hibp-api-key".to_string()),
            timeout_seconds: Some(15),
            premium_only: true,
            tags: strings(&["email", "hibp", "breach"]),
            hit_severity: Some(Severity::High),
            summary_template: Some("HIBP: {value} found in {count} breach(es)".to_string()),
            not_found_is_empty: true,
            min_interval_ms: 1600,
            ..Default::default()
        },
        ToolConfig {
            name: "EmailRep".to_string(),
            category: "email".to_string(),
            entity_types: vec![Email],
            kind: ToolKind::Http,
            url: Some("https://emailrep.io/{value}".to_string()),
            timeout_seconds: Some(15),
            premium_only: true,
            tags: strings(&["email", "reputation"]),
            ..Default::default()
        },
        ToolConfig {
            name: "Sherlock".to_string(),
            category: "username".to_string(),
            entity_types: vec![Username, Social],
            kind: ToolKind::Subprocess,
            command: Some("sherlock".to_string()),
            args: strings(&["{value}", "--print-found", "--no-color", "--timeout", "10"]),
            output: OutputMode::Lines,
            line_prefix: Some("[+]".to_string()),
            timeout_seconds: Some(60),
            tags: strings(&["username", "social", "sherlock"]),
            hit_severity: Some(Severity::Medium),
            summary_template: Some("Found {count} platforms for username {value}".to_string()),
            ..Default::default()
        },
        ToolConfig {
            name: "WHOIS".to_string(),
            category: "network".to_string(),
            entity_types: vec![Domain, Ip],
            kind: ToolKind::Subprocess,
            command: Some("whois".to_string()),
            args: strings(&["{value}"]),
            output: OutputMode::Fields,
            timeout_seconds: Some(30),
            tags: strings(&["domain", "whois", "network"]),
            summary_template: Some("WHOIS record for {value} ({count} fields)".to_string()),
            ..Default::default()
        },
        ToolConfig {
            name: "DNSDumpster".to_string(),
            category: "network".to_string(),
            entity_types: vec![Domain],
            kind: ToolKind::Http,
            timeout_seconds: Some(20),
            tags: strings(&["network", "dns", "enumeration"]),
            summary_template: Some("DNS enumeration for {value}".to_string()),
            endpoints: ["A", "AAAA", "MX", "NS", "TXT", "CNAME", "SOA"]
                .iter()
                .map(|rtype| {
                    (
                        rtype.to_string(),
                        format!("https://dns.google/resolve?name={{value}}&type={}", rtype),
                    )
                })
                .collect(),
            ..Default::default()
        },
        ToolConfig {
            name: "VirusTotal".to_string(),
            category: "network".to_string(),
            entity_types: vec![Email, Domain],
            kind: ToolKind::Http,
            url: Some("https://www.virustotal.com/api/v3/domains/{value}".to_string()),
            api_key_env: Some("VIRUSTOTAL_API_KEY".to_string()),
            api_key_header: Some("x-apikey".to_string()),
            timeout_seconds: Some(20),
            tags: strings(&["network", "virustotal", "reputation"]),
            hit_severity: Some(Severity::High),
            hit_tags: strings(&["malicious"]),
            count_pointer: Some("/data/attributes/last_analysis_stats/malicious".to_string()),
            summary_template: Some(
                "VirusTotal: {count} engine(s) flag {value} as malicious".to_string(),
            ),
            not_found_is_empty: true,
            min_interval_ms: 15000,
            email_domain: true,
            ..Default::default()
        },
        ToolConfig {
            name: "DomainRep".to_string(),
            category: "network".to_string(),
            entity_types: vec![Domain],
            kind: ToolKind::Http,
            timeout_seconds: Some(20),
            premium_only: true,
            tags: strings(&["domain", "reputation"]),
            hit_severity: Some(Severity::High),
            hit_tags: strings(&["blacklisted"]),
            count_pointer: Some("/dnsbl/count".to_string()),
            summary_template: Some("DomainRep: {value} listed on {count} DNSBL(s)".to_string()),
            text_match: Some("listed".to_string()),
            endpoints: BTreeMap::from([
                (
                    "dnsbl".to_string(),
                    "https://api.hackertarget.com/dnsbl/?q={value}".to_string(),
                ),
                (
                    "urlscan".to_string(),
                    "https://urlscan.io/api/v1/search/?q=domain:{value}&size=10".to_string(),
                ),
            ]),
            ..Default::default()
        },
        ToolConfig {
            name: "IP-Geo".to_string(),
            category: "network".to_string(),
            entity_types: vec![Ip],
            kind: ToolKind::Http,
            url: Some(
                "http://ip-api.com/json/{value}?fields=status,message,country,countryCode,regionName,city,isp,org,as,asname,reverse,mobile,proxy,hosting,query"
                    .to_string(),
            ),
            timeout_seconds: Some(10),
            premium_only: true,
            tags: strings(&["network", "geo", "asn", "isp", "ip-api"]),
            min_interval_ms: 1400,
            ..Default::default()
        },
        ToolConfig {
            name: "NameOSINT".to_string(),
            category: "name".to_string(),
            entity_types: vec![Name],
            kind: ToolKind::Http,
            url: Some(
                "https://en.wikipedia.org/w/api.php?action=opensearch&format=json&limit=10&search={value}"
                    .to_string(),
            ),
            timeout_seconds: Some(15),
            premium_only: true,
            tags: strings(&["name", "public-records"]),
            count_pointer: Some("/1".to_string()),
            summary_template: Some("{count} public reference(s) match {value}".to_string()),
            ..Default::default()
        },
        ToolConfig {
            name: "ExifTool".to_string(),
            category: "general".to_string(),
            entity_types: vec![File],
            kind: ToolKind::Subprocess,
            command: Some("exiftool".to_string()),
            args: strings(&["-j", "-n", "{value}"]),
            output: OutputMode::Json,
            timeout_seconds: Some(30),
            tags: strings(&["file", "metadata", "exif"]),
            summary_template: Some("ExifTool metadata extracted from {value}".to_string()),
            ..Default::default()
        },
    ]
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.analysis.model = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.analysis.ollama_url = url.clone();
        }
        if let Some(temperature) = args.temperature {
            self.analysis.temperature = temperature;
        }

        if let Some(workers) = args.workers {
            self.orchestrator.worker_pool = workers;
        }
        if let Some(timeout) = args.timeout {
            self.orchestrator.default_timeout_seconds = timeout;
        }
        if args.premium {
            self.orchestrator.include_premium = true;
        }

        if let Some(ref store) = args.store {
            self.general.store = store.display().to_string();
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
