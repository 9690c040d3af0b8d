//! Tools backed by a local command-line collector.

use super::{substitute, ToolAdapter, ToolDescriptor, ToolHints};
use crate::config::OutputMode;
use crate::error::ToolError;
use crate::models::FindingPayload;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Longest stderr excerpt carried into an error message.
const STDERR_EXCERPT: usize = 200;

/// Longest key accepted in `fields` output; longer ones are prose.
const MAX_FIELD_KEY: usize = 40;

/// Field keys naming the owning organization, most specific first.
const ORG_KEYS: &[&str] = &[
    "registrant_organization",
    "registrant_org",
    "orgname",
    "org_name",
    "organization",
    "org",
    "owner",
];

/// Field keys naming the owner's country.
const COUNTRY_KEYS: &[&str] = &["registrant_country", "country"];

/// A collector run as a child process, e.g. `sherlock` or `exiftool`.
///
/// The entity value is passed as a discrete argument, never through a
/// shell. The child is killed if the invocation is dropped, which is how
/// an orchestrator-side timeout terminates it.
pub struct SubprocessTool {
    descriptor: ToolDescriptor,
    command: String,
    args: Vec<String>,
    output: OutputMode,
    line_prefix: Option<String>,
    hints: ToolHints,
}

impl SubprocessTool {
    pub fn new(
        descriptor: ToolDescriptor,
        command: impl Into<String>,
        args: Vec<String>,
        output: OutputMode,
    ) -> Self {
        Self {
            descriptor,
            command: command.into(),
            args,
            output,
            line_prefix: None,
            hints: ToolHints::default(),
        }
    }

    pub fn with_line_prefix(mut self, prefix: Option<String>) -> Self {
        self.line_prefix = prefix;
        self
    }

    pub fn with_hints(mut self, hints: ToolHints) -> Self {
        self.hints = hints;
        self
    }

    /// Turn captured stdout into a raw payload.
    fn parse_stdout(&self, stdout: &str) -> Result<Value, ToolError> {
        match self.output {
            OutputMode::Json => serde_json::from_str(stdout.trim()).map_err(|e| {
                ToolError::ExternalError(format!("{} produced invalid JSON: {}", self.command, e))
            }),
            OutputMode::Lines => {
                let matches: Vec<String> = stdout
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .filter_map(|line| match self.line_prefix {
                        Some(ref prefix) => line.strip_prefix(prefix.as_str()).map(str::trim),
                        None => Some(line),
                    })
                    .map(String::from)
                    .collect();
                let count = matches.len();
                Ok(json!({ "matches": matches, "count": count }))
            }
            OutputMode::Fields => Ok(parse_fields(stdout)),
        }
    }
}

/// Collect `Key: Value` lines into a payload.
///
/// Keys are lowercased with punctuation folded to `_`, so `Registrant
/// Email` becomes `registrant_email`. Repeated keys keep every distinct
/// value. The well-known `registrar`, `org`, `emails` and `country_code`
/// fields are lifted to the top level.
pub fn parse_fields(stdout: &str) -> Value {
    let mut fields: Vec<(String, Vec<String>)> = Vec::new();

    for line in stdout.lines().map(str::trim) {
        if line.is_empty() || line.starts_with(['%', '#', '>']) {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (normalize_key(key), value.trim());
        if key.is_empty()
            || key.len() > MAX_FIELD_KEY
            || key.starts_with("http")
            || value.is_empty()
        {
            continue;
        }

        match fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => {
                if !values.iter().any(|v| v == value) {
                    values.push(value.to_string());
                }
            }
            None => fields.push((key, vec![value.to_string()])),
        }
    }

    let first = |keys: &[&str]| {
        keys.iter().find_map(|key| {
            fields
                .iter()
                .find(|(k, _)| k == key)
                .and_then(|(_, values)| values.first().cloned())
        })
    };

    let mut raw = Map::new();
    if let Some(registrar) = first(&["registrar"]) {
        raw.insert("registrar".to_string(), json!(registrar));
    }
    if let Some(org) = first(ORG_KEYS) {
        raw.insert("org".to_string(), json!(org));
    }
    let country = first(COUNTRY_KEYS)
        .filter(|c| c.len() == 2 && c.chars().all(|ch| ch.is_ascii_alphabetic()));
    if let Some(country) = country {
        raw.insert("country_code".to_string(), json!(country.to_uppercase()));
    }

    // Abuse desks are shared by every customer of a registrar or ISP.
    let emails: BTreeSet<String> = fields
        .iter()
        .filter(|(k, _)| k.contains("email") && !k.contains("abuse"))
        .flat_map(|(_, values)| values.iter())
        .filter(|v| v.contains('@') && !v.contains(' '))
        .map(|v| v.to_lowercase())
        .collect();
    if !emails.is_empty() {
        raw.insert("emails".to_string(), json!(emails));
    }

    raw.insert("count".to_string(), json!(fields.len()));
    let fields: Map<String, Value> = fields
        .into_iter()
        .map(|(k, mut values)| {
            let value = if values.len() == 1 {
                Value::String(values.remove(0))
            } else {
                json!(values)
            };
            (k, value)
        })
        .collect();
    raw.insert("fields".to_string(), Value::Object(fields));

    Value::Object(raw)
}

fn normalize_key(key: &str) -> String {
    key.trim()
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

#[async_trait]
impl ToolAdapter for SubprocessTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn run(&self, value: &str, timeout: Duration) -> Result<FindingPayload, ToolError> {
        let value = value.trim();
        if value.starts_with('-') {
            return Err(ToolError::InvalidInput(format!(
                "'{}' would be read as a command-line option",
                value
            )));
        }

        let args: Vec<String> = self.args.iter().map(|a| substitute(a, value)).collect();
        debug!("Spawning {} {:?}", self.command, args);

        let child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ToolError::Unavailable(format!("{} binary not found", self.command))
                } else {
                    ToolError::Unavailable(format!("failed to start {}: {}", self.command, e))
                }
            })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::Timeout(timeout))?
            .map_err(|e| ToolError::ExternalError(format!("{} failed: {}", self.command, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() && stdout.trim().is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT).collect();
            return Err(ToolError::ExternalError(format!(
                "{} exited with {}: {}",
                self.command, output.status, excerpt
            )));
        }

        let raw = self.parse_stdout(&stdout)?;
        Ok(self.hints.apply(&self.descriptor.name, value, raw))
    }
}
