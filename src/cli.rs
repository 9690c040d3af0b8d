//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::EntityType;
use clap::Parser;
use std::path::PathBuf;
use uuid::Uuid;

/// Valkyrie - OSINT run orchestration and pattern synthesis
///
/// Dispatch a project's entities to the OSINT tools that apply to them,
/// collect normalized findings, and let a local LLM synthesize patterns
/// across everything found. Markdown/JSON reports.
///
/// Examples:
///   valkyrie --new-project "Acme" --add-entity domain=acme.com --add-entity email=ceo@acme.com
///   valkyrie --project <ID> --analyze
///   valkyrie --project <ID> --skip-run --analyze --format json
///   valkyrie --entity <ID> --premium
///   valkyrie --list-tools
///   valkyrie --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Workspace file holding projects, entities, findings and patterns
    ///
    /// Defaults to the `store` setting in .valkyrie.toml (valkyrie.json).
    #[arg(short, long, value_name = "FILE")]
    pub store: Option<PathBuf>,

    /// Project to run and report on
    #[arg(short, long, value_name = "ID", conflicts_with = "new_project")]
    pub project: Option<Uuid>,

    /// Create a new project with this name and use it
    #[arg(long, value_name = "NAME")]
    pub new_project: Option<String>,

    /// Add an entity to the project before running (repeatable)
    ///
    /// Example: --add-entity ip=8.8.8.8 --add-entity username=jdoe
    #[arg(long = "add-entity", value_name = "TYPE=VALUE", value_parser = parse_entity_spec)]
    pub add_entity: Vec<EntitySpec>,

    /// Run a single entity instead of the whole project
    #[arg(short, long, value_name = "ID")]
    pub entity: Option<Uuid>,

    /// Synthesize patterns with the LLM after the run
    #[arg(short, long)]
    pub analyze: bool,

    /// Skip running tools (report or analyze existing findings only)
    #[arg(long)]
    pub skip_run: bool,

    /// List the registered tools and exit
    #[arg(long)]
    pub list_tools: bool,

    /// Also run premium-only tools
    #[arg(long)]
    pub premium: bool,

    /// Number of entities run at the same time
    #[arg(short, long, value_name = "NUM")]
    pub workers: Option<usize>,

    /// Default per-tool timeout in seconds
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Ollama model used for pattern synthesis
    ///
    /// Can also be set via VALKYRIE_MODEL env var or .valkyrie.toml config.
    #[arg(short, long, env = "VALKYRIE_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL", value_name = "URL")]
    pub ollama_url: Option<String>,

    /// Temperature for LLM responses (0.0 - 1.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Output file path for the report
    ///
    /// Defaults to the `output` setting in .valkyrie.toml.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .valkyrie.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .valkyrie.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// An entity given on the command line as `type=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySpec {
    pub entity_type: EntityType,
    pub value: String,
}

fn parse_entity_spec(s: &str) -> Result<EntitySpec, String> {
    let (kind, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected TYPE=VALUE, got '{}'", s))?;

    let entity_type: EntityType = kind.parse()?;
    let value = value.trim().to_string();
    entity_type.validate_value(&value)?;

    Ok(EntitySpec { entity_type, value })
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Nothing else matters for these
        if self.init_config || self.list_tools {
            return Ok(());
        }

        if self.project.is_none() && self.new_project.is_none() && self.entity.is_none() {
            return Err("One of --project, --new-project or --entity is required".to_string());
        }

        if self.entity.is_some() && !self.add_entity.is_empty() {
            return Err("--add-entity cannot be combined with --entity".to_string());
        }

        if self.skip_run && !self.analyze && self.entity.is_some() {
            return Err("--skip-run with --entity does nothing without --analyze".to_string());
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=1.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 1.0".to_string());
            }
        }

        if self.workers == Some(0) {
            return Err("Workers must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            store: None,
            project: Some(Uuid::new_v4()),
            new_project: None,
            add_entity: Vec::new(),
            entity: None,
            analyze: false,
            skip_run: false,
            list_tools: false,
            premium: false,
            workers: None,
            timeout: None,
            model: None,
            ollama_url: None,
            temperature: None,
            format: OutputFormat::Markdown,
            output: None,
            config: None,
            verbose: false,
            quiet: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_entity_spec() {
        let spec = parse_entity_spec("ip=8.8.8.8").unwrap();
        assert_eq!(spec.entity_type, EntityType::Ip);
        assert_eq!(spec.value, "8.8.8.8");

        let spec = parse_entity_spec("name=Jane Doe").unwrap();
        assert_eq!(spec.value, "Jane Doe");

        assert!(parse_entity_spec("8.8.8.8").is_err());
        assert!(parse_entity_spec("vehicle=abc").is_err());
        assert!(parse_entity_spec("ip=not-an-ip").is_err());
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::try_parse_from([
            "valkyrie",
            "--new-project",
            "Acme",
            "--add-entity",
            "domain=acme.com",
            "--add-entity",
            "email=ceo@acme.com",
            "--analyze",
            "--workers",
            "2",
        ])
        .unwrap();

        assert_eq!(args.new_project.as_deref(), Some("Acme"));
        assert_eq!(args.add_entity.len(), 2);
        assert!(args.analyze);
        assert_eq!(args.workers, Some(2));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_requires_target() {
        let mut args = make_args();
        args.project = None;
        assert!(args.validate().is_err());

        args.list_tools = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_values() {
        let mut args = make_args();
        args.temperature = Some(1.5);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.workers = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.ollama_url = Some("localhost:11434".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
