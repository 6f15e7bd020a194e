//! AIGW body transform CLI entry point.
//!
//! Operator tool for the gateway's request-body rule engine: validates
//! rule configurations and dry-runs them against sample JSON bodies.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use aigw_body_transform::{EngineConfig, RuleEngine};

#[derive(Parser, Debug)]
#[command(name = "aigw-body-transform")]
#[command(
    author,
    version,
    about = "Request-body transformation engine for AIGW"
)]
struct Args {
    /// Configuration file path (YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON body file to transform (reads stdin when omitted)
    #[arg(short, long)]
    body: Option<PathBuf>,

    /// Print the per-rule application report to stderr
    #[arg(long)]
    report: bool,

    /// Pretty-print the transformed body
    #[arg(long)]
    pretty: bool,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "AIGW_TRANSFORM_LOG")]
    log_level: String,

    /// Print example configuration and exit.
    #[arg(long)]
    example_config: bool,

    /// Validate configuration and exit.
    #[arg(long)]
    validate: bool,
}

fn print_example_config() {
    let example = r#"# AIGW Body Transform Configuration Example
version: "1"

settings:
  # Maximum body size to buffer for transformation (bytes)
  max_body_size: 10485760  # 10MB

# Rules apply in order; later rules observe earlier rules' effects.
# The top-level `model` and `stream` fields are protected and cannot
# be touched by any rule.
rules:
  # Prepend a system prompt to the messages array
  - name: "inject-system-prompt"
    type: insert
    arrayPath: "messages"
    index: 0
    value: '{"role": "system", "content": "You are a helpful assistant."}'

  # Pin the sampling temperature
  - name: "clamp-temperature"
    type: set
    path: "temperature"
    value: "0.3"

  # Strip client-side fields the upstream rejects
  - name: "drop-client-metadata"
    type: drop
    path: "metadata.client"

  # This upstream expects max_tokens
  - name: "rename-token-limit"
    type: rename
    from: "max_output_tokens"
    to: "max_tokens"

  # Scrub phone numbers from the latest user message
  - name: "scrub-phone-numbers"
    type: regex_replace
    path: "messages[-1].content"
    pattern: '\d{3}-\d{4}'
    replacement: ""
"#;
    println!("{}", example);
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }

    // Print example config if requested
    if args.example_config {
        print_example_config();
        return Ok(());
    }

    // Load configuration
    let config: EngineConfig = if let Some(config_path) = &args.config {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        if config_path
            .extension()
            .is_some_and(|e| e == "yaml" || e == "yml")
        {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        }
    } else {
        EngineConfig::default()
    };

    let max_body_size = config.settings.max_body_size;
    let engine = RuleEngine::new(&config).context("Invalid rule configuration")?;

    if args.validate {
        info!(rules = engine.rules().len(), "Configuration is valid");
        return Ok(());
    }

    // Read the body to transform
    let raw = match &args.body {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("Failed to read body file: {}", path.display()))?,
        None => {
            let mut buffer = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buffer)
                .context("Failed to read body from stdin")?;
            buffer
        }
    };
    anyhow::ensure!(
        raw.len() <= max_body_size,
        "Body of {} bytes exceeds max_body_size ({})",
        raw.len(),
        max_body_size
    );

    let document: serde_json::Value =
        serde_json::from_slice(&raw).context("Body is not valid JSON")?;

    let transformed = engine.apply(document).context("Transformation failed")?;

    if args.report {
        for (index, outcome) in transformed.report.outcomes.iter().enumerate() {
            let name = &engine.rules()[index].name;
            eprintln!("rule {index} ({name}): {outcome}");
        }
    }

    let output = if args.pretty {
        serde_json::to_string_pretty(&transformed.document)?
    } else {
        serde_json::to_string(&transformed.document)?
    };
    println!("{output}");

    Ok(())
}
