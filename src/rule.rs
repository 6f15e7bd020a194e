//! Rule compilation.
//!
//! Configuration rules are compiled once when a rule list is saved or
//! loaded: path strings are parsed, `value` JSON text is parsed, and
//! regex patterns are built with their flags. Everything malformed is a
//! [`ConfigError`] here; compiled rules are immutable and nothing
//! invalid survives to request time.

use crate::config::{OpConfig, RuleConfig};
use crate::path::{Path, PathError};
use regex::{Regex, RegexBuilder};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Top-level fields no rule may create, modify, or delete.
pub const PROTECTED_FIELDS: &[&str] = &["model", "stream"];

/// A rule in its ready-to-apply form.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// Rule name (for logging)
    pub name: String,
    /// Whether the rule is enabled
    pub enabled: bool,
    /// Compiled operation
    pub op: Op,
}

/// Compiled operation.
#[derive(Debug, Clone)]
pub enum Op {
    Set {
        path: Path,
        value: JsonValue,
    },
    Drop {
        path: Path,
    },
    Rename {
        from: Path,
        to: Path,
    },
    Insert {
        array_path: Path,
        index: Option<i64>,
        value: JsonValue,
    },
    RegexReplace {
        path: Path,
        regex: Regex,
        replacement: String,
    },
}

/// Errors surfaced when a rule configuration is compiled.
///
/// The admin UI reports these inline at save time, so an invalid rule
/// is never persisted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field} `{text}`: {source}")]
    Path {
        field: &'static str,
        text: String,
        source: PathError,
    },

    #[error("invalid value JSON `{text}`: {source}")]
    ValueJson {
        text: String,
        source: serde_json::Error,
    },

    #[error("invalid regex pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("unknown regex flag `{0}`")]
    UnknownRegexFlag(char),
}

impl CompiledRule {
    /// Compile a rule from its configuration form.
    pub fn compile(config: &RuleConfig) -> Result<Self, ConfigError> {
        let op = match &config.op {
            OpConfig::Set { path, value } => Op::Set {
                path: parse_path(path, "path")?,
                value: parse_value(value)?,
            },
            OpConfig::Drop { path } => Op::Drop {
                path: parse_path(path, "path")?,
            },
            OpConfig::Rename { from, to } => Op::Rename {
                from: parse_path(from, "from")?,
                to: parse_path(to, "to")?,
            },
            OpConfig::Insert {
                array_path,
                index,
                value,
            } => Op::Insert {
                array_path: parse_path(array_path, "arrayPath")?,
                index: *index,
                value: parse_value(value)?,
            },
            OpConfig::RegexReplace {
                path,
                pattern,
                replacement,
                flags,
            } => Op::RegexReplace {
                path: parse_path(path, "path")?,
                regex: compile_regex(pattern, flags)?,
                replacement: replacement.clone(),
            },
        };

        Ok(Self {
            name: config.name.clone(),
            enabled: config.enabled,
            op,
        })
    }

    /// The protected top-level field this rule targets, if any.
    ///
    /// Every path the rule addresses is inspected; a Rename counts as
    /// targeting a protected field when either endpoint does, since
    /// skipping only the write would still delete `from`.
    pub fn protected_target(&self) -> Option<&'static str> {
        match &self.op {
            Op::Set { path, .. } | Op::Drop { path } | Op::RegexReplace { path, .. } => {
                protected_root(path)
            }
            Op::Insert { array_path, .. } => protected_root(array_path),
            Op::Rename { from, to } => protected_root(from).or_else(|| protected_root(to)),
        }
    }
}

fn protected_root(path: &Path) -> Option<&'static str> {
    let root = path.root_key()?;
    PROTECTED_FIELDS.iter().find(|field| **field == root).copied()
}

fn parse_path(text: &str, field: &'static str) -> Result<Path, ConfigError> {
    Path::parse(text).map_err(|source| ConfigError::Path {
        field,
        text: text.to_string(),
        source,
    })
}

fn parse_value(text: &str) -> Result<JsonValue, ConfigError> {
    serde_json::from_str(text).map_err(|source| ConfigError::ValueJson {
        text: text.to_string(),
        source,
    })
}

fn compile_regex(pattern: &str, flags: &str) -> Result<Regex, ConfigError> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            'U' => builder.swap_greed(true),
            other => return Err(ConfigError::UnknownRegexFlag(other)),
        };
    }
    builder.build().map_err(ConfigError::Regex)
}
