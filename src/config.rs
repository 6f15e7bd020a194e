//! Configuration types for the body transform engine.

use serde::{Deserialize, Serialize};

/// Main configuration for one endpoint's rule list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Configuration version
    pub version: String,
    /// Global settings
    pub settings: Settings,
    /// Transformation rules (applied in order)
    pub rules: Vec<RuleConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            settings: Settings::default(),
            rules: vec![],
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum body size to buffer for transformation (bytes)
    pub max_body_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// A transformation rule as authored in the admin UI.
///
/// The operation payload is flattened, so the wire shape is a single
/// object discriminated by `type`:
/// `{"type": "set", "path": "temperature", "value": "0.3"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Rule name (for logging/debugging)
    #[serde(default)]
    pub name: String,
    /// Whether the rule is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// The operation to apply
    #[serde(flatten)]
    pub op: OpConfig,
}

fn default_true() -> bool {
    true
}

/// One declarative mutation.
///
/// All `value` fields carry JSON text; the text is validated when the
/// rule is compiled, so invalid JSON is rejected at save time rather
/// than while a request is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpConfig {
    /// Write a value at a path, creating intermediate objects
    Set { path: String, value: String },
    /// Remove the value at a path
    Drop { path: String },
    /// Move a value from one path to another
    Rename { from: String, to: String },
    /// Splice a value into an array; append when `index` is absent
    Insert {
        #[serde(rename = "arrayPath")]
        array_path: String,
        #[serde(default)]
        index: Option<i64>,
        value: String,
    },
    /// Globally replace regex matches inside a string value
    RegexReplace {
        path: String,
        pattern: String,
        replacement: String,
        #[serde(default)]
        flags: String,
    },
}
