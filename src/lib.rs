//! Request-body transformation engine for the AIGW gateway.
//!
//! Applies an ordered list of declarative mutations to a JSON request
//! body before it is forwarded to an upstream provider:
//!
//! - `set` — write a value at a path, creating intermediate objects
//! - `drop` — remove a mapping key or array element
//! - `rename` — move a value between paths
//! - `insert` — splice a value into an array
//! - `regex_replace` — globally rewrite a string value
//!
//! Paths use a dotted/bracketed grammar (`messages[0].content`,
//! `tags[-1]`, `a\.b` for a literal dot in a key). The top-level
//! `model` and `stream` fields are protected: rules addressing them are
//! skipped and reported, never applied.
//!
//! Rules are compiled once from configuration; every malformed path,
//! value, or regex is rejected at that point. Applying the compiled
//! list is a pure, synchronous transformation, safe to run from any
//! number of in-flight requests at once.
//!
//! ## Configuration example
//!
//! ```yaml
//! version: "1"
//! rules:
//!   - name: "inject-system-prompt"
//!     type: insert
//!     arrayPath: "messages"
//!     index: 0
//!     value: '{"role": "system", "content": "You are a helpful assistant."}'
//!   - name: "clamp-temperature"
//!     type: set
//!     path: "temperature"
//!     value: "0.3"
//! ```

pub mod config;
pub mod engine;
pub mod path;
pub mod rule;

pub use config::{EngineConfig, OpConfig, RuleConfig, Settings};
pub use engine::{
    ApplyError, ApplyReport, EngineError, RuleEngine, RuleOutcome, SkipReason, Transformed,
    TypeConflict,
};
pub use path::{Path, PathError};
pub use rule::{CompiledRule, ConfigError, PROTECTED_FIELDS};
