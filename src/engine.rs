//! Sequential rule application against a JSON document.
//!
//! Rules apply in list order against the same document; each rule
//! observes the cumulative effect of the rules before it. The engine
//! holds no mutable state of its own, so one instance can serve any
//! number of concurrent `apply` calls as long as each call owns its
//! document.

use crate::config::EngineConfig;
use crate::path::{normalize_index, resolve, resolve_segments_mut, IndexMode, Path, Segment};
use crate::rule::{CompiledRule, ConfigError, Op};
use regex::Regex;
use serde_json::Value as JsonValue;
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Body transformation engine: a compiled, immutable rule list.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
}

impl RuleEngine {
    /// Compile an engine from configuration.
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        let rules = config
            .rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Create an engine from a YAML configuration string.
    pub fn from_yaml(yaml: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        Self::new(&config).map_err(EngineError::from)
    }

    /// Create an engine from a JSON configuration string.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        Self::new(&config).map_err(EngineError::from)
    }

    /// The compiled rules, in application order.
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Apply the rule list to a document.
    ///
    /// Returns the mutated document and a per-rule report. A fatal error
    /// aborts the remaining rules; callers that need a fallback to the
    /// original body keep their own copy.
    pub fn apply(&self, document: JsonValue) -> Result<Transformed, ApplyError> {
        let mut document = document;
        let mut report = ApplyReport::default();

        for (index, rule) in self.rules.iter().enumerate() {
            if !rule.enabled {
                trace!(rule = %rule.name, "Rule disabled, skipping");
                report.outcomes.push(RuleOutcome::Skipped(SkipReason::Disabled));
                continue;
            }

            // Cross-cutting guard: protected fields are immune to every
            // operation. One skipped rule never aborts the rest.
            if let Some(field) = rule.protected_target() {
                debug!(rule = %rule.name, field, "Rule targets a protected field, skipping");
                report
                    .outcomes
                    .push(RuleOutcome::Skipped(SkipReason::ProtectedField(field)));
                continue;
            }

            let outcome = apply_op(&mut document, &rule.op).map_err(|source| {
                warn!(rule = %rule.name, error = %source, "Fatal transform error");
                ApplyError::TypeConflict {
                    index,
                    name: rule.name.clone(),
                    source,
                }
            })?;

            match &outcome {
                RuleOutcome::Applied => trace!(rule = %rule.name, "Rule applied"),
                RuleOutcome::Skipped(reason) => {
                    debug!(rule = %rule.name, reason = %reason, "Rule skipped")
                }
            }
            report.outcomes.push(outcome);
        }

        debug!(
            applied = report.applied_count(),
            skipped = report.skipped_count(),
            "Applied rule list"
        );

        Ok(Transformed { document, report })
    }
}

/// Result of applying a rule list.
#[derive(Debug, Clone)]
pub struct Transformed {
    /// The mutated document
    pub document: JsonValue,
    /// Per-rule application report
    pub report: ApplyReport,
}

/// Per-rule application report, in rule-list order.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// One outcome per rule
    pub outcomes: Vec<RuleOutcome>,
}

impl ApplyReport {
    /// Number of rules that ran against the document.
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, RuleOutcome::Applied))
            .count()
    }

    /// Number of rules skipped with a warning.
    pub fn skipped_count(&self) -> usize {
        self.outcomes.len() - self.applied_count()
    }
}

/// Outcome of a single rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The rule ran against the document
    Applied,
    /// The rule was skipped; the document is untouched by it
    Skipped(SkipReason),
}

impl fmt::Display for RuleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleOutcome::Applied => f.write_str("applied"),
            RuleOutcome::Skipped(reason) => write!(f, "skipped ({reason})"),
        }
    }
}

/// Non-fatal reasons a rule is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Rule disabled in configuration
    Disabled,
    /// The rule targets a protected top-level field
    ProtectedField(&'static str),
    /// A path did not resolve to an addressable slot
    PathNotFound,
    /// Insert target is not an array
    NotAnArray,
    /// RegexReplace target is not a string
    NotAString,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Disabled => f.write_str("disabled"),
            SkipReason::ProtectedField(field) => write!(f, "protected field `{field}`"),
            SkipReason::PathNotFound => f.write_str("path not found"),
            SkipReason::NotAnArray => f.write_str("target is not an array"),
            SkipReason::NotAString => f.write_str("target is not a string"),
        }
    }
}

/// Fatal application errors. The remaining rule list is aborted and the
/// caller decides whether to forward the original body or reject.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("rule {index} `{name}`: {source}")]
    TypeConflict {
        index: usize,
        name: String,
        source: TypeConflict,
    },
}

/// A write blocked by an existing value of the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot write `{path}`: value at `{at}` is not {expected}")]
pub struct TypeConflict {
    /// Path being written
    pub path: String,
    /// Where the walk was blocked
    pub at: String,
    /// The container shape the segment requires
    pub expected: &'static str,
}

/// Engine construction errors (configuration text level).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rule error: {0}")]
    Rule(#[from] ConfigError),
}

/// Apply a single operation to the document.
fn apply_op(document: &mut JsonValue, op: &Op) -> Result<RuleOutcome, TypeConflict> {
    match op {
        Op::Set { path, value } => set_value(document, path, value.clone()),
        Op::Drop { path } => Ok(drop_value(document, path)),
        Op::Rename { from, to } => {
            let Some(value) = resolve(document, from).cloned() else {
                return Ok(RuleOutcome::Skipped(SkipReason::PathNotFound));
            };
            // Read, delete, then write, in that order. There is no
            // rollback if the write conflicts.
            drop_value(document, from);
            set_value(document, to, value)
        }
        Op::Insert {
            array_path,
            index,
            value,
        } => Ok(insert_value(document, array_path, *index, value.clone())),
        Op::RegexReplace {
            path,
            regex,
            replacement,
        } => Ok(regex_replace_value(document, path, regex, replacement)),
    }
}

/// Write `value` at `path`, creating missing intermediate objects.
///
/// Auto-creation covers mapping levels only: a missing key whose next
/// segment is an array index leaves nothing to create, so the write is
/// skipped. An existing value of the wrong shape anywhere along the
/// walk is a fatal [`TypeConflict`].
fn set_value(
    document: &mut JsonValue,
    path: &Path,
    value: JsonValue,
) -> Result<RuleOutcome, TypeConflict> {
    let Some((intermediates, last)) = path.split_last() else {
        return Ok(RuleOutcome::Skipped(SkipReason::PathNotFound));
    };

    let mut current = document;
    for (depth, segment) in intermediates.iter().enumerate() {
        match segment {
            Segment::Key(key) => {
                let Some(map) = current.as_object_mut() else {
                    return Err(type_conflict(path, depth, "an object"));
                };
                if !map.contains_key(key.as_str()) {
                    let next = intermediates.get(depth + 1).unwrap_or(last);
                    if matches!(next, Segment::Index(_)) {
                        return Ok(RuleOutcome::Skipped(SkipReason::PathNotFound));
                    }
                }
                current = map
                    .entry(key.clone())
                    .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
            }
            Segment::Index(index) => {
                let Some(array) = current.as_array_mut() else {
                    return Err(type_conflict(path, depth, "an array"));
                };
                let Some(slot) = normalize_index(*index, array.len(), IndexMode::Element) else {
                    return Ok(RuleOutcome::Skipped(SkipReason::PathNotFound));
                };
                current = &mut array[slot];
            }
        }
    }

    match last {
        Segment::Key(key) => {
            let Some(map) = current.as_object_mut() else {
                return Err(type_conflict(path, intermediates.len(), "an object"));
            };
            map.insert(key.clone(), value);
            Ok(RuleOutcome::Applied)
        }
        Segment::Index(index) => {
            let Some(array) = current.as_array_mut() else {
                return Err(type_conflict(path, intermediates.len(), "an array"));
            };
            match normalize_index(*index, array.len(), IndexMode::Element) {
                Some(slot) => {
                    array[slot] = value;
                    Ok(RuleOutcome::Applied)
                }
                None => Ok(RuleOutcome::Skipped(SkipReason::PathNotFound)),
            }
        }
    }
}

/// Remove the value at `path`. Missing paths are a silent no-op.
///
/// Removing an array element shifts the elements after it down by one.
fn drop_value(document: &mut JsonValue, path: &Path) -> RuleOutcome {
    let Some((intermediates, last)) = path.split_last() else {
        return RuleOutcome::Skipped(SkipReason::PathNotFound);
    };
    let Some(parent) = resolve_segments_mut(document, intermediates) else {
        return RuleOutcome::Skipped(SkipReason::PathNotFound);
    };

    match last {
        Segment::Key(key) => match parent.as_object_mut() {
            Some(map) => {
                if map.remove(key.as_str()).is_some() {
                    RuleOutcome::Applied
                } else {
                    RuleOutcome::Skipped(SkipReason::PathNotFound)
                }
            }
            None => RuleOutcome::Skipped(SkipReason::PathNotFound),
        },
        Segment::Index(index) => {
            let Some(array) = parent.as_array_mut() else {
                return RuleOutcome::Skipped(SkipReason::PathNotFound);
            };
            match normalize_index(*index, array.len(), IndexMode::Element) {
                Some(slot) => {
                    array.remove(slot);
                    RuleOutcome::Applied
                }
                None => RuleOutcome::Skipped(SkipReason::PathNotFound),
            }
        }
    }
}

/// Insert into the array at `array_path`; append when `index` is absent.
///
/// A negative index inserts before the Nth-from-end element.
fn insert_value(
    document: &mut JsonValue,
    array_path: &Path,
    index: Option<i64>,
    value: JsonValue,
) -> RuleOutcome {
    let Some(target) = resolve_segments_mut(document, array_path.segments()) else {
        return RuleOutcome::Skipped(SkipReason::PathNotFound);
    };
    let Some(array) = target.as_array_mut() else {
        return RuleOutcome::Skipped(SkipReason::NotAnArray);
    };

    let slot = match index {
        None => array.len(),
        Some(requested) => match normalize_index(requested, array.len(), IndexMode::Insert) {
            Some(slot) => slot,
            None => return RuleOutcome::Skipped(SkipReason::PathNotFound),
        },
    };
    array.insert(slot, value);
    RuleOutcome::Applied
}

/// Globally replace regex matches in the string at `path`.
///
/// `$1`/`${name}` back-references in the replacement expand to capture
/// groups; an empty replacement deletes matched text. Patterns that can
/// match the empty string substitute at every zero-width match position
/// as well, advancing one character after each.
fn regex_replace_value(
    document: &mut JsonValue,
    path: &Path,
    regex: &Regex,
    replacement: &str,
) -> RuleOutcome {
    let Some(target) = resolve_segments_mut(document, path.segments()) else {
        return RuleOutcome::Skipped(SkipReason::PathNotFound);
    };
    let JsonValue::String(text) = target else {
        return RuleOutcome::Skipped(SkipReason::NotAString);
    };

    *text = regex.replace_all(text.as_str(), replacement).into_owned();
    RuleOutcome::Applied
}

fn type_conflict(path: &Path, depth: usize, expected: &'static str) -> TypeConflict {
    let at = if depth == 0 {
        "document root".to_string()
    } else {
        path.prefix(depth).to_string()
    };
    TypeConflict {
        path: path.to_string(),
        at,
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine(yaml: &str) -> RuleEngine {
        RuleEngine::from_yaml(yaml).unwrap()
    }

    fn chat_body() -> JsonValue {
        json!({
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.7,
            "model": "gpt-4o",
            "stream": true
        })
    }

    #[test]
    fn test_set_overwrites_leaf() {
        let engine = engine(
            r#"
rules:
  - type: set
    path: "temperature"
    value: "0.3"
"#,
        );
        let result = engine.apply(chat_body()).unwrap();
        assert_eq!(result.document["temperature"], json!(0.3));
        assert_eq!(result.report.outcomes, vec![RuleOutcome::Applied]);
    }

    #[test]
    fn test_set_auto_creates_mapping_levels() {
        let engine = engine(
            r#"
rules:
  - type: set
    path: "metadata.routing.tier"
    value: "\"fast\""
"#,
        );
        let result = engine.apply(json!({})).unwrap();
        assert_eq!(result.document, json!({"metadata": {"routing": {"tier": "fast"}}}));
    }

    #[test]
    fn test_set_into_existing_array_element() {
        let engine = engine(
            r#"
rules:
  - type: set
    path: "messages[0].name"
    value: "\"caller\""
"#,
        );
        let result = engine.apply(chat_body()).unwrap();
        assert_eq!(result.document["messages"][0]["name"], json!("caller"));
    }

    #[test]
    fn test_set_missing_array_is_not_created() {
        let engine = engine(
            r#"
rules:
  - type: set
    path: "stop[0]"
    value: "\"END\""
"#,
        );
        let result = engine.apply(json!({})).unwrap();
        assert_eq!(result.document, json!({}));
        assert_eq!(
            result.report.outcomes,
            vec![RuleOutcome::Skipped(SkipReason::PathNotFound)]
        );
    }

    #[test]
    fn test_set_out_of_range_index_skips() {
        let engine = engine(
            r#"
rules:
  - type: set
    path: "messages[5]"
    value: "null"
"#,
        );
        let result = engine.apply(chat_body()).unwrap();
        assert_eq!(
            result.report.outcomes,
            vec![RuleOutcome::Skipped(SkipReason::PathNotFound)]
        );
    }

    #[test]
    fn test_set_blocked_by_scalar_is_fatal() {
        let engine = engine(
            r#"
rules:
  - name: "bad"
    type: set
    path: "temperature.nested"
    value: "1"
"#,
        );
        let err = engine.apply(chat_body()).unwrap_err();
        match err {
            ApplyError::TypeConflict { index, name, source } => {
                assert_eq!(index, 0);
                assert_eq!(name, "bad");
                assert_eq!(source.at, "temperature");
                assert_eq!(source.expected, "an object");
            }
        }
    }

    #[test]
    fn test_fatal_error_aborts_remaining_rules() {
        let engine = engine(
            r#"
rules:
  - type: set
    path: "a"
    value: "1"
  - type: set
    path: "a.b"
    value: "2"
  - type: set
    path: "never_reached"
    value: "3"
"#,
        );
        let err = engine.apply(json!({})).unwrap_err();
        assert!(matches!(err, ApplyError::TypeConflict { index: 1, .. }));
    }

    #[test]
    fn test_drop_key_and_missing_is_noop() {
        let engine = engine(
            r#"
rules:
  - type: drop
    path: "temperature"
  - type: drop
    path: "no_such_field"
"#,
        );
        let result = engine.apply(chat_body()).unwrap();
        assert!(result.document.get("temperature").is_none());
        assert_eq!(
            result.report.outcomes,
            vec![
                RuleOutcome::Applied,
                RuleOutcome::Skipped(SkipReason::PathNotFound),
            ]
        );
    }

    #[test]
    fn test_drop_array_element_shifts() {
        let engine = engine(
            r#"
rules:
  - type: drop
    path: "items[0]"
  - type: drop
    path: "items[0]"
"#,
        );
        let result = engine.apply(json!({"items": ["a", "b", "c"]})).unwrap();
        assert_eq!(result.document["items"], json!(["c"]));
    }

    #[test]
    fn test_drop_negative_index() {
        let engine = engine(
            r#"
rules:
  - type: drop
    path: "items[-1]"
"#,
        );
        let result = engine.apply(json!({"items": ["a", "b", "c"]})).unwrap();
        assert_eq!(result.document["items"], json!(["a", "b"]));
    }

    #[test]
    fn test_rename_moves_value() {
        let engine = engine(
            r#"
rules:
  - type: rename
    from: "max_output_tokens"
    to: "max_tokens"
"#,
        );
        let result = engine
            .apply(json!({"max_output_tokens": 1024, "temperature": 0.7}))
            .unwrap();
        assert_eq!(
            result.document,
            json!({"max_tokens": 1024, "temperature": 0.7})
        );
    }

    #[test]
    fn test_rename_missing_from_is_noop() {
        let engine = engine(
            r#"
rules:
  - type: rename
    from: "absent"
    to: "present"
"#,
        );
        let result = engine.apply(json!({"a": 1})).unwrap();
        assert_eq!(result.document, json!({"a": 1}));
        assert_eq!(
            result.report.outcomes,
            vec![RuleOutcome::Skipped(SkipReason::PathNotFound)]
        );
    }

    #[test]
    fn test_rename_auto_creates_destination() {
        let engine = engine(
            r#"
rules:
  - type: rename
    from: "user"
    to: "metadata.user_id"
"#,
        );
        let result = engine.apply(json!({"user": "u-1"})).unwrap();
        assert_eq!(result.document, json!({"metadata": {"user_id": "u-1"}}));
    }

    #[test]
    fn test_insert_appends_without_index() {
        let engine = engine(
            r#"
rules:
  - type: insert
    arrayPath: "items"
    value: "\"d\""
"#,
        );
        let result = engine.apply(json!({"items": ["a", "b", "c"]})).unwrap();
        assert_eq!(result.document["items"], json!(["a", "b", "c", "d"]));
    }

    #[test]
    fn test_insert_at_index_and_negative() {
        let engine = engine(
            r#"
rules:
  - type: insert
    arrayPath: "items"
    index: 0
    value: "\"start\""
  - type: insert
    arrayPath: "items"
    index: -1
    value: "\"before-last\""
"#,
        );
        let result = engine.apply(json!({"items": ["a", "b"]})).unwrap();
        assert_eq!(
            result.document["items"],
            json!(["start", "a", "before-last", "b"])
        );
    }

    #[test]
    fn test_insert_non_array_target() {
        let engine = engine(
            r#"
rules:
  - type: insert
    arrayPath: "temperature"
    value: "1"
"#,
        );
        let result = engine.apply(chat_body()).unwrap();
        assert_eq!(
            result.report.outcomes,
            vec![RuleOutcome::Skipped(SkipReason::NotAnArray)]
        );
    }

    #[test]
    fn test_insert_out_of_range_index() {
        let engine = engine(
            r#"
rules:
  - type: insert
    arrayPath: "items"
    index: 5
    value: "1"
"#,
        );
        let result = engine.apply(json!({"items": []})).unwrap();
        assert_eq!(
            result.report.outcomes,
            vec![RuleOutcome::Skipped(SkipReason::PathNotFound)]
        );
    }

    #[test]
    fn test_regex_replace_with_backrefs() {
        let engine = engine(
            r#"
rules:
  - type: regex_replace
    path: "user"
    pattern: "(\\w+)@example\\.com"
    replacement: "$1@redacted"
"#,
        );
        let result = engine.apply(json!({"user": "bob@example.com"})).unwrap();
        assert_eq!(result.document["user"], json!("bob@redacted"));
    }

    #[test]
    fn test_regex_replace_case_insensitive_flag() {
        let engine = engine(
            r#"
rules:
  - type: regex_replace
    path: "content"
    pattern: "hello"
    replacement: "goodbye"
    flags: "i"
"#,
        );
        let result = engine.apply(json!({"content": "Hello World"})).unwrap();
        assert_eq!(result.document["content"], json!("goodbye World"));
    }

    #[test]
    fn test_regex_replace_non_string_target() {
        let engine = engine(
            r#"
rules:
  - type: regex_replace
    path: "temperature"
    pattern: "7"
    replacement: "9"
"#,
        );
        let result = engine.apply(chat_body()).unwrap();
        assert_eq!(
            result.report.outcomes,
            vec![RuleOutcome::Skipped(SkipReason::NotAString)]
        );
        assert_eq!(result.document["temperature"], json!(0.7));
    }

    #[test]
    fn test_regex_replace_zero_width_matches() {
        let engine = engine(
            r#"
rules:
  - type: regex_replace
    path: "content"
    pattern: "x*"
    replacement: "-"
"#,
        );
        let result = engine.apply(json!({"content": "abc"})).unwrap();
        assert_eq!(result.document["content"], json!("-a-b-c-"));
    }

    #[test]
    fn test_protected_fields_skip_every_operation() {
        let engine = engine(
            r#"
rules:
  - type: set
    path: "model"
    value: "\"other-model\""
  - type: drop
    path: "stream"
  - type: rename
    from: "model"
    to: "model_name"
  - type: rename
    from: "alias"
    to: "model"
  - type: insert
    arrayPath: "model"
    value: "1"
  - type: regex_replace
    path: "model"
    pattern: "gpt"
    replacement: "x"
  - type: drop
    path: "model.suffix"
"#,
        );
        let before = chat_body();
        let result = engine.apply(before.clone()).unwrap();

        assert_eq!(result.document["model"], before["model"]);
        assert_eq!(result.document["stream"], before["stream"]);
        assert_eq!(result.report.applied_count(), 0);
        for outcome in &result.report.outcomes {
            assert!(matches!(
                outcome,
                RuleOutcome::Skipped(SkipReason::ProtectedField(_))
            ));
        }
    }

    #[test]
    fn test_disabled_rule_is_reported() {
        let engine = engine(
            r#"
rules:
  - enabled: false
    type: drop
    path: "temperature"
"#,
        );
        let result = engine.apply(chat_body()).unwrap();
        assert_eq!(result.document["temperature"], json!(0.7));
        assert_eq!(
            result.report.outcomes,
            vec![RuleOutcome::Skipped(SkipReason::Disabled)]
        );
    }

    #[test]
    fn test_later_rules_observe_earlier_effects() {
        let engine = engine(
            r#"
rules:
  - type: set
    path: "metadata.tags"
    value: "[]"
  - type: insert
    arrayPath: "metadata.tags"
    value: "\"transformed\""
"#,
        );
        let result = engine.apply(json!({})).unwrap();
        assert_eq!(result.document, json!({"metadata": {"tags": ["transformed"]}}));
        assert_eq!(result.report.applied_count(), 2);
    }

    #[test]
    fn test_report_counts() {
        let engine = engine(
            r#"
rules:
  - type: set
    path: "a"
    value: "1"
  - type: drop
    path: "missing"
  - type: drop
    path: "model"
"#,
        );
        let result = engine.apply(json!({})).unwrap();
        assert_eq!(result.report.applied_count(), 1);
        assert_eq!(result.report.skipped_count(), 2);
    }
}
