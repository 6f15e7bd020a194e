//! Path grammar and resolution over JSON documents.
//!
//! A path addresses one slot in a JSON value as a flat sequence of
//! segments. The string grammar:
//!
//! - `.` separates mapping-key segments: `metadata.user.id`
//! - `[N]` is an array index segment; `N` may be negative and counts
//!   from the end (`[-1]` is the last element): `messages[0].content`
//! - `\.` escapes a literal dot inside a key name (a backslash escapes
//!   whatever character follows it, so `\[` and `\\` work the same way)
//!
//! Parsing is total: every input string maps to exactly one [`Path`] or
//! a [`PathError`]. Malformed paths are rejected when configuration is
//! compiled, never during request processing.

use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One step into a JSON document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Mapping key.
    Key(String),
    /// Array index; negative counts from the end.
    Index(i64),
}

/// Parsed address into a JSON document.
///
/// Always holds at least one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    segments: Vec<Segment>,
}

/// Path parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty path")]
    Empty,

    #[error("empty segment at offset {0}")]
    EmptySegment(usize),

    #[error("invalid array index `{0}`")]
    InvalidIndex(String),

    #[error("unterminated `[` index")]
    UnterminatedIndex,

    #[error("dangling escape at end of path")]
    DanglingEscape,

    #[error("unexpected `{ch}` at offset {pos}")]
    UnexpectedChar { ch: char, pos: usize },
}

impl Path {
    /// Parse a path string.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        if input.is_empty() {
            return Err(PathError::Empty);
        }

        let chars: Vec<char> = input.chars().collect();
        let n = chars.len();
        let mut segments = Vec::new();
        let mut i = 0;
        // A `[` may open a segment at the start of the path (array-root
        // documents) and after a previous segment, but not after a `.`,
        // which must introduce a key.
        let mut allow_index = true;

        loop {
            if i >= n {
                // Only reachable after a trailing `.` separator.
                return Err(PathError::EmptySegment(i));
            }

            if chars[i] == '[' {
                if !allow_index {
                    return Err(PathError::EmptySegment(i));
                }
                i += 1;
                let start = i;
                while i < n && chars[i] != ']' {
                    i += 1;
                }
                if i >= n {
                    return Err(PathError::UnterminatedIndex);
                }
                let text: String = chars[start..i].iter().collect();
                let index: i64 = text.parse().map_err(|_| PathError::InvalidIndex(text))?;
                segments.push(Segment::Index(index));
                i += 1;
            } else {
                let start = i;
                let mut key = String::new();
                while i < n && chars[i] != '.' && chars[i] != '[' {
                    if chars[i] == '\\' {
                        i += 1;
                        match chars.get(i) {
                            Some(&c) => key.push(c),
                            None => return Err(PathError::DanglingEscape),
                        }
                    } else {
                        key.push(chars[i]);
                    }
                    i += 1;
                }
                if key.is_empty() {
                    return Err(PathError::EmptySegment(start));
                }
                segments.push(Segment::Key(key));
            }

            if i >= n {
                break;
            }
            match chars[i] {
                '.' => {
                    i += 1;
                    allow_index = false;
                }
                '[' => {
                    allow_index = true;
                }
                ch => return Err(PathError::UnexpectedChar { ch, pos: i }),
            }
        }

        Ok(Self { segments })
    }

    /// The segments of this path, in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The key name of the leading segment, if it is a mapping key.
    ///
    /// This is what the protected-field guard inspects.
    pub fn root_key(&self) -> Option<&str> {
        match self.segments.first() {
            Some(Segment::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// Leading segments plus the final addressable segment.
    pub fn split_last(&self) -> Option<(&[Segment], &Segment)> {
        self.segments.split_last().map(|(last, init)| (init, last))
    }

    /// The first `count` segments as a new path (for error reporting).
    pub(crate) fn prefix(&self, count: usize) -> Path {
        Path {
            segments: self.segments[..count].to_vec(),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    for c in key.chars() {
                        if matches!(c, '\\' | '.' | '[') {
                            write!(f, "\\")?;
                        }
                        write!(f, "{c}")?;
                    }
                }
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Bounds policy for [`normalize_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Addressing an existing element: valid slots are `0..len`.
    Element,
    /// Choosing an insertion point: valid slots are `0..=len`
    /// (append-at-len allowed).
    Insert,
}

/// Normalize a possibly-negative index against an array length.
///
/// Negative indices count from the end (`-1` is `len - 1`). This is the
/// single bounds routine shared by resolution, Set, Drop, and Insert;
/// the two modes differ only in whether the slot one past the end is
/// addressable.
pub fn normalize_index(index: i64, len: usize, mode: IndexMode) -> Option<usize> {
    let len = len as i64;
    let normalized = if index < 0 { len + index } else { index };
    let upper = match mode {
        IndexMode::Element => len - 1,
        IndexMode::Insert => len,
    };
    if normalized < 0 || normalized > upper {
        return None;
    }
    Some(normalized as usize)
}

/// Resolve a path to a read-only reference into a document.
///
/// A key segment on a non-object, an index segment on a non-array, and
/// an out-of-range index all resolve to `None`.
pub fn resolve<'a>(document: &'a JsonValue, path: &Path) -> Option<&'a JsonValue> {
    let mut current = document;
    for segment in path.segments() {
        current = step(current, segment)?;
    }
    Some(current)
}

fn step<'a>(value: &'a JsonValue, segment: &Segment) -> Option<&'a JsonValue> {
    match segment {
        Segment::Key(key) => value.as_object()?.get(key.as_str()),
        Segment::Index(index) => {
            let array = value.as_array()?;
            let slot = normalize_index(*index, array.len(), IndexMode::Element)?;
            Some(&array[slot])
        }
    }
}

/// Walk a segment slice to a mutable reference into a document.
pub(crate) fn resolve_segments_mut<'a>(
    document: &'a mut JsonValue,
    segments: &[Segment],
) -> Option<&'a mut JsonValue> {
    let mut current = document;
    for segment in segments {
        current = match segment {
            Segment::Key(key) => current.as_object_mut()?.get_mut(key.as_str())?,
            Segment::Index(index) => {
                let array = current.as_array_mut()?;
                let slot = normalize_index(*index, array.len(), IndexMode::Element)?;
                &mut array[slot]
            }
        };
    }
    Some(current)
}
