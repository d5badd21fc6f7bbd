//! Structured identity of configuration elements
//!
//! A [ConfigId] names one element, including the chain of parents it is nested in. The canonical string form joins
//! segments with `/` where each segment is `pid`, optionally followed by `(tag)` and `[id]`:
//!
//! ```text
//! com.example.host[one]/com.example.port(port)[default-0]
//! ```
//!
//! Inside `[...]` a `]` or `\` of the id is escaped with `\`. Parsing is bracket-aware, so an id may contain `/`.
use serde::Serializer;
use std::fmt::{self, Formatter};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigId {
    parent: Option<Arc<ConfigId>>,
    pid: String,
    id: Option<String>,
    tag: Option<String>,
}

impl ConfigId {
    /// Identity of a top-level element
    pub fn new(pid: impl Into<String>, id: Option<String>) -> Self {
        Self {
            parent: None,
            pid: pid.into(),
            id,
            tag: None,
        }
    }

    /// Identity of an element nested under `parent` and written as `tag`
    pub fn nested(
        parent: &ConfigId,
        pid: impl Into<String>,
        id: Option<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            parent: Some(Arc::new(parent.clone())),
            pid: pid.into(),
            id,
            tag: Some(tag.into()),
        }
    }

    pub fn pid(&self) -> &str {
        &self.pid
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn parent(&self) -> Option<&ConfigId> {
        self.parent.as_deref()
    }

    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    /// Number of segments in the canonical form
    pub fn depth(&self) -> usize {
        1 + self.parent.as_ref().map_or(0, |parent| parent.depth())
    }

    fn write_segment(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pid)?;
        if let Some(tag) = &self.tag {
            write!(f, "({tag})")?;
        }
        if let Some(id) = &self.id {
            f.write_str("[")?;
            for c in id.chars() {
                if c == ']' || c == '\\' {
                    f.write_str("\\")?;
                }
                write!(f, "{c}")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{parent}/")?;
        }
        self.write_segment(f)
    }
}

impl FromStr for ConfigId {
    type Err = ConfigIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ConfigIdParseError::Empty);
        }

        let mut current: Option<ConfigId> = None;
        for segment in split_segments(s) {
            let (pid, tag, id) = parse_segment(segment)?;
            current = Some(ConfigId {
                parent: current.map(Arc::new),
                pid,
                id,
                tag,
            });
        }

        current.ok_or(ConfigIdParseError::Empty)
    }
}

impl ConfigId {
    pub fn parse(s: &str) -> Result<Self, ConfigIdParseError> {
        s.parse()
    }
}

/// Splits on `/` outside of `[...]`
fn split_segments(s: &str) -> Vec<&str> {
    let mut segments = vec![];
    let mut in_id = false;
    let mut escaped = false;
    let mut start = 0;

    for (index, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_id => escaped = true,
            '[' if !in_id => in_id = true,
            ']' if in_id => in_id = false,
            '/' if !in_id => {
                segments.push(&s[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    segments.push(&s[start..]);
    segments
}

type Segment = (String, Option<String>, Option<String>);

fn parse_segment(segment: &str) -> Result<Segment, ConfigIdParseError> {
    let malformed = || ConfigIdParseError::Malformed(segment.to_string());

    let (head, id) = match segment.find('[') {
        Some(open) => {
            let id = unescape_id(&segment[open + 1..]).ok_or_else(malformed)?;
            (&segment[..open], Some(id))
        }
        None => (segment, None),
    };

    let (pid, tag) = match head.find('(') {
        Some(open) => {
            let tag = head[open + 1..].strip_suffix(')').ok_or_else(malformed)?;
            if tag.contains(['(', ')', ']']) {
                return Err(malformed());
            }
            (&head[..open], Some(tag.to_string()))
        }
        None => (head, None),
    };

    if pid.is_empty() {
        return Err(ConfigIdParseError::MissingPid(segment.to_string()));
    }
    if pid.contains([')', ']']) {
        return Err(malformed());
    }

    Ok((pid.to_string(), tag, id))
}

/// Id from the text following `[`, which must end with the closing `]`
fn unescape_id(rest: &str) -> Option<String> {
    let mut id = String::new();
    let mut chars = rest.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => id.push(chars.next()?),
            ']' => return chars.next().is_none().then_some(id),
            _ => id.push(c),
        }
    }
    None
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigIdParseError {
    #[error("empty configuration id")]
    Empty,
    #[error("segment `{0}` has no pid")]
    MissingPid(String),
    #[error("segment `{0}` is malformed")]
    Malformed(String),
}

impl serde::ser::Serialize for ConfigId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}
