//! Dotted project names and the active-scope stack.
//!
//! Project and task names are `:`-separated paths (`app:web:compile`). The
//! scope stack records which project definitions are currently executing; the
//! top of the stack is the *active scope* used to validate nesting and to
//! qualify task names.

use std::sync::{Mutex, OnceLock};

use cairn_types::{CairnError, Result};
use regex::Regex;

use crate::lock;

pub const SEPARATOR: char = ':';

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").expect("segment pattern is valid")
    })
}

/// Check that every segment of a dotted project name is well formed.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CairnError::InvalidProjectName {
            name: name.to_string(),
            reason: "name is empty".into(),
        });
    }
    for segment in name.split(SEPARATOR) {
        if !segment_pattern().is_match(segment) {
            return Err(CairnError::InvalidProjectName {
                name: name.to_string(),
                reason: format!("segment {segment:?} is not a valid name"),
            });
        }
    }
    Ok(())
}

/// `"a:b:c"` -> `Some("a:b")`, `"a"` -> `None`.
pub fn parent_name(name: &str) -> Option<&str> {
    name.rfind(SEPARATOR).map(|idx| &name[..idx])
}

/// `"a:b:c"` -> `"c"`.
pub fn last_segment(name: &str) -> &str {
    match name.rfind(SEPARATOR) {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

/// Join a scope and a relative name.
pub fn qualify(scope: Option<&str>, name: &str) -> String {
    match scope {
        Some(scope) if !scope.is_empty() => format!("{scope}{SEPARATOR}{name}"),
        _ => name.to_string(),
    }
}

/// Proper prefixes of a dotted name, shortest first: `"a:b:c"` -> `["a", "a:b"]`.
pub fn proper_prefixes(name: &str) -> Vec<&str> {
    name.match_indices(SEPARATOR)
        .map(|(idx, _)| &name[..idx])
        .collect()
}

/// Candidate fully-qualified names for `name` looked up from `scope`,
/// nearest first: the scope itself, then each ancestor, then the top level.
pub fn lookup_candidates(name: &str, scope: Option<&str>) -> Vec<String> {
    let mut candidates = Vec::new();
    let mut current = scope.filter(|s| !s.is_empty());
    while let Some(level) = current {
        candidates.push(qualify(Some(level), name));
        current = parent_name(level);
    }
    candidates.push(name.to_string());
    candidates
}

// ---------------------------------------------------------------------------
// ScopeStack
// ---------------------------------------------------------------------------

/// Stack of project names whose definitions are executing.
#[derive(Debug, Default)]
pub(crate) struct ScopeStack {
    frames: Mutex<Vec<String>>,
}

impl ScopeStack {
    pub(crate) fn current(&self) -> Option<String> {
        lock(&self.frames).last().cloned()
    }

    /// Human-readable chain for diagnostics, outermost first.
    pub(crate) fn chain(&self) -> String {
        let frames = lock(&self.frames);
        if frames.is_empty() {
            "<top level>".to_string()
        } else {
            frames.join(" => ")
        }
    }

    /// Make `name` the active scope until the returned guard is dropped.
    pub(crate) fn enter(&self, name: &str) -> ScopeGuard<'_> {
        lock(&self.frames).push(name.to_string());
        ScopeGuard { stack: self }
    }

    pub(crate) fn clear(&self) {
        lock(&self.frames).clear();
    }
}

pub(crate) struct ScopeGuard<'a> {
    stack: &'a ScopeStack,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        lock(&self.stack.frames).pop();
    }
}
