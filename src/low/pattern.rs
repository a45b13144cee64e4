// src/low/pattern.rs

use globset::{Glob, GlobMatcher};

/// Shell-style pattern used by requisite targets, `sls` references and
/// excludes.
///
/// `*` matches across `/` and `.`, like `fnmatch`. A pattern that fails to
/// compile as a glob degrades to an exact string comparison.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    matcher: Option<GlobMatcher>,
}

impl Pattern {
    pub fn new(raw: &str) -> Self {
        let matcher = if has_glob_meta(raw) {
            Glob::new(raw).ok().map(|g| g.compile_matcher())
        } else {
            None
        };
        Self {
            raw: raw.to_string(),
            matcher,
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        match &self.matcher {
            Some(m) => m.is_match(text),
            None => self.raw == text,
        }
    }

    /// `true` when the pattern contains no glob metacharacters.
    pub fn is_literal(&self) -> bool {
        !has_glob_meta(&self.raw)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// One-shot match for callers that do not keep the compiled pattern around.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    Pattern::new(pattern).matches(text)
}

fn has_glob_meta(s: &str) -> bool {
    s.contains(['*', '?', '['])
}
