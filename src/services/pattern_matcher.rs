//! Wildcard matching for public paths and CORS origins.
//!
//! `*` matches any run of characters except the path separator `/`, so
//! `images/*` covers `images/a.jpg` but not `images/sub/a.jpg`. Everything
//! else is literal. The entries `*`, `*/*` and `**` are match-all and do cross
//! separators; they are how a bucket is made public as a whole.

use regex::RegexBuilder;
use tracing::debug;

/// Patterns that match any candidate, separators included.
const MATCH_ALL: [&str; 3] = ["*", "*/*", "**"];

/// Upper bound for a compiled pattern; anything larger is treated as non-matching.
const COMPILED_SIZE_LIMIT: usize = 1 << 16;

/// Pattern matcher for object keys and request origins.
pub struct PatternMatcher;

impl PatternMatcher {
    /// Check whether `candidate` matches `pattern` as a whole.
    pub fn matches(candidate: &str, pattern: &str) -> bool {
        if MATCH_ALL.contains(&pattern) {
            return true;
        }
        if !pattern.contains('*') {
            return candidate == pattern;
        }

        let expr = Self::to_regex(pattern);
        match RegexBuilder::new(&expr)
            .size_limit(COMPILED_SIZE_LIMIT)
            .build()
        {
            Ok(re) => re.is_match(candidate),
            Err(err) => {
                debug!(pattern, error = %err, "ignoring pattern that failed to compile");
                false
            }
        }
    }

    /// True if any of `patterns` matches. An empty list never matches.
    pub fn matches_any<S: AsRef<str>>(candidate: &str, patterns: &[S]) -> bool {
        patterns
            .iter()
            .any(|pattern| Self::matches(candidate, pattern.as_ref()))
    }

    /// Origin check used for CORS: a bare `*` entry allows every origin,
    /// other entries go through the regular wildcard rule.
    pub fn origin_allowed<S: AsRef<str>>(origin: &str, allowed: &[S]) -> bool {
        allowed.iter().any(|entry| {
            let entry = entry.as_ref();
            entry == "*" || Self::matches(origin, entry)
        })
    }

    /// Build an anchored expression where each `*` becomes `[^/]*`.
    fn to_regex(pattern: &str) -> String {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("[^/]*");
        format!("^{}$", body)
    }
}
