//! Glob patterns for tag/name queries.
//!
//! Supports `*` (any run of characters, including `/`) and `?` (exactly one
//! character). Everything else matches literally.

use regex::Regex;

#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    /// `None` for the bare `*` wildcard.
    regex: Option<Regex>,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        if pattern == "*" {
            return Ok(Self::any());
        }
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push_str("(?s)^");
        for ch in pattern.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');
        Ok(Self {
            source: pattern.to_string(),
            regex: Some(Regex::new(&expr)?),
        })
    }

    /// Pattern that matches everything.
    #[must_use]
    pub fn any() -> Self {
        Self {
            source: "*".to_string(),
            regex: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.as_ref().map_or(true, |re| re.is_match(candidate))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}
