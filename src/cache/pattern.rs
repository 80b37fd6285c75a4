//! Glob-style key patterns used by [`EphemeralCache::clear`](super::EphemeralCache::clear).

use regex::Regex;

use crate::core::ResilienceError;

/// A compiled key pattern. `*` matches zero or more of any character; every
/// other character matches itself.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    raw: String,
    regex: Regex,
}

impl KeyPattern {
    /// Compile a glob pattern into an anchored matcher.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::InvalidPattern`] if the generated expression
    /// exceeds the regex engine's size limits.
    pub fn compile(glob: &str) -> Result<Self, ResilienceError> {
        let body = glob
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("(?s)^{body}$")).map_err(|e| {
            ResilienceError::InvalidPattern {
                pattern: glob.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            raw: glob.to_string(),
            regex,
        })
    }

    /// Whether `key` matches the whole pattern.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}
