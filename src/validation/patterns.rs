//! Field name patterns
//!
//! User supplied patterns are case-insensitive regular expressions that must
//! match the whole name. A pattern that does not compile as a regular
//! expression is read as a glob (`*` and `?`) instead.

use crate::error::ConfigurationError;
use crate::models::FieldSchema;
use regex::{Regex, RegexBuilder};

/// Compile a user pattern, falling back to glob syntax.
pub fn compile_pattern(pattern: &str) -> Result<Regex, ConfigurationError> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return Err(ConfigurationError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: "empty pattern".to_string(),
        });
    }
    match build(&format!("^(?:{})$", pattern)) {
        Ok(re) => Ok(re),
        Err(_) => build(&glob_to_regex(pattern)).map_err(|e| ConfigurationError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Compile an unanchored, case-insensitive search regex.
pub fn compile_search(pattern: &str) -> Result<Regex, ConfigurationError> {
    build(pattern.trim()).map_err(|e| ConfigurationError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn build(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Translate a glob into an anchored regular expression.
pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    for ch in glob.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

/// Compiled field exclusion patterns.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<Regex>,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> Result<Self, ConfigurationError> {
        let patterns = patterns
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| compile_pattern(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Check a schema's qualified name, base name and title.
    pub fn is_excluded(&self, schema: &FieldSchema) -> bool {
        [&schema.name_qual, &schema.name_base, &schema.title]
            .iter()
            .any(|name| self.matches(name))
    }

    /// Check a bare row key.
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(name))
    }
}
