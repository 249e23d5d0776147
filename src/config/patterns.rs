//! Glob-style allow lists
//!
//! Configuration accepts patterns like `cdn.*.example.com` or `10.0.*` for
//! remote host and stats-client restrictions. A `*` matches any run of
//! characters; everything else is literal. Patterns are compiled once at
//! validation time so a bad entry fails startup instead of a request.

use regex::Regex;

#[derive(Debug, Clone, Default)]
pub struct PatternList {
    raw: Vec<String>,
    compiled: Vec<Regex>,
}

impl PatternList {
    pub fn compile(patterns: &[String]) -> Result<Self, regex::Error> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            compiled.push(Regex::new(&anchor(pattern))?);
        }
        Ok(PatternList {
            raw: patterns.to_vec(),
            compiled,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    /// True when any pattern matches; an empty list matches nothing, the
    /// call site decides what that means.
    pub fn matches(&self, value: &str) -> bool {
        self.compiled.iter().any(|p| p.is_match(value))
    }

    pub fn patterns(&self) -> &[String] {
        &self.raw
    }
}

fn anchor(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}
