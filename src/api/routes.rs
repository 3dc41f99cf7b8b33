//! Declarative path rewrite table
//!
//! Rules are plain `from -> to` prefixes, e.g. sending `/tests/...` to
//! `/optimized/tests/...`. The table is consulted once per request.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    /// Longest prefix first
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new(mut rules: Vec<RouteRule>) -> Self {
        for rule in &mut rules {
            rule.from = rule.from.trim_end_matches('/').to_string();
            rule.to = rule.to.trim_end_matches('/').to_string();
        }
        rules.retain(|r| !r.from.is_empty());
        rules.sort_by(|a, b| b.from.len().cmp(&a.from.len()));
        Self { rules }
    }

    /// Rewrite `path` with the first matching rule. Prefixes only match on a
    /// segment boundary, so `/tests` does not rewrite `/testsuite`.
    pub fn rewrite<'a>(&self, path: &'a str) -> Cow<'a, str> {
        for rule in &self.rules {
            if let Some(rest) = path.strip_prefix(rule.from.as_str()) {
                if rest.is_empty() || rest.starts_with(['/', '?']) {
                    tracing::debug!("Route {} -> {}", rule.from, rule.to);
                    return Cow::Owned(format!("{}{}", rule.to, rest));
                }
            }
        }
        Cow::Borrowed(path)
    }
}
