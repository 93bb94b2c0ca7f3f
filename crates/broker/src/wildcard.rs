// SPDX-License-Identifier: Apache-2.0

//! Solace-style topic wildcard matching (§4.3, §4.7), compiled once to a `Regex`.
//!
//! `*` matches exactly one topic level; `>` matches one or more trailing levels and is only
//! meaningful as the final segment of a pattern. Used both by the dev/test broker's
//! subscription-to-queue routing and by `SubscriptionRouter`'s component-selection logic.

use regex::Regex;

/// Default level delimiter, matching the broker adapters modeled here.
pub const DEFAULT_DELIMITER: &str = "/";

/// A subscription pattern compiled once into a regex for repeated matching against topics.
#[derive(Debug, Clone)]
pub struct CompiledSubscription {
    /// The original pattern string, kept for diagnostics and equality checks.
    pub pattern: String,
    regex: Regex,
}

impl CompiledSubscription {
    /// Compiles `pattern` against topics split on `delimiter`.
    #[must_use]
    pub fn compile(pattern: &str, delimiter: &str) -> Self {
        Self {
            pattern: pattern.to_owned(),
            regex: compile_topic_pattern(pattern, delimiter),
        }
    }

    /// Whether `topic` matches this subscription.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        self.regex.is_match(topic)
    }
}

/// Compiles a Solace-style subscription pattern into an anchored regex.
#[must_use]
pub fn compile_topic_pattern(pattern: &str, delimiter: &str) -> Regex {
    let escaped_delimiter = regex::escape(delimiter);
    let segments: Vec<&str> = pattern.split(delimiter).collect();

    let mut literal_segments = Vec::with_capacity(segments.len());
    let mut has_tail = false;
    for segment in &segments {
        if *segment == ">" {
            has_tail = true;
            break;
        } else if *segment == "*" {
            literal_segments.push(format!("[^{escaped_delimiter}]+"));
        } else {
            literal_segments.push(regex::escape(segment));
        }
    }

    let body = if literal_segments.is_empty() {
        if has_tail {
            ".+".to_owned()
        } else {
            String::new()
        }
    } else if has_tail {
        format!("{}{escaped_delimiter}.+", literal_segments.join(&escaped_delimiter))
    } else {
        literal_segments.join(&escaped_delimiter)
    };

    Regex::new(&format!("^{body}$")).expect("subscription pattern compiles to a valid regex")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern_matches_only_itself() {
        let sub = CompiledSubscription::compile("orders/created", "/");
        assert!(sub.matches("orders/created"));
        assert!(!sub.matches("orders/updated"));
        assert!(!sub.matches("orders/created/extra"));
    }

    #[test]
    fn star_matches_exactly_one_segment() {
        let sub = CompiledSubscription::compile("orders/*/created", "/");
        assert!(sub.matches("orders/123/created"));
        assert!(!sub.matches("orders/created"));
        assert!(!sub.matches("orders/123/456/created"));
    }

    #[test]
    fn tail_matches_one_or_more_trailing_levels() {
        let sub = CompiledSubscription::compile("orders/>", "/");
        assert!(sub.matches("orders/created"));
        assert!(sub.matches("orders/created/v2"));
        assert!(!sub.matches("orders"));
    }

    #[test]
    fn bare_tail_matches_any_nonempty_topic() {
        let sub = CompiledSubscription::compile(">", "/");
        assert!(sub.matches("anything"));
        assert!(sub.matches("a/b/c"));
    }
}
