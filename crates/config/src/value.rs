// SPDX-License-Identifier: Apache-2.0

//! `ConfigValue`: the config DSL's sum type.
//!
//! Any scalar in a component's `component_config` (or transform parameters) may instead be
//! written as `{ invoke: { module, function, params: { positional?, keyword? } } }`. The engine
//! resolves this tree once at load time: a directive with no `evaluate_expression(...)` token
//! anywhere inside it resolves to a plain value immediately (`Static`); a directive containing
//! one becomes a closure that is re-evaluated against the in-flight message (`Closure`, modeled
//! one layer up in `conduit-engine` since it needs the expression evaluator). This crate only
//! owns the parse-time shape — [`ConfigTree`] — not the resolution step.

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A parsed, not-yet-resolved configuration value.
///
/// Structurally a superset of JSON: every JSON shape round-trips, plus a distinguished
/// [`ConfigTree::Invoke`] variant wherever the source document had a map containing exactly the
/// key `invoke`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigTree {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number.
    Number(serde_json::Number),
    /// JSON string.
    String(String),
    /// JSON array.
    Array(Vec<ConfigTree>),
    /// JSON object that is not an `invoke:` directive.
    Object(BTreeMap<String, ConfigTree>),
    /// An `invoke:` directive: a deferred function call.
    Invoke(InvokeDirective),
}

/// A deferred function call: `{ invoke: { module, function, params: { positional, keyword } } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeDirective {
    /// Dotted module path the function lives in (interpretation is up to the resolving crate).
    pub module: String,
    /// Function name within `module`.
    pub function: String,
    /// Arguments to the call.
    #[serde(default)]
    pub params: InvokeParams,
}

/// Positional and keyword arguments to an [`InvokeDirective`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvokeParams {
    /// Positional arguments, in order.
    #[serde(default)]
    pub positional: Vec<ConfigTree>,
    /// Keyword arguments.
    #[serde(default)]
    pub keyword: BTreeMap<String, ConfigTree>,
}

impl ConfigTree {
    /// True if this value, or anything nested inside it, is an `invoke:` directive whose params
    /// contain an `evaluate_expression(...)` string token.
    #[must_use]
    pub fn contains_evaluate_expression(&self) -> bool {
        match self {
            ConfigTree::String(s) => s.contains("evaluate_expression("),
            ConfigTree::Array(items) => items.iter().any(Self::contains_evaluate_expression),
            ConfigTree::Object(map) => map.values().any(Self::contains_evaluate_expression),
            ConfigTree::Invoke(directive) => {
                directive
                    .params
                    .positional
                    .iter()
                    .any(Self::contains_evaluate_expression)
                    || directive
                        .params
                        .keyword
                        .values()
                        .any(Self::contains_evaluate_expression)
            }
            ConfigTree::Null | ConfigTree::Bool(_) | ConfigTree::Number(_) => false,
        }
    }

    /// Converts to a plain `serde_json::Value`, dropping any `Invoke` marker (invoke directives
    /// serialize as their underlying `{module, function, params}` object).
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ConfigTree::Null => serde_json::Value::Null,
            ConfigTree::Bool(b) => serde_json::Value::Bool(*b),
            ConfigTree::Number(n) => serde_json::Value::Number(n.clone()),
            ConfigTree::String(s) => serde_json::Value::String(s.clone()),
            ConfigTree::Array(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            ConfigTree::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            ConfigTree::Invoke(directive) => {
                serde_json::to_value(directive).unwrap_or(serde_json::Value::Null)
            }
        }
    }

    /// Returns the string value if this is a plain string leaf.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigTree::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the underlying object map, if this is one.
    #[must_use]
    pub fn as_object(&self) -> Option<&BTreeMap<String, ConfigTree>> {
        match self {
            ConfigTree::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Builds a `ConfigTree` from a plain `serde_json::Value`, recognizing `{"invoke": {...}}`
    /// objects the same way the YAML deserializer does. Mainly useful for tests and for built-in
    /// component defaults constructed in Rust rather than parsed from a document.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(ConfigTree::Null)
    }
}

impl<'de> Deserialize<'de> for ConfigTree {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TreeVisitor;

        impl<'de> Visitor<'de> for TreeVisitor {
            type Value = ConfigTree;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON-like configuration value, optionally an `invoke:` directive")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(ConfigTree::Null)
            }

            fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E> {
                Ok(ConfigTree::Bool(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
                Ok(ConfigTree::Number(v.into()))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
                Ok(ConfigTree::Number(v.into()))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                serde_json::Number::from_f64(v)
                    .map(ConfigTree::Number)
                    .ok_or_else(|| de::Error::custom("non-finite number"))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
                Ok(ConfigTree::String(v.to_owned()))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
                Ok(ConfigTree::String(v))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(ConfigTree::Array(items))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = BTreeMap::new();
                while let Some((key, value)) = map.next_entry::<String, ConfigTree>()? {
                    let _ = entries.insert(key, value);
                }
                if entries.len() == 1 {
                    if let Some(invoke_value) = entries.get("invoke") {
                        let directive: InvokeDirective =
                            serde_json::from_value(invoke_value.to_json())
                                .map_err(de::Error::custom)?;
                        return Ok(ConfigTree::Invoke(directive));
                    }
                }
                Ok(ConfigTree::Object(entries))
            }
        }

        deserializer.deserialize_any(TreeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_object_round_trips() {
        let yaml = "a: 1\nb: \"text\"\nc: [1, 2, 3]\n";
        let tree: ConfigTree = serde_yaml::from_str(yaml).unwrap();
        let obj = tree.as_object().unwrap();
        assert_eq!(obj.get("a").unwrap(), &ConfigTree::Number(1.into()));
        assert_eq!(
            obj.get("b").unwrap(),
            &ConfigTree::String("text".to_owned())
        );
    }

    #[test]
    fn invoke_directive_is_recognized() {
        let yaml = r#"
invoke:
  module: "invoke_functions"
  function: "add"
  params:
    positional:
      - "evaluate_expression(input.payload:a, int)"
      - 2
"#;
        let tree: ConfigTree = serde_yaml::from_str(yaml).unwrap();
        match tree {
            ConfigTree::Invoke(directive) => {
                assert_eq!(directive.module, "invoke_functions");
                assert_eq!(directive.function, "add");
                assert_eq!(directive.params.positional.len(), 2);
            }
            other => panic!("expected Invoke, got {other:?}"),
        }
    }

    #[test]
    fn nested_evaluate_expression_is_detected() {
        let yaml = r#"
invoke:
  module: "m"
  function: "f"
  params:
    keyword:
      x: "evaluate_expression(previous:field)"
"#;
        let tree: ConfigTree = serde_yaml::from_str(yaml).unwrap();
        assert!(tree.contains_evaluate_expression());

        let static_tree: ConfigTree = serde_yaml::from_str(
            r#"
invoke:
  module: "m"
  function: "f"
  params:
    positional: [1, 2]
"#,
        )
        .unwrap();
        assert!(!static_tree.contains_evaluate_expression());
    }

    #[test]
    fn an_object_with_only_invoke_key_named_differently_stays_an_object() {
        let yaml = "invoked: true\n";
        let tree: ConfigTree = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(tree, ConfigTree::Object(_)));
    }
}
