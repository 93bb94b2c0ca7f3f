// SPDX-License-Identifier: Apache-2.0

//! Resolves a [`conduit_config::ConfigTree`] into a [`ConfigValue`] that a component can read at
//! runtime: either a value fixed at load time, or a closure re-evaluated per message.
//!
//! `conduit-config` only knows the document's shape (§ its crate doc); this module is where that
//! shape gains behavior, by walking the tree once at flow-build time and classifying each leaf:
//!
//! - a plain scalar/array/object with no `invoke:` or `evaluate_expression(...)` token becomes
//!   [`ConfigValue::Static`];
//! - a string of the exact form `evaluate_expression(<expr>[, <cast>])` becomes a
//!   [`ConfigValue::Closure`] that re-runs the expression engine against the current message;
//! - an `invoke:` directive becomes a `Closure` that resolves its `params` (recursively, each
//!   itself a nested `ConfigTree`) and dispatches to a function registered in [`InvokeRegistry`].

use crate::error::ComponentError;
use crate::expression::{self, Scratch};
use crate::message::Message;
use conduit_config::value::{ConfigTree, InvokeDirective};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A resolved configuration value: either fixed at load time or re-evaluated per message.
#[derive(Clone)]
pub enum ConfigValue {
    /// A value that does not depend on the message being processed.
    Static(Value),
    /// A value recomputed every time a message passes through. Takes the per-iteration
    /// [`Scratch`] so `map`/`filter`/`reduce` transforms can pass `item`/`index`/`keyword_args`
    /// through to a nested `invoke:` directive's `evaluate_expression(...)` arguments.
    Closure(Arc<dyn Fn(&Message, &Scratch) -> Result<Value, ComponentError> + Send + Sync>),
}

impl std::fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValue::Static(v) => f.debug_tuple("Static").field(v).finish(),
            ConfigValue::Closure(_) => f.debug_tuple("Closure").finish(),
        }
    }
}

impl ConfigValue {
    /// Resolves this value against a message with no iteration scratch bound.
    pub fn resolve(&self, message: &Message) -> Result<Value, ComponentError> {
        self.resolve_with_scratch(message, &Scratch::empty())
    }

    /// Resolves this value against a message with explicit iteration scratch, as used by
    /// `map`/`filter`/`reduce` transforms evaluating a per-element `invoke:` directive.
    pub fn resolve_with_scratch(&self, message: &Message, scratch: &Scratch) -> Result<Value, ComponentError> {
        match self {
            ConfigValue::Static(v) => Ok(v.clone()),
            ConfigValue::Closure(f) => f(message, scratch),
        }
    }
}

/// A function invokable from an `invoke:` directive, keyed by `(module, function)`.
pub type InvokeFn =
    Arc<dyn Fn(&[Value], &HashMap<String, Value>, &Message) -> Result<Value, ComponentError> + Send + Sync>;

/// Registry of functions reachable from config-level `invoke:` directives.
///
/// Populated once at startup (by built-ins plus anything a deployment wires in) and shared by
/// `Arc` with every flow that resolves `ConfigTree`s into `ConfigValue`s.
#[derive(Clone, Default)]
pub struct InvokeRegistry {
    functions: HashMap<(String, String), InvokeFn>,
}

impl InvokeRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function under `module`/`function`, overwriting any prior registration.
    pub fn register(&mut self, module: impl Into<String>, function: impl Into<String>, f: InvokeFn) {
        let _ = self.functions.insert((module.into(), function.into()), f);
    }

    fn get(&self, module: &str, function: &str) -> Option<&InvokeFn> {
        self.functions.get(&(module.to_owned(), function.to_owned()))
    }
}

/// Resolves a `ConfigTree` into a `ConfigValue`, recursively handling nested `invoke:` params.
pub fn resolve(tree: &ConfigTree, registry: &InvokeRegistry) -> ConfigValue {
    match tree {
        ConfigTree::Invoke(directive) => resolve_invoke(directive.clone(), registry),
        ConfigTree::String(s) => {
            if let Some(expr) = expression::is_evaluate_expression_token(s) {
                let expr = expr.to_owned();
                ConfigValue::Closure(Arc::new(move |message: &Message, scratch: &Scratch| {
                    expression::evaluate(&expr, message, scratch)
                        .map_err(|e| ComponentError::transform(e.to_string()))
                }))
            } else {
                ConfigValue::Static(Value::String(s.clone()))
            }
        }
        other => ConfigValue::Static(other.to_json()),
    }
}

fn resolve_invoke(directive: InvokeDirective, registry: &InvokeRegistry) -> ConfigValue {
    let registry = registry.clone();
    let positional: Vec<ConfigValue> = directive
        .params
        .positional
        .iter()
        .map(|t| resolve(t, &registry))
        .collect();
    let keyword: Vec<(String, ConfigValue)> = directive
        .params
        .keyword
        .iter()
        .map(|(k, t)| (k.clone(), resolve(t, &registry)))
        .collect();
    let module = directive.module;
    let function = directive.function;

    ConfigValue::Closure(Arc::new(move |message: &Message, scratch: &Scratch| {
        let resolved_positional = positional
            .iter()
            .map(|v| v.resolve_with_scratch(message, scratch))
            .collect::<Result<Vec<_>, _>>()?;
        let resolved_keyword = keyword
            .iter()
            .map(|(k, v)| v.resolve_with_scratch(message, scratch).map(|v| (k.clone(), v)))
            .collect::<Result<HashMap<_, _>, _>>()?;
        let f = registry.get(&module, &function).ok_or_else(|| {
            ComponentError::configuration(format!("no invoke function registered for {module}.{function}"))
        })?;
        f(&resolved_positional, &resolved_keyword, message)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_config::value::InvokeParams;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn static_tree_resolves_without_a_message() {
        let tree = ConfigTree::from_json(&json!({"a": 1}));
        let resolved = resolve(&tree, &InvokeRegistry::new());
        let message = Message::new(json!({}));
        assert_eq!(resolved.resolve(&message).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn evaluate_expression_token_becomes_a_closure() {
        let tree = ConfigTree::String("evaluate_expression(input.payload:count)".to_owned());
        let resolved = resolve(&tree, &InvokeRegistry::new());
        let message = Message::new(json!({"count": 9}));
        assert_eq!(resolved.resolve(&message).unwrap(), json!(9));
    }

    #[test]
    fn invoke_directive_dispatches_to_registered_function() {
        let mut registry = InvokeRegistry::new();
        registry.register(
            "math",
            "double",
            Arc::new(|positional, _keyword, _message| {
                let n = positional[0].as_i64().unwrap_or(0);
                Ok(json!(n * 2))
            }),
        );
        let directive = InvokeDirective {
            module: "math".to_owned(),
            function: "double".to_owned(),
            params: InvokeParams {
                positional: vec![ConfigTree::from_json(&json!(21))],
                keyword: BTreeMap::new(),
            },
        };
        let tree = ConfigTree::Invoke(directive);
        let resolved = resolve(&tree, &registry);
        let message = Message::new(json!({}));
        assert_eq!(resolved.resolve(&message).unwrap(), json!(42));
    }
}
