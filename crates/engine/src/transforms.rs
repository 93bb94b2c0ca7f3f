// SPDX-License-Identifier: Apache-2.0

//! Input transforms (§4.10): per-component rewriters applied to a `Message` before `invoke`.
//!
//! Each transform reads one or more expressions, optionally runs a deferred `invoke:` closure
//! (resolved once at flow-build time into a [`ConfigValue`]) per element, and writes the result
//! back onto the message. Transforms run in declaration order; a later transform sees the
//! effects of an earlier one.

use crate::config_value::ConfigValue;
use crate::error::ComponentError;
use crate::expression::Scratch;
use crate::message::Message;
use serde_json::Value;

/// One resolved transform, ready to run against a message.
#[derive(Clone)]
pub enum Transform {
    /// `copy`: read `source`, write `dest`.
    Copy {
        /// Source expression.
        source: String,
        /// Destination expression.
        dest: String,
    },
    /// `append`: read `source`, push onto the list at `dest` (creating it if absent).
    Append {
        /// Source expression.
        source: String,
        /// Destination expression; must resolve to, or be creatable as, a list.
        dest: String,
    },
    /// `map`: iterate `source_list`, optionally transforming each element via `processing`.
    Map {
        /// Expression selecting the source list.
        source_list: String,
        /// Expression selecting the destination list.
        dest_list: String,
        /// Per-element transform; `None` copies the element unchanged.
        processing: Option<ConfigValue>,
    },
    /// `filter`: like `map`, keeping only elements for which `predicate` is truthy.
    Filter {
        /// Expression selecting the source list.
        source_list: String,
        /// Expression selecting the destination list.
        dest_list: String,
        /// Predicate evaluated per element; truthy keeps the element.
        predicate: ConfigValue,
    },
    /// `reduce`: fold `source_list` into a single accumulated value written to `dest`.
    Reduce {
        /// Expression selecting the source list.
        source_list: String,
        /// Expression the final accumulated value is written to.
        dest: String,
        /// Seed value for the accumulator.
        initial: ConfigValue,
        /// Directive invoked once per element with the running accumulator.
        accumulator: ConfigValue,
    },
    /// `copy_list_item`: deprecated single-field extraction form of `map`.
    CopyListItem {
        /// Expression selecting the source list.
        source_list: String,
        /// Property name read from each source element.
        source_property: String,
        /// Expression selecting the destination list.
        dest_list: String,
        /// Property name written on each destination element.
        dest_property: String,
    },
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn read_list(message: &Message, expr: &str) -> Result<Vec<Value>, ComponentError> {
    let value = message
        .get_data(expr)
        .map_err(|e| ComponentError::transform(format!("transform source `{expr}`: {e}")))?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(ComponentError::transform(format!(
            "transform source `{expr}` did not resolve to a list, got {other}"
        ))),
    }
}

fn write(message: &mut Message, expr: &str, value: Value) -> Result<(), ComponentError> {
    message
        .set_data(expr, value)
        .map_err(|e| ComponentError::transform(format!("transform dest `{expr}`: {e}")))
}

impl Transform {
    /// Applies this transform to `message` in place.
    pub fn apply(&self, message: &mut Message) -> Result<(), ComponentError> {
        match self {
            Transform::Copy { source, dest } => {
                let value = message
                    .get_data(source)
                    .map_err(|e| ComponentError::transform(format!("copy source `{source}`: {e}")))?;
                write(message, dest, value)
            }
            Transform::Append { source, dest } => {
                let value = message
                    .get_data(source)
                    .map_err(|e| ComponentError::transform(format!("append source `{source}`: {e}")))?;
                let mut list = match message
                    .get_data(dest)
                    .map_err(|e| ComponentError::transform(format!("append dest `{dest}`: {e}")))?
                {
                    Value::Array(items) => items,
                    Value::Null => Vec::new(),
                    other => {
                        return Err(ComponentError::transform(format!(
                            "append dest `{dest}` is not a list, got {other}"
                        )));
                    }
                };
                list.push(value);
                write(message, dest, Value::Array(list))
            }
            Transform::Map {
                source_list,
                dest_list,
                processing,
            } => {
                let items = read_list(message, source_list)?;
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let value = match processing {
                        Some(config) => {
                            let scratch = iteration_scratch(item, index, &items);
                            config
                                .resolve_with_scratch(message, &scratch)
                                .map_err(|e| {
                                    ComponentError::transform(format!("map processing_function: {e}"))
                                })?
                        }
                        None => item.clone(),
                    };
                    out.push(value);
                }
                write(message, dest_list, Value::Array(out))
            }
            Transform::Filter {
                source_list,
                dest_list,
                predicate,
            } => {
                let items = read_list(message, source_list)?;
                let mut out = Vec::new();
                for (index, item) in items.iter().enumerate() {
                    let scratch = iteration_scratch(item, index, &items);
                    let kept = predicate
                        .resolve_with_scratch(message, &scratch)
                        .map_err(|e| ComponentError::transform(format!("filter_function: {e}")))?;
                    if truthy(&kept) {
                        out.push(item.clone());
                    }
                }
                write(message, dest_list, Value::Array(out))
            }
            Transform::Reduce {
                source_list,
                dest,
                initial,
                accumulator,
            } => {
                let items = read_list(message, source_list)?;
                let mut accumulated = initial
                    .resolve(message)
                    .map_err(|e| ComponentError::transform(format!("reduce initial_value: {e}")))?;
                for (index, item) in items.iter().enumerate() {
                    let mut scratch = iteration_scratch(item, index, &items);
                    scratch.keyword_args =
                        merge_keyword(scratch.keyword_args, "accumulated_value", accumulated.clone());
                    accumulated = accumulator
                        .resolve_with_scratch(message, &scratch)
                        .map_err(|e| ComponentError::transform(format!("accumulator_function: {e}")))?;
                }
                write(message, dest, accumulated)
            }
            Transform::CopyListItem {
                source_list,
                source_property,
                dest_list,
                dest_property,
            } => {
                let items = read_list(message, source_list)?;
                let mut out = Vec::with_capacity(items.len());
                for item in &items {
                    let extracted = item.get(source_property).cloned().unwrap_or(Value::Null);
                    let mut entry = serde_json::Map::new();
                    let _ = entry.insert(dest_property.clone(), extracted);
                    out.push(Value::Object(entry));
                }
                write(message, dest_list, Value::Array(out))
            }
        }
    }
}

fn iteration_scratch(item: &Value, index: usize, source_list: &[Value]) -> Scratch {
    let mut scratch = Scratch::empty();
    scratch.item = Some(item.clone());
    scratch.index = Some(index);
    scratch.keyword_args = serde_json::json!({
        "index": index,
        "current_value": item,
        "source_list": source_list,
    });
    scratch
}

fn merge_keyword(keyword_args: Value, key: &str, value: Value) -> Value {
    let mut map = match keyword_args {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    let _ = map.insert(key.to_owned(), value);
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_value::InvokeRegistry;
    use conduit_config::value::{ConfigTree, InvokeDirective, InvokeParams};
    use serde_json::json;
    use std::sync::Arc;

    fn add_registry() -> InvokeRegistry {
        let mut registry = InvokeRegistry::new();
        registry.register(
            "invoke_functions",
            "add",
            Arc::new(|positional, _keyword, _message| {
                let a = positional[0].as_f64().unwrap_or(0.0);
                let b = positional[1].as_f64().unwrap_or(0.0);
                Ok(json!(a + b))
            }),
        );
        registry
    }

    #[test]
    fn copy_transform_moves_a_value() {
        let mut m = Message::new(json!({"x": 5}));
        let t = Transform::Copy {
            source: "input.payload:x".to_owned(),
            dest: "user_data.temp:y".to_owned(),
        };
        t.apply(&mut m).unwrap();
        assert_eq!(m.get_data("user_data.temp:y").unwrap(), json!(5));
    }

    #[test]
    fn append_transform_creates_then_extends_list() {
        let mut m = Message::new(json!({"x": 1}));
        let t = Transform::Append {
            source: "input.payload:x".to_owned(),
            dest: "user_data.temp:list".to_owned(),
        };
        t.apply(&mut m).unwrap();
        t.apply(&mut m).unwrap();
        assert_eq!(m.get_data("user_data.temp:list").unwrap(), json!([1, 1]));
    }

    #[test]
    fn map_without_processing_function_copies_elements() {
        let mut m = Message::new(json!({"list": [1, 2, 3]}));
        let t = Transform::Map {
            source_list: "input.payload:list".to_owned(),
            dest_list: "user_data.temp:out".to_owned(),
            processing: None,
        };
        t.apply(&mut m).unwrap();
        assert_eq!(m.get_data("user_data.temp:out").unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn map_plus_two_runs_invoke_processing_function() {
        let registry = add_registry();
        let directive = InvokeDirective {
            module: "invoke_functions".to_owned(),
            function: "add".to_owned(),
            params: InvokeParams {
                positional: vec![
                    ConfigTree::String("evaluate_expression(keyword_args:current_value, int)".to_owned()),
                    ConfigTree::Number(2.into()),
                ],
                keyword: Default::default(),
            },
        };
        let processing = crate::config_value::resolve(&ConfigTree::Invoke(directive), &registry);
        let mut m = Message::new(json!({"list": [1, 2, 3, 4, 5]}));
        let t = Transform::Map {
            source_list: "input.payload:list".to_owned(),
            dest_list: "user_data.temp:out".to_owned(),
            processing: Some(processing),
        };
        t.apply(&mut m).unwrap();
        assert_eq!(m.get_data("user_data.temp:out").unwrap(), json!([3, 4, 5, 6, 7]));
    }

    #[test]
    fn filter_keeps_truthy_elements_contiguously() {
        let mut m = Message::new(json!({"list": [{"my_val":1},{"my_val":2},{"my_val":3},{"my_val":4}]}));
        let predicate = ConfigValue::Closure(Arc::new(|_message: &Message, scratch: &Scratch| {
            let value = scratch.item.clone().unwrap_or(Value::Null);
            let kept = value.get("my_val").and_then(Value::as_i64).unwrap_or(0) > 2;
            Ok(Value::Bool(kept))
        }));
        let t = Transform::Filter {
            source_list: "input.payload:list".to_owned(),
            dest_list: "user_data.temp:out".to_owned(),
            predicate,
        };
        t.apply(&mut m).unwrap();
        assert_eq!(
            m.get_data("user_data.temp:out").unwrap(),
            json!([{"my_val":3},{"my_val":4}])
        );
    }

    #[test]
    fn reduce_sums_a_list() {
        let registry = add_registry();
        let directive = InvokeDirective {
            module: "invoke_functions".to_owned(),
            function: "add".to_owned(),
            params: InvokeParams {
                positional: vec![
                    ConfigTree::String("evaluate_expression(keyword_args:accumulated_value, int)".to_owned()),
                    ConfigTree::String("evaluate_expression(keyword_args:current_value, int)".to_owned()),
                ],
                keyword: Default::default(),
            },
        };
        let accumulator = crate::config_value::resolve(&ConfigTree::Invoke(directive), &registry);
        let mut m = Message::new(json!({"my_list": [1, 2, 3, 4, 5]}));
        let t = Transform::Reduce {
            source_list: "input.payload:my_list".to_owned(),
            dest: "user_data.temp:my_val".to_owned(),
            initial: ConfigValue::Static(json!(0)),
            accumulator,
        };
        t.apply(&mut m).unwrap();
        assert_eq!(m.get_data("user_data.temp:my_val").unwrap(), json!(15));
    }

    #[test]
    fn copy_list_item_extracts_field() {
        let mut m = Message::new(json!({"list": [{"a": 1, "b": 9}, {"a": 2, "b": 8}]}));
        let t = Transform::CopyListItem {
            source_list: "input.payload:list".to_owned(),
            source_property: "a".to_owned(),
            dest_list: "user_data.temp:out".to_owned(),
            dest_property: "extracted".to_owned(),
        };
        t.apply(&mut m).unwrap();
        assert_eq!(
            m.get_data("user_data.temp:out").unwrap(),
            json!([{"extracted":1},{"extracted":2}])
        );
    }
}
