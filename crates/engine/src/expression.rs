// SPDX-License-Identifier: Apache-2.0

//! The `<root>:<dotted-path>[, cast]` expression language.
//!
//! Expressions are the glue between configuration and a running [`Message`](crate::message::Message):
//! transform parameters, `invoke:` argument bindings, and request/response correlation keys are
//! all expression strings resolved against the current message plus whatever per-iteration
//! scratch (`item`/`index`/`keyword_args`) the calling transform supplies.

use crate::error::ExprError;
use crate::message::Message;
use crate::value::{self, PathSegment};
use serde_json::Value;

/// Per-iteration scratch exposed to `item`, `index`, and `keyword_args` roots. Supplied by
/// `map`/`filter`/`reduce`/`copy_list_item` transforms and by `invoke:` argument binding; absent
/// (default) everywhere else.
#[derive(Debug, Clone, Default)]
pub struct Scratch {
    /// Current iteration element, for `map`/`filter`/`copy_list_item`.
    pub item: Option<Value>,
    /// Current iteration index, for `map`/`filter`/`copy_list_item`.
    pub index: Option<usize>,
    /// Keyword arguments bound for an `invoke:` call.
    pub keyword_args: Value,
}

impl Scratch {
    /// An empty scratch context, used wherever no iteration/invocation is in progress.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            item: None,
            index: None,
            keyword_args: Value::Null,
        }
    }
}

/// The addressable root of a parsed expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Root {
    InputPayload,
    InputTopic,
    InputTopicLevels,
    InputUserProperties,
    Previous,
    UserData(String),
    InvokeData,
    IterationData,
    Item,
    Index,
    KeywordArgs,
    Static(String),
    Template(String),
}

/// A requested scalar coercion following a `, <cast>` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cast {
    /// Coerce to a JSON number (integer).
    Int,
    /// Coerce to a JSON number (float).
    Float,
    /// Coerce to a JSON boolean.
    Bool,
    /// Coerce to a JSON string.
    String,
}

impl Cast {
    fn parse(s: &str) -> Option<Cast> {
        match s {
            "int" => Some(Cast::Int),
            "float" => Some(Cast::Float),
            "bool" => Some(Cast::Bool),
            "string" => Some(Cast::String),
            _ => None,
        }
    }

    fn apply(self, value: Value, expr: &str) -> Result<Value, ExprError> {
        let err = || ExprError::InvalidCast {
            expr: expr.to_owned(),
            cast: format!("{self:?}").to_lowercase(),
        };
        match self {
            Cast::Int => {
                let n = scalar_as_str(&value).and_then(|s| s.trim().parse::<i64>().ok());
                let n = n.or_else(|| value.as_f64().map(|f| f as i64));
                n.map(Value::from).ok_or_else(err)
            }
            Cast::Float => {
                let n = scalar_as_str(&value).and_then(|s| s.trim().parse::<f64>().ok());
                let n = n.or_else(|| value.as_f64());
                n.and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(err)
            }
            Cast::Bool => {
                let b = match &value {
                    Value::Bool(b) => Some(*b),
                    Value::String(s) => match s.as_str() {
                        "true" => Some(true),
                        "false" => Some(false),
                        _ => None,
                    },
                    Value::Number(n) => n.as_f64().map(|f| f != 0.0),
                    _ => None,
                };
                b.map(Value::Bool).ok_or_else(err)
            }
            Cast::String => Some(scalar_to_display(&value)).map(Value::String).ok_or_else(err),
        }
    }
}

fn scalar_as_str(value: &Value) -> Option<&str> {
    value.as_str()
}

fn scalar_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A parsed expression, ready to evaluate against any number of messages.
#[derive(Debug, Clone)]
pub struct Expression {
    root: Root,
    path: Vec<PathSegment>,
    cast: Option<Cast>,
    source: String,
}

impl Expression {
    /// Parses an expression string.
    pub fn parse(raw: &str) -> Result<Expression, ExprError> {
        let trimmed = raw.trim();
        let (body, cast) = split_cast(trimmed);

        if let Some(rest) = body.strip_prefix("static:") {
            return Ok(Expression {
                root: Root::Static(rest.to_owned()),
                path: Vec::new(),
                cast,
                source: raw.to_owned(),
            });
        }
        if let Some(rest) = body.strip_prefix("template:") {
            return Ok(Expression {
                root: Root::Template(rest.to_owned()),
                path: Vec::new(),
                cast,
                source: raw.to_owned(),
            });
        }
        if let Some(rest) = body.strip_prefix("input.payload") {
            return Ok(Expression {
                root: Root::InputPayload,
                path: value::parse_path(strip_colon(rest)),
                cast,
                source: raw.to_owned(),
            });
        }
        if let Some(rest) = body.strip_prefix("input.topic_levels") {
            return Ok(Expression {
                root: Root::InputTopicLevels,
                path: value::parse_path(strip_colon(rest)),
                cast,
                source: raw.to_owned(),
            });
        }
        if let Some(rest) = body.strip_prefix("input.topic") {
            return Ok(Expression {
                root: Root::InputTopic,
                path: value::parse_path(strip_colon(rest)),
                cast,
                source: raw.to_owned(),
            });
        }
        if let Some(rest) = body.strip_prefix("input.user_properties") {
            return Ok(Expression {
                root: Root::InputUserProperties,
                path: value::parse_path(strip_colon(rest)),
                cast,
                source: raw.to_owned(),
            });
        }
        if let Some(rest) = body.strip_prefix("previous") {
            return Ok(Expression {
                root: Root::Previous,
                path: value::parse_path(strip_colon(rest)),
                cast,
                source: raw.to_owned(),
            });
        }
        if let Some(rest) = body.strip_prefix("user_data.") {
            let (name, path) = rest.split_once(':').unwrap_or((rest, ""));
            return Ok(Expression {
                root: Root::UserData(name.to_owned()),
                path: value::parse_path(path),
                cast,
                source: raw.to_owned(),
            });
        }
        if let Some(rest) = body.strip_prefix("invoke_data") {
            return Ok(Expression {
                root: Root::InvokeData,
                path: value::parse_path(strip_colon(rest)),
                cast,
                source: raw.to_owned(),
            });
        }
        if let Some(rest) = body.strip_prefix("iteration_data") {
            return Ok(Expression {
                root: Root::IterationData,
                path: value::parse_path(strip_colon(rest)),
                cast,
                source: raw.to_owned(),
            });
        }
        if let Some(rest) = body.strip_prefix("item") {
            return Ok(Expression {
                root: Root::Item,
                path: value::parse_path(strip_colon(rest)),
                cast,
                source: raw.to_owned(),
            });
        }
        if let Some(rest) = body.strip_prefix("index") {
            return Ok(Expression {
                root: Root::Index,
                path: value::parse_path(strip_colon(rest)),
                cast,
                source: raw.to_owned(),
            });
        }
        if let Some(rest) = body.strip_prefix("keyword_args") {
            return Ok(Expression {
                root: Root::KeywordArgs,
                path: value::parse_path(strip_colon(rest)),
                cast,
                source: raw.to_owned(),
            });
        }

        Err(ExprError::UnknownRoot(raw.to_owned()))
    }

    /// Reads the value this expression addresses.
    pub fn get(&self, message: &Message, scratch: &Scratch) -> Result<Value, ExprError> {
        let resolved = match &self.root {
            Root::InputPayload => value::get_path(&message.payload, &self.path).cloned(),
            Root::InputTopic => {
                let topic = message.topic.clone().unwrap_or_default();
                if self.path.is_empty() {
                    Some(Value::String(topic))
                } else {
                    None
                }
            }
            Root::InputTopicLevels => {
                let levels: Vec<Value> = message
                    .topic
                    .as_deref()
                    .unwrap_or("")
                    .split(message.topic_delimiter.as_str())
                    .map(|s| Value::String(s.to_owned()))
                    .collect();
                let levels = Value::Array(levels);
                if self.path.is_empty() {
                    Some(levels)
                } else {
                    value::get_path(&levels, &self.path).cloned()
                }
            }
            Root::InputUserProperties => {
                let props = Value::Object(message.user_properties.clone().into_iter().collect());
                value::get_path(&props, &self.path).cloned()
            }
            Root::Previous => value::get_path(&message.previous, &self.path).cloned(),
            Root::UserData(name) => {
                let ns = message.user_data.get(name).cloned().unwrap_or(Value::Null);
                value::get_path(&ns, &self.path).cloned()
            }
            Root::InvokeData => value::get_path(&message.invoke_data, &self.path).cloned(),
            Root::IterationData => value::get_path(&message.iteration_data, &self.path).cloned(),
            Root::Item => {
                let item = scratch.item.clone().unwrap_or(Value::Null);
                if self.path.is_empty() {
                    Some(item)
                } else {
                    value::get_path(&item, &self.path).cloned()
                }
            }
            Root::Index => scratch.index.map(|i| Value::from(i as u64)),
            Root::KeywordArgs => value::get_path(&scratch.keyword_args, &self.path).cloned(),
            Root::Static(literal) => Some(Value::String(literal.clone())),
            Root::Template(template) => {
                Some(Value::String(crate::template::render(template, message, scratch)?))
            }
        };

        let resolved = resolved.unwrap_or(Value::Null);
        match self.cast {
            Some(_) if resolved.is_null() => Ok(Value::Null),
            Some(cast) => cast.apply(resolved, &self.source),
            None => Ok(resolved),
        }
    }

    /// Writes `value` to the location this expression addresses.
    pub fn set(&self, message: &mut Message, value: Value) -> Result<(), ExprError> {
        match &self.root {
            Root::InputPayload => {
                if value::set_path(&mut message.payload, &self.path, value) {
                    Ok(())
                } else {
                    Err(ExprError::ScalarInPath(self.source.clone()))
                }
            }
            Root::InputUserProperties => {
                let mut props = Value::Object(message.user_properties.clone().into_iter().collect());
                if !value::set_path(&mut props, &self.path, value) {
                    return Err(ExprError::ScalarInPath(self.source.clone()));
                }
                if let Value::Object(map) = props {
                    message.user_properties = map.into_iter().collect();
                }
                Ok(())
            }
            Root::UserData(name) => {
                let mut ns = message.user_data.get(name).cloned().unwrap_or(Value::Null);
                if !value::set_path(&mut ns, &self.path, value) {
                    return Err(ExprError::ScalarInPath(self.source.clone()));
                }
                if !message.user_data.is_object() {
                    message.user_data = Value::Object(serde_json::Map::new());
                }
                message
                    .user_data
                    .as_object_mut()
                    .expect("just ensured object")
                    .insert(name.clone(), ns);
                Ok(())
            }
            Root::InvokeData => {
                if value::set_path(&mut message.invoke_data, &self.path, value) {
                    Ok(())
                } else {
                    Err(ExprError::ScalarInPath(self.source.clone()))
                }
            }
            Root::IterationData => {
                if value::set_path(&mut message.iteration_data, &self.path, value) {
                    Ok(())
                } else {
                    Err(ExprError::ScalarInPath(self.source.clone()))
                }
            }
            Root::InputTopic
            | Root::InputTopicLevels
            | Root::Previous
            | Root::Item
            | Root::Index
            | Root::KeywordArgs
            | Root::Static(_)
            | Root::Template(_) => Err(ExprError::ReadOnlyRoot(self.source.clone())),
        }
    }
}

fn strip_colon(rest: &str) -> &str {
    rest.strip_prefix(':').unwrap_or(rest)
}

/// Splits a trailing `, <cast>` suffix off an expression body.
fn split_cast(raw: &str) -> (&str, Option<Cast>) {
    if let Some(comma) = raw.rfind(',') {
        let (body, suffix) = raw.split_at(comma);
        let suffix = suffix[1..].trim();
        if let Some(cast) = Cast::parse(suffix) {
            return (body.trim_end(), Some(cast));
        }
    }
    (raw, None)
}

/// Evaluates an expression string against a message in one call.
pub fn evaluate(expr: &str, message: &Message, scratch: &Scratch) -> Result<Value, ExprError> {
    Expression::parse(expr)?.get(message, scratch)
}

/// Parses and writes an expression string in one call.
pub fn assign(expr: &str, message: &mut Message, value: Value) -> Result<(), ExprError> {
    Expression::parse(expr)?.set(message, value)
}

/// Returns `true` if `s` is itself the token `evaluate_expression(<expr>[, <cast>])`, signalling
/// that a `ConfigValue` must be resolved per-message rather than once at load time.
#[must_use]
pub fn is_evaluate_expression_token(s: &str) -> Option<&str> {
    let s = s.trim();
    let inner = s.strip_prefix("evaluate_expression(")?.strip_suffix(')')?;
    Some(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg() -> Message {
        let mut m = Message::new(json!({"count": 3, "items": ["a", "b"]}));
        m.topic = Some("orders/created".to_owned());
        m
    }

    #[test]
    fn reads_payload_path() {
        let m = msg();
        let v = evaluate("input.payload:count", &m, &Scratch::empty()).unwrap();
        assert_eq!(v, json!(3));
    }

    #[test]
    fn reads_topic_levels() {
        let m = msg();
        let v = evaluate("input.topic_levels:0", &m, &Scratch::empty()).unwrap();
        assert_eq!(v, json!("orders"));
    }

    #[test]
    fn cast_to_int_from_string() {
        let m = Message::new(json!({"n": "42"}));
        let v = evaluate("input.payload:n, int", &m, &Scratch::empty()).unwrap();
        assert_eq!(v, json!(42));
    }

    #[test]
    fn static_root_is_a_literal() {
        let m = msg();
        let v = evaluate("static:hello", &m, &Scratch::empty()).unwrap();
        assert_eq!(v, json!("hello"));
    }

    #[test]
    fn write_then_read_user_data() {
        let mut m = msg();
        assign("user_data.temp:x", &mut m, json!(7)).unwrap();
        let v = evaluate("user_data.temp:x", &m, &Scratch::empty()).unwrap();
        assert_eq!(v, json!(7));
    }

    #[test]
    fn write_to_previous_is_read_only() {
        let mut m = msg();
        let err = assign("previous:x", &mut m, json!(1)).unwrap_err();
        assert!(matches!(err, ExprError::ReadOnlyRoot(_)));
    }

    #[test]
    fn read_through_scalar_yields_null_not_error() {
        let m = Message::new(json!({"a": 5}));
        let v = evaluate("input.payload:a.b", &m, &Scratch::empty()).unwrap();
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn write_through_scalar_is_an_error() {
        let mut m = Message::new(json!({"a": 5}));
        let err = assign("input.payload:a.b", &mut m, json!(1)).unwrap_err();
        assert!(matches!(err, ExprError::ScalarInPath(_)));
    }

    #[test]
    fn detects_evaluate_expression_token() {
        assert_eq!(
            is_evaluate_expression_token("evaluate_expression(input.payload:x)"),
            Some("input.payload:x")
        );
        assert_eq!(is_evaluate_expression_token("plain string"), None);
    }
}
