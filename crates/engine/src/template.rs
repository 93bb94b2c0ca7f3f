// SPDX-License-Identifier: Apache-2.0

//! The `{{encoding://expr}}` template language.
//!
//! A template is ordinary text with zero or more `{{...}}` placeholders; each placeholder names
//! an encoding and an expression, evaluates the expression against the current message, and
//! substitutes the encoded result back into the string. Used by `template:` expressions and
//! anywhere configuration accepts a templated string (e.g. outbound topic names).

use crate::error::ExprError;
use crate::expression::{self, Scratch};
use crate::message::Message;
use base64::Engine as _;
use serde_json::Value;

const BASE64_ENGINE: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Renders a template string against a message.
pub fn render(template: &str, message: &Message, scratch: &Scratch) -> Result<String, ExprError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    loop {
        let Some(start) = rest.find("{{") else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            return Err(ExprError::MalformedTemplate(
                template.to_owned(),
                "unterminated `{{`".to_owned(),
            ));
        };
        let placeholder = &after_open[..end];
        out.push_str(&render_placeholder(placeholder, message, scratch, template)?);
        rest = &after_open[end + 2..];
    }

    Ok(out)
}

fn render_placeholder(
    placeholder: &str,
    message: &Message,
    scratch: &Scratch,
    template: &str,
) -> Result<String, ExprError> {
    let (encoding, expr) = placeholder.split_once("://").ok_or_else(|| {
        ExprError::MalformedTemplate(
            template.to_owned(),
            format!("placeholder `{placeholder}` is missing an `<encoding>://` prefix"),
        )
    })?;

    let value = expression::evaluate(expr, message, scratch)?;
    encode(encoding, &value)
}

fn encode(encoding: &str, value: &Value) -> Result<String, ExprError> {
    if let Some(mime) = encoding.strip_prefix("datauri:") {
        let bytes = value_to_text(value).into_bytes();
        return Ok(format!("data:{mime};base64,{}", BASE64_ENGINE.encode(bytes)));
    }

    match encoding {
        "text" => Ok(value_to_text(value)),
        "json" => serde_json::to_string(value)
            .map_err(|e| ExprError::MalformedTemplate(encoding.to_owned(), e.to_string())),
        "yaml" => serde_yaml::to_string(value)
            .map(|s| s.trim_end().to_owned())
            .map_err(|e| ExprError::MalformedTemplate(encoding.to_owned(), e.to_string())),
        "base64" => Ok(BASE64_ENGINE.encode(value_to_text(value).into_bytes())),
        other => Err(ExprError::UnknownEncoding(other.to_owned())),
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
