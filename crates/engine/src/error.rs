// SPDX-License-Identifier: Apache-2.0

//! Errors for the component runtime.

use conduit_traits::NackOutcome;

/// Classification of a processing-time error, following the teacher's
/// `{Receiver,Processor,Exporter}ErrorKind` convention of a small classification enum with a
/// `Display` impl rather than one flat error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentErrorKind {
    /// `invoke()` itself raised.
    Invoke,
    /// An input/output transform failed (missing expression, type mismatch).
    Transform,
    /// Payload decode/encode at the broker boundary failed.
    Decode,
    /// A component's configuration was invalid in a way only detectable at construction time.
    Configuration,
    /// An operation was attempted after the component began shutting down.
    Shutdown,
    /// Anything not covered above (e.g. a missing broker receipt token on nack).
    Other,
}

impl std::fmt::Display for ComponentErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComponentErrorKind::Invoke => "invoke",
            ComponentErrorKind::Transform => "transform",
            ComponentErrorKind::Decode => "decode",
            ComponentErrorKind::Configuration => "configuration",
            ComponentErrorKind::Shutdown => "shutdown",
            ComponentErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// A processing-time error raised while running a component's worker loop.
#[derive(thiserror::Error, Debug)]
#[error("{kind}: {message}")]
pub struct ComponentError {
    /// The classification used to pick a default nack reaction and error-flow record.
    pub kind: ComponentErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl ComponentError {
    /// Builds a new component error of the given kind.
    pub fn new(kind: ComponentErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Convenience constructor for [`ComponentErrorKind::Invoke`].
    pub fn invoke(message: impl Into<String>) -> Self {
        Self::new(ComponentErrorKind::Invoke, message)
    }

    /// Convenience constructor for [`ComponentErrorKind::Transform`].
    pub fn transform(message: impl Into<String>) -> Self {
        Self::new(ComponentErrorKind::Transform, message)
    }

    /// Convenience constructor for [`ComponentErrorKind::Decode`].
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ComponentErrorKind::Decode, message)
    }

    /// Convenience constructor for [`ComponentErrorKind::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ComponentErrorKind::Configuration, message)
    }

    /// The default nack outcome for this error's kind, absent a component override. Per the
    /// resolved open question on missing broker receipts, everything defaults to `Rejected`
    /// unless a component's `nack_reaction_to_exception` hook says otherwise.
    #[must_use]
    pub fn default_nack_outcome(&self) -> NackOutcome {
        NackOutcome::Rejected
    }
}

/// Errors evaluating an expression (`get_data`/`set_data`, transform expressions, templates).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    /// The expression string did not match any known root.
    #[error("unknown expression root in `{0}`")]
    UnknownRoot(String),
    /// The expression was syntactically malformed (e.g. missing `:`).
    #[error("malformed expression `{0}`")]
    Malformed(String),
    /// A write attempted to pass through a path segment that already holds a scalar. Reads
    /// through a scalar instead resolve to `None` (see SPEC_FULL.md's resolved open question).
    #[error("cannot write through scalar value in expression `{0}`")]
    ScalarInPath(String),
    /// A requested cast could not be applied to the resolved value.
    #[error("cannot cast value to `{cast}` in expression `{expr}`")]
    InvalidCast {
        /// The expression being evaluated.
        expr: String,
        /// The requested cast keyword.
        cast: String,
    },
    /// The expression's root does not support writes (e.g. `previous`, `static:`, `item`).
    #[error("expression root in `{0}` is read-only")]
    ReadOnlyRoot(String),
    /// A `template:` expression's `{{...}}` syntax was malformed.
    #[error("malformed template `{0}`: {1}")]
    MalformedTemplate(String, String),
    /// A template referenced an encoding that isn't recognized.
    #[error("unknown template encoding `{0}`")]
    UnknownEncoding(String),
}

/// Top-level engine errors, covering both config-time and runtime-structural failures.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration failed to parse or validate.
    #[error(transparent)]
    Config(#[from] conduit_config::Error),

    /// An expression failed to evaluate.
    #[error(transparent)]
    Expr(#[from] ExprError),

    /// A component's input queue or a reply queue was closed unexpectedly.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// A named component factory was not found in the registry.
    #[error("unknown component module `{0}`")]
    UnknownComponentModule(String),

    /// A flow referenced a component or flow name that doesn't exist.
    #[error("unknown {what} `{name}`")]
    UnknownName {
        /// What kind of name was missing (`component`, `flow`, ...).
        what: &'static str,
        /// The missing name.
        name: String,
    },
}
