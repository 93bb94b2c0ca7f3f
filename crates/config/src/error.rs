// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.

use miette::Diagnostic;

/// Errors raised while parsing or validating a connector configuration.
///
/// Config errors are fatal at startup: the caller is expected to print the diagnostic and abort
/// rather than attempt partial recovery.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// The top-level document failed to deserialize.
    #[error("failed to parse configuration: {details}")]
    #[diagnostic(code(conduit_config::parse_error))]
    Parse {
        /// Underlying deserialization error message.
        details: String,
    },

    /// An `invoke:` directive was missing a required field.
    #[error("invalid `invoke:` directive: {details}")]
    #[diagnostic(code(conduit_config::invalid_invoke))]
    InvalidInvoke {
        /// Description of what was missing or malformed.
        details: String,
    },

    /// A required field was absent from a component/flow/app declaration.
    #[error("missing required field `{field}` in {context}")]
    #[diagnostic(code(conduit_config::missing_field))]
    MissingField {
        /// The field that was required.
        field: String,
        /// Human-readable location, e.g. `"app 'orders', flow 'ingest'"`.
        context: String,
    },

    /// An app declared neither `flows:` nor `broker:` + `components:`, or declared both.
    #[error("app `{name}` must declare exactly one of `flows` or `broker`+`components`")]
    #[diagnostic(code(conduit_config::ambiguous_app_shape))]
    AmbiguousAppShape {
        /// The offending app's name.
        name: String,
    },

    /// Two apps in the same document share a name.
    #[error("duplicate app name `{name}`")]
    #[diagnostic(code(conduit_config::duplicate_app))]
    DuplicateApp {
        /// The duplicated name.
        name: String,
    },

    /// A component declared neither `component_module` nor `component_class`, or declared both.
    #[error("component `{name}` must declare exactly one of `component_module` or `component_class`")]
    #[diagnostic(code(conduit_config::ambiguous_component_shape))]
    AmbiguousComponentShape {
        /// The offending component's name.
        name: String,
    },

    /// A `component_config` tree failed to deserialize into the shape its component module
    /// expects.
    #[error("invalid component configuration: {error}")]
    #[diagnostic(code(conduit_config::invalid_user_config))]
    InvalidUserConfig {
        /// Underlying deserialization error message.
        error: String,
    },
}
