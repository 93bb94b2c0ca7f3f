// SPDX-License-Identifier: Apache-2.0

//! Errors for flow construction, app lifecycle, and the request/response controller.

use miette::Diagnostic;

/// Errors raised assembling or running the controller layer.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// The underlying configuration document was invalid.
    #[error(transparent)]
    Config(#[from] conduit_config::Error),

    /// A component's `component_module`/`component_class` name isn't registered.
    #[error("unknown component module `{0}`")]
    UnknownComponentModule(String),

    /// A `broker_type` isn't registered.
    #[error("unknown broker type `{0}`")]
    UnknownBrokerType(String),

    /// Building a component instance failed.
    #[error("failed to build component `{name}`: {source}")]
    ComponentBuild {
        /// The component's declared name.
        name: String,
        /// Underlying failure.
        #[source]
        source: conduit_engine::ComponentError,
    },

    /// A broker adapter operation (connect, bind, subscribe) failed while assembling a flow.
    #[error(transparent)]
    Broker(#[from] conduit_traits::BrokerError),

    /// An app declared a name already in use by the connector.
    #[error("app `{0}` already exists")]
    DuplicateApp(String),

    /// The Prometheus metrics registry could not be constructed (e.g. a duplicate metric name).
    #[error("failed to build metrics reporter: {0}")]
    Metrics(String),

    /// A lookup (`get_app`, `remove_app`, `send_message_to_flow`) referenced an unknown name.
    #[error("unknown {what} `{name}`")]
    UnknownName {
        /// What kind of name was missing (`app`, `flow`, ...).
        what: &'static str,
        /// The missing name.
        name: String,
    },

    /// `App::start` was called from a phase other than `Stopped`.
    #[error("app `{name}` cannot start from phase {phase:?}")]
    InvalidStartPhase {
        /// The app's name.
        name: String,
        /// The phase it was actually in.
        phase: conduit_state::AppPhase,
    },

    /// A request/response call exceeded `request_expiry_ms` without a (further) reply.
    #[error("request/response call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// `create_session` was refused because the registry is already at `max_sessions`.
    #[error("session registry is at capacity ({0})")]
    SessionCapacity(u32),

    /// A session lookup referenced an id that doesn't exist (or was already destroyed).
    #[error("unknown session `{0}`")]
    UnknownSession(String),
}
