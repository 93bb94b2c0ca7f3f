// SPDX-License-Identifier: Apache-2.0

//! Broker adapter trait support, payload codec, topic wildcard matching, and the in-process
//! dev/test broker, plus the `BrokerInput`/`BrokerOutput` terminal components that bridge a flow
//! to a broker adapter.
//!
//! `conduit-traits::BrokerAdapter` is the abstract contract (kept there to avoid a dependency
//! cycle with `conduit-engine`); this crate supplies the one concrete implementation built for
//! this exercise (the in-process dev adapter) plus everything a real adapter would also need:
//! the payload codec and the Solace-style subscription matcher.

pub mod adapter_factory;
pub mod codec;
pub mod dev;
pub mod input;
pub mod output;
pub mod status;
pub mod wildcard;

pub use adapter_factory::{lookup as lookup_broker_adapter, BrokerAdapterFactory, BROKER_ADAPTER_FACTORIES};
pub use dev::DevBrokerAdapter;
pub use input::{BrokerInput, BrokerInputConfig};
pub use output::{BrokerOutput, BrokerOutputConfig};
pub use status::{ReconnectStrategy, RetryState};
pub use wildcard::{compile_topic_pattern, CompiledSubscription, DEFAULT_DELIMITER};
