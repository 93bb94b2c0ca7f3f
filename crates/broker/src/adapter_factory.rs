// SPDX-License-Identifier: Apache-2.0

//! Registry of broker adapter constructors, keyed by `broker_type` (§4.3, §6).
//!
//! Mirrors `conduit_engine::factory`'s `ComponentFactory` registry: a `linkme` distributed slice
//! populated once per adapter implementation, looked up by `conduit-controller` when expanding a
//! `BrokerConfig` into a live adapter.

use crate::dev::DevBrokerAdapter;
use conduit_config::ConfigTree;
use conduit_traits::{BrokerAdapter, BrokerError};
use std::sync::Arc;

/// A named constructor for a broker adapter implementation.
pub struct BrokerAdapterFactory {
    /// The `broker_type` string this factory answers to.
    pub name: &'static str,
    /// Builds a new adapter instance from its `broker_config` tree. Each call returns an
    /// independently-owned adapter; nothing here is shared across apps.
    pub create: fn(&ConfigTree) -> Result<Arc<dyn BrokerAdapter>, BrokerError>,
}

/// The process-wide registry of broker adapter factories.
#[linkme::distributed_slice]
pub static BROKER_ADAPTER_FACTORIES: [BrokerAdapterFactory] = [..];

/// Looks up a registered adapter factory by its `broker_type` name.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static BrokerAdapterFactory> {
    BROKER_ADAPTER_FACTORIES.iter().find(|factory| factory.name == name)
}

#[linkme::distributed_slice(BROKER_ADAPTER_FACTORIES)]
static DEV_BROKER_ADAPTER_FACTORY: BrokerAdapterFactory = BrokerAdapterFactory {
    name: "dev",
    create: |_config| Ok(Arc::new(DevBrokerAdapter::new())),
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_adapter_is_registered() {
        let factory = lookup("dev").expect("dev adapter should be registered");
        let adapter = (factory.create)(&ConfigTree::Null).unwrap();
        assert_eq!(adapter.status(), conduit_traits::BrokerStatus::Disconnected);
    }

    #[test]
    fn unknown_broker_type_is_not_registered() {
        assert!(lookup("does-not-exist").is_none());
    }
}
