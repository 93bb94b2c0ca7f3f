// SPDX-License-Identifier: Apache-2.0

//! The component factory registry (§4.1/§6).
//!
//! A flow's `component_module` names a Rust type the same way the teacher's pipeline config names
//! a processor/receiver/exporter URN. Each component module registers one [`ComponentFactory`]
//! into the process-wide [`COMPONENT_FACTORIES`] slice via `linkme`, the same distributed-slice
//! mechanism the teacher uses for its own processor/receiver/exporter factories — just without the
//! teacher's `pipeline_factory!` proc-macro wrapper, since this crate has far fewer registration
//! sites and the macro only exists there to cut boilerplate across a much larger surface.

use crate::component::Component;
use crate::error::ComponentError;
use conduit_config::ConfigTree;

/// A named constructor for a component module, registered once per module via
/// [`COMPONENT_FACTORIES`].
///
/// `create` and `validate_config` are plain function pointers rather than trait objects, mirroring
/// the teacher's `ReceiverFactory`/`ProcessorFactory`/`ExporterFactory` shape: factories are
/// `'static` data, not runtime state, so there's nothing to box.
pub struct ComponentFactory {
    /// The `component_module` string this factory answers to.
    pub name: &'static str,
    /// Validates a `component_config` tree before the component is constructed. Most modules wire
    /// this to `conduit_config::validate_component_config::<TheirConfig>`.
    pub validate_config: fn(&ConfigTree) -> Result<(), conduit_config::Error>,
    /// Builds a new component instance from its resolved configuration. Called once per sibling
    /// instance, since a component's own state (e.g. a broker connection handle) is not shared
    /// across siblings.
    pub create: fn(&ConfigTree) -> Result<Box<dyn Component>, ComponentError>,
}

/// The process-wide registry of component factories, populated by every module that implements
/// [`Component`] via `#[distributed_slice(COMPONENT_FACTORIES)]`.
#[linkme::distributed_slice]
pub static COMPONENT_FACTORIES: [ComponentFactory] = [..];

/// Looks up a registered factory by its `component_module` name.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static ComponentFactory> {
    COMPONENT_FACTORIES.iter().find(|factory| factory.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use serde_json::Value;

    struct Noop;

    impl Component for Noop {
        fn invoke(&mut self, _message: &mut Message, data: Value) -> Result<Option<Value>, ComponentError> {
            Ok(Some(data))
        }
    }

    #[linkme::distributed_slice(COMPONENT_FACTORIES)]
    static NOOP_FACTORY: ComponentFactory = ComponentFactory {
        name: "test_noop",
        validate_config: conduit_config::no_config,
        create: |_config| Ok(Box::new(Noop)),
    };

    #[test]
    fn lookup_finds_registered_factory() {
        let factory = lookup("test_noop").expect("test_noop should be registered");
        assert_eq!(factory.name, "test_noop");
        let component = (factory.create)(&ConfigTree::Null);
        assert!(component.is_ok());
    }

    #[test]
    fn lookup_returns_none_for_unknown_module() {
        assert!(lookup("does_not_exist").is_none());
    }
}
