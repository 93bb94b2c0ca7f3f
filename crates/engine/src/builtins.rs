// SPDX-License-Identifier: Apache-2.0

//! Built-in component modules with no broker or controller dependency: registered directly in
//! this crate so a bare flow (e.g. the §8 "pass-through" scenario) doesn't need `conduit-broker`
//! or `conduit-controller` pulled in just to exercise the runtime.

use crate::component::Component;
use crate::error::ComponentError;
use crate::factory::{ComponentFactory, COMPONENT_FACTORIES};
use conduit_config::ConfigTree;
use serde_json::Value;

/// Forwards `data` unchanged. Used by tests and by configs that need a pipeline stage purely for
/// its side effects (transforms, request/response) with no transformation of its own.
pub struct PassThrough;

impl Component for PassThrough {
    fn invoke(&mut self, _message: &mut crate::message::Message, data: Value) -> Result<Option<Value>, ComponentError> {
        Ok(Some(data))
    }
}

#[linkme::distributed_slice(COMPONENT_FACTORIES)]
static PASS_THROUGH_FACTORY: ComponentFactory = ComponentFactory {
    name: "pass_through",
    validate_config: conduit_config::no_config,
    create: |_config: &ConfigTree| Ok(Box::new(PassThrough)),
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::lookup;
    use serde_json::json;

    #[test]
    fn pass_through_is_registered_and_forwards_data() {
        let factory = lookup("pass_through").expect("pass_through should be registered");
        let mut component = (factory.create)(&ConfigTree::Null).unwrap();
        let mut message = crate::message::Message::new(json!(null));
        let result = component.invoke(&mut message, json!(42)).unwrap();
        assert_eq!(result, Some(json!(42)));
    }
}
