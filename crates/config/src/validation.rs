// SPDX-License-Identifier: Apache-2.0

//! Validation helpers for a component's `component_config` tree.
//!
//! A component factory registers a typed Rust struct for its `component_config` shape. These
//! helpers let a registry entry wire up deserialization-level validation with a single
//! monomorphised function pointer, the same way a flow-build step validates every component it
//! instantiates before running anything.
//!
//! **Scope:** validation here is *static* only — it checks that the tree can deserialize into the
//! expected type. It does not detect runtime issues such as an unreachable broker endpoint or a
//! missing file; those still surface when the component actually starts.

use crate::error::Error;
use crate::value::ConfigTree;

/// Validates that a `component_config` tree can deserialize into the expected configuration type
/// `T`.
///
/// # Example
/// ```ignore
/// validate_config: validate_component_config::<MyComponentConfig>,
/// ```
pub fn validate_component_config<T: serde::de::DeserializeOwned>(
    config: &ConfigTree,
) -> Result<(), Error> {
    let _: T = serde_json::from_value(config.to_json()).map_err(|e| Error::InvalidUserConfig {
        error: e.to_string(),
    })?;
    Ok(())
}

/// Validator for components that accept **no** `component_config`.
///
/// Accepts `Null` (config key omitted) and empty objects. Rejects anything else so that typos or
/// misplaced config blocks are caught at load time rather than ignored silently.
///
/// # Example
/// ```ignore
/// validate_config: no_config,
/// ```
pub fn no_config(config: &ConfigTree) -> Result<(), Error> {
    match config {
        ConfigTree::Null => Ok(()),
        ConfigTree::Object(map) if map.is_empty() => Ok(()),
        other => Err(Error::InvalidUserConfig {
            error: format!(
                "this component does not accept configuration, but received: {}",
                other.to_json()
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Shape {
        #[allow(dead_code)]
        topic: String,
    }

    #[test]
    fn validate_component_config_accepts_matching_shape() {
        let tree = ConfigTree::from_json(&json!({"topic": "orders"}));
        assert!(validate_component_config::<Shape>(&tree).is_ok());
    }

    #[test]
    fn validate_component_config_rejects_mismatched_shape() {
        let tree = ConfigTree::from_json(&json!({"wrong_field": 1}));
        assert!(matches!(
            validate_component_config::<Shape>(&tree),
            Err(Error::InvalidUserConfig { .. })
        ));
    }

    #[test]
    fn no_config_accepts_null_and_empty_object() {
        assert!(no_config(&ConfigTree::Null).is_ok());
        assert!(no_config(&ConfigTree::from_json(&json!({}))).is_ok());
    }

    #[test]
    fn no_config_rejects_nonempty_object() {
        assert!(no_config(&ConfigTree::from_json(&json!({"a": 1}))).is_err());
    }
}
