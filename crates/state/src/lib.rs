// SPDX-License-Identifier: Apache-2.0

//! Status snapshots for components, flows, apps, and the connector.
//!
//! These types are pure data: producing one is a cheap, lock-scoped read of the live runtime
//! state, so they can be handed to the management surface or logged without holding any lock for
//! longer than it takes to clone a handful of fields.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

/// Lifecycle phase of an app, mirroring §4.7's `created -> starting -> running -> stopping ->
/// stopped` transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppPhase {
    /// Constructed but never started.
    Created,
    /// `start()` is in progress.
    Starting,
    /// All component workers are live.
    Running,
    /// `stop()` is in progress.
    Stopping,
    /// All component workers have joined and `cleanup()` has run.
    Stopped,
}

/// Connection status of a broker adapter, re-exported here (rather than depended on directly)
/// so status snapshots don't require a dependency on `conduit-traits`' broker machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Not connected.
    Disconnected,
    /// Initial connection attempt in flight.
    Connecting,
    /// Re-establishing a previously live connection.
    Reconnecting,
    /// Live session.
    Connected,
}

/// A snapshot of one component instance's runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    /// The component's declared name.
    pub component_name: String,
    /// Instance index within its sibling group (`0..num_instances`).
    pub instance_index: u32,
    /// Current depth of the shared input queue, as observed at snapshot time.
    pub queue_depth: usize,
    /// Configured capacity of the shared input queue.
    pub queue_capacity: usize,
    /// Total messages successfully processed since start.
    pub messages_processed: u64,
    /// Total messages that raised from `invoke` since start.
    pub errors: u64,
    /// Connection status, if this component exposes one (broker input/output, request/response).
    pub connection_status: Option<ConnectionStatus>,
    /// When this snapshot was produced.
    pub observed_at: SystemTime,
}

/// A snapshot of one flow's components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStatus {
    /// The flow's declared name.
    pub flow_name: String,
    /// Status of each component group, in pipeline order; one entry per instance.
    pub components: Vec<ComponentStatus>,
}

/// A snapshot of one app's flows and lifecycle phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStatus {
    /// The app's declared name.
    pub app_name: String,
    /// Current lifecycle phase.
    pub phase: AppPhase,
    /// Status of each flow owned by this app.
    pub flows: Vec<FlowStatus>,
}

/// A snapshot of the whole connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorStatus {
    /// The configured instance name.
    pub instance_name: String,
    /// Status of every running app, keyed by name.
    pub apps: HashMap<String, AppStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_status_serializes_to_json() {
        let status = ConnectorStatus {
            instance_name: "conduit-1".to_owned(),
            apps: HashMap::from([(
                "orders".to_owned(),
                AppStatus {
                    app_name: "orders".to_owned(),
                    phase: AppPhase::Running,
                    flows: vec![FlowStatus {
                        flow_name: "main".to_owned(),
                        components: vec![],
                    }],
                },
            )]),
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"phase\":\"running\""));
    }
}
