// SPDX-License-Identifier: Apache-2.0

//! The management surface: a small set of declarative endpoints each app can advertise, serviced
//! through a single `handle_management_request` dispatch point rather than a full HTTP stack.
//! The actual HTTP server (the embedded web management UI) is an external collaborator; this
//! crate only specifies the contract it talks to.

use serde_json::Value;

/// One endpoint an app advertises on the management surface.
#[derive(Debug, Clone)]
pub struct ManagementEndpoint {
    /// HTTP-style verb, e.g. `"GET"` or `"POST"`.
    pub method: String,
    /// Path template, e.g. `"/sessions"` or `"/sessions/{id}"`.
    pub path: String,
    /// Human-readable description, surfaced in the management UI.
    pub description: String,
}

/// A single inbound management request, already matched to an endpoint.
#[derive(Debug, Clone)]
pub struct ManagementRequest {
    /// The matched method.
    pub method: String,
    /// Path segments, split on `/` and with the endpoint's static prefix stripped.
    pub path_parts: Vec<String>,
    /// Request body, parsed as JSON (empty object if none was supplied).
    pub body: Value,
}

/// Implemented by anything that wants to expose management endpoints: apps, and the
/// request/response session registry.
pub trait ManagementSurface: Send + Sync {
    /// Endpoints this surface advertises.
    fn get_management_endpoints(&self) -> Vec<ManagementEndpoint>;

    /// Services a single request. Returns the JSON response body, or an error message.
    fn handle_management_request(&self, request: ManagementRequest) -> Result<Value, String>;
}
