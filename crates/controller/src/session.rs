// SPDX-License-Identifier: Apache-2.0

//! The multi-session request/response registry (§4.6): independently-owned requestor identities,
//! each with its own reply queue, created and destroyed on demand up to `max_sessions`. Exposed
//! on the management surface so an operator (or a calling app) can provision one per logical
//! caller instead of sharing a single `BrokerRequestResponseController` across every request.

use crate::error::Error;
use crate::request_response::{self, BrokerRequestResponseController};
use conduit_config::RequestResponseConfig;
use conduit_traits::management::{ManagementEndpoint, ManagementRequest, ManagementSurface};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Owns every live request/response session for one `broker_request_response` declaration that
/// opted into the multi-session variant via `max_sessions`.
pub struct SessionRegistry {
    config: RequestResponseConfig,
    max_sessions: Option<u32>,
    sessions: Mutex<HashMap<String, Arc<BrokerRequestResponseController>>>,
}

impl SessionRegistry {
    /// Builds an empty registry bound to `config`. `config.max_sessions` caps how many sessions
    /// may be live at once; `None` means unbounded.
    #[must_use]
    pub fn new(config: RequestResponseConfig) -> Self {
        let max_sessions = config.max_sessions;
        Self {
            config,
            max_sessions,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a new session, returning its id. Refused once `max_sessions` live sessions exist.
    pub fn create_session(&self) -> Result<String, Error> {
        {
            let sessions = self.sessions.lock();
            if let Some(max) = self.max_sessions {
                if sessions.len() as u32 >= max {
                    return Err(Error::SessionCapacity(max));
                }
            }
        }
        let controller = request_response::start_controller(&self.config)?;
        let id = Uuid::new_v4().to_string();
        self.sessions.lock().insert(id.clone(), controller);
        Ok(id)
    }

    /// Tears down a session's reader thread and removes it from the registry.
    pub fn destroy_session(&self, id: &str) -> Result<(), Error> {
        let controller = self.sessions.lock().remove(id).ok_or_else(|| Error::UnknownSession(id.to_owned()))?;
        controller.shutdown();
        Ok(())
    }

    /// The live session ids, in no particular order.
    #[must_use]
    pub fn list_sessions(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    /// The controller backing a given session id, if it's still live.
    #[must_use]
    pub fn get_session(&self, id: &str) -> Option<Arc<BrokerRequestResponseController>> {
        self.sessions.lock().get(id).cloned()
    }
}

impl ManagementSurface for SessionRegistry {
    fn get_management_endpoints(&self) -> Vec<ManagementEndpoint> {
        vec![
            ManagementEndpoint {
                method: "GET".to_owned(),
                path: "/sessions".to_owned(),
                description: "List live request/response session ids".to_owned(),
            },
            ManagementEndpoint {
                method: "POST".to_owned(),
                path: "/sessions".to_owned(),
                description: "Create a new request/response session".to_owned(),
            },
            ManagementEndpoint {
                method: "DELETE".to_owned(),
                path: "/sessions/{id}".to_owned(),
                description: "Destroy a request/response session".to_owned(),
            },
        ]
    }

    fn handle_management_request(&self, request: ManagementRequest) -> Result<Value, String> {
        match (request.method.as_str(), request.path_parts.as_slice()) {
            ("GET", []) => Ok(json!({ "sessions": self.list_sessions() })),
            ("POST", []) => {
                let id = self.create_session().map_err(|e| e.to_string())?;
                Ok(json!({ "id": id, "response_topic": self.get_session(&id).map(|c| c.response_topic().to_owned()) }))
            }
            ("DELETE", [id]) => {
                self.destroy_session(id).map_err(|e| e.to_string())?;
                Ok(json!({ "destroyed": id }))
            }
            _ => Err(format!("no session endpoint for {} /{}", request.method, request.path_parts.join("/"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_config::{BrokerConfig, ConfigTree, PayloadEncoding, PayloadFormat};
    use std::time::Duration;

    fn config(max_sessions: Option<u32>) -> RequestResponseConfig {
        RequestResponseConfig {
            broker: BrokerConfig {
                broker_type: "dev".to_owned(),
                queue_name: None,
                subscriptions: vec![],
                max_redelivery: None,
                create_queue_on_start: true,
                broker_config: ConfigTree::Null,
                payload_encoding: PayloadEncoding::None,
                payload_format: PayloadFormat::Json,
            },
            response_topic_prefix: "responses/sessions".to_owned(),
            response_topic_suffix: "res".to_owned(),
            request_expiry_ms: Duration::from_secs(1),
            response_topic_insertion_expression: None,
            max_sessions,
        }
    }

    #[test]
    fn create_list_and_destroy_a_session() {
        let registry = SessionRegistry::new(config(None));
        let id = registry.create_session().unwrap();
        assert_eq!(registry.list_sessions(), vec![id.clone()]);
        registry.destroy_session(&id).unwrap();
        assert!(registry.list_sessions().is_empty());
    }

    #[test]
    fn destroying_an_unknown_session_is_an_error() {
        let registry = SessionRegistry::new(config(None));
        assert!(matches!(registry.destroy_session("nope"), Err(Error::UnknownSession(_))));
    }

    #[test]
    fn refuses_to_exceed_max_sessions() {
        let registry = SessionRegistry::new(config(Some(1)));
        registry.create_session().unwrap();
        assert!(matches!(registry.create_session(), Err(Error::SessionCapacity(1))));
    }

    #[test]
    fn management_endpoints_round_trip_through_handle_management_request() {
        let registry = SessionRegistry::new(config(None));
        let created = registry
            .handle_management_request(ManagementRequest {
                method: "POST".to_owned(),
                path_parts: vec![],
                body: json!({}),
            })
            .unwrap();
        let id = created["id"].as_str().unwrap().to_owned();

        let listed = registry
            .handle_management_request(ManagementRequest {
                method: "GET".to_owned(),
                path_parts: vec![],
                body: json!({}),
            })
            .unwrap();
        assert_eq!(listed["sessions"], json!([id.clone()]));

        registry
            .handle_management_request(ManagementRequest {
                method: "DELETE".to_owned(),
                path_parts: vec![id],
                body: json!({}),
            })
            .unwrap();
        assert!(registry.list_sessions().is_empty());
    }
}
