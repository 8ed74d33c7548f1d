use std::{io, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::model::{cue::RelayTarget, device::ControllerEndpoint};

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum DispatchError {
    #[error("controller did not answer in time")]
    Timeout,
    #[error("controller unreachable: {0}")]
    Connection(String),
    #[error("controller rejected the command: {0}")]
    Rejected(String),
}

impl DispatchError {
    /// Timeouts and connection failures mark the controller as disconnected.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection(_))
    }
}

/// Control surface of a firing controller. Calls block until the controller
/// answers or the transport gives up, so callers run them off the async runtime.
pub trait HardwareDispatcher: Send + Sync {
    fn set_area(&self, controller: &ControllerEndpoint, area: u8) -> Result<(), DispatchError>;
    fn sync_area(&self, controller: &ControllerEndpoint, area: u8) -> Result<(), DispatchError>;
    fn fire_channel(&self, controller: &ControllerEndpoint, channel: u8)
    -> Result<(), DispatchError>;
    fn fire_relays(
        &self,
        controller: &ControllerEndpoint,
        relays: &RelayTarget,
    ) -> Result<(), DispatchError>;
    fn test_all_channels(&self, controller: &ControllerEndpoint) -> Result<(), DispatchError>;
    /// Best effort and idempotent; failures are only logged.
    fn emergency_stop(&self, controller: &ControllerEndpoint);
}

#[derive(Deserialize)]
struct ControllerReply {
    #[serde(default = "reply_success_default")]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

fn reply_success_default() -> bool {
    true
}

/// Talks to controllers over their HTTP interface.
pub struct HttpDispatcher {
    agent: ureq::Agent,
}

impl HttpDispatcher {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Self { agent }
    }

    fn post(
        &self,
        controller: &ControllerEndpoint,
        path: &str,
        body: serde_json::Value,
    ) -> Result<(), DispatchError> {
        let url = format!("http://{}{}", controller.address, path);
        log::debug!("POST {} {}", url, body);

        let response = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .set("Accept", "application/json")
            .send_string(&body.to_string());
        let text = match response {
            Ok(resp) => resp.into_string().map_err(classify_io)?,
            Err(ureq::Error::Status(code, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                return Err(DispatchError::Rejected(format!("HTTP {code}: {text}")));
            }
            Err(ureq::Error::Transport(transport)) => return Err(classify_transport(&transport)),
        };

        match serde_json::from_str::<ControllerReply>(&text) {
            Ok(reply) if !reply.success => Err(DispatchError::Rejected(
                reply.message.unwrap_or_else(|| "unspecified failure".to_string()),
            )),
            _ => Ok(()),
        }
    }
}

fn is_timeout(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

fn classify_io(error: io::Error) -> DispatchError {
    if is_timeout(error.kind()) {
        DispatchError::Timeout
    } else {
        DispatchError::Connection(error.to_string())
    }
}

fn classify_transport(transport: &ureq::Transport) -> DispatchError {
    let timed_out = std::error::Error::source(transport)
        .and_then(|e| e.downcast_ref::<io::Error>())
        .is_some_and(|e| is_timeout(e.kind()))
        || transport.to_string().contains("timed out");
    if timed_out {
        DispatchError::Timeout
    } else {
        DispatchError::Connection(transport.to_string())
    }
}

impl HardwareDispatcher for HttpDispatcher {
    fn set_area(&self, controller: &ControllerEndpoint, area: u8) -> Result<(), DispatchError> {
        self.post(controller, "/api/area", json!({ "area": area }))
    }

    fn sync_area(&self, controller: &ControllerEndpoint, area: u8) -> Result<(), DispatchError> {
        self.post(controller, "/api/area/sync", json!({ "area": area }))
    }

    fn fire_channel(
        &self,
        controller: &ControllerEndpoint,
        channel: u8,
    ) -> Result<(), DispatchError> {
        self.post(controller, "/api/fire", json!({ "channel": channel }))
    }

    fn fire_relays(
        &self,
        controller: &ControllerEndpoint,
        relays: &RelayTarget,
    ) -> Result<(), DispatchError> {
        let relays = match relays {
            RelayTarget::All => json!("all"),
            RelayTarget::Only(indices) => json!(indices),
        };
        self.post(controller, "/api/relays", json!({ "relays": relays }))
    }

    fn test_all_channels(&self, controller: &ControllerEndpoint) -> Result<(), DispatchError> {
        self.post(controller, "/api/test", json!({}))
    }

    fn emergency_stop(&self, controller: &ControllerEndpoint) {
        if let Err(e) = self.post(controller, "/api/emergency-stop", json!({})) {
            log::warn!(
                "Emergency stop to '{}' ({}) failed: {}",
                controller.name,
                controller.address,
                e
            );
        }
    }
}
