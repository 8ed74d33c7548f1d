use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A networked firing controller the backend knows how to reach.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ControllerEndpoint {
    pub id: Uuid,
    pub name: String,
    /// `host:port` of the controller's HTTP interface.
    pub address: String,
}
