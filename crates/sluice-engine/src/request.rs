use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_injector::RunnableGraph;
use sluice_packet::Packet;
use sluice_relay::RequestState;
use sluice_resolver::ResolvedCapabilities;

/// A fresh, collision-resistant request id.
pub fn generate_request_id() -> String {
  uuid::Uuid::new_v4().to_string()
}

/// A request to run one packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
  pub packet: String,
  pub version: String,
  #[serde(default)]
  pub parameters: HashMap<String, Value>,
  pub tier: String,
  /// Caller-chosen id. One is generated when absent.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub request_id: Option<String>,
}

impl SubmitRequest {
  pub fn new(packet: &str, version: &str, tier: &str) -> Self {
    Self {
      packet: packet.to_string(),
      version: version.to_string(),
      parameters: HashMap::new(),
      tier: tier.to_string(),
      request_id: None,
    }
  }

  pub fn with_id(mut self, request_id: &str) -> Self {
    self.request_id = Some(request_id.to_string());
    self
  }

  pub fn with_parameter(mut self, name: &str, value: Value) -> Self {
    self.parameters.insert(name.to_string(), value);
    self
  }
}

/// An accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
  pub request_id: String,
  /// The id was already known; no new execution was started.
  pub existing: bool,
  pub state: RequestState,
}

/// A request that passed every gate, ready to be placed.
#[derive(Debug, Clone)]
pub struct Checked {
  pub packet: Arc<Packet>,
  pub graph: RunnableGraph,
  pub capabilities: ResolvedCapabilities,
}
