//! Contains the data models for API requests and responses.

use serde::{Deserialize, Serialize};

use crate::arm::Outcome;
use crate::telemetry::Telemetry;

/// A textual command in the line-transport syntax.
#[derive(Debug, Deserialize, Serialize)]
pub struct CommandRequest {
    pub command: String,
}

/// Result of a command together with the arm state after it.
#[derive(Debug, Deserialize, Serialize)]
pub struct CommandResponse {
    pub outcome: Outcome,
    pub telemetry: Telemetry,
}

/// Body of every non-2xx response.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
