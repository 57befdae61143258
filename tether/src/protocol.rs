//! Wire protocol for the correlation bridge.
//!
//! One frame shape travels in both directions; a request carries an operation
//! tag, a response does not. Compatibility is purely structural: no version
//! field, no checksum, no magic bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The unit of exchange on a transport.
///
/// A request names the operation to run on the remote side; a response echoes
/// the request's correlation id and carries only the result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Ties a response back to the call that produced it. Unique only within
    /// the issuing bridge; the two sides' counters are independent.
    pub correlation_id: String,
    /// Present on requests, absent on responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Absent on the wire reads as null.
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    pub fn request(
        correlation_id: impl Into<String>,
        operation: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            operation: Some(operation.into()),
            payload,
        }
    }

    pub fn response(correlation_id: impl Into<String>, payload: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            operation: None,
            payload,
        }
    }

    pub fn is_request(&self) -> bool {
        self.operation.is_some()
    }

    /// Parse an inbound wire value.
    ///
    /// Anything without a non-empty string correlation id is foreign traffic
    /// on the channel and yields `None`; the caller drops it without raising
    /// an error.
    pub fn from_wire(raw: Value) -> Option<Self> {
        let frame: Frame = serde_json::from_value(raw).ok()?;
        if frame.correlation_id.is_empty() {
            return None;
        }
        Some(frame)
    }
}
