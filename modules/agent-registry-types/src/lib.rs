//! Shared types for the agent registry service and its RPC clients.
//!
//! Addresses and hashes travel as 0x-prefixed hex strings.

use serde::{Deserialize, Serialize};

// =====================================================
// Identity queries
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub agent_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRequest {
    pub agent_id: u64,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerRequest {
    pub owner: String,
}

/// Metadata value as hex plus a UTF-8 rendering when it decodes cleanly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataValue {
    pub key: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utf8: Option<String>,
}

// =====================================================
// Reputation queries
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub agent_id: u64,
    pub client: String,
    pub index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRequest {
    pub agent_id: u64,
    pub client: String,
}

/// Filters for `all_feedback` and `summary`; empty strings and lists match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackFilter {
    pub agent_id: u64,
    #[serde(default)]
    pub clients: Vec<String>,
    #[serde(default)]
    pub tag1: String,
    #[serde(default)]
    pub tag2: String,
    #[serde(default)]
    pub include_revoked: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseCountRequest {
    pub agent_id: u64,
    /// Omitted or zero address matches every client
    #[serde(default)]
    pub client: Option<String>,
    /// 0 matches every index
    #[serde(default)]
    pub index: u64,
    #[serde(default)]
    pub responders: Vec<String>,
}

// =====================================================
// Validation queries
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationStatusRequest {
    pub request_hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSummaryRequest {
    pub agent_id: u64,
    #[serde(default)]
    pub validators: Vec<String>,
    #[serde(default)]
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorRequest {
    pub validator: String,
}

// =====================================================
// Events
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsRequest {
    #[serde(default)]
    pub since: u64,
    #[serde(default = "default_event_limit")]
    pub limit: usize,
}

fn default_event_limit() -> usize {
    100
}

// =====================================================
// RPC Envelope
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error taxonomy label: authorization, validation, state, signature or storage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl<T: Serialize> RpcResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
            error_kind: None,
        }
    }

    pub fn err_kind(kind: &str, msg: impl Into<String>) -> Self {
        Self {
            error_kind: Some(kind.to_string()),
            ..Self::err(msg)
        }
    }
}

// =====================================================
// Service Status
// =====================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub chain_id: u64,
    pub total_agents: u64,
    pub committed_transactions: u64,
    pub total_events: u64,
    pub journaled_transactions: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_omits_data() {
        let resp: RpcResponse<u64> = RpcResponse::err_kind("state", "unknown request");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_kind"], "state");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_filters_default_to_wildcards() {
        let filter: FeedbackFilter = serde_json::from_str(r#"{"agent_id": 4}"#).unwrap();
        assert!(filter.clients.is_empty());
        assert!(filter.tag1.is_empty());
        assert!(!filter.include_revoked);

        let events: EventsRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(events.since, 0);
        assert_eq!(events.limit, 100);
    }
}
