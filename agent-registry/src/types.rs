//! Registry type definitions

use crate::events::RegistryEvent;
use ethers::types::{Address, Bytes, H256};
use serde::{Deserialize, Serialize};

pub type AgentId = u64;

/// Metadata key that mirrors the bound agent wallet
pub const AGENT_WALLET_KEY: &str = "agentWallet";

/// Highest accepted feedback value / validation response
pub const MAX_SCORE: i64 = 100;

/// Execution context handed to every mutating operation.
///
/// The executor fills in the caller and the current time. Events pushed here
/// are only committed when the operation returns `Ok`.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub caller: Address,
    pub timestamp: u64,
    pub events: Vec<RegistryEvent>,
}

impl CallContext {
    pub fn new(caller: Address, timestamp: u64) -> Self {
        Self {
            caller,
            timestamp,
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: RegistryEvent) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Full agent identifier (agentRegistry + agentId)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AgentIdentifier {
    pub agent_id: AgentId,
    pub agent_registry: String, // "eip155:8453:0x..."
}

impl AgentIdentifier {
    pub fn new(agent_id: AgentId, chain_id: u64, registry_address: Address) -> Self {
        Self {
            agent_id,
            agent_registry: format!("eip155:{}:{:?}", chain_id, registry_address),
        }
    }

    /// Parse the registry string to extract chain_id and address
    pub fn parse_registry(&self) -> Option<(u64, Address)> {
        let parts: Vec<&str> = self.agent_registry.split(':').collect();
        if parts.len() == 3 && parts[0] == "eip155" {
            let chain_id = parts[1].parse().ok()?;
            let address = parts[2].parse().ok()?;
            Some((chain_id, address))
        } else {
            None
        }
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.parse_registry().map(|(chain_id, _)| chain_id)
    }

    pub fn registry_address(&self) -> Option<Address> {
        self.parse_registry().map(|(_, addr)| addr)
    }
}

impl std::fmt::Display for AgentIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.agent_registry, self.agent_id)
    }
}

/// Key/value pair supplied at registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub key: String,
    pub value: Bytes,
}

impl MetadataEntry {
    pub fn new(key: &str, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

/// Read-only view of a registered agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentView {
    pub agent_id: AgentId,
    /// Globally unique handle, `eip155:<chain>:<identity registry>` + id
    pub identifier: AgentIdentifier,
    pub owner: Address,
    pub token_uri: String,
    pub agent_wallet: Address,
}

/// One feedback statement by a client about an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub value: i64,
    pub value_decimals: u8,
    pub tag1: String,
    pub tag2: String,
    pub endpoint: String,
    pub file_uri: String,
    pub file_hash: H256,
    pub is_revoked: bool,
}

/// Compact feedback read: (value, valueDecimals, tag1, tag2, isRevoked)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub value: i64,
    pub value_decimals: u8,
    pub tag1: String,
    pub tag2: String,
    pub is_revoked: bool,
}

impl From<&FeedbackEntry> for FeedbackRecord {
    fn from(entry: &FeedbackEntry) -> Self {
        Self {
            value: entry.value,
            value_decimals: entry.value_decimals,
            tag1: entry.tag1.clone(),
            tag2: entry.tag2.clone(),
            is_revoked: entry.is_revoked,
        }
    }
}

/// Parallel arrays returned by `read_all_feedback`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackBatch {
    pub clients: Vec<Address>,
    pub feedback_indexes: Vec<u64>,
    pub values: Vec<i64>,
    pub value_decimals: Vec<u8>,
    pub tag1s: Vec<String>,
    pub tag2s: Vec<String>,
    pub revoked_statuses: Vec<bool>,
}

impl FeedbackBatch {
    pub fn push(&mut self, client: Address, index: u64, entry: &FeedbackEntry) {
        self.clients.push(client);
        self.feedback_indexes.push(index);
        self.values.push(entry.value);
        self.value_decimals.push(entry.value_decimals);
        self.tag1s.push(entry.tag1.clone());
        self.tag2s.push(entry.tag2.clone());
        self.revoked_statuses.push(entry.is_revoked);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Aggregated feedback: matched entry count and integer mean
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub count: u64,
    pub average_value: i64,
}

/// A reply attached to a feedback entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEntry {
    pub responder: Address,
    pub response_uri: String,
    pub response_hash: H256,
}

/// Validation request row, updated in place by validator responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStatus {
    pub validator: Address,
    pub agent_id: AgentId,
    pub request_uri: String,
    pub response: u8,
    pub response_uri: String,
    pub response_hash: H256,
    pub tag: String,
    pub last_update: u64,
    pub has_response: bool,
}

/// Aggregated validation responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub count: u64,
    pub average_response: u8,
}

/// Empty filter strings match every stored value
pub fn tag_matches(filter: &str, value: &str) -> bool {
    filter.is_empty() || filter == value
}
