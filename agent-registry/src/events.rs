//! Registry events
//!
//! Append-only emissions consumed by off-chain indexers. Registries push
//! events into the call context; the ledger commits them into an `EventLog`
//! once the call succeeds.

use crate::proxy::RegistryKind;
use crate::types::AgentId;
use ethers::types::{Address, Bytes, H256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

/// keccak256 of a string, as used for indexed string topics
pub fn string_hash(s: &str) -> H256 {
    H256::from(keccak256(s.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "PascalCase")]
pub enum RegistryEvent {
    Registered {
        agent_id: AgentId,
        token_uri: String,
        owner: Address,
    },
    MetadataSet {
        agent_id: AgentId,
        key_hash: H256,
        key: String,
        value: Bytes,
    },
    #[serde(rename = "URIUpdated")]
    UriUpdated {
        agent_id: AgentId,
        new_uri: String,
        updated_by: Address,
    },
    Transfer {
        from: Address,
        to: Address,
        agent_id: AgentId,
    },
    Approval {
        owner: Address,
        approved: Address,
        agent_id: AgentId,
    },
    ApprovalForAll {
        owner: Address,
        operator: Address,
        approved: bool,
    },
    NewFeedback {
        agent_id: AgentId,
        client: Address,
        index: u64,
        value: i64,
        value_decimals: u8,
        tag1_hash: H256,
        tag1: String,
        tag2: String,
        endpoint: String,
        file_uri: String,
        file_hash: H256,
    },
    FeedbackRevoked {
        agent_id: AgentId,
        client: Address,
        index: u64,
    },
    ResponseAppended {
        agent_id: AgentId,
        client: Address,
        index: u64,
        responder: Address,
        response_uri: String,
        response_hash: H256,
    },
    ValidationRequest {
        validator: Address,
        agent_id: AgentId,
        request_uri: String,
        request_hash: H256,
    },
    ValidationResponse {
        validator: Address,
        agent_id: AgentId,
        request_hash: H256,
        response: u8,
        response_uri: String,
        response_hash: H256,
        tag: String,
    },
    Upgraded {
        implementation: Address,
    },
    OwnershipTransferred {
        previous_owner: Address,
        new_owner: Address,
    },
    Initialized {
        version: u64,
    },
}

impl RegistryEvent {
    /// Event name as indexers see it
    pub fn name(&self) -> &'static str {
        match self {
            RegistryEvent::Registered { .. } => "Registered",
            RegistryEvent::MetadataSet { .. } => "MetadataSet",
            RegistryEvent::UriUpdated { .. } => "URIUpdated",
            RegistryEvent::Transfer { .. } => "Transfer",
            RegistryEvent::Approval { .. } => "Approval",
            RegistryEvent::ApprovalForAll { .. } => "ApprovalForAll",
            RegistryEvent::NewFeedback { .. } => "NewFeedback",
            RegistryEvent::FeedbackRevoked { .. } => "FeedbackRevoked",
            RegistryEvent::ResponseAppended { .. } => "ResponseAppended",
            RegistryEvent::ValidationRequest { .. } => "ValidationRequest",
            RegistryEvent::ValidationResponse { .. } => "ValidationResponse",
            RegistryEvent::Upgraded { .. } => "Upgraded",
            RegistryEvent::OwnershipTransferred { .. } => "OwnershipTransferred",
            RegistryEvent::Initialized { .. } => "Initialized",
        }
    }

    /// Agent the event refers to, if any
    pub fn agent_id(&self) -> Option<AgentId> {
        match self {
            RegistryEvent::Registered { agent_id, .. }
            | RegistryEvent::MetadataSet { agent_id, .. }
            | RegistryEvent::UriUpdated { agent_id, .. }
            | RegistryEvent::Transfer { agent_id, .. }
            | RegistryEvent::Approval { agent_id, .. }
            | RegistryEvent::NewFeedback { agent_id, .. }
            | RegistryEvent::FeedbackRevoked { agent_id, .. }
            | RegistryEvent::ResponseAppended { agent_id, .. }
            | RegistryEvent::ValidationRequest { agent_id, .. }
            | RegistryEvent::ValidationResponse { agent_id, .. } => Some(*agent_id),
            _ => None,
        }
    }
}

/// A committed event with its position in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub sequence: u64,
    pub tx_index: u64,
    pub registry: RegistryKind,
    pub emitter: Address,
    pub timestamp: u64,
    pub event: RegistryEvent,
}

/// Append-only event log
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Vec<LoggedEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the events of one committed transaction, returning the logged copies
    pub fn commit(
        &mut self,
        tx_index: u64,
        registry: RegistryKind,
        emitter: Address,
        timestamp: u64,
        events: Vec<RegistryEvent>,
    ) -> Vec<LoggedEvent> {
        let logged = self.prepare(tx_index, registry, emitter, timestamp, events);
        self.append(logged.clone());
        logged
    }

    /// Number the events as if committed next, without appending them
    pub fn prepare(
        &self,
        tx_index: u64,
        registry: RegistryKind,
        emitter: Address,
        timestamp: u64,
        events: Vec<RegistryEvent>,
    ) -> Vec<LoggedEvent> {
        let first = self.entries.len() as u64;
        events
            .into_iter()
            .enumerate()
            .map(|(i, event)| LoggedEvent {
                sequence: first + i as u64,
                tx_index,
                registry,
                emitter,
                timestamp,
                event,
            })
            .collect()
    }

    /// Append events produced by `prepare` against the current length
    pub fn append(&mut self, logged: Vec<LoggedEvent>) {
        debug_assert!(logged
            .first()
            .is_none_or(|e| e.sequence == self.entries.len() as u64));
        self.entries.extend(logged);
    }

    /// Events with `sequence >= since`, at most `limit` of them
    pub fn since(&self, since: u64, limit: usize) -> Vec<LoggedEvent> {
        self.entries
            .iter()
            .skip(since as usize)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn for_agent(&self, agent_id: AgentId) -> Vec<LoggedEvent> {
        self.entries
            .iter()
            .filter(|e| e.event.agent_id() == Some(agent_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
