//! Reputation Registry
//!
//! Append-only feedback ledger keyed by (agent, client). Entries are
//! 1-indexed per client, can only be revoked, and carry any number of
//! responses from any principal.

use crate::error::{RegistryError, RegistryResult};
use crate::events::{string_hash, RegistryEvent};
use crate::identity::IdentityLookup;
use crate::proxy::{DeploymentEnv, RegistryKind, Upgradeable};
use crate::types::{
    tag_matches, AgentId, CallContext, FeedbackBatch, FeedbackEntry, FeedbackRecord,
    FeedbackSummary, ResponseEntry, MAX_SCORE,
};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Feedback as submitted by a client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackInput {
    pub value: i64,
    #[serde(default)]
    pub value_decimals: u8,
    #[serde(default)]
    pub tag1: String,
    #[serde(default)]
    pub tag2: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub file_uri: String,
    #[serde(default)]
    pub file_hash: H256,
}

impl FeedbackInput {
    pub fn new(value: i64) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }

    pub fn with_tags(mut self, tag1: &str, tag2: &str) -> Self {
        self.tag1 = tag1.to_string();
        self.tag2 = tag2.to_string();
        self
    }

    pub fn with_file(mut self, file_uri: &str, file_hash: H256) -> Self {
        self.file_uri = file_uri.to_string();
        self.file_hash = file_hash;
        self
    }
}

#[derive(Clone)]
pub struct ReputationRegistry {
    address: Address,
    identity: Arc<dyn IdentityLookup>,
    identity_address: Address,
    feedback: HashMap<AgentId, HashMap<Address, Vec<FeedbackEntry>>>,
    clients: HashMap<AgentId, Vec<Address>>,
    responses: HashMap<(AgentId, Address, u64), Vec<ResponseEntry>>,
}

impl Upgradeable for ReputationRegistry {
    const KIND: RegistryKind = RegistryKind::Reputation;
    type Init = Arc<dyn IdentityLookup>;

    fn initialize(env: &DeploymentEnv, identity: Arc<dyn IdentityLookup>) -> RegistryResult<Self> {
        let identity_address = identity.registry_address();
        if identity_address.is_zero() {
            return Err(RegistryError::invalid("bad identity"));
        }

        Ok(Self {
            address: env.address,
            identity,
            identity_address,
            feedback: HashMap::new(),
            clients: HashMap::new(),
            responses: HashMap::new(),
        })
    }
}

impl ReputationRegistry {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn get_identity_registry(&self) -> Address {
        self.identity_address
    }

    fn ensure_agent(&self, agent_id: AgentId) -> RegistryResult<()> {
        if !self.identity.agent_exists(agent_id) {
            return Err(RegistryError::state("agent not found"));
        }
        Ok(())
    }

    fn entries(&self, agent_id: AgentId, client: Address) -> &[FeedbackEntry] {
        self.feedback
            .get(&agent_id)
            .and_then(|by_client| by_client.get(&client))
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    fn entry(
        &self,
        agent_id: AgentId,
        client: Address,
        index: u64,
    ) -> RegistryResult<&FeedbackEntry> {
        if index == 0 {
            return Err(RegistryError::state("index out of bounds"));
        }
        self.entries(agent_id, client)
            .get((index - 1) as usize)
            .ok_or_else(|| RegistryError::state("index out of bounds"))
    }

    /// Explicit client list, or every known client when the list is empty
    fn client_set(&self, agent_id: AgentId, clients: &[Address]) -> Vec<Address> {
        if clients.is_empty() {
            self.get_clients(agent_id)
        } else {
            clients.to_vec()
        }
    }

    // =====================================================
    // Mutations
    // =====================================================

    /// Append feedback from the caller, returning its 1-based index
    pub fn give_feedback(
        &mut self,
        ctx: &mut CallContext,
        agent_id: AgentId,
        input: FeedbackInput,
    ) -> RegistryResult<u64> {
        self.ensure_agent(agent_id)?;
        if self.identity.is_authorized_or_owner(ctx.caller, agent_id) {
            return Err(RegistryError::unauthorized("Self-feedback not allowed"));
        }
        if input.value < 0 || input.value > MAX_SCORE {
            return Err(RegistryError::invalid(format!(
                "value {} out of range 0..={}",
                input.value, MAX_SCORE
            )));
        }

        let client = ctx.caller;
        let list = self
            .feedback
            .entry(agent_id)
            .or_default()
            .entry(client)
            .or_default();
        list.push(FeedbackEntry {
            value: input.value,
            value_decimals: input.value_decimals,
            tag1: input.tag1.clone(),
            tag2: input.tag2.clone(),
            endpoint: input.endpoint.clone(),
            file_uri: input.file_uri.clone(),
            file_hash: input.file_hash,
            is_revoked: false,
        });
        let index = list.len() as u64;

        let clients = self.clients.entry(agent_id).or_default();
        if !clients.contains(&client) {
            clients.push(client);
        }

        ctx.emit(RegistryEvent::NewFeedback {
            agent_id,
            client,
            index,
            value: input.value,
            value_decimals: input.value_decimals,
            tag1_hash: string_hash(&input.tag1),
            tag1: input.tag1,
            tag2: input.tag2,
            endpoint: input.endpoint,
            file_uri: input.file_uri,
            file_hash: input.file_hash,
        });

        log::info!(
            "Feedback {} from {:?} on agent {}: {}",
            index,
            client,
            agent_id,
            input.value
        );
        Ok(index)
    }

    /// Revoke one of the caller's own entries. Revoking twice is an error.
    pub fn revoke_feedback(
        &mut self,
        ctx: &mut CallContext,
        agent_id: AgentId,
        index: u64,
    ) -> RegistryResult<()> {
        if self.entry(agent_id, ctx.caller, index)?.is_revoked {
            return Err(RegistryError::state("already revoked"));
        }

        if let Some(entry) = self
            .feedback
            .get_mut(&agent_id)
            .and_then(|by_client| by_client.get_mut(&ctx.caller))
            .and_then(|list| list.get_mut((index - 1) as usize))
        {
            entry.is_revoked = true;
        }
        ctx.emit(RegistryEvent::FeedbackRevoked {
            agent_id,
            client: ctx.caller,
            index,
        });

        log::info!("Feedback {} from {:?} on agent {} revoked", index, ctx.caller, agent_id);
        Ok(())
    }

    /// Attach a response to an existing entry; revoked entries accept responses too
    pub fn append_response(
        &mut self,
        ctx: &mut CallContext,
        agent_id: AgentId,
        client: Address,
        index: u64,
        response_uri: &str,
        response_hash: H256,
    ) -> RegistryResult<()> {
        self.ensure_agent(agent_id)?;
        self.entry(agent_id, client, index)?;

        self.responses
            .entry((agent_id, client, index))
            .or_default()
            .push(ResponseEntry {
                responder: ctx.caller,
                response_uri: response_uri.to_string(),
                response_hash,
            });
        ctx.emit(RegistryEvent::ResponseAppended {
            agent_id,
            client,
            index,
            responder: ctx.caller,
            response_uri: response_uri.to_string(),
            response_hash,
        });
        Ok(())
    }

    // =====================================================
    // Reads
    // =====================================================

    pub fn read_feedback(
        &self,
        agent_id: AgentId,
        client: Address,
        index: u64,
    ) -> RegistryResult<FeedbackRecord> {
        self.entry(agent_id, client, index).map(FeedbackRecord::from)
    }

    /// Full entry including endpoint and file reference
    pub fn read_feedback_record(
        &self,
        agent_id: AgentId,
        client: Address,
        index: u64,
    ) -> RegistryResult<FeedbackEntry> {
        self.entry(agent_id, client, index).cloned()
    }

    pub fn read_all_feedback(
        &self,
        agent_id: AgentId,
        clients: &[Address],
        tag1: &str,
        tag2: &str,
        include_revoked: bool,
    ) -> FeedbackBatch {
        let mut batch = FeedbackBatch::default();
        for client in self.client_set(agent_id, clients) {
            for (i, entry) in self.entries(agent_id, client).iter().enumerate() {
                if entry.is_revoked && !include_revoked {
                    continue;
                }
                if tag_matches(tag1, &entry.tag1) && tag_matches(tag2, &entry.tag2) {
                    batch.push(client, i as u64 + 1, entry);
                }
            }
        }
        batch
    }

    /// Count and integer mean of active entries matching the filters
    pub fn get_summary(
        &self,
        agent_id: AgentId,
        clients: &[Address],
        tag1: &str,
        tag2: &str,
    ) -> FeedbackSummary {
        let batch = self.read_all_feedback(agent_id, clients, tag1, tag2, false);
        let count = batch.len() as u64;
        if count == 0 {
            return FeedbackSummary::default();
        }
        let total: i64 = batch.values.iter().sum();
        FeedbackSummary {
            count,
            average_value: total / count as i64,
        }
    }

    /// Zero `client` and index 0 match everything; an empty responder list matches every responder
    pub fn get_response_count(
        &self,
        agent_id: AgentId,
        client: Address,
        index: u64,
        responders: &[Address],
    ) -> u64 {
        self.responses
            .iter()
            .filter(|((a, c, i), _)| {
                *a == agent_id && (client.is_zero() || *c == client) && (index == 0 || *i == index)
            })
            .flat_map(|(_, list)| list.iter())
            .filter(|r| responders.is_empty() || responders.contains(&r.responder))
            .count() as u64
    }

    pub fn get_responses(
        &self,
        agent_id: AgentId,
        client: Address,
        index: u64,
    ) -> Vec<ResponseEntry> {
        self.responses
            .get(&(agent_id, client, index))
            .cloned()
            .unwrap_or_default()
    }

    /// Distinct clients in first-feedback order
    pub fn get_clients(&self, agent_id: AgentId) -> Vec<Address> {
        self.clients.get(&agent_id).cloned().unwrap_or_default()
    }

    pub fn get_last_index(&self, agent_id: AgentId, client: Address) -> u64 {
        self.entries(agent_id, client).len() as u64
    }
}
