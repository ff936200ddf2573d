//! Identity Registry
//!
//! ERC-721 style agent handles: each agent id has one owner, a token URI
//! pointing at its registration file, free-form metadata, and an optional
//! agent wallet bound with the wallet's own EIP-712 consent.

use crate::eip712::{self, AgentWalletSet, Eip712Domain};
use crate::error::{RegistryError, RegistryResult};
use crate::events::{string_hash, RegistryEvent};
use crate::proxy::{DeploymentEnv, RegistryKind, RegistryProxy, Upgradeable};
use crate::types::{
    AgentId, AgentIdentifier, AgentView, CallContext, MetadataEntry, AGENT_WALLET_KEY,
};
use ethers::types::{Address, Bytes};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

pub const TOKEN_NAME: &str = "AgentIdentity";
pub const TOKEN_SYMBOL: &str = "AGENT";

/// Read-only view of the identity registry used by the other registries
pub trait IdentityLookup: Send + Sync {
    fn registry_address(&self) -> Address;
    fn agent_exists(&self, agent_id: AgentId) -> bool;
    fn owner_of(&self, agent_id: AgentId) -> Option<Address>;
    /// Owner, approved address, or operator approved for all of the owner's agents
    fn is_authorized_or_owner(&self, principal: Address, agent_id: AgentId) -> bool;
}

#[derive(Debug, Clone)]
struct AgentRecord {
    owner: Address,
    token_uri: String,
    metadata: HashMap<String, Bytes>,
    agent_wallet: Address,
    approved: Address,
}

fn wallet_bytes(wallet: Address) -> Bytes {
    Bytes::from(wallet.as_bytes().to_vec())
}

#[derive(Clone)]
pub struct IdentityRegistry {
    address: Address,
    domain: Eip712Domain,
    deadline_window_secs: u64,
    agents: BTreeMap<AgentId, AgentRecord>,
    operators: HashMap<Address, HashSet<Address>>,
    next_id: AgentId,
}

impl Upgradeable for IdentityRegistry {
    const KIND: RegistryKind = RegistryKind::Identity;
    type Init = ();

    fn initialize(env: &DeploymentEnv, _init: ()) -> RegistryResult<Self> {
        Ok(Self::new(env))
    }
}

impl IdentityRegistry {
    pub fn new(env: &DeploymentEnv) -> Self {
        Self {
            address: env.address,
            domain: Eip712Domain::identity(env.chain_id, env.address),
            deadline_window_secs: env.deadline_window_secs,
            agents: BTreeMap::new(),
            operators: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Signing domain wallets must use to consent to a binding
    pub fn domain(&self) -> &Eip712Domain {
        &self.domain
    }

    pub fn name(&self) -> &'static str {
        TOKEN_NAME
    }

    pub fn symbol(&self) -> &'static str {
        TOKEN_SYMBOL
    }

    fn record(&self, agent_id: AgentId) -> RegistryResult<&AgentRecord> {
        self.agents
            .get(&agent_id)
            .ok_or_else(|| RegistryError::state("ERC721NonexistentToken"))
    }

    fn owned_record(&self, ctx: &CallContext, agent_id: AgentId) -> RegistryResult<&AgentRecord> {
        let record = self.record(agent_id)?;
        if record.owner != ctx.caller {
            return Err(RegistryError::unauthorized("not authorized"));
        }
        Ok(record)
    }

    fn is_operator(&self, owner: Address, operator: Address) -> bool {
        self.operators
            .get(&owner)
            .map(|ops| ops.contains(&operator))
            .unwrap_or(false)
    }

    // =====================================================
    // Registration
    // =====================================================

    /// Register an agent without a token URI
    pub fn register(&mut self, ctx: &mut CallContext) -> RegistryResult<AgentId> {
        self.register_with_metadata(ctx, "", &[])
    }

    pub fn register_with_uri(
        &mut self,
        ctx: &mut CallContext,
        token_uri: &str,
    ) -> RegistryResult<AgentId> {
        self.register_with_metadata(ctx, token_uri, &[])
    }

    /// Register an agent owned by the caller with initial metadata.
    ///
    /// The agent wallet defaults to the caller.
    pub fn register_with_metadata(
        &mut self,
        ctx: &mut CallContext,
        token_uri: &str,
        metadata: &[MetadataEntry],
    ) -> RegistryResult<AgentId> {
        if metadata.iter().any(|entry| entry.key == AGENT_WALLET_KEY) {
            return Err(RegistryError::invalid("reserved key"));
        }

        let agent_id = self.next_id;
        let owner = ctx.caller;

        let mut record = AgentRecord {
            owner,
            token_uri: token_uri.to_string(),
            metadata: HashMap::new(),
            agent_wallet: owner,
            approved: Address::zero(),
        };

        ctx.emit(RegistryEvent::Transfer {
            from: Address::zero(),
            to: owner,
            agent_id,
        });
        ctx.emit(RegistryEvent::Registered {
            agent_id,
            token_uri: token_uri.to_string(),
            owner,
        });

        for entry in metadata {
            record.metadata.insert(entry.key.clone(), entry.value.clone());
            ctx.emit(RegistryEvent::MetadataSet {
                agent_id,
                key_hash: string_hash(&entry.key),
                key: entry.key.clone(),
                value: entry.value.clone(),
            });
        }

        let mirrored = wallet_bytes(owner);
        record
            .metadata
            .insert(AGENT_WALLET_KEY.to_string(), mirrored.clone());
        ctx.emit(RegistryEvent::MetadataSet {
            agent_id,
            key_hash: string_hash(AGENT_WALLET_KEY),
            key: AGENT_WALLET_KEY.to_string(),
            value: mirrored,
        });

        self.agents.insert(agent_id, record);
        self.next_id += 1;

        log::info!("Registered agent {} for owner {:?}", agent_id, owner);
        Ok(agent_id)
    }

    // =====================================================
    // Token URI and metadata
    // =====================================================

    pub fn set_agent_uri(
        &mut self,
        ctx: &mut CallContext,
        agent_id: AgentId,
        new_uri: &str,
    ) -> RegistryResult<()> {
        self.owned_record(ctx, agent_id)?;

        if let Some(record) = self.agents.get_mut(&agent_id) {
            record.token_uri = new_uri.to_string();
        }
        ctx.emit(RegistryEvent::UriUpdated {
            agent_id,
            new_uri: new_uri.to_string(),
            updated_by: ctx.caller,
        });
        Ok(())
    }

    pub fn token_uri(&self, agent_id: AgentId) -> RegistryResult<String> {
        Ok(self.record(agent_id)?.token_uri.clone())
    }

    pub fn set_metadata(
        &mut self,
        ctx: &mut CallContext,
        agent_id: AgentId,
        key: &str,
        value: Bytes,
    ) -> RegistryResult<()> {
        self.owned_record(ctx, agent_id)?;
        if key == AGENT_WALLET_KEY {
            return Err(RegistryError::invalid(
                "reserved key: agentWallet can only be changed through setAgentWallet",
            ));
        }

        if let Some(record) = self.agents.get_mut(&agent_id) {
            record.metadata.insert(key.to_string(), value.clone());
        }
        ctx.emit(RegistryEvent::MetadataSet {
            agent_id,
            key_hash: string_hash(key),
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    /// Stored value, or empty bytes for unset keys and unknown agents
    pub fn get_metadata(&self, agent_id: AgentId, key: &str) -> Bytes {
        self.agents
            .get(&agent_id)
            .and_then(|record| record.metadata.get(key))
            .cloned()
            .unwrap_or_default()
    }

    // =====================================================
    // Agent wallet
    // =====================================================

    /// Bind `new_wallet` as the agent wallet.
    ///
    /// `signature` must be `new_wallet`'s EIP-712 signature over
    /// `AgentWalletSet{agentId, newWallet, owner, deadline}`, and `deadline`
    /// must lie within `[now, now + window]`.
    pub fn set_agent_wallet(
        &mut self,
        ctx: &mut CallContext,
        agent_id: AgentId,
        new_wallet: Address,
        deadline: u64,
        signature: &[u8],
    ) -> RegistryResult<()> {
        let owner = self.owned_record(ctx, agent_id)?.owner;
        if new_wallet.is_zero() {
            return Err(RegistryError::invalid("bad wallet"));
        }
        if ctx.timestamp > deadline {
            return Err(RegistryError::signature("expired"));
        }
        if deadline > ctx.timestamp.saturating_add(self.deadline_window_secs) {
            return Err(RegistryError::signature("deadline too far"));
        }

        let message = AgentWalletSet {
            agent_id,
            new_wallet,
            owner,
            deadline,
        };
        if !eip712::verify(signature, &self.domain, &message, new_wallet) {
            return Err(RegistryError::signature("invalid wallet sig"));
        }

        let mirrored = wallet_bytes(new_wallet);
        if let Some(record) = self.agents.get_mut(&agent_id) {
            record.agent_wallet = new_wallet;
            record
                .metadata
                .insert(AGENT_WALLET_KEY.to_string(), mirrored.clone());
        }
        ctx.emit(RegistryEvent::MetadataSet {
            agent_id,
            key_hash: string_hash(AGENT_WALLET_KEY),
            key: AGENT_WALLET_KEY.to_string(),
            value: mirrored,
        });

        log::info!("Agent {} wallet bound to {:?}", agent_id, new_wallet);
        Ok(())
    }

    /// Bound wallet, or the zero address if unset or the agent does not exist
    pub fn get_agent_wallet(&self, agent_id: AgentId) -> Address {
        self.agents
            .get(&agent_id)
            .map(|record| record.agent_wallet)
            .unwrap_or_else(Address::zero)
    }

    // =====================================================
    // Ownership (ERC-721 surface)
    // =====================================================

    pub fn owner_of(&self, agent_id: AgentId) -> RegistryResult<Address> {
        Ok(self.record(agent_id)?.owner)
    }

    pub fn balance_of(&self, owner: Address) -> RegistryResult<u64> {
        if owner.is_zero() {
            return Err(RegistryError::invalid("ERC721InvalidOwner"));
        }
        Ok(self.agents.values().filter(|r| r.owner == owner).count() as u64)
    }

    pub fn total_supply(&self) -> u64 {
        self.agents.len() as u64
    }

    /// `index`-th agent (0-based, ascending id) owned by `owner`
    pub fn token_of_owner_by_index(&self, owner: Address, index: u64) -> RegistryResult<AgentId> {
        self.agents
            .iter()
            .filter(|(_, record)| record.owner == owner)
            .nth(index as usize)
            .map(|(id, _)| *id)
            .ok_or_else(|| RegistryError::state("ERC721OutOfBoundsIndex"))
    }

    pub fn approve(
        &mut self,
        ctx: &mut CallContext,
        to: Address,
        agent_id: AgentId,
    ) -> RegistryResult<()> {
        let owner = self.record(agent_id)?.owner;
        if ctx.caller != owner && !self.is_operator(owner, ctx.caller) {
            return Err(RegistryError::unauthorized("ERC721InvalidApprover"));
        }

        if let Some(record) = self.agents.get_mut(&agent_id) {
            record.approved = to;
        }
        ctx.emit(RegistryEvent::Approval {
            owner,
            approved: to,
            agent_id,
        });
        Ok(())
    }

    pub fn get_approved(&self, agent_id: AgentId) -> RegistryResult<Address> {
        Ok(self.record(agent_id)?.approved)
    }

    pub fn set_approval_for_all(
        &mut self,
        ctx: &mut CallContext,
        operator: Address,
        approved: bool,
    ) -> RegistryResult<()> {
        if operator.is_zero() {
            return Err(RegistryError::invalid("ERC721InvalidOperator"));
        }

        let ops = self.operators.entry(ctx.caller).or_default();
        if approved {
            ops.insert(operator);
        } else {
            ops.remove(&operator);
        }
        ctx.emit(RegistryEvent::ApprovalForAll {
            owner: ctx.caller,
            operator,
            approved,
        });
        Ok(())
    }

    pub fn is_approved_for_all(&self, owner: Address, operator: Address) -> bool {
        self.is_operator(owner, operator)
    }

    /// Move an agent to `to`. The bound wallet does not follow the agent.
    pub fn transfer_from(
        &mut self,
        ctx: &mut CallContext,
        from: Address,
        to: Address,
        agent_id: AgentId,
    ) -> RegistryResult<()> {
        let record = self.record(agent_id)?;
        if !self.is_authorized_or_owner(ctx.caller, agent_id) {
            return Err(RegistryError::unauthorized("ERC721InsufficientApproval"));
        }
        if record.owner != from {
            return Err(RegistryError::invalid("ERC721IncorrectOwner"));
        }
        if to.is_zero() {
            return Err(RegistryError::invalid("ERC721InvalidReceiver"));
        }

        if let Some(record) = self.agents.get_mut(&agent_id) {
            record.owner = to;
            record.approved = Address::zero();
            record.agent_wallet = Address::zero();
            record.metadata.remove(AGENT_WALLET_KEY);
        }
        ctx.emit(RegistryEvent::MetadataSet {
            agent_id,
            key_hash: string_hash(AGENT_WALLET_KEY),
            key: AGENT_WALLET_KEY.to_string(),
            value: Bytes::default(),
        });
        ctx.emit(RegistryEvent::Transfer { from, to, agent_id });

        log::info!("Agent {} transferred {:?} -> {:?}", agent_id, from, to);
        Ok(())
    }

    pub fn agent(&self, agent_id: AgentId) -> Option<AgentView> {
        self.agents.get(&agent_id).map(|record| AgentView {
            agent_id,
            identifier: AgentIdentifier::new(agent_id, self.domain.chain_id, self.address),
            owner: record.owner,
            token_uri: record.token_uri.clone(),
            agent_wallet: record.agent_wallet,
        })
    }
}

impl IdentityLookup for IdentityRegistry {
    fn registry_address(&self) -> Address {
        self.address
    }

    fn agent_exists(&self, agent_id: AgentId) -> bool {
        self.agents.contains_key(&agent_id)
    }

    fn owner_of(&self, agent_id: AgentId) -> Option<Address> {
        self.agents.get(&agent_id).map(|record| record.owner)
    }

    fn is_authorized_or_owner(&self, principal: Address, agent_id: AgentId) -> bool {
        match self.agents.get(&agent_id) {
            Some(record) => {
                principal == record.owner
                    || (!record.approved.is_zero() && principal == record.approved)
                    || self.is_operator(record.owner, principal)
            }
            None => false,
        }
    }
}

/// Identity proxy shared between the ledger and its dependent registries
#[derive(Clone)]
pub struct SharedIdentity {
    proxy: Arc<RwLock<RegistryProxy<IdentityRegistry>>>,
}

impl SharedIdentity {
    pub fn new(proxy: Arc<RwLock<RegistryProxy<IdentityRegistry>>>) -> Self {
        Self { proxy }
    }

    fn with_registry<R>(&self, default: R, f: impl FnOnce(&IdentityRegistry) -> R) -> R {
        let proxy = self.proxy.read();
        match proxy.logic() {
            Ok(registry) => f(registry),
            Err(_) => default,
        }
    }
}

impl IdentityLookup for SharedIdentity {
    fn registry_address(&self) -> Address {
        self.proxy.read().address()
    }

    fn agent_exists(&self, agent_id: AgentId) -> bool {
        self.with_registry(false, |r| r.agent_exists(agent_id))
    }

    fn owner_of(&self, agent_id: AgentId) -> Option<Address> {
        self.with_registry(None, |r| IdentityLookup::owner_of(r, agent_id))
    }

    fn is_authorized_or_owner(&self, principal: Address, agent_id: AgentId) -> bool {
        self.with_registry(false, |r| r.is_authorized_or_owner(principal, agent_id))
    }
}
