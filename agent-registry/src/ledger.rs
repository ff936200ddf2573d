//! Serializing ledger
//!
//! Hosts the three registries behind their proxies and executes
//! transactions one at a time. A transaction either commits all of its
//! state changes and events or none of them.

use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::events::{EventLog, LoggedEvent};
use crate::identity::{IdentityLookup, IdentityRegistry, SharedIdentity};
use crate::proxy::{DeploymentEnv, Implementation, RegistryKind, RegistryProxy, Upgradeable};
use crate::reputation::{FeedbackInput, ReputationRegistry};
use crate::types::{AgentId, CallContext, MetadataEntry};
use crate::validation::ValidationRegistry;
use ethers::types::{Address, Bytes, H256};
use ethers::utils::get_contract_address;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Version string of the logic implementations installed at deployment
pub const LOGIC_VERSION: &str = "2.0.0";
const BOOTSTRAP_VERSION: &str = "1.0.0";

/// Tx index used for the deployment events
pub const GENESIS_TX: u64 = 0;

/// One mutating operation against a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Call {
    // Identity
    Register {
        #[serde(default)]
        token_uri: String,
        #[serde(default)]
        metadata: Vec<MetadataEntry>,
    },
    SetAgentUri {
        agent_id: AgentId,
        new_uri: String,
    },
    SetMetadata {
        agent_id: AgentId,
        key: String,
        value: Bytes,
    },
    SetAgentWallet {
        agent_id: AgentId,
        new_wallet: Address,
        deadline: u64,
        signature: Bytes,
    },
    Approve {
        to: Address,
        agent_id: AgentId,
    },
    SetApprovalForAll {
        operator: Address,
        approved: bool,
    },
    TransferFrom {
        from: Address,
        to: Address,
        agent_id: AgentId,
    },

    // Reputation
    GiveFeedback {
        agent_id: AgentId,
        feedback: FeedbackInput,
    },
    RevokeFeedback {
        agent_id: AgentId,
        index: u64,
    },
    AppendResponse {
        agent_id: AgentId,
        client: Address,
        index: u64,
        response_uri: String,
        response_hash: H256,
    },

    // Validation
    ValidationRequest {
        validator: Address,
        agent_id: AgentId,
        request_uri: String,
        request_hash: H256,
    },
    ValidationResponse {
        request_hash: H256,
        response: u8,
        #[serde(default)]
        response_uri: String,
        #[serde(default)]
        response_hash: H256,
        #[serde(default)]
        tag: String,
    },

    // Proxy administration
    Initialize {
        registry: RegistryKind,
    },
    UpgradeToAndCall {
        registry: RegistryKind,
        implementation: Implementation,
        #[serde(default)]
        initialize: bool,
    },
    TransferOwnership {
        registry: RegistryKind,
        new_owner: Address,
    },
}

impl Call {
    /// Registry the call is executed against
    pub fn registry(&self) -> RegistryKind {
        match self {
            Call::Register { .. }
            | Call::SetAgentUri { .. }
            | Call::SetMetadata { .. }
            | Call::SetAgentWallet { .. }
            | Call::Approve { .. }
            | Call::SetApprovalForAll { .. }
            | Call::TransferFrom { .. } => RegistryKind::Identity,
            Call::GiveFeedback { .. }
            | Call::RevokeFeedback { .. }
            | Call::AppendResponse { .. } => RegistryKind::Reputation,
            Call::ValidationRequest { .. } | Call::ValidationResponse { .. } => {
                RegistryKind::Validation
            }
            Call::Initialize { registry }
            | Call::UpgradeToAndCall { registry, .. }
            | Call::TransferOwnership { registry, .. } => *registry,
        }
    }
}

/// A call together with the principal and time the executor assigns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Address,
    pub timestamp: u64,
    pub call: Call,
}

/// Outcome of a committed transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_index: u64,
    pub registry: RegistryKind,
    /// Id minted by a registration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    /// Index assigned to new feedback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_index: Option<u64>,
    pub events: Vec<LoggedEvent>,
}

#[derive(Default)]
struct CallOutput {
    agent_id: Option<AgentId>,
    feedback_index: Option<u64>,
}

/// Proxy and chain coordinates of a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAddresses {
    pub chain_id: u64,
    pub deployer: Address,
    pub identity: Address,
    pub reputation: Address,
    pub validation: Address,
    /// `eip155:<chainId>:<identity>` namespace for agent identifiers
    pub agent_registry: String,
}

/// Administrative view of one proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyInfo {
    pub kind: RegistryKind,
    pub address: Address,
    pub owner: Address,
    pub implementation: Implementation,
    pub initialized: bool,
}

fn proxy_info<T: Upgradeable>(kind: RegistryKind, proxy: &RegistryProxy<T>) -> ProxyInfo {
    ProxyInfo {
        kind,
        address: proxy.address(),
        owner: proxy.owner(),
        implementation: proxy.implementation().clone(),
        initialized: proxy.is_initialized(),
    }
}

pub struct Ledger {
    config: RegistryConfig,
    next_tx: Mutex<u64>,
    identity: Arc<RwLock<RegistryProxy<IdentityRegistry>>>,
    reputation: RwLock<RegistryProxy<ReputationRegistry>>,
    validation: RwLock<RegistryProxy<ValidationRegistry>>,
    lookup: Arc<dyn IdentityLookup>,
    events: RwLock<EventLog>,
}

impl Ledger {
    /// Deploy all three registries from `deployer`.
    ///
    /// Addresses follow CREATE derivation from the deployer's nonce: the
    /// shared bootstrap implementation first, then implementation and proxy
    /// for identity, reputation and validation in that order. Each proxy is
    /// bootstrapped and immediately upgraded to its logic.
    pub fn deploy(config: RegistryConfig, deployer: Address) -> RegistryResult<Self> {
        let config = config.with_deployer(deployer);
        let address_at = |nonce: u64| get_contract_address(deployer, nonce);
        let env_at = |nonce: u64| DeploymentEnv {
            address: address_at(nonce),
            chain_id: config.chain_id,
            deadline_window_secs: config.deadline_window_secs,
        };

        let bootstrap =
            Implementation::new(address_at(0), RegistryKind::Bootstrap, BOOTSTRAP_VERSION);
        let mut events = EventLog::new();

        let mut ctx = CallContext::new(deployer, 0);
        let mut identity =
            RegistryProxy::<IdentityRegistry>::deploy(&mut ctx, env_at(2), bootstrap.clone())?;
        identity.upgrade_to_and_call(
            &mut ctx,
            Implementation::new(address_at(1), RegistryKind::Identity, LOGIC_VERSION),
            Some(()),
        )?;
        events.commit(
            GENESIS_TX,
            RegistryKind::Identity,
            identity.address(),
            0,
            ctx.take_events(),
        );

        let identity = Arc::new(RwLock::new(identity));
        let lookup: Arc<dyn IdentityLookup> = Arc::new(SharedIdentity::new(identity.clone()));

        let mut reputation =
            RegistryProxy::<ReputationRegistry>::deploy(&mut ctx, env_at(4), bootstrap.clone())?;
        reputation.upgrade_to_and_call(
            &mut ctx,
            Implementation::new(address_at(3), RegistryKind::Reputation, LOGIC_VERSION),
            Some(lookup.clone()),
        )?;
        events.commit(
            GENESIS_TX,
            RegistryKind::Reputation,
            reputation.address(),
            0,
            ctx.take_events(),
        );

        let mut validation =
            RegistryProxy::<ValidationRegistry>::deploy(&mut ctx, env_at(6), bootstrap)?;
        validation.upgrade_to_and_call(
            &mut ctx,
            Implementation::new(address_at(5), RegistryKind::Validation, LOGIC_VERSION),
            Some(lookup.clone()),
        )?;
        events.commit(
            GENESIS_TX,
            RegistryKind::Validation,
            validation.address(),
            0,
            ctx.take_events(),
        );

        log::info!(
            "Ledger deployed on chain {} by {:?}: identity {:?}, reputation {:?}, validation {:?}",
            config.chain_id,
            deployer,
            env_at(2).address,
            env_at(4).address,
            env_at(6).address
        );

        Ok(Self {
            config,
            next_tx: Mutex::new(GENESIS_TX + 1),
            identity,
            reputation: RwLock::new(reputation),
            validation: RwLock::new(validation),
            lookup,
            events: RwLock::new(events),
        })
    }

    /// Execute one transaction. Nothing is committed when it fails.
    pub fn execute(&self, tx: &Transaction) -> RegistryResult<Receipt> {
        self.execute_with(tx, None::<fn(&Transaction, &Receipt) -> Result<(), String>>)
    }

    /// Execute one transaction and hand its receipt to `journal` before
    /// committing. A journal error rolls the registry back, leaves the tx
    /// index unused and surfaces as `RegistryError::Storage`.
    pub fn execute_journaled<J>(&self, tx: &Transaction, journal: J) -> RegistryResult<Receipt>
    where
        J: FnOnce(&Transaction, &Receipt) -> Result<(), String>,
    {
        self.execute_with(tx, Some(journal))
    }

    fn execute_with<J>(&self, tx: &Transaction, journal: Option<J>) -> RegistryResult<Receipt>
    where
        J: FnOnce(&Transaction, &Receipt) -> Result<(), String>,
    {
        let mut next_tx = self.next_tx.lock();
        match tx.call.registry() {
            RegistryKind::Identity => {
                let mut proxy = self.identity.write();
                self.apply(&mut *next_tx, &mut *proxy, tx, journal, |proxy, ctx| {
                    self.execute_identity(proxy, ctx, &tx.call)
                })
            }
            RegistryKind::Reputation => {
                let mut proxy = self.reputation.write();
                self.apply(&mut *next_tx, &mut *proxy, tx, journal, |proxy, ctx| {
                    self.execute_reputation(proxy, ctx, &tx.call)
                })
            }
            RegistryKind::Validation => {
                let mut proxy = self.validation.write();
                self.apply(&mut *next_tx, &mut *proxy, tx, journal, |proxy, ctx| {
                    self.execute_validation(proxy, ctx, &tx.call)
                })
            }
            RegistryKind::Bootstrap => Err(RegistryError::invalid("bootstrap is not a registry")),
        }
    }

    /// Run `call` against a write-locked proxy, then journal and commit.
    /// The lock is held until the outcome is final so readers never see
    /// state that may still be rolled back.
    fn apply<T, J>(
        &self,
        next_tx: &mut u64,
        proxy: &mut RegistryProxy<T>,
        tx: &Transaction,
        journal: Option<J>,
        call: impl FnOnce(&mut RegistryProxy<T>, &mut CallContext) -> RegistryResult<CallOutput>,
    ) -> RegistryResult<Receipt>
    where
        T: Upgradeable + Clone,
        J: FnOnce(&Transaction, &Receipt) -> Result<(), String>,
    {
        let registry = tx.call.registry();
        let snapshot = journal.as_ref().map(|_| proxy.clone());
        let mut ctx = CallContext::new(tx.from, tx.timestamp);

        let output = match call(&mut *proxy, &mut ctx) {
            Ok(output) => output,
            Err(e) => {
                log::debug!("Transaction from {:?} reverted: {}", tx.from, e);
                if let Some(snapshot) = snapshot {
                    *proxy = snapshot;
                }
                return Err(e);
            }
        };

        let tx_index = *next_tx;
        let events = self.events.read().prepare(
            tx_index,
            registry,
            proxy.address(),
            tx.timestamp,
            ctx.take_events(),
        );
        let receipt = Receipt {
            tx_index,
            registry,
            agent_id: output.agent_id,
            feedback_index: output.feedback_index,
            events,
        };

        if let Some(journal) = journal {
            if let Err(e) = journal(tx, &receipt) {
                log::error!("Rolling back tx {}: journal write failed: {}", tx_index, e);
                if let Some(snapshot) = snapshot {
                    *proxy = snapshot;
                }
                return Err(RegistryError::storage(e));
            }
        }

        self.events.write().append(receipt.events.clone());
        *next_tx += 1;
        Ok(receipt)
    }

    fn execute_identity(
        &self,
        proxy: &mut RegistryProxy<IdentityRegistry>,
        ctx: &mut CallContext,
        call: &Call,
    ) -> RegistryResult<CallOutput> {
        match call {
            Call::UpgradeToAndCall {
                implementation,
                initialize,
                ..
            } => {
                let init = if *initialize { Some(()) } else { None };
                proxy.upgrade_to_and_call(ctx, implementation.clone(), init)?;
                return Ok(CallOutput::default());
            }
            Call::Initialize { .. } => {
                proxy.initialize(ctx, ())?;
                return Ok(CallOutput::default());
            }
            Call::TransferOwnership { new_owner, .. } => {
                proxy.transfer_ownership(ctx, *new_owner)?;
                return Ok(CallOutput::default());
            }
            _ => {}
        }

        let registry = proxy.logic_mut()?;
        let mut output = CallOutput::default();
        match call {
            Call::Register { token_uri, metadata } => {
                let agent_id = if !metadata.is_empty() {
                    registry.register_with_metadata(ctx, token_uri, metadata)?
                } else if !token_uri.is_empty() {
                    registry.register_with_uri(ctx, token_uri)?
                } else {
                    registry.register(ctx)?
                };
                output.agent_id = Some(agent_id);
            }
            Call::SetAgentUri { agent_id, new_uri } => {
                registry.set_agent_uri(ctx, *agent_id, new_uri)?;
            }
            Call::SetMetadata { agent_id, key, value } => {
                registry.set_metadata(ctx, *agent_id, key, value.clone())?;
            }
            Call::SetAgentWallet {
                agent_id,
                new_wallet,
                deadline,
                signature,
            } => {
                registry.set_agent_wallet(ctx, *agent_id, *new_wallet, *deadline, signature)?;
            }
            Call::Approve { to, agent_id } => {
                registry.approve(ctx, *to, *agent_id)?;
            }
            Call::SetApprovalForAll { operator, approved } => {
                registry.set_approval_for_all(ctx, *operator, *approved)?;
            }
            Call::TransferFrom { from, to, agent_id } => {
                registry.transfer_from(ctx, *from, *to, *agent_id)?;
            }
            _ => return Err(RegistryError::invalid("call not supported by identity registry")),
        }
        Ok(output)
    }

    fn execute_reputation(
        &self,
        proxy: &mut RegistryProxy<ReputationRegistry>,
        ctx: &mut CallContext,
        call: &Call,
    ) -> RegistryResult<CallOutput> {
        match call {
            Call::UpgradeToAndCall {
                implementation,
                initialize,
                ..
            } => {
                let init = if *initialize { Some(self.lookup.clone()) } else { None };
                proxy.upgrade_to_and_call(ctx, implementation.clone(), init)?;
                return Ok(CallOutput::default());
            }
            Call::Initialize { .. } => {
                proxy.initialize(ctx, self.lookup.clone())?;
                return Ok(CallOutput::default());
            }
            Call::TransferOwnership { new_owner, .. } => {
                proxy.transfer_ownership(ctx, *new_owner)?;
                return Ok(CallOutput::default());
            }
            _ => {}
        }

        let registry = proxy.logic_mut()?;
        let mut output = CallOutput::default();
        match call {
            Call::GiveFeedback { agent_id, feedback } => {
                let index = registry.give_feedback(ctx, *agent_id, feedback.clone())?;
                output.feedback_index = Some(index);
                output.agent_id = Some(*agent_id);
            }
            Call::RevokeFeedback { agent_id, index } => {
                registry.revoke_feedback(ctx, *agent_id, *index)?;
            }
            Call::AppendResponse {
                agent_id,
                client,
                index,
                response_uri,
                response_hash,
            } => {
                registry.append_response(
                    ctx,
                    *agent_id,
                    *client,
                    *index,
                    response_uri,
                    *response_hash,
                )?;
            }
            _ => return Err(RegistryError::invalid("call not supported by reputation registry")),
        }
        Ok(output)
    }

    fn execute_validation(
        &self,
        proxy: &mut RegistryProxy<ValidationRegistry>,
        ctx: &mut CallContext,
        call: &Call,
    ) -> RegistryResult<CallOutput> {
        match call {
            Call::UpgradeToAndCall {
                implementation,
                initialize,
                ..
            } => {
                let init = if *initialize { Some(self.lookup.clone()) } else { None };
                proxy.upgrade_to_and_call(ctx, implementation.clone(), init)?;
                return Ok(CallOutput::default());
            }
            Call::Initialize { .. } => {
                proxy.initialize(ctx, self.lookup.clone())?;
                return Ok(CallOutput::default());
            }
            Call::TransferOwnership { new_owner, .. } => {
                proxy.transfer_ownership(ctx, *new_owner)?;
                return Ok(CallOutput::default());
            }
            _ => {}
        }

        let registry = proxy.logic_mut()?;
        match call {
            Call::ValidationRequest {
                validator,
                agent_id,
                request_uri,
                request_hash,
            } => {
                registry.validation_request(
                    ctx,
                    *validator,
                    *agent_id,
                    request_uri,
                    *request_hash,
                )?;
                Ok(CallOutput {
                    agent_id: Some(*agent_id),
                    ..Default::default()
                })
            }
            Call::ValidationResponse {
                request_hash,
                response,
                response_uri,
                response_hash,
                tag,
            } => {
                registry.validation_response(
                    ctx,
                    *request_hash,
                    *response,
                    response_uri,
                    *response_hash,
                    tag,
                )?;
                Ok(CallOutput::default())
            }
            _ => Err(RegistryError::invalid("call not supported by validation registry")),
        }
    }

    // =====================================================
    // Reads
    // =====================================================

    pub fn identity<R>(&self, f: impl FnOnce(&IdentityRegistry) -> R) -> RegistryResult<R> {
        let proxy = self.identity.read();
        Ok(f(proxy.logic()?))
    }

    pub fn reputation<R>(&self, f: impl FnOnce(&ReputationRegistry) -> R) -> RegistryResult<R> {
        let proxy = self.reputation.read();
        Ok(f(proxy.logic()?))
    }

    pub fn validation<R>(&self, f: impl FnOnce(&ValidationRegistry) -> R) -> RegistryResult<R> {
        let proxy = self.validation.read();
        Ok(f(proxy.logic()?))
    }

    pub fn proxies(&self) -> Vec<ProxyInfo> {
        vec![
            proxy_info(RegistryKind::Identity, &*self.identity.read()),
            proxy_info(RegistryKind::Reputation, &*self.reputation.read()),
            proxy_info(RegistryKind::Validation, &*self.validation.read()),
        ]
    }

    pub fn proxy_address(&self, registry: RegistryKind) -> Address {
        match registry {
            RegistryKind::Identity => self.identity.read().address(),
            RegistryKind::Reputation => self.reputation.read().address(),
            RegistryKind::Validation => self.validation.read().address(),
            RegistryKind::Bootstrap => Address::zero(),
        }
    }

    pub fn addresses(&self) -> RegistryAddresses {
        let identity = self.proxy_address(RegistryKind::Identity);
        RegistryAddresses {
            chain_id: self.config.chain_id,
            deployer: self.config.deployer,
            identity,
            reputation: self.proxy_address(RegistryKind::Reputation),
            validation: self.proxy_address(RegistryKind::Validation),
            agent_registry: self.config.agent_registry_string(identity),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Committed events with `sequence >= since`, at most `limit`
    pub fn events_since(&self, since: u64, limit: usize) -> Vec<LoggedEvent> {
        self.events.read().since(since, limit)
    }

    pub fn events_for_agent(&self, agent_id: AgentId) -> Vec<LoggedEvent> {
        self.events.read().for_agent(agent_id)
    }

    pub fn event_count(&self) -> u64 {
        self.events.read().len() as u64
    }

    /// Number of committed transactions, deployment excluded
    pub fn tx_count(&self) -> u64 {
        *self.next_tx.lock() - GENESIS_TX - 1
    }
}
