//! ERC-8004 Trustless Agents registries
//!
//! Three registries anchored to ownership of an agent identity token:
//! - Identity Registry: ERC-721 agent handles, metadata and bound agent wallets
//! - Reputation Registry: append-only client feedback with responses
//! - Validation Registry: validator request/response lifecycle
//!
//! Each registry sits behind an upgradeable proxy; the `Ledger` serializes
//! transactions against all three and keeps the committed event log.

pub mod config;
pub mod eip712;
pub mod error;
pub mod events;
pub mod identity;
pub mod ledger;
pub mod proxy;
pub mod reputation;
pub mod types;
pub mod validation;


pub use config::RegistryConfig;
pub use eip712::{AgentWalletSet, Eip712Domain, WalletSigner};
pub use error::{RegistryError, RegistryResult};
pub use events::{LoggedEvent, RegistryEvent};
pub use identity::{IdentityLookup, IdentityRegistry, SharedIdentity};
pub use ledger::{Call, Ledger, ProxyInfo, Receipt, RegistryAddresses, Transaction};
pub use proxy::{Implementation, RegistryKind, RegistryProxy, Upgradeable};
pub use reputation::{FeedbackInput, ReputationRegistry};
pub use types::*;
pub use validation::ValidationRegistry;

pub use ethers::types::{Address, Bytes, H256};
