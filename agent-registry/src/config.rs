//! Registry configuration
//!
//! Chain identity and wallet-binding limits for a ledger deployment.

use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// Default maximum distance between now and a wallet-binding deadline
pub const DEFAULT_DEADLINE_WINDOW_SECS: u64 = 300;

/// Registry deployment configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Chain / domain id bound into wallet-binding signatures
    pub chain_id: u64,
    /// Chain name for display
    pub chain_name: String,
    /// Maximum seconds a wallet-binding deadline may lie in the future
    pub deadline_window_secs: u64,
    /// Principal that deploys the proxies and administers upgrades
    pub deployer: Address,
}

impl RegistryConfig {
    /// Base Mainnet configuration
    pub fn base_mainnet() -> Self {
        Self {
            chain_id: 8453,
            chain_name: "Base".to_string(),
            deadline_window_secs: DEFAULT_DEADLINE_WINDOW_SECS,
            deployer: Address::zero(),
        }
    }

    /// Base Sepolia testnet configuration
    pub fn base_sepolia() -> Self {
        Self {
            chain_id: 84532,
            chain_name: "Base Sepolia".to_string(),
            deadline_window_secs: DEFAULT_DEADLINE_WINDOW_SECS,
            deployer: Address::zero(),
        }
    }

    /// Local development chain (hardhat / anvil chain id)
    pub fn local() -> Self {
        Self {
            chain_id: 31337,
            chain_name: "Local".to_string(),
            deadline_window_secs: DEFAULT_DEADLINE_WINDOW_SECS,
            deployer: Address::zero(),
        }
    }

    /// Load from environment or use defaults
    pub fn from_env() -> Self {
        let chain_id = std::env::var("AGENT_REGISTRY_CHAIN_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(31337);

        let mut config = match chain_id {
            8453 => Self::base_mainnet(),
            84532 => Self::base_sepolia(),
            31337 => Self::local(),
            other => Self {
                chain_id: other,
                chain_name: format!("Chain {}", other),
                ..Self::local()
            },
        };

        if let Some(window) = std::env::var("AGENT_REGISTRY_DEADLINE_WINDOW_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.deadline_window_secs = window;
        }

        if let Ok(deployer) = std::env::var("AGENT_REGISTRY_DEPLOYER") {
            match deployer.parse::<Address>() {
                Ok(addr) => config.deployer = addr,
                Err(e) => {
                    log::warn!("Ignoring invalid AGENT_REGISTRY_DEPLOYER {}: {}", deployer, e)
                }
            }
        }

        config
    }

    pub fn with_deployer(mut self, deployer: Address) -> Self {
        self.deployer = deployer;
        self
    }

    /// Format agent registry string
    pub fn agent_registry_string(&self, identity_registry: Address) -> String {
        format!("eip155:{}:{:?}", self.chain_id, identity_registry)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
