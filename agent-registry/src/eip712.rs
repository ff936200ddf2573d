//! EIP-712 typed-data signatures for agent wallet binding
//!
//! The new wallet signs `AgentWalletSet(agentId, newWallet, owner, deadline)`
//! under the identity registry's domain, proving it consents to the binding.

use crate::types::AgentId;
use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, Signature, H256, U256};
use ethers::utils::keccak256;
use once_cell::sync::Lazy;

/// Domain name of the identity registry
pub const IDENTITY_DOMAIN_NAME: &str = "ERC8004IdentityRegistry";
/// Domain version of the identity registry
pub const IDENTITY_DOMAIN_VERSION: &str = "1";

static DOMAIN_TYPEHASH: Lazy<[u8; 32]> = Lazy::new(|| {
    keccak256(b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)")
});

static AGENT_WALLET_SET_TYPEHASH: Lazy<[u8; 32]> = Lazy::new(|| {
    keccak256(b"AgentWalletSet(uint256 agentId,address newWallet,address owner,uint256 deadline)")
});

/// EIP-712 signing domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip712Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl Eip712Domain {
    /// Domain of an identity registry deployed at `verifying_contract`
    pub fn identity(chain_id: u64, verifying_contract: Address) -> Self {
        Self {
            name: IDENTITY_DOMAIN_NAME.to_string(),
            version: IDENTITY_DOMAIN_VERSION.to_string(),
            chain_id,
            verifying_contract,
        }
    }

    pub fn separator(&self) -> H256 {
        let name_hash = keccak256(self.name.as_bytes());
        let version_hash = keccak256(self.version.as_bytes());

        let encoded = ethers::abi::encode(&[
            ethers::abi::Token::FixedBytes(DOMAIN_TYPEHASH.to_vec()),
            ethers::abi::Token::FixedBytes(name_hash.to_vec()),
            ethers::abi::Token::FixedBytes(version_hash.to_vec()),
            ethers::abi::Token::Uint(U256::from(self.chain_id)),
            ethers::abi::Token::Address(self.verifying_contract),
        ]);

        H256::from(keccak256(&encoded))
    }
}

/// Consent message signed by the wallet being bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentWalletSet {
    pub agent_id: AgentId,
    pub new_wallet: Address,
    pub owner: Address,
    pub deadline: u64,
}

impl AgentWalletSet {
    pub fn struct_hash(&self) -> H256 {
        let encoded = ethers::abi::encode(&[
            ethers::abi::Token::FixedBytes(AGENT_WALLET_SET_TYPEHASH.to_vec()),
            ethers::abi::Token::Uint(U256::from(self.agent_id)),
            ethers::abi::Token::Address(self.new_wallet),
            ethers::abi::Token::Address(self.owner),
            ethers::abi::Token::Uint(U256::from(self.deadline)),
        ]);

        H256::from(keccak256(&encoded))
    }

    pub fn digest(&self, domain: &Eip712Domain) -> H256 {
        typed_data_digest(domain, self.struct_hash())
    }
}

/// keccak256("\x19\x01" ++ domainSeparator ++ structHash)
pub fn typed_data_digest(domain: &Eip712Domain, struct_hash: H256) -> H256 {
    let mut to_sign = Vec::with_capacity(66);
    to_sign.push(0x19);
    to_sign.push(0x01);
    to_sign.extend_from_slice(domain.separator().as_bytes());
    to_sign.extend_from_slice(struct_hash.as_bytes());
    H256::from(keccak256(&to_sign))
}

/// Recover the signer of a 65-byte (r, s, v) signature over `digest`
pub fn recover_signer(signature: &[u8], digest: H256) -> Option<Address> {
    let sig = Signature::try_from(signature).ok()?;
    sig.recover(digest).ok()
}

/// True when `signature` over `message` under `domain` recovers to `expected_signer`
pub fn verify(
    signature: &[u8],
    domain: &Eip712Domain,
    message: &AgentWalletSet,
    expected_signer: Address,
) -> bool {
    match recover_signer(signature, message.digest(domain)) {
        Some(recovered) => recovered == expected_signer,
        None => false,
    }
}

/// Local key that can consent to wallet bindings
pub struct WalletSigner {
    wallet: LocalWallet,
}

impl WalletSigner {
    /// Create a new signer from a private key (hex string with or without 0x prefix)
    pub fn new(private_key: &str) -> Result<Self, String> {
        let key_hex = private_key.strip_prefix("0x").unwrap_or(private_key);
        let key_bytes = hex::decode(key_hex)
            .map_err(|e| format!("Invalid private key hex: {}", e))?;
        if key_bytes.len() != 32 {
            return Err(format!("Invalid private key length: {} bytes", key_bytes.len()));
        }

        let signing_key = SigningKey::from_bytes(key_bytes.as_slice().into())
            .map_err(|e| format!("Invalid private key: {}", e))?;

        Ok(Self {
            wallet: LocalWallet::from(signing_key),
        })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Sign an `AgentWalletSet` consent under `domain`
    pub fn sign_agent_wallet_set(
        &self,
        domain: &Eip712Domain,
        message: &AgentWalletSet,
    ) -> Result<Bytes, String> {
        let digest = message.digest(domain);
        let signature = self
            .wallet
            .sign_hash(digest)
            .map_err(|e| format!("Failed to sign: {}", e))?;

        Ok(Bytes::from(signature.to_vec()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    // Hardhat's default accounts 0..2
    pub const KEY_0: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    pub const KEY_1: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    pub const KEY_2: &str = "0x5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a";

    fn message(new_wallet: Address) -> AgentWalletSet {
        AgentWalletSet {
            agent_id: 7,
            new_wallet,
            owner: Address::from_low_u64_be(0xabc),
            deadline: 1_700_000_240,
        }
    }

    #[test]
    fn test_address_derivation() {
        let signer = WalletSigner::new(KEY_0).unwrap();
        assert_eq!(
            format!("{:?}", signer.address()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let domain = Eip712Domain::identity(31337, Address::from_low_u64_be(0x1111));
        let signer = WalletSigner::new(KEY_1).unwrap();
        let msg = message(signer.address());

        let signature = signer.sign_agent_wallet_set(&domain, &msg).unwrap();
        assert_eq!(signature.len(), 65);
        assert!(verify(&signature, &domain, &msg, signer.address()));
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let domain = Eip712Domain::identity(31337, Address::from_low_u64_be(0x1111));
        let wallet = WalletSigner::new(KEY_1).unwrap();
        let impostor = WalletSigner::new(KEY_2).unwrap();
        let msg = message(wallet.address());

        let signature = impostor.sign_agent_wallet_set(&domain, &msg).unwrap();
        assert!(!verify(&signature, &domain, &msg, wallet.address()));
    }

    #[test]
    fn test_domain_separation() {
        let signer = WalletSigner::new(KEY_1).unwrap();
        let msg = message(signer.address());
        let domain = Eip712Domain::identity(31337, Address::from_low_u64_be(0x1111));
        let other_chain = Eip712Domain::identity(8453, Address::from_low_u64_be(0x1111));
        let other_contract = Eip712Domain::identity(31337, Address::from_low_u64_be(0x2222));

        let signature = signer.sign_agent_wallet_set(&domain, &msg).unwrap();
        assert!(!verify(&signature, &other_chain, &msg, signer.address()));
        assert!(!verify(&signature, &other_contract, &msg, signer.address()));
    }

    #[test]
    fn test_tampered_message_rejected() {
        let domain = Eip712Domain::identity(31337, Address::from_low_u64_be(0x1111));
        let signer = WalletSigner::new(KEY_1).unwrap();
        let msg = message(signer.address());
        let signature = signer.sign_agent_wallet_set(&domain, &msg).unwrap();

        let later = AgentWalletSet { deadline: msg.deadline + 1, ..msg };
        assert!(!verify(&signature, &domain, &later, signer.address()));
    }

    #[test]
    fn test_malformed_signature_is_false() {
        let domain = Eip712Domain::identity(1, Address::zero());
        let msg = message(Address::from_low_u64_be(5));
        assert!(!verify(&[], &domain, &msg, msg.new_wallet));
        assert!(!verify(&[0u8; 10], &domain, &msg, msg.new_wallet));
        assert!(recover_signer(&[0u8; 65], msg.digest(&domain)).is_none());
    }

    #[test]
    fn test_invalid_private_key() {
        assert!(WalletSigner::new("0xnothex").is_err());
        assert!(WalletSigner::new("0xabcd").is_err());
    }
}
