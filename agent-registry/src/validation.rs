//! Validation Registry
//!
//! Agent owners ask a validator to assess their agent under a unique request
//! hash; the validator answers with a 0-100 score that it may overwrite later
//! (e.g. soft then hard finality).

use crate::error::{RegistryError, RegistryResult};
use crate::events::RegistryEvent;
use crate::identity::IdentityLookup;
use crate::proxy::{DeploymentEnv, RegistryKind, Upgradeable};
use crate::types::{
    tag_matches, AgentId, CallContext, ValidationStatus, ValidationSummary, MAX_SCORE,
};
use ethers::types::{Address, H256};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct ValidationRegistry {
    address: Address,
    identity: Arc<dyn IdentityLookup>,
    identity_address: Address,
    requests: HashMap<H256, ValidationStatus>,
    agent_requests: HashMap<AgentId, Vec<H256>>,
    validator_requests: HashMap<Address, Vec<H256>>,
}

impl Upgradeable for ValidationRegistry {
    const KIND: RegistryKind = RegistryKind::Validation;
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
            requests: HashMap::new(),
            agent_requests: HashMap::new(),
            validator_requests: HashMap::new(),
        })
    }
}

impl ValidationRegistry {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn get_identity_registry(&self) -> Address {
        self.identity_address
    }

    /// Open a request; only the agent's current owner may do so
    pub fn validation_request(
        &mut self,
        ctx: &mut CallContext,
        validator: Address,
        agent_id: AgentId,
        request_uri: &str,
        request_hash: H256,
    ) -> RegistryResult<()> {
        let owner = self
            .identity
            .owner_of(agent_id)
            .ok_or_else(|| RegistryError::state("agent not found"))?;
        if owner != ctx.caller {
            return Err(RegistryError::unauthorized("not authorized"));
        }
        if validator.is_zero() {
            return Err(RegistryError::invalid("bad validator"));
        }
        if self.requests.contains_key(&request_hash) {
            return Err(RegistryError::invalid("request exists"));
        }

        self.requests.insert(
            request_hash,
            ValidationStatus {
                validator,
                agent_id,
                request_uri: request_uri.to_string(),
                response: 0,
                response_uri: String::new(),
                response_hash: H256::zero(),
                tag: String::new(),
                last_update: ctx.timestamp,
                has_response: false,
            },
        );
        self.agent_requests.entry(agent_id).or_default().push(request_hash);
        self.validator_requests.entry(validator).or_default().push(request_hash);

        ctx.emit(RegistryEvent::ValidationRequest {
            validator,
            agent_id,
            request_uri: request_uri.to_string(),
            request_hash,
        });

        log::info!(
            "Validation request {:?} for agent {} assigned to {:?}",
            request_hash,
            agent_id,
            validator
        );
        Ok(())
    }

    /// Record (or overwrite) the validator's answer
    pub fn validation_response(
        &mut self,
        ctx: &mut CallContext,
        request_hash: H256,
        response: u8,
        response_uri: &str,
        response_hash: H256,
        tag: &str,
    ) -> RegistryResult<()> {
        let status = self
            .requests
            .get_mut(&request_hash)
            .ok_or_else(|| RegistryError::state("unknown request"))?;
        if status.validator != ctx.caller {
            return Err(RegistryError::unauthorized("not validator"));
        }
        if i64::from(response) > MAX_SCORE {
            return Err(RegistryError::invalid(format!(
                "response {} out of range 0..={}",
                response, MAX_SCORE
            )));
        }

        status.response = response;
        status.response_uri = response_uri.to_string();
        status.response_hash = response_hash;
        status.tag = tag.to_string();
        status.last_update = ctx.timestamp;
        status.has_response = true;

        ctx.emit(RegistryEvent::ValidationResponse {
            validator: status.validator,
            agent_id: status.agent_id,
            request_hash,
            response,
            response_uri: response_uri.to_string(),
            response_hash,
            tag: tag.to_string(),
        });

        log::info!("Validation {:?} answered: {} ({})", request_hash, response, tag);
        Ok(())
    }

    pub fn get_validation_status(&self, request_hash: H256) -> RegistryResult<ValidationStatus> {
        self.requests
            .get(&request_hash)
            .cloned()
            .ok_or_else(|| RegistryError::state("unknown request"))
    }

    /// Count and integer mean over answered requests matching the filters.
    ///
    /// An empty validator list matches every validator, an empty tag every tag.
    pub fn get_summary(
        &self,
        agent_id: AgentId,
        validators: &[Address],
        tag: &str,
    ) -> ValidationSummary {
        let responses: Vec<u64> = self
            .get_agent_validations(agent_id)
            .iter()
            .filter_map(|hash| self.requests.get(hash))
            .filter(|s| s.has_response)
            .filter(|s| validators.is_empty() || validators.contains(&s.validator))
            .filter(|s| tag_matches(tag, &s.tag))
            .map(|s| u64::from(s.response))
            .collect();

        let count = responses.len() as u64;
        if count == 0 {
            return ValidationSummary::default();
        }
        ValidationSummary {
            count,
            average_response: (responses.iter().sum::<u64>() / count) as u8,
        }
    }

    pub fn get_agent_validations(&self, agent_id: AgentId) -> Vec<H256> {
        self.agent_requests.get(&agent_id).cloned().unwrap_or_default()
    }

    pub fn get_validator_requests(&self, validator: Address) -> Vec<H256> {
        self.validator_requests.get(&validator).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityRegistry;

    const OWNER: u64 = 1;
    const VALIDATOR: u64 = 2;
    const OTHER_VALIDATOR: u64 = 3;
    const STRANGER: u64 = 4;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn ctx(n: u64, timestamp: u64) -> CallContext {
        CallContext::new(addr(n), timestamp)
    }

    fn request_hash(n: u8) -> H256 {
        H256::repeat_byte(n)
    }

    /// Validation registry wired to an identity registry holding agent 0 (owner 1)
    fn setup() -> ValidationRegistry {
        let mut identity = IdentityRegistry::new(&DeploymentEnv {
            address: addr(0x8004),
            chain_id: 31337,
            deadline_window_secs: 300,
        });
        identity.register_with_uri(&mut ctx(OWNER, 1), "ipfs://agent").unwrap();

        let env = DeploymentEnv {
            address: addr(0x8006),
            chain_id: 31337,
            deadline_window_secs: 300,
        };
        ValidationRegistry::initialize(&env, Arc::new(identity)).unwrap()
    }

    fn requested(validator: u64, hash: H256) -> ValidationRegistry {
        let mut reg = setup();
        reg.validation_request(&mut ctx(OWNER, 10), addr(validator), 0, "ipfs://req", hash)
            .unwrap();
        reg
    }

    #[test]
    fn test_request_creates_unanswered_status() {
        let reg = requested(VALIDATOR, request_hash(1));
        let status = reg.get_validation_status(request_hash(1)).unwrap();
        assert_eq!(status.validator, addr(VALIDATOR));
        assert_eq!(status.agent_id, 0);
        assert_eq!(status.request_uri, "ipfs://req");
        assert!(!status.has_response);
        assert_eq!(status.response_hash, H256::zero());
        assert!(status.tag.is_empty());

        assert_eq!(reg.get_agent_validations(0), vec![request_hash(1)]);
        assert_eq!(reg.get_validator_requests(addr(VALIDATOR)), vec![request_hash(1)]);
        assert_eq!(reg.get_identity_registry(), addr(0x8004));
    }

    #[test]
    fn test_only_owner_requests() {
        let mut reg = setup();
        let err = reg
            .validation_request(
                &mut ctx(STRANGER, 10),
                addr(VALIDATOR),
                0,
                "ipfs://req",
                request_hash(1),
            )
            .unwrap_err();
        assert_eq!(err, RegistryError::unauthorized("not authorized"));

        let err = reg
            .validation_request(
                &mut ctx(OWNER, 10),
                addr(VALIDATOR),
                9,
                "ipfs://req",
                request_hash(1),
            )
            .unwrap_err();
        assert_eq!(err.kind(), "state");
        assert!(reg.get_agent_validations(0).is_empty());
    }

    #[test]
    fn test_duplicate_request_hash_rejected() {
        let mut reg = requested(VALIDATOR, request_hash(1));
        let err = reg
            .validation_request(
                &mut ctx(OWNER, 11),
                addr(OTHER_VALIDATOR),
                0,
                "ipfs://again",
                request_hash(1),
            )
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(
            reg.get_validation_status(request_hash(1)).unwrap().validator,
            addr(VALIDATOR)
        );
    }

    #[test]
    fn test_zero_validator_rejected() {
        let mut reg = setup();
        let err = reg
            .validation_request(
                &mut ctx(OWNER, 10),
                Address::zero(),
                0,
                "ipfs://req",
                request_hash(1),
            )
            .unwrap_err();
        assert_eq!(err, RegistryError::invalid("bad validator"));
    }

    #[test]
    fn test_only_validator_responds() {
        let mut reg = requested(VALIDATOR, request_hash(1));
        let err = reg
            .validation_response(&mut ctx(STRANGER, 20), request_hash(1), 90, "", H256::zero(), "")
            .unwrap_err();
        assert_eq!(err.kind(), "authorization");

        let err = reg
            .validation_response(&mut ctx(VALIDATOR, 20), request_hash(9), 90, "", H256::zero(), "")
            .unwrap_err();
        assert_eq!(err, RegistryError::state("unknown request"));
    }

    #[test]
    fn test_response_bounds() {
        let mut reg = requested(VALIDATOR, request_hash(1));
        let v = &mut ctx(VALIDATOR, 20);
        assert!(reg.validation_response(v, request_hash(1), 0, "", H256::zero(), "").is_ok());
        assert!(reg.validation_response(v, request_hash(1), 100, "", H256::zero(), "").is_ok());
        let err = reg
            .validation_response(v, request_hash(1), 101, "", H256::zero(), "")
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(reg.get_validation_status(request_hash(1)).unwrap().response, 100);
    }

    #[test]
    fn test_progressive_responses_overwrite() {
        let mut reg = requested(VALIDATOR, request_hash(1));
        reg.validation_response(
            &mut ctx(VALIDATOR, 20),
            request_hash(1),
            60,
            "ipfs://soft",
            H256::repeat_byte(5),
            "soft-finality",
        )
        .unwrap();
        let mut c = ctx(VALIDATOR, 30);
        reg.validation_response(
            &mut c,
            request_hash(1),
            95,
            "ipfs://hard",
            H256::repeat_byte(6),
            "hard-finality",
        )
        .unwrap();

        let status = reg.get_validation_status(request_hash(1)).unwrap();
        assert_eq!(status.response, 95);
        assert_eq!(status.response_uri, "ipfs://hard");
        assert_eq!(status.response_hash, H256::repeat_byte(6));
        assert_eq!(status.tag, "hard-finality");
        assert_eq!(status.last_update, 30);
        assert!(status.has_response);
        assert_eq!(c.events.len(), 1);
        assert_eq!(c.events[0].name(), "ValidationResponse");
    }

    #[test]
    fn test_summary_filters() {
        let mut reg = setup();
        let owner = &mut ctx(OWNER, 10);
        reg.validation_request(owner, addr(VALIDATOR), 0, "ipfs://1", request_hash(1)).unwrap();
        reg.validation_request(owner, addr(VALIDATOR), 0, "ipfs://2", request_hash(2)).unwrap();
        let other = addr(OTHER_VALIDATOR);
        reg.validation_request(owner, other, 0, "ipfs://3", request_hash(3)).unwrap();
        reg.validation_request(owner, other, 0, "ipfs://4", request_hash(4)).unwrap();

        let v = &mut ctx(VALIDATOR, 20);
        reg.validation_response(v, request_hash(1), 80, "", H256::zero(), "security").unwrap();
        reg.validation_response(v, request_hash(2), 91, "", H256::zero(), "uptime").unwrap();
        let o = &mut ctx(OTHER_VALIDATOR, 20);
        reg.validation_response(o, request_hash(3), 40, "", H256::zero(), "security").unwrap();

        assert_eq!(
            reg.get_summary(0, &[], ""),
            ValidationSummary { count: 3, average_response: 70 }
        );
        assert_eq!(
            reg.get_summary(0, &[], "security"),
            ValidationSummary { count: 2, average_response: 60 }
        );
        assert_eq!(
            reg.get_summary(0, &[addr(VALIDATOR)], ""),
            ValidationSummary { count: 2, average_response: 85 }
        );
        assert_eq!(reg.get_summary(0, &[addr(OTHER_VALIDATOR)], "uptime").count, 0);
        assert_eq!(reg.get_summary(5, &[], ""), ValidationSummary::default());
    }
}
