//! Axum route handlers for the agent registry RPC API.

use crate::db::Db;
use agent_registry::{
    Address, AgentId, AgentView, Call, FeedbackBatch, FeedbackEntry, FeedbackSummary, Ledger,
    LoggedEvent, ProxyInfo, Receipt, RegistryAddresses, RegistryError, RegistryResult,
    ResponseEntry, Transaction, ValidationStatus, ValidationSummary, H256,
};
use agent_registry_types::*;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub db: Arc<Db>,
    pub start_time: Instant,
}

type RpcReply<T> = (StatusCode, Json<RpcResponse<T>>);

fn status_for(err: &RegistryError) -> StatusCode {
    match err {
        RegistryError::Authorization(_) => StatusCode::FORBIDDEN,
        RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
        RegistryError::State(_) => StatusCode::CONFLICT,
        RegistryError::Signature(_) => StatusCode::UNAUTHORIZED,
        RegistryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply<T: Serialize>(result: RegistryResult<T>) -> RpcReply<T> {
    match result {
        Ok(data) => (StatusCode::OK, Json(RpcResponse::ok(data))),
        Err(e) => (status_for(&e), Json(RpcResponse::err_kind(e.kind(), e.message()))),
    }
}

fn storage_error<T: Serialize>(msg: String) -> RpcReply<T> {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(RpcResponse::err_kind("storage", msg)),
    )
}

fn parse_address(s: &str) -> RegistryResult<Address> {
    s.trim()
        .parse::<Address>()
        .map_err(|e| RegistryError::invalid(format!("invalid address {}: {}", s, e)))
}

fn parse_addresses(list: &[String]) -> RegistryResult<Vec<Address>> {
    list.iter().map(|s| parse_address(s)).collect()
}

fn parse_hash(s: &str) -> RegistryResult<H256> {
    s.trim()
        .parse::<H256>()
        .map_err(|e| RegistryError::invalid(format!("invalid hash {}: {}", s, e)))
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

// =====================================================
// Transactions
// =====================================================

/// Transaction body; the service assigns the timestamp
#[derive(Debug, Clone, Deserialize)]
pub struct TransactRequest {
    pub from: Address,
    pub call: Call,
}

// POST /rpc/transact
pub async fn transact(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TransactRequest>,
) -> RpcReply<Receipt> {
    let tx = Transaction {
        from: req.from,
        timestamp: now_secs(),
        call: req.call,
    };

    let receipt = match state
        .ledger
        .execute_journaled(&tx, |tx, receipt| state.db.journal(tx, receipt))
    {
        Ok(receipt) => receipt,
        Err(e) => {
            log::warn!("Rejected {} call from {:?}: {}", tx.call.registry(), tx.from, e);
            return reply(Err(e));
        }
    };

    log::info!(
        "Committed tx {} ({} events) from {:?}",
        receipt.tx_index,
        receipt.events.len(),
        tx.from
    );
    reply(Ok(receipt))
}

// =====================================================
// Service
// =====================================================

// GET /rpc/status
pub async fn status(State(state): State<Arc<AppState>>) -> RpcReply<ServiceStatus> {
    let ledger = &state.ledger;
    let total_agents = match ledger.identity(|r| r.total_supply()) {
        Ok(total) => total,
        Err(e) => return reply(Err(e)),
    };
    let journaled_transactions = match state.db.count_transactions() {
        Ok(count) => count,
        Err(e) => return storage_error(e),
    };

    reply(Ok(ServiceStatus {
        running: true,
        uptime_secs: state.start_time.elapsed().as_secs(),
        chain_id: ledger.config().chain_id,
        total_agents,
        committed_transactions: ledger.tx_count(),
        total_events: ledger.event_count(),
        journaled_transactions,
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistriesView {
    pub addresses: RegistryAddresses,
    pub proxies: Vec<ProxyInfo>,
}

// GET /rpc/registries
pub async fn registries(State(state): State<Arc<AppState>>) -> RpcReply<RegistriesView> {
    reply(Ok(RegistriesView {
        addresses: state.ledger.addresses(),
        proxies: state.ledger.proxies(),
    }))
}

// POST /rpc/events
pub async fn events(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EventsRequest>,
) -> RpcReply<Vec<LoggedEvent>> {
    reply(Ok(state.ledger.events_since(req.since, req.limit)))
}

// POST /rpc/events/agent
pub async fn agent_events(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AgentRequest>,
) -> RpcReply<Vec<LoggedEvent>> {
    match state.db.events_for_agent(req.agent_id) {
        Ok(events) => reply(Ok(events)),
        Err(e) => storage_error(e),
    }
}

// =====================================================
// Identity
// =====================================================

// POST /rpc/identity/agent
pub async fn identity_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AgentRequest>,
) -> RpcReply<AgentView> {
    reply(state.ledger.identity(|r| r.agent(req.agent_id)).and_then(|agent| {
        agent.ok_or_else(|| RegistryError::state("ERC721NonexistentToken"))
    }))
}

// POST /rpc/identity/metadata
pub async fn identity_metadata(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MetadataRequest>,
) -> RpcReply<MetadataValue> {
    reply(state.ledger.identity(|r| {
        let value = r.get_metadata(req.agent_id, &req.key);
        MetadataValue {
            utf8: std::str::from_utf8(&value).ok().map(String::from),
            value: value.to_string(),
            key: req.key.clone(),
        }
    }))
}

// POST /rpc/identity/wallet
pub async fn identity_wallet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AgentRequest>,
) -> RpcReply<Address> {
    reply(state.ledger.identity(|r| r.get_agent_wallet(req.agent_id)))
}

// POST /rpc/identity/agents_of
pub async fn identity_agents_of(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OwnerRequest>,
) -> RpcReply<Vec<AgentId>> {
    reply(parse_address(&req.owner).and_then(|owner| {
        state.ledger.identity(|r| {
            let balance = r.balance_of(owner)?;
            (0..balance)
                .map(|i| r.token_of_owner_by_index(owner, i))
                .collect::<RegistryResult<Vec<_>>>()
        })?
    }))
}

// =====================================================
// Reputation
// =====================================================

// POST /rpc/reputation/feedback
pub async fn reputation_feedback(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FeedbackRequest>,
) -> RpcReply<FeedbackEntry> {
    reply(parse_address(&req.client).and_then(|client| {
        state
            .ledger
            .reputation(|r| r.read_feedback_record(req.agent_id, client, req.index))?
    }))
}

// POST /rpc/reputation/all_feedback
pub async fn reputation_all_feedback(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FeedbackFilter>,
) -> RpcReply<FeedbackBatch> {
    reply(parse_addresses(&req.clients).and_then(|clients| {
        state.ledger.reputation(|r| {
            r.read_all_feedback(req.agent_id, &clients, &req.tag1, &req.tag2, req.include_revoked)
        })
    }))
}

// POST /rpc/reputation/summary
pub async fn reputation_summary(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FeedbackFilter>,
) -> RpcReply<FeedbackSummary> {
    reply(parse_addresses(&req.clients).and_then(|clients| {
        state
            .ledger
            .reputation(|r| r.get_summary(req.agent_id, &clients, &req.tag1, &req.tag2))
    }))
}

// POST /rpc/reputation/response_count
pub async fn reputation_response_count(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResponseCountRequest>,
) -> RpcReply<u64> {
    let client = match req.client.as_deref() {
        Some(s) if !s.is_empty() => parse_address(s),
        _ => Ok(Address::zero()),
    };
    reply(client.and_then(|client| {
        let responders = parse_addresses(&req.responders)?;
        state
            .ledger
            .reputation(|r| r.get_response_count(req.agent_id, client, req.index, &responders))
    }))
}

// POST /rpc/reputation/responses
pub async fn reputation_responses(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FeedbackRequest>,
) -> RpcReply<Vec<ResponseEntry>> {
    reply(parse_address(&req.client).and_then(|client| {
        state
            .ledger
            .reputation(|r| r.get_responses(req.agent_id, client, req.index))
    }))
}

// POST /rpc/reputation/clients
pub async fn reputation_clients(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AgentRequest>,
) -> RpcReply<Vec<Address>> {
    reply(state.ledger.reputation(|r| r.get_clients(req.agent_id)))
}

// POST /rpc/reputation/last_index
pub async fn reputation_last_index(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClientRequest>,
) -> RpcReply<u64> {
    reply(parse_address(&req.client).and_then(|client| {
        state
            .ledger
            .reputation(|r| r.get_last_index(req.agent_id, client))
    }))
}

// =====================================================
// Validation
// =====================================================

// POST /rpc/validation/status
pub async fn validation_status(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidationStatusRequest>,
) -> RpcReply<ValidationStatus> {
    reply(parse_hash(&req.request_hash).and_then(|hash| {
        state.ledger.validation(|v| v.get_validation_status(hash))?
    }))
}

// POST /rpc/validation/summary
pub async fn validation_summary(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidationSummaryRequest>,
) -> RpcReply<ValidationSummary> {
    reply(parse_addresses(&req.validators).and_then(|validators| {
        state
            .ledger
            .validation(|v| v.get_summary(req.agent_id, &validators, &req.tag))
    }))
}

// POST /rpc/validation/agent
pub async fn validation_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AgentRequest>,
) -> RpcReply<Vec<H256>> {
    reply(state.ledger.validation(|v| v.get_agent_validations(req.agent_id)))
}

// POST /rpc/validation/validator
pub async fn validation_validator(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidatorRequest>,
) -> RpcReply<Vec<H256>> {
    reply(parse_address(&req.validator).and_then(|validator| {
        state.ledger.validation(|v| v.get_validator_requests(validator))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_registry::RegistryConfig;

    fn state() -> Arc<AppState> {
        let ledger =
            Ledger::deploy(RegistryConfig::local(), Address::from_low_u64_be(0xde)).unwrap();
        Arc::new(AppState {
            ledger: Arc::new(ledger),
            db: Arc::new(Db::open(":memory:").unwrap()),
            start_time: Instant::now(),
        })
    }

    fn register_call(from: u64) -> TransactRequest {
        TransactRequest {
            from: Address::from_low_u64_be(from),
            call: Call::Register {
                token_uri: "ipfs://agent".to_string(),
                metadata: vec![],
            },
        }
    }

    #[test]
    fn test_status_codes_by_error_kind() {
        assert_eq!(status_for(&RegistryError::unauthorized("x")), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&RegistryError::invalid("x")), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&RegistryError::state("x")), StatusCode::CONFLICT);
        assert_eq!(status_for(&RegistryError::signature("x")), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(&RegistryError::storage("x")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_parse_helpers() {
        assert!(parse_address("0x000000000000000000000000000000000000beef").is_ok());
        assert_eq!(parse_address("nope").unwrap_err().kind(), "validation");
        assert!(parse_hash(&format!("0x{}", "11".repeat(32))).is_ok());
        assert!(parse_hash("0x1234").is_err());
    }

    #[tokio::test]
    async fn test_transact_commits_and_journals() {
        let state = state();
        let (code, Json(resp)) = transact(State(state.clone()), Json(register_call(1))).await;
        assert_eq!(code, StatusCode::OK);
        let receipt = resp.data.unwrap();
        assert_eq!(receipt.agent_id, Some(0));
        assert_eq!(state.db.count_transactions().unwrap(), 1);

        let (code, Json(resp)) =
            identity_agent(State(state.clone()), Json(AgentRequest { agent_id: 0 })).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(resp.data.unwrap().owner, Address::from_low_u64_be(1));
    }

    #[tokio::test]
    async fn test_rejected_transaction_is_not_journaled() {
        let state = state();
        transact(State(state.clone()), Json(register_call(1))).await;

        let req = TransactRequest {
            from: Address::from_low_u64_be(1),
            call: Call::GiveFeedback {
                agent_id: 0,
                feedback: agent_registry::FeedbackInput::new(90),
            },
        };
        let (code, Json(resp)) = transact(State(state.clone()), Json(req)).await;
        assert_eq!(code, StatusCode::FORBIDDEN);
        assert_eq!(resp.error_kind.as_deref(), Some("authorization"));
        assert_eq!(state.db.count_transactions().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_journal_failure_leaves_ledger_unchanged() {
        let state = state();
        transact(State(state.clone()), Json(register_call(1))).await;
        state
            .db
            .execute_batch("DROP TABLE events; DROP TABLE transactions;")
            .unwrap();

        let (code, Json(resp)) = transact(State(state.clone()), Json(register_call(2))).await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.error_kind.as_deref(), Some("storage"));
        assert_eq!(state.ledger.identity(|r| r.total_supply()).unwrap(), 1);
        assert_eq!(state.ledger.tx_count(), 1);

        let (code, Json(resp)) =
            identity_agent(State(state.clone()), Json(AgentRequest { agent_id: 1 })).await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert!(!resp.success);

        let (code, Json(resp)) = status(State(state.clone())).await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.error_kind.as_deref(), Some("storage"));
    }

    #[tokio::test]
    async fn test_unknown_agent_is_conflict() {
        let (code, Json(resp)) =
            identity_agent(State(state()), Json(AgentRequest { agent_id: 42 })).await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert!(!resp.success);
    }

    #[tokio::test]
    async fn test_bad_address_is_bad_request() {
        let req = ClientRequest {
            agent_id: 0,
            client: "not-an-address".to_string(),
        };
        let (code, _) = reputation_last_index(State(state()), Json(req)).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }
}
