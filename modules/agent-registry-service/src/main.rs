//! Agent Registry Service: standalone binary hosting the identity,
//! reputation and validation registries behind an RPC API.
//!
//! Local development executor: the caller of every transaction is the
//! `from` field of the request.
//! Default: http://127.0.0.1:9110/

mod db;
mod routes;

use agent_registry::{Ledger, RegistryConfig};
use routes::AppState;
use std::sync::Arc;
use std::time::Instant;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let port: u16 = std::env::var("AGENT_REGISTRY_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9110);

    let db_path = std::env::var("AGENT_REGISTRY_DB_PATH")
        .unwrap_or_else(|_| "./agent_registry.db".to_string());

    log::info!("Opening database at: {}", db_path);
    let database = Arc::new(db::Db::open(&db_path).expect("Failed to open database"));

    let config = database
        .pin_deployment(RegistryConfig::from_env())
        .expect("Failed to load deployment record");
    let deployer = config.deployer;
    let ledger = Arc::new(Ledger::deploy(config, deployer).expect("Failed to deploy registries"));

    let replayed = database
        .replay_into(&ledger)
        .expect("Failed to replay transaction journal");
    log::info!("Replayed {} journaled transactions", replayed);

    let addresses = ledger.addresses();
    log::info!(
        "Registries on chain {}: identity {:?}, reputation {:?}, validation {:?}",
        addresses.chain_id,
        addresses.identity,
        addresses.reputation,
        addresses.validation
    );

    let state = Arc::new(AppState {
        ledger,
        db: database,
        start_time: Instant::now(),
    });

    let cors = tower_http::cors::CorsLayer::permissive();

    let app = axum::Router::new()
        .route("/rpc/transact", axum::routing::post(routes::transact))
        .route("/rpc/status", axum::routing::get(routes::status))
        .route("/rpc/registries", axum::routing::get(routes::registries))
        .route("/rpc/events", axum::routing::post(routes::events))
        .route("/rpc/events/agent", axum::routing::post(routes::agent_events))
        .route("/rpc/identity/agent", axum::routing::post(routes::identity_agent))
        .route("/rpc/identity/metadata", axum::routing::post(routes::identity_metadata))
        .route("/rpc/identity/wallet", axum::routing::post(routes::identity_wallet))
        .route("/rpc/identity/agents_of", axum::routing::post(routes::identity_agents_of))
        .route("/rpc/reputation/feedback", axum::routing::post(routes::reputation_feedback))
        .route("/rpc/reputation/all_feedback", axum::routing::post(routes::reputation_all_feedback))
        .route("/rpc/reputation/summary", axum::routing::post(routes::reputation_summary))
        .route(
            "/rpc/reputation/response_count",
            axum::routing::post(routes::reputation_response_count),
        )
        .route("/rpc/reputation/responses", axum::routing::post(routes::reputation_responses))
        .route("/rpc/reputation/clients", axum::routing::post(routes::reputation_clients))
        .route("/rpc/reputation/last_index", axum::routing::post(routes::reputation_last_index))
        .route("/rpc/validation/status", axum::routing::post(routes::validation_status))
        .route("/rpc/validation/summary", axum::routing::post(routes::validation_summary))
        .route("/rpc/validation/agent", axum::routing::post(routes::validation_agent))
        .route("/rpc/validation/validator", axum::routing::post(routes::validation_validator))
        .with_state(state)
        .layer(cors);

    let addr = format!("127.0.0.1:{}", port);
    log::info!("Agent Registry Service listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
