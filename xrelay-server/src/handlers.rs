//! Axum route handlers for the relay service.
//!
//! Every endpoint is a `GET` taking its parameters from the query string.
//! Unparseable query strings are reported through the same error envelope
//! as every other failure.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::get;
use serde::Serialize;
use serde::de::DeserializeOwned;
use xrelay::RelayError;
use xrelay_evm::asset::AssetInfo;

use crate::error::{ApiError, Stage};
use crate::orchestrator::{
    EntrypointResponse, EscrowResponse, Relay, SignedBytecodeResponse, SignedPayoutResponse,
    UnsignedDataResponse,
};
use crate::params::{
    AssetInfoQuery, SignedBytecodeQuery, SignedEscrowPayoutQuery, UnsignedEscrowQuery,
    UnsignedMessageQuery,
};

/// Shared application state.
pub type RelayState = Arc<Relay>;

fn params<T: DeserializeOwned>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(q)| q)
        .map_err(|e| ApiError::new(Stage::Header, RelayError::malformed(e.body_text())))
}

/// `GET /unsigned-message`: escrow on the origin plus the destination payload.
///
/// # Errors
///
/// Returns the envelope of the first failing stage.
pub async fn get_unsigned_message(
    State(relay): State<RelayState>,
    query: Result<Query<UnsignedMessageQuery>, QueryRejection>,
) -> Result<Json<UnsignedDataResponse>, ApiError> {
    let q = params(query)?;
    Ok(Json(relay.unsigned_message(&q.header, &q.intent).await?))
}

/// `GET /unsigned-escrow-request`: origin escrow payload only.
///
/// # Errors
///
/// Returns the envelope of the first failing stage.
pub async fn get_unsigned_escrow(
    State(relay): State<RelayState>,
    query: Result<Query<UnsignedEscrowQuery>, QueryRejection>,
) -> Result<Json<EscrowResponse>, ApiError> {
    let q = params(query)?;
    Ok(Json(relay.unsigned_escrow(&q).await?))
}

/// `GET /unsigned-entrypoint-request`: destination payload only.
///
/// # Errors
///
/// Returns the envelope of the first failing stage.
pub async fn get_unsigned_entrypoint(
    State(relay): State<RelayState>,
    query: Result<Query<UnsignedMessageQuery>, QueryRejection>,
) -> Result<Json<EntrypointResponse>, ApiError> {
    let q = params(query)?;
    Ok(Json(relay.unsigned_entrypoint(&q.header, &q.intent).await?))
}

/// `GET /signed-bytecode`: validates a signed user operation.
///
/// # Errors
///
/// Returns code 7, 1000 or 1001 for paymaster, escrow and balance failures.
pub async fn get_signed_bytecode(
    State(relay): State<RelayState>,
    query: Result<Query<SignedBytecodeQuery>, QueryRejection>,
) -> Result<Json<SignedBytecodeResponse>, ApiError> {
    let q = params(query)?;
    Ok(Json(relay.signed_bytecode(&q).await?))
}

/// `GET /signed-escrow-payout`: builds the TVM entrypoint message for a
/// signed execution.
///
/// # Errors
///
/// Returns the envelope of the first failing stage.
pub async fn get_signed_escrow_payout(
    State(relay): State<RelayState>,
    query: Result<Query<SignedEscrowPayoutQuery>, QueryRejection>,
) -> Result<Json<SignedPayoutResponse>, ApiError> {
    let q = params(query)?;
    Ok(Json(relay.signed_escrow_payout(&q).await?))
}

/// `GET /asset-info`: ERC-20 metadata and holder balance.
///
/// # Errors
///
/// Returns the envelope of the first failing stage.
pub async fn get_asset_info(
    State(relay): State<RelayState>,
    query: Result<Query<AssetInfoQuery>, QueryRejection>,
) -> Result<Json<AssetInfo>, ApiError> {
    let q = params(query)?;
    Ok(Json(relay.asset_info(&q).await?))
}

/// `GET /health`
pub async fn get_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// One served chain in the `/version` listing.
#[derive(Debug, Clone, Serialize)]
pub struct ChainSummary {
    /// Canonical id.
    pub id: String,
    /// Human name.
    pub name: &'static str,
    /// VM kind.
    pub vm: &'static str,
}

/// `/version` body.
#[derive(Debug, Clone, Serialize)]
pub struct VersionResponse {
    /// Crate version.
    pub version: &'static str,
    /// Relay signer address, when configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_address: Option<String>,
    /// Enabled chains, sorted by id.
    pub chains: Vec<ChainSummary>,
}

/// `GET /version`: build version, relay address and served chains.
pub async fn get_version(State(relay): State<RelayState>) -> Json<VersionResponse> {
    let mut chains: Vec<_> = relay.registry().enabled().collect();
    chains.sort_by_key(|c| c.id);
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        relay_address: relay.relay_address().map(|a| a.to_string()),
        chains: chains
            .into_iter()
            .map(|c| ChainSummary {
                id: c.id.to_string(),
                name: c.name,
                vm: c.vm.as_str(),
            })
            .collect(),
    })
}

/// Creates an Axum [`axum::Router`] with all relay endpoints.
///
/// Endpoints:
/// - `GET /unsigned-message`
/// - `GET /unsigned-escrow-request`
/// - `GET /unsigned-entrypoint-request`
/// - `GET /signed-bytecode`
/// - `GET /signed-escrow-payout`
/// - `GET /asset-info`
/// - `GET /health`
/// - `GET /version`
pub fn relay_router(state: RelayState) -> axum::Router {
    axum::Router::new()
        .route("/unsigned-message", get(get_unsigned_message))
        .route("/unsigned-escrow-request", get(get_unsigned_escrow))
        .route("/unsigned-entrypoint-request", get(get_unsigned_entrypoint))
        .route("/signed-bytecode", get(get_signed_bytecode))
        .route("/signed-escrow-payout", get(get_signed_escrow_payout))
        .route("/asset-info", get(get_asset_info))
        .route("/health", get(get_health))
        .route("/version", get(get_version))
        .with_state(state)
}
