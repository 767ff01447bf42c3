//! Destination-side messages for TVM chains.
//!
//! [`build_unsigned`] derives the proxy wallet for an owner pair, checks
//! whether it is deployed and returns the execution cell hash the owner must
//! sign. [`build_signed`] validates that signature against the same cell and
//! wraps everything into the entrypoint message the relay sends.

use std::sync::Arc;

use alloy_primitives::{B256, hex};
use serde::Serialize;
use serde_with::{DisplayFromStr, serde_as};
use xrelay::RelayError;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::address::TvmAddress;
use crate::boc;
use crate::cell::Cell;
use crate::proxy_wallet::{
    ExecutionData, ProxySignature, ProxyWalletRecord, ProxyWalletRequest, entrypoint_message,
    entrypoint_value, proxy_message_cell, proxy_wallet_code,
};
use crate::signature::{self, SignatureMode, cross_vm_digest};
use crate::view::TvmView;

/// Parses an optional hex bag of cells into a message body.
///
/// `None` or an empty string gives the empty cell.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] if the input is not a valid bag of cells.
pub fn parse_body(raw: Option<&str>) -> Result<Arc<Cell>, RelayError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Arc::new(Cell::empty())),
        Some(hex) => boc::from_hex(hex.trim_start_matches("0x"))
            .map_err(|e| RelayError::malformed(format!("invalid exe-body: {e}"))),
    }
}

struct Prepared {
    proxy: TvmAddress,
    state_init: Arc<Cell>,
    execution: Cell,
    value: u64,
    deployed: bool,
}

async fn prepare<V: TvmView + ?Sized>(
    view: &V,
    record: &ProxyWalletRecord,
    execution: &ExecutionData,
) -> Result<Prepared, RelayError> {
    let value = entrypoint_value(execution.value)
        .ok_or_else(|| RelayError::malformed("exe-value overflows with the entrypoint fee"))?;
    let code = proxy_wallet_code()?;
    let state_init = Arc::new(record.state_init(code)?);
    let proxy = TvmAddress::new(record.workchain, state_init.hash());
    let deployed = view.wallet_state(&proxy).await?.is_deployed();
    Ok(Prepared {
        proxy,
        state_init,
        execution: execution.to_cell()?,
        value,
        deployed,
    })
}

/// Builds the unsigned proxy-wallet request for `execution`.
///
/// # Errors
///
/// - [`RelayError::MalformedRequest`] if the attached value overflows
/// - [`RelayError::Rpc`] if the deployment check fails
#[cfg_attr(
    feature = "telemetry",
    instrument(name = "xrelay.tvm.build_unsigned", skip_all, err)
)]
pub async fn build_unsigned<V: TvmView + ?Sized>(
    view: &V,
    record: &ProxyWalletRecord,
    execution: &ExecutionData,
    testnet: bool,
) -> Result<ProxyWalletRequest, RelayError> {
    let prepared = prepare(view, record, execution).await?;
    let execution_cell = Arc::new(prepared.execution);
    Ok(ProxyWalletRequest {
        proxy_address: ProxyWalletRequest::friendly(&prepared.proxy, testnet),
        proxy_address_raw: prepared.proxy,
        entrypoint: ProxyWalletRequest::friendly(&record.entrypoint, testnet),
        nonce: record.nonce,
        with_proxy_init: !prepared.deployed,
        value: prepared.value,
        cell_hash: execution_cell.hash(),
        hash: cross_vm_digest(execution_cell.hash()),
        execution_boc: boc::to_base64(&execution_cell),
    })
}

/// Entrypoint message ready to be relayed.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SignedProxyWalletMessage {
    /// Proxy-wallet address, user-friendly.
    pub proxy_address: String,
    /// Entrypoint to send the message to, user-friendly.
    pub entrypoint: String,
    /// Whether the message deploys the wallet.
    pub with_proxy_init: bool,
    /// Value to attach, nanotons.
    #[serde_as(as = "DisplayFromStr")]
    pub value: u64,
    /// Query id of the proxy and entrypoint messages.
    #[serde_as(as = "DisplayFromStr")]
    pub query_id: u64,
    /// Hash of the entrypoint message cell.
    pub hash: B256,
    /// Entrypoint message as base64 bag of cells.
    pub boc: String,
}

/// Validates the owner's signature over `execution` and builds the
/// entrypoint message.
///
/// # Errors
///
/// - [`RelayError::MalformedRequest`] if the signature does not recover to
///   the record's EVM owner
/// - [`RelayError::Rpc`] if the deployment check fails
#[cfg_attr(
    feature = "telemetry",
    instrument(name = "xrelay.tvm.build_signed", skip_all, err, fields(query_id = query_id))
)]
pub async fn build_signed<V: TvmView + ?Sized>(
    view: &V,
    record: &ProxyWalletRecord,
    execution: &ExecutionData,
    signature_bytes: &[u8],
    mode: SignatureMode,
    query_id: u64,
    testnet: bool,
) -> Result<SignedProxyWalletMessage, RelayError> {
    let prepared = prepare(view, record, execution).await?;
    signature::verify(
        &prepared.execution,
        signature_bytes,
        record.owner_evm,
        mode,
    )?;
    let sig = ProxySignature::from_bytes(signature_bytes).ok_or_else(|| {
        RelayError::malformed(format!(
            "signature must be 65 bytes, got {}",
            signature_bytes.len()
        ))
    })?;

    let proxy_message = proxy_message_cell(query_id, sig.to_cell()?, prepared.execution)?;
    let state_init = (!prepared.deployed).then_some(prepared.state_init);
    let message = Arc::new(entrypoint_message(
        query_id,
        &prepared.proxy,
        state_init,
        Arc::new(proxy_message),
    )?);

    Ok(SignedProxyWalletMessage {
        proxy_address: ProxyWalletRequest::friendly(&prepared.proxy, testnet),
        entrypoint: ProxyWalletRequest::friendly(&record.entrypoint, testnet),
        with_proxy_init: !prepared.deployed,
        value: prepared.value,
        query_id,
        hash: message.hash(),
        boc: boc::to_base64(&message),
    })
}

/// Decodes a hex signature, with or without `0x`.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] on invalid hex.
pub fn parse_signature(raw: &str) -> Result<Vec<u8>, RelayError> {
    hex::decode(raw.trim()).map_err(|e| RelayError::malformed(format!("invalid signature: {e}")))
}
