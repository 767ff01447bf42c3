//! Query parameters of the relay endpoints.
//!
//! Every value arrives as a string. The `parse_*` helpers turn them into
//! typed values and report the offending parameter name in
//! [`RelayError::MalformedRequest`].

use std::str::FromStr;

use alloy_primitives::{Address, B256, Bytes, U256};
use serde::Deserialize;
use xrelay::{MessageHeader, RelayError};
use xrelay_evm::PackedUserOperation;
use xrelay_evm::userop;
use xrelay_tvm::message;
use xrelay_tvm::{ExecutionData, TvmAddress};

/// Trims `raw` and drops it when empty.
fn present(raw: Option<&String>) -> Option<&str> {
    raw.map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn parse_with<T, E: std::fmt::Display>(
    field: &str,
    raw: &str,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> Result<T, RelayError> {
    parse(raw.trim()).map_err(|e| RelayError::malformed(format!("invalid {field} {raw:?}: {e}")))
}

/// Parses a hex EVM address, with or without `0x`.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] naming `field`.
pub fn parse_address(field: &str, raw: &str) -> Result<Address, RelayError> {
    parse_with(field, raw, Address::from_str)
}

/// Parses a decimal or `0x`-prefixed hex integer.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] naming `field`.
pub fn parse_u256(field: &str, raw: &str) -> Result<U256, RelayError> {
    parse_with(field, raw, U256::from_str)
}

/// Parses hex bytes, with or without `0x`. The empty string is empty bytes.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] naming `field`.
pub fn parse_bytes(field: &str, raw: &str) -> Result<Bytes, RelayError> {
    parse_with(field, raw, Bytes::from_str)
}

/// Parses a 32-byte hex word.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] naming `field`.
pub fn parse_b256(field: &str, raw: &str) -> Result<B256, RelayError> {
    parse_with(field, raw, B256::from_str)
}

/// Parses any [`FromStr`] number.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] naming `field`.
pub fn parse_number<T>(field: &str, raw: &str) -> Result<T, RelayError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_with(field, raw, T::from_str)
}

/// Parses a TVM address in raw or user-friendly form.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] naming `field`.
pub fn parse_tvm_address(field: &str, raw: &str) -> Result<TvmAddress, RelayError> {
    parse_with(field, raw, TvmAddress::from_str)
}

/// Transfer intent shared by the unsigned and signed endpoints.
///
/// `target`, `value` and `payload` describe the destination call. On TVM
/// chains they are also accepted as `exe-target`, `exe-value` and `exe-body`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct IntentQuery {
    /// Asset locked on the origin chain; zero or absent for the native coin.
    pub asset_address: Option<String>,
    /// Amount locked on the origin chain.
    pub asset_amount: Option<String>,
    /// Raw smart-account calldata; overrides `target`/`value`/`payload`.
    pub calldata: Option<String>,
    /// Destination call target.
    #[serde(alias = "exe-target")]
    pub target: Option<String>,
    /// Destination call value.
    #[serde(alias = "exe-value")]
    pub value: Option<String>,
    /// Destination call data (EVM) or hex bag of cells (TVM).
    #[serde(alias = "exe-body")]
    pub payload: Option<String>,
    /// TVM execution regime byte.
    #[serde(rename = "exe-regime")]
    pub regime: Option<String>,
    /// TVM workchain of the proxy wallet.
    #[serde(rename = "p-workchain")]
    pub workchain: Option<String>,
    /// TVM proxy-wallet nonce.
    #[serde(rename = "p-nonce")]
    pub proxy_nonce: Option<String>,
}

impl IntentQuery {
    /// Asset to lock; zero when absent.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedRequest`] on an invalid address.
    pub fn asset(&self) -> Result<Address, RelayError> {
        present(self.asset_address.as_ref())
            .map_or(Ok(Address::ZERO), |raw| parse_address("asset-address", raw))
    }

    /// Amount to lock; zero when absent.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedRequest`] on an invalid integer.
    pub fn amount(&self) -> Result<U256, RelayError> {
        present(self.asset_amount.as_ref())
            .map_or(Ok(U256::ZERO), |raw| parse_u256("asset-amount", raw))
    }

    /// Smart-account calldata for an EVM destination.
    ///
    /// Without `calldata`, builds `execute(target, value, payload)` where
    /// `target` defaults to `recipient` and `value` to `amount`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedRequest`] on invalid hex or addresses.
    pub fn evm_call_data(&self, recipient: Address, amount: U256) -> Result<Bytes, RelayError> {
        if let Some(raw) = present(self.calldata.as_ref()) {
            return parse_bytes("calldata", raw);
        }
        let dest = present(self.target.as_ref())
            .map_or(Ok(recipient), |raw| parse_address("target", raw))?;
        let value = present(self.value.as_ref()).map_or(Ok(amount), |raw| parse_u256("value", raw))?;
        let func = present(self.payload.as_ref())
            .map_or(Ok(Bytes::new()), |raw| parse_bytes("payload", raw))?;
        Ok(userop::execute_call_data(dest, value, func))
    }

    /// Execution data for a TVM destination. `target` defaults to
    /// `default_destination`, `value` to zero.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedRequest`] on invalid input.
    pub fn tvm_execution(&self, default_destination: TvmAddress) -> Result<ExecutionData, RelayError> {
        let destination = present(self.target.as_ref()).map_or(Ok(default_destination), |raw| {
            parse_tvm_address("exe-target", raw)
        })?;
        let value = present(self.value.as_ref())
            .map_or(Ok(0), |raw| parse_number::<u64>("exe-value", raw))?;
        let regime = present(self.regime.as_ref())
            .map_or(Ok(0), |raw| parse_number::<u8>("exe-regime", raw))?;
        let body = message::parse_body(present(self.payload.as_ref()))?;
        Ok(ExecutionData {
            regime,
            destination,
            value,
            body,
        })
    }

    /// Proxy-wallet workchain; basechain when absent.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedRequest`] on an invalid integer.
    pub fn workchain(&self) -> Result<i8, RelayError> {
        present(self.workchain.as_ref()).map_or(Ok(0), |raw| parse_number("p-workchain", raw))
    }

    /// Proxy-wallet nonce; zero when absent.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedRequest`] on an invalid integer.
    pub fn proxy_nonce(&self) -> Result<u64, RelayError> {
        present(self.proxy_nonce.as_ref()).map_or(Ok(0), |raw| parse_number("p-nonce", raw))
    }
}

/// `unsigned-message` and `unsigned-entrypoint-request` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct UnsignedMessageQuery {
    /// Two-sided header.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Transfer intent.
    #[serde(flatten)]
    pub intent: IntentQuery,
}

/// `unsigned-escrow-request` parameters: the origin half of a header.
#[derive(Debug, Clone, Deserialize)]
pub struct UnsignedEscrowQuery {
    /// Transaction type tag.
    #[serde(rename = "txtype")]
    pub tx_type: String,
    /// Origin chain id, hex or decimal.
    #[serde(rename = "fid")]
    pub chain_id: String,
    /// Escrow owner.
    #[serde(rename = "fsigner")]
    pub signer: String,
    /// Transfer intent.
    #[serde(flatten)]
    pub intent: IntentQuery,
}

/// `signed-bytecode` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SignedBytecodeQuery {
    /// Escrow owner and paymaster signer.
    pub signer: String,
    /// Chain the user operation executes on.
    #[serde(rename = "destination-id")]
    pub destination_id: String,
    /// Chain holding the escrow.
    #[serde(rename = "origin-id")]
    pub origin_id: String,
    /// Escrowed asset; zero or absent for the native coin.
    #[serde(rename = "asset-address", default)]
    pub asset_address: Option<String>,
    /// Amount the paymaster is authorised for.
    #[serde(rename = "asset-amount")]
    pub asset_amount: String,
    /// Paymaster message type; defaults to `1`.
    #[serde(rename = "msg-type", alias = "txtype", default)]
    pub message_type: Option<String>,
    /// Signed operation: sender.
    #[serde(rename = "useropSender")]
    pub sender: String,
    /// Signed operation: nonce.
    #[serde(rename = "useropNonce")]
    pub nonce: String,
    /// Signed operation: init-code.
    #[serde(rename = "useropInitCode", default)]
    pub init_code: Option<String>,
    /// Signed operation: calldata.
    #[serde(rename = "useropCallData")]
    pub call_data: String,
    /// Signed operation: packed verification and call gas limits.
    #[serde(rename = "useropAccountGasLimit")]
    pub account_gas_limits: String,
    /// Signed operation: pre-verification gas.
    #[serde(rename = "useropPreVerificationGas")]
    pub pre_verification_gas: String,
    /// Signed operation: packed priority and max fees.
    #[serde(rename = "useropGasFees")]
    pub gas_fees: String,
    /// Signed operation: paymaster-and-data.
    #[serde(rename = "useropPaymasterAndData")]
    pub paymaster_and_data: String,
    /// Signed operation: signature.
    #[serde(rename = "useropSignature")]
    pub signature: String,
}

impl SignedBytecodeQuery {
    /// Paymaster message type.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedRequest`] on an invalid integer.
    pub fn message_type(&self) -> Result<u8, RelayError> {
        present(self.message_type.as_ref()).map_or(Ok(1), |raw| parse_number("msg-type", raw))
    }

    /// Reassembles the signed user operation.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedRequest`] naming the first invalid field.
    pub fn user_operation(&self) -> Result<PackedUserOperation, RelayError> {
        Ok(PackedUserOperation {
            sender: parse_address("useropSender", &self.sender)?,
            nonce: parse_u256("useropNonce", &self.nonce)?,
            initCode: present(self.init_code.as_ref())
                .map_or(Ok(Bytes::new()), |raw| parse_bytes("useropInitCode", raw))?,
            callData: parse_bytes("useropCallData", &self.call_data)?,
            accountGasLimits: parse_b256("useropAccountGasLimit", &self.account_gas_limits)?,
            preVerificationGas: parse_u256(
                "useropPreVerificationGas",
                &self.pre_verification_gas,
            )?,
            gasFees: parse_b256("useropGasFees", &self.gas_fees)?,
            paymasterAndData: parse_bytes("useropPaymasterAndData", &self.paymaster_and_data)?,
            signature: parse_bytes("useropSignature", &self.signature)?,
        })
    }
}

/// `signed-escrow-payout` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SignedEscrowPayoutQuery {
    /// Two-sided header; the destination must be a TVM chain.
    #[serde(flatten)]
    pub header: MessageHeader,
    /// Execution the owner signed.
    #[serde(flatten)]
    pub intent: IntentQuery,
    /// Owner's 65-byte signature over the execution cell hash, hex.
    #[serde(alias = "data")]
    pub signature: String,
    /// Query id for the relayed messages; random when absent.
    #[serde(rename = "query-id", default)]
    pub query_id: Option<String>,
    /// Client trace id, logged with the request.
    #[serde(rename = "traceid", default)]
    pub trace_id: Option<String>,
}

impl SignedEscrowPayoutQuery {
    /// Explicit query id, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedRequest`] on an invalid integer.
    pub fn query_id(&self) -> Result<Option<u64>, RelayError> {
        present(self.query_id.as_ref())
            .map(|raw| parse_number("query-id", raw))
            .transpose()
    }
}

/// `asset-info` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetInfoQuery {
    /// Chain id, hex or decimal.
    #[serde(rename = "chain-id")]
    pub chain_id: String,
    /// ERC-20 token.
    #[serde(rename = "asset-address")]
    pub asset_address: String,
    /// Holder whose balance is read.
    #[serde(rename = "user-address")]
    pub user_address: String,
}
