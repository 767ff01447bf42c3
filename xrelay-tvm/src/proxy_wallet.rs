//! Proxy-wallet protocol.
//!
//! A proxy wallet is a TVM contract that executes messages authorised by an
//! EVM key. Its address is derived from a `StateInit` of the fixed wallet
//! code and a data cell binding the nonce, the relay entrypoint and both owner
//! addresses. Messages reach it through the entrypoint contract; the first
//! message carries the `StateInit` to deploy the wallet.
//!
//! Cell layouts:
//! - execution data: `regime:uint8 destination:MsgAddress value:uint64 ^body`
//! - signature: `v:uint8 r:uint256 s:uint256`
//! - proxy message: `op:uint32(11) query_id:uint64 ^signature ^execution`
//! - wallet data: `nonce:uint64 entrypoint:MsgAddress owner_evm:uint160 owner_tvm:MsgAddress`
//! - entrypoint message: `op:uint32(1) query_id:uint64 ^(proxy:MsgAddress ^payload)`,
//!   where the payload is `^state_init ^proxy_message` before deployment and
//!   the proxy message itself afterwards

use std::sync::Arc;

use alloy_primitives::{Address, B256};
use serde::Serialize;
use serde_with::{DisplayFromStr, serde_as};

use crate::address::{FriendlyFlags, TvmAddress};
use crate::boc;
use crate::cell::{Cell, CellBuilder, CellError};

/// Proxy-wallet contract code as a hex bag of cells.
pub const PROXY_WALLET_CODE_HEX: &str = "b5ee9c7241010a01008b000114ff00f4a413f4bcf2c80b0102016202070202ce03060201200405006b1b088831c02456f8007434c0cc1c6c244c383c0074c7f4cfcc74c7cc3c008060841fa1d93beea63e1080683e18bc00b80c2103fcbc20001d3b513434c7c07e1874c7c07e18b46000194f842f841c8cb1fcb1fc9ed54802016e0809000db5473e003f0830000db63ffe003f08500171db07";

/// Opcode of a signed proxy-wallet message.
pub const PROXY_MESSAGE_OP: u32 = 11;

/// Opcode of an entrypoint forward.
pub const ENTRYPOINT_OP: u32 = 1;

/// Fee added on top of the execution value when relaying through the entrypoint (0.02 TON).
pub const ENTRYPOINT_FEE_NANO: u64 = 20_000_000;

/// Parses [`PROXY_WALLET_CODE_HEX`].
///
/// # Errors
///
/// Only fails if the embedded constant is corrupt.
pub fn proxy_wallet_code() -> Result<Arc<Cell>, CellError> {
    boc::from_hex(PROXY_WALLET_CODE_HEX)
}

/// Message the proxy wallet sends on the owner's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionData {
    /// Send mode.
    pub regime: u8,
    /// Recipient.
    pub destination: TvmAddress,
    /// Attached value in nanotons.
    pub value: u64,
    /// Message body; the empty cell when there is none.
    pub body: Arc<Cell>,
}

impl ExecutionData {
    /// Serializes the execution cell.
    ///
    /// # Errors
    ///
    /// Propagates [`CellError`]; the layout itself always fits.
    pub fn to_cell(&self) -> Result<Cell, CellError> {
        CellBuilder::new()
            .store_uint(u128::from(self.regime), 8)?
            .store_address(&self.destination)?
            .store_uint(u128::from(self.value), 64)?
            .store_ref(self.body.clone())?
            .build()
    }
}

/// Owner signature over an execution cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxySignature {
    /// Recovery id, normalised to 0 or 1 when given as 27 or 28.
    pub v: u8,
    /// `r` component.
    pub r: B256,
    /// `s` component.
    pub s: B256,
}

impl ProxySignature {
    /// Splits a 65-byte `r ‖ s ‖ v` signature.
    ///
    /// Returns `None` for any other length.
    #[must_use]
    pub fn from_bytes(signature: &[u8]) -> Option<Self> {
        if signature.len() != 65 {
            return None;
        }
        let v = signature[64];
        Some(Self {
            v: if v >= 27 { v - 27 } else { v },
            r: B256::from_slice(&signature[..32]),
            s: B256::from_slice(&signature[32..64]),
        })
    }

    /// Serializes the signature cell.
    ///
    /// # Errors
    ///
    /// Propagates [`CellError`]; the layout itself always fits.
    pub fn to_cell(&self) -> Result<Cell, CellError> {
        CellBuilder::new()
            .store_uint(u128::from(self.v), 8)?
            .store_bytes(self.r.as_slice())?
            .store_bytes(self.s.as_slice())?
            .build()
    }
}

/// Builds the proxy message cell from its parts.
///
/// # Errors
///
/// Propagates [`CellError`].
pub fn proxy_message_cell(
    query_id: u64,
    signature: Cell,
    execution: Cell,
) -> Result<Cell, CellError> {
    CellBuilder::new()
        .store_uint(u128::from(PROXY_MESSAGE_OP), 32)?
        .store_uint(u128::from(query_id), 64)?
        .store_ref(signature)?
        .store_ref(execution)?
        .build()
}

/// A signed message for a proxy wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyWalletMessage {
    /// Query id echoed by the wallet.
    pub query_id: u64,
    /// Owner signature.
    pub signature: ProxySignature,
    /// What to execute.
    pub data: ExecutionData,
}

impl ProxyWalletMessage {
    /// Serializes the proxy message cell.
    ///
    /// # Errors
    ///
    /// Propagates [`CellError`].
    pub fn to_cell(&self) -> Result<Cell, CellError> {
        proxy_message_cell(
            self.query_id,
            self.signature.to_cell()?,
            self.data.to_cell()?,
        )
    }
}

/// Inputs of the proxy-wallet address derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyWalletRecord {
    /// Wallet nonce.
    pub nonce: u64,
    /// Relay entrypoint contract.
    pub entrypoint: TvmAddress,
    /// EVM owner.
    pub owner_evm: Address,
    /// TVM owner.
    pub owner_tvm: TvmAddress,
    /// Workchain the wallet is deployed in.
    pub workchain: i8,
}

impl ProxyWalletRecord {
    /// Initial persistent data of the wallet.
    ///
    /// # Errors
    ///
    /// Propagates [`CellError`]; the layout itself always fits.
    pub fn data_cell(&self) -> Result<Cell, CellError> {
        CellBuilder::new()
            .store_uint(u128::from(self.nonce), 64)?
            .store_address(&self.entrypoint)?
            .store_bytes(self.owner_evm.as_slice())?
            .store_address(&self.owner_tvm)?
            .build()
    }

    /// `StateInit` with code and data and no split depth, special or library.
    ///
    /// # Errors
    ///
    /// Propagates [`CellError`].
    pub fn state_init(&self, code: Arc<Cell>) -> Result<Cell, CellError> {
        CellBuilder::new()
            .store_uint(0b00110, 5)?
            .store_ref(code)?
            .store_ref(self.data_cell()?)?
            .build()
    }

    /// The wallet address: `workchain:hash(state_init)`.
    ///
    /// # Errors
    ///
    /// Propagates [`CellError`].
    pub fn address(&self, code: Arc<Cell>) -> Result<TvmAddress, CellError> {
        Ok(TvmAddress::new(self.workchain, self.state_init(code)?.hash()))
    }
}

/// Builds the entrypoint forward for `proxy`.
///
/// With `state_init` the wallet is deployed by the same message.
///
/// # Errors
///
/// Propagates [`CellError`].
pub fn entrypoint_message(
    query_id: u64,
    proxy: &TvmAddress,
    state_init: Option<Arc<Cell>>,
    proxy_message: Arc<Cell>,
) -> Result<Cell, CellError> {
    let payload: Arc<Cell> = match state_init {
        Some(state_init) => Arc::new(
            CellBuilder::new()
                .store_ref(state_init)?
                .store_ref(proxy_message)?
                .build()?,
        ),
        None => proxy_message,
    };
    let body = CellBuilder::new()
        .store_address(proxy)?
        .store_ref(payload)?
        .build()?;
    CellBuilder::new()
        .store_uint(u128::from(ENTRYPOINT_OP), 32)?
        .store_uint(u128::from(query_id), 64)?
        .store_ref(body)?
        .build()
}

/// Value to attach when relaying `execution_value` through the entrypoint.
///
/// Returns `None` on overflow.
#[must_use]
pub const fn entrypoint_value(execution_value: u64) -> Option<u64> {
    execution_value.checked_add(ENTRYPOINT_FEE_NANO)
}

/// Unsigned destination-side artifacts for a TVM chain.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProxyWalletRequest {
    /// Derived proxy-wallet address, user-friendly.
    pub proxy_address: String,
    /// Same address in raw form.
    pub proxy_address_raw: TvmAddress,
    /// Entrypoint the message is relayed through, user-friendly.
    pub entrypoint: String,
    /// Wallet nonce.
    #[serde_as(as = "DisplayFromStr")]
    pub nonce: u64,
    /// Whether the first message must carry the `StateInit`.
    pub with_proxy_init: bool,
    /// Total value the relay attaches, nanotons.
    #[serde_as(as = "DisplayFromStr")]
    pub value: u64,
    /// Hash of the execution cell.
    pub cell_hash: B256,
    /// EIP-191 digest the owner's EVM key signs.
    pub hash: B256,
    /// Execution cell as base64 bag of cells.
    pub execution_boc: String,
}

impl ProxyWalletRequest {
    /// Renders `address` the way the relay hands proxy addresses to clients.
    #[must_use]
    pub fn friendly(address: &TvmAddress, testnet: bool) -> String {
        address.to_friendly(FriendlyFlags {
            bounceable: true,
            testnet,
        })
    }
}
