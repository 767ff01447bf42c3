//! Escrow address derivation and lifecycle.
//!
//! Every user owns one escrow proxy per chain, deployed by the escrow factory
//! with CREATE2. Its address is a pure function of the factory, the escrow
//! singleton, the proxy creation code, the initializer and the salt, so the
//! relay can hand out deposit instructions before the escrow exists.
//!
//! Lifecycle state is observed, never stored: [`snapshot_calls`] batches the
//! code-size, asset-info and extend-nonce reads into one multicall and
//! [`EscrowSnapshot::decode`] maps the results to an [`EscrowState`].

use alloy_primitives::{Address, B256, Bytes, U256, b256, eip191_hash_message, keccak256};
use alloy_sol_types::SolCall;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
#[cfg(feature = "telemetry")]
use tracing::instrument;
use xrelay::RelayError;
use xrelay::chain::ContractBundle;

use crate::call::CallDescriptor;
use crate::contract::{IEscrow, IEscrowFactory, IMulticall};
use crate::multicall::{self, CallResult};
use crate::provider::EvmRpc;

/// Salt used for escrow deployment unless configured otherwise.
pub const DEFAULT_ESCROW_SALT: B256 =
    b256!("0000000000000000000000000000000000000000000000000000000000000037");

/// Lock extension requested by default, in seconds.
pub const DEFAULT_EXTEND_SECONDS: u64 = 3600;

/// Encodes the `initialize(owner, delegate)` call the factory forwards to a
/// freshly deployed escrow.
#[must_use]
pub fn build_initializer(owner: Address, delegate: Address) -> Bytes {
    Bytes::from(
        IEscrow::initializeCall {
            owner_: owner,
            delegateAddress_: delegate,
        }
        .abi_encode(),
    )
}

/// Computes the escrow proxy address without touching the chain.
///
/// The factory salts CREATE2 with `keccak256(keccak256(initializer) ‖ salt)`
/// and deploys `proxy_code ‖ pad32(singleton)`.
#[must_use]
pub fn derive_address(
    factory: Address,
    singleton: Address,
    proxy_code: &[u8],
    initializer: &[u8],
    salt: B256,
) -> Address {
    let mut salt_input = [0u8; 64];
    salt_input[..32].copy_from_slice(keccak256(initializer).as_slice());
    salt_input[32..].copy_from_slice(salt.as_slice());
    let create2_salt = keccak256(salt_input);

    let mut init_code = Vec::with_capacity(proxy_code.len() + 32);
    init_code.extend_from_slice(proxy_code);
    init_code.extend_from_slice(singleton.into_word().as_slice());
    factory.create2(create2_salt, keccak256(&init_code))
}

/// Builds the `depositAndLock(asset, amount)` call on `escrow`.
///
/// Native deposits (`asset == 0x0`) attach `amount` as value; token deposits
/// attach none.
#[must_use]
pub fn build_lock_call(escrow: Address, asset: Address, amount: U256) -> CallDescriptor {
    let value = if asset.is_zero() { amount } else { U256::ZERO };
    CallDescriptor::with_value(
        escrow,
        value,
        IEscrow::depositAndLockCall {
            asset_: asset,
            amount_: amount,
        },
    )
}

/// Builds the factory `createEscrow(initializer, salt)` call.
#[must_use]
pub fn build_create_call(factory: Address, initializer: Bytes, salt: B256) -> CallDescriptor {
    CallDescriptor::with_value(
        factory,
        U256::ZERO,
        IEscrowFactory::createEscrowCall {
            _initializer: initializer,
            _salt: salt,
        },
    )
}

/// Digest the escrow owner signs to extend a lock.
///
/// `eip191(keccak256(pad32(seconds) ‖ pad32(asset) ‖ pad32(nonce) ‖ pad32(chain_id)))`
#[must_use]
pub fn extend_lock_digest(seconds: U256, asset: Address, nonce: U256, chain_id: U256) -> B256 {
    let mut preimage = [0u8; 128];
    preimage[..32].copy_from_slice(&seconds.to_be_bytes::<32>());
    preimage[32..64].copy_from_slice(asset.into_word().as_slice());
    preimage[64..96].copy_from_slice(&nonce.to_be_bytes::<32>());
    preimage[96..].copy_from_slice(&chain_id.to_be_bytes::<32>());
    eip191_hash_message(keccak256(preimage))
}

/// Observed escrow lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EscrowState {
    /// No code at the derived address.
    Uninitialized,
    /// Deployed, nothing locked for the asset.
    Initialized,
    /// Funds locked, never extended.
    Locked,
    /// Funds locked and the lock has been extended at least once.
    LockExtended,
    /// The lock deadline has passed; funds can be released.
    Released,
}

/// One escrow together with the inputs its address was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowAccount {
    /// Derived proxy address.
    pub address: Address,
    /// Escrow owner (the user's signer).
    pub owner: Address,
    /// Delegate passed to `initialize`.
    pub delegate: Address,
    /// Encoded `initialize` call.
    pub initializer: Bytes,
    /// CREATE2 salt input.
    pub salt: B256,
}

impl EscrowAccount {
    /// Builds the account for `owner` on a chain. The delegate is the chain's
    /// escrow singleton.
    ///
    /// The address is left zero; use [`EscrowAccount::derive`] or
    /// [`EscrowAccount::with_address`] to fill it.
    #[must_use]
    pub fn new(bundle: &ContractBundle, owner: Address, salt: B256) -> Self {
        let delegate = bundle.escrow_singleton;
        Self {
            address: Address::ZERO,
            owner,
            delegate,
            initializer: build_initializer(owner, delegate),
            salt,
        }
    }

    /// Fills the address locally from the factory's proxy creation code.
    #[must_use]
    pub fn derive(mut self, bundle: &ContractBundle, proxy_code: &[u8]) -> Self {
        self.address = derive_address(
            bundle.escrow_factory,
            bundle.escrow_singleton,
            proxy_code,
            &self.initializer,
            self.salt,
        );
        self
    }

    /// Sets an address obtained elsewhere (e.g. from the factory).
    #[must_use]
    pub const fn with_address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }

    /// The factory view call returning this escrow's address.
    #[must_use]
    pub fn address_query(&self, bundle: &ContractBundle) -> CallDescriptor {
        CallDescriptor::view(
            bundle.escrow_factory,
            IEscrowFactory::getEscrowAddressCall {
                _initializer: self.initializer.clone(),
                _salt: self.salt,
            },
        )
    }
}

/// Asks the factory for the escrow address of `account`.
///
/// # Errors
///
/// Propagates transport and decoding failures.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(owner = %account.owner)))]
pub async fn query_address<R>(
    rpc: &R,
    bundle: &ContractBundle,
    account: &EscrowAccount,
) -> Result<Address, RelayError>
where
    R: EvmRpc + ?Sized,
{
    let results = multicall::view(rpc, bundle.multicall, &[account.address_query(bundle)]).await?;
    multicall::decode_return::<IEscrowFactory::getEscrowAddressCall>(&results[0])
}

/// Reads the three snapshot values for `escrow` and `asset`, in this order:
/// code size, asset info, extend nonce.
#[must_use]
pub fn snapshot_calls(multicall: Address, escrow: Address, asset: Address) -> Vec<CallDescriptor> {
    vec![
        CallDescriptor::view(multicall, IMulticall::getExtcodesizeCall { account: escrow }),
        CallDescriptor::view(escrow, IEscrow::getAssetInfoCall { asset_: asset }),
        CallDescriptor::view(escrow, IEscrow::extendNonceCall {}),
    ]
}

/// Point-in-time view of one escrow and asset.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EscrowSnapshot {
    /// Derived lifecycle state.
    pub state: EscrowState,
    /// Deployed code size.
    #[serde_as(as = "DisplayFromStr")]
    pub code_size: U256,
    /// Asset balance held by the escrow.
    #[serde_as(as = "DisplayFromStr")]
    pub balance: U256,
    /// Amount currently locked.
    #[serde_as(as = "DisplayFromStr")]
    pub locked: U256,
    /// Lock deadline (unix seconds).
    #[serde_as(as = "DisplayFromStr")]
    pub deadline: U256,
    /// Number of lock extensions consumed.
    #[serde_as(as = "DisplayFromStr")]
    pub extend_nonce: U256,
}

impl EscrowSnapshot {
    /// Interprets the results of [`snapshot_calls`] at unix time `now`.
    ///
    /// An undeployed escrow fails its asset-info and nonce calls; those
    /// failures read as zero.
    ///
    /// # Errors
    ///
    /// - [`RelayError::BatchCountMismatch`] if `results` does not hold three entries
    /// - [`RelayError::Decode`] if a successful call returned undecodable data
    pub fn decode(results: &[CallResult], now: u64) -> Result<Self, RelayError> {
        let [code, info, nonce] = results else {
            return Err(RelayError::BatchCountMismatch {
                expected: 3,
                actual: results.len(),
            });
        };
        let code_size = multicall::decode_return::<IMulticall::getExtcodesizeCall>(code)?;
        if code_size.is_zero() {
            return Ok(Self {
                state: EscrowState::Uninitialized,
                code_size,
                balance: U256::ZERO,
                locked: U256::ZERO,
                deadline: U256::ZERO,
                extend_nonce: U256::ZERO,
            });
        }
        let (balance, locked, deadline) = if info.success {
            let r = multicall::decode_return::<IEscrow::getAssetInfoCall>(info)?;
            (r._0, r._1, r._2)
        } else {
            (U256::ZERO, U256::ZERO, U256::ZERO)
        };
        let extend_nonce = if nonce.success {
            multicall::decode_return::<IEscrow::extendNonceCall>(nonce)?
        } else {
            U256::ZERO
        };

        let state = if locked.is_zero() {
            EscrowState::Initialized
        } else if deadline <= U256::from(now) {
            EscrowState::Released
        } else if extend_nonce.is_zero() {
            EscrowState::Locked
        } else {
            EscrowState::LockExtended
        };
        Ok(Self {
            state,
            code_size,
            balance,
            locked,
            deadline,
            extend_nonce,
        })
    }

    /// Returns `true` once the escrow has code.
    #[must_use]
    pub fn is_deployed(&self) -> bool {
        !self.code_size.is_zero()
    }
}

/// Reads `escrow` for `asset` with one multicall.
///
/// # Errors
///
/// Propagates transport and decoding failures.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(escrow = %escrow)))]
pub async fn read_snapshot<R>(
    rpc: &R,
    multicall: Address,
    escrow: Address,
    asset: Address,
    now: u64,
) -> Result<EscrowSnapshot, RelayError>
where
    R: EvmRpc + ?Sized,
{
    let calls = snapshot_calls(multicall, escrow, asset);
    let results = multicall::view(rpc, multicall, &calls).await?;
    EscrowSnapshot::decode(&results, now)
}

/// Deposit instructions for the origin side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    /// Asset to lock; zero for the native coin.
    pub asset: Address,
    /// Amount to lock.
    pub amount: U256,
    /// Lock extension the user will be asked to sign.
    pub extend_seconds: U256,
}

/// Unsigned escrow artifacts returned for the origin chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscrowMessage {
    /// Deployment details.
    pub init: EscrowInit,
    /// Deposit details and calldata.
    pub deposit: EscrowDeposit,
    /// Lock-extension digest.
    pub timelock: EscrowTimeLock,
    /// Single transaction the user submits: the deposit, preceded by the
    /// escrow deployment when the escrow does not exist yet.
    pub execute: EscrowExecute,
}

/// Deployment section of an [`EscrowMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EscrowInit {
    /// Escrow singleton.
    pub singleton: Address,
    /// Escrow factory.
    pub factory: Address,
    /// CREATE2 salt input.
    pub salt: B256,
    /// Whether the escrow is already deployed.
    pub is_initialized: bool,
    /// Derived escrow address.
    pub address: Address,
    /// Encoded initializer.
    pub initializer: Bytes,
    /// Calldata for `createEscrow(initializer, salt)`.
    pub payload: Bytes,
}

/// Deposit section of an [`EscrowMessage`].
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EscrowDeposit {
    /// Asset to lock.
    pub asset_address: Address,
    /// Native value to attach.
    #[serde_as(as = "DisplayFromStr")]
    pub asset_value: U256,
    /// Current escrow balance of the asset.
    #[serde_as(as = "DisplayFromStr")]
    pub asset_amount: U256,
    /// Currently locked amount.
    #[serde_as(as = "DisplayFromStr")]
    pub asset_locked: U256,
    /// Current lock deadline.
    #[serde_as(as = "DisplayFromStr")]
    pub asset_deadline: U256,
    /// Observed state.
    pub state: EscrowState,
    /// Escrow address.
    pub escrow_address: Address,
    /// Calldata for `depositAndLock(asset, amount)`.
    pub payload: Bytes,
}

/// Lock-extension section of an [`EscrowMessage`].
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EscrowTimeLock {
    /// Seconds to extend by.
    #[serde_as(as = "DisplayFromStr")]
    pub extend_time: U256,
    /// Asset the lock applies to.
    pub asset_address: Address,
    /// Nonce the signature consumes.
    #[serde_as(as = "DisplayFromStr")]
    pub extend_nonce: U256,
    /// Chain id bound into the digest.
    #[serde_as(as = "DisplayFromStr")]
    pub chain_id: U256,
    /// Digest to sign.
    pub hash: B256,
}

/// Transaction section of an [`EscrowMessage`].
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscrowExecute {
    /// Contract to call.
    pub target: Address,
    /// Native value to attach.
    #[serde_as(as = "DisplayFromStr")]
    pub value: U256,
    /// Calldata.
    pub payload: Bytes,
}

impl EscrowMessage {
    /// Assembles the origin-side message from a derived account and its snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedRequest`] if the batch cannot be encoded.
    pub fn build(
        bundle: &ContractBundle,
        chain_id: u64,
        account: &EscrowAccount,
        snapshot: &EscrowSnapshot,
        lock: &LockRequest,
    ) -> Result<Self, RelayError> {
        let create = build_create_call(
            bundle.escrow_factory,
            account.initializer.clone(),
            account.salt,
        );
        let deposit = build_lock_call(account.address, lock.asset, lock.amount);
        let deposit_value = deposit.value.unwrap_or_default();

        let execute = if snapshot.is_deployed() {
            EscrowExecute {
                target: deposit.target,
                value: deposit_value,
                payload: deposit.data.clone(),
            }
        } else {
            let batch = [create.clone(), deposit.clone()];
            EscrowExecute {
                target: bundle.multicall,
                value: multicall::total_value(&batch),
                payload: multicall::encode_execute(&batch)?,
            }
        };

        let chain_id = U256::from(chain_id);
        Ok(Self {
            init: EscrowInit {
                singleton: bundle.escrow_singleton,
                factory: bundle.escrow_factory,
                salt: account.salt,
                is_initialized: snapshot.is_deployed(),
                address: account.address,
                initializer: account.initializer.clone(),
                payload: create.data,
            },
            deposit: EscrowDeposit {
                asset_address: lock.asset,
                asset_value: deposit_value,
                asset_amount: snapshot.balance,
                asset_locked: snapshot.locked,
                asset_deadline: snapshot.deadline,
                state: snapshot.state,
                escrow_address: account.address,
                payload: deposit.data,
            },
            timelock: EscrowTimeLock {
                extend_time: lock.extend_seconds,
                asset_address: lock.asset,
                extend_nonce: snapshot.extend_nonce,
                chain_id,
                hash: extend_lock_digest(
                    lock.extend_seconds,
                    lock.asset,
                    snapshot.extend_nonce,
                    chain_id,
                ),
            },
            execute,
        })
    }
}
