//! ERC-4337 user operations for the destination side.
//!
//! The destination account is a simple account owned by the user's signer.
//! When it has no code yet, the operation carries `factory ‖ createAccount(owner, salt)`
//! as init-code and nonce zero; otherwise init-code is empty and the nonce comes
//! from the entrypoint.
//!
//! Two hashing schemes are supported and kept apart: the unpacked struct hash
//! (gas fields expanded into individual words) and the packed hash over the
//! 32-byte dual-field slots. Both are finalised as
//! `keccak256(abi.encode(structHash, entrypoint, chainId))`.

use alloy_primitives::aliases::U192;
use alloy_primitives::{Address, B256, Bytes, Signature, U256, eip191_hash_message, keccak256};
use alloy_sol_types::{SolCall, SolValue};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
#[cfg(feature = "telemetry")]
use tracing::instrument;
use xrelay::RelayError;
use xrelay::chain::ContractBundle;

use crate::call::CallDescriptor;
pub use crate::contract::PackedUserOperation;
use crate::contract::{IEntryPoint, IMulticall, ISimpleAccount, ISimpleAccountFactory};
use crate::multicall::{self, CallResult};
use crate::paymaster::PaymasterJson;
use crate::provider::EvmRpc;

/// Verification gas limit placed in the high half of `accountGasLimits`.
pub const DEFAULT_VERIFICATION_GAS_LIMIT: u128 = 20_000_000;

/// Call gas limit placed in the low half of `accountGasLimits`.
pub const DEFAULT_CALL_GAS_LIMIT: u128 = 10_000_000;

/// Default `preVerificationGas`.
pub const DEFAULT_PRE_VERIFICATION_GAS: u64 = 20_000_000;

/// Default max priority fee, high half of `gasFees`.
pub const DEFAULT_MAX_PRIORITY_FEE: u128 = 2;

/// Default max fee, low half of `gasFees`.
pub const DEFAULT_MAX_FEE: u128 = 0;

/// Entrypoint nonce key used for relay operations.
pub const NONCE_KEY: U192 = U192::ZERO;

/// Packs two 128-bit values into one word, `high` first.
#[must_use]
pub fn pack_u128_pair(high: u128, low: u128) -> B256 {
    let mut word = [0u8; 32];
    word[..16].copy_from_slice(&high.to_be_bytes());
    word[16..].copy_from_slice(&low.to_be_bytes());
    B256::from(word)
}

/// Splits a word produced by [`pack_u128_pair`] into `(high, low)`.
#[must_use]
pub fn unpack_u128_pair(word: B256) -> (u128, u128) {
    let mut high = [0u8; 16];
    let mut low = [0u8; 16];
    high.copy_from_slice(&word[..16]);
    low.copy_from_slice(&word[16..]);
    (u128::from_be_bytes(high), u128::from_be_bytes(low))
}

/// Gas and fee values placed in an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasSettings {
    /// Account verification gas.
    pub verification_gas_limit: u128,
    /// Execution gas.
    pub call_gas_limit: u128,
    /// Bundler overhead.
    pub pre_verification_gas: U256,
    /// Priority fee per gas.
    pub max_priority_fee_per_gas: u128,
    /// Max fee per gas.
    pub max_fee_per_gas: u128,
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            verification_gas_limit: DEFAULT_VERIFICATION_GAS_LIMIT,
            call_gas_limit: DEFAULT_CALL_GAS_LIMIT,
            pre_verification_gas: U256::from(DEFAULT_PRE_VERIFICATION_GAS),
            max_priority_fee_per_gas: DEFAULT_MAX_PRIORITY_FEE,
            max_fee_per_gas: DEFAULT_MAX_FEE,
        }
    }
}

impl GasSettings {
    /// `verification ‖ call`.
    #[must_use]
    pub fn account_gas_limits(&self) -> B256 {
        pack_u128_pair(self.verification_gas_limit, self.call_gas_limit)
    }

    /// `priority ‖ max`.
    #[must_use]
    pub fn gas_fees(&self) -> B256 {
        pack_u128_pair(self.max_priority_fee_per_gas, self.max_fee_per_gas)
    }

    /// Upper bound the sender (or paymaster) prefunds.
    #[must_use]
    pub fn max_cost(&self) -> U256 {
        let gas = U256::from(self.verification_gas_limit)
            .saturating_add(U256::from(self.call_gas_limit))
            .saturating_add(self.pre_verification_gas);
        gas.saturating_mul(U256::from(self.max_fee_per_gas))
    }
}

/// On-chain state of the destination account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountState {
    /// Whether the account already has code.
    pub has_code: bool,
    /// Entrypoint nonce for [`NONCE_KEY`].
    pub nonce: U256,
}

/// Inputs of [`build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserOpRequest {
    /// Account owner.
    pub owner: Address,
    /// Simple-account factory.
    pub factory: Address,
    /// Salt passed to `createAccount`.
    pub salt: U256,
    /// The account the operation runs as.
    pub sender: Address,
    /// Call executed by the account.
    pub call_data: Bytes,
    /// Encoded paymaster authorization, empty when self-funded.
    pub paymaster_and_data: Bytes,
}

/// Encodes `execute(dest, value, func)` on the sender account.
#[must_use]
pub fn execute_call_data(dest: Address, value: U256, func: Bytes) -> Bytes {
    Bytes::from(ISimpleAccount::executeCall { dest, value, func }.abi_encode())
}

/// `factory ‖ createAccount(owner, salt)`.
#[must_use]
pub fn init_code(factory: Address, owner: Address, salt: U256) -> Bytes {
    let call = ISimpleAccountFactory::createAccountCall { owner, salt }.abi_encode();
    let mut out = Vec::with_capacity(20 + call.len());
    out.extend_from_slice(factory.as_slice());
    out.extend_from_slice(&call);
    Bytes::from(out)
}

/// Assembles an unsigned operation.
///
/// When the account has code the nonce is taken from `account`; otherwise the
/// init-code deploys the account and the nonce is zero.
#[must_use]
pub fn build(
    request: &UserOpRequest,
    account: AccountState,
    gas: &GasSettings,
) -> PackedUserOperation {
    let (init, nonce) = if account.has_code {
        (Bytes::new(), account.nonce)
    } else {
        (
            init_code(request.factory, request.owner, request.salt),
            U256::ZERO,
        )
    };
    PackedUserOperation {
        sender: request.sender,
        nonce,
        initCode: init,
        callData: request.call_data.clone(),
        accountGasLimits: gas.account_gas_limits(),
        preVerificationGas: gas.pre_verification_gas,
        gasFees: gas.gas_fees(),
        paymasterAndData: request.paymaster_and_data.clone(),
        signature: Bytes::new(),
    }
}

/// Which struct hash the verifying entrypoint expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserOpHashScheme {
    /// Gas fields expanded into five words (v0.6 layout).
    #[default]
    Unpacked,
    /// Gas fields kept in their two 32-byte slots (v0.7 layout).
    Packed,
}

/// Struct hash with gas fields expanded.
///
/// `keccak256(abi.encode(sender, nonce, keccak(initCode), keccak(callData),
/// callGasLimit, verificationGasLimit, preVerificationGas, maxFeePerGas,
/// maxPriorityFeePerGas, keccak(paymasterAndData)))`
#[must_use]
pub fn unpacked_struct_hash(op: &PackedUserOperation) -> B256 {
    let (verification_gas, call_gas) = unpack_u128_pair(op.accountGasLimits);
    let (max_priority_fee, max_fee) = unpack_u128_pair(op.gasFees);
    keccak256(
        (
            op.sender,
            op.nonce,
            keccak256(&op.initCode),
            keccak256(&op.callData),
            U256::from(call_gas),
            U256::from(verification_gas),
            op.preVerificationGas,
            U256::from(max_fee),
            U256::from(max_priority_fee),
            keccak256(&op.paymasterAndData),
        )
            .abi_encode_params(),
    )
}

/// Struct hash over the packed 32-byte slots.
///
/// `keccak256(abi.encode(sender, nonce, keccak(initCode), keccak(callData),
/// accountGasLimits, preVerificationGas, gasFees, keccak(paymasterAndData)))`
#[must_use]
pub fn packed_struct_hash(op: &PackedUserOperation) -> B256 {
    keccak256(
        (
            op.sender,
            op.nonce,
            keccak256(&op.initCode),
            keccak256(&op.callData),
            op.accountGasLimits,
            op.preVerificationGas,
            op.gasFees,
            keccak256(&op.paymasterAndData),
        )
            .abi_encode_params(),
    )
}

/// Digest the account owner signs.
#[must_use]
pub fn hash(
    op: &PackedUserOperation,
    entrypoint: Address,
    chain_id: u64,
    scheme: UserOpHashScheme,
) -> B256 {
    let struct_hash = match scheme {
        UserOpHashScheme::Unpacked => unpacked_struct_hash(op),
        UserOpHashScheme::Packed => packed_struct_hash(op),
    };
    keccak256((struct_hash, entrypoint, U256::from(chain_id)).abi_encode_params())
}

/// Checks that `op.signature` is `owner`'s EIP-191 signature over `op_hash`,
/// the form a simple account validates.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] if the signature is not 65 bytes,
/// does not recover, or recovers to another address.
pub fn verify_owner_signature(
    op: &PackedUserOperation,
    op_hash: B256,
    owner: Address,
) -> Result<(), RelayError> {
    let signature = Signature::try_from(op.signature.as_ref()).map_err(|e| {
        RelayError::malformed(format!("invalid user operation signature: {e}"))
    })?;
    let recovered = signature
        .recover_address_from_prehash(&eip191_hash_message(op_hash))
        .map_err(|e| RelayError::malformed(format!("user operation signature: {e}")))?;
    if recovered == owner {
        Ok(())
    } else {
        Err(RelayError::malformed(format!(
            "user operation signed by {recovered}, expected {owner}"
        )))
    }
}

/// Factory view returning the counterfactual account of `owner`.
#[must_use]
pub fn account_address_call(factory: Address, owner: Address, salt: U256) -> CallDescriptor {
    CallDescriptor::view(factory, ISimpleAccountFactory::getAddressCall { owner, salt })
}

/// Reads needed to build an operation for `sender`: code size, then nonce.
#[must_use]
pub fn account_state_calls(bundle: &ContractBundle, sender: Address) -> Vec<CallDescriptor> {
    vec![
        CallDescriptor::view(
            bundle.multicall,
            IMulticall::getExtcodesizeCall { account: sender },
        ),
        CallDescriptor::view(
            bundle.entrypoint,
            IEntryPoint::getNonceCall {
                sender,
                key: NONCE_KEY,
            },
        ),
    ]
}

impl AccountState {
    /// Interprets the results of [`account_state_calls`].
    ///
    /// # Errors
    ///
    /// - [`RelayError::BatchCountMismatch`] if `results` does not hold two entries
    /// - [`RelayError::Decode`] if either read failed or returned garbage
    pub fn decode(results: &[CallResult]) -> Result<Self, RelayError> {
        let [code, nonce] = results else {
            return Err(RelayError::BatchCountMismatch {
                expected: 2,
                actual: results.len(),
            });
        };
        let code_size = multicall::decode_return::<IMulticall::getExtcodesizeCall>(code)?;
        let nonce = multicall::decode_return::<IEntryPoint::getNonceCall>(nonce)?;
        Ok(Self {
            has_code: !code_size.is_zero(),
            nonce,
        })
    }
}

/// Resolves the counterfactual account of `owner`.
///
/// # Errors
///
/// Propagates transport and decoding failures.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(owner = %owner)))]
pub async fn account_address<R>(
    rpc: &R,
    bundle: &ContractBundle,
    owner: Address,
    salt: U256,
) -> Result<Address, RelayError>
where
    R: EvmRpc + ?Sized,
{
    let call = account_address_call(bundle.simple_account_factory, owner, salt);
    let results = multicall::view(rpc, bundle.multicall, &[call]).await?;
    multicall::decode_return::<ISimpleAccountFactory::getAddressCall>(&results[0])
}

/// Reads code size and nonce of `sender` in one multicall.
///
/// # Errors
///
/// Propagates transport and decoding failures.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(sender = %sender)))]
pub async fn account_state<R>(
    rpc: &R,
    bundle: &ContractBundle,
    sender: Address,
) -> Result<AccountState, RelayError>
where
    R: EvmRpc + ?Sized,
{
    let results = multicall::view(rpc, bundle.multicall, &account_state_calls(bundle, sender)).await?;
    AccountState::decode(&results)
}

/// Wire form of a [`PackedUserOperation`].
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOperationJson {
    /// Sender account.
    #[serde(rename = "op-sender")]
    pub sender: Address,
    /// Nonce, decimal.
    #[serde(rename = "op-nonce")]
    #[serde_as(as = "DisplayFromStr")]
    pub nonce: U256,
    /// Init-code.
    #[serde(rename = "op-init-code")]
    pub init_code: Bytes,
    /// Call data.
    #[serde(rename = "op-call-data")]
    pub call_data: Bytes,
    /// `verification ‖ call` gas.
    #[serde(rename = "op-gas-limits")]
    pub account_gas_limits: B256,
    /// Pre-verification gas, decimal.
    #[serde(rename = "op-pre-gas")]
    #[serde_as(as = "DisplayFromStr")]
    pub pre_verification_gas: U256,
    /// `priority ‖ max` fee.
    #[serde(rename = "op-gas-fees")]
    pub gas_fees: B256,
    /// Paymaster authorization.
    #[serde(rename = "op-paymaster-and-data")]
    pub paymaster_and_data: Bytes,
    /// Owner signature.
    #[serde(rename = "op-signature")]
    pub signature: Bytes,
}

impl From<&PackedUserOperation> for UserOperationJson {
    fn from(op: &PackedUserOperation) -> Self {
        Self {
            sender: op.sender,
            nonce: op.nonce,
            init_code: op.initCode.clone(),
            call_data: op.callData.clone(),
            account_gas_limits: op.accountGasLimits,
            pre_verification_gas: op.preVerificationGas,
            gas_fees: op.gasFees,
            paymaster_and_data: op.paymasterAndData.clone(),
            signature: op.signature.clone(),
        }
    }
}

impl From<UserOperationJson> for PackedUserOperation {
    fn from(op: UserOperationJson) -> Self {
        Self {
            sender: op.sender,
            nonce: op.nonce,
            initCode: op.init_code,
            callData: op.call_data,
            accountGasLimits: op.account_gas_limits,
            preVerificationGas: op.pre_verification_gas,
            gasFees: op.gas_fees,
            paymasterAndData: op.paymaster_and_data,
            signature: op.signature,
        }
    }
}

/// Unsigned destination-side artifacts for an EVM chain.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserOperationMessage {
    /// The operation to sign.
    #[serde(rename = "op-packed-data")]
    pub packed: UserOperationJson,
    /// Decoded paymaster authorization.
    #[serde(rename = "op-paymaster")]
    pub paymaster: PaymasterJson,
    /// Digest to sign.
    #[serde(rename = "op-hash")]
    pub hash: B256,
    /// Maximum gas cost, decimal wei.
    #[serde(rename = "op-price")]
    #[serde_as(as = "DisplayFromStr")]
    pub price: U256,
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, b256};
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    use super::*;

    const OWNER: Address = address!("19E7E376E7C213B7E7e7e46cc70A5dD086DAff2A");
    const FACTORY: Address = address!("CF730748FcDc78A5AB854B898aC24b6d6001AbF7");
    const ENTRYPOINT: Address = address!("317bBdFbAe7845648864348A0C304392d0F2925F");
    const SENDER: Address = address!("00000000000000000000000000000000000000aa");

    fn request() -> UserOpRequest {
        UserOpRequest {
            owner: OWNER,
            factory: FACTORY,
            salt: U256::from(55),
            sender: SENDER,
            call_data: execute_call_data(Address::repeat_byte(3), U256::from(1), Bytes::new()),
            paymaster_and_data: Bytes::from(vec![7u8; 129]),
        }
    }

    fn op() -> PackedUserOperation {
        build(
            &request(),
            AccountState {
                has_code: true,
                nonce: U256::from(4),
            },
            &GasSettings::default(),
        )
    }

    #[test]
    fn test_default_gas_slots() {
        let gas = GasSettings::default();
        assert_eq!(
            gas.account_gas_limits(),
            b256!("00000000000000000000000001312d0000000000000000000000000000989680")
        );
    }

    #[test]
    fn test_pack_pair_layout() {
        let word = pack_u128_pair(0x0131_2d00, 0x0098_9680);
        assert_eq!(&word[12..16], &[0x01, 0x31, 0x2d, 0x00]);
        assert_eq!(&word[29..32], &[0x98, 0x96, 0x80]);
        assert_eq!(unpack_u128_pair(word), (20_000_000, 10_000_000));
        assert_eq!(
            unpack_u128_pair(GasSettings::default().gas_fees()),
            (DEFAULT_MAX_PRIORITY_FEE, DEFAULT_MAX_FEE)
        );
    }

    #[test]
    fn test_build_without_code_deploys() {
        let op = build(
            &request(),
            AccountState {
                has_code: false,
                nonce: U256::from(9),
            },
            &GasSettings::default(),
        );
        assert_eq!(op.nonce, U256::ZERO);
        assert_eq!(&op.initCode[..20], FACTORY.as_slice());
        assert_eq!(
            &op.initCode[20..24],
            &ISimpleAccountFactory::createAccountCall::SELECTOR
        );
        assert_eq!(op.initCode.len(), 20 + 4 + 64);
    }

    #[test]
    fn test_build_with_code_uses_chain_nonce() {
        let op = op();
        assert!(op.initCode.is_empty());
        assert_eq!(op.nonce, U256::from(4));
        assert!(op.signature.is_empty());
    }

    #[test]
    fn test_hash_is_stable() {
        let a = hash(&op(), ENTRYPOINT, 200_810, UserOpHashScheme::Unpacked);
        let b = hash(&op(), ENTRYPOINT, 200_810, UserOpHashScheme::Unpacked);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_changes_with_every_field() {
        let base = op();
        let mutations: Vec<Box<dyn Fn(&mut PackedUserOperation)>> = vec![
            Box::new(|o: &mut PackedUserOperation| o.sender = Address::repeat_byte(1)),
            Box::new(|o: &mut PackedUserOperation| o.nonce = U256::from(5)),
            Box::new(|o: &mut PackedUserOperation| o.initCode = Bytes::from_static(&[1])),
            Box::new(|o: &mut PackedUserOperation| o.callData = Bytes::from_static(&[1])),
            Box::new(|o: &mut PackedUserOperation| o.accountGasLimits = pack_u128_pair(1, 10_000_000)),
            Box::new(|o: &mut PackedUserOperation| o.accountGasLimits = pack_u128_pair(20_000_000, 1)),
            Box::new(|o: &mut PackedUserOperation| o.preVerificationGas = U256::from(1)),
            Box::new(|o: &mut PackedUserOperation| o.gasFees = pack_u128_pair(3, 0)),
            Box::new(|o: &mut PackedUserOperation| o.gasFees = pack_u128_pair(2, 1)),
            Box::new(|o: &mut PackedUserOperation| o.paymasterAndData = Bytes::new()),
        ];
        for scheme in [UserOpHashScheme::Unpacked, UserOpHashScheme::Packed] {
            let reference = hash(&base, ENTRYPOINT, 200_810, scheme);
            for mutate in &mutations {
                let mut changed = base.clone();
                mutate(&mut changed);
                assert_ne!(hash(&changed, ENTRYPOINT, 200_810, scheme), reference);
            }
            assert_ne!(hash(&base, Address::ZERO, 200_810, scheme), reference);
            assert_ne!(hash(&base, ENTRYPOINT, 1, scheme), reference);
        }
    }

    #[test]
    fn test_signature_excluded_from_hash() {
        let mut signed = op();
        signed.signature = Bytes::from(vec![1u8; 65]);
        assert_eq!(
            hash(&signed, ENTRYPOINT, 1, UserOpHashScheme::Packed),
            hash(&op(), ENTRYPOINT, 1, UserOpHashScheme::Packed)
        );
    }

    #[test]
    fn test_unpacked_and_packed_hashes_differ() {
        let op = op();
        assert_ne!(unpacked_struct_hash(&op), packed_struct_hash(&op));
    }

    #[test]
    fn test_unpacked_struct_hash_field_order() {
        let op = op();
        let mut words = Vec::new();
        words.extend_from_slice(op.sender.into_word().as_slice());
        words.extend_from_slice(&op.nonce.to_be_bytes::<32>());
        words.extend_from_slice(keccak256(&op.initCode).as_slice());
        words.extend_from_slice(keccak256(&op.callData).as_slice());
        for v in [10_000_000u64, 20_000_000, 20_000_000, 0, 2] {
            words.extend_from_slice(&U256::from(v).to_be_bytes::<32>());
        }
        words.extend_from_slice(keccak256(&op.paymasterAndData).as_slice());
        assert_eq!(unpacked_struct_hash(&op), keccak256(words));
    }

    #[test]
    fn test_account_state_decode() {
        let ok = |v: u64| CallResult {
            success: true,
            returnData: Bytes::from(U256::from(v).abi_encode()),
        };
        let state = AccountState::decode(&[ok(0), ok(0)]).unwrap();
        assert!(!state.has_code);
        let state = AccountState::decode(&[ok(512), ok(3)]).unwrap();
        assert_eq!(
            state,
            AccountState {
                has_code: true,
                nonce: U256::from(3)
            }
        );
        assert!(AccountState::decode(&[ok(1)]).is_err());
    }

    #[test]
    fn test_json_keys() {
        let json = serde_json::to_value(UserOperationJson::from(&op())).unwrap();
        assert_eq!(json["op-nonce"], "4");
        assert_eq!(json["op-pre-gas"], "20000000");
        assert_eq!(json["op-signature"], "0x");
        let back: UserOperationJson = serde_json::from_value(json).unwrap();
        assert_eq!(PackedUserOperation::from(back), op());
    }

    fn signed(key: &PrivateKeySigner, hash: B256) -> PackedUserOperation {
        let mut op = op();
        let signature = key.sign_message_sync(hash.as_slice()).unwrap();
        op.signature = Bytes::from(signature.as_bytes().to_vec());
        op
    }

    #[test]
    fn test_owner_signature_accepted() {
        let key = PrivateKeySigner::random();
        let hash = hash(&op(), ENTRYPOINT, 200_810, UserOpHashScheme::Unpacked);
        let op = signed(&key, hash);
        assert!(verify_owner_signature(&op, hash, key.address()).is_ok());
    }

    #[test]
    fn test_owner_signature_rejects_other_key_and_other_hash() {
        let key = PrivateKeySigner::random();
        let hash = hash(&op(), ENTRYPOINT, 200_810, UserOpHashScheme::Unpacked);
        let op = signed(&PrivateKeySigner::random(), hash);
        assert!(matches!(
            verify_owner_signature(&op, hash, key.address()),
            Err(RelayError::MalformedRequest(_))
        ));

        let op = signed(&key, hash);
        let other = B256::repeat_byte(1);
        assert!(verify_owner_signature(&op, other, key.address()).is_err());
    }

    #[test]
    fn test_owner_signature_rejects_short_bytes() {
        let mut op = op();
        for raw in [Vec::new(), vec![1u8], vec![0u8; 64]] {
            op.signature = Bytes::from(raw);
            assert!(matches!(
                verify_owner_signature(&op, B256::ZERO, OWNER),
                Err(RelayError::MalformedRequest(_))
            ));
        }
    }
}
