//! Multicall batching.
//!
//! Many [`CallDescriptor`]s are collapsed into one call to the relay multicall
//! helper: `multicallView((address,bytes)[])` for reads and
//! `multicallExecuteAll((address,uint256,bytes)[])` for value-carrying writes.
//!
//! The array argument is encoded by hand. After the selector come the outer
//! offset (`0x20`) and the element count `N`, then `N` offset words, then the
//! elements. Offsets are relative to the first offset word: the first element
//! starts right after the table (`N * 32`) and each later one after the sum of
//! the padded sizes of all elements before it.

use alloy_primitives::{Address, Bytes, U256, hex};
use alloy_sol_types::SolCall;
#[cfg(feature = "telemetry")]
use tracing::instrument;
use xrelay::RelayError;

use crate::call::CallDescriptor;
use crate::contract::IMulticall;
pub use crate::contract::IMulticall::CallResult;
use crate::provider::EvmRpc;

const WORD: usize = 32;

/// Rounds `len` up to the next multiple of 32.
const fn padded(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

fn push_word(out: &mut Vec<u8>, value: usize) {
    out.extend_from_slice(&U256::from(value).to_be_bytes::<32>());
}

fn push_address(out: &mut Vec<u8>, address: Address) {
    out.extend_from_slice(&[0u8; 12]);
    out.extend_from_slice(address.as_slice());
}

fn push_bytes(out: &mut Vec<u8>, data: &[u8]) {
    push_word(out, data.len());
    out.extend_from_slice(data);
    out.resize(out.len() + padded(data.len()) - data.len(), 0);
}

/// Encodes one struct-array batch.
///
/// `head_words` is 2 for `(address,bytes)` and 3 for `(address,uint256,bytes)`.
fn encode_batch(selector: [u8; 4], calls: &[CallDescriptor], with_value: bool) -> Bytes {
    let head_words = if with_value { 3 } else { 2 };
    let element_size = |c: &CallDescriptor| (head_words + 1) * WORD + padded(c.data.len());
    let body: usize = calls.iter().map(element_size).sum();

    let mut out = Vec::with_capacity(4 + 2 * WORD + calls.len() * WORD + body);
    out.extend_from_slice(&selector);
    push_word(&mut out, WORD);
    push_word(&mut out, calls.len());

    let mut offset = calls.len() * WORD;
    for call in calls {
        push_word(&mut out, offset);
        offset += element_size(call);
    }

    for call in calls {
        push_address(&mut out, call.target);
        if with_value {
            out.extend_from_slice(&call.value.unwrap_or_default().to_be_bytes::<32>());
        }
        push_word(&mut out, head_words * WORD);
        push_bytes(&mut out, &call.data);
    }
    Bytes::from(out)
}

/// Encodes a `multicallView` call over `calls`.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] if the batch is empty or contains
/// a value-carrying call.
pub fn encode_view(calls: &[CallDescriptor]) -> Result<Bytes, RelayError> {
    if calls.is_empty() {
        return Err(RelayError::malformed("empty multicall batch"));
    }
    if let Some(call) = calls.iter().find(|c| !c.is_view()) {
        return Err(RelayError::malformed(format!(
            "value-carrying call {} in view batch",
            call.call.signature()
        )));
    }
    Ok(encode_batch(
        IMulticall::multicallViewCall::SELECTOR,
        calls,
        false,
    ))
}

/// Encodes a `multicallExecuteAll` call over `calls`. View calls carry zero value.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] if the batch is empty.
pub fn encode_execute(calls: &[CallDescriptor]) -> Result<Bytes, RelayError> {
    if calls.is_empty() {
        return Err(RelayError::malformed("empty multicall batch"));
    }
    Ok(encode_batch(
        IMulticall::multicallExecuteAllCall::SELECTOR,
        calls,
        true,
    ))
}

/// Sum of the values attached to `calls`.
#[must_use]
pub fn total_value(calls: &[CallDescriptor]) -> U256 {
    calls
        .iter()
        .filter_map(|c| c.value)
        .fold(U256::ZERO, U256::saturating_add)
}

/// Decodes the return data of `multicallView`.
///
/// Individual `success == false` entries are returned as data.
///
/// # Errors
///
/// - [`RelayError::Decode`] if `data` is not a `(bool,bytes)[]`
/// - [`RelayError::BatchCountMismatch`] if the element count differs from `expected`
pub fn decode_results(data: &[u8], expected: usize) -> Result<Vec<CallResult>, RelayError> {
    let results = IMulticall::multicallViewCall::abi_decode_returns(data).map_err(|e| {
        #[cfg(feature = "telemetry")]
        tracing::warn!(bytes = %hex::encode_prefixed(data), error = %e, "undecodable multicall result");
        RelayError::decode(format!("multicall result {}: {e}", hex::encode_prefixed(data)))
    })?;
    if results.len() != expected {
        return Err(RelayError::BatchCountMismatch {
            expected,
            actual: results.len(),
        });
    }
    Ok(results)
}

/// Decodes the return value of one successful batch element.
///
/// # Errors
///
/// Returns [`RelayError::Decode`] if the call failed or its data does not
/// decode as `C`'s return type.
pub fn decode_return<C: SolCall>(result: &CallResult) -> Result<C::Return, RelayError> {
    if !result.success {
        return Err(RelayError::decode(format!(
            "{} reverted: {}",
            C::SIGNATURE,
            hex::encode_prefixed(&result.returnData)
        )));
    }
    C::abi_decode_returns(&result.returnData).map_err(|e| {
        #[cfg(feature = "telemetry")]
        tracing::warn!(call = C::SIGNATURE, bytes = %hex::encode_prefixed(&result.returnData), "undecodable return data");
        RelayError::decode(format!(
            "{}: {e}: {}",
            C::SIGNATURE,
            hex::encode_prefixed(&result.returnData)
        ))
    })
}

/// Runs `calls` as one `multicallView` against `multicall`.
///
/// # Errors
///
/// Propagates encoding, transport and decoding failures.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(calls = calls.len())))]
pub async fn view<R>(
    rpc: &R,
    multicall: Address,
    calls: &[CallDescriptor],
) -> Result<Vec<CallResult>, RelayError>
where
    R: EvmRpc + ?Sized,
{
    let data = encode_view(calls)?;
    let output = rpc.call_view(multicall, data).await?;
    decode_results(&output, calls.len())
}

#[cfg(test)]
mod tests {
    use alloy_sol_types::{SolType, SolValue, sol_data};

    use super::*;
    use crate::contract::{IERC20, IEscrow, IEscrowFactory};

    fn mixed_calls(n: usize) -> Vec<CallDescriptor> {
        (0..n)
            .map(|i| {
                let target = Address::repeat_byte(u8::try_from(i + 1).unwrap());
                match i % 3 {
                    0 => CallDescriptor::view(
                        target,
                        IMulticall::getExtcodesizeCall {
                            account: Address::repeat_byte(0xaa),
                        },
                    ),
                    1 => CallDescriptor::view(
                        target,
                        IEscrowFactory::getEscrowAddressCall {
                            _initializer: Bytes::from(vec![0x11; 68 + i]),
                            _salt: alloy_primitives::B256::with_last_byte(0x37),
                        },
                    ),
                    _ => CallDescriptor::view(target, IERC20::symbolCall {}),
                }
            })
            .collect()
    }

    fn abi_view(calls: &[CallDescriptor]) -> Vec<u8> {
        IMulticall::multicallViewCall {
            calls: calls
                .iter()
                .map(|c| IMulticall::Call {
                    target: c.target,
                    callData: c.data.clone(),
                })
                .collect(),
        }
        .abi_encode()
    }

    fn fake_results(n: usize) -> Vec<CallResult> {
        (0..n)
            .map(|i| CallResult {
                success: i % 2 == 0,
                returnData: Bytes::from(vec![u8::try_from(i).unwrap(); i * 7]),
            })
            .collect()
    }

    #[test]
    fn test_view_encoding_matches_abi_encoder() {
        for n in [1, 2, 8] {
            let calls = mixed_calls(n);
            assert_eq!(encode_view(&calls).unwrap().as_ref(), abi_view(&calls).as_slice());
        }
    }

    #[test]
    fn test_execute_encoding_matches_abi_encoder() {
        let mut calls = mixed_calls(4);
        calls.push(CallDescriptor::with_value(
            Address::repeat_byte(9),
            U256::from(1_000_000u64),
            IEscrow::depositAndLockCall {
                asset_: Address::ZERO,
                amount_: U256::from(1_000_000u64),
            },
        ));
        let expected = IMulticall::multicallExecuteAllCall {
            calls: calls
                .iter()
                .map(|c| IMulticall::CallValue {
                    target: c.target,
                    value: c.value.unwrap_or_default(),
                    callData: c.data.clone(),
                })
                .collect(),
        }
        .abi_encode();
        assert_eq!(encode_execute(&calls).unwrap().as_ref(), expected.as_slice());
        assert_eq!(total_value(&calls), U256::from(1_000_000u64));
    }

    #[test]
    fn test_offset_table() {
        let calls = mixed_calls(2);
        let data = encode_view(&calls).unwrap();
        let word = |i: usize| U256::from_be_slice(&data[4 + i * 32..4 + (i + 1) * 32]);
        assert_eq!(word(0), U256::from(0x20));
        assert_eq!(word(1), U256::from(2));
        assert_eq!(word(2), U256::from(64));
        // first element: address, 0x40, len(36), 64 bytes of padded calldata
        let first = 3 * 32 + padded(calls[0].data.len());
        assert_eq!(word(3), U256::from(64 + first));
    }

    #[test]
    fn test_view_rejects_value_calls_and_empty() {
        assert!(encode_view(&[]).is_err());
        let call = CallDescriptor::with_value(
            Address::ZERO,
            U256::from(1),
            IEscrow::depositAndLockCall {
                asset_: Address::ZERO,
                amount_: U256::from(1),
            },
        );
        assert!(matches!(
            encode_view(&[call]),
            Err(RelayError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_decode_round_trip_preserves_order() {
        for n in [1, 2, 8] {
            let results = fake_results(n);
            let encoded = <sol_data::Array<CallResult> as SolType>::abi_encode(&results);
            let decoded = decode_results(&encoded, n).unwrap();
            assert_eq!(decoded.len(), n);
            for (a, b) in decoded.iter().zip(&results) {
                assert_eq!(a.success, b.success);
                assert_eq!(a.returnData, b.returnData);
            }
        }
    }

    /// Stands in for the on-chain helper: answers every call with its own target.
    fn echo_targets(calldata: &[u8]) -> Vec<u8> {
        let batch = IMulticall::multicallViewCall::abi_decode(calldata).unwrap();
        let results: Vec<CallResult> = batch
            .calls
            .iter()
            .map(|call| CallResult {
                success: true,
                returnData: Bytes::from(call.target.abi_encode()),
            })
            .collect();
        <sol_data::Array<CallResult> as SolType>::abi_encode(&results)
    }

    #[test]
    fn test_echoed_batch_keeps_call_order() {
        for n in [1, 2, 8] {
            let calls = mixed_calls(n);
            let calldata = encode_view(&calls).unwrap();
            let results = decode_results(&echo_targets(&calldata), n).unwrap();
            assert_eq!(results.len(), n);
            for (call, result) in calls.iter().zip(&results) {
                assert!(result.success);
                assert_eq!(Address::abi_decode(&result.returnData).unwrap(), call.target);
            }
        }
    }

    #[test]
    fn test_decode_count_mismatch() {
        let encoded = <sol_data::Array<CallResult> as SolType>::abi_encode(&fake_results(2));
        assert_eq!(
            decode_results(&encoded, 3).unwrap_err(),
            RelayError::BatchCountMismatch {
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_results(&[0xde, 0xad], 1),
            Err(RelayError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_return_failure_is_error() {
        let failed = CallResult {
            success: false,
            returnData: Bytes::new(),
        };
        assert!(decode_return::<IEscrow::extendNonceCall>(&failed).is_err());
        let ok = CallResult {
            success: true,
            returnData: Bytes::from(U256::from(3).to_be_bytes::<32>().to_vec()),
        };
        assert_eq!(
            decode_return::<IEscrow::extendNonceCall>(&ok).unwrap(),
            U256::from(3)
        );
    }
}
