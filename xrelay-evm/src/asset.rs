//! ERC-20 asset metadata.
//!
//! The five reads are appended to a side's multicall batch so the asset details
//! never cost an extra round trip.

use alloy_primitives::{Address, U256};
use serde::Serialize;
use serde_with::{DisplayFromStr, serde_as};
use xrelay::RelayError;

use crate::call::CallDescriptor;
use crate::contract::IERC20;
use crate::multicall::{self, CallResult};

/// Number of calls produced by [`asset_calls`].
pub const ASSET_CALL_COUNT: usize = 5;

/// Metadata and holder balance of an ERC-20 token.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AssetInfo {
    /// Token contract.
    pub address: Address,
    /// Token name.
    pub name: String,
    /// Token symbol.
    pub symbol: String,
    /// Decimals.
    pub decimals: u8,
    /// Total supply.
    #[serde_as(as = "DisplayFromStr")]
    pub total_supply: U256,
    /// Balance of the queried holder.
    #[serde_as(as = "DisplayFromStr")]
    pub balance: U256,
}

/// Reads for `token`: name, symbol, decimals, totalSupply, balanceOf(holder).
#[must_use]
pub fn asset_calls(token: Address, holder: Address) -> Vec<CallDescriptor> {
    vec![
        CallDescriptor::view(token, IERC20::nameCall {}),
        CallDescriptor::view(token, IERC20::symbolCall {}),
        CallDescriptor::view(token, IERC20::decimalsCall {}),
        CallDescriptor::view(token, IERC20::totalSupplyCall {}),
        CallDescriptor::view(token, IERC20::balanceOfCall { account: holder }),
    ]
}

impl AssetInfo {
    /// Interprets the results of [`asset_calls`].
    ///
    /// # Errors
    ///
    /// - [`RelayError::BatchCountMismatch`] if `results` does not hold five entries
    /// - [`RelayError::Decode`] if a read failed; the address is not an ERC-20
    pub fn decode(token: Address, results: &[CallResult]) -> Result<Self, RelayError> {
        let [name, symbol, decimals, supply, balance] = results else {
            return Err(RelayError::BatchCountMismatch {
                expected: ASSET_CALL_COUNT,
                actual: results.len(),
            });
        };
        Ok(Self {
            address: token,
            name: multicall::decode_return::<IERC20::nameCall>(name)?,
            symbol: multicall::decode_return::<IERC20::symbolCall>(symbol)?,
            decimals: multicall::decode_return::<IERC20::decimalsCall>(decimals)?,
            total_supply: multicall::decode_return::<IERC20::totalSupplyCall>(supply)?,
            balance: multicall::decode_return::<IERC20::balanceOfCall>(balance)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Bytes;
    use alloy_sol_types::SolValue;

    use super::*;

    fn ok(data: Vec<u8>) -> CallResult {
        CallResult {
            success: true,
            returnData: Bytes::from(data),
        }
    }

    #[test]
    fn test_calls_target_token() {
        let token = Address::repeat_byte(1);
        let calls = asset_calls(token, Address::repeat_byte(2));
        assert_eq!(calls.len(), ASSET_CALL_COUNT);
        assert!(calls.iter().all(|c| c.target == token && c.is_view()));
    }

    #[test]
    fn test_decode() {
        let token = Address::repeat_byte(1);
        let results = [
            ok("Tether USD".to_string().abi_encode()),
            ok("USDT".to_string().abi_encode()),
            ok(<alloy_sol_types::sol_data::Uint<8> as alloy_sol_types::SolType>::abi_encode(&6u8)),
            ok(U256::from(1_000_000u64).abi_encode()),
            ok(U256::from(42).abi_encode()),
        ];
        let info = AssetInfo::decode(token, &results).unwrap();
        assert_eq!(info.symbol, "USDT");
        assert_eq!(info.decimals, 6);
        assert_eq!(info.balance, U256::from(42));

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["total-supply"], "1000000");
    }

    #[test]
    fn test_decode_non_token() {
        let failed = CallResult {
            success: false,
            returnData: Bytes::new(),
        };
        let results = vec![failed; ASSET_CALL_COUNT];
        assert!(matches!(
            AssetInfo::decode(Address::ZERO, &results),
            Err(RelayError::Decode(_))
        ));
        assert!(AssetInfo::decode(Address::ZERO, &results[..2]).is_err());
    }
}
