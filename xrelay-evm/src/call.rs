//! Typed contract calls and their calldata.
//!
//! Every function the relay invokes is one variant of [`EvmCall`], wrapping the
//! argument struct generated by `sol!`. Encoding is always the 4-byte selector
//! followed by the head/tail ABI encoding of the arguments.

use alloy_primitives::{Address, Bytes, U256, keccak256};
use alloy_sol_types::SolCall;

use crate::contract::{
    IERC20, IEntryPoint, IEscrow, IEscrowFactory, IMulticall, ISimpleAccount,
    ISimpleAccountFactory,
};

/// Computes the 4-byte selector of a canonical function signature such as
/// `"transfer(address,uint256)"`.
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

macro_rules! evm_calls {
    ($($(#[$doc:meta])* $variant:ident($ty:ty)),* $(,)?) => {
        /// Closed set of contract calls the relay encodes.
        #[derive(Debug, Clone)]
        pub enum EvmCall {
            $($(#[$doc])* $variant($ty),)*
        }

        impl EvmCall {
            /// Encodes selector plus ABI arguments.
            #[must_use]
            pub fn encode(&self) -> Bytes {
                match self {
                    $(Self::$variant(call) => Bytes::from(call.abi_encode()),)*
                }
            }

            /// Canonical Solidity signature, e.g. `"getExtcodesize(address)"`.
            #[must_use]
            pub const fn signature(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => <$ty as SolCall>::SIGNATURE,)*
                }
            }

            /// The 4-byte function selector.
            #[must_use]
            pub const fn selector(&self) -> [u8; 4] {
                match self {
                    $(Self::$variant(_) => <$ty as SolCall>::SELECTOR,)*
                }
            }
        }

        $(
            impl From<$ty> for EvmCall {
                fn from(call: $ty) -> Self {
                    Self::$variant(call)
                }
            }
        )*
    };
}

evm_calls! {
    /// `initialize(address,address)` on an escrow.
    EscrowInitialize(IEscrow::initializeCall),
    /// `getAssetInfo(address)` on an escrow.
    EscrowAssetInfo(IEscrow::getAssetInfoCall),
    /// `depositAndLock(address,uint256)` on an escrow.
    EscrowDepositAndLock(IEscrow::depositAndLockCall),
    /// `extendLockHash(uint256,address)` on an escrow.
    EscrowExtendLockHash(IEscrow::extendLockHashCall),
    /// `extendNonce()` on an escrow.
    EscrowExtendNonce(IEscrow::extendNonceCall),
    /// `getEscrowAddress(bytes,bytes32)` on the escrow factory.
    FactoryEscrowAddress(IEscrowFactory::getEscrowAddressCall),
    /// `createEscrow(bytes,bytes32)` on the escrow factory.
    FactoryCreateEscrow(IEscrowFactory::createEscrowCall),
    /// `getExtcodesize(address)` on the multicall helper.
    CodeSize(IMulticall::getExtcodesizeCall),
    /// `createAccount(address,uint256)` on the simple-account factory.
    AccountCreate(ISimpleAccountFactory::createAccountCall),
    /// `getAddress(address,uint256)` on the simple-account factory.
    AccountAddress(ISimpleAccountFactory::getAddressCall),
    /// `execute(address,uint256,bytes)` on a simple account.
    AccountExecute(ISimpleAccount::executeCall),
    /// `getNonce(address,uint192)` on the entrypoint.
    EntryPointNonce(IEntryPoint::getNonceCall),
    /// `name()` on an ERC-20.
    TokenName(IERC20::nameCall),
    /// `symbol()` on an ERC-20.
    TokenSymbol(IERC20::symbolCall),
    /// `decimals()` on an ERC-20.
    TokenDecimals(IERC20::decimalsCall),
    /// `totalSupply()` on an ERC-20.
    TokenTotalSupply(IERC20::totalSupplyCall),
    /// `balanceOf(address)` on an ERC-20.
    TokenBalance(IERC20::balanceOfCall),
}

/// A call bound to its target, with its encoded calldata.
///
/// A descriptor with `value == None` is a view call; one with a value is
/// value-carrying and only valid inside an execute batch.
#[derive(Debug, Clone)]
pub struct CallDescriptor {
    /// Contract receiving the call.
    pub target: Address,
    /// Native value attached, for value-carrying calls.
    pub value: Option<U256>,
    /// The typed call.
    pub call: EvmCall,
    /// `call.encode()`, computed once.
    pub data: Bytes,
}

impl CallDescriptor {
    /// Creates a view call.
    #[must_use]
    pub fn view(target: Address, call: impl Into<EvmCall>) -> Self {
        let call = call.into();
        let data = call.encode();
        Self {
            target,
            value: None,
            call,
            data,
        }
    }

    /// Creates a value-carrying call.
    #[must_use]
    pub fn with_value(target: Address, value: U256, call: impl Into<EvmCall>) -> Self {
        let call = call.into();
        let data = call.encode();
        Self {
            target,
            value: Some(value),
            call,
            data,
        }
    }

    /// Returns `true` for view calls.
    #[must_use]
    pub const fn is_view(&self) -> bool {
        self.value.is_none()
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{FixedBytes, address, hex};

    use super::*;

    #[test]
    fn test_selector_matches_generated() {
        assert_eq!(
            selector("getExtcodesize(address)"),
            IMulticall::getExtcodesizeCall::SELECTOR
        );
        assert_eq!(
            selector("depositAndLock(address,uint256)"),
            IEscrow::depositAndLockCall::SELECTOR
        );
        assert_eq!(selector("transfer(address,uint256)"), hex!("a9059cbb"));
    }

    #[test]
    fn test_encode_static_args() {
        let owner = address!("19E7E376E7C213B7E7e7e46cc70A5dD086DAff2A");
        let call = EvmCall::from(ISimpleAccountFactory::createAccountCall {
            owner,
            salt: U256::from(55),
        });
        let data = call.encode();
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(&data[..4], &selector("createAccount(address,uint256)"));
        assert_eq!(&data[16..36], owner.as_slice());
        assert_eq!(data[67], 55);
        assert_eq!(call.signature(), "createAccount(address,uint256)");
    }

    #[test]
    fn test_encode_dynamic_args_head_tail() {
        let initializer = Bytes::from(vec![0xab; 33]);
        let call = EvmCall::from(IEscrowFactory::getEscrowAddressCall {
            _initializer: initializer,
            _salt: FixedBytes::with_last_byte(0x37),
        });
        let data = call.encode();
        // head: offset(0x40), salt; tail: len(33), 64 padded bytes
        assert_eq!(data.len(), 4 + 32 * 2 + 32 + 64);
        assert_eq!(data[4 + 31], 0x40);
        assert_eq!(data[4 + 63], 0x37);
        assert_eq!(data[4 + 95], 33);
        assert_eq!(data[4 + 96], 0xab);
        assert_eq!(data[4 + 96 + 33], 0);
    }

    #[test]
    fn test_descriptor_flags() {
        let target = Address::repeat_byte(1);
        let view = CallDescriptor::view(target, IEscrow::extendNonceCall {});
        assert!(view.is_view());
        assert_eq!(view.data.as_ref(), &IEscrow::extendNonceCall::SELECTOR);
        let lock = CallDescriptor::with_value(
            target,
            U256::from(5),
            IEscrow::depositAndLockCall {
                asset_: Address::ZERO,
                amount_: U256::from(5),
            },
        );
        assert!(!lock.is_view());
    }
}
