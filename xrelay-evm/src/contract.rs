//! Solidity interface definitions for the relay contracts.
//!
//! Only the functions the relay actually calls are declared:
//! - [`IEscrow`] - Per-user escrow holding locked deposits
//! - [`IEscrowFactory`] - Deterministic escrow proxy deployment
//! - [`IMulticall`] - Batched views and value-carrying batched execution
//! - [`ISimpleAccountFactory`] - Counterfactual smart accounts
//! - [`IEntryPoint`] - ERC-4337 entrypoint (v0.7 packed operations)
//! - [`ISimpleAccount`] - Smart-account call execution
//! - [`IERC20`] - Token metadata and balances

use alloy_sol_types::sol;

sol! {
    /// Escrow singleton interface, called through each user's proxy.
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface IEscrow {
        function initialize(address owner_, address delegateAddress_) external;
        function getAssetInfo(address asset_) external view returns (uint256, uint256, uint256);
        function depositAndLock(address asset_, uint256 amount_) external payable;
        function extendLockHash(uint256 sec_, address asset_) external view returns (bytes32);
        function extendNonce() external view returns (uint256);
    }
}

sol! {
    /// Factory deploying escrow proxies with CREATE2.
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface IEscrowFactory {
        function getEscrowAddress(bytes _initializer, bytes32 _salt) external view returns (address proxy);
        function createEscrow(bytes _initializer, bytes32 _salt) external returns (address proxy);
    }
}

sol! {
    /// Relay multicall helper.
    ///
    /// `multicallView` never reverts on an inner failure; each element reports
    /// its own success flag.
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface IMulticall {
        struct Call {
            address target;
            bytes callData;
        }

        struct CallValue {
            address target;
            uint256 value;
            bytes callData;
        }

        struct CallResult {
            bool success;
            bytes returnData;
        }

        function getExtcodesize(address account) external view returns (uint256);
        function multicallView(Call[] calls) external view returns (CallResult[] memory);
        function multicallExecuteAll(CallValue[] calls) external payable;
    }
}

sol! {
    /// Simple-account factory from the ERC-4337 reference implementation.
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface ISimpleAccountFactory {
        function createAccount(address owner, uint256 salt) external returns (address ret);
        function getAddress(address owner, uint256 salt) external view returns (address);
    }
}

sol! {
    /// ERC-4337 packed user operation (entrypoint v0.7).
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    struct PackedUserOperation {
        address sender;
        uint256 nonce;
        bytes initCode;
        bytes callData;
        bytes32 accountGasLimits;
        uint256 preVerificationGas;
        bytes32 gasFees;
        bytes paymasterAndData;
        bytes signature;
    }

    /// ERC-4337 entrypoint subset.
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface IEntryPoint {
        function getNonce(address sender, uint192 key) external view returns (uint256 nonce);
        function getUserOpHash(PackedUserOperation userOp) external view returns (bytes32);
    }

    /// Simple-account execution entry.
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface ISimpleAccount {
        function execute(address dest, uint256 value, bytes func) external;
    }
}

sol! {
    /// Minimal ERC-20 read interface.
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface IERC20 {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function totalSupply() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
    }
}
