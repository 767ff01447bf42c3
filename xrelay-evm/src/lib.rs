#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EVM side of the xrelay cross-chain escrow relay.
//!
//! Builds the unsigned artifacts a client signs on EVM chains and validates
//! signed ones before they are relayed.
//!
//! # Overview
//!
//! On the origin chain, funds are deposited and locked in a per-user escrow
//! proxy whose address is derived with CREATE2 before deployment. On the
//! destination chain, a user operation runs from the user's simple account
//! and is sponsored by the relay paymaster against those locked funds.
//!
//! Every read for one side is collapsed into a single multicall.
//!
//! # Modules
//!
//! - [`contract`] - `sol!` interfaces of the relay contracts
//! - [`call`] - Closed set of typed contract calls and their calldata
//! - [`multicall`] - Batch encoding with the explicit offset table, result decoding
//! - [`escrow`] - Escrow address derivation, lifecycle snapshot, lock and extend payloads
//! - [`userop`] - ERC-4337 user operations, dual-field gas slots, operation hashes
//! - [`paymaster`] - 129-byte paymaster authorization: build, parse, validate
//! - [`asset`] - ERC-20 metadata reads
//! - [`provider`] - Chain RPC collaborator trait, timeouts, alloy implementation
//! - [`signer`] - Relay signing context
//!
//! # Feature Flags
//!
//! - `provider` - [`provider::AlloyEvmRpc`], a JSON-RPC client built on alloy
//! - `telemetry` - `tracing` spans and decode warnings
//! - `full` - All of the above

pub mod asset;
pub mod call;
pub mod contract;
pub mod escrow;
pub mod multicall;
pub mod paymaster;
pub mod provider;
pub mod signer;
pub mod userop;

pub use call::{CallDescriptor, EvmCall};
pub use escrow::{EscrowAccount, EscrowMessage, EscrowSnapshot, EscrowState};
pub use paymaster::PaymasterFields;
pub use provider::{EvmRpc, RpcError, Timed};
pub use signer::RelaySigner;
pub use userop::{PackedUserOperation, UserOpHashScheme, UserOperationMessage};
