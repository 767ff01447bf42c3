#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the xrelay cross-chain escrow relay.
//!
//! This crate holds the pieces every side of the relay agrees on: which chains
//! exist, what they are able to do, how a request header is resolved, and how
//! failures are reported. It performs no I/O. Ledger-specific builders live in
//! `xrelay-evm` and `xrelay-tvm`.
//!
//! # Overview
//!
//! A relay request names an origin chain and a destination chain. The origin
//! side locks funds in an escrow, the destination side executes through an
//! account-abstraction entrypoint (EVM) or a proxy wallet (TVM). Before any
//! builder runs, both chain identifiers are normalized through the
//! [`chain::ChainRegistry`] and checked against the chain's capability matrix.
//!
//! # Modules
//!
//! - [`chain`] - Chain identifiers, VM kinds, contract bundles and the registry
//! - [`networks`] - Built-in table of known chains and their deployments
//! - [`header`] - Request header parsing and resolution
//! - [`error`] - Error taxonomy and the wire error envelope
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod chain;
pub mod error;
pub mod header;
pub mod networks;

pub use chain::{ChainDescriptor, ChainId, ChainRegistry, MessageKind, TxType, VmKind};
pub use error::{ErrorCode, ErrorEnvelope, RelayError};
pub use header::{HeaderResponse, MessageHeader, ResolvedHeader};
