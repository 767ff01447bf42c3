#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! TVM side of the xrelay cross-chain escrow relay.
//!
//! Builds the messages that let an EVM key act on a TVM chain through a
//! per-owner proxy wallet, and validates the owner's signature before the
//! relay pays to forward them.
//!
//! # Overview
//!
//! TVM state and messages are trees of cells. A proxy wallet's address is the
//! hash of its initial state (wallet code plus a data cell naming both
//! owners), so it is known before deployment. The owner signs the hash of an
//! execution cell with their EVM key; the relay wraps the signed message for
//! the entrypoint contract, attaching the `StateInit` when the wallet does
//! not exist yet.
//!
//! # Modules
//!
//! - [`cell`] - Cells, the cell builder and the representation hash
//! - [`boc`] - Bag-of-cells parsing and serialization
//! - [`address`] - Raw and user-friendly account addresses
//! - [`proxy_wallet`] - Execution, signature and proxy message cells, address derivation
//! - [`signature`] - Cross-VM signature validation
//! - [`message`] - Unsigned and signed destination-side messages
//! - [`view`] - TON API get-method client
//!
//! # Feature Flags
//!
//! - `telemetry` - `tracing` spans on network calls and message builders
//! - `full` - All of the above

pub mod address;
pub mod boc;
pub mod cell;
pub mod message;
pub mod proxy_wallet;
pub mod signature;
pub mod view;

pub use address::{FriendlyFlags, TvmAddress};
pub use cell::{Cell, CellBuilder, CellError};
pub use proxy_wallet::{ExecutionData, ProxyWalletRecord, ProxyWalletRequest};
pub use signature::{SignatureError, SignatureMode};
pub use view::{ProxyWalletState, TonApiClient, TvmView};
