//! HTTP relay server for the xrelay cross-chain escrow bridge.
//!
//! Builds unsigned origin/destination artifacts for clients to sign and
//! validates signed artifacts before they are relayed onward.
//!
//! # Modules
//!
//! - [`config`] - TOML configuration with environment variable expansion
//! - [`error`] - Stage-tagged errors rendered as the JSON error envelope
//! - [`handlers`] - Axum route handlers and router builder
//! - [`orchestrator`] - Two-sided request pipeline and signed-artifact checks
//! - [`params`] - Query parameter types and parsers
//! - [`util`] - Graceful shutdown
//!
//! # Feature Flags
//!
//! - `telemetry` - Tracing spans inside the library crates (default)

pub mod config;
pub mod error;
pub mod handlers;
pub mod orchestrator;
pub mod params;
pub mod util;

pub use handlers::{RelayState, relay_router};
pub use orchestrator::{EvmChain, Relay, RelaySettings};
