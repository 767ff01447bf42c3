//! Error taxonomy shared by every relay component.
//!
//! Each [`RelayError`] maps to a stable numeric [`ErrorCode`] and is reported
//! to clients as an [`ErrorEnvelope`]. Crate-specific errors (ABI decoding,
//! cell building, RPC transport) convert into this type at crate boundaries.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable numeric codes carried in the error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Chain is unknown or disabled.
    UnsupportedChain = 0,
    /// Paymaster-and-data does not match its canonical re-derivation.
    PaymasterMismatch = 7,
    /// Missing or invalid input.
    MalformedRequest = 400,
    /// Protocol-layer failure inside the relay.
    Internal = 500,
    /// Transport failure talking to a ledger node.
    RpcFailure = 501,
    /// No escrow contract is deployed at the derived address.
    EscrowNotFound = 1000,
    /// Escrow balance is below the requested amount.
    InsufficientEscrowBalance = 1001,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Returns the fixed human-readable message for this code.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::UnsupportedChain => "Unsupported chain",
            Self::PaymasterMismatch => "PaymasterAndData mismatch",
            Self::MalformedRequest => "Malformed request",
            Self::Internal => "Internal server error",
            Self::RpcFailure => "Internal server error: RPC connection failed",
            Self::EscrowNotFound => "Escrow address not exist",
            Self::InsufficientEscrowBalance => "Insufficient escrow balance",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Errors surfaced by relay operations.
///
/// Every variant carries free-form details for diagnostics; the numeric code
/// and headline message are fixed per variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Missing or invalid input, or a tx-type the chain does not allow.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
    /// The chain id is unknown or disabled.
    #[error("{0}")]
    UnsupportedChain(String),
    /// Signed paymaster bytes differ from the canonical encoding.
    #[error("PaymasterAndData mismatch: {0}")]
    PaymasterMismatch(String),
    /// No escrow is deployed for the signer.
    #[error("Escrow address not exist: {0}")]
    EscrowNotFound(String),
    /// The escrow holds less than the requested amount.
    #[error("Insufficient escrow balance: {0}")]
    InsufficientEscrowBalance(String),
    /// Ledger returned bytes that could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// A batch returned a different number of results than calls issued.
    #[error("batch count mismatch: expected {expected}, got {actual}")]
    BatchCountMismatch {
        /// Number of calls sent.
        expected: usize,
        /// Number of results decoded.
        actual: usize,
    },
    /// Transport-level failure reaching a ledger node.
    #[error("RPC connection failed: {0}")]
    Rpc(String),
    /// Any other internal failure.
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Creates a [`RelayError::MalformedRequest`].
    #[must_use]
    pub fn malformed(details: impl Into<String>) -> Self {
        Self::MalformedRequest(details.into())
    }

    /// Creates a [`RelayError::Internal`].
    #[must_use]
    pub fn internal(details: impl Into<String>) -> Self {
        Self::Internal(details.into())
    }

    /// Creates a [`RelayError::Rpc`].
    #[must_use]
    pub fn rpc(details: impl Into<String>) -> Self {
        Self::Rpc(details.into())
    }

    /// Creates a [`RelayError::Decode`].
    #[must_use]
    pub fn decode(details: impl Into<String>) -> Self {
        Self::Decode(details.into())
    }

    /// Returns the stable numeric code for this error.
    ///
    /// Decode and batch-count failures are protocol bugs and report as
    /// [`ErrorCode::Internal`].
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MalformedRequest(_) => ErrorCode::MalformedRequest,
            Self::UnsupportedChain(_) => ErrorCode::UnsupportedChain,
            Self::PaymasterMismatch(_) => ErrorCode::PaymasterMismatch,
            Self::EscrowNotFound(_) => ErrorCode::EscrowNotFound,
            Self::InsufficientEscrowBalance(_) => ErrorCode::InsufficientEscrowBalance,
            Self::Decode(_) | Self::BatchCountMismatch { .. } | Self::Internal(_) => {
                ErrorCode::Internal
            }
            Self::Rpc(_) => ErrorCode::RpcFailure,
        }
    }

    /// Returns the diagnostic details without the headline message.
    #[must_use]
    pub fn details(&self) -> String {
        match self {
            Self::MalformedRequest(d)
            | Self::UnsupportedChain(d)
            | Self::PaymasterMismatch(d)
            | Self::EscrowNotFound(d)
            | Self::InsufficientEscrowBalance(d)
            | Self::Rpc(d)
            | Self::Internal(d) => d.clone(),
            Self::Decode(d) => format!("decode error: {d}"),
            Self::BatchCountMismatch { .. } => self.to_string(),
        }
    }

    /// Returns `true` for errors caused by the request rather than the relay.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedRequest(_)
                | Self::UnsupportedChain(_)
                | Self::PaymasterMismatch(_)
                | Self::EscrowNotFound(_)
                | Self::InsufficientEscrowBalance(_)
        )
    }

    /// Builds the wire envelope for this error.
    ///
    /// `origin` names the stage that failed (for example `"origin"` or
    /// `"destination"`), if known.
    #[must_use]
    pub fn envelope(&self, origin: Option<&str>) -> ErrorEnvelope {
        let code = self.code();
        ErrorEnvelope {
            code: code.as_u32(),
            message: code.message().to_owned(),
            details: self.details(),
            origin: origin.map(str::to_owned),
        }
    }
}

/// Structured error body returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Stable numeric code.
    pub code: u32,
    /// Fixed headline for the code.
    pub message: String,
    /// Free-form diagnostics.
    pub details: String,
    /// Stage that produced the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}
