//! Relay signing context.
//!
//! The relay key is loaded once at startup and handed to every component that
//! submits relay-originated transactions. It is never read from ambient state.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;

/// Error returned when the relay key cannot be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid relay private key: {0}")]
pub struct InvalidRelayKey(#[from] alloy_signer_local::LocalSignerError);

/// The relay's own key and derived address.
#[derive(Clone)]
pub struct RelaySigner {
    signer: PrivateKeySigner,
}

impl RelaySigner {
    /// Wraps an existing signer.
    #[must_use]
    pub const fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    /// Returns the relay address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Returns the underlying signer.
    #[must_use]
    pub const fn inner(&self) -> &PrivateKeySigner {
        &self.signer
    }
}

impl FromStr for RelaySigner {
    type Err = InvalidRelayKey;

    /// Parses a hex private key, with or without `0x`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s.trim().parse::<PrivateKeySigner>()?))
    }
}

impl fmt::Debug for RelaySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySigner")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
