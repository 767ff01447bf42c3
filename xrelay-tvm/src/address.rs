//! TVM account addresses.
//!
//! Two textual forms are accepted:
//! - raw: `<workchain>:<64 hex chars>`
//! - user-friendly: 48 base64 (standard or url-safe) characters encoding
//!   `flags ‖ workchain ‖ hash ‖ crc16`, where flags is `0x11` (bounceable)
//!   or `0x51` (non-bounceable), plus `0x80` for testnet-only addresses
//!
//! The checksum is CRC16-XMODEM over the first 34 bytes.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{B256, hex};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const BOUNCEABLE: u8 = 0x11;
const NON_BOUNCEABLE: u8 = 0x51;
const TESTNET: u8 = 0x80;

/// Errors raised when parsing an address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// Neither raw nor user-friendly form.
    #[error("invalid TVM address format: {0}")]
    Format(String),
    /// The user-friendly checksum does not match.
    #[error("invalid TVM address checksum: {0}")]
    Checksum(String),
    /// Unknown flag byte.
    #[error("invalid TVM address flags {0:#04x}")]
    Flags(u8),
}

/// A standard (non-anycast) TVM address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TvmAddress {
    /// Workchain id; 0 for basechain, -1 for masterchain.
    pub workchain: i8,
    /// Account id: the hash of the account's initial state.
    pub hash: B256,
}

/// Rendering options for the user-friendly form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FriendlyFlags {
    /// Messages to this address bounce on failure.
    pub bounceable: bool,
    /// Only valid on testnet.
    pub testnet: bool,
}

impl FriendlyFlags {
    const fn byte(self) -> u8 {
        let base = if self.bounceable {
            BOUNCEABLE
        } else {
            NON_BOUNCEABLE
        };
        if self.testnet { base | TESTNET } else { base }
    }

    const fn from_byte(byte: u8) -> Result<Self, AddressError> {
        let testnet = byte & TESTNET != 0;
        match byte & !TESTNET {
            BOUNCEABLE => Ok(Self {
                bounceable: true,
                testnet,
            }),
            NON_BOUNCEABLE => Ok(Self {
                bounceable: false,
                testnet,
            }),
            _ => Err(AddressError::Flags(byte)),
        }
    }
}

/// CRC16-XMODEM (poly `0x1021`, init 0).
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= u16::from(*byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

impl TvmAddress {
    /// Creates an address.
    #[must_use]
    pub const fn new(workchain: i8, hash: B256) -> Self {
        Self { workchain, hash }
    }

    /// `<workchain>:<hex>`.
    #[must_use]
    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash))
    }

    /// The 48-character url-safe user-friendly form.
    #[must_use]
    pub fn to_friendly(&self, flags: FriendlyFlags) -> String {
        let mut raw = [0u8; 36];
        raw[0] = flags.byte();
        raw[1] = self.workchain.to_be_bytes()[0];
        raw[2..34].copy_from_slice(self.hash.as_slice());
        let crc = crc16(&raw[..34]);
        raw[34..].copy_from_slice(&crc.to_be_bytes());
        URL_SAFE.encode(raw)
    }

    /// Parses either form, returning the flags of a user-friendly address.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] on malformed input or a bad checksum.
    pub fn parse_with_flags(s: &str) -> Result<(Self, Option<FriendlyFlags>), AddressError> {
        let s = s.trim();
        if let Some((wc, hash)) = s.split_once(':') {
            let workchain = wc
                .parse::<i8>()
                .map_err(|_| AddressError::Format(s.to_owned()))?;
            let bytes = hex::decode(hash).map_err(|_| AddressError::Format(s.to_owned()))?;
            if bytes.len() != 32 {
                return Err(AddressError::Format(s.to_owned()));
            }
            return Ok((Self::new(workchain, B256::from_slice(&bytes)), None));
        }
        if s.len() != 48 {
            return Err(AddressError::Format(s.to_owned()));
        }
        let raw = URL_SAFE
            .decode(s)
            .or_else(|_| STANDARD.decode(s))
            .map_err(|_| AddressError::Format(s.to_owned()))?;
        if raw.len() != 36 {
            return Err(AddressError::Format(s.to_owned()));
        }
        if crc16(&raw[..34]).to_be_bytes() != raw[34..] {
            return Err(AddressError::Checksum(s.to_owned()));
        }
        let flags = FriendlyFlags::from_byte(raw[0])?;
        let workchain = i8::from_be_bytes([raw[1]]);
        Ok((
            Self::new(workchain, B256::from_slice(&raw[2..34])),
            Some(flags),
        ))
    }
}

impl FromStr for TvmAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with_flags(s).map(|(address, _)| address)
    }
}

impl fmt::Display for TvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_raw())
    }
}

impl Serialize for TvmAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_raw())
    }
}

impl<'de> Deserialize<'de> for TvmAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::b256;

    use super::*;

    const ENTRYPOINT_HASH: B256 =
        b256!("0624ae743d6fdad596d058ad3295d7a0bb9e85957d275ca4086bbc73a160b342");

    #[test]
    fn test_parse_friendly_forms_share_hash() {
        let (main, flags) =
            TvmAddress::parse_with_flags("EQAGJK50PW_a1ZbQWK0yldegu56FlX0nXKQIa7xzoWCzQp78").unwrap();
        assert_eq!(main, TvmAddress::new(0, ENTRYPOINT_HASH));
        assert_eq!(
            flags,
            Some(FriendlyFlags {
                bounceable: true,
                testnet: false
            })
        );
        let (test, flags) =
            TvmAddress::parse_with_flags("kQAGJK50PW_a1ZbQWK0yldegu56FlX0nXKQIa7xzoWCzQiV2").unwrap();
        assert_eq!(test, main);
        assert!(flags.unwrap().testnet);
    }

    #[test]
    fn test_friendly_round_trip() {
        let address = TvmAddress::new(0, ENTRYPOINT_HASH);
        let flags = FriendlyFlags {
            bounceable: true,
            testnet: false,
        };
        assert_eq!(
            address.to_friendly(flags),
            "EQAGJK50PW_a1ZbQWK0yldegu56FlX0nXKQIa7xzoWCzQp78"
        );
    }

    #[test]
    fn test_raw_form() {
        let address = TvmAddress::new(-1, ENTRYPOINT_HASH);
        let raw = address.to_raw();
        assert!(raw.starts_with("-1:0624ae74"));
        assert_eq!(raw.parse::<TvmAddress>().unwrap(), address);
    }

    #[test]
    fn test_rejects_bad_checksum_and_format() {
        assert!(matches!(
            "EQAGJK50PW_a1ZbQWK0yldegu56FlX0nXKQIa7xzoWCzQp79".parse::<TvmAddress>(),
            Err(AddressError::Checksum(_))
        ));
        assert!("0:1234".parse::<TvmAddress>().is_err());
        assert!("not an address".parse::<TvmAddress>().is_err());
    }

    #[test]
    fn test_serde_uses_raw() {
        let address = TvmAddress::new(0, ENTRYPOINT_HASH);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"0:{}\"", hex::encode(ENTRYPOINT_HASH)));
        let back: TvmAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }
}
