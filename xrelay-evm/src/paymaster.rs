//! Paymaster authorization bytes.
//!
//! The destination paymaster sponsors a user operation against funds locked in
//! the user's origin escrow. Its authorization travels in `paymasterAndData`
//! with a fixed 129-byte layout:
//!
//! | Field | Bytes |
//! |---|---|
//! | paymaster | 20 |
//! | verification gas limit | 16 |
//! | post-op gas limit | 16 |
//! | signer | 20 |
//! | destination domain | 4 |
//! | message type | 1 |
//! | asset | 20 |
//! | amount | 32 |
//!
//! Validation is byte equality against a rebuild from the expected fields.

use alloy_primitives::{Address, Bytes, U256};
use serde::Serialize;
use serde_with::{DisplayFromStr, serde_as};
use xrelay::RelayError;

/// Encoded length of [`PaymasterFields`].
pub const PAYMASTER_AND_DATA_LEN: usize = 129;

/// Paymaster verification gas limit.
pub const PAYMASTER_VERIFICATION_GAS: u128 = 10_000_000;

/// Paymaster post-op gas limit.
pub const PAYMASTER_POST_OP_GAS: u128 = 10_000_000;

/// Decoded paymaster authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymasterFields {
    /// Paymaster contract on the destination chain.
    pub paymaster: Address,
    /// Gas for paymaster validation.
    pub verification_gas_limit: u128,
    /// Gas for the post-op hook.
    pub post_op_gas_limit: u128,
    /// Owner of the escrow backing the operation.
    pub signer: Address,
    /// Domain the settlement message is sent to: the origin chain that holds
    /// the escrow.
    pub destination_domain: u32,
    /// Message type (the request's tx-type).
    pub message_type: u8,
    /// Asset drawn from the escrow.
    pub asset: Address,
    /// Amount drawn from the escrow.
    pub amount: U256,
}

impl PaymasterFields {
    /// Fields with the default paymaster gas limits.
    #[must_use]
    pub const fn new(
        paymaster: Address,
        signer: Address,
        destination_domain: u32,
        message_type: u8,
        asset: Address,
        amount: U256,
    ) -> Self {
        Self {
            paymaster,
            verification_gas_limit: PAYMASTER_VERIFICATION_GAS,
            post_op_gas_limit: PAYMASTER_POST_OP_GAS,
            signer,
            destination_domain,
            message_type,
            asset,
            amount,
        }
    }

    /// Concatenates the fields in wire order.
    #[must_use]
    pub fn build(&self) -> Bytes {
        let mut out = Vec::with_capacity(PAYMASTER_AND_DATA_LEN);
        out.extend_from_slice(self.paymaster.as_slice());
        out.extend_from_slice(&self.verification_gas_limit.to_be_bytes());
        out.extend_from_slice(&self.post_op_gas_limit.to_be_bytes());
        out.extend_from_slice(self.signer.as_slice());
        out.extend_from_slice(&self.destination_domain.to_be_bytes());
        out.push(self.message_type);
        out.extend_from_slice(self.asset.as_slice());
        out.extend_from_slice(&self.amount.to_be_bytes::<32>());
        Bytes::from(out)
    }

    /// Splits a 129-byte authorization into its fields.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedRequest`] if `data` is not exactly
    /// [`PAYMASTER_AND_DATA_LEN`] bytes.
    pub fn parse(data: &[u8]) -> Result<Self, RelayError> {
        let data: &[u8; PAYMASTER_AND_DATA_LEN] = data.try_into().map_err(|_| {
            RelayError::malformed(format!(
                "paymasterAndData must be {PAYMASTER_AND_DATA_LEN} bytes, got {}",
                data.len()
            ))
        })?;
        let mut cursor = Cursor(data);
        Ok(Self {
            paymaster: Address::from_slice(cursor.take(20)),
            verification_gas_limit: u128::from_be_bytes(cursor.array()),
            post_op_gas_limit: u128::from_be_bytes(cursor.array()),
            signer: Address::from_slice(cursor.take(20)),
            destination_domain: u32::from_be_bytes(cursor.array()),
            message_type: cursor.take(1)[0],
            asset: Address::from_slice(cursor.take(20)),
            amount: U256::from_be_slice(cursor.take(32)),
        })
    }
}

struct Cursor<'a>(&'a [u8]);

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> &'a [u8] {
        let (head, tail) = self.0.split_at(n);
        self.0 = tail;
        head
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N));
        out
    }
}

/// Checks a signed operation's `paymasterAndData` against the relay's own
/// rebuild.
///
/// # Errors
///
/// Returns [`RelayError::PaymasterMismatch`] unless `candidate` equals
/// `expected.build()` byte for byte.
pub fn validate(candidate: &[u8], expected: &PaymasterFields) -> Result<(), RelayError> {
    let canonical = expected.build();
    if candidate == canonical.as_ref() {
        Ok(())
    } else {
        #[cfg(feature = "telemetry")]
        tracing::warn!(
            candidate = %alloy_primitives::hex::encode_prefixed(candidate),
            "paymasterAndData mismatch"
        );
        Err(RelayError::PaymasterMismatch(format!(
            "expected {canonical}, got {}",
            alloy_primitives::hex::encode_prefixed(candidate)
        )))
    }
}

/// Wire form of a paymaster authorization.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymasterJson {
    /// Paymaster contract.
    #[serde(rename = "pad-paymaster")]
    pub paymaster: Address,
    /// Verification gas limit, decimal.
    #[serde(rename = "pad-verification-gas")]
    #[serde_as(as = "DisplayFromStr")]
    pub verification_gas_limit: u128,
    /// Post-op gas limit, decimal.
    #[serde(rename = "pad-post-op-gas")]
    #[serde_as(as = "DisplayFromStr")]
    pub post_op_gas_limit: u128,
    /// Escrow owner.
    #[serde(rename = "pad-signer")]
    pub signer: Address,
    /// Settlement domain.
    #[serde(rename = "pad-domain")]
    pub destination_domain: u32,
    /// Message type.
    #[serde(rename = "pad-message-type")]
    pub message_type: u8,
    /// Asset.
    #[serde(rename = "pad-asset")]
    pub asset: Address,
    /// Amount, decimal.
    #[serde(rename = "pad-amount")]
    #[serde_as(as = "DisplayFromStr")]
    pub amount: U256,
    /// The encoded 129 bytes.
    #[serde(rename = "pad-data")]
    pub data: Bytes,
}

impl From<&PaymasterFields> for PaymasterJson {
    fn from(fields: &PaymasterFields) -> Self {
        Self {
            paymaster: fields.paymaster,
            verification_gas_limit: fields.verification_gas_limit,
            post_op_gas_limit: fields.post_op_gas_limit,
            signer: fields.signer,
            destination_domain: fields.destination_domain,
            message_type: fields.message_type,
            asset: fields.asset,
            amount: fields.amount,
            data: fields.build(),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;

    use super::*;

    fn fields() -> PaymasterFields {
        PaymasterFields::new(
            address!("dAE5e7CEBe4872BF0776477EcCCD2A0eFdF54f0e"),
            address!("19E7E376E7C213B7E7e7e46cc70A5dD086DAff2A"),
            11_155_111,
            1,
            Address::ZERO,
            U256::from(1_000_000_000_000_000u64),
        )
    }

    #[test]
    fn test_layout() {
        let f = fields();
        let data = f.build();
        assert_eq!(data.len(), PAYMASTER_AND_DATA_LEN);
        assert_eq!(&data[..20], f.paymaster.as_slice());
        assert_eq!(&data[20..36], &PAYMASTER_VERIFICATION_GAS.to_be_bytes());
        assert_eq!(&data[36..52], &PAYMASTER_POST_OP_GAS.to_be_bytes());
        assert_eq!(&data[52..72], f.signer.as_slice());
        assert_eq!(&data[72..76], &11_155_111u32.to_be_bytes());
        assert_eq!(data[76], 1);
        assert_eq!(&data[77..97], Address::ZERO.as_slice());
        assert_eq!(&data[97..], &f.amount.to_be_bytes::<32>());
    }

    #[test]
    fn test_validate_own_build() {
        let f = fields();
        validate(&f.build(), &f).unwrap();
    }

    #[test]
    fn test_validate_rejects_any_flipped_byte() {
        let f = fields();
        let data = f.build();
        for i in 0..data.len() {
            let mut mutated = data.to_vec();
            mutated[i] ^= 0x01;
            assert!(matches!(
                validate(&mutated, &f),
                Err(RelayError::PaymasterMismatch(_))
            ));
        }
    }

    #[test]
    fn test_validate_rejects_truncation_and_extension() {
        let f = fields();
        let data = f.build();
        assert!(validate(&data[..128], &f).is_err());
        let mut longer = data.to_vec();
        longer.push(0);
        assert!(validate(&longer, &f).is_err());
        assert!(validate(&[], &f).is_err());
    }

    #[test]
    fn test_parse_inverts_build() {
        let f = fields();
        assert_eq!(PaymasterFields::parse(&f.build()).unwrap(), f);
        assert!(matches!(
            PaymasterFields::parse(&[0u8; 100]),
            Err(RelayError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_json_keys() {
        let json = serde_json::to_value(PaymasterJson::from(&fields())).unwrap();
        assert_eq!(json["pad-verification-gas"], "10000000");
        assert_eq!(json["pad-domain"], 11_155_111);
        assert_eq!(json["pad-amount"], "1000000000000000");
        assert!(json["pad-data"].as_str().unwrap().starts_with("0xdae5e7ce"));
    }
}
