//! Cross-VM signature validation.
//!
//! An EVM key authorises a TVM message by signing the hash of its execution
//! cell as an EIP-191 personal message. The wallet contract checks the same
//! digest on chain; this module performs the check before the relay pays
//! for a transaction.

use alloy_primitives::{Address, B256, Signature, U256, eip191_hash_message};
use serde::{Deserialize, Serialize};
use xrelay::RelayError;

use crate::cell::Cell;

/// How strictly the recovery id is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureMode {
    /// `v` must be 0, 1, 27 or 28 and is used as given.
    #[default]
    Strict,
    /// `v` is ignored and both parities are tried.
    ///
    /// Accepts signatures from clients that drop the recovery id.
    IgnoreRecoveryId,
}

/// Why a signature was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// Not 65 bytes.
    #[error("signature must be 65 bytes, got {0}")]
    InvalidLength(usize),
    /// `v` is not a recognised recovery id.
    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),
    /// No public key could be recovered.
    #[error("signature recovery failed: {0}")]
    Recovery(String),
    /// A key was recovered but it is not the claimed signer.
    #[error("signature was produced by {recovered}, expected {expected}")]
    SignerMismatch {
        /// Claimed signer.
        expected: Address,
        /// Address actually recovered.
        recovered: Address,
    },
}

impl From<SignatureError> for RelayError {
    fn from(err: SignatureError) -> Self {
        Self::malformed(err.to_string())
    }
}

/// The digest the EVM owner signs for a cell with hash `cell_hash`.
#[must_use]
pub fn cross_vm_digest(cell_hash: B256) -> B256 {
    eip191_hash_message(cell_hash)
}

fn parity(v: u8) -> Result<bool, SignatureError> {
    match v {
        0 | 27 => Ok(false),
        1 | 28 => Ok(true),
        other => Err(SignatureError::InvalidRecoveryId(other)),
    }
}

fn recover(r: U256, s: U256, parity: bool, digest: &B256) -> Result<Address, SignatureError> {
    Signature::new(r, s, parity)
        .recover_address_from_prehash(digest)
        .map_err(|e| SignatureError::Recovery(e.to_string()))
}

/// Checks that `signature` over `cell_hash` was produced by `claimed`.
///
/// # Errors
///
/// Returns the [`SignatureError`] describing the first failed check.
pub fn verify_cell_hash(
    cell_hash: B256,
    signature: &[u8],
    claimed: Address,
    mode: SignatureMode,
) -> Result<(), SignatureError> {
    if signature.len() != 65 {
        return Err(SignatureError::InvalidLength(signature.len()));
    }
    let r = U256::from_be_slice(&signature[..32]);
    let s = U256::from_be_slice(&signature[32..64]);
    let digest = cross_vm_digest(cell_hash);

    let recovered = match mode {
        SignatureMode::Strict => recover(r, s, parity(signature[64])?, &digest)?,
        SignatureMode::IgnoreRecoveryId => {
            let mut last = Err(SignatureError::Recovery("no parity recovered".into()));
            for candidate in [false, true] {
                last = recover(r, s, candidate, &digest);
                if matches!(last, Ok(address) if address == claimed) {
                    break;
                }
            }
            last?
        }
    };

    if recovered == claimed {
        Ok(())
    } else {
        Err(SignatureError::SignerMismatch {
            expected: claimed,
            recovered,
        })
    }
}

/// [`verify_cell_hash`] for a cell.
///
/// # Errors
///
/// See [`verify_cell_hash`].
pub fn verify(
    cell: &Cell,
    signature: &[u8],
    claimed: Address,
    mode: SignatureMode,
) -> Result<(), SignatureError> {
    verify_cell_hash(cell.hash(), signature, claimed, mode)
}

#[cfg(test)]
mod tests {
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    use super::*;
    use crate::cell::CellBuilder;

    fn cell(tag: u128) -> Cell {
        let mut b = CellBuilder::new();
        b.store_uint(tag, 32).unwrap();
        b.build().unwrap()
    }

    fn sign(signer: &PrivateKeySigner, cell: &Cell) -> Vec<u8> {
        signer
            .sign_message_sync(cell.hash().as_slice())
            .unwrap()
            .as_bytes()
            .to_vec()
    }

    #[test]
    fn test_digest_is_personal_message_of_hash() {
        let hash = B256::repeat_byte(7);
        let mut prefixed = b"\x19Ethereum Signed Message:\n32".to_vec();
        prefixed.extend_from_slice(hash.as_slice());
        assert_eq!(
            cross_vm_digest(hash),
            alloy_primitives::keccak256(prefixed)
        );
    }

    #[test]
    fn test_valid_signature() {
        let signer = PrivateKeySigner::random();
        let cell = cell(1);
        let sig = sign(&signer, &cell);
        verify(&cell, &sig, signer.address(), SignatureMode::Strict).unwrap();

        // 0/1 form of v is accepted too
        let mut low_v = sig.clone();
        low_v[64] -= 27;
        verify(&cell, &low_v, signer.address(), SignatureMode::Strict).unwrap();
    }

    #[test]
    fn test_wrong_key() {
        let signer = PrivateKeySigner::random();
        let other = PrivateKeySigner::random();
        let cell = cell(1);
        let sig = sign(&other, &cell);
        assert!(matches!(
            verify(&cell, &sig, signer.address(), SignatureMode::Strict),
            Err(SignatureError::SignerMismatch { recovered, .. }) if recovered == other.address()
        ));
    }

    #[test]
    fn test_modified_cell() {
        let signer = PrivateKeySigner::random();
        let sig = sign(&signer, &cell(1));
        assert!(verify(&cell(3), &sig, signer.address(), SignatureMode::Strict).is_err());
    }

    #[test]
    fn test_truncated_and_bad_v() {
        let signer = PrivateKeySigner::random();
        let cell = cell(1);
        let sig = sign(&signer, &cell);
        assert_eq!(
            verify(&cell, &sig[..64], signer.address(), SignatureMode::Strict),
            Err(SignatureError::InvalidLength(64))
        );
        let mut bad = sig;
        bad[64] = 5;
        assert_eq!(
            verify(&cell, &bad, signer.address(), SignatureMode::Strict),
            Err(SignatureError::InvalidRecoveryId(5))
        );
    }

    #[test]
    fn test_ignore_recovery_id_mode() {
        let signer = PrivateKeySigner::random();
        let cell = cell(9);
        let mut sig = sign(&signer, &cell);
        // drop the recovery id entirely
        sig[64] = 0xff;
        assert!(verify(&cell, &sig, signer.address(), SignatureMode::Strict).is_err());
        verify(
            &cell,
            &sig,
            signer.address(),
            SignatureMode::IgnoreRecoveryId,
        )
        .unwrap();

        let other = PrivateKeySigner::random();
        assert!(
            verify(
                &cell,
                &sig,
                other.address(),
                SignatureMode::IgnoreRecoveryId
            )
            .is_err()
        );
    }

    #[test]
    fn test_mode_serde() {
        assert_eq!(
            serde_json::to_string(&SignatureMode::IgnoreRecoveryId).unwrap(),
            "\"ignore-recovery-id\""
        );
        assert_eq!(SignatureMode::default(), SignatureMode::Strict);
    }
}
