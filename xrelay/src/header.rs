//! Request header parsing and resolution.
//!
//! A [`MessageHeader`] is what a client sends: raw chain identifiers (hex or
//! decimal), signer addresses and a tx-type. [`MessageHeader::resolve`] turns
//! it into a [`ResolvedHeader`] holding both chain descriptors, after which
//! no further chain-id parsing happens for the request.

use serde::{Deserialize, Serialize};
#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::chain::{ChainDescriptor, ChainRegistry, MessageKind, TxType, VmKind};
use crate::error::RelayError;

/// Raw two-sided header as received from a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Transaction type tag.
    #[serde(rename = "txtype")]
    pub tx_type: String,
    /// Optional origin chain name, informational only.
    #[serde(rename = "fname", default, skip_serializing_if = "Option::is_none")]
    pub from_chain_name: Option<String>,
    /// Optional origin VM kind, informational only.
    #[serde(rename = "ftype", default, skip_serializing_if = "Option::is_none")]
    pub from_chain_type: Option<String>,
    /// Origin chain id, hex or decimal.
    #[serde(rename = "fid")]
    pub from_chain_id: String,
    /// Signer on the origin chain.
    #[serde(rename = "fsigner")]
    pub from_chain_signer: String,
    /// Optional destination chain name, informational only.
    #[serde(rename = "tname", default, skip_serializing_if = "Option::is_none")]
    pub to_chain_name: Option<String>,
    /// Optional destination VM kind, informational only.
    #[serde(rename = "ttype", default, skip_serializing_if = "Option::is_none")]
    pub to_chain_type: Option<String>,
    /// Destination chain id, hex or decimal.
    #[serde(rename = "tid")]
    pub to_chain_id: String,
    /// Signer on the destination chain.
    #[serde(rename = "tsigner")]
    pub to_chain_signer: String,
    /// Whether testnet address forms are expected. Defaults to `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub testnet: Option<String>,
    /// Opaque client data, echoed but not interpreted.
    #[serde(rename = "extra-data", default, skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<String>,
}

impl MessageHeader {
    /// Resolves both chains and checks their capability matrices.
    ///
    /// The origin side is always checked as an escrow. The destination side
    /// is checked as a user operation on EVM chains and as a proxy-wallet
    /// message on TVM chains.
    ///
    /// # Errors
    ///
    /// - [`RelayError::MalformedRequest`] for an invalid tx-type, an empty
    ///   signer, or a disallowed tx-type
    /// - [`RelayError::UnsupportedChain`] if either chain is unknown or disabled
    #[cfg_attr(feature = "telemetry", instrument(name = "xrelay.header.resolve", skip_all, err, fields(fid = %self.from_chain_id, tid = %self.to_chain_id)))]
    pub fn resolve(&self, registry: &ChainRegistry) -> Result<ResolvedHeader, RelayError> {
        let tx_type: TxType = self.tx_type.parse()?;
        let origin = *registry.resolve(&self.from_chain_id)?;
        let destination = *registry.resolve(&self.to_chain_id)?;
        if self.from_chain_signer.trim().is_empty() {
            return Err(RelayError::malformed("missing fsigner"));
        }
        if self.to_chain_signer.trim().is_empty() {
            return Err(RelayError::malformed("missing tsigner"));
        }
        let testnet = match self.testnet.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(raw) => raw
                .parse::<bool>()
                .map_err(|_| RelayError::malformed(format!("invalid testnet flag {raw}")))?,
        };

        let resolved = ResolvedHeader {
            tx_type,
            origin,
            destination,
            origin_signer: self.from_chain_signer.trim().to_owned(),
            destination_signer: self.to_chain_signer.trim().to_owned(),
            testnet,
        };
        origin.check_capability(tx_type, resolved.origin_kind())?;
        destination.check_capability(tx_type, resolved.destination_kind()?)?;
        Ok(resolved)
    }
}

/// Header with both chains resolved to their descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHeader {
    /// Requested transaction type.
    pub tx_type: TxType,
    /// Origin chain.
    pub origin: ChainDescriptor,
    /// Destination chain.
    pub destination: ChainDescriptor,
    /// Signer on the origin chain, as sent by the client.
    pub origin_signer: String,
    /// Signer on the destination chain, as sent by the client.
    pub destination_signer: String,
    /// Whether testnet address forms are in use.
    pub testnet: bool,
}

impl ResolvedHeader {
    /// Message kind produced on the origin side.
    #[must_use]
    pub const fn origin_kind(&self) -> MessageKind {
        MessageKind::Escrow
    }

    /// Message kind produced on the destination side.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedRequest`] for VM kinds with no
    /// destination builder.
    pub fn destination_kind(&self) -> Result<MessageKind, RelayError> {
        match self.destination.vm {
            VmKind::Evm => Ok(MessageKind::UserOperation),
            VmKind::Tvm => Ok(MessageKind::LedgerB),
            VmKind::Svm => Err(RelayError::malformed(format!(
                "no destination builder for {} chain {}",
                self.destination.vm, self.destination.id
            ))),
        }
    }

    /// Returns the header echoed back to clients, with canonical ids.
    #[must_use]
    pub fn to_response(&self) -> HeaderResponse {
        HeaderResponse {
            tx_type: self.tx_type.to_string(),
            from_chain_name: self.origin.name.to_owned(),
            from_chain_type: self.origin.vm.to_string(),
            from_chain_id: self.origin.id.to_string(),
            from_chain_signer: self.origin_signer.clone(),
            to_chain_name: self.destination.name.to_owned(),
            to_chain_type: self.destination.vm.to_string(),
            to_chain_id: self.destination.id.to_string(),
            to_chain_signer: self.destination_signer.clone(),
        }
    }
}

/// Header echoed in every unsigned-data response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderResponse {
    /// Transaction type tag.
    #[serde(rename = "txtype")]
    pub tx_type: String,
    /// Origin chain name.
    #[serde(rename = "fname")]
    pub from_chain_name: String,
    /// Origin VM kind.
    #[serde(rename = "ftype")]
    pub from_chain_type: String,
    /// Canonical origin chain id.
    #[serde(rename = "fid")]
    pub from_chain_id: String,
    /// Origin signer.
    #[serde(rename = "fsigner")]
    pub from_chain_signer: String,
    /// Destination chain name.
    #[serde(rename = "tname")]
    pub to_chain_name: String,
    /// Destination VM kind.
    #[serde(rename = "ttype")]
    pub to_chain_type: String,
    /// Canonical destination chain id.
    #[serde(rename = "tid")]
    pub to_chain_id: String,
    /// Destination signer.
    #[serde(rename = "tsigner")]
    pub to_chain_signer: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networks::KNOWN_CHAINS;

    const SIGNER: &str = "0x19E7E376E7C213B7E7e7e46cc70A5dD086DAff2A";

    fn header(tx: &str, fid: &str, tid: &str) -> MessageHeader {
        MessageHeader {
            tx_type: tx.into(),
            from_chain_id: fid.into(),
            from_chain_signer: SIGNER.into(),
            to_chain_id: tid.into(),
            to_chain_signer: SIGNER.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_echoes_canonical_ids() {
        let registry = ChainRegistry::from_chains(KNOWN_CHAINS);
        let resolved = header("1", "0xAA36A7", "0x3106A").resolve(&registry).unwrap();
        let response = resolved.to_response();
        assert_eq!(response.from_chain_id, "11155111");
        assert_eq!(response.to_chain_id, "200810");
        assert_eq!(response.from_chain_type, "evm");
        assert_eq!(resolved.destination_kind().unwrap(), MessageKind::UserOperation);
        assert!(resolved.testnet);
    }

    #[test]
    fn test_resolve_unknown_chain_either_side() {
        let registry = ChainRegistry::from_chains(KNOWN_CHAINS);
        for h in [
            header("1", "999999", "200810"),
            header("1", "11155111", "999999"),
        ] {
            assert!(matches!(
                h.resolve(&registry),
                Err(RelayError::UnsupportedChain(_))
            ));
        }
    }

    #[test]
    fn test_resolve_tvm_destination_requires_type_two() {
        let registry = ChainRegistry::from_chains(KNOWN_CHAINS);
        let err = header("1", "11155111", "1667471769")
            .resolve(&registry)
            .unwrap_err();
        assert!(matches!(err, RelayError::MalformedRequest(_)));
        let ok = header("2", "11155111", "1667471769")
            .resolve(&registry)
            .unwrap();
        assert_eq!(ok.destination_kind().unwrap(), MessageKind::LedgerB);
    }

    #[test]
    fn test_resolve_missing_signer() {
        let registry = ChainRegistry::from_chains(KNOWN_CHAINS);
        let mut h = header("1", "11155111", "200810");
        h.to_chain_signer = " ".into();
        assert_eq!(
            h.resolve(&registry).unwrap_err(),
            RelayError::malformed("missing tsigner")
        );
    }

    #[test]
    fn test_header_from_query_keys() {
        let json = serde_json::json!({
            "txtype": "0",
            "fid": "17000",
            "fsigner": SIGNER,
            "tid": "11155111",
            "tsigner": SIGNER,
            "testnet": "false",
            "extra-data": "00"
        });
        let h: MessageHeader = serde_json::from_value(json).unwrap();
        assert_eq!(h.extra_data.as_deref(), Some("00"));
        let registry = ChainRegistry::from_chains(KNOWN_CHAINS);
        assert!(!h.resolve(&registry).unwrap().testnet);
    }
}
