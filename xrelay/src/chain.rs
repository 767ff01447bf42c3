//! Chain identifiers, capabilities and the chain registry.
//!
//! - [`ChainId`] - A numeric chain identifier accepted in decimal or `0x` hex form
//! - [`VmKind`] - The execution model a chain runs
//! - [`ChainDescriptor`] - Static record describing one chain and its deployments
//! - [`ChainRegistry`] - Immutable lookup from raw identifiers to descriptors
//!
//! Every identifier that enters the relay goes through [`ChainId::from_str`],
//! which is the only place chain-id normalization happens. `"0xAA36A7"`,
//! `"0xaa36a7"` and `"11155111"` all name the same chain and always render
//! back as the canonical decimal string `"11155111"`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use alloy_primitives::Address;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::RelayError;

/// A numeric chain identifier.
///
/// EVM chains use their EIP-155 id. Non-EVM ledgers are assigned ids in the
/// same numeric space (e.g. `1667471769` for the TON testnet).
///
/// # Serialization
///
/// Serializes to the canonical decimal string: `"11155111"`. Deserializes from
/// either decimal or `0x`-prefixed hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(u64);

impl ChainId {
    /// Creates a chain id from its numeric value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the `0x`-prefixed upper-case hex alias, e.g. `"0xAA36A7"`.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("0x{:X}", self.0)
    }

    /// Returns the message-bridge domain id for this chain.
    ///
    /// Domains are 32-bit; ids that do not fit have no domain.
    #[must_use]
    pub fn domain(self) -> Option<u32> {
        u32::try_from(self.0).ok()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Error returned when parsing an invalid chain id string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid chain id format {0}")]
pub struct ChainIdFormatError(String);

impl FromStr for ChainId {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => trimmed.parse::<u64>(),
        };
        parsed.map(Self).map_err(|_| ChainIdFormatError(s.into()))
    }
}

impl Serialize for ChainId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

/// Execution model of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmKind {
    /// Account-based smart-contract ledger with the EVM ABI.
    Evm,
    /// Tree-cell ledger (TON virtual machine).
    Tvm,
    /// Account-model ledger (Solana virtual machine).
    Svm,
}

impl VmKind {
    /// Short lower-case name used on the wire (`"evm"`, `"tvm"`, `"svm"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Evm => "evm",
            Self::Tvm => "tvm",
            Self::Svm => "svm",
        }
    }
}

impl fmt::Display for VmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction variant requested by a client.
///
/// Type 0 is signed once and proven in full on every chain. Type 1 is signed
/// twice: the escrow payload is proven on the escrow chain and the remaining
/// bytecode is trusted. Type 2 routes execution through a non-EVM entrypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxType(u8);

impl TxType {
    /// Creates a transaction type from its numeric tag.
    #[must_use]
    pub const fn new(tag: u8) -> Self {
        Self(tag)
    }

    /// Returns the numeric tag.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TxType {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u8>()
            .map(Self)
            .map_err(|_| RelayError::malformed("invalid txtype"))
    }
}

impl Serialize for TxType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Kind of message a relay side produces.
///
/// Used both to tag response payloads and to select the capability list a
/// chain must allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    /// Escrow deposit/lock on the origin chain.
    Escrow,
    /// Account-abstraction user operation on an EVM destination.
    UserOperation,
    /// Proxy-wallet message on a tree-cell destination.
    LedgerB,
}

impl MessageKind {
    /// Name of the capability list this kind is checked against.
    #[must_use]
    pub const fn capability(self) -> &'static str {
        match self {
            Self::Escrow => "escrow",
            Self::UserOperation | Self::LedgerB => "entrypoint",
        }
    }
}

/// A deployed contract role in a [`ContractBundle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Contract {
    /// ERC-4337 entrypoint.
    Entrypoint,
    /// Escrow singleton (implementation behind every escrow proxy).
    EscrowSingleton,
    /// Factory deploying escrow proxies.
    EscrowFactory,
    /// Multicall helper with `multicallView` and `getExtcodesize`.
    Multicall,
    /// Simple-account factory for counterfactual smart accounts.
    SimpleAccountFactory,
    /// Cross-chain paymaster.
    Paymaster,
    /// Message-bridge mailbox.
    Mailbox,
    /// Message-bridge interchain gas paymaster.
    GasOracle,
}

/// Addresses of the relay contracts deployed on one EVM chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractBundle {
    /// ERC-4337 entrypoint.
    pub entrypoint: Address,
    /// Escrow singleton.
    pub escrow_singleton: Address,
    /// Escrow proxy factory.
    pub escrow_factory: Address,
    /// Multicall helper.
    pub multicall: Address,
    /// Simple-account factory.
    pub simple_account_factory: Address,
    /// Cross-chain paymaster.
    pub paymaster: Address,
    /// Message-bridge mailbox.
    pub mailbox: Address,
    /// Message-bridge gas oracle.
    pub gas_oracle: Address,
}

impl ContractBundle {
    /// Returns the address deployed for `contract`.
    #[must_use]
    pub const fn get(&self, contract: Contract) -> Address {
        match contract {
            Contract::Entrypoint => self.entrypoint,
            Contract::EscrowSingleton => self.escrow_singleton,
            Contract::EscrowFactory => self.escrow_factory,
            Contract::Multicall => self.multicall,
            Contract::SimpleAccountFactory => self.simple_account_factory,
            Contract::Paymaster => self.paymaster,
            Contract::Mailbox => self.mailbox,
            Contract::GasOracle => self.gas_oracle,
        }
    }
}

/// Whether a configured chain is accepted by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    /// The chain is served.
    Enabled,
    /// The chain is known but not served, with a reason for diagnostics.
    Disabled(&'static str),
}

/// Static description of one chain.
///
/// Built once from the table in [`crate::networks`] and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainDescriptor {
    /// Canonical numeric id.
    pub id: ChainId,
    /// Human-readable name (e.g. `"ethereumSepoliaTestnet"`).
    pub name: &'static str,
    /// Execution model.
    pub vm: VmKind,
    /// Relay contracts, for EVM chains that have them deployed.
    pub contracts: Option<ContractBundle>,
    /// User-friendly address of the proxy-wallet entrypoint, for TVM chains.
    pub tvm_entrypoint: Option<&'static str>,
    /// Transaction types accepted for entrypoint-side messages.
    pub entrypoint_types: &'static [u8],
    /// Transaction types accepted for escrow-side messages.
    pub escrow_types: &'static [u8],
    /// Enabled flag with a disable reason.
    pub status: ChainStatus,
}

impl ChainDescriptor {
    /// Returns `true` if the chain is served.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self.status, ChainStatus::Enabled)
    }

    /// Returns the relay contract bundle.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Internal`] if no contracts are deployed on this chain.
    pub fn contracts(&self) -> Result<&ContractBundle, RelayError> {
        self.contracts.as_ref().ok_or_else(|| {
            RelayError::internal(format!("no relay contracts deployed on chain {}", self.id))
        })
    }

    /// Returns the address of one relay contract.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Internal`] if no contracts are deployed on this chain.
    pub fn contract(&self, contract: Contract) -> Result<Address, RelayError> {
        self.contracts().map(|bundle| bundle.get(contract))
    }

    /// Checks that `tx_type` is allowed for messages of `kind` on this chain.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedRequest`] if the pair is not in the
    /// capability matrix.
    pub fn check_capability(&self, tx_type: TxType, kind: MessageKind) -> Result<(), RelayError> {
        let allowed = match kind {
            MessageKind::Escrow => self.escrow_types,
            MessageKind::UserOperation | MessageKind::LedgerB => self.entrypoint_types,
        };
        if allowed.contains(&tx_type.get()) {
            Ok(())
        } else {
            Err(RelayError::malformed(format!(
                "Chain {} missing type {} for {}",
                self.id,
                tx_type,
                kind.capability()
            )))
        }
    }
}

/// Reasons a raw chain identifier cannot be resolved.
///
/// All variants surface to callers as [`RelayError::UnsupportedChain`]; the
/// distinction is kept for logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The identifier is neither decimal nor `0x` hex.
    #[error("unsupported chain ID: {0}")]
    InvalidFormat(String),
    /// The identifier is well-formed but not configured.
    #[error("unsupported chain ID: {0}")]
    Unknown(ChainId),
    /// The chain is configured but disabled.
    #[error("unsupported chain ID: {id} ({reason})")]
    Disabled {
        /// The chain that was requested.
        id: ChainId,
        /// Why the chain is disabled.
        reason: &'static str,
    },
}

impl From<RegistryError> for RelayError {
    fn from(value: RegistryError) -> Self {
        Self::UnsupportedChain(value.to_string())
    }
}

/// Registry of configured chains indexed by [`ChainId`].
///
/// Built from one or more `&[ChainDescriptor]` slices at startup; read-only
/// afterwards and safe to share across request tasks.
///
/// # Example
///
/// ```
/// use xrelay::chain::ChainRegistry;
/// use xrelay::networks::KNOWN_CHAINS;
///
/// let registry = ChainRegistry::from_chains(KNOWN_CHAINS);
/// let sepolia = registry.resolve("0xAA36A7").unwrap();
/// assert_eq!(sepolia.id.to_string(), "11155111");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry(HashMap<ChainId, ChainDescriptor>);

impl ChainRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Creates a registry pre-populated from a descriptor slice.
    #[must_use]
    pub fn from_chains(chains: &[ChainDescriptor]) -> Self {
        let mut registry = Self(HashMap::with_capacity(chains.len()));
        registry.register(chains);
        registry
    }

    /// Registers additional chains into this registry.
    ///
    /// A later entry with the same id replaces the earlier one.
    pub fn register(&mut self, chains: &[ChainDescriptor]) {
        for chain in chains {
            self.0.insert(chain.id, *chain);
        }
    }

    /// Builder-style method: registers additional chains and returns `self`.
    #[must_use]
    pub fn with_chains(mut self, chains: &[ChainDescriptor]) -> Self {
        self.register(chains);
        self
    }

    /// Looks up a descriptor by exact id, including disabled chains.
    #[must_use]
    pub fn by_chain_id(&self, id: ChainId) -> Option<&ChainDescriptor> {
        self.0.get(&id)
    }

    /// Normalizes a raw hex or decimal identifier and returns the enabled
    /// chain it names.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the id is malformed, unknown or disabled.
    pub fn resolve(&self, raw: &str) -> Result<&ChainDescriptor, RegistryError> {
        let id =
            ChainId::from_str(raw).map_err(|_| RegistryError::InvalidFormat(raw.to_owned()))?;
        let chain = self.0.get(&id).ok_or(RegistryError::Unknown(id))?;
        match chain.status {
            ChainStatus::Enabled => Ok(chain),
            ChainStatus::Disabled(reason) => Err(RegistryError::Disabled { id, reason }),
        }
    }

    /// Iterates over the enabled chains.
    pub fn enabled(&self) -> impl Iterator<Item = &ChainDescriptor> {
        self.0.values().filter(|c| c.is_enabled())
    }

    /// Returns the number of registered chains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no chains are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networks::{ETHEREUM_SEPOLIA, KNOWN_CHAINS, TON_TESTNET};

    fn registry() -> ChainRegistry {
        ChainRegistry::from_chains(KNOWN_CHAINS)
    }

    #[test]
    fn test_chain_id_parse_decimal_and_hex() {
        assert_eq!("11155111".parse::<ChainId>().unwrap(), ChainId::new(11_155_111));
        assert_eq!("0xAA36A7".parse::<ChainId>().unwrap(), ChainId::new(11_155_111));
        assert_eq!("0xaa36a7".parse::<ChainId>().unwrap(), ChainId::new(11_155_111));
        assert_eq!(" 200810 ".parse::<ChainId>().unwrap(), ChainId::new(200_810));
    }

    #[test]
    fn test_chain_id_parse_invalid() {
        assert!("".parse::<ChainId>().is_err());
        assert!("0x".parse::<ChainId>().is_err());
        assert!("sepolia".parse::<ChainId>().is_err());
        assert!("-1".parse::<ChainId>().is_err());
    }

    #[test]
    fn test_chain_id_hex_alias() {
        assert_eq!(ChainId::new(11_155_111).to_hex(), "0xAA36A7");
        assert_eq!(ChainId::new(1_667_471_769).to_hex(), "0x63639999");
    }

    #[test]
    fn test_chain_id_serde_canonical_decimal() {
        let id: ChainId = serde_json::from_str("\"0x3106A\"").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"200810\"");
    }

    #[test]
    fn test_resolve_aliases_yield_identical_record() {
        let registry = registry();
        let by_hex = registry.resolve("0xAA36A7").unwrap();
        let by_dec = registry.resolve("11155111").unwrap();
        assert_eq!(by_hex, by_dec);
        assert_eq!(by_hex.id.to_string(), "11155111");
        assert_eq!(by_hex.vm, VmKind::Evm);
    }

    #[test]
    fn test_resolve_every_enabled_alias() {
        let registry = registry();
        for chain in KNOWN_CHAINS.iter().filter(|c| c.is_enabled()) {
            let hex = registry.resolve(&chain.id.to_hex()).unwrap();
            let dec = registry.resolve(&chain.id.to_string()).unwrap();
            assert_eq!(hex, dec);
        }
    }

    #[test]
    fn test_resolve_unknown_and_disabled_are_distinct_but_unsupported() {
        let registry = registry();
        let unknown = registry.resolve("999999").unwrap_err();
        let disabled = registry.resolve("0x14A34").unwrap_err();
        assert!(matches!(unknown, RegistryError::Unknown(_)));
        assert!(matches!(disabled, RegistryError::Disabled { .. }));
        assert!(matches!(RelayError::from(unknown), RelayError::UnsupportedChain(_)));
        assert!(matches!(RelayError::from(disabled), RelayError::UnsupportedChain(_)));
    }

    #[test]
    fn test_resolve_invalid_format_is_unsupported() {
        let err = registry().resolve("not-a-chain").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidFormat(_)));
        assert_eq!(err.to_string(), "unsupported chain ID: not-a-chain");
    }

    #[test]
    fn test_check_capability() {
        let sepolia = ETHEREUM_SEPOLIA;
        assert!(sepolia.check_capability(TxType::new(1), MessageKind::Escrow).is_ok());
        assert!(
            sepolia
                .check_capability(TxType::new(1), MessageKind::UserOperation)
                .is_ok()
        );
        let err = sepolia
            .check_capability(TxType::new(2), MessageKind::UserOperation)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Malformed request: Chain 11155111 missing type 2 for entrypoint"
        );
    }

    #[test]
    fn test_tvm_entrypoint_only_type_two() {
        assert!(TON_TESTNET.check_capability(TxType::new(2), MessageKind::LedgerB).is_ok());
        assert!(TON_TESTNET.check_capability(TxType::new(1), MessageKind::LedgerB).is_err());
        assert!(TON_TESTNET.check_capability(TxType::new(1), MessageKind::Escrow).is_ok());
    }

    #[test]
    fn test_tx_type_parse() {
        assert_eq!("1".parse::<TxType>().unwrap(), TxType::new(1));
        assert!(matches!(
            "one".parse::<TxType>(),
            Err(RelayError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_contract_lookup() {
        let bundle = ETHEREUM_SEPOLIA.contracts().unwrap();
        assert_eq!(bundle.get(Contract::Paymaster), bundle.paymaster);
        assert!(TON_TESTNET.contract(Contract::Entrypoint).is_err());
    }

    #[test]
    fn test_domain() {
        assert_eq!(ChainId::new(200_810).domain(), Some(200_810));
        assert_eq!(ChainId::new(357_930_172_418).domain(), None);
    }
}
