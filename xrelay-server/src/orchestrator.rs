//! Cross-chain request orchestration.
//!
//! A two-sided request moves through [`Pipeline`] states in a fixed order:
//! [`HeaderResolved`] → [`OriginBuilt`] → [`DestinationBuilt`] → composed
//! [`UnsignedDataResponse`]. Both chains are resolved and capability-checked
//! before any builder touches a ledger, and a failure at any step aborts the
//! whole request.
//!
//! The one-sided and signed endpoints reuse the same per-side builders on
//! [`Relay`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, B256, Bytes, U256};
use rand::RngExt;
use rand::rng;
use serde::Serialize;
use serde_with::{DisplayFromStr, serde_as};
use tracing::instrument;
use xrelay::chain::ContractBundle;
use xrelay::{
    ChainDescriptor, ChainId, ChainRegistry, HeaderResponse, MessageHeader, MessageKind,
    RelayError, ResolvedHeader, TxType, VmKind,
};
use xrelay_evm::asset::{self, AssetInfo};
use xrelay_evm::escrow::{self, EscrowSnapshot, LockRequest};
use xrelay_evm::paymaster::{self, PaymasterJson};
use xrelay_evm::provider::RelayTransaction;
use xrelay_evm::userop::{self, GasSettings, UserOpRequest, UserOperationJson};
use xrelay_evm::{
    EscrowAccount, EscrowMessage, EvmRpc, PaymasterFields, RelaySigner, UserOpHashScheme,
    UserOperationMessage, multicall,
};
use xrelay_tvm::message::{self, SignedProxyWalletMessage};
use xrelay_tvm::{
    ExecutionData, ProxyWalletRecord, ProxyWalletRequest, SignatureMode, TvmAddress, TvmView,
};

use crate::error::{ApiError, Stage, StageExt};
use crate::params::{
    AssetInfoQuery, IntentQuery, SignedBytecodeQuery, SignedEscrowPayoutQuery,
    UnsignedEscrowQuery, parse_address, parse_tvm_address, parse_u256,
};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Per-chain EVM collaborators.
#[derive(Clone)]
pub struct EvmChain {
    /// Node access, already wrapped with read timeouts.
    pub rpc: Arc<dyn EvmRpc>,
    /// Escrow proxy creation code. When set, escrow addresses are derived
    /// locally instead of asked from the factory.
    pub escrow_proxy_code: Option<Bytes>,
    /// Struct hash the chain's entrypoint expects.
    pub userop_hash: UserOpHashScheme,
}

impl EvmChain {
    /// Chain access with factory-resolved escrows and the default hash scheme.
    #[must_use]
    pub fn new(rpc: Arc<dyn EvmRpc>) -> Self {
        Self {
            rpc,
            escrow_proxy_code: None,
            userop_hash: UserOpHashScheme::default(),
        }
    }
}

impl fmt::Debug for EvmChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmChain")
            .field("escrow_proxy_code", &self.escrow_proxy_code.as_ref().map(|code| code.len()))
            .field("userop_hash", &self.userop_hash)
            .finish_non_exhaustive()
    }
}

/// Request-independent relay parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// CREATE2 salt of user escrows.
    pub escrow_salt: B256,
    /// Salt of destination smart accounts.
    pub account_salt: U256,
    /// Lock extension offered in the timelock digest.
    pub extend_seconds: u64,
    /// Cross-VM signature recovery mode.
    pub signature_mode: SignatureMode,
    /// Gas values placed in user operations.
    pub gas: GasSettings,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            escrow_salt: escrow::DEFAULT_ESCROW_SALT,
            account_salt: U256::ZERO,
            extend_seconds: escrow::DEFAULT_EXTEND_SECONDS,
            signature_mode: SignatureMode::default(),
            gas: GasSettings::default(),
        }
    }
}

/// Shared relay state: registry, ledger collaborators and the optional
/// relay signing context. Built once at startup and read-only afterwards.
pub struct Relay {
    registry: ChainRegistry,
    evm: HashMap<ChainId, EvmChain>,
    tvm: Arc<dyn TvmView>,
    signer: Option<RelaySigner>,
    settings: RelaySettings,
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("chains", &self.registry.len())
            .field("evm", &self.evm)
            .field("relay_address", &self.relay_address())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Payload of one side of a response, tagged by message kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SideMessage {
    /// Escrow deposit/lock on an EVM origin.
    Escrow(Box<OriginEscrow>),
    /// User operation on an EVM destination.
    UserOperation(Box<UserOperationMessage>),
    /// Proxy-wallet request on a TVM destination.
    LedgerB(Box<ProxyWalletRequest>),
}

impl SideMessage {
    /// Kind tag of this payload.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Escrow(_) => MessageKind::Escrow,
            Self::UserOperation(_) => MessageKind::UserOperation,
            Self::LedgerB(_) => MessageKind::LedgerB,
        }
    }
}

/// Origin escrow artifacts plus the locked asset's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginEscrow {
    /// Deployment, deposit and timelock details.
    #[serde(flatten)]
    pub message: EscrowMessage,
    /// ERC-20 metadata; absent for the native coin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<AssetInfo>,
}

/// Two-sided unsigned response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsignedDataResponse {
    /// Header with canonical ids.
    pub header: HeaderResponse,
    /// Origin payload.
    pub from: SideMessage,
    /// Destination payload.
    pub to: SideMessage,
}

/// Origin half of a header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginHeaderResponse {
    /// Transaction type tag.
    #[serde(rename = "txtype")]
    pub tx_type: String,
    /// Origin chain name.
    #[serde(rename = "fname")]
    pub chain_name: String,
    /// Origin VM kind.
    #[serde(rename = "ftype")]
    pub chain_type: String,
    /// Canonical origin chain id.
    #[serde(rename = "fid")]
    pub chain_id: String,
    /// Escrow owner.
    #[serde(rename = "fsigner")]
    pub signer: String,
}

/// `unsigned-escrow-request` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscrowResponse {
    /// Origin header.
    pub header: OriginHeaderResponse,
    /// Escrow payload.
    pub from: SideMessage,
}

/// `unsigned-entrypoint-request` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrypointResponse {
    /// Header with canonical ids.
    pub header: HeaderResponse,
    /// Destination payload.
    pub to: SideMessage,
}

/// Receipt of a relay payout transaction.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PayoutReceipt {
    /// Transaction hash.
    pub tx_hash: B256,
    /// Recipient.
    pub to: Address,
    /// Amount paid, decimal wei.
    #[serde_as(as = "DisplayFromStr")]
    pub value: U256,
    /// Inclusion block.
    pub block_number: Option<u64>,
    /// Gas consumed.
    pub gas_used: u64,
}

/// `signed-bytecode` response.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SignedBytecodeResponse {
    /// The validated operation.
    pub user_operation: UserOperationJson,
    /// Its hash on the destination chain.
    pub op_hash: B256,
    /// Validated paymaster authorization.
    pub paymaster: PaymasterJson,
    /// Escrow backing the operation.
    pub escrow_address: Address,
    /// Escrow balance of the authorised asset.
    #[serde_as(as = "DisplayFromStr")]
    pub escrow_balance: U256,
    /// Relay payout, when a relay signer is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<PayoutReceipt>,
}

/// `signed-escrow-payout` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedPayoutResponse {
    /// Header with canonical ids.
    pub header: HeaderResponse,
    /// Entrypoint message ready to be relayed.
    pub to: SignedProxyWalletMessage,
}

/// Both chains resolved and capability-checked.
#[derive(Debug)]
pub struct HeaderResolved;

/// Origin payload built.
#[derive(Debug)]
pub struct OriginBuilt {
    from: SideMessage,
}

/// Both payloads built.
#[derive(Debug)]
pub struct DestinationBuilt {
    from: SideMessage,
    to: SideMessage,
}

/// A two-sided request in state `S`.
#[derive(Debug)]
pub struct Pipeline<'a, S> {
    relay: &'a Relay,
    header: ResolvedHeader,
    intent: &'a IntentQuery,
    state: S,
}

impl<'a, S> Pipeline<'a, S> {
    /// The resolved header.
    #[must_use]
    pub const fn header(&self) -> &ResolvedHeader {
        &self.header
    }

    fn advance<T>(self, state: T) -> Pipeline<'a, T> {
        Pipeline {
            relay: self.relay,
            header: self.header,
            intent: self.intent,
            state,
        }
    }
}

impl<'a> Pipeline<'a, HeaderResolved> {
    /// Builds the origin payload.
    ///
    /// # Errors
    ///
    /// Returns the origin builder's failure tagged [`Stage::Origin`].
    pub async fn build_origin(self) -> Result<Pipeline<'a, OriginBuilt>, ApiError> {
        let from = self
            .relay
            .build_origin(&self.header.origin, &self.header.origin_signer, self.intent)
            .await
            .at(Stage::Origin)?;
        Ok(self.advance(OriginBuilt { from }))
    }
}

impl<'a> Pipeline<'a, OriginBuilt> {
    /// Builds the destination payload.
    ///
    /// # Errors
    ///
    /// Returns the destination builder's failure tagged [`Stage::Destination`].
    pub async fn build_destination(self) -> Result<Pipeline<'a, DestinationBuilt>, ApiError> {
        let to = self
            .relay
            .build_destination(&self.header, self.intent)
            .await
            .at(Stage::Destination)?;
        Ok(Pipeline {
            relay: self.relay,
            header: self.header,
            intent: self.intent,
            state: DestinationBuilt {
                from: self.state.from,
                to,
            },
        })
    }
}

impl Pipeline<'_, DestinationBuilt> {
    /// Assembles the response.
    #[must_use]
    pub fn compose(self) -> UnsignedDataResponse {
        UnsignedDataResponse {
            header: self.header.to_response(),
            from: self.state.from,
            to: self.state.to,
        }
    }
}

impl Relay {
    /// Creates a relay with no EVM chains attached and default settings.
    #[must_use]
    pub fn new(registry: ChainRegistry, tvm: Arc<dyn TvmView>) -> Self {
        Self {
            registry,
            evm: HashMap::new(),
            tvm,
            signer: None,
            settings: RelaySettings::default(),
        }
    }

    /// Attaches node access for one EVM chain.
    #[must_use]
    pub fn with_evm_chain(mut self, id: ChainId, chain: EvmChain) -> Self {
        self.evm.insert(id, chain);
        self
    }

    /// Replaces the relay settings.
    #[must_use]
    pub const fn with_settings(mut self, settings: RelaySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Installs the relay signing context.
    #[must_use]
    pub fn with_signer(mut self, signer: RelaySigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// The chain registry.
    #[must_use]
    pub const fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    /// Address of the relay signer, if configured.
    #[must_use]
    pub fn relay_address(&self) -> Option<Address> {
        self.signer.as_ref().map(RelaySigner::address)
    }

    fn evm_chain(&self, chain: &ChainDescriptor) -> Result<&EvmChain, RelayError> {
        self.evm
            .get(&chain.id)
            .ok_or_else(|| RelayError::internal(format!("no RPC endpoint configured for chain {}", chain.id)))
    }

    /// Resolves a two-sided header.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnsupportedChain`] or [`RelayError::MalformedRequest`]
    /// tagged [`Stage::Header`]. No ledger is contacted.
    pub fn resolve<'a>(
        &'a self,
        header: &MessageHeader,
        intent: &'a IntentQuery,
    ) -> Result<Pipeline<'a, HeaderResolved>, ApiError> {
        let header = header.resolve(&self.registry).at(Stage::Header)?;
        Ok(Pipeline {
            relay: self,
            header,
            intent,
            state: HeaderResolved,
        })
    }

    /// `unsigned-message`: escrow on the origin, user operation or
    /// proxy-wallet request on the destination.
    ///
    /// # Errors
    ///
    /// Returns the first failing stage; nothing partial is returned.
    #[instrument(skip_all, err, fields(fid = %header.from_chain_id, tid = %header.to_chain_id))]
    pub async fn unsigned_message(
        &self,
        header: &MessageHeader,
        intent: &IntentQuery,
    ) -> Result<UnsignedDataResponse, ApiError> {
        Ok(self
            .resolve(header, intent)?
            .build_origin()
            .await?
            .build_destination()
            .await?
            .compose())
    }

    /// `unsigned-escrow-request`: the origin payload alone.
    ///
    /// # Errors
    ///
    /// Returns the first failing stage.
    #[instrument(skip_all, err, fields(fid = %query.chain_id))]
    pub async fn unsigned_escrow(&self, query: &UnsignedEscrowQuery) -> Result<EscrowResponse, ApiError> {
        let tx_type: TxType = query.tx_type.parse().at(Stage::Header)?;
        let chain = *self.registry.resolve(&query.chain_id).at(Stage::Header)?;
        chain
            .check_capability(tx_type, MessageKind::Escrow)
            .at(Stage::Header)?;
        let signer = query.signer.trim();
        if signer.is_empty() {
            return Err(RelayError::malformed("missing fsigner")).at(Stage::Header);
        }
        let from = self
            .build_origin(&chain, signer, &query.intent)
            .await
            .at(Stage::Origin)?;
        Ok(EscrowResponse {
            header: OriginHeaderResponse {
                tx_type: tx_type.to_string(),
                chain_name: chain.name.to_owned(),
                chain_type: chain.vm.to_string(),
                chain_id: chain.id.to_string(),
                signer: signer.to_owned(),
            },
            from,
        })
    }

    /// `unsigned-entrypoint-request`: the destination payload alone.
    ///
    /// # Errors
    ///
    /// Returns the first failing stage.
    #[instrument(skip_all, err, fields(fid = %header.from_chain_id, tid = %header.to_chain_id))]
    pub async fn unsigned_entrypoint(
        &self,
        header: &MessageHeader,
        intent: &IntentQuery,
    ) -> Result<EntrypointResponse, ApiError> {
        let pipeline = self.resolve(header, intent)?;
        let to = self
            .build_destination(pipeline.header(), intent)
            .await
            .at(Stage::Destination)?;
        Ok(EntrypointResponse {
            header: pipeline.header().to_response(),
            to,
        })
    }

    async fn build_origin(
        &self,
        chain: &ChainDescriptor,
        signer: &str,
        intent: &IntentQuery,
    ) -> Result<SideMessage, RelayError> {
        if chain.vm != VmKind::Evm {
            return Err(RelayError::malformed(format!(
                "no escrow builder for {} chain {}",
                chain.vm, chain.id
            )));
        }
        let owner = parse_address("fsigner", signer)?;
        let lock = LockRequest {
            asset: intent.asset()?,
            amount: intent.amount()?,
            extend_seconds: U256::from(self.settings.extend_seconds),
        };
        let bundle = chain.contracts()?;
        let evm = self.evm_chain(chain)?;
        let account = self.escrow_account(bundle, evm, owner).await?;

        let mut calls = escrow::snapshot_calls(bundle.multicall, account.address, lock.asset);
        if !lock.asset.is_zero() {
            calls.extend(asset::asset_calls(lock.asset, owner));
        }
        let results = multicall::view(&*evm.rpc, bundle.multicall, &calls).await?;
        let (snapshot_results, asset_results) = results.split_at(results.len().min(3));
        let snapshot = EscrowSnapshot::decode(snapshot_results, unix_now())?;
        let asset = if lock.asset.is_zero() {
            None
        } else {
            Some(AssetInfo::decode(lock.asset, asset_results)?)
        };

        tracing::debug!(escrow = %account.address, state = ?snapshot.state, "escrow read");
        let message = EscrowMessage::build(bundle, chain.id.get(), &account, &snapshot, &lock)?;
        Ok(SideMessage::Escrow(Box::new(OriginEscrow { message, asset })))
    }

    async fn escrow_account(
        &self,
        bundle: &ContractBundle,
        evm: &EvmChain,
        owner: Address,
    ) -> Result<EscrowAccount, RelayError> {
        let account = EscrowAccount::new(bundle, owner, self.settings.escrow_salt);
        match &evm.escrow_proxy_code {
            Some(code) => Ok(account.derive(bundle, code)),
            None => {
                let address = escrow::query_address(&*evm.rpc, bundle, &account).await?;
                Ok(account.with_address(address))
            }
        }
    }

    async fn build_destination(
        &self,
        header: &ResolvedHeader,
        intent: &IntentQuery,
    ) -> Result<SideMessage, RelayError> {
        match header.destination_kind()? {
            MessageKind::UserOperation => Ok(SideMessage::UserOperation(Box::new(
                self.build_user_operation(header, intent).await?,
            ))),
            MessageKind::LedgerB => {
                let (record, execution) = Self::tvm_request(header, intent)?;
                let request =
                    message::build_unsigned(&*self.tvm, &record, &execution, header.testnet)
                        .await?;
                Ok(SideMessage::LedgerB(Box::new(request)))
            }
            MessageKind::Escrow => Err(RelayError::internal("escrow is not a destination message")),
        }
    }

    async fn build_user_operation(
        &self,
        header: &ResolvedHeader,
        intent: &IntentQuery,
    ) -> Result<UserOperationMessage, RelayError> {
        let chain = &header.destination;
        let owner = parse_address("tsigner", &header.destination_signer)?;
        let origin_signer = parse_address("fsigner", &header.origin_signer)?;
        let asset = intent.asset()?;
        let amount = intent.amount()?;
        let call_data = intent.evm_call_data(owner, amount)?;
        let domain = origin_domain(&header.origin)?;
        let bundle = chain.contracts()?;
        let evm = self.evm_chain(chain)?;

        let fields = PaymasterFields::new(
            bundle.paymaster,
            origin_signer,
            domain,
            header.tx_type.get(),
            asset,
            amount,
        );
        let salt = self.settings.account_salt;
        let sender = userop::account_address(&*evm.rpc, bundle, owner, salt).await?;
        let state = userop::account_state(&*evm.rpc, bundle, sender).await?;
        let request = UserOpRequest {
            owner,
            factory: bundle.simple_account_factory,
            salt,
            sender,
            call_data,
            paymaster_and_data: fields.build(),
        };
        let op = userop::build(&request, state, &self.settings.gas);
        let hash = userop::hash(&op, bundle.entrypoint, chain.id.get(), evm.userop_hash);
        tracing::debug!(%sender, deployed = state.has_code, %hash, "user operation built");
        Ok(UserOperationMessage {
            packed: (&op).into(),
            paymaster: (&fields).into(),
            hash,
            price: self.settings.gas.max_cost(),
        })
    }

    fn tvm_request(
        header: &ResolvedHeader,
        intent: &IntentQuery,
    ) -> Result<(ProxyWalletRecord, ExecutionData), RelayError> {
        let raw_entrypoint = header.destination.tvm_entrypoint.ok_or_else(|| {
            RelayError::internal(format!(
                "no proxy-wallet entrypoint on chain {}",
                header.destination.id
            ))
        })?;
        let entrypoint: TvmAddress = raw_entrypoint
            .parse()
            .map_err(|e| RelayError::internal(format!("entrypoint {raw_entrypoint}: {e}")))?;
        let owner_tvm = parse_tvm_address("tsigner", &header.destination_signer)?;
        let record = ProxyWalletRecord {
            nonce: intent.proxy_nonce()?,
            entrypoint,
            owner_evm: parse_address("fsigner", &header.origin_signer)?,
            owner_tvm,
            workchain: intent.workchain()?,
        };
        let execution = intent.tvm_execution(owner_tvm)?;
        Ok((record, execution))
    }

    /// `signed-bytecode`: validates a signed user operation against its
    /// escrow and, with a relay signer, pays the operation's sender.
    ///
    /// The operation must carry the escrow owner's signature over its hash
    /// before any ledger is read. Escrow balance and lock state come from a
    /// single snapshot batch; the asset-info view reports the native balance
    /// for the zero asset.
    ///
    /// # Errors
    ///
    /// - [`RelayError::PaymasterMismatch`] if the paymaster bytes differ
    /// - [`RelayError::MalformedRequest`] if the signature is not the owner's
    /// - [`RelayError::EscrowNotFound`] if the signer has no escrow
    /// - [`RelayError::InsufficientEscrowBalance`] if the escrow holds too little
    #[instrument(skip_all, err, fields(origin = %query.origin_id, destination = %query.destination_id))]
    pub async fn signed_bytecode(
        &self,
        query: &SignedBytecodeQuery,
    ) -> Result<SignedBytecodeResponse, ApiError> {
        let origin = *self.registry.resolve(&query.origin_id).at(Stage::Header)?;
        let destination = *self.registry.resolve(&query.destination_id).at(Stage::Header)?;
        let message_type = query.message_type().at(Stage::Header)?;
        let tx_type = TxType::new(message_type);
        for (chain, kind) in [
            (&origin, MessageKind::Escrow),
            (&destination, MessageKind::UserOperation),
        ] {
            if chain.vm != VmKind::Evm {
                return Err(RelayError::malformed(format!(
                    "signed bytecode requires EVM chains, {} is {}",
                    chain.id, chain.vm
                )))
                .at(Stage::Header);
            }
            chain.check_capability(tx_type, kind).at(Stage::Header)?;
        }
        let signer = parse_address("signer", &query.signer).at(Stage::Header)?;
        let asset = query
            .asset_address
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or(Ok(Address::ZERO), |raw| parse_address("asset-address", raw))
            .at(Stage::Header)?;
        let amount = parse_u256("asset-amount", &query.asset_amount).at(Stage::Header)?;
        let op = query.user_operation().at(Stage::Header)?;

        let destination_bundle = destination.contracts().at(Stage::Validation)?;
        let expected = PaymasterFields::new(
            destination_bundle.paymaster,
            signer,
            origin_domain(&origin).at(Stage::Validation)?,
            message_type,
            asset,
            amount,
        );
        paymaster::validate(&op.paymasterAndData, &expected).at(Stage::Validation)?;

        let destination_evm = self.evm_chain(&destination).at(Stage::Destination)?;
        let op_hash = userop::hash(
            &op,
            destination_bundle.entrypoint,
            destination.id.get(),
            destination_evm.userop_hash,
        );
        userop::verify_owner_signature(&op, op_hash, signer).at(Stage::Validation)?;

        let origin_bundle = origin.contracts().at(Stage::Origin)?;
        let origin_evm = self.evm_chain(&origin).at(Stage::Origin)?;
        let account = self
            .escrow_account(origin_bundle, origin_evm, signer)
            .await
            .at(Stage::Origin)?;
        let snapshot = escrow::read_snapshot(
            &*origin_evm.rpc,
            origin_bundle.multicall,
            account.address,
            asset,
            unix_now(),
        )
        .await
        .at(Stage::Origin)?;
        if !snapshot.is_deployed() {
            return Err(RelayError::EscrowNotFound(format!(
                "{} for signer {signer} on chain {}",
                account.address, origin.id
            )))
            .at(Stage::Validation);
        }
        let balance = snapshot.balance;
        if balance < amount {
            return Err(RelayError::InsufficientEscrowBalance(format!(
                "escrow {} holds {balance}, operation needs {amount}",
                account.address
            )))
            .at(Stage::Validation);
        }

        let payout = if self.signer.is_some() && asset.is_zero() {
            Some(
                Self::pay_out(destination_evm, op.sender, amount)
                    .await
                    .at(Stage::Payout)?,
            )
        } else {
            None
        };

        Ok(SignedBytecodeResponse {
            user_operation: (&op).into(),
            op_hash,
            paymaster: (&expected).into(),
            escrow_address: account.address,
            escrow_balance: balance,
            payout,
        })
    }

    #[instrument(skip_all, err, fields(to = %to, value = %value))]
    async fn pay_out(evm: &EvmChain, to: Address, value: U256) -> Result<PayoutReceipt, RelayError> {
        let tx_hash = evm
            .rpc
            .send_transaction(RelayTransaction::transfer(to, value))
            .await?;
        let receipt = evm.rpc.wait_for_receipt(tx_hash).await?;
        if !receipt.success {
            return Err(RelayError::internal(format!("payout {tx_hash} reverted")));
        }
        tracing::info!(%tx_hash, block = ?receipt.block_number, "payout mined");
        Ok(PayoutReceipt {
            tx_hash,
            to,
            value,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        })
    }

    /// `signed-escrow-payout`: validates the owner's signature over a TVM
    /// execution and returns the entrypoint message to relay.
    ///
    /// # Errors
    ///
    /// - [`RelayError::MalformedRequest`] for a non-TVM destination or a
    ///   signature that does not recover to `fsigner`
    /// - [`RelayError::Rpc`] if the deployment check fails
    #[instrument(skip_all, err, fields(trace_id = query.trace_id.as_deref().unwrap_or_default()))]
    pub async fn signed_escrow_payout(
        &self,
        query: &SignedEscrowPayoutQuery,
    ) -> Result<SignedPayoutResponse, ApiError> {
        let header = query.header.resolve(&self.registry).at(Stage::Header)?;
        if header.destination.vm != VmKind::Tvm {
            return Err(RelayError::malformed(format!(
                "signed escrow payout requires a TVM destination, {} is {}",
                header.destination.id, header.destination.vm
            )))
            .at(Stage::Header);
        }
        let (record, execution) = Self::tvm_request(&header, &query.intent).at(Stage::Header)?;
        let signature = message::parse_signature(&query.signature).at(Stage::Header)?;
        let query_id = match query.query_id().at(Stage::Header)? {
            Some(id) => id,
            None => rng().random(),
        };

        let to = message::build_signed(
            &*self.tvm,
            &record,
            &execution,
            &signature,
            self.settings.signature_mode,
            query_id,
            header.testnet,
        )
        .await
        .at(Stage::Validation)?;
        tracing::info!(query_id, proxy = %to.proxy_address, "entrypoint message built");
        Ok(SignedPayoutResponse {
            header: header.to_response(),
            to,
        })
    }

    /// `asset-info`: ERC-20 metadata and a holder balance in one multicall.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Decode`] if the asset is not an ERC-20.
    #[instrument(skip_all, err, fields(chain = %query.chain_id))]
    pub async fn asset_info(&self, query: &AssetInfoQuery) -> Result<AssetInfo, ApiError> {
        let chain = *self.registry.resolve(&query.chain_id).at(Stage::Header)?;
        let token = parse_address("asset-address", &query.asset_address).at(Stage::Header)?;
        let holder = parse_address("user-address", &query.user_address).at(Stage::Header)?;
        let bundle = chain.contracts().at(Stage::Origin)?;
        let evm = self.evm_chain(&chain).at(Stage::Origin)?;
        let results = multicall::view(&*evm.rpc, bundle.multicall, &asset::asset_calls(token, holder))
            .await
            .at(Stage::Origin)?;
        AssetInfo::decode(token, &results).at(Stage::Origin)
    }
}

fn origin_domain(chain: &ChainDescriptor) -> Result<u32, RelayError> {
    chain.id.domain().ok_or_else(|| {
        RelayError::malformed(format!("chain {} has no 32-bit paymaster domain", chain.id))
    })
}
