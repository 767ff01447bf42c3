//! Chain RPC collaborator.
//!
//! [`EvmRpc`] is the narrow surface the relay needs from an EVM node. The
//! [`AlloyEvmRpc`] implementation (feature `provider`) talks JSON-RPC through
//! an alloy provider; [`Timed`] wraps any implementation with a uniform
//! per-call timeout.

use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use xrelay::RelayError;

/// A transaction the relay submits from its own key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTransaction {
    /// Recipient.
    pub to: Address,
    /// Native value.
    pub value: U256,
    /// Calldata, empty for plain transfers.
    pub input: Bytes,
    /// Gas limit; estimated when absent.
    pub gas: Option<u64>,
}

impl RelayTransaction {
    /// A plain native-value transfer.
    #[must_use]
    pub fn transfer(to: Address, value: U256) -> Self {
        Self {
            to,
            value,
            input: Bytes::new(),
            gas: None,
        }
    }
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptSummary {
    /// Transaction hash.
    pub hash: B256,
    /// Whether execution succeeded.
    pub success: bool,
    /// Block the transaction was included in.
    pub block_number: Option<u64>,
    /// Gas consumed.
    pub gas_used: u64,
}

/// Errors raised by an [`EvmRpc`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Transport failure.
    #[cfg(feature = "provider")]
    #[error(transparent)]
    Transport(#[from] alloy_transport::TransportError),
    /// The call did not finish within the configured timeout.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Configured bound.
        timeout: Duration,
    },
    /// A write was requested from a read-only client.
    #[error("no relay signer configured")]
    NoSigner,
    /// Any other node-side failure.
    #[error("{0}")]
    Other(String),
}

impl From<RpcError> for RelayError {
    fn from(value: RpcError) -> Self {
        match value {
            RpcError::NoSigner => Self::internal(value.to_string()),
            other => Self::rpc(other.to_string()),
        }
    }
}

/// Minimal EVM node surface used by the relay.
///
/// Implementations own transport and retry policy; callers never retry.
#[async_trait]
pub trait EvmRpc: Send + Sync {
    /// Executes `data` against `target` with `eth_call` and returns the output.
    async fn call_view(&self, target: Address, data: Bytes) -> Result<Bytes, RpcError>;

    /// Returns the deployed code size at `address`.
    async fn get_code_size(&self, address: Address) -> Result<usize, RpcError>;

    /// Returns the native balance of `address`.
    async fn get_balance(&self, address: Address) -> Result<U256, RpcError>;

    /// Estimates gas for `tx` sent from the relay key.
    async fn estimate_gas(&self, tx: &RelayTransaction) -> Result<u64, RpcError>;

    /// Signs and broadcasts `tx` from the relay key; returns its hash.
    async fn send_transaction(&self, tx: RelayTransaction) -> Result<B256, RpcError>;

    /// Waits until `hash` is mined.
    async fn wait_for_receipt(&self, hash: B256) -> Result<ReceiptSummary, RpcError>;
}

#[async_trait]
impl<T: EvmRpc + ?Sized> EvmRpc for std::sync::Arc<T> {
    async fn call_view(&self, target: Address, data: Bytes) -> Result<Bytes, RpcError> {
        (**self).call_view(target, data).await
    }

    async fn get_code_size(&self, address: Address) -> Result<usize, RpcError> {
        (**self).get_code_size(address).await
    }

    async fn get_balance(&self, address: Address) -> Result<U256, RpcError> {
        (**self).get_balance(address).await
    }

    async fn estimate_gas(&self, tx: &RelayTransaction) -> Result<u64, RpcError> {
        (**self).estimate_gas(tx).await
    }

    async fn send_transaction(&self, tx: RelayTransaction) -> Result<B256, RpcError> {
        (**self).send_transaction(tx).await
    }

    async fn wait_for_receipt(&self, hash: B256) -> Result<ReceiptSummary, RpcError> {
        (**self).wait_for_receipt(hash).await
    }
}

/// Wraps an [`EvmRpc`] so every read is bounded by the same timeout.
///
/// Receipt waits use `receipt_timeout` instead, since mining takes longer
/// than a read.
#[derive(Debug, Clone)]
pub struct Timed<R> {
    inner: R,
    read_timeout: Duration,
    receipt_timeout: Duration,
}

impl<R> Timed<R> {
    /// Wraps `inner` with the given read and receipt timeouts.
    pub const fn new(inner: R, read_timeout: Duration, receipt_timeout: Duration) -> Self {
        Self {
            inner,
            read_timeout,
            receipt_timeout,
        }
    }

    /// Returns the wrapped client.
    pub const fn inner(&self) -> &R {
        &self.inner
    }
}

async fn bounded<T>(
    operation: &'static str,
    timeout: Duration,
    fut: impl Future<Output = Result<T, RpcError>> + Send,
) -> Result<T, RpcError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| RpcError::Timeout { operation, timeout })?
}

#[async_trait]
impl<R: EvmRpc> EvmRpc for Timed<R> {
    async fn call_view(&self, target: Address, data: Bytes) -> Result<Bytes, RpcError> {
        bounded("eth_call", self.read_timeout, self.inner.call_view(target, data)).await
    }

    async fn get_code_size(&self, address: Address) -> Result<usize, RpcError> {
        bounded("eth_getCode", self.read_timeout, self.inner.get_code_size(address)).await
    }

    async fn get_balance(&self, address: Address) -> Result<U256, RpcError> {
        bounded("eth_getBalance", self.read_timeout, self.inner.get_balance(address)).await
    }

    async fn estimate_gas(&self, tx: &RelayTransaction) -> Result<u64, RpcError> {
        bounded("eth_estimateGas", self.read_timeout, self.inner.estimate_gas(tx)).await
    }

    async fn send_transaction(&self, tx: RelayTransaction) -> Result<B256, RpcError> {
        bounded(
            "eth_sendRawTransaction",
            self.read_timeout,
            self.inner.send_transaction(tx),
        )
        .await
    }

    async fn wait_for_receipt(&self, hash: B256) -> Result<ReceiptSummary, RpcError> {
        bounded(
            "eth_getTransactionReceipt",
            self.receipt_timeout,
            self.inner.wait_for_receipt(hash),
        )
        .await
    }
}

#[cfg(feature = "provider")]
pub use alloy_impl::AlloyEvmRpc;

#[cfg(feature = "provider")]
mod alloy_impl {
    use std::time::Duration;

    use alloy_network::{EthereumWallet, TransactionBuilder};
    use alloy_primitives::{Address, B256, Bytes, U256};
    use alloy_provider::{DynProvider, Provider, ProviderBuilder};
    use alloy_rpc_types_eth::TransactionRequest;
    use async_trait::async_trait;
    use url::Url;

    use super::{EvmRpc, ReceiptSummary, RelayTransaction, RpcError};
    use crate::signer::RelaySigner;

    const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

    /// [`EvmRpc`] backed by an alloy HTTP provider.
    ///
    /// Built per chain at startup. Without a [`RelaySigner`] the client is
    /// read-only and writes fail with [`RpcError::NoSigner`].
    #[derive(Debug, Clone)]
    pub struct AlloyEvmRpc {
        provider: DynProvider,
        from: Option<Address>,
    }

    impl AlloyEvmRpc {
        /// Connects to `url`, optionally signing with `signer`.
        #[must_use]
        pub fn new(url: Url, signer: Option<&RelaySigner>) -> Self {
            #[cfg(feature = "telemetry")]
            tracing::info!(rpc_url = %url, signer = ?signer.map(RelaySigner::address), "Using EVM provider");
            match signer {
                Some(signer) => {
                    let wallet = EthereumWallet::from(signer.inner().clone());
                    let provider = ProviderBuilder::new()
                        .wallet(wallet)
                        .connect_http(url)
                        .erased();
                    Self {
                        provider,
                        from: Some(signer.address()),
                    }
                }
                None => Self {
                    provider: ProviderBuilder::new().connect_http(url).erased(),
                    from: None,
                },
            }
        }

        fn request(&self, tx: &RelayTransaction) -> Result<TransactionRequest, RpcError> {
            let from = self.from.ok_or(RpcError::NoSigner)?;
            let mut request = TransactionRequest::default()
                .with_from(from)
                .with_to(tx.to)
                .with_value(tx.value)
                .with_input(tx.input.clone());
            if let Some(gas) = tx.gas {
                request.set_gas_limit(gas);
            }
            Ok(request)
        }
    }

    #[async_trait]
    impl EvmRpc for AlloyEvmRpc {
        async fn call_view(&self, target: Address, data: Bytes) -> Result<Bytes, RpcError> {
            let request = TransactionRequest::default()
                .with_to(target)
                .with_input(data);
            Ok(self.provider.call(request).await?)
        }

        async fn get_code_size(&self, address: Address) -> Result<usize, RpcError> {
            Ok(self.provider.get_code_at(address).await?.len())
        }

        async fn get_balance(&self, address: Address) -> Result<U256, RpcError> {
            Ok(self.provider.get_balance(address).await?)
        }

        async fn estimate_gas(&self, tx: &RelayTransaction) -> Result<u64, RpcError> {
            let request = self.request(tx)?;
            Ok(self.provider.estimate_gas(request).await?)
        }

        async fn send_transaction(&self, tx: RelayTransaction) -> Result<B256, RpcError> {
            let mut request = self.request(&tx)?;
            if tx.gas.is_none() {
                let gas = self.provider.estimate_gas(request.clone()).await?;
                request.set_gas_limit(gas);
            }
            let pending = self.provider.send_transaction(request).await?;
            Ok(*pending.tx_hash())
        }

        async fn wait_for_receipt(&self, hash: B256) -> Result<ReceiptSummary, RpcError> {
            loop {
                if let Some(receipt) = self.provider.get_transaction_receipt(hash).await? {
                    return Ok(ReceiptSummary {
                        hash,
                        success: receipt.status(),
                        block_number: receipt.block_number,
                        gas_used: receipt.gas_used,
                    });
                }
                tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[derive(Debug)]
    struct Slow;

    #[async_trait]
    impl EvmRpc for Slow {
        async fn call_view(&self, _: Address, _: Bytes) -> Result<Bytes, RpcError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Bytes::new())
        }

        async fn get_code_size(&self, _: Address) -> Result<usize, RpcError> {
            Ok(7)
        }

        async fn get_balance(&self, _: Address) -> Result<U256, RpcError> {
            Ok(U256::from(1))
        }

        async fn estimate_gas(&self, _: &RelayTransaction) -> Result<u64, RpcError> {
            Ok(21_000)
        }

        async fn send_transaction(&self, _: RelayTransaction) -> Result<B256, RpcError> {
            Err(RpcError::NoSigner)
        }

        async fn wait_for_receipt(&self, hash: B256) -> Result<ReceiptSummary, RpcError> {
            Ok(ReceiptSummary {
                hash,
                success: true,
                block_number: Some(1),
                gas_used: 21_000,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_bounds_reads() {
        let rpc = Timed::new(Slow, Duration::from_millis(5000), Duration::from_secs(30));
        let err = rpc
            .call_view(Address::ZERO, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout { operation: "eth_call", .. }));
        assert!(matches!(RelayError::from(err), RelayError::Rpc(_)));
        assert_eq!(rpc.get_code_size(Address::ZERO).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_arc_forwarding_and_no_signer_is_internal() {
        let rpc: Arc<dyn EvmRpc> = Arc::new(Slow);
        assert_eq!(rpc.get_balance(Address::ZERO).await.unwrap(), U256::from(1));
        let err = rpc
            .send_transaction(RelayTransaction::transfer(Address::ZERO, U256::from(1)))
            .await
            .unwrap_err();
        assert!(matches!(RelayError::from(err), RelayError::Internal(_)));
    }
}
