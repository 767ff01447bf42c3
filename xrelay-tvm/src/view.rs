//! Read-only access to a TVM chain through the TON API HTTP interface.
//!
//! Only get-method execution is needed: the relay asks a derived proxy-wallet
//! address for `get_wallet_info` to learn whether it is deployed and which
//! nonce it is at.
//!
//! Requests go to `{base}{address}/methods/{method}?args=...`. A 404 or a
//! response with `success: false` means the account has no such method,
//! which for a proxy wallet means it is not deployed yet.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;
use xrelay::RelayError;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::address::TvmAddress;

/// Default TON API endpoint.
pub const DEFAULT_TON_API_URL: &str = "https://testnet.tonapi.io/v2/blockchain/accounts/";

/// Errors that can occur while talking to the TON API.
#[derive(Debug, thiserror::Error)]
pub enum TonApiError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// The base URL cannot carry path segments.
    #[error("URL cannot be a base: {0}")]
    CannotBeABase(Url),
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// JSON deserialization error.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read response body.
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The stack returned by a get-method does not have the expected shape.
    #[error("unexpected stack from {method}: {details}")]
    Stack {
        /// Get-method name.
        method: &'static str,
        /// What was wrong.
        details: String,
    },
}

impl From<TonApiError> for RelayError {
    fn from(err: TonApiError) -> Self {
        match err {
            TonApiError::Stack { .. } => Self::decode(err.to_string()),
            TonApiError::UrlParse { .. } | TonApiError::CannotBeABase(_) => {
                Self::internal(err.to_string())
            }
            _ => Self::rpc(err.to_string()),
        }
    }
}

/// One entry of a get-method result stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEntry {
    /// `num`, `cell`, `slice`, `null`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Hex integer for `num` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num: Option<String>,
    /// Hex bag of cells for `cell` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell: Option<String>,
    /// Hex bag of cells for `slice` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice: Option<String>,
}

/// Result of a get-method call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetMethodResult {
    /// The method ran to completion.
    pub success: bool,
    /// TVM exit code.
    #[serde(default)]
    pub exit_code: i32,
    /// Returned stack, bottom first.
    #[serde(default)]
    pub stack: Vec<StackEntry>,
}

/// On-chain state of a deployed proxy wallet, as reported by `get_wallet_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WalletInfo {
    /// Current nonce, hex.
    pub nonce: String,
    /// Entrypoint cell, hex bag of cells.
    pub entrypoint: String,
    /// EVM owner, hex integer.
    pub owner_evm: String,
    /// TVM owner cell, hex bag of cells.
    pub owner_tvm: String,
}

impl WalletInfo {
    const METHOD: &'static str = "get_wallet_info";

    fn from_stack(stack: &[StackEntry]) -> Result<Self, TonApiError> {
        let [nonce, entrypoint, evm, tvm] = stack else {
            return Err(TonApiError::Stack {
                method: Self::METHOD,
                details: format!("expected 4 entries, got {}", stack.len()),
            });
        };
        let field = |entry: &StackEntry, name: &str| -> Result<String, TonApiError> {
            entry
                .num
                .clone()
                .or_else(|| entry.cell.clone())
                .or_else(|| entry.slice.clone())
                .ok_or_else(|| TonApiError::Stack {
                    method: Self::METHOD,
                    details: format!("{name} has no value"),
                })
        };
        Ok(Self {
            nonce: field(nonce, "nonce")?,
            entrypoint: field(entrypoint, "entrypoint")?,
            owner_evm: field(evm, "owner_evm")?,
            owner_tvm: field(tvm, "owner_tvm")?,
        })
    }

    /// Nonce as an integer.
    ///
    /// Returns `None` if the reported value is not a hex or decimal `u64`.
    #[must_use]
    pub fn nonce_value(&self) -> Option<u64> {
        let s = self.nonce.trim();
        s.strip_prefix("0x").map_or_else(
            || s.parse().ok(),
            |hex| u64::from_str_radix(hex, 16).ok(),
        )
    }
}

/// Whether a proxy wallet exists on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyWalletState {
    /// Nothing is deployed at the address yet.
    NotDeployed,
    /// The wallet is deployed.
    Deployed(WalletInfo),
}

impl ProxyWalletState {
    /// Returns `true` if the wallet is deployed.
    #[must_use]
    pub const fn is_deployed(&self) -> bool {
        matches!(self, Self::Deployed(_))
    }
}

/// Read access to a TVM chain.
#[async_trait]
pub trait TvmView: Send + Sync {
    /// Queries the deployment state of the proxy wallet at `address`.
    async fn wallet_state(&self, address: &TvmAddress) -> Result<ProxyWalletState, RelayError>;
}

/// A client for the TON API `blockchain/accounts` endpoints.
#[derive(Clone, Debug)]
pub struct TonApiClient {
    /// Base URL, ending in `/accounts/`.
    base_url: Url,
    /// Shared Reqwest HTTP client.
    client: Client,
    /// Optional request timeout.
    timeout: Option<Duration>,
}

impl TonApiClient {
    /// Creates a client for `base_url`.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            client: Client::new(),
            timeout: None,
        }
    }

    /// Sets a timeout for all future requests.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the base URL used by this client.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the configured timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn method_url(
        &self,
        account: &TvmAddress,
        method: &str,
        args: &[String],
    ) -> Result<Url, TonApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TonApiError::CannotBeABase(self.base_url.clone()))?
            .pop_if_empty()
            .push(&account.to_raw())
            .push("methods")
            .push(method);
        if !args.is_empty() {
            let mut query = url.query_pairs_mut();
            for arg in args {
                query.append_pair("args", arg);
            }
        }
        Ok(url)
    }

    /// Runs get-method `method` on `account`.
    ///
    /// Returns `None` when the API answers 404, which it does for accounts
    /// that do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`TonApiError`] on transport failures, other non-success
    /// statuses and malformed JSON.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "xrelay.ton_api.run_get_method", skip(self, args), fields(account = %account), err)
    )]
    pub async fn run_get_method(
        &self,
        account: &TvmAddress,
        method: &str,
        args: &[String],
    ) -> Result<Option<GetMethodResult>, TonApiError> {
        const CONTEXT: &str = "GET /methods";
        let url = self.method_url(account, method, args)?;
        let mut req = self.client.get(url);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let response = req.send().await.map_err(|e| TonApiError::Http {
            context: CONTEXT,
            source: e,
        })?;

        match response.status() {
            StatusCode::OK => response
                .json::<GetMethodResult>()
                .await
                .map(Some)
                .map_err(|e| TonApiError::JsonDeserialization {
                    context: CONTEXT,
                    source: e,
                }),
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| TonApiError::ResponseBodyRead {
                        context: CONTEXT,
                        source: e,
                    })?;
                Err(TonApiError::HttpStatus {
                    context: CONTEXT,
                    status,
                    body,
                })
            }
        }
    }

    /// Reads the proxy-wallet state at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`TonApiError`] on transport failures or a malformed stack.
    pub async fn wallet_info(&self, address: &TvmAddress) -> Result<ProxyWalletState, TonApiError> {
        match self
            .run_get_method(address, WalletInfo::METHOD, &[])
            .await?
        {
            Some(result) if result.success && result.exit_code == 0 => {
                WalletInfo::from_stack(&result.stack).map(ProxyWalletState::Deployed)
            }
            _ => Ok(ProxyWalletState::NotDeployed),
        }
    }
}

/// Parses a base URL, normalizing it to end in a single slash.
impl TryFrom<&str> for TonApiClient {
    type Error = TonApiError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_owned();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| TonApiError::UrlParse {
            context: "Failed to parse TON API base url",
            source: e,
        })?;
        Ok(Self::new(url))
    }
}

#[async_trait]
impl TvmView for TonApiClient {
    async fn wallet_state(&self, address: &TvmAddress) -> Result<ProxyWalletState, RelayError> {
        Ok(self.wallet_info(address).await?)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::B256;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> TonApiClient {
        TonApiClient::try_from(format!("{}/v2/blockchain/accounts", server.uri()).as_str())
            .unwrap()
            .with_timeout(Duration::from_secs(5))
    }

    fn account() -> TvmAddress {
        TvmAddress::new(0, B256::repeat_byte(0xab))
    }

    fn account_path(method: &str) -> String {
        format!("/v2/blockchain/accounts/{}/methods/{method}", account().to_raw())
    }

    #[tokio::test]
    async fn test_wallet_info_deployed() {
        let server = MockServer::start().await;
        let body = json!({
            "success": true,
            "exit_code": 0,
            "stack": [
                {"type": "num", "num": "0x3"},
                {"type": "cell", "cell": "b5ee9c72"},
                {"type": "num", "num": "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"},
                {"type": "cell", "cell": "b5ee9c73"}
            ]
        });
        Mock::given(method("GET"))
            .and(path(account_path("get_wallet_info")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let state = client(&server).wallet_info(&account()).await.unwrap();
        let ProxyWalletState::Deployed(info) = state else {
            panic!("expected deployed wallet");
        };
        assert_eq!(info.nonce_value(), Some(3));
        assert_eq!(info.entrypoint, "b5ee9c72");
    }

    #[tokio::test]
    async fn test_wallet_info_not_deployed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(account_path("get_wallet_info")))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "entity not found"})))
            .mount(&server)
            .await;
        let client = client(&server);
        assert_eq!(
            client.wallet_info(&account()).await.unwrap(),
            ProxyWalletState::NotDeployed
        );
        assert!(!client.wallet_state(&account()).await.unwrap().is_deployed());
    }

    #[tokio::test]
    async fn test_failed_get_method_means_not_deployed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(account_path("get_wallet_info")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": false, "exit_code": -13, "stack": []})),
            )
            .mount(&server)
            .await;
        assert_eq!(
            client(&server).wallet_info(&account()).await.unwrap(),
            ProxyWalletState::NotDeployed
        );
    }

    #[tokio::test]
    async fn test_server_error_is_rpc_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let err = client(&server).wallet_state(&account()).await.unwrap_err();
        assert!(matches!(err, RelayError::Rpc(ref d) if d.contains("boom")));
    }

    #[tokio::test]
    async fn test_short_stack_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(account_path("get_wallet_info")))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"success": true, "exit_code": 0, "stack": [{"type": "num", "num": "0x0"}]}),
            ))
            .mount(&server)
            .await;
        let err = client(&server).wallet_state(&account()).await.unwrap_err();
        assert!(matches!(err, RelayError::Decode(_)));
    }

    #[tokio::test]
    async fn test_args_are_sent_as_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(account_path("seqno")))
            .and(query_param("args", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "exit_code": 0, "stack": []})),
            )
            .mount(&server)
            .await;
        let result = client(&server)
            .run_get_method(&account(), "seqno", &["1".to_owned()])
            .await
            .unwrap()
            .unwrap();
        assert!(result.success);
    }
}
