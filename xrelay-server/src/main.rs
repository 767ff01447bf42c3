//! xrelay HTTP server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p xrelay-server --release
//!
//! # Run with custom config path
//! cargo run -p xrelay-server -- --config /path/to/config.toml
//!
//! # Configure logging level
//! RUST_LOG=debug cargo run -p xrelay-server
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to TOML configuration file (default: `config.toml`)
//! - `HOST` - Override bind address (default: `0.0.0.0`)
//! - `PORT` - Override port (default: `8080`)
//! - `RUST_LOG` - Log level filter (default: `info`)
//!
//! A `.env` file in the working directory is loaded first.

use std::net::SocketAddr;
use std::sync::Arc;

use alloy_primitives::U256;
use axum::Router;
use axum::http::Method;
use clap::Parser;
use tower_http::cors;
use tracing_subscriber::EnvFilter;
use url::Url;
use xrelay::networks::{KNOWN_CHAINS, default_rpc_url};
use xrelay::{ChainRegistry, VmKind};
use xrelay_evm::provider::AlloyEvmRpc;
use xrelay_evm::userop::GasSettings;
use xrelay_evm::{RelaySigner, Timed};
use xrelay_tvm::TonApiClient;

use xrelay_server::config::RelayConfig;
use xrelay_server::util::SigDown;
use xrelay_server::{EvmChain, Relay, RelaySettings, relay_router};

#[derive(Parser, Debug)]
#[command(version, about = "Cross-chain escrow relay server")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "CONFIG", default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args).await {
        tracing::error!("Relay failed: {e}");
        std::process::exit(1);
    }
}

async fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = RelayConfig::load_from(&args.config)?;
    tracing::info!(
        path = %args.config,
        host = %config.host,
        port = config.port,
        chains = config.chains.len(),
        "Loaded configuration"
    );

    let signer: Option<RelaySigner> = config.relay_key().map(str::parse).transpose()?;
    match &signer {
        Some(s) => tracing::info!(relay = %s.address(), "Relay signing context enabled"),
        None => tracing::warn!("relay_private_key not set: payouts are disabled"),
    }

    let registry = ChainRegistry::from_chains(KNOWN_CHAINS);
    let overrides = config.chain_overrides()?;
    for id in overrides.keys() {
        if registry.by_chain_id(*id).is_none() {
            tracing::warn!(chain = %id, "Ignoring configuration for unknown chain");
        }
    }

    let tvm = TonApiClient::try_from(config.tvm_api_url.as_str())?
        .with_timeout(config.read_timeout());
    let settings = RelaySettings {
        escrow_salt: config.escrow_salt,
        account_salt: U256::from(config.account_salt),
        extend_seconds: config.extend_lock_seconds,
        signature_mode: config.signature_mode,
        gas: GasSettings::default(),
    };
    let mut relay = Relay::new(registry.clone(), Arc::new(tvm)).with_settings(settings);

    for chain in registry.enabled().filter(|c| c.vm == VmKind::Evm && c.contracts.is_some()) {
        let chain_config = overrides.get(&chain.id);
        let Some(raw_url) = chain_config
            .and_then(|c| c.rpc_url.as_deref())
            .or_else(|| default_rpc_url(chain.id))
        else {
            tracing::warn!(chain = %chain.id, name = chain.name, "Skipping chain: no RPC URL");
            continue;
        };
        let url = Url::parse(raw_url).map_err(|e| format!("Invalid RPC URL for {}: {e}", chain.id))?;
        let rpc = Timed::new(
            AlloyEvmRpc::new(url, signer.as_ref()),
            config.read_timeout(),
            config.receipt_timeout(),
        );
        let evm = EvmChain {
            rpc: Arc::new(rpc),
            escrow_proxy_code: chain_config.and_then(|c| c.escrow_proxy_code.clone()),
            userop_hash: chain_config.map(|c| c.userop_hash).unwrap_or_default(),
        };
        tracing::info!(chain = %chain.id, name = chain.name, hash = ?evm.userop_hash, "Registered EVM chain");
        relay = relay.with_evm_chain(chain.id, evm);
    }
    if let Some(signer) = signer {
        relay = relay.with_signer(signer);
    }

    let app = Router::new().merge(relay_router(Arc::new(relay))).layer(
        cors::CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods([Method::GET])
            .allow_headers(cors::Any),
    );

    let sig_down = SigDown::try_new()?;
    let token = sig_down.cancellation_token();

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Relay listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    sig_down.recv().await;

    tracing::info!("Relay shut down gracefully");
    Ok(())
}
