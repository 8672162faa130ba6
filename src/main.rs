// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wc_bridge::approval::ApprovalPolicy;
use wc_bridge::bridge::{BridgeDeps, WalletBridge};
use wc_bridge::clock::SystemClock;
use wc_bridge::config::{BridgeConfig, ConfigError, DEFAULT_LOG_FILTER};
use wc_bridge::error::BridgeError;
use wc_bridge::models::EIP155;
use wc_bridge::negotiation::ChainSupport;
use wc_bridge::relay::stdio::JsonLinesRelay;
use wc_bridge::signer::evm::{EvmKeyError, LocalEvmSigner};
use wc_bridge::signer::SignerRegistry;
use wc_bridge::storage::{SessionDatabase, StoreError};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read EVM key: {0}")]
    KeyFile(#[from] std::io::Error),

    #[error(transparent)]
    Key(#[from] EvmKeyError),

    #[error("failed to open session database: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Logs go to stderr; stdout carries relay traffic.
fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_signers(config: &BridgeConfig) -> Result<SignerRegistry, StartupError> {
    let registry = SignerRegistry::new();
    let Some(path) = &config.evm_key_pem else {
        warn!("No EVM key configured; eip155 namespaces cannot be approved");
        return Ok(registry);
    };
    let pem = std::fs::read(path)?;

    if config.evm_rpc.is_empty() {
        let signer = LocalEvmSigner::from_pem(&pem)?;
        registry.register(EIP155, ChainSupport::Any, Arc::new(signer));
        return Ok(registry);
    }
    for rpc in &config.evm_rpc {
        let signer = LocalEvmSigner::from_pem(&pem)?.with_rpc(rpc.chain_id, &rpc.url)?;
        let chains = BTreeSet::from([format!("{EIP155}:{}", rpc.chain_id)]);
        registry.register(EIP155, ChainSupport::Only(chains), Arc::new(signer));
    }
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = BridgeConfig::from_env()?;
    init_tracing(config.json_logs);

    let db_path = config.session_db_path();
    info!(path = %db_path.display(), "Opening session database");
    let backend = Arc::new(SessionDatabase::open(&db_path)?);
    let signers = Arc::new(load_signers(&config)?);
    match config.approval {
        ApprovalPolicy::Deny => warn!("APPROVAL_POLICY is deny; every session request will be rejected"),
        ApprovalPolicy::AutoApprove => warn!("APPROVAL_POLICY is auto; every session request will be signed"),
    }

    let relay = Arc::new(JsonLinesRelay::new(tokio::io::stdout()));
    let bridge = Arc::new(WalletBridge::new(
        BridgeDeps {
            relay: relay.clone(),
            backend,
            clock: Arc::new(SystemClock),
            signers,
            approval: Arc::new(config.approval),
        },
        config.settings.clone(),
    )?);
    bridge.start();

    let input = BufReader::new(tokio::io::stdin());
    let mut relay_task = tokio::spawn(relay.run(bridge.clone(), input, bridge.shutdown_token()));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        }
        result = &mut relay_task => {
            match result {
                Ok(Ok(())) => info!("Relay input finished"),
                Ok(Err(e)) => error!(error = %e, "Relay input failed"),
                Err(e) => error!(error = %e, "Relay task panicked"),
            }
        }
    }

    bridge.shutdown().await;
    relay_task.abort();
    Ok(())
}
