// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM signer backed by a local secp256k1 key.
//!
//! Keys are loaded from PEM (SEC1 or PKCS#8). Message and typed-data signing
//! is offline. Transactions are completed (nonce, gas, fees) over the chain's
//! RPC endpoint when one is configured; fully specified transactions can be
//! signed without one.

use std::fmt;

use alloy::{
    dyn_abi::TypedData,
    eips::{eip2718::Encodable2718, BlockNumberOrTag},
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Signature},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::{local::PrivateKeySigner, SignerSync},
};
use async_trait::async_trait;
use k256::SecretKey;
use serde_json::Value;

use super::{ChainSigner, SignerError};

/// Priority fee used when the node is asked for fee data (1.5 gwei).
const DEFAULT_PRIORITY_FEE: u128 = 1_500_000_000;

/// Base fee assumed when the latest block carries none (25 gwei).
const FALLBACK_BASE_FEE: u128 = 25_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum EvmKeyError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid RPC URL: {0}")]
    InvalidRpcUrl(String),
}

/// Parse a PEM private key into its 32-byte hex form (no `0x` prefix).
pub fn pem_to_hex(pem_bytes: &[u8]) -> Result<String, EvmKeyError> {
    let pem_str = std::str::from_utf8(pem_bytes)
        .map_err(|e| EvmKeyError::InvalidPrivateKey(format!("Invalid UTF-8: {e}")))?;
    let pem = pem::parse(pem_str)
        .map_err(|e| EvmKeyError::InvalidPrivateKey(format!("Invalid PEM: {e}")))?;

    let secret_key = SecretKey::from_sec1_der(pem.contents())
        .or_else(|_| {
            use k256::pkcs8::DecodePrivateKey;
            SecretKey::from_pkcs8_der(pem.contents())
        })
        .map_err(|e| EvmKeyError::InvalidPrivateKey(format!("Invalid key format: {e}")))?;

    Ok(alloy::hex::encode(secret_key.to_bytes()))
}

pub struct LocalEvmSigner {
    signer: PrivateKeySigner,
    chain_id: Option<u64>,
    provider: Option<DynProvider>,
}

// Never print key material.
impl fmt::Debug for LocalEvmSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEvmSigner")
            .field("address", &self.signer.address())
            .field("chain_id", &self.chain_id)
            .field("rpc", &self.provider.is_some())
            .finish_non_exhaustive()
    }
}

impl LocalEvmSigner {
    /// Signer from a hex private key (64 characters, optional `0x`).
    pub fn from_hex(private_key_hex: &str) -> Result<Self, EvmKeyError> {
        let key_bytes = alloy::hex::decode(private_key_hex)
            .map_err(|e| EvmKeyError::InvalidPrivateKey(e.to_string()))?;
        let signer = PrivateKeySigner::from_slice(&key_bytes)
            .map_err(|e| EvmKeyError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self {
            signer,
            chain_id: None,
            provider: None,
        })
    }

    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self, EvmKeyError> {
        Self::from_hex(&pem_to_hex(pem_bytes)?)
    }

    /// Bind the signer to one chain and its RPC endpoint.
    pub fn with_rpc(mut self, chain_id: u64, rpc_url: &str) -> Result<Self, EvmKeyError> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| EvmKeyError::InvalidRpcUrl(e.to_string()))?;
        let wallet = EthereumWallet::from(self.signer.clone());
        self.provider = Some(ProviderBuilder::new().wallet(wallet).connect_http(url).erased());
        self.chain_id = Some(chain_id);
        Ok(self)
    }

    /// Bind the signer to a chain without an RPC endpoint.
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn evm_address(&self) -> Address {
        self.signer.address()
    }

    fn provider(&self) -> Result<&DynProvider, SignerError> {
        self.provider
            .as_ref()
            .ok_or_else(|| SignerError::Failed("no RPC endpoint configured".into()))
    }

    /// Fill whatever the dApp left out of `tx`.
    async fn complete(&self, transaction: &Value) -> Result<TransactionRequest, SignerError> {
        let mut tx: TransactionRequest = serde_json::from_value(transaction.clone())
            .map_err(|e| SignerError::Failed(format!("Invalid transaction: {e}")))?;

        tx.from = Some(self.signer.address());
        if tx.chain_id.is_none() {
            tx.chain_id = self.chain_id;
        }

        let missing_fees = tx.gas_price.is_none() && tx.max_fee_per_gas.is_none();
        if tx.nonce.is_none() || tx.gas.is_none() || missing_fees || tx.chain_id.is_none() {
            let provider = self.provider()?;
            if tx.chain_id.is_none() {
                tx.chain_id = Some(provider.get_chain_id().await.map_err(rpc_error)?);
            }
            if tx.nonce.is_none() {
                tx.nonce = Some(
                    provider
                        .get_transaction_count(self.signer.address())
                        .await
                        .map_err(rpc_error)?,
                );
            }
            if tx.gas.is_none() {
                tx.gas = Some(provider.estimate_gas(tx.clone()).await.map_err(rpc_error)?);
            }
            if missing_fees {
                let (max_fee, priority_fee) = self.gas_prices().await?;
                tx.max_fee_per_gas = Some(max_fee);
                tx.max_priority_fee_per_gas = Some(priority_fee);
            }
        }
        Ok(tx)
    }

    /// `(max_fee_per_gas, max_priority_fee_per_gas)` from the latest block.
    async fn gas_prices(&self) -> Result<(u128, u128), SignerError> {
        let block = self
            .provider()?
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(rpc_error)?
            .ok_or_else(|| SignerError::Transient("No latest block".into()))?;

        let base_fee = block
            .header
            .base_fee_per_gas
            .map(u128::from)
            .unwrap_or(FALLBACK_BASE_FEE);

        // Leave room for one base fee doubling.
        let max_fee = base_fee.saturating_mul(2).saturating_add(DEFAULT_PRIORITY_FEE);
        Ok((max_fee, DEFAULT_PRIORITY_FEE))
    }
}

fn rpc_error(e: impl fmt::Display) -> SignerError {
    SignerError::Transient(e.to_string())
}

fn encode_signature(signature: &Signature) -> String {
    format!("0x{}", alloy::hex::encode(signature.as_bytes()))
}

/// Message bytes: `0x`-prefixed hex is decoded, anything else is taken as UTF-8.
fn message_bytes(message: &str) -> Result<Vec<u8>, SignerError> {
    match message.strip_prefix("0x") {
        Some(hex) => alloy::hex::decode(hex)
            .map_err(|e| SignerError::Failed(format!("Invalid hex message: {e}"))),
        None => Ok(message.as_bytes().to_vec()),
    }
}

#[async_trait]
impl ChainSigner for LocalEvmSigner {
    fn address(&self) -> String {
        self.signer.address().to_checksum(None)
    }

    async fn sign_message(&self, message: &str) -> Result<String, SignerError> {
        let bytes = message_bytes(message)?;
        let signature = self
            .signer
            .sign_message_sync(&bytes)
            .map_err(|e| SignerError::Failed(e.to_string()))?;
        Ok(encode_signature(&signature))
    }

    async fn sign_typed_payload(&self, payload: &Value) -> Result<String, SignerError> {
        let typed: TypedData = serde_json::from_value(payload.clone())
            .map_err(|e| SignerError::Failed(format!("Invalid typed data: {e}")))?;
        let hash = typed
            .eip712_signing_hash()
            .map_err(|e| SignerError::Failed(format!("Invalid typed data: {e}")))?;
        let signature = self
            .signer
            .sign_hash_sync(&hash)
            .map_err(|e| SignerError::Failed(e.to_string()))?;
        Ok(encode_signature(&signature))
    }

    async fn sign_transaction(&self, transaction: &Value) -> Result<String, SignerError> {
        let tx = self.complete(transaction).await?;
        let wallet = EthereumWallet::from(self.signer.clone());
        let envelope = tx
            .build(&wallet)
            .await
            .map_err(|e| SignerError::Failed(e.to_string()))?;
        Ok(format!("0x{}", alloy::hex::encode(envelope.encoded_2718())))
    }

    async fn send_transaction(&self, transaction: &Value) -> Result<String, SignerError> {
        let tx = self.complete(transaction).await?;
        let pending = self.provider()?.send_transaction(tx).await.map_err(rpc_error)?;
        let tx_hash = format!("{:?}", pending.tx_hash());
        tracing::info!(tx_hash = %tx_hash, "Transaction broadcast");
        Ok(tx_hash)
    }
}
