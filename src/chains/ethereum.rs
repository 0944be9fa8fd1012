use super::{EthereumBase, Ethereumish, TxRequest, Wallet};
use crate::config::NetworkConfig;
use crate::logs::EthereumLog;
use crate::transactions::{Transaction, TransactionReceipt};
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::eth::TransactionRequest;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// EVM client over an alloy HTTP provider.
pub struct EvmChain {
    provider: Arc<dyn Provider<Http<Client>>>,
    chain: String,
    chain_id: u64,
    native_token_symbol: String,
    gas_price: f64,
    spenders: HashMap<String, Address>,
}

impl EvmChain {
    /// Connects to `network.node_url`. `spenders` maps connector names to the
    /// addresses `get_spender` resolves them to.
    pub fn new(network: &NetworkConfig, spenders: HashMap<String, Address>) -> Result<Self> {
        let url = network
            .node_url
            .parse()
            .map_err(|e| eyre::eyre!("invalid node URL {:?}: {}", network.node_url, e))?;
        let provider = ProviderBuilder::new().on_http(url);
        info!(
            "Connected {}/{} (chain id {}) to {}",
            network.chain, network.network, network.chain_id, network.node_url
        );

        Ok(Self {
            provider: Arc::new(provider),
            chain: network.chain.clone(),
            chain_id: network.chain_id,
            native_token_symbol: network.native_currency_symbol.clone(),
            gas_price: network.gas_price,
            spenders,
        })
    }

    /// Receipt of a mined transaction, or `None` while it is pending.
    pub async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        let Some(receipt) = self.provider.get_transaction_receipt(hash).await? else {
            return Ok(None);
        };
        let block_number = receipt.block_number.unwrap_or_default();
        let latest = self.provider.get_block_number().await?;

        Ok(Some(TransactionReceipt {
            to: receipt.to,
            from: receipt.from,
            contract_address: receipt.contract_address,
            transaction_index: receipt.transaction_index.unwrap_or_default(),
            gas_used: U256::from(receipt.gas_used),
            cumulative_gas_used: U256::from(receipt.inner.cumulative_gas_used()),
            effective_gas_price: Some(U256::from(receipt.effective_gas_price)),
            block_hash: receipt.block_hash.unwrap_or_default(),
            transaction_hash: receipt.transaction_hash,
            block_number,
            confirmations: latest.saturating_sub(block_number) + 1,
            status: Some(receipt.status() as u8),
            logs: receipt
                .inner
                .logs()
                .iter()
                .cloned()
                .map(EthereumLog::from)
                .collect(),
        }))
    }
}

#[async_trait]
impl EthereumBase for EvmChain {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn call(&self, to: Address, data: Bytes, from: Option<Address>) -> Result<Bytes> {
        let mut request = TransactionRequest::default().with_to(to).with_input(data);
        if let Some(from) = from {
            request = request.with_from(from);
        }
        Ok(self.provider.call(&request).await?)
    }

    async fn send_transaction(&self, wallet: &Wallet, request: TxRequest) -> Result<Transaction> {
        let from = wallet.address();
        let nonce = match request.nonce {
            Some(n) => n,
            None => self.nonce(from).await?,
        };

        let mut tx = TransactionRequest::default()
            .with_from(from)
            .with_to(request.to)
            .with_input(request.data.clone())
            .with_value(request.value)
            .with_nonce(nonce)
            .with_chain_id(self.chain_id)
            .with_gas_limit(request.gas_limit);

        let (gas_price, max_fee, max_priority) = if request.is_eip1559() {
            let estimate = self.provider.estimate_eip1559_fees(None).await?;
            let max_fee = request.max_fee_per_gas.unwrap_or(estimate.max_fee_per_gas);
            let max_priority = request
                .max_priority_fee_per_gas
                .unwrap_or(estimate.max_priority_fee_per_gas);
            tx = tx
                .with_max_fee_per_gas(max_fee)
                .with_max_priority_fee_per_gas(max_priority);
            (None, Some(max_fee), Some(max_priority))
        } else {
            let price = match request.gas_price {
                Some(p) => p,
                None => self.current_gas_price().await?,
            };
            tx = tx.with_gas_price(price);
            (Some(price), None, None)
        };

        let signer = EthereumWallet::from(wallet.clone());
        let envelope = tx
            .build(&signer)
            .await
            .map_err(|e| eyre::eyre!("failed to sign transaction: {}", e))?;
        let pending = self.provider.send_tx_envelope(envelope).await?;
        let hash = *pending.tx_hash();
        debug!("Sent transaction {:?} with nonce {}", hash, nonce);

        Ok(Transaction {
            hash: Some(hash),
            from: Some(from),
            to: Some(request.to),
            nonce,
            chain_id: self.chain_id,
            data: request.data,
            value: request.value,
            gas_limit: Some(U256::from(request.gas_limit)),
            gas_price: gas_price.map(U256::from),
            max_fee_per_gas: max_fee.map(U256::from),
            max_priority_fee_per_gas: max_priority.map(U256::from),
            tx_type: Some(if max_fee.is_some() { 2 } else { 0 }),
        })
    }

    async fn nonce(&self, address: Address) -> Result<u64> {
        Ok(self.provider.get_transaction_count(address).pending().await?)
    }

    async fn current_gas_price(&self) -> Result<u128> {
        Ok(self.provider.get_gas_price().await?)
    }
}

#[async_trait]
impl Ethereumish for EvmChain {
    fn gas_price(&self) -> f64 {
        self.gas_price
    }

    fn native_token_symbol(&self) -> &str {
        &self.native_token_symbol
    }

    fn chain(&self) -> &str {
        &self.chain
    }

    fn get_spender(&self, req_spender: &str) -> Result<Address> {
        if let Some(address) = self.spenders.get(req_spender) {
            return Ok(*address);
        }
        req_spender
            .parse()
            .map_err(|_| eyre::eyre!("unknown spender {:?} on {}", req_spender, self.chain))
    }
}
