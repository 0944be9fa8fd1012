//! Transaction records in two forms: native ones carrying `U256` numbers, and
//! `Custom*` projections whose big-number fields are decimal strings so they
//! survive JSON consumers that cannot hold 256-bit integers.

use crate::logs::EthereumLog;
use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: Option<B256>,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub nonce: u64,
    pub chain_id: u64,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    #[serde(rename = "type")]
    pub tx_type: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub to: Option<Address>,
    pub from: Address,
    pub contract_address: Option<Address>,
    pub transaction_index: u64,
    pub gas_used: U256,
    pub cumulative_gas_used: U256,
    pub effective_gas_price: Option<U256>,
    pub block_hash: B256,
    pub transaction_hash: B256,
    pub block_number: u64,
    pub confirmations: u64,
    pub status: Option<u8>,
    #[serde(skip)]
    pub logs: Vec<EthereumLog>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub transaction: Transaction,
    pub block_number: Option<u64>,
    pub block_hash: Option<B256>,
    pub timestamp: Option<u64>,
    pub confirmations: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomTransaction {
    pub hash: Option<B256>,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub nonce: u64,
    pub chain_id: u64,
    pub data: Bytes,
    pub value: String,
    pub gas_limit: Option<String>,
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(rename = "type")]
    pub tx_type: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomTransactionReceipt {
    pub to: Option<Address>,
    pub from: Address,
    pub contract_address: Option<Address>,
    pub transaction_index: u64,
    pub gas_used: String,
    pub cumulative_gas_used: String,
    pub effective_gas_price: Option<String>,
    pub block_hash: B256,
    pub transaction_hash: B256,
    pub block_number: u64,
    pub confirmations: u64,
    pub status: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomTransactionResponse {
    pub hash: Option<B256>,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub nonce: u64,
    pub chain_id: u64,
    pub data: Bytes,
    pub value: String,
    pub gas_limit: String,
    pub gas_price: Option<String>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub block_number: Option<u64>,
    pub block_hash: Option<B256>,
    pub timestamp: Option<u64>,
    pub confirmations: u64,
}

fn decimal(value: U256) -> String {
    value.to_string()
}

impl From<&Transaction> for CustomTransaction {
    fn from(tx: &Transaction) -> Self {
        Self {
            hash: tx.hash,
            from: tx.from,
            to: tx.to,
            nonce: tx.nonce,
            chain_id: tx.chain_id,
            data: tx.data.clone(),
            value: decimal(tx.value),
            gas_limit: tx.gas_limit.map(decimal),
            gas_price: tx.gas_price,
            max_fee_per_gas: tx.max_fee_per_gas.map(decimal),
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas.map(decimal),
            tx_type: tx.tx_type,
        }
    }
}

impl From<&TransactionReceipt> for CustomTransactionReceipt {
    fn from(receipt: &TransactionReceipt) -> Self {
        Self {
            to: receipt.to,
            from: receipt.from,
            contract_address: receipt.contract_address,
            transaction_index: receipt.transaction_index,
            gas_used: decimal(receipt.gas_used),
            cumulative_gas_used: decimal(receipt.cumulative_gas_used),
            effective_gas_price: receipt.effective_gas_price.map(decimal),
            block_hash: receipt.block_hash,
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            confirmations: receipt.confirmations,
            status: receipt.status,
        }
    }
}

impl From<&TransactionResponse> for CustomTransactionResponse {
    fn from(response: &TransactionResponse) -> Self {
        let tx = &response.transaction;
        Self {
            hash: tx.hash,
            from: tx.from,
            to: tx.to,
            nonce: tx.nonce,
            chain_id: tx.chain_id,
            data: tx.data.clone(),
            value: decimal(tx.value),
            gas_limit: decimal(tx.gas_limit.unwrap_or_default()),
            gas_price: tx.gas_price.map(decimal),
            max_fee_per_gas: tx.max_fee_per_gas,
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
            block_number: response.block_number,
            block_hash: response.block_hash,
            timestamp: response.timestamp,
            confirmations: response.confirmations,
        }
    }
}
