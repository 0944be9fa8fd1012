//! In-memory chain for tests. Contract reads are answered by handlers keyed on
//! `(contract, selector)`; sent transactions are recorded and never mined.

use super::{EthereumBase, Ethereumish, TxRequest, Wallet};
use crate::transactions::Transaction;
use alloy::primitives::{address, keccak256, Address, Bytes, U256};
use async_trait::async_trait;
use eyre::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type CallHandler = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

pub(crate) struct MockChain {
    chain_id: u64,
    gas_price: Mutex<u128>,
    handlers: Mutex<HashMap<(Address, [u8; 4]), CallHandler>>,
    nonces: Mutex<HashMap<Address, u64>>,
    sent: Mutex<Vec<TxRequest>>,
    calls: Mutex<Vec<(Address, Option<Address>)>>,
}

pub(crate) const UNISWAP_SPENDER: Address = address!("5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e");

impl MockChain {
    pub(crate) fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            gas_price: Mutex::new(1_000_000_000),
            handlers: Mutex::new(HashMap::new()),
            nonces: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_gas_price(&self, wei: u128) {
        *self.gas_price.lock().unwrap() = wei;
    }

    /// Registers a handler for calls to `to` whose calldata starts with
    /// `selector`. The handler receives the full calldata.
    pub(crate) fn on_call<F>(&self, to: Address, selector: [u8; 4], handler: F)
    where
        F: Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert((to, selector), Arc::new(handler));
    }

    pub(crate) fn sent(&self) -> Vec<TxRequest> {
        self.sent.lock().unwrap().clone()
    }

    /// `(to, from)` of every `eth_call` so far.
    pub(crate) fn calls(&self) -> Vec<(Address, Option<Address>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EthereumBase for MockChain {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn call(&self, to: Address, data: Bytes, from: Option<Address>) -> Result<Bytes> {
        self.calls.lock().unwrap().push((to, from));
        if data.len() < 4 {
            return Err(eyre::eyre!("calldata too short"));
        }
        let selector = [data[0], data[1], data[2], data[3]];
        let handler = self
            .handlers
            .lock()
            .unwrap()
            .get(&(to, selector))
            .cloned()
            .ok_or_else(|| eyre::eyre!("execution reverted: no handler for {:?}", to))?;
        Ok(handler(&data)?.into())
    }

    async fn send_transaction(&self, wallet: &Wallet, request: TxRequest) -> Result<Transaction> {
        let from = wallet.address();
        let nonce = match request.nonce {
            Some(n) => n,
            None => {
                let mut nonces = self.nonces.lock().unwrap();
                let next = nonces.entry(from).or_insert(0);
                let n = *next;
                *next += 1;
                n
            }
        };
        let mut sent = self.sent.lock().unwrap();
        let hash = keccak256([from.as_slice(), &nonce.to_be_bytes(), &sent.len().to_be_bytes()].concat());
        let tx = Transaction {
            hash: Some(hash),
            from: Some(from),
            to: Some(request.to),
            nonce,
            chain_id: self.chain_id,
            data: request.data.clone(),
            value: request.value,
            gas_limit: Some(U256::from(request.gas_limit)),
            gas_price: request.gas_price.map(U256::from),
            max_fee_per_gas: request.max_fee_per_gas.map(U256::from),
            max_priority_fee_per_gas: request.max_priority_fee_per_gas.map(U256::from),
            tx_type: Some(if request.is_eip1559() { 2 } else { 0 }),
        };
        sent.push(request);
        Ok(tx)
    }

    async fn nonce(&self, address: Address) -> Result<u64> {
        Ok(self.nonces.lock().unwrap().get(&address).copied().unwrap_or(0))
    }

    async fn current_gas_price(&self) -> Result<u128> {
        Ok(*self.gas_price.lock().unwrap())
    }
}

#[async_trait]
impl Ethereumish for MockChain {
    fn gas_price(&self) -> f64 {
        *self.gas_price.lock().unwrap() as f64 / 1e9
    }

    fn native_token_symbol(&self) -> &str {
        "ETH"
    }

    fn chain(&self) -> &str {
        "ethereum"
    }

    fn get_spender(&self, req_spender: &str) -> Result<Address> {
        match req_spender {
            "uniswap" => Ok(UNISWAP_SPENDER),
            other => Ok(other.parse()?),
        }
    }
}
