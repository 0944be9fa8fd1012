pub mod ethereum;
#[cfg(test)]
pub(crate) mod mock;

use crate::connectors::abi::IERC20;
use crate::transactions::Transaction;
use alloy::primitives::{Address, Bytes, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use eyre::Result;
use tracing::info;

pub use ethereum::EvmChain;

pub type Wallet = PrivateKeySigner;

/// Converts a gwei amount as configured by operators into wei.
pub fn gwei_to_wei(gwei: f64) -> u128 {
    (gwei * 1e9).round().max(0.0) as u128
}

/// An unsigned transaction for `EthereumBase::send_transaction`. Unset fields
/// are filled by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxRequest {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: Option<u128>,
    pub nonce: Option<u64>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

impl TxRequest {
    pub fn is_eip1559(&self) -> bool {
        self.max_fee_per_gas.is_some() || self.max_priority_fee_per_gas.is_some()
    }
}

/// Base EVM client the connectors are written against.
#[async_trait]
pub trait EthereumBase: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    /// `eth_call` against `to`, optionally as `from`.
    async fn call(&self, to: Address, data: Bytes, from: Option<Address>) -> Result<Bytes>;

    /// Signs `request` with `wallet` and broadcasts it. Returns once the node
    /// accepted the transaction, not once it is mined.
    async fn send_transaction(&self, wallet: &Wallet, request: TxRequest) -> Result<Transaction>;

    /// Next nonce for `address`, including pending transactions.
    async fn nonce(&self, address: Address) -> Result<u64>;

    /// Gas price suggested by the node, in wei.
    async fn current_gas_price(&self) -> Result<u128>;
}

/// Chain-specific operations layered on `EthereumBase`.
#[async_trait]
pub trait Ethereumish: EthereumBase {
    /// Configured gas price in gwei.
    fn gas_price(&self) -> f64;
    fn native_token_symbol(&self) -> &str;
    fn chain(&self) -> &str;

    /// Resolves a connector name (e.g. `uniswap`, `uniswapLP`) to the address
    /// that must be approved, or parses `req_spender` as an address.
    fn get_spender(&self, req_spender: &str) -> Result<Address>;

    fn get_contract(&self, token_address: Address) -> Erc20Contract<'_, Self>
    where
        Self: Sized,
    {
        Erc20Contract {
            address: token_address,
            chain: self,
        }
    }

    /// Replaces the pending transaction at `nonce` with a zero-value transfer
    /// to the wallet itself at twice the node gas price.
    async fn cancel_tx(&self, wallet: &Wallet, nonce: u64) -> Result<Transaction> {
        let gas_price = self.current_gas_price().await?.saturating_mul(2);
        info!(
            "Canceling any existing transaction(s) with nonce number {} at gas price {} wei",
            nonce, gas_price
        );
        self.send_transaction(
            wallet,
            TxRequest {
                to: wallet.address(),
                data: Bytes::new(),
                value: U256::ZERO,
                gas_limit: 21_000,
                gas_price: Some(gas_price),
                nonce: Some(nonce),
                ..Default::default()
            },
        )
        .await
    }
}

/// ERC-20 handle bound to a chain client.
pub struct Erc20Contract<'a, C: EthereumBase + ?Sized> {
    pub address: Address,
    chain: &'a C,
}

impl<'a, C: EthereumBase + ?Sized> Erc20Contract<'a, C> {
    pub fn new(address: Address, chain: &'a C) -> Self {
        Self { address, chain }
    }

    pub async fn balance_of(&self, account: Address) -> Result<U256> {
        let data = IERC20::balanceOfCall { account }.abi_encode();
        let out = self.chain.call(self.address, data.into(), None).await?;
        Ok(IERC20::balanceOfCall::abi_decode_returns(&out, true)?.balance)
    }

    pub async fn allowance(&self, owner: Address, spender: Address) -> Result<U256> {
        let data = IERC20::allowanceCall { owner, spender }.abi_encode();
        let out = self.chain.call(self.address, data.into(), None).await?;
        Ok(IERC20::allowanceCall::abi_decode_returns(&out, true)?.remaining)
    }

    pub async fn decimals(&self) -> Result<u8> {
        let data = IERC20::decimalsCall {}.abi_encode();
        let out = self.chain.call(self.address, data.into(), None).await?;
        Ok(IERC20::decimalsCall::abi_decode_returns(&out, true)?.decimals)
    }

    pub async fn symbol(&self) -> Result<String> {
        let data = IERC20::symbolCall {}.abi_encode();
        let out = self.chain.call(self.address, data.into(), None).await?;
        Ok(IERC20::symbolCall::abi_decode_returns(&out, true)?.symbol)
    }

    pub async fn approve(
        &self,
        wallet: &Wallet,
        spender: Address,
        amount: U256,
        gas_limit: u64,
    ) -> Result<Transaction> {
        info!(
            "Calling approve method for spender {:?} requesting allowance {} from {:?}",
            spender,
            amount,
            wallet.address()
        );
        let data = IERC20::approveCall { spender, amount }.abi_encode();
        self.chain
            .send_transaction(
                wallet,
                TxRequest {
                    to: self.address,
                    data: data.into(),
                    gas_limit,
                    ..Default::default()
                },
            )
            .await
    }
}
