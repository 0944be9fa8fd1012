//! Uniform contracts over Uniswap-like DEX connectors.
//!
//! [`Uniswapish`] covers swap-style AMMs (estimate, then execute a trade);
//! [`UniswapLPish`] covers concentrated-liquidity position management. Both
//! are object safe and shared as `Arc<dyn _>` by the gateway handlers.

pub mod abi;
pub mod lp;
pub mod v2;
pub mod v3;

use crate::chains::{gwei_to_wei, EthereumBase, TxRequest, Wallet};
use crate::error::ConnectorError;
use crate::logs::LogDecoder;
use crate::math::{self, Fraction};
use crate::transactions::Transaction;
use crate::types::{
    CollectedFees, ExpectedTrade, PositionInfo, Protocol, Token, Tokenish, UniswapishTrade,
};
use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use eyre::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

pub use lp::V3LpConnector;
pub use v2::V2Connector;
pub use v3::V3Connector;

/// Optional trailing transaction fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    pub nonce: Option<u64>,
    /// Wei.
    pub max_fee_per_gas: Option<u128>,
    /// Wei.
    pub max_priority_fee_per_gas: Option<u128>,
}

/// Gas settings shared by LP transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TxParams {
    pub gas_limit: u64,
    /// Gwei, used when no EIP-1559 fee is given.
    pub gas_price: f64,
    pub options: TxOptions,
}

impl TxParams {
    pub(crate) fn request(&self, to: Address, data: Vec<u8>) -> TxRequest {
        let eip1559 = self.options.max_fee_per_gas.is_some()
            || self.options.max_priority_fee_per_gas.is_some();
        TxRequest {
            to,
            data: Bytes::from(data),
            value: U256::ZERO,
            gas_limit: self.gas_limit,
            gas_price: (!eip1559).then(|| gwei_to_wei(self.gas_price)),
            nonce: self.options.nonce,
            max_fee_per_gas: self.options.max_fee_per_gas,
            max_priority_fee_per_gas: self.options.max_priority_fee_per_gas,
        }
    }
}

/// Everything `execute_trade` needs besides the wallet and the trade.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeExecution {
    /// Router the swap is sent to.
    pub router: Address,
    /// Seconds the trade stays valid, counted from the quote.
    pub ttl: u64,
    pub tx: TxParams,
    /// Overrides the connector default, e.g. `"1/100"`.
    pub allowed_slippage: Option<String>,
}

/// Arguments of `UniswapLPish::add_position`.
#[derive(Debug, Clone, PartialEq)]
pub struct AddPosition {
    pub token0: Tokenish,
    pub token1: Tokenish,
    /// Whole-token decimal amount of `token0`.
    pub amount0: String,
    pub amount1: String,
    pub fee: u32,
    /// Price of token1 per token0.
    pub lower_price: f64,
    pub upper_price: f64,
    /// Existing position to increase; `None` mints a new one.
    pub token_id: Option<u64>,
    pub tx: TxParams,
}

#[async_trait]
pub trait Uniswapish: Send + Sync {
    fn protocol(&self) -> Protocol;

    fn router(&self) -> Address;

    /// Default gas limit for swap transactions.
    fn gas_limit(&self) -> u64;

    /// Default time-to-live for swap transactions, in seconds.
    fn ttl(&self) -> u64;

    fn log_decoder(&self) -> Option<&dyn LogDecoder>;

    async fn init(&self) -> Result<()>;

    fn ready(&self) -> bool;

    /// The connector's representation of the token at `address`.
    fn get_token_by_address(&self, address: Address) -> Result<Tokenish>;

    /// Given the amount of `base_token` put into a swap, the amount of
    /// `quote_token` that can be expected out. Used for sell prices.
    async fn estimate_sell_trade(
        &self,
        base_token: &Tokenish,
        quote_token: &Tokenish,
        amount: U256,
        allowed_slippage: Option<&str>,
    ) -> Result<ExpectedTrade>;

    /// Given the amount of `base_token` wanted out of a swap, the amount of
    /// `quote_token` that must go in. Used for buy prices.
    async fn estimate_buy_trade(
        &self,
        quote_token: &Tokenish,
        base_token: &Tokenish,
        amount: U256,
        allowed_slippage: Option<&str>,
    ) -> Result<ExpectedTrade>;

    /// Signs and broadcasts a previously estimated trade. Returns the
    /// submitted transaction; it may still be pending.
    async fn execute_trade(
        &self,
        wallet: &Wallet,
        trade: &UniswapishTrade,
        execution: TradeExecution,
    ) -> Result<Transaction>;
}

#[async_trait]
pub trait UniswapLPish: Send + Sync {
    fn router(&self) -> Address;

    fn nft_manager(&self) -> Address;

    fn gas_limit(&self) -> u64;

    fn ttl(&self) -> u64;

    fn log_decoder(&self) -> &dyn LogDecoder;

    async fn init(&self) -> Result<()>;

    fn ready(&self) -> bool;

    fn get_token_by_address(&self, address: Address) -> Result<Tokenish>;

    async fn get_position(&self, token_id: u64) -> Result<PositionInfo>;

    async fn add_position(&self, wallet: &Wallet, request: AddPosition) -> Result<Transaction>;

    /// Removes `decrease_percent` (0, 100] of the position's liquidity and
    /// collects the released tokens. At 100 the position NFT is burned.
    async fn reduce_position(
        &self,
        wallet: &Wallet,
        token_id: u64,
        decrease_percent: f64,
        tx: TxParams,
    ) -> Result<Transaction>;

    /// Sends a transaction collecting all fees owed to the position.
    async fn collect_fees(&self, wallet: &Wallet, token_id: u64, tx: TxParams) -> Result<Transaction>;

    /// Fees owed to the position, resolved by a static call as `wallet`.
    async fn collectable_fees(&self, wallet: &Wallet, token_id: u64) -> Result<CollectedFees>;

    /// Time-weighted prices of token1 per token0, one per `interval` seconds
    /// over the last `period` seconds, oldest first.
    async fn pool_price(
        &self,
        token0: &Tokenish,
        token1: &Tokenish,
        fee: u32,
        period: u32,
        interval: u32,
    ) -> Result<Vec<String>>;
}

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// On-chain deadline `ttl` seconds from now.
pub(crate) fn deadline(ttl: u64) -> U256 {
    U256::from((now().max(0) as u64).saturating_add(ttl))
}

/// On-chain deadline of a quoted trade: the end of its validity window,
/// `quoted_at + ttl`. Fails if that moment has already passed.
pub(crate) fn trade_deadline(quoted_at: i64, ttl: u64) -> Result<U256, ConnectorError> {
    let expired_at = quoted_at.saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX));
    let now = now();
    if now > expired_at {
        return Err(ConnectorError::TradeExpired { expired_at, now });
    }
    Ok(U256::from(expired_at.max(0) as u64))
}

pub(crate) fn execution_failure(err: eyre::Report) -> eyre::Report {
    warn!("Transaction failed: {:?}", err);
    ConnectorError::Execution(format!("{err:#}")).into()
}

/// Token list and chain check shared by every connector's `init`.
pub(crate) struct TokenRegistry {
    protocol: Protocol,
    chain_id: u64,
    source: TokenSource,
    tokens: OnceCell<HashMap<Address, Token>>,
}

pub(crate) enum TokenSource {
    #[cfg(test)]
    Loaded(Vec<Token>),
    List(crate::config::TokenListSource),
}

impl TokenRegistry {
    pub(crate) fn new(protocol: Protocol, chain_id: u64, source: TokenSource) -> Self {
        Self {
            protocol,
            chain_id,
            source,
            tokens: OnceCell::new(),
        }
    }

    pub(crate) async fn init(&self, chain: &Arc<dyn EthereumBase>) -> Result<()> {
        self.tokens
            .get_or_try_init(|| async {
                let remote = chain.chain_id().await?;
                if remote != self.chain_id {
                    return Err(eyre::eyre!(
                        "node reports chain id {} but {} is configured for {}",
                        remote,
                        self.protocol,
                        self.chain_id
                    ));
                }
                let list = match &self.source {
                    #[cfg(test)]
                    TokenSource::Loaded(tokens) => tokens.clone(),
                    TokenSource::List(source) => {
                        crate::config::load_token_list(source, self.chain_id).await?
                    }
                };
                info!("{} loaded {} tokens for chain {}", self.protocol, list.len(), self.chain_id);
                Ok(list
                    .into_iter()
                    .filter(|t| t.chain_id == self.chain_id)
                    .map(|t| (t.address, t))
                    .collect())
            })
            .await?;
        Ok(())
    }

    pub(crate) fn ready(&self) -> bool {
        self.tokens.initialized()
    }

    pub(crate) fn get(&self, address: Address) -> Result<Tokenish> {
        let tokens = self.tokens.get().ok_or(ConnectorError::NotReady)?;
        let token = tokens
            .get(&address)
            .cloned()
            .ok_or(ConnectorError::UnknownToken(address))?;
        Ok(Tokenish::for_protocol(self.protocol, token))
    }

    /// Checks readiness, the protocol tag and list membership of a token.
    pub(crate) fn check(&self, token: &Tokenish) -> Result<Token> {
        let inner = token.expect_protocol(self.protocol)?;
        self.get(inner.address)?;
        Ok(inner.clone())
    }
}

/// Connector default slippage unless the caller overrides it.
pub(crate) fn slippage(default: &str, requested: Option<&str>) -> Result<Fraction, ConnectorError> {
    math::parse_slippage(requested.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_params_prefers_eip1559() {
        let legacy = TxParams {
            gas_limit: 100_000,
            gas_price: 30.0,
            options: TxOptions::default(),
        }
        .request(Address::ZERO, vec![1, 2, 3]);
        assert_eq!(legacy.gas_price, Some(30_000_000_000));
        assert!(!legacy.is_eip1559());

        let eip1559 = TxParams {
            gas_limit: 100_000,
            gas_price: 30.0,
            options: TxOptions {
                nonce: Some(4),
                max_fee_per_gas: Some(50_000_000_000),
                max_priority_fee_per_gas: Some(2_000_000_000),
            },
        }
        .request(Address::ZERO, vec![]);
        assert_eq!(eip1559.gas_price, None);
        assert_eq!(eip1559.nonce, Some(4));
        assert!(eip1559.is_eip1559());
    }

    #[test]
    fn test_trade_deadline_ends_with_quote_validity() {
        let quoted_at = now() - 50;
        assert_eq!(
            trade_deadline(quoted_at, 60).unwrap(),
            U256::from((quoted_at + 60) as u64)
        );
        let err = trade_deadline(now() - 120, 60).unwrap_err();
        assert!(err.is_execution_failure());
    }

    #[test]
    fn test_trade_deadline_saturates_huge_ttl() {
        let deadline = trade_deadline(now(), u64::MAX).unwrap();
        assert_eq!(deadline, U256::from(i64::MAX as u64));
    }

    #[test]
    fn test_slippage_override() {
        let s = slippage("1/100", Some("5/1000")).unwrap();
        assert_eq!(s.denominator, U256::from(1000));
        assert!(slippage("1/100", Some("bad")).is_err());
        assert_eq!(slippage("1/100", None).unwrap().numerator, U256::from(1));
    }
}
