//! Swap connector for Uniswap v3. Quotes come from the Quoter contract across
//! the configured fee tiers; swaps go through the SwapRouter as single-pool
//! exact-input or exact-output calls.

use super::abi::{IQuoter, ISwapRouter, IUniswapV3Factory};
use super::{
    execution_failure, now, slippage, trade_deadline, TokenRegistry, TokenSource,
    TradeExecution, Uniswapish,
};
use crate::chains::{EthereumBase, Wallet};
use crate::config::{ConnectorConfig, ConnectorContracts, NetworkConfig};
use crate::error::ConnectorError;
use crate::logs::{LogDecoder, V3LogDecoder};
use crate::math::{self, Fraction};
use crate::transactions::Transaction;
use crate::types::{
    CurrencyAmount, ExpectedTrade, Protocol, Route, Token, Tokenish, Trade, TradeType,
    UniswapishAmount, UniswapishTrade,
};
use alloy::primitives::aliases::{U160, U24};
use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use alloy::transports::TransportError;
use async_trait::async_trait;
use eyre::Result;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct V3Connector {
    chain: Arc<dyn EthereumBase>,
    config: ConnectorConfig,
    contracts: ConnectorContracts,
    quoter: Address,
    tokens: TokenRegistry,
}

struct Quote {
    fee: u32,
    amount: U256,
}

impl V3Connector {
    pub fn new(
        chain: Arc<dyn EthereumBase>,
        network: &NetworkConfig,
        config: ConnectorConfig,
        contracts: ConnectorContracts,
    ) -> Result<Self> {
        let source = TokenSource::List(network.token_list.clone());
        Self::with_source(chain, network.chain_id, config, contracts, source)
    }

    pub(crate) fn with_source(
        chain: Arc<dyn EthereumBase>,
        chain_id: u64,
        config: ConnectorConfig,
        contracts: ConnectorContracts,
        source: TokenSource,
    ) -> Result<Self> {
        let quoter = contracts
            .quoter
            .ok_or_else(|| eyre::eyre!("connector {} has no quoter configured", config.name))?;
        if let Some(fee) = config
            .fee_tiers
            .iter()
            .copied()
            .find(|fee| math::tick_spacing(*fee).is_none())
        {
            return Err(ConnectorError::InvalidFeeTier(fee).into());
        }
        Ok(Self {
            tokens: TokenRegistry::new(Protocol::UniswapV3, chain_id, source),
            chain,
            config,
            contracts,
            quoter,
        })
    }

    /// Quotes every fee tier concurrently. Tiers without a pool revert in the
    /// Quoter and are skipped. Any other failure is returned when no tier
    /// produced a quote.
    async fn quote_tiers(
        &self,
        trade_type: TradeType,
        token_in: &Token,
        token_out: &Token,
        amount: U256,
    ) -> Result<Vec<Quote>> {
        let quotes = self.config.fee_tiers.iter().map(|&fee| {
            let data = match trade_type {
                TradeType::ExactInput => IQuoter::quoteExactInputSingleCall {
                    tokenIn: token_in.address,
                    tokenOut: token_out.address,
                    fee: U24::from(fee),
                    amountIn: amount,
                    sqrtPriceLimitX96: U160::ZERO,
                }
                .abi_encode(),
                TradeType::ExactOutput => IQuoter::quoteExactOutputSingleCall {
                    tokenIn: token_in.address,
                    tokenOut: token_out.address,
                    fee: U24::from(fee),
                    amountOut: amount,
                    sqrtPriceLimitX96: U160::ZERO,
                }
                .abi_encode(),
            };
            async move {
                let out = self.chain.call(self.quoter, data.into(), None).await?;
                let amount = match trade_type {
                    TradeType::ExactInput => {
                        IQuoter::quoteExactInputSingleCall::abi_decode_returns(&out, true)?.amountOut
                    }
                    TradeType::ExactOutput => {
                        IQuoter::quoteExactOutputSingleCall::abi_decode_returns(&out, true)?.amountIn
                    }
                };
                Ok::<_, eyre::Report>(Quote { fee, amount })
            }
        });

        let mut found = Vec::new();
        let mut failure = None;
        for quote in join_all(quotes).await {
            match quote {
                Ok(q) if !q.amount.is_zero() => found.push(q),
                Ok(_) => {}
                Err(e) if is_revert(&e) => debug!("Skipping fee tier: {:#}", e),
                Err(e) => {
                    warn!("Quoting fee tier failed: {:#}", e);
                    failure = Some(e);
                }
            }
        }
        match failure {
            Some(e) if found.is_empty() => Err(e),
            _ => Ok(found),
        }
    }

    async fn pool(&self, token_a: Address, token_b: Address, fee: u32) -> Result<Address> {
        let data = IUniswapV3Factory::getPoolCall {
            tokenA: token_a,
            tokenB: token_b,
            fee: U24::from(fee),
        }
        .abi_encode();
        let out = self.chain.call(self.contracts.factory, data.into(), None).await?;
        Ok(IUniswapV3Factory::getPoolCall::abi_decode_returns(&out, true)?.pool)
    }

    async fn build_trade(
        &self,
        trade_type: TradeType,
        fee: u32,
        input: CurrencyAmount,
        output: CurrencyAmount,
    ) -> Result<UniswapishTrade> {
        let pool = self
            .pool(input.token.address, output.token.address, fee)
            .await?;
        let execution_price = Fraction::new(output.raw, input.raw)
            .ok_or_else(|| ConnectorError::InvalidAmount("zero input amount".to_string()))?;
        let trade = Trade {
            trade_type,
            route: Route {
                path: vec![input.token.address, output.token.address],
                pools: vec![pool],
                fees: vec![fee],
            },
            input_amount: input,
            output_amount: output,
            execution_price,
            quoted_at: now(),
        };
        Ok(UniswapishTrade::UniswapV3(trade))
    }
}

/// Whether a failed call reached the contract and reverted, as opposed to
/// never getting an answer from the node.
fn is_revert(err: &eyre::Report) -> bool {
    match err.downcast_ref::<TransportError>() {
        Some(e) => e.as_error_resp().is_some(),
        None => format!("{err:#}").contains("revert"),
    }
}

#[async_trait]
impl Uniswapish for V3Connector {
    fn protocol(&self) -> Protocol {
        Protocol::UniswapV3
    }

    fn router(&self) -> Address {
        self.contracts.router
    }

    fn gas_limit(&self) -> u64 {
        self.config.gas_limit
    }

    fn ttl(&self) -> u64 {
        self.config.ttl
    }

    fn log_decoder(&self) -> Option<&dyn LogDecoder> {
        Some(&V3LogDecoder)
    }

    async fn init(&self) -> Result<()> {
        self.tokens.init(&self.chain).await
    }

    fn ready(&self) -> bool {
        self.tokens.ready()
    }

    fn get_token_by_address(&self, address: Address) -> Result<Tokenish> {
        self.tokens.get(address)
    }

    async fn estimate_sell_trade(
        &self,
        base_token: &Tokenish,
        quote_token: &Tokenish,
        amount: U256,
        allowed_slippage: Option<&str>,
    ) -> Result<ExpectedTrade> {
        let base = self.tokens.check(base_token)?;
        let quote = self.tokens.check(quote_token)?;
        let slippage = slippage(&self.config.allowed_slippage, allowed_slippage)?;
        if amount.is_zero() {
            return Err(ConnectorError::InvalidAmount("sell amount is zero".to_string()).into());
        }
        info!(
            "Fetching v3 quotes for {}-{} across {} fee tiers",
            base.symbol,
            quote.symbol,
            self.config.fee_tiers.len()
        );

        let best = self
            .quote_tiers(TradeType::ExactInput, &base, &quote, amount)
            .await?
            .into_iter()
            .max_by_key(|q| q.amount)
            .ok_or(ConnectorError::NoRoute {
                base: base.address,
                quote: quote.address,
            })?;

        let trade = self
            .build_trade(
                TradeType::ExactInput,
                best.fee,
                CurrencyAmount::new(base, amount),
                CurrencyAmount::new(quote.clone(), best.amount),
            )
            .await?;
        let minimum = trade
            .trade()
            .minimum_amount_out(&slippage)
            .ok_or_else(|| ConnectorError::InvalidSlippage(slippage.to_string()))?;
        info!(
            "Best trade uses fee tier {}: {} {}",
            best.fee,
            trade.trade().output_amount.to_exact(),
            quote.symbol
        );

        Ok(ExpectedTrade {
            expected_amount: UniswapishAmount::UniswapCore(CurrencyAmount::new(quote, minimum)),
            trade,
        })
    }

    async fn estimate_buy_trade(
        &self,
        quote_token: &Tokenish,
        base_token: &Tokenish,
        amount: U256,
        allowed_slippage: Option<&str>,
    ) -> Result<ExpectedTrade> {
        let quote = self.tokens.check(quote_token)?;
        let base = self.tokens.check(base_token)?;
        let slippage = slippage(&self.config.allowed_slippage, allowed_slippage)?;
        if amount.is_zero() {
            return Err(ConnectorError::InvalidAmount("buy amount is zero".to_string()).into());
        }
        info!(
            "Fetching v3 quotes for {}-{} across {} fee tiers",
            quote.symbol,
            base.symbol,
            self.config.fee_tiers.len()
        );

        let best = self
            .quote_tiers(TradeType::ExactOutput, &quote, &base, amount)
            .await?
            .into_iter()
            .min_by_key(|q| q.amount)
            .ok_or(ConnectorError::NoRoute {
                base: base.address,
                quote: quote.address,
            })?;

        let trade = self
            .build_trade(
                TradeType::ExactOutput,
                best.fee,
                CurrencyAmount::new(quote.clone(), best.amount),
                CurrencyAmount::new(base, amount),
            )
            .await?;
        let maximum = trade
            .trade()
            .maximum_amount_in(&slippage)
            .ok_or_else(|| ConnectorError::InvalidSlippage(slippage.to_string()))?;
        info!(
            "Best trade uses fee tier {}: {} {}",
            best.fee,
            trade.trade().input_amount.to_exact(),
            quote.symbol
        );

        Ok(ExpectedTrade {
            expected_amount: UniswapishAmount::UniswapCore(CurrencyAmount::new(quote, maximum)),
            trade,
        })
    }

    async fn execute_trade(
        &self,
        wallet: &Wallet,
        trade: &UniswapishTrade,
        execution: TradeExecution,
    ) -> Result<Transaction> {
        let trade = trade.expect_protocol(Protocol::UniswapV3)?;
        let deadline = trade_deadline(trade.quoted_at, execution.ttl)?;
        let slippage = slippage(
            &self.config.allowed_slippage,
            execution.allowed_slippage.as_deref(),
        )?;
        let fee = trade
            .route
            .fees
            .first()
            .copied()
            .ok_or_else(|| eyre::eyre!("v3 trade carries no fee tier"))?;
        let recipient = wallet.address();
        let token_in = trade.input_amount.token.address;
        let token_out = trade.output_amount.token.address;

        let data = match trade.trade_type {
            TradeType::ExactInput => ISwapRouter::exactInputSingleCall {
                params: ISwapRouter::ExactInputSingleParams {
                    tokenIn: token_in,
                    tokenOut: token_out,
                    fee: U24::from(fee),
                    recipient,
                    deadline,
                    amountIn: trade.input_amount.raw,
                    amountOutMinimum: trade
                        .minimum_amount_out(&slippage)
                        .ok_or_else(|| ConnectorError::InvalidSlippage(slippage.to_string()))?,
                    sqrtPriceLimitX96: U160::ZERO,
                },
            }
            .abi_encode(),
            TradeType::ExactOutput => ISwapRouter::exactOutputSingleCall {
                params: ISwapRouter::ExactOutputSingleParams {
                    tokenIn: token_in,
                    tokenOut: token_out,
                    fee: U24::from(fee),
                    recipient,
                    deadline,
                    amountOut: trade.output_amount.raw,
                    amountInMaximum: trade
                        .maximum_amount_in(&slippage)
                        .ok_or_else(|| ConnectorError::InvalidSlippage(slippage.to_string()))?,
                    sqrtPriceLimitX96: U160::ZERO,
                },
            }
            .abi_encode(),
        };

        let mut request = execution.tx.request(execution.router, data);
        if request.gas_limit == 0 {
            request.gas_limit = self.config.gas_limit;
        }
        info!(
            "Swapping {} {} for {} {} on UniswapV3 fee tier {}",
            trade.input_amount.to_exact(),
            trade.input_amount.token.symbol,
            trade.output_amount.to_exact(),
            trade.output_amount.token.symbol,
            fee
        );
        self.chain
            .send_transaction(wallet, request)
            .await
            .map_err(execution_failure)
    }
}
