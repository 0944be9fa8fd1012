//! Swap connector for the Uniswap v2 family. Uniswap, Pangolin, Sushiswap and
//! Traderjoe share the pair/router ABI and differ only in addresses, fee and
//! the SDK tag of the values they produce.

use super::abi::{IUniswapV2Factory, IUniswapV2Pair, IUniswapV2Router02};
use super::{
    execution_failure, now, slippage, trade_deadline, TokenRegistry, TokenSource,
    TradeExecution, Uniswapish,
};
use crate::chains::{EthereumBase, Wallet};
use crate::config::{ConnectorConfig, ConnectorContracts, NetworkConfig};
use crate::error::ConnectorError;
use crate::logs::{LogDecoder, V2LogDecoder};
use crate::math::{self, Fraction};
use crate::transactions::Transaction;
use crate::types::{
    CurrencyAmount, ExpectedTrade, Protocol, Route, Token, Tokenish, Trade, TradeType,
    UniswapishAmount, UniswapishTrade,
};
use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};

pub struct V2Connector {
    chain: Arc<dyn EthereumBase>,
    config: ConnectorConfig,
    contracts: ConnectorContracts,
    tokens: TokenRegistry,
}

/// Reserves of a pair, oriented along a swap.
struct Reserves {
    pair: Address,
    reserve_in: U256,
    reserve_out: U256,
}

impl V2Connector {
    /// Connector for `config` on `network`; tokens come from the network's
    /// token list at `init`.
    pub fn new(
        chain: Arc<dyn EthereumBase>,
        network: &NetworkConfig,
        config: ConnectorConfig,
        contracts: ConnectorContracts,
    ) -> Self {
        let source = TokenSource::List(network.token_list.clone());
        Self::with_source(chain, network.chain_id, config, contracts, source)
    }

    pub(crate) fn with_source(
        chain: Arc<dyn EthereumBase>,
        chain_id: u64,
        config: ConnectorConfig,
        contracts: ConnectorContracts,
        source: TokenSource,
    ) -> Self {
        Self {
            tokens: TokenRegistry::new(config.protocol, chain_id, source),
            chain,
            config,
            contracts,
        }
    }

    async fn reserves(&self, token_in: &Token, token_out: &Token) -> Result<Reserves> {
        let data = IUniswapV2Factory::getPairCall {
            tokenA: token_in.address,
            tokenB: token_out.address,
        }
        .abi_encode();
        let out = self
            .chain
            .call(self.contracts.factory, data.into(), None)
            .await?;
        let pair = IUniswapV2Factory::getPairCall::abi_decode_returns(&out, true)?.pair;
        if pair == Address::ZERO {
            return Err(ConnectorError::NoRoute {
                base: token_in.address,
                quote: token_out.address,
            }
            .into());
        }

        let out = self
            .chain
            .call(pair, IUniswapV2Pair::token0Call {}.abi_encode().into(), None)
            .await?;
        let token0 = IUniswapV2Pair::token0Call::abi_decode_returns(&out, true)?.token;

        let out = self
            .chain
            .call(pair, IUniswapV2Pair::getReservesCall {}.abi_encode().into(), None)
            .await?;
        let reserves = IUniswapV2Pair::getReservesCall::abi_decode_returns(&out, true)?;
        let (reserve0, reserve1) = (U256::from(reserves.reserve0), U256::from(reserves.reserve1));
        debug!(
            "{} pair {:?} reserves {} / {}",
            self.config.protocol, pair, reserve0, reserve1
        );

        let (reserve_in, reserve_out) = if token0 == token_in.address {
            (reserve0, reserve1)
        } else {
            (reserve1, reserve0)
        };
        Ok(Reserves {
            pair,
            reserve_in,
            reserve_out,
        })
    }

    fn build_trade(
        &self,
        trade_type: TradeType,
        pair: Address,
        input: CurrencyAmount,
        output: CurrencyAmount,
    ) -> Result<UniswapishTrade> {
        let execution_price = Fraction::new(output.raw, input.raw)
            .ok_or_else(|| ConnectorError::InvalidAmount("zero input amount".to_string()))?;
        let trade = Trade {
            trade_type,
            route: Route {
                path: vec![input.token.address, output.token.address],
                pools: vec![pair],
                fees: vec![],
            },
            input_amount: input,
            output_amount: output,
            execution_price,
            quoted_at: now(),
        };
        Ok(UniswapishTrade::for_protocol(self.config.protocol, trade))
    }
}

#[async_trait]
impl Uniswapish for V2Connector {
    fn protocol(&self) -> Protocol {
        self.config.protocol
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
        Some(&V2LogDecoder)
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
            "Fetching {} pair info for {}-{}",
            self.config.protocol, base.symbol, quote.symbol
        );

        let reserves = self.reserves(&base, &quote).await?;
        let amount_out = math::get_amount_out(
            amount,
            reserves.reserve_in,
            reserves.reserve_out,
            self.config.fee_bps,
        )
        .filter(|out| !out.is_zero())
        .ok_or(ConnectorError::InsufficientLiquidity {
            base: base.address,
            quote: quote.address,
        })?;

        let trade = self.build_trade(
            TradeType::ExactInput,
            reserves.pair,
            CurrencyAmount::new(base, amount),
            CurrencyAmount::new(quote.clone(), amount_out),
        )?;
        let minimum = trade
            .trade()
            .minimum_amount_out(&slippage)
            .ok_or_else(|| ConnectorError::InvalidSlippage(slippage.to_string()))?;
        info!(
            "Best trade for {}-{}: {} {}",
            trade.trade().input_amount.token.symbol,
            quote.symbol,
            trade.trade().output_amount.to_exact(),
            quote.symbol
        );

        Ok(ExpectedTrade {
            expected_amount: UniswapishAmount::for_protocol(
                self.config.protocol,
                CurrencyAmount::new(quote, minimum),
            ),
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
            "Fetching {} pair info for {}-{}",
            self.config.protocol, quote.symbol, base.symbol
        );

        let reserves = self.reserves(&quote, &base).await?;
        let amount_in = math::get_amount_in(
            amount,
            reserves.reserve_in,
            reserves.reserve_out,
            self.config.fee_bps,
        )
        .ok_or(ConnectorError::InsufficientLiquidity {
            base: base.address,
            quote: quote.address,
        })?;

        let trade = self.build_trade(
            TradeType::ExactOutput,
            reserves.pair,
            CurrencyAmount::new(quote.clone(), amount_in),
            CurrencyAmount::new(base, amount),
        )?;
        let maximum = trade
            .trade()
            .maximum_amount_in(&slippage)
            .ok_or_else(|| ConnectorError::InvalidSlippage(slippage.to_string()))?;
        info!(
            "Best trade for {}-{}: {} {}",
            quote.symbol,
            trade.trade().output_amount.token.symbol,
            trade.trade().input_amount.to_exact(),
            quote.symbol
        );

        Ok(ExpectedTrade {
            expected_amount: UniswapishAmount::for_protocol(
                self.config.protocol,
                CurrencyAmount::new(quote, maximum),
            ),
            trade,
        })
    }

    async fn execute_trade(
        &self,
        wallet: &Wallet,
        trade: &UniswapishTrade,
        execution: TradeExecution,
    ) -> Result<Transaction> {
        let trade = trade.expect_protocol(self.config.protocol)?;
        let deadline = trade_deadline(trade.quoted_at, execution.ttl)?;
        let slippage = slippage(
            &self.config.allowed_slippage,
            execution.allowed_slippage.as_deref(),
        )?;
        let to = wallet.address();
        let path = trade.route.path.clone();

        let data = match trade.trade_type {
            TradeType::ExactInput => IUniswapV2Router02::swapExactTokensForTokensCall {
                amountIn: trade.input_amount.raw,
                amountOutMin: trade
                    .minimum_amount_out(&slippage)
                    .ok_or_else(|| ConnectorError::InvalidSlippage(slippage.to_string()))?,
                path,
                to,
                deadline,
            }
            .abi_encode(),
            TradeType::ExactOutput => IUniswapV2Router02::swapTokensForExactTokensCall {
                amountOut: trade.output_amount.raw,
                amountInMax: trade
                    .maximum_amount_in(&slippage)
                    .ok_or_else(|| ConnectorError::InvalidSlippage(slippage.to_string()))?,
                path,
                to,
                deadline,
            }
            .abi_encode(),
        };

        let mut request = execution.tx.request(execution.router, data);
        if request.gas_limit == 0 {
            request.gas_limit = self.config.gas_limit;
        }
        info!(
            "Swapping {} {} for {} {} on {} (deadline {})",
            trade.input_amount.to_exact(),
            trade.input_amount.token.symbol,
            trade.output_amount.to_exact(),
            trade.output_amount.token.symbol,
            self.config.protocol,
            deadline
        );
        self.chain
            .send_transaction(wallet, request)
            .await
            .map_err(execution_failure)
    }
}
