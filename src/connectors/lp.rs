//! Concentrated-liquidity positions on Uniswap v3 through the
//! NonfungiblePositionManager, with pool prices from the pool oracle.

use super::abi::{INonfungiblePositionManager, IUniswapV3Factory, IUniswapV3Pool};
use super::{
    deadline, execution_failure, slippage, AddPosition, TokenRegistry, TokenSource, TxParams,
    UniswapLPish,
};
use crate::chains::{EthereumBase, Wallet};
use crate::config::{ConnectorConfig, ConnectorContracts, NetworkConfig};
use crate::error::ConnectorError;
use crate::logs::{LogDecoder, V3LogDecoder};
use crate::math;
use crate::transactions::Transaction;
use crate::types::{CollectedFees, PositionInfo, Protocol, Token, Tokenish};
use alloy::primitives::aliases::{I24, U24};
use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Decimals used when rendering prices.
const PRICE_DECIMALS: u8 = 8;

pub struct V3LpConnector {
    chain: Arc<dyn EthereumBase>,
    config: ConnectorConfig,
    contracts: ConnectorContracts,
    nft_manager: Address,
    tokens: TokenRegistry,
}

/// Position fields read from the manager.
struct Position {
    token0: Address,
    token1: Address,
    fee: u32,
    tick_lower: i32,
    tick_upper: i32,
    liquidity: u128,
}

fn to_i24(tick: i32) -> Result<I24> {
    I24::try_from(tick).map_err(|_| eyre::eyre!("tick {} out of int24 range", tick))
}

fn from_i24(tick: I24) -> Result<i32> {
    i32::try_from(tick).map_err(|_| eyre::eyre!("tick out of range"))
}

/// Raw units from a float amount, truncated.
fn floor_units(value: f64) -> U256 {
    U256::from(value.max(0.0) as u128)
}

fn human_amount(raw: f64, decimals: u8) -> String {
    math::format_float_amount(raw / 10f64.powi(i32::from(decimals)), decimals)
}

impl V3LpConnector {
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
        let nft_manager = contracts.nft_manager.ok_or_else(|| {
            eyre::eyre!("connector {} has no position manager configured", config.name)
        })?;
        Ok(Self {
            tokens: TokenRegistry::new(Protocol::UniswapV3, chain_id, source),
            chain,
            config,
            contracts,
            nft_manager,
        })
    }

    fn token(&self, address: Address) -> Result<Token> {
        Ok(self.tokens.get(address)?.token().clone())
    }

    async fn position(&self, token_id: u64) -> Result<Position> {
        let data = INonfungiblePositionManager::positionsCall {
            tokenId: U256::from(token_id),
        }
        .abi_encode();
        let out = self
            .chain
            .call(self.nft_manager, data.into(), None)
            .await
            .map_err(|e| {
                debug!("positions({}) failed: {:#}", token_id, e);
                ConnectorError::PositionNotFound(token_id)
            })?;
        let ret = INonfungiblePositionManager::positionsCall::abi_decode_returns(&out, true)?;
        Ok(Position {
            token0: ret.token0,
            token1: ret.token1,
            fee: ret.fee.to::<u32>(),
            tick_lower: from_i24(ret.tickLower)?,
            tick_upper: from_i24(ret.tickUpper)?,
            liquidity: ret.liquidity,
        })
    }

    /// Current raw square-root price of the pool for a sorted token pair.
    async fn sqrt_price(&self, token0: Address, token1: Address, fee: u32) -> Result<f64> {
        let pool = self.pool(token0, token1, fee).await?;
        let out = self
            .chain
            .call(pool, IUniswapV3Pool::slot0Call {}.abi_encode().into(), None)
            .await?;
        let slot0 = IUniswapV3Pool::slot0Call::abi_decode_returns(&out, true)?;
        Ok(math::sqrt_price_from_x96(U256::from(slot0.sqrtPriceX96)))
    }

    async fn pool(&self, token0: Address, token1: Address, fee: u32) -> Result<Address> {
        let data = IUniswapV3Factory::getPoolCall {
            tokenA: token0,
            tokenB: token1,
            fee: U24::from(fee),
        }
        .abi_encode();
        let out = self
            .chain
            .call(self.contracts.factory, data.into(), None)
            .await?;
        let pool = IUniswapV3Factory::getPoolCall::abi_decode_returns(&out, true)?.pool;
        if pool == Address::ZERO {
            return Err(ConnectorError::NoRoute {
                base: token0,
                quote: token1,
            }
            .into());
        }
        Ok(pool)
    }

    async fn owner_of(&self, token_id: u64) -> Result<Address> {
        let data = INonfungiblePositionManager::ownerOfCall {
            tokenId: U256::from(token_id),
        }
        .abi_encode();
        let out = self.chain.call(self.nft_manager, data.into(), None).await?;
        Ok(INonfungiblePositionManager::ownerOfCall::abi_decode_returns(&out, true)?.owner)
    }

    fn collect_call(token_id: u64, recipient: Address) -> INonfungiblePositionManager::collectCall {
        INonfungiblePositionManager::collectCall {
            params: INonfungiblePositionManager::CollectParams {
                tokenId: U256::from(token_id),
                recipient,
                amount0Max: u128::MAX,
                amount1Max: u128::MAX,
            },
        }
    }

    /// Static `collect` as `owner`, which returns the owed amounts without
    /// moving them.
    async fn owed_fees(&self, token_id: u64, owner: Address) -> Result<CollectedFees> {
        let data = Self::collect_call(token_id, owner).abi_encode();
        let out = self
            .chain
            .call(self.nft_manager, data.into(), Some(owner))
            .await?;
        let ret = INonfungiblePositionManager::collectCall::abi_decode_returns(&out, true)?;
        Ok(CollectedFees {
            amount0: ret.amount0,
            amount1: ret.amount1,
        })
    }

    /// Slippage-adjusted minimum amounts for `liquidity` in a position range.
    fn minimum_amounts(
        &self,
        sqrt_price: f64,
        tick_lower: i32,
        tick_upper: i32,
        liquidity: f64,
    ) -> Result<(U256, U256)> {
        let keep = 1.0 - slippage(&self.config.allowed_slippage, None)?.to_f64();
        let (amount0, amount1) =
            math::amounts_for_liquidity(sqrt_price, tick_lower, tick_upper, liquidity as u128);
        Ok((floor_units(amount0 * keep), floor_units(amount1 * keep)))
    }

    fn request(&self, tx: TxParams, data: Vec<u8>) -> crate::chains::TxRequest {
        let mut request = tx.request(self.nft_manager, data);
        if request.gas_limit == 0 {
            request.gas_limit = self.config.gas_limit;
        }
        request
    }
}

#[async_trait]
impl UniswapLPish for V3LpConnector {
    fn router(&self) -> Address {
        self.contracts.router
    }

    fn nft_manager(&self) -> Address {
        self.nft_manager
    }

    fn gas_limit(&self) -> u64 {
        self.config.gas_limit
    }

    fn ttl(&self) -> u64 {
        self.config.ttl
    }

    fn log_decoder(&self) -> &dyn LogDecoder {
        &V3LogDecoder
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

    async fn get_position(&self, token_id: u64) -> Result<PositionInfo> {
        let position = self.position(token_id).await?;
        let token0 = self.token(position.token0)?;
        let token1 = self.token(position.token1)?;
        let sqrt_price = self
            .sqrt_price(position.token0, position.token1, position.fee)
            .await?;
        let owner = self.owner_of(token_id).await?;
        let fees = self.owed_fees(token_id, owner).await?;

        let (amount0, amount1) = math::amounts_for_liquidity(
            sqrt_price,
            position.tick_lower,
            position.tick_upper,
            position.liquidity,
        );
        let price = |tick: i32| {
            let p = math::tick_to_price(f64::from(tick), token0.decimals, token1.decimals);
            math::format_float_amount(p, PRICE_DECIMALS)
        };

        Ok(PositionInfo {
            token0: Some(token0.address),
            token1: Some(token1.address),
            fee: math::fee_tier_name(position.fee).map(str::to_string),
            lower_price: price(position.tick_lower),
            upper_price: price(position.tick_upper),
            amount0: human_amount(amount0, token0.decimals),
            amount1: human_amount(amount1, token1.decimals),
            unclaimed_token0: math::format_amount(fees.amount0, token0.decimals),
            unclaimed_token1: math::format_amount(fees.amount1, token1.decimals),
        })
    }

    async fn add_position(&self, wallet: &Wallet, request: AddPosition) -> Result<Transaction> {
        let mut token0 = self.tokens.check(&request.token0)?;
        let mut token1 = self.tokens.check(&request.token1)?;
        let spacing =
            math::tick_spacing(request.fee).ok_or(ConnectorError::InvalidFeeTier(request.fee))?;
        let (mut lower, mut upper) = (request.lower_price, request.upper_price);
        if !(lower > 0.0 && lower < upper && upper.is_finite()) {
            return Err(ConnectorError::InvalidPriceRange { lower, upper }.into());
        }
        let mut amount0 = math::parse_amount(&request.amount0, token0.decimals)?;
        let mut amount1 = math::parse_amount(&request.amount1, token1.decimals)?;
        if amount0.is_zero() && amount1.is_zero() {
            return Err(ConnectorError::InvalidAmount("both amounts are zero".to_string()).into());
        }

        // Pools order tokens by address; prices flip with them.
        if token0.address > token1.address {
            std::mem::swap(&mut token0, &mut token1);
            std::mem::swap(&mut amount0, &mut amount1);
            (lower, upper) = (1.0 / upper, 1.0 / lower);
        }

        let deadline = deadline(self.config.ttl);
        let data = match request.token_id {
            None => {
                let tick_lower = math::nearest_usable_tick(
                    math::price_to_tick(lower, token0.decimals, token1.decimals),
                    spacing,
                );
                let mut tick_upper = math::nearest_usable_tick(
                    math::price_to_tick(upper, token0.decimals, token1.decimals),
                    spacing,
                );
                if tick_upper <= tick_lower {
                    tick_upper = tick_lower + spacing;
                }
                let sqrt_price = self
                    .sqrt_price(token0.address, token1.address, request.fee)
                    .await?;
                let liquidity = math::liquidity_for_amounts(
                    sqrt_price,
                    tick_lower,
                    tick_upper,
                    math::u256_to_f64(amount0),
                    math::u256_to_f64(amount1),
                );
                let (amount0_min, amount1_min) =
                    self.minimum_amounts(sqrt_price, tick_lower, tick_upper, liquidity)?;
                info!(
                    "Minting {}/{} position in ticks [{}, {}] fee {}",
                    token0.symbol, token1.symbol, tick_lower, tick_upper, request.fee
                );
                INonfungiblePositionManager::mintCall {
                    params: INonfungiblePositionManager::MintParams {
                        token0: token0.address,
                        token1: token1.address,
                        fee: U24::from(request.fee),
                        tickLower: to_i24(tick_lower)?,
                        tickUpper: to_i24(tick_upper)?,
                        amount0Desired: amount0,
                        amount1Desired: amount1,
                        amount0Min: amount0_min.min(amount0),
                        amount1Min: amount1_min.min(amount1),
                        recipient: wallet.address(),
                        deadline,
                    },
                }
                .abi_encode()
            }
            Some(token_id) => {
                let position = self.position(token_id).await?;
                if (position.token0, position.token1) != (token0.address, token1.address) {
                    return Err(eyre::eyre!(
                        "position {} holds {:?}/{:?}, not {}/{}",
                        token_id,
                        position.token0,
                        position.token1,
                        token0.symbol,
                        token1.symbol
                    ));
                }
                let sqrt_price = self
                    .sqrt_price(position.token0, position.token1, position.fee)
                    .await?;
                let liquidity = math::liquidity_for_amounts(
                    sqrt_price,
                    position.tick_lower,
                    position.tick_upper,
                    math::u256_to_f64(amount0),
                    math::u256_to_f64(amount1),
                );
                let (amount0_min, amount1_min) = self.minimum_amounts(
                    sqrt_price,
                    position.tick_lower,
                    position.tick_upper,
                    liquidity,
                )?;
                info!(
                    "Increasing position {} with {} {} and {} {}",
                    token_id, request.amount0, request.token0.symbol(), request.amount1,
                    request.token1.symbol()
                );
                INonfungiblePositionManager::increaseLiquidityCall {
                    params: INonfungiblePositionManager::IncreaseLiquidityParams {
                        tokenId: U256::from(token_id),
                        amount0Desired: amount0,
                        amount1Desired: amount1,
                        amount0Min: amount0_min.min(amount0),
                        amount1Min: amount1_min.min(amount1),
                        deadline,
                    },
                }
                .abi_encode()
            }
        };

        self.chain
            .send_transaction(wallet, self.request(request.tx, data))
            .await
            .map_err(execution_failure)
    }

    async fn reduce_position(
        &self,
        wallet: &Wallet,
        token_id: u64,
        decrease_percent: f64,
        tx: TxParams,
    ) -> Result<Transaction> {
        if !(decrease_percent > 0.0 && decrease_percent <= 100.0) {
            return Err(ConnectorError::InvalidPercent(decrease_percent).into());
        }
        let position = self.position(token_id).await?;
        if position.liquidity == 0 {
            return Err(ConnectorError::InvalidAmount(format!(
                "position {} has no liquidity",
                token_id
            ))
            .into());
        }

        let full = decrease_percent >= 100.0;
        let liquidity = if full {
            position.liquidity
        } else {
            let bps = U256::from((decrease_percent * 100.0).round() as u64);
            let part = math::mul_div(U256::from(position.liquidity), bps, U256::from(10_000u64))
                .ok_or_else(|| eyre::eyre!("liquidity overflow"))?;
            u128::try_from(part).map_err(|_| eyre::eyre!("liquidity overflow"))?
        };
        if liquidity == 0 {
            return Err(ConnectorError::InvalidPercent(decrease_percent).into());
        }

        let sqrt_price = self
            .sqrt_price(position.token0, position.token1, position.fee)
            .await?;
        let (amount0_min, amount1_min) = self.minimum_amounts(
            sqrt_price,
            position.tick_lower,
            position.tick_upper,
            liquidity as f64,
        )?;

        let mut calls: Vec<Bytes> = vec![
            INonfungiblePositionManager::decreaseLiquidityCall {
                params: INonfungiblePositionManager::DecreaseLiquidityParams {
                    tokenId: U256::from(token_id),
                    liquidity,
                    amount0Min: amount0_min,
                    amount1Min: amount1_min,
                    deadline: deadline(self.config.ttl),
                },
            }
            .abi_encode()
            .into(),
            Self::collect_call(token_id, wallet.address()).abi_encode().into(),
        ];
        if full {
            calls.push(
                INonfungiblePositionManager::burnCall {
                    tokenId: U256::from(token_id),
                }
                .abi_encode()
                .into(),
            );
        }
        info!(
            "Removing {}% ({} of {}) liquidity from position {}",
            decrease_percent, liquidity, position.liquidity, token_id
        );

        let data = INonfungiblePositionManager::multicallCall { data: calls }.abi_encode();
        self.chain
            .send_transaction(wallet, self.request(tx, data))
            .await
            .map_err(execution_failure)
    }

    async fn collect_fees(&self, wallet: &Wallet, token_id: u64, tx: TxParams) -> Result<Transaction> {
        let data = Self::collect_call(token_id, wallet.address()).abi_encode();
        info!("Collecting fees of position {}", token_id);
        self.chain
            .send_transaction(wallet, self.request(tx, data))
            .await
            .map_err(execution_failure)
    }

    async fn collectable_fees(&self, wallet: &Wallet, token_id: u64) -> Result<CollectedFees> {
        self.owed_fees(token_id, wallet.address()).await
    }

    async fn pool_price(
        &self,
        token0: &Tokenish,
        token1: &Tokenish,
        fee: u32,
        period: u32,
        interval: u32,
    ) -> Result<Vec<String>> {
        let base = self.tokens.check(token0)?;
        let quote = self.tokens.check(token1)?;
        if math::tick_spacing(fee).is_none() {
            return Err(ConnectorError::InvalidFeeTier(fee).into());
        }
        if interval == 0 {
            return Err(ConnectorError::InvalidAmount("interval must be positive".to_string()).into());
        }
        let samples = period / interval;
        if samples == 0 {
            return Ok(vec![]);
        }

        let inverted = base.address > quote.address;
        let (sorted0, sorted1) = if inverted { (&quote, &base) } else { (&base, &quote) };
        let pool = self.pool(sorted0.address, sorted1.address, fee).await?;

        // Oldest first, ending now.
        let seconds_agos: Vec<u32> = (0..=samples).rev().map(|i| i * interval).collect();
        let data = IUniswapV3Pool::observeCall {
            secondsAgos: seconds_agos,
        }
        .abi_encode();
        let out = self.chain.call(pool, data.into(), None).await?;
        let cumulatives = IUniswapV3Pool::observeCall::abi_decode_returns(&out, true)?.tickCumulatives;
        let cumulatives = cumulatives
            .into_iter()
            .map(|c| i64::try_from(c).map_err(|_| eyre::eyre!("tick cumulative out of range")))
            .collect::<Result<Vec<i64>>>()?;
        debug!("Pool {:?} observations: {:?}", pool, cumulatives);

        Ok(cumulatives
            .windows(2)
            .map(|w| {
                let tick = (w[1] - w[0]) as f64 / f64::from(interval);
                let price = math::tick_to_price(tick, sorted0.decimals, sorted1.decimals);
                let price = if inverted { 1.0 / price } else { price };
                math::format_float_amount(price, PRICE_DECIMALS)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::mock::MockChain;
    use alloy::primitives::{address, I256};
    use alloy::sol_types::SolValue;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const FACTORY: Address = address!("1f98431c8ad98523631ae4a59f267346ea31f984");
    const MANAGER: Address = address!("c36442b4a4522e871399cd717abdd847ab11fe88");
    const ROUTER: Address = address!("e592427a0aece92de3edee1f18e0157c05861564");
    const POOL: Address = address!("8ad599c3a0ff1de082011efddc58f1908eb6e6d8");
    const TKA: Address = address!("1111111111111111111111111111111111111111");
    const TKB: Address = address!("2222222222222222222222222222222222222222");
    const OWNER: Address = address!("0000000000000000000000000000000000000abc");
    const LIQUIDITY: u128 = 1_000_000_000_000_000_000;

    fn token(address: Address, symbol: &str) -> Token {
        Token {
            chain_id: 1,
            address,
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            decimals: 18,
        }
    }

    /// TKA/TKB 0.3% pool at price 1 with position 7 over ticks [-600, 600].
    fn lp_chain() -> Arc<MockChain> {
        let chain = Arc::new(MockChain::new(1));
        chain.on_call(MANAGER, INonfungiblePositionManager::positionsCall::SELECTOR, |data| {
            let call = INonfungiblePositionManager::positionsCall::abi_decode(data, true)?;
            if call.tokenId != U256::from(7u64) {
                return Err(eyre::eyre!("execution reverted: Invalid token ID"));
            }
            Ok((
                U256::ZERO,
                Address::ZERO,
                TKA,
                TKB,
                U256::from(3000u64),
                I256::try_from(-600i64).unwrap(),
                I256::try_from(600i64).unwrap(),
                LIQUIDITY,
                U256::ZERO,
                U256::ZERO,
                0u128,
                0u128,
            )
                .abi_encode_params())
        });
        chain.on_call(MANAGER, INonfungiblePositionManager::ownerOfCall::SELECTOR, |_| {
            Ok(OWNER.abi_encode())
        });
        chain.on_call(MANAGER, INonfungiblePositionManager::collectCall::SELECTOR, |_| {
            Ok((
                U256::from(1_500_000_000_000_000_000u64),
                U256::from(250_000_000_000_000_000u64),
            )
                .abi_encode_params())
        });
        chain.on_call(FACTORY, IUniswapV3Factory::getPoolCall::SELECTOR, |data| {
            let call = IUniswapV3Factory::getPoolCall::abi_decode(data, true)?;
            let pool = if call.fee.to::<u32>() == 3000 { POOL } else { Address::ZERO };
            Ok(pool.abi_encode())
        });
        chain.on_call(POOL, IUniswapV3Pool::slot0Call::SELECTOR, |_| {
            let sqrt_price_x96 = U256::from(1u64) << 96;
            let one = U256::from(1u64);
            Ok((sqrt_price_x96, I256::ZERO, U256::ZERO, one, one, U256::ZERO, true)
                .abi_encode_params())
        });
        chain
    }

    fn connector(chain: Arc<MockChain>) -> V3LpConnector {
        let config = ConnectorConfig {
            name: "uniswap".to_string(),
            protocol: Protocol::UniswapV3,
            allowed_slippage: "1/100".to_string(),
            gas_limit: 500_000,
            ttl: 600,
            fee_bps: 30,
            fee_tiers: vec![500, 3000],
            contracts: HashMap::new(),
        };
        let contracts = ConnectorContracts {
            router: ROUTER,
            factory: FACTORY,
            quoter: None,
            nft_manager: Some(MANAGER),
        };
        V3LpConnector::with_source(
            chain,
            1,
            config,
            contracts,
            TokenSource::Loaded(vec![token(TKA, "TKA"), token(TKB, "TKB")]),
        )
        .unwrap()
    }

    fn params() -> TxParams {
        TxParams {
            gas_limit: 0,
            gas_price: 20.0,
            options: Default::default(),
        }
    }

    fn decode_multicall(data: &[u8]) -> Vec<Bytes> {
        INonfungiblePositionManager::multicallCall::abi_decode(data, true)
            .unwrap()
            .data
    }

    #[tokio::test]
    async fn test_requires_position_manager() {
        let chain: Arc<dyn EthereumBase> = Arc::new(MockChain::new(1));
        let contracts = ConnectorContracts {
            router: ROUTER,
            factory: FACTORY,
            quoter: None,
            nft_manager: None,
        };
        let config = connector(lp_chain()).config.clone();
        assert!(
            V3LpConnector::with_source(chain, 1, config, contracts, TokenSource::Loaded(vec![]))
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_get_position() {
        let chain = lp_chain();
        let lp = connector(chain.clone());
        assert!(!lp.ready());
        lp.init().await.unwrap();
        assert!(lp.ready());

        let info = lp.get_position(7).await.unwrap();
        assert_eq!(info.token0, Some(TKA));
        assert_eq!(info.token1, Some(TKB));
        assert_eq!(info.fee.as_deref(), Some("MEDIUM"));
        let lower: f64 = info.lower_price.parse().unwrap();
        let upper: f64 = info.upper_price.parse().unwrap();
        assert!((lower - 1.0001f64.powi(-600)).abs() < 1e-6);
        assert!((upper - 1.0001f64.powi(600)).abs() < 1e-6);
        let amount0: f64 = info.amount0.parse().unwrap();
        let amount1: f64 = info.amount1.parse().unwrap();
        assert!(amount0 > 0.0 && (amount0 - amount1).abs() / amount0 < 1e-3);
        assert_eq!(info.unclaimed_token0, "1.5");
        assert_eq!(info.unclaimed_token1, "0.25");
        // Fees are read as the owner.
        assert!(chain.calls().contains(&(MANAGER, Some(OWNER))));
    }

    #[tokio::test]
    async fn test_unknown_position() {
        let lp = connector(lp_chain());
        lp.init().await.unwrap();
        let err = lp.get_position(8).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConnectorError>(),
            Some(ConnectorError::PositionNotFound(8))
        ));
    }

    #[tokio::test]
    async fn test_reduce_full_position_removes_all_liquidity_and_burns() {
        let chain = lp_chain();
        let lp = connector(chain.clone());
        lp.init().await.unwrap();
        let wallet = Wallet::random();

        let tx = lp.reduce_position(&wallet, 7, 100.0, params()).await.unwrap();
        assert_eq!(tx.to, Some(MANAGER));
        assert_eq!(tx.gas_limit, Some(U256::from(500_000u64)));

        let calls = decode_multicall(&chain.sent()[0].data);
        assert_eq!(calls.len(), 3);
        let decrease =
            INonfungiblePositionManager::decreaseLiquidityCall::abi_decode(&calls[0], true).unwrap();
        assert_eq!(decrease.params.tokenId, U256::from(7u64));
        assert_eq!(decrease.params.liquidity, LIQUIDITY);
        assert!(decrease.params.amount0Min > U256::ZERO);
        let collect = INonfungiblePositionManager::collectCall::abi_decode(&calls[1], true).unwrap();
        assert_eq!(collect.params.recipient, wallet.address());
        assert_eq!(collect.params.amount0Max, u128::MAX);
        let burn = INonfungiblePositionManager::burnCall::abi_decode(&calls[2], true).unwrap();
        assert_eq!(burn.tokenId, U256::from(7u64));
    }

    #[tokio::test]
    async fn test_reduce_partial_position_keeps_nft() {
        let chain = lp_chain();
        let lp = connector(chain.clone());
        lp.init().await.unwrap();

        lp.reduce_position(&Wallet::random(), 7, 25.0, params())
            .await
            .unwrap();
        let calls = decode_multicall(&chain.sent()[0].data);
        assert_eq!(calls.len(), 2);
        let decrease =
            INonfungiblePositionManager::decreaseLiquidityCall::abi_decode(&calls[0], true).unwrap();
        assert_eq!(decrease.params.liquidity, LIQUIDITY / 4);
    }

    #[tokio::test]
    async fn test_reduce_rejects_out_of_range_percent() {
        let chain = lp_chain();
        let lp = connector(chain.clone());
        lp.init().await.unwrap();
        for percent in [0.0, -5.0, 100.5, f64::NAN] {
            let err = lp
                .reduce_position(&Wallet::random(), 7, percent, params())
                .await
                .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<ConnectorError>(),
                Some(ConnectorError::InvalidPercent(_))
            ));
        }
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_reduce_rejects_percent_rounding_to_no_liquidity() {
        let chain = lp_chain();
        let lp = connector(chain.clone());
        lp.init().await.unwrap();

        let err = lp
            .reduce_position(&Wallet::random(), 7, 0.004, params())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConnectorError>(),
            Some(ConnectorError::InvalidPercent(_))
        ));
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_collect_fees_and_collectable_fees() {
        let chain = lp_chain();
        let lp = connector(chain.clone());
        lp.init().await.unwrap();
        let wallet = Wallet::random();

        let fees = lp.collectable_fees(&wallet, 7).await.unwrap();
        assert_eq!(fees.amount0, U256::from(1_500_000_000_000_000_000u64));
        assert_eq!(fees.amount1, U256::from(250_000_000_000_000_000u64));
        assert!(chain.sent().is_empty());
        assert_eq!(chain.calls().last(), Some(&(MANAGER, Some(wallet.address()))));

        lp.collect_fees(&wallet, 7, params()).await.unwrap();
        let sent = chain.sent();
        let collect = INonfungiblePositionManager::collectCall::abi_decode(&sent[0].data, true).unwrap();
        assert_eq!(collect.params.tokenId, U256::from(7u64));
        assert_eq!(collect.params.recipient, wallet.address());
    }

    #[tokio::test]
    async fn test_mint_sorts_tokens_and_snaps_ticks() {
        let chain = lp_chain();
        let lp = connector(chain.clone());
        lp.init().await.unwrap();
        let tka = lp.get_token_by_address(TKA).unwrap();
        let tkb = lp.get_token_by_address(TKB).unwrap();

        let request = AddPosition {
            token0: tkb,
            token1: tka,
            amount0: "2".to_string(),
            amount1: "1".to_string(),
            fee: 3000,
            lower_price: 0.9,
            upper_price: 1.1,
            token_id: None,
            tx: params(),
        };
        let wallet = Wallet::random();
        lp.add_position(&wallet, request).await.unwrap();

        let sent = chain.sent();
        let mint = INonfungiblePositionManager::mintCall::abi_decode(&sent[0].data, true).unwrap();
        let p = mint.params;
        assert_eq!((p.token0, p.token1), (TKA, TKB));
        assert_eq!(p.amount0Desired, U256::from(10u64).pow(U256::from(18u64)));
        assert_eq!(p.amount1Desired, U256::from(2u64) * U256::from(10u64).pow(U256::from(18u64)));
        // 1/1.1 and 1/0.9 snapped to the 60-tick grid.
        assert_eq!(i32::try_from(p.tickLower).unwrap(), -960);
        assert_eq!(i32::try_from(p.tickUpper).unwrap(), 1080);
        assert!(p.amount0Min <= p.amount0Desired);
        assert!(p.amount1Min <= p.amount1Desired);
        assert_eq!(p.recipient, wallet.address());
    }

    #[tokio::test]
    async fn test_increase_existing_position() {
        let chain = lp_chain();
        let lp = connector(chain.clone());
        lp.init().await.unwrap();
        let request = AddPosition {
            token0: lp.get_token_by_address(TKA).unwrap(),
            token1: lp.get_token_by_address(TKB).unwrap(),
            amount0: "1".to_string(),
            amount1: "1".to_string(),
            fee: 3000,
            lower_price: 0.9,
            upper_price: 1.1,
            token_id: Some(7),
            tx: params(),
        };
        lp.add_position(&Wallet::random(), request).await.unwrap();
        let sent = chain.sent();
        let call = INonfungiblePositionManager::increaseLiquidityCall::abi_decode(&sent[0].data, true)
            .unwrap();
        assert_eq!(call.params.tokenId, U256::from(7u64));
        // Equal amounts at price 1 in a symmetric range are both usable.
        assert!(call.params.amount0Min > U256::ZERO);
        assert!(call.params.amount1Min > U256::ZERO);
    }

    #[tokio::test]
    async fn test_add_position_validates_range_and_fee() {
        let lp = connector(lp_chain());
        lp.init().await.unwrap();
        let base = AddPosition {
            token0: lp.get_token_by_address(TKA).unwrap(),
            token1: lp.get_token_by_address(TKB).unwrap(),
            amount0: "1".to_string(),
            amount1: "1".to_string(),
            fee: 3000,
            lower_price: 1.2,
            upper_price: 1.1,
            token_id: None,
            tx: params(),
        };
        let err = lp.add_position(&Wallet::random(), base.clone()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConnectorError>(),
            Some(ConnectorError::InvalidPriceRange { .. })
        ));

        let err = lp
            .add_position(&Wallet::random(), AddPosition { fee: 2500, ..base })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConnectorError>(),
            Some(ConnectorError::InvalidFeeTier(2500))
        ));
    }

    #[tokio::test]
    async fn test_pool_price_samples_are_chronological() {
        let chain = lp_chain();
        let requested = Arc::new(Mutex::new(Vec::new()));
        let seen = requested.clone();
        chain.on_call(POOL, IUniswapV3Pool::observeCall::SELECTOR, move |data| {
            let call = IUniswapV3Pool::observeCall::abi_decode(data, true)?;
            *seen.lock().unwrap() = call.secondsAgos.clone();
            // tick at time t is about 2t, so the cumulative is t^2.
            let cumulatives: Vec<I256> = call
                .secondsAgos
                .iter()
                .map(|ago| {
                    let t = 1_000i64 - i64::from(*ago);
                    I256::try_from(t * t).unwrap()
                })
                .collect();
            let per_liquidity = vec![U256::ZERO; cumulatives.len()];
            Ok((cumulatives, per_liquidity).abi_encode_params())
        });
        let lp = connector(chain);
        lp.init().await.unwrap();
        let tka = lp.get_token_by_address(TKA).unwrap();
        let tkb = lp.get_token_by_address(TKB).unwrap();

        let prices = lp.pool_price(&tka, &tkb, 3000, 650, 60).await.unwrap();
        assert_eq!(prices.len(), 10);
        assert_eq!(
            *requested.lock().unwrap(),
            vec![600, 540, 480, 420, 360, 300, 240, 180, 120, 60, 0]
        );
        let values: Vec<f64> = prices.iter().map(|p| p.parse().unwrap()).collect();
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        // First window covers t in [400, 460]: average tick 860.
        assert!((values[0] - 1.0001f64.powi(860)).abs() < 1e-6);

        let inverse = lp.pool_price(&tkb, &tka, 3000, 650, 60).await.unwrap();
        let first: f64 = inverse[0].parse().unwrap();
        assert!((first * values[0] - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_pool_price_edge_cases() {
        let lp = connector(lp_chain());
        lp.init().await.unwrap();
        let tka = lp.get_token_by_address(TKA).unwrap();
        let tkb = lp.get_token_by_address(TKB).unwrap();

        assert!(lp.pool_price(&tka, &tkb, 3000, 30, 60).await.unwrap().is_empty());
        assert!(lp.pool_price(&tka, &tkb, 3000, 600, 0).await.is_err());
        let err = lp.pool_price(&tka, &tkb, 500, 600, 60).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConnectorError>(),
            Some(ConnectorError::NoRoute { .. })
        ));
    }
}
