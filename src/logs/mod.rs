use crate::connectors::abi::{INonfungiblePositionManager, IUniswapV2Pair, IUniswapV3Pool};
use crate::error::ConnectorError;
use alloy::primitives::{Address, B256, I256, U256};
use alloy::rpc::types::eth::Log;
use alloy::sol_types::SolEvent;
use eyre::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EthereumLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
}

impl From<Log> for EthereumLog {
    fn from(log: Log) -> Self {
        Self {
            address: log.address(),
            topics: log.topics().to_vec(),
            data: log.data().data.to_vec(),
        }
    }
}

/// A log decoded into one of the events the connectors care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    V2Swap {
        pair: Address,
        sender: Address,
        to: Address,
        amount0_in: U256,
        amount1_in: U256,
        amount0_out: U256,
        amount1_out: U256,
    },
    V2Sync {
        pair: Address,
        reserve0: U256,
        reserve1: U256,
    },
    V3Swap {
        pool: Address,
        sender: Address,
        recipient: Address,
        amount0: I256,
        amount1: I256,
        sqrt_price_x96: U256,
        liquidity: u128,
        tick: i32,
    },
    IncreaseLiquidity {
        token_id: U256,
        liquidity: u128,
        amount0: U256,
        amount1: U256,
    },
    DecreaseLiquidity {
        token_id: U256,
        liquidity: u128,
        amount0: U256,
        amount1: U256,
    },
    Collect {
        token_id: U256,
        recipient: Address,
        amount0: U256,
        amount1: U256,
    },
}

impl DecodedEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DecodedEvent::V2Swap { .. } | DecodedEvent::V3Swap { .. } => "Swap",
            DecodedEvent::V2Sync { .. } => "Sync",
            DecodedEvent::IncreaseLiquidity { .. } => "IncreaseLiquidity",
            DecodedEvent::DecreaseLiquidity { .. } => "DecreaseLiquidity",
            DecodedEvent::Collect { .. } => "Collect",
        }
    }
}

/// Per-connector transaction log decoding.
pub trait LogDecoder: Send + Sync {
    fn decode(&self, log: &EthereumLog) -> Result<DecodedEvent>;
    fn event_signatures(&self) -> Vec<B256>;
}

fn topic0(log: &EthereumLog) -> Result<B256> {
    log.topics
        .first()
        .copied()
        .ok_or_else(|| eyre::eyre!("Log has no topics"))
}

fn decode_raw<E: SolEvent>(log: &EthereumLog) -> Result<E> {
    Ok(E::decode_raw_log(log.topics.iter().copied(), &log.data, true)?)
}

/// Pair events of the Uniswap v2 family.
#[derive(Debug, Default, Clone, Copy)]
pub struct V2LogDecoder;

impl LogDecoder for V2LogDecoder {
    fn decode(&self, log: &EthereumLog) -> Result<DecodedEvent> {
        let topic = topic0(log)?;
        if topic == IUniswapV2Pair::Swap::SIGNATURE_HASH {
            let ev: IUniswapV2Pair::Swap = decode_raw(log)?;
            Ok(DecodedEvent::V2Swap {
                pair: log.address,
                sender: ev.sender,
                to: ev.to,
                amount0_in: ev.amount0In,
                amount1_in: ev.amount1In,
                amount0_out: ev.amount0Out,
                amount1_out: ev.amount1Out,
            })
        } else if topic == IUniswapV2Pair::Sync::SIGNATURE_HASH {
            let ev: IUniswapV2Pair::Sync = decode_raw(log)?;
            Ok(DecodedEvent::V2Sync {
                pair: log.address,
                reserve0: U256::from(ev.reserve0),
                reserve1: U256::from(ev.reserve1),
            })
        } else {
            Err(ConnectorError::UnknownEvent(topic).into())
        }
    }

    fn event_signatures(&self) -> Vec<B256> {
        vec![
            IUniswapV2Pair::Swap::SIGNATURE_HASH,
            IUniswapV2Pair::Sync::SIGNATURE_HASH,
        ]
    }
}

/// Pool swaps and position-manager events of Uniswap v3.
#[derive(Debug, Default, Clone, Copy)]
pub struct V3LogDecoder;

impl LogDecoder for V3LogDecoder {
    fn decode(&self, log: &EthereumLog) -> Result<DecodedEvent> {
        let topic = topic0(log)?;
        if topic == IUniswapV3Pool::Swap::SIGNATURE_HASH {
            let ev: IUniswapV3Pool::Swap = decode_raw(log)?;
            Ok(DecodedEvent::V3Swap {
                pool: log.address,
                sender: ev.sender,
                recipient: ev.recipient,
                amount0: ev.amount0,
                amount1: ev.amount1,
                sqrt_price_x96: U256::from(ev.sqrtPriceX96),
                liquidity: ev.liquidity,
                tick: i32::try_from(ev.tick).map_err(|_| eyre::eyre!("tick out of range"))?,
            })
        } else if topic == INonfungiblePositionManager::IncreaseLiquidity::SIGNATURE_HASH {
            let ev: INonfungiblePositionManager::IncreaseLiquidity = decode_raw(log)?;
            Ok(DecodedEvent::IncreaseLiquidity {
                token_id: ev.tokenId,
                liquidity: ev.liquidity,
                amount0: ev.amount0,
                amount1: ev.amount1,
            })
        } else if topic == INonfungiblePositionManager::DecreaseLiquidity::SIGNATURE_HASH {
            let ev: INonfungiblePositionManager::DecreaseLiquidity = decode_raw(log)?;
            Ok(DecodedEvent::DecreaseLiquidity {
                token_id: ev.tokenId,
                liquidity: ev.liquidity,
                amount0: ev.amount0,
                amount1: ev.amount1,
            })
        } else if topic == INonfungiblePositionManager::Collect::SIGNATURE_HASH {
            let ev: INonfungiblePositionManager::Collect = decode_raw(log)?;
            Ok(DecodedEvent::Collect {
                token_id: ev.tokenId,
                recipient: ev.recipient,
                amount0: ev.amount0,
                amount1: ev.amount1,
            })
        } else {
            Err(ConnectorError::UnknownEvent(topic).into())
        }
    }

    fn event_signatures(&self) -> Vec<B256> {
        vec![
            IUniswapV3Pool::Swap::SIGNATURE_HASH,
            INonfungiblePositionManager::IncreaseLiquidity::SIGNATURE_HASH,
            INonfungiblePositionManager::DecreaseLiquidity::SIGNATURE_HASH,
            INonfungiblePositionManager::Collect::SIGNATURE_HASH,
        ]
    }
}
