pub mod chains;
pub mod config;
pub mod connectors;
pub mod error;
pub mod logs;
pub mod math;
pub mod transactions;
pub mod types;

pub use chains::{EthereumBase, Ethereumish, EvmChain, Wallet};
pub use connectors::{
    AddPosition, TradeExecution, TxOptions, TxParams, UniswapLPish, Uniswapish, V2Connector,
    V3Connector, V3LpConnector,
};
pub use error::ConnectorError;
pub use types::{
    ExpectedTrade, Fractionish, NetworkSelectionRequest, PositionInfo, Protocol, Tokenish,
    UniswapishAmount, UniswapishTrade,
};
