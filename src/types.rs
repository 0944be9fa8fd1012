use crate::error::ConnectorError;
use crate::math::{self, Fraction};
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// DEX family that produced a token, amount, fraction or trade.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Protocol {
    #[serde(rename = "Uniswap")]
    Uniswap,
    #[serde(rename = "UniswapV3")]
    UniswapV3,
    #[serde(rename = "Pangolin")]
    Pangolin,
    #[serde(rename = "Sushiswap")]
    Sushiswap,
    #[serde(rename = "Traderjoe")]
    Traderjoe,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Uniswap => "Uniswap",
            Protocol::UniswapV3 => "UniswapV3",
            Protocol::Pangolin => "Pangolin",
            Protocol::Sushiswap => "Sushiswap",
            Protocol::Traderjoe => "Traderjoe",
        }
    }

    /// Uniswap v2 forks that price swaps from pair reserves.
    pub fn is_v2_family(&self) -> bool {
        !matches!(self, Protocol::UniswapV3)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uniswap" | "uniswapv2" => Ok(Protocol::Uniswap),
            "uniswapv3" | "uniswaplp" => Ok(Protocol::UniswapV3),
            "pangolin" => Ok(Protocol::Pangolin),
            "sushiswap" => Ok(Protocol::Sushiswap),
            "traderjoe" => Ok(Protocol::Traderjoe),
            _ => Err(eyre::eyre!("unknown protocol {s:?}")),
        }
    }
}

/// Token entry as it appears in a token list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub chain_id: u64,
    pub address: Address,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    pub decimals: u8,
}

/// A token as represented by one SDK family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "sdk", content = "token")]
pub enum Tokenish {
    Uniswap(Token),
    UniswapCore(Token),
    Pangolin(Token),
    Traderjoe(Token),
    Sushiswap(Token),
}

impl Tokenish {
    pub fn for_protocol(protocol: Protocol, token: Token) -> Self {
        match protocol {
            Protocol::Uniswap => Tokenish::Uniswap(token),
            Protocol::UniswapV3 => Tokenish::UniswapCore(token),
            Protocol::Pangolin => Tokenish::Pangolin(token),
            Protocol::Traderjoe => Tokenish::Traderjoe(token),
            Protocol::Sushiswap => Tokenish::Sushiswap(token),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Tokenish::Uniswap(_) => Protocol::Uniswap,
            Tokenish::UniswapCore(_) => Protocol::UniswapV3,
            Tokenish::Pangolin(_) => Protocol::Pangolin,
            Tokenish::Traderjoe(_) => Protocol::Traderjoe,
            Tokenish::Sushiswap(_) => Protocol::Sushiswap,
        }
    }

    pub fn token(&self) -> &Token {
        match self {
            Tokenish::Uniswap(t)
            | Tokenish::UniswapCore(t)
            | Tokenish::Pangolin(t)
            | Tokenish::Traderjoe(t)
            | Tokenish::Sushiswap(t) => t,
        }
    }

    pub fn address(&self) -> Address {
        self.token().address
    }

    pub fn symbol(&self) -> &str {
        &self.token().symbol
    }

    pub fn decimals(&self) -> u8 {
        self.token().decimals
    }

    /// Returns the inner token if it was produced by `expected`.
    pub fn expect_protocol(&self, expected: Protocol) -> Result<&Token, ConnectorError> {
        if self.protocol() != expected {
            return Err(ConnectorError::ProtocolMismatch {
                expected,
                found: self.protocol(),
            });
        }
        Ok(self.token())
    }
}

/// Raw integer amount of a token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrencyAmount {
    pub token: Token,
    pub raw: U256,
}

impl CurrencyAmount {
    pub fn new(token: Token, raw: U256) -> Self {
        Self { token, raw }
    }

    /// Whole-token decimal rendering, e.g. `"1.5"`.
    pub fn to_exact(&self) -> String {
        math::format_amount(self.raw, self.token.decimals)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "sdk", content = "amount")]
pub enum UniswapishAmount {
    Uniswap(CurrencyAmount),
    Pangolin(CurrencyAmount),
    UniswapCore(CurrencyAmount),
    Traderjoe(CurrencyAmount),
    Sushiswap(CurrencyAmount),
}

impl UniswapishAmount {
    pub fn for_protocol(protocol: Protocol, amount: CurrencyAmount) -> Self {
        match protocol {
            Protocol::Uniswap => UniswapishAmount::Uniswap(amount),
            Protocol::UniswapV3 => UniswapishAmount::UniswapCore(amount),
            Protocol::Pangolin => UniswapishAmount::Pangolin(amount),
            Protocol::Traderjoe => UniswapishAmount::Traderjoe(amount),
            Protocol::Sushiswap => UniswapishAmount::Sushiswap(amount),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            UniswapishAmount::Uniswap(_) => Protocol::Uniswap,
            UniswapishAmount::UniswapCore(_) => Protocol::UniswapV3,
            UniswapishAmount::Pangolin(_) => Protocol::Pangolin,
            UniswapishAmount::Traderjoe(_) => Protocol::Traderjoe,
            UniswapishAmount::Sushiswap(_) => Protocol::Sushiswap,
        }
    }

    pub fn amount(&self) -> &CurrencyAmount {
        match self {
            UniswapishAmount::Uniswap(a)
            | UniswapishAmount::Pangolin(a)
            | UniswapishAmount::UniswapCore(a)
            | UniswapishAmount::Traderjoe(a)
            | UniswapishAmount::Sushiswap(a) => a,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "sdk", content = "fraction")]
pub enum Fractionish {
    Uniswap(Fraction),
    Pangolin(Fraction),
    Traderjoe(Fraction),
    Sushiswap(Fraction),
}

impl Fractionish {
    /// v3 shares the sdk-core fraction with Uniswap.
    pub fn for_protocol(protocol: Protocol, fraction: Fraction) -> Self {
        match protocol {
            Protocol::Uniswap | Protocol::UniswapV3 => Fractionish::Uniswap(fraction),
            Protocol::Pangolin => Fractionish::Pangolin(fraction),
            Protocol::Traderjoe => Fractionish::Traderjoe(fraction),
            Protocol::Sushiswap => Fractionish::Sushiswap(fraction),
        }
    }

    pub fn fraction(&self) -> &Fraction {
        match self {
            Fractionish::Uniswap(f)
            | Fractionish::Pangolin(f)
            | Fractionish::Traderjoe(f)
            | Fractionish::Sushiswap(f) => f,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeType {
    ExactInput,
    ExactOutput,
}

/// Token path of a trade. `pools[i]` connects `path[i]` and `path[i + 1]`;
/// `fees` is only filled for v3 routes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Route {
    pub path: Vec<Address>,
    pub pools: Vec<Address>,
    #[serde(default)]
    pub fees: Vec<u32>,
}

/// A quoted swap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub trade_type: TradeType,
    pub route: Route,
    pub input_amount: CurrencyAmount,
    pub output_amount: CurrencyAmount,
    /// Raw output units per raw input unit.
    pub execution_price: Fraction,
    /// Unix seconds at which the quote was taken.
    pub quoted_at: i64,
}

impl Trade {
    /// Least output accepted for an exact-input trade under `slippage`.
    pub fn minimum_amount_out(&self, slippage: &Fraction) -> Option<U256> {
        match self.trade_type {
            TradeType::ExactOutput => Some(self.output_amount.raw),
            TradeType::ExactInput => {
                let keep = Fraction::new(
                    slippage.denominator - slippage.numerator,
                    slippage.denominator,
                )?;
                keep.apply_floor(self.output_amount.raw)
            }
        }
    }

    /// Most input spent for an exact-output trade under `slippage`.
    pub fn maximum_amount_in(&self, slippage: &Fraction) -> Option<U256> {
        match self.trade_type {
            TradeType::ExactInput => Some(self.input_amount.raw),
            TradeType::ExactOutput => {
                let pay = Fraction::new(
                    slippage.denominator.checked_add(slippage.numerator)?,
                    slippage.denominator,
                )?;
                pay.apply_ceil(self.input_amount.raw)
            }
        }
    }

    /// Output per input in whole-token units.
    pub fn human_price(&self) -> f64 {
        let scale = 10f64.powi(
            i32::from(self.input_amount.token.decimals)
                - i32::from(self.output_amount.token.decimals),
        );
        self.execution_price.to_f64() * scale
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "sdk", content = "trade")]
pub enum UniswapishTrade {
    Uniswap(Trade),
    Pangolin(Trade),
    Traderjoe(Trade),
    Sushiswap(Trade),
    UniswapV3(Trade),
}

impl UniswapishTrade {
    pub fn for_protocol(protocol: Protocol, trade: Trade) -> Self {
        match protocol {
            Protocol::Uniswap => UniswapishTrade::Uniswap(trade),
            Protocol::UniswapV3 => UniswapishTrade::UniswapV3(trade),
            Protocol::Pangolin => UniswapishTrade::Pangolin(trade),
            Protocol::Traderjoe => UniswapishTrade::Traderjoe(trade),
            Protocol::Sushiswap => UniswapishTrade::Sushiswap(trade),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            UniswapishTrade::Uniswap(_) => Protocol::Uniswap,
            UniswapishTrade::Pangolin(_) => Protocol::Pangolin,
            UniswapishTrade::Traderjoe(_) => Protocol::Traderjoe,
            UniswapishTrade::Sushiswap(_) => Protocol::Sushiswap,
            UniswapishTrade::UniswapV3(_) => Protocol::UniswapV3,
        }
    }

    pub fn trade(&self) -> &Trade {
        match self {
            UniswapishTrade::Uniswap(t)
            | UniswapishTrade::Pangolin(t)
            | UniswapishTrade::Traderjoe(t)
            | UniswapishTrade::Sushiswap(t)
            | UniswapishTrade::UniswapV3(t) => t,
        }
    }

    pub fn execution_price(&self) -> Fractionish {
        Fractionish::for_protocol(self.protocol(), self.trade().execution_price)
    }

    pub fn expect_protocol(&self, expected: Protocol) -> Result<&Trade, ConnectorError> {
        if self.protocol() != expected {
            return Err(ConnectorError::ProtocolMismatch {
                expected,
                found: self.protocol(),
            });
        }
        Ok(self.trade())
    }
}

/// Result of a price estimation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedTrade {
    pub trade: UniswapishTrade,
    pub expected_amount: UniswapishAmount,
}

/// Snapshot of a concentrated-liquidity position. Prices and amounts are
/// whole-token decimal strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PositionInfo {
    pub token0: Option<Address>,
    pub token1: Option<Address>,
    pub fee: Option<String>,
    pub lower_price: String,
    pub upper_price: String,
    pub amount0: String,
    pub amount1: String,
    pub unclaimed_token0: String,
    pub unclaimed_token1: String,
}

/// Fees owed to a position, resolved by a static call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CollectedFees {
    pub amount0: U256,
    pub amount1: U256,
}

/// Inbound routing parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkSelectionRequest {
    /// Target connector, e.g. `uniswap` or `pangolin`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<String>,
    /// Target chain, e.g. `ethereum` or `avalanche`.
    pub chain: String,
    /// Network of the chain, e.g. `mainnet`.
    pub network: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn weth() -> Token {
        Token {
            chain_id: 1,
            address: address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
            symbol: "WETH".to_string(),
            name: "Wrapped Ether".to_string(),
            decimals: 18,
        }
    }

    fn usdc() -> Token {
        Token {
            chain_id: 1,
            address: address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"),
            symbol: "USDC".to_string(),
            name: "USD Coin".to_string(),
            decimals: 6,
        }
    }

    fn sample_trade(trade_type: TradeType) -> Trade {
        Trade {
            trade_type,
            route: Route {
                path: vec![weth().address, usdc().address],
                pools: vec![Address::ZERO],
                fees: vec![],
            },
            input_amount: CurrencyAmount::new(weth(), U256::from(10).pow(U256::from(18))),
            output_amount: CurrencyAmount::new(usdc(), U256::from(2_000_000_000u64)),
            execution_price: Fraction::new(
                U256::from(2_000_000_000u64),
                U256::from(10).pow(U256::from(18)),
            )
            .unwrap(),
            quoted_at: 0,
        }
    }

    #[test]
    fn test_tokenish_carries_protocol_tag() {
        for protocol in [
            Protocol::Uniswap,
            Protocol::UniswapV3,
            Protocol::Pangolin,
            Protocol::Sushiswap,
            Protocol::Traderjoe,
        ] {
            let t = Tokenish::for_protocol(protocol, weth());
            assert_eq!(t.protocol(), protocol);
            assert_eq!(t.symbol(), "WETH");
            let a = UniswapishAmount::for_protocol(protocol, CurrencyAmount::new(weth(), U256::ZERO));
            assert_eq!(a.protocol(), protocol);
            let tr = UniswapishTrade::for_protocol(protocol, sample_trade(TradeType::ExactInput));
            assert_eq!(tr.protocol(), protocol);
        }
    }

    #[test]
    fn test_expect_protocol_rejects_foreign_values() {
        let t = Tokenish::Pangolin(weth());
        let err = t.expect_protocol(Protocol::Uniswap).unwrap_err();
        assert!(matches!(
            err,
            ConnectorError::ProtocolMismatch {
                expected: Protocol::Uniswap,
                found: Protocol::Pangolin
            }
        ));
    }

    #[test]
    fn test_slippage_bounds() {
        let slippage = Fraction::new(U256::from(1), U256::from(100)).unwrap();
        let sell = sample_trade(TradeType::ExactInput);
        assert_eq!(sell.minimum_amount_out(&slippage), Some(U256::from(1_980_000_000u64)));
        assert_eq!(sell.maximum_amount_in(&slippage), Some(sell.input_amount.raw));

        let buy = sample_trade(TradeType::ExactOutput);
        assert_eq!(buy.minimum_amount_out(&slippage), Some(buy.output_amount.raw));
        assert_eq!(
            buy.maximum_amount_in(&slippage),
            Some(U256::from(101) * U256::from(10).pow(U256::from(16)))
        );
    }

    #[test]
    fn test_human_price() {
        let trade = sample_trade(TradeType::ExactInput);
        assert!((trade.human_price() - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_network_selection_request_json() {
        let req: NetworkSelectionRequest =
            serde_json::from_str(r#"{"chain":"avalanche","network":"fuji"}"#).unwrap();
        assert_eq!(req.connector, None);
        assert_eq!(req.chain, "avalanche");

        let json = serde_json::to_value(&NetworkSelectionRequest {
            connector: Some("pangolin".to_string()),
            chain: "avalanche".to_string(),
            network: "fuji".to_string(),
        })
        .unwrap();
        assert_eq!(json["connector"], "pangolin");
    }

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("Pangolin".parse::<Protocol>().unwrap(), Protocol::Pangolin);
        assert_eq!("uniswapLP".parse::<Protocol>().unwrap(), Protocol::UniswapV3);
        assert!("curve".parse::<Protocol>().is_err());
    }
}
