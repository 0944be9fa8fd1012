use crate::types::Protocol;
use alloy::primitives::{Address, B256};

/// Contract-level failures raised by connectors.
///
/// Connectors return `eyre::Result`, with these wrapped in the report. Callers
/// classify a failure with `report.downcast_ref::<ConnectorError>()`.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("connector is not initialized; call init() first")]
    NotReady,

    #[error("token {0} is not in the connector token list")]
    UnknownToken(Address),

    #[error("expected a {expected} value, got a {found} value")]
    ProtocolMismatch { expected: Protocol, found: Protocol },

    #[error("no route between {base} and {quote}")]
    NoRoute { base: Address, quote: Address },

    #[error("insufficient liquidity between {base} and {quote}")]
    InsufficientLiquidity { base: Address, quote: Address },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid allowed slippage {0:?}; expected a fraction like \"1/100\"")]
    InvalidSlippage(String),

    #[error("trade expired at {expired_at}, now {now}")]
    TradeExpired { expired_at: i64, now: i64 },

    #[error("decrease percent must be within (0, 100], got {0}")]
    InvalidPercent(f64),

    #[error("invalid price range [{lower}, {upper}]")]
    InvalidPriceRange { lower: f64, upper: f64 },

    #[error("unsupported fee tier {0}")]
    InvalidFeeTier(u32),

    #[error("position {0} not found")]
    PositionNotFound(u64),

    #[error("unrecognized event topic {0}")]
    UnknownEvent(B256),

    #[error("transaction failed: {0}")]
    Execution(String),
}

impl ConnectorError {
    /// Failures raised while quoting, before anything is signed.
    pub fn is_estimation_failure(&self) -> bool {
        matches!(
            self,
            ConnectorError::UnknownToken(_)
                | ConnectorError::ProtocolMismatch { .. }
                | ConnectorError::NoRoute { .. }
                | ConnectorError::InsufficientLiquidity { .. }
                | ConnectorError::InvalidAmount(_)
                | ConnectorError::InvalidSlippage(_)
        )
    }

    /// Failures raised while signing, broadcasting or by a stale quote.
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            ConnectorError::Execution(_) | ConnectorError::TradeExpired { .. }
        )
    }
}
