use crate::error::ConnectorError;
use alloy::primitives::utils::{format_units, parse_units};
use alloy::primitives::{U256, U512};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Uniswap v3 tick bounds.
pub const MIN_TICK: i32 = -887_272;
pub const MAX_TICK: i32 = 887_272;

const BPS: u64 = 10_000;

/// A non-negative rational number with a non-zero denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fraction {
    pub numerator: U256,
    pub denominator: U256,
}

impl Fraction {
    pub fn new(numerator: U256, denominator: U256) -> Option<Self> {
        if denominator.is_zero() {
            return None;
        }
        Some(Self {
            numerator,
            denominator,
        })
    }

    pub fn zero() -> Self {
        Self {
            numerator: U256::ZERO,
            denominator: U256::from(1),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.numerator.is_zero()
    }

    /// `None` when the numerator is zero.
    pub fn invert(&self) -> Option<Self> {
        Self::new(self.denominator, self.numerator)
    }

    /// `floor(value * numerator / denominator)`, `None` on overflow.
    pub fn apply_floor(&self, value: U256) -> Option<U256> {
        mul_div(value, self.numerator, self.denominator)
    }

    /// `ceil(value * numerator / denominator)`, `None` on overflow.
    pub fn apply_ceil(&self, value: U256) -> Option<U256> {
        mul_div_ceil(value, self.numerator, self.denominator)
    }

    pub fn to_f64(&self) -> f64 {
        u256_to_f64(self.numerator) / u256_to_f64(self.denominator)
    }

    /// Decimal rendering with `digits` significant digits.
    pub fn to_significant(&self, digits: usize) -> String {
        let value = self.to_f64();
        if value == 0.0 || !value.is_finite() {
            return "0".to_string();
        }
        let magnitude = value.abs().log10().floor() as i32;
        let decimals = (digits as i32 - 1 - magnitude).max(0) as usize;
        trim_decimal(format!("{:.*}", decimals, value))
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

fn widen(value: U256) -> U512 {
    let l = value.as_limbs();
    U512::from_limbs([l[0], l[1], l[2], l[3], 0, 0, 0, 0])
}

fn narrow(value: U512) -> Option<U256> {
    let l = value.as_limbs();
    if l[4..].iter().any(|limb| *limb != 0) {
        return None;
    }
    Some(U256::from_limbs([l[0], l[1], l[2], l[3]]))
}

/// `floor(a * b / denominator)` computed in 512 bits.
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Option<U256> {
    if denominator.is_zero() {
        return None;
    }
    narrow(widen(a) * widen(b) / widen(denominator))
}

/// `ceil(a * b / denominator)` computed in 512 bits.
pub fn mul_div_ceil(a: U256, b: U256, denominator: U256) -> Option<U256> {
    if denominator.is_zero() {
        return None;
    }
    let product = widen(a) * widen(b);
    let d = widen(denominator);
    let mut quotient = product / d;
    if !(product % d).is_zero() {
        quotient += U512::from_limbs([1, 0, 0, 0, 0, 0, 0, 0]);
    }
    narrow(quotient)
}

/// Parses the gateway slippage form `"numerator/denominator"`. The value must
/// lie in `[0, 1)`.
pub fn parse_slippage(raw: &str) -> Result<Fraction, ConnectorError> {
    let invalid = || ConnectorError::InvalidSlippage(raw.to_string());
    let (n, d) = raw.trim().split_once('/').ok_or_else(invalid)?;
    let numerator: U256 = n.trim().parse().map_err(|_| invalid())?;
    let denominator: U256 = d.trim().parse().map_err(|_| invalid())?;
    if denominator.is_zero() || numerator >= denominator {
        return Err(invalid());
    }
    Ok(Fraction {
        numerator,
        denominator,
    })
}

/// Constant-product output for an exact input, with `fee_bps` taken from the
/// input. `None` when either reserve is empty, the input is zero, or the
/// result does not fit.
pub fn get_amount_out(
    amount_in: U256,
    reserve_in: U256,
    reserve_out: U256,
    fee_bps: u32,
) -> Option<U256> {
    if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() {
        return None;
    }
    let fee_factor = U256::from(BPS.checked_sub(u64::from(fee_bps))?);
    let amount_in_with_fee = amount_in.checked_mul(fee_factor)?;
    let denominator = reserve_in
        .checked_mul(U256::from(BPS))?
        .checked_add(amount_in_with_fee)?;
    mul_div(amount_in_with_fee, reserve_out, denominator)
}

/// Constant-product input needed for an exact output. Rounds up by one unit
/// like the v2 router library.
pub fn get_amount_in(
    amount_out: U256,
    reserve_in: U256,
    reserve_out: U256,
    fee_bps: u32,
) -> Option<U256> {
    if amount_out.is_zero() || reserve_in.is_zero() || amount_out >= reserve_out {
        return None;
    }
    let fee_factor = U256::from(BPS.checked_sub(u64::from(fee_bps))?);
    let numerator = amount_out.checked_mul(U256::from(BPS))?;
    let denominator = (reserve_out - amount_out).checked_mul(fee_factor)?;
    mul_div(reserve_in, numerator, denominator)?.checked_add(U256::from(1))
}

pub fn u256_to_f64(value: U256) -> f64 {
    value.to_string().parse::<f64>().unwrap_or(0.0)
}

fn trim_decimal(mut s: String) -> String {
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

/// Renders a raw token amount in whole-token units, without trailing zeros.
pub fn format_amount(raw: U256, decimals: u8) -> String {
    match format_units(raw, decimals) {
        Ok(s) => trim_decimal(s),
        Err(_) => raw.to_string(),
    }
}

/// Parses a whole-token decimal string into raw units.
pub fn parse_amount(amount: &str, decimals: u8) -> Result<U256, ConnectorError> {
    let trimmed = amount.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') {
        return Err(ConnectorError::InvalidAmount(amount.to_string()));
    }
    parse_units(trimmed, decimals)
        .map(|parsed| parsed.get_absolute())
        .map_err(|e| ConnectorError::InvalidAmount(format!("{amount}: {e}")))
}

/// Renders a float token amount with at most `decimals` fractional digits.
pub fn format_float_amount(value: f64, decimals: u8) -> String {
    if !value.is_finite() || value <= 0.0 {
        return "0".to_string();
    }
    trim_decimal(format!("{:.*}", usize::from(decimals.min(18)), value))
}

/// Tick spacing enforced by the v3 factory for each fee tier.
pub fn tick_spacing(fee: u32) -> Option<i32> {
    match fee {
        100 => Some(1),
        500 => Some(10),
        3000 => Some(60),
        10000 => Some(200),
        _ => None,
    }
}

pub fn fee_tier_name(fee: u32) -> Option<&'static str> {
    match fee {
        100 => Some("LOWEST"),
        500 => Some("LOW"),
        3000 => Some("MEDIUM"),
        10000 => Some("HIGH"),
        _ => None,
    }
}

/// Closest tick at or below a human price of token1 per token0.
pub fn price_to_tick(price: f64, decimals0: u8, decimals1: u8) -> i32 {
    let raw = price * 10f64.powi(i32::from(decimals1) - i32::from(decimals0));
    let tick = (raw.ln() / 1.0001f64.ln()).floor();
    tick.clamp(f64::from(MIN_TICK), f64::from(MAX_TICK)) as i32
}

/// Human price of token1 per token0 at `tick`.
pub fn tick_to_price(tick: f64, decimals0: u8, decimals1: u8) -> f64 {
    1.0001f64.powf(tick) * 10f64.powi(i32::from(decimals0) - i32::from(decimals1))
}

pub fn nearest_usable_tick(tick: i32, spacing: i32) -> i32 {
    let rounded = ((f64::from(tick) / f64::from(spacing)).round() as i32) * spacing;
    if rounded < MIN_TICK {
        rounded + spacing
    } else if rounded > MAX_TICK {
        rounded - spacing
    } else {
        rounded
    }
}

/// `sqrtPriceX96 / 2^96` as a float.
pub fn sqrt_price_from_x96(sqrt_price_x96: U256) -> f64 {
    u256_to_f64(sqrt_price_x96) / 2f64.powi(96)
}

/// Raw token amounts held by `liquidity` between two ticks at the current
/// square-root price.
pub fn amounts_for_liquidity(
    sqrt_price: f64,
    tick_lower: i32,
    tick_upper: i32,
    liquidity: u128,
) -> (f64, f64) {
    let l = liquidity as f64;
    let sa = 1.0001f64.powf(f64::from(tick_lower) / 2.0);
    let sb = 1.0001f64.powf(f64::from(tick_upper) / 2.0);
    if sqrt_price <= sa {
        (l * (sb - sa) / (sa * sb), 0.0)
    } else if sqrt_price < sb {
        (l * (sb - sqrt_price) / (sqrt_price * sb), l * (sqrt_price - sa))
    } else {
        (0.0, l * (sb - sa))
    }
}

/// Largest liquidity that raw `amount0` and `amount1` can fund between two
/// ticks at the current square-root price.
pub fn liquidity_for_amounts(
    sqrt_price: f64,
    tick_lower: i32,
    tick_upper: i32,
    amount0: f64,
    amount1: f64,
) -> f64 {
    let sa = 1.0001f64.powf(f64::from(tick_lower) / 2.0);
    let sb = 1.0001f64.powf(f64::from(tick_upper) / 2.0);
    if sqrt_price <= sa {
        amount0 * sa * sb / (sb - sa)
    } else if sqrt_price < sb {
        let from0 = amount0 * sqrt_price * sb / (sb - sqrt_price);
        let from1 = amount1 / (sqrt_price - sa);
        from0.min(from1)
    } else {
        amount1 / (sb - sa)
    }
}
