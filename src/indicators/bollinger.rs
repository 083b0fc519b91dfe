use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;

use super::moving_average::{calculate_sma, calculate_std_dev};
use crate::error::BotError;
use crate::models::Candle;
use crate::Result;

/// Look-back window of the lower band
pub const BAND_PERIOD: usize = 20;
pub const BAND_STD_DEV_MULTIPLIER: f64 = 2.0;
const BAND_DECIMALS: u32 = 8;

/// SMA ± k·σ envelope
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    /// Not consumed by the trading loop yet, kept for exit rules built on the envelope
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Which end of a chronologically ascending candle window feeds the band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandAnchor {
    /// First `period` candles: excludes the newest `len - period` candles
    #[default]
    Oldest,
    /// Last `period` candles: the most recent history
    Latest,
}

/// Calculate bands over the first `period` values of `closes`
///
/// Standard deviation is the population form (divide by N).
pub fn calculate_bollinger_bands(
    closes: &[f64],
    period: usize,
    multiplier: f64,
) -> Option<BollingerBands> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[..period];
    let sma = calculate_sma(window)?;
    let std_dev = calculate_std_dev(window, sma)?;

    Some(BollingerBands {
        upper: sma + multiplier * std_dev,
        middle: sma,
        lower: sma - multiplier * std_dev,
    })
}

/// Pick the `period` candles the band is computed over
pub fn select_window(candles: &[Candle], period: usize, anchor: BandAnchor) -> Result<&[Candle]> {
    if candles.len() < period {
        return Err(BotError::InsufficientData {
            required: period,
            available: candles.len(),
        });
    }

    Ok(match anchor {
        BandAnchor::Oldest => &candles[..period],
        BandAnchor::Latest => &candles[candles.len() - period..],
    })
}

/// Lower volatility band of the first 20 candles, rounded to 8 decimals (half-to-even)
///
/// `candles` must be chronologically ascending. Only positions 0..20 are read,
/// any newer candles beyond that are ignored; use [`select_window`] to choose a
/// different slice.
pub fn compute_lower_band(candles: &[Candle]) -> Result<Decimal> {
    lower_band(candles, BAND_PERIOD)
}

/// Lower band over the first `period` candles, k = 2
pub fn lower_band(candles: &[Candle], period: usize) -> Result<Decimal> {
    if period == 0 {
        return Err(BotError::InvalidParameter(
            "band period must be at least 1".to_string(),
        ));
    }
    if candles.len() < period {
        return Err(BotError::InsufficientData {
            required: period,
            available: candles.len(),
        });
    }

    let closes = candles[..period]
        .iter()
        .map(|c| {
            c.close
                .to_f64()
                .ok_or_else(|| BotError::Decode(format!("close {} is not representable", c.close)))
        })
        .collect::<Result<Vec<f64>>>()?;

    let bands = calculate_bollinger_bands(&closes, period, BAND_STD_DEV_MULTIPLIER).ok_or(
        BotError::InsufficientData {
            required: period,
            available: closes.len(),
        },
    )?;

    let lower = Decimal::from_f64_retain(bands.lower)
        .ok_or_else(|| BotError::Decode(format!("lower band {} is not finite", bands.lower)))?;

    Ok(lower.round_dp_with_strategy(BAND_DECIMALS, RoundingStrategy::MidpointNearestEven))
}
