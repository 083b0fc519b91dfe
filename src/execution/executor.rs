use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::parameters::{ParameterStore, TradingParameters};
use super::position::{ClosedPosition, Position, PositionState};
use crate::config::StrategySettings;
use crate::error::BotError;
use crate::exchange::{get_free_balance, Exchange, MarketDataFeed};
use crate::indicators::{lower_band, select_window, BandAnchor, BAND_PERIOD};
use crate::models::Candle;
use crate::Result;

/// Candles fetched per band computation when not configured otherwise
pub const DEFAULT_FETCH_LIMIT: u32 = 25;

/// How the candle window for the lower band is fetched and sliced
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandWindow {
    pub fetch_limit: u32,
    pub period: usize,
    pub anchor: BandAnchor,
}

impl Default for BandWindow {
    fn default() -> Self {
        Self {
            fetch_limit: DEFAULT_FETCH_LIMIT,
            period: BAND_PERIOD,
            anchor: BandAnchor::Oldest,
        }
    }
}

impl From<&StrategySettings> for BandWindow {
    fn from(settings: &StrategySettings) -> Self {
        Self {
            fetch_limit: settings.fetch_limit,
            period: settings.band_period,
            anchor: settings.band_anchor,
        }
    }
}

/// Places orders for the configured asset and owns the in-flight position
///
/// Methods that move between Flat and Long take `&mut self`, so a single
/// driver loop is the only caller at any time.
pub struct Executor<E: Exchange> {
    exchange: E,
    parameters: TradingParameters,
    window: BandWindow,
    asset_verified: bool,
    state: PositionState,
}

impl<E: Exchange> Executor<E> {
    /// Fails fast if the parameter store is not configured
    pub fn new(exchange: E, parameters: &ParameterStore, window: BandWindow) -> Result<Self> {
        let parameters = parameters.parameters()?.clone();

        if window.period == 0 || (window.fetch_limit as usize) < window.period {
            return Err(BotError::InvalidParameter(format!(
                "cannot compute a {}-candle band from {} fetched candles",
                window.period, window.fetch_limit
            )));
        }

        Ok(Self {
            exchange,
            parameters,
            window,
            asset_verified: false,
            state: PositionState::Flat,
        })
    }

    pub fn parameters(&self) -> &TradingParameters {
        &self.parameters
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    /// Whether `symbol` is listed, exact and case-sensitive
    ///
    /// Re-fetches the full ticker list on every call.
    pub async fn check_symbol_tradable(&self, symbol: &str) -> Result<bool> {
        let tickers = self.exchange.get_all_tickers().await?;
        Ok(tickers.iter().any(|t| t.symbol == symbol))
    }

    /// Confirm the configured asset is listed; required before `enter`
    pub async fn verify_asset(&mut self) -> Result<()> {
        let asset = self.parameters.asset.clone();
        if !self.check_symbol_tradable(&asset).await? {
            return Err(BotError::InvalidParameter(format!(
                "{} is not listed on the exchange",
                asset
            )));
        }

        self.asset_verified = true;
        tracing::info!(asset = %asset, "Asset verified as tradable");
        Ok(())
    }

    fn feed(&self) -> MarketDataFeed<'_, E> {
        MarketDataFeed::new(
            &self.exchange,
            &self.parameters.asset,
            self.parameters.interval,
        )
    }

    /// `limit` most recent candles of the configured asset, oldest first
    pub async fn fetch_candles(&self, limit: u32) -> Result<Vec<Candle>> {
        self.feed().fetch_candles(limit).await
    }

    /// Close of the most recent candle
    pub async fn current_price(&self) -> Result<Decimal> {
        self.feed().current_price().await
    }

    /// Fetch the configured window and compute its lower band
    pub async fn lower_band(&self) -> Result<Decimal> {
        let candles = self.fetch_candles(self.window.fetch_limit).await?;
        let window = select_window(&candles, self.window.period, self.window.anchor)?;
        let band = lower_band(window, self.window.period)?;

        tracing::debug!(
            asset = %self.parameters.asset,
            lower_band = %band,
            anchor = ?self.window.anchor,
            "Computed lower band"
        );
        Ok(band)
    }

    /// Free balance of `asset`
    pub async fn asset_balance(&self, asset: &str) -> Result<Decimal> {
        get_free_balance(&self.exchange, asset).await
    }

    /// Buy floor(trade amount / price) units: Flat -> Long
    ///
    /// The entry price is the buy's average fill, or `current_price` when the
    /// exchange did not report one. On any failure the state stays Flat.
    pub async fn enter(&mut self, current_price: Decimal) -> Result<Position> {
        if let PositionState::Long(position) = &self.state {
            return Err(BotError::PositionAlreadyOpen(position.symbol.clone()));
        }
        if !self.asset_verified {
            return Err(BotError::InvalidParameter(format!(
                "{} has not been verified as tradable",
                self.parameters.asset
            )));
        }

        let (quantity, unallocated) = order_quantity(self.parameters.trade_amount, current_price)?;
        let confirmation = self
            .exchange
            .place_market_buy(&self.parameters.asset, quantity)
            .await?;

        let position = Position {
            id: Uuid::new_v4(),
            symbol: self.parameters.asset.clone(),
            quantity,
            entry_price: confirmation.average_price().unwrap_or(current_price),
            unallocated,
            opened_at: Utc::now(),
            buy_order_id: confirmation.order_id,
        };

        tracing::info!(
            asset = %position.symbol,
            quantity = position.quantity,
            entry_price = %position.entry_price,
            unallocated = %position.unallocated,
            "Opened position"
        );

        self.state = PositionState::Long(position.clone());
        Ok(position)
    }

    /// Sell the open position's quantity: Long -> Flat
    ///
    /// Fails with `NoOpenPosition` while Flat without contacting the exchange.
    /// If the sell fails the position is kept.
    pub async fn exit(&mut self) -> Result<ClosedPosition> {
        let position = match std::mem::take(&mut self.state) {
            PositionState::Flat => return Err(BotError::NoOpenPosition),
            PositionState::Long(position) => position,
        };

        match self
            .exchange
            .place_market_sell(&position.symbol, position.quantity)
            .await
        {
            Ok(sell) => {
                tracing::info!(
                    asset = %position.symbol,
                    quantity = position.quantity,
                    order_id = sell.order_id,
                    "Closed position"
                );
                Ok(ClosedPosition {
                    position,
                    sell,
                    closed_at: Utc::now(),
                })
            }
            Err(e) => {
                tracing::warn!(asset = %position.symbol, "Sell failed, position kept: {}", e);
                self.state = PositionState::Long(position);
                Err(e)
            }
        }
    }
}

/// Whole units affordable with `trade_amount` at `price`, and the remainder
///
/// The quantity is truncated toward zero.
pub fn order_quantity(trade_amount: Decimal, price: Decimal) -> Result<(u64, Decimal)> {
    if price <= Decimal::ZERO {
        return Err(BotError::InvalidParameter(format!(
            "price must be positive, got {}",
            price
        )));
    }

    let units = trade_amount
        .checked_div(price)
        .ok_or_else(|| {
            BotError::InvalidParameter(format!("{} / {} overflows", trade_amount, price))
        })?
        .trunc();

    let quantity = units.to_u64().ok_or_else(|| {
        BotError::InvalidParameter(format!("quantity {} is out of range", units))
    })?;
    if quantity == 0 {
        return Err(BotError::InvalidParameter(format!(
            "trade amount {} buys less than one unit at {}",
            trade_amount, price
        )));
    }

    Ok((quantity, trade_amount - units * price))
}
