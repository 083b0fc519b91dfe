// Exchange access: the trait the trading core depends on, and its Binance implementation
pub mod binance;
pub mod market_data;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{AssetBalance, Candle, Interval, OrderConfirmation, Ticker};
use crate::Result;

pub use binance::{ApiCredentials, BinanceClient};
pub use market_data::MarketDataFeed;

/// Spot exchange operations the agent relies on
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn get_asset_balance(&self, asset: &str) -> Result<AssetBalance>;

    async fn get_all_tickers(&self) -> Result<Vec<Ticker>>;

    /// Most recent `limit` candles, in whatever order the exchange sends them
    async fn get_candles(&self, symbol: &str, interval: Interval, limit: u32)
        -> Result<Vec<Candle>>;

    async fn place_market_buy(&self, symbol: &str, quantity: u64) -> Result<OrderConfirmation>;

    async fn place_market_sell(&self, symbol: &str, quantity: u64) -> Result<OrderConfirmation>;
}

/// Free (unlocked) balance of `asset`
pub async fn get_free_balance<E: Exchange + ?Sized>(exchange: &E, asset: &str) -> Result<Decimal> {
    let balance = exchange.get_asset_balance(asset).await?;
    tracing::debug!(asset = %asset, free = %balance.free, locked = %balance.locked, "Fetched balance");
    Ok(balance.free)
}
