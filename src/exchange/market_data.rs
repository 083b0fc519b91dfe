use rust_decimal::Decimal;

use super::Exchange;
use crate::error::BotError;
use crate::models::{Candle, Interval};
use crate::Result;

/// Candle retrieval for one symbol and interval, normalised to chronological order
pub struct MarketDataFeed<'a, E: Exchange + ?Sized> {
    exchange: &'a E,
    symbol: &'a str,
    interval: Interval,
}

impl<'a, E: Exchange + ?Sized> MarketDataFeed<'a, E> {
    pub fn new(exchange: &'a E, symbol: &'a str, interval: Interval) -> Self {
        Self {
            exchange,
            symbol,
            interval,
        }
    }

    /// Fetch the `limit` most recent candles, oldest first
    ///
    /// The exchange may return the window in either direction; candles are
    /// re-sorted on open time so callers always see ascending order.
    pub async fn fetch_candles(&self, limit: u32) -> Result<Vec<Candle>> {
        if limit == 0 {
            return Err(BotError::InvalidParameter(
                "candle limit must be positive".to_string(),
            ));
        }

        let mut candles = self
            .exchange
            .get_candles(self.symbol, self.interval, limit)
            .await?;

        candles.sort_by_key(|c| c.open_time);
        candles.dedup_by_key(|c| c.open_time);

        let wanted = limit as usize;
        if candles.len() < wanted {
            return Err(BotError::InsufficientData {
                required: wanted,
                available: candles.len(),
            });
        }
        if candles.len() > wanted {
            candles.drain(..candles.len() - wanted);
        }

        tracing::debug!(
            symbol = %self.symbol,
            interval = %self.interval,
            count = candles.len(),
            "Fetched candles"
        );

        Ok(candles)
    }

    /// Close of the single most recent candle
    pub async fn current_price(&self) -> Result<Decimal> {
        let candles = self.fetch_candles(1).await?;
        candles
            .last()
            .map(|c| c.close)
            .ok_or(BotError::InsufficientData {
                required: 1,
                available: 0,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::fake::{candles_from_closes, FakeExchange};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_reversed_window_is_restored_to_ascending() {
        let candles = candles_from_closes(&[dec!(1), dec!(2), dec!(3), dec!(4)]);
        let exchange = FakeExchange::new().with_candles(candles).newest_first();

        let feed = MarketDataFeed::new(&exchange, "BTCUSDT", Interval::M15);
        let fetched = feed.fetch_candles(4).await.unwrap();

        assert_eq!(fetched.len(), 4);
        assert!(fetched.windows(2).all(|w| w[0].open_time < w[1].open_time));
        assert_eq!(fetched[0].close, dec!(1));
        assert_eq!(fetched[3].close, dec!(4));
    }

    #[tokio::test]
    async fn test_ascending_window_is_kept() {
        let candles = candles_from_closes(&[dec!(5), dec!(6), dec!(7)]);
        let exchange = FakeExchange::new().with_candles(candles);

        let feed = MarketDataFeed::new(&exchange, "BTCUSDT", Interval::H1);
        let fetched = feed.fetch_candles(3).await.unwrap();

        let closes: Vec<Decimal> = fetched.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![dec!(5), dec!(6), dec!(7)]);
        assert_eq!(exchange.candle_requests(), vec![("BTCUSDT".to_string(), Interval::H1, 3)]);
    }

    #[tokio::test]
    async fn test_short_history_is_insufficient() {
        let exchange = FakeExchange::new().with_candles(candles_from_closes(&[dec!(1); 10]));
        let feed = MarketDataFeed::new(&exchange, "BTCUSDT", Interval::D1);

        let err = feed.fetch_candles(25).await.unwrap_err();
        assert!(matches!(
            err,
            BotError::InsufficientData {
                required: 25,
                available: 10
            }
        ));
    }

    #[tokio::test]
    async fn test_current_price_is_latest_close() {
        let exchange =
            FakeExchange::new().with_candles(candles_from_closes(&[dec!(10), dec!(11), dec!(12.5)]));
        let feed = MarketDataFeed::new(&exchange, "BTCUSDT", Interval::M30);

        assert_eq!(feed.current_price().await.unwrap(), dec!(12.5));
        assert_eq!(exchange.candle_requests()[0].2, 1);
    }

    #[tokio::test]
    async fn test_exchange_errors_propagate() {
        let exchange = FakeExchange::new().failing_candles();
        let feed = MarketDataFeed::new(&exchange, "BTCUSDT", Interval::M15);

        let err = feed.fetch_candles(5).await.unwrap_err();
        assert!(matches!(err, BotError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_zero_limit_rejected_before_network() {
        let exchange = FakeExchange::new();
        let feed = MarketDataFeed::new(&exchange, "BTCUSDT", Interval::M15);

        assert!(matches!(
            feed.fetch_candles(0).await,
            Err(BotError::InvalidParameter(_))
        ));
        assert!(exchange.candle_requests().is_empty());
    }
}
