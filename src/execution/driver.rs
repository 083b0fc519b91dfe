use rust_decimal::Decimal;

use super::executor::Executor;
use super::position::{Position, PositionState};
use crate::db::SqliteStore;
use crate::error::BotError;
use crate::exchange::Exchange;
use crate::models::TradeRecord;
use crate::Result;

/// What one decision cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Entered(Position),
    Exited(TradeRecord),
    /// No order placed; `lower_band` is only computed while Flat
    Held {
        price: Decimal,
        lower_band: Option<Decimal>,
    },
}

/// Single-threaded decision loop body: fetch -> compute -> decide -> order -> log
///
/// Buys when the price drops below the lower band, sells once the open
/// position gains `take_profit_pct` percent.
///
/// A completed trade whose log write fails stays in `unlogged` and is
/// written again at the start of every cycle and on shutdown.
pub struct Driver<E: Exchange> {
    executor: Executor<E>,
    store: SqliteStore,
    take_profit_pct: Decimal,
    unlogged: Vec<TradeRecord>,
}

impl<E: Exchange> Driver<E> {
    pub fn new(executor: Executor<E>, store: SqliteStore, take_profit_pct: f64) -> Result<Self> {
        let take_profit_pct = Decimal::from_f64_retain(take_profit_pct)
            .filter(|pct| *pct >= Decimal::ZERO)
            .ok_or_else(|| {
                BotError::InvalidParameter(format!(
                    "take_profit_pct must be a non-negative number, got {}",
                    take_profit_pct
                ))
            })?;

        Ok(Self {
            executor,
            store,
            take_profit_pct,
            unlogged: Vec::new(),
        })
    }

    pub fn executor(&self) -> &Executor<E> {
        &self.executor
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Sold round trips not yet in the trade log, oldest first
    pub fn unlogged_trades(&self) -> &[TradeRecord] {
        &self.unlogged
    }

    /// Write buffered trade records, stopping at the first failure
    async fn flush_unlogged(&mut self) -> Result<()> {
        while let Some(record) = self.unlogged.first() {
            self.store.log_trade(record).await?;
            self.unlogged.remove(0);
        }
        Ok(())
    }

    /// Price at which `position` is sold
    pub fn exit_target(&self, position: &Position) -> Decimal {
        position.entry_price * (Decimal::ONE + self.take_profit_pct / Decimal::ONE_HUNDRED)
    }

    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        if let Err(e) = self.flush_unlogged().await {
            tracing::warn!(pending = self.unlogged.len(), "Trade log still unavailable: {}", e);
        }

        let price = self.executor.current_price().await?;

        let target = match self.executor.state() {
            PositionState::Flat => None,
            PositionState::Long(position) => Some(self.exit_target(position)),
        };

        match target {
            None => {
                let band = self.executor.lower_band().await?;
                if price < band {
                    tracing::info!(price = %price, lower_band = %band, "Price below lower band, buying");
                    let position = self.executor.enter(price).await?;
                    Ok(CycleOutcome::Entered(position))
                } else {
                    tracing::debug!(price = %price, lower_band = %band, "Holding flat");
                    Ok(CycleOutcome::Held {
                        price,
                        lower_band: Some(band),
                    })
                }
            }
            Some(target) if price >= target => {
                tracing::info!(price = %price, target = %target, "Take-profit reached, selling");
                let closed = self.executor.exit().await?;
                let exit_price = closed.average_fill_price().unwrap_or(price);
                let record = closed.trade_record(exit_price);

                // The sell is final; the record must outlive a failed write
                self.unlogged.push(record.clone());
                if let Err(e) = self.flush_unlogged().await {
                    tracing::error!(
                        asset = %record.asset,
                        pending = self.unlogged.len(),
                        "Failed to log trade, will retry: {}",
                        e
                    );
                }
                Ok(CycleOutcome::Exited(record))
            }
            Some(target) => {
                tracing::debug!(price = %price, target = %target, "Holding position");
                Ok(CycleOutcome::Held {
                    price,
                    lower_band: None,
                })
            }
        }
    }

    /// Flush buffered trades, report any open position and close the store
    pub async fn shutdown(mut self) {
        if let Err(e) = self.flush_unlogged().await {
            for record in &self.unlogged {
                let row = serde_json::to_string(record).unwrap_or_else(|_| format!("{:?}", record));
                tracing::error!(trade = %row, "Trade not logged before shutdown: {}", e);
            }
        }
        if let Some(position) = self.executor.state().position() {
            tracing::warn!(
                asset = %position.symbol,
                quantity = position.quantity,
                entry_price = %position.entry_price,
                "Shutting down with an open position"
            );
        }
        self.store.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::fake::{candles_from_closes, FakeExchange};
    use crate::execution::{BandWindow, ParameterStore};
    use crate::models::OrderSide;
    use rust_decimal_macros::dec;

    async fn driver(closes: &[Decimal], amount: Decimal) -> Driver<FakeExchange> {
        let exchange = FakeExchange::new()
            .with_tickers(&["BTCUSDT"])
            .with_candles(candles_from_closes(closes));

        let mut params = ParameterStore::new();
        params.setup("BTCUSDT", amount, "1H").unwrap();

        let mut executor = Executor::new(exchange, &params, BandWindow::default()).unwrap();
        executor.verify_asset().await.unwrap();

        let store = SqliteStore::in_memory().await.unwrap();
        Driver::new(executor, store, 2.0).unwrap()
    }

    #[tokio::test]
    async fn test_holds_when_price_above_band() {
        let mut driver = driver(&[dec!(100); 25], dec!(1000)).await;

        let outcome = driver.run_cycle().await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Held {
                price: dec!(100),
                lower_band: Some(dec!(100))
            }
        );
        assert!(driver.executor().exchange().orders().is_empty());
    }

    #[tokio::test]
    async fn test_buys_below_band() {
        // Oldest 20 closes are flat at 100, the latest close drops to 90
        let mut closes = vec![dec!(100); 24];
        closes.push(dec!(90));
        let mut driver = driver(&closes, dec!(1000)).await;

        let outcome = driver.run_cycle().await.unwrap();

        match outcome {
            CycleOutcome::Entered(position) => {
                assert_eq!(position.quantity, 11);
                assert_eq!(position.entry_price, dec!(90));
            }
            other => panic!("expected entry, got {:?}", other),
        }
        assert_eq!(
            driver.executor().exchange().orders(),
            vec![(OrderSide::Buy, "BTCUSDT".to_string(), 11)]
        );
    }

    #[tokio::test]
    async fn test_holds_long_below_target() {
        let mut closes = vec![dec!(100); 24];
        closes.push(dec!(90));
        let mut driver = driver(&closes, dec!(1000)).await;
        driver.run_cycle().await.unwrap();

        // Same candles: price 90 is below the 91.8 target
        let outcome = driver.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Held {
                price: dec!(90),
                lower_band: None
            }
        );
    }

    #[tokio::test]
    async fn test_sells_and_logs_at_target() {
        let mut closes = vec![dec!(100); 24];
        closes.push(dec!(90));
        let exchange = FakeExchange::new()
            .with_tickers(&["BTCUSDT"])
            .with_candles(candles_from_closes(&closes));
        let mut params = ParameterStore::new();
        params.setup("BTCUSDT", dec!(1000), "1H").unwrap();
        let mut executor = Executor::new(exchange, &params, BandWindow::default()).unwrap();
        executor.verify_asset().await.unwrap();
        executor.enter(dec!(80)).await.unwrap();

        let store = SqliteStore::in_memory().await.unwrap();
        let mut driver = Driver::new(executor, store, 2.0).unwrap();

        // 90 >= 80 * 1.02
        let outcome = driver.run_cycle().await.unwrap();

        let record = match outcome {
            CycleOutcome::Exited(record) => record,
            other => panic!("expected exit, got {:?}", other),
        };
        assert_eq!(record.trade_size, dec!(12));
        assert_eq!(record.entry_price, dec!(80));
        assert_eq!(record.exit_price, dec!(90));
        assert_eq!(record.gain_percent, dec!(12.5));
        assert!(driver.executor().state().is_flat());

        let logged = driver.store().list_trades(10).await.unwrap();
        assert_eq!(logged, vec![record]);
    }

    async fn long_driver() -> Driver<FakeExchange> {
        let mut closes = vec![dec!(100); 24];
        closes.push(dec!(90));
        let exchange = FakeExchange::new()
            .with_tickers(&["BTCUSDT"])
            .with_candles(candles_from_closes(&closes));
        let mut params = ParameterStore::new();
        params.setup("BTCUSDT", dec!(1000), "1H").unwrap();
        let mut executor = Executor::new(exchange, &params, BandWindow::default()).unwrap();
        executor.verify_asset().await.unwrap();
        executor.enter(dec!(80)).await.unwrap();

        let store = SqliteStore::in_memory().await.unwrap();
        Driver::new(executor, store, 2.0).unwrap()
    }

    #[tokio::test]
    async fn test_sold_trade_kept_when_log_write_fails() {
        let mut driver = long_driver().await;
        driver.store().close().await;

        let outcome = driver.run_cycle().await.unwrap();

        let record = match outcome {
            CycleOutcome::Exited(record) => record,
            other => panic!("expected exit, got {:?}", other),
        };
        assert!(driver.executor().state().is_flat());
        assert_eq!(driver.executor().exchange().orders().len(), 2);
        assert_eq!(driver.unlogged_trades(), &[record][..]);
    }

    #[tokio::test]
    async fn test_unlogged_trade_written_on_next_cycle() {
        let mut driver = long_driver().await;
        sqlx::query("ALTER TABLE trade_data RENAME TO trade_data_offline")
            .execute(driver.store().pool())
            .await
            .unwrap();

        let record = match driver.run_cycle().await.unwrap() {
            CycleOutcome::Exited(record) => record,
            other => panic!("expected exit, got {:?}", other),
        };
        assert_eq!(driver.unlogged_trades().len(), 1);

        sqlx::query("ALTER TABLE trade_data_offline RENAME TO trade_data")
            .execute(driver.store().pool())
            .await
            .unwrap();

        // Flat again at price 90 vs band 100: buys, after flushing the backlog
        let outcome = driver.run_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Entered(_)));
        assert!(driver.unlogged_trades().is_empty());
        assert_eq!(driver.store().list_trades(10).await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn test_insufficient_history_propagates() {
        let mut driver = driver(&[dec!(100); 10], dec!(1000)).await;

        let err = driver.run_cycle().await.unwrap_err();
        assert!(matches!(err, BotError::InsufficientData { .. }));
    }

    #[tokio::test]
    async fn test_negative_take_profit_rejected() {
        let exchange = FakeExchange::new();
        let mut params = ParameterStore::new();
        params.setup("BTCUSDT", dec!(1), "1H").unwrap();
        let executor = Executor::new(exchange, &params, BandWindow::default()).unwrap();
        let store = SqliteStore::in_memory().await.unwrap();

        assert!(Driver::new(executor, store, -1.0).is_err());
    }
}
