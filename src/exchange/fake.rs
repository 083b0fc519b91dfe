use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Mutex;

use super::Exchange;
use crate::error::BotError;
use crate::models::{AssetBalance, Candle, Interval, OrderConfirmation, OrderSide, Ticker};
use crate::Result;

/// Fifteen-minute candles starting 2024-01-01, one per close
pub(crate) fn candles_from_closes(closes: &[Decimal]) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| {
            let open_time = start + Duration::minutes(15 * i as i64);
            Candle {
                open_time,
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                volume: Decimal::ONE,
                close_time: open_time + Duration::minutes(15) - Duration::milliseconds(1),
            }
        })
        .collect()
}

#[derive(Default)]
struct FakeState {
    candle_requests: Vec<(String, Interval, u32)>,
    orders: Vec<(OrderSide, String, u64)>,
    ticker_requests: usize,
}

/// In-memory exchange that records every call
#[derive(Default)]
pub(crate) struct FakeExchange {
    candles: Vec<Candle>,
    newest_first: bool,
    tickers: Vec<Ticker>,
    balances: Vec<AssetBalance>,
    fail_candles: bool,
    reject_orders: Option<(i64, String)>,
    fail_sells: bool,
    fill_price: Option<Decimal>,
    state: Mutex<FakeState>,
}

impl FakeExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Candles in ascending order; the fake serves the newest `limit` of them
    pub fn with_candles(mut self, candles: Vec<Candle>) -> Self {
        self.candles = candles;
        self
    }

    /// Serve candle windows newest first
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    pub fn with_tickers(mut self, symbols: &[&str]) -> Self {
        self.tickers = symbols
            .iter()
            .map(|s| Ticker {
                symbol: s.to_string(),
                price: Decimal::ONE,
            })
            .collect();
        self
    }

    pub fn with_balance(mut self, asset: &str, free: Decimal, locked: Decimal) -> Self {
        self.balances.push(AssetBalance {
            asset: asset.to_string(),
            free,
            locked,
        });
        self
    }

    pub fn failing_candles(mut self) -> Self {
        self.fail_candles = true;
        self
    }

    pub fn rejecting_orders(mut self, code: i64, message: &str) -> Self {
        self.reject_orders = Some((code, message.to_string()));
        self
    }

    /// Report fills at `price`; without it fills carry no quote amount
    pub fn with_fill_price(mut self, price: Decimal) -> Self {
        self.fill_price = Some(price);
        self
    }

    pub fn failing_sells(mut self) -> Self {
        self.fail_sells = true;
        self
    }

    pub fn candle_requests(&self) -> Vec<(String, Interval, u32)> {
        self.state.lock().unwrap().candle_requests.clone()
    }

    pub fn orders(&self) -> Vec<(OrderSide, String, u64)> {
        self.state.lock().unwrap().orders.clone()
    }

    pub fn ticker_requests(&self) -> usize {
        self.state.lock().unwrap().ticker_requests
    }

    fn submit(&self, side: OrderSide, symbol: &str, quantity: u64) -> Result<OrderConfirmation> {
        if let Some((code, message)) = &self.reject_orders {
            return Err(BotError::OrderRejected {
                code: *code,
                message: message.clone(),
            });
        }
        if self.fail_sells && side == OrderSide::Sell {
            return Err(BotError::transient("connection reset"));
        }

        let mut state = self.state.lock().unwrap();
        state.orders.push((side, symbol.to_string(), quantity));

        Ok(OrderConfirmation {
            order_id: state.orders.len() as i64,
            client_order_id: format!("fake-{}", state.orders.len()),
            symbol: symbol.to_string(),
            side,
            executed_qty: Decimal::from(quantity),
            quote_qty: self
                .fill_price
                .map_or(Decimal::ZERO, |price| price * Decimal::from(quantity)),
            status: "FILLED".to_string(),
        })
    }
}

#[async_trait]
impl Exchange for FakeExchange {
    async fn get_asset_balance(&self, asset: &str) -> Result<AssetBalance> {
        self.balances
            .iter()
            .find(|b| b.asset == asset)
            .cloned()
            .ok_or_else(|| BotError::connection("invalid api key"))
    }

    async fn get_all_tickers(&self) -> Result<Vec<Ticker>> {
        self.state.lock().unwrap().ticker_requests += 1;
        Ok(self.tickers.clone())
    }

    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        self.state
            .lock()
            .unwrap()
            .candle_requests
            .push((symbol.to_string(), interval, limit));

        if self.fail_candles {
            return Err(BotError::transient("exchange unreachable"));
        }

        let skip = self.candles.len().saturating_sub(limit as usize);
        let mut window: Vec<Candle> = self.candles[skip..].to_vec();
        if self.newest_first {
            window.reverse();
        }
        Ok(window)
    }

    async fn place_market_buy(&self, symbol: &str, quantity: u64) -> Result<OrderConfirmation> {
        self.submit(OrderSide::Buy, symbol, quantity)
    }

    async fn place_market_sell(&self, symbol: &str, quantity: u64) -> Result<OrderConfirmation> {
        self.submit(OrderSide::Sell, symbol, quantity)
    }
}
