use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BotError;

/// Chart interval supported by the agent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Interval {
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H12,
    D1,
}

impl Interval {
    pub const ALL: [Interval; 8] = [
        Interval::M15,
        Interval::M30,
        Interval::H1,
        Interval::H2,
        Interval::H4,
        Interval::H6,
        Interval::H12,
        Interval::D1,
    ];

    /// Human-facing code, as typed at setup
    pub fn code(&self) -> &'static str {
        match self {
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1H",
            Interval::H2 => "2H",
            Interval::H4 => "4H",
            Interval::H6 => "6H",
            Interval::H12 => "12H",
            Interval::D1 => "1D",
        }
    }

    /// Interval token understood by the exchange kline endpoint
    pub fn exchange_token(&self) -> &'static str {
        match self {
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H2 => "2h",
            Interval::H4 => "4h",
            Interval::H6 => "6h",
            Interval::H12 => "12h",
            Interval::D1 => "1d",
        }
    }
}

impl FromStr for Interval {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .into_iter()
            .find(|interval| interval.code() == s)
            .ok_or_else(|| BotError::InvalidInterval(s.to_string()))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// OHLCV candlestick as returned by the exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
}

/// Latest price for one listed symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticker {
    pub symbol: String,
    pub price: Decimal,
}

/// Account balance for a single asset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Exchange acknowledgement of a submitted market order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderConfirmation {
    pub order_id: i64,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub executed_qty: Decimal,
    /// Quote amount actually spent or received
    pub quote_qty: Decimal,
    pub status: String,
}

impl OrderConfirmation {
    /// Quote amount per unit filled, if the exchange reported both sides of the fill
    pub fn average_price(&self) -> Option<Decimal> {
        if self.executed_qty.is_zero() || self.quote_qty.is_zero() {
            return None;
        }
        self.quote_qty.checked_div(self.executed_qty)
    }
}

/// Stored exchange credentials for one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub api_key: String,
    pub secret_key: String,
}

/// A completed buy+sell round trip
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub asset: String,
    pub trade_size: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub gain_percent: Decimal,
}
