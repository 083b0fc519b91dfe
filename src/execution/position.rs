use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{OrderConfirmation, TradeRecord};

/// Holding opened by a market buy, consumed by the paired sell
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    /// Whole units bought
    pub quantity: u64,
    pub entry_price: Decimal,
    /// Part of the trade amount left over after flooring the quantity
    pub unallocated: Decimal,
    pub opened_at: DateTime<Utc>,
    pub buy_order_id: i64,
}

/// Flat (no holding) or Long (one open position)
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PositionState {
    #[default]
    Flat,
    Long(Position),
}

impl PositionState {
    pub fn position(&self) -> Option<&Position> {
        match self {
            PositionState::Flat => None,
            PositionState::Long(position) => Some(position),
        }
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, PositionState::Flat)
    }
}

/// Result of a successful exit
#[derive(Debug, Clone)]
pub struct ClosedPosition {
    pub position: Position,
    pub sell: OrderConfirmation,
    pub closed_at: DateTime<Utc>,
}

impl ClosedPosition {
    /// Average fill price of the sell, if the exchange reported the quote amount
    pub fn average_fill_price(&self) -> Option<Decimal> {
        self.sell.average_price()
    }

    /// Round-trip record for the trade log
    pub fn trade_record(&self, exit_price: Decimal) -> TradeRecord {
        let entry = self.position.entry_price;
        let gain_percent = if entry.is_zero() {
            Decimal::ZERO
        } else {
            ((exit_price - entry) / entry * Decimal::ONE_HUNDRED).round_dp(2)
        };

        TradeRecord {
            timestamp: self.closed_at,
            asset: self.position.symbol.clone(),
            trade_size: Decimal::from(self.position.quantity),
            entry_price: entry,
            exit_price,
            gain_percent,
        }
    }
}
