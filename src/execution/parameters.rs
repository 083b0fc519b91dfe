use rust_decimal::Decimal;

use crate::error::BotError;
use crate::models::Interval;
use crate::Result;

/// Session trading parameters
#[derive(Debug, Clone, PartialEq)]
pub struct TradingParameters {
    pub asset: String,
    /// Quote amount spent per entry
    pub trade_amount: Decimal,
    pub interval: Interval,
}

/// Holds the parameters chosen at session setup
///
/// Set once; a configured store refuses further `setup` calls.
#[derive(Debug, Default)]
pub struct ParameterStore {
    params: Option<TradingParameters>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store asset, amount and interval code for the session
    ///
    /// The interval code is resolved here, so an unsupported code fails before
    /// anything touches the network.
    pub fn setup(&mut self, asset: &str, trade_amount: Decimal, interval: &str) -> Result<()> {
        if self.is_configured() {
            return Err(BotError::InvalidParameter(
                "trading parameters are already set for this session".to_string(),
            ));
        }

        let interval: Interval = interval.parse()?;
        self.params = Some(TradingParameters {
            asset: asset.to_string(),
            trade_amount,
            interval,
        });

        tracing::info!(
            asset = %asset,
            trade_amount = %trade_amount,
            interval = %interval,
            "Trading parameters set"
        );
        Ok(())
    }

    /// True iff an asset and a positive trade amount are set
    pub fn is_configured(&self) -> bool {
        matches!(&self.params, Some(p) if !p.asset.is_empty() && p.trade_amount > Decimal::ZERO)
    }

    pub fn parameters(&self) -> Result<&TradingParameters> {
        match &self.params {
            Some(p) if self.is_configured() => Ok(p),
            Some(p) => Err(BotError::InvalidParameter(format!(
                "asset {:?} with trade amount {} is not a usable configuration",
                p.asset, p.trade_amount
            ))),
            None => Err(BotError::InvalidParameter(
                "trading parameters have not been set".to_string(),
            )),
        }
    }
}
