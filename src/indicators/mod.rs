// Technical indicators module
// Volatility band (Bollinger-style) over candle closes

pub mod bollinger;
pub mod moving_average;

pub use bollinger::{
    calculate_bollinger_bands, compute_lower_band, lower_band, select_window, BandAnchor,
    BollingerBands, BAND_PERIOD, BAND_STD_DEV_MULTIPLIER,
};
pub use moving_average::{calculate_sma, calculate_std_dev};
