use thiserror::Error;

/// Every failure the trading pipeline can surface to the driver loop
#[derive(Error, Debug)]
pub enum BotError {
    /// Exchange unreachable, timed out, or refused our credentials
    #[error("exchange connection failed: {message}")]
    Connection {
        message: String,
        /// Safe to retry (network error, 429, 5xx)
        transient: bool,
    },

    #[error("unsupported interval code: {0}")]
    InvalidInterval(String),

    #[error("invalid trading parameter: {0}")]
    InvalidParameter(String),

    #[error("insufficient candle data: need {required}, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("no open position to sell")]
    NoOpenPosition,

    #[error("position already open for {0}")]
    PositionAlreadyOpen(String),

    #[error("order rejected by exchange (code {code}): {message}")]
    OrderRejected { code: i64, message: String },

    #[error("user {0} already exists")]
    DuplicateUser(String),

    #[error("malformed exchange payload: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl BotError {
    pub fn connection(message: impl Into<String>) -> Self {
        BotError::Connection {
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        BotError::Connection {
            message: message.into(),
            transient: true,
        }
    }

    /// Whether a retry with backoff could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, BotError::Connection { transient: true, .. })
    }
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BotError::Decode(e.to_string())
        } else {
            // Timeouts and connect failures are worth another attempt
            BotError::Connection {
                transient: e.is_timeout() || e.is_connect() || e.is_request(),
                message: e.to_string(),
            }
        }
    }
}
