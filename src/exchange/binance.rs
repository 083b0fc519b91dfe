use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::Exchange;
use crate::config::ExchangeSettings;
use crate::error::BotError;
use crate::models::{AssetBalance, Candle, Interval, OrderConfirmation, OrderSide, Ticker};
use crate::Result;

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// API key pair used to sign private requests
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub secret_key: String,
}

/// Binance spot REST client with request signing, rate limiting and retries
///
/// Cloneable; clones share the same rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    credentials: ApiCredentials,
    recv_window_ms: u64,
    max_retries: u32,
    retry_base_delay: Duration,
    rate_limiter: Arc<BinanceRateLimiter>,
}

/// Error body returned on 4xx responses
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    symbol: String,
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: i64,
    client_order_id: String,
    executed_qty: String,
    cummulative_quote_qty: String,
    status: String,
}

/// Which kind of endpoint a failed request hit, for error classification
#[derive(Debug, Clone, Copy, PartialEq)]
enum Endpoint {
    Market,
    Account,
    Order,
}

impl BinanceClient {
    pub fn new(settings: &ExchangeSettings, credentials: ApiCredentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| BotError::connection(format!("failed to build HTTP client: {}", e)))?;

        let rpm = NonZeroU32::new(settings.requests_per_minute).ok_or_else(|| {
            BotError::InvalidParameter("requests_per_minute must be positive".to_string())
        })?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            credentials,
            recv_window_ms: settings.recv_window_ms,
            max_retries: settings.max_retries.max(1),
            retry_base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            rate_limiter,
        })
    }

    /// HMAC-SHA256 of the query string, hex encoded
    fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret_key.as_bytes())
            .map_err(|e| BotError::InvalidParameter(format!("unusable secret key: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn build_url(&self, path: &str, params: &[(&str, String)], signed: bool) -> Result<String> {
        let mut query = encode_query(params);

        if signed {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&format!(
                "recvWindow={}&timestamp={}",
                self.recv_window_ms,
                Utc::now().timestamp_millis()
            ));
            let signature = self.sign(&query)?;
            query.push_str(&format!("&signature={}", signature));
        }

        if query.is_empty() {
            Ok(format!("{}{}", self.base_url, path))
        } else {
            Ok(format!("{}{}?{}", self.base_url, path, query))
        }
    }

    /// Send a rate-limited request, retrying transient failures with exponential backoff
    ///
    /// Signed requests are re-signed on every attempt so the timestamp stays fresh.
    /// Orders are sent exactly once: a resent market order may fill twice.
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
        endpoint: Endpoint,
    ) -> Result<reqwest::Response> {
        let mut last_error = None;
        let attempts = match endpoint {
            Endpoint::Order => 1,
            Endpoint::Market | Endpoint::Account => self.max_retries,
        };

        for attempt in 1..=attempts {
            self.rate_limiter.until_ready().await;

            let url = self.build_url(path, params, signed)?;
            let mut builder = self.client.request(method.clone(), &url);
            if signed {
                builder = builder.header(API_KEY_HEADER, &self.credentials.api_key);
            }

            let error = match builder.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => classify_failure(response, endpoint).await,
                Err(e) => BotError::from(e),
            };

            if !error.is_transient() {
                return Err(error);
            }

            if attempt < attempts {
                let backoff = self.retry_base_delay * 2u32.pow(attempt - 1);
                tracing::warn!(
                    "{} {} failed: {}, retrying in {:?} (attempt {}/{})",
                    method,
                    path,
                    error,
                    backoff,
                    attempt,
                    attempts
                );
                tokio::time::sleep(backoff).await;
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| {
            BotError::transient(format!("{} failed after {} attempts", path, attempts))
        }))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: u64,
    ) -> Result<OrderConfirmation> {
        let client_order_id = Uuid::new_v4().simple().to_string();
        let params = [
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.to_string()),
            ("newClientOrderId", client_order_id),
        ];

        let response = self
            .request(Method::POST, "/api/v3/order", &params, true, Endpoint::Order)
            .await?;
        let order: OrderResponse = response.json().await?;

        tracing::info!(
            symbol = %order.symbol,
            side = side.as_str(),
            order_id = order.order_id,
            executed_qty = %order.executed_qty,
            status = %order.status,
            "Market order accepted"
        );

        Ok(OrderConfirmation {
            order_id: order.order_id,
            client_order_id: order.client_order_id,
            symbol: order.symbol,
            side,
            executed_qty: parse_decimal(&order.executed_qty)?,
            quote_qty: parse_decimal(&order.cummulative_quote_qty)?,
            status: order.status,
        })
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    async fn get_asset_balance(&self, asset: &str) -> Result<AssetBalance> {
        let response = self
            .request(Method::GET, "/api/v3/account", &[], true, Endpoint::Account)
            .await?;
        let account: AccountResponse = response.json().await?;

        // Assets the account never held are absent from the list
        match account.balances.into_iter().find(|b| b.asset == asset) {
            Some(entry) => Ok(AssetBalance {
                asset: entry.asset,
                free: parse_decimal(&entry.free)?,
                locked: parse_decimal(&entry.locked)?,
            }),
            None => Ok(AssetBalance {
                asset: asset.to_string(),
                free: Decimal::ZERO,
                locked: Decimal::ZERO,
            }),
        }
    }

    async fn get_all_tickers(&self) -> Result<Vec<Ticker>> {
        let response = self
            .request(Method::GET, "/api/v3/ticker/price", &[], false, Endpoint::Market)
            .await?;
        let entries: Vec<TickerEntry> = response.json().await?;

        tracing::debug!("Fetched {} tickers", entries.len());

        entries
            .into_iter()
            .map(|t| {
                Ok(Ticker {
                    price: parse_decimal(&t.price)?,
                    symbol: t.symbol,
                })
            })
            .collect()
    }

    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let params = [
            ("symbol", symbol.to_string()),
            ("interval", interval.exchange_token().to_string()),
            ("limit", limit.to_string()),
        ];

        let response = self
            .request(Method::GET, "/api/v3/klines", &params, false, Endpoint::Market)
            .await?;
        let rows: Vec<Vec<Value>> = response.json().await?;

        tracing::debug!("Fetched {} {} candles for {}", rows.len(), interval, symbol);

        rows.iter().map(|row| parse_kline(row)).collect()
    }

    async fn place_market_buy(&self, symbol: &str, quantity: u64) -> Result<OrderConfirmation> {
        self.place_market_order(symbol, OrderSide::Buy, quantity).await
    }

    async fn place_market_sell(&self, symbol: &str, quantity: u64) -> Result<OrderConfirmation> {
        self.place_market_order(symbol, OrderSide::Sell, quantity).await
    }
}

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Map a non-2xx response onto the error taxonomy
async fn classify_failure(response: reqwest::Response, endpoint: Endpoint) -> BotError {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return BotError::transient(format!("exchange returned {}", status));
    }

    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    match (serde_json::from_str::<ApiErrorBody>(&text), endpoint) {
        (Ok(body), Endpoint::Order) if status.is_client_error() => BotError::OrderRejected {
            code: body.code,
            message: body.msg,
        },
        (Ok(body), _) => {
            BotError::connection(format!("exchange error {} ({}): {}", status, body.code, body.msg))
        }
        (Err(_), _) => BotError::connection(format!("exchange error {}: {}", status, text)),
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| BotError::Decode(format!("bad decimal {:?}: {}", raw, e)))
}

fn parse_time(value: &Value) -> Result<DateTime<Utc>> {
    let millis = value
        .as_i64()
        .ok_or_else(|| BotError::Decode(format!("expected millisecond timestamp, got {}", value)))?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| BotError::Decode(format!("timestamp {} out of range", millis)))
}

fn parse_price(value: &Value) -> Result<Decimal> {
    let raw = value
        .as_str()
        .ok_or_else(|| BotError::Decode(format!("expected decimal string, got {}", value)))?;
    parse_decimal(raw)
}

/// Kline row: [open time, open, high, low, close, volume, close time, ...]
fn parse_kline(row: &[Value]) -> Result<Candle> {
    if row.len() < 7 {
        return Err(BotError::Decode(format!(
            "kline row has {} fields, expected at least 7",
            row.len()
        )));
    }

    Ok(Candle {
        open_time: parse_time(&row[0])?,
        open: parse_price(&row[1])?,
        high: parse_price(&row[2])?,
        low: parse_price(&row[3])?,
        close: parse_price(&row[4])?,
        volume: parse_price(&row[5])?,
        close_time: parse_time(&row[6])?,
    })
}
