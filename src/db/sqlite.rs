use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::error::BotError;
use crate::models::{TradeRecord, UserRecord};
use crate::Result;

const CREATE_USER_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS user_data (
        username TEXT NOT NULL,
        password TEXT NOT NULL,
        api_key TEXT NOT NULL,
        secret_key TEXT NOT NULL
    )
"#;

const CREATE_USERNAME_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS user_data_username ON user_data (username)";

const CREATE_TRADE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS trade_data (
        datetime TEXT NOT NULL,
        asset TEXT NOT NULL,
        trade_size TEXT NOT NULL,
        trade_entry TEXT NOT NULL,
        trade_exit TEXT NOT NULL,
        gain_percent TEXT NOT NULL
    )
"#;

/// SQLite persistence for user credentials and the trade log
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database and ensure both tables exist
    ///
    /// # Arguments
    /// * `database_url` - e.g. `sqlite://trade_bot.db`
    /// * `max_connections` - pool size
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;

        tracing::info!("Connected to SQLite at {}", database_url);
        Ok(store)
    }

    /// Private in-memory database, for tests and dry runs
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(CREATE_USER_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_TRADE_TABLE).execute(&self.pool).await?;

        // Databases written before usernames were unique may hold duplicates
        let duplicated: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM (
                SELECT username FROM user_data GROUP BY username HAVING COUNT(*) > 1
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        if duplicated > 0 {
            tracing::warn!(
                "{} usernames are stored more than once; skipping the unique index, logins use the first record",
                duplicated
            );
        } else {
            sqlx::query(CREATE_USERNAME_INDEX).execute(&self.pool).await?;
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Store a new credential record; usernames are unique
    pub async fn create_user(&self, user: &UserRecord) -> Result<()> {
        // The index may be missing on a legacy database
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM user_data WHERE username = ? LIMIT 1")
                .bind(&user.username)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(BotError::DuplicateUser(user.username.clone()));
        }

        let result = sqlx::query(
            "INSERT INTO user_data (username, password, api_key, secret_key) VALUES (?, ?, ?, ?)",
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.api_key)
        .bind(&user.secret_key)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::info!("Created user {}", user.username);
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(BotError::DuplicateUser(user.username.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// First stored record for `username`, if any
    pub async fn get_user_data(&self, username: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            r#"
            SELECT username, password, api_key, secret_key
            FROM user_data
            WHERE username = ?
            ORDER BY rowid ASC
            LIMIT 1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<UserRecord> {
            Ok(UserRecord {
                username: row.try_get("username")?,
                password_hash: row.try_get("password")?,
                api_key: row.try_get("api_key")?,
                secret_key: row.try_get("secret_key")?,
            })
        })
        .transpose()
    }

    /// Append one completed round trip to the trade log
    pub async fn log_trade(&self, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_data (datetime, asset, trade_size, trade_entry, trade_exit, gain_percent)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(trade.timestamp.to_rfc3339())
        .bind(&trade.asset)
        .bind(trade.trade_size.to_string())
        .bind(trade.entry_price.to_string())
        .bind(trade.exit_price.to_string())
        .bind(trade.gain_percent.to_string())
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Logged {} trade: {} -> {} ({}%)",
            trade.asset,
            trade.entry_price,
            trade.exit_price,
            trade.gain_percent
        );

        Ok(())
    }

    /// Most recent trades, newest first
    pub async fn list_trades(&self, limit: u32) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT datetime, asset, trade_size, trade_entry, trade_exit, gain_percent
            FROM trade_data
            ORDER BY rowid DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut trades = Vec::with_capacity(rows.len());

        for row in rows {
            let datetime: String = row.try_get("datetime")?;
            let timestamp = DateTime::parse_from_rfc3339(&datetime)
                .map_err(|e| BotError::Decode(format!("bad trade datetime {:?}: {}", datetime, e)))?
                .with_timezone(&Utc);

            trades.push(TradeRecord {
                timestamp,
                asset: row.try_get("asset")?,
                trade_size: decimal_column(&row, "trade_size")?,
                entry_price: decimal_column(&row, "trade_entry")?,
                exit_price: decimal_column(&row, "trade_exit")?,
                gain_percent: decimal_column(&row, "gain_percent")?,
            });
        }

        Ok(trades)
    }

    /// Close the pool, flushing pending writes
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("SQLite store closed");
    }
}

fn decimal_column(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<Decimal> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw)
        .map_err(|e| BotError::Decode(format!("bad {} value {:?}: {}", column, raw, e)))
}
