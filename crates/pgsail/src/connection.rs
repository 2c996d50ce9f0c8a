//! Pooled access to PostgreSQL.
//!
//! Opening a [`Connection`] backs off and retries until the pool comes up.
//! Statements sent through an open pool run once; a failed statement is
//! reported to the caller as-is.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::executor::{ExecutorConfig, QueryExecutor};
use crate::query::CompiledQuery;
use crate::transaction::{Transaction, TransactionOptions};
use crate::types::{row_to_values, RawRow};
use crate::{AdapterError, Result};

/// Exponential backoff for pool startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts after the first one fails
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Fail on the first connect error.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Sleep taken after failed attempt number `attempt` (counting from 0).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let scaled = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        let ms = if attempt == 0 {
            self.initial_delay_ms
        } else {
            scaled.max(0.0) as u64
        };
        Duration::from_millis(ms)
    }

    /// Runs `attempt` until it succeeds or the retry budget is spent.
    ///
    /// The error of the final attempt is the one returned.
    pub async fn run<T, E, F, Fut>(&self, mut attempt: F) -> std::result::Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let mut tries = 0u32;
        loop {
            match attempt().await {
                Ok(value) => {
                    if tries > 0 {
                        info!(attempt = tries, "Connection established after retry");
                    }
                    return Ok(value);
                }
                Err(err) if tries < self.max_retries => {
                    let delay = self.delay_for_attempt(tries);
                    warn!(
                        attempt = tries,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Connection failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                    tries += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Sizing and timeouts for the sqlx pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    /// Seconds to wait when acquiring a pooled connection
    pub connect_timeout: u64,
    /// Seconds before a connection is recycled
    pub max_lifetime: Option<u64>,
    /// Seconds an idle connection may linger
    pub idle_timeout: Option<u64>,
    pub retry: RetryConfig,
    /// Per-connection prepared statement cache; 0 turns it off
    pub statement_cache_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            connect_timeout: 30,
            max_lifetime: Some(30 * 60),
            idle_timeout: Some(10 * 60),
            retry: RetryConfig::default(),
            statement_cache_capacity: 100,
        }
    }
}

impl PoolConfig {
    pub fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .min_connections(self.min_connections)
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout))
            .max_lifetime(self.max_lifetime.map(Duration::from_secs))
            .idle_timeout(self.idle_timeout.map(Duration::from_secs))
    }

    /// Parses `uri` and applies the statement cache size.
    pub fn connect_options(&self, uri: &str) -> Result<PgConnectOptions> {
        if uri.is_empty() {
            return Err(AdapterError::Connection(
                "Connection URI cannot be empty".to_string(),
            ));
        }
        PgConnectOptions::from_str(uri)
            .map(|opts| opts.statement_cache_capacity(self.statement_cache_capacity))
            .map_err(|e| AdapterError::Connection(format!("Invalid connection URI: {}", e)))
    }
}

/// A pooled PostgreSQL handle. Cloning shares the pool.
#[derive(Clone)]
pub struct Connection {
    pool: PgPool,
    executor: ExecutorConfig,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("size", &self.pool.size())
            .field("idle", &self.pool.num_idle())
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

impl Connection {
    /// Opens a pool for `uri` and checks it answers `SELECT 1`.
    ///
    /// # Errors
    ///
    /// `AdapterError::Connection` for an empty or unparsable URI. Otherwise
    /// the error of the last connect attempt once retries run out.
    #[instrument(skip(uri, config, executor), fields(
        min_connections = config.min_connections,
        max_connections = config.max_connections,
        max_retries = config.retry.max_retries
    ))]
    pub async fn new(uri: &str, config: PoolConfig, executor: ExecutorConfig) -> Result<Self> {
        let connect_options = config.connect_options(uri)?;
        let pool_options = config.pool_options();

        info!("Opening connection pool");
        let pool = config
            .retry
            .run(|| pool_options.clone().connect_with(connect_options.clone()))
            .await?;

        let conn = Self { pool, executor };
        conn.ping()
            .await
            .map_err(|e| AdapterError::Connection(format!("Failed to verify connection: {}", e)))?;

        info!(size = conn.pool.size(), "Connection pool ready");
        Ok(conn)
    }

    /// Adopts a pool built elsewhere.
    pub fn from_pool(pool: PgPool, executor: ExecutorConfig) -> Self {
        Self { pool, executor }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn executor_config(&self) -> &ExecutorConfig {
        &self.executor
    }

    pub async fn begin_transaction(&self, options: TransactionOptions) -> Result<Transaction> {
        Transaction::begin(self, options).await
    }

    /// Waits for checked-out connections to return, then closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl QueryExecutor for Connection {
    async fn execute(&self, query: &CompiledQuery) -> Result<Vec<RawRow>> {
        self.executor
            .timed(&query.sql, fetch_rows(&self.pool, query))
            .await
    }
}

async fn fetch_rows(pool: &PgPool, query: &CompiledQuery) -> Result<Vec<RawRow>> {
    let rows = sqlx::query_with(&query.sql, query.to_arguments()?)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_values).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_partial_json_keeps_remaining_defaults() {
        let config: PoolConfig = serde_json::from_str(
            r#"{"max_connections": 50, "idle_timeout": null, "retry": {"max_retries": 0}}"#,
        )
        .unwrap();

        assert_eq!(config.max_connections, 50);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.max_lifetime, Some(1800));
        assert!(config.idle_timeout.is_none());
        assert_eq!(config.statement_cache_capacity, 100);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.initial_delay_ms, 100);
    }

    #[test]
    fn test_backoff_doubles_until_capped() {
        let retry = RetryConfig::default();
        let delays: Vec<u64> = (0..8)
            .map(|n| retry.delay_for_attempt(n).as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![100, 200, 400, 800, 1600, 3200, 5000, 5000]);
        assert_eq!(RetryConfig::no_retry().delay_for_attempt(3), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: std::result::Result<u32, String> = RetryConfig::default()
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("refused #{}", n))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_last_error() {
        let calls = AtomicU32::new(0);
        let retry = RetryConfig {
            max_retries: 2,
            ..RetryConfig::default()
        };
        let result: std::result::Result<(), String> = retry
            .run(|| async { Err(format!("refused #{}", calls.fetch_add(1, Ordering::SeqCst))) })
            .await;

        assert_eq!(result, Err("refused #2".to_string()));
    }

    #[test]
    fn test_connect_options_reject_bad_uris() {
        let config = PoolConfig::default();

        match config.connect_options("") {
            Err(AdapterError::Connection(msg)) => assert_eq!(msg, "Connection URI cannot be empty"),
            other => panic!("expected connection error, got {:?}", other.map(|_| ())),
        }
        assert!(matches!(
            config.connect_options("not a url"),
            Err(AdapterError::Connection(_))
        ));
        assert!(config.connect_options("postgresql://user:pw@localhost:5432/app").is_ok());
    }

    #[tokio::test]
    async fn test_new_fails_fast_on_empty_uri() {
        let err = Connection::new("", PoolConfig::default(), ExecutorConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Connection(_)));
    }
}
