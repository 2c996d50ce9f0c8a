//! Statement execution seam.
//!
//! Compiled queries never touch the driver directly: they are handed to a
//! [`QueryExecutor`], implemented by [`Connection`](crate::Connection) for
//! pooled execution and [`Transaction`](crate::Transaction) for statements
//! that must share one transaction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::query::CompiledQuery;
use crate::types::RawRow;
use crate::Result;

/// Runs compiled statements and returns their rows.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Executes `query` and returns every row it produced, one map per row.
    async fn execute(&self, query: &CompiledQuery) -> Result<Vec<RawRow>>;
}

/// Configuration for statement execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Statements slower than this are logged at `warn` (milliseconds)
    pub slow_query_threshold_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 1000,
        }
    }
}

impl ExecutorConfig {
    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }

    /// Times `fut` and logs it with [`log_query_completion`].
    pub(crate) async fn timed<F>(&self, sql: &str, fut: F) -> Result<Vec<RawRow>>
    where
        F: std::future::Future<Output = Result<Vec<RawRow>>>,
    {
        let start = Instant::now();
        let result = fut.await;
        let rows = result.as_ref().map(|r| r.len()).unwrap_or(0);
        log_query_completion(sql, start.elapsed(), rows, self);
        result
    }
}

/// Logs statement duration, at `warn` above the slow-query threshold.
pub fn log_query_completion(sql: &str, duration: Duration, rows: usize, config: &ExecutorConfig) {
    let duration_ms = duration.as_millis() as u64;
    let sql_preview = sql_preview(sql);

    if duration_ms > config.slow_query_threshold_ms {
        warn!(
            duration_ms = duration_ms,
            threshold_ms = config.slow_query_threshold_ms,
            rows = rows,
            sql = %sql_preview,
            "Slow query detected"
        );
    } else {
        debug!(
            duration_ms = duration_ms,
            rows = rows,
            sql = %sql_preview,
            "Query completed"
        );
    }
}

fn sql_preview(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_config_default() {
        let config = ExecutorConfig::default();
        assert_eq!(config.slow_query_threshold_ms, 1000);
        assert_eq!(config.slow_query_threshold(), Duration::from_secs(1));
    }

    #[test]
    fn test_executor_config_partial_json() {
        let config: ExecutorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ExecutorConfig::default());

        let config: ExecutorConfig =
            serde_json::from_str(r#"{"slow_query_threshold_ms": 250}"#).unwrap();
        assert_eq!(config.slow_query_threshold_ms, 250);
    }

    #[test]
    fn test_sql_preview_truncates_long_statements() {
        let short = "SELECT 1";
        assert_eq!(sql_preview(short), short);

        let long = format!("SELECT {} FROM \"users\"", "\"a\", ".repeat(40));
        let preview = sql_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 103);
    }

    #[test]
    fn test_timed_passes_result_through() {
        let config = ExecutorConfig::default();
        let rows = tokio_test::block_on(config.timed("SELECT 1", async { Ok(vec![RawRow::new()]) }))
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
