//! Transactions.
//!
//! A [`Transaction`] is itself a [`QueryExecutor`]: datastore operations
//! that should run inside it take it explicitly as their executor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::Postgres;
use tokio::sync::Mutex;

use crate::connection::Connection;
use crate::executor::{ExecutorConfig, QueryExecutor};
use crate::query::CompiledQuery;
use crate::types::{row_to_values, RawRow};
use crate::{AdapterError, Result};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    /// PostgreSQL default
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

impl AccessMode {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::ReadWrite => "READ WRITE",
            Self::ReadOnly => "READ ONLY",
        }
    }
}

/// Options applied with `SET TRANSACTION` right after `BEGIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionOptions {
    pub isolation_level: IsolationLevel,
    pub access_mode: AccessMode,
    /// Only honored for `SERIALIZABLE READ ONLY`
    pub deferrable: bool,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.access_mode = AccessMode::ReadOnly;
        self
    }

    pub fn read_write(mut self) -> Self {
        self.access_mode = AccessMode::ReadWrite;
        self
    }

    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = deferrable;
        self
    }

    pub fn to_sql(&self) -> String {
        let deferral = match (self.isolation_level, self.access_mode, self.deferrable) {
            (IsolationLevel::Serializable, AccessMode::ReadOnly, true) => ", DEFERRABLE",
            (IsolationLevel::Serializable, AccessMode::ReadOnly, false) => ", NOT DEFERRABLE",
            _ => "",
        };
        format!(
            "SET TRANSACTION ISOLATION LEVEL {}, {}{}",
            self.isolation_level.keyword(),
            self.access_mode.keyword(),
            deferral
        )
    }
}

/// An open transaction.
///
/// Dropping it without [`commit`](Self::commit) rolls back. Once finished,
/// further statements fail with `AdapterError::Database`.
pub struct Transaction {
    tx: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
    options: TransactionOptions,
    executor: ExecutorConfig,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    /// Issues `BEGIN` on a pooled connection, then `SET TRANSACTION`.
    pub async fn begin(conn: &Connection, options: TransactionOptions) -> Result<Self> {
        let mut tx = conn.pool().begin().await?;
        let set = options.to_sql();
        sqlx::query(&set).execute(&mut *tx).await?;

        tracing::debug!(
            isolation_level = ?options.isolation_level,
            access_mode = ?options.access_mode,
            deferrable = options.deferrable,
            "Started transaction"
        );

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            options,
            executor: conn.executor_config().clone(),
        })
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    pub async fn commit(&self) -> Result<()> {
        let tx = self.take().await?;
        tx.commit().await?;
        tracing::debug!("Committed transaction");
        Ok(())
    }

    pub async fn rollback(&self) -> Result<()> {
        let tx = self.take().await?;
        tx.rollback().await?;
        tracing::debug!("Rolled back transaction");
        Ok(())
    }

    pub async fn is_finished(&self) -> bool {
        self.tx.lock().await.is_none()
    }

    async fn take(&self) -> Result<sqlx::Transaction<'static, Postgres>> {
        self.tx.lock().await.take().ok_or_else(finished)
    }

    async fn fetch_rows(&self, query: &CompiledQuery) -> Result<Vec<RawRow>> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        let rows = sqlx::query_with(&query.sql, query.to_arguments()?)
            .fetch_all(&mut **tx)
            .await?;
        rows.iter().map(row_to_values).collect()
    }
}

fn finished() -> AdapterError {
    AdapterError::Database("Transaction already committed or rolled back".to_string())
}

#[async_trait]
impl QueryExecutor for Transaction {
    async fn execute(&self, query: &CompiledQuery) -> Result<Vec<RawRow>> {
        self.executor.timed(&query.sql, self.fetch_rows(query)).await
    }
}
