use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::error::SqlPoolError;
use crate::link::Transaction;
use crate::release::ReleaseGuard;
use crate::results::QueryOutcome;
use crate::statement::PooledStatement;
use crate::types::{CommandResult, IsolationLevel, RowValues};

/// Lifecycle of a [`PooledTransaction`]. Only `Active` permits operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// What happens to a transaction that is dropped while still active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TxDropPolicy {
    /// Commit the pending work, then return the connection.
    #[default]
    Commit,
    /// Roll the pending work back, then return the connection.
    Rollback,
}

/// A transaction bound to one borrowed connection.
///
/// The connection is returned when the transaction commits or rolls back, whether or not
/// that call succeeds, or once every cursor and statement derived from it is done if they
/// outlive it. Dropping an active transaction settles it in the background according to
/// its [`TxDropPolicy`]; this is logged as a warning since it means the caller forgot to
/// finish it.
pub struct PooledTransaction {
    transaction: Option<Box<dyn Transaction>>,
    release: Option<ReleaseGuard>,
    state: TxState,
    isolation: IsolationLevel,
    drop_policy: TxDropPolicy,
    runtime: Option<Handle>,
}

impl PooledTransaction {
    pub(crate) fn begin(
        transaction: Box<dyn Transaction>,
        release: ReleaseGuard,
        drop_policy: TxDropPolicy,
    ) -> Result<Self, SqlPoolError> {
        if !transaction.is_active() {
            drop(transaction);
            release.release();
            return Err(SqlPoolError::TransactionStateError(
                "Transaction is not active after begin".into(),
            ));
        }
        let isolation = transaction.isolation_level();
        tracing::debug!(%isolation, "transaction started");
        Ok(Self {
            transaction: Some(transaction),
            release: Some(release),
            state: TxState::Active,
            isolation,
            drop_policy,
            runtime: Handle::try_current().ok(),
        })
    }

    fn active(&mut self) -> Result<&mut Box<dyn Transaction>, SqlPoolError> {
        if self.state != TxState::Active {
            return Err(SqlPoolError::transaction_finished());
        }
        self.transaction.as_mut().ok_or_else(SqlPoolError::transaction_finished)
    }

    fn active_ref(&self) -> Result<&dyn Transaction, SqlPoolError> {
        if self.state != TxState::Active {
            return Err(SqlPoolError::transaction_finished());
        }
        self.transaction.as_deref().ok_or_else(SqlPoolError::transaction_finished)
    }

    fn guard(&self) -> Result<&ReleaseGuard, SqlPoolError> {
        self.release.as_ref().ok_or_else(SqlPoolError::transaction_finished)
    }

    /// # Errors
    /// `TransactionStateError` once terminal, otherwise the driver's error unchanged.
    pub async fn query(&mut self, sql: &str) -> Result<QueryOutcome, SqlPoolError> {
        let result = self.active()?.query(sql).await?;
        Ok(QueryOutcome::sharing(result, self.guard()?))
    }

    /// # Errors
    /// `TransactionStateError` once terminal, otherwise the driver's error unchanged.
    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<QueryOutcome, SqlPoolError> {
        let result = self.active()?.execute(sql, params).await?;
        Ok(QueryOutcome::sharing(result, self.guard()?))
    }

    /// Prepare `sql` inside the transaction. The statement shares the transaction's
    /// connection and keeps it borrowed until the statement is dropped as well.
    ///
    /// # Errors
    /// `TransactionStateError` once terminal, `ResourceDead` if the driver hands back a
    /// dead handle, otherwise the driver's error unchanged.
    pub async fn prepare(&mut self, sql: &str) -> Result<PooledStatement, SqlPoolError> {
        let statement = self.active()?.prepare(sql).await?;
        PooledStatement::new(statement, self.guard()?.share())
    }

    /// Commit and return the connection, even if the commit itself fails.
    ///
    /// # Errors
    /// `TransactionStateError` if already terminal, otherwise the driver's error.
    pub async fn commit(&mut self) -> Result<CommandResult, SqlPoolError> {
        self.finish(TxState::Committed).await
    }

    /// Roll back and return the connection, even if the rollback itself fails.
    ///
    /// # Errors
    /// `TransactionStateError` if already terminal, otherwise the driver's error.
    pub async fn rollback(&mut self) -> Result<CommandResult, SqlPoolError> {
        self.finish(TxState::RolledBack).await
    }

    async fn finish(&mut self, outcome: TxState) -> Result<CommandResult, SqlPoolError> {
        self.active()?;
        let (Some(mut transaction), release) = (self.transaction.take(), self.release.take())
        else {
            return Err(SqlPoolError::transaction_finished());
        };
        self.state = outcome;

        let result = match outcome {
            TxState::RolledBack => transaction.rollback().await,
            _ => transaction.commit().await,
        };
        drop(transaction);
        if let Some(release) = release {
            release.release();
        }

        match &result {
            Ok(_) => tracing::debug!(state = ?outcome, "transaction finished"),
            Err(error) => tracing::debug!(state = ?outcome, %error, "transaction finished with error"),
        }
        result
    }

    /// # Errors
    /// `TransactionStateError` once terminal, otherwise the driver's error unchanged.
    pub async fn create_savepoint(&mut self, identifier: &str) -> Result<CommandResult, SqlPoolError> {
        self.active()?.create_savepoint(identifier).await
    }

    /// # Errors
    /// `TransactionStateError` once terminal, otherwise the driver's error unchanged.
    pub async fn rollback_to(&mut self, identifier: &str) -> Result<CommandResult, SqlPoolError> {
        self.active()?.rollback_to(identifier).await
    }

    /// # Errors
    /// `TransactionStateError` once terminal, otherwise the driver's error unchanged.
    pub async fn release_savepoint(&mut self, identifier: &str) -> Result<CommandResult, SqlPoolError> {
        self.active()?.release_savepoint(identifier).await
    }

    /// # Errors
    /// `TransactionStateError` once terminal.
    pub fn isolation_level(&self) -> Result<IsolationLevel, SqlPoolError> {
        self.active_ref()?;
        Ok(self.isolation)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
            && self.transaction.as_ref().is_some_and(|tx| tx.is_active())
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.active_ref().is_ok_and(|tx| tx.is_alive())
    }

    /// `None` once the transaction is terminal.
    #[must_use]
    pub fn last_used_at(&self) -> Option<Instant> {
        self.active_ref().ok().map(|tx| tx.last_used_at())
    }

    /// # Errors
    /// `TransactionStateError` once terminal.
    pub fn quote_string(&self, data: &str) -> Result<String, SqlPoolError> {
        Ok(self.active_ref()?.quote_string(data))
    }

    /// # Errors
    /// `TransactionStateError` once terminal.
    pub fn quote_name(&self, name: &str) -> Result<String, SqlPoolError> {
        Ok(self.active_ref()?.quote_name(name))
    }

    #[must_use]
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Commit if still active; a no-op on a finished transaction.
    ///
    /// # Errors
    /// The driver's commit error; the connection is returned regardless.
    pub async fn close(mut self) -> Result<(), SqlPoolError> {
        if self.state == TxState::Active {
            self.commit().await?;
        }
        Ok(())
    }
}

impl Drop for PooledTransaction {
    fn drop(&mut self) {
        let Some(mut transaction) = self.transaction.take() else {
            return;
        };
        let release = self.release.take();
        if self.state != TxState::Active || !transaction.is_active() {
            return;
        }

        let policy = self.drop_policy;
        tracing::warn!(?policy, "transaction dropped while active");
        // The runtime the transaction began on still settles it when dropped elsewhere.
        let handle = Handle::try_current().ok().or_else(|| self.runtime.take());
        if let Some(handle) = handle {
            handle.spawn(async move {
                let result = match policy {
                    TxDropPolicy::Commit => transaction.commit().await,
                    TxDropPolicy::Rollback => transaction.rollback().await,
                };
                if let Err(error) = result {
                    tracing::warn!(?policy, %error, "settling dropped transaction failed");
                }
                drop(transaction);
                drop(release);
            });
        } else {
            tracing::error!(?policy, "no tokio runtime; dropped transaction returned unsettled");
            drop(transaction);
            drop(release);
        }
    }
}

impl fmt::Debug for PooledTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledTransaction")
            .field("state", &self.state)
            .field("isolation", &self.isolation)
            .field("drop_policy", &self.drop_policy)
            .field("release", &self.release)
            .finish()
    }
}
