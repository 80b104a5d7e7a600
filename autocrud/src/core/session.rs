//! Resource Session: one transaction per request, always released.

use sea_orm::{DatabaseTransaction, TransactionTrait};
use std::ops::Deref;

use crate::{ApiError, errors::classify_db_error, errors::Persistence};

/// Warns when a session goes out of scope without commit or rollback.
///
/// The transaction itself rolls back on drop; this only makes the leak visible.
#[derive(Debug)]
struct ReleaseGuard {
    resource: String,
    armed: bool,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(
                resource = %self.resource,
                "Resource session dropped without release, rolling back"
            );
        }
    }
}

/// Transactional scope bracketing one pipeline invocation.
///
/// Hooks receive `&ResourceSession` and run their own queries through it, so their
/// reads see the in-flight changes and their writes commit or roll back with the
/// operation.
#[derive(Debug)]
pub struct ResourceSession {
    txn: DatabaseTransaction,
    guard: ReleaseGuard,
}

impl ResourceSession {
    /// Open a transaction on `db`.
    ///
    /// # Errors
    /// Internal error when storage refuses the transaction.
    pub async fn begin<C>(db: &C, resource: &str) -> Result<Self, ApiError>
    where
        C: TransactionTrait,
    {
        let txn = db.begin().await.map_err(ApiError::database)?;
        tracing::debug!(resource, "Resource session opened");
        Ok(Self {
            txn,
            guard: ReleaseGuard {
                resource: resource.to_string(),
                armed: true,
            },
        })
    }

    #[must_use]
    pub fn connection(&self) -> &DatabaseTransaction {
        &self.txn
    }

    /// # Errors
    /// The commit failure, classified like any other write.
    pub async fn commit(self) -> Result<(), ApiError> {
        let Self { txn, mut guard } = self;
        guard.armed = false;
        txn.commit()
            .await
            .map_err(|e| classify_db_error(e, Persistence::Write))?;
        tracing::debug!(resource = %guard.resource, "Resource session committed");
        Ok(())
    }

    /// Roll back, logging rather than returning a rollback failure.
    pub async fn rollback(self) {
        let Self { txn, mut guard } = self;
        guard.armed = false;
        match txn.rollback().await {
            Ok(()) => tracing::debug!(resource = %guard.resource, "Resource session rolled back"),
            Err(err) => tracing::error!(
                resource = %guard.resource,
                error = ?err,
                "Rollback failed"
            ),
        }
    }

    /// Commit when `outcome` succeeded, roll back otherwise.
    ///
    /// # Errors
    /// The original failure, or the commit failure.
    pub async fn release<T>(self, outcome: Result<T, ApiError>) -> Result<T, ApiError> {
        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                self.rollback().await;
                Err(err)
            }
        }
    }
}

impl Deref for ResourceSession {
    type Target = DatabaseTransaction;

    fn deref(&self) -> &Self::Target {
        &self.txn
    }
}
