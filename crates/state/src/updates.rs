//! Store of available updates
//!
//! At most one update per package. Replaced wholesale by each check,
//! pruned one package at a time as packages get installed, removed or
//! blacklisted.

use crate::db::updates as queries;
use crate::revision::{snapshots, Revision};
use futures::stream::BoxStream;
use orchard_errors::Error;
use orchard_types::Update;
use sqlx::{Pool, Sqlite};
use tracing::debug;

/// Live sequence of full update-set snapshots
pub type UpdatesStream = BoxStream<'static, Vec<Update>>;

#[derive(Debug, Clone)]
pub struct UpdateStore {
    pool: Pool<Sqlite>,
    revision: Revision,
}

impl UpdateStore {
    #[must_use]
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            revision: Revision::new(),
        }
    }

    /// Replace the whole update set in one transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails; the previous set is
    /// left untouched in that case.
    pub async fn replace_all(&self, updates: &[Update]) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        queries::delete_all(&mut tx).await?;
        for update in updates {
            queries::upsert(&mut tx, update).await?;
        }
        tx.commit().await?;
        debug!(count = updates.len(), "Update set replaced");
        self.revision.bump();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn upsert(&self, update: &Update) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        queries::upsert(&mut tx, update).await?;
        tx.commit().await?;
        self.revision.bump();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub async fn get(&self, package_name: &str) -> Result<Option<Update>, Error> {
        let mut tx = self.pool.begin().await?;
        let update = queries::get(&mut tx, package_name).await?;
        tx.commit().await?;
        Ok(update)
    }

    /// Every stored update regardless of visibility
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub async fn all(&self) -> Result<Vec<Update>, Error> {
        let mut tx = self.pool.begin().await?;
        let updates = queries::all(&mut tx).await?;
        tx.commit().await?;
        Ok(updates)
    }

    /// Delete the update for a package; returns whether one existed
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn delete(&self, package_name: &str) -> Result<bool, Error> {
        let mut tx = self.pool.begin().await?;
        let deleted = queries::delete(&mut tx, package_name).await?;
        tx.commit().await?;
        if deleted {
            debug!(package = %package_name, "Update removed");
            self.revision.bump();
        }
        Ok(deleted)
    }

    /// Live update-set snapshots
    #[must_use]
    pub fn updates(&self) -> UpdatesStream {
        let pool = self.pool.clone();
        snapshots(&self.revision, move || {
            let pool = pool.clone();
            async move {
                let mut tx = pool.begin().await?;
                let updates = queries::all(&mut tx).await?;
                tx.commit().await?;
                Ok(updates)
            }
        })
    }
}
