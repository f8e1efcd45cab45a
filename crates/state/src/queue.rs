//! Persistent download queue
//!
//! Durable record of download requests and their status. Owns no business
//! logic beyond guarding status transitions; every committed write wakes
//! the `downloads()` stream.

use crate::db::downloads as queries;
use crate::revision::{snapshots, Revision};
use futures::stream::BoxStream;
use orchard_errors::Error;
use orchard_types::{Download, DownloadStatus, VersionCode};
use sqlx::{Pool, Sqlite};
use std::time::Duration;
use tracing::debug;

/// Live sequence of full queue snapshots, oldest record first
pub type DownloadsStream = BoxStream<'static, Vec<Download>>;

/// One transfer progress sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub percent: i32,
    pub downloaded_bytes: i64,
    pub total_bytes: i64,
    /// Bytes per second
    pub speed: i64,
    /// Seconds
    pub time_remaining: i64,
}

impl Progress {
    /// Derive percent, speed and ETA from raw counters
    #[must_use]
    pub fn sample(downloaded_bytes: i64, total_bytes: i64, elapsed: Duration) -> Self {
        let percent = if total_bytes > 0 {
            ((downloaded_bytes.min(total_bytes) * 100) / total_bytes) as i32
        } else {
            0
        };
        let millis = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX).max(1);
        let speed = downloaded_bytes.saturating_mul(1000) / millis;
        let time_remaining = if speed > 0 {
            (total_bytes - downloaded_bytes).max(0) / speed
        } else {
            0
        };
        Self {
            percent,
            downloaded_bytes,
            total_bytes,
            speed,
            time_remaining,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadQueue {
    pool: Pool<Sqlite>,
    revision: Revision,
}

impl DownloadQueue {
    #[must_use]
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            revision: Revision::new(),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Number of committed writes since this queue was opened
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.current()
    }

    /// Store a QUEUED record.
    ///
    /// Returns `false` without touching storage when a record with the same
    /// (package, version) is still unresolved. A finished record with the
    /// same key is restarted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn insert(&self, download: &Download) -> Result<bool, Error> {
        let mut tx = self.pool.begin().await?;
        let inserted = queries::insert(&mut tx, download).await?;
        tx.commit().await?;
        if inserted {
            debug!(
                package = %download.package_name,
                version = download.version_code,
                "Download record stored"
            );
            self.revision.bump();
        }
        Ok(inserted)
    }

    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub async fn get(
        &self,
        package_name: &str,
        version_code: VersionCode,
    ) -> Result<Option<Download>, Error> {
        let mut tx = self.pool.begin().await?;
        let download = queries::get(&mut tx, package_name, version_code).await?;
        tx.commit().await?;
        Ok(download)
    }

    /// The record package-level operations act on: the unresolved one if
    /// any, otherwise the newest
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub async fn current(&self, package_name: &str) -> Result<Option<Download>, Error> {
        let mut tx = self.pool.begin().await?;
        let download = queries::current(&mut tx, package_name).await?;
        tx.commit().await?;
        Ok(download)
    }

    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub async fn all(&self) -> Result<Vec<Download>, Error> {
        let mut tx = self.pool.begin().await?;
        let downloads = queries::all(&mut tx).await?;
        tx.commit().await?;
        Ok(downloads)
    }

    /// Newest-first page for list UIs
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub async fn page(&self, offset: i64, limit: i64) -> Result<Vec<Download>, Error> {
        let mut tx = self.pool.begin().await?;
        let downloads = queries::page(&mut tx, offset.max(0), limit.max(0)).await?;
        tx.commit().await?;
        Ok(downloads)
    }

    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub async fn count(&self) -> Result<i64, Error> {
        let mut tx = self.pool.begin().await?;
        let count = queries::count(&mut tx).await?;
        tx.commit().await?;
        Ok(count)
    }

    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub async fn by_statuses(&self, statuses: &[DownloadStatus]) -> Result<Vec<Download>, Error> {
        let mut tx = self.pool.begin().await?;
        let downloads = queries::by_statuses(&mut tx, statuses).await?;
        tx.commit().await?;
        Ok(downloads)
    }

    /// Move the package's current record to `status`
    ///
    /// # Errors
    ///
    /// Returns `StateError::RecordNotFound` if the package has no record and
    /// `StateError::InvalidTransition` if the move is illegal from the
    /// record's status.
    pub async fn update_status(
        &self,
        package_name: &str,
        status: DownloadStatus,
    ) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        queries::update_status(&mut tx, package_name, status).await?;
        tx.commit().await?;
        debug!(package = %package_name, status = %status, "Download status updated");
        self.revision.bump();
        Ok(())
    }

    /// Move one exact (package, version) record to `status`
    ///
    /// # Errors
    ///
    /// Same as [`Self::update_status`].
    pub async fn update_version_status(
        &self,
        package_name: &str,
        version_code: VersionCode,
        status: DownloadStatus,
    ) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        queries::update_version_status(&mut tx, package_name, version_code, status).await?;
        tx.commit().await?;
        debug!(
            package = %package_name,
            version = version_code,
            status = %status,
            "Download status updated"
        );
        self.revision.bump();
        Ok(())
    }

    /// Record a progress sample; returns `false` if the record is no longer
    /// DOWNLOADING
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn update_progress(
        &self,
        package_name: &str,
        version_code: VersionCode,
        progress: &Progress,
    ) -> Result<bool, Error> {
        let mut tx = self.pool.begin().await?;
        let updated = queries::update_progress(&mut tx, package_name, version_code, progress).await?;
        tx.commit().await?;
        if updated {
            self.revision.bump();
        }
        Ok(updated)
    }

    /// Cancel every QUEUED record, or only those updating an installed
    /// package. Returns the records that were cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn cancel_queued(&self, updates_only: bool) -> Result<Vec<Download>, Error> {
        let mut tx = self.pool.begin().await?;
        let cancelled = queries::cancel_queued(&mut tx, updates_only).await?;
        tx.commit().await?;
        if !cancelled.is_empty() {
            self.revision.bump();
        }
        Ok(cancelled)
    }

    /// Delete every record of a package, returning them
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn delete(&self, package_name: &str) -> Result<Vec<Download>, Error> {
        let mut tx = self.pool.begin().await?;
        let deleted = queries::delete_package(&mut tx, package_name).await?;
        tx.commit().await?;
        if !deleted.is_empty() {
            self.revision.bump();
        }
        Ok(deleted)
    }

    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn delete_version(
        &self,
        package_name: &str,
        version_code: VersionCode,
    ) -> Result<bool, Error> {
        let mut tx = self.pool.begin().await?;
        let deleted = queries::delete_version(&mut tx, package_name, version_code).await?;
        tx.commit().await?;
        if deleted {
            self.revision.bump();
        }
        Ok(deleted)
    }

    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn delete_all(&self) -> Result<Vec<Download>, Error> {
        let mut tx = self.pool.begin().await?;
        let deleted = queries::delete_all(&mut tx).await?;
        tx.commit().await?;
        if !deleted.is_empty() {
            self.revision.bump();
        }
        Ok(deleted)
    }

    /// Delete every FAILED, CANCELLED or COMPLETED record, returning them
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn delete_finished(&self) -> Result<Vec<Download>, Error> {
        let mut tx = self.pool.begin().await?;
        let deleted = queries::delete_by_statuses(&mut tx, &DownloadStatus::FINISHED).await?;
        tx.commit().await?;
        if !deleted.is_empty() {
            self.revision.bump();
        }
        Ok(deleted)
    }

    /// Live queue snapshots: the current contents first, then one snapshot
    /// per (coalesced) write
    #[must_use]
    pub fn downloads(&self) -> DownloadsStream {
        let pool = self.pool.clone();
        snapshots(&self.revision, move || {
            let pool = pool.clone();
            async move {
                let mut tx = pool.begin().await?;
                let downloads = queries::all(&mut tx).await?;
                tx.commit().await?;
                Ok(downloads)
            }
        })
    }
}
