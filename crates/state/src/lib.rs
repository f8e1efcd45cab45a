#![deny(clippy::pedantic, unsafe_code)]
#![allow(
    clippy::needless_raw_string_hashes,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::missing_panics_doc
)]
#![allow(clippy::module_name_repetitions)]

//! Persistent state for orchard
//!
//! This crate manages the `SQLite` database holding the download queue and
//! the set of available updates. Both stores expose live-updating snapshot
//! streams driven by a write revision counter.

pub mod db;
pub mod queue;
mod revision;
pub mod updates;

pub use queue::{DownloadQueue, DownloadsStream, Progress};
pub use updates::{UpdateStore, UpdatesStream};

use orchard_errors::Error;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;

/// Writers wait this long on a locked database before failing as busy
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a WAL-mode pool on `db_path`, creating the file if needed
///
/// # Errors
///
/// Returns an error if the database cannot be opened.
pub async fn create_pool(db_path: &Path) -> Result<Pool<Sqlite>, Error> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    Ok(SqlitePoolOptions::new()
        .max_connections(4)
        .acquire_timeout(BUSY_TIMEOUT)
        .connect_with(options)
        .await?)
}

/// Bring the schema up to date; already-applied migrations are skipped
///
/// # Errors
///
/// Returns `StateError::MigrationFailed` if a migration does not apply.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Open (creating if needed) the database at `db_path` and bind both stores
///
/// # Errors
///
/// Returns an error if the database cannot be opened or migrated.
pub async fn open(db_path: &Path) -> Result<(DownloadQueue, UpdateStore), Error> {
    let pool = create_pool(db_path).await?;
    run_migrations(&pool).await?;
    Ok((DownloadQueue::new(pool.clone()), UpdateStore::new(pool)))
}
