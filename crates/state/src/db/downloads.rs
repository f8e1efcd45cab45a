//! Queries over the `downloads` table

use super::{decode_json, encode_json, from_millis, to_millis};
use crate::Progress;
use chrono::Utc;
use orchard_errors::{Error, StateError};
use orchard_types::{Download, DownloadStatus, VersionCode};
use sqlx::sqlite::SqliteRow;
use sqlx::{query, Row, Sqlite, Transaction};

const COLUMNS: &str = "package_name, version_code, version_name, display_name, icon_url, \
     source, is_installed, status, progress, downloaded_bytes, total_bytes, speed, \
     time_remaining, files, shared_libs, added_at, updated_at";

/// Picks the row a package-level operation applies to: the unresolved one
/// if any, otherwise the newest. `param` is the placeholder holding the
/// package name.
fn target_row(param: &str) -> String {
    format!(
        "SELECT rowid FROM downloads WHERE package_name = {param} \
         ORDER BY CASE WHEN status IN ('QUEUED', 'DOWNLOADING', 'VERIFYING') THEN 0 ELSE 1 END, \
         added_at DESC, rowid DESC LIMIT 1"
    )
}

fn status_list(statuses: impl IntoIterator<Item = DownloadStatus>) -> String {
    statuses
        .into_iter()
        .map(|status| format!("'{}'", status.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Statuses from which `next` may be entered
fn sources_of(next: DownloadStatus) -> String {
    status_list(
        DownloadStatus::ALL
            .into_iter()
            .filter(|status| status.can_transition_to(next)),
    )
}

pub(crate) fn from_row(row: &SqliteRow) -> Result<Download, Error> {
    let package_name: String = row.get("package_name");
    let status: String = row.get("status");
    let source: String = row.get("source");
    let files: String = row.get("files");
    let shared_libs: String = row.get("shared_libs");

    Ok(Download {
        version_code: row.get("version_code"),
        version_name: row.get("version_name"),
        display_name: row.get("display_name"),
        icon_url: row.get("icon_url"),
        source: source.parse()?,
        is_installed: row.get("is_installed"),
        status: status.parse()?,
        progress: row.get("progress"),
        downloaded_bytes: row.get("downloaded_bytes"),
        total_bytes: row.get("total_bytes"),
        speed: row.get("speed"),
        time_remaining: row.get("time_remaining"),
        files: decode_json(&package_name, &files)?,
        shared_libs: decode_json(&package_name, &shared_libs)?,
        added_at: from_millis(row.get("added_at")),
        updated_at: from_millis(row.get("updated_at")),
        package_name,
    })
}

fn from_rows(rows: &[SqliteRow]) -> Result<Vec<Download>, Error> {
    rows.iter().map(from_row).collect()
}

/// Insert a record, or restart a finished one with the same key.
///
/// Returns `false` when an unresolved record already holds the key.
pub async fn insert(tx: &mut Transaction<'_, Sqlite>, download: &Download) -> Result<bool, Error> {
    let sql = format!(
        "INSERT INTO downloads ({COLUMNS}) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17) \
         ON CONFLICT (package_name, version_code) DO UPDATE SET \
           version_name = excluded.version_name, \
           display_name = excluded.display_name, \
           icon_url = excluded.icon_url, \
           source = excluded.source, \
           is_installed = excluded.is_installed, \
           status = excluded.status, \
           progress = excluded.progress, \
           downloaded_bytes = excluded.downloaded_bytes, \
           total_bytes = excluded.total_bytes, \
           speed = excluded.speed, \
           time_remaining = excluded.time_remaining, \
           files = excluded.files, \
           shared_libs = excluded.shared_libs, \
           added_at = excluded.added_at, \
           updated_at = excluded.updated_at \
         WHERE downloads.status NOT IN ({})",
        status_list([
            DownloadStatus::Queued,
            DownloadStatus::Downloading,
            DownloadStatus::Verifying
        ])
    );

    let result = query(&sql)
        .bind(&download.package_name)
        .bind(download.version_code)
        .bind(&download.version_name)
        .bind(&download.display_name)
        .bind(&download.icon_url)
        .bind(download.source.as_str())
        .bind(download.is_installed)
        .bind(download.status.as_str())
        .bind(download.progress)
        .bind(download.downloaded_bytes)
        .bind(download.total_bytes)
        .bind(download.speed)
        .bind(download.time_remaining)
        .bind(encode_json(&download.files)?)
        .bind(encode_json(&download.shared_libs)?)
        .bind(to_millis(download.added_at))
        .bind(to_millis(download.updated_at))
        .execute(&mut **tx)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn get(
    tx: &mut Transaction<'_, Sqlite>,
    package_name: &str,
    version_code: VersionCode,
) -> Result<Option<Download>, Error> {
    let sql = format!("SELECT {COLUMNS} FROM downloads WHERE package_name = ?1 AND version_code = ?2");
    let row = query(&sql)
        .bind(package_name)
        .bind(version_code)
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(from_row).transpose()
}

/// The record package-level operations act on
pub async fn current(
    tx: &mut Transaction<'_, Sqlite>,
    package_name: &str,
) -> Result<Option<Download>, Error> {
    let sql = format!(
        "SELECT {COLUMNS} FROM downloads WHERE rowid = ({})",
        target_row("?1")
    );
    let row = query(&sql)
        .bind(package_name)
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn all(tx: &mut Transaction<'_, Sqlite>) -> Result<Vec<Download>, Error> {
    let sql = format!("SELECT {COLUMNS} FROM downloads ORDER BY added_at, rowid");
    let rows = query(&sql).fetch_all(&mut **tx).await?;
    from_rows(&rows)
}

pub async fn page(
    tx: &mut Transaction<'_, Sqlite>,
    offset: i64,
    limit: i64,
) -> Result<Vec<Download>, Error> {
    let sql = format!(
        "SELECT {COLUMNS} FROM downloads ORDER BY added_at DESC, rowid DESC LIMIT ?1 OFFSET ?2"
    );
    let rows = query(&sql)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut **tx)
        .await?;
    from_rows(&rows)
}

pub async fn count(tx: &mut Transaction<'_, Sqlite>) -> Result<i64, Error> {
    let row = query("SELECT COUNT(*) AS n FROM downloads")
        .fetch_one(&mut **tx)
        .await?;
    Ok(row.get("n"))
}

pub async fn by_statuses(
    tx: &mut Transaction<'_, Sqlite>,
    statuses: &[DownloadStatus],
) -> Result<Vec<Download>, Error> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {COLUMNS} FROM downloads WHERE status IN ({}) ORDER BY added_at, rowid",
        status_list(statuses.iter().copied())
    );
    let rows = query(&sql).fetch_all(&mut **tx).await?;
    from_rows(&rows)
}

/// Move the package's current record to `next`
pub async fn update_status(
    tx: &mut Transaction<'_, Sqlite>,
    package_name: &str,
    next: DownloadStatus,
) -> Result<(), Error> {
    let sql = format!(
        "UPDATE downloads SET status = ?1, updated_at = ?2 \
         WHERE rowid = ({}) AND status IN ({})",
        target_row("?3"),
        sources_of(next)
    );
    let result = query(&sql)
        .bind(next.as_str())
        .bind(to_millis(Utc::now()))
        .bind(package_name)
        .execute(&mut **tx)
        .await?;

    if result.rows_affected() > 0 {
        return Ok(());
    }
    let from = current(tx, package_name).await?.map(|d| d.status);
    Err(rejected(package_name, from, next))
}

/// Move one exact (package, version) record to `next`
pub async fn update_version_status(
    tx: &mut Transaction<'_, Sqlite>,
    package_name: &str,
    version_code: VersionCode,
    next: DownloadStatus,
) -> Result<(), Error> {
    let sql = format!(
        "UPDATE downloads SET status = ?1, updated_at = ?2 \
         WHERE package_name = ?3 AND version_code = ?4 AND status IN ({})",
        sources_of(next)
    );
    let result = query(&sql)
        .bind(next.as_str())
        .bind(to_millis(Utc::now()))
        .bind(package_name)
        .bind(version_code)
        .execute(&mut **tx)
        .await?;

    if result.rows_affected() > 0 {
        return Ok(());
    }
    let from = get(tx, package_name, version_code).await?.map(|d| d.status);
    Err(rejected(package_name, from, next))
}

fn rejected(package_name: &str, from: Option<DownloadStatus>, to: DownloadStatus) -> Error {
    match from {
        None => StateError::RecordNotFound {
            package: package_name.to_string(),
        }
        .into(),
        Some(from) => StateError::InvalidTransition {
            package: package_name.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
        .into(),
    }
}

/// Record transfer progress; ignored unless the record is DOWNLOADING
pub async fn update_progress(
    tx: &mut Transaction<'_, Sqlite>,
    package_name: &str,
    version_code: VersionCode,
    progress: &Progress,
) -> Result<bool, Error> {
    let result = query(
        "UPDATE downloads SET progress = ?1, downloaded_bytes = ?2, total_bytes = ?3, \
         speed = ?4, time_remaining = ?5, updated_at = ?6 \
         WHERE package_name = ?7 AND version_code = ?8 AND status = 'DOWNLOADING'",
    )
    .bind(progress.percent)
    .bind(progress.downloaded_bytes)
    .bind(progress.total_bytes)
    .bind(progress.speed)
    .bind(progress.time_remaining)
    .bind(to_millis(Utc::now()))
    .bind(package_name)
    .bind(version_code)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Flip every QUEUED record (optionally only updates) to CANCELLED
pub async fn cancel_queued(
    tx: &mut Transaction<'_, Sqlite>,
    updates_only: bool,
) -> Result<Vec<Download>, Error> {
    let sql = format!(
        "UPDATE downloads SET status = 'CANCELLED', updated_at = ?1 \
         WHERE status = 'QUEUED' AND (?2 = 0 OR is_installed = 1) \
         RETURNING {COLUMNS}"
    );
    let rows = query(&sql)
        .bind(to_millis(Utc::now()))
        .bind(updates_only)
        .fetch_all(&mut **tx)
        .await?;
    from_rows(&rows)
}

pub async fn delete_package(
    tx: &mut Transaction<'_, Sqlite>,
    package_name: &str,
) -> Result<Vec<Download>, Error> {
    let sql = format!("DELETE FROM downloads WHERE package_name = ?1 RETURNING {COLUMNS}");
    let rows = query(&sql).bind(package_name).fetch_all(&mut **tx).await?;
    from_rows(&rows)
}

pub async fn delete_version(
    tx: &mut Transaction<'_, Sqlite>,
    package_name: &str,
    version_code: VersionCode,
) -> Result<bool, Error> {
    let result = query("DELETE FROM downloads WHERE package_name = ?1 AND version_code = ?2")
        .bind(package_name)
        .bind(version_code)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_all(tx: &mut Transaction<'_, Sqlite>) -> Result<Vec<Download>, Error> {
    let sql = format!("DELETE FROM downloads RETURNING {COLUMNS}");
    let rows = query(&sql).fetch_all(&mut **tx).await?;
    from_rows(&rows)
}

pub async fn delete_by_statuses(
    tx: &mut Transaction<'_, Sqlite>,
    statuses: &[DownloadStatus],
) -> Result<Vec<Download>, Error> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "DELETE FROM downloads WHERE status IN ({}) RETURNING {COLUMNS}",
        status_list(statuses.iter().copied())
    );
    let rows = query(&sql).fetch_all(&mut **tx).await?;
    from_rows(&rows)
}
