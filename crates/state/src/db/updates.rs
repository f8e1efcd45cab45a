//! Queries over the `updates` table

use super::{decode_json, encode_json, from_millis, to_millis};
use orchard_errors::Error;
use orchard_types::Update;
use sqlx::sqlite::SqliteRow;
use sqlx::{query, Row, Sqlite, Transaction};

const COLUMNS: &str = "package_name, version_code, version_name, display_name, icon_url, \
     changelog, size, has_valid_cert, files, shared_libs, added_at";

fn from_row(row: &SqliteRow) -> Result<Update, Error> {
    let package_name: String = row.get("package_name");
    let files: String = row.get("files");
    let shared_libs: String = row.get("shared_libs");

    Ok(Update {
        version_code: row.get("version_code"),
        version_name: row.get("version_name"),
        display_name: row.get("display_name"),
        icon_url: row.get("icon_url"),
        changelog: row.get("changelog"),
        size: row.get("size"),
        has_valid_cert: row.get("has_valid_cert"),
        files: decode_json(&package_name, &files)?,
        shared_libs: decode_json(&package_name, &shared_libs)?,
        added_at: from_millis(row.get("added_at")),
        package_name,
    })
}

/// Insert or replace the update for a package
pub async fn upsert(tx: &mut Transaction<'_, Sqlite>, update: &Update) -> Result<(), Error> {
    let sql = format!(
        "INSERT OR REPLACE INTO updates ({COLUMNS}) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
    );
    query(&sql)
        .bind(&update.package_name)
        .bind(update.version_code)
        .bind(&update.version_name)
        .bind(&update.display_name)
        .bind(&update.icon_url)
        .bind(&update.changelog)
        .bind(update.size)
        .bind(update.has_valid_cert)
        .bind(encode_json(&update.files)?)
        .bind(encode_json(&update.shared_libs)?)
        .bind(to_millis(update.added_at))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn get(
    tx: &mut Transaction<'_, Sqlite>,
    package_name: &str,
) -> Result<Option<Update>, Error> {
    let sql = format!("SELECT {COLUMNS} FROM updates WHERE package_name = ?1");
    let row = query(&sql)
        .bind(package_name)
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn all(tx: &mut Transaction<'_, Sqlite>) -> Result<Vec<Update>, Error> {
    let sql = format!("SELECT {COLUMNS} FROM updates ORDER BY display_name COLLATE NOCASE");
    let rows = query(&sql).fetch_all(&mut **tx).await?;
    rows.iter().map(from_row).collect()
}

pub async fn delete(tx: &mut Transaction<'_, Sqlite>, package_name: &str) -> Result<bool, Error> {
    let result = query("DELETE FROM updates WHERE package_name = ?1")
        .bind(package_name)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_all(tx: &mut Transaction<'_, Sqlite>) -> Result<u64, Error> {
    let result = query("DELETE FROM updates").execute(&mut **tx).await?;
    Ok(result.rows_affected())
}
