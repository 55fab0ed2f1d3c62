use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;

use crate::db::models::{DbSingleValue, DbVersion, StoredSingle};
use crate::db::schema::SQLITE_INIT;
use crate::doctype::{Doc, Meta, value_from_text, value_to_text};
use crate::error::SettingsError;
use crate::settings::validate::Change;

pub type SqlitePool = Pool<Sqlite>;

/// Pseudo-field holding the last save time of a single record.
const MODIFIED_FIELD: &str = "modified";

#[derive(Clone)]
pub struct SettingsStorage {
    pool: SqlitePool,
}

impl SettingsStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database and initialize the schema.
    pub async fn connect(database_url: &str) -> Result<Self, SettingsError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // every connection to an in-memory database sees its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_opts)
            .await?;
        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initialize the schema by executing the bundled DDL.
    pub async fn init_schema(&self) -> Result<(), SettingsError> {
        // execute multiple statements safely (SQLite supports multi-commands but sqlx::query doesn't)
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Load the single record of `meta`, or `None` if it was never saved.
    ///
    /// Fields missing from storage take their schema default; stored fields
    /// no longer in the schema are dropped.
    pub async fn load_single(&self, meta: &Meta) -> Result<Option<StoredSingle>, SettingsError> {
        let rows: Vec<DbSingleValue> =
            sqlx::query_as("SELECT field, value FROM singles WHERE doctype = ?")
                .bind(meta.name())
                .fetch_all(&self.pool)
                .await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut doc = meta.defaults();
        let mut modified = None;
        for row in rows {
            if row.field == MODIFIED_FIELD {
                modified = row.value.as_deref().map(parse_timestamp).transpose()?;
                continue;
            }
            let Some(fm) = meta.field(&row.field) else {
                continue;
            };
            if !fm.field.fieldtype.is_stored() {
                continue;
            }
            let value = match row.value {
                Some(raw) => value_from_text(fm.field.fieldtype, &raw),
                None => Value::Null,
            };
            doc.insert(row.field, value);
        }

        Ok(Some(StoredSingle { doc, modified }))
    }

    /// Persist the whole record, its secrets and an optional version entry
    /// in a single transaction. Secrets are `(fieldname, token)` pairs; a
    /// `None` token deletes the stored secret. Returns the save time.
    pub async fn save_single(
        &self,
        meta: &Meta,
        doc: &Doc,
        secrets: &[(String, Option<String>)],
        changes: Option<&[Change]>,
    ) -> Result<DateTime<Utc>, SettingsError> {
        let doctype = meta.name();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for df in meta.stored_fields() {
            let value = doc.get(&df.fieldname).and_then(value_to_text);
            upsert_single(&mut tx, doctype, &df.fieldname, value).await?;
        }
        upsert_single(&mut tx, doctype, MODIFIED_FIELD, Some(now.to_rfc3339())).await?;

        for (fieldname, token) in secrets {
            match token {
                Some(token) => {
                    sqlx::query(
                        r#"
                        INSERT INTO auth (doctype, name, fieldname, password)
                        VALUES (?, ?, ?, ?)
                        ON CONFLICT(doctype, name, fieldname) DO UPDATE SET
                            password=excluded.password
                        "#,
                    )
                    .bind(doctype)
                    .bind(doctype)
                    .bind(fieldname)
                    .bind(token)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query("DELETE FROM auth WHERE doctype = ? AND name = ? AND fieldname = ?")
                        .bind(doctype)
                        .bind(doctype)
                        .bind(fieldname)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        if let Some(changes) = changes.filter(|c| !c.is_empty()) {
            let data = serde_json::to_string(&json!({ "changed": changes }))?;
            sqlx::query(
                "INSERT INTO versions (doctype, docname, data, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(doctype)
            .bind(doctype)
            .bind(data)
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(now)
    }

    /// Encrypted token of a `Password` field, if one is stored.
    pub async fn get_password(
        &self,
        doctype: &str,
        name: &str,
        fieldname: &str,
    ) -> Result<Option<String>, SettingsError> {
        let rec: Option<(String,)> = sqlx::query_as(
            "SELECT password FROM auth WHERE doctype = ? AND name = ? AND fieldname = ?",
        )
        .bind(doctype)
        .bind(name)
        .bind(fieldname)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rec.map(|r| r.0))
    }

    /// Most recent versions first.
    pub async fn list_versions(
        &self,
        doctype: &str,
        limit: u32,
    ) -> Result<Vec<DbVersion>, SettingsError> {
        let rows = sqlx::query(
            r#"SELECT id, doctype, docname, data, created_at
               FROM versions WHERE doctype = ? ORDER BY id DESC LIMIT ?"#,
        )
        .bind(doctype)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_version).collect()
    }

    fn row_to_version(row: SqliteRow) -> Result<DbVersion, SettingsError> {
        let data: String = row.try_get("data")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(DbVersion {
            id: row.try_get("id")?,
            doctype: row.try_get("doctype")?,
            docname: row.try_get("docname")?,
            data: serde_json::from_str(&data).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

async fn upsert_single(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    doctype: &str,
    field: &str,
    value: Option<String>,
) -> Result<(), SettingsError> {
    sqlx::query(
        r#"
        INSERT INTO singles (doctype, field, value) VALUES (?, ?, ?)
        ON CONFLICT(doctype, field) DO UPDATE SET value=excluded.value
        "#,
    )
    .bind(doctype)
    .bind(field)
    .bind(value)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, SettingsError> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?
        .with_timezone(&Utc))
}
