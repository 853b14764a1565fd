//! Registered-people storage
//!
//! The document collection behind the registry: append-only creation with a
//! server-assigned identifier, reads ordered by full name, and keyset
//! pagination with an opaque continuation cursor.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use preg_common::{HousingStatus, RegisteredPerson};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid cursor")]
    InvalidCursor,

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },
}

/// Opaque continuation token marking the last record of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(String);

/// Sort key carried inside a cursor
#[derive(Debug, Serialize, Deserialize)]
struct CursorKey {
    full_name: String,
    id: String,
}

impl Cursor {
    fn from_record(person: &RegisteredPerson) -> Option<Self> {
        let key = CursorKey {
            full_name: person.full_name.clone(),
            id: person.id.clone()?,
        };
        let json = serde_json::to_vec(&key).ok()?;
        Some(Cursor(URL_SAFE_NO_PAD.encode(json)))
    }

    /// Rebuild a cursor from a token previously handed out
    pub fn parse(token: &str) -> Result<Self, StoreError> {
        let cursor = Cursor(token.to_string());
        cursor.key()?;
        Ok(cursor)
    }

    fn key(&self) -> Result<CursorKey, StoreError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(&self.0)
            .map_err(|_| StoreError::InvalidCursor)?;
        serde_json::from_slice(&bytes).map_err(|_| StoreError::InvalidCursor)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of records in listing order
#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<RegisteredPerson>,
    /// Position of the last record, `None` for an empty page
    pub cursor: Option<Cursor>,
}

/// Storage collaborator seam
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append one record; returns the identifier assigned to it
    async fn create(&self, person: &RegisteredPerson) -> Result<String, StoreError>;

    /// Up to `limit` records ordered by full name, strictly after `after`
    async fn page(&self, after: Option<&Cursor>, limit: usize) -> Result<Page, StoreError>;

    /// Every record, ordered by full name
    async fn all(&self) -> Result<Vec<RegisteredPerson>, StoreError>;
}

/// SQLite-backed collection (`registered_people` table)
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: SqlitePool,
}

const SELECT_COLUMNS: &str = "SELECT id, full_name, phone, email, id_number, district, sector, cell, \
     village, isibo, isibo_leader, rpf_member, house_number, education, housing_status \
     FROM registered_people";

impl SqliteRecordStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

fn person_from_row(row: &SqliteRow) -> Result<RegisteredPerson, StoreError> {
    let id: String = row.try_get("id")?;
    let housing: String = row.try_get("housing_status")?;
    let housing_status = housing
        .parse::<HousingStatus>()
        .map_err(|e| StoreError::CorruptRecord {
            id: id.clone(),
            reason: e.to_string(),
        })?;

    Ok(RegisteredPerson {
        id: Some(id),
        full_name: row.try_get("full_name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        id_number: row.try_get("id_number")?,
        district: row.try_get("district")?,
        sector: row.try_get("sector")?,
        cell: row.try_get("cell")?,
        village: row.try_get("village")?,
        isibo: row.try_get("isibo")?,
        isibo_leader: row.try_get("isibo_leader")?,
        rpf_member: row.try_get::<i64, _>("rpf_member")? != 0,
        house_number: row.try_get("house_number")?,
        education: row.try_get("education")?,
        housing_status,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn create(&self, person: &RegisteredPerson) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO registered_people (id, full_name, phone, email, id_number, district, sector, \
             cell, village, isibo, isibo_leader, rpf_member, house_number, education, housing_status) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&person.full_name)
        .bind(&person.phone)
        .bind(&person.email)
        .bind(&person.id_number)
        .bind(&person.district)
        .bind(&person.sector)
        .bind(&person.cell)
        .bind(&person.village)
        .bind(&person.isibo)
        .bind(&person.isibo_leader)
        .bind(person.rpf_member as i64)
        .bind(&person.house_number)
        .bind(&person.education)
        .bind(person.housing_status.as_str())
        .execute(&self.db)
        .await?;

        Ok(id)
    }

    async fn page(&self, after: Option<&Cursor>, limit: usize) -> Result<Page, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = match after {
            None => {
                let sql = format!("{SELECT_COLUMNS} ORDER BY full_name ASC, id ASC LIMIT ?");
                sqlx::query(&sql).bind(limit).fetch_all(&self.db).await?
            }
            Some(cursor) => {
                let key = cursor.key()?;
                let sql = format!(
                    "{SELECT_COLUMNS} WHERE full_name > ? OR (full_name = ? AND id > ?) \
                     ORDER BY full_name ASC, id ASC LIMIT ?"
                );
                sqlx::query(&sql)
                    .bind(&key.full_name)
                    .bind(&key.full_name)
                    .bind(&key.id)
                    .bind(limit)
                    .fetch_all(&self.db)
                    .await?
            }
        };

        let records = rows
            .iter()
            .map(person_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let cursor = records.last().and_then(Cursor::from_record);

        Ok(Page { records, cursor })
    }

    async fn all(&self) -> Result<Vec<RegisteredPerson>, StoreError> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY full_name ASC, id ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.db).await?;

        rows.iter().map(person_from_row).collect()
    }
}
