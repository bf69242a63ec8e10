use rusqlite::{Connection, Row, params};
use thiserror::Error;

use crate::domain::models::{LogRecord, NewLogRecord};
use crate::domain::telemetry::SessionTelemetry;

pub const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    r#"
CREATE TABLE IF NOT EXISTS log_records (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    received_at TEXT NOT NULL,
    topic TEXT NOT NULL,
    session_id INTEGER NOT NULL,
    energy_delivered_kwh REAL NOT NULL,
    duration_seconds INTEGER NOT NULL,
    session_cost_cents INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_log_records_received_at
ON log_records (received_at ASC);
"#,
)];

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
    #[error("value for {0} does not fit the storage column")]
    ValueOutOfRange(&'static str),
}

pub fn open_connection(path: &str) -> Result<Connection, DbError> {
    Connection::open(path).map_err(DbError::from)
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), DbError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, DbError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

pub fn insert_log_record(
    connection: &Connection,
    new_record: &NewLogRecord,
) -> Result<String, DbError> {
    let payload = &new_record.payload;
    let id = uuid::Uuid::new_v4().to_string();

    connection.execute(
        "INSERT INTO log_records (id, received_at, topic, session_id, energy_delivered_kwh, duration_seconds, session_cost_cents)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            new_record.received_at,
            new_record.topic,
            to_column("session_id", payload.session_id)?,
            payload.energy_delivered_kwh,
            to_column("duration_seconds", payload.duration_seconds)?,
            to_column("session_cost_cents", payload.session_cost_cents)?,
        ],
    )?;

    Ok(id)
}

pub fn list_log_records(connection: &Connection) -> Result<Vec<LogRecord>, DbError> {
    let mut statement = connection.prepare(
        "SELECT id, received_at, topic, session_id, energy_delivered_kwh, duration_seconds, session_cost_cents
         FROM log_records
         ORDER BY received_at ASC, seq ASC",
    )?;

    let rows = statement.query_map([], map_log_record)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }

    Ok(records)
}

pub fn count_log_records(connection: &Connection) -> Result<i64, DbError> {
    let count = connection.query_row("SELECT COUNT(*) FROM log_records", [], |row| row.get(0))?;
    Ok(count)
}

fn map_log_record(row: &Row<'_>) -> rusqlite::Result<LogRecord> {
    Ok(LogRecord {
        id: row.get(0)?,
        received_at: row.get(1)?,
        topic: row.get(2)?,
        payload: SessionTelemetry {
            session_id: from_column(row, 3)?,
            energy_delivered_kwh: row.get(4)?,
            duration_seconds: from_column(row, 5)?,
            session_cost_cents: from_column(row, 6)?,
        },
    })
}

fn to_column(field: &'static str, value: u64) -> Result<i64, DbError> {
    i64::try_from(value).map_err(|_| DbError::ValueOutOfRange(field))
}

fn from_column(row: &Row<'_>, index: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(index)?;
    u64::try_from(raw).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(index, raw))
}
