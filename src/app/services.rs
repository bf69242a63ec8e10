use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use thiserror::Error;

use crate::adapters::db;
use crate::adapters::db::DbError;
use crate::domain::models::{LogRecord, NewLogRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection lost")]
    ConnectionLost,
    #[error("store rejected write: {0}")]
    WriteRejected(#[source] DbError),
    #[error("store read failed: {0}")]
    ReadFailed(#[source] DbError),
}

pub trait StorePort: Send + Sync {
    fn append(&self, record: &NewLogRecord) -> Result<String, StoreError>;
    fn list_all(&self) -> Result<Vec<LogRecord>, StoreError>;
}

impl<S: StorePort + ?Sized> StorePort for Arc<S> {
    fn append(&self, record: &NewLogRecord) -> Result<String, StoreError> {
        (**self).append(record)
    }

    fn list_all(&self) -> Result<Vec<LogRecord>, StoreError> {
        (**self).list_all()
    }
}

#[derive(Clone)]
pub struct SqliteLogStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteLogStore {
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, DbError>,
        on_error: impl FnOnce(DbError) -> StoreError,
    ) -> Result<T, StoreError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| StoreError::ConnectionLost)?;
        op(&connection).map_err(on_error)
    }
}

impl StorePort for SqliteLogStore {
    fn append(&self, record: &NewLogRecord) -> Result<String, StoreError> {
        self.with_connection(
            |connection| db::insert_log_record(connection, record),
            StoreError::WriteRejected,
        )
    }

    fn list_all(&self) -> Result<Vec<LogRecord>, StoreError> {
        self.with_connection(db::list_log_records, StoreError::ReadFailed)
    }
}
