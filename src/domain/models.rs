use crate::domain::telemetry::SessionTelemetry;

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub id: String,
    pub received_at: String,
    pub topic: String,
    pub payload: SessionTelemetry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLogRecord {
    pub received_at: String,
    pub topic: String,
    pub payload: SessionTelemetry,
}
