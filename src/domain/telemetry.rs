use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionTelemetry {
    pub session_id: u64,
    #[serde(rename = "energy_delivered_kWh")]
    pub energy_delivered_kwh: f64,
    pub duration_seconds: u64,
    pub session_cost_cents: u64,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[source] std::str::Utf8Error),
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    InvalidPayloadType,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("field {field} must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("field {field} must be {constraint}")]
    OutOfRange {
        field: &'static str,
        constraint: &'static str,
    },
}

impl ValidationError {
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::InvalidPayloadType => None,
            Self::MissingField(field)
            | Self::WrongType { field, .. }
            | Self::OutOfRange { field, .. } => Some(field),
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to encode telemetry: {0}")]
pub struct CodecError(#[from] serde_json::Error);

struct FieldSpec {
    name: &'static str,
    aliases: &'static [&'static str],
}

// Older chargers still send the `_in_` spellings.
const SESSION_ID: FieldSpec = FieldSpec {
    name: "session_id",
    aliases: &[],
};
const ENERGY_DELIVERED: FieldSpec = FieldSpec {
    name: "energy_delivered_kWh",
    aliases: &["energy_delivered_in_kWh"],
};
const DURATION: FieldSpec = FieldSpec {
    name: "duration_seconds",
    aliases: &["duration_in_seconds"],
};
const SESSION_COST: FieldSpec = FieldSpec {
    name: "session_cost_cents",
    aliases: &["session_cost_in_cents"],
};

pub fn encode(telemetry: &SessionTelemetry) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(telemetry).map_err(CodecError::from)
}

pub fn decode_json(raw: &[u8]) -> Result<Value, DecodeError> {
    let text = std::str::from_utf8(raw).map_err(DecodeError::InvalidUtf8)?;
    serde_json::from_str(text).map_err(DecodeError::InvalidJson)
}

pub fn validate(payload: &Value) -> Result<SessionTelemetry, ValidationError> {
    let object = payload
        .as_object()
        .ok_or(ValidationError::InvalidPayloadType)?;

    let session_id = required_u64(object, &SESSION_ID)?;
    if session_id == 0 {
        return Err(ValidationError::OutOfRange {
            field: SESSION_ID.name,
            constraint: "a positive integer",
        });
    }

    Ok(SessionTelemetry {
        session_id,
        energy_delivered_kwh: required_non_negative_f64(object, &ENERGY_DELIVERED)?,
        duration_seconds: required_u64(object, &DURATION)?,
        session_cost_cents: required_u64(object, &SESSION_COST)?,
    })
}

fn find_value<'a>(object: &'a Map<String, Value>, field: &FieldSpec) -> Option<&'a Value> {
    std::iter::once(field.name)
        .chain(field.aliases.iter().copied())
        .find_map(|key| object.get(key))
}

fn required_u64(object: &Map<String, Value>, field: &FieldSpec) -> Result<u64, ValidationError> {
    let value = find_value(object, field).ok_or(ValidationError::MissingField(field.name))?;
    let Value::Number(number) = value else {
        return Err(ValidationError::WrongType {
            field: field.name,
            expected: "an integer",
        });
    };

    if let Some(parsed) = number.as_u64() {
        if parsed > i64::MAX as u64 {
            return Err(ValidationError::OutOfRange {
                field: field.name,
                constraint: "at most 9223372036854775807",
            });
        }
        return Ok(parsed);
    }

    if number.as_i64().is_some() {
        return Err(ValidationError::OutOfRange {
            field: field.name,
            constraint: "non-negative",
        });
    }

    Err(ValidationError::WrongType {
        field: field.name,
        expected: "an integer",
    })
}

fn required_non_negative_f64(
    object: &Map<String, Value>,
    field: &FieldSpec,
) -> Result<f64, ValidationError> {
    let value = find_value(object, field).ok_or(ValidationError::MissingField(field.name))?;
    let parsed = value.as_f64().ok_or(ValidationError::WrongType {
        field: field.name,
        expected: "a number",
    })?;

    if !parsed.is_finite() || parsed < 0.0 {
        return Err(ValidationError::OutOfRange {
            field: field.name,
            constraint: "non-negative",
        });
    }

    Ok(parsed)
}
