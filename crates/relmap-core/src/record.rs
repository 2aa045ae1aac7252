//! Records viewed through their serde object form.
//!
//! relmap never inspects record types directly. A record is anything that
//! serializes to a JSON object; fields are read and written by key on that
//! object and the record is rebuilt through `Deserialize`.

use crate::Result;
use crate::error::{Error, ShapeError, ShapeErrorKind};
use crate::value::Value;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub type Object = serde_json::Map<String, serde_json::Value>;

/// Serialize a record into its object form.
#[allow(clippy::result_large_err)]
pub fn to_object<T: Serialize>(record: &T) -> Result<Object> {
    match serde_json::to_value(record)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(Error::Shape(ShapeError::new(
            ShapeErrorKind::NotARecord,
            format!(
                "{} serialized to {} instead of an object",
                std::any::type_name::<T>(),
                json_kind(&other)
            ),
        ))),
    }
}

/// Rebuild a record from its object form.
#[allow(clippy::result_large_err)]
pub fn from_object<T: DeserializeOwned>(object: Object) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(object)).map_err(|e| {
        Error::Serde(format!(
            "rebuild {}: {}",
            std::any::type_name::<T>(),
            e
        ))
    })
}

/// Read one field of a record as a SQL value.
#[allow(clippy::result_large_err)]
pub fn field_value<T: Serialize>(record: &T, field: &str) -> Result<Value> {
    let object = to_object(record)?;
    object.get(field).map(Value::from_json).ok_or_else(|| {
        Error::Shape(
            ShapeError::new(
                ShapeErrorKind::MissingField,
                format!("{} has no field", std::any::type_name::<T>()),
            )
            .with_field(field),
        )
    })
}

/// Overwrite fields of `record` with `updates` and rebuild it in place.
///
/// On failure the record is left untouched.
#[allow(clippy::result_large_err)]
pub fn merge_fields<T>(record: &mut T, updates: Object) -> Result<()>
where
    T: Serialize + DeserializeOwned,
{
    let mut object = to_object(record)?;
    for (key, value) in updates {
        object.insert(key, value);
    }
    *record = from_object(object)?;
    Ok(())
}

/// Short name of a JSON value's kind, for messages.
pub fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
