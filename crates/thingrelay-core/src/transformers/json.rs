//! JSON payload transformer.
//!
//! Applies the profile's [`Transformer`](crate::profile::Transformer): select
//! the data object, keep the filtered keys, and read the record time from the
//! configured field. Without a configured transformer the payload is kept whole and
//! stamped with the message creation time.

use serde::Serialize;
use serde_json::{Map, Value};

use super::{MessageTransformer, Records};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::profile::Transformer;
use crate::timefmt::{parse_timezone, TimeFormat};

/// Stored JSON record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRecord {
    pub publisher: String,
    pub subtopic: String,
    pub protocol: String,
    /// Unix nanoseconds.
    pub created: i64,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTransformer;

impl MessageTransformer for JsonTransformer {
    fn transform(&self, msg: &Message) -> Result<Records> {
        let value: Value = serde_json::from_slice(&msg.payload)?;
        let config = msg
            .profile
            .as_ref()
            .and_then(|p| p.transformer.clone())
            .unwrap_or_default();

        let objects = match value {
            Value::Array(items) => items,
            other => vec![other],
        };

        let mut records = Vec::with_capacity(objects.len());
        for object in objects {
            let Value::Object(object) = object else {
                return Err(Error::Validation(
                    "JSON payload must be an object or an array of objects".to_string(),
                ));
            };
            records.push(JsonRecord {
                publisher: msg.publisher.clone(),
                subtopic: msg.subtopic.clone(),
                protocol: msg.protocol.clone(),
                created: record_time(&object, &config)?.unwrap_or(msg.created),
                payload: select_data(object, &config)?,
            });
        }

        Ok(Records::Json(records))
    }
}

fn record_time(object: &Map<String, Value>, config: &Transformer) -> Result<Option<i64>> {
    if config.time_field.is_empty() {
        return Ok(None);
    }
    let Some(value) = lookup_path(object, &config.time_field) else {
        return Ok(None);
    };
    let tz = parse_timezone(&config.time_location)?;
    TimeFormat::parse(&config.time_format)
        .parse_value(value, tz)
        .map(Some)
}

fn select_data(object: Map<String, Value>, config: &Transformer) -> Result<Map<String, Value>> {
    let data = if config.data_field.is_empty() {
        object
    } else {
        match lookup_path(&object, &config.data_field) {
            Some(Value::Object(inner)) => inner.clone(),
            Some(_) => {
                return Err(Error::Validation(format!(
                    "data field {} is not an object",
                    config.data_field
                )))
            }
            None => return Err(Error::NotFound(format!("data field {}", config.data_field))),
        }
    };

    if config.data_filters.is_empty() {
        return Ok(data);
    }

    Ok(data
        .into_iter()
        .filter(|(key, _)| config.data_filters.iter().any(|f| f == key))
        .collect())
}

/// Follow a dot path through nested objects.
pub(crate) fn lookup_path<'a>(object: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = object.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
