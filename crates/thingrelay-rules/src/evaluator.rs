//! Condition evaluation against message payloads.
//!
//! A payload is one JSON object or an array of them. Arrays are evaluated
//! per element and every triggering element is reported on its own.
//!
//! Field lookup depends on the content format:
//! - SenML: only the record's own `n`/`v` pair is read. Nested or packed
//!   records are not searched.
//! - JSON: a dot path is tried first, then a depth-first search for the
//!   key name. The first match wins.
//!
//! Values coerce to `f64` from numbers or numeric strings. Booleans, nulls
//! and other strings never meet a condition; objects and arrays are
//! [`Error::InvalidValueType`] for the record. [`evaluate`] counts such
//! records as skipped and carries on with the rest of the batch.

use serde_json::Value;

use thingrelay_core::{Comparator, Condition, ContentFormat, Error, Operator, Result, Rule};

const SENML_NAME: &str = "n";
const SENML_VALUE: &str = "v";

/// Outcome of evaluating one rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// `true` when nothing triggered.
    pub valid: bool,
    /// Serialized records that triggered the rule.
    pub triggered: Vec<Vec<u8>>,
    /// Records whose matched value was an object or array.
    pub skipped: usize,
}

pub fn evaluate(payload: &[u8], format: ContentFormat, rule: &Rule) -> Result<Evaluation> {
    let value: Value = serde_json::from_slice(payload)?;

    let records = match &value {
        Value::Array(records) => records.as_slice(),
        record => std::slice::from_ref(record),
    };

    let mut triggered = Vec::new();
    let mut skipped = 0;
    for record in records {
        match triggers(record, format, rule) {
            Ok(true) => triggered.push(serde_json::to_vec(record)?),
            Ok(false) => {}
            Err(Error::InvalidValueType(_)) => skipped += 1,
            Err(e) => return Err(e),
        }
    }

    Ok(Evaluation {
        valid: triggered.is_empty(),
        triggered,
        skipped,
    })
}

/// Whether one record meets the rule's combined conditions.
pub fn triggers(record: &Value, format: ContentFormat, rule: &Rule) -> Result<bool> {
    if rule.conditions.is_empty() {
        return Ok(false);
    }

    match rule.operator.unwrap_or(Operator::And) {
        Operator::And => {
            for condition in &rule.conditions {
                if !condition_met(record, format, condition)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Operator::Or => {
            for condition in &rule.conditions {
                if condition_met(record, format, condition)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

pub fn condition_met(record: &Value, format: ContentFormat, condition: &Condition) -> Result<bool> {
    let Some(comparator) = Comparator::parse(&condition.comparator) else {
        return Ok(false);
    };

    let found = match format {
        ContentFormat::Senml => senml_value(record, &condition.field),
        ContentFormat::Json => find_field(record, &condition.field),
    };
    let Some(found) = found else {
        return Ok(false);
    };

    match coerce(found, &condition.field)? {
        Some(value) => Ok(comparator.evaluate(value, condition.threshold)),
        None => Ok(false),
    }
}

fn senml_value<'a>(record: &'a Value, field: &str) -> Option<&'a Value> {
    let name = record.get(SENML_NAME)?.as_str()?;
    if name != field {
        return None;
    }
    record.get(SENML_VALUE)
}

/// Dot path first, then depth-first search by key name.
pub fn find_field<'a>(record: &'a Value, field: &str) -> Option<&'a Value> {
    if field.contains('.') {
        let by_path = field
            .split('.')
            .try_fold(record, |current, key| current.get(key));
        if by_path.is_some() {
            return by_path;
        }
    }
    search(record, field)
}

fn search<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map
            .get(key)
            .or_else(|| map.values().find_map(|v| search(v, key))),
        Value::Array(items) => items.iter().find_map(|v| search(v, key)),
        _ => None,
    }
}

fn coerce(value: &Value, field: &str) -> Result<Option<f64>> {
    match value {
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => Ok(s.trim().parse::<f64>().ok()),
        Value::Bool(_) | Value::Null => Ok(None),
        Value::Object(_) | Value::Array(_) => Err(Error::InvalidValueType(field.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hot(field: &str) -> Rule {
        Rule::new("r1", "hot", Condition::new(field, ">", 30.0))
    }

    #[test]
    fn test_single_object() {
        let rule = hot("temperature");
        let result = evaluate(br#"{"temperature": 35}"#, ContentFormat::Json, &rule).unwrap();
        assert!(!result.valid);
        assert_eq!(result.triggered.len(), 1);

        let result = evaluate(br#"{"temperature": 25}"#, ContentFormat::Json, &rule).unwrap();
        assert!(result.valid);
        assert!(result.triggered.is_empty());
    }

    #[test]
    fn test_array_reports_each_offender() {
        let result = evaluate(br#"[{"t":35},{"t":10}]"#, ContentFormat::Json, &hot("t")).unwrap();
        assert!(!result.valid);
        assert_eq!(result.triggered, vec![br#"{"t":35}"#.to_vec()]);
    }

    #[test]
    fn test_uncoercible_record_does_not_abort_batch() {
        let result = evaluate(br#"[{"t":{"x":1}},{"t":35}]"#, ContentFormat::Json, &hot("t")).unwrap();
        assert!(!result.valid);
        assert_eq!(result.triggered, vec![br#"{"t":35}"#.to_vec()]);
        assert_eq!(result.skipped, 1);

        let result = evaluate(br#"{"t":[1,2]}"#, ContentFormat::Json, &hot("t")).unwrap();
        assert!(result.valid);
        assert_eq!(result.skipped, 1);
    }

    #[test]
    fn test_nested_lookup() {
        let record = json!({"device": {"sensors": [{"temp": "40.5"}]}});
        assert!(triggers(&record, ContentFormat::Json, &hot("temp")).unwrap());

        let record = json!({"a": {"t": 1}, "b": {"t": 99}});
        assert!(!triggers(&record, ContentFormat::Json, &hot("t")).unwrap());
        assert!(triggers(&record, ContentFormat::Json, &hot("b.t")).unwrap());
    }

    #[test]
    fn test_senml_reads_only_top_level_pair() {
        let rule = hot("temp");
        assert!(triggers(&json!({"n": "temp", "v": 31}), ContentFormat::Senml, &rule).unwrap());
        assert!(!triggers(&json!({"n": "hum", "v": 31}), ContentFormat::Senml, &rule).unwrap());
        assert!(!triggers(
            &json!({"n": "pack", "e": [{"n": "temp", "v": 31}]}),
            ContentFormat::Senml,
            &rule
        )
        .unwrap());
    }

    #[test]
    fn test_value_coercion() {
        let rule = hot("t");
        assert!(!triggers(&json!({"t": true}), ContentFormat::Json, &rule).unwrap());
        assert!(!triggers(&json!({"t": "warm"}), ContentFormat::Json, &rule).unwrap());
        assert!(!triggers(&json!({"t": null}), ContentFormat::Json, &rule).unwrap());
        assert!(matches!(
            triggers(&json!({"t": {"deep": 1}}), ContentFormat::Json, &rule),
            Err(Error::InvalidValueType(_))
        ));
    }

    #[test]
    fn test_unknown_comparator_never_met() {
        let rule = Rule::new("r", "n", Condition::new("t", "!=", 1.0));
        assert!(!triggers(&json!({"t": 5}), ContentFormat::Json, &rule).unwrap());
    }

    #[test]
    fn test_operators() {
        let record = json!({"t": 35, "h": 50});
        let and = hot("t")
            .with_condition(Condition::new("h", "<", 40.0))
            .with_operator(Operator::And);
        let or = hot("t")
            .with_condition(Condition::new("h", "<", 40.0))
            .with_operator(Operator::Or);
        assert!(!triggers(&record, ContentFormat::Json, &and).unwrap());
        assert!(triggers(&record, ContentFormat::Json, &or).unwrap());
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(
            evaluate(b"not json", ContentFormat::Json, &hot("t")),
            Err(Error::Serialization(_))
        ));
    }
}
