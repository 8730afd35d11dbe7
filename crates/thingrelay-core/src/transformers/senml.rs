//! SenML-JSON normaliser.
//!
//! Base fields (`bn`, `bt`, `bu`, `bv`, `bs`) carry forward until redefined and
//! are folded into each record. Resolved times below 2^28 are relative to now.

use serde::{Deserialize, Serialize};

use super::{MessageTransformer, Records};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::profile::CBOR_CONTENT_TYPE;

/// Times smaller than this are offsets from the current time.
const RELATIVE_TIME_LIMIT: f64 = 268_435_456.0;

/// One SenML pack entry as received.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawRecord {
    bn: Option<String>,
    bt: Option<f64>,
    bu: Option<String>,
    bv: Option<f64>,
    bs: Option<f64>,
    n: Option<String>,
    u: Option<String>,
    v: Option<f64>,
    vs: Option<String>,
    vb: Option<bool>,
    vd: Option<String>,
    s: Option<f64>,
    t: Option<f64>,
    ut: Option<f64>,
}

/// Resolved SenML record ready for storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SenmlRecord {
    pub publisher: String,
    pub subtopic: String,
    pub protocol: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub unit: String,
    /// Seconds since the unix epoch.
    pub time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bool_value: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SenmlTransformer;

impl MessageTransformer for SenmlTransformer {
    fn transform(&self, msg: &Message) -> Result<Records> {
        if msg.content_type() == CBOR_CONTENT_TYPE {
            return Err(Error::Serialization(
                "SenML-CBOR payloads cannot be decoded".to_string(),
            ));
        }

        let value: serde_json::Value = serde_json::from_slice(&msg.payload)?;
        let raw: Vec<RawRecord> = if value.is_array() {
            serde_json::from_value(value)?
        } else {
            vec![serde_json::from_value(value)?]
        };

        let now = msg.created as f64 / 1e9;
        normalize(&raw, now).map(|records| {
            Records::Senml(
                records
                    .into_iter()
                    .map(|r| SenmlRecord {
                        publisher: msg.publisher.clone(),
                        subtopic: msg.subtopic.clone(),
                        protocol: msg.protocol.clone(),
                        ..r
                    })
                    .collect(),
            )
        })
    }
}

fn normalize(raw: &[RawRecord], now: f64) -> Result<Vec<SenmlRecord>> {
    let mut base_name = String::new();
    let mut base_time = 0.0;
    let mut base_unit = String::new();
    let mut base_value = 0.0;
    let mut base_sum = 0.0;

    let mut records = Vec::with_capacity(raw.len());
    for r in raw {
        if let Some(bn) = &r.bn {
            base_name = bn.clone();
        }
        if let Some(bt) = r.bt {
            base_time = bt;
        }
        if let Some(bu) = &r.bu {
            base_unit = bu.clone();
        }
        if let Some(bv) = r.bv {
            base_value = bv;
        }
        if let Some(bs) = r.bs {
            base_sum = bs;
        }

        let name = format!("{}{}", base_name, r.n.as_deref().unwrap_or(""));
        if name.is_empty() {
            return Err(Error::Validation("SenML record has no name".to_string()));
        }

        let value_count = [
            r.v.is_some(),
            r.vs.is_some(),
            r.vb.is_some(),
            r.vd.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if value_count > 1 || (value_count == 0 && r.s.is_none()) {
            return Err(Error::Validation(format!(
                "SenML record {} must carry exactly one value or a sum",
                name
            )));
        }

        let mut time = base_time + r.t.unwrap_or(0.0);
        if time < RELATIVE_TIME_LIMIT {
            time += now;
        }

        records.push(SenmlRecord {
            publisher: String::new(),
            subtopic: String::new(),
            protocol: String::new(),
            name,
            unit: r.u.clone().unwrap_or_else(|| base_unit.clone()),
            time,
            update_time: r.ut,
            value: r.v.map(|v| base_value + v),
            string_value: r.vs.clone(),
            bool_value: r.vb,
            data_value: r.vd.clone(),
            sum: r.s.map(|s| base_sum + s),
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ProfileConfig, SENML_CONTENT_TYPE};

    fn message(payload: &str) -> Message {
        let mut msg = Message::new("mqtt", "room", payload.as_bytes().to_vec());
        msg.publisher = "t1".into();
        msg.created = 1_700_000_000_000_000_000;
        msg.profile = Some(ProfileConfig::new(SENML_CONTENT_TYPE));
        msg
    }

    fn records(msg: &Message) -> Vec<SenmlRecord> {
        match SenmlTransformer.transform(msg).unwrap() {
            Records::Senml(r) => r,
            other => panic!("unexpected records {:?}", other),
        }
    }

    #[test]
    fn test_base_fields_are_resolved() {
        let msg = message(
            r#"[{"bn":"dev1:","bt":1.6e9,"bu":"Cel","n":"temp","v":21.5},
                {"n":"hum","u":"%RH","v":40,"t":5}]"#,
        );
        let out = records(&msg);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "dev1:temp");
        assert_eq!(out[0].unit, "Cel");
        assert_eq!(out[0].time, 1.6e9);
        assert_eq!(out[1].name, "dev1:hum");
        assert_eq!(out[1].unit, "%RH");
        assert_eq!(out[1].time, 1.6e9 + 5.0);
        assert_eq!(out[1].publisher, "t1");
        assert_eq!(out[1].subtopic, "room");
    }

    #[test]
    fn test_relative_time_and_base_value() {
        let msg = message(r#"{"n":"x","bv":10,"v":1.5,"t":-2}"#);
        let out = records(&msg);
        assert_eq!(out[0].value, Some(11.5));
        assert_eq!(out[0].time, 1.7e9 - 2.0);
    }

    #[test]
    fn test_invalid_records() {
        assert!(SenmlTransformer.transform(&message(r#"[{"v":1}]"#)).is_err());
        assert!(SenmlTransformer
            .transform(&message(r#"[{"n":"a","v":1,"vs":"x"}]"#))
            .is_err());
        assert!(SenmlTransformer.transform(&message(r#"[{"n":"a"}]"#)).is_err());
        assert!(SenmlTransformer.transform(&message("not json")).is_err());
    }

    #[test]
    fn test_cbor_is_rejected() {
        let mut msg = message("[]");
        msg.profile = Some(ProfileConfig::new(CBOR_CONTENT_TYPE));
        assert!(matches!(
            SenmlTransformer.transform(&msg),
            Err(Error::Serialization(_))
        ));
    }
}
