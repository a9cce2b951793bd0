//! The observation record type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AggError, Result};

/// An observation record pushed by a producer.
///
/// The payload is opaque to the server: it is any JSON object carrying a
/// non-empty string field `id`, which identifies the reporting station.
/// Records are keyed and replaced by `id` only; everything else is stored
/// and returned verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// parses a record from a JSON object string
    pub fn from_json(raw: &str) -> Result<Record> {
        Ok(serde_json::from_str(raw)?)
    }

    /// returns the station id, if the payload carries one as a string
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// returns the station id or fails when it is missing or empty
    pub fn require_id(&self) -> Result<&str> {
        match self.id() {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(AggError::InvalidRecord("missing ID".to_string())),
        }
    }

    /// returns a field of the payload by name
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(raw: &str) -> Record {
        Record::from_json(raw).expect("test record should parse")
    }

    #[test]
    fn id_is_read_from_payload() {
        let rec = record(r#"{"id":"IDS60901","air_temp":13.3}"#);
        assert_eq!(rec.id(), Some("IDS60901"));
        assert_eq!(rec.require_id().unwrap(), "IDS60901");
    }

    #[test]
    fn missing_or_empty_id_is_rejected() {
        assert!(record(r#"{"air_temp":13.3}"#).require_id().is_err());
        assert!(record(r#"{"id":""}"#).require_id().is_err());
        assert!(record(r#"{"id":42}"#).require_id().is_err());
    }

    #[test]
    fn payload_round_trips_verbatim() {
        let raw = r#"{"id":"IDS60901","air_temp":13.3,"cloud":"Partly cloudy"}"#;
        let rec = record(raw);
        let back: Record = serde_json::from_str(&serde_json::to_string(&rec).unwrap()).unwrap();
        assert_eq!(rec, back);
        assert_eq!(back.get("cloud"), Some(&Value::from("Partly cloudy")));
    }
}
