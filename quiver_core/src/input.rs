use crate::protocol::ProtocolKind;
use serde::Deserialize;
use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};
use std::collections::BTreeMap;

/// A single value inside a structured payload.
///
/// This is wider than JSON on purpose: mutation can produce raw byte strings, sets,
/// tuples and non-finite floats, none of which survive a plain `serde_json::Value`.
/// [`FieldValue::to_json`] normalizes them when a test case leaves the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<FieldValue>),
    Set(Vec<FieldValue>),
    Tuple(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Converts to JSON, normalizing values JSON cannot express.
    ///
    /// Byte strings become (lossy) UTF-8 text, sets and tuples become plain lists and
    /// non-finite floats become their textual spelling (`inf`, `-inf`, `NaN`).
    pub fn to_json(&self) -> JsonValue {
        match self {
            FieldValue::Null => JsonValue::Null,
            FieldValue::Bool(b) => JsonValue::Bool(*b),
            FieldValue::Int(i) => JsonValue::Number(JsonNumber::from(*i)),
            FieldValue::Float(f) => match JsonNumber::from_f64(*f) {
                Some(n) => JsonValue::Number(n),
                None => JsonValue::String(non_finite_spelling(*f).to_string()),
            },
            FieldValue::Text(s) => JsonValue::String(s.clone()),
            FieldValue::Bytes(b) => JsonValue::String(String::from_utf8_lossy(b).into_owned()),
            FieldValue::List(items) | FieldValue::Set(items) | FieldValue::Tuple(items) => {
                JsonValue::Array(items.iter().map(FieldValue::to_json).collect())
            }
            FieldValue::Map(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<JsonMap<String, JsonValue>>(),
            ),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

fn non_finite_spelling(f: f64) -> &'static str {
    if f.is_nan() {
        "NaN"
    } else if f.is_sign_negative() {
        "-inf"
    } else {
        "inf"
    }
}

impl From<JsonValue> for FieldValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => FieldValue::Null,
            JsonValue::Bool(b) => FieldValue::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => FieldValue::Text(s),
            JsonValue::Array(items) => {
                FieldValue::List(items.into_iter().map(FieldValue::from).collect())
            }
            JsonValue::Object(map) => FieldValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, FieldValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

/// The body of a test case; its shape is fixed by the campaign's protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw command bytes, opcode first.
    Command(Vec<u8>),
    /// Field name to value map.
    Fields(BTreeMap<String, FieldValue>),
}

impl Payload {
    pub fn kind(&self) -> ProtocolKind {
        match self {
            Payload::Command(_) => ProtocolKind::Binary,
            Payload::Fields(_) => ProtocolKind::Structured,
        }
    }
}

/// The unit of work: an optional label plus a payload.
///
/// Test cases are immutable. Mutation builds a new one through [`TestCase::with_payload`],
/// which keeps the label of the seed it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    name: Option<String>,
    payload: Payload,
}

/// On-disk shape of a binary-protocol test case.
#[derive(Deserialize)]
struct CommandRecord {
    command: Vec<u8>,
    #[serde(default)]
    name: Option<String>,
}

impl TestCase {
    pub fn command(name: Option<&str>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.map(str::to_string),
            payload: Payload::Command(bytes),
        }
    }

    /// Builds a structured test case; the label is taken from a textual `name` field.
    pub fn fields(fields: BTreeMap<String, FieldValue>) -> Self {
        let name = fields
            .get("name")
            .and_then(FieldValue::as_text)
            .map(str::to_string);
        Self {
            name,
            payload: Payload::Fields(fields),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn command_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Command(bytes) => Some(bytes),
            Payload::Fields(_) => None,
        }
    }

    /// First command byte, if this is a non-empty binary test case.
    pub fn opcode(&self) -> Option<u8> {
        self.command_bytes().and_then(|bytes| bytes.first().copied())
    }

    /// Returns a new test case carrying `payload` and this test case's label.
    pub fn with_payload(&self, payload: Payload) -> Self {
        Self {
            name: self.name.clone(),
            payload,
        }
    }

    /// JSON form used for the seed and failure files.
    ///
    /// Binary test cases keep the command as an integer list. Structured ones are
    /// written as their (normalized) field map alone, since the label lives in it.
    pub fn to_json(&self) -> JsonValue {
        match &self.payload {
            Payload::Command(bytes) => {
                let mut object = JsonMap::new();
                object.insert(
                    "command".to_string(),
                    JsonValue::Array(bytes.iter().map(|b| JsonValue::from(*b)).collect()),
                );
                if let Some(name) = &self.name {
                    object.insert("name".to_string(), JsonValue::String(name.clone()));
                }
                JsonValue::Object(object)
            }
            Payload::Fields(fields) => JsonValue::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Parses one seed object for the given protocol.
    pub fn from_json(value: JsonValue, kind: ProtocolKind) -> Result<Self, String> {
        match kind {
            ProtocolKind::Binary => {
                let record: CommandRecord = serde_json::from_value(value).map_err(|e| {
                    format!("expected an object with a `command` array of bytes: {e}")
                })?;
                Ok(Self {
                    name: record.name,
                    payload: Payload::Command(record.command),
                })
            }
            ProtocolKind::Structured => match value {
                JsonValue::Object(map) => Ok(Self::fields(
                    map.into_iter()
                        .map(|(k, v)| (k, FieldValue::from(v)))
                        .collect(),
                )),
                other => Err(format!("expected a JSON object of fields, found {other}")),
            },
        }
    }

    /// Hex md5 digest of the normalized JSON form.
    pub fn digest(&self) -> String {
        format!("{:x}", md5::compute(self.to_json().to_string().as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn binary_test_case_round_trips_through_seed_json() {
        let value = json!({"command": [0, 1, 2, 3, 4, 5, 6], "name": "auth_attempt"});
        let tc = TestCase::from_json(value.clone(), ProtocolKind::Binary).unwrap();
        assert_eq!(tc.name(), Some("auth_attempt"));
        assert_eq!(tc.opcode(), Some(0x00));
        assert_eq!(tc.command_bytes(), Some(&[0u8, 1, 2, 3, 4, 5, 6][..]));
        assert_eq!(tc.to_json(), value);
    }

    #[test]
    fn binary_seed_rejects_out_of_range_bytes_and_missing_command() {
        assert!(TestCase::from_json(json!({"command": [256]}), ProtocolKind::Binary).is_err());
        assert!(TestCase::from_json(json!({"name": "x"}), ProtocolKind::Binary).is_err());
    }

    #[test]
    fn unnamed_binary_test_case_omits_name_key() {
        let tc = TestCase::command(None, vec![1]);
        assert_eq!(tc.to_json(), json!({"command": [1]}));
    }

    #[test]
    fn structured_label_comes_from_name_field() {
        let value = json!({"name": "widget", "info": "blue", "price": 10});
        let tc = TestCase::from_json(value, ProtocolKind::Structured).unwrap();
        assert_eq!(tc.name(), Some("widget"));
        assert_eq!(tc.opcode(), None);
        assert!(matches!(tc.payload(), Payload::Fields(f) if f["price"] == FieldValue::Int(10)));
    }

    #[test]
    fn normalization_handles_values_json_cannot_hold() {
        let mut fields = BTreeMap::new();
        fields.insert("a".to_string(), FieldValue::Bytes(b"hi".to_vec()));
        fields.insert(
            "b".to_string(),
            FieldValue::Set(vec![FieldValue::Int(1), FieldValue::Int(2)]),
        );
        fields.insert(
            "c".to_string(),
            FieldValue::Tuple(vec![FieldValue::Int(1), FieldValue::Int(2), FieldValue::Int(3)]),
        );
        fields.insert("d".to_string(), FieldValue::Float(f64::INFINITY));
        fields.insert("e".to_string(), FieldValue::Float(f64::NEG_INFINITY));
        fields.insert("f".to_string(), FieldValue::Float(f64::NAN));
        let tc = TestCase::fields(fields);
        assert_eq!(
            tc.to_json(),
            json!({"a": "hi", "b": [1, 2], "c": [1, 2, 3], "d": "inf", "e": "-inf", "f": "NaN"})
        );
        assert_eq!(tc.name(), None);
    }

    #[test]
    fn with_payload_keeps_label_and_leaves_original_untouched() {
        let seed = TestCase::command(Some("open_door"), vec![0x01]);
        let mutant = seed.with_payload(Payload::Command(vec![0x02, 0x03]));
        assert_eq!(mutant.name(), Some("open_door"));
        assert_eq!(seed.command_bytes(), Some(&[0x01u8][..]));
        assert_ne!(seed.digest(), mutant.digest());
    }
}
