//! Self-describing message envelope used on the external bus.
//!
//! Structured-mode JSON with the attributes `specversion`, `type`, `source`,
//! `id`, `time`, `datacontenttype` and `data`:
//!
//! ```json
//! {
//!   "specversion": "1.0",
//!   "type": "dashboard.updated",
//!   "source": "https://api.example.com/dashboards",
//!   "id": "0190b6d4-6c1e-7d8a-9a47-4a7e3f2f1b10",
//!   "time": "2026-01-01T00:00:00Z",
//!   "datacontenttype": "application/json",
//!   "data": {"broadcast": true, "payload": {"kind": "refresh"}}
//! }
//! ```
//!
//! Decoding validates the enumerated attributes and the source URI. Both
//! directions are pure.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::errors::EnvelopeError;

/// Base against which relative `source` references are checked.
const REFERENCE_BASE: &str = "relay://local/";

/// Supported envelope spec versions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpecVersion {
    /// `1.0`
    V1_0,
    /// `0.3`
    V0_3,
}

impl SpecVersion {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V0_3 => "0.3",
        }
    }

    /// Parse the wire representation.
    pub fn parse(s: &str) -> Result<Self, EnvelopeError> {
        match s {
            "1.0" => Ok(Self::V1_0),
            "0.3" => Ok(Self::V0_3),
            other => Err(EnvelopeError::InvalidSpecVersion(other.to_owned())),
        }
    }
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported `datacontenttype` values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContentType {
    /// `application/json`
    #[default]
    ApplicationJson,
    /// `text/json`
    TextJson,
}

impl ContentType {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApplicationJson => "application/json",
            Self::TextJson => "text/json",
        }
    }

    /// Parse the wire representation. Media-type parameters such as
    /// `; charset=utf-8` are ignored.
    pub fn parse(s: &str) -> Result<Self, EnvelopeError> {
        let essence = s.split(';').next().unwrap_or_default().trim();
        if essence.eq_ignore_ascii_case("application/json") {
            Ok(Self::ApplicationJson)
        } else if essence.eq_ignore_ascii_case("text/json") {
            Ok(Self::TextJson)
        } else {
            Err(EnvelopeError::InvalidContentType(s.to_owned()))
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded, validated envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Envelope spec version.
    pub spec_version: SpecVersion,
    /// Producer-defined event type.
    pub event_type: String,
    /// URI identifying the producer.
    pub source: String,
    /// Producer-unique event ID.
    pub id: String,
    /// When the event happened, if the producer said.
    pub time: Option<DateTime<Utc>>,
    /// Content type of `data`.
    pub content_type: ContentType,
    /// The wrapped body.
    pub data: Value,
}

#[derive(Serialize)]
struct WireOut<'a> {
    specversion: &'static str,
    #[serde(rename = "type")]
    event_type: &'a str,
    source: &'a str,
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<DateTime<Utc>>,
    datacontenttype: &'static str,
    data: &'a Value,
}

#[derive(Deserialize)]
struct WireIn {
    specversion: String,
    #[serde(rename = "type")]
    event_type: String,
    source: String,
    id: String,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    datacontenttype: Option<String>,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    /// Build a `1.0` JSON envelope stamped with the current time.
    pub fn new(
        data: Value,
        source: impl Into<String>,
        id: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            spec_version: SpecVersion::V1_0,
            event_type: event_type.into(),
            source: source.into(),
            id: id.into(),
            time: Some(Utc::now()),
            content_type: ContentType::ApplicationJson,
            data,
        }
    }

    /// Validate and serialize.
    pub fn to_bytes(&self) -> Result<Bytes, EnvelopeError> {
        validate_source(&self.source)?;
        let wire = WireOut {
            specversion: self.spec_version.as_str(),
            event_type: &self.event_type,
            source: &self.source,
            id: &self.id,
            time: self.time,
            datacontenttype: self.content_type.as_str(),
            data: &self.data,
        };
        Ok(Bytes::from(serde_json::to_vec(&wire)?))
    }
}

/// Wrap `data` in a fresh envelope and serialize it.
pub fn encode(
    data: &Value,
    source: &str,
    id: &str,
    event_type: &str,
) -> Result<Bytes, EnvelopeError> {
    Envelope::new(data.clone(), source, id, event_type).to_bytes()
}

/// Parse and validate an envelope.
pub fn decode(bytes: &[u8]) -> Result<Envelope, EnvelopeError> {
    let wire: WireIn = serde_json::from_slice(bytes)?;
    let spec_version = SpecVersion::parse(&wire.specversion)?;
    let content_type = match wire.datacontenttype.as_deref() {
        Some(ct) => ContentType::parse(ct)?,
        None => ContentType::default(),
    };
    validate_source(&wire.source)?;
    Ok(Envelope {
        spec_version,
        event_type: wire.event_type,
        source: wire.source,
        id: wire.id,
        time: wire.time,
        content_type,
        data: wire.data,
    })
}

/// Accept an absolute URI or a relative reference.
fn validate_source(source: &str) -> Result<(), EnvelopeError> {
    let invalid = |reason: String| EnvelopeError::InvalidSource {
        source_uri: source.to_owned(),
        reason,
    };
    if source.is_empty() {
        return Err(invalid("empty".into()));
    }
    if source.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid("contains whitespace or control characters".into()));
    }
    match Url::parse(source) {
        Ok(_) => Ok(()),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(REFERENCE_BASE)
            .and_then(|base| base.join(source))
            .map(|_| ())
            .map_err(|e| invalid(e.to_string())),
        Err(e) => Err(invalid(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;

    fn envelope_json(specversion: &str, content_type: &str, source: &str) -> Vec<u8> {
        json!({
            "specversion": specversion,
            "type": "test.event",
            "source": source,
            "id": "evt-1",
            "datacontenttype": content_type,
            "data": {"broadcast": true, "payload": {"n": 1}},
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn encode_sets_attributes() {
        let bytes = encode(&json!({"a": 1}), "https://api.example.com/x", "id-1", "t.x").unwrap();
        let raw: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(raw["specversion"], "1.0");
        assert_eq!(raw["type"], "t.x");
        assert_eq!(raw["source"], "https://api.example.com/x");
        assert_eq!(raw["id"], "id-1");
        assert_eq!(raw["datacontenttype"], "application/json");
        assert!(raw["time"].is_string());
        assert_eq!(raw["data"]["a"], 1);
    }

    #[test]
    fn decode_valid_envelope() {
        let env = decode(&envelope_json("1.0", "application/json", "/dashboards")).unwrap();
        assert_eq!(env.spec_version, SpecVersion::V1_0);
        assert_eq!(env.content_type, ContentType::ApplicationJson);
        assert_eq!(env.event_type, "test.event");
        assert_eq!(env.id, "evt-1");
        assert_eq!(env.data["broadcast"], true);
    }

    #[test]
    fn decode_accepts_older_spec_version_and_text_json() {
        let env = decode(&envelope_json("0.3", "text/json", "urn:relay:test")).unwrap();
        assert_eq!(env.spec_version, SpecVersion::V0_3);
        assert_eq!(env.content_type, ContentType::TextJson);
    }

    #[test]
    fn content_type_parameters_ignored() {
        assert_eq!(
            ContentType::parse("application/json; charset=utf-8").unwrap(),
            ContentType::ApplicationJson
        );
    }

    #[test]
    fn unsupported_spec_version() {
        let err = decode(&envelope_json("2.0", "application/json", "/x")).unwrap_err();
        assert_matches!(err, EnvelopeError::InvalidSpecVersion(v) if v == "2.0");
    }

    #[test]
    fn unsupported_content_type() {
        let err = decode(&envelope_json("1.0", "application/xml", "/x")).unwrap_err();
        assert_matches!(err, EnvelopeError::InvalidContentType(ct) if ct == "application/xml");
    }

    #[test]
    fn invalid_source() {
        for source in ["", "http://[::1", "has space"] {
            let err = decode(&envelope_json("1.0", "application/json", source)).unwrap_err();
            assert_matches!(err, EnvelopeError::InvalidSource { .. }, "source {source:?}");
        }
    }

    #[test]
    fn encode_rejects_invalid_source() {
        let err = encode(&json!(null), "http://[::1", "id", "t").unwrap_err();
        assert_matches!(err, EnvelopeError::InvalidSource { .. });
    }

    #[test]
    fn malformed_outer_json() {
        assert_matches!(decode(b"{not json"), Err(EnvelopeError::MalformedEnvelope(_)));
        assert_matches!(decode(b"[1,2]"), Err(EnvelopeError::MalformedEnvelope(_)));
    }

    #[test]
    fn missing_required_attribute_is_malformed() {
        let bytes = json!({"specversion": "1.0", "source": "/x", "id": "1"}).to_string();
        assert_matches!(decode(bytes.as_bytes()), Err(EnvelopeError::MalformedEnvelope(_)));
    }

    #[test]
    fn content_type_defaults_when_absent() {
        let bytes = json!({"specversion": "1.0", "type": "t", "source": "/x", "id": "1"}).to_string();
        let env = decode(bytes.as_bytes()).unwrap();
        assert_eq!(env.content_type, ContentType::ApplicationJson);
        assert!(env.time.is_none());
        assert_eq!(env.data, Value::Null);
    }

    #[test]
    fn spec_version_checked_before_content_type() {
        let err = decode(&envelope_json("9.9", "text/xml", "")).unwrap_err();
        assert_matches!(err, EnvelopeError::InvalidSpecVersion(_));
    }

    #[test]
    fn float_data_is_exact() {
        let data = json!({"payload": 2.435_359_894_375_784e-88_f64});
        let bytes = encode(&data, "/s", "1", "t").unwrap();
        assert_eq!(decode(&bytes).unwrap().data, data);
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            any::<f64>()
                .prop_filter("finite", |f| f.is_finite())
                .prop_map(|f| json!(f)),
            ".*".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{0,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn data_survives_encode_decode(data in arb_json()) {
            let bytes = encode(&data, "https://relay.test/source", "id-1", "t.prop").unwrap();
            let env = decode(&bytes).unwrap();
            prop_assert_eq!(env.data, data);
        }

        #[test]
        fn floats_survive_encode_decode(x in any::<f64>().prop_filter("finite", |f| f.is_finite())) {
            let data = json!({"payload": x});
            let bytes = encode(&data, "/s", "1", "t").unwrap();
            prop_assert_eq!(decode(&bytes).unwrap().data, data);
        }
    }
}
