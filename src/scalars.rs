//! Scalar marshaling between wire values and runtime values.
//!
//! A [`ScalarSpec`] pairs a runtime type label with a [`ScalarCodec`]. Codecs
//! must be inverses over the scalar's legal value space:
//! `unmarshal(marshal(v)) == v` and `marshal(unmarshal(w)) == w`.
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScalarError {
    #[error("{scalar}: expected {expected}, got {found}")]
    UnexpectedWire {
        scalar: String,
        expected: &'static str,
        found: String,
    },
    #[error("{scalar}: runtime value {found} is not valid for this scalar")]
    UnexpectedRuntime { scalar: String, found: String },
    #[error("{scalar}: {message}")]
    OutOfRange { scalar: String, message: String },
    #[error("{scalar}: \"{found}\" is not canonical, expected \"{canonical}\"")]
    NotCanonical {
        scalar: String,
        found: String,
        canonical: String,
    },
    #[error("unknown scalar codec \"{0}\"")]
    UnknownCodec(String),
}

/// Value handed to application code after unmarshaling.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    Json(Value),
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for RuntimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeValue::Json(value) => write!(f, "{value}"),
            RuntimeValue::Timestamp(ts) => {
                f.write_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
        }
    }
}

/// Conversion between the wire representation and the runtime representation.
pub trait ScalarCodec: Send + Sync + fmt::Debug {
    fn marshal(&self, scalar: &str, value: &RuntimeValue) -> Result<Value, ScalarError>;
    fn unmarshal(&self, scalar: &str, wire: &Value) -> Result<RuntimeValue, ScalarError>;

    /// Whether the codec leaves values untouched (no runtime conversion needed).
    fn is_identity(&self) -> bool {
        false
    }
}

/// Codec names accepted in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecName {
    #[default]
    Passthrough,
    EpochMillis,
    Rfc3339,
}

impl CodecName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecName::Passthrough => "passthrough",
            CodecName::EpochMillis => "epoch_millis",
            CodecName::Rfc3339 => "rfc3339",
        }
    }

    pub fn codec(&self) -> Arc<dyn ScalarCodec> {
        match self {
            CodecName::Passthrough => Arc::new(Passthrough),
            CodecName::EpochMillis => Arc::new(EpochMillis),
            CodecName::Rfc3339 => Arc::new(Rfc3339),
        }
    }
}

impl fmt::Display for CodecName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire-level shape of a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireType {
    Any,
    Boolean,
    Int,
    Float,
    String,
}

/// Registered conversion for one scalar type name.
#[derive(Debug, Clone)]
pub struct ScalarSpec {
    /// Type label used by generated bindings (e.g. `Date`).
    pub runtime_type: String,
    pub wire_type: WireType,
    codec: Arc<dyn ScalarCodec>,
}

impl ScalarSpec {
    pub fn new(runtime_type: impl Into<String>, wire_type: WireType, codec: Arc<dyn ScalarCodec>) -> Self {
        Self {
            runtime_type: runtime_type.into(),
            wire_type,
            codec,
        }
    }

    /// Spec for a custom scalar without conversion functions.
    pub fn passthrough(runtime_type: impl Into<String>) -> Self {
        Self::new(runtime_type, WireType::Any, Arc::new(Passthrough))
    }

    /// Spec for a scalar that travels as epoch milliseconds and lives as a timestamp.
    pub fn epoch_millis() -> Self {
        Self::new("Date", WireType::Int, Arc::new(EpochMillis))
    }

    pub fn rfc3339() -> Self {
        Self::new("Date", WireType::String, Arc::new(Rfc3339))
    }

    /// Default spec for one of the built-in scalars.
    pub fn builtin(name: &str) -> Option<Self> {
        let (runtime_type, wire_type) = match name {
            "Boolean" => ("boolean", WireType::Boolean),
            "Int" => ("number", WireType::Int),
            "Float" => ("number", WireType::Float),
            "String" | "ID" => ("string", WireType::String),
            _ => return None,
        };
        Some(Self::new(runtime_type, wire_type, Arc::new(Checked(wire_type))))
    }

    pub fn marshal(&self, scalar: &str, value: &RuntimeValue) -> Result<Value, ScalarError> {
        self.codec.marshal(scalar, value)
    }

    pub fn unmarshal(&self, scalar: &str, wire: &Value) -> Result<RuntimeValue, ScalarError> {
        self.codec.unmarshal(scalar, wire)
    }

    /// Whether values of this scalar must go through the codec at runtime.
    pub fn needs_conversion(&self) -> bool {
        !self.codec.is_identity()
    }
}

#[derive(Debug)]
struct Passthrough;

impl ScalarCodec for Passthrough {
    fn marshal(&self, scalar: &str, value: &RuntimeValue) -> Result<Value, ScalarError> {
        match value {
            RuntimeValue::Json(value) => Ok(value.clone()),
            other => Err(ScalarError::UnexpectedRuntime {
                scalar: scalar.to_string(),
                found: other.to_string(),
            }),
        }
    }

    fn unmarshal(&self, _scalar: &str, wire: &Value) -> Result<RuntimeValue, ScalarError> {
        Ok(RuntimeValue::Json(wire.clone()))
    }

    fn is_identity(&self) -> bool {
        true
    }
}

/// Identity codec that rejects values outside a built-in scalar's wire shape.
#[derive(Debug)]
struct Checked(WireType);

impl Checked {
    fn accepts(&self, value: &Value) -> bool {
        match self.0 {
            WireType::Any => true,
            WireType::Boolean => value.is_boolean(),
            WireType::Int => value.is_i64() || value.is_u64(),
            WireType::Float => value.is_number(),
            WireType::String => value.is_string(),
        }
    }

    fn expected(&self) -> &'static str {
        match self.0 {
            WireType::Any => "any value",
            WireType::Boolean => "a boolean",
            WireType::Int => "an integer",
            WireType::Float => "a number",
            WireType::String => "a string",
        }
    }
}

impl ScalarCodec for Checked {
    fn marshal(&self, scalar: &str, value: &RuntimeValue) -> Result<Value, ScalarError> {
        match value {
            RuntimeValue::Json(json) if self.accepts(json) => Ok(json.clone()),
            other => Err(ScalarError::UnexpectedRuntime {
                scalar: scalar.to_string(),
                found: other.to_string(),
            }),
        }
    }

    fn unmarshal(&self, scalar: &str, wire: &Value) -> Result<RuntimeValue, ScalarError> {
        if !self.accepts(wire) {
            return Err(ScalarError::UnexpectedWire {
                scalar: scalar.to_string(),
                expected: self.expected(),
                found: wire.to_string(),
            });
        }
        Ok(RuntimeValue::Json(wire.clone()))
    }

    fn is_identity(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct EpochMillis;

impl ScalarCodec for EpochMillis {
    fn marshal(&self, scalar: &str, value: &RuntimeValue) -> Result<Value, ScalarError> {
        match value {
            RuntimeValue::Timestamp(ts) => Ok(Value::from(ts.timestamp_millis())),
            other => Err(ScalarError::UnexpectedRuntime {
                scalar: scalar.to_string(),
                found: other.to_string(),
            }),
        }
    }

    fn unmarshal(&self, scalar: &str, wire: &Value) -> Result<RuntimeValue, ScalarError> {
        let millis = wire.as_i64().ok_or_else(|| ScalarError::UnexpectedWire {
            scalar: scalar.to_string(),
            expected: "an integer of epoch milliseconds",
            found: wire.to_string(),
        })?;
        let ts = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| ScalarError::OutOfRange {
                scalar: scalar.to_string(),
                message: format!("{millis} is outside the representable range"),
            })?;
        Ok(RuntimeValue::Timestamp(ts))
    }
}

/// UTC timestamps written with a `Z` suffix and the shortest of 0, 3, 6 or 9
/// fraction digits. Any other spelling of the same instant is rejected so
/// that wire values survive a round trip unchanged.
#[derive(Debug)]
struct Rfc3339;

fn canonical_rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl ScalarCodec for Rfc3339 {
    fn marshal(&self, scalar: &str, value: &RuntimeValue) -> Result<Value, ScalarError> {
        match value {
            RuntimeValue::Timestamp(ts) => Ok(Value::from(canonical_rfc3339(ts))),
            other => Err(ScalarError::UnexpectedRuntime {
                scalar: scalar.to_string(),
                found: other.to_string(),
            }),
        }
    }

    fn unmarshal(&self, scalar: &str, wire: &Value) -> Result<RuntimeValue, ScalarError> {
        let text = wire.as_str().ok_or_else(|| ScalarError::UnexpectedWire {
            scalar: scalar.to_string(),
            expected: "an RFC 3339 string",
            found: wire.to_string(),
        })?;
        let ts = DateTime::parse_from_rfc3339(text).map_err(|err| ScalarError::OutOfRange {
            scalar: scalar.to_string(),
            message: err.to_string(),
        })?;
        let ts = ts.with_timezone(&Utc);
        let canonical = canonical_rfc3339(&ts);
        if canonical != text {
            return Err(ScalarError::NotCanonical {
                scalar: scalar.to_string(),
                found: text.to_string(),
                canonical,
            });
        }
        Ok(RuntimeValue::Timestamp(ts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn epoch_millis_round_trips_wire_value() {
        let spec = ScalarSpec::epoch_millis();
        let wire = json!(1700000000000_i64);
        let runtime = spec.unmarshal("DateTime", &wire).expect("unmarshal");
        assert_eq!(spec.marshal("DateTime", &runtime).expect("marshal"), wire);
    }

    #[test]
    fn epoch_millis_rejects_strings() {
        let spec = ScalarSpec::epoch_millis();
        let err = spec.unmarshal("DateTime", &json!("yesterday")).unwrap_err();
        assert!(matches!(err, ScalarError::UnexpectedWire { .. }));
    }

    #[test]
    fn rfc3339_accepts_only_the_canonical_spelling() {
        let spec = ScalarSpec::rfc3339();
        let wire = json!("2024-01-01T00:00:00Z");
        let runtime = spec.unmarshal("DateTime", &wire).expect("unmarshal");
        assert_eq!(spec.marshal("DateTime", &runtime).expect("marshal"), wire);

        let err = spec
            .unmarshal("DateTime", &json!("2024-01-01T00:00:00.000Z"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "DateTime: \"2024-01-01T00:00:00.000Z\" is not canonical, expected \"2024-01-01T00:00:00Z\""
        );
        let err = spec
            .unmarshal("DateTime", &json!("2024-01-01T02:00:00+02:00"))
            .unwrap_err();
        assert!(matches!(err, ScalarError::NotCanonical { ref canonical, .. } if canonical == "2024-01-01T00:00:00Z"));
    }

    #[test]
    fn builtin_int_rejects_floats() {
        let spec = ScalarSpec::builtin("Int").expect("builtin");
        assert!(spec.unmarshal("Int", &json!(1.5)).is_err());
        assert!(!spec.needs_conversion());
    }

    #[test]
    fn custom_codecs_need_conversion() {
        assert!(ScalarSpec::epoch_millis().needs_conversion());
        assert!(!ScalarSpec::passthrough("File").needs_conversion());
    }

    proptest! {
        #[test]
        fn epoch_millis_is_an_inverse_pair(millis in -8_000_000_000_000_i64..8_000_000_000_000_i64) {
            let spec = ScalarSpec::epoch_millis();
            let wire = json!(millis);
            let runtime = spec.unmarshal("DateTime", &wire).unwrap();
            prop_assert_eq!(spec.marshal("DateTime", &runtime).unwrap(), wire);
            let again = spec.unmarshal("DateTime", &spec.marshal("DateTime", &runtime).unwrap()).unwrap();
            prop_assert_eq!(again, runtime);
        }

        #[test]
        fn rfc3339_is_an_inverse_pair(millis in 0_i64..4_000_000_000_000_i64) {
            let spec = ScalarSpec::rfc3339();
            let ts = Utc.timestamp_millis_opt(millis).single().unwrap();
            let runtime = RuntimeValue::Timestamp(ts);
            let wire = spec.marshal("DateTime", &runtime).unwrap();
            prop_assert_eq!(spec.unmarshal("DateTime", &wire).unwrap(), runtime);
        }

        #[test]
        fn rfc3339_accepted_wire_text_is_reproduced(
            wire in "20[0-9]{2}-0[1-9]-1[0-9]T[01][0-9]:[0-5][0-9]:[0-5][0-9](\\.[0-9]{1,9})?(Z|[+-]0[0-9]:[03]0)"
        ) {
            let spec = ScalarSpec::rfc3339();
            if let Ok(runtime) = spec.unmarshal("DateTime", &json!(wire.clone())) {
                prop_assert_eq!(spec.marshal("DateTime", &runtime).unwrap(), json!(wire));
            }
        }

        #[test]
        fn passthrough_preserves_json(n in any::<i64>(), s in ".*") {
            let spec = ScalarSpec::passthrough("JSON");
            let wire = json!({ "n": n, "s": s });
            let runtime = spec.unmarshal("JSON", &wire).unwrap();
            prop_assert_eq!(spec.marshal("JSON", &runtime).unwrap(), wire);
        }
    }
}
