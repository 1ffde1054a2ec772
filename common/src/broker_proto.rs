//! The wire contract between the daemon and an authentication broker.
//!
//! A broker exposes six methods under its configured interface namespace.
//! Every call is a single [`BrokerRequest`] frame answered by a single
//! [`BrokerReply`] frame. Values crossing this boundary are restricted to
//! scalar strings, string-to-string mappings, and ordered sequences of
//! such mappings; anything else is rejected at decode time.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// A UI layout or authentication mode descriptor: an ordered mapping of
/// field name to value. Brokers define the keys; the daemon does not
/// interpret them beyond relaying.
pub type FieldMap = BTreeMap<String, String>;

pub const METHOD_NEW_SESSION: &str = "NewSession";
pub const METHOD_GET_AUTHENTICATION_MODES: &str = "GetAuthenticationModes";
pub const METHOD_SELECT_AUTHENTICATION_MODE: &str = "SelectAuthenticationMode";
pub const METHOD_IS_AUTHORIZED: &str = "IsAuthorized";
pub const METHOD_CANCEL_IS_AUTHORIZED: &str = "CancelIsAuthorized";
pub const METHOD_END_SESSION: &str = "EndSession";

pub const ACCESS_GRANTED: &str = "granted";
pub const ACCESS_DENIED: &str = "denied";
pub const ACCESS_RETRY: &str = "retry";
pub const ACCESS_CANCELLED: &str = "cancelled";

/// One argument or return value of a broker method.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum WireValue {
    Text(String),
    Dict(FieldMap),
    DictList(Vec<FieldMap>),
}

/// A single method invocation against a broker object.
///
/// `method` is always `<interfaceNamespace>.<MethodName>`.
#[derive(Serialize, Deserialize, Debug)]
pub struct BrokerRequest {
    pub object: String,
    pub method: String,
    pub args: Vec<WireValue>,
}

#[derive(Serialize, Deserialize, Debug)]
pub enum BrokerReply {
    Values(Vec<WireValue>),
    Fault(String),
}

/// The broker's authorization outcome for an `IsAuthorized` call.
///
/// Brokers are free to return codes beyond the well-known set; those are
/// preserved verbatim so the caller can decide how much to surface.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessVerdict {
    Granted,
    Denied,
    Retry,
    Cancelled,
    Other(String),
}

impl AccessVerdict {
    pub fn from_wire(access: &str) -> Self {
        match access {
            ACCESS_GRANTED => AccessVerdict::Granted,
            ACCESS_DENIED => AccessVerdict::Denied,
            ACCESS_RETRY => AccessVerdict::Retry,
            ACCESS_CANCELLED => AccessVerdict::Cancelled,
            other => AccessVerdict::Other(other.to_string()),
        }
    }
}

impl Display for AccessVerdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessVerdict::Granted => f.write_str(ACCESS_GRANTED),
            AccessVerdict::Denied => f.write_str(ACCESS_DENIED),
            AccessVerdict::Retry => f.write_str(ACCESS_RETRY),
            AccessVerdict::Cancelled => f.write_str(ACCESS_CANCELLED),
            AccessVerdict::Other(code) => f.write_str(code),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;

    #[test]
    fn test_wirevalue_shapes() {
        let text: WireValue =
            serde_json::from_str("\"hello\"").expect("failed to decode string");
        assert_eq!(text, WireValue::Text("hello".to_string()));

        let dict: WireValue =
            serde_json::from_str(r#"{"type":"entry"}"#).expect("failed to decode map");
        let mut expected = FieldMap::new();
        expected.insert("type".to_string(), "entry".to_string());
        assert_eq!(dict, WireValue::Dict(expected.clone()));

        let list: WireValue =
            serde_json::from_str(r#"[{"type":"entry"}]"#).expect("failed to decode map list");
        assert_eq!(list, WireValue::DictList(vec![expected]));

        // Any other shape must not decode.
        assert!(serde_json::from_str::<WireValue>("42").is_err());
        assert!(serde_json::from_str::<WireValue>(r#"{"a":1}"#).is_err());
        assert!(serde_json::from_str::<WireValue>(r#"["a","b"]"#).is_err());
    }

    #[test]
    fn test_access_verdict_from_wire() {
        assert_eq!(AccessVerdict::from_wire("granted"), AccessVerdict::Granted);
        assert_eq!(AccessVerdict::from_wire("denied"), AccessVerdict::Denied);
        assert_eq!(AccessVerdict::from_wire("retry"), AccessVerdict::Retry);
        assert_eq!(
            AccessVerdict::from_wire("cancelled"),
            AccessVerdict::Cancelled
        );
        assert_eq!(
            AccessVerdict::from_wire("pam_error"),
            AccessVerdict::Other("pam_error".to_string())
        );
    }

    #[test]
    fn test_broker_request_roundtrip() {
        let req = BrokerRequest {
            object: "/com/example/broker".to_string(),
            method: "com.example.Broker.NewSession".to_string(),
            args: vec![
                WireValue::Text("alice".to_string()),
                WireValue::Text("en_US".to_string()),
            ],
        };
        let data = serde_json::to_vec(&req).expect("failed to encode request");
        let back: BrokerRequest =
            serde_json::from_slice(&data).expect("failed to decode request");
        assert_eq!(back.method, req.method);
        assert_eq!(back.args, req.args);
    }
}
