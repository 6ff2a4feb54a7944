//! Message envelopes: the fixed set of shapes that travel on the wire.
//!
//! Every envelope is a map-encoded record. Field names are short (`ts`,
//! `etype`, `rtype`, ...) and optional fields are left out entirely when
//! absent, so peers in other languages can add or drop fields without
//! breaking each other.
//!
//! | Shape           | Payload field | Used for                              |
//! |-----------------|---------------|---------------------------------------|
//! | [`Message`]     | any           | generic envelope, keeps unknown fields |
//! | [`ClientEvent`] | `value`       | client → server events                |
//! | [`ServerEvent`] | `data`        | server → client events                |
//! | [`RpcRequest`]  | `args/kwargs` | calls; `rtype` is the correlation id  |
//! | [`RpcResponse`] | `data/value`  | answers; `etype` echoes the `rtype`   |
//!
//! The payload fields hold [`Value`] trees. Application values inside them
//! (`Value::Native`) are swapped for their envelopes by the tree codec
//! before packing; see [`WireMessage`].

use std::fmt;

use serde::de::{DeserializeOwned, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::value::{Map, key_to_string};
use crate::{ProtocolError, Value};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// The current time as a [`Timestamp`].
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// WireMessage
// ---------------------------------------------------------------------------

/// Mutable views of the parts of a message the tree codec rewrites.
///
/// Sequences and mappings are listed separately from single values so that
/// each argument is treated as a top-level value in its own right, and so
/// an argument list is never mistaken for one application value.
#[derive(Default)]
pub struct PayloadsMut<'a> {
    pub values: Vec<&'a mut Value>,
    pub sequences: Vec<&'a mut Vec<Value>>,
    pub mappings: Vec<&'a mut Map>,
}

/// A message shape that can go through the wire codec.
pub trait WireMessage: Serialize + DeserializeOwned + Clone {
    /// The event type (or, for responses, the correlation id).
    fn etype(&self) -> &str;

    /// Exposes the payload slots for encoding and decoding.
    fn payloads_mut(&mut self) -> PayloadsMut<'_>;

    /// Checks the structural rules for this shape.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidMessage`] naming the broken rule.
    fn validate(&self) -> Result<(), ProtocolError>;
}

fn require_etype(etype: &str) -> Result<(), ProtocolError> {
    if etype.is_empty() {
        return Err(ProtocolError::InvalidMessage("etype must not be empty".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// The generic envelope. Carries every documented field, plus whatever
/// else the sender put in the record (kept in [`extra`](Self::extra) and
/// written back out unchanged).
///
/// `Deserialize` is implemented by hand: unknown fields are read straight
/// from the underlying format, so a byte string or a plain map in `extra`
/// arrives exactly as a peer packed it.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Message {
    pub ts: Timestamp,

    /// Event type, e.g. `"CAMERA:main:MOVE"`.
    pub etype: String,

    /// Correlation id when this message is a request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtype: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kwargs: Option<Map>,

    /// Server payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Client payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Entity the event refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(flatten)]
    pub extra: Map,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(etype: impl Into<String>) -> Self {
        Self {
            ts: now_millis(),
            etype: etype.into(),
            ..Self::default()
        }
    }

    pub fn with_ts(mut self, ts: Timestamp) -> Self {
        self.ts = ts;
        self
    }

    pub fn with_rtype(mut self, rtype: impl Into<String>) -> Self {
        self.rtype = Some(rtype.into());
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map) -> Self {
        self.kwargs = Some(kwargs);
        self
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Adds an application field outside the documented set.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Looks up a keyword argument.
    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.as_ref().and_then(|kwargs| kwargs.get(name))
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(MessageVisitor)
    }
}

struct MessageVisitor;

impl<'de> Visitor<'de> for MessageVisitor {
    type Value = Message;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map-encoded message record")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Message, A::Error> {
        let mut message = Message::default();

        // A nil in a documented slot reads as absent. A repeated key keeps
        // its last value.
        while let Some(key) = access.next_key::<Value>()? {
            let key = key_to_string(key);
            match key.as_str() {
                "ts" => {
                    message.ts = access.next_value::<Option<Timestamp>>()?.unwrap_or_default();
                }
                "etype" => {
                    message.etype = access.next_value::<Option<String>>()?.unwrap_or_default();
                }
                "rtype" => message.rtype = access.next_value()?,
                "args" => message.args = access.next_value()?,
                "kwargs" => message.kwargs = access.next_value()?,
                "data" => message.data = access.next_value()?,
                "value" => message.value = access.next_value()?,
                "key" => message.key = access.next_value()?,
                "uuid" => message.uuid = access.next_value()?,
                _ => {
                    let value = access.next_value::<Value>()?;
                    message.extra.insert(key, value);
                }
            }
        }
        Ok(message)
    }
}

impl WireMessage for Message {
    fn etype(&self) -> &str {
        &self.etype
    }

    fn payloads_mut(&mut self) -> PayloadsMut<'_> {
        let mut payloads = PayloadsMut::default();
        payloads.values.extend(self.data.as_mut());
        payloads.values.extend(self.value.as_mut());
        payloads.sequences.extend(self.args.as_mut());
        payloads.mappings.extend(self.kwargs.as_mut());
        payloads.mappings.push(&mut self.extra);
        payloads
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        require_etype(&self.etype)?;
        let is_call = self.args.is_some() || self.kwargs.is_some();
        if is_call && self.rtype.as_deref().is_none_or(str::is_empty) {
            return Err(ProtocolError::InvalidMessage(
                "a message with args or kwargs must carry an rtype".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ClientEvent / ServerEvent
// ---------------------------------------------------------------------------

/// An event sent by a client. The payload lives in `value`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientEvent {
    pub ts: Timestamp,
    pub etype: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtype: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    pub value: Value,
}

impl ClientEvent {
    pub fn new(etype: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            ts: now_millis(),
            etype: etype.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn with_rtype(mut self, rtype: impl Into<String>) -> Self {
        self.rtype = Some(rtype.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl WireMessage for ClientEvent {
    fn etype(&self) -> &str {
        &self.etype
    }

    fn payloads_mut(&mut self) -> PayloadsMut<'_> {
        PayloadsMut {
            values: vec![&mut self.value],
            ..PayloadsMut::default()
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        require_etype(&self.etype)
    }
}

/// An event sent by the server. The payload lives in `data`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEvent {
    pub ts: Timestamp,
    pub etype: String,
    pub data: Value,
}

impl ServerEvent {
    pub fn new(etype: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            ts: now_millis(),
            etype: etype.into(),
            data: data.into(),
        }
    }
}

impl WireMessage for ServerEvent {
    fn etype(&self) -> &str {
        &self.etype
    }

    fn payloads_mut(&mut self) -> PayloadsMut<'_> {
        PayloadsMut {
            values: vec![&mut self.data],
            ..PayloadsMut::default()
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        require_etype(&self.etype)
    }
}

// ---------------------------------------------------------------------------
// RpcRequest / RpcResponse
// ---------------------------------------------------------------------------

/// A call. `etype` names the method; `rtype` is the correlation id the
/// answer will carry as its `etype`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcRequest {
    pub ts: Timestamp,
    pub etype: String,
    pub rtype: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kwargs: Option<Map>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl RpcRequest {
    pub fn new(etype: impl Into<String>, rtype: impl Into<String>) -> Self {
        Self {
            ts: now_millis(),
            etype: etype.into(),
            rtype: rtype.into(),
            ..Self::default()
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map) -> Self {
        self.kwargs = Some(kwargs);
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }
}

impl WireMessage for RpcRequest {
    fn etype(&self) -> &str {
        &self.etype
    }

    fn payloads_mut(&mut self) -> PayloadsMut<'_> {
        let mut payloads = PayloadsMut::default();
        payloads.sequences.extend(self.args.as_mut());
        payloads.mappings.extend(self.kwargs.as_mut());
        payloads
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        require_etype(&self.etype)?;
        if self.rtype.is_empty() {
            return Err(ProtocolError::InvalidMessage(
                "an rpc request must carry a non-empty rtype".into(),
            ));
        }
        Ok(())
    }
}

impl TryFrom<Message> for RpcRequest {
    type Error = ProtocolError;

    fn try_from(message: Message) -> Result<Self, Self::Error> {
        let rtype = message
            .rtype
            .filter(|rtype| !rtype.is_empty())
            .ok_or_else(|| {
                ProtocolError::InvalidMessage(format!("{} has no rtype", message.etype))
            })?;
        Ok(Self {
            ts: message.ts,
            etype: message.etype,
            rtype,
            args: message.args,
            kwargs: message.kwargs,
            uuid: message.uuid,
        })
    }
}

impl From<RpcRequest> for Message {
    fn from(request: RpcRequest) -> Self {
        Self {
            ts: request.ts,
            etype: request.etype,
            rtype: Some(request.rtype),
            args: request.args,
            kwargs: request.kwargs,
            uuid: request.uuid,
            ..Self::default()
        }
    }
}

/// The answer to an [`RpcRequest`]. Its `etype` is the request's `rtype`;
/// that equality is the whole correlation mechanism.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcResponse {
    pub ts: Timestamp,
    pub etype: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    /// A successful answer carrying `data`.
    pub fn success(etype: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            ts: now_millis(),
            etype: etype.into(),
            data: Some(data.into()),
            ok: Some(true),
            ..Self::default()
        }
    }

    /// A failed answer carrying an error string.
    pub fn failure(etype: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            ts: now_millis(),
            etype: etype.into(),
            ok: Some(false),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Builds a success or failure from a handler's result.
    pub fn from_result<E: std::fmt::Display>(
        etype: impl Into<String>,
        result: Result<Value, E>,
    ) -> Self {
        match result {
            Ok(data) => Self::success(etype, data),
            Err(err) => Self::failure(etype, err.to_string()),
        }
    }

    /// The error this response reports, if any.
    ///
    /// An `error` string always counts. `ok: false` without a string
    /// counts too, with a generic message.
    pub fn error_message(&self) -> Option<String> {
        match (&self.error, self.ok) {
            (Some(error), _) => Some(error.clone()),
            (None, Some(false)) => Some("request failed".to_owned()),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_message().is_some()
    }
}

impl WireMessage for RpcResponse {
    fn etype(&self) -> &str {
        &self.etype
    }

    fn payloads_mut(&mut self) -> PayloadsMut<'_> {
        let mut payloads = PayloadsMut::default();
        payloads.values.extend(self.data.as_mut());
        payloads.values.extend(self.value.as_mut());
        payloads
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        require_etype(&self.etype)
    }
}

impl TryFrom<Message> for RpcResponse {
    type Error = ProtocolError;

    /// Reads `ok` and `error` from the message's extra fields.
    fn try_from(message: Message) -> Result<Self, Self::Error> {
        require_etype(&message.etype)?;
        let ok = match message.extra.get("ok") {
            None | Some(Value::Nil) => None,
            Some(Value::Bool(ok)) => Some(*ok),
            Some(other) => {
                return Err(ProtocolError::InvalidMessage(format!(
                    "ok must be a bool, got {}",
                    other.kind()
                )));
            }
        };
        let error = match message.extra.get("error") {
            None | Some(Value::Nil) => None,
            Some(Value::String(error)) => Some(error.clone()),
            Some(other) => Some(format!("{other:?}")),
        };
        Ok(Self {
            ts: message.ts,
            etype: message.etype,
            data: message.data,
            value: message.value,
            ok,
            error,
        })
    }
}

impl From<RpcResponse> for Message {
    fn from(response: RpcResponse) -> Self {
        let mut message = Self {
            ts: response.ts,
            etype: response.etype,
            data: response.data,
            value: response.value,
            ..Self::default()
        };
        if let Some(ok) = response.ok {
            message.extra.insert("ok".into(), Value::Bool(ok));
        }
        if let Some(error) = response.error {
            message.extra.insert("error".into(), Value::String(error));
        }
        message
    }
}
