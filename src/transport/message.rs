//! WAMP message types and wire codec.
//!
//! The wire form is the WAMP basic-profile JSON array `[code, ...]`. Each
//! message kind is a struct; `Message` is the tagged union over all of them,
//! decoded by matching the leading integer code. `BroadcastMessage` is not a
//! WAMP wire message: it is the internal envelope this node exchanges with
//! other broker nodes through the external pub/sub datastore.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};
use thiserror::Error;

pub const HELLO: u64 = 1;
pub const WELCOME: u64 = 2;
pub const ABORT: u64 = 3;
pub const ERROR: u64 = 8;
pub const PUBLISH: u64 = 16;
pub const PUBLISHED: u64 = 17;
pub const SUBSCRIBE: u64 = 32;
pub const SUBSCRIBED: u64 = 33;
pub const UNSUBSCRIBE: u64 = 34;
pub const UNSUBSCRIBED: u64 = 35;
pub const EVENT: u64 = 36;
pub const CALL: u64 = 48;
pub const RESULT: u64 = 50;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unknown message code: {0}")]
    UnknownCode(u64),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HelloMessage {
    pub realm: String,
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WelcomeMessage {
    pub session_id: u64,
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AbortMessage {
    pub details: Value,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    /// Code of the request message this error answers.
    pub request_code: u64,
    pub request_id: u64,
    pub details: Value,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishMessage {
    pub request_id: u64,
    pub options: Value,
    pub topic_name: String,
    pub args: Vec<Value>,
    pub kwargs: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub request_id: u64,
    pub publication_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeMessage {
    pub request_id: u64,
    pub options: Value,
    pub topic_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscribedMessage {
    pub request_id: u64,
    pub subscription_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnsubscribeMessage {
    pub request_id: u64,
    pub subscription_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnsubscribedMessage {
    pub request_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    pub subscription_id: u64,
    pub publication_id: u64,
    pub details: Value,
    pub args: Vec<Value>,
    pub kwargs: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallMessage {
    pub request_id: u64,
    pub options: Value,
    pub procedure: String,
    pub args: Vec<Value>,
    pub kwargs: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultMessage {
    pub request_id: u64,
    pub details: Value,
    pub args: Vec<Value>,
    pub kwargs: Value,
}

impl EventMessage {
    pub fn to_value(&self) -> Value {
        json!([
            EVENT,
            self.subscription_id,
            self.publication_id,
            self.details,
            self.args,
            self.kwargs
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self, MessageError> {
        let arr = as_array(value)?;
        expect_code(arr, EVENT)?;
        Ok(EventMessage {
            subscription_id: field_u64(arr, 1)?,
            publication_id: field_u64(arr, 2)?,
            details: field_dict(arr, 3),
            args: field_list(arr, 4),
            kwargs: field_dict(arr, 5),
        })
    }
}

// EVENT messages travel inside the cross-node envelope; keep the nested
// representation identical to the WebSocket wire form.
impl Serialize for EventMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EventMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        EventMessage::from_value(&value).map_err(DeError::custom)
    }
}

/// Cross-node broadcast envelope.
///
/// `origin_connection_id` keys local echo suppression at publish time;
/// `origin_node_id` keys cross-node echo suppression in the receive loop.
/// Together they form the sender identity of a publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub topic_name: String,
    pub event: EventMessage,
    pub origin_connection_id: Option<String>,
    pub origin_node_id: String,
}

impl BroadcastMessage {
    pub fn json(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> Result<Self, MessageError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello(HelloMessage),
    Welcome(WelcomeMessage),
    Abort(AbortMessage),
    Error(ErrorMessage),
    Publish(PublishMessage),
    Published(PublishedMessage),
    Subscribe(SubscribeMessage),
    Subscribed(SubscribedMessage),
    Unsubscribe(UnsubscribeMessage),
    Unsubscribed(UnsubscribedMessage),
    Event(EventMessage),
    Call(CallMessage),
    Result(ResultMessage),
}

impl Message {
    pub fn code(&self) -> u64 {
        match self {
            Message::Hello(_) => HELLO,
            Message::Welcome(_) => WELCOME,
            Message::Abort(_) => ABORT,
            Message::Error(_) => ERROR,
            Message::Publish(_) => PUBLISH,
            Message::Published(_) => PUBLISHED,
            Message::Subscribe(_) => SUBSCRIBE,
            Message::Subscribed(_) => SUBSCRIBED,
            Message::Unsubscribe(_) => UNSUBSCRIBE,
            Message::Unsubscribed(_) => UNSUBSCRIBED,
            Message::Event(_) => EVENT,
            Message::Call(_) => CALL,
            Message::Result(_) => RESULT,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Message::Hello(m) => json!([HELLO, m.realm, m.details]),
            Message::Welcome(m) => json!([WELCOME, m.session_id, m.details]),
            Message::Abort(m) => json!([ABORT, m.details, m.reason]),
            Message::Error(m) => json!([ERROR, m.request_code, m.request_id, m.details, m.uri]),
            Message::Publish(m) => {
                json!([PUBLISH, m.request_id, m.options, m.topic_name, m.args, m.kwargs])
            }
            Message::Published(m) => json!([PUBLISHED, m.request_id, m.publication_id]),
            Message::Subscribe(m) => json!([SUBSCRIBE, m.request_id, m.options, m.topic_name]),
            Message::Subscribed(m) => json!([SUBSCRIBED, m.request_id, m.subscription_id]),
            Message::Unsubscribe(m) => json!([UNSUBSCRIBE, m.request_id, m.subscription_id]),
            Message::Unsubscribed(m) => json!([UNSUBSCRIBED, m.request_id]),
            Message::Event(m) => m.to_value(),
            Message::Call(m) => {
                json!([CALL, m.request_id, m.options, m.procedure, m.args, m.kwargs])
            }
            Message::Result(m) => json!([RESULT, m.request_id, m.details, m.args, m.kwargs]),
        }
    }

    pub fn json(&self) -> String {
        self.to_value().to_string()
    }

    /// Decode a wire message, dispatching on the leading code.
    pub fn from_text(text: &str) -> Result<Self, MessageError> {
        let value: Value = serde_json::from_str(text)?;
        let arr = as_array(&value)?;
        let code = field_u64(arr, 0)?;
        let msg = match code {
            HELLO => Message::Hello(HelloMessage {
                realm: field_str(arr, 1)?,
                details: field_dict(arr, 2),
            }),
            WELCOME => Message::Welcome(WelcomeMessage {
                session_id: field_u64(arr, 1)?,
                details: field_dict(arr, 2),
            }),
            ABORT => Message::Abort(AbortMessage {
                details: field_dict(arr, 1),
                reason: field_str(arr, 2)?,
            }),
            ERROR => Message::Error(ErrorMessage {
                request_code: field_u64(arr, 1)?,
                request_id: field_u64(arr, 2)?,
                details: field_dict(arr, 3),
                uri: field_str(arr, 4)?,
            }),
            PUBLISH => Message::Publish(PublishMessage {
                request_id: field_u64(arr, 1)?,
                options: field_dict(arr, 2),
                topic_name: field_str(arr, 3)?,
                args: field_list(arr, 4),
                kwargs: field_dict(arr, 5),
            }),
            PUBLISHED => Message::Published(PublishedMessage {
                request_id: field_u64(arr, 1)?,
                publication_id: field_u64(arr, 2)?,
            }),
            SUBSCRIBE => Message::Subscribe(SubscribeMessage {
                request_id: field_u64(arr, 1)?,
                options: field_dict(arr, 2),
                topic_name: field_str(arr, 3)?,
            }),
            SUBSCRIBED => Message::Subscribed(SubscribedMessage {
                request_id: field_u64(arr, 1)?,
                subscription_id: field_u64(arr, 2)?,
            }),
            UNSUBSCRIBE => Message::Unsubscribe(UnsubscribeMessage {
                request_id: field_u64(arr, 1)?,
                subscription_id: field_u64(arr, 2)?,
            }),
            UNSUBSCRIBED => Message::Unsubscribed(UnsubscribedMessage {
                request_id: field_u64(arr, 1)?,
            }),
            EVENT => Message::Event(EventMessage::from_value(&value)?),
            CALL => Message::Call(CallMessage {
                request_id: field_u64(arr, 1)?,
                options: field_dict(arr, 2),
                procedure: field_str(arr, 3)?,
                args: field_list(arr, 4),
                kwargs: field_dict(arr, 5),
            }),
            RESULT => Message::Result(ResultMessage {
                request_id: field_u64(arr, 1)?,
                details: field_dict(arr, 2),
                args: field_list(arr, 3),
                kwargs: field_dict(arr, 4),
            }),
            other => return Err(MessageError::UnknownCode(other)),
        };
        Ok(msg)
    }
}

fn as_array(value: &Value) -> Result<&Vec<Value>, MessageError> {
    value
        .as_array()
        .ok_or_else(|| MessageError::Malformed("message is not a json array".into()))
}

fn expect_code(arr: &[Value], code: u64) -> Result<(), MessageError> {
    let found = field_u64(arr, 0)?;
    if found != code {
        return Err(MessageError::Malformed(format!(
            "expected code {code}, found {found}"
        )));
    }
    Ok(())
}

fn field_u64(arr: &[Value], idx: usize) -> Result<u64, MessageError> {
    arr.get(idx)
        .and_then(Value::as_u64)
        .ok_or_else(|| MessageError::Malformed(format!("field {idx} is not an integer")))
}

fn field_str(arr: &[Value], idx: usize) -> Result<String, MessageError> {
    arr.get(idx)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| MessageError::Malformed(format!("field {idx} is not a string")))
}

fn field_dict(arr: &[Value], idx: usize) -> Value {
    match arr.get(idx) {
        Some(v) if v.is_object() => v.clone(),
        _ => json!({}),
    }
}

fn field_list(arr: &[Value], idx: usize) -> Vec<Value> {
    match arr.get(idx) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}
