//! Wire model: `{ "type": ..., "text"?: ..., "x"?: ..., "y"?: ... }`.

use serde::{Deserialize, Deserializer, Serialize};

pub const TYPE_CHAT: &str = "message";
pub const TYPE_CURSOR: &str = "user-place";

/// Field-compatible JSON object as it travels over the socket.
///
/// Every field is optional on decode, and `null` reads as the zero value;
/// empty text and zero coordinates are left out on encode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default, deserialize_with = "nullable")]
    pub kind: String,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "is_zero")]
    pub x: i64,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "is_zero")]
    pub y: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

fn nullable<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(d).map(Option::unwrap_or_default)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Chat { text: String },
    CursorMove { x: i64, y: i64 },
}

/// Result of classifying one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Relay(Message),
    Unknown(String),
}

impl From<&Message> for Envelope {
    fn from(msg: &Message) -> Self {
        match msg {
            Message::Chat { text } => Envelope {
                kind: TYPE_CHAT.into(),
                text: text.clone(),
                ..Default::default()
            },
            Message::CursorMove { x, y } => Envelope {
                kind: TYPE_CURSOR.into(),
                x: *x,
                y: *y,
                ..Default::default()
            },
        }
    }
}

impl From<Envelope> for Inbound {
    fn from(env: Envelope) -> Self {
        match env.kind.as_str() {
            TYPE_CHAT => Inbound::Relay(Message::Chat { text: env.text }),
            TYPE_CURSOR => Inbound::Relay(Message::CursorMove { x: env.x, y: env.y }),
            _ => Inbound::Unknown(env.kind),
        }
    }
}

impl Message {
    pub fn chat(text: impl Into<String>) -> Self {
        Message::Chat { text: text.into() }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Envelope::from(self))
    }
}

/// Decodes one text or binary payload. A bare `null` is an empty envelope.
pub fn decode(raw: &[u8]) -> Result<Inbound, serde_json::Error> {
    serde_json::from_slice::<Option<Envelope>>(raw).map(|env| Inbound::from(env.unwrap_or_default()))
}

/// Frame replayed to a newly admitted client; `{"type":""}` until the
/// first chat message arrives.
pub fn state_frame(last: Option<&Message>) -> Result<String, serde_json::Error> {
    let env = last.map(Envelope::from).unwrap_or_default();
    serde_json::to_string(&env)
}
