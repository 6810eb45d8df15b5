//! JSON request/response protocol.
//!
//! Wire format (text frames):
//! ```text
//! client → server   { "method": "sendMessage", "seq": 7, "data": { .. } }
//! server → client   { "event": "response", "seq": 7, "err": null, "data": { .. } }
//! server → client   { "event": "bucket.shift" | "bucket.link" | "replicable.mutation", "data": { .. } }
//! ```
//!
//! `seq` is chosen by the client and echoed back unchanged.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use waffletalk_core::Snowflake;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub data: Value,
}

impl Request {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub event: &'static str,
    pub seq: u64,
    pub err: Option<String>,
    pub data: Value,
}

impl Response {
    pub fn ok(seq: u64, data: Value) -> Self {
        Self {
            event: "response",
            seq,
            err: None,
            data,
        }
    }

    pub fn err(seq: u64, err: impl ToString) -> Self {
        Self {
            event: "response",
            seq,
            err: Some(err.to_string()),
            data: Value::Null,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Login {
    pub username: String,
    pub clienthash: String,
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Ping,
    Register(Login),
    Authenticate(Login),
    CreateGuild {
        name: String,
    },
    JoinGuild {
        guild: Snowflake,
    },
    SubscribeGuild {
        guild: Snowflake,
    },
    SubscribeChannel {
        channel: Snowflake,
    },
    CreateChannel {
        guild: Snowflake,
        name: String,
        position: f64,
        topic: Option<String>,
    },
    SendMessage {
        channel: Snowflake,
        content: String,
    },
    EditMessage {
        message: Snowflake,
        content: String,
    },
    DeleteMessage {
        message: Snowflake,
    },
    SetDisplayName {
        guild: Snowflake,
        display_name: String,
    },
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

#[derive(Deserialize)]
struct GuildArg {
    guild: Snowflake,
}

#[derive(Deserialize)]
struct ChannelArg {
    channel: Snowflake,
}

#[derive(Deserialize)]
struct NewChannel {
    guild: Snowflake,
    name: String,
    #[serde(default)]
    position: f64,
    #[serde(default)]
    topic: Option<String>,
}

#[derive(Deserialize)]
struct NewMessage {
    channel: Snowflake,
    content: String,
}

#[derive(Deserialize)]
struct MessageEdit {
    message: Snowflake,
    content: String,
}

#[derive(Deserialize)]
struct MessageArg {
    message: Snowflake,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisplayName {
    guild: Snowflake,
    display_name: String,
}

fn args<T: DeserializeOwned>(data: Value) -> Result<T, ProtocolError> {
    Ok(serde_json::from_value(data)?)
}

impl Call {
    pub fn parse(request: Request) -> Result<Self, ProtocolError> {
        let data = request.data;
        let call = match request.method.as_str() {
            "ping" => Call::Ping,
            "register" => Call::Register(args(data)?),
            "authenticate" => Call::Authenticate(args(data)?),
            "createGuild" => {
                let Named { name } = args(data)?;
                Call::CreateGuild { name }
            }
            "joinGuild" => {
                let GuildArg { guild } = args(data)?;
                Call::JoinGuild { guild }
            }
            "subscribeGuild" => {
                let GuildArg { guild } = args(data)?;
                Call::SubscribeGuild { guild }
            }
            "subscribeChannel" => {
                let ChannelArg { channel } = args(data)?;
                Call::SubscribeChannel { channel }
            }
            "createChannel" => {
                let c: NewChannel = args(data)?;
                Call::CreateChannel {
                    guild: c.guild,
                    name: c.name,
                    position: c.position,
                    topic: c.topic,
                }
            }
            "sendMessage" => {
                let NewMessage { channel, content } = args(data)?;
                Call::SendMessage { channel, content }
            }
            "editMessage" => {
                let MessageEdit { message, content } = args(data)?;
                Call::EditMessage { message, content }
            }
            "deleteMessage" => {
                let MessageArg { message } = args(data)?;
                Call::DeleteMessage { message }
            }
            "setDisplayName" => {
                let DisplayName {
                    guild,
                    display_name,
                } = args(data)?;
                Call::SetDisplayName {
                    guild,
                    display_name,
                }
            }
            other => return Err(ProtocolError::UnsupportedMethod(other.to_string())),
        };
        Ok(call)
    }

    pub fn method(&self) -> &'static str {
        match self {
            Call::Ping => "ping",
            Call::Register(_) => "register",
            Call::Authenticate(_) => "authenticate",
            Call::CreateGuild { .. } => "createGuild",
            Call::JoinGuild { .. } => "joinGuild",
            Call::SubscribeGuild { .. } => "subscribeGuild",
            Call::SubscribeChannel { .. } => "subscribeChannel",
            Call::CreateChannel { .. } => "createChannel",
            Call::SendMessage { .. } => "sendMessage",
            Call::EditMessage { .. } => "editMessage",
            Call::DeleteMessage { .. } => "deleteMessage",
            Call::SetDisplayName { .. } => "setDisplayName",
        }
    }

    /// Whether an anonymous connection may make this call.
    pub fn is_public(&self) -> bool {
        matches!(self, Call::Ping | Call::Register(_) | Call::Authenticate(_))
    }
}
