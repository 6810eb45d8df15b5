//! Domain record kinds, their schemas and the orderings of their collections.
//!
//! | Kind         | Namespace      | Properties                           | Ordered by               |
//! |--------------|----------------|--------------------------------------|--------------------------|
//! | User         | `user`         | username                             | -                        |
//! | Guild        | `guild`        | name                                 | -                        |
//! | GuildChannel | `guildchannel` | name, position, topic, guildId       | (position, name, id)     |
//! | GuildMember  | `guildmember`  | userId, guildId, displayName         | (displayName, id)        |
//! | Message      | `message`      | content, edited, authorId, channelId | (creation time, id)      |

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use waffletalk_core::{Comparator, Primitive, Properties, Replicable, Snowflake};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Guild,
    GuildChannel,
    GuildMember,
    Message,
    User,
}

impl RecordKind {
    /// Every kind, in recovery order: a record only references kinds
    /// listed before it.
    pub const ALL: [RecordKind; 5] = [
        RecordKind::User,
        RecordKind::Guild,
        RecordKind::GuildChannel,
        RecordKind::GuildMember,
        RecordKind::Message,
    ];

    /// Storage namespace (one RocksDB column family per kind).
    pub const fn namespace(self) -> &'static str {
        match self {
            RecordKind::Guild => "guild",
            RecordKind::GuildChannel => "guildchannel",
            RecordKind::GuildMember => "guildmember",
            RecordKind::Message => "message",
            RecordKind::User => "user",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

pub type Record = Replicable<RecordKind>;

fn id_value(id: Snowflake) -> Primitive {
    Primitive::Text(id.to_string())
}

pub fn user(username: &str) -> Properties {
    Properties::from([("username".to_string(), username.into())])
}

pub fn guild(name: &str) -> Properties {
    Properties::from([("name".to_string(), name.into())])
}

pub fn channel(name: &str, position: f64, topic: Option<&str>, guild: Snowflake) -> Properties {
    Properties::from([
        ("name".to_string(), name.into()),
        ("position".to_string(), position.into()),
        ("topic".to_string(), topic.into()),
        ("guildId".to_string(), id_value(guild)),
    ])
}

pub fn member(user: Snowflake, guild: Snowflake, display_name: &str) -> Properties {
    Properties::from([
        ("userId".to_string(), id_value(user)),
        ("guildId".to_string(), id_value(guild)),
        ("displayName".to_string(), display_name.into()),
    ])
}

pub fn message(content: &str, author: Snowflake, channel: Snowflake) -> Properties {
    Properties::from([
        ("content".to_string(), content.into()),
        ("edited".to_string(), Primitive::Null),
        ("authorId".to_string(), id_value(author)),
        ("channelId".to_string(), id_value(channel)),
    ])
}

/// Read back an id-valued property (`guildId`, `authorId`, ...).
pub fn reference(record: &Record, property: &str) -> Option<Snowflake> {
    record.get_str(property).and_then(|s| s.parse().ok())
}

fn text<'a>(record: &'a Record, property: &str) -> &'a str {
    record.get_str(property).unwrap_or_default()
}

pub fn channel_order() -> Comparator<RecordKind> {
    Box::new(|a: &Record, b: &Record| {
        let pa = a.get_f64("position").unwrap_or_default();
        let pb = b.get_f64("position").unwrap_or_default();
        pa.total_cmp(&pb)
            .then_with(|| text(a, "name").cmp(text(b, "name")))
            .then(a.id().cmp(&b.id()))
    })
}

pub fn member_order() -> Comparator<RecordKind> {
    Box::new(|a: &Record, b: &Record| {
        text(a, "displayName")
            .cmp(text(b, "displayName"))
            .then(a.id().cmp(&b.id()))
    })
}

pub fn message_order() -> Comparator<RecordKind> {
    Box::new(|a: &Record, b: &Record| -> Ordering {
        a.id()
            .timestamp()
            .cmp(&b.id().timestamp())
            .then(a.id().cmp(&b.id()))
    })
}
