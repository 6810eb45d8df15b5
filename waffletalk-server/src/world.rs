//! World: the domain factories and the state they keep in the hub.
//!
//! ```text
//! guild ──┬── channels (OrderedSet, by position/name) ── channel ── messages (OrderedSet, by time)
//!         └── members  (OrderedSet, by displayName)
//! ```
//!
//! Every record node is wired into the journal, so writes reach storage on
//! the next flush. Inserts are written through immediately.

use std::sync::Arc;
use std::time::SystemTime;

use rustc_hash::FxHashMap;
use uuid::Uuid;
use waffletalk_core::{Hub, NodeId, Properties, SetConfig, SetId, Snowflake, SnowflakeGenerator};

use crate::config::ServerConfig;
use crate::domain::{self, Record, RecordKind};
use crate::error::{StoreError, WorldError};
use crate::session::{ClientSession, Outbound};
use crate::storage::{Credential, Journal, RecordStore, WriteOp};

#[derive(Debug, Clone, Copy)]
struct GuildSets {
    channels: SetId,
    members: SetId,
}

#[derive(Debug, Clone, Copy)]
struct ChannelSets {
    guild: Snowflake,
    messages: SetId,
}

pub struct World {
    hub: Hub<RecordKind>,
    store: Arc<RecordStore>,
    journal: Journal,
    journal_node: NodeId,
    snowflakes: SnowflakeGenerator,
    set_config: SetConfig,
    usernames: FxHashMap<String, Snowflake>,
    guilds: FxHashMap<Snowflake, GuildSets>,
    channels: FxHashMap<Snowflake, ChannelSets>,
    memberships: FxHashMap<(Snowflake, Snowflake), Snowflake>,
}

impl World {
    /// Open the store named by `config` and rebuild state from it.
    pub fn open(config: &ServerConfig) -> Result<Self, WorldError> {
        let store = Arc::new(RecordStore::open(config.store_config())?);
        let mut world = Self::new(store, config.set_config(), config.worker_id);
        world.recover()?;
        Ok(world)
    }

    pub fn new(store: Arc<RecordStore>, set_config: SetConfig, worker_id: u64) -> Self {
        let journal = Journal::new();
        let mut hub = Hub::new();
        let journal_node = hub.attach_terminal(Box::new(journal.clone()));
        Self {
            hub,
            store,
            journal,
            journal_node,
            snowflakes: SnowflakeGenerator::new(worker_id),
            set_config,
            usernames: FxHashMap::default(),
            guilds: FxHashMap::default(),
            channels: FxHashMap::default(),
            memberships: FxHashMap::default(),
        }
    }

    pub fn hub(&self) -> &Hub<RecordKind> {
        &self.hub
    }

    pub fn store(&self) -> Arc<RecordStore> {
        self.store.clone()
    }

    /// Handle on the write queue, for flushing outside the world lock.
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    pub fn record(&self, id: Snowflake) -> Option<&Record> {
        self.hub.record(id)
    }

    pub fn flush(&self) -> Result<usize, StoreError> {
        self.journal.flush(&self.store)
    }

    // ─── Factories ────────────────────────────────────────────────────

    /// Register a user and its credential. Usernames are unique.
    pub fn create_user(&mut self, username: &str, clienthash: &str) -> Result<Snowflake, WorldError> {
        if self.usernames.contains_key(username) {
            return Err(WorldError::UsernameTaken(username.to_string()));
        }
        let id = self.snowflakes.next();
        let credential = Credential::derive(id, clienthash)?;
        self.store.put_credential(username, &credential)?;
        self.spawn(RecordKind::User, id, domain::user(username))?;
        log::info!("registered user {username} as {id}");
        Ok(id)
    }

    /// Create a guild; its creator becomes the first member.
    pub fn create_guild(&mut self, owner: Snowflake, name: &str) -> Result<Snowflake, WorldError> {
        self.require(RecordKind::User, owner)?;
        let id = self.snowflakes.next();
        self.spawn(RecordKind::Guild, id, domain::guild(name))?;
        self.create_member(owner, id)?;
        Ok(id)
    }

    pub fn create_channel(
        &mut self,
        user: Snowflake,
        guild: Snowflake,
        name: &str,
        position: f64,
        topic: Option<&str>,
    ) -> Result<Snowflake, WorldError> {
        self.require_member(user, guild)?;
        let id = self.snowflakes.next();
        self.spawn(
            RecordKind::GuildChannel,
            id,
            domain::channel(name, position, topic, guild),
        )?;
        Ok(id)
    }

    /// Join `user` to `guild`. Joining twice returns the existing member.
    pub fn create_member(&mut self, user: Snowflake, guild: Snowflake) -> Result<Snowflake, WorldError> {
        if let Some(member) = self.memberships.get(&(guild, user)) {
            return Ok(*member);
        }
        self.require(RecordKind::Guild, guild)?;
        let username = self
            .require(RecordKind::User, user)?
            .get_str("username")
            .unwrap_or_default()
            .to_string();
        let id = self.snowflakes.next();
        self.spawn(
            RecordKind::GuildMember,
            id,
            domain::member(user, guild, &username),
        )?;
        Ok(id)
    }

    pub fn create_message(
        &mut self,
        author: Snowflake,
        channel: Snowflake,
        content: &str,
    ) -> Result<Snowflake, WorldError> {
        let guild = self.channel_sets(channel)?.guild;
        self.require_member(author, guild)?;
        let id = self.snowflakes.next();
        self.spawn(
            RecordKind::Message,
            id,
            domain::message(content, author, channel),
        )?;
        Ok(id)
    }

    pub fn edit_message(
        &mut self,
        author: Snowflake,
        message: Snowflake,
        content: &str,
    ) -> Result<(), WorldError> {
        self.require_author(author, message)?;
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        self.hub.write(message, "content", content)?;
        self.hub.write(message, "edited", now.floor())?;
        Ok(())
    }

    pub fn delete_message(&mut self, author: Snowflake, message: Snowflake) -> Result<(), WorldError> {
        self.require_author(author, message)?;
        self.hub.remove_record(message)?;
        self.journal.push(WriteOp::Delete {
            kind: RecordKind::Message,
            id: message,
        });
        Ok(())
    }

    /// Rename a member within one guild. May move it between buckets.
    pub fn set_display_name(
        &mut self,
        user: Snowflake,
        guild: Snowflake,
        display_name: &str,
    ) -> Result<(), WorldError> {
        let member = self.require_member(user, guild)?;
        self.hub.write(member, "displayName", display_name)?;
        Ok(())
    }

    // ─── Sessions ─────────────────────────────────────────────────────

    pub fn attach_session(&mut self, user: Snowflake, outbound: Outbound) -> NodeId {
        let node = self.hub.attach_terminal(Box::new(ClientSession::new(user, outbound)));
        log::debug!("attached session of {user} as {node:?}");
        node
    }

    pub fn detach_session(&mut self, node: NodeId) {
        if self.hub.detach_terminal(node).is_some() {
            log::debug!("detached session {node:?}");
        }
    }

    /// Follow a guild's record, channels and members. The current channels
    /// and members are replayed to the session first.
    pub fn subscribe_guild(
        &mut self,
        session: NodeId,
        user: Snowflake,
        guild: Snowflake,
    ) -> Result<usize, WorldError> {
        self.require_member(user, guild)?;
        let sets = self.guild_sets(guild)?;
        let record = self.require(RecordKind::Guild, guild)?.node();
        let mut replayed = 0;
        for set in [sets.channels, sets.members] {
            replayed += self.hub.replay(set, session)?;
            self.hub.subscribe(set, session)?;
        }
        self.hub.wire(session, record)?;
        Ok(replayed)
    }

    pub fn subscribe_channel(
        &mut self,
        session: NodeId,
        user: Snowflake,
        channel: Snowflake,
    ) -> Result<usize, WorldError> {
        let sets = self.channel_sets(channel)?;
        self.require_member(user, sets.guild)?;
        let replayed = self.hub.replay(sets.messages, session)?;
        self.hub.subscribe(sets.messages, session)?;
        Ok(replayed)
    }

    // ─── Authentication ───────────────────────────────────────────────

    /// Check a login and issue a session token.
    pub fn authenticate(
        &mut self,
        username: &str,
        clienthash: &str,
    ) -> Result<(String, Snowflake), WorldError> {
        let credential = self
            .store
            .credential(username)?
            .ok_or(WorldError::Authentication)?;
        if !credential.verify(clienthash) {
            log::debug!("rejected login of {username}");
            return Err(WorldError::Authentication);
        }
        let token = Uuid::new_v4().to_string();
        self.store.put_session(&token, credential.user)?;
        Ok((token, credential.user))
    }

    /// User a session token belongs to.
    pub fn authorize(&self, token: &str) -> Result<Snowflake, WorldError> {
        let user = self
            .store
            .session(token)?
            .ok_or(WorldError::Authorization)?;
        if self.hub.record(user).is_none() {
            return Err(WorldError::Authorization);
        }
        Ok(user)
    }

    // ─── Recovery ─────────────────────────────────────────────────────

    /// Rebuild records, sets and indexes from storage. Kinds are loaded
    /// parents first; rows whose parent is gone are skipped.
    pub fn recover(&mut self) -> Result<usize, WorldError> {
        let mut loaded = 0;
        for kind in RecordKind::ALL {
            for (id, data) in self.store.scan(kind)? {
                self.snowflakes.observe(id);
                match self.place(kind, id, data) {
                    Ok(()) => loaded += 1,
                    Err(e) => log::warn!("skipping stored {kind} {id}: {e}"),
                }
            }
        }
        log::info!("recovered {loaded} records from {}", self.store.path().display());
        Ok(loaded)
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    /// Persist a new record, then bring it live.
    fn spawn(&mut self, kind: RecordKind, id: Snowflake, data: Properties) -> Result<(), WorldError> {
        self.store.insert(kind, id, &data)?;
        self.place(kind, id, data)
    }

    /// Insert a record into the hub, wire it to the journal and file it in
    /// the indexes and sets it belongs to.
    fn place(&mut self, kind: RecordKind, id: Snowflake, data: Properties) -> Result<(), WorldError> {
        let node = self.hub.insert_record(id, kind, data)?;
        self.hub.wire(self.journal_node, node)?;
        if let Err(e) = self.index(kind, id) {
            self.hub.remove_record(id)?;
            return Err(e);
        }
        Ok(())
    }

    fn index(&mut self, kind: RecordKind, id: Snowflake) -> Result<(), WorldError> {
        match kind {
            RecordKind::User => {
                let username = self
                    .require(kind, id)?
                    .get_str("username")
                    .unwrap_or_default()
                    .to_string();
                self.usernames.insert(username, id);
            }
            RecordKind::Guild => {
                let channels = self.hub.create_set(domain::channel_order(), self.set_config);
                let members = self.hub.create_set(domain::member_order(), self.set_config);
                self.guilds.insert(id, GuildSets { channels, members });
            }
            RecordKind::GuildChannel => {
                let guild = self.parent(id, "guildId")?;
                let channels = self.guild_sets(guild)?.channels;
                let messages = self.hub.create_set(domain::message_order(), self.set_config);
                self.hub.add(channels, id)?;
                self.channels.insert(id, ChannelSets { guild, messages });
            }
            RecordKind::GuildMember => {
                let guild = self.parent(id, "guildId")?;
                let user = self.parent(id, "userId")?;
                let members = self.guild_sets(guild)?.members;
                self.hub.add(members, id)?;
                self.memberships.insert((guild, user), id);
            }
            RecordKind::Message => {
                let channel = self.parent(id, "channelId")?;
                let messages = self.channel_sets(channel)?.messages;
                self.hub.add(messages, id)?;
            }
        }
        Ok(())
    }

    fn parent(&self, id: Snowflake, property: &str) -> Result<Snowflake, WorldError> {
        self.hub
            .record(id)
            .and_then(|r| domain::reference(r, property))
            .ok_or(WorldError::Forbidden("record references are malformed"))
    }

    fn require(&self, kind: RecordKind, id: Snowflake) -> Result<&Record, WorldError> {
        self.hub
            .record(id)
            .filter(|r| r.kind() == kind)
            .ok_or(WorldError::NotFound { kind, id })
    }

    fn guild_sets(&self, guild: Snowflake) -> Result<GuildSets, WorldError> {
        self.guilds.get(&guild).copied().ok_or(WorldError::NotFound {
            kind: RecordKind::Guild,
            id: guild,
        })
    }

    fn channel_sets(&self, channel: Snowflake) -> Result<ChannelSets, WorldError> {
        self.channels.get(&channel).copied().ok_or(WorldError::NotFound {
            kind: RecordKind::GuildChannel,
            id: channel,
        })
    }

    /// Member record of `user` in `guild`.
    fn require_member(&self, user: Snowflake, guild: Snowflake) -> Result<Snowflake, WorldError> {
        self.guild_sets(guild)?;
        self.memberships
            .get(&(guild, user))
            .copied()
            .ok_or(WorldError::Forbidden("not a member of this guild"))
    }

    fn require_author(&self, user: Snowflake, message: Snowflake) -> Result<(), WorldError> {
        let record = self.require(RecordKind::Message, message)?;
        if domain::reference(record, "authorId") != Some(user) {
            return Err(WorldError::Forbidden("only the author may change a message"));
        }
        Ok(())
    }
}
