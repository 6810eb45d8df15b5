//! WebSocket server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                 ┌── World (Hub + indexes) ── Journal ──► RecordStore
//!            ├── connection ───┤        │                       ▲
//! Client B ──┘    task         │        ▼                       │
//!                              │   ClientSession ── outbound ── flush task
//!                              │   (terminal)        mpsc
//! ```
//!
//! Each connection task owns one outbound queue. Responses and the signals
//! delivered to its session go through that queue, so a client sees the
//! shifts caused by a request before the response to it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as Handshake, Response as HandshakeResponse,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use waffletalk_core::{NodeId, Snowflake};

use crate::config::ServerConfig;
use crate::error::{ProtocolError, RequestError, WorldError};
use crate::protocol::{Call, Request, Response};
use crate::session::Outbound;
use crate::world::World;

/// Header carrying a session token on the upgrade request.
pub const AUTHORIZATION_HEADER: &str = "X-Authorization";

/// Close code sent when the upgrade carried an unknown token.
pub const CLOSE_INVALID_TOKEN: u16 = 3000;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_requests: AtomicU64,
}

impl ServerStats {
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }
}

pub struct WaffleServer {
    config: ServerConfig,
    world: Arc<Mutex<World>>,
    stats: Arc<ServerStats>,
}

impl WaffleServer {
    /// Open storage and recover the world from it.
    pub fn new(config: ServerConfig) -> Result<Self, WorldError> {
        let world = World::open(&config)?;
        Ok(Self {
            config,
            world: Arc::new(Mutex::new(world)),
            stats: Arc::new(ServerStats::default()),
        })
    }

    /// Create with storage at the given path and default tuning.
    pub fn with_storage(
        bind_addr: impl Into<String>,
        path: impl Into<std::path::PathBuf>,
    ) -> Result<Self, WorldError> {
        Self::new(ServerConfig::with_storage(bind_addr, path))
    }

    pub fn world(&self) -> Arc<Mutex<World>> {
        self.world.clone()
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("waffletalk listening on {}", self.config.bind_addr);
        let _flusher = self.spawn_flush().await;

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");

            let world = self.world.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, world, stats).await {
                    log::error!("connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Periodically apply queued writes. Runs beside the world lock, not
    /// under it.
    async fn spawn_flush(&self) -> JoinHandle<()> {
        let (journal, store) = {
            let world = self.world.lock().await;
            (world.journal(), world.store())
        };
        let period = self.config.flush_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = journal.flush(&store) {
                    log::error!("journal flush failed, {} writes pending: {e}", journal.len());
                }
            }
        })
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        world: Arc<Mutex<World>>,
        stats: Arc<ServerStats>,
    ) -> Result<(), BoxError> {
        let mut token: Option<String> = None;
        let ws_stream = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &Handshake, resp: HandshakeResponse| -> Result<HandshakeResponse, ErrorResponse> {
                token = req
                    .headers()
                    .get(AUTHORIZATION_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(resp)
            },
        )
        .await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::info!("WebSocket connection established from {addr}");

        let (outbound, mut frames) = mpsc::unbounded_channel::<Arc<str>>();
        let mut conn = Connection::new(outbound);

        if let Some(token) = token {
            let bound = {
                let mut w = world.lock().await;
                w.authorize(&token).map(|user| conn.bind(&mut w, user))
            };
            if let Err(e) = bound {
                log::info!("rejecting {addr}: {e}");
                ws_sender
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::from(CLOSE_INVALID_TOKEN),
                        reason: "invalid session token".into(),
                    })))
                    .await?;
                return Ok(());
            }
        }

        stats.total_connections.fetch_add(1, Ordering::Relaxed);
        stats.active_connections.fetch_add(1, Ordering::Relaxed);

        let result = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                stats.total_requests.fetch_add(1, Ordering::Relaxed);
                                let response = {
                                    let mut w = world.lock().await;
                                    conn.handle(&mut w, text.as_str())
                                };
                                match response.encode() {
                                    Ok(frame) => conn.push(frame.into()),
                                    Err(e) => log::warn!("cannot encode response: {e}"),
                                }
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                ws_sender.send(Message::Pong(payload)).await?;
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                log::warn!("WebSocket error from {addr}: {e}");
                                break;
                            }
                        }
                    }
                    Some(frame) = frames.recv() => {
                        ws_sender.send(Message::text(frame.to_string())).await?;
                    }
                }
            }
            Ok::<(), BoxError>(())
        }
        .await;

        if let Some(binding) = conn.binding {
            world.lock().await.detach_session(binding.session);
        }
        stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        log::info!("connection from {addr} closed");
        result
    }
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    user: Snowflake,
    session: NodeId,
}

/// Per-connection request state.
struct Connection {
    outbound: Outbound,
    binding: Option<Binding>,
}

impl Connection {
    fn new(outbound: Outbound) -> Self {
        Self {
            outbound,
            binding: None,
        }
    }

    fn push(&self, frame: Arc<str>) {
        // The receiver lives as long as the connection task.
        let _ = self.outbound.send(frame);
    }

    /// Attach a session for `user`, replacing any earlier one.
    fn bind(&mut self, world: &mut World, user: Snowflake) {
        if let Some(old) = self.binding.take() {
            world.detach_session(old.session);
        }
        let session = world.attach_session(user, self.outbound.clone());
        self.binding = Some(Binding { user, session });
    }

    fn handle(&mut self, world: &mut World, text: &str) -> Response {
        let request = match Request::decode(text) {
            Ok(request) => request,
            Err(e) => return Response::err(0, e),
        };
        let seq = request.seq;
        match self.dispatch(world, request) {
            Ok(data) => Response::ok(seq, data),
            Err(e) => {
                log::debug!("request {seq} failed: {e}");
                Response::err(seq, e)
            }
        }
    }

    fn dispatch(&mut self, world: &mut World, request: Request) -> Result<Value, RequestError> {
        let call = Call::parse(request)?;
        match call {
            Call::Ping => Ok(json!("pong")),
            Call::Register(login) => {
                let user = world.create_user(&login.username, &login.clienthash)?;
                Ok(json!({ "user": user }))
            }
            Call::Authenticate(login) => {
                let (token, user) = world.authenticate(&login.username, &login.clienthash)?;
                self.bind(world, user);
                Ok(json!({ "token": token, "user": user }))
            }
            call => {
                let binding = self
                    .binding
                    .ok_or(ProtocolError::Unauthenticated(call.method()))?;
                Ok(Self::dispatch_bound(world, binding, call)?)
            }
        }
    }

    fn dispatch_bound(world: &mut World, me: Binding, call: Call) -> Result<Value, WorldError> {
        let data = match call {
            Call::CreateGuild { name } => json!({ "guild": world.create_guild(me.user, &name)? }),
            Call::JoinGuild { guild } => json!({ "member": world.create_member(me.user, guild)? }),
            Call::SubscribeGuild { guild } => {
                json!({ "replayed": world.subscribe_guild(me.session, me.user, guild)? })
            }
            Call::SubscribeChannel { channel } => {
                json!({ "replayed": world.subscribe_channel(me.session, me.user, channel)? })
            }
            Call::CreateChannel {
                guild,
                name,
                position,
                topic,
            } => {
                let channel =
                    world.create_channel(me.user, guild, &name, position, topic.as_deref())?;
                json!({ "channel": channel })
            }
            Call::SendMessage { channel, content } => {
                json!({ "message": world.create_message(me.user, channel, &content)? })
            }
            Call::EditMessage { message, content } => {
                world.edit_message(me.user, message, &content)?;
                Value::Null
            }
            Call::DeleteMessage { message } => {
                world.delete_message(me.user, message)?;
                Value::Null
            }
            Call::SetDisplayName {
                guild,
                display_name,
            } => {
                world.set_display_name(me.user, guild, &display_name)?;
                Value::Null
            }
            Call::Ping | Call::Register(_) | Call::Authenticate(_) => Value::Null,
        };
        Ok(data)
    }
}
