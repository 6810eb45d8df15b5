//! Integration tests for end-to-end WebSocket sessions.
//!
//! These tests start a real server and connect real clients, verifying
//! requests, responses and the signals delivered to subscribers.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use waffletalk_server::WaffleServer;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port with fresh storage.
async fn start_test_server() -> (String, tempfile::TempDir) {
    let port = free_port().await;
    let dir = tempfile::tempdir().unwrap();
    let server = WaffleServer::with_storage(format!("127.0.0.1:{port}"), dir.path().join("db"))
        .unwrap();
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("ws://127.0.0.1:{port}"), dir)
}

struct Client {
    ws: Socket,
    seq: u64,
}

impl Client {
    async fn connect(url: &str) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        Self { ws, seq: 0 }
    }

    async fn connect_with_token(url: &str, token: &str) -> Self {
        let mut request = url.into_client_request().unwrap();
        request
            .headers_mut()
            .insert("X-Authorization", token.parse().unwrap());
        let (ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        Self { ws, seq: 0 }
    }

    async fn next_frame(&mut self) -> Value {
        loop {
            let msg = timeout(Duration::from_secs(2), self.ws.next())
                .await
                .expect("frame within timeout")
                .expect("stream open")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    /// Send a request; return its response and the signals that preceded it.
    async fn call(&mut self, method: &str, data: Value) -> (Value, Vec<Value>) {
        self.seq += 1;
        let frame = json!({ "method": method, "seq": self.seq, "data": data });
        self.ws.send(Message::text(frame.to_string())).await.unwrap();
        let mut signals = Vec::new();
        loop {
            let frame = self.next_frame().await;
            if frame["event"] == "response" && frame["seq"] == self.seq {
                return (frame, signals);
            }
            signals.push(frame);
        }
    }

    /// Call and expect success; returns `data`.
    async fn ok(&mut self, method: &str, data: Value) -> Value {
        let (response, _) = self.call(method, data).await;
        assert!(response["err"].is_null(), "{method} failed: {}", response["err"]);
        response["data"].clone()
    }

    /// Register and log in; returns (token, user id).
    async fn login(&mut self, username: &str) -> (String, String) {
        let login = json!({ "username": username, "clienthash": format!("{username}-hash") });
        self.ok("register", login.clone()).await;
        let data = self.ok("authenticate", login).await;
        (
            data["token"].as_str().unwrap().to_string(),
            data["user"].as_str().unwrap().to_string(),
        )
    }
}

#[tokio::test]
async fn test_ping_anonymous() {
    let (url, _dir) = start_test_server().await;
    let mut client = Client::connect(&url).await;
    let (response, signals) = client.call("ping", Value::Null).await;
    assert_eq!(response["data"], "pong");
    assert_eq!(response["seq"], 1);
    assert!(signals.is_empty());
}

#[tokio::test]
async fn test_anonymous_cannot_create() {
    let (url, _dir) = start_test_server().await;
    let mut client = Client::connect(&url).await;
    let (response, _) = client.call("createGuild", json!({ "name": "nope" })).await;
    assert!(response["err"].as_str().unwrap().contains("authenticated"));
    assert_eq!(response["data"], Value::Null);

    let (response, _) = client.call("fly", Value::Null).await;
    assert!(response["err"].as_str().unwrap().contains("fly"));
}

#[tokio::test]
async fn test_wrong_password_rejected() {
    let (url, _dir) = start_test_server().await;
    let mut client = Client::connect(&url).await;
    client.login("amy").await;
    let (response, _) = client
        .call("authenticate", json!({ "username": "amy", "clienthash": "guess" }))
        .await;
    assert_eq!(response["err"], "authentication failed");
    let (response, _) = client
        .call("register", json!({ "username": "amy", "clienthash": "again" }))
        .await;
    assert!(response["err"].as_str().unwrap().contains("taken"));
}

#[tokio::test]
async fn test_channel_subscribers_see_messages() {
    let (url, _dir) = start_test_server().await;

    let mut amy = Client::connect(&url).await;
    amy.login("amy").await;
    let guild = amy.ok("createGuild", json!({ "name": "waffles" })).await["guild"].clone();
    let channel = amy
        .ok("createChannel", json!({ "guild": guild, "name": "general", "topic": "hi" }))
        .await["channel"]
        .clone();
    let replayed = amy.ok("subscribeChannel", json!({ "channel": channel })).await;
    assert_eq!(replayed["replayed"], 0);

    // amy's own post reaches her subscription before the response
    let (response, signals) = amy
        .call("sendMessage", json!({ "channel": channel, "content": "first" }))
        .await;
    let message = response["data"]["message"].clone();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0]["event"], "bucket.shift");
    assert_eq!(signals[0]["data"]["add"][0]["content"], "first");
    assert_eq!(signals[0]["data"]["add"][0]["id"], message);

    let mut bob = Client::connect(&url).await;
    bob.login("bob").await;
    let (response, _) = bob.call("subscribeChannel", json!({ "channel": channel })).await;
    assert!(response["err"].as_str().unwrap().contains("member"));

    bob.ok("joinGuild", json!({ "guild": guild })).await;
    let (response, replay) = bob.call("subscribeChannel", json!({ "channel": channel })).await;
    assert_eq!(response["data"]["replayed"], 1);
    assert_eq!(replay[0]["data"]["add"][0]["content"], "first");

    amy.ok("editMessage", json!({ "message": message, "content": "first!" })).await;
    let edit = bob.next_frame().await;
    assert_eq!(edit["event"], "replicable.mutation");
    assert_eq!(edit["data"]["id"], message);
    assert_eq!(edit["data"]["property"], "content");
    assert_eq!(edit["data"]["value"], "first!");
    let edited = bob.next_frame().await;
    assert_eq!(edited["data"]["property"], "edited");

    let (response, _) = bob.call("deleteMessage", json!({ "message": message })).await;
    assert!(response["err"].as_str().unwrap().contains("author"));

    amy.ok("deleteMessage", json!({ "message": message })).await;
    let removed = bob.next_frame().await;
    assert_eq!(removed["event"], "bucket.shift");
    assert_eq!(removed["data"]["remove"][0], message);
}

#[tokio::test]
async fn test_guild_subscribers_see_renames() {
    let (url, _dir) = start_test_server().await;
    let mut amy = Client::connect(&url).await;
    amy.login("amy").await;
    let guild = amy.ok("createGuild", json!({ "name": "waffles" })).await["guild"].clone();

    let (response, replay) = amy.call("subscribeGuild", json!({ "guild": guild })).await;
    assert_eq!(response["data"]["replayed"], 1);
    assert_eq!(replay[0]["data"]["add"][0]["displayName"], "amy");

    let (_, signals) = amy
        .call("setDisplayName", json!({ "guild": guild, "displayName": "amelia" }))
        .await;
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0]["event"], "replicable.mutation");
    assert_eq!(signals[0]["data"]["value"], "amelia");
}

#[tokio::test]
async fn test_token_reconnect() {
    let (url, _dir) = start_test_server().await;
    let token = {
        let mut first = Client::connect(&url).await;
        first.login("amy").await.0
    };
    let mut again = Client::connect_with_token(&url, &token).await;
    let data = again.ok("createGuild", json!({ "name": "mine" })).await;
    assert!(data["guild"].is_string());
}

#[tokio::test]
async fn test_invalid_token_closes_with_3000() {
    let (url, _dir) = start_test_server().await;
    let mut client = Client::connect_with_token(&url, "not-a-token").await;
    let msg = timeout(Duration::from_secs(2), client.ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match msg {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 3000),
        other => panic!("expected close frame, got {other:?}"),
    }
}
