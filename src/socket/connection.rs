//! Authenticated, auto-reconnecting Socket.IO namespace connections.
//!
//! Each [`Connection`] is driven by one background task that owns the
//! transport. The task walks through connection episodes:
//!
//! 1. fetch a token (non-forced, once per connection),
//! 2. open the transport and send the namespace CONNECT with `{"token": ...}`,
//! 3. on a connect error, force-refresh the token once per episode and retry
//!    immediately; later failures in the same episode surface a persistent
//!    error and fall back to fixed-delay reconnection with the last token,
//! 4. once connected, fan server events out to subscribers, flush queued
//!    emits and answer heartbeats until the transport drops.
//!
//! A successful connect starts a new episode.

use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::packet::{EnginePacket, PacketError, SocketPacket};
use super::subscriptions::Subscriptions;
use super::transport::{engine_url, FrameChannel, Transport, TransportError, WsTransport};
use crate::auth::TokenProvider;
use crate::metrics;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_EVENT_BUFFER: usize = 256;
pub const DEFAULT_EMIT_BUFFER: usize = 128;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("Socket connection is closed")]
    Closed,

    #[error("Socket send buffer is full")]
    Backpressure,

    #[error("The {0} namespace has no room subscriptions")]
    NoRooms(Namespace),

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Rides,
    Planner,
}

/// Emit names and key for a namespace's per-entity rooms.
#[derive(Debug, Clone, Copy)]
pub struct RoomEvents {
    pub subscribe: &'static str,
    pub unsubscribe: &'static str,
    pub key: &'static str,
}

impl RoomEvents {
    pub fn payload(&self, id: &str) -> Value {
        let mut body = serde_json::Map::new();
        body.insert(self.key.to_string(), Value::String(id.to_string()));
        Value::Object(body)
    }
}

impl Namespace {
    pub fn path(self) -> &'static str {
        match self {
            Namespace::Rides => "/rides",
            Namespace::Planner => "/planner",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Namespace::Rides => "rides",
            Namespace::Planner => "planner",
        }
    }

    pub fn room_events(self) -> Option<RoomEvents> {
        match self {
            Namespace::Rides => None,
            Namespace::Planner => Some(RoomEvents {
                subscribe: "planner:subscribe",
                unsubscribe: "planner:unsubscribe",
                key: "session_id",
            }),
        }
    }

    fn default_error(self) -> &'static str {
        match self {
            Namespace::Rides => "Socket connection failed.",
            Namespace::Planner => "Planner socket connection failed.",
        }
    }

    fn start_failed(self) -> &'static str {
        match self {
            Namespace::Rides => "Unable to start realtime rides socket.",
            Namespace::Planner => "Unable to start planner realtime socket.",
        }
    }

    fn refresh_failed(self) -> &'static str {
        match self {
            Namespace::Rides => "Unable to refresh auth token for realtime rides.",
            Namespace::Planner => "Unable to refresh auth token for planner realtime socket.",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Server base URL, e.g. `http://localhost:5000`.
    pub socket_url: String,
    /// Engine.IO mount path.
    pub path: String,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub event_buffer: usize,
    pub emit_buffer: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            socket_url: "http://localhost:5000".to_string(),
            path: "/socket.io".to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            event_buffer: DEFAULT_EVENT_BUFFER,
            emit_buffer: DEFAULT_EMIT_BUFFER,
        }
    }
}

/// Observable connection status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    /// Latest human-readable failure, cleared on a successful connect.
    pub error: Option<String>,
    /// The one forced refresh of the current episode has been spent and the
    /// server still refuses the connection.
    pub auth_exhausted: bool,
}

/// A server-pushed event on a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketEvent {
    pub name: String,
    pub payload: Value,
}

struct Outgoing {
    name: String,
    payload: Value,
}

struct Shared {
    namespace: Namespace,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<SocketEvent>,
    emits: mpsc::Sender<Outgoing>,
    rooms: Subscriptions,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl Shared {
    fn update(&self, f: impl FnOnce(&mut ConnectionState)) {
        self.state.send_modify(f);
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }
}

/// Opens namespace connections over a [`Transport`].
#[derive(Clone)]
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    options: ConnectionOptions,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, options: ConnectionOptions) -> Self {
        Self { transport, options }
    }

    /// Manager using the websocket transport.
    pub fn websocket(options: ConnectionOptions) -> Self {
        Self::new(Arc::new(WsTransport), options)
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Start connecting `namespace` in the background. Must be called from
    /// within a tokio runtime.
    pub fn open(&self, namespace: Namespace, tokens: Arc<dyn TokenProvider>) -> Connection {
        let (state_tx, _) = watch::channel(ConnectionState::default());
        let (events_tx, _) = broadcast::channel(self.options.event_buffer.max(1));
        let (emit_tx, emit_rx) = mpsc::channel(self.options.emit_buffer.max(1));

        let shared = Arc::new(Shared {
            namespace,
            state: state_tx,
            events: events_tx,
            emits: emit_tx,
            rooms: Subscriptions::new(),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        let driver = Driver {
            shared: shared.clone(),
            transport: self.transport.clone(),
            options: self.options.clone(),
            tokens,
            emits: emit_rx,
        };
        let task = tokio::spawn(driver.run());

        Connection {
            shared,
            task: parking_lot::Mutex::new(Some(task)),
        }
    }
}

/// Handle to one namespace connection.
///
/// Dropping the handle shuts the connection down.
pub struct Connection {
    shared: Arc<Shared>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    pub fn namespace(&self) -> Namespace {
        self.shared.namespace
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Subscribe to server events from this point on.
    pub fn events(&self) -> EventSubscription {
        EventSubscription {
            rx: self.shared.events.subscribe(),
            shared: self.shared.clone(),
        }
    }

    /// Queue an event for the server. Events queued while disconnected are
    /// sent after the next successful connect.
    pub fn emit<T: Serialize>(&self, name: &str, payload: &T) -> Result<(), SocketError> {
        if self.is_closed() {
            return Err(SocketError::Closed);
        }
        let payload = serde_json::to_value(payload)
            .map_err(|e| PacketError::InvalidJson(e.to_string()))?;
        self.shared
            .emits
            .try_send(Outgoing {
                name: name.to_string(),
                payload,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SocketError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => SocketError::Closed,
            })
    }

    /// Join a per-entity room. Only the first holder emits the subscribe;
    /// rooms are re-joined after every reconnect.
    pub fn subscribe_room(&self, id: &str) -> Result<(), SocketError> {
        let events = self
            .shared
            .namespace
            .room_events()
            .ok_or(SocketError::NoRooms(self.shared.namespace))?;
        if self.is_closed() {
            return Err(SocketError::Closed);
        }
        if self.shared.rooms.acquire(id) {
            info!(namespace = %self.shared.namespace, room = %id, "Subscribing");
            if self.is_connected() {
                self.emit(events.subscribe, &events.payload(id))?;
            }
        }
        Ok(())
    }

    /// Leave a room. Only the last holder emits the unsubscribe; unmatched
    /// calls are ignored.
    pub fn unsubscribe_room(&self, id: &str) -> Result<(), SocketError> {
        let events = self
            .shared
            .namespace
            .room_events()
            .ok_or(SocketError::NoRooms(self.shared.namespace))?;
        if self.shared.rooms.release(id) && !self.is_closed() {
            info!(namespace = %self.shared.namespace, room = %id, "Unsubscribing");
            self.emit(events.unsubscribe, &events.payload(id))?;
        }
        Ok(())
    }

    pub fn active_rooms(&self) -> Vec<String> {
        self.shared.rooms.active()
    }

    /// Stop the connection without waiting for the task to exit. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            debug!(namespace = %self.shared.namespace, "Closing connection");
            self.shared.cancel.cancel();
            self.shared.update(|s| s.connected = false);
        }
    }

    /// Stop the connection and wait for the background task to finish.
    /// Idempotent; no events are delivered once this returns.
    pub async fn close(&self) {
        self.shutdown();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Receiver of server events for one consumer.
pub struct EventSubscription {
    rx: broadcast::Receiver<SocketEvent>,
    shared: Arc<Shared>,
}

impl EventSubscription {
    /// Next event, or `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<SocketEvent> {
        loop {
            if self.shared.closed.load(Ordering::SeqCst) {
                return None;
            }
            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => return None,
                received = self.rx.recv() => match received {
                    Ok(event) => {
                        if self.shared.closed.load(Ordering::SeqCst) {
                            return None;
                        }
                        return Some(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(namespace = %self.shared.namespace, skipped, "Event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }
}

enum SessionEnd {
    /// Never reached the connected state.
    ConnectFailed(String),
    /// Was connected, then lost the transport.
    Disconnected,
    Cancelled,
}

struct Driver {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    options: ConnectionOptions,
    tokens: Arc<dyn TokenProvider>,
    emits: mpsc::Receiver<Outgoing>,
}

impl Driver {
    async fn run(mut self) {
        let ns = self.shared.namespace;
        let cancel = self.shared.cancel.clone();

        let mut token = tokio::select! {
            _ = cancel.cancelled() => return,
            result = self.tokens.token(false) => match result {
                Ok(token) => token,
                Err(e) => {
                    warn!(namespace = %ns, error = %e, "Could not obtain socket token");
                    self.shared.update(|s| s.error = Some(ns.start_failed().to_string()));
                    return;
                }
            },
        };

        let mut refresh_used = false;
        let mut retry_now = true;

        loop {
            if !retry_now {
                metrics::record_reconnect_attempt(ns.name());
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(self.options.reconnect_delay) => {}
                }
            }
            retry_now = false;

            match self.session(&token).await {
                SessionEnd::Cancelled => break,
                SessionEnd::Disconnected => {
                    info!(namespace = %ns, "Disconnected, will reconnect");
                    refresh_used = false;
                }
                SessionEnd::ConnectFailed(reason) => {
                    metrics::record_connect_error(ns.name());
                    warn!(namespace = %ns, error = %reason, refresh_used, "Connect failed");
                    let message = if reason.trim().is_empty() {
                        ns.default_error().to_string()
                    } else {
                        reason
                    };
                    let exhausted = refresh_used;
                    self.shared.update(|s| {
                        s.connected = false;
                        s.error = Some(message);
                        s.auth_exhausted = exhausted;
                    });

                    if refresh_used {
                        continue;
                    }
                    refresh_used = true;

                    let refreshed = tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = self.tokens.token(true) => result,
                    };
                    match refreshed {
                        Ok(fresh) => {
                            metrics::record_token_refresh("socket", true);
                            info!(namespace = %ns, "Retrying with refreshed token");
                            token = fresh;
                            retry_now = true;
                        }
                        Err(e) => {
                            metrics::record_token_refresh("socket", false);
                            warn!(namespace = %ns, error = %e, "Token refresh failed");
                            self.shared.update(|s| {
                                s.error = Some(ns.refresh_failed().to_string());
                                s.auth_exhausted = true;
                            });
                        }
                    }
                }
            }
        }

        self.shared.update(|s| s.connected = false);
        debug!(namespace = %ns, "Connection task stopped");
    }

    /// One transport lifetime: handshake, namespace connect, then pump.
    async fn session(&mut self, token: &str) -> SessionEnd {
        let ns = self.shared.namespace;
        let cancel = self.shared.cancel.clone();

        let url = match engine_url(&self.options.socket_url, &self.options.path) {
            Ok(url) => url,
            Err(e) => return SessionEnd::ConnectFailed(e.to_string()),
        };

        let deadline = Instant::now() + self.options.connect_timeout;

        let opened = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            opened = timeout(self.options.connect_timeout, self.transport.open(&url)) => opened,
        };
        let mut channel = match opened {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => return SessionEnd::ConnectFailed(e.to_string()),
            Err(_) => return SessionEnd::ConnectFailed("Connection timed out.".to_string()),
        };

        let heartbeat = match self.handshake(&mut channel, token, deadline).await {
            Ok(heartbeat) => heartbeat,
            Err(end) => return end,
        };

        info!(namespace = %ns, "Connected");
        metrics::record_connect(ns.name());
        self.shared.update(|s| {
            s.connected = true;
            s.error = None;
            s.auth_exhausted = false;
        });

        // Rooms joined while disconnected are announced here.
        if let Some(events) = ns.room_events() {
            for room in self.shared.rooms.active() {
                debug!(namespace = %ns, room = %room, "Re-subscribing");
                let frame = SocketPacket::Event {
                    namespace: ns.path().to_string(),
                    id: None,
                    name: events.subscribe.to_string(),
                    payload: events.payload(&room),
                };
                if channel.outgoing.send(frame.encode()).await.is_err() {
                    self.shared.update(|s| s.connected = false);
                    return SessionEnd::Disconnected;
                }
            }
        }

        let end = self.pump(&mut channel, heartbeat).await;
        self.shared.update(|s| s.connected = false);
        end
    }

    /// Wait for the Engine.IO open packet, send the namespace CONNECT and
    /// wait for its acknowledgement. Returns the heartbeat window.
    async fn handshake(
        &self,
        channel: &mut FrameChannel,
        token: &str,
        deadline: Instant,
    ) -> Result<Duration, SessionEnd> {
        let ns = self.shared.namespace;
        let cancel = self.shared.cancel.clone();
        let mut heartbeat: Option<Duration> = None;

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return Err(SessionEnd::Cancelled),
                _ = sleep_until(deadline) => {
                    return Err(SessionEnd::ConnectFailed("Connection timed out.".to_string()))
                }
                frame = channel.incoming.recv() => frame,
            };
            let Some(frame) = frame else {
                return Err(SessionEnd::ConnectFailed(String::new()));
            };

            match EnginePacket::decode(&frame) {
                Ok(EnginePacket::Open(handshake)) => {
                    debug!(namespace = %ns, sid = %handshake.sid, "Engine.IO session opened");
                    heartbeat = Some(Duration::from_millis(
                        handshake.ping_interval + handshake.ping_timeout,
                    ));
                    let connect = SocketPacket::Connect {
                        namespace: ns.path().to_string(),
                        data: Some(json!({ "token": token })),
                    };
                    if channel.outgoing.send(connect.encode()).await.is_err() {
                        return Err(SessionEnd::ConnectFailed(String::new()));
                    }
                }
                Ok(EnginePacket::Ping(data)) => {
                    let _ = channel.outgoing.send(EnginePacket::Pong(data).encode()).await;
                }
                Ok(EnginePacket::Message(body)) => match SocketPacket::decode(&body) {
                    Ok(SocketPacket::Connect { namespace, .. }) if namespace == ns.path() => {
                        return heartbeat.ok_or_else(|| {
                            SessionEnd::ConnectFailed("Connect acknowledged before handshake.".to_string())
                        });
                    }
                    Ok(SocketPacket::ConnectError { namespace, message }) if namespace == ns.path() => {
                        return Err(SessionEnd::ConnectFailed(message));
                    }
                    Ok(other) => {
                        debug!(namespace = %ns, packet = ?other, "Ignoring packet before connect");
                    }
                    Err(e) => {
                        warn!(namespace = %ns, error = %e, "Malformed packet during connect");
                    }
                },
                Ok(EnginePacket::Close) => return Err(SessionEnd::ConnectFailed(String::new())),
                Ok(_) => {}
                Err(e) => {
                    warn!(namespace = %ns, error = %e, "Malformed frame during connect");
                }
            }
        }
    }

    async fn pump(&mut self, channel: &mut FrameChannel, heartbeat: Duration) -> SessionEnd {
        let ns = self.shared.namespace;
        let cancel = self.shared.cancel.clone();
        let mut ping_deadline = Instant::now() + heartbeat;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let goodbye = SocketPacket::Disconnect { namespace: ns.path().to_string() };
                    let _ = channel.outgoing.try_send(goodbye.encode());
                    return SessionEnd::Cancelled;
                }
                _ = sleep_until(ping_deadline) => {
                    warn!(namespace = %ns, "No heartbeat from server");
                    return SessionEnd::Disconnected;
                }
                frame = channel.incoming.recv() => {
                    let Some(frame) = frame else {
                        return SessionEnd::Disconnected;
                    };
                    match EnginePacket::decode(&frame) {
                        Ok(EnginePacket::Ping(data)) => {
                            ping_deadline = Instant::now() + heartbeat;
                            if channel.outgoing.send(EnginePacket::Pong(data).encode()).await.is_err() {
                                return SessionEnd::Disconnected;
                            }
                        }
                        Ok(EnginePacket::Message(body)) => {
                            if let Some(end) = self.dispatch(&body) {
                                return end;
                            }
                        }
                        Ok(EnginePacket::Close) => return SessionEnd::Disconnected,
                        Ok(_) => {}
                        Err(e) => warn!(namespace = %ns, error = %e, "Malformed frame"),
                    }
                }
                outgoing = self.emits.recv() => {
                    let Some(Outgoing { name, payload }) = outgoing else {
                        return SessionEnd::Cancelled;
                    };
                    debug!(namespace = %ns, event = %name, "Emitting");
                    let frame = SocketPacket::Event {
                        namespace: ns.path().to_string(),
                        id: None,
                        name,
                        payload,
                    };
                    if channel.outgoing.send(frame.encode()).await.is_err() {
                        return SessionEnd::Disconnected;
                    }
                }
            }
        }
    }

    fn dispatch(&self, body: &str) -> Option<SessionEnd> {
        let ns = self.shared.namespace;
        match SocketPacket::decode(body) {
            Ok(SocketPacket::Event {
                namespace,
                name,
                payload,
                ..
            }) if namespace == ns.path() => {
                metrics::record_push_event(ns.name());
                debug!(namespace = %ns, event = %name, "Received event");
                // No receivers is fine; the event is simply dropped.
                let _ = self.shared.events.send(SocketEvent { name, payload });
                None
            }
            Ok(SocketPacket::Disconnect { namespace }) if namespace == ns.path() => {
                info!(namespace = %ns, "Server closed the namespace");
                Some(SessionEnd::Disconnected)
            }
            Ok(SocketPacket::ConnectError { namespace, message }) if namespace == ns.path() => {
                warn!(namespace = %ns, error = %message, "Server rejected the session");
                self.shared.update(|s| {
                    s.error = Some(if message.is_empty() {
                        ns.default_error().to_string()
                    } else {
                        message
                    })
                });
                Some(SessionEnd::Disconnected)
            }
            Ok(other) => {
                debug!(namespace = %ns, packet = ?other, "Ignoring packet");
                None
            }
            Err(e) => {
                warn!(namespace = %ns, error = %e, "Malformed packet");
                None
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::auth::testing::ScriptedTokens;
    use crate::auth::AuthError;

    #[tokio::test]
    async fn test_connect_and_receive() {
        let (transport, mut servers) = MockTransport::new();
        let manager = ConnectionManager::new(transport, fast_options());
        let conn = manager.open(Namespace::Rides, Arc::new(ScriptedTokens::new("t1")));
        let mut events = conn.events();
        let mut state = conn.state();

        let mut server = next_server(&mut servers).await;
        let connect = server.accept("/rides").await;
        assert_eq!(connect, r#"40/rides,{"token":"t1"}"#);
        wait_state(&mut state, |s| s.connected).await;

        server
            .push("/rides", "ride:eta_updated", json!({"ride_id": "r1", "eta_minutes": 4}))
            .await;
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.name, "ride:eta_updated");
        assert_eq!(event.payload["eta_minutes"], 4);

        server.send("2").await;
        assert_eq!(server.recv().await, "3");

        conn.emit("traveler:set_city", &json!({"city": "Pune"})).unwrap();
        assert_eq!(
            server.recv_message().await,
            r#"42/rides,["traveler:set_city",{"city":"Pune"}]"#
        );

        conn.close().await;
    }

    #[tokio::test]
    async fn test_events_for_other_namespaces_are_ignored() {
        let (transport, mut servers) = MockTransport::new();
        let manager = ConnectionManager::new(transport, fast_options());
        let conn = manager.open(Namespace::Planner, Arc::new(ScriptedTokens::new("t")));
        let mut events = conn.events();

        let mut server = next_server(&mut servers).await;
        server.accept("/planner").await;
        server.push("/rides", "ride:error", json!({"message": "x"})).await;
        server.push("/planner", "planner:cancelled", json!({"session_id": "s1"})).await;

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.name, "planner:cancelled");
        conn.close().await;
    }

    #[tokio::test]
    async fn test_one_forced_refresh_per_episode() {
        let (transport, mut servers) = MockTransport::new();
        let tokens = Arc::new(ScriptedTokens::new("t2").then(Ok("t1")));
        let manager = ConnectionManager::new(transport, fast_options());
        let conn = manager.open(Namespace::Rides, tokens.clone());
        let mut state = conn.state();

        // First attempt with the cached token is refused.
        let mut server = next_server(&mut servers).await;
        server.open(25_000, 20_000).await;
        assert_eq!(server.recv().await, r#"40/rides,{"token":"t1"}"#);
        server.send(r#"44/rides,{"message":"Invalid token"}"#).await;

        // Immediate retry with a refreshed token, also refused.
        let mut server = next_server(&mut servers).await;
        server.open(25_000, 20_000).await;
        assert_eq!(server.recv().await, r#"40/rides,{"token":"t2"}"#);
        server.send(r#"44/rides,{"message":"Invalid token"}"#).await;

        let failed = wait_state(&mut state, |s| s.auth_exhausted).await;
        assert!(!failed.connected);
        assert_eq!(failed.error.as_deref(), Some("Invalid token"));

        // Channel-level reconnection continues with the last token and no
        // further refresh.
        let mut server = next_server(&mut servers).await;
        assert_eq!(server.accept("/rides").await, r#"40/rides,{"token":"t2"}"#);
        let ok = wait_state(&mut state, |s| s.connected).await;
        assert!(ok.error.is_none());
        assert!(!ok.auth_exhausted);
        assert_eq!(tokens.calls(), vec![false, true]);

        conn.close().await;
    }

    #[tokio::test]
    async fn test_new_episode_allows_another_refresh() {
        let (transport, mut servers) = MockTransport::new();
        let tokens = Arc::new(ScriptedTokens::new("fresh"));
        let manager = ConnectionManager::new(transport, fast_options());
        let conn = manager.open(Namespace::Rides, tokens.clone());
        let mut state = conn.state();

        let mut server = next_server(&mut servers).await;
        server.open(25_000, 20_000).await;
        server.recv().await;
        server.send(r#"44/rides,{"message":"expired"}"#).await;

        let mut server = next_server(&mut servers).await;
        server.accept("/rides").await;
        wait_state(&mut state, |s| s.connected).await;
        drop(server);
        wait_state(&mut state, |s| !s.connected).await;

        let mut server = next_server(&mut servers).await;
        server.open(25_000, 20_000).await;
        server.recv().await;
        server.send(r#"44/rides,{"message":"expired"}"#).await;

        let mut server = next_server(&mut servers).await;
        server.accept("/rides").await;
        wait_state(&mut state, |s| s.connected).await;

        assert_eq!(tokens.forced_calls(), 2);
        conn.close().await;
    }

    #[tokio::test]
    async fn test_refresh_failure_surfaces_error() {
        let (transport, mut servers) = MockTransport::new();
        let tokens = Arc::new(
            ScriptedTokens::new("t")
                .then(Ok("t"))
                .then(Err(AuthError::Command("offline".into()))),
        );
        let manager = ConnectionManager::new(transport, fast_options());
        let conn = manager.open(Namespace::Planner, tokens);
        let mut state = conn.state();

        let mut server = next_server(&mut servers).await;
        server.open(25_000, 20_000).await;
        server.recv().await;
        server.send(r#"44/planner,{}"#).await;

        let failed = wait_state(&mut state, |s| s.auth_exhausted).await;
        assert_eq!(
            failed.error.as_deref(),
            Some("Unable to refresh auth token for planner realtime socket.")
        );
        conn.close().await;
    }

    #[tokio::test]
    async fn test_initial_token_failure_stops() {
        let (transport, _servers) = MockTransport::new();
        let tokens = Arc::new(ScriptedTokens::new("t").then(Err(AuthError::NotConfigured)));
        let manager = ConnectionManager::new(transport.clone(), fast_options());
        let conn = manager.open(Namespace::Rides, tokens);
        let mut state = conn.state();

        let failed = wait_state(&mut state, |s| s.error.is_some()).await;
        assert_eq!(
            failed.error.as_deref(),
            Some("Unable to start realtime rides socket.")
        );
        conn.close().await;
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let (transport, mut servers) = MockTransport::new();
        let manager = ConnectionManager::new(transport, fast_options());
        let conn = manager.open(Namespace::Rides, Arc::new(ScriptedTokens::new("t")));
        let mut events = conn.events();

        let mut server = next_server(&mut servers).await;
        server.accept("/rides").await;
        let mut state = conn.state();
        wait_state(&mut state, |s| s.connected).await;

        conn.close().await;
        conn.close().await;
        conn.shutdown();

        assert!(conn.is_closed());
        assert!(!conn.is_connected());
        assert!(events.recv().await.is_none());
        assert!(matches!(
            conn.emit("traveler:set_city", &json!({})),
            Err(SocketError::Closed)
        ));
        assert_eq!(server.recv().await, "41/rides,");
    }

    #[tokio::test]
    async fn test_emits_buffer_while_disconnected() {
        let (transport, mut servers) = MockTransport::new();
        let manager = ConnectionManager::new(transport, fast_options());
        let conn = manager.open(Namespace::Rides, Arc::new(ScriptedTokens::new("t")));

        conn.emit("driver:set_online", &json!({"online": true})).unwrap();

        let mut server = next_server(&mut servers).await;
        server.accept("/rides").await;
        assert_eq!(
            server.recv_message().await,
            r#"42/rides,["driver:set_online",{"online":true}]"#
        );
        conn.close().await;
    }

    #[tokio::test]
    async fn test_room_refcount_and_resubscribe() {
        let (transport, mut servers) = MockTransport::new();
        let manager = ConnectionManager::new(transport, fast_options());
        let conn = manager.open(Namespace::Planner, Arc::new(ScriptedTokens::new("t")));
        let mut state = conn.state();

        let mut server = next_server(&mut servers).await;
        server.accept("/planner").await;
        wait_state(&mut state, |s| s.connected).await;

        conn.subscribe_room("s1").unwrap();
        conn.subscribe_room("s1").unwrap();
        assert_eq!(
            server.recv_message().await,
            r#"42/planner,["planner:subscribe",{"session_id":"s1"}]"#
        );

        // Drop the transport; the room is re-joined on the next connect.
        drop(server);
        wait_state(&mut state, |s| !s.connected).await;
        let mut server = next_server(&mut servers).await;
        server.accept("/planner").await;
        assert_eq!(
            server.recv_message().await,
            r#"42/planner,["planner:subscribe",{"session_id":"s1"}]"#
        );

        conn.unsubscribe_room("s1").unwrap();
        conn.unsubscribe_room("s1").unwrap();
        conn.unsubscribe_room("s1").unwrap();
        assert_eq!(
            server.recv_message().await,
            r#"42/planner,["planner:unsubscribe",{"session_id":"s1"}]"#
        );
        assert!(conn.active_rooms().is_empty());

        conn.emit("marker", &json!({})).unwrap();
        assert_eq!(server.recv_message().await, r#"42/planner,["marker",{}]"#);

        assert!(matches!(
            manager
                .open(Namespace::Rides, Arc::new(ScriptedTokens::new("t")))
                .subscribe_room("r1"),
            Err(SocketError::NoRooms(Namespace::Rides))
        ));
        conn.close().await;
    }

    #[tokio::test]
    async fn test_missing_heartbeat_reconnects() {
        let (transport, mut servers) = MockTransport::new();
        let manager = ConnectionManager::new(transport.clone(), fast_options());
        let conn = manager.open(Namespace::Rides, Arc::new(ScriptedTokens::new("t")));
        let mut state = conn.state();

        let mut server = next_server(&mut servers).await;
        server.open(20, 20).await;
        server.recv().await;
        server.send(r#"40/rides,{"sid":"x"}"#).await;
        wait_state(&mut state, |s| s.connected).await;

        // No pings: the client gives up after 40ms and dials again.
        let _again = next_server(&mut servers).await;
        assert_eq!(transport.opens.load(Ordering::SeqCst), 2);
        drop(server);
        conn.close().await;
    }
}
