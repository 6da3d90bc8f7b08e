//! Relay session: one connection, its subscriptions, and the inbound message
//! stream.
//!
//! A session spawns two tasks. The writer owns the outbound half and drains a
//! FIFO of frames, so publishes and subscription changes reach the wire in
//! call order without blocking the caller. The reader owns the inbound half,
//! decodes and routes each frame, and forwards it to the [`Listener`] through
//! a bounded channel.

use std::{
    collections::HashMap,
    fmt,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll},
};

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    event::Event,
    filter::{self, Filter},
    message::{ClientMessage, RelayMessage},
    transport::{self, Connection, FrameSink, FrameStream},
};

/// Default capacity of the inbound channel feeding the listener.
pub const DEFAULT_INBOUND_BUFFER: usize = 1024;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The connection has ended; every operation fails.
    Disconnected,
    /// Handshake in progress. `connect` only returns once it is done.
    Connecting,
    Connected,
    /// `close()` was called; the reader is winding down.
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Connection options.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// SOCKS5 proxy (`host:port`) to dial through, e.g. a local Tor daemon.
    pub socks_proxy: Option<String>,
    /// Capacity of the inbound channel; a full channel pauses reading.
    pub inbound_buffer: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            socks_proxy: None,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
        }
    }
}

/// A caller-identified standing query.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: String,
    pub filters: Vec<Filter>,
}

impl Subscription {
    /// Filters are OR-combined.
    pub fn matches(&self, ev: &Event) -> bool {
        filter::matches_any(&self.filters, ev)
    }
}

/// Why the inbound stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `close()` was called or the session was dropped.
    ClosedByCaller,
    /// The relay closed the connection.
    ClosedByRelay,
    /// The transport failed.
    Transport(String),
}

/// Items yielded by [`Listener`].
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A message for this session: a notice, an `OK`, or a message scoped to an
    /// open subscription.
    Message(RelayMessage),
    /// A subscription-scoped message naming an id that is not open locally,
    /// e.g. an event that crossed our `CLOSE` on the wire.
    Untracked(RelayMessage),
    /// The connection ended. Always the last item.
    Disconnected(DisconnectReason),
}

enum Outbound {
    Frame(String),
    Close,
}

type Subscriptions = Arc<Mutex<HashMap<String, Subscription>>>;
type SharedState = Arc<Mutex<SessionState>>;
/// Why the writer gave up, handed to the reader so the listener reports it.
type Fault = Arc<Mutex<Option<DisconnectReason>>>;

/// One connection to one relay.
pub struct RelaySession {
    url: String,
    state: SharedState,
    subscriptions: Subscriptions,
    outbound: mpsc::UnboundedSender<Outbound>,
    shutdown: Arc<Notify>,
    inbound: Mutex<Option<mpsc::Receiver<Inbound>>>,
}

impl RelaySession {
    /// Connect with default options.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, SessionOptions::default()).await
    }

    /// Perform the WebSocket handshake and start the session.
    pub async fn connect_with(url: &str, options: SessionOptions) -> Result<Self> {
        let state: SharedState = Arc::new(Mutex::new(SessionState::Connecting));
        info!(relay = url, state = %SessionState::Connecting, "connecting to relay");
        match transport::connect(url, options.socks_proxy.as_deref()).await {
            Ok(conn) => Ok(Self::start(url, conn, &options, state)),
            Err(e) => {
                *lock(&state) = SessionState::Disconnected;
                warn!(relay = url, error = %e, "relay handshake failed");
                Err(e)
            }
        }
    }

    /// Start a session over an already established connection. Must be called
    /// from within a tokio runtime.
    pub fn from_connection(url: &str, conn: Connection, options: &SessionOptions) -> Self {
        let state = Arc::new(Mutex::new(SessionState::Connecting));
        Self::start(url, conn, options, state)
    }

    fn start(url: &str, conn: Connection, options: &SessionOptions, state: SharedState) -> Self {
        let subscriptions: Subscriptions = Arc::default();
        let shutdown = Arc::new(Notify::new());
        let fault: Fault = Arc::default();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(options.inbound_buffer.max(1));

        *lock(&state) = SessionState::Connected;
        tokio::spawn(write_loop(
            url.to_string(),
            conn.sink,
            out_rx,
            state.clone(),
            fault.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(read_loop(
            url.to_string(),
            conn.stream,
            in_tx,
            subscriptions.clone(),
            state.clone(),
            fault,
            shutdown.clone(),
        ));
        info!(relay = url, state = %SessionState::Connected, "relay session connected");

        Self {
            url: url.to_string(),
            state,
            subscriptions,
            outbound: out_tx,
            shutdown,
            inbound: Mutex::new(Some(in_rx)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Ids of the subscriptions currently open, sorted.
    pub fn subscription_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.subscriptions).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Send `["EVENT", event]`. The relay's `OK` arrives later on the listener.
    ///
    /// Events that fail verification are refused.
    pub fn publish(&self, event: &Event) -> Result<()> {
        self.ensure_connected()?;
        event.validate()?;
        let frame = ClientMessage::Event(Box::new(event.clone())).to_json()?;
        self.send(frame)?;
        debug!(relay = %self.url, id = %event.id(), "published event");
        Ok(())
    }

    /// Open a subscription and send `["REQ", id, filters...]`.
    ///
    /// At least one filter is required; use [`Filter::new`] to receive
    /// everything.
    pub fn subscribe(&self, id: impl Into<String>, filters: Vec<Filter>) -> Result<()> {
        let id = id.into();
        self.ensure_connected()?;
        if filters.is_empty() {
            return Err(Error::InvalidSubscription(format!(
                "subscription `{id}` has no filters"
            )));
        }
        let mut subs = lock(&self.subscriptions);
        if subs.contains_key(&id) {
            return Err(Error::DuplicateSubscription(id));
        }
        let frame = ClientMessage::Req {
            subscription_id: id.clone(),
            filters: filters.clone(),
        }
        .to_json()?;
        self.send(frame)?;
        debug!(relay = %self.url, subscription = %id, "subscription opened");
        subs.insert(id.clone(), Subscription { id, filters });
        Ok(())
    }

    /// Send `["CLOSE", id]` and forget the subscription without waiting for the
    /// relay.
    pub fn unsubscribe(&self, id: &str) -> Result<()> {
        self.ensure_connected()?;
        let mut subs = lock(&self.subscriptions);
        self.send(ClientMessage::Close(id.to_string()).to_json()?)?;
        if subs.remove(id).is_none() {
            debug!(
                relay = %self.url,
                subscription = id,
                "closing subscription not tracked locally"
            );
        }
        Ok(())
    }

    /// Take the inbound message stream.
    ///
    /// The stream is not restartable: only the first call receives messages,
    /// later calls get a stream that is already finished.
    pub fn listen(&self) -> Listener {
        Listener {
            rx: lock(&self.inbound).take(),
        }
    }

    /// Close the connection gracefully and end the listener promptly.
    pub fn close(&self) {
        {
            let mut state = lock(&self.state);
            if *state != SessionState::Connected {
                return;
            }
            *state = SessionState::Closing;
        }
        info!(relay = %self.url, "closing relay session");
        let _ = self.outbound.send(Outbound::Close);
        self.shutdown.notify_one();
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state() {
            SessionState::Connected => Ok(()),
            other => Err(Error::Connection(format!("session is {other}"))),
        }
    }

    fn send(&self, frame: String) -> Result<()> {
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| Error::Connection("outbound queue closed".into()))
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        let _ = self.outbound.send(Outbound::Close);
        self.shutdown.notify_one();
    }
}

/// Pull-based stream of inbound messages, in arrival order. Ends after
/// yielding [`Inbound::Disconnected`].
pub struct Listener {
    rx: Option<mpsc::Receiver<Inbound>>,
}

impl Stream for Listener {
    type Item = Inbound;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Inbound>> {
        match self.get_mut().rx.as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

async fn write_loop(
    url: String,
    mut sink: FrameSink,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    state: SharedState,
    fault: Fault,
    shutdown: Arc<Notify>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Outbound::Frame(frame) => {
                debug!(relay = %url, frame = %frame, "sending frame");
                if let Err(e) = sink.send(frame).await {
                    warn!(relay = %url, error = %e, "send failed, ending session");
                    *lock(&fault) = Some(DisconnectReason::Transport(e.to_string()));
                    *lock(&state) = SessionState::Disconnected;
                    shutdown.notify_one();
                    return;
                }
            }
            Outbound::Close => break,
        }
    }
    if let Err(e) = sink.close().await {
        debug!(relay = %url, error = %e, "error while closing connection");
    }
}

async fn read_loop(
    url: String,
    mut stream: FrameStream,
    tx: mpsc::Sender<Inbound>,
    subscriptions: Subscriptions,
    state: SharedState,
    fault: Fault,
    shutdown: Arc<Notify>,
) {
    // Woken either by `close()`/drop or by the writer after a failed send.
    let stopped = || lock(&fault).take().unwrap_or(DisconnectReason::ClosedByCaller);
    let reason = loop {
        let frame = tokio::select! {
            _ = shutdown.notified() => break stopped(),
            frame = stream.next() => frame,
        };
        let text = match frame {
            Some(Ok(text)) => text,
            Some(Err(e)) => break DisconnectReason::Transport(e.to_string()),
            None => break DisconnectReason::ClosedByRelay,
        };
        debug!(relay = %url, frame = %text, "received frame");
        let Some(item) = dispatch(&url, &text, &subscriptions) else {
            continue;
        };
        tokio::select! {
            _ = shutdown.notified() => break stopped(),
            res = tx.send(item) => {
                if res.is_err() {
                    debug!(relay = %url, "listener dropped, discarding message");
                }
            }
        }
    };
    *lock(&state) = SessionState::Disconnected;
    info!(relay = %url, reason = ?reason, "relay session disconnected");
    let _ = tx.send(Inbound::Disconnected(reason)).await;
}

enum Route {
    Deliver,
    Untracked,
    Drop,
}

/// Decode one frame and decide how (and whether) it reaches the listener.
fn dispatch(
    url: &str,
    text: &str,
    subscriptions: &Mutex<HashMap<String, Subscription>>,
) -> Option<Inbound> {
    let msg = match RelayMessage::from_json(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(relay = url, error = %e, "dropping malformed frame");
            return None;
        }
    };
    let route = {
        let mut subs = lock(subscriptions);
        match &msg {
            RelayMessage::Unknown { tag, .. } => {
                warn!(relay = url, tag = %tag, "skipping unrecognized relay message");
                Route::Drop
            }
            RelayMessage::Event {
                subscription_id,
                event,
            } => match (event.validate(), subs.get(subscription_id)) {
                (Err(e), _) => {
                    warn!(
                        relay = url,
                        subscription = %subscription_id,
                        error = %e,
                        "dropping invalid event"
                    );
                    Route::Drop
                }
                (Ok(()), Some(sub)) if sub.matches(event) => Route::Deliver,
                (Ok(()), Some(_)) => {
                    warn!(
                        relay = url,
                        subscription = %subscription_id,
                        id = %event.id(),
                        "dropping event that matches none of the subscription filters"
                    );
                    Route::Drop
                }
                (Ok(()), None) => Route::Untracked,
            },
            RelayMessage::EndOfStoredEvents(subscription_id) => {
                if subs.contains_key(subscription_id) {
                    Route::Deliver
                } else {
                    Route::Untracked
                }
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                if subs.remove(subscription_id).is_some() {
                    info!(
                        relay = url,
                        subscription = %subscription_id,
                        message = %message,
                        "relay closed subscription"
                    );
                    Route::Deliver
                } else {
                    Route::Untracked
                }
            }
            RelayMessage::Ok { .. } | RelayMessage::Notice(_) => Route::Deliver,
        }
    };
    match route {
        Route::Deliver => Some(Inbound::Message(msg)),
        Route::Untracked => Some(Inbound::Untracked(msg)),
        Route::Drop => None,
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::{create_note, Tag},
        keys::SecretKey,
    };
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::Message as TMsg, WebSocketStream};

    type ServerWs = WebSocketStream<tokio::net::TcpStream>;

    fn sample_event(content: &str, created_at: u64) -> Event {
        create_note(content)
            .created_at(created_at)
            .tag(Tag::new(["t", "test"]))
            .finalize(&SecretKey::from_bytes(&[1u8; 32]).unwrap())
            .unwrap()
    }

    /// Bind a loopback relay and run `script` against the first client.
    async fn relay<F, Fut>(script: F) -> (String, tokio::task::JoinHandle<()>)
    where
        F: FnOnce(ServerWs) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            script(ws).await;
        });
        (format!("ws://{addr}"), handle)
    }

    async fn recv_json(ws: &mut ServerWs) -> Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                TMsg::Text(txt) => return serde_json::from_str(&txt).unwrap(),
                TMsg::Close(_) => panic!("client closed"),
                _ => continue,
            }
        }
    }

    async fn send_json(ws: &mut ServerWs, val: Value) {
        ws.send(TMsg::Text(val.to_string())).await.unwrap();
    }

    async fn next(listener: &mut Listener) -> Inbound {
        tokio::time::timeout(Duration::from_secs(5), listener.next())
            .await
            .expect("timed out waiting for inbound message")
            .expect("listener ended")
    }

    #[tokio::test]
    async fn subscription_receives_matching_event() {
        let ev = sample_event("hello", 10);
        let ev_clone = ev.clone();
        let (url, server) = relay(move |mut ws| async move {
            let req = recv_json(&mut ws).await;
            assert_eq!(req, json!(["REQ", "all", {"since": 5}]));
            send_json(&mut ws, json!(["EVENT", "all", ev_clone])).await;
            send_json(&mut ws, json!(["EOSE", "all"])).await;
            let _ = ws.next().await;
        })
        .await;

        let session = RelaySession::connect(&url).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        let mut listener = session.listen();
        session.subscribe("all", vec![Filter::new().since(5)]).unwrap();

        match next(&mut listener).await {
            Inbound::Message(RelayMessage::Event {
                subscription_id,
                event,
            }) => {
                assert_eq!(subscription_id, "all");
                assert_eq!(*event, ev);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            next(&mut listener).await,
            Inbound::Message(RelayMessage::EndOfStoredEvents("all".into()))
        );
        session.close();
        server.abort();
    }

    #[tokio::test]
    async fn duplicate_subscription_is_rejected() {
        let (url, server) = relay(|mut ws| async move {
            while let Some(Ok(msg)) = ws.next().await {
                if matches!(msg, TMsg::Close(_)) {
                    break;
                }
            }
        })
        .await;
        let session = RelaySession::connect(&url).await.unwrap();
        session.subscribe("x", vec![Filter::new()]).unwrap();
        assert!(matches!(
            session.subscribe("x", vec![Filter::new().kinds([1])]),
            Err(Error::DuplicateSubscription(id)) if id == "x"
        ));
        session.unsubscribe("x").unwrap();
        assert!(session.subscription_ids().is_empty());
        session.subscribe("x", vec![Filter::new()]).unwrap();
        assert_eq!(session.subscription_ids(), vec!["x".to_string()]);
        session.close();
        server.abort();
    }

    #[tokio::test]
    async fn outbound_frames_keep_call_order() {
        let ev = sample_event("publish me", 3);
        let expected_event = serde_json::to_value(&ev).unwrap();
        let (url, server) = relay(move |mut ws| async move {
            assert_eq!(recv_json(&mut ws).await, json!(["EVENT", expected_event]));
            assert_eq!(recv_json(&mut ws).await, json!(["REQ", "a", {"kinds": [1]}]));
            assert_eq!(recv_json(&mut ws).await, json!(["CLOSE", "a"]));
            send_json(&mut ws, json!(["NOTICE", "done"])).await;
            let _ = ws.next().await;
        })
        .await;
        let session = RelaySession::connect(&url).await.unwrap();
        let mut listener = session.listen();
        session.publish(&ev).unwrap();
        session.subscribe("a", vec![Filter::new().kinds([1])]).unwrap();
        session.unsubscribe("a").unwrap();
        assert_eq!(
            next(&mut listener).await,
            Inbound::Message(RelayMessage::Notice("done".into()))
        );
        session.close();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn publish_refuses_tampered_event() {
        let (url, server) = relay(|mut ws| async move {
            let _ = ws.next().await;
        })
        .await;
        let session = RelaySession::connect(&url).await.unwrap();
        let mut val = serde_json::to_value(sample_event("original", 1)).unwrap();
        val["content"] = "forged".into();
        let forged: Event = serde_json::from_value(val).unwrap();
        assert!(matches!(
            session.publish(&forged),
            Err(Error::InvalidEvent(_))
        ));
        session.close();
        server.abort();
    }

    #[tokio::test]
    async fn ok_response_is_delivered() {
        let ev = sample_event("ack me", 4);
        let (url, server) = relay(|mut ws| async move {
            let frame = recv_json(&mut ws).await;
            let id = frame[1]["id"].as_str().unwrap().to_string();
            send_json(&mut ws, json!(["OK", id, true, ""])).await;
            let _ = ws.next().await;
        })
        .await;
        let session = RelaySession::connect(&url).await.unwrap();
        let mut listener = session.listen();
        session.publish(&ev).unwrap();
        assert_eq!(
            next(&mut listener).await,
            Inbound::Message(RelayMessage::Ok {
                event_id: *ev.id(),
                accepted: true,
                message: String::new(),
            })
        );
        session.close();
        server.abort();
    }

    #[tokio::test]
    async fn unknown_subscription_is_delivered_untracked() {
        let ev = sample_event("stray", 1);
        let (url, server) = relay(move |mut ws| async move {
            send_json(&mut ws, json!(["EVENT", "unknown-id", ev])).await;
            send_json(&mut ws, json!(["EOSE", "unknown-id"])).await;
            let _ = ws.next().await;
        })
        .await;
        let session = RelaySession::connect(&url).await.unwrap();
        let mut listener = session.listen();
        match next(&mut listener).await {
            Inbound::Untracked(RelayMessage::Event {
                subscription_id, ..
            }) => assert_eq!(subscription_id, "unknown-id"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            next(&mut listener).await,
            Inbound::Untracked(RelayMessage::EndOfStoredEvents(_))
        ));
        session.close();
        server.abort();
    }

    #[tokio::test]
    async fn event_racing_close_is_untracked_after_unsubscribe() {
        let before = sample_event("before close", 1);
        let after = sample_event("after close", 2);
        let (url, server) = relay(move |mut ws| async move {
            assert_eq!(recv_json(&mut ws).await[0], "REQ");
            send_json(&mut ws, json!(["EVENT", "x", before])).await;
            assert_eq!(recv_json(&mut ws).await, json!(["CLOSE", "x"]));
            send_json(&mut ws, json!(["EVENT", "x", after])).await;
            let _ = ws.next().await;
        })
        .await;
        let session = RelaySession::connect(&url).await.unwrap();
        let mut listener = session.listen();
        session.subscribe("x", vec![Filter::new()]).unwrap();
        assert!(matches!(
            next(&mut listener).await,
            Inbound::Message(RelayMessage::Event { .. })
        ));
        session.unsubscribe("x").unwrap();
        match next(&mut listener).await {
            Inbound::Untracked(RelayMessage::Event { event, .. }) => {
                assert_eq!(event.content(), "after close")
            }
            other => panic!("unexpected {other:?}"),
        }
        session.close();
        server.abort();
    }

    #[tokio::test]
    async fn bad_frames_are_skipped_and_session_continues() {
        let good = sample_event("good", 1);
        let mut forged = serde_json::to_value(sample_event("signed", 1)).unwrap();
        forged["content"] = "forged".into();
        let off_filter = create_note("kind 7")
            .kind(7)
            .created_at(1)
            .finalize(&SecretKey::from_bytes(&[2u8; 32]).unwrap())
            .unwrap();
        let (url, server) = relay(move |mut ws| async move {
            let _ = recv_json(&mut ws).await;
            ws.send(TMsg::Text("not json".into())).await.unwrap();
            send_json(&mut ws, json!(["EVENT", "s"])).await;
            send_json(&mut ws, json!(["AUTH", "challenge"])).await;
            send_json(&mut ws, json!(["EVENT", "s", forged])).await;
            send_json(&mut ws, json!(["EVENT", "s", off_filter])).await;
            send_json(&mut ws, json!(["EVENT", "s", good])).await;
            let _ = ws.next().await;
        })
        .await;
        let session = RelaySession::connect(&url).await.unwrap();
        let mut listener = session.listen();
        session.subscribe("s", vec![Filter::new().kinds([1])]).unwrap();
        match next(&mut listener).await {
            Inbound::Message(RelayMessage::Event { event, .. }) => {
                assert_eq!(event.content(), "good")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Connected);
        session.close();
        server.abort();
    }

    #[tokio::test]
    async fn relay_closed_subscription_is_forgotten() {
        let (url, server) = relay(|mut ws| async move {
            let _ = recv_json(&mut ws).await;
            send_json(&mut ws, json!(["CLOSED", "q", "error: too many"])).await;
            let _ = ws.next().await;
        })
        .await;
        let session = RelaySession::connect(&url).await.unwrap();
        let mut listener = session.listen();
        session.subscribe("q", vec![Filter::new()]).unwrap();
        assert_eq!(
            next(&mut listener).await,
            Inbound::Message(RelayMessage::Closed {
                subscription_id: "q".into(),
                message: "error: too many".into(),
            })
        );
        assert!(session.subscription_ids().is_empty());
        session.close();
        server.abort();
    }

    #[tokio::test]
    async fn relay_disconnect_ends_listener_once() {
        let (url, server) = relay(|mut ws| async move {
            send_json(&mut ws, json!(["NOTICE", "bye"])).await;
            ws.close(None).await.unwrap();
        })
        .await;
        let session = RelaySession::connect(&url).await.unwrap();
        let mut listener = session.listen();
        assert_eq!(
            next(&mut listener).await,
            Inbound::Message(RelayMessage::Notice("bye".into()))
        );
        assert_eq!(
            next(&mut listener).await,
            Inbound::Disconnected(DisconnectReason::ClosedByRelay)
        );
        assert!(listener.next().await.is_none());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.subscribe("late", vec![Filter::new()]),
            Err(Error::Connection(_))
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn close_ends_listener_promptly() {
        let (url, server) = relay(|mut ws| async move {
            // Never answer; just hold the socket open.
            while ws.next().await.is_some() {}
        })
        .await;
        let session = RelaySession::connect(&url).await.unwrap();
        let mut listener = session.listen();
        session.close();
        assert_eq!(
            next(&mut listener).await,
            Inbound::Disconnected(DisconnectReason::ClosedByCaller)
        );
        assert!(listener.next().await.is_none());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.publish(&sample_event("late", 1)),
            Err(Error::Connection(_))
        ));
        server.abort();
    }

    #[tokio::test]
    async fn listen_is_not_restartable() {
        let (url, server) = relay(|mut ws| async move {
            let _ = ws.next().await;
        })
        .await;
        let session = RelaySession::connect(&url).await.unwrap();
        let _first = session.listen();
        let mut second = session.listen();
        assert!(second.next().await.is_none());
        session.close();
        server.abort();
    }

    #[tokio::test]
    async fn runs_over_any_frame_transport() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<String>>();
        let sink = futures_util::sink::unfold(out_tx, |tx, frame: String| async move {
            tx.send(frame)
                .map_err(|_| Error::Connection("closed".into()))?;
            Ok::<_, Error>(tx)
        });
        let stream = futures_util::stream::unfold(in_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let session = RelaySession::from_connection(
            "memory://relay",
            Connection::new(sink, stream),
            &SessionOptions::default(),
        );
        assert_eq!(session.url(), "memory://relay");
        let mut listener = session.listen();

        session.subscribe("m", vec![Filter::new()]).unwrap();
        assert_eq!(out_rx.recv().await.unwrap(), r#"["REQ","m",{}]"#);
        in_tx.send(Ok(r#"["EOSE","m"]"#.into())).unwrap();
        assert_eq!(
            next(&mut listener).await,
            Inbound::Message(RelayMessage::EndOfStoredEvents("m".into()))
        );

        in_tx
            .send(Err(Error::Connection("reset by peer".into())))
            .unwrap();
        match next(&mut listener).await {
            Inbound::Disconnected(DisconnectReason::Transport(reason)) => {
                assert!(reason.contains("reset by peer"))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(listener.next().await.is_none());
    }

    #[tokio::test]
    async fn send_failure_ends_the_session() {
        let sink = futures_util::sink::unfold((), |(), _frame: String| async move {
            Err::<(), _>(Error::Connection("broken pipe".into()))
        });
        let (_in_tx, in_rx) = mpsc::unbounded_channel::<Result<String>>();
        let stream = futures_util::stream::unfold(in_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let session = RelaySession::from_connection(
            "memory://relay",
            Connection::new(sink, stream),
            &SessionOptions::default(),
        );
        assert_eq!(session.state(), SessionState::Connected);
        let mut listener = session.listen();

        session.publish(&sample_event("lost", 1)).unwrap();
        match next(&mut listener).await {
            Inbound::Disconnected(DisconnectReason::Transport(reason)) => {
                assert!(reason.contains("broken pipe"))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(listener.next().await.is_none());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.subscribe("late", vec![Filter::new()]),
            Err(Error::Connection(_))
        ));
    }

    #[tokio::test]
    async fn empty_filter_list_is_rejected() {
        let (url, server) = relay(|mut ws| async move {
            assert_eq!(recv_json(&mut ws).await, json!(["REQ", "ok", {}]));
            let _ = ws.next().await;
        })
        .await;
        let session = RelaySession::connect(&url).await.unwrap();
        assert!(matches!(
            session.subscribe("none", Vec::new()),
            Err(Error::InvalidSubscription(_))
        ));
        assert!(session.subscription_ids().is_empty());
        session.subscribe("ok", vec![Filter::new()]).unwrap();
        session.close();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn failed_handshake_is_a_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let res = RelaySession::connect(&format!("ws://{addr}")).await;
        assert!(matches!(res, Err(Error::Connection(_))));
    }
}
