//! Relay client: one WebSocket, many subscriptions.
//!
//! A `Client` owns a single relay connection. Outbound frames are serialized
//! through a writer task; a reader task parses inbound frames and routes them
//! to the subscription registry. Query results are handed to callers as
//! backpressure-free streams backed by unbounded channels, so a slow consumer
//! grows memory at the client rather than losing data.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::event::{verify_event, Event, KIND_METADATA};
use crate::filter::Filter;
use crate::message::{ClientMessage, RelayMessage};
use crate::sync;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Hooks observing connection traffic. Every hook defaults to a no-op, so a
/// listener implements only what it cares about.
pub trait Listener: Send + Sync {
    fn sent_message(&self, _msg: &ClientMessage) {}
    fn got_message(&self, _msg: &RelayMessage) {}
    fn connection_closed(&self) {}
}

/// Registry entry for one live subscription. Lifecycle is structural: open
/// while in the map with an open sender, EOSE-seen once the sender is
/// closed, closed once removed.
struct SubEntry {
    sender: sync::Sender<RelayMessage>,
}

struct State {
    closed: bool,
    next_sub_id: u64,
    next_listener_id: u64,
    subs: HashMap<String, SubEntry>,
    listeners: Vec<(u64, Arc<dyn Listener>)>,
}

impl State {
    fn new() -> Self {
        State {
            closed: false,
            next_sub_id: 0,
            next_listener_id: 0,
            subs: HashMap::new(),
            listeners: Vec::new(),
        }
    }

    /// Copy the listener list so hooks may add or remove listeners while the
    /// connection iterates over it.
    fn listeners_snapshot(&self) -> Vec<Arc<dyn Listener>> {
        self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

struct Inner {
    url: String,
    out_tx: mpsc::UnboundedSender<Message>,
    state: Mutex<State>,
}

/// Connection to a single relay. Cheap to clone; all clones share the socket.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Connect to a relay at a `ws://` or `wss://` URL.
    pub async fn connect(url: &str) -> Result<Client> {
        let parsed = url::Url::parse(url)?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(Error::Config(format!(
                "relay url must use ws:// or wss://, got {url}"
            )));
        }
        let (ws, _) = connect_async(url).await?;
        info!(url, "connected to relay");
        let (ws_tx, ws_rx) = ws.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            url: url.to_string(),
            out_tx,
            state: Mutex::new(State::new()),
        });
        tokio::spawn(write_loop(ws_tx, out_rx));
        tokio::spawn(read_loop(Arc::clone(&inner), ws_rx));
        Ok(Client { inner })
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().expect("client lock").closed
    }

    /// Close the connection. Idempotent; pending operations resolve with
    /// `ConnectionClosed` and all open subscription streams end.
    pub fn close(&self) {
        let _ = self.inner.out_tx.send(Message::Close(None));
        self.inner.teardown();
    }

    /// Register a listener; returns a token for `remove_listener`.
    pub fn add_listener(&self, listener: Arc<dyn Listener>) -> u64 {
        let mut st = self.inner.state.lock().expect("client lock");
        st.next_listener_id += 1;
        let id = st.next_listener_id;
        st.listeners.push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: u64) {
        let mut st = self.inner.state.lock().expect("client lock");
        st.listeners.retain(|(lid, _)| *lid != id);
    }

    /// Encode and queue an outbound frame, then notify listeners.
    fn send(&self, msg: ClientMessage) -> Result<()> {
        let listeners = {
            let st = self.inner.state.lock().expect("client lock");
            if st.closed {
                return Err(Error::ConnectionNotOpen);
            }
            st.listeners_snapshot()
        };
        self.inner
            .out_tx
            .send(Message::Text(msg.encode()))
            .map_err(|_| Error::ConnectionNotOpen)?;
        for l in listeners {
            l.sent_message(&msg);
        }
        Ok(())
    }

    /// Allocate a subscription id and its delivery channel.
    fn open_sub(&self, close_on_drop: bool) -> Result<(String, sync::Receiver<RelayMessage>, SubGuard)> {
        let (tx, rx) = sync::channel();
        let mut st = self.inner.state.lock().expect("client lock");
        if st.closed {
            return Err(Error::ConnectionNotOpen);
        }
        st.next_sub_id += 1;
        let sub_id = st.next_sub_id.to_string();
        st.subs.insert(sub_id.clone(), SubEntry { sender: tx });
        let guard = SubGuard {
            inner: Arc::clone(&self.inner),
            sub_id: sub_id.clone(),
            close_on_drop,
        };
        Ok((sub_id, rx, guard))
    }

    /// Subscribe and stream results.
    ///
    /// The stream yields stored events, then an `Eose` marker, then ends;
    /// dropping it at any point closes the subscription on the relay.
    pub fn query(&self, filters: Vec<Filter>) -> Result<QueryStream> {
        let (sub_id, rx, guard) = self.open_sub(true)?;
        self.send(ClientMessage::Req { sub_id, filters })?;
        Ok(QueryStream { rx, _guard: guard })
    }

    /// Stream every stored event matching `filter`, paging past per-relay
    /// response caps. The filter's `limit` bounds the total yield.
    pub fn query_saved(&self, filter: Filter) -> SavedQuery {
        let requested = filter.limit.unwrap_or(u64::MAX);
        SavedQuery {
            client: self.clone(),
            filter,
            requested,
            yielded: 0,
            cur: None,
            batch_events: 0,
            batch_min: None,
            next_until: None,
            done: false,
        }
    }

    /// First stored event matching `filter`, or `None`.
    pub async fn query_one(&self, filter: Filter) -> Result<Option<Event>> {
        self.query_saved(filter.limit(1)).next().await
    }

    /// Collect every stored event matching `filter`.
    pub async fn query_simple(&self, filter: Filter) -> Result<Vec<Event>> {
        let mut saved = self.query_saved(filter);
        let mut events = Vec::new();
        while let Some(ev) = saved.next().await? {
            events.push(ev);
        }
        Ok(events)
    }

    /// Latest profile (kind 0) event for a pubkey.
    pub async fn get_profile(&self, pubkey: &str) -> Result<Option<Event>> {
        self.query_one(Filter::new().authors([pubkey]).kinds([KIND_METADATA]))
            .await
    }

    /// Ask the relay for a match count (NIP-45).
    ///
    /// Callers should gate this on the relay's `supported_nips` advertising
    /// 45; relays without it typically answer with NOTICE or CLOSED.
    pub async fn query_count(&self, filters: Vec<Filter>) -> Result<u64> {
        // COUNT replies are one-shot; the registry entry is dropped without
        // sending a CLOSE frame.
        let (sub_id, mut rx, _guard) = self.open_sub(false)?;
        self.send(ClientMessage::Count { sub_id, filters })?;
        loop {
            match rx.recv().await {
                Some(RelayMessage::Count { count, .. }) => return Ok(count),
                Some(RelayMessage::Closed { message, .. }) => {
                    return Err(Error::Protocol(format!("count rejected: {message}")))
                }
                Some(_) => continue,
                None => {
                    return Err(Error::Protocol(
                        "subscription ended without a COUNT reply".into(),
                    ))
                }
            }
        }
    }

    /// `query_count` gated on the relay's information document: returns
    /// `None` without issuing COUNT when the relay does not list NIP 45.
    pub async fn query_count_opt(&self, filters: Vec<Filter>) -> Result<Option<u64>> {
        let info = match crate::relay_info::fetch_relay_info(self.url()).await {
            Ok(info) => info,
            Err(e) => {
                debug!(url = %self.inner.url, error = %e, "relay info unavailable");
                return Ok(None);
            }
        };
        if !info.supports(45) {
            return Ok(None);
        }
        self.query_count(filters).await.map(Some)
    }

    /// Publish an event and wait for the relay's OK verdict.
    ///
    /// Some relays answer duplicates with `["OK", id, false, "duplicate: …"]`
    /// where NIP-01 says `true`; both shapes are treated as success with
    /// `is_duplicate` set.
    pub async fn publish(&self, event: Event) -> Result<PublishAck> {
        let (handle, pending) = sync::completion();
        let listener = Arc::new(OkListener {
            event_id: event.id.clone(),
            handle,
        });
        let guard = ListenerGuard {
            inner: Arc::clone(&self.inner),
            id: self.add_listener(listener),
        };
        self.send(ClientMessage::Event(event))?;
        let ack = pending.wait().await??;
        drop(guard);
        Ok(ack)
    }

    /// `publish` that never fails: errors become flags.
    pub async fn try_publish(&self, event: Event) -> PublishOutcome {
        let id = event.id.clone();
        match self.publish(event).await {
            Ok(ack) => PublishOutcome {
                published: true,
                is_duplicate: ack.is_duplicate,
                had_error: false,
            },
            Err(e) => {
                warn!(url = %self.inner.url, event = %id, error = %e, "publish failed");
                PublishOutcome {
                    published: false,
                    is_duplicate: false,
                    had_error: true,
                }
            }
        }
    }
}

/// Successful publish verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    pub is_duplicate: bool,
}

/// Outcome of `try_publish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub published: bool,
    pub is_duplicate: bool,
    pub had_error: bool,
}

/// One-shot listener resolving a publish once the matching OK arrives.
struct OkListener {
    event_id: String,
    handle: sync::CompletionHandle<Result<PublishAck>>,
}

impl Listener for OkListener {
    fn got_message(&self, msg: &RelayMessage) {
        if let RelayMessage::Ok {
            event_id,
            accepted,
            message,
        } = msg
        {
            if *event_id == self.event_id {
                let is_duplicate = message.starts_with("duplicate:");
                let verdict = if *accepted || is_duplicate {
                    Ok(PublishAck { is_duplicate })
                } else {
                    Err(Error::PublishRejected(message.clone()))
                };
                self.handle.resolve(verdict);
            }
        }
    }

    fn connection_closed(&self) {
        self.handle.resolve(Err(Error::ConnectionClosed));
    }
}

/// Removes a publish listener on every exit path, including cancellation.
struct ListenerGuard {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        let mut st = self.inner.state.lock().expect("client lock");
        st.listeners.retain(|(lid, _)| *lid != self.id);
    }
}

/// Item yielded by `Client::query`.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryItem {
    Event(Event),
    /// End of stored events; everything after this would be live.
    Eose,
}

/// Stream of results for one subscription. Dropping it unregisters the
/// subscription and sends CLOSE to the relay.
pub struct QueryStream {
    rx: sync::Receiver<RelayMessage>,
    _guard: SubGuard,
}

impl QueryStream {
    pub async fn next(&mut self) -> Option<QueryItem> {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                RelayMessage::Event { event, .. } => return Some(QueryItem::Event(event)),
                RelayMessage::Eose { .. } => return Some(QueryItem::Eose),
                RelayMessage::Closed { sub_id, message } => {
                    warn!(%sub_id, %message, "subscription closed by relay");
                    return None;
                }
                _ => continue,
            }
        }
        None
    }
}

/// Paged reader over a relay's stored events.
///
/// Relays cap how many events a single REQ returns. After each EOSE the
/// reader re-issues the filter with `until` set to one second below the
/// previous batch's minimum `created_at`. Events sharing the boundary
/// timestamp would be skipped by a strict cursor, so paging continues until
/// a batch collapses to at most one event (the boundary duplicate). Pages
/// are not deduplicated here; callers that care keep their own set.
pub struct SavedQuery {
    client: Client,
    filter: Filter,
    requested: u64,
    yielded: u64,
    cur: Option<QueryStream>,
    batch_events: u64,
    batch_min: Option<u64>,
    next_until: Option<u64>,
    done: bool,
}

impl SavedQuery {
    pub async fn next(&mut self) -> Result<Option<Event>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if self.cur.is_none() {
                let mut filter = self.filter.clone();
                if let Some(until) = self.next_until {
                    filter.until = Some(until);
                }
                self.batch_events = 0;
                self.batch_min = None;
                match self.client.query(vec![filter]) {
                    Ok(stream) => self.cur = Some(stream),
                    Err(e) => {
                        self.done = true;
                        return Err(e);
                    }
                }
            }
            let stream = self.cur.as_mut().expect("current page");
            match stream.next().await {
                Some(QueryItem::Event(ev)) => {
                    self.batch_events += 1;
                    self.batch_min = Some(match self.batch_min {
                        Some(min) => min.min(ev.created_at),
                        None => ev.created_at,
                    });
                    if self.yielded >= self.requested {
                        warn!(
                            url = %self.client.inner.url,
                            requested = self.requested,
                            "relay returned more events than requested; stopping"
                        );
                        self.done = true;
                        self.cur = None;
                        return Ok(None);
                    }
                    self.yielded += 1;
                    return Ok(Some(ev));
                }
                Some(QueryItem::Eose) | None => {
                    // Dropping the page stream sends CLOSE for it.
                    self.cur = None;
                    if self.batch_events <= 1 || self.yielded >= self.requested {
                        self.done = true;
                        return Ok(None);
                    }
                    let min = self.batch_min.expect("batch with events has a minimum");
                    self.next_until = Some(min.saturating_sub(1));
                }
            }
        }
    }
}

/// Unregisters a subscription when its consumer goes away.
struct SubGuard {
    inner: Arc<Inner>,
    sub_id: String,
    close_on_drop: bool,
}

impl Drop for SubGuard {
    fn drop(&mut self) {
        let (entry, closed, listeners) = {
            let mut st = self.inner.state.lock().expect("client lock");
            (st.subs.remove(&self.sub_id), st.closed, st.listeners_snapshot())
        };
        // Absent entry means the relay already sent CLOSED or the connection
        // tore down; local close is then a no-op.
        let Some(entry) = entry else { return };
        entry.sender.close();
        if self.close_on_drop && !closed {
            let msg = ClientMessage::Close {
                sub_id: self.sub_id.clone(),
            };
            if self
                .inner
                .out_tx
                .send(Message::Text(msg.encode()))
                .is_ok()
            {
                for l in listeners {
                    l.sent_message(&msg);
                }
            }
        }
    }
}

impl Inner {
    /// Route one inbound frame: registry first, then the listener list.
    fn dispatch(&self, msg: RelayMessage) {
        match &msg {
            RelayMessage::Notice { message } => {
                info!(url = %self.url, notice = %message, "relay notice");
            }
            RelayMessage::Event { event, .. } => {
                if !verify_event(event) {
                    // Keep streaming: relays may serve events they never
                    // verified, but the operator should see it.
                    eprintln!(
                        "!!! INVALID SIGNATURE on event {} from {} !!!",
                        event.id, self.url
                    );
                }
            }
            _ => {}
        }
        let (target, listeners) = {
            let mut st = self.state.lock().expect("client lock");
            let target = match (&msg, msg.sub_id()) {
                // Remove before delivery so a racing local close is a no-op.
                (RelayMessage::Closed { .. }, Some(sub_id)) => {
                    st.subs.remove(sub_id).map(|e| e.sender)
                }
                (_, Some(sub_id)) => st.subs.get(sub_id).map(|e| e.sender.clone()),
                (_, None) => None,
            };
            (target, st.listeners_snapshot())
        };
        if let Some(sender) = target {
            let ends_channel =
                matches!(msg, RelayMessage::Eose { .. } | RelayMessage::Closed { .. });
            if sender.send(msg.clone()).is_err() {
                debug!(url = %self.url, "subscription consumer gone");
            }
            if ends_channel {
                sender.close();
            }
        }
        for l in listeners {
            l.got_message(&msg);
        }
    }

    /// Mark closed, end every subscription stream, notify listeners.
    /// Idempotent: only the first call does anything.
    fn teardown(&self) {
        let (senders, listeners) = {
            let mut st = self.state.lock().expect("client lock");
            if st.closed {
                return;
            }
            st.closed = true;
            let senders: Vec<_> = st.subs.drain().map(|(_, e)| e.sender).collect();
            (senders, st.listeners_snapshot())
        };
        for s in senders {
            s.close();
        }
        for l in listeners {
            l.connection_closed();
        }
        info!(url = %self.url, "connection closed");
    }
}

/// Forward queued frames to the socket until it closes.
async fn write_loop(
    mut ws_tx: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        if ws_tx.send(msg).await.is_err() || is_close {
            break;
        }
    }
    let _ = ws_tx.close().await;
}

/// Parse and dispatch inbound frames until the socket closes.
async fn read_loop(inner: Arc<Inner>, mut ws_rx: SplitStream<WsStream>) {
    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => match RelayMessage::decode(&text) {
                Ok(msg) => inner.dispatch(msg),
                Err(e) => {
                    // A relay that sends garbage is unrecoverable.
                    warn!(url = %inner.url, error = %e, "undecodable frame, closing");
                    break;
                }
            },
            Ok(Message::Ping(data)) => {
                let _ = inner.out_tx.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(url = %inner.url, error = %e, "websocket error");
                break;
            }
        }
    }
    inner.teardown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::{accept_async, tungstenite::Message as TMsg};

    fn sample_event(id: &str, created_at: u64) -> Event {
        Event {
            id: id.into(),
            pubkey: "p1".into(),
            kind: 1,
            created_at,
            tags: vec![Tag::new(["t", "x"])],
            content: String::new(),
            sig: String::new(),
        }
    }

    /// Accept one connection and run `serve` over it.
    async fn one_shot_relay<F, Fut>(serve: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            serve(ws).await;
        });
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn query_yields_events_then_eose_then_ends() {
        let url = one_shot_relay(|mut ws| async move {
            let req = ws.next().await.unwrap().unwrap();
            let msg = ClientMessage::decode(req.to_text().unwrap()).unwrap();
            let sub_id = match msg {
                ClientMessage::Req { sub_id, .. } => sub_id,
                other => panic!("expected REQ, got {other:?}"),
            };
            for (id, ts) in [("aa11", 1), ("bb22", 2)] {
                let frame = RelayMessage::Event {
                    sub_id: sub_id.clone(),
                    event: sample_event(id, ts),
                }
                .encode();
                ws.send(TMsg::Text(frame)).await.unwrap();
            }
            ws.send(TMsg::Text(RelayMessage::Eose { sub_id }.encode()))
                .await
                .unwrap();
            // Hold the socket open so the stream end comes from EOSE, not
            // connection teardown.
            let _ = ws.next().await;
        })
        .await;

        let client = Client::connect(&url).await.unwrap();
        let mut stream = client.query(vec![Filter::new().kinds([1])]).unwrap();
        let mut ids = vec![];
        loop {
            match stream.next().await {
                Some(QueryItem::Event(ev)) => ids.push(ev.id),
                Some(QueryItem::Eose) => break,
                None => panic!("stream ended before EOSE"),
            }
        }
        assert_eq!(ids, vec!["aa11", "bb22"]);
        assert_eq!(stream.next().await, None);
        client.close();
    }

    #[tokio::test]
    async fn subscription_ids_are_monotonic_and_unique() {
        let url = one_shot_relay(|mut ws| async move {
            let mut seen = vec![];
            while let Some(Ok(TMsg::Text(txt))) = ws.next().await {
                if let Ok(ClientMessage::Req { sub_id, .. }) = ClientMessage::decode(&txt) {
                    seen.push(sub_id.clone());
                    ws.send(TMsg::Text(RelayMessage::Eose { sub_id }.encode()))
                        .await
                        .unwrap();
                }
                if seen.len() == 3 {
                    assert_eq!(seen, vec!["1", "2", "3"]);
                    break;
                }
            }
        })
        .await;

        let client = Client::connect(&url).await.unwrap();
        for _ in 0..3 {
            let mut stream = client.query(vec![Filter::new()]).unwrap();
            while stream.next().await.is_some() {}
        }
        client.close();
    }

    #[tokio::test]
    async fn dropping_stream_sends_close_frame() {
        let (saw_close_tx, saw_close_rx) = tokio::sync::oneshot::channel();
        let url = one_shot_relay(|mut ws| async move {
            let req = ws.next().await.unwrap().unwrap();
            let sub_id = match ClientMessage::decode(req.to_text().unwrap()).unwrap() {
                ClientMessage::Req { sub_id, .. } => sub_id,
                other => panic!("expected REQ, got {other:?}"),
            };
            while let Some(Ok(TMsg::Text(txt))) = ws.next().await {
                if let Ok(ClientMessage::Close { sub_id: closed }) = ClientMessage::decode(&txt) {
                    assert_eq!(closed, sub_id);
                    saw_close_tx.send(()).unwrap();
                    break;
                }
            }
        })
        .await;

        let client = Client::connect(&url).await.unwrap();
        let stream = client.query(vec![Filter::new()]).unwrap();
        drop(stream);
        tokio::time::timeout(std::time::Duration::from_secs(1), saw_close_rx)
            .await
            .expect("relay never saw CLOSE")
            .unwrap();
        client.close();
    }

    #[tokio::test]
    async fn send_after_close_is_connection_not_open() {
        let url = one_shot_relay(|mut ws| async move {
            let _ = ws.next().await;
        })
        .await;
        let client = Client::connect(&url).await.unwrap();
        client.close();
        client.close();
        assert!(matches!(
            client.query(vec![Filter::new()]),
            Err(Error::ConnectionNotOpen)
        ));
    }

    #[tokio::test]
    async fn remote_closed_removes_subscription_before_delivery() {
        let url = one_shot_relay(|mut ws| async move {
            let req = ws.next().await.unwrap().unwrap();
            let sub_id = match ClientMessage::decode(req.to_text().unwrap()).unwrap() {
                ClientMessage::Req { sub_id, .. } => sub_id,
                other => panic!("expected REQ, got {other:?}"),
            };
            ws.send(TMsg::Text(
                RelayMessage::Closed {
                    sub_id,
                    message: "error: too busy".into(),
                }
                .encode(),
            ))
            .await
            .unwrap();
            // If the client echoes a CLOSE for an already-closed sub, the
            // registry removal failed.
            if let Some(Ok(TMsg::Text(txt))) = ws.next().await {
                assert!(
                    ClientMessage::decode(&txt)
                        .map(|m| !matches!(m, ClientMessage::Close { .. }))
                        .unwrap_or(true),
                    "client sent CLOSE after CLOSED"
                );
            }
        })
        .await;

        let client = Client::connect(&url).await.unwrap();
        let mut stream = client.query(vec![Filter::new()]).unwrap();
        assert_eq!(stream.next().await, None);
        drop(stream);
        client.close();
    }

    #[tokio::test]
    async fn connection_close_ends_open_streams() {
        let url = one_shot_relay(|mut ws| async move {
            let _ = ws.next().await;
            ws.close(None).await.unwrap();
        })
        .await;

        let client = Client::connect(&url).await.unwrap();
        let mut stream = client.query(vec![Filter::new()]).unwrap();
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn garbage_frame_closes_connection() {
        let url = one_shot_relay(|mut ws| async move {
            let _ = ws.next().await;
            ws.send(TMsg::Text("[42]".into())).await.unwrap();
            let _ = ws.next().await;
        })
        .await;

        let client = Client::connect(&url).await.unwrap();
        let mut stream = client.query(vec![Filter::new()]).unwrap();
        assert_eq!(stream.next().await, None);
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn listeners_observe_traffic_both_ways() {
        struct Recorder {
            sent: Mutex<Vec<String>>,
            got: Mutex<Vec<String>>,
        }
        impl Listener for Recorder {
            fn sent_message(&self, msg: &ClientMessage) {
                self.sent.lock().unwrap().push(msg.encode());
            }
            fn got_message(&self, msg: &RelayMessage) {
                self.got.lock().unwrap().push(msg.encode());
            }
        }

        let url = one_shot_relay(|mut ws| async move {
            let req = ws.next().await.unwrap().unwrap();
            let sub_id = match ClientMessage::decode(req.to_text().unwrap()).unwrap() {
                ClientMessage::Req { sub_id, .. } => sub_id,
                other => panic!("expected REQ, got {other:?}"),
            };
            ws.send(TMsg::Text(RelayMessage::Eose { sub_id }.encode()))
                .await
                .unwrap();
            let _ = ws.next().await;
        })
        .await;

        let client = Client::connect(&url).await.unwrap();
        let recorder = Arc::new(Recorder {
            sent: Mutex::new(vec![]),
            got: Mutex::new(vec![]),
        });
        let id = client.add_listener(recorder.clone());
        let mut stream = client.query(vec![Filter::new()]).unwrap();
        while stream.next().await.is_some() {}
        assert_eq!(recorder.sent.lock().unwrap().len(), 1);
        assert_eq!(recorder.got.lock().unwrap().len(), 1);
        client.remove_listener(id);
        drop(stream);
        client.close();
    }
}
