//! In-process mock relay shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message as TMsg};

use noscopy::event::{Event, EventTemplate, KeySigner, Signer, Tag};
use noscopy::filter::Filter;
use noscopy::message::{ClientMessage, RelayMessage};

#[derive(Default)]
struct RelayState {
    events: Vec<Event>,
    per_req_cap: Option<usize>,
    received: Vec<ClientMessage>,
    dup_accept_false: bool,
    reject: Option<String>,
}

impl RelayState {
    /// Matching events, newest first, capped by the server cap and the
    /// filters' limit hint.
    fn select(&self, filters: &[Filter]) -> Vec<Event> {
        let mut matched: Vec<Event> = self
            .events
            .iter()
            .filter(|ev| filters.iter().any(|f| f.matches(ev)))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let mut cap = self.per_req_cap.unwrap_or(usize::MAX);
        if let Some(limit) = filters.iter().filter_map(|f| f.limit).min() {
            cap = cap.min(limit as usize);
        }
        matched.truncate(cap);
        matched
    }
}

/// A storing relay that accepts any number of connections.
pub struct MockRelay {
    pub url: String,
    state: Arc<Mutex<RelayState>>,
}

impl MockRelay {
    pub async fn start() -> MockRelay {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(RelayState::default()));
        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        let TMsg::Text(txt) = msg else { continue };
                        let Ok(parsed) = ClientMessage::decode(&txt) else {
                            continue;
                        };
                        state.lock().unwrap().received.push(parsed.clone());
                        match parsed {
                            ClientMessage::Req { sub_id, filters } => {
                                let batch = state.lock().unwrap().select(&filters);
                                for event in batch {
                                    let frame = RelayMessage::Event {
                                        sub_id: sub_id.clone(),
                                        event,
                                    }
                                    .encode();
                                    if ws.send(TMsg::Text(frame)).await.is_err() {
                                        return;
                                    }
                                }
                                let eose = RelayMessage::Eose { sub_id }.encode();
                                if ws.send(TMsg::Text(eose)).await.is_err() {
                                    return;
                                }
                            }
                            ClientMessage::Count { sub_id, filters } => {
                                let count = {
                                    let st = state.lock().unwrap();
                                    st.events
                                        .iter()
                                        .filter(|ev| filters.iter().any(|f| f.matches(ev)))
                                        .count() as u64
                                };
                                let frame = RelayMessage::Count { sub_id, count }.encode();
                                if ws.send(TMsg::Text(frame)).await.is_err() {
                                    return;
                                }
                            }
                            ClientMessage::Event(ev) => {
                                let reply = {
                                    let mut st = state.lock().unwrap();
                                    if let Some(message) = &st.reject {
                                        RelayMessage::Ok {
                                            event_id: ev.id.clone(),
                                            accepted: false,
                                            message: message.clone(),
                                        }
                                    } else if st.events.iter().any(|e| e.id == ev.id) {
                                        RelayMessage::Ok {
                                            event_id: ev.id.clone(),
                                            accepted: !st.dup_accept_false,
                                            message: "duplicate: already have it".into(),
                                        }
                                    } else {
                                        st.events.push(ev.clone());
                                        RelayMessage::Ok {
                                            event_id: ev.id,
                                            accepted: true,
                                            message: String::new(),
                                        }
                                    }
                                };
                                if ws.send(TMsg::Text(reply.encode())).await.is_err() {
                                    return;
                                }
                            }
                            ClientMessage::Close { .. } => {}
                        }
                    }
                });
            }
        });
        MockRelay {
            url: format!("ws://{addr}"),
            state,
        }
    }

    pub fn add_event(&self, ev: Event) {
        self.state.lock().unwrap().events.push(ev);
    }

    /// Cap how many events a single REQ returns regardless of the filter.
    pub fn set_cap(&self, cap: usize) {
        self.state.lock().unwrap().per_req_cap = Some(cap);
    }

    /// Answer duplicate submissions with `accepted = false`, like some
    /// deployed relays do.
    pub fn set_duplicate_accept_false(&self) {
        self.state.lock().unwrap().dup_accept_false = true;
    }

    /// Refuse every publish with the given message.
    pub fn set_reject(&self, message: &str) {
        self.state.lock().unwrap().reject = Some(message.to_string());
    }

    pub fn received(&self) -> Vec<ClientMessage> {
        self.state.lock().unwrap().received.clone()
    }

    /// Subscription ids of CLOSE frames seen so far.
    pub fn close_frames(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::Close { sub_id } => Some(sub_id),
                _ => None,
            })
            .collect()
    }

    pub fn stored(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn stored_ids(&self) -> HashSet<String> {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .map(|e| e.id.clone())
            .collect()
    }
}

/// Deterministic signer for test fixtures. Distinct `key_byte`s give
/// distinct identities.
pub fn test_signer(key_byte: u8) -> KeySigner {
    KeySigner::from_hex(&hex::encode([key_byte; 32])).unwrap()
}

/// A signed note with the given timestamp and tags.
pub fn note(signer: &KeySigner, created_at: u64, content: &str, tags: Vec<Tag>) -> Event {
    signer
        .sign(&EventTemplate {
            kind: 1,
            created_at,
            tags,
            content: content.into(),
        })
        .unwrap()
}

/// A signed event of an arbitrary kind.
pub fn event_of_kind(
    signer: &KeySigner,
    kind: u32,
    created_at: u64,
    content: &str,
    tags: Vec<Tag>,
) -> Event {
    signer
        .sign(&EventTemplate {
            kind,
            created_at,
            tags,
            content: content.into(),
        })
        .unwrap()
}
