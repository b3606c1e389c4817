//! Replication of a user's social graph onto a destination relay.
//!
//! A `Collector` copies the profile owner's events, the events of accounts
//! they follow, and everything those events reference, from a set of source
//! relays to one destination relay. Any single source failing is logged and
//! skipped; only an unreachable destination aborts the run.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use futures_util::{stream, StreamExt};
use rand::seq::SliceRandom;
use rand::thread_rng;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::Profile;
use crate::error::{Error, Result};
use crate::event::{Event, KIND_CONTACTS, KIND_METADATA};
use crate::filter::Filter;

/// Ids per REQ when fetching referenced events.
const EVENT_REF_CHUNK: usize = 50;
/// Concurrent reference fetches. Profile fetches stay sequential; some
/// relays reject concurrent requests on one connection.
const EVENT_REF_PARALLELISM: usize = 3;

/// What a finished run copied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectSummary {
    pub events: usize,
    pub profiles: usize,
}

/// Event ids and pubkeys referenced by copied events, gathered per run.
#[derive(Default)]
struct Refs {
    events: HashSet<String>,
    profiles: HashSet<String>,
}

/// Replicates one profile to its destination relay.
pub struct Collector {
    profile: Profile,
    limit: u64,
    clients: Mutex<HashMap<String, Client>>,
    copied_events: Mutex<HashSet<String>>,
    copied_profiles: Mutex<HashMap<String, u64>>,
}

impl Collector {
    /// Create a collector copying up to `limit` events per author per source.
    pub fn new(profile: Profile, limit: u64) -> Self {
        Collector {
            profile,
            limit,
            clients: Mutex::new(HashMap::new()),
            copied_events: Mutex::new(HashSet::new()),
            copied_profiles: Mutex::new(HashMap::new()),
        }
    }

    /// Cached connection per URL; a closed cached client is discarded and
    /// re-created on next use.
    async fn client_for(&self, url: &str) -> Result<Client> {
        if let Some(client) = self.clients.lock().expect("collector lock").get(url) {
            if !client.is_closed() {
                return Ok(client.clone());
            }
        }
        let client = Client::connect(url).await?;
        self.clients
            .lock()
            .expect("collector lock")
            .insert(url.to_string(), client.clone());
        Ok(client)
    }

    /// Connect to every source relay, skipping the unreachable ones.
    async fn source_clients(&self) -> Vec<Client> {
        let mut clients = Vec::new();
        for url in &self.profile.source_relays {
            match self.client_for(url).await {
                Ok(client) => clients.push(client),
                Err(e) => warn!(url = %url, error = %e, "source relay unreachable"),
            }
        }
        clients
    }

    /// Record the tags of a published event for the reference phases.
    fn record_refs(&self, refs: &Mutex<Refs>, ev: &Event, record_tags: bool) {
        let mut refs = refs.lock().expect("refs lock");
        refs.profiles.insert(ev.pubkey.clone());
        if !record_tags {
            return;
        }
        for id in ev.tag_values("e") {
            refs.events.insert(id.to_string());
        }
        for pk in ev.tag_values("p") {
            refs.profiles.insert(pk.to_string());
        }
    }

    /// Publish one event to the destination, once.
    ///
    /// The id goes into the dedup set before the publish attempt so a
    /// concurrent copy of the same event cannot race past the guard.
    async fn copy_event(
        &self,
        dest: &Client,
        refs: &Mutex<Refs>,
        record_tags: bool,
        ev: Event,
    ) -> bool {
        if !self
            .copied_events
            .lock()
            .expect("collector lock")
            .insert(ev.id.clone())
        {
            return false;
        }
        self.record_refs(refs, &ev, record_tags);
        let outcome = dest.try_publish(ev).await;
        outcome.published
    }

    /// Publish a profile event unless a same-or-newer copy already went out.
    async fn copy_profile(&self, dest: &Client, ev: Event) -> bool {
        {
            let mut profiles = self.copied_profiles.lock().expect("collector lock");
            match profiles.get(&ev.pubkey) {
                Some(&ts) if ts >= ev.created_at => return false,
                _ => profiles.insert(ev.pubkey.clone(), ev.created_at),
            };
        }
        dest.try_publish(ev).await.published
    }

    /// Copy up to `limit` events by `author` from one source relay.
    async fn copy_author_events(
        &self,
        source: &Client,
        dest: &Client,
        refs: &Mutex<Refs>,
        record_tags: bool,
        author: &str,
    ) {
        let filter = Filter::new().authors([author]).limit(self.limit);
        let mut saved = source.query_saved(filter);
        loop {
            match saved.next().await {
                Ok(Some(ev)) => {
                    self.copy_event(dest, refs, record_tags, ev).await;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(url = %source.url(), author, error = %e, "author query failed");
                    break;
                }
            }
        }
    }

    /// Run the replication pipeline.
    pub async fn run(&self) -> Result<CollectSummary> {
        let profile = &self.profile;
        let dest = self.client_for(&profile.destination).await?;
        let sources = self.source_clients().await;
        if sources.is_empty() {
            return Err(Error::Protocol("no source relay reachable".into()));
        }
        let multi = MultiClient::new(sources.clone());
        let refs = Mutex::new(Refs::default());

        // Seed: the owner's profile and follow list, from any source.
        if let Some(ev) = multi.get_latest(&profile.pubkey, KIND_METADATA).await {
            self.copy_profile(&dest, ev).await;
        }
        if let Some(ev) = multi.get_latest(&profile.pubkey, KIND_CONTACTS).await {
            self.copy_event(&dest, &refs, profile.fetch_my_refs, ev).await;
        }

        // The owner's own events.
        if profile.fetch_mine {
            for source in &sources {
                self.copy_author_events(
                    source,
                    &dest,
                    &refs,
                    profile.fetch_my_refs,
                    &profile.pubkey,
                )
                .await;
            }
        }

        // Events of followed accounts, per the follow list now on the
        // destination.
        if profile.fetch_follows {
            let follows = match dest
                .query_one(
                    Filter::new()
                        .authors([profile.pubkey.as_str()])
                        .kinds([KIND_CONTACTS]),
                )
                .await
            {
                Ok(Some(ev)) => ev.tag_values("p").map(str::to_string).collect(),
                Ok(None) => {
                    info!(pubkey = %profile.pubkey, "no follow list found");
                    Vec::new()
                }
                Err(e) => {
                    warn!(error = %e, "reading follow list failed");
                    Vec::new()
                }
            };
            for follow in &follows {
                for source in &sources {
                    self.copy_author_events(
                        source,
                        &dest,
                        &refs,
                        profile.fetch_follows_refs,
                        follow,
                    )
                    .await;
                }
            }
        }

        // Referenced events, fetched in id chunks with bounded concurrency.
        let missing_events: Vec<String> = {
            let copied = self.copied_events.lock().expect("collector lock");
            let refs = refs.lock().expect("refs lock");
            refs.events
                .iter()
                .filter(|id| !copied.contains(*id))
                .cloned()
                .collect()
        };
        debug!(count = missing_events.len(), "fetching referenced events");
        let chunks: Vec<Vec<String>> = missing_events
            .chunks(EVENT_REF_CHUNK)
            .map(|c| c.to_vec())
            .collect();
        let dest_ref = &dest;
        let refs_ref = &refs;
        let multi_ref = &multi;
        stream::iter(chunks)
            .map(|chunk| async move { multi_ref.get_events(&chunk).await })
            .buffer_unordered(EVENT_REF_PARALLELISM)
            .for_each(|found| async move {
                for ev in found.into_values() {
                    self.copy_event(dest_ref, refs_ref, false, ev).await;
                }
            })
            .await;

        // Referenced profiles, one at a time.
        let missing_profiles: Vec<String> = {
            let copied = self.copied_profiles.lock().expect("collector lock");
            let refs = refs.lock().expect("refs lock");
            refs.profiles
                .iter()
                .filter(|pk| !copied.contains_key(*pk))
                .cloned()
                .collect()
        };
        debug!(count = missing_profiles.len(), "fetching referenced profiles");
        for pubkey in &missing_profiles {
            if let Some(ev) = multi.get_profile(pubkey).await {
                self.copy_profile(&dest, ev).await;
            }
        }

        Ok(CollectSummary {
            events: self.copied_events.lock().expect("collector lock").len(),
            profiles: self.copied_profiles.lock().expect("collector lock").len(),
        })
    }
}

/// Queries a set of relays in shuffled order until one answers.
pub struct MultiClient {
    clients: Vec<Client>,
}

impl MultiClient {
    pub fn new(clients: Vec<Client>) -> Self {
        MultiClient { clients }
    }

    fn shuffled(&self) -> Vec<Client> {
        let mut clients = self.clients.clone();
        clients.shuffle(&mut thread_rng());
        clients
    }

    /// Fetch events by id, trying relays until every id is found or the
    /// relays are exhausted. Single-relay errors are logged and skipped.
    pub async fn get_events(&self, ids: &[String]) -> HashMap<String, Event> {
        let mut remaining: Vec<String> = ids.to_vec();
        let mut found = HashMap::new();
        for client in self.shuffled() {
            if remaining.is_empty() {
                break;
            }
            let filter = Filter::new()
                .ids(remaining.clone())
                .limit(remaining.len() as u64);
            match client.query_simple(filter).await {
                Ok(events) => {
                    for ev in events {
                        remaining.retain(|id| id != &ev.id);
                        found.insert(ev.id.clone(), ev);
                    }
                }
                Err(e) => warn!(url = %client.url(), error = %e, "event fetch failed"),
            }
        }
        found
    }

    /// Latest event of one kind by one author, from whichever relay answers
    /// first.
    pub async fn get_latest(&self, pubkey: &str, kind: u32) -> Option<Event> {
        for client in self.shuffled() {
            let filter = Filter::new().authors([pubkey]).kinds([kind]);
            match client.query_one(filter).await {
                Ok(Some(ev)) => return Some(ev),
                Ok(None) => continue,
                Err(e) => warn!(url = %client.url(), error = %e, "lookup failed"),
            }
        }
        None
    }

    /// Latest profile (kind 0) event for a pubkey.
    pub async fn get_profile(&self, pubkey: &str) -> Option<Event> {
        self.get_latest(pubkey, KIND_METADATA).await
    }
}
