//! TOML configuration: profiles, defaults, and named relay sets.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Per-profile keys; every field is optional so `[default]` can fill gaps.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProfileConfig {
    /// 64-hex-char owner pubkey (required once merged).
    pub pubkey: Option<String>,
    /// 64-hex-char secret key; only needed for operations that sign.
    pub seckey: Option<String>,
    /// Destination relay WebSocket URL.
    pub destination: Option<String>,
    /// Copy the owner's events.
    pub fetch_mine: Option<bool>,
    /// Copy events of followed pubkeys.
    pub fetch_follows: Option<bool>,
    /// Follow `e`/`p` references from the owner's events.
    pub fetch_my_refs: Option<bool>,
    /// Follow `e`/`p` references from follows' events.
    pub fetch_follows_refs: Option<bool>,
    /// Name of a `[relaySets.<name>]` entry.
    pub source_relays: Option<String>,
}

/// A named list of source relays.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySet {
    pub relays: Vec<String>,
}

/// Root of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub default: ProfileConfig,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
    #[serde(default, rename = "relaySets")]
    pub relay_sets: BTreeMap<String, RelaySet>,
}

/// A fully resolved profile, ready to drive a collector run.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub pubkey: String,
    pub seckey: Option<String>,
    pub destination: String,
    pub source_relays: Vec<String>,
    pub fetch_mine: bool,
    pub fetch_follows: bool,
    pub fetch_my_refs: bool,
    pub fetch_follows_refs: bool,
}

fn is_hex_key(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn check_relay_url(url: &str) -> Result<()> {
    let parsed =
        url::Url::parse(url).map_err(|e| Error::Config(format!("bad relay url {url}: {e}")))?;
    if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
        return Err(Error::Config(format!(
            "relay url {url} must use ws:// or wss://"
        )));
    }
    Ok(())
}

impl Config {
    /// Parse a configuration string.
    pub fn parse(text: &str) -> Result<Config> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("reading {}: {e}", path.as_ref().display()))
        })?;
        Self::parse(&text)
    }

    /// Resolve a named profile, merging in `[default]` and validating keys,
    /// URLs, and the referenced relay set.
    pub fn resolve(&self, name: &str) -> Result<Profile> {
        let profile = self
            .profiles
            .get(name)
            .ok_or_else(|| Error::Config(format!("no profile named {name:?}")))?;
        let default = &self.default;

        let pubkey = profile
            .pubkey
            .clone()
            .or_else(|| default.pubkey.clone())
            .ok_or_else(|| Error::Config(format!("profile {name:?} has no pubkey")))?;
        if !is_hex_key(&pubkey) {
            return Err(Error::Config(format!(
                "profile {name:?} pubkey must be 64 hex chars"
            )));
        }
        let seckey = profile.seckey.clone().or_else(|| default.seckey.clone());
        if let Some(sk) = &seckey {
            if !is_hex_key(sk) {
                return Err(Error::Config(format!(
                    "profile {name:?} seckey must be 64 hex chars"
                )));
            }
        }
        let destination = profile
            .destination
            .clone()
            .or_else(|| default.destination.clone())
            .ok_or_else(|| Error::Config(format!("profile {name:?} has no destination")))?;
        check_relay_url(&destination)?;

        let set_name = profile
            .source_relays
            .clone()
            .or_else(|| default.source_relays.clone())
            .ok_or_else(|| Error::Config(format!("profile {name:?} has no sourceRelays")))?;
        let set = self
            .relay_sets
            .get(&set_name)
            .ok_or_else(|| Error::Config(format!("no relay set named {set_name:?}")))?;
        if set.relays.is_empty() {
            return Err(Error::Config(format!("relay set {set_name:?} is empty")));
        }
        for url in &set.relays {
            check_relay_url(url)?;
        }

        let flag = |p: Option<bool>, d: Option<bool>| p.or(d).unwrap_or(true);
        Ok(Profile {
            name: name.to_string(),
            pubkey,
            seckey,
            destination,
            source_relays: set.relays.clone(),
            fetch_mine: flag(profile.fetch_mine, default.fetch_mine),
            fetch_follows: flag(profile.fetch_follows, default.fetch_follows),
            fetch_my_refs: flag(profile.fetch_my_refs, default.fetch_my_refs),
            fetch_follows_refs: flag(profile.fetch_follows_refs, default.fetch_follows_refs),
        })
    }
}
