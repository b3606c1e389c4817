//! NIP-11 relay information document.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Accept header value that asks a relay for its information document.
pub const NOSTR_JSON_ACCEPT: &str = "application/nostr+json";

/// Partial relay information document. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub supported_nips: Vec<u32>,
}

impl RelayInfo {
    /// Whether the relay advertises support for a NIP.
    pub fn supports(&self, nip: u32) -> bool {
        self.supported_nips.contains(&nip)
    }
}

/// Rewrite a relay WebSocket URL to its HTTP counterpart.
pub fn info_url(relay_url: &str) -> Result<String> {
    let mut url = url::Url::parse(relay_url)?;
    let scheme = match url.scheme() {
        "wss" => "https",
        _ => "http",
    };
    // set_scheme rejects ws->http; rebuild instead.
    let rest = &relay_url[url.scheme().len()..];
    url = url::Url::parse(&format!("{scheme}{rest}"))?;
    Ok(url.to_string())
}

/// Fetch a relay's information document.
pub async fn fetch_relay_info(relay_url: &str) -> Result<RelayInfo> {
    let url = info_url(relay_url)?;
    debug!(url = %url, "fetching relay info");
    let info = reqwest::Client::new()
        .get(&url)
        .header(reqwest::header::ACCEPT, NOSTR_JSON_ACCEPT)
        .send()
        .await?
        .error_for_status()?
        .json::<RelayInfo>()
        .await?;
    Ok(info)
}
