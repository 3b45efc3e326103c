//! Tracker client: scheme-dispatched HTTP(S)/UDP announce, per §4.3.
pub mod http;
pub mod udp;

use crate::peer_id::PeerId;
use crate::torrent::InfoHash;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("unsupported announce scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid announce url: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("http request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracker returned failure reason: {reason} (retry in {interval:?})")]
    Failure {
        reason: String,
        interval: Option<Duration>,
    },

    #[error("bencode decoding error in tracker response: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("malformed tracker response: {0}")]
    Malformed(&'static str),

    #[error("udp tracker timed out after exhausting the retry schedule")]
    UdpTimedOut,

    #[error("io error talking to tracker: {0}")]
    Io(#[from] std::io::Error),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// Event value sent on the first announce of a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    Started,
}

/// Parameters common to both HTTP and UDP announce.
#[derive(Debug, Clone)]
pub struct AnnounceParams {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: AnnounceEvent,
}

/// A peer address returned by a tracker, deduplicated and ordered as
/// received.
#[derive(Debug)]
pub struct AnnounceResult {
    pub interval: Duration,
    pub peers: Vec<SocketAddr>,
}

/// Announces to whichever tracker scheme the URL names and returns a
/// deduplicated, ordered peer list.
#[tracing::instrument(skip(params), fields(info_hash = %params.info_hash))]
pub async fn announce(announce_url: &str, params: &AnnounceParams) -> TrackerResult<AnnounceResult> {
    let url = url::Url::parse(announce_url)?;
    let mut result = match url.scheme() {
        "http" | "https" => http::announce(&url, params).await?,
        "udp" => udp::announce(&url, params).await?,
        other => return Err(TrackerError::UnsupportedScheme(other.to_string())),
    };
    dedupe_peers(&mut result.peers);
    Ok(result)
}

fn dedupe_peers(peers: &mut Vec<SocketAddr>) {
    let mut seen = std::collections::HashSet::with_capacity(peers.len());
    peers.retain(|addr| seen.insert(*addr));
}
