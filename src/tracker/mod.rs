//! Tracker client logic for the BitTorrent protocol.
//!
//! This module implements the HTTP announce request, compact-only peer
//! parsing, and peer ID generation used to discover peers for a torrent.
use crate::peer::generate_peer_id;
use crate::torrent::file::TorrentFile;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("tracker announce failed: {0}")]
    Failure(String),

    #[error("non-compact (dictionary) peer lists are not supported")]
    NotImplemented,

    #[error("malformed tracker response: {0}")]
    MalformedResponse(#[from] serde_bencode::Error),

    #[error("invalid announce URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// A client communicating with a single BitTorrent tracker.
#[derive(Debug)]
pub struct Client {
    peer_id: [u8; 20],
    port: u16,
    announced_before: bool,
}

/// Parameters for a tracker announce request.
#[derive(Debug)]
pub struct AnnounceRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: i64,
    pub downloaded: i64,
    pub compact: bool,
    pub left: i64,
    pub event: Option<&'static str>,
}

/// A peer address received from the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub ip: IpAddr,
    pub port: u16,
}

/// The parsed, compact-only response from a tracker.
#[derive(Debug)]
pub struct AnnounceResponse {
    pub interval: i64,
    pub peers: Vec<Peer>,
}

#[derive(Debug, Deserialize)]
struct RawTrackerResponse {
    #[serde(default)]
    interval: i64,
    #[serde(default, rename = "failure reason")]
    failure_reason: Option<String>,
    #[serde(default)]
    peers: RawPeers,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPeers {
    Compact(Vec<u8>),
    Dict(Vec<serde::de::IgnoredAny>),
}

impl Default for RawPeers {
    fn default() -> Self {
        RawPeers::Compact(Vec::new())
    }
}

/// Fixed listening port advertised on every announce. This client never
/// accepts inbound connections; the value exists only to populate the
/// tracker's required `port` parameter.
pub const LISTEN_PORT: u16 = 6889;

impl Client {
    pub fn new() -> Self {
        Self {
            peer_id: generate_peer_id(),
            port: LISTEN_PORT,
            announced_before: false,
        }
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Sends an announce request to the tracker and returns the peer list.
    ///
    /// `event=started` is included only on the very first announce this
    /// client makes; subsequent reannounces omit it.
    #[tracing::instrument(skip(self, torrent), level = "debug")]
    pub async fn announce(&mut self, torrent: &TorrentFile) -> TrackerResult<AnnounceResponse> {
        let event = if self.announced_before {
            None
        } else {
            Some("started")
        };
        let request = AnnounceRequest {
            info_hash: torrent.info_hash,
            peer_id: self.peer_id,
            port: self.port,
            uploaded: 0,
            downloaded: 0,
            compact: true,
            left: torrent.total_size(),
            event,
        };

        let mut url = url::Url::parse(&torrent.announce)?;
        // `info_hash`/`peer_id` are raw 20-byte strings, already percent-encoded
        // by `url_encode`. `Url::query_pairs_mut` would form-encode them a
        // second time (`%00` -> `%2500`), corrupting the hash the tracker
        // matches against — so the query string is assembled by hand instead.
        let mut params = vec![
            format!("info_hash={}", url_encode(&request.info_hash)),
            format!("peer_id={}", url_encode(&request.peer_id)),
            format!("port={}", request.port),
            format!("uploaded={}", request.uploaded),
            format!("downloaded={}", request.downloaded),
            format!("left={}", request.left),
            format!("compact={}", request.compact as i32),
        ];
        if let Some(event) = request.event {
            params.push(format!("event={event}"));
        }
        url.set_query(Some(&params.join("&")));

        debug!(%url, "making announce request to tracker");
        let response = reqwest::get(url).await?;
        let response_bytes = response.bytes().await?;
        let parsed = Self::parse_announce_response(&response_bytes)?;
        self.announced_before = true;
        Ok(parsed)
    }

    /// Parses a bencoded tracker reply, rejecting dictionary-form peer
    /// lists and surfacing a `failure reason` key as an error.
    fn parse_announce_response(bytes: &[u8]) -> TrackerResult<AnnounceResponse> {
        let raw: RawTrackerResponse = serde_bencode::from_bytes(bytes)?;

        if let Some(reason) = raw.failure_reason {
            return Err(TrackerError::Failure(reason));
        }

        let peers = match raw.peers {
            RawPeers::Compact(bytes) => bytes
                .chunks_exact(6)
                .map(|chunk| {
                    let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                    let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                    Peer {
                        ip: IpAddr::V4(ip),
                        port,
                    }
                })
                .collect(),
            RawPeers::Dict(_) => {
                warn!("tracker replied with non-compact peer list");
                return Err(TrackerError::NotImplemented);
            }
        };

        Ok(AnnounceResponse {
            interval: raw.interval,
            peers,
        })
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// URL-encodes a byte slice per RFC 3986 (unreserved characters pass
/// through unchanged; everything else becomes `%XX`).
fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_encode_leaves_unreserved_characters_alone() {
        assert_eq!(url_encode(b"abc-._~"), "abc-._~");
    }

    #[test]
    fn url_encode_percent_encodes_everything_else() {
        assert_eq!(url_encode(b"\x00\xff"), "%00%FF");
    }

    #[test]
    fn compact_peer_list_parses_into_ipv4_peers() {
        // One peer: 127.0.0.1:6881
        let body = b"d8:intervali900e5:peers6:\x7f\x00\x00\x01\x1a\xe1e";
        let response = Client::parse_announce_response(body).unwrap();
        assert_eq!(response.interval, 900);
        assert_eq!(response.peers.len(), 1);
        assert_eq!(response.peers[0].port, 0x1ae1);
    }

    #[test]
    fn failure_reason_surfaces_as_error() {
        let body = b"d14:failure reason11:bad requeste";
        let err = Client::parse_announce_response(body).unwrap_err();
        assert!(matches!(err, TrackerError::Failure(_)));
    }

    #[test]
    fn dictionary_peer_list_is_rejected() {
        let body = b"d8:intervali900e5:peersld2:ip9:127.0.0.14:porti6881eeee";
        let err = Client::parse_announce_response(body).unwrap_err();
        assert!(matches!(err, TrackerError::NotImplemented));
    }

    #[test]
    fn first_announce_sets_event_started_flag() {
        let client = Client::new();
        assert!(!client.announced_before);
    }
}
