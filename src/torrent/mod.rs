//! Torrent file parsing and error handling logic.
//!
//! This module provides types and error handling for working with metainfo
//! files: decoding, validating the single-file `info` dictionary, and
//! deriving the info-hash.
use thiserror::Error;
pub mod file;
pub mod info_hash;

pub use file::{InfoDict, TorrentFile};

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("invalid metainfo format: {0}")]
    InvalidFormat(String),

    #[error("missing or invalid field: {0}")]
    MissingField(String),

    #[error("invalid pieces hash length (must be a multiple of 20)")]
    InvalidPiecesHashLength,

    #[error("date parse error")]
    DateParseError,

    #[error("unsupported metainfo: {0}")]
    Unsupported(String),
}

/// Result type for torrent operations.
pub type TorrentResult<T> = std::result::Result<T, TorrentError>;
