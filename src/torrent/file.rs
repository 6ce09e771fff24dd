//! Torrent metainfo structure and parsing logic: single-file torrents only.
use crate::bencode::decoder::decode;
use crate::bencode::BencodeValue;
use crate::torrent::{info_hash, TorrentError, TorrentResult};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A parsed single-file metainfo document.
#[derive(Debug, PartialEq, Clone)]
pub struct TorrentFile {
    pub announce: String,
    pub comment: String,
    pub created_by: String,
    pub creation_date: Option<SystemTime>,
    pub info: InfoDict,
    pub info_hash: [u8; 20],
    pub pieces_hash: Vec<[u8; 20]>,
}

/// The `info` sub-dictionary of a single-file metainfo document.
#[derive(Debug, PartialEq, Clone)]
pub struct InfoDict {
    pub piece_length: i64,
    pub pieces: Vec<u8>,
    pub name: String,
    pub length: i64,
}

/// Splits the concatenated `pieces` byte string into 20-byte SHA-1 hashes,
/// one per piece, in piece-index order.
fn parse_pieces(pieces_bytes: &[u8]) -> TorrentResult<Vec<[u8; 20]>> {
    if pieces_bytes.len() % 20 != 0 {
        return Err(TorrentError::InvalidPiecesHashLength);
    }
    Ok(pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

fn require_string(dict: &crate::bencode::BencodeDict, key: &str) -> TorrentResult<String> {
    match dict.get(key.as_bytes()) {
        Some(BencodeValue::String(s)) => String::from_utf8(s.clone())
            .map_err(|e| TorrentError::InvalidFormat(format!("{key} is not UTF-8: {e}"))),
        _ => Err(TorrentError::MissingField(key.to_string())),
    }
}

fn optional_string(dict: &crate::bencode::BencodeDict, key: &str) -> String {
    match dict.get(key.as_bytes()) {
        Some(BencodeValue::String(s)) => String::from_utf8(s.clone()).unwrap_or_default(),
        _ => String::new(),
    }
}

fn require_integer(dict: &crate::bencode::BencodeDict, key: &str) -> TorrentResult<i64> {
    match dict.get(key.as_bytes()) {
        Some(BencodeValue::Integer(i)) => Ok(*i),
        _ => Err(TorrentError::MissingField(key.to_string())),
    }
}

fn parse_info_dict(value: &BencodeValue) -> TorrentResult<InfoDict> {
    let dict = value
        .as_dict()
        .ok_or_else(|| TorrentError::InvalidFormat("info is not a dictionary".to_string()))?;

    if dict.get(b"files").is_some() {
        return Err(TorrentError::Unsupported(
            "multi-file torrents (info.files present) are not supported".to_string(),
        ));
    }

    let piece_length = require_integer(dict, "piece length")?;
    let pieces = match dict.get(b"pieces") {
        Some(BencodeValue::String(s)) => s.clone(),
        _ => return Err(TorrentError::MissingField("pieces".to_string())),
    };
    let name = require_string(dict, "name")?;
    let length = require_integer(dict, "length")?;

    Ok(InfoDict {
        piece_length,
        pieces,
        name,
        length,
    })
}

impl TorrentFile {
    /// Total size of the described content, in bytes.
    pub fn total_size(&self) -> i64 {
        self.info.length
    }

    /// The on-disk output file name (the `info.name` field).
    pub fn output_name(&self) -> &str {
        &self.info.name
    }

    pub fn piece_length(&self) -> i64 {
        self.info.piece_length
    }

    pub fn num_pieces(&self) -> usize {
        self.pieces_hash.len()
    }

    /// The byte length of piece `index`: `piece_length` for every piece but
    /// the last, whose length is whatever remains of `total_size`.
    pub fn piece_size(&self, index: usize) -> i64 {
        if index >= self.num_pieces() {
            return 0;
        }
        if index < self.num_pieces() - 1 {
            self.info.piece_length
        } else {
            let full_pieces_length = (self.num_pieces() - 1) as i64 * self.info.piece_length;
            let remainder = self.total_size() - full_pieces_length;
            if remainder <= 0 {
                self.info.piece_length
            } else {
                remainder
            }
        }
    }

    /// Parses a metainfo document from its raw bencoded bytes.
    #[tracing::instrument(skip(data), level = "debug")]
    pub fn parse(data: &[u8]) -> TorrentResult<TorrentFile> {
        let top = decode(data)?;
        let dict = top
            .as_dict()
            .ok_or_else(|| TorrentError::InvalidFormat("root is not a dictionary".to_string()))?;

        let announce = require_string(dict, "announce")?;

        let info_value = dict
            .get(b"info")
            .ok_or_else(|| TorrentError::MissingField("info".to_string()))?;
        let info = parse_info_dict(info_value)?;
        let info_hash = info_hash::calculate(info_value)?;
        let pieces_hash = parse_pieces(&info.pieces)?;

        let creation_date = match dict.get(b"creation date") {
            Some(BencodeValue::Integer(timestamp)) => {
                let secs: u64 = (*timestamp)
                    .try_into()
                    .map_err(|_| TorrentError::DateParseError)?;
                Some(UNIX_EPOCH + Duration::from_secs(secs))
            }
            _ => None,
        };

        Ok(TorrentFile {
            announce,
            comment: optional_string(dict, "comment"),
            created_by: optional_string(dict, "created by"),
            creation_date,
            info,
            info_hash,
            pieces_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ubuntu_fixture() -> Vec<u8> {
        let pieces = "a".repeat(20 * 2835);
        format!(
            "d8:announce40:http://torrent.ubuntu.com:6969/announce4:infod6:lengthi1485881344e4:name6:ubuntu12:piece lengthi524288e6:pieces{}:{}ee",
            pieces.len(),
            pieces
        )
        .into_bytes()
    }

    #[test]
    fn parses_single_file_metainfo() {
        let torrent = TorrentFile::parse(&ubuntu_fixture()).unwrap();
        assert_eq!(torrent.piece_length(), 524288);
        assert_eq!(torrent.total_size(), 1485881344);
        assert_eq!(torrent.num_pieces(), 2835);
        assert_eq!(torrent.announce, "http://torrent.ubuntu.com:6969/announce");
        assert_eq!(torrent.info_hash.len(), 20);
    }

    #[test]
    fn rejects_multi_file_metainfo() {
        let data = b"d8:announce4:http4:infod6:lengthi10e4:name1:a12:piece lengthi10e6:pieces0:5:filesleee";
        let err = TorrentFile::parse(data).unwrap_err();
        assert!(matches!(err, TorrentError::Unsupported(_)));
    }

    #[test]
    fn last_piece_may_be_shorter() {
        let pieces = "a".repeat(40);
        let data = format!(
            "d8:announce4:http4:infod6:lengthi15e4:name1:a12:piece lengthi10e6:pieces{}:{}ee",
            pieces.len(),
            pieces
        )
        .into_bytes();
        let torrent = TorrentFile::parse(&data).unwrap();
        assert_eq!(torrent.num_pieces(), 2);
        assert_eq!(torrent.piece_size(0), 10);
        assert_eq!(torrent.piece_size(1), 5);
    }
}
