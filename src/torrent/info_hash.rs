//! Computes the info-hash: the SHA-1 digest of the canonical re-encoding of
//! a metainfo's `info` sub-dictionary.
use crate::bencode::{self, BencodeValue};
use crate::torrent::{TorrentError, TorrentResult};
use sha1::{Digest, Sha1};

/// Re-encodes `info` and returns the SHA-1 digest of the result.
///
/// Relies on `bencode::encoder` preserving the key order seen at decode time
/// — that is what makes this digest stable across re-parses of the same
/// metainfo file.
pub fn calculate(info: &BencodeValue) -> TorrentResult<[u8; 20]> {
    let encoded = bencode::encoder::encode_to_vec(info)
        .map_err(|_| TorrentError::InvalidFormat("info dictionary failed to re-encode".into()))?;

    let mut hasher = Sha1::new();
    hasher.update(&encoded);
    let digest = hasher.finalize();

    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&digest);
    Ok(info_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decoder::decode;

    #[test]
    fn matches_known_ubuntu_info_hash() {
        // A synthetic metainfo reproducing the canonical single-file
        // Ubuntu 16.04 desktop fixture's observable numbers (§8 of the
        // project spec): piece_length = 524288, a single piece hash, and an
        // announce URL. The info-hash value itself is a function of the
        // exact bytes of `info`, so this test only checks stability and
        // shape, not the literal published hash (the real .torrent file is
        // not vendored in this repository).
        let encoded = b"d6:lengthi1485881344e4:name6:ubuntu12:piece lengthi524288e6:pieces20:aaaaaaaaaaaaaaaaaaaae";
        let info = decode(encoded).unwrap();
        let hash = calculate(&info).unwrap();
        assert_eq!(hash.len(), 20);

        // Re-decoding and re-hashing the same bytes must be deterministic.
        let info2 = decode(encoded).unwrap();
        let hash2 = calculate(&info2).unwrap();
        assert_eq!(hash, hash2);
    }
}
