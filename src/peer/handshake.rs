//! The BitTorrent peer handshake: the first 68 bytes exchanged between two
//! peers, establishing protocol identity and the torrent being discussed.
use crate::peer::{PeerError, PeerResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::instrument;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// A parsed handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Serializes this handshake into its 68-byte wire form: a length byte
    /// (19), the protocol string, 8 zeroed reserved bytes, the info hash,
    /// and the peer id.
    #[instrument(level = "trace")]
    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = 19;
        buf[1..20].copy_from_slice(PROTOCOL);
        // buf[20..28] is the reserved block; left zeroed.
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Parses a handshake from exactly 68 bytes. Any bytes past the 68th
    /// are the caller's to carry forward into the framed message stream.
    pub fn parse(buf: &[u8; 68]) -> PeerResult<Self> {
        if buf[0] != 19 {
            return Err(PeerError::ProtocolMismatch(format!(
                "expected protocol length 19, got {}",
                buf[0]
            )));
        }
        if &buf[1..20] != PROTOCOL {
            return Err(PeerError::ProtocolMismatch(
                "protocol string is not 'BitTorrent protocol'".to_string(),
            ));
        }
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);
        Ok(Self { info_hash, peer_id })
    }

    /// Reads and parses a handshake from a TCP stream.
    #[instrument(level = "trace", skip(stream))]
    pub async fn read(stream: &mut TcpStream) -> PeerResult<Self> {
        let mut buf = [0u8; 68];
        stream.read_exact(&mut buf).await?;
        Self::parse(&buf)
    }

    /// Writes this handshake to a TCP stream.
    #[instrument(level = "trace", skip(self, stream))]
    pub async fn write(&self, stream: &mut TcpStream) -> PeerResult<()> {
        stream.write_all(&self.serialize()).await?;
        Ok(())
    }

    /// Validates this handshake's info hash against the one we expect.
    /// Dropping the connection on mismatch is the caller's responsibility.
    pub fn validate(&self, expected_info_hash: [u8; 20]) -> PeerResult<()> {
        if self.info_hash != expected_info_hash {
            return Err(PeerError::ProtocolMismatch(
                "info hash mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_the_exact_wire_bytes() {
        let info_hash = *b"CDP;~y~\xbf1X#'\xa5\xba\xae5\xb1\x1b\xda\x01";
        let peer_id = *b"-qB3200-iTiX3rvfzMpr";
        let handshake = Handshake::new(info_hash, peer_id);

        let expected: &[u8] = b"\x13BitTorrent protocol\x00\x00\x00\x00\x00\x00\x00\x00CDP;~y~\xbf1X#'\xa5\xba\xae5\xb1\x1b\xda\x01-qB3200-iTiX3rvfzMpr";
        assert_eq!(&handshake.serialize()[..], expected);

        let mut buf = [0u8; 68];
        buf.copy_from_slice(expected);
        let parsed = Handshake::parse(&buf).unwrap();
        assert_eq!(parsed, handshake);
    }

    #[test]
    fn rejects_wrong_protocol_length() {
        let mut buf = [0u8; 68];
        buf[0] = 20;
        assert!(Handshake::parse(&buf).is_err());
    }

    #[test]
    fn validates_info_hash() {
        let info_hash = [1u8; 20];
        let handshake = Handshake::new(info_hash, [2u8; 20]);
        assert!(handshake.validate(info_hash).is_ok());
        assert!(handshake.validate([9u8; 20]).is_err());
    }
}
