//! Framed peer messages: `<length:4><id:1><payload>`, with a zero length
//! prefix standing for `KeepAlive`.
use crate::peer::{PeerError, PeerResult};
use bytes::{Buf, BytesMut};

/// One post-handshake peer message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    BitField(Vec<u8>),
    Request(u32, u32, u32),
    Piece(u32, u32, Vec<u8>),
    Cancel(u32, u32, u32),
}

impl Message {
    fn id(&self) -> Option<u8> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(0),
            Message::Unchoke => Some(1),
            Message::Interested => Some(2),
            Message::NotInterested => Some(3),
            Message::Have(_) => Some(4),
            Message::BitField(_) => Some(5),
            Message::Request(..) => Some(6),
            Message::Piece(..) => Some(7),
            Message::Cancel(..) => Some(8),
        }
    }

    /// Encodes this message into its wire frame.
    pub fn encode(&self) -> Vec<u8> {
        let Some(id) = self.id() else {
            return 0u32.to_be_bytes().to_vec();
        };

        let mut payload = Vec::new();
        match self {
            Message::Have(index) => payload.extend_from_slice(&index.to_be_bytes()),
            Message::BitField(bits) => payload.extend_from_slice(bits),
            Message::Request(index, begin, length) | Message::Cancel(index, begin, length) => {
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(&length.to_be_bytes());
            }
            Message::Piece(index, begin, block) => {
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(block);
            }
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => {}
            Message::KeepAlive => unreachable!("handled above"),
        }

        let length = 1 + payload.len() as u32;
        let mut frame = Vec::with_capacity(4 + length as usize);
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(id);
        frame.extend_from_slice(&payload);
        frame
    }

    fn decode_body(id: u8, body: &[u8]) -> PeerResult<Option<Message>> {
        let msg = match id {
            0 => Message::Choke,
            1 => Message::Unchoke,
            2 => Message::Interested,
            3 => Message::NotInterested,
            4 => {
                let index = read_u32(body, 0)?;
                Message::Have(index)
            }
            5 => Message::BitField(body.to_vec()),
            6 => {
                let index = read_u32(body, 0)?;
                let begin = read_u32(body, 4)?;
                let length = read_u32(body, 8)?;
                Message::Request(index, begin, length)
            }
            7 => {
                let index = read_u32(body, 0)?;
                let begin = read_u32(body, 4)?;
                let block = body.get(8..).unwrap_or(&[]).to_vec();
                Message::Piece(index, begin, block)
            }
            8 => {
                let index = read_u32(body, 0)?;
                let begin = read_u32(body, 4)?;
                let length = read_u32(body, 8)?;
                Message::Cancel(index, begin, length)
            }
            other => {
                tracing::warn!(id = other, "dropping unknown peer message id");
                return Ok(None);
            }
        };
        Ok(Some(msg))
    }
}

fn read_u32(body: &[u8], offset: usize) -> PeerResult<u32> {
    let slice = body.get(offset..offset + 4).ok_or_else(|| {
        PeerError::MalformedFrame(format!("frame too short to contain field at {offset}"))
    })?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(slice);
    Ok(u32::from_be_bytes(buf))
}

/// Incrementally parses messages out of an accumulating byte buffer.
///
/// Feed it bytes as they arrive off the socket with [`FrameParser::fill`],
/// then repeatedly call [`FrameParser::next_message`] until it returns
/// `None` — meaning the buffer does not yet hold a complete frame, not that
/// the stream has ended.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: BytesMut,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    pub fn fill(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete message, advancing past it, or `None` if
    /// the buffer doesn't yet hold a full frame.
    pub fn next_message(&mut self) -> PeerResult<Option<Message>> {
        loop {
            if self.buffer.len() < 4 {
                return Ok(None);
            }
            let length = u32::from_be_bytes(self.buffer[..4].try_into().unwrap()) as usize;
            if self.buffer.len() < 4 + length {
                return Ok(None);
            }

            self.buffer.advance(4);
            if length == 0 {
                return Ok(Some(Message::KeepAlive));
            }

            let id = self.buffer[0];
            let body = self.buffer[1..length].to_vec();
            self.buffer.advance(length);

            // Unknown id: frame consumed, nothing to hand back; loop to see
            // whether the buffer holds a subsequent complete frame already.
            if let Some(msg) = Message::decode_body(id, &body)? {
                return Ok(Some(msg));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn have_round_trips() {
        let msg = Message::Have(33);
        assert_eq!(msg.encode(), b"\x00\x00\x00\x05\x04\x00\x00\x00!");
        let mut parser = FrameParser::new();
        parser.fill(&msg.encode());
        assert_eq!(parser.next_message().unwrap(), Some(msg));
    }

    #[test]
    fn request_round_trips() {
        let msg = Message::Request(0, 2, 0x4000);
        assert_eq!(
            msg.encode(),
            b"\x00\x00\x00\r\x06\x00\x00\x00\x00\x00\x00\x00\x02\x00\x00\x40\x00"
        );
        let mut parser = FrameParser::new();
        parser.fill(&msg.encode());
        assert_eq!(parser.next_message().unwrap(), Some(msg));
    }

    #[test]
    fn piece_round_trips() {
        let msg = Message::Piece(0, 0, b"ok".to_vec());
        assert_eq!(msg.encode(), b"\x00\x00\x00\x0b\x07\x00\x00\x00\x00\x00\x00\x00\x00ok");
        let mut parser = FrameParser::new();
        parser.fill(&msg.encode());
        assert_eq!(parser.next_message().unwrap(), Some(msg));
    }

    #[test]
    fn interested_round_trips() {
        let msg = Message::Interested;
        assert_eq!(msg.encode(), b"\x00\x00\x00\x01\x02");
        let mut parser = FrameParser::new();
        parser.fill(&msg.encode());
        assert_eq!(parser.next_message().unwrap(), Some(msg));
    }

    #[test]
    fn cancel_round_trips() {
        let msg = Message::Cancel(0, 2, 0x4000);
        assert_eq!(
            msg.encode(),
            b"\x00\x00\x00\r\x08\x00\x00\x00\x00\x00\x00\x00\x02\x00\x00\x40\x00"
        );
        let mut parser = FrameParser::new();
        parser.fill(&msg.encode());
        assert_eq!(parser.next_message().unwrap(), Some(msg));
    }

    #[test]
    fn keep_alive_round_trips() {
        let msg = Message::KeepAlive;
        assert_eq!(msg.encode(), vec![0, 0, 0, 0]);
        let mut parser = FrameParser::new();
        parser.fill(&msg.encode());
        assert_eq!(parser.next_message().unwrap(), Some(Message::KeepAlive));
    }

    #[test]
    fn partial_frame_yields_none_until_complete() {
        let msg = Message::Have(1);
        let bytes = msg.encode();
        let mut parser = FrameParser::new();
        parser.fill(&bytes[..bytes.len() - 1]);
        assert_eq!(parser.next_message().unwrap(), None);
        parser.fill(&bytes[bytes.len() - 1..]);
        assert_eq!(parser.next_message().unwrap(), Some(msg));
    }

    #[test]
    fn unknown_message_id_is_consumed_and_skipped() {
        let mut parser = FrameParser::new();
        // id 99, empty payload, followed by a real message.
        parser.fill(&[0, 0, 0, 1, 99]);
        parser.fill(&Message::Unchoke.encode());
        assert_eq!(parser.next_message().unwrap(), Some(Message::Unchoke));
    }
}
