//! The per-peer session worker: one async task per connection, driving the
//! handshake, the choke/interest state machine, and request issuance
//! through the shared piece manager.
use crate::peer::{FrameParser, Handshake, Message, PeerAddress, PeerBitfield, PeerResult};
use crate::piece::PieceManager;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, instrument, warn};

/// Local half of the choke/interest state machine described in §4.4.3.
/// `Stopped` is represented by the shared `watch` channel closing, not a
/// variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LocalState {
    choked: bool,
    interested: bool,
    pending_request: bool,
}

impl Default for LocalState {
    fn default() -> Self {
        Self {
            choked: true,
            interested: false,
            pending_request: false,
        }
    }
}

/// Runs one peer connection end to end: connect, handshake, exchange
/// messages, request blocks, until the peer disconnects, errors, or the
/// shutdown signal fires. Never returns an `Err` that the caller must act
/// on beyond logging and looping back to acquire a new address; transport
/// and protocol failures are reported purely for visibility.
#[instrument(skip(piece_manager, shutdown), fields(peer = %address))]
pub async fn run(
    address: PeerAddress,
    info_hash: [u8; 20],
    local_peer_id: [u8; 20],
    piece_manager: Arc<Mutex<PieceManager>>,
    mut shutdown: watch::Receiver<bool>,
) {
    if *shutdown.borrow() {
        return;
    }

    match try_run(address, info_hash, local_peer_id, &piece_manager, &mut shutdown).await {
        Ok(()) => debug!("peer session ended"),
        Err(err) => warn!(error = %err, "peer session failed"),
    }
}

async fn try_run(
    address: PeerAddress,
    info_hash: [u8; 20],
    local_peer_id: [u8; 20],
    piece_manager: &Arc<Mutex<PieceManager>>,
    shutdown: &mut watch::Receiver<bool>,
) -> PeerResult<()> {
    let mut stream = tokio::select! {
        biased;
        _ = shutdown.changed() => return Ok(()),
        result = TcpStream::connect((address.ip, address.port)) => result?,
    };

    let handshake = Handshake::new(info_hash, local_peer_id);
    handshake.write(&mut stream).await?;
    let remote = Handshake::read(&mut stream).await?;
    remote.validate(info_hash)?;
    let remote_peer_id = remote.peer_id;

    let mut state = LocalState::default();
    let mut parser = FrameParser::new();
    let mut read_buf = [0u8; 16 * 1024];

    send(&mut stream, Message::Interested).await?;
    state.interested = true;

    loop {
        if *shutdown.borrow() {
            piece_manager.lock().await.remove_peer(&remote_peer_id);
            return Ok(());
        }

        let message = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                piece_manager.lock().await.remove_peer(&remote_peer_id);
                return Ok(());
            }
            message = next_message(&mut stream, &mut parser, &mut read_buf) => message?,
        };

        let Some(message) = message else {
            piece_manager.lock().await.remove_peer(&remote_peer_id);
            return Ok(());
        };

        handle_inbound(&remote_peer_id, message, piece_manager, &mut state).await;

        if !state.choked && state.interested && !state.pending_request {
            let next = piece_manager.lock().await.next_request(&remote_peer_id);
            if let Some(block) = next {
                send(
                    &mut stream,
                    Message::Request(block.piece_index as u32, block.offset, block.length),
                )
                .await?;
                state.pending_request = true;
            }
        }
    }
}

async fn handle_inbound(
    peer_id: &[u8; 20],
    message: Message,
    piece_manager: &Arc<Mutex<PieceManager>>,
    state: &mut LocalState,
) {
    match message {
        Message::BitField(payload) => {
            let mut manager = piece_manager.lock().await;
            let bitfield = PeerBitfield::from_payload(&payload, manager.total_pieces());
            manager.register_peer(*peer_id, bitfield);
        }
        Message::Have(index) => {
            piece_manager.lock().await.update_peer(*peer_id, index as usize);
        }
        Message::Choke => state.choked = true,
        Message::Unchoke => state.choked = false,
        Message::Interested | Message::NotInterested => {
            // Advisory only: this client never seeds.
        }
        Message::Piece(index, begin, block) => {
            state.pending_request = false;
            if let Err(err) = piece_manager
                .lock()
                .await
                .block_received(index as usize, begin, &block)
            {
                warn!(error = %err, "failed to record received block");
            }
        }
        Message::Request(..) | Message::Cancel(..) => {
            // Acknowledged and ignored: no seeding.
        }
        Message::KeepAlive => {}
    }
}

async fn send(stream: &mut TcpStream, message: Message) -> PeerResult<()> {
    stream.write_all(&message.encode()).await?;
    Ok(())
}

/// Reads off the socket until a complete frame is available, feeding bytes
/// to `parser` as they arrive. Returns `Ok(None)` on a clean EOF.
async fn next_message(
    stream: &mut TcpStream,
    parser: &mut FrameParser,
    read_buf: &mut [u8],
) -> PeerResult<Option<Message>> {
    loop {
        if let Some(message) = parser.next_message()? {
            return Ok(Some(message));
        }
        let n = stream.read(read_buf).await?;
        if n == 0 {
            return Ok(None);
        }
        parser.fill(&read_buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_state_starts_choked_and_not_interested() {
        let state = LocalState::default();
        assert!(state.choked);
        assert!(!state.interested);
        assert!(!state.pending_request);
    }
}
