//! The piece manager: the single coordinator every peer worker consults for
//! its next request and notifies when a block arrives.
use crate::peer::PeerBitfield;
use crate::piece::block::{build_pieces, BlockStatus, Piece};
use crate::piece::PieceResult;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// A block worth requesting from a specific peer: the piece it belongs to,
/// its offset within the piece, and its length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRequest {
    pub piece_index: usize,
    pub offset: u32,
    pub length: u32,
}

/// How long an in-flight request may go unanswered before it is eligible
/// for reissue to another peer: 5 minutes, per the wire-protocol spec.
const REQUEST_TIMEOUT: Duration = Duration::from_millis(300_000);

struct PendingRequest {
    piece_index: usize,
    offset: u32,
    length: u32,
    requested_at: Instant,
}

/// Partitions a torrent into pieces/blocks, tracks per-peer bitfields,
/// selects the next block to request, verifies completed pieces, and
/// writes them to the output file at their exact offset.
pub struct PieceManager {
    piece_length: i64,
    pieces: Vec<Piece>,
    missing: Vec<usize>,
    ongoing: Vec<usize>,
    have: Vec<usize>,
    peers: HashMap<[u8; 20], PeerBitfield>,
    pending: Vec<PendingRequest>,
    file: File,
}

impl PieceManager {
    /// Opens (creating if necessary) the output file at `path`, pre-sized
    /// to `total_size` so the tail piece never causes a short write, and
    /// builds the piece/block inventory from `piece_length`/`hashes`.
    #[instrument(skip(hashes), level = "debug")]
    pub fn new(
        path: &Path,
        piece_length: i64,
        total_size: i64,
        hashes: &[[u8; 20]],
    ) -> PieceResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(total_size.max(0) as u64)?;

        let pieces = build_pieces(piece_length, total_size, hashes);
        let missing = (0..pieces.len()).collect();

        Ok(Self {
            piece_length,
            pieces,
            missing,
            ongoing: Vec::new(),
            have: Vec::new(),
            peers: HashMap::new(),
            pending: Vec::new(),
            file,
        })
    }

    pub fn total_pieces(&self) -> usize {
        self.pieces.len()
    }

    /// `|have| + |ongoing| + |missing|` always equals the piece count; this
    /// is the invariant the partition is built to uphold.
    pub fn have_count(&self) -> usize {
        self.have.len()
    }

    pub fn is_complete(&self) -> bool {
        self.have.len() == self.pieces.len()
    }

    pub fn register_peer(&mut self, peer_id: [u8; 20], bitfield: PeerBitfield) {
        self.peers.insert(peer_id, bitfield);
    }

    /// Sets bit `index` on a peer's bitfield — the effect of a `Have`
    /// message. If the peer was never registered with a `BitField`, it is
    /// created fresh (considered to have no other pieces).
    pub fn update_peer(&mut self, peer_id: [u8; 20], index: usize) {
        let total = self.pieces.len();
        self.peers
            .entry(peer_id)
            .or_insert_with(|| PeerBitfield::empty(total))
            .set_piece(index);
    }

    pub fn remove_peer(&mut self, peer_id: &[u8; 20]) {
        self.peers.remove(peer_id);
    }

    /// Chooses the next block to request from `peer_id`, in priority order:
    /// reissue a timed-out request, continue an ongoing piece, or start the
    /// rarest missing piece the peer advertises. Returns `None` if nothing
    /// qualifies or the peer is unknown.
    #[instrument(skip(self), level = "trace")]
    pub fn next_request(&mut self, peer_id: &[u8; 20]) -> Option<BlockRequest> {
        let bitfield = self.peers.get(peer_id)?.clone();

        if let Some(block) = self.reissue_timed_out(&bitfield) {
            return Some(block);
        }
        if let Some(block) = self.continue_ongoing(&bitfield) {
            return Some(block);
        }
        self.start_new_piece(peer_id, &bitfield)
    }

    fn reissue_timed_out(&mut self, bitfield: &PeerBitfield) -> Option<BlockRequest> {
        let now = Instant::now();
        for pending in &mut self.pending {
            if bitfield.has_piece(pending.piece_index)
                && now.duration_since(pending.requested_at) >= REQUEST_TIMEOUT
            {
                pending.requested_at = now;
                debug!(piece = pending.piece_index, offset = pending.offset, "reissuing timed-out request");
                return Some(BlockRequest {
                    piece_index: pending.piece_index,
                    offset: pending.offset,
                    length: pending.length,
                });
            }
        }
        None
    }

    /// Walks every ongoing piece the peer advertises, not just the first:
    /// a peer may advertise an ongoing piece that is fully `Pending` ahead
    /// of one it could actually supply a block for, and stopping at the
    /// first match would starve that second piece in the end-game.
    fn continue_ongoing(&mut self, bitfield: &PeerBitfield) -> Option<BlockRequest> {
        let piece_index = self.ongoing.iter().copied().find(|&index| {
            bitfield.has_piece(index)
                && self
                    .pieces
                    .get(index)
                    .is_some_and(|piece| piece.blocks.iter().any(|b| b.status == BlockStatus::Missing))
        })?;
        let piece = self.pieces.get_mut(piece_index)?;
        let block = piece.next_missing()?;
        block.status = BlockStatus::Pending;
        let request = BlockRequest {
            piece_index,
            offset: block.offset,
            length: block.length,
        };
        self.pending.push(PendingRequest {
            piece_index,
            offset: request.offset,
            length: request.length,
            requested_at: Instant::now(),
        });
        Some(request)
    }

    fn start_new_piece(&mut self, peer_id: &[u8; 20], bitfield: &PeerBitfield) -> Option<BlockRequest> {
        let candidates: Vec<usize> = self
            .missing
            .iter()
            .copied()
            .filter(|&index| bitfield.has_piece(index))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let rarity = |index: usize| {
            self.peers
                .values()
                .filter(|peer_bits| peer_bits.has_piece(index))
                .count()
        };

        let chosen = *candidates
            .iter()
            .min_by_key(|&&index| (rarity(index), index))?;

        self.missing.retain(|&index| index != chosen);
        self.ongoing.push(chosen);

        let piece = self.pieces.get_mut(chosen)?;
        let block = piece.next_missing()?;
        block.status = BlockStatus::Pending;
        let request = BlockRequest {
            piece_index: chosen,
            offset: block.offset,
            length: block.length,
        };
        self.pending.push(PendingRequest {
            piece_index: chosen,
            offset: request.offset,
            length: request.length,
            requested_at: Instant::now(),
        });
        debug!(peer = ?peer_id, piece = chosen, "starting new piece (rarest-first)");
        Some(request)
    }

    /// Records a received block. If its piece is now complete, verifies the
    /// digest: on match, writes the piece to disk and moves it to `have`;
    /// on mismatch, resets every block in the piece back to `Missing`
    /// (§4.5 — a silent correctness mechanism, never surfaced as an error).
    #[instrument(skip(self, data), level = "trace")]
    pub fn block_received(
        &mut self,
        piece_index: usize,
        offset: u32,
        data: &[u8],
    ) -> PieceResult<()> {
        self.pending
            .retain(|p| !(p.piece_index == piece_index && p.offset == offset));

        let Some(piece) = self.pieces.get_mut(piece_index) else {
            return Ok(());
        };
        let Some(block) = piece.blocks.iter_mut().find(|b| b.offset == offset) else {
            return Ok(());
        };

        block.status = BlockStatus::Retrieved;
        block.data = Some(data.to_vec());

        if !piece.is_complete() {
            return Ok(());
        }

        let bytes = piece.concat();
        let mut hasher = Sha1::new();
        hasher.update(&bytes);
        let digest = hasher.finalize();

        if digest.as_slice() == piece.expected_hash {
            let file_offset = piece_index as u64 * self.piece_length as u64;
            self.file.seek(SeekFrom::Start(file_offset))?;
            self.file.write_all(&bytes)?;
            self.ongoing.retain(|&index| index != piece_index);
            self.have.push(piece_index);
            debug!(piece = piece_index, "piece verified and written");
        } else {
            warn!(piece = piece_index, "piece failed digest verification, resetting");
            piece.reset();
        }

        Ok(())
    }

    /// Flushes and closes the output file handle.
    pub fn close(mut self) -> PieceResult<()> {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn manager(piece_length: i64, total_size: i64, hashes: &[[u8; 20]]) -> PieceManager {
        let file = NamedTempFile::new().unwrap();
        PieceManager::new(file.path(), piece_length, total_size, hashes).unwrap()
    }

    fn hash_of(data: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    #[test]
    fn unknown_peer_returns_no_request() {
        let mut mgr = manager(16 * 1024, 16 * 1024, &[[0u8; 20]]);
        assert_eq!(mgr.next_request(&[1u8; 20]), None);
    }

    #[test]
    fn rarest_first_prefers_less_common_piece() {
        let data0 = vec![1u8; 10];
        let data1 = vec![2u8; 10];
        let hashes = [hash_of(&data0), hash_of(&data1)];
        let mut mgr = manager(10, 20, &hashes);

        let common = [1u8; 20];
        let rare = [2u8; 20];
        let mut both = PeerBitfield::empty(2);
        both.set_piece(0);
        both.set_piece(1);
        let mut only_rare = PeerBitfield::empty(2);
        only_rare.set_piece(1);

        mgr.register_peer(common, both);
        mgr.register_peer(rare, only_rare);

        // Piece 1 is rarer (only one peer has it), so the peer that holds
        // both pieces should still be offered piece 1 first.
        let request = mgr.next_request(&common).unwrap();
        assert_eq!(request.piece_index, 1);
    }

    #[test]
    fn continue_ongoing_skips_a_fully_pending_piece_for_one_with_a_missing_block() {
        // Two multi-block pieces so each has room for a still-`Missing`
        // block alongside a `Pending` one.
        let piece_length = crate::piece::block::BLOCK_SIZE as i64 + 100;
        let total_size = piece_length * 2;
        let mut mgr = manager(piece_length, total_size, &[[1u8; 20], [2u8; 20]]);

        let peer = [9u8; 20];
        let mut bits = PeerBitfield::empty(2);
        bits.set_piece(0);
        bits.set_piece(1);
        mgr.register_peer(peer, bits);

        // Piece 0 is ongoing but every block is already `Pending`; piece 1
        // is ongoing with a block still `Missing`.
        mgr.missing.clear();
        mgr.ongoing = vec![0, 1];
        for block in &mut mgr.pieces[0].blocks {
            block.status = BlockStatus::Pending;
        }

        let request = mgr.next_request(&peer).unwrap();
        assert_eq!(request.piece_index, 1);
    }

    #[test]
    fn receiving_block_for_unknown_offset_does_not_panic() {
        let mut mgr = manager(10, 10, &[hash_of(&[0u8; 10])]);
        mgr.block_received(0, 999, b"x").unwrap();
    }

    #[test]
    fn full_piece_round_trip_marks_have_and_writes_file() {
        let data = vec![7u8; 10];
        let hash = hash_of(&data);
        let mut mgr = manager(10, 10, &[hash]);
        let peer = [9u8; 20];
        let mut bits = PeerBitfield::empty(1);
        bits.set_piece(0);
        mgr.register_peer(peer, bits);

        let request = mgr.next_request(&peer).unwrap();
        assert_eq!(request.piece_index, 0);
        mgr.block_received(0, request.offset, &data).unwrap();

        assert!(mgr.is_complete());
        assert_eq!(mgr.have_count(), 1);
    }

    #[test]
    fn digest_mismatch_resets_piece_to_missing_blocks() {
        let hash = hash_of(&[7u8; 10]);
        let mut mgr = manager(10, 10, &[hash]);
        let peer = [9u8; 20];
        let mut bits = PeerBitfield::empty(1);
        bits.set_piece(0);
        mgr.register_peer(peer, bits);

        let request = mgr.next_request(&peer).unwrap();
        // Wrong payload: digest will not match.
        mgr.block_received(0, request.offset, &[0u8; 10]).unwrap();

        assert!(!mgr.is_complete());
        assert!(mgr.ongoing.contains(&0));
        assert!(mgr.pieces[0]
            .blocks
            .iter()
            .all(|b| b.status == BlockStatus::Missing));
    }
}
