//! Piece manager: partitions a torrent into pieces and blocks, chooses
//! what to request next, verifies completed pieces, and writes them to disk.
use thiserror::Error;

pub mod block;
pub mod manager;

pub use block::{Block, BlockStatus, Piece, BLOCK_SIZE};
pub use manager::PieceManager;

#[derive(Debug, Error)]
pub enum PieceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid torrent layout: {0}")]
    InvalidLayout(String),
}

pub type PieceResult<T> = std::result::Result<T, PieceError>;
