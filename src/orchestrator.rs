//! Session orchestrator: owns the piece manager and tracker client, keeps a
//! pool of peer workers fed from a shared address queue, and drives the
//! download to completion or graceful shutdown.
use crate::peer::{session, PeerAddress};
use crate::piece::PieceManager;
use crate::torrent::TorrentFile;
use crate::tracker::Client as TrackerClient;
use anyhow::{Context, Result};
use std::collections::{HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{info, instrument, warn};

/// How many peer connections run concurrently.
const WORKER_POOL_SIZE: usize = 40;

/// How long a worker sleeps before re-checking an empty address queue.
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How often the orchestrator checks download completion and reannounces.
const COMPLETION_POLL_INTERVAL: Duration = Duration::from_secs(1);

struct SharedQueue {
    addresses: Mutex<VecDeque<PeerAddress>>,
    seen: Mutex<HashSet<PeerAddress>>,
}

impl SharedQueue {
    fn new() -> Self {
        Self {
            addresses: Mutex::new(VecDeque::new()),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Adds newly discovered addresses, skipping ones already queued or
    /// previously handed out.
    async fn extend(&self, new_addresses: Vec<PeerAddress>) {
        let mut seen = self.seen.lock().await;
        let mut queue = self.addresses.lock().await;
        for address in new_addresses {
            if seen.insert(address.clone()) {
                queue.push_back(address);
            }
        }
    }

    async fn pop(&self) -> Option<PeerAddress> {
        self.addresses.lock().await.pop_front()
    }
}

/// Downloads `torrent` to `output_path`, coordinating a tracker announce
/// loop and a fixed pool of peer workers until every piece is verified or
/// `shutdown` is signalled.
#[instrument(skip(torrent, shutdown), fields(name = torrent.output_name()))]
pub async fn run(
    torrent: TorrentFile,
    output_path: &Path,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let piece_manager = Arc::new(Mutex::new(
        PieceManager::new(
            output_path,
            torrent.piece_length(),
            torrent.total_size(),
            &torrent.pieces_hash,
        )
        .context("failed to initialize piece manager")?,
    ));

    let queue = Arc::new(SharedQueue::new());
    let tracker = Arc::new(Mutex::new(TrackerClient::new()));
    let info_hash = torrent.info_hash;
    let local_peer_id = {
        let guard = tracker.lock().await;
        guard.peer_id()
    };

    let mut worker_handles = Vec::with_capacity(WORKER_POOL_SIZE);
    for _ in 0..WORKER_POOL_SIZE {
        let queue = Arc::clone(&queue);
        let piece_manager = Arc::clone(&piece_manager);
        let shutdown = shutdown.clone();
        worker_handles.push(tokio::spawn(worker_loop(
            queue,
            info_hash,
            local_peer_id,
            piece_manager,
            shutdown,
        )));
    }

    let announce_handle = {
        let torrent = Arc::new(torrent);
        let queue = Arc::clone(&queue);
        let tracker = Arc::clone(&tracker);
        let piece_manager = Arc::clone(&piece_manager);
        let shutdown = shutdown.clone();
        tokio::spawn(announce_loop(torrent, queue, tracker, piece_manager, shutdown))
    };

    loop {
        if piece_manager.lock().await.is_complete() {
            info!("download complete");
            break;
        }
        if *shutdown.borrow() {
            info!("shutdown requested, stopping orchestrator");
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(COMPLETION_POLL_INTERVAL) => {}
            _ = shutdown.changed() => {}
        }
    }

    announce_handle.abort();
    let _ = announce_handle.await;
    for handle in worker_handles {
        let _ = handle.await;
    }

    let manager = Arc::try_unwrap(piece_manager)
        .map_err(|_| anyhow::anyhow!("piece manager still has outstanding references"))?
        .into_inner();
    manager.close().context("failed to flush output file")?;

    Ok(())
}

async fn worker_loop(
    queue: Arc<SharedQueue>,
    info_hash: [u8; 20],
    local_peer_id: [u8; 20],
    piece_manager: Arc<Mutex<PieceManager>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        let Some(address) = queue.pop().await else {
            tokio::select! {
                _ = tokio::time::sleep(QUEUE_POLL_INTERVAL) => continue,
                _ = shutdown.changed() => return,
            }
        };
        session::run(
            address,
            info_hash,
            local_peer_id,
            Arc::clone(&piece_manager),
            shutdown.clone(),
        )
        .await;
    }
}

#[instrument(skip(torrent, queue, tracker, piece_manager, shutdown))]
async fn announce_loop(
    torrent: Arc<TorrentFile>,
    queue: Arc<SharedQueue>,
    tracker: Arc<Mutex<TrackerClient>>,
    piece_manager: Arc<Mutex<PieceManager>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() || piece_manager.lock().await.is_complete() {
            return;
        }

        let announce_result = tracker.lock().await.announce(&torrent).await;
        let interval = match announce_result {
            Ok(response) => {
                let addresses = response
                    .peers
                    .into_iter()
                    .filter_map(|peer| match peer.ip {
                        std::net::IpAddr::V4(ip) => Some(to_peer_address(ip, peer.port)),
                        std::net::IpAddr::V6(_) => None,
                    })
                    .collect();
                queue.extend(addresses).await;
                response.interval.max(30)
            }
            Err(err) => {
                warn!(error = %err, "announce failed, retrying shortly");
                60
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval as u64)) => {}
            _ = shutdown.changed() => return,
        }
    }
}

fn to_peer_address(ip: Ipv4Addr, port: u16) -> PeerAddress {
    PeerAddress { ip, port }
}
