use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

use crate::{Result, Star};

/// A `Star` group member connected through in-memory pipes.
pub type LocalStar = Star<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Builds a whole `Star` group inside a single process.
///
/// Useful to run several ranks as concurrent tasks of the same runtime.
///
/// # Arguments
/// * `world_size` - The amount of group members to create.
///
/// # Returns
/// The members indexed by rank, the coordinator first.
pub async fn in_memory(world_size: usize) -> Result<Vec<LocalStar>> {
    let mut peers = Vec::with_capacity(world_size.saturating_sub(1));
    let mut channels = Vec::with_capacity(world_size.saturating_sub(1));

    for rank in 1..world_size {
        let (coordinator_end, peer_end) = tokio::io::duplex(PIPE_CAPACITY);

        let (rx, tx) = tokio::io::split(peer_end);
        let (rx, tx) = comms::channel(rx, tx);
        peers.push(Star::peer(rank, world_size, rx, tx).await?);

        let (rx, tx) = tokio::io::split(coordinator_end);
        channels.push(comms::channel(rx, tx));
    }

    let mut group = Vec::with_capacity(world_size);
    group.push(Star::coordinator(world_size, channels).await?);
    group.extend(peers);
    Ok(group)
}
