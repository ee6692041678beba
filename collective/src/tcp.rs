use std::{io, time::Duration};

use comms::{FrameReceiver, FrameSender};
use log::{debug, info, warn};
use tokio::net::{
    TcpListener, TcpStream,
    tcp::{OwnedReadHalf, OwnedWriteHalf},
};

use crate::{COORDINATOR_RANK, CollectiveErr, Result, Star};

/// A `Star` group member connected over tcp.
pub type TcpStar = Star<OwnedReadHalf, OwnedWriteHalf>;

const CONNECT_ATTEMPTS: usize = 30;
const CONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Peers stop retrying after `CONNECT_ATTEMPTS * CONNECT_BACKOFF`, waiting longer is pointless.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(2 * CONNECT_ATTEMPTS as u64);

/// Joins the tcp group reachable at `addr`.
///
/// The coordinator listens on `addr` until every peer connected, peers keep
/// retrying the connection for a while since the coordinator may start last.
///
/// # Arguments
/// * `rank` - This process' rank.
/// * `world_size` - The amount of processes in the group.
/// * `addr` - The coordinator's listening address.
///
/// # Returns
/// This process' member of the group.
pub async fn rendezvous(rank: usize, world_size: usize, addr: &str) -> Result<TcpStar> {
    if rank == COORDINATOR_RANK {
        let listener = TcpListener::bind(addr).await?;
        info!("listening at {addr} for {} peers", world_size.saturating_sub(1));

        let channels = accept_peers(&listener, world_size, ACCEPT_TIMEOUT).await?;
        return Star::coordinator(world_size, channels).await;
    }

    let stream = connect_with_retry(addr).await?;
    stream.set_nodelay(true)?;
    info!(rank = rank; "connected to coordinator at {addr}");

    let (rx, tx) = stream.into_split();
    let (rx, tx) = comms::channel(rx, tx);
    Star::peer(rank, world_size, rx, tx).await
}

/// Accepts a connection from every peer, failing once `timeout` passes
/// without all of them showing up.
async fn accept_peers(
    listener: &TcpListener,
    world_size: usize,
    timeout: Duration,
) -> Result<Vec<(FrameReceiver<OwnedReadHalf>, FrameSender<OwnedWriteHalf>)>> {
    let expected = world_size.saturating_sub(1);
    let mut channels = Vec::with_capacity(expected);

    let accept_all = async {
        for _ in 0..expected {
            let (stream, peer_addr) = listener.accept().await?;
            debug!("peer connected from {peer_addr}");

            stream.set_nodelay(true)?;
            let (rx, tx) = stream.into_split();
            channels.push(comms::channel(rx, tx));
        }
        Ok::<_, io::Error>(())
    };

    let accepted = tokio::time::timeout(timeout, accept_all).await;
    match accepted {
        Ok(accepted) => accepted?,
        Err(_) => {
            return Err(CollectiveErr::MissingPeers {
                got: channels.len(),
                expected,
            });
        }
    }

    Ok(channels)
}

async fn connect_with_retry(addr: &str) -> io::Result<TcpStream> {
    let mut attempt = 1;

    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                warn!("connection to {addr} failed (attempt {attempt}): {e}");
                attempt += 1;
                tokio::time::sleep(CONNECT_BACKOFF).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn coordinator_gives_up_on_missing_peers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _peer = TcpStream::connect(addr).await.unwrap();
        let err = accept_peers(&listener, 3, Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(err, CollectiveErr::MissingPeers { got: 1, expected: 2 }));
    }
}
