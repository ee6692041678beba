use std::borrow::Cow;

use comms::{
    FrameReceiver, FrameSender, LossMap, SampleId, SampleRecord,
    msg::{Command, Msg, Payload, flatten_losses},
};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    COORDINATOR_RANK, CollectiveErr, ProcessGroup, ReduceTarget, Result,
    ordering::order_by_identity,
};

/// One end of the connection between the coordinator and a peer.
struct Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rank: usize,
    rx: FrameReceiver<R>,
    tx: FrameSender<W>,
}

impl<R, W> Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn recv<'buf>(&mut self, buf: &'buf mut Vec<u32>) -> Result<Msg<'buf>> {
        Ok(self.rx.recv_into(buf).await?)
    }

    async fn send(&mut self, msg: &Msg<'_>) -> Result<()> {
        Ok(self.tx.send(msg).await?)
    }
}

enum Role<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Links to every peer sorted by rank.
    Coordinator(Vec<Link<R, W>>),
    Peer(Link<R, W>),
}

/// A process group where every peer talks to the coordinator only.
///
/// The coordinator does the arithmetic of every collective and sends the
/// results back, peers never talk to each other.
pub struct Star<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rank: usize,
    world_size: usize,
    role: Role<R, W>,
    rx_buf: Vec<u32>,
    values: Vec<f32>,
    sums: Vec<f64>,
}

/// Maps a message that doesn't belong to `op` into the matching error.
fn unexpected(rank: usize, op: &'static str, msg: &Msg<'_>) -> CollectiveErr {
    match msg {
        Msg::Err(detail) => CollectiveErr::PeerFailed {
            rank,
            detail: detail.to_string(),
        },
        other => CollectiveErr::UnexpectedMessage {
            rank,
            op,
            got: other.kind(),
        },
    }
}

/// Pairs each of the names in `losses` with the reduced value at the same position.
fn rebuild(losses: &LossMap, values: &[f32]) -> LossMap {
    losses.keys().cloned().zip(values.iter().copied()).collect()
}

impl<R, W> Star<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates the coordinator's end of the group.
    ///
    /// Waits for every peer's join message and orders the links by rank.
    ///
    /// # Arguments
    /// * `world_size` - The amount of processes in the group, the coordinator included.
    /// * `channels` - One channel per peer, in any order.
    ///
    /// # Returns
    /// The coordinator's `Star` or an error if the handshake fails.
    pub async fn coordinator(
        world_size: usize,
        channels: Vec<(FrameReceiver<R>, FrameSender<W>)>,
    ) -> Result<Self> {
        if channels.len() + 1 != world_size {
            return Err(CollectiveErr::MissingPeers {
                got: channels.len(),
                expected: world_size.saturating_sub(1),
            });
        }

        let mut rx_buf = Vec::new();
        let mut peers: Vec<Link<R, W>> = Vec::with_capacity(channels.len());

        for (mut rx, tx) in channels {
            let msg: Msg = rx.recv_into(&mut rx_buf).await?;

            let (rank, peer_world_size) = match msg {
                Msg::Control(Command::Join { rank, world_size }) => (rank, world_size),
                other => return Err(CollectiveErr::HandshakeFailed { got: other.kind() }),
            };

            if rank == COORDINATOR_RANK || rank >= world_size {
                return Err(CollectiveErr::InvalidRank { rank, world_size });
            }

            if peer_world_size != world_size {
                return Err(CollectiveErr::WorldSizeMismatch {
                    rank,
                    got: peer_world_size,
                    expected: world_size,
                });
            }

            if peers.iter().any(|peer| peer.rank == rank) {
                return Err(CollectiveErr::DuplicateRank(rank));
            }

            debug!(rank = rank; "peer joined");
            peers.push(Link { rank, rx, tx });
        }

        peers.sort_by_key(|peer| peer.rank);
        info!(world_size = world_size; "every peer joined");

        Ok(Self {
            rank: COORDINATOR_RANK,
            world_size,
            role: Role::Coordinator(peers),
            rx_buf,
            values: Vec::new(),
            sums: Vec::new(),
        })
    }

    /// Creates a peer's end of the group and announces it to the coordinator.
    ///
    /// # Arguments
    /// * `rank` - This process' rank, never the coordinator's.
    /// * `world_size` - The amount of processes in the group.
    /// * `rx` - The receiving end of the connection to the coordinator.
    /// * `tx` - The sending end of the connection to the coordinator.
    ///
    /// # Returns
    /// The peer's `Star` or an error if the rank is invalid or the join can't be sent.
    pub async fn peer(
        rank: usize,
        world_size: usize,
        rx: FrameReceiver<R>,
        tx: FrameSender<W>,
    ) -> Result<Self> {
        if rank == COORDINATOR_RANK || rank >= world_size {
            return Err(CollectiveErr::InvalidRank { rank, world_size });
        }

        let mut link = Link {
            rank: COORDINATOR_RANK,
            rx,
            tx,
        };

        link.send(&Msg::Control(Command::Join { rank, world_size }))
            .await?;

        Ok(Self {
            rank,
            world_size,
            role: Role::Peer(link),
            rx_buf: Vec::new(),
            values: Vec::new(),
            sums: Vec::new(),
        })
    }

    /// Closes the group cleanly after the last collective.
    ///
    /// Peers announce their disconnection and the coordinator waits for all of them.
    pub async fn disconnect(self) -> Result<()> {
        let Self {
            role, mut rx_buf, ..
        } = self;

        match role {
            Role::Coordinator(mut peers) => {
                for peer in peers.iter_mut() {
                    match peer.recv(&mut rx_buf).await? {
                        Msg::Control(Command::Disconnect) => {}
                        other => return Err(unexpected(peer.rank, "disconnect", &other)),
                    }
                }
            }
            Role::Peer(mut link) => {
                link.send(&Msg::Control(Command::Disconnect)).await?;
            }
        }

        Ok(())
    }
}

impl<R, W> ProcessGroup for Star<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn average_reduce(
        &mut self,
        losses: &LossMap,
        target: ReduceTarget,
    ) -> Result<Option<LossMap>> {
        let Self {
            world_size,
            role,
            rx_buf,
            values,
            sums,
            ..
        } = self;

        flatten_losses(losses, values);

        match role {
            Role::Coordinator(peers) => {
                sums.clear();
                sums.extend(values.iter().map(|&v| v as f64));

                for peer in peers.iter_mut() {
                    match peer.recv(rx_buf).await? {
                        Msg::Data(Payload::Losses(theirs)) if theirs.len() == sums.len() => {
                            sums.iter_mut()
                                .zip(theirs.iter())
                                .for_each(|(acc, &v)| *acc += v as f64);
                        }
                        Msg::Data(Payload::Losses(theirs)) => {
                            return Err(CollectiveErr::LossCountMismatch {
                                rank: peer.rank,
                                got: theirs.len(),
                                expected: sums.len(),
                            });
                        }
                        other => return Err(unexpected(peer.rank, "average_reduce", &other)),
                    }
                }

                let n = *world_size as f64;
                values
                    .iter_mut()
                    .zip(sums.iter())
                    .for_each(|(v, &acc)| *v = (acc / n) as f32);

                if target == ReduceTarget::All {
                    for peer in peers.iter_mut() {
                        let msg = Msg::Data(Payload::Losses(values.as_mut_slice()));
                        peer.send(&msg).await?;
                    }
                }

                Ok(Some(rebuild(losses, values)))
            }
            Role::Peer(link) => {
                let msg = Msg::Data(Payload::Losses(values.as_mut_slice()));
                link.send(&msg).await?;

                if target == ReduceTarget::Coordinator {
                    return Ok(None);
                }

                match link.recv(rx_buf).await? {
                    Msg::Data(Payload::Losses(averaged)) if averaged.len() == losses.len() => {
                        Ok(Some(rebuild(losses, averaged)))
                    }
                    Msg::Data(Payload::Losses(averaged)) => Err(CollectiveErr::LossCountMismatch {
                        rank: link.rank,
                        got: averaged.len(),
                        expected: losses.len(),
                    }),
                    other => Err(unexpected(link.rank, "average_reduce", &other)),
                }
            }
        }
    }

    async fn gather_by_identity(
        &mut self,
        records: Vec<SampleRecord>,
        canonical: &[SampleId],
    ) -> Result<Option<Vec<SampleRecord>>> {
        let Self { role, rx_buf, .. } = self;

        match role {
            Role::Coordinator(peers) => {
                let mut gathered = records;

                for peer in peers.iter_mut() {
                    match peer.recv(rx_buf).await? {
                        Msg::Control(Command::Records(theirs)) => gathered.extend(theirs),
                        other => return Err(unexpected(peer.rank, "gather_by_identity", &other)),
                    }
                }

                order_by_identity(gathered, canonical).map(Some)
            }
            Role::Peer(link) => {
                link.send(&Msg::Control(Command::Records(records))).await?;
                Ok(None)
            }
        }
    }

    async fn broadcast_flag(&mut self, flag: bool) -> Result<bool> {
        let Self { role, rx_buf, .. } = self;

        match role {
            Role::Coordinator(peers) => {
                for peer in peers.iter_mut() {
                    peer.send(&Msg::Control(Command::Flag(flag))).await?;
                }

                Ok(flag)
            }
            Role::Peer(link) => match link.recv(rx_buf).await? {
                Msg::Control(Command::Flag(flag)) => Ok(flag),
                other => Err(unexpected(link.rank, "broadcast_flag", &other)),
            },
        }
    }

    async fn barrier(&mut self) -> Result<()> {
        let Self { role, rx_buf, .. } = self;

        match role {
            Role::Coordinator(peers) => {
                for peer in peers.iter_mut() {
                    match peer.recv(rx_buf).await? {
                        Msg::Control(Command::Barrier) => {}
                        other => return Err(unexpected(peer.rank, "barrier", &other)),
                    }
                }

                for peer in peers.iter_mut() {
                    peer.send(&Msg::Control(Command::Barrier)).await?;
                }

                Ok(())
            }
            Role::Peer(link) => {
                link.send(&Msg::Control(Command::Barrier)).await?;

                match link.recv(rx_buf).await? {
                    Msg::Control(Command::Barrier) => Ok(()),
                    other => Err(unexpected(link.rank, "barrier", &other)),
                }
            }
        }
    }

    async fn abort(&mut self, detail: &str) {
        let msg = Msg::Err(Cow::Borrowed(detail));

        let links: Vec<&mut Link<R, W>> = match &mut self.role {
            Role::Coordinator(peers) => peers.iter_mut().collect(),
            Role::Peer(link) => vec![link],
        };

        for link in links {
            if let Err(e) = link.send(&msg).await {
                warn!(rank = link.rank; "couldn't notify abort: {e}");
            }
        }
    }
}
