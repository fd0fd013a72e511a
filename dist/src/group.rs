use std::{io, time::Duration};

use log::{debug, info};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    runtime::Runtime,
    time::sleep,
};

use crate::{
    DistConfig, DistErr, Result,
    proto::{self, Hello},
};

const CONNECT_ATTEMPTS: u32 = 30;
const CONNECT_BACKOFF: Duration = Duration::from_secs(1);

type Link = (OwnedReadHalf, OwnedWriteHalf);

enum Role {
    /// Rank 0; holds one link per member, ordered by member rank.
    Coordinator { peers: Vec<Link> },
    Member { up: Link },
}

/// A fixed group of training processes with averaged reduction.
///
/// Rank 0 gathers every member's buffer, averages, and broadcasts the
/// result, so `all_reduce_mean` doubles as an iteration barrier: no
/// participant returns before all of them have contributed.
///
/// The handle owns its runtime and exposes blocking methods; the training
/// loop stays synchronous.
pub struct ProcessGroup {
    rank: usize,
    world_size: usize,
    runtime: Runtime,
    role: Role,
    scratch: Vec<f32>,
}

impl ProcessGroup {
    /// Establishes the group.
    ///
    /// # Arguments
    /// * `rank` - This process's rank in `0..world_size`.
    /// * `world_size` - Participating process count, at least 2.
    /// * `group_name` - Shared group identifier; members presenting another
    ///   name are rejected at join time.
    /// * `cfg` - The distributed configuration (coordinator address).
    pub fn init(rank: usize, world_size: usize, group_name: &str, cfg: &DistConfig) -> Result<Self> {
        if world_size < 2 || rank >= world_size {
            return Err(DistErr::InvalidRank { rank, world_size });
        }

        let runtime = Runtime::new().map_err(DistErr::Io)?;

        let role = if rank == 0 {
            runtime.block_on(accept_members(&cfg.url, world_size, group_name))?
        } else {
            runtime.block_on(join(&cfg.url, rank, group_name))?
        };

        info!("process group '{group_name}' ready: rank {rank} of {world_size}");

        Ok(Self {
            rank,
            world_size,
            runtime,
            role,
            scratch: Vec::new(),
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn is_coordinator(&self) -> bool {
        self.rank == 0
    }

    /// Averages `data` elementwise across every process, in place.
    ///
    /// Every participant must call this at the same point of the same
    /// iteration; the call blocks until the whole group has contributed.
    pub fn all_reduce_mean(&mut self, data: &mut [f32]) -> Result<()> {
        let Self {
            runtime,
            role,
            scratch,
            world_size,
            ..
        } = self;

        let world = *world_size;
        runtime
            .block_on(async {
                match role {
                    Role::Coordinator { peers } => {
                        reduce_as_coordinator(peers, data, scratch, world).await
                    }
                    Role::Member { up: (rx, tx) } => reduce_as_member(rx, tx, data).await,
                }
            })
            .map_err(DistErr::from)
    }

    /// Averages a single scalar across the group.
    pub fn reduce_loss(&mut self, loss: f32) -> Result<f32> {
        let mut buf = [loss];
        self.all_reduce_mean(&mut buf)?;
        Ok(buf[0])
    }

    /// Blocks until every process has reached this call.
    pub fn barrier(&mut self) -> Result<()> {
        let Self { runtime, role, .. } = self;

        runtime
            .block_on(async {
                match role {
                    Role::Coordinator { peers } => barrier_as_coordinator(peers).await,
                    Role::Member { up: (rx, tx) } => barrier_as_member(rx, tx).await,
                }
            })
            .map_err(DistErr::from)
    }
}

async fn accept_members(url: &str, world_size: usize, group_name: &str) -> Result<Role> {
    let listener = TcpListener::bind(url)
        .await
        .map_err(|source| DistErr::ConnectFailed {
            addr: url.to_string(),
            source,
        })?;

    let mut slots: Vec<Option<Link>> = (1..world_size).map(|_| None).collect();
    let mut joined = 0;

    while joined < world_size - 1 {
        let (stream, addr) = listener.accept().await.map_err(DistErr::Io)?;
        let (mut rx, tx) = stream.into_split();

        let hello = proto::recv_hello(&mut rx).await.map_err(DistErr::Io)?;

        if hello.group != group_name {
            return Err(DistErr::GroupMismatch {
                expected: group_name.to_string(),
                got: hello.group,
            });
        }

        if hello.rank == 0 || hello.rank >= world_size || slots[hello.rank - 1].is_some() {
            return Err(DistErr::BadPeerRank { rank: hello.rank });
        }

        info!("rank {} joined from {addr}", hello.rank);
        slots[hello.rank - 1] = Some((rx, tx));
        joined += 1;
    }

    let peers = slots.into_iter().flatten().collect();
    Ok(Role::Coordinator { peers })
}

async fn join(url: &str, rank: usize, group_name: &str) -> Result<Role> {
    let mut attempt = 0;

    let stream = loop {
        match TcpStream::connect(url).await {
            Ok(stream) => break stream,
            Err(source) => {
                attempt += 1;
                if attempt >= CONNECT_ATTEMPTS {
                    return Err(DistErr::ConnectFailed {
                        addr: url.to_string(),
                        source,
                    });
                }

                debug!("coordinator at {url} not reachable yet, retrying");
                sleep(CONNECT_BACKOFF).await;
            }
        }
    };

    let (rx, mut tx) = stream.into_split();
    let hello = Hello {
        rank,
        group: group_name.to_string(),
    };
    proto::send_hello(&mut tx, &hello).await.map_err(DistErr::Io)?;

    Ok(Role::Member { up: (rx, tx) })
}

async fn reduce_as_coordinator<R, W>(
    peers: &mut [(R, W)],
    data: &mut [f32],
    scratch: &mut Vec<f32>,
    world_size: usize,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    scratch.resize(data.len(), 0.0);

    for (rx, _) in peers.iter_mut() {
        proto::recv_data_into(rx, scratch).await?;
        for (d, s) in data.iter_mut().zip(scratch.iter()) {
            *d += *s;
        }
    }

    let inv = 1.0 / world_size as f32;
    for d in data.iter_mut() {
        *d *= inv;
    }

    for (_, tx) in peers.iter_mut() {
        proto::send_data(tx, data).await?;
    }

    Ok(())
}

async fn reduce_as_member<R, W>(rx: &mut R, tx: &mut W, data: &mut [f32]) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    proto::send_data(tx, data).await?;
    proto::recv_data_into(rx, data).await
}

async fn barrier_as_coordinator<R, W>(peers: &mut [(R, W)]) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    for (rx, _) in peers.iter_mut() {
        proto::recv_barrier(rx).await?;
    }

    for (_, tx) in peers.iter_mut() {
        proto::send_barrier(tx).await?;
    }

    Ok(())
}

async fn barrier_as_member<R, W>(rx: &mut R, tx: &mut W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    proto::send_barrier(tx).await?;
    proto::recv_barrier(rx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io as tokio_io;

    const BUF_SIZE: usize = 4096;

    #[tokio::test]
    async fn two_member_reduce_averages_both_buffers() {
        let (coord_stream, member_stream) = tokio_io::duplex(BUF_SIZE);
        let (co_rx, co_tx) = tokio_io::split(coord_stream);
        let (me_rx, me_tx) = tokio_io::split(member_stream);

        let member = tokio::spawn(async move {
            let (mut rx, mut tx) = (me_rx, me_tx);
            let mut data = [3.0f32, -1.0];
            reduce_as_member(&mut rx, &mut tx, &mut data).await.unwrap();
            data
        });

        let mut peers = vec![(co_rx, co_tx)];
        let mut data = [1.0f32, 1.0];
        let mut scratch = Vec::new();
        reduce_as_coordinator(&mut peers, &mut data, &mut scratch, 2)
            .await
            .unwrap();

        // (1 + 3) / 2 and (1 - 1) / 2 on both sides.
        assert_eq!(data, [2.0, 0.0]);
        assert_eq!(member.await.unwrap(), [2.0, 0.0]);
    }

    #[tokio::test]
    async fn three_way_reduce_averages_everything() {
        let (s1, c1) = tokio_io::duplex(BUF_SIZE);
        let (s2, c2) = tokio_io::duplex(BUF_SIZE);

        let spawn_member = |stream, value: f32| {
            tokio::spawn(async move {
                let (mut rx, mut tx) = tokio_io::split(stream);
                let mut data = [value];
                reduce_as_member(&mut rx, &mut tx, &mut data).await.unwrap();
                data[0]
            })
        };

        let m1 = spawn_member(c1, 2.0);
        let m2 = spawn_member(c2, 6.0);

        let mut peers = vec![tokio_io::split(s1), tokio_io::split(s2)];
        let mut data = [1.0f32];
        let mut scratch = Vec::new();
        reduce_as_coordinator(&mut peers, &mut data, &mut scratch, 3)
            .await
            .unwrap();

        assert_eq!(data, [3.0]);
        assert_eq!(m1.await.unwrap(), 3.0);
        assert_eq!(m2.await.unwrap(), 3.0);
    }

    #[tokio::test]
    async fn barrier_releases_both_sides() {
        let (coord_stream, member_stream) = tokio_io::duplex(BUF_SIZE);

        let member = tokio::spawn(async move {
            let (mut rx, mut tx) = tokio_io::split(member_stream);
            barrier_as_member(&mut rx, &mut tx).await
        });

        let mut peers = vec![tokio_io::split(coord_stream)];
        barrier_as_coordinator(&mut peers).await.unwrap();
        member.await.unwrap().unwrap();
    }
}
