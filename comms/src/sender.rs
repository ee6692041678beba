use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{FRAME_LEN_SIZE, FrameLen, Serialize};

/// Writes frames to an async writer.
///
/// The owned part of every message is staged in a buffer kept across sends,
/// its borrowed tail goes straight to the writer.
#[derive(Debug)]
pub struct FrameSender<W> {
    tx: W,
    staging: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            staging: Vec::new(),
        }
    }

    /// Frames `msg` and flushes it.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self { tx, staging } = self;

        staging.clear();
        staging.extend_from_slice(&[0; FRAME_LEN_SIZE]);

        let tail = msg.serialize(staging).unwrap_or_default();
        let len = (staging.len() - FRAME_LEN_SIZE + tail.len()) as FrameLen;
        staging[..FRAME_LEN_SIZE].copy_from_slice(&len.to_be_bytes());

        tx.write_all(staging).await?;
        if !tail.is_empty() {
            tx.write_all(tail).await?;
        }

        tx.flush().await
    }
}
