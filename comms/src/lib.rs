//! Length-prefixed framing and the message set exchanged by the processes of a run.
//!
//! Every frame is an 8 byte big-endian length followed by that many bytes of
//! payload. What the payload means is up to `msg`.

mod deserialize;
pub mod msg;
mod receiver;
pub mod records;
mod sender;
mod serialize;

use tokio::io::{AsyncRead, AsyncWrite};

pub use deserialize::Deserialize;
pub use receiver::{FrameReceiver, Word};
pub use records::{LossMap, SampleId, SampleRecord};
pub use sender::FrameSender;
pub use serialize::Serialize;

type FrameLen = u64;
const FRAME_LEN_SIZE: usize = size_of::<FrameLen>();

/// Frames above this size are rejected unless the receiver is told otherwise.
pub const DEFAULT_MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Wraps a reader and a writer into the two ends of a framed channel.
///
/// # Arguments
/// * `rx` - The half frames are read from.
/// * `tx` - The half frames are written to.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}
