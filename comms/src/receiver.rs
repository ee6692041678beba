use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{DEFAULT_MAX_FRAME_LEN, Deserialize, FRAME_LEN_SIZE, FrameLen};

/// A plain number type a receive buffer can be made of.
///
/// Every implementor is at least 4 bytes aligned, so a frame read into a
/// buffer of them can be reinterpreted as `f32`s in place.
pub trait Word: bytemuck::Pod {}

impl Word for u32 {}
impl Word for u64 {}
impl Word for f32 {}
impl Word for f64 {}

/// Reads frames off an async reader.
#[derive(Debug)]
pub struct FrameReceiver<R> {
    rx: R,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Caps the size of the frames this receiver accepts.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Waits for the next frame and decodes it.
    ///
    /// # Arguments
    /// * `buf` - Scratch space the frame is read into, reused across calls.
    ///           The decoded `T` may borrow from it.
    ///
    /// # Errors
    /// `UnexpectedEof` if the peer hung up, `InvalidData` if the announced
    /// length is above the cap or the payload doesn't decode.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Word,
    {
        let mut len = [0; FRAME_LEN_SIZE];
        self.rx.read_exact(&mut len).await?;
        let len = FrameLen::from_be_bytes(len);

        let len = usize::try_from(len)
            .ok()
            .filter(|&len| len <= self.max_frame_len)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame of {len} bytes exceeds the {} byte cap", self.max_frame_len),
                )
            })?;

        buf.clear();
        buf.resize(len.div_ceil(size_of::<B>()), bytemuck::Zeroable::zeroed());

        let bytes = &mut bytemuck::cast_slice_mut::<B, u8>(buf)[..len];
        self.rx.read_exact(bytes).await?;

        T::deserialize(bytes)
    }
}
