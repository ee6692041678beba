use std::{borrow::Cow, io};

use crate::{Deserialize, LossMap, SampleRecord, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const KIND_ERR: u8 = 0;
const KIND_CONTROL: u8 = 1;
const KIND_LOSSES: u8 = 2;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// Loss values in the name order of a `LossMap`.
    Losses(&'a mut [f32]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Join { rank: usize, world_size: usize },
    Barrier,
    Records(Vec<SampleRecord>),
    Flag(bool),
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// Returns a short name for the message kind, used in protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Join { .. }) => "control/join",
            Msg::Control(Command::Barrier) => "control/barrier",
            Msg::Control(Command::Records(_)) => "control/records",
            Msg::Control(Command::Flag(_)) => "control/flag",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(Payload::Losses(_)) => "data/losses",
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(byte: u8) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind byte {byte}"),
        ))
    }
}

/// Copies the values of `losses` into `out` in name order.
///
/// # Arguments
/// * `losses` - The named losses.
/// * `out` - The flat buffer to refill.
pub fn flatten_losses(losses: &LossMap, out: &mut Vec<f32>) {
    out.clear();
    out.extend(losses.values().copied());
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                let header = (KIND_ERR as Header).to_be_bytes();
                buf.extend_from_slice(&header);
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                let header = (KIND_CONTROL as Header).to_be_bytes();
                buf.extend_from_slice(&header);

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, &cmd).unwrap();
                None
            }
            Msg::Data(Payload::Losses(values)) => {
                let header = (KIND_LOSSES as Header).to_be_bytes();
                buf.extend_from_slice(&header);
                Some(bytemuck::cast_slice::<f32, u8>(values))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at_mut(HEADER_SIZE);

        // SAFETY: We splitted the buffer to be of size `HEADER_SIZE` just above.
        let kind = Header::from_be_bytes(kind_buf.try_into().unwrap()) as u8;

        match kind {
            KIND_ERR => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            KIND_CONTROL => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            KIND_LOSSES => {
                let values = bytemuck::try_cast_slice_mut(rest).map_err(|err| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("{err:?}"))
                })?;

                Ok(Self::Data(Payload::Losses(values)))
            }
            byte => Self::invalid_kind_byte(byte),
        }
    }
}
