use std::{error::Error, fmt, io};

use comms::SampleId;

/// The collective module's result type.
pub type Result<T> = std::result::Result<T, CollectiveErr>;

/// Failures of a collective operation. Every variant is fatal for the run, a
/// process set that disagrees on a collective cannot keep training safely.
#[derive(Debug)]
pub enum CollectiveErr {
    Io(io::Error),
    UnexpectedMessage {
        rank: usize,
        op: &'static str,
        got: &'static str,
    },
    PeerFailed {
        rank: usize,
        detail: String,
    },
    LossCountMismatch {
        rank: usize,
        got: usize,
        expected: usize,
    },
    GatherCountMismatch {
        got: usize,
        expected: usize,
    },
    UnknownSample(SampleId),
    DuplicateSample(SampleId),
    /// The canonical order itself lists a sample twice.
    AmbiguousOrder(SampleId),
    InvalidRank {
        rank: usize,
        world_size: usize,
    },
    DuplicateRank(usize),
    MissingPeers {
        got: usize,
        expected: usize,
    },
    HandshakeFailed {
        got: &'static str,
    },
    WorldSizeMismatch {
        rank: usize,
        got: usize,
        expected: usize,
    },
}

impl fmt::Display for CollectiveErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectiveErr::Io(e) => write!(f, "io error: {e}"),
            CollectiveErr::UnexpectedMessage { rank, op, got } => {
                write!(f, "unexpected message from rank {rank} during {op}: got {got}")
            }
            CollectiveErr::PeerFailed { rank, detail } => {
                write!(f, "rank {rank} failed: {detail}")
            }
            CollectiveErr::LossCountMismatch {
                rank,
                got,
                expected,
            } => write!(
                f,
                "rank {rank} reduced {got} losses, expected {expected}"
            ),
            CollectiveErr::GatherCountMismatch { got, expected } => write!(
                f,
                "gathered {got} validation samples, the validation set has {expected}"
            ),
            CollectiveErr::UnknownSample(id) => {
                write!(f, "gathered sample {id} is not part of the validation set")
            }
            CollectiveErr::AmbiguousOrder(id) => {
                write!(f, "sample {id} appears twice in the canonical order")
            }
            CollectiveErr::DuplicateSample(id) => {
                write!(f, "sample {id} was gathered more than once")
            }
            CollectiveErr::InvalidRank { rank, world_size } => {
                write!(f, "rank {rank} is out of range for world size {world_size}")
            }
            CollectiveErr::DuplicateRank(rank) => write!(f, "rank {rank} joined twice"),
            CollectiveErr::MissingPeers { got, expected } => {
                write!(f, "got {got} peer connections, expected {expected}")
            }
            CollectiveErr::HandshakeFailed { got } => {
                write!(f, "expected a join message during the handshake, got {got}")
            }
            CollectiveErr::WorldSizeMismatch {
                rank,
                got,
                expected,
            } => write!(
                f,
                "rank {rank} expects world size {got}, the coordinator expects {expected}"
            ),
        }
    }
}

impl Error for CollectiveErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CollectiveErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CollectiveErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
