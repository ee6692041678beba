mod error;
mod group;
mod local;
mod ordering;
mod solo;
mod star;
mod tcp;

pub use error::{CollectiveErr, Result};
pub use group::{COORDINATOR_RANK, ProcessGroup, ProcessGroupTemplate, ReduceTarget};
pub use local::{LocalStar, in_memory};
pub use ordering::order_by_identity;
pub use solo::Solo;
pub use star::Star;
pub use tcp::{TcpStar, rendezvous};
