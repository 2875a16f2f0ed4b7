//! Epoch-scoped storage: double-buffered tick/transaction stores with
//! seamless rollover, plus the optional on-disk snapshot.

pub mod arena;
pub mod digest_index;
pub mod epoch;
pub mod mempool;
pub mod tick_store;

#[cfg(feature = "snapshot")]
pub mod snapshot;

pub use arena::{AppendError, ArenaState, TxArena};
pub use digest_index::DigestIndex;
pub use epoch::{EpochWindow, Transition};
pub use mempool::{PoolRead, TxsPool};
pub use tick_store::{TickData, TickStore, TickVote};

#[cfg(feature = "snapshot")]
pub use snapshot::{LoadError, SaveError, SnapshotMeta};
