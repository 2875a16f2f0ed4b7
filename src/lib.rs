//! # Nacre
//!
//! Epoch-scoped storage and contract execution core for a tick-based ledger
//! node.
//!
//! ## Core Philosophy
//!
//! Every buffer is sized once, at startup, from the deployment constants in
//! [`config`]. After that the hot paths bump, index, and lock — they never
//! allocate. Epoch rollover is the only moment storage is reshaped, and it
//! takes `&mut self`, so the type system rules out readers observing it.
//!
//! ## Primary API Surface
//!
//! - [`TickStore`] - Committed tick headers, computor votes, transactions,
//!   and a digest index, double-buffered across epochs
//! - [`TxsPool`] - Pending-transaction mempool with per-tick admission counts
//! - [`ContractExec`] - Reader/writer-locked contract states, execution-slot
//!   stacks, and the state-change bitmap
//! - [`NodeCore`] - The owned aggregate wiring epoch and tick boundaries
//!
//! ## Design Constraints
//!
//! - **Fixed capacity** everywhere; admission failure is a `false`, never a
//!   resize
//! - **POD layouts** via zerocopy: the snapshot files are the in-memory
//!   bytes, little-endian, no transform
//! - **Exception-free**: plain error enums with explicit discriminants;
//!   every path that takes a lock releases it before returning
//! - **Offsets, not pointers**: slot tables and the digest index store arena
//!   offsets that survive the epoch rebase
//!
//! ## Example
//!
//! ```rust
//! use nacre::prelude::*;
//!
//! let mut node = NodeCore::new(ContractRegistry::new());
//! node.begin_epoch(1000);
//!
//! // Admit a pending transaction for tick 1005.
//! let header = TxHeader {
//!     source_public_key: [1u8; 32],
//!     destination_public_key: [2u8; 32],
//!     amount: I64::new(100),
//!     tick: U32::new(1005),
//!     input_type: U16::new(0),
//!     input_size: U16::new(0),
//! };
//! let bytes = encode_transaction(&header, &[], &[0u8; 64]);
//! assert!(node.pool.update(&bytes));
//! assert_eq!(node.pool.tick_tx_count(1005), 1);
//! ```

pub mod config;
pub mod contract;
pub mod storage;
pub mod tx;

mod runtime;

pub use runtime::NodeCore;

/// Prelude for convenient imports of primary API types.
pub mod prelude {
    pub use crate::contract::{
        contract_id, ContractExec, ContractId, ContractLedger, ContractRegistry, ExecError,
        FunctionCall, FunctionContext, IoSizes, ProcedureContext, StateChangeFlags, SystemProcId,
        NULL_ID,
    };
    pub use crate::runtime::NodeCore;
    pub use crate::storage::{
        AppendError, EpochWindow, TickData, TickStore, TickVote, Transition, TxsPool,
    };
    pub use crate::tx::{encode_transaction, Digest, TxHeader, TxView, I64, U16, U32};
}

pub use contract::{ContractExec, ContractRegistry};
pub use storage::{TickStore, TxsPool};
pub use tx::{TxHeader, TxView};
