//! The node-level aggregate: one owned instance wiring the committed store,
//! the mempool, and the execution core through epoch and tick boundaries.

use crate::config::{STATE_CHANGE_FLAG_WORDS, TRANSACTIONS_PER_TICK};
use crate::contract::{ContractExec, ContractRegistry};
use crate::storage::{TickStore, TxsPool};

/// Everything a core node keeps hot. Passed by reference to every entry
/// point; there is exactly one per process, but nothing here is static.
pub struct NodeCore {
    pub ticks: TickStore,
    pub pool: TxsPool,
    pub exec: ContractExec,
}

impl NodeCore {
    pub fn new(registry: ContractRegistry) -> Self {
        Self {
            ticks: TickStore::new(),
            pool: TxsPool::new(),
            exec: ContractExec::new(registry),
        }
    }

    /// Roll every store over to the epoch starting at `new_initial_tick`.
    /// The committed store goes first (arena, slot table, then tick rows),
    /// the mempool second; both preserve the kept tail on a seamless
    /// transition.
    pub fn begin_epoch(&mut self, new_initial_tick: u32) {
        log::info!("beginning epoch at tick {new_initial_tick}");
        self.ticks.begin_epoch(new_initial_tick);
        self.pool.begin_epoch(new_initial_tick);
    }

    /// Move a scheduled tick's pending transactions into the committed
    /// store, slot for slot. Returns how many landed; slots the committed
    /// side already holds are skipped.
    pub fn commit_pending_transactions(&self, tick: u32) -> usize {
        let read = self.pool.read();
        let mut committed = 0;
        for slot in 0..TRANSACTIONS_PER_TICK {
            let Some(tx) = read.get(tick, slot) else {
                break;
            };
            if self.ticks.add_transaction(slot, tx.as_bytes()).is_ok() {
                committed += 1;
            }
        }
        committed
    }

    /// Tick boundary: hand back which contracts mutated state during the
    /// tick and reset the bitmap for the next one.
    pub fn finish_tick(&self) -> [u64; STATE_CHANGE_FLAG_WORDS] {
        self.exec.take_state_changes()
    }

    /// Expensive full-state audit. Panics on violation.
    pub fn check_state_consistency(&self) {
        self.ticks.check_state_consistency();
        self.pool.check_state_consistency();
    }
}
