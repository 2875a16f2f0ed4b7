//! End-to-end tour: boot a node core, admit pending transactions, commit one
//! into the tick store, run a contract procedure, and roll the epoch over.
//!
//! Run with `cargo run --example walkthrough`.

use nacre::contract::{IoSizes, ProcedureContext, SystemProcId};
use nacre::prelude::*;

fn counter_proc(
    _ctx: &mut ProcedureContext<'_>,
    state: &mut [u8],
    input: &[u8],
    output: &mut [u8],
    _locals: &mut [u8],
) {
    let mut counter = u64::from_le_bytes(state[..8].try_into().unwrap());
    counter += u64::from_le_bytes(input[..8].try_into().unwrap());
    state[..8].copy_from_slice(&counter.to_le_bytes());
    output[..8].copy_from_slice(&counter.to_le_bytes());
}

fn begin_tick_hook(_ctx: &mut ProcedureContext<'_>, state: &mut [u8]) {
    state[8] = state[8].wrapping_add(1);
}

fn tx_bytes(tick: u32, input: &[u8]) -> Vec<u8> {
    let header = TxHeader {
        source_public_key: [1u8; 32],
        destination_public_key: [2u8; 32],
        amount: I64::new(250),
        tick: U32::new(tick),
        input_type: U16::new(0),
        input_size: U16::new(input.len() as u16),
    };
    encode_transaction(&header, input, &[9u8; 64])
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut registry = ContractRegistry::new();
    registry.set_state_size(1, 64);
    registry.register_user_procedure(
        1,
        0,
        counter_proc,
        IoSizes {
            input: 8,
            output: 8,
            locals: 32,
        },
    );
    registry.register_system_procedure(1, SystemProcId::BeginTick, begin_tick_hook);

    let mut node = NodeCore::new(registry);
    node.begin_epoch(1000);

    // Pending side: three transactions for tick 1005.
    for seq in 0..3u64 {
        let accepted = node.pool.update(&tx_bytes(1005, &seq.to_le_bytes()));
        println!("admitted pending tx {seq}: {accepted}");
    }
    println!("pending after 1004: {}", node.pool.pending_after(1004));

    // Committed side: the scheduler moves one into the tick store.
    let committed = tx_bytes(1005, &0u64.to_le_bytes());
    let digest = TxView::parse(&committed).unwrap().digest();
    let offset = node.ticks.add_transaction(0, &committed).unwrap();
    println!("committed tx at arena offset {offset}");
    println!(
        "digest lookup agrees: {}",
        node.ticks.find_by_digest(&digest) == Some(offset)
    );

    // Contract side: a tick's worth of execution.
    node.exec
        .call_system_procedure(1, SystemProcId::BeginTick)
        .unwrap();
    node.exec
        .call_user_procedure(1, 0, NULL_ID, 0, &41u64.to_le_bytes())
        .unwrap();
    let changed = node.finish_tick();
    println!("state-change bitmap after tick: {:#06b}", changed[0]);

    // Epoch boundary: keep the tail, restart the arenas.
    node.begin_epoch(1100);
    node.check_state_consistency();
    println!(
        "rolled over; kept window [{}, {})",
        node.ticks.window().old_tick_begin,
        node.ticks.window().old_tick_end
    );
    println!("pending tx for 1005 still readable: {}", {
        let read = node.pool.read();
        read.get(1005, 0).is_some()
    });
}
