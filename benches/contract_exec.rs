//! Contract call overhead: slot acquisition, stack carving, lock, invoke.

use criterion::{criterion_group, criterion_main, Criterion};

use nacre::contract::{
    ContractExec, ContractRegistry, FunctionContext, IoSizes, ProcedureContext, NULL_ID,
};

const SIZES: IoSizes = IoSizes {
    input: 32,
    output: 32,
    locals: 256,
};

fn accumulate(
    _ctx: &mut ProcedureContext<'_>,
    state: &mut [u8],
    input: &[u8],
    _output: &mut [u8],
    _locals: &mut [u8],
) {
    let mut total = u64::from_le_bytes(state[..8].try_into().unwrap());
    total = total.wrapping_add(u64::from_le_bytes(input[..8].try_into().unwrap()));
    state[..8].copy_from_slice(&total.to_le_bytes());
}

fn inspect(
    _ctx: &FunctionContext<'_>,
    state: &[u8],
    _input: &[u8],
    output: &mut [u8],
    _locals: &mut [u8],
) {
    output[..8].copy_from_slice(&state[..8]);
}

fn exec_core() -> ContractExec {
    let mut registry = ContractRegistry::new();
    registry.set_state_size(1, 64);
    registry.register_user_procedure(1, 0, accumulate, SIZES);
    registry.register_user_function(1, 0, inspect, SIZES);
    ContractExec::new(registry)
}

fn bench_procedure_call(c: &mut Criterion) {
    let exec = exec_core();
    let input = 1u64.to_le_bytes();
    c.bench_function("user_procedure_call", |b| {
        b.iter(|| exec.call_user_procedure(1, 0, NULL_ID, 0, &input).unwrap());
    });
}

fn bench_function_call(c: &mut Criterion) {
    let exec = exec_core();
    c.bench_function("user_function_call", |b| {
        b.iter(|| {
            let call = exec.call_user_function(1, 0, &[]).unwrap();
            let value = u64::from_le_bytes(call.output()[..8].try_into().unwrap());
            call.free_buffer();
            value
        });
    });
}

criterion_group!(benches, bench_procedure_call, bench_function_call);
criterion_main!(benches);
