//! Contract execution core: per-contract state images behind reader/writer
//! locks, the state-change bitmap, execution-time accounting, and the four
//! call entry points (system procedure, user procedure, user function,
//! nested cross-contract calls).

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{RwLock, RwLockReadGuard};

use crate::config::{
    CONTRACT_COUNT, CONTRACT_EXECUTION_SLOTS, CONTRACT_STACK_CAPACITY, STATE_CHANGE_FLAG_WORDS,
};
use crate::contract::ledger::ContractLedger;
use crate::contract::registry::{ContractRegistry, IoSizes, SystemProcId};
use crate::contract::stack::{StackBuffer, StackGuard, StackPool};

/// 256-bit entity identifier. For a contract account the low 8 bytes carry
/// the contract index.
pub type ContractId = [u8; 32];

pub const NULL_ID: ContractId = [0u8; 32];

#[inline]
pub fn contract_id(contract_index: usize) -> ContractId {
    let mut id = [0u8; 32];
    id[..8].copy_from_slice(&(contract_index as u64).to_le_bytes());
    id
}

/// How many low pool slots function calls skip, keeping them free for
/// procedure (writer) calls.
pub const STACKS_RESERVED_FOR_WRITERS: usize = 1;

/// Why a contract call did not run. No unwinding: every error path releases
/// whatever it acquired first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecError {
    /// Contract index outside the deployed range.
    InvalidContract = 1,
    /// No handler registered for this (contract, input type).
    UnknownHandler = 2,
    /// The execution stack could not fit the call's buffers. Surfaced as a
    /// contract-level fault; the slot is released and the call never ran.
    StackOverflow = 3,
    /// The context has no execution stack (system procedures run without
    /// one), so nested calls and locals are unavailable.
    NoStack = 4,
}

/// One bit per contract, OR-merged by every writer release. Cleared by the
/// runtime at tick boundaries.
pub struct StateChangeFlags {
    words: [AtomicU64; STATE_CHANGE_FLAG_WORDS],
}

impl StateChangeFlags {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            words: [ZERO; STATE_CHANGE_FLAG_WORDS],
        }
    }

    #[inline(always)]
    pub fn set(&self, contract_index: usize) {
        self.words[contract_index >> 6].fetch_or(1u64 << (contract_index & 63), Ordering::AcqRel);
    }

    #[inline(always)]
    pub fn is_set(&self, contract_index: usize) -> bool {
        self.words[contract_index >> 6].load(Ordering::Acquire) & (1u64 << (contract_index & 63))
            != 0
    }

    /// Snapshot and clear, word by word.
    pub fn take(&self) -> [u64; STATE_CHANGE_FLAG_WORDS] {
        let mut out = [0u64; STATE_CHANGE_FLAG_WORDS];
        for (word, slot) in self.words.iter().zip(out.iter_mut()) {
            *slot = word.swap(0, Ordering::AcqRel);
        }
        out
    }
}

impl Default for StateChangeFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// The execution core. One instance per node; every entry point takes
/// `&self` and is safe to call from any execution processor.
pub struct ContractExec {
    registry: ContractRegistry,
    states: Box<[RwLock<Box<[u8]>>]>,
    change_flags: StateChangeFlags,
    execution_ticks: Box<[AtomicU64]>,
    stacks: StackPool,
    ledger: ContractLedger,
}

impl ContractExec {
    pub fn new(registry: ContractRegistry) -> Self {
        Self::with_slots(registry, CONTRACT_EXECUTION_SLOTS, CONTRACT_STACK_CAPACITY)
    }

    /// Deployment-tunable pool geometry; the defaults come from
    /// [`crate::config`].
    pub fn with_slots(registry: ContractRegistry, slots: usize, stack_capacity: usize) -> Self {
        let mut states = Vec::with_capacity(CONTRACT_COUNT);
        for contract_index in 0..CONTRACT_COUNT {
            let size = registry.state_size(contract_index);
            states.push(RwLock::new(vec![0u8; size].into_boxed_slice()));
        }
        let mut execution_ticks = Vec::with_capacity(CONTRACT_COUNT);
        execution_ticks.resize_with(CONTRACT_COUNT, || AtomicU64::new(0));

        Self {
            registry,
            states: states.into_boxed_slice(),
            change_flags: StateChangeFlags::new(),
            execution_ticks: execution_ticks.into_boxed_slice(),
            stacks: StackPool::new(slots, stack_capacity),
            ledger: ContractLedger::new(),
        }
    }

    #[inline(always)]
    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    #[inline(always)]
    pub fn ledger(&self) -> &ContractLedger {
        &self.ledger
    }

    #[inline(always)]
    pub fn change_flags(&self) -> &StateChangeFlags {
        &self.change_flags
    }

    /// Snapshot and clear the state-change bitmap; the runtime calls this at
    /// every tick boundary.
    pub fn take_state_changes(&self) -> [u64; STATE_CHANGE_FLAG_WORDS] {
        self.change_flags.take()
    }

    /// Accumulated execution time of one contract, in nanoseconds.
    pub fn execution_ticks(&self, contract_index: usize) -> u64 {
        self.execution_ticks
            .get(contract_index)
            .map(|ticks| ticks.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Shared read of a contract state image (concurrent with other readers).
    pub fn read_state(&self, contract_index: usize) -> Option<RwLockReadGuard<'_, Box<[u8]>>> {
        Some(self.states.get(contract_index)?.read())
    }

    /// Overwrite a contract state image (boot-time restore).
    pub fn load_state(&self, contract_index: usize, image: &[u8]) -> bool {
        let Some(state) = self.states.get(contract_index) else {
            return false;
        };
        let mut state = state.write();
        if state.len() != image.len() {
            return false;
        }
        state.copy_from_slice(image);
        true
    }

    // ---- Entry points ------------------------------------------------------

    /// Run a lifecycle hook on the contract state: writer lock, invoke,
    /// account elapsed time, release, mark the state changed. No user input
    /// and no execution stack.
    pub fn call_system_procedure(
        &self,
        contract_index: usize,
        id: SystemProcId,
    ) -> Result<(), ExecError> {
        if contract_index >= CONTRACT_COUNT {
            debug_assert!(false, "system procedure on contract {contract_index}");
            return Err(ExecError::InvalidContract);
        }
        let procedure = self
            .registry
            .system_procedure(contract_index, id)
            .ok_or(ExecError::UnknownHandler)?;

        let mut ctx = ProcedureContext {
            exec: self,
            contract_index,
            originator: NULL_ID,
            invocator: NULL_ID,
            current_contract_id: contract_id(contract_index),
            invocation_reward: 0,
            stack: None,
        };

        {
            let mut state = self.states[contract_index].write();
            self.timed(contract_index, || procedure(&mut ctx, &mut state));
        }
        self.change_flags.set(contract_index);
        Ok(())
    }

    /// Run a user procedure: claim an execution stack, carve the input,
    /// output, and locals buffers from it (input zero-padded to its declared
    /// size), then writer-lock the state and invoke. The procedure's output
    /// is discarded.
    pub fn call_user_procedure(
        &self,
        contract_index: usize,
        input_type: u16,
        originator: ContractId,
        invocation_reward: i64,
        input: &[u8],
    ) -> Result<(), ExecError> {
        if contract_index >= CONTRACT_COUNT {
            debug_assert!(false, "user procedure on contract {contract_index}");
            return Err(ExecError::InvalidContract);
        }
        let (procedure, sizes) = self
            .registry
            .user_procedure(contract_index, input_type)
            .ok_or(ExecError::UnknownHandler)?;

        let slot = self.stacks.acquire(0);
        let stack = slot.stack();
        debug_assert_eq!(stack.size(), 0);

        let block = alloc_io(stack, sizes, input).ok_or(ExecError::StackOverflow)?;
        let (input_buf, output_buf, locals_buf) = unsafe { carve_io(block, sizes) };

        let mut ctx = ProcedureContext {
            exec: self,
            contract_index,
            originator,
            invocator: originator,
            current_contract_id: contract_id(contract_index),
            invocation_reward,
            stack: Some(stack),
        };

        {
            let mut state = self.states[contract_index].write();
            self.timed(contract_index, || {
                procedure(&mut ctx, &mut state, input_buf, output_buf, locals_buf)
            });
        }
        self.change_flags.set(contract_index);

        stack.free();
        debug_assert_eq!(stack.size(), 0);
        Ok(())
    }

    /// Run a user function under a reader lock. Reserves the low pool slots
    /// for writers. The returned handle keeps the slot until dropped so the
    /// caller can inspect the output buffer.
    pub fn call_user_function(
        &self,
        contract_index: usize,
        input_type: u16,
        input: &[u8],
    ) -> Result<FunctionCall<'_>, ExecError> {
        if contract_index >= CONTRACT_COUNT {
            debug_assert!(false, "user function on contract {contract_index}");
            return Err(ExecError::InvalidContract);
        }
        let (function, sizes) = self
            .registry
            .user_function(contract_index, input_type)
            .ok_or(ExecError::UnknownHandler)?;

        let slot = self.stacks.acquire(STACKS_RESERVED_FOR_WRITERS);
        let stack = slot.stack();
        debug_assert_eq!(stack.size(), 0);

        let block = alloc_io(stack, sizes, input).ok_or(ExecError::StackOverflow)?;
        let (input_buf, output_buf, locals_buf) = unsafe { carve_io(block, sizes) };

        let ctx = FunctionContext {
            exec: self,
            contract_index,
            originator: NULL_ID,
            invocator: NULL_ID,
            current_contract_id: contract_id(contract_index),
            invocation_reward: 0,
            stack: Some(stack),
        };

        {
            let state = self.states[contract_index].read();
            self.timed(contract_index, || {
                function(&ctx, &state, input_buf, output_buf, locals_buf)
            });
        }

        let output = NonNull::new(output_buf.as_mut_ptr()).ok_or(ExecError::StackOverflow)?;
        Ok(FunctionCall {
            _slot: slot,
            output,
            output_len: sizes.output as usize,
        })
    }

    // ---- Nested calls (invoked through the contexts) -----------------------

    fn nested_function(
        &self,
        stack: &StackBuffer,
        originator: ContractId,
        invocator: ContractId,
        invocation_reward: i64,
        other_index: usize,
        input_type: u16,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(), ExecError> {
        if other_index >= CONTRACT_COUNT {
            debug_assert!(false, "nested function on contract {other_index}");
            return Err(ExecError::InvalidContract);
        }
        let (function, sizes) = self
            .registry
            .user_function(other_index, input_type)
            .ok_or(ExecError::UnknownHandler)?;

        let block = alloc_io(stack, sizes, input).ok_or(ExecError::StackOverflow)?;
        let (input_buf, output_buf, locals_buf) = unsafe { carve_io(block, sizes) };

        let ctx = FunctionContext {
            exec: self,
            contract_index: other_index,
            originator,
            invocator,
            current_contract_id: contract_id(other_index),
            invocation_reward,
            stack: Some(stack),
        };

        {
            let state = self.states[other_index].read();
            self.timed(other_index, || {
                function(&ctx, &state, input_buf, output_buf, locals_buf)
            });
        }

        let copied = output.len().min(output_buf.len());
        output[..copied].copy_from_slice(&output_buf[..copied]);
        stack.free();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn nested_procedure(
        &self,
        stack: &StackBuffer,
        caller_index: usize,
        originator: ContractId,
        invocator: ContractId,
        invocation_reward: i64,
        other_index: usize,
        input_type: u16,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(), ExecError> {
        if other_index >= CONTRACT_COUNT {
            debug_assert!(false, "nested procedure on contract {other_index}");
            return Err(ExecError::InvalidContract);
        }
        let (procedure, sizes) = self
            .registry
            .user_procedure(other_index, input_type)
            .ok_or(ExecError::UnknownHandler)?;

        // The reward moves before the callee runs; an uncovered debit coerces
        // the reward to zero but the call still proceeds.
        let mut reward = invocation_reward;
        if self.ledger.transfer(caller_index, other_index, reward) < 0 {
            reward = 0;
        }

        let block = alloc_io(stack, sizes, input).ok_or(ExecError::StackOverflow)?;
        let (input_buf, output_buf, locals_buf) = unsafe { carve_io(block, sizes) };

        let mut ctx = ProcedureContext {
            exec: self,
            contract_index: other_index,
            originator,
            invocator,
            current_contract_id: contract_id(other_index),
            invocation_reward: reward,
            stack: Some(stack),
        };

        {
            let mut state = self.states[other_index].write();
            self.timed(other_index, || {
                procedure(&mut ctx, &mut state, input_buf, output_buf, locals_buf)
            });
        }
        self.change_flags.set(other_index);

        let copied = output.len().min(output_buf.len());
        output[..copied].copy_from_slice(&output_buf[..copied]);
        stack.free();
        Ok(())
    }

    #[inline]
    fn timed<R>(&self, contract_index: usize, run: impl FnOnce() -> R) -> R {
        let started = Instant::now();
        let result = run();
        self.execution_ticks[contract_index]
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        result
    }
}

/// Completed function call holding its execution slot so the output buffer
/// stays valid. Dropping it frees the stack and releases the slot.
pub struct FunctionCall<'a> {
    _slot: StackGuard<'a>,
    output: NonNull<u8>,
    output_len: usize,
}

impl FunctionCall<'_> {
    #[inline]
    pub fn output(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.output.as_ptr(), self.output_len) }
    }

    /// Explicit release; equivalent to dropping the handle.
    #[inline]
    pub fn free_buffer(self) {}
}

/// Call context a procedure runs with. Writer side: may mutate its own state
/// and call into other contracts, both functions and procedures.
pub struct ProcedureContext<'a> {
    exec: &'a ContractExec,
    pub contract_index: usize,
    /// Signer the call chain started from.
    pub originator: ContractId,
    /// Direct caller (equals `originator` at the first invocation level).
    pub invocator: ContractId,
    pub current_contract_id: ContractId,
    pub invocation_reward: i64,
    stack: Option<&'a StackBuffer>,
}

/// Call context a function runs with. Reader side: no state mutation, no
/// procedure calls.
pub struct FunctionContext<'a> {
    exec: &'a ContractExec,
    pub contract_index: usize,
    pub originator: ContractId,
    pub invocator: ContractId,
    pub current_contract_id: ContractId,
    pub invocation_reward: i64,
    stack: Option<&'a StackBuffer>,
}

macro_rules! shared_context_api {
    ($context:ident) => {
        impl<'a> $context<'a> {
            /// Call another contract's read-only function. The nested call's
            /// buffers come from this call's execution stack and are popped
            /// before returning; `output` receives the callee's output.
            pub fn call_contract_function(
                &self,
                other_index: usize,
                input_type: u16,
                input: &[u8],
                output: &mut [u8],
            ) -> Result<(), ExecError> {
                let stack = self.stack.ok_or(ExecError::NoStack)?;
                self.exec.nested_function(
                    stack,
                    self.originator,
                    self.current_contract_id,
                    self.invocation_reward,
                    other_index,
                    input_type,
                    input,
                    output,
                )
            }

            /// Zero-filled scratch block from this call's execution stack,
            /// scoped to the closure and popped on exit.
            pub fn with_locals<R>(
                &self,
                size: usize,
                f: impl FnOnce(&mut [u8]) -> R,
            ) -> Result<R, ExecError> {
                let stack = self.stack.ok_or(ExecError::NoStack)?;
                let block = stack.allocate(size).ok_or(ExecError::StackOverflow)?;
                unsafe {
                    core::ptr::write_bytes(block.as_ptr(), 0, size);
                }
                let locals = unsafe { core::slice::from_raw_parts_mut(block.as_ptr(), size) };
                let result = f(locals);
                stack.free();
                Ok(result)
            }

            #[inline(always)]
            pub fn stack_size(&self) -> usize {
                self.stack.map(|stack| stack.size()).unwrap_or(0)
            }
        }
    };
}

shared_context_api!(ProcedureContext);
shared_context_api!(FunctionContext);

impl<'a> ProcedureContext<'a> {
    /// Call another contract's procedure, moving `invocation_reward` from
    /// this contract's account to the callee's first. Calling back into a
    /// contract whose state lock this chain already holds deadlocks.
    pub fn call_contract_procedure(
        &mut self,
        other_index: usize,
        input_type: u16,
        invocation_reward: i64,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(), ExecError> {
        let stack = self.stack.ok_or(ExecError::NoStack)?;
        self.exec.nested_procedure(
            stack,
            self.contract_index,
            self.originator,
            self.current_contract_id,
            invocation_reward,
            other_index,
            input_type,
            input,
            output,
        )
    }
}

/// Carve `input ‖ output ‖ locals` out of one stack block. The block was
/// zeroed and the caller's input copied by [`alloc_io`]; the three slices are
/// disjoint by construction.
unsafe fn carve_io<'x>(
    block: NonNull<u8>,
    sizes: IoSizes,
) -> (&'x [u8], &'x mut [u8], &'x mut [u8]) {
    let input_len = sizes.input as usize;
    let output_len = sizes.output as usize;
    let locals_len = sizes.locals as usize;
    let base = block.as_ptr();
    unsafe {
        (
            core::slice::from_raw_parts(base, input_len),
            core::slice::from_raw_parts_mut(base.add(input_len), output_len),
            core::slice::from_raw_parts_mut(base.add(input_len + output_len), locals_len),
        )
    }
}

/// One allocation for the whole i/o frame: zero-initialized, with the
/// caller's bytes over the input prefix (short input is the padded case).
fn alloc_io(stack: &StackBuffer, sizes: IoSizes, input: &[u8]) -> Option<NonNull<u8>> {
    let total = sizes.input as usize + sizes.output as usize + sizes.locals as usize;
    let block = stack.allocate(total)?;
    unsafe {
        core::ptr::write_bytes(block.as_ptr(), 0, total);
        let copied = input.len().min(sizes.input as usize);
        core::ptr::copy_nonoverlapping(input.as_ptr(), block.as_ptr(), copied);
    }
    Some(block)
}
