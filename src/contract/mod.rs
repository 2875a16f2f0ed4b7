//! Smart-contract execution: stack-allocator pool, handler registry, reward
//! ledger, and the execution core.

pub mod exec;
pub mod ledger;
pub mod registry;
pub mod stack;

pub use exec::{
    contract_id, ContractExec, ContractId, ExecError, FunctionCall, FunctionContext,
    ProcedureContext, StateChangeFlags, NULL_ID, STACKS_RESERVED_FOR_WRITERS,
};
pub use ledger::{ContractLedger, TRANSFER_REFUSED};
pub use registry::{
    ContractRegistry, IoSizes, SystemProcId, SystemProcedure, UserFunction, UserProcedure,
    MAX_INPUT_TYPES, SYSTEM_PROC_COUNT,
};
pub use stack::{StackBuffer, StackGuard, StackPool};
