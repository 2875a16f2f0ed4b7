//! Contract handler tables: per-contract system procedures, user procedures,
//! and user functions, each user entry carrying its declared buffer sizes.

use crate::config::CONTRACT_COUNT;
use crate::contract::exec::{FunctionContext, ProcedureContext};

/// Input types a single contract can expose per handler kind.
pub const MAX_INPUT_TYPES: usize = 32;

/// Lifecycle hooks invoked by the node, in tick order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SystemProcId {
    Initialize = 0,
    BeginEpoch = 1,
    BeginTick = 2,
    EndTick = 3,
    EndEpoch = 4,
}

pub const SYSTEM_PROC_COUNT: usize = 5;

/// System procedure: runs on the contract state with no user input.
pub type SystemProcedure = fn(&mut ProcedureContext<'_>, &mut [u8]);

/// User procedure: `(ctx, state, input, output, locals)`, state writable.
pub type UserProcedure = fn(&mut ProcedureContext<'_>, &mut [u8], &[u8], &mut [u8], &mut [u8]);

/// User function: `(ctx, state, input, output, locals)`, state read-only.
pub type UserFunction = fn(&FunctionContext<'_>, &[u8], &[u8], &mut [u8], &mut [u8]);

/// Declared buffer geometry of one user handler. Callers may send fewer
/// input bytes than `input`; the remainder is zero-filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoSizes {
    pub input: u16,
    pub output: u16,
    pub locals: u32,
}

struct ContractEntry {
    state_size: usize,
    system: [Option<SystemProcedure>; SYSTEM_PROC_COUNT],
    procedures: [Option<(UserProcedure, IoSizes)>; MAX_INPUT_TYPES],
    functions: [Option<(UserFunction, IoSizes)>; MAX_INPUT_TYPES],
}

impl ContractEntry {
    const fn empty() -> Self {
        Self {
            state_size: 0,
            system: [None; SYSTEM_PROC_COUNT],
            procedures: [None; MAX_INPUT_TYPES],
            functions: [None; MAX_INPUT_TYPES],
        }
    }
}

/// Immutable-after-boot handler registry for all [`CONTRACT_COUNT`] contracts.
pub struct ContractRegistry {
    contracts: Vec<ContractEntry>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        let mut contracts = Vec::with_capacity(CONTRACT_COUNT);
        contracts.resize_with(CONTRACT_COUNT, ContractEntry::empty);
        Self { contracts }
    }

    /// Declare a contract's state image size. Zero keeps the slot disabled.
    pub fn set_state_size(&mut self, contract_index: usize, size: usize) -> bool {
        match self.contracts.get_mut(contract_index) {
            Some(entry) => {
                entry.state_size = size;
                true
            }
            None => false,
        }
    }

    pub fn register_system_procedure(
        &mut self,
        contract_index: usize,
        id: SystemProcId,
        procedure: SystemProcedure,
    ) -> bool {
        match self.contracts.get_mut(contract_index) {
            Some(entry) => {
                entry.system[id as usize] = Some(procedure);
                true
            }
            None => false,
        }
    }

    pub fn register_user_procedure(
        &mut self,
        contract_index: usize,
        input_type: u16,
        procedure: UserProcedure,
        sizes: IoSizes,
    ) -> bool {
        let Some(entry) = self.contracts.get_mut(contract_index) else {
            return false;
        };
        let Some(slot) = entry.procedures.get_mut(input_type as usize) else {
            return false;
        };
        *slot = Some((procedure, sizes));
        true
    }

    pub fn register_user_function(
        &mut self,
        contract_index: usize,
        input_type: u16,
        function: UserFunction,
        sizes: IoSizes,
    ) -> bool {
        let Some(entry) = self.contracts.get_mut(contract_index) else {
            return false;
        };
        let Some(slot) = entry.functions.get_mut(input_type as usize) else {
            return false;
        };
        *slot = Some((function, sizes));
        true
    }

    #[inline]
    pub fn state_size(&self, contract_index: usize) -> usize {
        self.contracts
            .get(contract_index)
            .map(|entry| entry.state_size)
            .unwrap_or(0)
    }

    #[inline]
    pub(crate) fn system_procedure(
        &self,
        contract_index: usize,
        id: SystemProcId,
    ) -> Option<SystemProcedure> {
        self.contracts.get(contract_index)?.system[id as usize]
    }

    #[inline]
    pub(crate) fn user_procedure(
        &self,
        contract_index: usize,
        input_type: u16,
    ) -> Option<(UserProcedure, IoSizes)> {
        *self
            .contracts
            .get(contract_index)?
            .procedures
            .get(input_type as usize)?
    }

    #[inline]
    pub(crate) fn user_function(
        &self,
        contract_index: usize,
        input_type: u16,
    ) -> Option<(UserFunction, IoSizes)> {
        *self
            .contracts
            .get(contract_index)?
            .functions
            .get(input_type as usize)?
    }
}

impl Default for ContractRegistry {
    fn default() -> Self {
        Self::new()
    }
}
