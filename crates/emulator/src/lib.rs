//! Interpreter and debugger for linked Armlet programs.

/// Fault taxonomy for execution-time failures.
pub mod fault;
pub use fault::{ExecutionFault, FaultClass, FaultKind};

/// Register file and run-state primitives.
pub mod state;
pub use state::{RegisterFile, RunState, RETURN_VALUE_REGISTER, TERMINATION_SENTINEL};

/// Flat little-endian memory image.
pub mod memory;
pub use memory::Memory;

/// Deterministic instruction cycle-cost table and lookup helpers.
pub mod timing;
pub use timing::{cost_kind, cycle_cost, CycleCostKind, CYCLE_COST_TABLE};

/// Host-facing configuration, results and hook contracts.
pub mod api;
pub use api::{
    AccessKind, BreakpointId, ControlTransfer, DebuggerConfig, ExecutionHooks, ExecutionResult,
    HookStop, InterpreterConfig, MemoryAccess, NoHooks, StepBudget, StepReport, StopReason,
    StopSignal, ThrottleConfig, WatchpointId, DEFAULT_MAX_INSTRUCTIONS_PER_LINE,
    DEFAULT_STACK_SIZE,
};

/// Fetched-word decode into typed operations.
pub mod decoder;
pub use decoder::{AluOp, Decoder, Operation, Width};

/// Instruction execution pipeline.
pub mod execute;
pub use execute::{
    commit_execution, condition, condition_mask, execute_instruction, ExecuteState, FlagsUpdate,
    MemoryWrite,
};

/// Fetch/decode/execute run loop.
pub mod interpreter;
pub use interpreter::{Interpreter, LoadError};

/// Memory-backed disassembly.
pub mod disasm;
pub use disasm::{disassemble, DisassemblyRow};

/// Breakpoints, watchpoints, stepping and inspection.
pub mod debugger;
pub use debugger::{
    Breakpoint, CallRecord, DebugObserver, Debugger, DebuggerError, NoObserver, StackFrame,
    VariableValue, WatchKind, Watchpoint,
};

#[cfg(test)]
use proptest as _;
