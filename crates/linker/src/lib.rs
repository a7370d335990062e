//! Program model and the resolution stages that turn a parsed unit into an
//! executable one: symbol binding, address assignment and instruction
//! reconciliation.

/// Programs, functions, globals, labels and symbol references.
pub mod model;
pub use model::{
    Function, FunctionId, Global, GlobalId, GlobalKind, Label, LabelId, MemoryLayout, Program,
    ProgramInstruction, SymbolReference, SymbolTarget, SymbolUsage,
};

/// Line tables, variables and scopes.
pub mod debug_info;
pub use debug_info::{DebugInfo, Scope, SourceLocation, Variable, VariableLocation};

/// Symbol binding.
pub mod symbols;
pub use symbols::{SymbolError, SymbolResolver};

/// Address assignment.
pub mod layout;
pub use layout::{
    align, plan_layout, LayoutConfig, LayoutError, MemoryResolver, DEFAULT_BASE_ADDRESS,
    DEFAULT_DATA_ALIGNMENT,
};

/// Instruction representation reconciliation.
pub mod instructions;
pub use instructions::{InstructionError, InstructionErrorKind, InstructionResolver};

/// All stages in order.
pub mod pipeline;
pub use pipeline::{LinkError, Linker};

#[cfg(test)]
use proptest as _;
