//! Instruction set for the Armlet core: opcode catalog, operand layouts,
//! registry validation, and the fixed-width word codec.

/// Closed opcode set and word geometry.
pub mod opcode;
pub use opcode::{Opcode, OPCODE_BITS, OPCODE_MNEMONIC_TABLE, WORD_BITS, WORD_BYTES};

/// Register naming and `cpsr` flag layout.
pub mod register;
pub use register::{
    ConditionFlags, Register, CPSR_ACTIVE_MASK, CPSR_C, CPSR_N, CPSR_V, CPSR_Z,
    GENERAL_REGISTER_COUNT, REGISTER_FIELD_BITS, REGISTER_FILE_SLOTS,
};

/// Operand and instruction layout descriptors.
pub mod descriptor;
pub use descriptor::{
    InstructionDescriptor, OperandDescriptor, OperandKind, OperandRole, ValueType,
    STANDARD_INSTRUCTIONS,
};

/// Validated instruction catalog.
pub mod registry;
pub use registry::{IsaRegistry, RegistryError};

/// Word encoder/decoder.
pub mod codec;
pub use codec::{CodecError, Instruction, InstructionCodec, Operand, RawInstruction};

/// Assembly text tokens and rendering.
pub mod syntax;

#[cfg(test)]
use proptest as _;
