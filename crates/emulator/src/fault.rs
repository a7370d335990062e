use thiserror::Error;

/// Fault classes used for diagnostics aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultClass {
    /// The fetched word is not a valid instruction.
    Decode,
    /// Fetch or data access outside the memory image.
    Memory,
    /// Integer arithmetic with no defined result.
    Arithmetic,
}

/// Execution-time fault taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultKind {
    /// The word at `pc` names no implemented opcode or a reserved register.
    #[error("illegal instruction {word:#010x}")]
    IllegalInstruction {
        /// Fetched word.
        word: u32,
    },
    /// An access touched bytes outside the memory image.
    #[error("invalid {size}-byte access at {address:#010x}")]
    InvalidMemoryAccess {
        /// First byte accessed.
        address: u32,
        /// Access width in bytes.
        size: u32,
    },
    /// `pc` is not a multiple of the instruction size.
    #[error("misaligned fetch at {address:#010x}")]
    MisalignedFetch {
        /// Fetch address.
        address: u32,
    },
    /// `DIV` or `MOD` by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// Signed `DIV` or `MOD` of the most negative value by -1.
    #[error("signed division overflow")]
    DivisionOverflow,
}

impl FaultKind {
    /// Returns the diagnostics class for this fault.
    #[must_use]
    pub const fn class(self) -> FaultClass {
        match self {
            Self::IllegalInstruction { .. } => FaultClass::Decode,
            Self::InvalidMemoryAccess { .. } | Self::MisalignedFetch { .. } => FaultClass::Memory,
            Self::DivisionByZero | Self::DivisionOverflow => FaultClass::Arithmetic,
        }
    }
}

/// A fault together with the address of the instruction that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[error("{kind} at pc {pc:#010x}")]
pub struct ExecutionFault {
    /// Fault cause.
    pub kind: FaultKind,
    /// Address of the faulting instruction.
    pub pc: u32,
}

impl ExecutionFault {
    /// Creates a fault record.
    #[must_use]
    pub const fn new(kind: FaultKind, pc: u32) -> Self {
        Self { kind, pc }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecutionFault, FaultClass, FaultKind};

    #[test]
    fn class_mapping_matches_fault_taxonomy() {
        assert_eq!(
            FaultKind::IllegalInstruction { word: 0x1F }.class(),
            FaultClass::Decode
        );
        assert_eq!(
            FaultKind::InvalidMemoryAccess {
                address: 0,
                size: 4
            }
            .class(),
            FaultClass::Memory
        );
        assert_eq!(
            FaultKind::MisalignedFetch { address: 2 }.class(),
            FaultClass::Memory
        );
        assert_eq!(FaultKind::DivisionByZero.class(), FaultClass::Arithmetic);
        assert_eq!(FaultKind::DivisionOverflow.class(), FaultClass::Arithmetic);
    }

    #[test]
    fn fault_message_names_pc() {
        let fault = ExecutionFault::new(FaultKind::DivisionByZero, 0x1008);
        assert_eq!(fault.to_string(), "division by zero at pc 0x00001008");
    }
}
