//! Immutable opcode/operand catalog, validated once at construction.

use thiserror::Error;

use crate::descriptor::{InstructionDescriptor, STANDARD_INSTRUCTIONS};
use crate::opcode::{Opcode, OPCODE_BITS, WORD_BITS};

/// Layout violations detected while building a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum RegistryError {
    /// Opcode bits plus operand widths exceed the instruction word.
    #[error("{opcode}: layout needs {required} bits but the word has {available}")]
    WordOverflow {
        /// Offending opcode.
        opcode: Opcode,
        /// Opcode bits plus the sum of operand widths.
        required: u32,
        /// Word width.
        available: u32,
    },
    /// An operand field extends past the end of the word.
    #[error("{opcode}: operand {operand} at bit {position} width {width} leaves the word")]
    FieldOutOfBounds {
        /// Offending opcode.
        opcode: Opcode,
        /// Operand index.
        operand: usize,
        /// Field position.
        position: u8,
        /// Field width.
        width: u8,
    },
    /// An operand field overlaps the opcode field or another operand.
    #[error("{opcode}: operand {operand} overlaps {other}")]
    FieldOverlap {
        /// Offending opcode.
        opcode: Opcode,
        /// Operand index.
        operand: usize,
        /// What it overlaps, either `opcode` or `operand N`.
        other: String,
    },
    /// A field has zero width.
    #[error("{opcode}: operand {operand} has zero width")]
    ZeroWidth {
        /// Offending opcode.
        opcode: Opcode,
        /// Operand index.
        operand: usize,
    },
    /// A hidden operand has no preceding operand of the same kind to tie to.
    #[error("{opcode}: hidden operand {operand} has no preceding operand to copy")]
    HiddenWithoutPredecessor {
        /// Offending opcode.
        opcode: Opcode,
        /// Operand index.
        operand: usize,
    },
    /// The same opcode was described twice.
    #[error("{opcode}: described more than once")]
    DuplicateOpcode {
        /// Offending opcode.
        opcode: Opcode,
    },
}

/// Process-wide instruction catalog.
///
/// Built once through [`IsaRegistry::new`] or [`IsaRegistry::standard`] and
/// shared by handle; it is never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsaRegistry {
    entries: [Option<InstructionDescriptor>; Opcode::COUNT],
}

impl IsaRegistry {
    /// Builds a registry from explicit layouts.
    ///
    /// Opcodes without a layout stay unimplemented and decode as invalid.
    ///
    /// # Errors
    ///
    /// Returns the first [`RegistryError`] found, checking layouts in order.
    pub fn new(descriptors: &[InstructionDescriptor]) -> Result<Self, RegistryError> {
        let mut entries = [None; Opcode::COUNT];
        for descriptor in descriptors {
            validate_layout(descriptor)?;
            let slot = &mut entries[usize::from(descriptor.opcode.ordinal())];
            if slot.is_some() {
                return Err(RegistryError::DuplicateOpcode {
                    opcode: descriptor.opcode,
                });
            }
            *slot = Some(*descriptor);
        }
        Ok(Self { entries })
    }

    /// Registry for the built-in instruction set.
    #[must_use]
    pub fn standard() -> Self {
        let mut entries = [None; Opcode::COUNT];
        for descriptor in STANDARD_INSTRUCTIONS {
            entries[usize::from(descriptor.opcode.ordinal())] = Some(*descriptor);
        }
        Self { entries }
    }

    /// Layout for an opcode, if implemented.
    #[must_use]
    pub fn descriptor(&self, opcode: Opcode) -> Option<&InstructionDescriptor> {
        self.entries[usize::from(opcode.ordinal())].as_ref()
    }

    /// Layout for a mnemonic, ignoring ASCII case.
    #[must_use]
    pub fn by_mnemonic(&self, mnemonic: &str) -> Option<&InstructionDescriptor> {
        Opcode::from_mnemonic(mnemonic).and_then(|opcode| self.descriptor(opcode))
    }

    /// Iterates implemented layouts in ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = &InstructionDescriptor> {
        self.entries.iter().flatten()
    }

    /// Number of implemented opcodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// True when no opcode is implemented.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IsaRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn validate_layout(descriptor: &InstructionDescriptor) -> Result<(), RegistryError> {
    let opcode = descriptor.opcode;
    let required = u32::from(OPCODE_BITS) + descriptor.operand_bits();
    if required > u32::from(WORD_BITS) {
        return Err(RegistryError::WordOverflow {
            opcode,
            required,
            available: u32::from(WORD_BITS),
        });
    }

    for (index, operand) in descriptor.operands.iter().enumerate() {
        if operand.width == 0 {
            return Err(RegistryError::ZeroWidth {
                opcode,
                operand: index,
            });
        }
        if u32::from(operand.position) + u32::from(operand.width) > u32::from(WORD_BITS) {
            return Err(RegistryError::FieldOutOfBounds {
                opcode,
                operand: index,
                position: operand.position,
                width: operand.width,
            });
        }
        if operand.position < OPCODE_BITS {
            return Err(RegistryError::FieldOverlap {
                opcode,
                operand: index,
                other: "opcode".to_string(),
            });
        }
        let end = operand.position + operand.width;
        for (other_index, other) in descriptor.operands[..index].iter().enumerate() {
            let other_end = other.position + other.width;
            if operand.position < other_end && other.position < end {
                return Err(RegistryError::FieldOverlap {
                    opcode,
                    operand: index,
                    other: format!("operand {other_index}"),
                });
            }
        }
        if operand.hidden {
            let tied = index
                .checked_sub(1)
                .map(|previous| &descriptor.operands[previous]);
            let same_kind = tied.is_some_and(|previous| {
                previous.kind == operand.kind && previous.width <= operand.width
            });
            if !same_kind {
                return Err(RegistryError::HiddenWithoutPredecessor {
                    opcode,
                    operand: index,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{IsaRegistry, RegistryError};
    use crate::descriptor::{InstructionDescriptor, OperandDescriptor, STANDARD_INSTRUCTIONS};
    use crate::opcode::Opcode;

    #[test]
    fn standard_table_passes_runtime_validation() {
        let registry = IsaRegistry::new(STANDARD_INSTRUCTIONS).expect("built-in table is valid");
        assert_eq!(registry, IsaRegistry::standard());
        assert_eq!(registry.len(), Opcode::COUNT);
    }

    #[test]
    fn mnemonic_lookup_returns_layout() {
        let registry = IsaRegistry::standard();
        let add = registry.by_mnemonic("add").expect("ADD is implemented");
        assert_eq!(add.opcode, Opcode::Add);
        assert_eq!(add.arity(), 3);
        assert!(registry.by_mnemonic("FOO").is_none());
    }

    #[test]
    fn partial_registry_leaves_other_opcodes_unimplemented() {
        let registry = IsaRegistry::new(&STANDARD_INSTRUCTIONS[..2]).expect("valid subset");
        assert!(registry.descriptor(Opcode::Halt).is_some());
        assert!(registry.descriptor(Opcode::Add).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn overflowing_layout_fails_fast() {
        const WIDE: &[OperandDescriptor] = &[
            OperandDescriptor::unsigned_immediate(5, 20),
            OperandDescriptor::unsigned_immediate(25, 8),
        ];
        let error = IsaRegistry::new(&[InstructionDescriptor::new(Opcode::Nop, WIDE)])
            .expect_err("33 bits cannot fit");
        assert_eq!(
            error,
            RegistryError::WordOverflow {
                opcode: Opcode::Nop,
                required: 33,
                available: 32,
            }
        );
    }

    #[test]
    fn field_past_word_end_is_rejected() {
        const PAST_END: &[OperandDescriptor] = &[OperandDescriptor::source_register(30)];
        let error = IsaRegistry::new(&[InstructionDescriptor::new(Opcode::Push, PAST_END)])
            .expect_err("bits 30..34 leave the word");
        assert!(matches!(error, RegistryError::FieldOutOfBounds { operand: 0, .. }));
    }

    #[test]
    fn overlapping_fields_are_rejected() {
        const ON_OPCODE: &[OperandDescriptor] = &[OperandDescriptor::source_register(3)];
        const ON_EACH_OTHER: &[OperandDescriptor] = &[
            OperandDescriptor::source_register(5),
            OperandDescriptor::destination_register(7),
        ];
        let on_opcode = IsaRegistry::new(&[InstructionDescriptor::new(Opcode::Push, ON_OPCODE)])
            .expect_err("overlaps opcode field");
        assert_eq!(
            on_opcode,
            RegistryError::FieldOverlap {
                opcode: Opcode::Push,
                operand: 0,
                other: "opcode".to_string(),
            }
        );
        let on_each_other =
            IsaRegistry::new(&[InstructionDescriptor::new(Opcode::Mov, ON_EACH_OTHER)])
                .expect_err("operands overlap");
        assert_eq!(on_each_other.to_string(), "MOV: operand 1 overlaps operand 0");
    }

    #[test]
    fn zero_width_field_is_rejected() {
        const EMPTY: &[OperandDescriptor] = &[OperandDescriptor::unsigned_immediate(5, 0)];
        assert_eq!(
            IsaRegistry::new(&[InstructionDescriptor::new(Opcode::JmpImm, EMPTY)]),
            Err(RegistryError::ZeroWidth {
                opcode: Opcode::JmpImm,
                operand: 0,
            })
        );
    }

    #[test]
    fn leading_hidden_operand_is_rejected() {
        const LEADING: &[OperandDescriptor] = &[OperandDescriptor::source_register(5).hidden()];
        assert_eq!(
            IsaRegistry::new(&[InstructionDescriptor::new(Opcode::Pop, LEADING)]),
            Err(RegistryError::HiddenWithoutPredecessor {
                opcode: Opcode::Pop,
                operand: 0,
            })
        );
    }

    #[test]
    fn hidden_operand_must_match_predecessor_kind() {
        const MISMATCH: &[OperandDescriptor] = &[
            OperandDescriptor::destination_register(5),
            OperandDescriptor::unsigned_immediate(9, 8).hidden(),
        ];
        assert!(matches!(
            IsaRegistry::new(&[InstructionDescriptor::new(Opcode::MovImm16H, MISMATCH)]),
            Err(RegistryError::HiddenWithoutPredecessor { operand: 1, .. })
        ));
    }

    #[test]
    fn duplicate_opcode_is_rejected() {
        let twice = [STANDARD_INSTRUCTIONS[0], STANDARD_INSTRUCTIONS[0]];
        assert_eq!(
            IsaRegistry::new(&twice),
            Err(RegistryError::DuplicateOpcode {
                opcode: Opcode::Nop
            })
        );
    }
}
