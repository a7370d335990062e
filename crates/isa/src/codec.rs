//! Instruction codec for fixed-width words.
//!
//! Encoding writes the opcode ordinal at bits `[0, OPCODE_BITS)` and every
//! operand at its declared `[position, position + width)`. Decoding reverses
//! that against the same registry, so the two are a bijection for implemented
//! opcodes and in-range operand values.

use std::sync::Arc;

use thiserror::Error;

use crate::descriptor::{InstructionDescriptor, OperandDescriptor, OperandKind, ValueType};
use crate::opcode::{Opcode, OPCODE_BITS};
use crate::register::Register;
use crate::registry::IsaRegistry;

/// Encode/decode failures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum CodecError {
    /// The opcode field names no implemented opcode.
    #[error("invalid opcode {value:#x}")]
    InvalidOpcode {
        /// Raw opcode field value.
        value: u32,
    },
    /// Operand count differs from the layout.
    #[error("{opcode} takes {expected} operands, got {found}")]
    ArityMismatch {
        /// Instruction opcode.
        opcode: Opcode,
        /// Operands in the layout.
        expected: usize,
        /// Operands supplied.
        found: usize,
    },
    /// A value does not fit its field.
    #[error("{opcode} operand {operand}: value {value} outside {min}..={max}")]
    ValueOutOfRange {
        /// Instruction opcode.
        opcode: Opcode,
        /// Operand index.
        operand: usize,
        /// Offending value.
        value: i64,
        /// Smallest accepted value.
        min: i64,
        /// Largest accepted value.
        max: i64,
    },
    /// A register field names a reserved slot.
    #[error("{opcode} operand {operand}: register slot {value} is reserved")]
    InvalidRegister {
        /// Instruction opcode.
        opcode: Opcode,
        /// Operand index.
        operand: usize,
        /// Raw field value.
        value: u32,
    },
    /// A register was supplied where an immediate is expected, or vice versa.
    #[error("{opcode} operand {operand}: expected {expected:?}")]
    OperandKindMismatch {
        /// Instruction opcode.
        opcode: Opcode,
        /// Operand index.
        operand: usize,
        /// Kind required by the layout.
        expected: OperandKind,
    },
}

/// Instruction ready to bit-pack: one unsigned field value per operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RawInstruction {
    /// Instruction opcode.
    pub opcode: Opcode,
    /// Field values in operand order, each within its declared width.
    pub values: Vec<u32>,
}

impl RawInstruction {
    /// Creates a raw instruction.
    #[must_use]
    pub const fn new(opcode: Opcode, values: Vec<u32>) -> Self {
        Self { opcode, values }
    }
}

/// Typed operand value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Operand {
    /// Register operand.
    Register(Register),
    /// Immediate operand, sign-extended when the field is signed.
    Immediate(i64),
}

impl Operand {
    /// Register payload, if any.
    #[must_use]
    pub const fn register(self) -> Option<Register> {
        match self {
            Self::Register(register) => Some(register),
            Self::Immediate(_) => None,
        }
    }

    /// Immediate payload, if any.
    #[must_use]
    pub const fn immediate(self) -> Option<i64> {
        match self {
            Self::Register(_) => None,
            Self::Immediate(value) => Some(value),
        }
    }
}

/// Decoded instruction used for rendering and interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Instruction {
    /// Instruction opcode.
    pub opcode: Opcode,
    /// Operands in layout order, hidden operands included.
    pub operands: Vec<Operand>,
}

impl Instruction {
    /// Creates a decoded instruction.
    #[must_use]
    pub const fn new(opcode: Opcode, operands: Vec<Operand>) -> Self {
        Self { opcode, operands }
    }

    /// Register operand at `index`.
    #[must_use]
    pub fn register(&self, index: usize) -> Option<Register> {
        self.operands.get(index).copied().and_then(Operand::register)
    }

    /// Immediate operand at `index`.
    #[must_use]
    pub fn immediate(&self, index: usize) -> Option<i64> {
        self.operands.get(index).copied().and_then(Operand::immediate)
    }
}

/// Encoder/decoder bound to one registry handle.
#[derive(Debug, Clone)]
pub struct InstructionCodec {
    registry: Arc<IsaRegistry>,
}

impl Default for InstructionCodec {
    fn default() -> Self {
        Self::new(Arc::new(IsaRegistry::standard()))
    }
}

impl InstructionCodec {
    /// Creates a codec over `registry`.
    #[must_use]
    pub const fn new(registry: Arc<IsaRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this codec encodes against.
    #[must_use]
    pub fn registry(&self) -> &IsaRegistry {
        &self.registry
    }

    /// Shared handle to the registry.
    #[must_use]
    pub fn registry_handle(&self) -> Arc<IsaRegistry> {
        Arc::clone(&self.registry)
    }

    /// Layout for `opcode`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidOpcode`] when the registry does not
    /// implement `opcode`.
    pub fn descriptor(&self, opcode: Opcode) -> Result<&InstructionDescriptor, CodecError> {
        self.registry
            .descriptor(opcode)
            .ok_or(CodecError::InvalidOpcode {
                value: u32::from(opcode.ordinal()),
            })
    }

    /// Packs a raw instruction into a word.
    ///
    /// # Errors
    ///
    /// Fails when the opcode is unimplemented, the operand count differs from
    /// the layout, or a value does not fit its field.
    pub fn encode(&self, raw: &RawInstruction) -> Result<u32, CodecError> {
        let descriptor = self.descriptor(raw.opcode)?;
        check_arity(descriptor, raw.values.len())?;

        let mut word = u32::from(raw.opcode.ordinal());
        for (index, (operand, value)) in descriptor.operands.iter().zip(&raw.values).enumerate() {
            if *value & !operand.value_mask() != 0 {
                return Err(CodecError::ValueOutOfRange {
                    opcode: raw.opcode,
                    operand: index,
                    value: i64::from(*value),
                    min: 0,
                    max: i64::from(operand.value_mask()),
                });
            }
            word |= *value << operand.position;
        }
        Ok(word)
    }

    /// Unpacks a word into a raw instruction.
    ///
    /// Bits outside the opcode field and declared operand fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidOpcode`] when the opcode field names no
    /// implemented opcode.
    pub fn decode(&self, word: u32) -> Result<RawInstruction, CodecError> {
        let value = word & opcode_mask();
        let descriptor = Opcode::from_ordinal(value)
            .and_then(|opcode| self.registry.descriptor(opcode))
            .ok_or(CodecError::InvalidOpcode { value })?;

        let values = descriptor
            .operands
            .iter()
            .map(|operand| (word >> operand.position) & operand.value_mask())
            .collect();
        Ok(RawInstruction::new(descriptor.opcode, values))
    }

    /// Converts field values into typed operands.
    ///
    /// # Errors
    ///
    /// Fails on an unimplemented opcode, an arity mismatch, or a register
    /// field naming a reserved slot.
    pub fn lift(&self, raw: &RawInstruction) -> Result<Instruction, CodecError> {
        let descriptor = self.descriptor(raw.opcode)?;
        check_arity(descriptor, raw.values.len())?;

        let operands = descriptor
            .operands
            .iter()
            .zip(&raw.values)
            .enumerate()
            .map(|(index, (operand, value))| match operand.kind {
                OperandKind::Register => Register::from_index(*value)
                    .map(Operand::Register)
                    .ok_or(CodecError::InvalidRegister {
                        opcode: raw.opcode,
                        operand: index,
                        value: *value,
                    }),
                OperandKind::Immediate => Ok(Operand::Immediate(sign_extend(operand, *value))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Instruction::new(raw.opcode, operands))
    }

    /// Converts typed operands into field values.
    ///
    /// # Errors
    ///
    /// Fails on an unimplemented opcode, an arity mismatch, an operand of the
    /// wrong kind, or an immediate outside its field's range.
    pub fn lower(&self, instruction: &Instruction) -> Result<RawInstruction, CodecError> {
        let descriptor = self.descriptor(instruction.opcode)?;
        check_arity(descriptor, instruction.operands.len())?;

        let values = descriptor
            .operands
            .iter()
            .zip(&instruction.operands)
            .enumerate()
            .map(|(index, (operand, value))| {
                lower_operand(instruction.opcode, index, operand, *value)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RawInstruction::new(instruction.opcode, values))
    }

    /// Decodes a word straight to a typed instruction.
    ///
    /// # Errors
    ///
    /// See [`Self::decode`] and [`Self::lift`].
    pub fn decode_instruction(&self, word: u32) -> Result<Instruction, CodecError> {
        self.lift(&self.decode(word)?)
    }

    /// Encodes a typed instruction straight to a word.
    ///
    /// # Errors
    ///
    /// See [`Self::lower`] and [`Self::encode`].
    pub fn encode_instruction(&self, instruction: &Instruction) -> Result<u32, CodecError> {
        self.encode(&self.lower(instruction)?)
    }
}

const fn opcode_mask() -> u32 {
    (1u32 << OPCODE_BITS) - 1
}

const fn check_arity(descriptor: &InstructionDescriptor, found: usize) -> Result<(), CodecError> {
    if descriptor.operands.len() == found {
        Ok(())
    } else {
        Err(CodecError::ArityMismatch {
            opcode: descriptor.opcode,
            expected: descriptor.operands.len(),
            found,
        })
    }
}

fn sign_extend(operand: &OperandDescriptor, value: u32) -> i64 {
    match operand.value_type {
        ValueType::Unsigned => i64::from(value),
        ValueType::Signed => {
            let shift = 64 - u32::from(operand.width);
            (i64::from(value) << shift) >> shift
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn lower_operand(
    opcode: Opcode,
    index: usize,
    operand: &OperandDescriptor,
    value: Operand,
) -> Result<u32, CodecError> {
    match (operand.kind, value) {
        (OperandKind::Register, Operand::Register(register)) => Ok(register.index() as u32),
        (OperandKind::Immediate, Operand::Immediate(value)) => {
            let (min, max) = (operand.min_value(), operand.max_value());
            if value < min || value > max {
                return Err(CodecError::ValueOutOfRange {
                    opcode,
                    operand: index,
                    value,
                    min,
                    max,
                });
            }
            Ok((value as u32) & operand.value_mask())
        }
        (expected, _) => Err(CodecError::OperandKindMismatch {
            opcode,
            operand: index,
            expected,
        }),
    }
}
