//! Operand and instruction layout descriptors, plus the built-in layout table.

use crate::opcode::Opcode;
use crate::register::REGISTER_FIELD_BITS;

/// Operand kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum OperandKind {
    /// Register-file slot index.
    Register,
    /// Literal value, possibly produced by a symbol.
    Immediate,
}

/// How the bits of an operand field are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ValueType {
    /// Zero-extended field.
    Unsigned,
    /// Two's complement field, sign-extended on decode.
    Signed,
}

/// Data-flow role of an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum OperandRole {
    /// Read by the instruction.
    Source,
    /// Written by the instruction.
    Destination,
}

/// Bit layout and semantics of one operand field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct OperandDescriptor {
    /// Register or immediate.
    pub kind: OperandKind,
    /// Field interpretation.
    pub value_type: ValueType,
    /// Least significant bit of the field.
    pub position: u8,
    /// Width of the field in bits.
    pub width: u8,
    /// Source or destination.
    pub role: OperandRole,
    /// Tied/internal operand that is never parsed or rendered.
    pub hidden: bool,
}

impl OperandDescriptor {
    /// Register source operand at `position`.
    #[must_use]
    pub const fn source_register(position: u8) -> Self {
        Self::register(position, OperandRole::Source)
    }

    /// Register destination operand at `position`.
    #[must_use]
    pub const fn destination_register(position: u8) -> Self {
        Self::register(position, OperandRole::Destination)
    }

    /// Register operand with an explicit role.
    #[must_use]
    pub const fn register(position: u8, role: OperandRole) -> Self {
        Self {
            kind: OperandKind::Register,
            value_type: ValueType::Unsigned,
            position,
            width: REGISTER_FIELD_BITS,
            role,
            hidden: false,
        }
    }

    /// Zero-extended immediate source operand.
    #[must_use]
    pub const fn unsigned_immediate(position: u8, width: u8) -> Self {
        Self::immediate(position, width, ValueType::Unsigned)
    }

    /// Sign-extended immediate source operand.
    #[must_use]
    pub const fn signed_immediate(position: u8, width: u8) -> Self {
        Self::immediate(position, width, ValueType::Signed)
    }

    /// Immediate source operand with an explicit value type.
    #[must_use]
    pub const fn immediate(position: u8, width: u8, value_type: ValueType) -> Self {
        Self {
            kind: OperandKind::Immediate,
            value_type,
            position,
            width,
            role: OperandRole::Source,
            hidden: false,
        }
    }

    /// Marks the operand hidden from assembly text.
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Mask of the field, not shifted into place.
    #[must_use]
    pub const fn value_mask(self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        }
    }

    /// Smallest value an immediate in this field may take.
    #[must_use]
    pub const fn min_value(self) -> i64 {
        match self.value_type {
            ValueType::Unsigned => 0,
            ValueType::Signed => -(1i64 << (self.width - 1)),
        }
    }

    /// Largest value an immediate in this field may take.
    #[must_use]
    pub const fn max_value(self) -> i64 {
        match self.value_type {
            ValueType::Unsigned => (1i64 << self.width) - 1,
            ValueType::Signed => (1i64 << (self.width - 1)) - 1,
        }
    }
}

/// One opcode together with its ordered operand layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstructionDescriptor {
    /// The opcode this layout belongs to.
    pub opcode: Opcode,
    /// Operands in assembly order, hidden operands included.
    pub operands: &'static [OperandDescriptor],
}

impl InstructionDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub const fn new(opcode: Opcode, operands: &'static [OperandDescriptor]) -> Self {
        Self { opcode, operands }
    }

    /// Total number of operands, hidden included.
    #[must_use]
    pub const fn arity(&self) -> usize {
        self.operands.len()
    }

    /// Number of operands that appear in assembly text.
    #[must_use]
    pub fn visible_arity(&self) -> usize {
        self.operands.iter().filter(|operand| !operand.hidden).count()
    }

    /// Sum of operand field widths.
    #[must_use]
    pub const fn operand_bits(&self) -> u32 {
        let mut total = 0u32;
        let mut index = 0;
        while index < self.operands.len() {
            total += self.operands[index].width as u32;
            index += 1;
        }
        total
    }
}

const NO_OPERANDS: &[OperandDescriptor] = &[];

const THREE_REGISTER: &[OperandDescriptor] = &[
    OperandDescriptor::source_register(5),
    OperandDescriptor::source_register(9),
    OperandDescriptor::destination_register(13),
];

const MOVE_REGISTER: &[OperandDescriptor] = &[
    OperandDescriptor::source_register(5),
    OperandDescriptor::destination_register(9),
];

const MOVE_LOW_HALF: &[OperandDescriptor] = &[
    OperandDescriptor::unsigned_immediate(5, 16),
    OperandDescriptor::destination_register(21),
];

// The hidden source names the same register as the destination so the
// upper-half move can preserve the lower half.
const MOVE_HIGH_HALF: &[OperandDescriptor] = &[
    OperandDescriptor::unsigned_immediate(5, 16),
    OperandDescriptor::destination_register(21),
    OperandDescriptor::source_register(25).hidden(),
];

const ADD_IMMEDIATE: &[OperandDescriptor] = &[
    OperandDescriptor::source_register(5),
    OperandDescriptor::signed_immediate(9, 16),
    OperandDescriptor::destination_register(25),
];

const REGISTER_TARGET: &[OperandDescriptor] = &[OperandDescriptor::source_register(5)];

const ABSOLUTE_TARGET: &[OperandDescriptor] = &[OperandDescriptor::unsigned_immediate(5, 27)];

const CONDITIONAL_JUMP: &[OperandDescriptor] = &[
    OperandDescriptor::source_register(5),
    OperandDescriptor::unsigned_immediate(9, 8),
    OperandDescriptor::source_register(17),
];

const LOAD: &[OperandDescriptor] = &[
    OperandDescriptor::source_register(5),
    OperandDescriptor::signed_immediate(9, 16),
    OperandDescriptor::destination_register(25),
];

const STORE: &[OperandDescriptor] = &[
    OperandDescriptor::source_register(5),
    OperandDescriptor::source_register(9),
    OperandDescriptor::signed_immediate(13, 16),
];

const POP: &[OperandDescriptor] = &[OperandDescriptor::destination_register(5)];

/// Built-in instruction layouts, ordered by opcode ordinal.
pub const STANDARD_INSTRUCTIONS: &[InstructionDescriptor] = &[
    InstructionDescriptor::new(Opcode::Nop, NO_OPERANDS),
    InstructionDescriptor::new(Opcode::Halt, NO_OPERANDS),
    InstructionDescriptor::new(Opcode::Mov, MOVE_REGISTER),
    InstructionDescriptor::new(Opcode::MovImm16L, MOVE_LOW_HALF),
    InstructionDescriptor::new(Opcode::MovImm16H, MOVE_HIGH_HALF),
    InstructionDescriptor::new(Opcode::Add, THREE_REGISTER),
    InstructionDescriptor::new(Opcode::AddImm, ADD_IMMEDIATE),
    InstructionDescriptor::new(Opcode::Sub, THREE_REGISTER),
    InstructionDescriptor::new(Opcode::Mul, THREE_REGISTER),
    InstructionDescriptor::new(Opcode::Div, THREE_REGISTER),
    InstructionDescriptor::new(Opcode::Mod, THREE_REGISTER),
    InstructionDescriptor::new(Opcode::And, THREE_REGISTER),
    InstructionDescriptor::new(Opcode::Or, THREE_REGISTER),
    InstructionDescriptor::new(Opcode::Xor, THREE_REGISTER),
    InstructionDescriptor::new(Opcode::Shl, THREE_REGISTER),
    InstructionDescriptor::new(Opcode::Shr, THREE_REGISTER),
    InstructionDescriptor::new(Opcode::Asr, THREE_REGISTER),
    InstructionDescriptor::new(Opcode::Cmp, THREE_REGISTER),
    InstructionDescriptor::new(Opcode::Jmp, REGISTER_TARGET),
    InstructionDescriptor::new(Opcode::JmpImm, ABSOLUTE_TARGET),
    InstructionDescriptor::new(Opcode::Call, REGISTER_TARGET),
    InstructionDescriptor::new(Opcode::CallImm, ABSOLUTE_TARGET),
    InstructionDescriptor::new(Opcode::JCond, CONDITIONAL_JUMP),
    InstructionDescriptor::new(Opcode::Ldr, LOAD),
    InstructionDescriptor::new(Opcode::Str, STORE),
    InstructionDescriptor::new(Opcode::Ldrb, LOAD),
    InstructionDescriptor::new(Opcode::Strb, STORE),
    InstructionDescriptor::new(Opcode::Push, REGISTER_TARGET),
    InstructionDescriptor::new(Opcode::Pop, POP),
];

const _: () = assert_standard_layout();

const fn assert_standard_layout() {
    assert!(
        STANDARD_INSTRUCTIONS.len() == Opcode::COUNT,
        "every opcode needs a built-in layout"
    );
    let mut index = 0;
    while index < STANDARD_INSTRUCTIONS.len() {
        let descriptor = STANDARD_INSTRUCTIONS[index];
        assert!(
            descriptor.opcode as usize == index,
            "built-in layouts must be ordered by ordinal"
        );
        assert!(
            crate::opcode::OPCODE_BITS as u32 + descriptor.operand_bits()
                <= crate::opcode::WORD_BITS as u32,
            "built-in layout overflows the instruction word"
        );
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{OperandDescriptor, OperandKind, ValueType, STANDARD_INSTRUCTIONS};
    use crate::opcode::Opcode;

    #[test]
    fn hidden_operand_only_on_upper_half_move() {
        for descriptor in STANDARD_INSTRUCTIONS {
            let hidden = descriptor.operands.iter().filter(|o| o.hidden).count();
            if descriptor.opcode == Opcode::MovImm16H {
                assert_eq!(hidden, 1);
                assert_eq!(descriptor.visible_arity(), 2);
            } else {
                assert_eq!(hidden, 0, "{}", descriptor.opcode);
            }
        }
    }

    #[rstest]
    #[case(OperandDescriptor::unsigned_immediate(5, 16), 0, 0xFFFF)]
    #[case(OperandDescriptor::signed_immediate(9, 16), -0x8000, 0x7FFF)]
    #[case(OperandDescriptor::unsigned_immediate(5, 27), 0, 0x07FF_FFFF)]
    #[case(OperandDescriptor::unsigned_immediate(9, 8), 0, 0xFF)]
    fn immediate_ranges_follow_width(
        #[case] operand: OperandDescriptor,
        #[case] min: i64,
        #[case] max: i64,
    ) {
        assert_eq!(operand.kind, OperandKind::Immediate);
        assert_eq!(operand.min_value(), min);
        assert_eq!(operand.max_value(), max);
    }

    #[test]
    fn register_fields_are_four_bits_unsigned() {
        let register = OperandDescriptor::source_register(5);
        assert_eq!(register.width, 4);
        assert_eq!(register.value_type, ValueType::Unsigned);
        assert_eq!(register.value_mask(), 0xF);
    }
}
