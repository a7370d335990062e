//! Execution-side decode: turns a fetched word into a typed operation.
//!
//! The codec validates field layout and register slots; this stage pulls
//! operands out by position so execution never has to re-check arity.

use armlet_isa::{Instruction, InstructionCodec, Opcode, Register};

use crate::fault::FaultKind;

/// Three-register arithmetic and logic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    /// `ADD`.
    Add,
    /// `SUB`.
    Sub,
    /// `MUL`.
    Mul,
    /// `DIV`.
    Div,
    /// `MOD`.
    Mod,
    /// `AND`.
    And,
    /// `OR`.
    Or,
    /// `XOR`.
    Xor,
    /// `SHL`.
    Shl,
    /// `SHR`.
    Shr,
    /// `ASR`.
    Asr,
    /// `CMP`.
    Cmp,
}

/// Data access width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    /// One byte, zero-extended on load.
    Byte,
    /// Four bytes.
    Word,
}

impl Width {
    /// Width in bytes.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Word => 4,
        }
    }
}

/// Typed operation ready to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Operation {
    Nop,
    Halt,
    Mov { rs: Register, rd: Register },
    MovImm16L { imm: u32, rd: Register },
    MovImm16H {
        imm: u32,
        rd: Register,
        src: Register,
    },
    Alu {
        op: AluOp,
        ra: Register,
        rb: Register,
        rd: Register,
    },
    AddImm {
        ra: Register,
        imm: i32,
        rd: Register,
    },
    Jmp { rt: Register },
    JmpImm { target: u32 },
    Call { rt: Register },
    CallImm { target: u32 },
    JCond {
        rc: Register,
        mask: u32,
        rt: Register,
    },
    Load {
        ra: Register,
        offset: i32,
        rd: Register,
        width: Width,
    },
    Store {
        rs: Register,
        ra: Register,
        offset: i32,
        width: Width,
    },
    Push { rs: Register },
    Pop { rd: Register },
}

/// Decodes fetched words against a codec.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    codec: InstructionCodec,
}

impl Decoder {
    /// Creates a decoder over `codec`.
    #[must_use]
    pub const fn new(codec: InstructionCodec) -> Self {
        Self { codec }
    }

    /// Codec in use.
    #[must_use]
    pub const fn codec(&self) -> &InstructionCodec {
        &self.codec
    }

    /// Decodes `word` to a typed instruction and its operation.
    ///
    /// # Errors
    ///
    /// Returns [`FaultKind::IllegalInstruction`] when the codec rejects the
    /// word or an operand has an unexpected kind.
    pub fn decode(&self, word: u32) -> Result<(Instruction, Operation), FaultKind> {
        let illegal = FaultKind::IllegalInstruction { word };
        let instruction = self.codec.decode_instruction(word).map_err(|_| illegal)?;
        let operation = operation_of(&instruction).ok_or(illegal)?;
        Ok((instruction, operation))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn operation_of(instruction: &Instruction) -> Option<Operation> {
    let reg = |index: usize| instruction.register(index);
    let unsigned = |index: usize| instruction.immediate(index).map(|value| value as u32);
    let signed = |index: usize| instruction.immediate(index).map(|value| value as i32);
    let three = |op: AluOp| -> Option<Operation> {
        Some(Operation::Alu {
            op,
            ra: reg(0)?,
            rb: reg(1)?,
            rd: reg(2)?,
        })
    };

    let operation = match instruction.opcode {
        Opcode::Nop => Operation::Nop,
        Opcode::Halt => Operation::Halt,
        Opcode::Mov => Operation::Mov {
            rs: reg(0)?,
            rd: reg(1)?,
        },
        Opcode::MovImm16L => Operation::MovImm16L {
            imm: unsigned(0)?,
            rd: reg(1)?,
        },
        Opcode::MovImm16H => Operation::MovImm16H {
            imm: unsigned(0)?,
            rd: reg(1)?,
            src: reg(2)?,
        },
        Opcode::Add => three(AluOp::Add)?,
        Opcode::Sub => three(AluOp::Sub)?,
        Opcode::Mul => three(AluOp::Mul)?,
        Opcode::Div => three(AluOp::Div)?,
        Opcode::Mod => three(AluOp::Mod)?,
        Opcode::And => three(AluOp::And)?,
        Opcode::Or => three(AluOp::Or)?,
        Opcode::Xor => three(AluOp::Xor)?,
        Opcode::Shl => three(AluOp::Shl)?,
        Opcode::Shr => three(AluOp::Shr)?,
        Opcode::Asr => three(AluOp::Asr)?,
        Opcode::Cmp => three(AluOp::Cmp)?,
        Opcode::AddImm => Operation::AddImm {
            ra: reg(0)?,
            imm: signed(1)?,
            rd: reg(2)?,
        },
        Opcode::Jmp => Operation::Jmp { rt: reg(0)? },
        Opcode::JmpImm => Operation::JmpImm {
            target: unsigned(0)?,
        },
        Opcode::Call => Operation::Call { rt: reg(0)? },
        Opcode::CallImm => Operation::CallImm {
            target: unsigned(0)?,
        },
        Opcode::JCond => Operation::JCond {
            rc: reg(0)?,
            mask: unsigned(1)?,
            rt: reg(2)?,
        },
        Opcode::Ldr | Opcode::Ldrb => Operation::Load {
            ra: reg(0)?,
            offset: signed(1)?,
            rd: reg(2)?,
            width: width_of(instruction.opcode),
        },
        Opcode::Str | Opcode::Strb => Operation::Store {
            rs: reg(0)?,
            ra: reg(1)?,
            offset: signed(2)?,
            width: width_of(instruction.opcode),
        },
        Opcode::Push => Operation::Push { rs: reg(0)? },
        Opcode::Pop => Operation::Pop { rd: reg(0)? },
    };
    Some(operation)
}

const fn width_of(opcode: Opcode) -> Width {
    if matches!(opcode, Opcode::Ldrb | Opcode::Strb) {
        Width::Byte
    } else {
        Width::Word
    }
}
