/// Width in bits of one instruction word.
pub const WORD_BITS: u8 = 32;
/// Size in bytes of one instruction word.
pub const WORD_BYTES: u32 = 4;

/// Closed opcode set. The discriminant is the value stored in the opcode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Opcode {
    Nop = 0,
    Halt = 1,
    Mov = 2,
    MovImm16L = 3,
    MovImm16H = 4,
    Add = 5,
    AddImm = 6,
    Sub = 7,
    Mul = 8,
    Div = 9,
    Mod = 10,
    And = 11,
    Or = 12,
    Xor = 13,
    Shl = 14,
    Shr = 15,
    Asr = 16,
    Cmp = 17,
    Jmp = 18,
    JmpImm = 19,
    Call = 20,
    CallImm = 21,
    JCond = 22,
    Ldr = 23,
    Str = 24,
    Ldrb = 25,
    Strb = 26,
    Push = 27,
    Pop = 28,
}

/// Single source-of-truth opcode/mnemonic table, ordered by ordinal.
pub const OPCODE_MNEMONIC_TABLE: &[(Opcode, &str)] = &[
    (Opcode::Nop, "NOP"),
    (Opcode::Halt, "HALT"),
    (Opcode::Mov, "MOV"),
    (Opcode::MovImm16L, "MOVIMM16L"),
    (Opcode::MovImm16H, "MOVIMM16H"),
    (Opcode::Add, "ADD"),
    (Opcode::AddImm, "ADDIMM"),
    (Opcode::Sub, "SUB"),
    (Opcode::Mul, "MUL"),
    (Opcode::Div, "DIV"),
    (Opcode::Mod, "MOD"),
    (Opcode::And, "AND"),
    (Opcode::Or, "OR"),
    (Opcode::Xor, "XOR"),
    (Opcode::Shl, "SHL"),
    (Opcode::Shr, "SHR"),
    (Opcode::Asr, "ASR"),
    (Opcode::Cmp, "CMP"),
    (Opcode::Jmp, "JMP"),
    (Opcode::JmpImm, "JMPIMM"),
    (Opcode::Call, "CALL"),
    (Opcode::CallImm, "CALLIMM"),
    (Opcode::JCond, "JCOND"),
    (Opcode::Ldr, "LDR"),
    (Opcode::Str, "STR"),
    (Opcode::Ldrb, "LDRB"),
    (Opcode::Strb, "STRB"),
    (Opcode::Push, "PUSH"),
    (Opcode::Pop, "POP"),
];

/// Width of the opcode field at bits `[0, OPCODE_BITS)`.
pub const OPCODE_BITS: u8 = ceil_log2(Opcode::COUNT);

const _: () = assert_opcode_table_layout();

const fn assert_opcode_table_layout() {
    assert!(
        OPCODE_MNEMONIC_TABLE.len() == Opcode::COUNT,
        "every opcode needs exactly one mnemonic entry"
    );
    let mut index = 0;
    while index < OPCODE_MNEMONIC_TABLE.len() {
        assert!(
            OPCODE_MNEMONIC_TABLE[index].0 as usize == index,
            "mnemonic table must be ordered by ordinal"
        );
        index += 1;
    }
    assert!(OPCODE_BITS < WORD_BITS, "opcode field must leave operand room");
}

#[allow(clippy::cast_possible_truncation)]
const fn ceil_log2(count: usize) -> u8 {
    if count <= 1 {
        0
    } else {
        (usize::BITS - (count - 1).leading_zeros()) as u8
    }
}

impl Opcode {
    /// Number of defined opcodes.
    pub const COUNT: usize = 29;

    /// Every opcode in ordinal order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Nop,
        Self::Halt,
        Self::Mov,
        Self::MovImm16L,
        Self::MovImm16H,
        Self::Add,
        Self::AddImm,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Mod,
        Self::And,
        Self::Or,
        Self::Xor,
        Self::Shl,
        Self::Shr,
        Self::Asr,
        Self::Cmp,
        Self::Jmp,
        Self::JmpImm,
        Self::Call,
        Self::CallImm,
        Self::JCond,
        Self::Ldr,
        Self::Str,
        Self::Ldrb,
        Self::Strb,
        Self::Push,
        Self::Pop,
    ];

    /// Returns the ordinal stored in the opcode field.
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Converts an opcode field value back into an opcode.
    ///
    /// `None` means the value names no defined opcode.
    #[must_use]
    pub const fn from_ordinal(value: u32) -> Option<Self> {
        let index = value as usize;
        if index < Self::COUNT {
            Some(Self::ALL[index])
        } else {
            None
        }
    }

    /// Returns the canonical upper-case assembly mnemonic.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        OPCODE_MNEMONIC_TABLE[self as usize].1
    }

    /// Looks up an opcode by mnemonic, ignoring ASCII case.
    #[must_use]
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        OPCODE_MNEMONIC_TABLE
            .iter()
            .find_map(|(opcode, name)| name.eq_ignore_ascii_case(mnemonic).then_some(*opcode))
    }

    /// Returns true for opcodes that may redirect the program counter.
    #[must_use]
    pub const fn is_control_transfer(self) -> bool {
        matches!(
            self,
            Self::Jmp | Self::JmpImm | Self::Call | Self::CallImm | Self::JCond
        )
    }

    /// Returns true for subroutine calls that write the link register.
    #[must_use]
    pub const fn is_call(self) -> bool {
        matches!(self, Self::Call | Self::CallImm)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}
