/// Number of slots in the register file.
pub const REGISTER_FILE_SLOTS: usize = 16;
/// Number of general-purpose registers (`r0..r9`).
pub const GENERAL_REGISTER_COUNT: usize = 10;
/// Bit width of a register field in an instruction word.
pub const REGISTER_FIELD_BITS: u8 = 4;

/// `cpsr` bit for zero result.
pub const CPSR_Z: u32 = 1 << 0;
/// `cpsr` bit for carry/borrow.
pub const CPSR_C: u32 = 1 << 1;
/// `cpsr` bit for signed overflow.
pub const CPSR_V: u32 = 1 << 2;
/// `cpsr` bit for negative result.
pub const CPSR_N: u32 = 1 << 3;
/// Mask of architecturally active `cpsr` bits (`Z/C/V/N`).
pub const CPSR_ACTIVE_MASK: u32 = CPSR_Z | CPSR_C | CPSR_V | CPSR_N;

/// Architecturally visible register identifier.
///
/// The discriminant is the register-file slot and the value stored in a
/// register operand field. Slots 14 and 15 are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Register {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
    R8 = 8,
    R9 = 9,
    Sp = 10,
    Lr = 11,
    Pc = 12,
    Cpsr = 13,
}

impl Register {
    /// Every addressable register in slot order.
    pub const ALL: [Self; 14] = [
        Self::R0,
        Self::R1,
        Self::R2,
        Self::R3,
        Self::R4,
        Self::R5,
        Self::R6,
        Self::R7,
        Self::R8,
        Self::R9,
        Self::Sp,
        Self::Lr,
        Self::Pc,
        Self::Cpsr,
    ];

    /// General-purpose registers in index order.
    pub const GENERAL: [Self; GENERAL_REGISTER_COUNT] = [
        Self::R0,
        Self::R1,
        Self::R2,
        Self::R3,
        Self::R4,
        Self::R5,
        Self::R6,
        Self::R7,
        Self::R8,
        Self::R9,
    ];

    /// Returns the register-file slot for this register.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Decodes a register field value. Reserved slots yield `None`.
    #[must_use]
    pub const fn from_index(value: u32) -> Option<Self> {
        let index = value as usize;
        if index < Self::ALL.len() {
            Some(Self::ALL[index])
        } else {
            None
        }
    }

    /// Returns the lower-case assembly name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::R0 => "r0",
            Self::R1 => "r1",
            Self::R2 => "r2",
            Self::R3 => "r3",
            Self::R4 => "r4",
            Self::R5 => "r5",
            Self::R6 => "r6",
            Self::R7 => "r7",
            Self::R8 => "r8",
            Self::R9 => "r9",
            Self::Sp => "sp",
            Self::Lr => "lr",
            Self::Pc => "pc",
            Self::Cpsr => "cpsr",
        }
    }

    /// Parses an assembly register name, ignoring ASCII case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|register| register.name().eq_ignore_ascii_case(name))
    }

    /// Returns true for `r0..r9`.
    #[must_use]
    pub const fn is_general(self) -> bool {
        (self as usize) < GENERAL_REGISTER_COUNT
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded view of the `cpsr` condition flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(clippy::struct_excessive_bools)]
pub struct ConditionFlags {
    /// Result was negative.
    pub negative: bool,
    /// Result was zero.
    pub zero: bool,
    /// Unsigned carry out, or borrow for subtraction.
    pub carry: bool,
    /// Signed overflow.
    pub overflow: bool,
}

impl ConditionFlags {
    /// Unpacks flags from a `cpsr` value.
    #[must_use]
    pub const fn from_cpsr(cpsr: u32) -> Self {
        Self {
            negative: cpsr & CPSR_N != 0,
            zero: cpsr & CPSR_Z != 0,
            carry: cpsr & CPSR_C != 0,
            overflow: cpsr & CPSR_V != 0,
        }
    }

    /// Packs flags into `cpsr` bits.
    #[must_use]
    pub const fn to_cpsr(self) -> u32 {
        let mut cpsr = 0;
        if self.zero {
            cpsr |= CPSR_Z;
        }
        if self.carry {
            cpsr |= CPSR_C;
        }
        if self.overflow {
            cpsr |= CPSR_V;
        }
        if self.negative {
            cpsr |= CPSR_N;
        }
        cpsr
    }
}

#[cfg(test)]
mod tests {
    use super::{ConditionFlags, Register, CPSR_C, CPSR_N, CPSR_V, CPSR_Z, REGISTER_FILE_SLOTS};

    #[test]
    fn slot_layout_matches_addressing_contract() {
        assert_eq!(Register::R0.index(), 0);
        assert_eq!(Register::R9.index(), 9);
        assert_eq!(Register::Sp.index(), 10);
        assert_eq!(Register::Lr.index(), 11);
        assert_eq!(Register::Pc.index(), 12);
        assert_eq!(Register::Cpsr.index(), 13);
        assert!(Register::ALL.len() <= REGISTER_FILE_SLOTS);
    }

    #[test]
    fn reserved_slots_do_not_decode() {
        assert_eq!(Register::from_index(14), None);
        assert_eq!(Register::from_index(15), None);
        assert_eq!(Register::from_index(13), Some(Register::Cpsr));
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!(Register::from_name("R3"), Some(Register::R3));
        assert_eq!(Register::from_name("SP"), Some(Register::Sp));
        assert_eq!(Register::from_name("cpsr"), Some(Register::Cpsr));
        assert_eq!(Register::from_name("r10"), None);
        assert_eq!(Register::from_name(""), None);
    }

    #[test]
    fn every_register_name_roundtrips() {
        for register in Register::ALL {
            assert_eq!(Register::from_name(register.name()), Some(register));
        }
    }

    #[test]
    fn cpsr_bit_layout_is_fixed() {
        assert_eq!(CPSR_Z, 1);
        assert_eq!(CPSR_C, 2);
        assert_eq!(CPSR_V, 4);
        assert_eq!(CPSR_N, 8);

        let flags = ConditionFlags {
            negative: true,
            zero: false,
            carry: true,
            overflow: false,
        };
        assert_eq!(flags.to_cpsr(), CPSR_N | CPSR_C);
        assert_eq!(ConditionFlags::from_cpsr(flags.to_cpsr()), flags);
    }
}
