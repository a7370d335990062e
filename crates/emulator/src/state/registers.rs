use armlet_isa::{ConditionFlags, Register, CPSR_ACTIVE_MASK, REGISTER_FILE_SLOTS};

/// Return address written to `lr` on entry; reaching it ends execution.
pub const TERMINATION_SENTINEL: u32 = 0xFFFF_FFFC;

/// Register holding a function's return value.
pub const RETURN_VALUE_REGISTER: Register = Register::R0;

/// Full register file: general-purpose block plus `sp`, `lr`, `pc`, `cpsr`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegisterFile {
    slots: [u32; REGISTER_FILE_SLOTS],
}

impl RegisterFile {
    /// Reads a register.
    #[must_use]
    pub const fn get(&self, register: Register) -> u32 {
        self.slots[register.index()]
    }

    /// Writes a register; `cpsr` keeps only its active flag bits.
    pub const fn set(&mut self, register: Register, value: u32) {
        let value = if matches!(register, Register::Cpsr) {
            value & CPSR_ACTIVE_MASK
        } else {
            value
        };
        self.slots[register.index()] = value;
    }

    /// Reads the `pc` register.
    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.get(Register::Pc)
    }

    /// Writes the `pc` register.
    pub const fn set_pc(&mut self, value: u32) {
        self.set(Register::Pc, value);
    }

    /// Reads the `sp` register.
    #[must_use]
    pub const fn sp(&self) -> u32 {
        self.get(Register::Sp)
    }

    /// Reads the `lr` register.
    #[must_use]
    pub const fn lr(&self) -> u32 {
        self.get(Register::Lr)
    }

    /// Decoded condition flags.
    #[must_use]
    pub const fn flags(&self) -> ConditionFlags {
        ConditionFlags::from_cpsr(self.get(Register::Cpsr))
    }

    /// Replaces the condition flags.
    pub const fn set_flags(&mut self, flags: ConditionFlags) {
        self.set(Register::Cpsr, flags.to_cpsr());
    }

    /// Every addressable register with its value, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Register, u32)> + '_ {
        Register::ALL.iter().map(|register| (*register, self.get(*register)))
    }
}

#[cfg(test)]
mod tests {
    use armlet_isa::{ConditionFlags, Register};

    use super::RegisterFile;

    #[test]
    fn default_register_file_is_zeroed() {
        let registers = RegisterFile::default();
        assert!(registers.iter().all(|(_, value)| value == 0));
        assert_eq!(registers.iter().count(), 14);
    }

    #[test]
    fn cpsr_writes_keep_only_flag_bits() {
        let mut registers = RegisterFile::default();
        registers.set(Register::Cpsr, u32::MAX);
        assert_eq!(registers.get(Register::Cpsr), 0xF);
        assert_eq!(
            registers.flags(),
            ConditionFlags {
                negative: true,
                zero: true,
                carry: true,
                overflow: true,
            }
        );
    }

    #[test]
    fn named_accessors_alias_slots() {
        let mut registers = RegisterFile::default();
        registers.set_pc(0x1000);
        registers.set(Register::Sp, 0x2000);
        registers.set(Register::Lr, 0x3000);
        assert_eq!(registers.get(Register::Pc), 0x1000);
        assert_eq!(registers.sp(), 0x2000);
        assert_eq!(registers.lr(), 0x3000);
    }
}
