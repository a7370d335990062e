//! `cpsr` update behaviors for different instruction classes.

use armlet_isa::ConditionFlags;

/// Describes how `cpsr` should be updated after an instruction executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagsUpdate {
    /// No change to `cpsr`.
    #[default]
    None,
    /// Replace all four flags.
    Set(ConditionFlags),
    /// Update N and Z; C and V keep their values.
    NegativeZero {
        /// Negative flag.
        negative: bool,
        /// Zero flag.
        zero: bool,
    },
}

impl FlagsUpdate {
    /// NZ from `result`, with explicit carry and overflow.
    #[must_use]
    pub const fn nzcv(result: u32, carry: bool, overflow: bool) -> Self {
        Self::Set(ConditionFlags {
            negative: result & 0x8000_0000 != 0,
            zero: result == 0,
            carry,
            overflow,
        })
    }

    /// NZ from `result`; C and V preserved.
    #[must_use]
    pub const fn nz(result: u32) -> Self {
        Self::NegativeZero {
            negative: result & 0x8000_0000 != 0,
            zero: result == 0,
        }
    }

    /// Applies this update to `current`.
    #[must_use]
    pub const fn apply(self, current: ConditionFlags) -> ConditionFlags {
        match self {
            Self::None => current,
            Self::Set(flags) => flags,
            Self::NegativeZero { negative, zero } => ConditionFlags {
                negative,
                zero,
                ..current
            },
        }
    }
}
