use armlet_isa::Opcode;

/// Instruction classes that have fixed cycle costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleCostKind {
    /// No-operation instruction.
    Nop,
    /// Halt instruction.
    Halt,
    /// Register/immediate move.
    Mov,
    /// Integer add/sub/logic/shift/compare class.
    Alu,
    /// Integer multiply.
    Mul,
    /// Integer divide/modulo class.
    Div,
    /// Memory read instruction.
    Load,
    /// Memory write instruction.
    Store,
    /// Stack push.
    Push,
    /// Stack pop.
    Pop,
    /// Unconditional jump.
    Jump,
    /// Subroutine call.
    Call,
    /// Conditional jump when the mask test fails.
    BranchNotTaken,
    /// Conditional jump when the mask test succeeds.
    BranchTaken,
}

/// Single source-of-truth cycle-cost table.
pub const CYCLE_COST_TABLE: &[(CycleCostKind, u16)] = &[
    (CycleCostKind::Nop, 1),
    (CycleCostKind::Halt, 1),
    (CycleCostKind::Mov, 1),
    (CycleCostKind::Alu, 1),
    (CycleCostKind::Mul, 2),
    (CycleCostKind::Div, 3),
    (CycleCostKind::Load, 2),
    (CycleCostKind::Store, 2),
    (CycleCostKind::Push, 2),
    (CycleCostKind::Pop, 2),
    (CycleCostKind::Jump, 2),
    (CycleCostKind::Call, 2),
    (CycleCostKind::BranchNotTaken, 1),
    (CycleCostKind::BranchTaken, 2),
];

/// Looks up the cycle cost for a cycle-cost kind.
#[must_use]
pub fn cycle_cost(kind: CycleCostKind) -> Option<u16> {
    CYCLE_COST_TABLE
        .iter()
        .find_map(|(entry_kind, cycles)| (*entry_kind == kind).then_some(*cycles))
}

/// Cost class of `opcode`; `taken` only matters for `JCOND`.
#[must_use]
pub const fn cost_kind(opcode: Opcode, taken: bool) -> CycleCostKind {
    match opcode {
        Opcode::Nop => CycleCostKind::Nop,
        Opcode::Halt => CycleCostKind::Halt,
        Opcode::Mov | Opcode::MovImm16L | Opcode::MovImm16H => CycleCostKind::Mov,
        Opcode::Add
        | Opcode::AddImm
        | Opcode::Sub
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Shl
        | Opcode::Shr
        | Opcode::Asr
        | Opcode::Cmp => CycleCostKind::Alu,
        Opcode::Mul => CycleCostKind::Mul,
        Opcode::Div | Opcode::Mod => CycleCostKind::Div,
        Opcode::Ldr | Opcode::Ldrb => CycleCostKind::Load,
        Opcode::Str | Opcode::Strb => CycleCostKind::Store,
        Opcode::Push => CycleCostKind::Push,
        Opcode::Pop => CycleCostKind::Pop,
        Opcode::Jmp | Opcode::JmpImm => CycleCostKind::Jump,
        Opcode::Call | Opcode::CallImm => CycleCostKind::Call,
        Opcode::JCond if taken => CycleCostKind::BranchTaken,
        Opcode::JCond => CycleCostKind::BranchNotTaken,
    }
}
