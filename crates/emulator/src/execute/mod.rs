//! Instruction execution with precise faults.
//!
//! Execution runs in two phases:
//! 1. [`execute_instruction`] reads registers and memory and records every
//!    effect in an [`ExecuteState`].
//! 2. [`commit_execution`] applies the memory write, then register writes,
//!    then `cpsr`, then `pc`.
//!
//! A fault raised in phase 1 leaves no partial side effects.

mod flags;

pub use flags::FlagsUpdate;

use armlet_isa::{ConditionFlags, Opcode, Register, WORD_BYTES};

use crate::api::{AccessKind, ControlTransfer, MemoryAccess};
use crate::decoder::{AluOp, Operation, Width};
use crate::fault::FaultKind;
use crate::memory::Memory;
use crate::state::RegisterFile;
use crate::timing::{cost_kind, cycle_cost};

/// Deferred memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWrite {
    /// First byte written.
    pub address: u32,
    /// Value; only the low byte is stored for [`Width::Byte`].
    pub value: u32,
    /// Store width.
    pub width: Width,
}

/// Side effects accumulated while executing one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteState {
    /// Register writes applied in order; later writes win.
    pub register_writes: [Option<(Register, u32)>; 2],
    /// Store to perform.
    pub memory_write: Option<MemoryWrite>,
    /// Data access for watchpoint matching.
    pub access: Option<MemoryAccess>,
    /// `cpsr` update to apply.
    pub flags_update: FlagsUpdate,
    /// `pc` after commit.
    pub next_pc: u32,
    /// Cycle cost.
    pub cycles: u16,
    /// Redirect of control flow, if any.
    pub transfer: Option<ControlTransfer>,
    /// `HALT` retired.
    pub halt: bool,
}

impl ExecuteState {
    /// Fall-through state for the instruction at `pc`.
    #[must_use]
    pub const fn new(pc: u32) -> Self {
        Self {
            register_writes: [None; 2],
            memory_write: None,
            access: None,
            flags_update: FlagsUpdate::None,
            next_pc: pc.wrapping_add(WORD_BYTES),
            cycles: 0,
            transfer: None,
            halt: false,
        }
    }

    /// Queues a register write; writing `pc` redirects control flow.
    pub fn write_register(&mut self, register: Register, value: u32) {
        if register == Register::Pc {
            self.redirect(value);
            return;
        }
        if let Some(slot) = self.register_writes.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some((register, value));
        }
    }

    /// Sets the next `pc` to `target`.
    pub const fn redirect(&mut self, target: u32) {
        self.next_pc = target;
        self.transfer = Some(ControlTransfer::Jump { target });
    }
}

/// Executes one operation against the current state without modifying it.
///
/// # Errors
///
/// Returns the fault raised by the operation: an out-of-bounds data access
/// or an undefined division.
pub fn execute_instruction(
    opcode: Opcode,
    operation: Operation,
    registers: &RegisterFile,
    memory: &Memory,
) -> Result<ExecuteState, FaultKind> {
    let pc = registers.pc();
    let mut exec = ExecuteState::new(pc);
    let mut taken = false;

    match operation {
        Operation::Nop => {}
        Operation::Halt => exec.halt = true,
        Operation::Mov { rs, rd } => exec.write_register(rd, registers.get(rs)),
        Operation::MovImm16L { imm, rd } => exec.write_register(rd, imm & 0xFFFF),
        Operation::MovImm16H { imm, rd, src } => {
            exec.write_register(rd, (imm << 16) | (registers.get(src) & 0xFFFF));
        }
        Operation::Alu { op, ra, rb, rd } => {
            let (result, flags) =
                alu(op, registers.get(ra), registers.get(rb), registers.flags())?;
            exec.write_register(rd, result);
            exec.flags_update = flags;
        }
        Operation::AddImm { ra, imm, rd } => {
            #[allow(clippy::cast_sign_loss)]
            let (result, flags) =
                alu(AluOp::Add, registers.get(ra), imm as u32, registers.flags())?;
            exec.write_register(rd, result);
            exec.flags_update = flags;
        }
        Operation::Jmp { rt } => exec.redirect(registers.get(rt)),
        Operation::JmpImm { target } => exec.redirect(target),
        Operation::Call { rt } => call(&mut exec, pc, registers.get(rt)),
        Operation::CallImm { target } => call(&mut exec, pc, target),
        Operation::JCond { rc, mask, rt } => {
            taken = registers.get(rc) & mask != 0;
            if taken {
                exec.redirect(registers.get(rt));
            }
        }
        Operation::Load {
            ra,
            offset,
            rd,
            width,
        } => {
            let address = registers.get(ra).wrapping_add_signed(offset);
            let value = match width {
                Width::Byte => u32::from(memory.read_u8(address)?),
                Width::Word => memory.read_u32(address)?,
            };
            exec.write_register(rd, value);
            exec.access = Some(read_access(address, width));
        }
        Operation::Store {
            rs,
            ra,
            offset,
            width,
        } => {
            let address = registers.get(ra).wrapping_add_signed(offset);
            store(&mut exec, memory, address, registers.get(rs), width)?;
        }
        Operation::Push { rs } => {
            let sp = registers.sp().wrapping_sub(WORD_BYTES);
            store(&mut exec, memory, sp, registers.get(rs), Width::Word)?;
            exec.write_register(Register::Sp, sp);
        }
        Operation::Pop { rd } => {
            let sp = registers.sp();
            let value = memory.read_u32(sp)?;
            exec.write_register(Register::Sp, sp.wrapping_add(WORD_BYTES));
            exec.write_register(rd, value);
            exec.access = Some(read_access(sp, Width::Word));
        }
    }

    exec.cycles = cycle_cost(cost_kind(opcode, taken)).unwrap_or(1);
    Ok(exec)
}

/// Applies the side effects recorded by [`execute_instruction`].
///
/// # Errors
///
/// Returns [`FaultKind::InvalidMemoryAccess`] if the deferred store no longer
/// fits the memory image; registers are untouched in that case.
pub fn commit_execution(
    registers: &mut RegisterFile,
    memory: &mut Memory,
    exec: &ExecuteState,
) -> Result<(), FaultKind> {
    if let Some(write) = exec.memory_write {
        match write.width {
            #[allow(clippy::cast_possible_truncation)]
            Width::Byte => memory.write_u8(write.address, write.value as u8)?,
            Width::Word => memory.write_u32(write.address, write.value)?,
        }
    }

    for (register, value) in exec.register_writes.iter().flatten() {
        registers.set(*register, *value);
    }

    let flags = exec.flags_update.apply(registers.flags());
    registers.set_flags(flags);
    registers.set_pc(exec.next_pc);
    Ok(())
}

fn call(exec: &mut ExecuteState, pc: u32, target: u32) {
    let return_address = pc.wrapping_add(WORD_BYTES);
    exec.write_register(Register::Lr, return_address);
    exec.next_pc = target;
    exec.transfer = Some(ControlTransfer::Call {
        target,
        return_address,
    });
}

fn store(
    exec: &mut ExecuteState,
    memory: &Memory,
    address: u32,
    value: u32,
    width: Width,
) -> Result<(), FaultKind> {
    let size = width.bytes();
    if !memory.contains(address, size) {
        return Err(FaultKind::InvalidMemoryAccess { address, size });
    }
    exec.memory_write = Some(MemoryWrite {
        address,
        value,
        width,
    });
    exec.access = Some(MemoryAccess {
        address,
        size,
        kind: AccessKind::Write,
    });
    Ok(())
}

const fn read_access(address: u32, width: Width) -> MemoryAccess {
    MemoryAccess {
        address,
        size: width.bytes(),
        kind: AccessKind::Read,
    }
}

/// `CMP` condition-mask bits.
pub mod condition {
    /// `ra == rb`.
    pub const EQ: u32 = 1 << 0;
    /// `ra != rb`.
    pub const NE: u32 = 1 << 1;
    /// Signed `ra < rb`.
    pub const LT: u32 = 1 << 2;
    /// Signed `ra <= rb`.
    pub const LE: u32 = 1 << 3;
    /// Signed `ra > rb`.
    pub const GT: u32 = 1 << 4;
    /// Signed `ra >= rb`.
    pub const GE: u32 = 1 << 5;
    /// Unsigned `ra < rb`.
    pub const LO: u32 = 1 << 6;
    /// Unsigned `ra >= rb`.
    pub const HS: u32 = 1 << 7;
}

/// Condition mask for comparing `a` with `b`.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub const fn condition_mask(a: u32, b: u32) -> u32 {
    let (sa, sb) = (a as i32, b as i32);
    let mut mask = 0;
    if a == b {
        mask |= condition::EQ;
    } else {
        mask |= condition::NE;
    }
    if sa < sb {
        mask |= condition::LT;
    }
    if sa <= sb {
        mask |= condition::LE;
    }
    if sa > sb {
        mask |= condition::GT;
    }
    if sa >= sb {
        mask |= condition::GE;
    }
    if a < b {
        mask |= condition::LO;
    } else {
        mask |= condition::HS;
    }
    mask
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn alu(
    op: AluOp,
    a: u32,
    b: u32,
    current: ConditionFlags,
) -> Result<(u32, FlagsUpdate), FaultKind> {
    let subtract = |a: u32, b: u32| {
        let result = a.wrapping_sub(b);
        let overflow = ((a ^ b) & (a ^ result)) >> 31 != 0;
        (result, FlagsUpdate::nzcv(result, a < b, overflow))
    };
    let shift = b & 31;
    let shifted = |result: u32, carry: bool| {
        FlagsUpdate::Set(ConditionFlags {
            negative: result & 0x8000_0000 != 0,
            zero: result == 0,
            carry: if shift == 0 { current.carry } else { carry },
            overflow: current.overflow,
        })
    };

    let outcome = match op {
        AluOp::Add => {
            let (result, carry) = a.overflowing_add(b);
            let overflow = ((a ^ result) & (b ^ result)) >> 31 != 0;
            (result, FlagsUpdate::nzcv(result, carry, overflow))
        }
        AluOp::Sub => subtract(a, b),
        AluOp::Mul => {
            let wide = u64::from(a) * u64::from(b);
            let result = wide as u32;
            let signed = i64::from(a as i32) * i64::from(b as i32);
            let carry = wide > u64::from(u32::MAX);
            let overflow = signed != i64::from(result as i32);
            (result, FlagsUpdate::nzcv(result, carry, overflow))
        }
        AluOp::Div | AluOp::Mod => {
            let (sa, sb) = (a as i32, b as i32);
            if sb == 0 {
                return Err(FaultKind::DivisionByZero);
            }
            if sa == i32::MIN && sb == -1 {
                return Err(FaultKind::DivisionOverflow);
            }
            let quotient = if op == AluOp::Div { sa / sb } else { sa % sb };
            let result = quotient as u32;
            (result, FlagsUpdate::nz(result))
        }
        AluOp::And => (a & b, FlagsUpdate::nzcv(a & b, false, false)),
        AluOp::Or => (a | b, FlagsUpdate::nzcv(a | b, false, false)),
        AluOp::Xor => (a ^ b, FlagsUpdate::nzcv(a ^ b, false, false)),
        AluOp::Shl => {
            let result = a << shift;
            let carry = shift != 0 && (a >> (32 - shift)) & 1 != 0;
            (result, shifted(result, carry))
        }
        AluOp::Shr => {
            let result = a >> shift;
            let carry = shift != 0 && (a >> (shift - 1)) & 1 != 0;
            (result, shifted(result, carry))
        }
        AluOp::Asr => {
            let result = ((a as i32) >> shift) as u32;
            let carry = shift != 0 && (a >> (shift - 1)) & 1 != 0;
            (result, shifted(result, carry))
        }
        AluOp::Cmp => {
            let (_, flags) = subtract(a, b);
            (condition_mask(a, b), flags)
        }
    };
    Ok(outcome)
}

#[cfg(test)]
#[allow(clippy::cast_sign_loss)]
mod tests {
    use armlet_isa::{ConditionFlags, Opcode, Register};
    use rstest::rstest;

    use super::{commit_execution, condition, condition_mask, execute_instruction, FlagsUpdate};
    use crate::api::{AccessKind, ControlTransfer};
    use crate::decoder::{AluOp, Operation, Width};
    use crate::fault::FaultKind;
    use crate::memory::Memory;
    use crate::state::RegisterFile;

    const BASE: u32 = 0x1000;

    fn machine(a: u32, b: u32) -> (RegisterFile, Memory) {
        let mut registers = RegisterFile::default();
        registers.set_pc(BASE);
        registers.set(Register::R1, a);
        registers.set(Register::R2, b);
        registers.set(Register::Sp, BASE + 0x40);
        (registers, Memory::new(BASE, 0x40))
    }

    fn alu(op: AluOp, a: u32, b: u32) -> (u32, ConditionFlags) {
        let (mut registers, mut memory) = machine(a, b);
        let operation = Operation::Alu {
            op,
            ra: Register::R1,
            rb: Register::R2,
            rd: Register::R3,
        };
        let exec = execute_instruction(Opcode::Add, operation, &registers, &memory)
            .expect("no fault");
        commit_execution(&mut registers, &mut memory, &exec).expect("commits");
        (registers.get(Register::R3), registers.flags())
    }

    fn flags(n: bool, z: bool, c: bool, v: bool) -> ConditionFlags {
        ConditionFlags {
            negative: n,
            zero: z,
            carry: c,
            overflow: v,
        }
    }

    #[rstest]
    #[case(AluOp::Add, 10, 20, 30, flags(false, false, false, false))]
    #[case(AluOp::Add, u32::MAX, 1, 0, flags(false, true, true, false))]
    #[case(AluOp::Add, 0x7FFF_FFFF, 1, 0x8000_0000, flags(true, false, false, true))]
    #[case(AluOp::Sub, 5, 7, 0xFFFF_FFFE, flags(true, false, true, false))]
    #[case(AluOp::Sub, 7, 7, 0, flags(false, true, false, false))]
    #[case(AluOp::Sub, 0x8000_0000, 1, 0x7FFF_FFFF, flags(false, false, false, true))]
    #[case(AluOp::Mul, 0x1_0000, 0x1_0000, 0, flags(false, true, true, true))]
    #[case(AluOp::Mul, 0xFFFF_FFFF, 2, 0xFFFF_FFFE, flags(true, false, true, false))]
    #[case(AluOp::Div, (-7i32) as u32, 2, (-3i32) as u32, flags(true, false, false, false))]
    #[case(AluOp::Mod, (-7i32) as u32, 2, (-1i32) as u32, flags(true, false, false, false))]
    #[case(AluOp::And, 0b1100, 0b1010, 0b1000, flags(false, false, false, false))]
    #[case(AluOp::Xor, 5, 5, 0, flags(false, true, false, false))]
    #[case(AluOp::Shl, 0x8000_0001, 1, 2, flags(false, false, true, false))]
    #[case(AluOp::Shr, 0b11, 1, 1, flags(false, false, true, false))]
    #[case(AluOp::Asr, 0x8000_0000, 31, 0xFFFF_FFFF, flags(true, false, false, false))]
    #[case(AluOp::Shl, 1, 33, 2, flags(false, false, false, false))]
    fn alu_results_and_flags(
        #[case] op: AluOp,
        #[case] a: u32,
        #[case] b: u32,
        #[case] result: u32,
        #[case] expected: ConditionFlags,
    ) {
        assert_eq!(alu(op, a, b), (result, expected));
    }

    #[rstest]
    #[case(3, 3, condition::EQ | condition::LE | condition::GE | condition::HS)]
    #[case(2, 3, condition::NE | condition::LT | condition::LE | condition::LO)]
    #[case(
        (-1i32) as u32,
        1,
        condition::NE | condition::LT | condition::LE | condition::HS
    )]
    fn condition_mask_covers_signed_and_unsigned(
        #[case] a: u32,
        #[case] b: u32,
        #[case] expected: u32,
    ) {
        assert_eq!(condition_mask(a, b), expected);
        assert_eq!(alu(AluOp::Cmp, a, b).0, expected);
    }

    #[test]
    fn division_faults_leave_state_untouched() {
        let (registers, memory) = machine(9, 0);
        let operation = Operation::Alu {
            op: AluOp::Div,
            ra: Register::R1,
            rb: Register::R2,
            rd: Register::R3,
        };
        assert_eq!(
            execute_instruction(Opcode::Div, operation, &registers, &memory),
            Err(FaultKind::DivisionByZero)
        );

        let (registers, memory) = machine(0x8000_0000, u32::MAX);
        assert_eq!(
            execute_instruction(Opcode::Div, operation, &registers, &memory),
            Err(FaultKind::DivisionOverflow)
        );
    }

    #[test]
    fn logic_clears_carry_and_overflow_while_div_keeps_them() {
        assert_eq!(
            FlagsUpdate::nz(0).apply(flags(true, false, true, true)),
            flags(false, true, true, true)
        );
        assert_eq!(
            FlagsUpdate::nzcv(1, false, false).apply(flags(true, true, true, true)),
            flags(false, false, false, false)
        );
    }

    #[test]
    fn push_then_pop_round_trips_through_the_stack() {
        let (mut registers, mut memory) = machine(0xCAFE, 0);
        let push = execute_instruction(
            Opcode::Push,
            Operation::Push { rs: Register::R1 },
            &registers,
            &memory,
        )
        .expect("in bounds");
        assert_eq!(push.access.map(|a| a.kind), Some(AccessKind::Write));
        commit_execution(&mut registers, &mut memory, &push).expect("commits");
        assert_eq!(registers.sp(), BASE + 0x3C);
        assert_eq!(memory.read_u32(BASE + 0x3C), Ok(0xCAFE));

        let pop = execute_instruction(
            Opcode::Pop,
            Operation::Pop { rd: Register::R4 },
            &registers,
            &memory,
        )
        .expect("in bounds");
        commit_execution(&mut registers, &mut memory, &pop).expect("commits");
        assert_eq!(registers.get(Register::R4), 0xCAFE);
        assert_eq!(registers.sp(), BASE + 0x40);
        assert_eq!(pop.cycles, 2);
    }

    #[test]
    fn out_of_bounds_store_faults_before_commit() {
        let (registers, memory) = machine(1, 0);
        let operation = Operation::Store {
            rs: Register::R1,
            ra: Register::Sp,
            offset: 0,
            width: Width::Word,
        };
        assert_eq!(
            execute_instruction(Opcode::Str, operation, &registers, &memory),
            Err(FaultKind::InvalidMemoryAccess {
                address: BASE + 0x40,
                size: 4
            })
        );
    }

    #[test]
    fn byte_store_writes_low_byte_only() {
        let (mut registers, mut memory) = machine(0x1234_5678, 0);
        let operation = Operation::Store {
            rs: Register::R1,
            ra: Register::Sp,
            offset: -4,
            width: Width::Byte,
        };
        let exec = execute_instruction(Opcode::Strb, operation, &registers, &memory)
            .expect("in bounds");
        commit_execution(&mut registers, &mut memory, &exec).expect("commits");
        assert_eq!(memory.read_u32(BASE + 0x3C), Ok(0x78));
    }

    #[test]
    fn call_links_and_redirects() {
        let (registers, memory) = machine(0, 0);
        let exec = execute_instruction(
            Opcode::CallImm,
            Operation::CallImm { target: 0x2000 },
            &registers,
            &memory,
        )
        .expect("no fault");
        assert_eq!(exec.next_pc, 0x2000);
        assert_eq!(exec.register_writes[0], Some((Register::Lr, BASE + 4)));
        assert_eq!(
            exec.transfer,
            Some(ControlTransfer::Call {
                target: 0x2000,
                return_address: BASE + 4
            })
        );
    }

    #[rstest]
    #[case(condition::LT, true, 2)]
    #[case(condition::GT, false, 1)]
    fn conditional_jump_cost_depends_on_outcome(
        #[case] mask: u32,
        #[case] taken: bool,
        #[case] cycles: u16,
    ) {
        let (mut registers, memory) = machine(condition_mask(1, 2), 0x1800);
        registers.set(Register::R3, 0x1800);
        let exec = execute_instruction(
            Opcode::JCond,
            Operation::JCond {
                rc: Register::R1,
                mask,
                rt: Register::R3,
            },
            &registers,
            &memory,
        )
        .expect("no fault");
        assert_eq!(exec.next_pc == 0x1800, taken);
        assert_eq!(exec.cycles, cycles);
    }

    #[test]
    fn writing_pc_redirects() {
        let (registers, memory) = machine(0x1010, 0);
        let exec = execute_instruction(
            Opcode::Mov,
            Operation::Mov {
                rs: Register::R1,
                rd: Register::Pc,
            },
            &registers,
            &memory,
        )
        .expect("no fault");
        assert_eq!(exec.next_pc, 0x1010);
        assert!(exec.register_writes.iter().all(Option::is_none));
    }

    #[test]
    fn movimm16h_keeps_low_half_of_tied_source() {
        let (mut registers, mut memory) = machine(0x0000_BEEF, 0);
        let exec = execute_instruction(
            Opcode::MovImm16H,
            Operation::MovImm16H {
                imm: 0xDEAD,
                rd: Register::R1,
                src: Register::R1,
            },
            &registers,
            &memory,
        )
        .expect("no fault");
        commit_execution(&mut registers, &mut memory, &exec).expect("commits");
        assert_eq!(registers.get(Register::R1), 0xDEAD_BEEF);
        assert_eq!(registers.pc(), BASE + 4);
    }
}
