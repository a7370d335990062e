//! Shadow call stack maintained from retired control transfers.

use armlet_isa::WORD_BYTES;
use armlet_linker::{Program, SourceLocation};

use crate::api::ControlTransfer;
use crate::state::TERMINATION_SENTINEL;

/// One observed call that has not returned yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallRecord {
    /// Address of the `CALL`/`CALLIMM`.
    pub call_site: u32,
    /// Callee entry.
    pub target: u32,
    /// Address the callee returns to.
    pub return_address: u32,
}

/// A reconstructed stack frame, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StackFrame {
    /// Enclosing function, when known.
    pub function: Option<String>,
    /// Current `pc` for frame 0, the call site for outer frames.
    pub address: u32,
    /// Source position of `address`.
    pub location: Option<SourceLocation>,
}

/// Calls observed since the session was entered.
#[derive(Debug, Clone, Default)]
pub struct ShadowStack {
    calls: Vec<CallRecord>,
}

impl ShadowStack {
    /// Number of open calls.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.calls.len()
    }

    /// Open calls, outermost first.
    #[must_use]
    pub fn calls(&self) -> &[CallRecord] {
        &self.calls
    }

    /// Forgets every call.
    pub fn clear(&mut self) {
        self.calls.clear();
    }

    /// Updates the stack for one retired instruction at `pc`.
    pub fn observe(&mut self, pc: u32, transfer: Option<ControlTransfer>) {
        match transfer {
            Some(ControlTransfer::Call {
                target,
                return_address,
            }) => self.calls.push(CallRecord {
                call_site: pc,
                target,
                return_address,
            }),
            // Returning past several frames unwinds all of them.
            Some(ControlTransfer::Jump { target }) => {
                if let Some(index) = self
                    .calls
                    .iter()
                    .rposition(|call| call.return_address == target)
                {
                    self.calls.truncate(index);
                }
            }
            None => {}
        }
    }

    /// Frames for a machine stopped at `pc` with link register `lr`.
    ///
    /// Without any observed call, `lr` supplies the caller frame when it
    /// follows a call instruction in another function.
    #[must_use]
    pub fn frames(&self, program: &Program, pc: u32, lr: u32) -> Vec<StackFrame> {
        let mut frames = vec![frame(program, pc)];
        if self.calls.is_empty() {
            if let Some(call_site) = linked_call_site(program, pc, lr) {
                frames.push(frame(program, call_site));
            }
        } else {
            frames.extend(
                self.calls
                    .iter()
                    .rev()
                    .map(|call| frame(program, call.call_site)),
            );
        }
        frames
    }
}

fn linked_call_site(program: &Program, pc: u32, lr: u32) -> Option<u32> {
    if lr == TERMINATION_SENTINEL {
        return None;
    }
    let call_site = lr.wrapping_sub(WORD_BYTES);
    let is_call = program
        .instruction_at(call_site)?
        .decoded
        .as_ref()
        .is_some_and(|decoded| decoded.opcode.is_call());
    let caller = program.function_at(call_site).map(|function| &function.name);
    let current = program.function_at(pc).map(|function| &function.name);
    (is_call && caller != current).then_some(call_site)
}

fn frame(program: &Program, address: u32) -> StackFrame {
    StackFrame {
        function: program
            .function_at(address)
            .map(|function| function.name.clone()),
        address,
        location: program
            .debug_info
            .as_ref()
            .and_then(|info| info.location_at(address))
            .cloned(),
    }
}

#[cfg(test)]
mod tests {
    use armlet_isa::{Instruction, Opcode, Operand};
    use armlet_linker::{Function, Program, ProgramInstruction};

    use super::ShadowStack;
    use crate::api::ControlTransfer;
    use crate::state::TERMINATION_SENTINEL;

    fn placed() -> Program {
        let mut program = Program::new("stack.s");
        for index in 0..4u32 {
            let decoded = if index == 0 {
                Instruction::new(Opcode::CallImm, vec![Operand::Immediate(0x1008)])
            } else {
                Instruction::new(Opcode::Nop, Vec::new())
            };
            let mut instruction = ProgramInstruction::from_decoded(decoded);
            instruction.address = Some(0x1000 + index * 4);
            program.push_instruction(instruction);
        }
        program.add_function(Function::new("main", 0..2));
        program.add_function(Function::new("leaf", 2..4));
        program
    }

    #[test]
    fn returns_pop_matching_calls() {
        let mut stack = ShadowStack::default();
        stack.observe(
            0x1000,
            Some(ControlTransfer::Call {
                target: 0x1008,
                return_address: 0x1004,
            }),
        );
        stack.observe(0x1008, Some(ControlTransfer::Jump { target: 0x2000 }));
        assert_eq!(stack.depth(), 1);
        stack.observe(0x100C, Some(ControlTransfer::Jump { target: 0x1004 }));
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn frames_name_callee_then_caller() {
        let program = placed();
        let mut stack = ShadowStack::default();
        stack.observe(
            0x1000,
            Some(ControlTransfer::Call {
                target: 0x1008,
                return_address: 0x1004,
            }),
        );
        let frames = stack.frames(&program, 0x100C, 0x1004);
        let names: Vec<_> = frames.iter().map(|f| f.function.as_deref()).collect();
        assert_eq!(names, vec![Some("leaf"), Some("main")]);
        assert_eq!(frames[1].address, 0x1000);
    }

    #[test]
    fn link_register_supplies_caller_without_observed_calls() {
        let program = placed();
        let stack = ShadowStack::default();
        assert_eq!(stack.frames(&program, 0x1008, 0x1004).len(), 2);
        assert_eq!(stack.frames(&program, 0x1008, TERMINATION_SENTINEL).len(), 1);
        // Stale lr inside the same function.
        assert_eq!(stack.frames(&program, 0x1004, 0x1004).len(), 1);
    }
}
