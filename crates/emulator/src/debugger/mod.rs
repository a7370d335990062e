//! Debugging session around one interpreter.
//!
//! The session adds breakpoints, watchpoints, source-aware stepping and call
//! stack reconstruction on top of [`Interpreter::run_with`]. It never changes
//! what an instruction does; every stop happens at an instruction boundary.

pub mod breakpoints;
pub mod call_stack;
pub mod observer;

pub use breakpoints::{Breakpoint, BreakpointTable, WatchKind, Watchpoint, WatchpointTable};
pub use call_stack::{CallRecord, ShadowStack, StackFrame};
pub use observer::{DebugObserver, NoObserver};

use std::ops::ControlFlow;

use armlet_isa::Register;
use armlet_linker::{DebugInfo, SourceLocation, Variable, VariableLocation};
use thiserror::Error;
use tracing::{debug, info};

use crate::api::{
    BreakpointId, DebuggerConfig, ExecutionHooks, ExecutionResult, HookStop, StepBudget,
    StepReport, StopReason, StopSignal, WatchpointId,
};
use crate::disasm::{disassemble, DisassemblyRow};
use crate::fault::FaultKind;
use crate::interpreter::{Interpreter, LoadError};

/// Recoverable failure of a debugger command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebuggerError {
    /// No breakpoint with this id.
    #[error("no breakpoint {0:?}")]
    UnknownBreakpoint(BreakpointId),
    /// No watchpoint with this id.
    #[error("no watchpoint {0:?}")]
    UnknownWatchpoint(WatchpointId),
    /// The source line has no mapped address.
    #[error("no code at {file}:{line}")]
    UnknownLocation {
        /// Source file.
        file: String,
        /// Source line.
        line: u32,
    },
    /// No function with this name.
    #[error("unknown function `{name}`")]
    UnknownFunction {
        /// Requested name.
        name: String,
    },
    /// Memory access outside the image.
    #[error(transparent)]
    Memory(#[from] FaultKind),
    /// Re-entering the program failed.
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Current value of a visible variable.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct VariableValue {
    /// Declaration.
    pub variable: Variable,
    /// Memory address, for memory-resident variables.
    pub address: Option<u32>,
    /// Little-endian bytes; `None` when the storage is unreadable.
    pub bytes: Option<Vec<u8>>,
}

/// When a driving call completes on its own.
#[derive(Debug, Clone)]
enum Granularity {
    /// The step budget decides.
    Instruction,
    /// A mapped location other than `start` is reached.
    SourceLine { start: Option<SourceLocation> },
    /// The shadow stack is no deeper than `depth`.
    Over { depth: usize },
    /// The shadow stack is shallower than `depth`.
    Out { depth: usize },
}

/// Interactive control over one interpreter.
#[derive(Debug)]
pub struct Debugger<O: DebugObserver = NoObserver> {
    interpreter: Interpreter,
    config: DebuggerConfig,
    breakpoints: BreakpointTable,
    watchpoints: WatchpointTable,
    shadow: ShadowStack,
    observer: O,
    resume_pc: Option<u32>,
    location: Option<SourceLocation>,
}

impl Debugger<NoObserver> {
    /// Session with no event observer.
    #[must_use]
    pub fn new(interpreter: Interpreter, config: DebuggerConfig) -> Self {
        Self::with_observer(interpreter, config, NoObserver)
    }
}

impl<O: DebugObserver> Debugger<O> {
    /// Session reporting events to `observer`.
    #[must_use]
    pub fn with_observer(interpreter: Interpreter, config: DebuggerConfig, observer: O) -> Self {
        Self {
            interpreter,
            config,
            breakpoints: BreakpointTable::default(),
            watchpoints: WatchpointTable::default(),
            shadow: ShadowStack::default(),
            observer,
            resume_pc: None,
            location: None,
        }
    }

    /// Wrapped interpreter.
    #[must_use]
    pub const fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// Event observer.
    #[must_use]
    pub const fn observer(&self) -> &O {
        &self.observer
    }

    /// Mutable event observer.
    pub const fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &DebuggerConfig {
        &self.config
    }

    /// Ends the session and returns the interpreter.
    #[must_use]
    pub fn into_interpreter(self) -> Interpreter {
        self.interpreter
    }

    /// Handle that other threads may raise to interrupt execution.
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.interpreter.stop_signal()
    }

    // Breakpoints.

    /// Adds an enabled breakpoint at `address`.
    pub fn add_breakpoint(&mut self, address: u32) -> BreakpointId {
        let id = self.breakpoints.insert(address);
        debug!(id = id.0, address, "breakpoint added");
        id
    }

    /// Adds a breakpoint at the first instruction of `file:line`.
    ///
    /// # Errors
    ///
    /// Returns [`DebuggerError::UnknownLocation`] when the line maps to no
    /// address.
    pub fn add_breakpoint_at_line(
        &mut self,
        file: &str,
        line: u32,
    ) -> Result<BreakpointId, DebuggerError> {
        let address = self
            .interpreter
            .program()
            .debug_info
            .as_ref()
            .and_then(|info| info.address_of_line(file, line))
            .ok_or_else(|| DebuggerError::UnknownLocation {
                file: file.to_owned(),
                line,
            })?;
        Ok(self.add_breakpoint(address))
    }

    /// Adds a breakpoint at a function's entry.
    ///
    /// # Errors
    ///
    /// Returns [`DebuggerError::UnknownFunction`] for an undefined name.
    pub fn add_breakpoint_at_function(
        &mut self,
        name: &str,
    ) -> Result<BreakpointId, DebuggerError> {
        let address = self
            .interpreter
            .program()
            .function_address(name)
            .ok_or_else(|| DebuggerError::UnknownFunction {
                name: name.to_owned(),
            })?;
        Ok(self.add_breakpoint(address))
    }

    /// Removes a breakpoint.
    ///
    /// # Errors
    ///
    /// Returns [`DebuggerError::UnknownBreakpoint`] for a stale id.
    pub fn remove_breakpoint(&mut self, id: BreakpointId) -> Result<Breakpoint, DebuggerError> {
        let removed = self
            .breakpoints
            .remove(id)
            .ok_or(DebuggerError::UnknownBreakpoint(id))?;
        debug!(id = id.0, "breakpoint removed");
        Ok(removed)
    }

    /// Enables or disables a breakpoint.
    ///
    /// # Errors
    ///
    /// Returns [`DebuggerError::UnknownBreakpoint`] for a stale id.
    pub fn set_breakpoint_enabled(
        &mut self,
        id: BreakpointId,
        enabled: bool,
    ) -> Result<(), DebuggerError> {
        let breakpoint = self
            .breakpoints
            .get_mut(id)
            .ok_or(DebuggerError::UnknownBreakpoint(id))?;
        breakpoint.enabled = enabled;
        debug!(id = id.0, enabled, "breakpoint toggled");
        Ok(())
    }

    /// Breakpoint by id.
    #[must_use]
    pub fn breakpoint(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints.get(id)
    }

    /// All breakpoints.
    pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.iter()
    }

    // Watchpoints.

    /// Adds an enabled watchpoint over `[address, address + size)`.
    pub fn add_watchpoint(&mut self, address: u32, size: u32, kind: WatchKind) -> WatchpointId {
        let id = self.watchpoints.insert(address, size, kind);
        debug!(id = id.0, address, size, kind = ?kind, "watchpoint added");
        id
    }

    /// Removes a watchpoint.
    ///
    /// # Errors
    ///
    /// Returns [`DebuggerError::UnknownWatchpoint`] for a stale id.
    pub fn remove_watchpoint(&mut self, id: WatchpointId) -> Result<Watchpoint, DebuggerError> {
        let removed = self
            .watchpoints
            .remove(id)
            .ok_or(DebuggerError::UnknownWatchpoint(id))?;
        debug!(id = id.0, "watchpoint removed");
        Ok(removed)
    }

    /// Enables or disables a watchpoint.
    ///
    /// # Errors
    ///
    /// Returns [`DebuggerError::UnknownWatchpoint`] for a stale id.
    pub fn set_watchpoint_enabled(
        &mut self,
        id: WatchpointId,
        enabled: bool,
    ) -> Result<(), DebuggerError> {
        let watchpoint = self
            .watchpoints
            .get_mut(id)
            .ok_or(DebuggerError::UnknownWatchpoint(id))?;
        watchpoint.enabled = enabled;
        debug!(id = id.0, enabled, "watchpoint toggled");
        Ok(())
    }

    /// Watchpoint by id.
    #[must_use]
    pub fn watchpoint(&self, id: WatchpointId) -> Option<&Watchpoint> {
        self.watchpoints.get(id)
    }

    /// All watchpoints.
    pub fn watchpoints(&self) -> impl Iterator<Item = &Watchpoint> {
        self.watchpoints.iter()
    }

    // Execution control.

    /// Executes `count` instructions.
    pub fn step(&mut self, count: u64) -> ExecutionResult {
        self.drive(StepBudget::steps(count), Granularity::Instruction)
    }

    /// Executes until `count` source lines have been left behind.
    ///
    /// Each line step is capped at `max_instructions_per_line` instructions
    /// and reports [`StopReason::StepLimit`] when the cap is reached. Without
    /// debug info this steps instructions.
    pub fn step_source_line(&mut self, count: u64) -> ExecutionResult {
        let program = self.interpreter.program_handle();
        let Some(info) = program.debug_info.as_ref() else {
            return self.step(count);
        };

        let mut total =
            ExecutionResult::stopped(StopReason::StepComplete, self.interpreter.registers().pc());
        for _ in 0..count {
            let start = info.location_at(self.interpreter.registers().pc()).cloned();
            let part = self.drive(
                StepBudget::line(self.config.max_instructions_per_line),
                Granularity::SourceLine { start },
            );
            accumulate(&mut total, &part);
            if part.stop_reason != StopReason::StepComplete {
                break;
            }
        }
        total
    }

    /// Executes one instruction, running any call it makes to completion.
    pub fn step_over(&mut self) -> ExecutionResult {
        let depth = self.shadow.depth();
        self.drive(StepBudget::run(0), Granularity::Over { depth })
    }

    /// Runs until the current function returns to its caller.
    ///
    /// With no observed call this behaves like [`Self::continue_execution`].
    pub fn step_out(&mut self) -> ExecutionResult {
        let depth = self.shadow.depth();
        self.drive(StepBudget::run(0), Granularity::Out { depth })
    }

    /// Runs until a breakpoint, watchpoint or terminal stop.
    pub fn continue_execution(&mut self) -> ExecutionResult {
        self.drive(StepBudget::run(0), Granularity::Instruction)
    }

    /// Like [`Self::continue_execution`] with a step budget; zero is unbounded.
    pub fn run(&mut self, max_steps: u64) -> ExecutionResult {
        self.drive(StepBudget::run(max_steps), Granularity::Instruction)
    }

    /// Restores the loaded image and forgets call history; breakpoints and
    /// watchpoints stay.
    pub fn reset(&mut self) {
        self.interpreter.reset();
        self.shadow.clear();
        self.resume_pc = None;
        self.location = None;
    }

    /// Re-enters the program at the named function.
    ///
    /// # Errors
    ///
    /// Returns [`DebuggerError::Load`] for an unknown function.
    pub fn enter(&mut self, function: &str) -> Result<(), DebuggerError> {
        self.interpreter.enter(function)?;
        self.shadow.clear();
        self.resume_pc = None;
        self.location = None;
        Ok(())
    }

    // State inspection.

    /// Reads one register.
    #[must_use]
    pub const fn read_register(&self, register: Register) -> u32 {
        self.interpreter.read_register(register)
    }

    /// Writes one register.
    pub const fn write_register(&mut self, register: Register, value: u32) {
        self.interpreter.write_register(register, value);
    }

    /// Copies `len` bytes out of memory.
    ///
    /// # Errors
    ///
    /// Returns [`DebuggerError::Memory`] when the range is unmapped.
    pub fn read_memory(&self, address: u32, len: u32) -> Result<Vec<u8>, DebuggerError> {
        Ok(self.interpreter.read_memory(address, len)?)
    }

    /// Writes bytes into memory.
    ///
    /// # Errors
    ///
    /// Returns [`DebuggerError::Memory`] when the range is unmapped.
    pub fn write_memory(&mut self, address: u32, bytes: &[u8]) -> Result<(), DebuggerError> {
        Ok(self.interpreter.write_memory(address, bytes)?)
    }

    /// Disassembles `count` words from `address`.
    #[must_use]
    pub fn disassemble(&self, address: u32, count: usize) -> Vec<DisassemblyRow> {
        disassemble(
            self.interpreter.program(),
            self.interpreter.memory(),
            self.interpreter.decoder(),
            address,
            count,
        )
    }

    /// Frames from `pc` outwards.
    #[must_use]
    pub fn call_stack(&self) -> Vec<StackFrame> {
        let registers = self.interpreter.registers();
        self.shadow
            .frames(self.interpreter.program(), registers.pc(), registers.lr())
    }

    /// Source position of `pc`.
    #[must_use]
    pub fn current_location(&self) -> Option<&SourceLocation> {
        self.debug_info()?
            .location_at(self.interpreter.registers().pc())
    }

    /// Cached text of `file:line`.
    #[must_use]
    pub fn source_line_text(&self, file: &str, line: u32) -> Option<&str> {
        self.debug_info()?.source_line(file, line)
    }

    /// Variables visible at `pc` with their current bytes.
    #[must_use]
    pub fn variables(&self) -> Vec<VariableValue> {
        let Some(info) = self.debug_info() else {
            return Vec::new();
        };
        let registers = self.interpreter.registers();
        info.variables_at(registers.pc())
            .into_iter()
            .map(|variable| {
                let (address, bytes) = match variable.location {
                    VariableLocation::Register(register) => {
                        let value = registers.get(register).to_le_bytes();
                        let len = usize::try_from(variable.size).map_or(4, |size| size.min(4));
                        (None, Some(value[..len].to_vec()))
                    }
                    VariableLocation::Address(address) => (
                        Some(address),
                        self.interpreter.read_memory(address, variable.size).ok(),
                    ),
                    VariableLocation::FrameOffset(offset) => {
                        let address = registers.sp().wrapping_add_signed(offset);
                        (
                            Some(address),
                            self.interpreter.read_memory(address, variable.size).ok(),
                        )
                    }
                };
                VariableValue {
                    variable: variable.clone(),
                    address,
                    bytes,
                }
            })
            .collect()
    }

    fn debug_info(&self) -> Option<&DebugInfo> {
        self.interpreter.program().debug_info.as_ref()
    }

    fn drive(&mut self, budget: StepBudget, granularity: Granularity) -> ExecutionResult {
        let program = self.interpreter.program_handle();
        let mut hooks = SessionHooks {
            breakpoints: &mut self.breakpoints,
            watchpoints: &mut self.watchpoints,
            shadow: &mut self.shadow,
            observer: &mut self.observer,
            debug_info: program.debug_info.as_ref(),
            skip: self.resume_pc.take(),
            granularity,
            location: self.location.take(),
        };
        let result = self.interpreter.run_with(budget, &mut hooks);
        self.location = hooks.location;

        let pc = self.interpreter.registers().pc();
        self.resume_pc = Some(pc);
        match result.stop_reason {
            StopReason::Termination => {
                let value = result.return_value.unwrap_or_default();
                info!(return_value = value, steps = result.steps, "program terminated");
                self.observer.terminated(value);
            }
            StopReason::Halted => {
                info!(pc = result.last_pc, "program halted");
                self.observer.halted(result.last_pc);
            }
            StopReason::Error => {
                if let Some(fault) = result.error.as_ref() {
                    info!(%fault, "execution fault");
                    self.observer.error(fault);
                }
            }
            StopReason::Interrupted => {
                info!(pc, "execution interrupted");
                self.observer.interrupted(pc);
            }
            StopReason::Breakpoint | StopReason::Watchpoint => {
                info!(pc, reason = ?result.stop_reason, "stopped");
            }
            StopReason::StepComplete
            | StopReason::MaxSteps
            | StopReason::StepLimit
            | StopReason::Requested => {}
        }
        result
    }
}

fn accumulate(total: &mut ExecutionResult, part: &ExecutionResult) {
    let steps = total.steps + part.steps;
    let cycles = total.cycles + part.cycles;
    let lag_cycles = total.lag_cycles.max(part.lag_cycles);
    *total = *part;
    total.steps = steps;
    total.cycles = cycles;
    total.lag_cycles = lag_cycles;
}

/// Hooks installed for one driving call.
struct SessionHooks<'a, O: DebugObserver> {
    breakpoints: &'a mut BreakpointTable,
    watchpoints: &'a mut WatchpointTable,
    shadow: &'a mut ShadowStack,
    observer: &'a mut O,
    debug_info: Option<&'a DebugInfo>,
    skip: Option<u32>,
    granularity: Granularity,
    location: Option<SourceLocation>,
}

impl<O: DebugObserver> ExecutionHooks for SessionHooks<'_, O> {
    fn before_step(&mut self, pc: u32) -> Option<HookStop> {
        // The instruction a previous call stopped on runs without re-triggering.
        if self.skip.take() == Some(pc) {
            return None;
        }
        let breakpoint = self.breakpoints.hit(pc)?;
        self.observer.breakpoint_hit(breakpoint, pc);
        Some(HookStop::Breakpoint(breakpoint.id))
    }

    fn after_step(&mut self, report: &StepReport) -> Option<HookStop> {
        self.skip = None;
        self.shadow.observe(report.pc, report.transfer);

        if let Some(access) = report.access.as_ref() {
            if let Some(watchpoint) = self.watchpoints.hit(access) {
                self.observer.watchpoint_hit(watchpoint, access);
                return Some(HookStop::Watchpoint(watchpoint.id));
            }
        }

        let mut line_changed = false;
        if let Some(location) = self
            .debug_info
            .and_then(|info| info.exact_location(report.next_pc))
        {
            if self.location.as_ref() != Some(location) {
                self.location = Some(location.clone());
                if self.observer.source_location_changed(location).is_break() {
                    return Some(HookStop::Requested);
                }
            }
            if let Granularity::SourceLine { start } = &self.granularity {
                line_changed = start.as_ref() != Some(location);
            }
        }

        let complete = match &self.granularity {
            Granularity::Instruction => false,
            Granularity::SourceLine { .. } => line_changed,
            Granularity::Over { depth } => self.shadow.depth() <= *depth,
            Granularity::Out { depth } => self.shadow.depth() < *depth,
        };
        complete.then_some(HookStop::StepComplete)
    }

    fn on_lag(&mut self, lag_cycles: u64) -> ControlFlow<()> {
        self.observer.lagging(lag_cycles)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use armlet_isa::InstructionCodec;
    use armlet_linker::{Function, Linker, Program, ProgramInstruction};

    use super::{Debugger, DebuggerError};
    use crate::api::{BreakpointId, DebuggerConfig, InterpreterConfig, StopReason, WatchpointId};
    use crate::interpreter::Interpreter;

    fn session(lines: &[&str]) -> Debugger {
        let mut program = Program::new("dbg.s");
        for line in lines {
            program.push_instruction(ProgramInstruction::from_text(*line));
        }
        program.add_function(Function::new("main", 0..lines.len()));
        let linked = Linker::default().link(&program).expect("links");
        let interpreter = Interpreter::new(
            Arc::new(linked),
            InstructionCodec::default(),
            InterpreterConfig::default(),
        )
        .expect("loads");
        Debugger::new(interpreter, DebuggerConfig::default())
    }

    #[test]
    fn stale_ids_are_reported_without_side_effects() {
        let mut debugger = session(&["NOP", "HALT"]);
        assert_eq!(
            debugger.remove_breakpoint(BreakpointId(7)),
            Err(DebuggerError::UnknownBreakpoint(BreakpointId(7)))
        );
        assert_eq!(
            debugger.set_watchpoint_enabled(WatchpointId(3), false),
            Err(DebuggerError::UnknownWatchpoint(WatchpointId(3)))
        );
        assert_eq!(debugger.interpreter().registers().pc(), 0x1000);
        assert!(matches!(
            debugger.add_breakpoint_at_line("dbg.c", 1),
            Err(DebuggerError::UnknownLocation { .. })
        ));
    }

    #[test]
    fn function_breakpoint_resolves_entry() {
        let mut debugger = session(&["NOP", "HALT"]);
        let id = debugger.add_breakpoint_at_function("main").expect("defined");
        assert_eq!(debugger.breakpoint(id).map(|bp| bp.address), Some(0x1000));
        assert!(debugger.add_breakpoint_at_function("nope").is_err());
    }

    #[test]
    fn no_debug_info_means_instruction_stepping() {
        let mut debugger = session(&["NOP", "NOP", "HALT"]);
        let result = debugger.step_source_line(2);
        assert_eq!(result.stop_reason, StopReason::StepComplete);
        assert_eq!(result.steps, 2);
        assert!(debugger.variables().is_empty());
        assert!(debugger.current_location().is_none());
    }

    #[test]
    fn step_over_runs_callee_to_completion() {
        let mut debugger = session(&[
            "CALLIMM #4108",
            "HALT",
            "NOP",
            "MOVIMM16L #5, r0",
            "JMP lr",
        ]);
        let result = debugger.step_over();
        assert_eq!(result.stop_reason, StopReason::StepComplete);
        assert_eq!(result.steps, 3);
        assert_eq!(debugger.interpreter().registers().pc(), 0x1004);
        assert_eq!(debugger.read_register(armlet_isa::Register::R0), 5);
    }

    #[test]
    fn step_out_returns_to_caller() {
        let mut debugger = session(&[
            "CALLIMM #4108",
            "HALT",
            "NOP",
            "NOP",
            "JMP lr",
        ]);
        assert_eq!(debugger.step(1).steps, 1);
        assert_eq!(debugger.call_stack().len(), 2);
        let result = debugger.step_out();
        assert_eq!(result.stop_reason, StopReason::StepComplete);
        assert_eq!(result.steps, 2);
        assert_eq!(debugger.interpreter().registers().pc(), 0x1004);
        assert_eq!(debugger.call_stack().len(), 1);
    }
}
