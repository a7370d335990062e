//! Fetch/decode/execute loop over one linked program.
//!
//! The interpreter owns the register file and memory image. A driving call
//! (`step`, `run`, `run_with`) retires whole instructions until a stop
//! condition fires and reports it as an [`ExecutionResult`].

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use armlet_isa::{CodecError, InstructionCodec, Opcode, Register, WORD_BYTES};
use armlet_linker::Program;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::api::{
    ExecutionHooks, ExecutionResult, HookStop, InterpreterConfig, NoHooks, StepBudget,
    StepReport, StopReason, StopSignal, ThrottleConfig,
};
use crate::decoder::Decoder;
use crate::execute::{commit_execution, execute_instruction, ExecuteState};
use crate::fault::{ExecutionFault, FaultKind};
use crate::memory::Memory;
use crate::state::{RegisterFile, RunState, RETURN_VALUE_REGISTER, TERMINATION_SENTINEL};

/// Longest single sleep while throttled, so a raised stop signal is seen promptly.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Failure to build a memory image from a program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The program has no memory layout.
    #[error("program `{file}` is not linked")]
    NotLinked {
        /// Program file name.
        file: String,
    },
    /// An instruction has no address or no machine encoding.
    #[error("instruction {index} is not resolved")]
    Unresolved {
        /// Instruction index.
        index: usize,
    },
    /// An instruction's fields do not encode.
    #[error("instruction {index}: {source}")]
    Encode {
        /// Instruction index.
        index: usize,
        /// Codec failure.
        #[source]
        source: CodecError,
    },
    /// Program plus stack does not fit below the termination sentinel.
    #[error("image of {size} bytes at {base:#010x} does not fit the address space")]
    ImageTooLarge {
        /// Image base.
        base: u32,
        /// Requested image size.
        size: u64,
    },
    /// Bytes placed outside the image.
    #[error("{size} bytes at {address:#010x} fall outside the image")]
    OutOfImage {
        /// First byte.
        address: u32,
        /// Byte count.
        size: usize,
    },
    /// Instructions were laid out with a stride other than one word.
    #[error("instruction stride of {size} bytes is not one word")]
    InstructionSize {
        /// Stride recorded in the layout.
        size: u32,
    },
    /// No function with this name.
    #[error("unknown function `{name}`")]
    UnknownFunction {
        /// Requested name.
        name: String,
    },
}

/// Runs a linked program.
#[derive(Debug)]
pub struct Interpreter {
    program: Arc<Program>,
    decoder: Decoder,
    config: InterpreterConfig,
    registers: RegisterFile,
    memory: Memory,
    image: Memory,
    entry: u32,
    stack_top: u32,
    run_state: RunState,
    stop_signal: StopSignal,
    total_steps: u64,
    total_cycles: u64,
}

impl Interpreter {
    /// Builds the memory image for `program` and positions `pc` at its first
    /// instruction.
    ///
    /// The image covers the linked code and data followed by
    /// `config.stack_size` bytes of stack; `sp` starts at the top and `lr`
    /// holds the termination sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when the program is not fully linked, was laid
    /// out with an instruction stride other than one word, an instruction
    /// fails to encode, or the image does not fit.
    pub fn new(
        program: Arc<Program>,
        codec: InstructionCodec,
        config: InterpreterConfig,
    ) -> Result<Self, LoadError> {
        let layout = program.layout.ok_or_else(|| LoadError::NotLinked {
            file: program.file_name.clone(),
        })?;
        if layout.instruction_size != WORD_BYTES {
            return Err(LoadError::InstructionSize {
                size: layout.instruction_size,
            });
        }
        let data_end = (u64::from(layout.total_size) + 3) & !3;
        let size = data_end + u64::from(config.stack_size & !3);
        let end = u64::from(layout.base) + size;
        if end > u64::from(TERMINATION_SENTINEL) {
            return Err(LoadError::ImageTooLarge {
                base: layout.base,
                size,
            });
        }
        let len = usize::try_from(size).map_err(|_| LoadError::ImageTooLarge {
            base: layout.base,
            size,
        })?;
        let mut memory = Memory::new(layout.base, len);

        for (index, instruction) in program.instructions.iter().enumerate() {
            let (Some(address), Some(raw)) = (instruction.address, instruction.raw.as_ref()) else {
                return Err(LoadError::Unresolved { index });
            };
            let word = codec
                .encode(raw)
                .map_err(|source| LoadError::Encode { index, source })?;
            memory
                .write_u32(address, word)
                .map_err(|_| LoadError::OutOfImage { address, size: 4 })?;
        }
        for global in &program.globals {
            if let (Some(address), Some(bytes)) = (global.address, global.initial.as_deref()) {
                memory
                    .write(address, bytes)
                    .map_err(|_| LoadError::OutOfImage {
                        address,
                        size: bytes.len(),
                    })?;
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let stack_top = end as u32;
        debug!(
            file = %program.file_name,
            base = layout.base,
            image_size = size,
            stack_top,
            "memory image loaded"
        );

        let mut interpreter = Self {
            program,
            decoder: Decoder::new(codec),
            config,
            registers: RegisterFile::default(),
            image: memory.clone(),
            memory,
            entry: layout.code_start,
            stack_top,
            run_state: RunState::Ready,
            stop_signal: StopSignal::new(),
            total_steps: 0,
            total_cycles: 0,
        };
        interpreter.enter_at(layout.code_start);
        Ok(interpreter)
    }

    /// Prepares a call to the named function: `pc` at its entry, `lr` at the
    /// termination sentinel, `sp` at the stack top.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::UnknownFunction`] when the name is not defined or
    /// has no address.
    pub fn enter(&mut self, function: &str) -> Result<(), LoadError> {
        let address =
            self.program
                .function_address(function)
                .ok_or_else(|| LoadError::UnknownFunction {
                    name: function.to_owned(),
                })?;
        self.enter_at(address);
        Ok(())
    }

    /// Like [`Self::enter`] with an explicit entry address.
    pub fn enter_at(&mut self, address: u32) {
        self.registers.set_pc(address);
        self.registers.set(Register::Lr, TERMINATION_SENTINEL);
        self.registers.set(Register::Sp, self.stack_top);
        self.entry = address;
        self.run_state = RunState::Ready;
    }

    /// Restores the loaded image and clears registers, counters and any
    /// latched state.
    pub fn reset(&mut self) {
        self.memory.clone_from(&self.image);
        self.registers = RegisterFile::default();
        self.total_steps = 0;
        self.total_cycles = 0;
        let entry = self
            .program
            .layout
            .map_or(self.entry, |layout| layout.code_start);
        self.enter_at(entry);
    }

    /// The program being run.
    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Shared handle to the program.
    #[must_use]
    pub fn program_handle(&self) -> Arc<Program> {
        Arc::clone(&self.program)
    }

    /// Decoder in use.
    #[must_use]
    pub const fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Register file.
    #[must_use]
    pub const fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    /// Memory image.
    #[must_use]
    pub const fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Current run state.
    #[must_use]
    pub const fn run_state(&self) -> RunState {
        self.run_state
    }

    /// Address the current run was entered at.
    #[must_use]
    pub const fn entry(&self) -> u32 {
        self.entry
    }

    /// Highest stack address; `sp` starts here.
    #[must_use]
    pub const fn stack_top(&self) -> u32 {
        self.stack_top
    }

    /// Instructions retired since load or reset.
    #[must_use]
    pub const fn total_steps(&self) -> u64 {
        self.total_steps
    }

    /// Cycles consumed since load or reset.
    #[must_use]
    pub const fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Handle that other threads may raise to stop the current run.
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop_signal.clone()
    }

    /// Reads one register.
    #[must_use]
    pub const fn read_register(&self, register: Register) -> u32 {
        self.registers.get(register)
    }

    /// Writes one register.
    pub const fn write_register(&mut self, register: Register, value: u32) {
        self.registers.set(register, value);
    }

    /// Copies `len` bytes out of memory.
    ///
    /// # Errors
    ///
    /// Returns [`FaultKind::InvalidMemoryAccess`] when the range is unmapped.
    pub fn read_memory(&self, address: u32, len: u32) -> Result<Vec<u8>, FaultKind> {
        self.memory.read(address, len).map(<[u8]>::to_vec)
    }

    /// Writes bytes into memory.
    ///
    /// # Errors
    ///
    /// Returns [`FaultKind::InvalidMemoryAccess`] when the range is unmapped.
    pub fn write_memory(&mut self, address: u32, bytes: &[u8]) -> Result<(), FaultKind> {
        self.memory.write(address, bytes)
    }

    /// Executes exactly `count` instructions unless something stops first.
    pub fn step(&mut self, count: u64) -> ExecutionResult {
        self.run_with(StepBudget::steps(count), &mut NoHooks)
    }

    /// Runs until a terminal stop or until `max_steps` instructions retire;
    /// zero means no limit.
    pub fn run(&mut self, max_steps: u64) -> ExecutionResult {
        self.run_with(StepBudget::run(max_steps), &mut NoHooks)
    }

    /// Drives execution under `budget`, consulting `hooks` around each step.
    pub fn run_with(
        &mut self,
        budget: StepBudget,
        hooks: &mut dyn ExecutionHooks,
    ) -> ExecutionResult {
        let start_pc = self.registers.pc();
        match self.run_state {
            RunState::FaultLatched(fault) => {
                let mut result = ExecutionResult::stopped(StopReason::Error, start_pc);
                result.error = Some(fault);
                return result;
            }
            RunState::Halted => return ExecutionResult::stopped(StopReason::Halted, start_pc),
            RunState::Terminated => {
                let mut result = ExecutionResult::stopped(StopReason::Termination, start_pc);
                result.return_value = Some(self.registers.get(RETURN_VALUE_REGISTER));
                return result;
            }
            RunState::Ready => {}
        }

        let mut result = ExecutionResult::stopped(budget.exhausted, start_pc);
        let mut pacer = self
            .config
            .throttle
            .filter(|throttle| throttle.cycles_per_second > 0)
            .map(Pacer::new);

        let reason = loop {
            if budget.limit.is_some_and(|limit| result.steps >= limit) {
                break budget.exhausted;
            }
            if self.stop_signal.take() {
                break StopReason::Interrupted;
            }
            let pc = self.registers.pc();
            if pc == TERMINATION_SENTINEL {
                break self.terminate(&mut result);
            }
            if let Some(stop) = hooks.before_step(pc) {
                break record_hook_stop(stop, &mut result);
            }

            let report = match self.step_one() {
                Ok(report) => report,
                Err(fault) => {
                    result.error = Some(fault);
                    result.last_pc = fault.pc;
                    break StopReason::Error;
                }
            };
            result.steps += 1;
            result.cycles += u64::from(report.cycles);
            result.last_pc = report.pc;

            if self.run_state == RunState::Halted {
                break StopReason::Halted;
            }
            if report.next_pc == TERMINATION_SENTINEL {
                break self.terminate(&mut result);
            }
            if let Some(stop) = hooks.after_step(&report) {
                break record_hook_stop(stop, &mut result);
            }
            if let Some(lag) = pacer
                .as_mut()
                .and_then(|pacer| pacer.pace(result.cycles, &self.stop_signal))
            {
                result.lag_cycles = result.lag_cycles.max(lag.cycles);
                if lag.first {
                    warn!(lag_cycles = lag.cycles, "execution is lagging behind the target rate");
                    if hooks.on_lag(lag.cycles).is_break() {
                        break StopReason::Requested;
                    }
                }
            }
        };

        result.stop_reason = reason;
        debug!(
            reason = ?reason,
            steps = result.steps,
            cycles = result.cycles,
            pc = self.registers.pc(),
            "execution stopped"
        );
        result
    }

    fn terminate(&mut self, result: &mut ExecutionResult) -> StopReason {
        self.run_state = RunState::Terminated;
        result.return_value = Some(self.registers.get(RETURN_VALUE_REGISTER));
        StopReason::Termination
    }

    /// Retires the instruction at `pc`, latching any fault.
    fn step_one(&mut self) -> Result<StepReport, ExecutionFault> {
        let pc = self.registers.pc();
        match self.retire(pc) {
            Ok((opcode, exec)) => {
                if exec.halt {
                    self.run_state = RunState::Halted;
                }
                self.total_steps += 1;
                self.total_cycles += u64::from(exec.cycles);
                trace!(pc, opcode = opcode.mnemonic(), next_pc = exec.next_pc, "retired");
                Ok(StepReport {
                    pc,
                    next_pc: exec.next_pc,
                    opcode,
                    cycles: exec.cycles,
                    access: exec.access,
                    transfer: exec.transfer,
                })
            }
            Err(kind) => {
                let fault = ExecutionFault::new(kind, pc);
                self.run_state = RunState::FaultLatched(fault);
                debug!(%fault, "fault latched");
                Err(fault)
            }
        }
    }

    fn retire(&mut self, pc: u32) -> Result<(Opcode, ExecuteState), FaultKind> {
        if pc % WORD_BYTES != 0 {
            return Err(FaultKind::MisalignedFetch { address: pc });
        }
        let word = self.memory.read_u32(pc)?;
        let (instruction, operation) = self.decoder.decode(word)?;
        let exec =
            execute_instruction(instruction.opcode, operation, &self.registers, &self.memory)?;
        commit_execution(&mut self.registers, &mut self.memory, &exec)?;
        Ok((instruction.opcode, exec))
    }
}

fn record_hook_stop(stop: HookStop, result: &mut ExecutionResult) -> StopReason {
    match stop {
        HookStop::Breakpoint(id) => result.breakpoint_id = Some(id),
        HookStop::Watchpoint(id) => result.watchpoint_id = Some(id),
        HookStop::StepComplete | HookStop::Requested => {}
    }
    stop.reason()
}

struct Lag {
    cycles: u64,
    first: bool,
}

/// Keeps execution at or below the configured cycle rate.
struct Pacer {
    config: ThrottleConfig,
    started: Instant,
    reported: bool,
}

impl Pacer {
    fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            started: Instant::now(),
            reported: false,
        }
    }

    /// Sleeps until `cycles` are due, or reports how far behind execution is.
    fn pace(&mut self, cycles: u64, signal: &StopSignal) -> Option<Lag> {
        let rate = u128::from(self.config.cycles_per_second);
        let due_nanos = u128::from(cycles) * 1_000_000_000 / rate;
        let due = Duration::from_nanos(u64::try_from(due_nanos).unwrap_or(u64::MAX));
        let elapsed = self.started.elapsed();

        if let Some(ahead) = due.checked_sub(elapsed) {
            let deadline = Instant::now() + ahead;
            while !signal.is_raised() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                thread::sleep(remaining.min(MAX_SLEEP_SLICE));
            }
            return None;
        }

        let behind = elapsed - due;
        if behind <= self.config.lag_threshold {
            return None;
        }
        let lag_cycles = behind.as_nanos() * rate / 1_000_000_000;
        let first = !self.reported;
        self.reported = true;
        Some(Lag {
            cycles: u64::try_from(lag_cycles).unwrap_or(u64::MAX),
            first,
        })
    }
}
