//! Host-facing contracts shared by the interpreter and the debugger.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use armlet_isa::Opcode;

use crate::fault::ExecutionFault;

/// Default stack size placed after the program's data.
pub const DEFAULT_STACK_SIZE: u32 = 64 * 1024;

/// Default cap on instructions executed by one source-line step.
pub const DEFAULT_MAX_INSTRUCTIONS_PER_LINE: u64 = 10_000;

/// Target execution rate and lag tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ThrottleConfig {
    /// Target rate; zero disables throttling.
    pub cycles_per_second: u64,
    /// How far behind wall-clock execution may fall before a lag report.
    pub lag_threshold: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            cycles_per_second: 1_000_000,
            lag_threshold: Duration::from_millis(100),
        }
    }
}

/// Interpreter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct InterpreterConfig {
    /// Bytes of stack mapped after the data segment.
    pub stack_size: u32,
    /// Optional rate limit; `None` runs unthrottled.
    pub throttle: Option<ThrottleConfig>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            throttle: None,
        }
    }
}

/// Debugger settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DebuggerConfig {
    /// Instruction cap for one source-line step.
    pub max_instructions_per_line: u64,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            max_instructions_per_line: DEFAULT_MAX_INSTRUCTIONS_PER_LINE,
        }
    }
}

/// Breakpoint handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BreakpointId(pub u32);

/// Watchpoint handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct WatchpointId(pub u32);

/// Why a driving call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum StopReason {
    /// The requested number of steps (or source lines) completed.
    StepComplete,
    /// The `run` step budget ran out.
    MaxSteps,
    /// A source-line step hit its instruction cap.
    StepLimit,
    /// An enabled breakpoint matched `pc`.
    Breakpoint,
    /// An enabled watchpoint matched a memory access.
    Watchpoint,
    /// Control reached the termination sentinel.
    Termination,
    /// `HALT` retired.
    Halted,
    /// An execution fault is latched.
    Error,
    /// The stop signal was raised.
    Interrupted,
    /// An observer asked to stop.
    Requested,
}

/// Outcome of one driving call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ExecutionResult {
    /// Why execution stopped.
    pub stop_reason: StopReason,
    /// Instructions retired during this call.
    pub steps: u64,
    /// Cycles consumed during this call.
    pub cycles: u64,
    /// Latched fault for [`StopReason::Error`].
    pub error: Option<ExecutionFault>,
    /// Address of the last retired instruction, or `pc` when none retired.
    pub last_pc: u32,
    /// Matching breakpoint for [`StopReason::Breakpoint`].
    pub breakpoint_id: Option<BreakpointId>,
    /// Matching watchpoint for [`StopReason::Watchpoint`].
    pub watchpoint_id: Option<WatchpointId>,
    /// Largest lag observed while throttled, in cycles.
    pub lag_cycles: u64,
    /// Return register value for [`StopReason::Termination`].
    pub return_value: Option<u32>,
}

impl ExecutionResult {
    /// Result with no progress.
    #[must_use]
    pub const fn stopped(stop_reason: StopReason, last_pc: u32) -> Self {
        Self {
            stop_reason,
            steps: 0,
            cycles: 0,
            error: None,
            last_pc,
            breakpoint_id: None,
            watchpoint_id: None,
            lag_cycles: 0,
            return_value: None,
        }
    }
}

/// Direction of a data access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessKind {
    /// Load.
    Read,
    /// Store.
    Write,
}

/// One data access performed by a retired instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MemoryAccess {
    /// First byte touched.
    pub address: u32,
    /// Width in bytes.
    pub size: u32,
    /// Load or store.
    pub kind: AccessKind,
}

impl MemoryAccess {
    /// True when this access touches any byte of `[address, address + size)`.
    #[must_use]
    pub fn overlaps(&self, address: u32, size: u32) -> bool {
        let start = u64::from(self.address);
        let end = start + u64::from(self.size);
        let other_start = u64::from(address);
        let other_end = other_start + u64::from(size);
        start < other_end && other_start < end
    }
}

/// Control transfer performed by a retired instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ControlTransfer {
    /// `CALL`/`CALLIMM`.
    Call {
        /// Callee address.
        target: u32,
        /// Address written to `lr`.
        return_address: u32,
    },
    /// Any other redirect of `pc`.
    Jump {
        /// New `pc`.
        target: u32,
    },
}

/// Record of one retired instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StepReport {
    /// Address of the retired instruction.
    pub pc: u32,
    /// `pc` after retirement.
    pub next_pc: u32,
    /// Retired opcode.
    pub opcode: Opcode,
    /// Cycles consumed.
    pub cycles: u16,
    /// Data access, if any.
    pub access: Option<MemoryAccess>,
    /// Redirect, if any.
    pub transfer: Option<ControlTransfer>,
}

/// Stop requested by an execution hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStop {
    /// Breakpoint at the next `pc`.
    Breakpoint(BreakpointId),
    /// Watchpoint matched the last access.
    Watchpoint(WatchpointId),
    /// The requested granularity completed.
    StepComplete,
    /// A caller asked to stop.
    Requested,
}

impl HookStop {
    /// Stop reason reported for this hook stop.
    #[must_use]
    pub const fn reason(self) -> StopReason {
        match self {
            Self::Breakpoint(_) => StopReason::Breakpoint,
            Self::Watchpoint(_) => StopReason::Watchpoint,
            Self::StepComplete => StopReason::StepComplete,
            Self::Requested => StopReason::Requested,
        }
    }
}

/// Per-step callbacks invoked synchronously by the run loop.
pub trait ExecutionHooks {
    /// Called before the instruction at `pc` executes.
    fn before_step(&mut self, _pc: u32) -> Option<HookStop> {
        None
    }

    /// Called after an instruction retires.
    fn after_step(&mut self, _report: &StepReport) -> Option<HookStop> {
        None
    }

    /// Called when throttled execution falls behind; `Break` stops the run.
    fn on_lag(&mut self, _lag_cycles: u64) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// Hooks that never stop execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl ExecutionHooks for NoHooks {}

/// Externally settable cancellation flag, polled once per step.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// New lowered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop at the next step boundary.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True while a stop is pending.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Consumes a pending stop.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// How many steps a driving call may take and what exhausting them means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepBudget {
    /// Step cap; `None` is unbounded.
    pub limit: Option<u64>,
    /// Reason reported when the cap is reached.
    pub exhausted: StopReason,
}

impl StepBudget {
    /// Exactly `count` instructions.
    #[must_use]
    pub const fn steps(count: u64) -> Self {
        Self {
            limit: Some(count),
            exhausted: StopReason::StepComplete,
        }
    }

    /// Run budget; zero is unbounded.
    #[must_use]
    pub const fn run(max_steps: u64) -> Self {
        Self {
            limit: if max_steps == 0 { None } else { Some(max_steps) },
            exhausted: StopReason::MaxSteps,
        }
    }

    /// Inner cap of one source-line step.
    #[must_use]
    pub const fn line(cap: u64) -> Self {
        Self {
            limit: Some(cap),
            exhausted: StopReason::StepLimit,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{
        AccessKind, DebuggerConfig, InterpreterConfig, MemoryAccess, StepBudget, StopReason,
        StopSignal, DEFAULT_STACK_SIZE,
    };

    #[test]
    fn default_configs_match_documented_values() {
        let interpreter = InterpreterConfig::default();
        assert_eq!(interpreter.stack_size, DEFAULT_STACK_SIZE);
        assert_eq!(interpreter.stack_size, 65_536);
        assert!(interpreter.throttle.is_none());
        assert_eq!(DebuggerConfig::default().max_instructions_per_line, 10_000);
    }

    #[test]
    fn stop_signal_is_shared_and_consumed_once() {
        let signal = StopSignal::new();
        let remote = signal.clone();
        remote.raise();
        assert!(signal.is_raised());
        assert!(signal.take());
        assert!(!signal.take());
        assert!(!remote.is_raised());
    }

    #[test]
    fn zero_run_budget_is_unbounded() {
        assert_eq!(StepBudget::run(0).limit, None);
        assert_eq!(StepBudget::run(5).limit, Some(5));
        assert_eq!(StepBudget::steps(0).limit, Some(0));
        assert_eq!(StepBudget::line(3).exhausted, StopReason::StepLimit);
    }

    #[rstest]
    #[case(0x100, 4, true)]
    #[case(0x103, 1, true)]
    #[case(0x0FD, 4, true)]
    #[case(0x104, 4, false)]
    #[case(0x0FC, 4, false)]
    fn access_overlap(#[case] address: u32, #[case] size: u32, #[case] expected: bool) {
        let access = MemoryAccess {
            address: 0x100,
            size: 4,
            kind: AccessKind::Write,
        };
        assert_eq!(access.overlaps(address, size), expected);
    }
}
