use crate::fault::ExecutionFault;

/// Execution-state machine for host-observable control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RunState {
    /// Ready to execute the next instruction.
    #[default]
    Ready,
    /// `HALT` retired; no further progress until reset or re-entry.
    Halted,
    /// Control reached the termination sentinel.
    Terminated,
    /// Fault is latched and no further progress is possible without reset.
    FaultLatched(ExecutionFault),
}

impl RunState {
    /// Returns the currently latched fault, if this state is fault-latched.
    #[must_use]
    pub const fn latched_fault(self) -> Option<ExecutionFault> {
        match self {
            Self::FaultLatched(fault) => Some(fault),
            Self::Ready | Self::Halted | Self::Terminated => None,
        }
    }

    /// True when no instruction can execute.
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        !matches!(self, Self::Ready)
    }
}
