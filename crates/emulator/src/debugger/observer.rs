//! Session event callbacks.

use std::ops::ControlFlow;

use armlet_linker::SourceLocation;

use super::breakpoints::{Breakpoint, Watchpoint};
use crate::api::MemoryAccess;
use crate::fault::ExecutionFault;

/// Receives debugger events synchronously, in the order they occur.
///
/// Every method has an empty default. The two that run while execution is
/// still in progress may return `Break` to stop the driving call with
/// [`StopReason::Requested`](crate::api::StopReason::Requested).
pub trait DebugObserver {
    /// A breakpoint stopped execution before `pc`.
    fn breakpoint_hit(&mut self, _breakpoint: &Breakpoint, _pc: u32) {}

    /// A watchpoint stopped execution after `access` retired.
    fn watchpoint_hit(&mut self, _watchpoint: &Watchpoint, _access: &MemoryAccess) {}

    /// Control reached the termination sentinel.
    fn terminated(&mut self, _return_value: u32) {}

    /// `HALT` retired at `pc`.
    fn halted(&mut self, _pc: u32) {}

    /// A fault was latched.
    fn error(&mut self, _fault: &ExecutionFault) {}

    /// The stop signal interrupted execution before `pc`.
    fn interrupted(&mut self, _pc: u32) {}

    /// Throttled execution fell behind by `lag_cycles`.
    fn lagging(&mut self, _lag_cycles: u64) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    /// Execution reached a new mapped source line.
    fn source_location_changed(&mut self, _location: &SourceLocation) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObserver;

impl DebugObserver for NoObserver {}
