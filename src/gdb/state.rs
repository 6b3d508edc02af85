//! Execution state machine
//!
//! Holds the coarse inferior state plus its status line, and decides what a
//! `*stopped` record means for both.

use crate::gdb::parser::{find_string, find_value, parse_key_values, Item};
use crate::gdb::types::{ExecState, StepFrame, StopReason};

/// Current state and the human-readable status that goes with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionState {
    pub state: ExecState,
    pub status: String,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self {
            state: ExecState::Stopped,
            status: "No inferior loaded".to_string(),
        }
    }
}

impl ExecutionState {
    /// Apply a transition. Returns true when the inferior just became `Exited`.
    pub fn transition(&mut self, state: ExecState, status: impl Into<String>) -> bool {
        self.state = state;
        self.status = status.into();
        state == ExecState::Exited
    }
}

/// Follow-up work requested by a stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopAction {
    /// Nothing more to ask for
    None,
    /// Re-read `$pc` and disassemble around it
    Requery,
    /// Requery, then hand the record to the `breakpoint-hit` class handler
    BreakpointHit,
    /// Cache the step frame and disassemble at its address (or `$pc` if incomplete)
    Step(StepFrame),
}

/// Outcome of interpreting one `*stopped` record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopOutcome {
    pub reason: Option<StopReason>,
    pub state: ExecState,
    pub status: String,
    pub action: StopAction,
}

impl StopOutcome {
    /// Registers and backtrace only make sense while the inferior is alive
    pub fn wants_context(&self) -> bool {
        self.state != ExecState::Exited
    }
}

fn stopped(status: impl Into<String>, action: StopAction) -> (ExecState, String, StopAction) {
    (ExecState::Stopped, status.into(), action)
}

fn exited(status: impl Into<String>) -> (ExecState, String, StopAction) {
    (ExecState::Exited, status.into(), StopAction::None)
}

/// Decide state, status and follow-up for the payload of a `*stopped` record.
///
/// A stop without a `reason` field (e.g. after `-exec-interrupt` on some
/// targets) is treated like any other non-exit stop.
pub fn interpret_stop(data: &str) -> StopOutcome {
    let mut cursor = data;
    let pairs = parse_key_values(&mut cursor);
    let reason = find_value(&pairs, "reason").map(|v| StopReason::from(v.value().as_str()));

    let (state, status, action) = match &reason {
        None => stopped("Inferior has stopped", StopAction::Requery),
        Some(StopReason::BreakpointHit) => {
            stopped("Inferior stopped: breakpoint hit", StopAction::BreakpointHit)
        }
        Some(StopReason::ExitedNormally) => exited("Inferior exited: Exited normally"),
        Some(StopReason::Exited) => exited(format!(
            "Inferior exited: Exit code {}",
            find_string(&pairs, "exit-code")
        )),
        Some(StopReason::ExitedSignalled) => exited(format!(
            "Inferior exited: Received '{}' signal",
            find_string(&pairs, "signal-name")
        )),
        Some(StopReason::SignalReceived) => stopped(
            format!(
                "Inferior stopped: Received '{}' signal",
                find_string(&pairs, "signal-name")
            ),
            StopAction::Requery,
        ),
        Some(StopReason::EndSteppingRange) => stopped(
            "Inferior stopped: Finished stepping",
            StopAction::Step(step_frame(&pairs)),
        ),
        Some(StopReason::OtherExit(_)) => exited("Inferior exited: Reason unknown"),
        Some(StopReason::Other(_)) => stopped("Inferior has stopped", StopAction::Requery),
    };

    StopOutcome {
        reason,
        state,
        status,
        action,
    }
}

/// Frame carried by an end-of-step stop. Valid only when address, function,
/// args and thread id are all present.
pub fn step_frame(pairs: &[(&str, Item<'_>)]) -> StepFrame {
    let mut frame = StepFrame::default();

    if let Some(tuple) = find_value(pairs, "frame").filter(Item::is_tuple) {
        let fields = tuple.pairs();
        frame.address = find_string(&fields, "addr");
        frame.func = find_string(&fields, "func");
        frame.args = find_value(&fields, "args")
            .map(|v| v.raw())
            .unwrap_or_default();
    }
    frame.thread_id = find_string(pairs, "thread-id");

    frame.is_valid = !frame.address.is_empty()
        && !frame.func.is_empty()
        && !frame.args.is_empty()
        && !frame.thread_id.is_empty();
    frame
}
