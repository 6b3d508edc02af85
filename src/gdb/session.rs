//! Shared debugger-control core
//!
//! [`Session`] owns every snapshot cache, the execution state, the callback
//! registry and the token pool. Handlers and commands live in
//! [`crate::gdb::handlers`] and [`crate::gdb::commands`]; both operate on a
//! `&Session` handed to them, so nothing reaches the core through globals.

use crate::gdb::error::Result;
use crate::gdb::registry::{Builtin, CallbackRegistry, Handler};
use crate::gdb::state::ExecutionState;
use crate::gdb::token::TokenPool;
use crate::gdb::transport::LineSink;
use crate::gdb::types::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};

const OUTPUT_CAPACITY: usize = 1024;

/// Change-notification callback
pub type Notifier = Arc<dyn Fn(UpdateKind) + Send + Sync>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Phase {
    #[default]
    Idle,
    AwaitingFirst(Token),
    AwaitingSecond(Token),
}

/// Progress of a query answered by two commands in sequence.
///
/// The second command is only sent once the first reply is in, so the two
/// halves can never be zipped against the wrong data. A request arriving
/// while one is in flight is folded into a single rerun.
#[derive(Debug, Default)]
pub struct QuerySession {
    phase: Phase,
    rerun: bool,
}

impl QuerySession {
    /// True when the caller should send the first command now
    pub fn begin(&mut self) -> bool {
        if self.phase == Phase::Idle {
            true
        } else {
            self.rerun = true;
            false
        }
    }

    pub fn first_sent(&mut self, token: Token) {
        self.phase = Phase::AwaitingFirst(token);
    }

    /// Accept the first reply. False if `token` is not the one awaited.
    pub fn first_done(&mut self, token: Option<Token>) -> bool {
        matches!(self.phase, Phase::AwaitingFirst(t) if Some(t) == token)
    }

    pub fn second_sent(&mut self, token: Token) {
        self.phase = Phase::AwaitingSecond(token);
    }

    /// Accept the second reply and go idle. Returns `Some(rerun)` on a match.
    pub fn second_done(&mut self, token: Option<Token>) -> Option<bool> {
        match self.phase {
            Phase::AwaitingSecond(t) if Some(t) == token => Some(self.finish()),
            _ => None,
        }
    }

    /// Abandon the query if `token` belongs to it. Returns `Some(rerun)` on a match.
    pub fn abort(&mut self, token: Token) -> Option<bool> {
        match self.phase {
            Phase::AwaitingFirst(t) | Phase::AwaitingSecond(t) if t == token => {
                Some(self.finish())
            }
            _ => None,
        }
    }

    /// Go idle unconditionally
    pub fn reset(&mut self) {
        self.finish();
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    fn finish(&mut self) -> bool {
        self.phase = Phase::Idle;
        std::mem::take(&mut self.rerun)
    }
}

/// Bounded stream-text buffer. `total` counts every line ever pushed, so
/// readers can resume from where they left off even after eviction.
#[derive(Debug, Default)]
pub(crate) struct OutputBuffer {
    lines: VecDeque<OutputLine>,
    total: u64,
}

impl OutputBuffer {
    fn push(&mut self, line: OutputLine) {
        if self.lines.len() >= OUTPUT_CAPACITY {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
        self.total += 1;
    }

    fn since(&self, seen: u64) -> (u64, Vec<OutputLine>) {
        let first = self.total - self.lines.len() as u64;
        let skip = seen.saturating_sub(first).min(self.lines.len() as u64) as usize;
        (self.total, self.lines.iter().skip(skip).cloned().collect())
    }
}

#[derive(Default)]
pub(crate) struct Caches {
    pub func_symbols: Mutex<Vec<SymbolObject>>,
    pub global_symbols: Mutex<Vec<SymbolObject>>,
    pub disassembly: Mutex<Vec<DisassemblyInstruction>>,
    pub register_names: Mutex<Vec<String>>,
    pub registers: Mutex<Vec<RegisterInfo>>,
    pub backtrace: Mutex<Vec<FrameInfo>>,
    pub breakpoints: Mutex<Vec<BreakpointInfo>>,
    pub current: Mutex<CurrentInstruction>,
    pub step_frame: Mutex<StepFrame>,
    pub output: Mutex<OutputBuffer>,
}

/// Debugger-control core shared by the dispatcher, handlers and callers
pub struct Session {
    pub(crate) registry: CallbackRegistry,
    pub(crate) tokens: TokenPool,
    pub(crate) caches: Caches,
    pub(crate) register_query: Mutex<QuerySession>,
    pub(crate) backtrace_query: Mutex<QuerySession>,
    sink: Arc<dyn LineSink>,
    state: Mutex<ExecutionState>,
    last_error: Mutex<Option<String>>,
    notifier: RwLock<Option<Notifier>>,
    pending_timeout: Option<Duration>,
    disassembly_flavor: String,
}

impl Session {
    pub fn new(sink: Arc<dyn LineSink>, config: &GdbConfig) -> Arc<Self> {
        let session = Arc::new(Self {
            registry: CallbackRegistry::new(),
            tokens: TokenPool::new(),
            caches: Caches::default(),
            register_query: Mutex::new(QuerySession::default()),
            backtrace_query: Mutex::new(QuerySession::default()),
            sink,
            state: Mutex::new(ExecutionState::default()),
            last_error: Mutex::new(None),
            notifier: RwLock::new(None),
            pending_timeout: config.pending_timeout,
            disassembly_flavor: config.disassembly_flavor.clone(),
        });
        session.register_default_handlers();
        session
    }

    fn register_default_handlers(&self) {
        let defaults = [
            ("running", Builtin::Running),
            ("stopped", Builtin::Stopped),
            ("end-stepping-range", Builtin::Stopped),
            ("library-loaded", Builtin::LibraryLoaded),
            ("library-unloaded", Builtin::LibraryUnloaded),
            ("breakpoint-created", Builtin::BreakpointsChanged),
            ("breakpoint-modified", Builtin::BreakpointsChanged),
            ("breakpoint-deleted", Builtin::BreakpointsChanged),
            ("breakpoint-hit", Builtin::BreakpointsChanged),
            ("thread-created", Builtin::ThreadCreated),
            ("thread-selected", Builtin::ThreadSelected),
            ("thread-exited", Builtin::ThreadExited),
        ];
        for (class, builtin) in defaults {
            self.registry.register_class(class, builtin.into());
        }
    }

    pub fn disassembly_flavor(&self) -> &str {
        &self.disassembly_flavor
    }

    pub fn pending_timeout(&self) -> Option<Duration> {
        self.pending_timeout
    }

    /// Install the change-notification callback, replacing any previous one
    pub fn set_notifier<F>(&self, notifier: F)
    where
        F: Fn(UpdateKind) + Send + Sync + 'static,
    {
        let mut slot = self.notifier.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(notifier));
    }

    pub fn clear_notifier(&self) {
        let mut slot = self.notifier.write().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }

    pub(crate) fn notify(&self, kind: UpdateKind) {
        let notifier = self
            .notifier
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(notifier) = notifier {
            notifier(kind);
        }
    }

    /// Install a persistent handler for a record class (e.g. `breakpoint-hit`)
    pub fn on_class<F>(&self, class: &str, handler: F)
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        self.registry.register_class(class, Handler::custom(handler));
    }

    /// Write `<token><command>` and register `handler` for the reply first
    pub(crate) fn issue(&self, token: Token, command: &str, handler: Option<Handler>) -> Result<()> {
        if let Some(handler) = handler {
            self.registry.register_token(token, command, handler);
        }

        let line = format!("{}{}", token, command);
        debug!("Sending command: {}", line);

        self.sink.write_line(&line).inspect_err(|_| {
            self.registry.cancel(token);
        })
    }

    /// Send a command with a fresh token. Returns the token used.
    pub fn send_command(&self, command: &str, handler: Option<Handler>) -> Result<Token> {
        let token = self.tokens.next_token();
        self.issue(token, command, handler)?;
        Ok(token)
    }

    pub(crate) fn set_state(&self, state: ExecState, status: impl Into<String>) {
        let status = status.into();
        let exited = lock(&self.state).transition(state, status.clone());
        info!("{}", status);

        if exited {
            lock(&self.caches.disassembly).clear();
            self.notify(UpdateKind::DISASSEMBLY);
        }
        self.notify(UpdateKind::STATE);
    }

    pub(crate) fn set_status(&self, status: impl Into<String>) {
        lock(&self.state).status = status.into();
        self.notify(UpdateKind::STATE);
    }

    pub(crate) fn record_error(&self, message: String) {
        self.set_status(format!("Error: {}", message));
        *lock(&self.last_error) = Some(message);
    }

    pub(crate) fn push_output(&self, line: OutputLine) {
        lock(&self.caches.output).push(line);
        self.notify(UpdateKind::OUTPUT);
    }

    pub fn state(&self) -> ExecState {
        lock(&self.state).state
    }

    pub fn status(&self) -> String {
        lock(&self.state).status.clone()
    }

    /// Message of the most recent `^error` reply
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    pub fn func_symbols(&self) -> Vec<SymbolObject> {
        lock(&self.caches.func_symbols).clone()
    }

    pub fn global_symbols(&self) -> Vec<SymbolObject> {
        lock(&self.caches.global_symbols).clone()
    }

    pub fn disassembly(&self) -> Vec<DisassemblyInstruction> {
        lock(&self.caches.disassembly).clone()
    }

    pub fn register_names(&self) -> Vec<String> {
        lock(&self.caches.register_names).clone()
    }

    pub fn registers(&self) -> Vec<RegisterInfo> {
        lock(&self.caches.registers).clone()
    }

    pub fn backtrace(&self) -> Vec<FrameInfo> {
        lock(&self.caches.backtrace).clone()
    }

    pub fn breakpoints(&self) -> Vec<BreakpointInfo> {
        lock(&self.caches.breakpoints).clone()
    }

    pub fn current_instruction(&self) -> CurrentInstruction {
        lock(&self.caches.current).clone()
    }

    pub fn step_frame(&self) -> StepFrame {
        lock(&self.caches.step_frame).clone()
    }

    /// Buffered console, target and log stream text, oldest first
    pub fn output(&self) -> Vec<OutputLine> {
        lock(&self.caches.output).lines.iter().cloned().collect()
    }

    /// Lines pushed after the first `seen`, plus the new count to resume from.
    /// Lines already evicted from the buffer are skipped.
    pub fn output_since(&self, seen: u64) -> (u64, Vec<OutputLine>) {
        lock(&self.caches.output).since(seen)
    }

    pub fn pending_commands(&self) -> usize {
        self.registry.pending_count()
    }
}
