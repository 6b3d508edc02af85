//! GDB Machine Interface (MI) Type Definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

/// Correlation token prefixed to every outgoing command
pub type Token = u32;

/// GDB/MI record types, selected by the sigil that starts a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    Result,
    ExecAsync,
    StatusAsync,
    NotifyAsync,
    ConsoleStream,
    TargetStream,
    LogStream,
    Invalid,
}

impl RecordType {
    pub fn from_sigil(c: char) -> Self {
        match c {
            '^' => RecordType::Result,
            '*' => RecordType::ExecAsync,
            '+' => RecordType::StatusAsync,
            '=' => RecordType::NotifyAsync,
            '~' => RecordType::ConsoleStream,
            '@' => RecordType::TargetStream,
            '&' => RecordType::LogStream,
            _ => RecordType::Invalid,
        }
    }

    pub fn is_stream(self) -> bool {
        matches!(
            self,
            RecordType::ConsoleStream | RecordType::TargetStream | RecordType::LogStream
        )
    }
}

/// One classified line of debugger output.
///
/// `data` is left as raw wire-grammar text; handlers walk it with the
/// consuming parser in [`crate::gdb::parser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordType,
    pub token: Option<Token>,
    pub class: String,
    pub data: String,
}

impl Record {
    pub fn is_error(&self) -> bool {
        self.kind == RecordType::Result && self.class == "error"
    }
}

/// Coarse execution state of the inferior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecState {
    Running,
    Stopped,
    Exited,
}

/// Stop reason carried by `*stopped` records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    BreakpointHit,
    EndSteppingRange,
    /// `exited` with an `exit-code` field
    Exited,
    ExitedNormally,
    ExitedSignalled,
    SignalReceived,
    /// Any other `exited-*` reason
    OtherExit(String),
    /// Any other non-exit reason (watchpoints, function-finished, ...)
    Other(String),
}

impl From<&str> for StopReason {
    fn from(s: &str) -> Self {
        match s {
            "breakpoint-hit" => StopReason::BreakpointHit,
            "end-stepping-range" => StopReason::EndSteppingRange,
            "exited" => StopReason::Exited,
            "exited-normally" => StopReason::ExitedNormally,
            "exited-signalled" => StopReason::ExitedSignalled,
            "signal-received" => StopReason::SignalReceived,
            other if other.contains("exited-") => StopReason::OtherExit(other.to_string()),
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// Bitmask of snapshot categories passed to the change-notification callback
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateKind(u32);

impl UpdateKind {
    pub const FUNC_SYMBOLS: UpdateKind = UpdateKind(1 << 0);
    pub const GLOBAL_SYMBOLS: UpdateKind = UpdateKind(1 << 1);
    pub const DISASSEMBLY: UpdateKind = UpdateKind(1 << 2);
    pub const REGISTERS: UpdateKind = UpdateKind(1 << 3);
    pub const BACKTRACE: UpdateKind = UpdateKind(1 << 4);
    pub const BREAKPOINTS: UpdateKind = UpdateKind(1 << 5);
    pub const OUTPUT: UpdateKind = UpdateKind(1 << 6);
    /// Execution state or status line
    pub const STATE: UpdateKind = UpdateKind(1 << 7);

    pub const fn empty() -> Self {
        UpdateKind(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: UpdateKind) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for UpdateKind {
    type Output = UpdateKind;

    fn bitor(self, rhs: UpdateKind) -> UpdateKind {
        UpdateKind(self.0 | rhs.0)
    }
}

impl BitOrAssign for UpdateKind {
    fn bitor_assign(&mut self, rhs: UpdateKind) {
        self.0 |= rhs.0;
    }
}

/// Function or global-variable symbol from `-symbol-info-*`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolObject {
    pub name: String,
    #[serde(rename = "type")]
    pub symbol_type: String,
    pub description: String,
    /// Short file name as reported by `filename`
    pub file: String,
    pub full_path: String,
    pub line: String,
    pub is_active: bool,
}

/// One line of `-data-disassemble` output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisassemblyInstruction {
    pub address: u64,
    pub addr_str: String,
    pub func_name: String,
    pub offset: String,
    pub instruction: String,
}

/// Register name/value pair zipped from the two-phase register query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterInfo {
    pub name: String,
    pub value: String,
    /// Size in bytes, inferred from the hex digit count of the value
    pub size: u32,
    /// Value differs from the previous snapshot
    pub changed: bool,
}

/// Local or argument attached to a stack frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: String,
    pub value: String,
    pub is_arg: bool,
}

/// Frame information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub level: u32,
    pub addr: String,
    pub func: String,
    pub file: String,
    pub fullname: String,
    pub line: u32,
    pub arch: String,
    pub vars: Vec<FrameVariable>,
}

/// Breakpoint disposition (`disp` field)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    #[default]
    Keep,
    /// Temporary breakpoint, deleted when hit
    Del,
    /// Disabled when hit
    Dis,
    Unknown(String),
}

impl From<&str> for Disposition {
    fn from(s: &str) -> Self {
        match s {
            "keep" => Disposition::Keep,
            "del" => Disposition::Del,
            "dis" => Disposition::Dis,
            other => Disposition::Unknown(other.to_string()),
        }
    }
}

/// Breakpoint information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointInfo {
    pub number: u32,
    #[serde(rename = "type")]
    pub breakpoint_type: String,
    pub disposition: Disposition,
    pub enabled: bool,
    pub addr: String,
    pub func: String,
    pub file: String,
    pub fullname: String,
    pub line: u32,
    pub times: u32,
}

impl BreakpointInfo {
    pub fn is_temporary(&self) -> bool {
        self.disposition == Disposition::Del
    }
}

/// Frame embedded in an `end-stepping-range` stop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFrame {
    pub is_valid: bool,
    pub address: String,
    pub func: String,
    /// Raw `args` text, e.g. `[]`
    pub args: String,
    pub thread_id: String,
}

/// Current instruction pointer and the symbol it resolves to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentInstruction {
    pub address: u64,
    pub function: String,
}

/// Channel a stream record arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputChannel {
    Console,
    Target,
    Log,
}

/// Unescaped text of one stream record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub channel: OutputChannel,
    pub text: String,
}

/// GDB configuration
#[derive(Debug, Clone)]
pub struct GdbConfig {
    pub gdb_path: String,
    pub gdb_args: Vec<String>,
    pub disassembly_flavor: String,
    /// Upper bound on concurrently running record handlers
    pub max_handlers: usize,
    /// Pending commands older than this are dropped; `None` keeps them forever
    pub pending_timeout: Option<Duration>,
    /// Grace period for the child to exec before the first command is written
    pub startup_delay: Duration,
}

impl Default for GdbConfig {
    fn default() -> Self {
        Self {
            gdb_path: "gdb".to_string(),
            gdb_args: vec!["--interpreter=mi".to_string(), "--nx".to_string()],
            disassembly_flavor: "intel".to_string(),
            max_handlers: 32,
            pending_timeout: Some(Duration::from_secs(30)),
            startup_delay: Duration::from_millis(200),
        }
    }
}

impl fmt::Display for ExecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecState::Running => "running",
            ExecState::Stopped => "stopped",
            ExecState::Exited => "exited",
        };
        f.write_str(s)
    }
}
