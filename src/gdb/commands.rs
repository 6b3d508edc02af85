//! Command facade
//!
//! Execution-control commands are fire-and-forget: state changes arrive as
//! `*running`/`*stopped` records handled by the class table. Data and file
//! commands register a token handler before the line is written so the
//! reply always finds its builder.

use crate::gdb::error::Result;
use crate::gdb::registry::Builtin;
use crate::gdb::session::{lock, QuerySession, Session};
use crate::gdb::types::Token;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Quote an argument when the debugger would otherwise split it
fn quoted(arg: &str) -> String {
    if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '"') {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

impl Session {
    fn exec(&self, command: &str) -> Result<()> {
        self.send_command(command, None).map(|_| ())
    }

    fn request(&self, command: &str, builtin: Builtin) -> Result<Token> {
        self.send_command(command, Some(builtin.into()))
    }

    /// Settings sent once after the debugger starts
    pub fn configure(&self) -> Result<()> {
        self.exec("-gdb-set mi-async on")?;
        self.exec(&format!("-gdb-set disassembly-flavor {}", self.disassembly_flavor()))?;
        self.exec("-gdb-set pagination off")?;
        self.exec("-gdb-set confirm off")
    }

    pub fn request_exit(&self) -> Result<()> {
        self.exec("-gdb-exit")
    }

    // Execution control

    pub fn exec_run(&self) -> Result<()> {
        self.exec("-exec-run --start")
    }

    pub fn exec_continue(&self) -> Result<()> {
        self.exec("-exec-continue")
    }

    /// Run until the current frame returns
    pub fn exec_finish(&self) -> Result<()> {
        self.exec("-exec-finish")
    }

    pub fn exec_interrupt(&self) -> Result<()> {
        self.exec("-exec-interrupt")
    }

    pub fn exec_jump(&self, location: &str) -> Result<()> {
        self.exec(&format!("-exec-jump {}", location))
    }

    /// Next source line, stepping over calls
    pub fn exec_next(&self) -> Result<()> {
        self.exec("-exec-next")
    }

    pub fn exec_next_instruction(&self) -> Result<()> {
        self.exec("-exec-next-instruction")
    }

    /// Pop the current frame without executing the rest of it
    pub fn exec_return(&self) -> Result<()> {
        self.exec("-exec-return")
    }

    /// Next source line, following calls
    pub fn exec_step(&self) -> Result<()> {
        self.exec("-exec-step")
    }

    pub fn exec_step_instruction(&self) -> Result<()> {
        self.exec("-exec-step-instruction")
    }

    pub fn exec_until(&self, location: &str) -> Result<()> {
        self.exec(&format!("-exec-until {}", location))
    }

    // Files and targets

    /// Load an executable and its symbols; symbol tables are fetched once it succeeds
    pub fn load_executable(&self, path: &str) -> Result<()> {
        self.request(
            &format!("-file-exec-and-symbols {}", quoted(path)),
            Builtin::ExecutableLoaded,
        )
        .map(|_| ())
    }

    pub fn set_exec_file(&self, path: &str) -> Result<()> {
        self.exec(&format!("-file-exec-file {}", quoted(path)))
    }

    pub fn list_shared_libraries(&self) -> Result<()> {
        self.exec("-file-list-shared-libraries")
    }

    pub fn set_arguments(&self, args: &str) -> Result<()> {
        self.exec(&format!("-exec-arguments {}", args))
    }

    pub fn attach(&self, pid: u32) -> Result<()> {
        self.exec(&format!("-target-attach {}", pid))
    }

    pub fn detach(&self) -> Result<()> {
        self.exec("-target-detach")
    }

    // Breakpoints

    /// Insert a breakpoint at an address. The reply triggers a list refresh.
    pub fn insert_breakpoint(&self, address: &str) -> Result<Token> {
        let address = address.trim_start_matches('*');
        self.request(
            &format!("-break-insert *{}", address),
            Builtin::BreakpointsChanged,
        )
    }

    pub fn delete_breakpoint(&self, number: u32) -> Result<Token> {
        self.request(
            &format!("-break-delete {}", number),
            Builtin::BreakpointsChanged,
        )
    }

    pub fn request_breakpoints(&self) -> Result<()> {
        self.request("-break-list", Builtin::BreakpointTable)
            .map(|_| ())
    }

    // Data

    pub fn request_function_symbols(&self) -> Result<()> {
        self.request("-symbol-info-functions", Builtin::FunctionSymbols)
            .map(|_| ())
    }

    pub fn request_global_symbols(&self) -> Result<()> {
        self.request("-symbol-info-variables", Builtin::GlobalSymbols)
            .map(|_| ())
    }

    /// Disassemble the function containing `location` (an address, `$pc` or a symbol)
    pub fn request_disassembly(&self, location: &str) -> Result<()> {
        self.request(
            &format!("-data-disassemble -a {} 0", location),
            Builtin::Disassembly,
        )
        .map(|_| ())
    }

    pub fn request_disassembly_function(&self, function: &str) -> Result<()> {
        self.request_disassembly(function)
    }

    pub fn request_disassembly_line(&self, file: &str, line: u32) -> Result<()> {
        self.request(
            &format!("-data-disassemble -f {} -l {} 0", quoted(file), line),
            Builtin::Disassembly,
        )
        .map(|_| ())
    }

    pub fn request_current_position(&self) -> Result<()> {
        self.request("-data-evaluate-expression $pc", Builtin::CurrentPosition)
            .map(|_| ())
    }

    /// Register names, then register values once the names are in
    pub fn request_registers(&self) -> Result<()> {
        self.start_query(
            &self.register_query,
            "-data-list-register-names",
            Builtin::RegisterNames,
        )
    }

    /// Stack frames, then the variables of the selected frame
    pub fn request_backtrace(&self) -> Result<()> {
        self.start_query(
            &self.backtrace_query,
            "-stack-list-frames",
            Builtin::StackFrames,
        )
    }

    fn start_query(
        &self,
        query: &Mutex<QuerySession>,
        command: &str,
        builtin: Builtin,
    ) -> Result<()> {
        let token = {
            let mut query = lock(query);
            if !query.begin() {
                debug!("{} already in flight, will rerun", command);
                return Ok(());
            }
            let token = self.tokens.next_token();
            query.first_sent(token);
            token
        };

        self.issue(token, command, Some(builtin.into()))
            .inspect_err(|_| lock(query).reset())
    }

    /// Send the second half of a two-phase query
    pub(crate) fn continue_query(
        &self,
        query: &Mutex<QuerySession>,
        command: &str,
        builtin: Builtin,
    ) {
        let token = self.tokens.next_token();
        lock(query).second_sent(token);

        if let Err(e) = self.issue(token, command, Some(builtin.into())) {
            warn!("Failed to send {}: {}", command, e);
            lock(query).reset();
        }
    }
}
