//! Headless front-end
//!
//! A line-oriented command language for driving a session from stdin, and
//! the JSON rendering of snapshots printed on every change notification.

use anyhow::{anyhow, bail, Context, Result};
use gdbmi_frontend::gdb::{Session, UpdateKind};
use serde_json::{json, Map, Value};

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendCommand {
    Run,
    Continue,
    Next,
    Step,
    StepInstruction,
    NextInstruction,
    Finish,
    Interrupt,
    Return,
    Jump(String),
    Until(String),
    Break(String),
    Delete(u32),
    Disassemble(String),
    DisassembleLine { file: String, line: u32 },
    Registers,
    Backtrace,
    Symbols,
    Globals,
    Breakpoints,
    Pc,
    Attach(u32),
    Detach,
    Arguments(String),
    Load(String),
    Libraries,
    /// Any MI command, sent as typed
    Raw(String),
    Status,
    Quit,
}

fn required<'a>(arg: Option<&'a str>, usage: &str) -> Result<&'a str> {
    arg.filter(|a| !a.is_empty())
        .ok_or_else(|| anyhow!("usage: {}", usage))
}

impl FrontendCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if let Some(raw) = line.strip_prefix('-') {
            return Ok(FrontendCommand::Raw(format!("-{}", raw)));
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, Some(rest.trim())),
            None => (line, None),
        };

        let command = match word {
            "run" | "r" => FrontendCommand::Run,
            "continue" | "c" => FrontendCommand::Continue,
            "next" | "n" => FrontendCommand::Next,
            "step" | "s" => FrontendCommand::Step,
            "stepi" | "si" => FrontendCommand::StepInstruction,
            "nexti" | "ni" => FrontendCommand::NextInstruction,
            "finish" => FrontendCommand::Finish,
            "interrupt" => FrontendCommand::Interrupt,
            "return" => FrontendCommand::Return,
            "jump" => FrontendCommand::Jump(required(rest, "jump LOCATION")?.to_string()),
            "until" => FrontendCommand::Until(required(rest, "until LOCATION")?.to_string()),
            "break" | "b" => FrontendCommand::Break(required(rest, "break ADDRESS")?.to_string()),
            "delete" => {
                let number = required(rest, "delete NUMBER")?;
                FrontendCommand::Delete(
                    number
                        .parse()
                        .with_context(|| format!("invalid breakpoint number '{}'", number))?,
                )
            }
            "disas" => FrontendCommand::Disassemble(rest.unwrap_or("$pc").to_string()),
            "disas-line" => {
                let usage = "disas-line FILE LINE";
                let mut parts = required(rest, usage)?.split_whitespace();
                let (Some(file), Some(line), None) = (parts.next(), parts.next(), parts.next())
                else {
                    bail!("usage: {}", usage);
                };
                FrontendCommand::DisassembleLine {
                    file: file.to_string(),
                    line: line
                        .parse()
                        .with_context(|| format!("invalid line number '{}'", line))?,
                }
            }
            "regs" => FrontendCommand::Registers,
            "bt" => FrontendCommand::Backtrace,
            "symbols" => FrontendCommand::Symbols,
            "globals" => FrontendCommand::Globals,
            "breakpoints" => FrontendCommand::Breakpoints,
            "pc" => FrontendCommand::Pc,
            "attach" => {
                let pid = required(rest, "attach PID")?;
                FrontendCommand::Attach(
                    pid.parse()
                        .with_context(|| format!("invalid pid '{}'", pid))?,
                )
            }
            "detach" => FrontendCommand::Detach,
            "args" => FrontendCommand::Arguments(rest.unwrap_or_default().to_string()),
            "load" => FrontendCommand::Load(required(rest, "load PATH")?.to_string()),
            "libs" => FrontendCommand::Libraries,
            "status" => FrontendCommand::Status,
            "quit" | "q" => FrontendCommand::Quit,
            other => bail!("unknown command '{}'", other),
        };
        Ok(command)
    }

    /// Send the command. Returns a value to print immediately, if any.
    pub fn apply(&self, session: &Session) -> Result<Option<Value>> {
        match self {
            FrontendCommand::Run => session.exec_run()?,
            FrontendCommand::Continue => session.exec_continue()?,
            FrontendCommand::Next => session.exec_next()?,
            FrontendCommand::Step => session.exec_step()?,
            FrontendCommand::StepInstruction => session.exec_step_instruction()?,
            FrontendCommand::NextInstruction => session.exec_next_instruction()?,
            FrontendCommand::Finish => session.exec_finish()?,
            FrontendCommand::Interrupt => session.exec_interrupt()?,
            FrontendCommand::Return => session.exec_return()?,
            FrontendCommand::Jump(location) => session.exec_jump(location)?,
            FrontendCommand::Until(location) => session.exec_until(location)?,
            FrontendCommand::Break(address) => {
                session.insert_breakpoint(address)?;
            }
            FrontendCommand::Delete(number) => {
                session.delete_breakpoint(*number)?;
            }
            FrontendCommand::Disassemble(location) => session.request_disassembly(location)?,
            FrontendCommand::DisassembleLine { file, line } => {
                session.request_disassembly_line(file, *line)?
            }
            FrontendCommand::Registers => session.request_registers()?,
            FrontendCommand::Backtrace => session.request_backtrace()?,
            FrontendCommand::Symbols => session.request_function_symbols()?,
            FrontendCommand::Globals => session.request_global_symbols()?,
            FrontendCommand::Breakpoints => session.request_breakpoints()?,
            FrontendCommand::Pc => session.request_current_position()?,
            FrontendCommand::Attach(pid) => session.attach(*pid)?,
            FrontendCommand::Detach => session.detach()?,
            FrontendCommand::Arguments(args) => session.set_arguments(args)?,
            FrontendCommand::Load(path) => session.load_executable(path)?,
            FrontendCommand::Libraries => session.list_shared_libraries()?,
            FrontendCommand::Raw(command) => {
                session.send_command(command, None)?;
            }
            FrontendCommand::Status => return Ok(Some(render(session, UpdateKind::empty()))),
            FrontendCommand::Quit => {}
        }
        Ok(None)
    }
}

/// State, status and the snapshots named by `kind`. Stream output is left
/// to [`Renderer`], which knows which lines were already printed.
pub fn render(session: &Session, kind: UpdateKind) -> Value {
    let mut out = Map::new();
    out.insert("state".to_string(), json!(session.state()));
    out.insert("status".to_string(), json!(session.status()));

    if kind.contains(UpdateKind::FUNC_SYMBOLS) {
        out.insert("func_symbols".to_string(), json!(session.func_symbols()));
    }
    if kind.contains(UpdateKind::GLOBAL_SYMBOLS) {
        out.insert("global_symbols".to_string(), json!(session.global_symbols()));
    }
    if kind.contains(UpdateKind::DISASSEMBLY) {
        out.insert("disassembly".to_string(), json!(session.disassembly()));
        out.insert("current".to_string(), json!(session.current_instruction()));
        out.insert("step_frame".to_string(), json!(session.step_frame()));
    }
    if kind.contains(UpdateKind::REGISTERS) {
        out.insert("registers".to_string(), json!(session.registers()));
    }
    if kind.contains(UpdateKind::BACKTRACE) {
        out.insert("backtrace".to_string(), json!(session.backtrace()));
    }
    if kind.contains(UpdateKind::BREAKPOINTS) {
        out.insert("breakpoints".to_string(), json!(session.breakpoints()));
    }
    if let Some(error) = session.last_error() {
        out.insert("last_error".to_string(), json!(error));
    }

    Value::Object(out)
}

/// Renders notifications in order, printing each stream line exactly once
#[derive(Debug, Default)]
pub struct Renderer {
    output_seen: u64,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, session: &Session, kind: UpdateKind) -> Value {
        let mut value = render(session, kind);
        if kind.contains(UpdateKind::OUTPUT) {
            let (seen, lines) = session.output_since(self.output_seen);
            self.output_seen = seen;
            if let Value::Object(out) = &mut value {
                out.insert("output".to_string(), json!(lines));
            }
        }
        value
    }
}
