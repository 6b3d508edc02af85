//! Record handlers
//!
//! Reactions to classified records: the stop handler, the continuations of
//! the two-phase queries, and the builders that turn reply payloads into
//! snapshots. A builder skips whatever does not have the expected shape and
//! keeps the rest.

use crate::gdb::dispatcher::RecordHandler;
use crate::gdb::error::Result;
use crate::gdb::parser::{find_string, find_value, parse_key_values, stream_text, Item};
use crate::gdb::registry::{Builtin, Handler};
use crate::gdb::session::{lock, Session};
use crate::gdb::state::{interpret_stop, StopAction};
use crate::gdb::types::*;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, error, info, warn};

static HEX_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x([0-9a-fA-F]+)").expect("valid hex regex"));

fn stream_channel(kind: RecordType) -> Option<OutputChannel> {
    match kind {
        RecordType::ConsoleStream => Some(OutputChannel::Console),
        RecordType::TargetStream => Some(OutputChannel::Target),
        RecordType::LogStream => Some(OutputChannel::Log),
        _ => None,
    }
}

fn follow_up(what: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!("Failed to request {}: {}", what, e);
    }
}

impl RecordHandler for Session {
    fn handle(&self, record: Record) {
        self.dispatch(record);
    }

    fn sweep(&self) {
        let Some(timeout) = self.pending_timeout() else {
            return;
        };
        for expired in self.registry.expire(timeout) {
            warn!(
                "No reply to '{}' (token {}) within {:?}, dropping its handler",
                expired.command, expired.token, timeout
            );
            self.abort_queries(expired.token);
        }
    }
}

impl Session {
    /// Route one record: stream text to the output buffer, `^error` to the
    /// error path, everything else through the registry.
    pub(crate) fn dispatch(&self, record: Record) {
        if let Some(channel) = stream_channel(record.kind) {
            self.push_output(OutputLine {
                channel,
                text: stream_text(&record.data),
            });
            return;
        }

        if record.is_error() {
            self.on_error_reply(&record);
            return;
        }

        match self.registry.lookup(&record) {
            Some(handler) => self.invoke(handler, &record),
            None => debug!(
                "Unhandled record: {:?} {} {}",
                record.kind, record.class, record.data
            ),
        }
    }

    pub(crate) fn invoke(&self, handler: Handler, record: &Record) {
        let builtin = match handler {
            Handler::Custom(f) => return f(record),
            Handler::Builtin(builtin) => builtin,
        };

        match builtin {
            Builtin::Running => self.set_state(ExecState::Running, "Inferior is running"),
            Builtin::Stopped => self.on_stopped(record),
            Builtin::BreakpointsChanged => follow_up("breakpoint list", self.request_breakpoints()),
            Builtin::BreakpointTable => self.on_breakpoint_table(record),
            Builtin::LibraryLoaded => {
                debug!("Library loaded: {}", self.record_field(record, "id"))
            }
            Builtin::LibraryUnloaded => {
                debug!("Library unloaded: {}", self.record_field(record, "id"))
            }
            Builtin::ThreadCreated => {
                info!("Thread created: {}", self.record_field(record, "id"))
            }
            Builtin::ThreadSelected => {
                info!("Thread selected: {}", self.record_field(record, "id"))
            }
            Builtin::ThreadExited => info!("Thread exited: {}", self.record_field(record, "id")),
            Builtin::ExecutableLoaded => self.on_executable_loaded(),
            Builtin::FunctionSymbols => self.on_symbols(record, UpdateKind::FUNC_SYMBOLS),
            Builtin::GlobalSymbols => self.on_symbols(record, UpdateKind::GLOBAL_SYMBOLS),
            Builtin::Disassembly => self.on_disassembly(record),
            Builtin::CurrentPosition => self.on_current_position(record),
            Builtin::RegisterNames => self.on_register_names(record),
            Builtin::RegisterValues => self.on_register_values(record),
            Builtin::StackFrames => self.on_stack_frames(record),
            Builtin::StackVariables => self.on_stack_variables(record),
        }
    }

    fn record_field(&self, record: &Record, key: &str) -> String {
        let mut cursor = record.data.as_str();
        find_string(&parse_key_values(&mut cursor), key)
    }

    /// `^error`: the waiting handler is dropped unrun and the message surfaces
    /// through the log, the status line and `last_error()`.
    fn on_error_reply(&self, record: &Record) {
        let message = self.record_field(record, "msg");

        match record.token {
            Some(token) => {
                let command = self.registry.cancel(token).unwrap_or_default();
                error!("Debugger error for '{}' (token {}): {}", command, token, message);
                self.abort_queries(token);
            }
            None => error!("Debugger error: {}", message),
        }

        self.record_error(message);
    }

    /// Reset any two-phase query waiting on `token`, restarting it if asked to
    pub(crate) fn abort_queries(&self, token: Token) {
        let registers = lock(&self.register_query).abort(token);
        if registers == Some(true) {
            follow_up("registers", self.request_registers());
        }

        let backtrace = lock(&self.backtrace_query).abort(token);
        if backtrace == Some(true) {
            follow_up("backtrace", self.request_backtrace());
        }
    }

    fn on_stopped(&self, record: &Record) {
        *lock(&self.caches.step_frame) = StepFrame::default();

        let outcome = interpret_stop(&record.data);
        debug!("Stop reason: {:?}", outcome.reason);
        self.set_state(outcome.state, outcome.status.clone());

        if outcome.wants_context() {
            follow_up("registers", self.request_registers());
            follow_up("backtrace", self.request_backtrace());
        }

        match outcome.action {
            StopAction::None => {}
            StopAction::Requery => self.requery_position(),
            StopAction::BreakpointHit => {
                self.requery_position();
                if let Some(handler) = self.registry.class_handler("breakpoint-hit") {
                    self.invoke(handler, record);
                }
            }
            StopAction::Step(frame) => {
                if let Some(address) = parse_hex(&frame.address) {
                    *lock(&self.caches.current) = CurrentInstruction {
                        address,
                        function: frame.func.clone(),
                    };
                }
                let location = if frame.is_valid {
                    frame.address.clone()
                } else {
                    "$pc".to_string()
                };
                *lock(&self.caches.step_frame) = frame;
                follow_up("disassembly", self.request_disassembly(&location));
            }
        }
    }

    fn requery_position(&self) {
        follow_up("current position", self.request_current_position());
        follow_up("disassembly", self.request_disassembly("$pc"));
    }

    fn on_executable_loaded(&self) {
        self.set_state(ExecState::Stopped, "Inferior loaded");
        follow_up("function symbols", self.request_function_symbols());
        follow_up("global symbols", self.request_global_symbols());
    }

    fn on_symbols(&self, record: &Record, kind: UpdateKind) {
        let Some(symbols) = parse_symbols(&record.data) else {
            debug!("Symbol reply without a symbols table");
            return;
        };
        let cache = if kind == UpdateKind::FUNC_SYMBOLS {
            &self.caches.func_symbols
        } else {
            &self.caches.global_symbols
        };
        *lock(cache) = symbols;
        self.notify(kind);
    }

    fn on_disassembly(&self, record: &Record) {
        let Some(lines) = parse_disassembly(&record.data) else {
            debug!("Disassembly reply without instructions");
            return;
        };
        *lock(&self.caches.disassembly) = lines;
        self.notify(UpdateKind::DISASSEMBLY);
    }

    fn on_current_position(&self, record: &Record) {
        if let Some(current) = parse_current_position(&record.data) {
            *lock(&self.caches.current) = current;
            self.notify(UpdateKind::DISASSEMBLY);
        }
    }

    fn on_breakpoint_table(&self, record: &Record) {
        if let Some(breakpoints) = parse_breakpoints(&record.data) {
            *lock(&self.caches.breakpoints) = breakpoints;
        }
        self.notify(UpdateKind::BREAKPOINTS);
    }

    fn on_register_names(&self, record: &Record) {
        let current = lock(&self.register_query).first_done(record.token);
        if !current {
            debug!("Ignoring stale register names reply");
            return;
        }

        if let Some(names) = parse_register_names(&record.data) {
            *lock(&self.caches.register_names) = names;
        }
        self.continue_query(
            &self.register_query,
            "-data-list-register-values x",
            Builtin::RegisterValues,
        );
    }

    fn on_register_values(&self, record: &Record) {
        let done = lock(&self.register_query).second_done(record.token);
        let Some(rerun) = done else {
            debug!("Ignoring stale register values reply");
            return;
        };

        let names = self.register_names();
        {
            let mut registers = lock(&self.caches.registers);
            if let Some(updated) = build_registers(&record.data, &names, &registers) {
                *registers = updated;
            }
        }
        self.notify(UpdateKind::REGISTERS);

        if rerun {
            follow_up("registers", self.request_registers());
        }
    }

    fn on_stack_frames(&self, record: &Record) {
        let current = lock(&self.backtrace_query).first_done(record.token);
        if !current {
            debug!("Ignoring stale stack frames reply");
            return;
        }

        {
            let mut backtrace = lock(&self.caches.backtrace);
            match parse_frames(&record.data) {
                Some(mut frames) => {
                    carry_variables(&mut frames, &backtrace);
                    *backtrace = frames;
                }
                None if record.data.is_empty() => backtrace.clear(),
                None => {}
            }
        }
        self.notify(UpdateKind::BACKTRACE);

        self.continue_query(
            &self.backtrace_query,
            "-stack-list-variables 2",
            Builtin::StackVariables,
        );
    }

    fn on_stack_variables(&self, record: &Record) {
        let done = lock(&self.backtrace_query).second_done(record.token);
        let Some(rerun) = done else {
            debug!("Ignoring stale stack variables reply");
            return;
        };

        if let Some(vars) = parse_variables(&record.data) {
            if let Some(frame) = lock(&self.caches.backtrace).first_mut() {
                frame.vars = vars;
            }
        }
        self.notify(UpdateKind::BACKTRACE);

        if rerun {
            follow_up("backtrace", self.request_backtrace());
        }
    }
}

/// Value of the first top-level pair named `key`
fn root<'a>(data: &'a str, key: &str) -> Option<Item<'a>> {
    let mut cursor = data;
    let pairs = parse_key_values(&mut cursor);
    find_value(&pairs, key)
}

fn parse_u32(s: &str) -> u32 {
    s.trim().parse().unwrap_or(0)
}

/// Parse `0x`-prefixed (or bare) hexadecimal text
pub fn parse_hex(s: &str) -> Option<u64> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(digits, 16).ok()
}

/// Register width in bytes from the hex digit count of its value; 0 for non-hex values
pub fn register_size(value: &str) -> u32 {
    HEX_VALUE_RE
        .captures(value)
        .map(|caps| {
            let digits = caps[1].len() as u32;
            digits.div_ceil(2)
        })
        .unwrap_or(0)
}

/// `symbols={debug=[{filename,fullname,symbols=[{line,name,type,description}]}]}`
pub fn parse_symbols(data: &str) -> Option<Vec<SymbolObject>> {
    let table = root(data, "symbols").filter(Item::is_tuple)?;
    let debug_files = find_value(&table.pairs(), "debug").filter(Item::is_list)?;

    let mut symbols = Vec::new();
    for file in debug_files.items().into_iter().filter(Item::is_tuple) {
        let fields = file.pairs();
        let short_name = find_string(&fields, "filename");
        let full_path = find_string(&fields, "fullname");

        let Some(list) = find_value(&fields, "symbols").filter(Item::is_list) else {
            continue;
        };
        for symbol in list.items().into_iter().filter(Item::is_tuple) {
            let parts = symbol.pairs();
            symbols.push(SymbolObject {
                name: find_string(&parts, "name"),
                symbol_type: find_string(&parts, "type"),
                description: find_string(&parts, "description"),
                file: short_name.clone(),
                full_path: full_path.clone(),
                line: find_string(&parts, "line"),
                is_active: false,
            });
        }
    }
    Some(symbols)
}

/// `asm_insns=[{address,func-name,offset,inst},...]`
pub fn parse_disassembly(data: &str) -> Option<Vec<DisassemblyInstruction>> {
    let list = root(data, "asm_insns").filter(Item::is_list)?;

    let lines = list
        .items()
        .into_iter()
        .filter(Item::is_tuple)
        .filter_map(|insn| {
            let fields = insn.pairs();
            let addr_str = find_string(&fields, "address");
            let address = parse_hex(&addr_str)?;
            Some(DisassemblyInstruction {
                address,
                addr_str,
                func_name: find_string(&fields, "func-name"),
                offset: find_string(&fields, "offset"),
                instruction: find_string(&fields, "inst"),
            })
        })
        .collect();
    Some(lines)
}

/// `value="0x4011a6 <main+12>"`
pub fn parse_current_position(data: &str) -> Option<CurrentInstruction> {
    let value = root(data, "value")?.value();
    let caps = HEX_VALUE_RE.captures(&value)?;
    let address = u64::from_str_radix(&caps[1], 16).ok()?;
    let function = value
        .split_once(' ')
        .map(|(_, symbol)| symbol_name(symbol.trim()))
        .unwrap_or_default();
    Some(CurrentInstruction { address, function })
}

/// `<name+offset>` to `name`. Names may contain `<`, `>` and `+` themselves.
fn symbol_name(symbol: &str) -> String {
    let symbol = symbol.strip_prefix('<').unwrap_or(symbol);
    let symbol = symbol.strip_suffix('>').unwrap_or(symbol);
    match symbol.rsplit_once('+') {
        Some((name, offset))
            if !offset.is_empty() && offset.bytes().all(|b| b.is_ascii_digit()) =>
        {
            name.to_string()
        }
        _ => symbol.to_string(),
    }
}

/// `register-names=["rax","rbx",...]`. Empty names are kept so positions line up.
pub fn parse_register_names(data: &str) -> Option<Vec<String>> {
    let list = root(data, "register-names").filter(Item::is_list)?;
    Some(list.items().iter().map(Item::value).collect())
}

/// Zip `register-values=[{number,value},...]` with the names by number and
/// flag values that differ from `previous`.
pub fn build_registers(
    data: &str,
    names: &[String],
    previous: &[RegisterInfo],
) -> Option<Vec<RegisterInfo>> {
    let list = root(data, "register-values").filter(Item::is_list)?;

    let registers = list
        .items()
        .into_iter()
        .filter(Item::is_tuple)
        .filter_map(|entry| {
            let fields = entry.pairs();
            let number: usize = find_string(&fields, "number").parse().ok()?;
            let name = names.get(number).filter(|n| !n.is_empty())?;
            let value = find_string(&fields, "value");

            let changed = previous
                .iter()
                .find(|old| &old.name == name)
                .map(|old| old.value != value)
                .unwrap_or(false);

            Some(RegisterInfo {
                name: name.clone(),
                size: register_size(&value),
                value,
                changed,
            })
        })
        .collect();
    Some(registers)
}

/// `stack=[frame={level,addr,func,file,fullname,line,arch},...]`
pub fn parse_frames(data: &str) -> Option<Vec<FrameInfo>> {
    let list = root(data, "stack").filter(Item::is_list)?;

    let mut frames = Vec::new();
    for (key, frame) in list.pairs() {
        if key != "frame" || !frame.is_tuple() {
            debug!("Unrecognized stack entry '{}'", key);
            continue;
        }
        let fields = frame.pairs();
        frames.push(FrameInfo {
            level: parse_u32(&find_string(&fields, "level")),
            addr: find_string(&fields, "addr"),
            func: find_string(&fields, "func"),
            file: find_string(&fields, "file"),
            fullname: find_string(&fields, "fullname"),
            line: parse_u32(&find_string(&fields, "line")),
            arch: find_string(&fields, "arch"),
            vars: Vec::new(),
        });
    }
    Some(frames)
}

/// Keep variables for frames that are still the same (file, function, line)
pub fn carry_variables(frames: &mut [FrameInfo], previous: &[FrameInfo]) {
    for frame in frames.iter_mut() {
        if let Some(old) = previous.iter().find(|old| {
            old.fullname == frame.fullname && old.func == frame.func && old.line == frame.line
        }) {
            frame.vars = old.vars.clone();
        }
    }
}

/// `variables=[{name,arg,type,value},...]`
pub fn parse_variables(data: &str) -> Option<Vec<FrameVariable>> {
    let list = root(data, "variables").filter(Item::is_list)?;

    let vars = list
        .items()
        .into_iter()
        .filter(Item::is_tuple)
        .map(|var| {
            let fields = var.pairs();
            FrameVariable {
                name: find_string(&fields, "name"),
                var_type: find_string(&fields, "type"),
                value: find_string(&fields, "value"),
                is_arg: find_value(&fields, "arg").is_some(),
            }
        })
        .collect();
    Some(vars)
}

/// `BreakpointTable={...,body=[bkpt={...},...]}`
pub fn parse_breakpoints(data: &str) -> Option<Vec<BreakpointInfo>> {
    let table = root(data, "BreakpointTable").filter(Item::is_tuple)?;
    let body = find_value(&table.pairs(), "body").filter(Item::is_list)?;

    let mut breakpoints = Vec::new();
    for (key, bkpt) in body.pairs() {
        if key != "bkpt" || !bkpt.is_tuple() {
            continue;
        }
        let fields = bkpt.pairs();
        breakpoints.push(BreakpointInfo {
            number: parse_u32(&find_string(&fields, "number")),
            breakpoint_type: find_string(&fields, "type"),
            disposition: Disposition::from(find_string(&fields, "disp").as_str()),
            enabled: find_string(&fields, "enabled").starts_with('y'),
            addr: find_string(&fields, "addr"),
            func: find_string(&fields, "func"),
            file: find_string(&fields, "file"),
            fullname: find_string(&fields, "fullname"),
            line: parse_u32(&find_string(&fields, "line")),
            times: parse_u32(&find_string(&fields, "times")),
        });
    }
    Some(breakpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdb::session::test_support::{feed, session, session_with};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_breakpoint_hit_requeries_and_chains() {
        let (session, sink) = session();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        session.on_class("breakpoint-hit", move |record| {
            assert_eq!(record.class, "stopped");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        feed(
            &session,
            "*stopped,reason=\"breakpoint-hit\",bkptno=\"1\",frame={addr=\"0x4011a6\",func=\"main\",args=[],file=\"a.c\",line=\"5\"}",
        );

        assert_eq!(session.state(), ExecState::Stopped);
        assert_eq!(session.status(), "Inferior stopped: breakpoint hit");
        assert_eq!(sink.count("-data-evaluate-expression $pc"), 1);
        assert_eq!(sink.count("-data-disassemble -a $pc 0"), 1);
        assert_eq!(sink.count("-data-list-register-names"), 1);
        assert_eq!(sink.count("-stack-list-frames"), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_breakpoint_hit_refreshes_list() {
        let (session, sink) = session();
        feed(&session, "*stopped,reason=\"breakpoint-hit\",bkptno=\"2\"");
        assert_eq!(sink.count("-break-list"), 1);
    }

    #[test]
    fn test_register_query_zips_names_and_values() {
        let (session, sink) = session();
        session.request_registers().unwrap();

        let names_token = sink.token_of("-data-list-register-names").unwrap();
        feed(&session, &format!("{}^done,register-names=[\"rax\"]", names_token));

        let values_token = sink.token_of("-data-list-register-values x").unwrap();
        feed(
            &session,
            &format!(
                "{}^done,register-values=[{{number=\"0\",value=\"0x2a\"}}]",
                values_token
            ),
        );

        assert_eq!(
            session.registers(),
            vec![RegisterInfo {
                name: "rax".to_string(),
                value: "0x2a".to_string(),
                size: 1,
                changed: false,
            }]
        );
    }

    #[test]
    fn test_register_values_flag_changes() {
        let names = vec!["rax".to_string(), String::new(), "rip".to_string()];
        let first = build_registers(
            "register-values=[{number=\"0\",value=\"0x1\"},{number=\"1\",value=\"0x5\"},{number=\"2\",value=\"0x401000\"}]",
            &names,
            &[],
        )
        .unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|r| !r.changed));
        assert_eq!(first[1].size, 3);

        let second = build_registers(
            "register-values=[{number=\"0\",value=\"0x2\"},{number=\"2\",value=\"0x401000\"},{number=\"9\",value=\"0x0\"}]",
            &names,
            &first,
        )
        .unwrap();
        assert_eq!(second.len(), 2);
        assert!(second[0].changed);
        assert!(!second[1].changed);
    }

    #[test]
    fn test_register_size() {
        assert_eq!(register_size("0x2a"), 1);
        assert_eq!(register_size("0x7fffffffe178"), 6);
        assert_eq!(register_size("0x123"), 2);
        assert_eq!(register_size("{v4_float = {0x0, 0x0}}"), 0);
        assert_eq!(register_size("42"), 0);
    }

    #[test]
    fn test_breakpoint_insert_reply_refreshes_once() {
        let (session, sink) = session();
        let token = session.insert_breakpoint("0x4011a6").unwrap();
        feed(
            &session,
            &format!("{}^done,bkpt={{number=\"1\",type=\"breakpoint\"}}", token),
        );
        assert_eq!(sink.count("-break-list"), 1);

        // A repeat of the same reply no longer has a handler
        feed(&session, &format!("{}^done", token));
        assert_eq!(sink.count("-break-list"), 1);
    }

    #[test]
    fn test_breakpoint_table() {
        let (session, sink) = session();
        session.request_breakpoints().unwrap();
        let token = sink.token_of("-break-list").unwrap();

        feed(
            &session,
            &format!(
                "{}^done,BreakpointTable={{nr_rows=\"2\",nr_cols=\"6\",hdr=[{{width=\"7\",alignment=\"-1\",col_name=\"number\",colhdr=\"Num\"}}],body=[bkpt={{number=\"1\",type=\"breakpoint\",disp=\"keep\",enabled=\"y\",addr=\"0x000100d0\",func=\"main\",file=\"hello.c\",fullname=\"/home/foo/hello.c\",line=\"5\",thread-groups=[\"i1\"],times=\"0\"}},bkpt={{number=\"2\",type=\"breakpoint\",disp=\"del\",enabled=\"n\",addr=\"0x00010114\",func=\"foo\",file=\"hello.c\",line=\"13\",times=\"3\"}}]}}",
                token
            ),
        );

        let breakpoints = session.breakpoints();
        assert_eq!(breakpoints.len(), 2);
        assert_eq!(breakpoints[0].number, 1);
        assert_eq!(breakpoints[0].fullname, "/home/foo/hello.c");
        assert!(breakpoints[0].enabled);
        assert!(!breakpoints[0].is_temporary());
        assert_eq!(breakpoints[1].line, 13);
        assert_eq!(breakpoints[1].times, 3);
        assert!(!breakpoints[1].enabled);
        assert!(breakpoints[1].is_temporary());
    }

    #[test]
    fn test_error_reply_drops_handler() {
        let (session, sink) = session();
        session.request_disassembly("nowhere").unwrap();
        let token = sink.token_of("-data-disassemble").unwrap();
        assert_eq!(session.pending_commands(), 1);

        let notified = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&notified);
        session.set_notifier(move |kind| seen.lock().unwrap().push(kind));

        feed(
            &session,
            &format!("{}^error,msg=\"No symbol \\\"nowhere\\\" in current context.\"", token),
        );

        assert_eq!(session.pending_commands(), 0);
        assert_eq!(
            session.last_error().as_deref(),
            Some("No symbol \"nowhere\" in current context.")
        );
        assert_eq!(
            session.status(),
            "Error: No symbol \"nowhere\" in current context."
        );
        assert!(!notified
            .lock()
            .unwrap()
            .iter()
            .any(|k| k.contains(UpdateKind::DISASSEMBLY)));
    }

    #[test]
    fn test_error_on_register_names_resets_query() {
        let (session, sink) = session();
        session.request_registers().unwrap();
        let token = sink.token_of("-data-list-register-names").unwrap();

        feed(&session, &format!("{}^error,msg=\"No registers.\"", token));
        assert!(lock(&session.register_query).is_idle());

        session.request_registers().unwrap();
        assert_eq!(sink.count("-data-list-register-names"), 2);
    }

    #[test]
    fn test_end_stepping_range_positions_disassembly() {
        let (session, sink) = session();
        feed(
            &session,
            "*stopped,reason=\"end-stepping-range\",frame={addr=\"0x000055555555fa90\",func=\"??\",args=[],arch=\"i386:x86-64\"},thread-id=\"1\",stopped-threads=\"all\",core=\"6\"",
        );

        let frame = session.step_frame();
        assert!(frame.is_valid);
        assert_eq!(frame.thread_id, "1");
        assert_eq!(session.current_instruction().address, 0x55555555fa90);
        assert_eq!(session.status(), "Inferior stopped: Finished stepping");
        assert_eq!(sink.count("-data-disassemble -a 0x000055555555fa90 0"), 1);
        assert_eq!(sink.count("-data-disassemble -a $pc 0"), 0);
    }

    #[test]
    fn test_incomplete_step_falls_back_to_pc() {
        let (session, sink) = session();
        feed(&session, "*stopped,reason=\"end-stepping-range\",frame={addr=\"0x10\"}");
        assert!(!session.step_frame().is_valid);
        assert_eq!(sink.count("-data-disassemble -a $pc 0"), 1);
    }

    #[test]
    fn test_exit_sends_no_followups() {
        let (session, sink) = session();
        feed(&session, "*stopped,reason=\"exited-signalled\",signal-name=\"SIGSEGV\"");
        assert_eq!(session.state(), ExecState::Exited);
        assert_eq!(session.status(), "Inferior exited: Received 'SIGSEGV' signal");
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_running_record() {
        let (session, _) = session();
        feed(&session, "*running,thread-id=\"all\"");
        assert_eq!(session.state(), ExecState::Running);
        assert_eq!(session.status(), "Inferior is running");
    }

    #[test]
    fn test_backtrace_two_phase() {
        let (session, sink) = session();
        session.request_backtrace().unwrap();
        let frames_token = sink.token_of("-stack-list-frames").unwrap();

        feed(
            &session,
            &format!(
                "{}^done,stack=[frame={{level=\"0\",addr=\"0x4011a6\",func=\"main\",file=\"a.c\",fullname=\"/src/a.c\",line=\"5\",arch=\"i386:x86-64\"}},frame={{level=\"1\",addr=\"0x7ffff7829d90\",func=\"__libc_start_call_main\"}}]",
                frames_token
            ),
        );
        let backtrace = session.backtrace();
        assert_eq!(backtrace.len(), 2);
        assert_eq!(backtrace[0].line, 5);
        assert_eq!(backtrace[1].level, 1);

        let vars_token = sink.token_of("-stack-list-variables 2").unwrap();
        feed(
            &session,
            &format!(
                "{}^done,variables=[{{name=\"argc\",arg=\"1\",type=\"int\",value=\"1\"}},{{name=\"cData\",type=\"uint8_t *\",value=\"0x555555558250 <__libc_csu_init> \\\"AWAVA\\\\211\\\"\"}}]",
                vars_token
            ),
        );
        let backtrace = session.backtrace();
        assert_eq!(backtrace[0].vars.len(), 2);
        assert!(backtrace[0].vars[0].is_arg);
        assert!(!backtrace[0].vars[1].is_arg);
        assert_eq!(backtrace[0].vars[1].var_type, "uint8_t *");
        assert!(backtrace[1].vars.is_empty());
    }

    #[test]
    fn test_carry_variables() {
        let var = FrameVariable {
            name: "x".to_string(),
            ..Default::default()
        };
        let old = vec![FrameInfo {
            func: "main".to_string(),
            fullname: "/src/a.c".to_string(),
            line: 5,
            vars: vec![var.clone()],
            ..Default::default()
        }];
        let mut new = vec![
            FrameInfo {
                func: "main".to_string(),
                fullname: "/src/a.c".to_string(),
                line: 5,
                ..Default::default()
            },
            FrameInfo {
                func: "main".to_string(),
                fullname: "/src/a.c".to_string(),
                line: 6,
                ..Default::default()
            },
        ];
        carry_variables(&mut new, &old);
        assert_eq!(new[0].vars, vec![var]);
        assert!(new[1].vars.is_empty());
    }

    #[test]
    fn test_stale_reply_is_ignored() {
        let (session, _) = session();
        feed(&session, "999^done,register-names=[\"rax\"]");
        assert!(session.register_names().is_empty());
    }

    #[test]
    fn test_parse_symbols() {
        let symbols = parse_symbols(
            "symbols={debug=[{filename=\"a.c\",fullname=\"/src/a.c\",symbols=[{line=\"5\",name=\"main\",type=\"int (void)\",description=\"int main(void);\"},{line=\"12\",name=\"helper\",type=\"void (int)\",description=\"static void helper(int);\"}]},{filename=\"b.c\",fullname=\"/src/b.c\",symbols=[]}],nondebug=[{address=\"0x1000\",name=\"_init\"}]}",
        )
        .unwrap();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "main");
        assert_eq!(symbols[0].full_path, "/src/a.c");
        assert_eq!(symbols[1].line, "12");
        assert_eq!(symbols[1].symbol_type, "void (int)");

        assert!(parse_symbols("symbols=[]").is_none());
    }

    #[test]
    fn test_symbols_reply_fills_cache() {
        let (session, sink) = session();
        session.request_global_symbols().unwrap();
        let token = sink.token_of("-symbol-info-variables").unwrap();
        feed(
            &session,
            &format!(
                "{}^done,symbols={{debug=[{{filename=\"a.c\",fullname=\"/src/a.c\",symbols=[{{line=\"3\",name=\"counter\",type=\"int\",description=\"int counter;\"}}]}}]}}",
                token
            ),
        );
        assert_eq!(session.global_symbols().len(), 1);
        assert!(session.func_symbols().is_empty());
    }

    #[test]
    fn test_parse_disassembly_skips_malformed() {
        let lines = parse_disassembly(
            "asm_insns=[{address=\"0x0000000000401126\",func-name=\"main\",offset=\"0\",inst=\"push   rbp\"},{func-name=\"main\"},garbage,{address=\"0x401127\",func-name=\"main\",offset=\"1\",inst=\"mov    rbp,rsp\"}]",
        )
        .unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].address, 0x401126);
        assert_eq!(lines[0].instruction, "push   rbp");
        assert_eq!(lines[1].offset, "1");
    }

    #[test]
    fn test_parse_current_position() {
        let current = parse_current_position("value=\"0x4011a6 <main+12>\"").unwrap();
        assert_eq!(current.address, 0x4011a6);
        assert_eq!(current.function, "main");

        let bare = parse_current_position("value=\"0x10\"").unwrap();
        assert_eq!(bare.function, "");
        assert!(parse_current_position("value=\"<optimized out>\"").is_none());
    }

    #[test]
    fn test_parse_current_position_cpp_names() {
        let current = parse_current_position(
            "value=\"0x401136 <std::vector<int, std::allocator<int> >::size() const+8>\"",
        )
        .unwrap();
        assert_eq!(current.address, 0x401136);
        assert_eq!(
            current.function,
            "std::vector<int, std::allocator<int> >::size() const"
        );

        let current = parse_current_position("value=\"0x401200 <operator+(Vec, Vec)+4>\"").unwrap();
        assert_eq!(current.function, "operator+(Vec, Vec)");

        let current = parse_current_position("value=\"0x401200 <operator+>\"").unwrap();
        assert_eq!(current.function, "operator+");
    }

    #[test]
    fn test_disassembly_notifies_only_on_change() {
        let (session, sink) = session();
        let events = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&events);
        session.set_notifier(move |kind| {
            if kind.contains(UpdateKind::DISASSEMBLY) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        session.request_disassembly("0x401126").unwrap();
        let token = sink.token_of("-data-disassemble").unwrap();
        feed(&session, &format!("{}^done,unexpected=\"1\"", token));
        assert_eq!(events.load(Ordering::SeqCst), 0);

        session.request_disassembly("0x401126").unwrap();
        let token = sink.token_of("-data-disassemble").unwrap();
        feed(
            &session,
            &format!(
                "{}^done,asm_insns=[{{address=\"0x401126\",func-name=\"main\",offset=\"0\",inst=\"push rbp\"}}]",
                token
            ),
        );
        assert_eq!(events.load(Ordering::SeqCst), 1);
        assert_eq!(session.disassembly().len(), 1);
    }

    #[test]
    fn test_sweep_expires_stalled_register_query() {
        let (session, sink) = session_with(GdbConfig {
            pending_timeout: Some(Duration::ZERO),
            ..GdbConfig::default()
        });
        session.request_registers().unwrap();
        assert_eq!(session.pending_commands(), 1);
        assert!(!lock(&session.register_query).is_idle());

        session.sweep();

        assert_eq!(session.pending_commands(), 0);
        assert!(lock(&session.register_query).is_idle());

        sink.clear();
        session.request_registers().unwrap();
        assert_eq!(sink.count("-data-list-register-names"), 1);
    }

    #[test]
    fn test_sweep_keeps_fresh_commands() {
        let (session, _) = session();
        session.request_breakpoints().unwrap();
        session.sweep();
        assert_eq!(session.pending_commands(), 1);
    }

    #[test]
    fn test_executable_loaded_requests_symbols() {
        let (session, sink) = session();
        session.load_executable("/bin/true").unwrap();
        let token = sink.token_of("-file-exec-and-symbols").unwrap();
        feed(&session, &format!("{}^done", token));

        assert_eq!(session.status(), "Inferior loaded");
        assert_eq!(sink.count("-symbol-info-functions"), 1);
        assert_eq!(sink.count("-symbol-info-variables"), 1);
    }

    #[test]
    fn test_stream_records_reach_output() {
        let (session, _) = session();
        feed(&session, "~\"Reading symbols from a.out...\\n\"");
        feed(&session, "&\"warning: no debug info\\n\"");

        let output = session.output();
        assert_eq!(output.len(), 2);
        assert_eq!(output[0].channel, OutputChannel::Console);
        assert_eq!(output[0].text, "Reading symbols from a.out...\n");
        assert_eq!(output[1].channel, OutputChannel::Log);
    }

    #[test]
    fn test_notifications_without_handlers_are_harmless() {
        let (session, sink) = session();
        feed(&session, "=thread-group-added,id=\"i1\"");
        feed(&session, "=thread-created,id=\"1\",group-id=\"i1\"");
        feed(&session, "=library-loaded,id=\"/lib/x86_64-linux-gnu/libc.so.6\"");
        assert!(sink.lines().is_empty());
        assert_eq!(session.state(), ExecState::Stopped);
    }
}
