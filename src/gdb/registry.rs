//! Callback registry
//!
//! Two tables behind one lock: one-shot handlers keyed by the token of the
//! command that expects the reply, and persistent handlers keyed by record
//! class (`stopped`, `breakpoint-created`, ...).

use crate::gdb::types::{Record, Token};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub type Callback = Arc<dyn Fn(&Record) + Send + Sync>;

/// Built-in reactions implemented by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Running,
    Stopped,
    /// Breakpoint table changed; re-list it
    BreakpointsChanged,
    BreakpointTable,
    LibraryLoaded,
    LibraryUnloaded,
    ThreadCreated,
    ThreadSelected,
    ThreadExited,
    ExecutableLoaded,
    FunctionSymbols,
    GlobalSymbols,
    Disassembly,
    CurrentPosition,
    RegisterNames,
    RegisterValues,
    StackFrames,
    StackVariables,
}

#[derive(Clone)]
pub enum Handler {
    Builtin(Builtin),
    Custom(Callback),
}

impl Handler {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        Handler::Custom(Arc::new(f))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Builtin(b) => f.debug_tuple("Builtin").field(b).finish(),
            Handler::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<Builtin> for Handler {
    fn from(b: Builtin) -> Self {
        Handler::Builtin(b)
    }
}

struct Pending {
    handler: Handler,
    command: String,
    sent_at: Instant,
}

#[derive(Default)]
struct Tables {
    pending: HashMap<Token, Pending>,
    classes: HashMap<String, Handler>,
}

/// Command that was dropped without a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredCommand {
    pub token: Token,
    pub command: String,
}

#[derive(Default)]
pub struct CallbackRegistry {
    tables: Mutex<Tables>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Expect a reply carrying `token`. The handler runs at most once.
    pub fn register_token(&self, token: Token, command: &str, handler: Handler) {
        self.tables().pending.insert(
            token,
            Pending {
                handler,
                command: command.to_string(),
                sent_at: Instant::now(),
            },
        );
    }

    /// Install a persistent handler for a record class, replacing any previous one
    pub fn register_class(&self, class: &str, handler: Handler) {
        self.tables().classes.insert(class.to_string(), handler);
    }

    pub fn class_handler(&self, class: &str) -> Option<Handler> {
        self.tables().classes.get(class).cloned()
    }

    /// Handler for a record: a pending token entry wins over the class table.
    /// A matched token entry is removed.
    pub fn lookup(&self, record: &Record) -> Option<Handler> {
        let mut tables = self.tables();
        if let Some(token) = record.token {
            if let Some(pending) = tables.pending.remove(&token) {
                return Some(pending.handler);
            }
        }
        tables.classes.get(&record.class).cloned()
    }

    /// Drop a pending entry without running it. Returns the command it belonged to.
    pub fn cancel(&self, token: Token) -> Option<String> {
        self.tables().pending.remove(&token).map(|p| p.command)
    }

    /// Remove pending entries older than `max_age`
    pub fn expire(&self, max_age: Duration) -> Vec<ExpiredCommand> {
        let mut tables = self.tables();
        let now = Instant::now();
        let stale: Vec<Token> = tables
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.sent_at) >= max_age)
            .map(|(token, _)| *token)
            .collect();

        stale
            .into_iter()
            .filter_map(|token| {
                tables.pending.remove(&token).map(|p| ExpiredCommand {
                    token,
                    command: p.command,
                })
            })
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.tables().pending.len()
    }

    pub fn is_pending(&self, token: Token) -> bool {
        self.tables().pending.contains_key(&token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdb::types::RecordType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(token: Option<Token>, class: &str) -> Record {
        Record {
            kind: RecordType::Result,
            token,
            class: class.to_string(),
            data: String::new(),
        }
    }

    #[test]
    fn test_token_handler_runs_once() {
        let registry = CallbackRegistry::new();
        registry.register_token(7, "-data-list-register-names", Builtin::RegisterNames.into());

        let first = registry.lookup(&record(Some(7), "done"));
        assert!(matches!(first, Some(Handler::Builtin(Builtin::RegisterNames))));
        assert!(registry.lookup(&record(Some(7), "done")).is_none());
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_token_wins_over_class() {
        let registry = CallbackRegistry::new();
        registry.register_class("running", Builtin::Running.into());
        registry.register_token(9, "-exec-continue", Builtin::StackFrames.into());

        let handler = registry.lookup(&record(Some(9), "running"));
        assert!(matches!(handler, Some(Handler::Builtin(Builtin::StackFrames))));

        // Token consumed; the class table answers now
        let handler = registry.lookup(&record(Some(9), "running"));
        assert!(matches!(handler, Some(Handler::Builtin(Builtin::Running))));
    }

    #[test]
    fn test_class_handler_is_persistent() {
        let registry = CallbackRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        registry.register_class(
            "stopped",
            Handler::custom(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        for _ in 0..3 {
            if let Some(Handler::Custom(f)) = registry.lookup(&record(None, "stopped")) {
                f(&record(None, "stopped"));
            }
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unmatched_record() {
        let registry = CallbackRegistry::new();
        assert!(registry.lookup(&record(Some(1), "done")).is_none());
        assert!(registry.lookup(&record(None, "thread-group-added")).is_none());
    }

    #[test]
    fn test_cancel_and_expire() {
        let registry = CallbackRegistry::new();
        registry.register_token(1, "-break-list", Builtin::BreakpointTable.into());
        registry.register_token(2, "-stack-list-frames", Builtin::StackFrames.into());

        assert_eq!(registry.cancel(1), Some("-break-list".to_string()));
        assert_eq!(registry.cancel(1), None);

        assert!(registry.expire(Duration::from_secs(60)).is_empty());
        let expired = registry.expire(Duration::ZERO);
        assert_eq!(
            expired,
            vec![ExpiredCommand {
                token: 2,
                command: "-stack-list-frames".to_string()
            }]
        );
        assert!(!registry.is_pending(2));
    }
}
