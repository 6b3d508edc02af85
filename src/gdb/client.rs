//! GDB Client Implementation
//!
//! Owns the debugger process and the two background threads (reader and
//! dispatcher) for the lifetime of one session.

use crate::gdb::dispatcher::{Dispatcher, RecordHandler};
use crate::gdb::error::{GdbError, Result};
use crate::gdb::session::{Notifier, Session};
use crate::gdb::transport::{self, read_records};
use crate::gdb::types::{GdbConfig, UpdateKind};
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const EXIT_GRACE: Duration = Duration::from_secs(2);

/// GDB Client for managing debugging sessions
pub struct GdbClient {
    config: GdbConfig,
    notifier: Option<Notifier>,
    session: Option<Arc<Session>>,
    process: Option<Child>,
    reader_running: Arc<AtomicBool>,
    reader_handle: Option<JoinHandle<()>>,
    dispatcher: Option<Dispatcher>,
}

impl GdbClient {
    /// Create a new GDB client with the given configuration
    pub fn new(config: GdbConfig) -> Self {
        Self {
            config,
            notifier: None,
            session: None,
            process: None,
            reader_running: Arc::new(AtomicBool::new(false)),
            reader_handle: None,
            dispatcher: None,
        }
    }

    pub fn config(&self) -> &GdbConfig {
        &self.config
    }

    /// Set the change-notification callback. Applies to the running session
    /// and to every session started later.
    pub fn set_notifier<F>(&mut self, notifier: F)
    where
        F: Fn(UpdateKind) + Send + Sync + 'static,
    {
        let notifier: Notifier = Arc::new(notifier);
        if let Some(session) = &self.session {
            let forward = Arc::clone(&notifier);
            session.set_notifier(move |kind| forward(kind));
        }
        self.notifier = Some(notifier);
    }

    /// Start the GDB process
    pub fn start(&mut self) -> Result<Arc<Session>> {
        if self.process.is_some() {
            return Err(GdbError::AlreadyRunning);
        }

        info!("Starting GDB: {}", self.config.gdb_path);
        let spawned = transport::spawn(&self.config)?;
        self.process = Some(spawned.child);

        let session = Session::new(spawned.sink, &self.config);
        if let Some(notifier) = &self.notifier {
            let forward = Arc::clone(notifier);
            session.set_notifier(move |kind| forward(kind));
        }
        self.session = Some(Arc::clone(&session));

        if let Err(e) = self.start_threads(spawned.output, &session) {
            self.shutdown();
            return Err(e);
        }

        // Give the child time to exec before the first command
        thread::sleep(self.config.startup_delay);
        session.configure()?;

        info!("GDB started successfully");
        Ok(session)
    }

    fn start_threads(&mut self, output: os_pipe::PipeReader, session: &Arc<Session>) -> Result<()> {
        let (tx, rx) = mpsc::channel();

        self.reader_running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.reader_running);
        let reader = thread::Builder::new()
            .name("gdbmi-reader".to_string())
            .spawn(move || {
                read_records(output, tx, running);
                info!("GDB output reader stopped");
            })
            .map_err(|source| GdbError::Thread {
                name: "reader",
                source,
            })?;
        self.reader_handle = Some(reader);

        let handler: Arc<dyn RecordHandler> = Arc::clone(session) as Arc<dyn RecordHandler>;
        let dispatcher = Dispatcher::start(rx, handler, self.config.max_handlers).map_err(
            |source| GdbError::Thread {
                name: "dispatcher",
                source,
            },
        )?;
        self.dispatcher = Some(dispatcher);
        Ok(())
    }

    /// Session of the running debugger
    pub fn session(&self) -> Result<&Arc<Session>> {
        self.session.as_ref().ok_or(GdbError::NotRunning)
    }

    /// Check if GDB is running
    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    /// True once the debugger process has exited on its own
    pub fn has_exited(&mut self) -> bool {
        match self.process.as_mut() {
            Some(process) => matches!(process.try_wait(), Ok(Some(_))),
            None => true,
        }
    }

    /// Stop the GDB process
    pub fn stop(&mut self) -> Result<()> {
        if self.process.is_none() {
            return Ok(());
        }

        if let Some(session) = &self.session {
            if let Err(e) = session.request_exit() {
                debug!("Could not send -gdb-exit: {}", e);
            }
        }
        self.shutdown();
        info!("GDB stopped");
        Ok(())
    }

    /// Reap the child, then stop the reader and drain the dispatcher
    fn shutdown(&mut self) {
        if let Some(mut process) = self.process.take() {
            let deadline = Instant::now() + EXIT_GRACE;
            loop {
                match process.try_wait() {
                    Ok(Some(status)) => {
                        debug!("GDB exited with {}", status);
                        break;
                    }
                    Ok(None) if Instant::now() < deadline => {
                        thread::sleep(Duration::from_millis(20))
                    }
                    Ok(None) => {
                        warn!("GDB did not exit in time, killing it");
                        let _ = process.kill();
                        let _ = process.wait();
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to wait for GDB: {}", e);
                        let _ = process.kill();
                        break;
                    }
                }
            }
        }

        self.reader_running.store(false, Ordering::SeqCst);
        if let Some(reader) = self.reader_handle.take() {
            let _ = reader.join();
        }
        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.stop();
        }
        if let Some(session) = self.session.take() {
            session.clear_notifier();
        }
    }
}

impl Drop for GdbClient {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_requires_start() {
        let client = GdbClient::new(GdbConfig::default());
        assert!(!client.is_running());
        assert!(matches!(client.session(), Err(GdbError::NotRunning)));
    }

    #[test]
    fn test_spawn_failure() {
        let mut client = GdbClient::new(GdbConfig {
            gdb_path: "/nonexistent/gdb-binary".to_string(),
            ..GdbConfig::default()
        });
        assert!(matches!(client.start(), Err(GdbError::Spawn { .. })));
        assert!(!client.is_running());
    }

    #[test]
    fn test_stop_without_start() {
        let mut client = GdbClient::new(GdbConfig::default());
        assert!(client.stop().is_ok());
    }
}
