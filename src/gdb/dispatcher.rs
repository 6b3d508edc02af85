//! Record dispatcher
//!
//! Pulls classified records off the transport channel and runs each one on
//! a short-lived worker thread. A counting semaphore caps how many workers
//! exist at once; the dispatch loop blocks when the cap is reached.

use crate::gdb::types::Record;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const RECV_TIMEOUT: Duration = Duration::from_millis(50);
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Receiver of dispatched records
pub trait RecordHandler: Send + Sync + 'static {
    fn handle(&self, record: Record);

    /// Periodic housekeeping, called from the dispatch thread
    fn sweep(&self) {}
}

/// Counting semaphore bounding concurrent handler threads
pub struct HandlerPool {
    limit: usize,
    active: Mutex<usize>,
    changed: Condvar,
}

/// Slot in a [`HandlerPool`], released on drop
pub struct Permit {
    pool: Arc<HandlerPool>,
}

impl HandlerPool {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit: limit.max(1),
            active: Mutex::new(0),
            changed: Condvar::new(),
        })
    }

    /// Block until a slot is free and take it
    pub fn acquire(self: &Arc<Self>) -> Permit {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        while *active >= self.limit {
            active = self
                .changed
                .wait(active)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *active += 1;
        Permit {
            pool: Arc::clone(self),
        }
    }

    pub fn active(&self) -> usize {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Block until no handler is running
    pub fn wait_idle(&self) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let _idle = self
            .changed
            .wait_while(active, |n| *n > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut active = self
            .pool
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *active -= 1;
        self.pool.changed.notify_all();
    }
}

/// Owns the dispatch thread
pub struct Dispatcher {
    running: Arc<AtomicBool>,
    pool: Arc<HandlerPool>,
    thread: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn start(
        records: Receiver<Record>,
        handler: Arc<dyn RecordHandler>,
        max_handlers: usize,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let pool = HandlerPool::new(max_handlers);

        let thread = {
            let running = Arc::clone(&running);
            let pool = Arc::clone(&pool);
            thread::Builder::new()
                .name("gdbmi-dispatch".to_string())
                .spawn(move || dispatch_loop(records, handler, pool, running))?
        };

        Ok(Self {
            running,
            pool,
            thread: Some(thread),
        })
    }

    pub fn active_handlers(&self) -> usize {
        self.pool.active()
    }

    /// Stop taking records and wait for in-flight handlers to finish
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let active = self.pool.active();
        if active > 0 {
            debug!("Waiting for {} handlers to finish", active);
        }
        self.pool.wait_idle();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

fn dispatch_loop(
    records: Receiver<Record>,
    handler: Arc<dyn RecordHandler>,
    pool: Arc<HandlerPool>,
    running: Arc<AtomicBool>,
) {
    let mut last_sweep = Instant::now();

    while running.load(Ordering::SeqCst) {
        match records.recv_timeout(RECV_TIMEOUT) {
            Ok(record) => run_handler(record, &handler, &pool),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Record channel closed");
                break;
            }
        }

        if last_sweep.elapsed() >= SWEEP_INTERVAL {
            handler.sweep();
            last_sweep = Instant::now();
        }
    }

    info!("Dispatcher stopped");
}

fn run_handler(record: Record, handler: &Arc<dyn RecordHandler>, pool: &Arc<HandlerPool>) {
    let permit = pool.acquire();
    let worker = Arc::clone(handler);
    let fallback = record.clone();

    let spawned = thread::Builder::new()
        .name("gdbmi-handler".to_string())
        .spawn(move || {
            let _permit = permit;
            worker.handle(record);
        });

    if let Err(e) = spawned {
        warn!("Failed to spawn handler thread, running inline: {}", e);
        handler.handle(fallback);
    }
}
