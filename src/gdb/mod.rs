//! GDB (GNU Debugger) MI Interface Module
//!
//! Leaf-first: `parser` and `transport` know nothing of sessions, `registry`
//! and `dispatcher` move records to handlers, and `session` ties the caches,
//! the state machine and the command facade together.

pub mod client;
pub mod commands;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod parser;
pub mod registry;
pub mod session;
pub mod state;
pub mod token;
pub mod transport;
pub mod types;

pub use client::GdbClient;
pub use error::{GdbError, Result};
pub use registry::Handler;
pub use session::Session;
pub use types::*;
