//! Debugger-control core for GDB/MI front-ends.
//!
//! Launches GDB as a subprocess, correlates its asynchronous MI replies with
//! the commands that caused them, and keeps thread-safe snapshots of the
//! inferior (symbols, disassembly, registers, stack, breakpoints) for a
//! presentation layer to read.

pub mod gdb;
