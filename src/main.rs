//! Headless GDB/MI front-end
//!
//! Starts GDB, reads one command per line from stdin and prints a JSON
//! object to stdout for every change the core reports. Diagnostics go to
//! stderr so stdout stays machine-readable.
//!
//! Usage:
//!   gdbmi-frontend [--gdb PATH] [--flavor FLAVOR] [EXE]
//!   echo -e "break main\nrun\nregs\nquit" | gdbmi-frontend ./a.out

mod frontend;

use anyhow::{Context, Result};
use clap::Parser;
use frontend::{FrontendCommand, Renderer};
use gdbmi_frontend::gdb::{GdbClient, GdbConfig, UpdateKind};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gdbmi-frontend", version, about = "Drive GDB over its machine interface")]
struct Cli {
    /// Debugger binary
    #[arg(long, default_value = "gdb")]
    gdb: String,

    /// Disassembly flavor passed to the debugger
    #[arg(long, default_value = "intel")]
    flavor: String,

    /// Maximum number of records handled concurrently
    #[arg(long, default_value_t = 32)]
    max_handlers: usize,

    /// Seconds before an unanswered command is dropped (0 keeps it forever)
    #[arg(long, default_value_t = 30)]
    pending_timeout: u64,

    /// Executable to load on startup
    exe: Option<PathBuf>,
}

impl Cli {
    fn config(&self) -> GdbConfig {
        GdbConfig {
            gdb_path: self.gdb.clone(),
            disassembly_flavor: self.flavor.clone(),
            max_handlers: self.max_handlers,
            pending_timeout: (self.pending_timeout > 0)
                .then(|| Duration::from_secs(self.pending_timeout)),
            ..GdbConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("Starting gdbmi-frontend v{}", env!("CARGO_PKG_VERSION"));

    let (tx, mut rx) = mpsc::unbounded_channel::<UpdateKind>();
    let mut client = GdbClient::new(cli.config());
    client.set_notifier(move |kind| {
        let _ = tx.send(kind);
    });

    let session = client.start().context("failed to start debugger")?;
    if let Some(exe) = &cli.exe {
        session
            .load_executable(&exe.to_string_lossy())
            .context("failed to load executable")?;
    }

    let printer = {
        let session = session.clone();
        tokio::spawn(async move {
            let mut renderer = Renderer::new();
            while let Some(kind) = rx.recv().await {
                println!("{}", renderer.render(&session, kind));
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        debug!("Received: {}", line);

        match FrontendCommand::parse(line) {
            Ok(FrontendCommand::Quit) => break,
            Ok(command) => match command.apply(&session) {
                Ok(Some(value)) => println!("{}", value),
                Ok(None) => {}
                Err(e) => error!("'{}' failed: {}", line, e),
            },
            Err(e) => warn!("{}", e),
        }

        if client.has_exited() {
            warn!("Debugger exited");
            break;
        }
    }

    client.stop()?;
    // Dropping the client releases the notifier and ends the printer
    drop(client);
    let _ = printer.await;

    info!("gdbmi-frontend shutting down");
    Ok(())
}
