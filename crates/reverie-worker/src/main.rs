//! Worker entry point.
//!
//! Launched by the shell front end with a single argument: the loopback
//! port to connect back to. Runs the dispatch loop until the front end
//! closes the connection (normal exit) or a protocol violation occurs
//! (fatal exit; the front end restarts a fresh worker).

use std::{env, fs::File, net::TcpStream, process::ExitCode, sync::Mutex};

use anyhow::{Context, bail};
use reverie::{Channel, Dispatcher, Session};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    if let Err(err) = run() {
        error!("worker terminated: {err:#}");
        eprintln!("reverie-worker: {err:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run() -> anyhow::Result<()> {
    init_logging()?;

    let mut args = env::args().skip(1);
    let port: u16 = args
        .next()
        .context("usage: reverie-worker <port>")?
        .parse()
        .context("port must be an integer in 1..=65535")?;
    if args.next().is_some() {
        bail!("unexpected extra arguments; usage: reverie-worker <port>");
    }

    let stream = TcpStream::connect(("127.0.0.1", port))
        .with_context(|| format!("failed to connect to front end on port {port}"))?;
    stream.set_nodelay(true).ok();
    info!(port, "connected to front end");

    let session = Session::new().context("failed to boot the embedded interpreter")?;
    let mut dispatcher = Dispatcher::new(Channel::new(stream), session);
    dispatcher.run().context("dispatch loop failed")?;

    info!("connection closed by peer");
    Ok(())
}

/// Sends tracing output to the file named by `REVERIE_LOG`, if set.
///
/// The worker's stdout and stderr belong to executed user code, so logging
/// must never touch them; with no log file configured, tracing stays
/// uninitialized and every event is dropped.
fn init_logging() -> anyhow::Result<()> {
    let Some(path) = env::var_os("REVERIE_LOG") else {
        return Ok(());
    };
    let file = File::create(&path)
        .with_context(|| format!("failed to open log file {}", path.to_string_lossy()))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}
