//! `foreman stop` handler: signal the running daemon.

use anyhow::{bail, Context, Result};

use crate::cli::commands::PID_FILE;

#[cfg(unix)]
pub fn handle_stop() -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = match std::fs::read_to_string(PID_FILE) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            bail!("no pid file at {PID_FILE}; is the orchestrator running?")
        }
        Err(e) => return Err(e).context("failed to read pid file"),
    };
    let pid: i32 = raw
        .trim()
        .parse()
        .with_context(|| format!("pid file {PID_FILE} is corrupt"))?;

    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => {
            println!("Sent SIGTERM to orchestrator (pid {pid})");
            Ok(())
        }
        Err(nix::errno::Errno::ESRCH) => {
            // Stale pid file from a crashed run.
            let _ = std::fs::remove_file(PID_FILE);
            bail!("process {pid} is not running; removed stale pid file")
        }
        Err(e) => Err(e).context("failed to signal orchestrator"),
    }
}

#[cfg(not(unix))]
pub fn handle_stop() -> Result<()> {
    bail!("foreman stop is only supported on unix platforms")
}
