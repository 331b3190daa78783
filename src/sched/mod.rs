//! Queries against the sched_ext subsystem.

use std::fs;
use std::io::{Error, ErrorKind, Result};
use std::thread;
use std::time::Duration;

use crate::clock::Timer;
use crate::proc::Child;

#[cfg(test)]
mod test;

const STATE_PATH: &str = "/sys/kernel/sched_ext/state";
const OPS_PATH: &str = "/sys/kernel/sched_ext/root/ops";

/// Interval at which [`wait_enabled`] re-reads the state.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Returns the name of the installed sched_ext scheduler, if any.
///
/// `None` covers both "disabled" and the transient "enabling" state;
/// we do not hold our breath for the latter.
pub fn installed() -> Result<Option<String>> {
    let state = fs::read_to_string(STATE_PATH)?;
    if !enabled(state.trim())? {
        return Ok(None);
    }
    let ops = fs::read_to_string(OPS_PATH)?;
    Ok(Some(ops.trim().to_string()))
}

fn enabled(state: &str) -> Result<bool> {
    match state {
        "disabled" | "enabling" => Ok(false),
        "enabled" => Ok(true),
        other => Err(Error::new(
            ErrorKind::InvalidData,
            format!("unexpected sched_ext state: {other}"),
        )),
    }
}

/// Startup gate: waits for `child` to install a scheduler.
///
/// Polls the sched_ext state at [`POLL_INTERVAL`] and returns the
/// scheduler name once it is enabled. Fails if the child exits first
/// or `timeout` passes.
pub fn wait_enabled(child: &mut Child, timeout: Duration) -> Result<String> {
    let timer = Timer::new();
    loop {
        if let Some(name) = installed()? {
            return Ok(name);
        }
        if !child.alive() {
            return Err(Error::other(format!(
                "scheduler exited with code {} before installing",
                child.exit_code()
            )));
        }
        if timer.elapsed() > timeout {
            return Err(Error::new(
                ErrorKind::TimedOut,
                "timed out waiting for a scheduler to install",
            ));
        }
        thread::sleep(POLL_INTERVAL);
    }
}
