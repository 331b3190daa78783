//! Launcher: installs a scheduler safely, then runs a test command.
//!
//! The scheduler binary is spawned inside its own PID namespace so
//! that everything it forks or daemonizes dies with it. Once the
//! kernel reports the scheduler enabled, the test command runs; its
//! exit status becomes ours.

use std::ffi::CString;
use std::io::Result;
use std::process::{self, Command};
use std::time::Duration;

use clap::Parser;
use sched_harness::proc::Child;
use sched_harness::sched;

#[derive(Parser)]
#[command(
    name = "sched-harness",
    about = "Drive scheduler tests against a freshly installed sched_ext scheduler"
)]
struct Args {
    /// Seconds to wait for the scheduler to install.
    #[arg(long, default_value_t = 30.0)]
    timeout: f64,

    /// Scheduler command to install (binary and arguments).
    #[arg(required = true, num_args = 1..)]
    scheduler: Vec<String>,

    /// Test command to run once the scheduler is up.
    #[arg(last = true)]
    command: Vec<String>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<i32> {
    if unsafe { libc::geteuid() } != 0 {
        eprintln!("error: must run as root to install a scheduler");
        return Ok(1);
    }

    // Refuse to fight over the machine with an existing scheduler.
    if let Some(name) = sched::installed()? {
        eprintln!("error: scheduler already installed: {name}");
        return Ok(1);
    }

    let argv = args
        .scheduler
        .iter()
        .map(|a| CString::new(a.as_str()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(std::io::Error::other)?;
    log::info!("spawning scheduler: {:?}", args.scheduler);
    let mut child = Child::spawn(&argv)?;

    let timeout = Duration::from_secs_f64(args.timeout);
    let name = sched::wait_enabled(&mut child, timeout)?;
    log::info!("scheduler installed: {name}");

    let code = if args.command.is_empty() {
        0
    } else {
        let status = Command::new(&args.command[0])
            .args(&args.command[1..])
            .status()?;
        status.code().unwrap_or(1)
    };

    // Killing the namespace init tears down the whole subtree; the
    // drop of `child` reaps it.
    let _ = child.kill(libc::SIGKILL);
    Ok(code)
}
