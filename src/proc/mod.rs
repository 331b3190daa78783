//! Child process lifecycle.

use std::ffi::CString;
use std::io::{Error, ErrorKind, Read, Result};
use std::os::fd::AsRawFd;
use std::ptr::null;

use crate::ffi::syscall::{self, clone, execvp, pipe2, prctl_set_pdeathsig, waitpid};


/// A handle on a child process.
///
/// Used both to run harness code in another address space and to wrap
/// an external binary. The handle owns the pid: dropping it blocks
/// until the child is reaped, so a `Child` can never leak a zombie.
#[derive(Debug)]
pub struct Child {
    pid: Option<i32>,
    exit_code: Option<i32>,
}

impl Child {
    /// Starts a child that runs `f` and exits.
    ///
    /// The child is produced by a raw `clone(SIGCHLD | extra_flags)`,
    /// so it shares nothing with the parent beyond what was explicitly
    /// placed in shared mappings before the call. Once `f` completes
    /// the child exits with status 0 without unwinding or running
    /// destructors.
    pub fn run<F: FnOnce()>(f: F, extra_flags: u64) -> Result<Self> {
        let pid = unsafe { clone(libc::SIGCHLD as u64 | extra_flags) }?;
        if pid == 0 {
            f();
            unsafe { libc::_exit(0) };
        }
        Ok(Self {
            pid: Some(pid),
            exit_code: None,
        })
    }

    /// Starts an external command inside its own PID namespace.
    ///
    /// The direct child becomes the init of a fresh PID namespace and
    /// forks again; the grandchild execs `argv`. Anything the command
    /// spawns or daemonizes stays inside the namespace and dies with
    /// it, which makes teardown of a misbehaving scheduler reliable.
    ///
    /// Exec success and failure are disambiguated through a
    /// close-on-exec pipe: on success the write end vanishes with the
    /// exec and the parent sees EOF; on failure the errno arrives
    /// through the pipe. The namespace init reaps reparented orphans
    /// and exits with the grandchild's own exit status, or 255 if it
    /// was killed by a signal.
    pub fn spawn(argv: &[CString]) -> Result<Self> {
        assert!(!argv.is_empty());
        let (mut read, write) = pipe2(libc::O_CLOEXEC)?;
        let child = Self::run(
            || {
                unsafe { libc::close(read.as_raw_fd()) };
                exec_init(write.as_raw_fd(), argv);
            },
            libc::CLONE_NEWPID as u64,
        )?;
        drop(write);

        let mut buf = [0; 4];
        loop {
            match read.read(&mut buf) {
                // EOF: the pipe's write end died in the exec.
                Ok(0) => return Ok(child),
                Ok(_) => {
                    let errno = i32::from_ne_bytes(buf);
                    return Err(Error::from_raw_os_error(errno));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether the child is still running.
    pub fn alive(&mut self) -> bool {
        self.wait(false)
    }

    /// Reaps the child if it has exited. Returns whether it is still
    /// running; pass `block` to wait for the exit.
    pub fn wait(&mut self, block: bool) -> bool {
        let Some(pid) = self.pid else {
            return false;
        };
        let flags = if block { 0 } else { libc::WNOHANG };
        loop {
            match waitpid(pid, flags) {
                Ok((reaped, status)) if reaped == pid => {
                    if libc::WIFEXITED(status) {
                        self.pid = None;
                        self.exit_code = Some(libc::WEXITSTATUS(status));
                        return false;
                    }
                    if libc::WIFSIGNALED(status) {
                        self.pid = None;
                        self.exit_code = Some(-libc::WTERMSIG(status));
                        return false;
                    }
                    if !block {
                        return true;
                    }
                }
                Ok(_) => return syscall::kill(pid, 0).is_ok(),
                Err(e) if e.kind() == ErrorKind::Interrupted => (),
                // ECHILD and friends: nothing left to reap.
                Err(_) => {
                    self.pid = None;
                    return false;
                }
            }
        }
    }

    /// Sends a signal to the child.
    pub fn kill(&self, sig: i32) -> Result<()> {
        match self.pid {
            Some(pid) => syscall::kill(pid, sig),
            None => Ok(()),
        }
    }

    /// The exit code, once the child has been reaped. Negative values
    /// are the negated signal number for signal deaths.
    pub fn exit_code(&self) -> i32 {
        self.exit_code.unwrap_or(0)
    }

    pub fn pid(&self) -> Option<i32> {
        self.pid
    }
}

impl Drop for Child {
    fn drop(&mut self) {
        let running = self.wait(true);
        debug_assert!(!running);
    }
}

// Runs as pid 1 of the new namespace; never returns. Raw fds and
// `_exit` only: this runs on the borrowed parent stack, nothing here
// may unwind or run destructors.
fn exec_init(notify_fd: i32, argv: &[CString]) -> ! {
    fn report(notify_fd: i32, err: Error) -> ! {
        let errno = err.raw_os_error().unwrap_or(libc::EIO);
        let buf = errno.to_ne_bytes();
        unsafe {
            libc::write(notify_fd, buf.as_ptr() as _, buf.len());
            libc::_exit(1);
        }
    }

    // Tie the namespace's lifetime to the parent.
    if let Err(e) = prctl_set_pdeathsig(libc::SIGKILL) {
        report(notify_fd, e);
    }

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        report(notify_fd, Error::last_os_error());
    }
    if pid == 0 {
        // No PDEATHSIG needed here: when this namespace's init dies,
        // the kernel kills the whole namespace, daemonized or not.
        let mut ptrs: Vec<*const libc::c_char> = argv.iter().map(|a| a.as_ptr()).collect();
        ptrs.push(null());
        let err = execvp(&ptrs);
        report(notify_fd, err);
    }

    // The exec drops the write end through close-on-exec; drop it on
    // this side as well so the parent sees EOF either way.
    unsafe { libc::close(notify_fd) };

    // Reap everything; orphans in the namespace reparent to us. Exit
    // mirrors the original child once it goes.
    loop {
        if let Ok((reaped, status)) = waitpid(-1, 0) {
            if reaped == pid {
                if libc::WIFEXITED(status) {
                    unsafe { libc::_exit(libc::WEXITSTATUS(status)) };
                }
                if libc::WIFSIGNALED(status) {
                    unsafe { libc::_exit(255) };
                }
            }
        }
    }
}
