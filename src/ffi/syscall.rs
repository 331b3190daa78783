use std::ffi::CStr;
use std::fs::File;
use std::io::{Error, Result};
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, FromRawFd};
use std::ptr::null;
use std::sync::atomic::AtomicU32;

pub fn memfd_create(name: &CStr, flags: u32) -> Result<File> {
    let fd = unsafe { libc::memfd_create(name.as_ptr(), flags) };
    if fd != -1 {
        Ok(unsafe { File::from_raw_fd(fd) })
    } else {
        Err(Error::last_os_error())
    }
}

pub fn ftruncate(file: &File, len: usize) -> Result<()> {
    let result = unsafe { libc::ftruncate(file.as_raw_fd(), len as _) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub unsafe fn mmap<T>(
    ptr: *mut (),
    len: usize,
    prot: i32,
    flags: i32,
    file: &File,
    offset: i64,
) -> Result<*mut T> {
    let ptr = libc::mmap(ptr as _, len, prot, flags, file.as_raw_fd(), offset);
    if ptr != libc::MAP_FAILED {
        Ok(ptr as _)
    } else {
        Err(Error::last_os_error())
    }
}

pub unsafe fn munmap<T>(ptr: *mut T, len: usize) -> Result<()> {
    let result = libc::munmap(ptr as _, len);
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub fn pipe2(flags: i32) -> Result<(File, File)> {
    let mut fds = [0; 2];
    let result = unsafe { libc::pipe2(fds.as_mut_ptr(), flags) };
    if result != -1 {
        let read = unsafe { File::from_raw_fd(fds[0]) };
        let write = unsafe { File::from_raw_fd(fds[1]) };
        Ok((read, write))
    } else {
        Err(Error::last_os_error())
    }
}

// The raw syscall takes no child stack, so both sides keep running on
// the caller's stack like `fork`. Trailing pointer arguments are unused
// in that mode and zero on every architecture's argument order.
pub unsafe fn clone(flags: u64) -> Result<i32> {
    let result = libc::syscall(libc::SYS_clone, flags, 0usize, 0usize, 0usize, 0usize);
    if result != -1 {
        Ok(result as _)
    } else {
        Err(Error::last_os_error())
    }
}

pub fn futex_wait(word: &AtomicU32, expected: u32) -> Result<()> {
    let result = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT,
            expected,
            null::<libc::timespec>(),
            null::<u32>(),
            0,
        )
    };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub fn futex_wake(word: &AtomicU32, count: u32) -> Result<i32> {
    let result = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE,
            count,
            null::<libc::timespec>(),
            null::<u32>(),
            0,
        )
    };
    if result != -1 {
        Ok(result as _)
    } else {
        Err(Error::last_os_error())
    }
}

pub fn waitpid(pid: i32, flags: i32) -> Result<(i32, i32)> {
    let mut status = 0;
    let result = unsafe { libc::waitpid(pid, &mut status, flags) };
    if result != -1 {
        Ok((result, status))
    } else {
        Err(Error::last_os_error())
    }
}

pub fn kill(pid: i32, sig: i32) -> Result<()> {
    let result = unsafe { libc::kill(pid, sig) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub fn prctl_set_pdeathsig(sig: i32) -> Result<()> {
    let result = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, sig, 0, 0, 0) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub fn prctl_set_name(name: &CStr) -> Result<()> {
    let result = unsafe { libc::prctl(libc::PR_SET_NAME, name.as_ptr(), 0, 0, 0) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

// Only ever returns an error; on success the image is replaced.
pub fn execvp(argv: &[*const libc::c_char]) -> Error {
    unsafe { libc::execvp(argv[0], argv.as_ptr()) };
    Error::last_os_error()
}

pub fn sched_setscheduler(pid: i32, policy: i32, priority: i32) -> Result<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let result = unsafe { libc::sched_setscheduler(pid, policy, &param) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub fn sched_getaffinity() -> Result<libc::cpu_set_t> {
    let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed();
    let result =
        unsafe { libc::sched_getaffinity(0, size_of::<libc::cpu_set_t>(), set.as_mut_ptr()) };
    if result != -1 {
        Ok(unsafe { set.assume_init() })
    } else {
        Err(Error::last_os_error())
    }
}

pub fn sched_setaffinity(set: &libc::cpu_set_t) -> Result<()> {
    let result = unsafe { libc::sched_setaffinity(0, size_of::<libc::cpu_set_t>(), set) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub fn current_cpu() -> Result<u32> {
    let result = unsafe { libc::sched_getcpu() };
    if result != -1 {
        Ok(result as _)
    } else {
        Err(Error::last_os_error())
    }
}

pub fn gettid() -> i32 {
    // Always succeeds per the man page.
    unsafe { libc::syscall(libc::SYS_gettid) as _ }
}

pub fn clock_monotonic_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // CLOCK_MONOTONIC only fails for an invalid clock id.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}
