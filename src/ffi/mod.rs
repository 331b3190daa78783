use std::sync::LazyLock;

pub mod syscall;

// https://github.com/torvalds/linux/blob/v6.12/include/uapi/linux/sched.h#L118
pub const SCHED_EXT: i32 = 7;

pub static PAGE_SIZE: LazyLock<usize> =
    LazyLock::new(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize });
