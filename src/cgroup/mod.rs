//! Scoped control groups.

use std::fs::{self, OpenOptions};
use std::io::{Error, ErrorKind, Result, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::ffi::syscall::gettid;


const CGROUP_MOUNT: &str = "/sys/fs/cgroup";

/// A uniquely named cgroup below the caller's own, removed on drop.
///
/// Tasks join through [`enter`][CgroupScope::enter]. When the scope is
/// dropped, every task still inside is migrated back to the parent
/// cgroup before the directory is deleted, so no task is ever left
/// homed in a vanishing group.
pub struct CgroupScope {
    path: PathBuf,
}

impl CgroupScope {
    /// Creates a fresh cgroup under the current process's cgroup.
    pub fn create() -> Result<Self> {
        let current = current_cgroup()?;
        let name = format!("sched-harness-{}", Uuid::new_v4());
        let path = Path::new(CGROUP_MOUNT)
            .join(current.trim_start_matches('/'))
            .join(name);
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Moves the calling task into this cgroup.
    pub fn enter(&self) -> Result<()> {
        let mut tasks = OpenOptions::new()
            .append(true)
            .open(self.path.join("tasks"))?;
        writeln!(tasks, "{}", gettid())
    }
}

impl Drop for CgroupScope {
    fn drop(&mut self) {
        // Hand every remaining inhabitant back to the parent. A task
        // may have exited between the read and the write, so failures
        // on individual migrations are expected and ignored.
        if let Some(parent) = self.path.parent() {
            if let (Ok(tasks), Ok(mut parent_tasks)) = (
                fs::read_to_string(self.path.join("tasks")),
                OpenOptions::new().append(true).open(parent.join("tasks")),
            ) {
                for tid in tasks.lines() {
                    let _ = writeln!(parent_tasks, "{tid}");
                }
            }
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            log::warn!("failed to remove cgroup {}: {e}", self.path.display());
        }
    }
}

/// Resolves the calling process's cgroup path from procfs.
///
/// Lines look like `hierarchy-id:controllers:path`; the path is the
/// last colon-delimited field. On a cgroup v2 host there is a single
/// `0::/...` line.
fn current_cgroup() -> Result<String> {
    let contents = fs::read_to_string("/proc/self/cgroup")?;
    parse_cgroup(&contents)
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "unable to determine current cgroup"))
}

fn parse_cgroup(contents: &str) -> Option<String> {
    contents
        .lines()
        .find_map(|line| line.rsplit_once(':').map(|(_, path)| path.to_string()))
}
