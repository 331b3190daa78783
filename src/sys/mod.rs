//! CPU topology discovered from sysfs.
//!
//! The hierarchy mirrors what the kernel exports per logical CPU:
//! package (here: [`Node`]) → die ([`CoreComplex`]) → physical core
//! ([`Core`]) → hyperthread. Every level implements [`CpuSet`], so
//! "run this on core 3" and "migrate me to node 0" are the same
//! operation with a differently derived mask.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Error, ErrorKind, Result};
use std::mem::zeroed;
use std::path::Path;

use crate::ffi::syscall::{sched_getaffinity, sched_setaffinity};


const CPU_SYSFS: &str = "/sys/devices/system/cpu";

/// A set of logical CPUs in `sched_setaffinity` form.
#[derive(Clone, Copy)]
pub struct CpuMask(libc::cpu_set_t);

impl CpuMask {
    pub fn new() -> Self {
        // All-zero is the empty set.
        Self(unsafe { zeroed() })
    }

    pub fn set(&mut self, cpu: u32) {
        unsafe { libc::CPU_SET(cpu as usize, &mut self.0) };
    }

    pub fn contains(&self, cpu: u32) -> bool {
        unsafe { libc::CPU_ISSET(cpu as usize, &self.0) }
    }

    pub fn count(&self) -> u32 {
        unsafe { libc::CPU_COUNT(&self.0) as u32 }
    }

    pub fn merge(&mut self, other: &CpuMask) {
        for cpu in 0..libc::CPU_SETSIZE as u32 {
            if other.contains(cpu) {
                self.set(cpu);
            }
        }
    }

    fn as_raw(&self) -> &libc::cpu_set_t {
        &self.0
    }
}

impl Default for CpuMask {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything with a CPU mask the current thread can be bound to.
pub trait CpuSet {
    fn mask(&self) -> CpuMask;

    /// Runs `f` with the calling thread's affinity restricted to this
    /// set, then restores the original affinity.
    fn bind<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let orig = sched_getaffinity()?;
        sched_setaffinity(self.mask().as_raw())?;
        let result = f();
        sched_setaffinity(&orig)?;
        Ok(result)
    }

    /// Migrates the calling thread onto this set.
    ///
    /// When this returns the thread may already have been moved
    /// elsewhere, but it has executed on the set at least briefly.
    fn migrate(&self) -> Result<()> {
        self.bind(|| ())
    }
}

/// One logical CPU.
#[derive(Clone, Debug)]
pub struct Hyperthread {
    id: u32,
}

impl Hyperthread {
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl CpuSet for Hyperthread {
    fn mask(&self) -> CpuMask {
        let mut mask = CpuMask::new();
        mask.set(self.id);
        mask
    }
}

/// A physical core and its hyperthreads.
#[derive(Clone, Debug)]
pub struct Core {
    id: u32,
    hyperthreads: Vec<Hyperthread>,
}

impl Core {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn hyperthreads(&self) -> &[Hyperthread] {
        &self.hyperthreads
    }
}

impl CpuSet for Core {
    fn mask(&self) -> CpuMask {
        let mut mask = CpuMask::new();
        for ht in &self.hyperthreads {
            mask.merge(&ht.mask());
        }
        mask
    }
}

/// A die: the cores sharing one slice of the uncore.
#[derive(Clone, Debug)]
pub struct CoreComplex {
    id: u32,
    cores: Vec<Core>,
}

impl CoreComplex {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn cores(&self) -> &[Core] {
        &self.cores
    }
}

impl CpuSet for CoreComplex {
    fn mask(&self) -> CpuMask {
        let mut mask = CpuMask::new();
        for core in &self.cores {
            mask.merge(&core.mask());
        }
        mask
    }
}

/// A package.
#[derive(Clone, Debug)]
pub struct Node {
    id: u32,
    complexes: Vec<CoreComplex>,
}

impl Node {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn complexes(&self) -> &[CoreComplex] {
        &self.complexes
    }

    pub fn cores(&self) -> impl Iterator<Item = &Core> {
        self.complexes.iter().flat_map(|c| c.cores().iter())
    }
}

impl CpuSet for Node {
    fn mask(&self) -> CpuMask {
        let mut mask = CpuMask::new();
        for complex in &self.complexes {
            mask.merge(&complex.mask());
        }
        mask
    }
}

/// The whole machine.
pub struct System {
    nodes: Vec<Node>,
    cores: Vec<Core>,
    logical_cpus: usize,
}

impl System {
    /// Enumerates the topology from sysfs.
    pub fn load() -> Result<Self> {
        let mut cpus = Vec::new();
        for entry in fs::read_dir(CPU_SYSFS)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_prefix("cpu"))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            let topology = entry.path().join("topology");
            // Offline CPUs have no topology directory.
            if topology.is_dir() {
                cpus.push((id, topology));
            }
        }
        if cpus.is_empty() {
            return Err(Error::new(
                ErrorKind::NotFound,
                "no online CPUs found in sysfs",
            ));
        }

        // package id → die id → core id → hyperthreads
        let mut packages: BTreeMap<u32, BTreeMap<u32, BTreeMap<u32, Vec<u32>>>> = BTreeMap::new();
        for (id, topology) in cpus {
            let package = read_id(&topology.join("physical_package_id"))?;
            // Older kernels predate die_id; treat them as one die.
            let die = read_id(&topology.join("die_id")).unwrap_or(0);
            let core = read_id(&topology.join("core_id"))?;
            packages
                .entry(package)
                .or_default()
                .entry(die)
                .or_default()
                .entry(core)
                .or_default()
                .push(id);
        }

        let mut logical_cpus = 0;
        let nodes = packages
            .into_iter()
            .map(|(id, dies)| Node {
                id,
                complexes: dies
                    .into_iter()
                    .map(|(id, cores)| CoreComplex {
                        id,
                        cores: cores
                            .into_iter()
                            .map(|(id, threads)| {
                                logical_cpus += threads.len();
                                Core {
                                    id,
                                    hyperthreads: threads
                                        .into_iter()
                                        .map(|id| Hyperthread { id })
                                        .collect(),
                                }
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect::<Vec<_>>();

        let mut cores: Vec<Core> = nodes.iter().flat_map(Node::cores).cloned().collect();
        cores.sort_by_key(Core::id);
        Ok(Self {
            nodes,
            cores,
            logical_cpus,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All physical cores, across every node, in id order.
    pub fn cores(&self) -> &[Core] {
        &self.cores
    }

    /// The number of logical CPUs, i.e. hardware threads. Distinct
    /// from the physical core count whenever SMT is on.
    pub fn logical_cpus(&self) -> usize {
        self.logical_cpus
    }

    /// Maps a logical CPU back to its physical core, as an index into
    /// [`cores`][Self::cores]. Core ids repeat across packages, the
    /// index does not.
    pub fn physical_core(&self, cpu: u32) -> Option<usize> {
        self.cores
            .iter()
            .position(|core| core.hyperthreads.iter().any(|ht| ht.id == cpu))
    }
}

impl CpuSet for System {
    fn mask(&self) -> CpuMask {
        let mut mask = CpuMask::new();
        for node in &self.nodes {
            mask.merge(&node.mask());
        }
        mask
    }
}

impl std::fmt::Display for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} node(s), {} core(s), {} logical cpu(s)",
            self.nodes.len(),
            self.cores.len(),
            self.logical_cpus
        )
    }
}

fn read_id(path: &Path) -> Result<u32> {
    fs::read_to_string(path)?
        .trim()
        .parse()
        .map_err(Error::other)
}
