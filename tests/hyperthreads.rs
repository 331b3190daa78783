//! Placement scenario: spinners jammed onto one core must spread back
//! out across physical cores, not just logical CPUs.

use std::sync::atomic::Ordering;

use sched_harness::bench::Converge;
use sched_harness::sys::{CpuSet, System};
use sched_harness::workload::{Context, Spinner, WorkloadOpts};

// Requires root.
#[test]
#[ignore]
fn spinners_spread_over_physical_cores() {
    let system = System::load().unwrap();
    let cores = system.cores().len();
    if cores < 2 {
        return;
    }

    let mut ctx = Context::create().unwrap();
    let mut spinners = Vec::with_capacity(cores);
    for _ in 0..cores {
        let spinner = Spinner::new(&ctx).unwrap();
        spinners.push(spinner);
        let running = ctx.running_handle();
        ctx.add_with(
            WorkloadOpts {
                sched_ext: false,
                ..WorkloadOpts::default()
            },
            move || {
                // Start pinned to the first physical core, then let
                // the scheduler spread us out.
                let system = System::load().map_err(std::io::Error::other)?;
                system.cores()[0].migrate()?;
                while running.load(Ordering::Acquire) {
                    spinner.spin()?;
                }
                Ok(())
            },
        )
        .unwrap();
    }

    let value = Converge::default()
        .converge(
            &mut ctx,
            || {
                let mut seen = vec![false; cores];
                for spinner in &spinners {
                    if let Some(core) = system.physical_core(spinner.last_cpu()) {
                        seen[core] = true;
                    }
                }
                seen.iter().filter(|&&s| s).count() as f64 / cores as f64
            },
            0.95,
        )
        .unwrap();
    assert!(value >= 0.95, "spinners occupied only {value} of cores");
}
