fn main() {
    let b = std::thread::Builder::new().stack_size(2*1024*1024).spawn(|| {
        let ctx = sched_harness::workload::Context::with_capacity(1<<22).unwrap();
        println!("ok {}", ctx.workloads());
    }).unwrap();
    b.join().unwrap();
}
