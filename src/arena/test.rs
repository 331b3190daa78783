use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::{Arena, MemFd};
use crate::proc::Child;

#[test]
fn test_memfd_rounds_to_page() {
    let mem = MemFd::create("test", 1).unwrap();
    assert_eq!(mem.len() % *crate::ffi::PAGE_SIZE, 0);
    assert!(!mem.is_empty());
}

#[test]
fn test_alloc_aligned() {
    let arena = Arena::create("test", 1 << 16).unwrap();
    let _ = arena.alloc(AtomicU32::new(0)).unwrap();
    let wide = arena.alloc(AtomicU64::new(0)).unwrap();
    assert_eq!(wide.as_ptr() as usize % align_of::<AtomicU64>(), 0);
}

#[test]
fn test_alloc_values_independent() {
    let arena = Arena::create("test", 1 << 16).unwrap();
    let a = arena.alloc(AtomicU64::new(1)).unwrap();
    let b = arena.alloc(AtomicU64::new(2)).unwrap();
    a.store(10, Ordering::Relaxed);
    assert_eq!(a.load(Ordering::Relaxed), 10);
    assert_eq!(b.load(Ordering::Relaxed), 2);
    assert_ne!(a.as_ptr(), b.as_ptr());
}

#[test]
fn test_alloc_out_of_memory() {
    let arena = Arena::create("test", 1).unwrap();
    let page = arena.capacity();
    for _ in 0..page / size_of::<AtomicU64>() {
        arena.alloc(AtomicU64::new(0)).unwrap();
    }
    let err = arena.alloc(AtomicU64::new(0)).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::OutOfMemory);
}

#[test]
fn test_used_advances() {
    let arena = Arena::create("test", 1 << 16).unwrap();
    assert_eq!(arena.used(), 0);
    let _ = arena.alloc(AtomicU64::new(0)).unwrap();
    assert_eq!(arena.used(), size_of::<AtomicU64>());
}

#[test]
fn test_shared_across_fork() {
    let arena = Arena::create("test", 1 << 16).unwrap();
    let value = arena.alloc(AtomicU64::new(0)).unwrap();

    // The child sees the same object at the same address and its
    // store must be visible to the parent through the shared mapping.
    let mut child = Child::run(
        || {
            value.store(value.as_ptr() as u64, Ordering::SeqCst);
        },
        0,
    )
    .unwrap();
    child.wait(true);
    assert_eq!(child.exit_code(), 0);
    assert_eq!(value.load(Ordering::SeqCst), value.as_ptr() as u64);
}
