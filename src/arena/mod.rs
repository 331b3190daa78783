//! File-backed shared memory and the bump arena that lives inside it.
//!
//! Every synchronization primitive the harness hands to a workload is
//! constructed inside an [`Arena`], a linear allocator over a
//! `memfd_create` + `mmap(MAP_SHARED)` region. Objects are built in
//! place, never move and are never dropped, so the address returned by
//! [`Arena::alloc`] is identical in the parent and in every child
//! forked after the mapping was established. That stable identity is
//! what lets a futex word or an atomic stamp written on one side be
//! observed on the other.

use std::cell::Cell;
use std::ffi::CString;
use std::fs::File;
use std::io::{Error, ErrorKind, Result};
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize};

use crate::ffi::syscall::{ftruncate, memfd_create, mmap, munmap};
use crate::ffi::PAGE_SIZE;

#[cfg(test)]
mod test;

/// Marker for types that may be constructed inside the arena.
///
/// # Safety
///
/// Implementors must be self-contained plain data: interior mutability
/// only through atomics, no pointers to memory outside the arena, and
/// no owned resources (the arena never runs destructors). Violating
/// this leaks resources at best and corrupts a sibling process at
/// worst.
pub unsafe trait ArenaSafe: Send + Sync {}

unsafe impl ArenaSafe for AtomicBool {}
unsafe impl ArenaSafe for AtomicU32 {}
unsafe impl ArenaSafe for AtomicU64 {}
unsafe impl ArenaSafe for AtomicI32 {}
unsafe impl ArenaSafe for AtomicUsize {}

/// A pointer to an arena-resident object.
///
/// `Shared` is `Copy` and crosses `fork` freely: the mapping is
/// `MAP_SHARED`, so the same address refers to the same object in every
/// process. The pointee is valid until the owning arena is unmapped,
/// which the harness only does after all children are reaped.
#[derive(Debug)]
pub struct Shared<T>(NonNull<T>);

impl<T> Shared<T> {
    /// The raw address, identical in every process sharing the arena.
    pub fn as_ptr(&self) -> *const T {
        self.0.as_ptr()
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Shared<T> {}

impl<T: ArenaSafe> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Valid for the lifetime of the arena, see above.
        unsafe { self.0.as_ref() }
    }
}

// The pointee is ArenaSafe and therefore Sync; the pointer itself
// carries no ownership.
unsafe impl<T: ArenaSafe> Send for Shared<T> {}
unsafe impl<T: ArenaSafe> Sync for Shared<T> {}

/// An anonymous file mapped shared and writable.
pub struct MemFd {
    file: File,
    ptr: NonNull<u8>,
    len: usize,
}

impl MemFd {
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let page = *PAGE_SIZE;
        let len = (size + page - 1) & !(page - 1);
        let name = CString::new(name).map_err(Error::other)?;
        let file = memfd_create(&name, 0)?;
        ftruncate(&file, len)?;
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        let ptr = unsafe { mmap(std::ptr::null_mut(), len, prot, libc::MAP_SHARED, &file, 0) }?;
        Ok(Self {
            file,
            ptr: NonNull::new(ptr).expect("mmap returned null"),
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    fn base(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for MemFd {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr(), self.len) } {
            log::warn!("failed to unmap shared region: {e}");
        }
    }
}

/// Bump allocator over a [`MemFd`].
///
/// Allocation is linear: objects are placed at their natural alignment
/// and the offset only grows. There is no free and no drop; the region
/// is reclaimed wholesale when the arena goes away.
pub struct Arena {
    mem: MemFd,
    offset: Cell<usize>,
}

impl Arena {
    pub fn create(name: &str, capacity: usize) -> Result<Self> {
        Ok(Self {
            mem: MemFd::create(name, capacity)?,
            offset: Cell::new(0),
        })
    }

    /// Moves `value` into the arena and returns a stable handle to it.
    pub fn alloc<T: ArenaSafe>(&self, value: T) -> Result<Shared<T>> {
        let offset = self.offset.get().next_multiple_of(align_of::<T>());
        let end = offset
            .checked_add(size_of::<T>())
            .ok_or_else(|| Error::from(ErrorKind::OutOfMemory))?;
        if end > self.mem.len() {
            return Err(Error::new(
                ErrorKind::OutOfMemory,
                "shared arena exhausted",
            ));
        }
        let ptr = unsafe { self.mem.base().add(offset) } as *mut T;
        // In-bounds, aligned, and never aliased again: the offset is
        // bumped below and never rewinds.
        unsafe { ptr.write(value) };
        self.offset.set(end);
        Ok(Shared(unsafe { NonNull::new_unchecked(ptr) }))
    }

    pub fn capacity(&self) -> usize {
        self.mem.len()
    }

    pub fn used(&self) -> usize {
        self.offset.get()
    }
}
