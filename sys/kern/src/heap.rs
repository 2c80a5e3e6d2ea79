// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel heap.
//!
//! Task control blocks and kernel-owned task stacks come from here. The
//! backing store is a static region of `abi::config::HEAP_SIZE` bytes, so it
//! lives in BSS and costs nothing at build time; a size of zero leaves the
//! allocator permanently empty, which disables task creation with a
//! kernel-owned stack.
//!
//! The kernel itself always allocates through the fallible entry points
//! below -- an allocation failure is an error return, never an abort. The
//! same heap is additionally registered as the global allocator on embedded
//! targets so that application code may use `alloc` types if it wants them.
//!
//! All access runs under the architecture critical section, so allocation
//! is legal from task context and from masked sections, but the heap is not
//! a general ISR-safe facility.

use core::alloc::Layout;
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use abi::config::HEAP_SIZE;
use abi::SysError;
use linked_list_allocator::Heap;

use crate::arch;

struct KernelHeap {
    heap: UnsafeCell<Heap>,
    initialized: UnsafeCell<bool>,
    storage: UnsafeCell<[MaybeUninit<u8>; HEAP_SIZE]>,
}

// Safety: every access path goes through `with_heap`, which masks
// interrupts for the duration.
unsafe impl Sync for KernelHeap {}

static KERNEL_HEAP: KernelHeap = KernelHeap {
    heap: UnsafeCell::new(Heap::empty()),
    initialized: UnsafeCell::new(false),
    storage: UnsafeCell::new([MaybeUninit::uninit(); HEAP_SIZE]),
};

fn with_heap<R>(body: impl FnOnce(&mut Heap) -> R) -> R {
    arch::critical_section(|| {
        // Safety: interrupts are masked and nothing in here re-enters.
        let initialized = unsafe { &mut *KERNEL_HEAP.initialized.get() };
        let heap = unsafe { &mut *KERNEL_HEAP.heap.get() };
        if !*initialized {
            if HEAP_SIZE > 0 {
                // Safety: the storage region is static, writable, and
                // handed to the allocator exactly once.
                unsafe {
                    heap.init(
                        KERNEL_HEAP.storage.get() as *mut u8,
                        HEAP_SIZE,
                    );
                }
            }
            *initialized = true;
        }
        body(heap)
    })
}

/// Allocates `layout` from the kernel heap.
pub fn allocate(layout: Layout) -> Result<NonNull<u8>, SysError> {
    with_heap(|heap| heap.allocate_first_fit(layout))
        .map_err(|_| SysError::NoMem)
}

/// Returns an allocation to the kernel heap.
///
/// # Safety
///
/// `ptr` must have come from [`allocate`] with this exact `layout`, and must
/// not be used afterwards.
pub unsafe fn deallocate(ptr: NonNull<u8>, layout: Layout) {
    // Safety: forwarded from the caller's contract.
    with_heap(|heap| unsafe { heap.deallocate(ptr, layout) });
}

/// Bytes currently handed out; mostly interesting to tests and debuggers.
pub fn used() -> usize {
    with_heap(|heap| heap.used())
}

#[cfg(target_os = "none")]
mod global {
    use super::*;
    use core::alloc::GlobalAlloc;

    struct KernAlloc;

    unsafe impl GlobalAlloc for KernAlloc {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            allocate(layout)
                .map(NonNull::as_ptr)
                .unwrap_or(core::ptr::null_mut())
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            if let Some(ptr) = NonNull::new(ptr) {
                deallocate(ptr, layout);
            }
        }
    }

    #[global_allocator]
    static GLOBAL: KernAlloc = KernAlloc;
}
