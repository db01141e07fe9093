use std::alloc::{self, Layout};
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::native::NativeAllocator;

// Each block is prefixed by a header holding the requested size,
// kept at 16 bytes so the returned pointer stays 16-byte aligned.
const HEADER: usize = 16;

/// Heap allocator that counts its outstanding blocks.
#[derive(Debug, Default)]
pub struct TrackingAllocator {
    live: AtomicUsize,
    total: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl TrackingAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks handed out and not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Blocks ever handed out.
    pub fn total_allocations(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::SeqCst)
    }

    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size.checked_add(HEADER)?, HEADER).ok()
    }
}

impl NativeAllocator for TrackingAllocator {
    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        let Some(new_layout) = Self::layout(size) else {
            return std::ptr::null_mut();
        };

        if ptr.is_null() {
            let base = alloc::alloc(new_layout);
            if base.is_null() {
                return std::ptr::null_mut();
            }
            (base as *mut usize).write(size);
            self.live.fetch_add(1, Ordering::SeqCst);
            self.total.fetch_add(1, Ordering::SeqCst);
            self.live_bytes.fetch_add(size, Ordering::SeqCst);
            return base.add(HEADER) as *mut c_void;
        }

        let base = (ptr as *mut u8).sub(HEADER);
        let old_size = (base as *const usize).read();
        let Some(old_layout) = Self::layout(old_size) else {
            return std::ptr::null_mut();
        };
        let new_base = alloc::realloc(base, old_layout, new_layout.size());
        if new_base.is_null() {
            return std::ptr::null_mut();
        }
        (new_base as *mut usize).write(size);
        self.live_bytes.fetch_sub(old_size, Ordering::SeqCst);
        self.live_bytes.fetch_add(size, Ordering::SeqCst);
        new_base.add(HEADER) as *mut c_void
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        if ptr.is_null() {
            return;
        }
        let base = (ptr as *mut u8).sub(HEADER);
        let size = (base as *const usize).read();
        if let Some(layout) = Self::layout(size) {
            alloc::dealloc(base, layout);
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.live_bytes.fetch_sub(size, Ordering::SeqCst);
        }
    }
}
