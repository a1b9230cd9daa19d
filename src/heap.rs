//! The single place control blocks are allocated and freed.
//!
//! Every block is one allocation of `Layout::new::<B>()`. In test builds the module keeps
//! per-thread counters so tests can check allocation counts, leaks and double frees.

use std::{
    alloc::{alloc, dealloc, handle_alloc_error, Layout},
    ptr::NonNull,
};

/// Allocate uninitialized storage for one `B`.
///
/// The caller is responsible for writing a valid `B` before it is read.
#[inline]
pub(crate) fn allocate<B>() -> NonNull<B> {
    let layout = Layout::new::<B>();
    debug_assert!(layout.size() != 0, "control blocks always carry counters");

    let raw = unsafe { alloc(layout) };
    let Some(ptr) = NonNull::new(raw.cast::<B>()) else {
        handle_alloc_error(layout);
    };

    #[cfg(test)]
    counters::on_allocate();

    ptr
}

/// Release storage obtained from [`allocate`] without running any destructor.
///
/// # Safety
/// `ptr` must come from `allocate::<B>()` and must not be used afterwards.
#[inline]
pub(crate) unsafe fn deallocate<B>(ptr: NonNull<B>) {
    #[cfg(test)]
    counters::on_deallocate();

    dealloc(ptr.as_ptr().cast(), Layout::new::<B>());
}
