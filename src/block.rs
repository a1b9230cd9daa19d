//! Control blocks: the bookkeeping shared by every [`SharedHandle`](crate::SharedHandle) and
//! [`WeakHandle`](crate::WeakHandle) derived from one creation.
//!
//! A block starts with a [`BlockHeader`] holding the strong and weak counts plus two erased
//! operations, `finalize` (destroy the object) and `free` (release the block's own storage).
//! Exactly two block layouts exist:
//!
//! * [`PointerBlock`] adopts an object that was boxed elsewhere. Finalizing drops that box,
//!   so the object and the block are two independent allocations.
//! * [`InPlaceBlock`] embeds the object in a [`Slot`] inside the block itself. Finalizing runs
//!   the destructor in place; the bytes are released only when the whole block is freed.
//!
//! Block lifecycle, with `S` the strong count and `W` the weak count:
//!
//! ```text
//! Live (S > 0) --release, S stays > 0--> Live
//! Live (S > 0) --release, S hits 0-----> StrongDead   (finalize runs here)
//! Live (S > 0) --release_weak----------> Live
//! StrongDead   --release_weak, W > 0---> StrongDead
//! StrongDead   --release_weak, W hits 0> Freed        (storage released here)
//! ```

use std::{
    cell::{Cell, UnsafeCell},
    mem::{self, MaybeUninit},
    ptr::{addr_of_mut, NonNull},
};

use crate::heap;

pub(crate) const MAX_REFCOUNT: usize = (isize::MAX) as usize;

#[repr(C)]
pub(crate) struct BlockHeader {
    strong: Cell<usize>,
    weak: Cell<usize>,
    finalize: unsafe fn(NonNull<BlockHeader>),
    free: unsafe fn(NonNull<BlockHeader>),
}

impl BlockHeader {
    fn new<B: ControlBlock>() -> Self {
        BlockHeader {
            strong: Cell::new(1),
            weak: Cell::new(0),
            finalize: finalize_erased::<B>,
            free: free_erased::<B>,
        }
    }

    #[inline]
    pub(crate) fn increase_strong(&self) {
        let prev = self.strong.get();
        if prev >= MAX_REFCOUNT {
            panic!("Overflow of maximum strong reference count.");
        }
        self.strong.set(prev + 1);
    }

    #[inline]
    fn decrease_strong(&self) {
        debug_assert!(self.strong.get() != 0);
        self.strong.set(self.strong.get() - 1);
    }

    #[inline]
    pub(crate) fn increase_weak(&self) {
        let prev = self.weak.get();
        if prev >= MAX_REFCOUNT {
            panic!("Overflow of maximum weak reference count.");
        }
        self.weak.set(prev + 1);
    }

    #[inline]
    fn decrease_weak(&self) {
        debug_assert!(self.weak.get() != 0);
        self.weak.set(self.weak.get() - 1);
    }

    #[inline]
    pub(crate) fn strong_count(&self) -> usize {
        self.strong.get()
    }

    #[inline]
    pub(crate) fn weak_count(&self) -> usize {
        self.weak.get()
    }

    /// Strong and weak references together.
    #[inline]
    pub(crate) fn use_count(&self) -> usize {
        self.strong.get() + self.weak.get()
    }

    /// Drop one strong reference. On the last one the object is finalized, and the block is
    /// freed too if no weak reference remains.
    ///
    /// A transient weak reference is held across `finalize`, so a destructor that drops weak
    /// handles to this very block cannot free it underneath us. Releasing that guard goes through
    /// [`BlockHeader::release_weak`], which frees the block once both counts are zero.
    ///
    /// # Safety
    /// `this` must point to a live block and the caller must own one strong reference to it,
    /// which is consumed.
    pub(crate) unsafe fn release(this: NonNull<BlockHeader>) {
        let header = this.as_ref();
        header.decrease_strong();
        if header.strong_count() != 0 {
            return;
        }

        header.increase_weak();
        (header.finalize)(this);

        #[cfg(feature = "tracing")]
        tracing::trace!(block = ?this, "managed object finalized");

        BlockHeader::release_weak(this);
    }

    /// Drop one weak reference, freeing the block if it was the last reference of any kind.
    /// Never finalizes.
    ///
    /// # Safety
    /// `this` must point to a live block and the caller must own one weak reference to it,
    /// which is consumed.
    pub(crate) unsafe fn release_weak(this: NonNull<BlockHeader>) {
        let header = this.as_ref();
        header.decrease_weak();
        if header.use_count() == 0 {
            #[cfg(feature = "tracing")]
            tracing::trace!(block = ?this, "control block freed");

            (header.free)(this);
        }
    }
}

/// The two block layouts. Sealed: nothing outside this module implements it.
pub(crate) trait ControlBlock: Sized {
    /// Destroy the managed object without releasing the block's storage.
    ///
    /// # Safety
    /// Called at most once, when the strong count has just reached zero.
    unsafe fn finalize(&self);
}

unsafe fn finalize_erased<B: ControlBlock>(header: NonNull<BlockHeader>) {
    header.cast::<B>().as_ref().finalize();
}

unsafe fn free_erased<B: ControlBlock>(header: NonNull<BlockHeader>) {
    heap::deallocate(header.cast::<B>());
}

/// A block paired with the address its first handle observes.
pub(crate) struct Parts<T: ?Sized> {
    pub(crate) block: NonNull<BlockHeader>,
    pub(crate) observed: NonNull<T>,
}

impl<T: ?Sized> Clone for Parts<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Parts<T> {}

impl<T: ?Sized> Parts<T> {
    /// # Safety
    /// `self.block` must still be allocated.
    #[inline]
    pub(crate) unsafe fn header(&self) -> &BlockHeader {
        self.block.as_ref()
    }
}

/// Block adopting a separately boxed object.
#[repr(C)]
pub(crate) struct PointerBlock<T: ?Sized> {
    header: BlockHeader,
    object: NonNull<T>,
}

impl<T: ?Sized> PointerBlock<T> {
    pub(crate) fn create(object: Box<T>) -> Parts<T> {
        let object = NonNull::from(Box::leak(object));
        let ptr = heap::allocate::<Self>();
        unsafe {
            ptr.as_ptr().write(PointerBlock {
                header: BlockHeader::new::<Self>(),
                object,
            })
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(kind = "pointer", block = ?ptr, "control block created");

        Parts {
            block: ptr.cast(),
            observed: object,
        }
    }
}

impl<T: ?Sized> ControlBlock for PointerBlock<T> {
    unsafe fn finalize(&self) {
        drop(Box::from_raw(self.object.as_ptr()));
    }
}

/// Block constructing its object inside its own allocation.
#[repr(C)]
pub(crate) struct InPlaceBlock<T> {
    header: BlockHeader,
    slot: Slot<T>,
}

impl<T> InPlaceBlock<T> {
    /// Allocate the block, then build the object straight into its slot. If `init` panics the
    /// storage is released and nothing is leaked.
    pub(crate) fn create_with<F>(init: F) -> Parts<T>
    where
        F: FnOnce() -> T,
    {
        struct DeallocOnUnwind<B>(NonNull<B>);

        impl<B> Drop for DeallocOnUnwind<B> {
            fn drop(&mut self) {
                unsafe { heap::deallocate(self.0) };
            }
        }

        let ptr = heap::allocate::<Self>();
        let guard = DeallocOnUnwind(ptr);
        let observed = unsafe { Slot::construct(addr_of_mut!((*ptr.as_ptr()).slot), init) };
        mem::forget(guard);
        unsafe { addr_of_mut!((*ptr.as_ptr()).header).write(BlockHeader::new::<Self>()) };

        #[cfg(feature = "tracing")]
        tracing::trace!(kind = "in-place", block = ?ptr, "control block created");

        Parts {
            block: ptr.cast(),
            observed,
        }
    }
}

impl<T> ControlBlock for InPlaceBlock<T> {
    unsafe fn finalize(&self) {
        self.slot.destroy();
    }
}

/// Storage for one `T` that is never initialized or dropped implicitly. It is constructed once,
/// when its block is created, and destroyed once, when the block is finalized.
#[repr(transparent)]
pub(crate) struct Slot<T> {
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    /// # Safety
    /// `slot` must be valid for writes and not yet constructed.
    unsafe fn construct<F>(slot: *mut Slot<T>, init: F) -> NonNull<T>
    where
        F: FnOnce() -> T,
    {
        let value: *mut T = slot.cast();
        value.write(init());
        NonNull::new_unchecked(value)
    }

    /// # Safety
    /// The slot must hold a constructed value that has not been destroyed yet.
    unsafe fn destroy(&self) {
        (*self.value.get()).assume_init_drop();
    }
}
