//! `IntrusiveHandle<T>`: reference counting through a counter embedded in the object itself.
//!
//! There is no control block. The object carries a [`RefCounter`] and exposes it through
//! [`RefCounted`]; any raw pointer to such an object can be turned back into a handle.

use std::{cell::Cell, fmt, marker::PhantomData, mem, ops::Deref, ptr::NonNull};

use crate::block::MAX_REFCOUNT;

/// A single non-atomic reference counter, starting at zero.
///
/// Cloning a `RefCounter` gives a fresh zero counter: copying an object never copies how many
/// handles point at the original.
#[derive(Default)]
pub struct RefCounter {
    count: Cell<usize>,
}

impl RefCounter {
    pub const fn new() -> Self {
        RefCounter {
            count: Cell::new(0),
        }
    }

    #[inline]
    fn inc_ref(&self) -> usize {
        let count = self.count.get();
        if count >= MAX_REFCOUNT {
            panic!("Overflow of maximum intrusive reference count.");
        }
        self.count.set(count + 1);
        count + 1
    }

    #[inline]
    fn dec_ref(&self) -> usize {
        debug_assert!(self.count.get() != 0);
        let count = self.count.get() - 1;
        self.count.set(count);
        count
    }

    #[inline]
    pub fn ref_count(&self) -> usize {
        self.count.get()
    }
}

impl Clone for RefCounter {
    fn clone(&self) -> Self {
        RefCounter::new()
    }
}

impl fmt::Debug for RefCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefCounter").field(&self.count.get()).finish()
    }
}

/// Objects that carry their own [`RefCounter`].
///
/// # Safety
/// `ref_counter` must always return the same counter, owned by `self`, and nothing but
/// [`IntrusiveHandle`] may modify it. `destroy` must accept every pointer handed to an
/// `IntrusiveHandle`; the default frees a [`Box`] allocation.
///
/// ```
/// use dualrc::{IntrusiveHandle, RefCounted, RefCounter};
///
/// #[derive(Default)]
/// struct Node {
///     counter: RefCounter,
///     value: i32,
/// }
///
/// unsafe impl RefCounted for Node {
///     fn ref_counter(&self) -> &RefCounter {
///         &self.counter
///     }
/// }
///
/// let node = IntrusiveHandle::new(Box::new(Node { value: 3, ..Default::default() }));
/// let again = node.clone();
/// assert_eq!(IntrusiveHandle::use_count(&again), 2);
/// assert_eq!(again.value, 3);
/// ```
pub unsafe trait RefCounted {
    fn ref_counter(&self) -> &RefCounter;

    /// Called once, when the last handle lets go.
    ///
    /// # Safety
    /// `this` is not used again after this call.
    unsafe fn destroy(this: NonNull<Self>) {
        drop(Box::from_raw(this.as_ptr()));
    }
}

/// A handle counted through `T`'s embedded [`RefCounter`]. Clones increment it; drops decrement it
/// and destroy the object when it reaches zero. To prevent name clashes with `T`, the functions
/// are associated.
pub struct IntrusiveHandle<T: RefCounted> {
    ptr: Option<NonNull<T>>,
    _marker: PhantomData<T>,
}

impl<T: RefCounted> IntrusiveHandle<T> {
    /// Takes a freshly boxed object and counts the first reference.
    #[inline]
    pub fn new(object: Box<T>) -> Self {
        unsafe { IntrusiveHandle::from_raw(NonNull::from(Box::leak(object))) }
    }

    /// Builds the object and wraps it.
    #[inline]
    pub fn make(value: T) -> Self {
        IntrusiveHandle::new(Box::new(value))
    }

    #[inline]
    pub const fn empty() -> Self {
        IntrusiveHandle {
            ptr: None,
            _marker: PhantomData,
        }
    }

    /// Adds a reference to an object that may already be held by other handles.
    ///
    /// # Safety
    /// `ptr` must point to a live object that [`RefCounted::destroy`] can release.
    /// ```
    /// use std::ptr::NonNull;
    /// use dualrc::{IntrusiveHandle, RefCounted, RefCounter};
    ///
    /// struct Token(RefCounter);
    ///
    /// unsafe impl RefCounted for Token {
    ///     fn ref_counter(&self) -> &RefCounter {
    ///         &self.0
    ///     }
    /// }
    ///
    /// let first = IntrusiveHandle::make(Token(RefCounter::new()));
    /// let raw = NonNull::from(&*first);
    /// let second = unsafe { IntrusiveHandle::from_raw(raw) };
    /// assert_eq!(IntrusiveHandle::use_count(&first), 2);
    /// assert!(IntrusiveHandle::ptr_eq(&first, &second));
    /// ```
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        ptr.as_ref().ref_counter().inc_ref();
        IntrusiveHandle {
            ptr: Some(ptr),
            _marker: PhantomData,
        }
    }

    /// Drops this handle's reference (destroying the object if it was the last) and leaves the
    /// handle empty.
    pub fn reset(this: &mut Self) {
        if let Some(ptr) = this.ptr.take() {
            if unsafe { ptr.as_ref() }.ref_counter().dec_ref() == 0 {
                unsafe { T::destroy(ptr) };
            }
        }
    }

    /// Drops the current reference, then holds `object`.
    pub fn reset_to(this: &mut Self, object: Box<T>) {
        IntrusiveHandle::reset(this);
        *this = IntrusiveHandle::new(object);
    }

    #[inline]
    pub fn swap(this: &mut Self, other: &mut Self) {
        mem::swap(&mut this.ptr, &mut other.ptr);
    }

    #[inline]
    pub fn get(this: &Self) -> Option<&T> {
        this.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    #[inline]
    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.ptr
    }

    /// Value of the embedded counter, or 0 for an empty handle.
    #[inline]
    pub fn use_count(this: &Self) -> usize {
        IntrusiveHandle::get(this).map_or(0, |value| value.ref_counter().ref_count())
    }

    #[inline]
    pub fn is_some(this: &Self) -> bool {
        IntrusiveHandle::use_count(this) != 0
    }

    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }
}

impl<T: RefCounted> Drop for IntrusiveHandle<T> {
    fn drop(&mut self) {
        IntrusiveHandle::reset(self);
    }
}

impl<T: RefCounted> Clone for IntrusiveHandle<T> {
    fn clone(&self) -> Self {
        match self.ptr {
            Some(ptr) => unsafe { IntrusiveHandle::from_raw(ptr) },
            None => IntrusiveHandle::empty(),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        if IntrusiveHandle::ptr_eq(self, source) {
            return;
        }
        *self = source.clone();
    }
}

impl<T: RefCounted> Default for IntrusiveHandle<T> {
    fn default() -> Self {
        IntrusiveHandle::empty()
    }
}

impl<T: RefCounted> Deref for IntrusiveHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match IntrusiveHandle::get(self) {
            Some(value) => value,
            None => panic!("dereferenced an empty IntrusiveHandle"),
        }
    }
}

impl<T: RefCounted + fmt::Debug> fmt::Debug for IntrusiveHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match IntrusiveHandle::get(self) {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}
