//! `UniqueHandle<T, D>`: a single owner with a pluggable destroy action.

use std::{
    fmt,
    marker::PhantomData,
    mem,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

/// The action run on an owned pointer when a [`UniqueHandle`] lets go of it.
pub trait Deleter<T: ?Sized> {
    /// # Safety
    /// `ptr` is the pointer the handle owned; it is passed exactly once and never used again.
    unsafe fn delete(&mut self, ptr: NonNull<T>);
}

/// Frees a pointer obtained from [`Box`]. Zero-sized, so a handle using it is one pointer wide.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        drop(Box::from_raw(ptr.as_ptr()));
    }
}

impl<T: ?Sized, F> Deleter<T> for F
where
    F: FnMut(NonNull<T>),
{
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        self(ptr)
    }
}

/// Exclusive owner of a heap object. Not clonable; moving transfers ownership.
///
/// The deleter is stored inline next to the pointer, so a stateless deleter such as
/// [`DefaultDelete`] or a non-capturing closure costs no space.
///
/// ```
/// use dualrc::UniqueHandle;
///
/// let mut handle = UniqueHandle::new(Box::new(5));
/// *handle += 1;
/// assert_eq!(*handle, 6);
/// assert_eq!(std::mem::size_of_val(&handle), std::mem::size_of::<*mut i32>());
/// ```
pub struct UniqueHandle<T: ?Sized, D: Deleter<T> = DefaultDelete> {
    ptr: Option<NonNull<T>>,
    deleter: D,
    _marker: PhantomData<T>,
}

impl<T: ?Sized> UniqueHandle<T> {
    /// Takes ownership of a boxed object.
    #[inline]
    pub fn new(object: Box<T>) -> Self {
        UniqueHandle {
            ptr: Some(NonNull::from(Box::leak(object))),
            deleter: DefaultDelete,
            _marker: PhantomData,
        }
    }

    /// Releases the current object (if any) and takes ownership of `object`. Passing the object
    /// already held is impossible for a box, so this always destroys the old one.
    pub fn reset_to(&mut self, object: Box<T>) {
        let old = self.ptr.replace(NonNull::from(Box::leak(object)));
        if let Some(old) = old {
            unsafe { self.deleter.delete(old) };
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> UniqueHandle<T, D> {
    /// Takes ownership of `ptr`, to be destroyed by `deleter`.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes, exclusively owned, and acceptable to `deleter`.
    /// ```
    /// use std::ptr::NonNull;
    /// use dualrc::UniqueHandle;
    ///
    /// let raw = NonNull::from(Box::leak(Box::new(7)));
    /// let handle = unsafe {
    ///     UniqueHandle::from_raw_with(raw, |p: NonNull<i32>| drop(Box::from_raw(p.as_ptr())))
    /// };
    /// assert_eq!(*handle, 7);
    /// ```
    #[inline]
    pub unsafe fn from_raw_with(ptr: NonNull<T>, deleter: D) -> Self {
        UniqueHandle {
            ptr: Some(ptr),
            deleter,
            _marker: PhantomData,
        }
    }

    /// An empty handle using `deleter` for anything it later owns.
    #[inline]
    pub fn null_with(deleter: D) -> Self {
        UniqueHandle {
            ptr: None,
            deleter,
            _marker: PhantomData,
        }
    }

    /// Gives up ownership without running the deleter. The handle becomes empty.
    /// ```
    /// use dualrc::UniqueHandle;
    ///
    /// let mut handle = UniqueHandle::new(Box::new(3));
    /// let raw = handle.release().unwrap();
    /// assert!(!handle.is_some());
    /// let boxed = unsafe { Box::from_raw(raw.as_ptr()) };
    /// assert_eq!(*boxed, 3);
    /// ```
    #[inline]
    #[must_use = "the released pointer is no longer destroyed by the handle"]
    pub fn release(&mut self) -> Option<NonNull<T>> {
        self.ptr.take()
    }

    /// Destroys the current object (if any) with the deleter and leaves the handle empty.
    #[inline]
    pub fn reset(&mut self) {
        if let Some(old) = self.ptr.take() {
            unsafe { self.deleter.delete(old) };
        }
    }

    /// Destroys the current object (if any) and takes ownership of `ptr`. Resetting to the
    /// address already held does nothing.
    ///
    /// # Safety
    /// Same contract as [`UniqueHandle::from_raw_with`] for `ptr`.
    pub unsafe fn reset_raw(&mut self, ptr: NonNull<T>) {
        if self.ptr.map(NonNull::cast::<u8>) == Some(ptr.cast::<u8>()) {
            return;
        }
        if let Some(old) = self.ptr.replace(ptr) {
            self.deleter.delete(old);
        }
    }

    /// Exchanges both pointers and deleters.
    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.ptr.map(|ptr| unsafe { &mut *ptr.as_ptr() })
    }

    #[inline]
    pub fn deleter(&self) -> &D {
        &self.deleter
    }

    #[inline]
    pub fn deleter_mut(&mut self) -> &mut D {
        &mut self.deleter
    }

    #[inline]
    pub fn is_some(&self) -> bool {
        self.ptr.is_some()
    }
}

impl<T: ?Sized, D: Deleter<T>> Drop for UniqueHandle<T, D> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized, D: Deleter<T> + Default> Default for UniqueHandle<T, D> {
    fn default() -> Self {
        UniqueHandle::null_with(D::default())
    }
}

impl<T: ?Sized, D: Deleter<T>> Deref for UniqueHandle<T, D> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty UniqueHandle"),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> DerefMut for UniqueHandle<T, D> {
    fn deref_mut(&mut self) -> &mut T {
        match self.get_mut() {
            Some(value) => value,
            None => panic!("dereferenced an empty UniqueHandle"),
        }
    }
}

impl<T: ?Sized> From<Box<T>> for UniqueHandle<T> {
    fn from(object: Box<T>) -> Self {
        UniqueHandle::new(object)
    }
}

impl<T: ?Sized + fmt::Debug, D: Deleter<T>> fmt::Debug for UniqueHandle<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}
