use std::{fmt, marker::PhantomData, mem};

use crate::{
    block::{BlockHeader, Parts},
    shared::{block_of, thin, SharedHandle},
};

/// `WeakHandle<T>` is a non-owning observer of an object held by [`SharedHandle`]s.
///
/// It keeps the control block allocated but not the object: once the last `SharedHandle` goes
/// away the object is destroyed, and every `WeakHandle` to it reports [`WeakHandle::expired`].
/// The object cannot be read through a `WeakHandle`; it has to be promoted back with
/// [`WeakHandle::lock`] or [`SharedHandle::from_weak`], which never hand out a destroyed object.
///
/// One use is breaking reference cycles: a parent owns its children with `SharedHandle`s and the
/// children point back with `WeakHandle`s.
///
/// ## Examples
/// ```
/// use dualrc::SharedHandle;
///
/// let handle = SharedHandle::new(100);
/// let weak = SharedHandle::demote(&handle);
/// assert_eq!(*weak.lock(), 100);
///
/// drop(handle);
/// assert!(weak.expired());
/// assert!(!SharedHandle::is_some(&weak.lock()));
/// ```
pub struct WeakHandle<T: ?Sized> {
    parts: Option<Parts<T>>,
    _marker: PhantomData<T>,
}

impl<T: ?Sized> WeakHandle<T> {
    /// Returns an empty, permanently expired handle.
    #[inline]
    pub const fn new() -> Self {
        WeakHandle {
            parts: None,
            _marker: PhantomData,
        }
    }

    /// Observes `shared`'s object, incrementing the weak count. Demoting an empty handle gives an
    /// empty `WeakHandle`.
    pub fn from_shared(shared: &SharedHandle<T>) -> Self {
        let parts = SharedHandle::parts(shared);
        if let Some(parts) = parts {
            unsafe { parts.header() }.increase_weak();
        }
        WeakHandle {
            parts,
            _marker: PhantomData,
        }
    }

    /// `true` if the handle is empty or the object has been destroyed.
    /// ```
    /// use dualrc::{SharedHandle, WeakHandle};
    ///
    /// assert!(WeakHandle::<u8>::new().expired());
    ///
    /// let mut handle = SharedHandle::new(1u8);
    /// let weak = SharedHandle::demote(&handle);
    /// assert!(!weak.expired());
    /// SharedHandle::reset(&mut handle);
    /// assert!(weak.expired());
    /// ```
    #[inline]
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Promotes to a [`SharedHandle`] if the object is still alive, incrementing the strong count.
    /// Returns an empty `SharedHandle` otherwise.
    /// ```
    /// use dualrc::SharedHandle;
    ///
    /// let handle = SharedHandle::new(String::from("alive"));
    /// let weak = SharedHandle::demote(&handle);
    /// let locked = weak.lock();
    /// assert_eq!(locked.as_str(), "alive");
    /// assert_eq!(SharedHandle::use_count(&handle), 2);
    /// ```
    #[inline]
    pub fn lock(&self) -> SharedHandle<T> {
        self.promote().unwrap_or_default()
    }

    /// Shared liveness check behind both promotion paths.
    pub(crate) fn promote(&self) -> Option<SharedHandle<T>> {
        if self.expired() {
            #[cfg(feature = "tracing")]
            tracing::debug!(block = ?self.parts.map(|p| p.block), "promotion of expired observation");

            return None;
        }
        let parts = self.parts?;
        unsafe { parts.header() }.increase_strong();
        Some(SharedHandle::from_parts(parts))
    }

    /// Returns the strong count of the observed block, or 0 if the handle is empty.
    #[inline]
    pub fn use_count(&self) -> usize {
        self.parts
            .map_or(0, |parts| unsafe { parts.header() }.strong_count())
    }

    /// Returns the weak count of the observed block, or 0 if the handle is empty.
    /// ```
    /// use dualrc::SharedHandle;
    ///
    /// let handle = SharedHandle::new(100);
    /// let weak1 = SharedHandle::demote(&handle);
    /// let weak2 = weak1.clone();
    /// assert_eq!(weak2.weak_count(), 2);
    /// ```
    #[inline]
    pub fn weak_count(&self) -> usize {
        self.parts
            .map_or(0, |parts| unsafe { parts.header() }.weak_count())
    }

    /// Moves the contents out, leaving `self` empty. Counts are unchanged.
    #[inline]
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Releases this handle's weak reference (if any) and leaves it empty.
    #[inline]
    pub fn reset(&mut self) {
        if let Some(parts) = self.parts.take() {
            unsafe { BlockHeader::release_weak(parts.block) };
        }
    }

    /// Exchanges the contents of two handles. Counts are unchanged.
    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.parts, &mut other.parts);
    }

    /// Checks whether two handles observe the same address. As with [`SharedHandle::ptr_eq`],
    /// handles from different control blocks can observe one address and compare equal.
    #[inline]
    pub fn ptr_eq<U: ?Sized>(&self, other: &WeakHandle<U>) -> bool {
        thin(self.parts.map(|p| p.observed)) == thin(other.parts.map(|p| p.observed))
    }
}

impl<T: ?Sized> Drop for WeakHandle<T> {
    #[inline]
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Clone for WeakHandle<T> {
    /// Share the control block, incrementing the weak count.
    #[inline]
    fn clone(&self) -> Self {
        if let Some(parts) = self.parts {
            unsafe { parts.header() }.increase_weak();
        }
        WeakHandle {
            parts: self.parts,
            _marker: PhantomData,
        }
    }

    /// Assigning a handle that already shares the control block leaves the counts untouched.
    fn clone_from(&mut self, source: &Self) {
        if block_of(self.parts) == block_of(source.parts) {
            return;
        }
        *self = source.clone();
    }
}

impl<T: ?Sized> Default for WeakHandle<T> {
    #[inline]
    fn default() -> Self {
        WeakHandle::new()
    }
}

impl<T: ?Sized> From<&SharedHandle<T>> for WeakHandle<T> {
    fn from(shared: &SharedHandle<T>) -> Self {
        WeakHandle::from_shared(shared)
    }
}

impl<T: ?Sized> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(WeakHandle)")
    }
}
