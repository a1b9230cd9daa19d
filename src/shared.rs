use std::{
    borrow::Borrow,
    fmt::{self, Debug, Display, Pointer},
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::NonNull,
};

use crate::{
    block::{BlockHeader, InPlaceBlock, Parts, PointerBlock},
    error::ExpiredObservation,
    weak::WeakHandle,
};

/// `SharedHandle<T>` is an owning, reference-counted handle to a heap object, for use within a
/// single thread.
///
/// Every handle derived from one creation shares a control block carrying two counts. The strong
/// count is the number of `SharedHandle`s; the object is destroyed exactly once, when it drops
/// from 1 to 0. The weak count is the number of [`WeakHandle`]s; the control block itself is freed
/// once both counts are zero.
///
/// A handle can also be empty. Empty handles come from [`Default`], [`SharedHandle::take`],
/// [`SharedHandle::reset`] and from [`WeakHandle::lock`] on an expired observation.
///
/// ## Creation
/// [`SharedHandle::new`] builds the object inside the control block: one allocation.
/// [`SharedHandle::adopt`] takes an object that is already boxed and wraps it in a separate
/// control block: two allocations overall.
///
/// ## Clone behavior
/// Cloning shares the control block and increments the strong count by exactly one. Moving a
/// handle never touches the counts.
///
/// ## Drop behavior
/// Dropping a non-empty handle decrements the strong count. On the last strong reference the
/// object is destroyed, and the control block is freed as well if no `WeakHandle` is left.
///
/// ## [`Deref`] behavior
/// `SharedHandle<T>` dereferences to `&T`. Dereferencing an empty handle panics; use
/// [`SharedHandle::get`] when the handle may be empty. To prevent name clashes with `T`,
/// `SharedHandle<T>`'s functions are associated.
///
/// ## Examples
/// ```
/// use dualrc::SharedHandle;
///
/// let a = SharedHandle::new(100);
/// let b = a.clone();
/// assert_eq!(*b, 100);
/// assert_eq!(SharedHandle::use_count(&a), 2);
/// ```
pub struct SharedHandle<T: ?Sized> {
    parts: Option<Parts<T>>,
    _marker: PhantomData<T>,
}

impl<T> SharedHandle<T> {
    /// Creates a handle owning `value`, stored inside the control block.
    /// ```
    /// use dualrc::SharedHandle;
    ///
    /// let handle = SharedHandle::new(42);
    /// assert_eq!(*handle, 42);
    /// assert_eq!(SharedHandle::use_count(&handle), 1);
    /// ```
    #[inline]
    pub fn new(value: T) -> Self {
        Self::new_with(move || value)
    }

    /// Creates a handle whose object is produced by `init` directly in the control block's
    /// storage. If `init` panics, the storage is released.
    /// ```
    /// use dualrc::SharedHandle;
    ///
    /// let handle = SharedHandle::new_with(|| vec![1, 2, 3]);
    /// assert_eq!(handle.len(), 3);
    /// ```
    #[inline]
    pub fn new_with<F>(init: F) -> Self
    where
        F: FnOnce() -> T,
    {
        Self::from_parts(InPlaceBlock::create_with(init))
    }
}

impl<T: ?Sized> SharedHandle<T> {
    /// Takes ownership of an already boxed object. The control block is allocated separately.
    /// ```
    /// use dualrc::SharedHandle;
    ///
    /// let handle = SharedHandle::adopt(Box::new(String::from("adopted")));
    /// assert_eq!(handle.as_str(), "adopted");
    ///
    /// let handle: SharedHandle<[u8]> = SharedHandle::adopt(vec![1, 2, 3].into_boxed_slice());
    /// assert_eq!(&*handle, &[1, 2, 3]);
    /// ```
    #[inline]
    pub fn adopt(object: Box<T>) -> Self {
        Self::from_parts(PointerBlock::create(object))
    }

    /// Returns an empty handle.
    #[inline]
    pub const fn empty() -> Self {
        SharedHandle {
            parts: None,
            _marker: PhantomData,
        }
    }

    /// Wraps parts whose strong reference the caller hands over.
    #[inline]
    pub(crate) fn from_parts(parts: Parts<T>) -> Self {
        SharedHandle {
            parts: Some(parts),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn parts(this: &Self) -> Option<Parts<T>> {
        this.parts
    }

    /// Creates a handle sharing `owner`'s control block but observing `ptr`, typically a part of
    /// `owner`'s object. The strong count of the block grows by one; the object kept alive is
    /// `owner`'s, whatever `ptr` points at. An empty `owner` gives an empty handle.
    ///
    /// Prefer [`SharedHandle::map`], which derives the address safely.
    ///
    /// # Safety
    /// `ptr` must stay valid for reads for as long as the block's strong count is non-zero.
    pub unsafe fn alias<Y: ?Sized>(owner: &SharedHandle<Y>, ptr: NonNull<T>) -> Self {
        match owner.parts {
            Some(parts) => {
                parts.header().increase_strong();
                Self::from_parts(Parts {
                    block: parts.block,
                    observed: ptr,
                })
            }
            None => Self::empty(),
        }
    }

    /// Creates a handle observing something reachable from `this`'s object while keeping the
    /// whole object alive. Also the way to view a handle through a trait object.
    ///
    /// `T` must be `'static`: the new handle carries no lifetime, so it cannot observe data that
    /// `T` only borrows. Use [`SharedHandle::alias`] for anything else.
    /// ```
    /// use std::fmt::Display;
    /// use dualrc::SharedHandle;
    ///
    /// struct Pair { left: u32, right: String }
    ///
    /// let pair = SharedHandle::new(Pair { left: 1, right: String::from("two") });
    /// let right = SharedHandle::map(&pair, |p| &p.right);
    /// drop(pair);
    /// assert_eq!(right.as_str(), "two");
    ///
    /// let shown: SharedHandle<dyn Display> = SharedHandle::map(&right, |s| s as &dyn Display);
    /// assert_eq!(shown.to_string(), "two");
    /// assert_eq!(SharedHandle::use_count(&right), 2);
    /// ```
    ///
    /// A handle cannot escape the lifetime of borrowed data:
    /// ```compile_fail
    /// use dualrc::SharedHandle;
    ///
    /// let owned = String::from("short-lived");
    /// let handle = SharedHandle::new(owned.as_str());
    /// let escaped: SharedHandle<str> = SharedHandle::map(&handle, |r| *r);
    /// drop(handle);
    /// drop(owned);
    /// println!("{}", escaped);
    /// ```
    pub fn map<U: ?Sized, F>(this: &Self, f: F) -> SharedHandle<U>
    where
        T: 'static,
        F: FnOnce(&T) -> &U,
    {
        match SharedHandle::get(this) {
            Some(value) => {
                let ptr = NonNull::from(f(value));
                unsafe { SharedHandle::alias(this, ptr) }
            }
            None => SharedHandle::empty(),
        }
    }

    /// Promotes a [`WeakHandle`], failing with [`ExpiredObservation`] if the object has already
    /// been destroyed (or the weak handle is empty).
    /// ```
    /// use dualrc::{ExpiredObservation, SharedHandle};
    ///
    /// let handle = SharedHandle::new(5);
    /// let weak = SharedHandle::demote(&handle);
    /// let again = SharedHandle::from_weak(&weak).unwrap();
    /// assert_eq!(SharedHandle::use_count(&again), 2);
    ///
    /// drop(handle);
    /// drop(again);
    /// assert_eq!(SharedHandle::from_weak(&weak).err(), Some(ExpiredObservation));
    /// ```
    #[inline]
    pub fn from_weak(weak: &WeakHandle<T>) -> Result<Self, ExpiredObservation> {
        weak.promote().ok_or(ExpiredObservation)
    }

    /// Derives a [`WeakHandle`] observing the same object. Increments the weak count; the strong
    /// count is unaffected.
    /// ```
    /// use dualrc::SharedHandle;
    ///
    /// let handle = SharedHandle::new(100);
    /// let weak = SharedHandle::demote(&handle);
    /// assert_eq!(SharedHandle::weak_count(&handle), 1);
    /// assert_eq!(SharedHandle::use_count(&handle), 1);
    /// assert!(!weak.expired());
    /// ```
    #[inline]
    pub fn demote(this: &Self) -> WeakHandle<T> {
        WeakHandle::from_shared(this)
    }

    /// Moves the contents out, leaving `this` empty. Counts are unchanged.
    /// ```
    /// use dualrc::SharedHandle;
    ///
    /// let mut a = SharedHandle::new(1);
    /// let b = SharedHandle::take(&mut a);
    /// assert!(!SharedHandle::is_some(&a));
    /// assert_eq!(SharedHandle::use_count(&b), 1);
    /// ```
    #[inline]
    pub fn take(this: &mut Self) -> Self {
        mem::take(this)
    }

    /// Releases this handle's strong reference (if any) and leaves it empty.
    /// ```
    /// use dualrc::SharedHandle;
    ///
    /// let mut a = SharedHandle::new(1);
    /// let b = a.clone();
    /// SharedHandle::reset(&mut a);
    /// assert!(SharedHandle::get(&a).is_none());
    /// assert_eq!(SharedHandle::use_count(&b), 1);
    /// ```
    #[inline]
    pub fn reset(this: &mut Self) {
        if let Some(parts) = this.parts.take() {
            unsafe { BlockHeader::release(parts.block) };
        }
    }

    /// Releases the current object (if any), then adopts `object` under a fresh control block.
    /// ```
    /// use dualrc::SharedHandle;
    ///
    /// let mut a = SharedHandle::new(1);
    /// let b = a.clone();
    /// SharedHandle::reset_to(&mut a, Box::new(2));
    /// assert_eq!((*a, *b), (2, 1));
    /// assert_eq!(SharedHandle::use_count(&a), 1);
    /// ```
    pub fn reset_to(this: &mut Self, object: Box<T>) {
        SharedHandle::reset(this);
        *this = SharedHandle::adopt(object);
    }

    /// Exchanges the contents of two handles. Counts are unchanged.
    #[inline]
    pub fn swap(this: &mut Self, other: &mut Self) {
        mem::swap(&mut this.parts, &mut other.parts);
    }

    /// Returns the observed object, or [`None`] for an empty handle.
    #[inline]
    pub fn get(this: &Self) -> Option<&T> {
        this.parts.map(|parts| unsafe { &*parts.observed.as_ptr() })
    }

    /// Returns the observed address, or [`None`] for an empty handle.
    #[inline]
    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.parts.map(|parts| parts.observed)
    }

    /// `true` if the handle observes an object.
    #[inline]
    pub fn is_some(this: &Self) -> bool {
        this.parts.is_some()
    }

    /// Returns the strong count of the control block, or 0 for an empty handle.
    #[inline]
    pub fn use_count(this: &Self) -> usize {
        this.parts
            .map_or(0, |parts| unsafe { parts.header() }.strong_count())
    }

    /// Returns the weak count of the control block, or 0 for an empty handle.
    #[inline]
    pub fn weak_count(this: &Self) -> usize {
        this.parts
            .map_or(0, |parts| unsafe { parts.header() }.weak_count())
    }

    /// Checks whether two handles observe the same address. Two empty handles compare equal.
    ///
    /// Handles from different control blocks can observe one address: every adopted zero-sized
    /// object sits at the same dangling address, and [`SharedHandle::map`] or
    /// [`SharedHandle::alias`] can point two blocks at one static. Those compare equal too.
    /// ```
    /// use dualrc::SharedHandle;
    ///
    /// let a = SharedHandle::new(100);
    /// let b = a.clone();
    /// assert!(SharedHandle::ptr_eq(&a, &b));
    /// assert!(!SharedHandle::ptr_eq(&a, &SharedHandle::new(100)));
    ///
    /// let unit = SharedHandle::adopt(Box::new(()));
    /// assert!(SharedHandle::ptr_eq(&unit, &SharedHandle::adopt(Box::new(()))));
    /// ```
    #[inline]
    pub fn ptr_eq<U: ?Sized>(this: &Self, other: &SharedHandle<U>) -> bool {
        thin(this.parts.map(|p| p.observed)) == thin(other.parts.map(|p| p.observed))
    }
}

#[inline]
pub(crate) fn block_of<T: ?Sized>(parts: Option<Parts<T>>) -> Option<NonNull<BlockHeader>> {
    parts.map(|parts| parts.block)
}

#[inline]
pub(crate) fn thin<T: ?Sized>(ptr: Option<NonNull<T>>) -> Option<NonNull<u8>> {
    ptr.map(NonNull::cast)
}

impl<T: ?Sized> Drop for SharedHandle<T> {
    #[inline]
    fn drop(&mut self) {
        SharedHandle::reset(self);
    }
}

impl<T: ?Sized> Clone for SharedHandle<T> {
    /// Share the control block, incrementing the strong count.
    #[inline]
    fn clone(&self) -> Self {
        if let Some(parts) = self.parts {
            unsafe { parts.header() }.increase_strong();
        }
        SharedHandle {
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

impl<T: ?Sized> Default for SharedHandle<T> {
    #[inline]
    fn default() -> Self {
        SharedHandle::empty()
    }
}

impl<T: ?Sized> Deref for SharedHandle<T> {
    type Target = T;

    /// Panics if the handle is empty.
    #[inline]
    fn deref(&self) -> &T {
        match SharedHandle::get(self) {
            Some(value) => value,
            None => panic!("dereferenced an empty SharedHandle"),
        }
    }
}

impl<T: ?Sized> AsRef<T> for SharedHandle<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: ?Sized> Borrow<T> for SharedHandle<T> {
    fn borrow(&self) -> &T {
        self
    }
}

impl<T> From<T> for SharedHandle<T> {
    fn from(value: T) -> Self {
        SharedHandle::new(value)
    }
}

impl<T: ?Sized> From<Box<T>> for SharedHandle<T> {
    fn from(object: Box<T>) -> Self {
        SharedHandle::adopt(object)
    }
}

impl<T: ?Sized> TryFrom<&WeakHandle<T>> for SharedHandle<T> {
    type Error = ExpiredObservation;

    fn try_from(weak: &WeakHandle<T>) -> Result<Self, Self::Error> {
        SharedHandle::from_weak(weak)
    }
}

/// Handles compare by observed address, not by value. Handles from different control blocks
/// that observe one address, such as adopted zero-sized objects, compare equal.
impl<T: ?Sized, U: ?Sized> PartialEq<SharedHandle<U>> for SharedHandle<T> {
    #[inline]
    fn eq(&self, other: &SharedHandle<U>) -> bool {
        SharedHandle::ptr_eq(self, other)
    }
}

impl<T: ?Sized> Eq for SharedHandle<T> {}

impl<T: ?Sized + Debug> Debug for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match SharedHandle::get(self) {
            Some(value) => Debug::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T: ?Sized + Display> Display for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match SharedHandle::get(self) {
            Some(value) => Display::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T: ?Sized> Pointer for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match SharedHandle::as_ptr(self) {
            Some(ptr) => Pointer::fmt(&ptr, f),
            None => f.write_str("0x0"),
        }
    }
}
