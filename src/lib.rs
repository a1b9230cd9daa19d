//! `dualrc` provides single-threaded shared ownership with separate strong and weak counts.
//!
//! [`SharedHandle<T>`] is an owning reference-counted handle. Every handle derived from one creation
//! shares a control block holding two counts: the strong count (how many `SharedHandle`s exist)
//! decides when the object is destroyed, the weak count (how many [`WeakHandle`]s exist) together
//! with the strong count decides when the control block itself is freed.
//!
//! The object can live in two places:
//! - [`SharedHandle::new`] constructs it inside the control block, so creation costs a single
//!   allocation and reaching the object needs no extra indirection.
//! - [`SharedHandle::adopt`] takes an object that was already boxed elsewhere and allocates a
//!   separate control block for it.
//!
//! A [`WeakHandle<T>`] observes without keeping the object alive. It can be promoted back while the
//! object lives: [`WeakHandle::lock`] returns an empty handle when it does not, and
//! [`SharedHandle::from_weak`] returns [`ExpiredObservation`] instead. A destroyed object is never
//! reachable through either path.
//!
//! Counting is not atomic, and none of the handles implement [`Send`] or [`Sync`].
//!
//! Two simpler single-counter handles round out the crate: [`UniqueHandle`], an exclusive owner
//! with a pluggable deleter, and [`IntrusiveHandle`], counted through a [`RefCounter`] embedded in
//! the object.
//!
//! With the `tracing` feature enabled, block creation, finalization, freeing and failed promotions
//! are reported as `tracing` events.

mod block;
mod heap;

pub mod error;
pub mod intrusive;
pub mod shared;
pub mod unique;
pub mod weak;

pub use crate::error::ExpiredObservation;
pub use crate::intrusive::{IntrusiveHandle, RefCounted, RefCounter};
pub use crate::shared::SharedHandle;
pub use crate::unique::{DefaultDelete, Deleter, UniqueHandle};
pub use crate::weak::WeakHandle;

#[cfg(test)]
mod tests;
