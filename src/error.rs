use std::fmt;

/// Returned when promoting a [`WeakHandle`](crate::WeakHandle) whose object has already been
/// destroyed. No handle is produced by the failing call.
///
/// [`WeakHandle::lock`](crate::WeakHandle::lock) reports the same condition by returning an
/// empty [`SharedHandle`](crate::SharedHandle) instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ExpiredObservation;

impl fmt::Display for ExpiredObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("observed object has already been destroyed")
    }
}

impl std::error::Error for ExpiredObservation {}
