use std::fmt;
use std::sync::Arc;

use log::warn;

use crate::cell::SettlementCell;
use crate::promise::Promise;
use crate::Error;

/// The fulfilling half handed to a [`Promise::new`] resolver.
///
/// # Examples
///
/// ```
/// use thenable::{Error, Promise, State};
///
/// let promise = Promise::<&str, ()>::new(|resolve, reject| {
///     resolve.resolve("first").unwrap();
///     assert_eq!(resolve.resolve("second"), Err(Error::AlreadySettled { state: State::Fulfilled }));
///     assert!(reject.reject(()).is_err());
/// });
/// assert_eq!(promise.wait(), Ok("first"));
/// ```
pub struct Resolve<T, E> {
    handle: Arc<Handle<T, E>>,
}

/// The rejecting half handed to a [`Promise::new`] resolver.
pub struct Reject<T, E> {
    handle: Arc<Handle<T, E>>,
}

struct Handle<T, E> {
    cell: Arc<SettlementCell<T, E>>,
}

pub(crate) fn handles<T, E>(promise: &Promise<T, E>) -> (Resolve<T, E>, Reject<T, E>) {
    let handle = Arc::new(Handle {
        cell: Arc::clone(&promise.cell),
    });
    (
        Resolve {
            handle: Arc::clone(&handle),
        },
        Reject { handle },
    )
}

impl<T, E> Resolve<T, E> {
    pub fn resolve(&self, value: T) -> Result<(), Error> {
        self.handle.cell.fulfill(value)
    }
}

impl<T, E> Resolve<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Settle the promise with whatever `other` eventually settles with.
    ///
    /// This counts as the resolver's one call: it fails if the promise has
    /// already settled or is already following a promise, and once it
    /// succeeds every later `resolve`, `reject` or `resolve_with` fails with
    /// [`Error::Adopting`]. The outcome is copied over from a worker thread
    /// once `other` settles.
    pub fn resolve_with(&self, other: Promise<T, E>) -> Result<(), Error> {
        self.handle.cell.reserve()?;
        let handle = Arc::clone(&self.handle);
        let options = Arc::clone(&other.options);
        options.spawn(move || {
            // An abandoned `other` abandons this promise when `handle` drops.
            if let Ok(outcome) = other.cell.try_wait() {
                if let Err(err) = handle.cell.settle_reserved(outcome) {
                    warn!("discarding an adopted outcome: {}", err);
                }
            }
        });
        Ok(())
    }
}

impl<T, E> Reject<T, E> {
    pub fn reject(&self, error: E) -> Result<(), Error> {
        self.handle.cell.reject(error)
    }
}

impl<T, E> Drop for Handle<T, E> {
    fn drop(&mut self) {
        if self.cell.abandon() {
            warn!("resolver dropped without settling its promise; abandoning it");
        }
    }
}

impl<T, E> Clone for Resolve<T, E> {
    fn clone(&self) -> Self {
        Resolve {
            handle: Arc::clone(&self.handle),
        }
    }
}

impl<T, E> Clone for Reject<T, E> {
    fn clone(&self) -> Self {
        Reject {
            handle: Arc::clone(&self.handle),
        }
    }
}

impl<T, E> fmt::Debug for Resolve<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolve").field("cell", &self.handle.cell).finish()
    }
}

impl<T, E> fmt::Debug for Reject<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reject").field("cell", &self.handle.cell).finish()
    }
}
