//! Thread-backed promises.
//!
//! A [`Promise`] is a write-once, read-many container for the outcome of a
//! computation running on another thread. Promises chain with
//! [`then`](Promise::then), [`catch`](Promise::catch) and
//! [`finally`](Promise::finally), and combine with [`all`] and [`race`].
//!
//! # Examples
//!
//! ```
//! use thenable::{Next, Promise};
//!
//! let answer = Promise::<i32, String>::resolve(20)
//!     .then(|v| Ok(Next::Value(v + 1)))
//!     .then(|v| Ok(Next::Value(v * 2)));
//! assert_eq!(answer.wait(), Ok(42));
//! ```
//!
//! A callback may hand back another promise; the chain adopts its outcome
//! instead of treating it as a value:
//!
//! ```
//! use thenable::{promisify, Next};
//!
//! let add_one = promisify(|n: i32| -> Result<i32, String> { Ok(n + 1) });
//! let next = add_one.clone();
//! let three = add_one(1).then(move |v| Ok(Next::Promise(next(v))));
//! assert_eq!(three.wait(), Ok(3));
//! ```

mod cell;
mod combinators;
mod options;
mod promise;
mod promisify;
mod resolver;

pub use cell::SettlementCell;
pub use combinators::{all, race};
pub use options::Options;
pub use promise::{Next, Promise};
pub use promisify::{promisify, promisify_with};
pub use resolver::{Reject, Resolve};

use thiserror::Error;

/// Where a promise is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

impl State {
    pub(crate) fn of<T, E>(outcome: &Result<T, E>) -> State {
        match outcome {
            Ok(_) => State::Fulfilled,
            Err(_) => State::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A second settlement was attempted. The first outcome is kept.
    #[error("promise is already settled ({state:?})")]
    AlreadySettled { state: State },
    /// The promise has been handed another promise to follow; only that
    /// promise's outcome can settle it now.
    #[error("promise is already following another promise")]
    Adopting,
    /// Whatever was going to settle the promise went away without doing so,
    /// usually because a callback panicked.
    #[error("promise was abandoned before it settled")]
    Abandoned,
}
