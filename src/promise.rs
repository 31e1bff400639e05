use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use log::warn;

use crate::cell::{SettleGuard, SettlementCell};
use crate::options::Options;
use crate::resolver::{self, Reject, Resolve};
use crate::{Error, State};

/// The outcome of a callback passed to [`then`](Promise::then) or
/// [`catch`](Promise::catch).
///
/// `Value` settles the derived promise directly. `Promise` makes the derived
/// promise adopt the returned promise's eventual outcome.
pub enum Next<T, E> {
    Value(T),
    Promise(Promise<T, E>),
}

impl<T, E> From<Promise<T, E>> for Next<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Next::Promise(promise)
    }
}

/// A shared handle to an outcome being computed on another thread.
///
/// Clones observe the same outcome. Chaining does not block the caller: each
/// link waits for its parent on its own worker thread and hands back a new
/// promise straight away. The exception is a worker that cannot be spawned;
/// see [`Options`].
pub struct Promise<T, E> {
    pub(crate) cell: Arc<SettlementCell<T, E>>,
    pub(crate) options: Arc<Options>,
}

impl<T, E> Promise<T, E> {
    pub(crate) fn pending(options: Arc<Options>) -> Self {
        Promise {
            cell: Arc::new(SettlementCell::new()),
            options,
        }
    }

    pub fn state(&self) -> State {
        self.cell.state()
    }

    pub fn is_abandoned(&self) -> bool {
        self.cell.is_abandoned()
    }
}

impl<T, E> Promise<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Run `resolver` on a new thread with the two halves that settle the
    /// returned promise. The first of them to be called wins.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::thread;
    /// use std::time::Duration;
    /// use thenable::Promise;
    ///
    /// let promise = Promise::<i32, String>::new(|resolve, _reject| {
    ///     thread::sleep(Duration::from_millis(20));
    ///     resolve.resolve(100).unwrap();
    /// });
    /// assert_eq!(promise.wait(), Ok(100));
    /// ```
    pub fn new<F>(resolver: F) -> Self
    where
        F: FnOnce(Resolve<T, E>, Reject<T, E>) + Send + 'static,
    {
        Promise::with_options(Options::default(), resolver)
    }

    pub fn with_options<F>(options: Options, resolver: F) -> Self
    where
        F: FnOnce(Resolve<T, E>, Reject<T, E>) + Send + 'static,
    {
        let promise = Promise::pending(Arc::new(options));
        let (resolve, reject) = resolver::handles(&promise);
        promise.options.spawn(move || resolver(resolve, reject));
        promise
    }

    /// A promise that fulfills with `value` from a worker thread.
    pub fn resolve(value: T) -> Self {
        Promise::settled_later(Ok(value))
    }

    /// A promise that rejects with `error` from a worker thread.
    pub fn reject(error: E) -> Self {
        Promise::settled_later(Err(error))
    }

    fn settled_later(outcome: Result<T, E>) -> Self {
        let promise = Promise::pending(Arc::default());
        let cell = Arc::clone(&promise.cell);
        promise.options.spawn(move || settle(&cell, outcome));
        promise
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Block the current thread until the promise settles.
    ///
    /// # Panics
    ///
    /// Panics if the promise was abandoned, for example because the callback
    /// that was to settle it panicked. [`try_wait`](Self::try_wait) reports
    /// that as an error instead.
    pub fn wait(&self) -> Result<T, E> {
        self.cell.wait()
    }

    pub fn try_wait(&self) -> Result<Result<T, E>, Error> {
        self.cell.try_wait()
    }

    /// The outcome, if the promise has settled.
    pub fn try_outcome(&self) -> Option<Result<T, E>> {
        self.cell.try_outcome()
    }

    /// Derive a promise from this one's fulfilled value.
    ///
    /// A rejection skips `on_fulfilled` and passes through unchanged.
    pub fn then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Next<U, E>, E> + Send + 'static,
    {
        self.derive(move |outcome| match outcome {
            Ok(value) => on_fulfilled(value),
            Err(error) => Err(error),
        })
    }

    /// Derive a promise that recovers from this one's rejection.
    ///
    /// A fulfilled value skips `on_rejected` and passes through unchanged
    /// into a new promise.
    pub fn catch<F>(&self, on_rejected: F) -> Promise<T, E>
    where
        F: FnOnce(E) -> Result<Next<T, E>, E> + Send + 'static,
    {
        self.derive(move |outcome| match outcome {
            Ok(value) => Ok(Next::Value(value)),
            Err(error) => on_rejected(error),
        })
    }

    /// Run `cleanup` once this promise settles, whichever way it went.
    ///
    /// The derived promise carries the original outcome, unless `cleanup`
    /// fails: then it rejects with the cleanup's error.
    ///
    /// # Examples
    ///
    /// ```
    /// use thenable::Promise;
    ///
    /// let promise = Promise::<i32, &str>::resolve(1).finally(|| Err("cleanup failed"));
    /// assert_eq!(promise.wait(), Err("cleanup failed"));
    /// ```
    pub fn finally<F>(&self, cleanup: F) -> Promise<T, E>
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        self.derive(move |outcome| {
            cleanup()?;
            outcome.map(Next::Value)
        })
    }

    fn derive<U, F>(&self, step: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T, E>) -> Result<Next<U, E>, E> + Send + 'static,
    {
        let derived = Promise::pending(Arc::clone(&self.options));
        let parent = Arc::clone(&self.cell);
        let cell = Arc::clone(&derived.cell);
        self.options.spawn(move || {
            let guard = SettleGuard::new(cell);
            // An abandoned parent leaves nothing to derive from; the guard
            // abandons this link as well.
            let Ok(outcome) = parent.try_wait() else {
                return;
            };
            adopt(guard.cell(), step(outcome));
        });
        derived
    }
}

/// Settle `cell` from a callback result, waiting out a nested promise first.
///
/// Leaves `cell` untouched if the nested promise is abandoned.
pub(crate) fn adopt<T, E>(cell: &SettlementCell<T, E>, next: Result<Next<T, E>, E>)
where
    T: Clone,
    E: Clone,
{
    let outcome = match next {
        Ok(Next::Value(value)) => Ok(value),
        Ok(Next::Promise(nested)) => match nested.cell.try_wait() {
            Ok(outcome) => outcome,
            Err(_) => return,
        },
        Err(error) => Err(error),
    };
    settle(cell, outcome);
}

pub(crate) fn settle<T, E>(cell: &SettlementCell<T, E>, outcome: Result<T, E>) {
    if let Err(err) = cell.settle(outcome) {
        warn!("discarding a second outcome: {}", err);
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Promise {
            cell: Arc::clone(&self.cell),
            options: Arc::clone(&self.options),
        }
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .field("options", &self.options)
            .finish()
    }
}

/// # Panics
///
/// Polling an abandoned promise panics, as [`Promise::wait`] does.
impl<T: Clone, E: Clone> Future for Promise<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.cell.poll_settled(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(err)) => panic!("{}", err),
            Poll::Pending => Poll::Pending,
        }
    }
}
