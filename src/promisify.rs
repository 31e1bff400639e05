use std::sync::Arc;

use crate::cell::SettleGuard;
use crate::options::Options;
use crate::promise::{self, Promise};

/// Turn a blocking function into one that returns a [`Promise`].
///
/// Every call starts `f` on its own worker thread and returns a fresh
/// promise for that call alone. Functions of several arguments take them as
/// a tuple.
///
/// # Examples
///
/// ```
/// use std::thread;
/// use std::time::Duration;
/// use thenable::promisify;
///
/// let add = promisify(|(a, b): (i32, i32)| -> Result<i32, String> {
///     thread::sleep(Duration::from_millis(10));
///     Ok(a + b)
/// });
/// let first = add((1, 2));
/// let second = add((3, 4));
/// assert_eq!(first.wait(), Ok(3));
/// assert_eq!(second.wait(), Ok(7));
/// ```
pub fn promisify<A, T, E, F>(f: F) -> impl Fn(A) -> Promise<T, E> + Clone + Send + Sync + 'static
where
    A: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(A) -> Result<T, E> + Send + Sync + 'static,
{
    promisify_with(Options::default(), f)
}

/// [`promisify`] with explicit worker thread options.
pub fn promisify_with<A, T, E, F>(
    options: Options,
    f: F,
) -> impl Fn(A) -> Promise<T, E> + Clone + Send + Sync + 'static
where
    A: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(A) -> Result<T, E> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let options = Arc::new(options);
    move |args: A| {
        let promise = Promise::pending(Arc::clone(&options));
        let cell = Arc::clone(&promise.cell);
        let f = Arc::clone(&f);
        options.spawn(move || {
            let guard = SettleGuard::new(cell);
            promise::settle(guard.cell(), f(args));
        });
        promise
    }
}
