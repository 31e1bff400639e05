use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, error, trace};
use parking_lot::Mutex;

use crate::cell::SettlementCell;
use crate::promise::Promise;

struct Slots<T> {
    values: Vec<Option<T>>,
    fulfilled: usize,
}

/// Wait for every promise.
///
/// Fulfills with the values in input order once all inputs fulfill, or
/// rejects with the first rejection to arrive. An empty input fulfills with
/// an empty vector. If an input is abandoned before the aggregate settles,
/// the aggregate is abandoned too.
///
/// Every input is watched by its own thread, and that thread stays blocked
/// until its input settles. An input that never settles keeps one thread
/// parked for the life of the process, even after the aggregate has
/// rejected.
///
/// # Examples
///
/// ```
/// use thenable::{all, Promise};
///
/// let joined = all(vec![
///     Promise::<i32, String>::resolve(1),
///     Promise::resolve(2),
///     Promise::resolve(3),
/// ]);
/// assert_eq!(joined.wait(), Ok(vec![1, 2, 3]));
/// ```
pub fn all<T, E, I>(promises: I) -> Promise<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    let aggregate = Promise::pending(
        promises
            .first()
            .map(|p| Arc::clone(&p.options))
            .unwrap_or_default(),
    );

    if promises.is_empty() {
        let cell = Arc::clone(&aggregate.cell);
        aggregate
            .options
            .spawn(move || settle_aggregate(&cell, Ok(Vec::new())));
        return aggregate;
    }

    let slots = Arc::new(Mutex::new(Slots {
        values: (0..promises.len()).map(|_| None).collect(),
        fulfilled: 0,
    }));
    for (index, promise) in promises.into_iter().enumerate() {
        let cell = Arc::clone(&aggregate.cell);
        let slots = Arc::clone(&slots);
        let options = Arc::clone(&promise.options);
        options.spawn(move || {
            let value = match promise.try_wait() {
                Ok(Ok(value)) => value,
                Ok(Err(error)) => return settle_aggregate(&cell, Err(error)),
                Err(_) => return abandon_aggregate(&cell),
            };
            if cell.is_settled() {
                return;
            }
            let values = {
                let mut slots = slots.lock();
                slots.values[index] = Some(value);
                slots.fulfilled += 1;
                if slots.fulfilled < slots.values.len() {
                    return;
                }
                slots.values.drain(..).flatten().collect()
            };
            settle_aggregate(&cell, Ok(values));
        });
    }
    aggregate
}

/// Settle with whichever promise settles first, fulfilled or rejected.
///
/// Abandoned inputs drop out of the race; the aggregate is abandoned only
/// once every input has been. With no inputs the returned promise never
/// settles.
///
/// As with [`all`], each input is watched by a thread that stays blocked
/// until that input settles, so a losing input that never settles keeps its
/// thread parked after the race is decided.
pub fn race<T, E, I>(promises: I) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    let aggregate = Promise::pending(
        promises
            .first()
            .map(|p| Arc::clone(&p.options))
            .unwrap_or_default(),
    );

    if promises.is_empty() {
        debug!("race called with no promises; the result will never settle");
    }
    let remaining = Arc::new(AtomicUsize::new(promises.len()));
    for promise in promises {
        let cell = Arc::clone(&aggregate.cell);
        let remaining = Arc::clone(&remaining);
        let options = Arc::clone(&promise.options);
        options.spawn(move || match promise.try_wait() {
            Ok(outcome) => settle_aggregate(&cell, outcome),
            Err(_) => {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    abandon_aggregate(&cell);
                }
            }
        });
    }
    aggregate
}

fn abandon_aggregate<T, E>(cell: &SettlementCell<T, E>) {
    if cell.abandon() {
        error!("combinator input was abandoned; abandoning the combined promise");
    }
}

// Losing inputs settle after the aggregate; that is expected.
fn settle_aggregate<T, E>(cell: &SettlementCell<T, E>, outcome: Result<T, E>) {
    if let Err(err) = cell.settle(outcome) {
        trace!("ignoring a late combinator input: {}", err);
    }
}
