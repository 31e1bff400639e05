use std::fmt;
use std::mem;
use std::sync::Arc;
use std::thread;
use std::task::{Context, Poll, Waker};

use log::{debug, error, trace};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{Error, State};

/// The write-once slot behind every [`Promise`](crate::Promise).
///
/// Any number of threads may [`wait`](Self::wait) on the cell, before or after
/// it settles, and every one of them reads the same outcome. Async observers
/// go through [`poll_settled`](Self::poll_settled); all registered wakers are
/// woken on settlement.
///
/// A cell whose settler goes away without settling it (a panicking callback,
/// dropped resolver handles) is *abandoned*: its waiters are released with
/// [`Error::Abandoned`] instead of blocking forever. An abandoned cell still
/// reports [`State::Pending`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
/// use thenable::{Error, SettlementCell, State};
///
/// let cell = Arc::new(SettlementCell::<&str, ()>::new());
/// let reader = Arc::clone(&cell);
/// let task = thread::spawn(move || reader.wait());
///
/// cell.fulfill("🍓").unwrap();
/// assert_eq!(cell.reject(()), Err(Error::AlreadySettled { state: State::Fulfilled }));
/// assert_eq!(task.join().expect("The reader thread has panicked"), Ok("🍓"));
/// ```
pub struct SettlementCell<T, E> {
    inner: Mutex<Inner<T, E>>,
    settled: Condvar,
}

struct Inner<T, E> {
    outcome: Option<Result<T, E>>,
    wakers: Vec<Waker>,
    observed: bool,
    adopting: bool,
    abandoned: bool,
}

impl<T, E> Inner<T, E> {
    fn check_open(&self) -> Result<(), Error> {
        if let Some(current) = &self.outcome {
            return Err(Error::AlreadySettled {
                state: State::of(current),
            });
        }
        if self.abandoned {
            return Err(Error::Abandoned);
        }
        Ok(())
    }
}

impl<T: Clone, E: Clone> Inner<T, E> {
    fn observe(&mut self) -> Option<Result<T, E>> {
        let outcome = self.outcome.clone()?;
        self.observed = true;
        Some(outcome)
    }
}

impl<T, E> SettlementCell<T, E> {
    pub fn new() -> Self {
        SettlementCell {
            inner: Mutex::new(Inner {
                outcome: None,
                wakers: Vec::new(),
                observed: false,
                adopting: false,
                abandoned: false,
            }),
            settled: Condvar::new(),
        }
    }

    pub fn fulfill(&self, value: T) -> Result<(), Error> {
        self.settle(Ok(value))
    }

    pub fn reject(&self, error: E) -> Result<(), Error> {
        self.settle(Err(error))
    }

    /// Record `outcome` and release every waiter.
    ///
    /// Fails with [`Error::AlreadySettled`] if the cell has settled before, and
    /// with [`Error::Adopting`] while it is reserved for another promise's
    /// outcome; the earlier claim is left untouched.
    pub fn settle(&self, outcome: Result<T, E>) -> Result<(), Error> {
        let inner = self.inner.lock();
        inner.check_open()?;
        if inner.adopting {
            return Err(Error::Adopting);
        }
        self.publish(inner, outcome);
        Ok(())
    }

    /// Claim the cell for an outcome that arrives later through
    /// [`settle_reserved`](Self::settle_reserved). Plain settles fail from
    /// here on.
    pub(crate) fn reserve(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        if inner.adopting {
            return Err(Error::Adopting);
        }
        inner.adopting = true;
        Ok(())
    }

    pub(crate) fn settle_reserved(&self, outcome: Result<T, E>) -> Result<(), Error> {
        let inner = self.inner.lock();
        inner.check_open()?;
        self.publish(inner, outcome);
        Ok(())
    }

    fn publish(&self, mut inner: MutexGuard<'_, Inner<T, E>>, outcome: Result<T, E>) {
        trace!("settling cell as {:?}", State::of(&outcome));
        inner.outcome = Some(outcome);
        let wakers = mem::take(&mut inner.wakers);
        drop(inner);
        self.settled.notify_all();
        for waker in wakers {
            waker.wake();
        }
    }

    /// Give up on a cell that can no longer be settled and release its
    /// waiters. Returns `false` if the cell had already settled or been
    /// abandoned.
    pub(crate) fn abandon(&self) -> bool {
        let wakers = {
            let mut inner = self.inner.lock();
            if inner.outcome.is_some() || inner.abandoned {
                return false;
            }
            inner.abandoned = true;
            mem::take(&mut inner.wakers)
        };
        self.settled.notify_all();
        for waker in wakers {
            waker.wake();
        }
        true
    }

    pub fn state(&self) -> State {
        match &self.inner.lock().outcome {
            Some(outcome) => State::of(outcome),
            None => State::Pending,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.inner.lock().outcome.is_some()
    }

    pub fn is_abandoned(&self) -> bool {
        self.inner.lock().abandoned
    }
}

impl<T: Clone, E: Clone> SettlementCell<T, E> {
    /// Block the current thread until the cell settles and return its outcome.
    ///
    /// Returns immediately if the cell has already settled.
    ///
    /// # Panics
    ///
    /// Panics if the cell is abandoned; use [`try_wait`](Self::try_wait) to
    /// handle that case.
    pub fn wait(&self) -> Result<T, E> {
        match self.try_wait() {
            Ok(outcome) => outcome,
            Err(err) => panic!("{}", err),
        }
    }

    /// Like [`wait`](Self::wait), but reports an abandoned cell as
    /// [`Error::Abandoned`].
    pub fn try_wait(&self) -> Result<Result<T, E>, Error> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(outcome) = inner.observe() {
                return Ok(outcome);
            }
            if inner.abandoned {
                return Err(Error::Abandoned);
            }
            self.settled.wait(&mut inner);
        }
    }

    pub fn try_outcome(&self) -> Option<Result<T, E>> {
        self.inner.lock().observe()
    }

    pub fn poll_settled(&self, cx: &mut Context<'_>) -> Poll<Result<Result<T, E>, Error>> {
        let mut inner = self.inner.lock();
        if let Some(outcome) = inner.observe() {
            return Poll::Ready(Ok(outcome));
        }
        if inner.abandoned {
            return Poll::Ready(Err(Error::Abandoned));
        }
        if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            inner.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Abandons its cell when dropped before the cell settles, so a worker that
/// unwinds out of a user callback releases the cell's waiters.
pub(crate) struct SettleGuard<T, E> {
    cell: Arc<SettlementCell<T, E>>,
}

impl<T, E> SettleGuard<T, E> {
    pub(crate) fn new(cell: Arc<SettlementCell<T, E>>) -> Self {
        SettleGuard { cell }
    }

    pub(crate) fn cell(&self) -> &SettlementCell<T, E> {
        &self.cell
    }
}

impl<T, E> Drop for SettleGuard<T, E> {
    fn drop(&mut self) {
        if self.cell.abandon() {
            if thread::panicking() {
                error!("promise worker panicked before settling; its promise is abandoned");
            } else {
                error!("promise worker exited without settling; its promise is abandoned");
            }
        }
    }
}

impl<T, E> Default for SettlementCell<T, E> {
    fn default() -> Self {
        SettlementCell::new()
    }
}

impl<T, E> fmt::Debug for SettlementCell<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettlementCell")
            .field("state", &self.state())
            .finish()
    }
}

impl<T, E> Drop for SettlementCell<T, E> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if matches!(inner.outcome, Some(Err(_))) && !inner.observed {
            debug!("dropping a rejected promise whose rejection was never observed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SettleGuard, SettlementCell};
    use crate::{Error, State};
    use futures::executor::block_on;
    use std::future::poll_fn;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_settles_exactly_once() {
        let cell = SettlementCell::<i32, String>::new();
        assert_eq!(cell.state(), State::Pending);
        cell.fulfill(1).unwrap();

        assert_eq!(
            cell.fulfill(2),
            Err(Error::AlreadySettled { state: State::Fulfilled })
        );
        assert_eq!(
            cell.reject("late".into()),
            Err(Error::AlreadySettled { state: State::Fulfilled })
        );
        assert_eq!(cell.state(), State::Fulfilled);
        assert_eq!(cell.wait(), Ok(1));
    }

    #[test]
    fn test_rejection_is_kept() {
        let cell = SettlementCell::<i32, &str>::new();
        cell.reject("boom").unwrap();
        assert_eq!(
            cell.fulfill(3),
            Err(Error::AlreadySettled { state: State::Rejected })
        );
        assert_eq!(cell.try_outcome(), Some(Err("boom")));
    }

    #[test]
    fn test_many_waiters_before_settlement() {
        let cell = Arc::new(SettlementCell::<String, ()>::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || cell.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        cell.fulfill("🍓".into()).unwrap();

        for task in tasks {
            let outcome = task.join().expect("The waiter thread has panicked");
            assert_eq!(outcome, Ok("🍓".to_string()));
        }
    }

    #[test]
    fn test_many_waiters_after_settlement() {
        let cell = Arc::new(SettlementCell::<i32, ()>::new());
        cell.fulfill(7).unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || cell.wait())
            })
            .collect();
        for task in tasks {
            assert_eq!(task.join().expect("The waiter thread has panicked"), Ok(7));
        }
    }

    #[test]
    fn test_try_outcome_does_not_block() {
        let cell = SettlementCell::<i32, ()>::new();
        assert_eq!(cell.try_outcome(), None);
        assert!(!cell.is_settled());
        cell.fulfill(5).unwrap();
        assert!(cell.is_settled());
        assert_eq!(cell.try_outcome(), Some(Ok(5)));
    }

    #[test]
    fn test_poll_from_two_executors() {
        let cell = Arc::new(SettlementCell::<i32, String>::new());
        let first = Arc::clone(&cell);
        let second = Arc::clone(&cell);
        let task1 = thread::spawn(move || block_on(poll_fn(|cx| first.poll_settled(cx))));
        let task2 = thread::spawn(move || block_on(poll_fn(|cx| second.poll_settled(cx))));

        thread::sleep(Duration::from_millis(50));
        cell.reject("reject!!".into()).unwrap();

        assert_eq!(
            task1.join().expect("The task1 thread has panicked"),
            Ok(Err("reject!!".to_string()))
        );
        assert_eq!(
            task2.join().expect("The task2 thread has panicked"),
            Ok(Err("reject!!".to_string()))
        );
    }

    #[test]
    fn test_concurrent_settlers_one_wins() {
        let cell = Arc::new(SettlementCell::<usize, usize>::new());
        let barrier = Arc::new(Barrier::new(8));
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let cell = Arc::clone(&cell);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let attempt = if i % 2 == 0 { cell.fulfill(i) } else { cell.reject(i) };
                    (i, attempt)
                })
            })
            .collect();

        let winners: Vec<usize> = tasks
            .into_iter()
            .map(|task| task.join().expect("The settler thread has panicked"))
            .filter(|(_, attempt)| attempt.is_ok())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(winners.len(), 1);

        let winner = winners[0];
        let expected = if winner % 2 == 0 { Ok(winner) } else { Err(winner) };
        assert_eq!(cell.wait(), expected);
    }

    #[test]
    fn test_reserved_cell_refuses_plain_settles() {
        let cell = SettlementCell::<i32, String>::new();
        cell.reserve().unwrap();
        assert_eq!(cell.fulfill(1), Err(Error::Adopting));
        assert_eq!(cell.reject("late".into()), Err(Error::Adopting));
        assert_eq!(cell.reserve(), Err(Error::Adopting));
        assert_eq!(cell.state(), State::Pending);

        cell.settle_reserved(Ok(2)).unwrap();
        assert_eq!(cell.wait(), Ok(2));
    }

    #[test]
    fn test_abandon_releases_waiters() {
        let cell = Arc::new(SettlementCell::<i32, ()>::new());
        let waiter = Arc::clone(&cell);
        let poller = Arc::clone(&cell);
        let task1 = thread::spawn(move || waiter.try_wait());
        let task2 = thread::spawn(move || block_on(poll_fn(|cx| poller.poll_settled(cx))));

        thread::sleep(Duration::from_millis(50));
        assert!(cell.abandon());
        assert!(!cell.abandon());

        assert_eq!(task1.join().expect("The task1 thread has panicked"), Err(Error::Abandoned));
        assert_eq!(task2.join().expect("The task2 thread has panicked"), Err(Error::Abandoned));
        assert_eq!(cell.fulfill(1), Err(Error::Abandoned));
        assert!(cell.is_abandoned());
        assert_eq!(cell.state(), State::Pending);
    }

    #[test]
    fn test_abandon_after_settlement_is_ignored() {
        let cell = SettlementCell::<i32, ()>::new();
        cell.fulfill(4).unwrap();
        assert!(!cell.abandon());
        assert_eq!(cell.try_wait(), Ok(Ok(4)));
    }

    #[test]
    fn test_guard_abandons_on_panic() {
        let cell = Arc::new(SettlementCell::<i32, ()>::new());
        let guarded = Arc::clone(&cell);
        let worker = thread::spawn(move || {
            let _guard = SettleGuard::new(guarded);
            panic!("callback failed");
        });
        assert!(worker.join().is_err());
        assert_eq!(cell.try_wait(), Err(Error::Abandoned));
    }

    #[test]
    fn test_guard_leaves_settled_cell_alone() {
        let cell = Arc::new(SettlementCell::<i32, ()>::new());
        {
            let guard = SettleGuard::new(Arc::clone(&cell));
            guard.cell().fulfill(9).unwrap();
        }
        assert!(!cell.is_abandoned());
        assert_eq!(cell.wait(), Ok(9));
    }
}
