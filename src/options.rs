//! Worker thread options

use std::sync::Arc;
use std::thread;

use log::{error, trace};
use parking_lot::Mutex;

/// Options for the threads that settle a promise.
///
/// Links chained from a promise, and combinator observers attached to it,
/// run with the same options.
///
/// When a worker thread cannot be started (for example a `stack_size` the
/// system refuses), the work runs on the calling thread instead. A call such
/// as [`then`](crate::Promise::then) then blocks its caller until the parent
/// promise settles, and [`Promise::new`](crate::Promise::new) blocks until
/// the resolver returns.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub stack_size: Option<usize>,
    pub name: Option<String>,
}

impl Options {
    pub fn new() -> Options {
        Options::default()
    }

    pub fn stack_size(&mut self, size: usize) -> &mut Options {
        self.stack_size = Some(size);
        self
    }

    pub fn name<S: Into<String>>(&mut self, name: S) -> &mut Options {
        self.name = Some(name.into());
        self
    }

    /// Run `job` on a fresh thread.
    ///
    /// If the thread cannot be started the job runs on the calling thread, so
    /// whatever it settles still settles. The caller blocks for as long as
    /// the job does: a `then` whose worker falls back waits on its parent
    /// before returning.
    pub(crate) fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut builder = thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        let slot = Arc::new(Mutex::new(Some(job)));
        let worker = Arc::clone(&slot);
        let spawned = builder.spawn(move || {
            let job = worker.lock().take();
            if let Some(job) = job {
                job();
            }
        });

        match spawned {
            Ok(handle) => trace!("spawned promise worker {:?}", handle.thread().id()),
            Err(err) => {
                error!("failed to spawn promise worker, running inline: {}", err);
                let job = slot.lock().take();
                if let Some(job) = job {
                    job();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Options;
    use std::sync::mpsc::channel;
    use std::thread;

    #[test]
    fn test_builder_setters() {
        let mut opts = Options::new();
        opts.name("settler").stack_size(256 * 1024);
        assert_eq!(opts.name.as_deref(), Some("settler"));
        assert_eq!(opts.stack_size, Some(256 * 1024));
    }

    #[test]
    fn test_spawn_uses_thread_name() {
        let mut opts = Options::new();
        opts.name("settler");
        let (tx, rx) = channel();
        opts.spawn(move || {
            tx.send(thread::current().name().map(String::from)).unwrap();
        });
        assert_eq!(rx.recv().unwrap(), Some("settler".to_string()));
    }

    #[test]
    fn test_spawn_runs_off_the_caller() {
        let caller = thread::current().id();
        let (tx, rx) = channel();
        Options::default().spawn(move || tx.send(thread::current().id()).unwrap());
        assert_ne!(rx.recv().unwrap(), caller);
    }
}
