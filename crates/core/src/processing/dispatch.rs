use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::Result;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Small fixed pool that runs submitted jobs off the caller's thread.
///
/// Capture threads hand work over and continue immediately. A panicking job
/// is caught and logged; the worker keeps serving the queue.
pub struct Dispatcher {
    name: &'static str,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(name: &'static str, workers: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(name, receiver))?;
            handles.push(handle);
        }

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
        })
    }

    /// Queues `job`. Returns `false` once the dispatcher has been shut down.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match lock(&self.sender).as_ref() {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.sender).is_some()
    }

    /// Stops accepting work, lets queued jobs drain and joins the workers.
    /// Safe to call repeatedly and from a worker thread.
    pub fn shutdown(&self) {
        let Some(sender) = lock(&self.sender).take() else {
            return;
        };
        drop(sender);

        let handles: Vec<JoinHandle<()>> = lock(&self.workers).drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        tracing::debug!(dispatcher = self.name, "dispatcher shut down");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

fn worker_loop(name: &'static str, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = match lock(&receiver).recv() {
            Ok(job) => job,
            Err(_) => break,
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(dispatcher = name, %message, "dispatched job panicked");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn runs_jobs_off_the_calling_thread() {
        let dispatcher = Dispatcher::new("test-dispatch", 2).unwrap();
        let (tx, rx) = mpsc::channel();
        let caller = thread::current().id();

        assert!(dispatcher.execute(move || {
            let _ = tx.send(thread::current().id());
        }));

        let worker = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_ne!(worker, caller);
    }

    #[test]
    fn survives_panicking_jobs() {
        let dispatcher = Dispatcher::new("test-dispatch", 1).unwrap();
        let (tx, rx) = mpsc::channel();

        dispatcher.execute(|| panic!("malformed sample"));
        dispatcher.execute(move || {
            let _ = tx.send(42);
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
    }

    #[test]
    fn shutdown_is_idempotent_and_rejects_new_work() {
        let dispatcher = Dispatcher::new("test-dispatch", 1).unwrap();
        dispatcher.shutdown();
        dispatcher.shutdown();
        assert!(!dispatcher.is_running());
        assert!(!dispatcher.execute(|| {}));
    }
}
