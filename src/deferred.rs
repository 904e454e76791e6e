//! Operations that must run on the thread owning the presentation context.
//!
//! The frame worker [`submit`](DeferredQueue::submit)s closures and, when it
//! needs their effect before continuing, [`wait`](DeferredQueue::wait)s on the
//! returned [`Ticket`]. The context thread calls [`drain`](DeferredQueue::drain)
//! on its own schedule; every completion is acknowledged through a condition
//! variable. [`close`](DeferredQueue::close) releases all waiters with
//! [`Error::QueueClosed`] so shutdown cannot deadlock.
//!
//! Several threads may drain at once. Completion is tracked per ticket, and an
//! operation that panics still completes its ticket, failing its waiter.

use std::collections::{BTreeSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::util::{Error, Result};

type Operation = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a submitted operation. Tickets increase monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

struct State {
    pending: VecDeque<(Ticket, Operation)>,
    next_ticket: u64,
    /// Every ticket below this value has run.
    completed: u64,
    /// Tickets at or above `completed` that finished out of order.
    finished: BTreeSet<u64>,
    /// Finished tickets whose operation panicked, until their waiter sees it.
    panicked: BTreeSet<u64>,
    closed: bool,
    context_thread: Option<ThreadId>,
}

impl State {
    fn finish(&mut self, ticket: u64, ok: bool) {
        if !ok {
            self.panicked.insert(ticket);
        }
        self.finished.insert(ticket);
        while self.finished.remove(&self.completed) {
            self.completed += 1;
        }
    }

    fn is_finished(&self, ticket: u64) -> bool {
        ticket < self.completed || self.finished.contains(&ticket)
    }
}

/// FIFO queue of context-bound operations.
pub struct DeferredQueue {
    state: Mutex<State>,
    /// Signalled on every completion and on close.
    done: Condvar,
    /// Signalled on every submission.
    submitted: Condvar,
}

impl Default for DeferredQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                pending: VecDeque::new(),
                next_ticket: 0,
                completed: 0,
                finished: BTreeSet::new(),
                panicked: BTreeSet::new(),
                closed: false,
                context_thread: None,
            }),
            done: Condvar::new(),
            submitted: Condvar::new(),
        }
    }

    /// Declare the calling thread the context owner. A `wait` issued from
    /// that thread drains inline instead of blocking on itself.
    pub fn bind_context_thread(&self) {
        self.state.lock().context_thread = Some(thread::current().id());
    }

    pub fn submit(&self, op: impl FnOnce() + Send + 'static) -> Result<Ticket> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::QueueClosed);
        }
        let ticket = Ticket(state.next_ticket);
        state.next_ticket += 1;
        state.pending.push_back((ticket, Box::new(op)));
        drop(state);
        self.submitted.notify_all();
        Ok(ticket)
    }

    /// Run every pending operation in submission order. Returns how many ran.
    ///
    /// Operations run without the queue lock held, so they may submit more work.
    pub fn drain(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.state.lock().pending.pop_front();
            let Some((ticket, op)) = next else {
                break;
            };
            let ok = panic::catch_unwind(AssertUnwindSafe(op)).is_ok();
            if !ok {
                tracing::error!("Deferred operation {} panicked", ticket.0);
            }
            ran += 1;
            let mut state = self.state.lock();
            state.finish(ticket.0, ok);
            drop(state);
            self.done.notify_all();
        }
        ran
    }

    /// Block until an operation is pending or `timeout` passes, then drain.
    pub fn drain_timeout(&self, timeout: Duration) -> usize {
        {
            let mut state = self.state.lock();
            if state.pending.is_empty() && !state.closed {
                self.submitted.wait_for(&mut state, timeout);
            }
        }
        self.drain()
    }

    /// Block until `ticket` has run.
    pub fn wait(&self, ticket: Ticket) -> Result<()> {
        if self.is_context_thread() {
            self.drain();
        }
        let mut state = self.state.lock();
        while !state.is_finished(ticket.0) {
            if state.closed {
                return Err(Error::QueueClosed);
            }
            self.done.wait(&mut state);
        }
        if state.panicked.remove(&ticket.0) {
            return Err(Error::other(format!("deferred operation {} panicked", ticket.0)));
        }
        Ok(())
    }

    /// Block until every operation submitted so far has run.
    pub fn wait_idle(&self) -> Result<()> {
        let last = {
            let state = self.state.lock();
            if state.next_ticket == 0 {
                return Ok(());
            }
            Ticket(state.next_ticket - 1)
        };
        self.wait(last)
    }

    /// Reject new submissions and wake every waiter. Pending operations are dropped.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        let dropped = state.pending.len();
        state.pending.clear();
        drop(state);
        if dropped > 0 {
            tracing::warn!("Deferred queue closed with {} pending operations", dropped);
        }
        self.done.notify_all();
        self.submitted.notify_all();
    }

    /// Accept submissions again after [`close`](Self::close).
    pub fn reopen(&self) {
        let mut state = self.state.lock();
        state.closed = false;
        // Tickets dropped by close() count as finished.
        state.completed = state.next_ticket;
        state.finished.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn is_context_thread(&self) -> bool {
        self.state.lock().context_thread == Some(thread::current().id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_drain_runs_in_order() {
        let queue = DeferredQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let log = Arc::clone(&log);
            queue.submit(move || log.lock().push(i)).unwrap();
        }
        assert_eq!(queue.pending_len(), 5);
        assert_eq!(queue.drain(), 5);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
        queue.wait_idle().unwrap();
    }

    #[test]
    fn test_worker_waits_for_context_thread() {
        let queue = Arc::new(DeferredQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let worker = {
            let queue = Arc::clone(&queue);
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                let c = Arc::clone(&counter);
                let ticket = queue.submit(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })?;
                queue.wait(ticket)?;
                Ok::<_, Error>(counter.load(Ordering::SeqCst))
            })
        };

        // Context thread.
        let mut drained = 0;
        while drained == 0 {
            drained = queue.drain_timeout(Duration::from_millis(10));
        }
        assert_eq!(worker.join().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_close_releases_waiters() {
        let queue = Arc::new(DeferredQueue::new());
        let ticket = queue.submit(|| {}).unwrap();
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait(ticket))
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(matches!(waiter.join().unwrap(), Err(Error::QueueClosed)));
        assert!(matches!(queue.submit(|| {}), Err(Error::QueueClosed)));

        queue.reopen();
        let t = queue.submit(|| {}).unwrap();
        assert_eq!(queue.drain(), 1);
        queue.wait(t).unwrap();
    }

    #[test]
    fn test_panicking_operation_fails_its_waiter() {
        let queue = DeferredQueue::new();
        let bad = queue.submit(|| panic!("context lost")).unwrap();
        let good = queue.submit(|| {}).unwrap();
        assert_eq!(queue.drain(), 2);
        assert!(queue.wait(bad).is_err());
        queue.wait(good).unwrap();
        queue.wait_idle().unwrap();
    }

    #[test]
    fn test_out_of_order_completion() {
        let mut state = DeferredQueue::new().state.into_inner();
        state.finish(1, true);
        assert!(state.is_finished(1));
        assert!(!state.is_finished(0));
        assert_eq!(state.completed, 0);
        state.finish(0, true);
        assert_eq!(state.completed, 2);
        assert!(state.finished.is_empty());
    }

    #[test]
    fn test_concurrent_drainers() {
        let queue = Arc::new(DeferredQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let tickets: Vec<_> = (0..64)
            .map(|_| {
                let c = Arc::clone(&counter);
                queue
                    .submit(move || {
                        c.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap()
            })
            .collect();
        let drainers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.drain())
            })
            .collect();
        let ran: usize = drainers.into_iter().map(|d| d.join().unwrap()).sum();
        assert_eq!(ran, 64);
        for t in tickets {
            queue.wait(t).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn test_wait_on_context_thread_drains_inline() {
        let queue = DeferredQueue::new();
        queue.bind_context_thread();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        let ticket = queue
            .submit(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        queue.wait(ticket).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
