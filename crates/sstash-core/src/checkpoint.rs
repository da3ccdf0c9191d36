use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver, Sender};

/// Two-outcome rendezvous gating the restore link phase.
///
/// Every task registers via `add` up front and reports in with `done`; when
/// the counter reaches zero the proceed channel closes and all waiters run.
/// Any task calling `abort` closes the abort channel instead, and nobody
/// links. Exactly one of the two channels returned by `wait` ever closes.
/// Once finished, further `add`/`done`/`abort` calls are no-ops.
pub struct Barrier {
    inner: Mutex<Inner>,
}

struct Inner {
    count: i64,
    finished: bool,
    // Dropping a sender disconnects its channel, which is the "close"
    // signal waiters select on. Exactly one of these is ever taken.
    abort_tx: Option<Sender<()>>,
    proceed_tx: Option<Sender<()>>,
    abort_rx: Receiver<()>,
    proceed_rx: Receiver<()>,
}

impl Barrier {
    pub fn new() -> Self {
        let (abort_tx, abort_rx) = bounded(1);
        let (proceed_tx, proceed_rx) = bounded(1);
        Barrier {
            inner: Mutex::new(Inner {
                count: 0,
                finished: false,
                abort_tx: Some(abort_tx),
                proceed_tx: Some(proceed_tx),
                abort_rx,
                proceed_rx,
            }),
        }
    }

    pub fn add(&self, n: i64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.finished {
            return;
        }
        inner.count += n;
        if inner.count <= 0 {
            inner.finished = true;
            inner.proceed_tx.take();
        }
    }

    pub fn done(&self) {
        self.add(-1);
    }

    pub fn abort(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.finished {
            return;
        }
        inner.finished = true;
        inner.abort_tx.take();
    }

    /// Returns `(abort, proceed)` channels. Select on both; the one that
    /// disconnects is the outcome.
    pub fn wait(&self) -> (Receiver<()>, Receiver<()>) {
        let inner = self.inner.lock().unwrap();
        (inner.abort_rx.clone(), inner.proceed_rx.clone())
    }
}

impl Default for Barrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::select;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Outcome {
        Proceed,
        Abort,
        Timeout,
    }

    fn outcome(barrier: &Barrier, timeout: Duration) -> Outcome {
        let (abort_rx, proceed_rx) = barrier.wait();
        select! {
            recv(abort_rx) -> _ => Outcome::Abort,
            recv(proceed_rx) -> _ => Outcome::Proceed,
            default(timeout) => Outcome::Timeout,
        }
    }

    #[test]
    fn all_done_proceeds() {
        let barrier = Barrier::new();
        barrier.add(3);
        barrier.done();
        barrier.done();
        assert_eq!(outcome(&barrier, Duration::from_millis(10)), Outcome::Timeout);
        barrier.done();
        assert_eq!(outcome(&barrier, Duration::from_millis(10)), Outcome::Proceed);
    }

    #[test]
    fn any_abort_aborts_all() {
        let barrier = Barrier::new();
        barrier.add(2);
        barrier.done();
        barrier.abort();
        assert_eq!(outcome(&barrier, Duration::from_millis(10)), Outcome::Abort);
        // Every waiter observes the same outcome.
        assert_eq!(outcome(&barrier, Duration::from_millis(10)), Outcome::Abort);
    }

    #[test]
    fn add_after_finish_is_noop() {
        let barrier = Barrier::new();
        barrier.add(1);
        barrier.done();
        assert_eq!(outcome(&barrier, Duration::from_millis(10)), Outcome::Proceed);
        barrier.add(5);
        barrier.abort();
        assert_eq!(outcome(&barrier, Duration::from_millis(10)), Outcome::Proceed);
    }

    #[test]
    fn abort_is_idempotent_and_wins_over_later_done() {
        let barrier = Barrier::new();
        barrier.add(2);
        barrier.abort();
        barrier.abort();
        barrier.done();
        barrier.done();
        assert_eq!(outcome(&barrier, Duration::from_millis(10)), Outcome::Abort);
    }

    #[test]
    fn zero_participants_proceeds_immediately() {
        let barrier = Barrier::new();
        barrier.add(0);
        assert_eq!(outcome(&barrier, Duration::from_millis(10)), Outcome::Proceed);
    }

    #[test]
    fn concurrent_participants_all_observe_proceed() {
        let barrier = Arc::new(Barrier::new());
        let n = 8;
        barrier.add(n);
        let mut handles = Vec::new();
        for _ in 0..n {
            let barrier = Arc::clone(&barrier);
            handles.push(std::thread::spawn(move || {
                barrier.done();
                outcome(&barrier, Duration::from_secs(5))
            }));
        }
        for h in handles {
            assert_eq!(h.join().unwrap(), Outcome::Proceed);
        }
    }
}
