use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{Result, SstashError};

/// Hierarchical cancellation signal.
///
/// Cancelling closes a channel (by dropping its only sender), so any task
/// blocked in a `select!` over [`CancelToken::done`] wakes immediately; quick
/// paths just poll the flag. One source fans out to any number of tokens.
pub struct CancelSource {
    flag: Arc<AtomicBool>,
    keep_open: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,
}

#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    closed: Receiver<()>,
}

pub fn cancel_pair() -> (CancelSource, CancelToken) {
    let (tx, rx) = bounded::<()>(0);
    let flag = Arc::new(AtomicBool::new(false));
    let source = CancelSource {
        flag: Arc::clone(&flag),
        keep_open: Mutex::new(Some(tx)),
        closed: rx.clone(),
    };
    (source, CancelToken { flag, closed: rx })
}

impl CancelSource {
    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.keep_open.lock().unwrap().take();
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            flag: Arc::clone(&self.flag),
            closed: self.closed.clone(),
        }
    }
}

impl CancelToken {
    /// A token that is never cancelled (tests, one-shot tools).
    pub fn never() -> Self {
        let (source, token) = cancel_pair();
        // The forgotten sender keeps the channel open for the process lifetime.
        std::mem::forget(source);
        token
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SstashError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Channel that becomes ready (disconnected) once cancellation fires.
    /// Intended for `crossbeam_channel::select!` arms.
    pub fn done(&self) -> &Receiver<()> {
        &self.closed
    }

    /// Sleep for `duration`, waking early with `Cancelled` if the signal fires.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        match self.closed.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => Ok(()),
            _ => Err(SstashError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn starts_uncancelled() {
        let (_source, token) = cancel_pair();
        assert!(!token.is_cancelled());
        token.check().unwrap();
    }

    #[test]
    fn cancel_is_observed_by_all_tokens() {
        let (source, token) = cancel_pair();
        let other = source.token();
        source.cancel();
        assert!(token.is_cancelled());
        assert!(other.is_cancelled());
        assert!(token.check().is_err());
        // The done channel is disconnected, so recv completes immediately.
        assert!(token.done().recv().is_err());
    }

    #[test]
    fn cancel_is_idempotent() {
        let (source, token) = cancel_pair();
        source.cancel();
        source.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn sleep_returns_after_timeout() {
        let (_source, token) = cancel_pair();
        token.sleep(Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn sleep_wakes_on_cancel() {
        let (source, token) = cancel_pair();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let result = token.sleep(Duration::from_secs(30));
            (result, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        source.cancel();
        let (result, elapsed) = handle.join().unwrap();
        assert!(result.is_err());
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn never_token_sleeps_full_duration() {
        let token = CancelToken::never();
        token.sleep(Duration::from_millis(5)).unwrap();
        assert!(!token.is_cancelled());
    }
}
