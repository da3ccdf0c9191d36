use crossbeam_channel::{bounded, select, Receiver, Sender};

use sstash_types::cancel::CancelToken;
use sstash_types::error::{Result, SstashError};

/// Counting semaphore built on a bounded channel: holding a permit is
/// occupying a slot in the channel, so acquisition can be selected against
/// the cancellation signal like any other channel op.
pub struct Semaphore {
    slots: Sender<()>,
    release: Receiver<()>,
}

impl Semaphore {
    pub fn new(capacity: usize) -> Self {
        let (slots, release) = bounded(capacity.max(1));
        Semaphore { slots, release }
    }

    /// Block until a permit is available or cancellation fires.
    pub fn acquire(&self, cancel: &CancelToken) -> Result<Permit<'_>> {
        select! {
            send(self.slots, ()) -> res => {
                res.map_err(|_| SstashError::Other("semaphore closed".into()))?;
                Ok(Permit { release: &self.release })
            }
            recv(cancel.done()) -> _ => Err(SstashError::Cancelled),
        }
    }

    /// Permits currently held. Zero once every guard has dropped.
    pub fn in_use(&self) -> usize {
        self.slots.len()
    }
}

/// RAII permit; dropping it releases the slot.
pub struct Permit<'a> {
    release: &'a Receiver<()>,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.release.try_recv();
    }
}
