//! Delegate hand-off.
//!
//! Every completion, progress and status delegate goes through here. The
//! thread policy of the request decides the destination: inline on the I/O
//! worker, or queued until the caller drains it from [`HttpManager::tick`].
//!
//! [`HttpManager::tick`]: crate::HttpManager::tick

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::http::types::DelegateThreadPolicy;

pub(crate) type Delivery = Box<dyn FnOnce() + Send>;

pub(crate) struct Dispatcher {
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Mutex<mpsc::UnboundedReceiver<Delivery>>,
    pending: AtomicUsize,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            pending: AtomicUsize::new(0),
        }
    }

    pub(crate) fn deliver(&self, policy: DelegateThreadPolicy, job: Delivery) {
        match policy {
            DelegateThreadPolicy::CompleteOnIoThread => job(),
            DelegateThreadPolicy::CompleteOnCallerThread => {
                self.pending.fetch_add(1, Ordering::AcqRel);
                if let Err(mpsc::error::SendError(job)) = self.tx.send(job) {
                    // Receiver lives as long as we do; unreachable in practice.
                    self.pending.fetch_sub(1, Ordering::AcqRel);
                    job();
                }
            }
        }
    }

    /// Run every queued delivery on the current thread.
    ///
    /// Deliveries queued by the delegates themselves wait for the next drain.
    pub(crate) fn drain(&self) -> usize {
        let jobs: Vec<Delivery> = {
            let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };

        let count = jobs.len();
        self.pending.fetch_sub(count, Ordering::AcqRel);
        for job in jobs {
            job();
        }
        count
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}
