//! Single-slot frame handoff that keeps only the newest arrival

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::utils::CachePadded;
use flume::{RecvTimeoutError, SendError, TryRecvError, TrySendError};

/// Create a connected sender/receiver pair.
///
/// At most one item waits in the slot. Sending while it is occupied evicts
/// the waiting item, so the receiver always sees arrivals in order, each at
/// most once, and never more than one behind.
pub fn latest<T>() -> (LatestSender<T>, LatestReceiver<T>) {
    let (tx, rx) = flume::bounded(1);
    let shared = Arc::new(Shared::default());
    (
        LatestSender {
            tx,
            evict: rx.clone(),
            shared: Arc::clone(&shared),
        },
        LatestReceiver { rx, shared },
    )
}

#[derive(Default)]
struct Shared {
    stats: CachePadded<Stats>,
    receiver_gone: AtomicBool,
}

#[derive(Default)]
struct Stats {
    delivered: AtomicU64,
    superseded: AtomicU64,
    taken: AtomicU64,
}

/// Snapshot of the channel counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatestStats {
    /// Items accepted by `send`
    pub delivered: u64,
    /// Items evicted by a newer arrival before anyone took them
    pub superseded: u64,
    /// Items handed to the receiver
    pub taken: u64,
}

impl Shared {
    fn snapshot(&self) -> LatestStats {
        LatestStats {
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            superseded: self.stats.superseded.load(Ordering::Relaxed),
            taken: self.stats.taken.load(Ordering::Relaxed),
        }
    }
}

pub struct LatestSender<T> {
    tx: flume::Sender<T>,
    /// Producer-side handle on the slot, used only to evict
    evict: flume::Receiver<T>,
    shared: Arc<Shared>,
}

impl<T> LatestSender<T> {
    /// Producer: put `item` in the slot, evicting whatever is waiting there.
    ///
    /// Fails, handing the item back, once the receiver has been dropped.
    pub fn send(&self, item: T) -> Result<(), SendError<T>> {
        let mut item = item;
        loop {
            if self.shared.receiver_gone.load(Ordering::Acquire) {
                return Err(SendError(item));
            }
            match self.tx.try_send(item) {
                Ok(()) => {
                    self.shared.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(TrySendError::Full(back)) => {
                    item = back;
                    // The consumer may win the race for the stale item; then
                    // the slot is free and the next try_send succeeds.
                    if let Ok(stale) = self.evict.try_recv() {
                        self.shared.stats.superseded.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!("frames_superseded").increment(1);
                        drop(stale);
                    }
                }
                Err(TrySendError::Disconnected(back)) => return Err(SendError(back)),
            }
        }
    }

    pub fn stats(&self) -> LatestStats {
        self.shared.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.receiver_gone.load(Ordering::Acquire)
    }
}

pub struct LatestReceiver<T> {
    rx: flume::Receiver<T>,
    shared: Arc<Shared>,
}

impl<T> LatestReceiver<T> {
    /// Consumer: block for the next item; `None` once the sender is gone and
    /// the slot is empty.
    pub fn recv(&self) -> Option<T> {
        let item = self.rx.recv().ok()?;
        self.shared.stats.taken.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        let item = self.rx.recv_timeout(timeout)?;
        self.shared.stats.taken.fetch_add(1, Ordering::Relaxed);
        Ok(item)
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let item = self.rx.try_recv()?;
        self.shared.stats.taken.fetch_add(1, Ordering::Relaxed);
        Ok(item)
    }

    pub fn stats(&self) -> LatestStats {
        self.shared.snapshot()
    }
}

impl<T> Drop for LatestReceiver<T> {
    fn drop(&mut self) {
        self.shared.receiver_gone.store(true, Ordering::Release);
        // Release anything still parked in the slot.
        while self.rx.try_recv().is_ok() {}
    }
}
