use parking_lot::{Condvar, Mutex, MutexGuard};
use utilities::TransportChannel;

pub type ChannelGuard<'a> = MutexGuard<'a, Box<dyn TransportChannel>>;

/// Transport shared by the poller and transaction writers of one card.
///
/// The lock is held for one write-then-read round trip. Priority callers
/// (stop transactions) are served before any caller still waiting for a
/// normal turn.
pub struct SharedChannel {
    inner: Mutex<Box<dyn TransportChannel>>,
    priority_waiters: Mutex<usize>,
    priority_done: Condvar,
}

impl SharedChannel {
    pub fn new(channel: Box<dyn TransportChannel>) -> Self {
        Self {
            inner: Mutex::new(channel),
            priority_waiters: Mutex::new(0),
            priority_done: Condvar::new(),
        }
    }

    pub fn lock(&self) -> ChannelGuard<'_> {
        let mut waiters = self.priority_waiters.lock();
        while *waiters > 0 {
            self.priority_done.wait(&mut waiters);
        }
        drop(waiters);
        self.inner.lock()
    }

    pub fn lock_priority(&self) -> ChannelGuard<'_> {
        *self.priority_waiters.lock() += 1;
        let guard = self.inner.lock();

        let mut waiters = self.priority_waiters.lock();
        *waiters -= 1;
        if *waiters == 0 {
            self.priority_done.notify_all();
        }
        guard
    }
}
