use std::sync::Arc;

use tokio::sync::watch;

/// Shared unread-notification counter.
///
/// Only the server's value is ever written. There is no increment: a late or
/// duplicated frame can at worst restore an older authoritative value, which
/// the next frame overwrites.
#[derive(Debug, Clone)]
pub struct UnreadCount {
    inner: Arc<watch::Sender<u64>>,
}

impl Default for UnreadCount {
    fn default() -> Self {
        Self::new()
    }
}

impl UnreadCount {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(tx),
        }
    }

    pub fn get(&self) -> u64 {
        *self.inner.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.subscribe()
    }

    pub(crate) fn set(&self, value: u64) {
        let previous = self.inner.send_replace(value);
        if previous != value {
            tracing::debug!(previous, unread = value, "Unread count updated");
        }
    }

    /// Local reset after the user marked everything read. The next server
    /// frame remains authoritative.
    pub fn reset(&self) {
        self.set(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins() {
        let unread = UnreadCount::new();
        for value in [5, 2, 9, 1, 7] {
            unread.set(value);
        }
        assert_eq!(unread.get(), 7);
    }

    #[test]
    fn clones_observe_same_value() {
        let unread = UnreadCount::new();
        let mut rx = unread.clone().subscribe();
        unread.set(3);
        assert!(rx.has_changed().expect("sender alive"));
        assert_eq!(*rx.borrow_and_update(), 3);
        unread.reset();
        assert_eq!(unread.get(), 0);
    }
}
