//! Per-user learning locks.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::types::UserId;

/// One mutex per user, created on first use.
///
/// Entries are not self-synchronizing; running every learning event of a
/// user through [`UserLocks::with_user`] serializes mutation of that
/// user's entries while other users proceed in parallel.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl UserLocks {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding `user`'s lock.
    pub fn with_user<R>(&self, user: UserId, f: impl FnOnce() -> R) -> R {
        let lock = Arc::clone(self.locks.entry(user).or_default().value());
        let _guard = lock.lock();
        f()
    }

    /// Number of users seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no user was seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn same_user_is_serialized() {
        let locks = UserLocks::new();
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        locks.with_user(UserId(1), || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(now, Ordering::SeqCst);
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                });
            }
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 1);
    }
}
