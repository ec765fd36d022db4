//! Debounced reference counting with grace-period eviction.
//!
//! A counter tracks open references per key. The first reference is reported
//! to the caller synchronously. When the count drops back to zero a timer is
//! armed; if no new reference arrives before it elapses, an [`Expiry`] is
//! delivered on the counter's channel and [`DebouncedRefCounter::expire`]
//! confirms that the zero-reference transition should fire.
//!
//! Every armed timer carries a token. A reference that arrives before expiry
//! aborts the timer and clears the token, so an expiry that was already queued
//! is recognized as stale and ignored.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Grace-period expiry notification for one key.
#[derive(Debug)]
pub struct Expiry<K> {
    pub key: K,
    token: u64,
}

/// Outcome of releasing a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// References remain
    Held(u32),
    /// Count reached zero and the grace timer is armed
    Scheduled,
    /// Release without a matching reference; clamped at zero
    Unmatched,
}

struct PendingEviction {
    token: u64,
    timer: JoinHandle<()>,
}

struct RefEntry {
    count: u32,
    pending: Option<PendingEviction>,
}

impl RefEntry {
    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.timer.abort();
        }
    }
}

/// Reference counter with debounced zero notifications for one scope.
pub struct DebouncedRefCounter<K> {
    scope: &'static str,
    grace: Duration,
    entries: HashMap<K, RefEntry>,
    expiry_sender: mpsc::UnboundedSender<Expiry<K>>,
    next_token: u64,
}

impl<K> DebouncedRefCounter<K>
where
    K: Clone + Eq + Hash + Debug + Send + 'static,
{
    /// Creates a counter and the channel its expiries are delivered on.
    pub fn new(scope: &'static str, grace: Duration) -> (Self, mpsc::UnboundedReceiver<Expiry<K>>) {
        let (expiry_sender, expiry_receiver) = mpsc::unbounded_channel();
        let counter = Self {
            scope,
            grace,
            entries: HashMap::new(),
            expiry_sender,
            next_token: 0,
        };
        (counter, expiry_receiver)
    }

    /// Registers a reference. Returns true on the first reference for `key`.
    ///
    /// Cancels any armed eviction timer for `key`.
    pub fn acquire(&mut self, key: K) -> bool {
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.count += 1;
                entry.cancel_pending();
                tracing::trace!("{} reference {:?} -> {}", self.scope, key, entry.count);
                false
            }
            None => {
                self.entries.insert(
                    key.clone(),
                    RefEntry {
                        count: 1,
                        pending: None,
                    },
                );
                tracing::trace!("{} first reference {:?}", self.scope, key);
                true
            }
        }
    }

    /// Drops a reference, arming the grace timer when the count hits zero.
    pub fn release(&mut self, key: &K) -> Release {
        let Some(entry) = self.entries.get_mut(key) else {
            tracing::warn!("{} release for unknown key {:?} ignored", self.scope, key);
            return Release::Unmatched;
        };

        if entry.count == 0 {
            tracing::warn!(
                "{} release for {:?} below zero clamped",
                self.scope,
                key
            );
            return Release::Unmatched;
        }

        entry.count -= 1;
        if entry.count > 0 {
            tracing::trace!("{} release {:?} -> {}", self.scope, key, entry.count);
            return Release::Held(entry.count);
        }

        entry.cancel_pending();
        self.next_token += 1;
        let token = self.next_token;
        let grace = self.grace;
        let sender = self.expiry_sender.clone();
        let expired_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = sender.send(Expiry {
                key: expired_key,
                token,
            });
        });
        entry.pending = Some(PendingEviction { token, timer });

        tracing::trace!("{} {:?} reached zero, grace {:?}", self.scope, key, grace);
        Release::Scheduled
    }

    /// Confirms an expiry. Returns the key when its zero transition fires.
    ///
    /// The entry is removed on firing. Stale expiries return `None`.
    pub fn expire(&mut self, expiry: Expiry<K>) -> Option<K> {
        let entry = self.entries.get(&expiry.key)?;
        let current = entry.pending.as_ref().map(|pending| pending.token);
        if entry.count != 0 || current != Some(expiry.token) {
            tracing::trace!("{} stale expiry for {:?}", self.scope, expiry.key);
            return None;
        }

        self.entries.remove(&expiry.key);
        Some(expiry.key)
    }

    /// Current count for `key`, zero when untracked.
    pub fn count(&self, key: &K) -> u32 {
        self.entries.get(key).map_or(0, |entry| entry.count)
    }

    /// Whether an eviction timer is armed for `key`.
    pub fn is_pending(&self, key: &K) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.pending.is_some())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry matching `predicate`, cancelling its timer.
    ///
    /// Returns the number of entries removed.
    pub fn forget_where(&mut self, predicate: impl Fn(&K) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            if predicate(key) {
                entry.cancel_pending();
                false
            } else {
                true
            }
        });
        before - self.entries.len()
    }
}

impl<K> Drop for DebouncedRefCounter<K> {
    fn drop(&mut self) {
        for entry in self.entries.values_mut() {
            entry.cancel_pending();
        }
    }
}
