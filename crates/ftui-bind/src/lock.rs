#![forbid(unsafe_code)]

//! Paired sibling locks that keep a two-way binding from feeding back on
//! itself.
//!
//! A [`BindingLock`] pair is two tokens over one shared allocation, one per
//! binding direction. While a direction's leaf applies a value it locks its
//! *sibling*, so whatever notification that write causes on the other
//! direction is dropped instead of being written back.
//!
//! # Invariants
//!
//! 1. A token's counter is only changed by its sibling, never by itself.
//! 2. Counters never go negative: every increment is paired with exactly one
//!    decrement by a [`SiblingGuard`], which releases on every exit path,
//!    unwinding included.
//! 3. Each token owns at most one observer chain. A second `own` is a
//!    lifecycle bug and panics.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::event::lock;
use crate::observer::ObserverChain;

/// Which half of a binding a token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Source to destination.
    Forward,
    /// Destination back to source.
    Reverse,
}

impl Direction {
    /// The opposite direction.
    #[must_use]
    pub fn sibling(self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Reverse => Self::Forward,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Forward => 0,
            Self::Reverse => 1,
        }
    }
}

struct LockPair {
    counters: [AtomicUsize; 2],
    chains: [Mutex<Option<ObserverChain>>; 2],
}

/// One token of a sibling-lock pair.
///
/// Clones refer to the same token.
#[derive(Clone)]
pub struct BindingLock {
    pair: Arc<LockPair>,
    direction: Direction,
}

impl BindingLock {
    /// Create both tokens of a new pair: `(forward, reverse)`.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let pair = Arc::new(LockPair {
            counters: [AtomicUsize::new(0), AtomicUsize::new(0)],
            chains: [Mutex::new(None), Mutex::new(None)],
        });
        (
            Self {
                pair: Arc::clone(&pair),
                direction: Direction::Forward,
            },
            Self {
                pair,
                direction: Direction::Reverse,
            },
        )
    }

    /// Which half of the pair this token is.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The other token of this pair.
    #[must_use]
    pub fn sibling(&self) -> Self {
        Self {
            pair: Arc::clone(&self.pair),
            direction: self.direction.sibling(),
        }
    }

    /// Whether the sibling currently holds this token locked.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.pair.counters[self.direction.index()].load(Ordering::Acquire) > 0
    }

    /// Lock the sibling token until the returned guard drops.
    ///
    /// Locks nest: the sibling stays locked until every guard is gone.
    pub fn lock_sibling(&self) -> SiblingGuard<'_> {
        self.pair.counters[self.direction.sibling().index()].fetch_add(1, Ordering::AcqRel);
        SiblingGuard { lock: self }
    }

    fn unlock_sibling(&self) {
        let prev =
            self.pair.counters[self.direction.sibling().index()].fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "sibling lock counter underflow");
    }

    /// Whether this token currently owns an observer chain.
    #[must_use]
    pub fn owns_chain(&self) -> bool {
        lock(&self.pair.chains[self.direction.index()]).is_some()
    }

    /// Take ownership of the head of this direction's observer chain.
    ///
    /// # Panics
    ///
    /// Panics if the token already owns a chain.
    pub(crate) fn own(&self, chain: ObserverChain) {
        let mut slot = lock(&self.pair.chains[self.direction.index()]);
        assert!(
            slot.is_none(),
            "BindingLock ({:?}) already owns an observer chain",
            self.direction
        );
        *slot = Some(chain);
    }

    /// Detach and drop the owned chain. Returns whether one was owned.
    pub fn dispose(&self) -> bool {
        let chain = lock(&self.pair.chains[self.direction.index()]).take();
        match chain {
            Some(chain) => {
                chain.detach();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for BindingLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingLock")
            .field("direction", &self.direction)
            .field("locked", &self.is_locked())
            .field("owns_chain", &self.owns_chain())
            .finish()
    }
}

/// RAII guard returned by [`BindingLock::lock_sibling`].
#[must_use = "the sibling is unlocked as soon as the guard drops"]
pub struct SiblingGuard<'a> {
    lock: &'a BindingLock,
}

impl Drop for SiblingGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock_sibling();
    }
}

impl fmt::Debug for SiblingGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiblingGuard")
            .field("holder", &self.lock.direction)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_pair_is_unlocked() {
        let (fwd, rev) = BindingLock::pair();
        assert!(!fwd.is_locked());
        assert!(!rev.is_locked());
        assert_eq!(fwd.direction(), Direction::Forward);
        assert_eq!(rev.direction(), Direction::Reverse);
    }

    #[test]
    fn lock_sibling_locks_only_the_sibling() {
        let (fwd, rev) = BindingLock::pair();
        let guard = fwd.lock_sibling();
        assert!(rev.is_locked());
        assert!(!fwd.is_locked());
        drop(guard);
        assert!(!rev.is_locked());
    }

    #[test]
    fn locks_nest() {
        let (fwd, rev) = BindingLock::pair();
        let g1 = fwd.lock_sibling();
        let g2 = fwd.lock_sibling();
        drop(g1);
        assert!(rev.is_locked());
        drop(g2);
        assert!(!rev.is_locked());
    }

    #[test]
    fn guard_releases_on_unwind() {
        let (fwd, rev) = BindingLock::pair();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = fwd.lock_sibling();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(!rev.is_locked());
    }

    #[test]
    fn sibling_token_is_the_same_pair() {
        let (fwd, rev) = BindingLock::pair();
        let sib = fwd.sibling();
        assert_eq!(sib.direction(), Direction::Reverse);
        let _guard = rev.lock_sibling();
        assert!(fwd.is_locked());
        assert!(!sib.is_locked());
    }

    #[test]
    fn dispose_without_chain_is_noop() {
        let (fwd, _rev) = BindingLock::pair();
        assert!(!fwd.owns_chain());
        assert!(!fwd.dispose());
    }

    #[test]
    fn concurrent_lock_counts_balance() {
        let (fwd, rev) = BindingLock::pair();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let fwd = fwd.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let _g = fwd.lock_sibling();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(!rev.is_locked());
    }
}
